pub mod job_execution;
pub mod session;
pub mod user;
pub mod user_credentials;

pub use job_execution::Entity as JobExecution;
pub use session::Entity as Session;
pub use user::Entity as User;
pub use user_credentials::Entity as UserCredentials;
