pub mod app;
pub mod builders;
pub mod db;

pub use app::{cookie_from, TestApp};
pub use builders::{SessionBuilder, TestUser, UserBuilder};
pub use db::TestDb;
