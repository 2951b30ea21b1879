use authenticator::{jobs, settings, storage, tokens, web};
use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "authenticator",
    version,
    about = "Username/password authentication with TOTP second factor"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;

    // signing keys for access, refresh and challenge tokens
    let token_keys = tokens::TokenKeys::from_settings(&settings.jwt)?;

    // background jobs; the scheduler stops when dropped
    let _scheduler = jobs::init_scheduler(db.clone()).await?;

    // start web server
    web::serve(settings, db, token_keys).await?;
    Ok(())
}
