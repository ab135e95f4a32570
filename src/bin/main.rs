use anyhow::Result;
use campus_identity::auth::Argon2Hasher;
use campus_identity::db::UserCreate;
use campus_identity::{AppConfig, CredentialStore, DatabaseConfig, LogNotifier};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campus-identity")]
#[command(about = "Multi-school session and identity service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Server {
        /// Path to campus.json (defaults to CAMPUS_CONFIG, then the XDG and local locations)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the bind address from the config file
        #[arg(long)]
        bind: Option<String>,
        /// Interval between sweeps of expired verification tokens, in seconds
        #[arg(long, default_value_t = 60)]
        sweep_seconds: u64,
    },
    /// Initialize the database
    Init {
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Create a verified user account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "CAMPUS_USER_PASSWORD")]
        password: String,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("campus_identity=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            config,
            bind,
            sweep_seconds,
        } => {
            let mut config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::load_default()?,
            };
            if let Some(bind) = bind {
                config.http.bind = bind;
            }
            info!("Using database url: {}", config.database.url);

            let service =
                campus_identity::create_identity_service(&config, Arc::new(LogNotifier)).await?;
            let sweeper = service.spawn_sweeper(Duration::from_secs(sweep_seconds.max(1)));

            let app = campus_identity::api::create_router(service.clone());
            let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
            info!("Server listening on http://{}", config.http.bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutting down");
                })
                .await?;

            sweeper.abort();
            service.shutdown().await;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };

            info!("Initializing database...");
            let db = campus_identity::create_connection(db_config).await?;
            campus_identity::ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateUser {
            email,
            name,
            password,
            db_url,
        } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let db = campus_identity::create_connection(db_config).await?;
            campus_identity::ensure_schema(&db).await?;
            let store = CredentialStore::new(db);

            let email = campus_identity::account::normalize_email(&email)?;
            campus_identity::account::validate_password(&password)?;
            if store.get_user_by_email(&email).await?.is_some() {
                anyhow::bail!("a user with email {} already exists", email);
            }

            let config = AppConfig::default();
            let hash = Argon2Hasher::new(&config.password)
                .hash_blocking(password)
                .await?;
            let user = store
                .create_user(&UserCreate::registered(email, name, hash))
                .await?;

            println!("User created successfully!");
            println!();
            println!("  ID:    {}", user.user_id);
            println!("  Email: {}", user.email);
        }
    }

    Ok(())
}
