//! Gantry API server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gantry_api::services::github::GitHubStatusApi;
use gantry_api::{AppState, routes};
use gantry_core::remote::{NullStatusApi, RemoteStatusApi};
use gantry_db::{CiStore, GitRepo, MemoryStore, PgStore, create_pool, run_migrations};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantry-server")]
#[command(about = "Gantry CI scheduler server", long_about = None)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "GANTRY_LISTEN", default_value = "0.0.0.0:3000")]
        listen: SocketAddr,
        /// Directory of recipe files synced at startup
        #[arg(long, env = "GANTRY_RECIPES")]
        recipes: Option<PathBuf>,
        /// Shared secret for signed trigger intake
        #[arg(long, env = "GANTRY_WEBHOOK_SECRET")]
        webhook_secret: Option<String>,
        /// Token for posting commit statuses to GitHub
        #[arg(long, env = "GANTRY_GITHUB_TOKEN")]
        github_token: Option<String>,
        /// GitHub API URL, for GitHub Enterprise
        #[arg(long, env = "GANTRY_GITHUB_API_URL")]
        github_api_url: Option<String>,
        /// Public URL of this server, used for status links
        #[arg(long, env = "GANTRY_BASE_URL")]
        base_url: Option<String>,
        /// Keep all state in memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },
    /// Print the build key workers use to build for a user
    BuildKey {
        /// Git server host
        #[arg(long, default_value = "github.com")]
        server: String,
        /// User name on the git server
        user: String,
    },
    /// Validate a directory of recipe files
    CheckRecipes {
        /// Recipes directory
        #[arg(default_value = "recipes")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            recipes,
            webhook_secret,
            github_token,
            github_api_url,
            base_url,
            in_memory,
        } => {
            let store: Arc<dyn CiStore> = if in_memory {
                warn!("Using in-memory store; state is lost on exit");
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(connect(cli.database_url.as_deref()).await?)
            };

            if let Some(dir) = recipes {
                sync_recipes(store.as_ref(), &dir).await?;
            }

            let remote: Arc<dyn RemoteStatusApi> = match (github_token, github_api_url) {
                (Some(token), Some(url)) => Arc::new(GitHubStatusApi::with_api_url(url, token)),
                (Some(token), None) => Arc::new(GitHubStatusApi::new(token)),
                (None, _) => {
                    info!("No GitHub token configured; commit statuses are not posted");
                    Arc::new(NullStatusApi)
                }
            };

            let mut state = AppState::with_base_url(store, remote, base_url);
            if let Some(secret) = webhook_secret {
                state = state.with_webhook_secret(secret);
            } else {
                warn!("No webhook secret configured; trigger intake is unsigned");
            }

            let app = routes::router(state)
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                );

            info!(%listen, "Starting server");
            let listener = TcpListener::bind(listen).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("Server stopped");
        }
        Commands::BuildKey { server, user } => {
            let store = connect(cli.database_url.as_deref()).await?;
            let (user, created) = store.get_or_create_user(&server, &user).await?;
            if created {
                info!(user = %user.name, server = %user.server, "Created user");
            }
            println!("{}", user.build_key);
        }
        Commands::CheckRecipes { path } => {
            let specs = gantry_config::load_recipe_dir(&path)
                .with_context(|| format!("invalid recipes in {}", path.display()))?;
            for spec in &specs {
                println!(
                    "{} ({}, {}, {} step(s))",
                    spec.name,
                    spec.repository,
                    spec.cause,
                    spec.steps.len()
                );
            }
            println!("{} recipe(s) OK", specs.len());
        }
    }

    Ok(())
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgStore> {
    let database_url = database_url.context("DATABASE_URL is not set")?;
    info!("Connecting to database...");
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    info!("Database connected");
    Ok(PgStore::new(pool))
}

async fn sync_recipes(store: &dyn CiStore, dir: &Path) -> anyhow::Result<()> {
    let specs = gantry_config::load_recipe_dir(dir)
        .with_context(|| format!("failed to load recipes from {}", dir.display()))?;
    let recipes = store.sync_recipes(&specs).await?;
    info!(count = recipes.len(), dir = %dir.display(), "Synced recipes");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
