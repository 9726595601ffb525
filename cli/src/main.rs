mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{cmd_goals, cmd_history, cmd_stats};
use crate::config::Config;
use crate::server::{AppState, ServerSettings};
use nutricoach_core::catalog::StaticFoodCatalog;
use nutricoach_core::db::Database;

#[derive(Parser)]
#[command(
    name = "nutricoach",
    version,
    about = "Meal and nutrition tracking server",
    long_about = "NutriCoach: log meals, track goals and weight, and review daily nutrition.\n\
                  Run `nutricoach serve` to host the JSON API; the other commands print\n\
                  a user's data straight from the database."
)]
struct Cli {
    /// Database file (default: platform data directory)
    #[arg(long, global = true, env = "NUTRICOACH_DB", value_name = "PATH")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "NUTRICOACH_PORT")]
        port: u16,
        /// Address to bind to (use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1", env = "NUTRICOACH_BIND")]
        bind: String,
        /// Session lifetime in days
        #[arg(
            long,
            default_value = "7",
            env = "NUTRICOACH_SESSION_DAYS",
            value_parser = clap::value_parser!(i64).range(1..=365)
        )]
        session_days: i64,
        /// Mark session cookies Secure (set when served over HTTPS)
        #[arg(long, env = "NUTRICOACH_SECURE_COOKIES")]
        secure_cookies: bool,
        /// Google OAuth client id; enables the provider listing
        #[arg(long, env = "NUTRICOACH_GOOGLE_CLIENT_ID", hide_env_values = true)]
        google_client_id: Option<String>,
        /// GitHub OAuth client id; enables the provider listing
        #[arg(long, env = "NUTRICOACH_GITHUB_CLIENT_ID", hide_env_values = true)]
        github_client_id: Option<String>,
    },
    /// Show a user's nutrition totals and meals for a day
    Stats {
        /// Account email
        email: String,
        /// Date (YYYY-MM-DD, today, yesterday; default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's daily totals for recent days
    History {
        /// Account email
        email: String,
        /// Number of days to show
        #[arg(
            short,
            long,
            default_value = "7",
            value_parser = clap::value_parser!(u32).range(1..=365)
        )]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a user's goals, newest first
    Goals {
        /// Account email
        email: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            session_days,
            secure_cookies,
            google_client_id,
            github_client_id,
        } => {
            let social_providers = [("google", google_client_id), ("github", github_client_id)]
                .into_iter()
                .filter(|(_, id)| id.as_deref().is_some_and(|id| !id.trim().is_empty()))
                .map(|(name, _)| name.to_string())
                .collect();
            let settings = ServerSettings {
                session_days,
                secure_cookies,
                social_providers,
            };
            tracing::info!(db = %config.db_path.display(), "opened database");
            let state = AppState::new(db, Arc::new(StaticFoodCatalog::new()), settings);
            server::start_server(state, &bind, port).await
        }
        Commands::Stats { email, date, json } => cmd_stats(&db, &email, date, json),
        Commands::History { email, days, json } => cmd_history(&db, &email, days, json),
        Commands::Goals { email, json } => cmd_goals(&db, &email, json),
    }
}
