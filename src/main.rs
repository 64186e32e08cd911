//! # Connection Synthesis CLI (`synth`)
//!
//! ## Usage
//!
//! ```bash
//! synth --config ./config/synth.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `synth init` | Create the SQLite database and run schema migrations |
//! | `synth import <file.jsonl>` | Register chunk batches as new document versions |
//! | `synth detect <doc> <version>` | Run all engines for a document version and store results |
//! | `synth connections <chunk>...` | Show ranked connections for chunks |
//! | `synth feedback <id> <action>` | Record validate / reject / star |
//! | `synth tune` | Run one weight-tuning cycle |
//! | `synth config show\|set` | Inspect or edit the engine config |
//! | `synth history` | Show the weight adjustment audit log |
//! | `synth prune` | Delete old superseded connections |
//! | `synth stats` | Database summary |
//! | `synth serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use connection_synthesis::{
    config, feedback, import, logging, migrate, query, server, stats, synthesis, tune,
};
use synthesis_core::models::{EngineKind, FeedbackAction, FeedbackContext};

/// Connection Synthesis: discovers relationships between document chunks,
/// ranks them with per-engine weights, and learns from feedback.
#[derive(Parser)]
#[command(name = "synth", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/synth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import chunks (JSON Lines, one chunk per line) as new document versions.
    ///
    /// Versions are immutable: importing a (document, version) pair that
    /// already exists is an error.
    Import {
        /// Path to the .jsonl file.
        path: PathBuf,
    },

    /// Run detection for one document version and store the results.
    Detect {
        document_id: String,
        version_id: String,
    },

    /// Show ranked active connections for the given source chunks.
    Connections {
        #[arg(required = true)]
        chunk_ids: Vec<String>,

        /// Maximum number of rows to print.
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Record feedback on a connection.
    Feedback {
        connection_id: String,

        /// validate (or accept), reject, or star.
        action: FeedbackAction,

        #[arg(long)]
        reading_mode: Option<String>,

        #[arg(long)]
        time_of_day: Option<String>,

        #[arg(long)]
        document_id: Option<String>,
    },

    /// Adjust engine weights from recent feedback.
    Tune {
        /// Defaults to `[user] default_id`.
        #[arg(long)]
        user: Option<String>,
    },

    /// Inspect or edit the engine config.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show weight adjustments, most recent first.
    History {
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete superseded connections older than N days.
    Prune {
        #[arg(long, default_value = "30")]
        older_than_days: i64,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP server on `[server] bind`.
    Serve,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print weights, priority order, and limits.
    Show {
        #[arg(long)]
        user: Option<String>,
    },
    /// Change one engine's weight and/or enabled flag.
    Set {
        engine: EngineKind,

        /// New weight in [0.1, 1.0].
        #[arg(long)]
        weight: Option<f64>,

        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let default_user = cfg.user.default_id.clone();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Detect {
            document_id,
            version_id,
        } => {
            synthesis::run_detect(&cfg, &document_id, &version_id).await?;
        }
        Commands::Connections { chunk_ids, limit } => {
            query::run_connections(&cfg, &chunk_ids, limit).await?;
        }
        Commands::Feedback {
            connection_id,
            action,
            reading_mode,
            time_of_day,
            document_id,
        } => {
            let context = FeedbackContext {
                reading_mode,
                time_of_day,
                document_id,
            };
            feedback::run_feedback(&cfg, &connection_id, action, context).await?;
        }
        Commands::Tune { user } => {
            tune::run_tune(&cfg, user.as_deref().unwrap_or(&default_user)).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { user } => {
                query::run_config_show(&cfg, user.as_deref().unwrap_or(&default_user)).await?;
            }
            ConfigAction::Set {
                engine,
                weight,
                enabled,
                user,
            } => {
                query::run_config_set(
                    &cfg,
                    user.as_deref().unwrap_or(&default_user),
                    engine,
                    weight,
                    enabled,
                )
                .await?;
            }
        },
        Commands::History { user, limit } => {
            query::run_history(&cfg, user.as_deref().unwrap_or(&default_user), limit).await?;
        }
        Commands::Prune { older_than_days } => {
            query::run_prune(&cfg, older_than_days).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
