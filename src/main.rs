use anyhow::Result;
use clap::{Parser, Subcommand};
use explorer_cli::transport::{self, RunOptions};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "explorer")]
#[command(author, version = env!("EXPLORER_VERSION"), about = "Explorer - research chat assistant with web search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Gemini model to use (default gemini-2.5-flash; any model id works, e.g. gemini-2.5-pro)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Search results handed to the model per query (1-10)
    #[arg(long, global = true)]
    max_results: Option<usize>,

    /// Config file (default: platform config dir, explorer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive research chat (default)
    Chat,

    /// Answer one question and exit
    Ask {
        /// The question to research
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Run a web search without the model and print the results
    Search {
        /// Search query
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Number of results (1-10)
        #[arg(short = 'n', long)]
        num: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays the conversation
    let filter = if cli.verbose {
        "explorer_cli=debug,explorer=debug"
    } else {
        "explorer_cli=warn,explorer=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = RunOptions {
        config_path: cli.config,
        model: cli.model,
        max_results: cli.max_results,
    };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            transport::cli::run_chat(&options).await?;
        }
        Commands::Ask { question } => {
            transport::cli::run_ask(&options, &question.join(" ")).await?;
        }
        Commands::Search { query, num } => {
            transport::cli::run_search(&options, &query.join(" "), num).await?;
        }
    }

    Ok(())
}
