use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Filter, TaskApp};

/// tasks: a task list kept in a local SQLite file.
///
/// Every change is validated, saved with a short debounce and survives
/// storage trouble by falling back to memory.
#[derive(Parser)]
#[command(name = "tasks", version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "tasks.db")]
    db: String,

    /// TOML file with store settings (namespace, debounce, quota).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log store activity to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task.
    Add {
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// List tasks.
    List {
        /// Only show some tasks. Remembered for the next listing.
        #[arg(short, long, value_enum)]
        filter: Option<Filter>,
    },

    /// Mark a task done, or not done again.
    Toggle {
        /// Task id as shown by `list`.
        id: String,
    },

    /// Change a task's text. Empty text deletes the task.
    Edit {
        /// Task id as shown by `list`.
        id: String,

        /// New text.
        #[arg(num_args = 0..)]
        text: Vec<String>,
    },

    /// Delete a task.
    Delete {
        /// Task id as shown by `list`.
        id: String,
    },

    /// Delete every completed task.
    ClearCompleted,

    /// Show estimated storage usage.
    Quota,

    /// Delete every task and preference.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Start an interactive session.
    Shell,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // The store's timers are spawned with `spawn_local`.
    let local = tokio::task::LocalSet::new();
    let result = local.run_until(run(cli)).await;

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> commands::Result {
    let mut app = TaskApp::open(&cli.db, cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Add { text } => commands::add(&mut app, &text.join(" ")),
        Commands::List { filter } => commands::list(&mut app, filter),
        Commands::Toggle { id } => commands::toggle(&mut app, &id),
        Commands::Edit { id, text } => commands::edit(&mut app, &id, &text.join(" ")),
        Commands::Delete { id } => commands::delete(&mut app, &id),
        Commands::ClearCompleted => commands::clear_completed(&mut app),
        Commands::Quota => commands::quota(&app),
        Commands::Reset { yes } => commands::reset(&mut app, yes),
        Commands::Shell => commands::shell(&mut app).await,
    };

    app.close();
    result
}
