// chatline/crates/chatline/src/main.rs

#[cfg(feature = "cli")]
use chatline::{chat_db::ChatDatabase, config::Config, run_server, telemetry};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "chatline", version, about = "Chat transcript server with streaming completions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
    /// Print database statistics as JSON
    Stats,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Migrate => {
            let db = ChatDatabase::new(&cfg.database_path, 1)?;
            println!(
                "{} is at schema version {}",
                cfg.database_path.display(),
                db.schema_version()?
            );
            Ok(())
        }
        Command::Stats => {
            let db = ChatDatabase::new(&cfg.database_path, 1)?;
            let stats = db.get_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
