mod commands;
mod persist;

use crate::commands::CliHelper;
use crate::persist::CliPersistence;
use anyhow::anyhow;
use anyhow::Result;
use clap::Parser;
use commands::CommandResult;
use commands::{execute_command, Commands};
use log::{error, info};
use rustyline::error::ReadlineError;
use rustyline::hint::HistoryHinter;
use rustyline::Editor;
use std::{fs, path::PathBuf};
use student_records_sdk::models::{Config, Environment};
use student_records_sdk::{connect, EventListener, RecordsSdk, SdkEvent};

#[derive(Parser)]
#[command(version, about = "CLI client for the student records SDK", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the data directory
    #[arg(short, long, default_value = "./.data")]
    data_dir: String,

    /// Payment provider environment (production, stage, local)
    #[arg(long, default_value = "stage")]
    environment: String,

    /// Payment provider client id, stored for later sessions
    #[arg(long, env = "RECORDS_CLIENT_ID")]
    client_id: Option<String>,

    /// Payment provider client secret, stored for later sessions
    #[arg(long, env = "RECORDS_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
}

fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Parse a command string into a Commands enum using clap
fn parse_command(input: &str) -> Result<Commands> {
    // Handle exit command specially since it's not exposed in non-interactive mode
    if input.trim() == "exit" || input.trim() == "quit" {
        return Ok(Commands::Exit {});
    }

    let mut args = vec!["records-cli".to_string()];
    args.extend(shlex::split(input).ok_or_else(|| anyhow!("Failed to parse command"))?);

    let cmd = Commands::try_parse_from(&args)?;
    Ok(cmd)
}

struct CliEventListener {}

impl EventListener for CliEventListener {
    fn on_event(&self, event: &SdkEvent) {
        info!("Event received: {:?}", event);
        if let SdkEvent::CacheRolledBack { collection, op } = event {
            println!("Remote {op} on {collection} failed, local changes were undone");
        }
    }
}

async fn run_interactive_mode(
    data_dir: PathBuf,
    environment: Environment,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> Result<()> {
    fs::create_dir_all(&data_dir)?;

    let persistence = CliPersistence {
        data_dir: data_dir.clone(),
    };
    let credentials = persistence.resolve_credentials(client_id, client_secret)?;

    let config = Config::default_config(
        environment,
        data_dir.to_string_lossy().to_string(),
        credentials.client_id,
        credentials.client_secret,
    );
    println!("Using payment provider {}", config.provider);

    RecordsSdk::init_logging(&data_dir.to_string_lossy(), None)?;

    let sdk = connect(config).await?;
    let _listener_id = sdk.add_event_listener(Box::new(CliEventListener {}));

    let helper = CliHelper {
        hinter: HistoryHinter {},
    };
    let mut rl = Editor::new()?;
    rl.set_helper(Some(helper));

    let history_file = persistence.history_file();
    if rl.load_history(&history_file).is_err() {
        error!("Failed to load history");
    }

    println!("Welcome to the student records CLI!");
    println!("Type 'help' to see available commands or 'exit' to quit.");

    loop {
        let readline = rl.readline("records> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match parse_command(line) {
                    Ok(cmd) => {
                        if let Commands::Exit {} = cmd {
                            break;
                        }

                        let res = execute_command(cmd, &sdk).await;
                        show_results(res)?;
                    }
                    Err(e) => println!("Error parsing command: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Err(err) = rl.save_history(&history_file) {
        error!("Failed to save history: {}", err);
    }

    sdk.disconnect()?;

    Ok(())
}

fn show_results(result: Result<String>) -> Result<()> {
    let result_str = match result {
        Ok(r) => r,
        Err(err) => serde_json::to_string_pretty(&CommandResult {
            success: false,
            message: err.to_string(),
        })?,
    };

    println!("{result_str}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let data_dir = expand_path(&cli.data_dir)?;
    let environment: Environment = cli.environment.parse()?;

    run_interactive_mode(data_dir, environment, cli.client_id, cli.client_secret).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert!(matches!(parse_command("quit").unwrap(), Commands::Exit {}));
        assert!(matches!(
            parse_command("add-student --name 'Noor Ahmed' --stage s1").unwrap(),
            Commands::AddStudent { name, stage: Some(stage), .. } if name == "Noor Ahmed" && stage == "s1"
        ));
        assert!(matches!(
            parse_command("mark-attendance s1 e1 e2 --status late").unwrap(),
            Commands::MarkAttendance { enrollments, .. } if enrollments.len() == 2
        ));
        assert!(parse_command("mark-attendance s1 e1 --status sleeping").is_err());
    }
}
