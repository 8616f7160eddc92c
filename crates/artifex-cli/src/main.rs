// Artifex CLI
//
// Thin front-end over the HTTP API. Exit codes: 0 success, 2 invalid
// submission, 3 transient orchestrator failure, 4 unrecoverable, 5 timeout.

mod client;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use client::{ApiClient, CliError};

#[derive(Parser)]
#[command(name = "artifex")]
#[command(about = "Artifex CLI - submit and inspect generation workflows")]
#[command(version)]
struct Cli {
    /// API base URL
    #[arg(long, env = "ARTIFEX_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a generation request
    Submit {
        /// The natural-language software request
        prompt: String,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        framework: Option<String>,

        /// Artifact kind (api, cli, worker...)
        #[arg(long = "type")]
        kind: Option<String>,

        #[arg(long)]
        name: Option<String>,

        /// Skip test generation stages
        #[arg(long)]
        no_tests: bool,

        /// Skip documentation stage
        #[arg(long)]
        no_docs: bool,

        /// Poll until the workflow reaches a terminal state
        #[arg(long)]
        wait: bool,
    },

    /// Show workflow status
    Status { workflow_id: String },

    /// Fetch the result of a completed workflow
    Result { workflow_id: String },

    /// List a workflow's drops
    Drops {
        workflow_id: String,

        /// Print full artifact bodies instead of summaries
        #[arg(long)]
        full: bool,
    },

    /// Request cancellation
    Cancel { workflow_id: String },

    /// Start an infrastructure sub-workflow
    Infra {
        /// Completed generation workflow id
        workflow_id: String,

        #[arg(long, default_value = "aws")]
        provider: String,

        #[arg(long, default_value = "development")]
        environment: String,

        /// Compliance frameworks (repeatable)
        #[arg(long)]
        compliance: Vec<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = ApiClient::new(cli.api_url);

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code() as u8)
        }
    }
}

async fn run(client: &ApiClient, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Submit {
            prompt,
            language,
            framework,
            kind,
            name,
            no_tests,
            no_docs,
            wait,
        } => {
            let body = json!({
                "prompt": prompt,
                "language": language,
                "framework": framework,
                "type": kind,
                "name": name,
                "generate_tests": !no_tests,
                "generate_docs": !no_docs,
            });

            let started = client.post("/workflows/generate-extended", body).await?;
            let workflow_id = started["workflow_id"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            println!("workflow {workflow_id} started (run {})", started["run_id"]);

            if wait {
                wait_for_terminal(client, &workflow_id).await?;
            }
            Ok(())
        }

        Commands::Status { workflow_id } => {
            let status = client.get(&format!("/workflows/{workflow_id}")).await?;
            print_status(&status);
            Ok(())
        }

        Commands::Result { workflow_id } => {
            let result = client
                .get(&format!("/workflows/{workflow_id}/result"))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            Ok(())
        }

        Commands::Drops { workflow_id, full } => {
            let drops = client
                .get(&format!("/workflows/{workflow_id}/drops"))
                .await?;
            if full {
                println!("{}", serde_json::to_string_pretty(&drops).unwrap_or_default());
            } else {
                for drop in drops.as_array().into_iter().flatten() {
                    println!(
                        "{:>28} v{:<3} {:<18} {} bytes",
                        drop["stage"].as_str().unwrap_or("?"),
                        drop["version"],
                        drop["type"].as_str().unwrap_or("?"),
                        drop["artifact"].as_str().map(str::len).unwrap_or(0),
                    );
                }
            }
            Ok(())
        }

        Commands::Cancel { workflow_id } => {
            client
                .post(&format!("/workflows/{workflow_id}/cancel"), json!({}))
                .await?;
            println!("cancellation requested for {workflow_id}");
            Ok(())
        }

        Commands::Infra {
            workflow_id,
            provider,
            environment,
            compliance,
            dry_run,
        } => {
            let body = json!({
                "workflow_id": workflow_id,
                "provider": provider,
                "environment": environment,
                "compliance": compliance,
                "dry_run": dry_run,
            });
            let started = client
                .post("/workflows/generate-infrastructure", body)
                .await?;
            println!("infrastructure workflow {} started", started["workflow_id"]);
            Ok(())
        }
    }
}

fn print_status(status: &serde_json::Value) {
    println!(
        "status: {}  stage: {}  drops: {}",
        status["status"].as_str().unwrap_or("?"),
        status["current_stage"].as_str().unwrap_or("-"),
        status["drop_count"],
    );
    for warning in status["warnings"].as_array().into_iter().flatten() {
        println!(
            "  warning [{}]: {}",
            warning["stage"].as_str().unwrap_or("?"),
            warning["message"].as_str().unwrap_or("?"),
        );
    }
}

/// Poll until terminal; the terminal state decides the exit code.
async fn wait_for_terminal(client: &ApiClient, workflow_id: &str) -> Result<(), CliError> {
    loop {
        let status = client.get(&format!("/workflows/{workflow_id}")).await?;
        let state = status["status"].as_str().unwrap_or_default().to_string();

        match state.as_str() {
            "completed" => {
                print_status(&status);
                return Ok(());
            }
            "failed" | "cancelled" => {
                print_status(&status);
                return Err(CliError::Unrecoverable(format!("workflow {state}")));
            }
            "timed_out" => {
                print_status(&status);
                return Err(CliError::Timeout("workflow timed out".into()));
            }
            _ => tokio::time::sleep(Duration::from_secs(2)).await,
        }
    }
}
