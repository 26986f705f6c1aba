//! Deputy CLI - drive sessions and workflows on a Deputy server

mod client;
mod messages;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use client::DeputyClient;
use messages::{StepStatus, WorkflowRun};

#[derive(Parser)]
#[command(name = "deputy-cli")]
#[command(about = "CLI client for the Deputy delegation broker")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "DEPUTY_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new session
    Session,

    /// Print the login URL for a session
    LoginUrl {
        #[arg(short, long)]
        session: Uuid,

        /// Requested scopes
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },

    /// Complete login with the code from the identity provider redirect
    Complete {
        #[arg(short, long)]
        session: Uuid,

        #[arg(short, long)]
        code: String,
    },

    /// Show session status
    Status {
        #[arg(short, long)]
        session: Uuid,
    },

    /// Run one workflow request
    Run {
        #[arg(short, long)]
        session: Uuid,

        #[arg(short, long)]
        request: String,
    },

    /// List audit entries
    Audit {
        /// Only entries for this operation, e.g. token_exchange
        #[arg(short, long)]
        operation: Option<String>,
    },

    /// Interactive prompt; every line is a workflow request
    Repl {
        #[arg(short, long)]
        session: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deputy_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let client = DeputyClient::new(&cli.server)?;

    match cli.command {
        Commands::Session => {
            let session = client.create_session().await?;
            println!("{}", session.session_id);
        }
        Commands::LoginUrl { session, scopes } => {
            println!("{}", client.authorization_url(session, &scopes).await?);
        }
        Commands::Complete { session, code } => {
            let status = client.complete_login(session, &code).await?;
            println!(
                "Logged in as {}",
                status.user_subject.as_deref().unwrap_or("unknown user")
            );
        }
        Commands::Status { session } => {
            let status = client.session_status(session).await?;
            println!("Session:       {}", status.session_id);
            println!("Authenticated: {}", status.authenticated);
            if let Some(expiry) = status.token_expiry {
                println!("Token expiry:  {}", expiry.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(subject) = status.user_subject {
                println!("Subject:       {}", subject);
            }
        }
        Commands::Run { session, request } => {
            let run = client.run_workflow(session, &request).await?;
            print_run(&run);
        }
        Commands::Audit { operation } => run_audit(&client, operation.as_deref()).await?,
        Commands::Repl { session } => run_repl(&client, session).await?,
    }

    Ok(())
}

fn print_run(run: &WorkflowRun) {
    println!("Run {} ({})", run.run_id, run.phase);
    if let Some(failure) = &run.failure {
        println!("Failed: {}", failure);
    }

    let Some(report) = &run.report else {
        return;
    };
    println!("{:─<60}", "");
    println!("{}", report.summary);
    println!("{:─<60}", "");

    let skipped: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Skipped)
        .map(|s| s.step_index.to_string())
        .collect();
    println!(
        "{} succeeded, {} failed, {} skipped{}",
        report.succeeded,
        report.failed,
        report.skipped,
        if skipped.is_empty() {
            String::new()
        } else {
            format!(" (steps {})", skipped.join(", "))
        }
    );
}

async fn run_audit(client: &DeputyClient, operation: Option<&str>) -> Result<()> {
    let entries = client.audit(operation).await?;

    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{} {:<26} {} -> {} {}{}",
            entry.timestamp.format("%H:%M:%S"),
            entry.operation,
            entry.actor,
            entry.target,
            if entry.success { "ok" } else { "FAILED" },
            entry
                .error
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
        if !entry.scopes.is_empty() {
            println!("{:>10}scopes: {}", "", entry.scopes.join(" "));
        }
        if let Some(subject) = entry.subject {
            println!("{:>10}on behalf of: {}", "", subject);
        }
    }

    Ok(())
}

async fn run_repl(client: &DeputyClient, session_id: Uuid) -> Result<()> {
    let status = client.session_status(session_id).await?;
    if !status.authenticated {
        anyhow::bail!("Session {} is not logged in", session_id);
    }

    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("deputy".to_string()),
        DefaultPromptSegment::Empty,
    );

    println!("Enter a request per line. Ctrl-D to exit.");
    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(line) => {
                let request = line.trim();
                if request.is_empty() {
                    continue;
                }
                match client.run_workflow(session_id, request).await {
                    Ok(run) => print_run(&run),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Signal::CtrlD => break,
            _ => continue,
        }
    }

    Ok(())
}
