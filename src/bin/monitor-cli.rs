use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "monitor-cli")]
#[command(about = "Management CLI for the resilience monitor dashboard API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check monitor status and fleet score
    Status,
    /// Show the latest dashboard snapshot
    Dashboard,
    /// List critical and warning breakers
    Alerts,
    /// Show error summaries and trends
    Errors,
    /// Filter the dashboard by breaker, error code and time window
    Query {
        #[arg(long)]
        breaker: Option<String>,
        #[arg(long)]
        code: Option<String>,
        /// Only errors seen in the last N seconds
        #[arg(long)]
        window: Option<u64>,
    },
    /// Show trace trees, or the span summary with --summary
    Traces {
        #[arg(long)]
        trace_id: Option<String>,
        #[arg(long)]
        summary: bool,
    },
    /// Export spans in trace-viewer format
    Export {
        #[arg(long)]
        trace_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/status")),
        Commands::Dashboard => client.get(format!("{base}/dashboard")),
        Commands::Alerts => client.get(format!("{base}/alerts")),
        Commands::Errors => client.get(format!("{base}/errors")),
        Commands::Query { breaker, code, window } => {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(breaker) = breaker {
                params.push(("breaker_name", breaker));
            }
            if let Some(code) = code {
                params.push(("error_code", code));
            }
            if let Some(window) = window {
                params.push(("time_window_secs", window.to_string()));
            }
            client.get(format!("{base}/dashboard/query")).query(&params)
        }
        Commands::Traces { trace_id, summary: true } => {
            if trace_id.is_some() {
                eprintln!("Note: --trace-id is ignored with --summary");
            }
            client.get(format!("{base}/traces/summary"))
        }
        Commands::Traces { trace_id, summary: false } => {
            client.get(format!("{base}/traces/tree")).query(&trace_param(trace_id))
        }
        Commands::Export { trace_id } => {
            client.get(format!("{base}/traces/export")).query(&trace_param(trace_id))
        }
    };

    print_response(request.send().await?).await
}

fn trace_param(trace_id: Option<String>) -> Vec<(&'static str, String)> {
    trace_id.map(|id| vec![("trace_id", id)]).unwrap_or_default()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: dashboard API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
