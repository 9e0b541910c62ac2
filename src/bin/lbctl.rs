use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for the loadstar admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "API_SECRET", hide_env_values = true)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured services
    List,
    /// Show a service's full config
    Config { host: String },
    /// Show a service's metrics
    Metrics { host: String },
    /// Force-run active health probes
    Check { host: String },
    /// Show sticky-session info
    Sessions { host: String },
    /// Clear sticky sessions
    ClearSessions { host: String },
    /// Enable a backend
    Enable { host: String, id: String },
    /// Disable a backend
    Disable { host: String, id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = format!("{}/__lb_admin__", cli.url);
    let response = match cli.command {
        Commands::List => client.get(format!("{base}/list")).headers(headers).send().await?,
        Commands::Config { host } => {
            client
                .get(format!("{base}/services/{host}/config"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Metrics { host } => {
            client
                .get(format!("{base}/services/{host}/metrics"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Check { host } => {
            client
                .post(format!("{base}/services/{host}/health/check"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Sessions { host } => {
            client
                .get(format!("{base}/services/{host}/sessions"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::ClearSessions { host } => {
            client
                .delete(format!("{base}/services/{host}/sessions"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Enable { host, id } => {
            client
                .post(format!("{base}/services/{host}/backends/{id}/enable"))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Disable { host, id } => {
            client
                .post(format!("{base}/services/{host}/backends/{id}/disable"))
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(response).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
