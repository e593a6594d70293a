use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "probe-cli")]
#[command(about = "Client for a running probe-gate instance", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call the availability probe
    Availability {
        #[arg(long, default_value = "/Availability")]
        path: String,
    },
    /// Call the health probe
    Health {
        #[arg(long, default_value = "/Health")]
        path: String,
    },
    /// Request an access token
    Token {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "/auth")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Availability { path } | Commands::Health { path } => {
            client.get(format!("{base}{path}")).send().await?
        }
        Commands::Token {
            username,
            password,
            path,
        } => {
            client
                .post(format!("{base}{path}"))
                .json(&json!({
                    "grant_type": "password",
                    "username": username,
                    "password": password,
                }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if status.is_success() {
        println!("{rendered}");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Error: server returned status {status}");
        eprintln!("{rendered}");
        Ok(ExitCode::FAILURE)
    }
}
