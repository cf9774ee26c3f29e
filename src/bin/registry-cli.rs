use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "registry-cli")]
#[command(about = "Management CLI for the service registry", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// API secret. Leave empty when the server has none.
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every service and node
    Data,
    /// Manage services
    Services {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// List the nodes of a service
    Nodes { service_id: String },
    /// Select a node from a service
    Select { service_id: String },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Register a service
    Add {
        service_id: String,
        #[arg(short, long, default_value = "SWRR")]
        load_balance: String,
    },
    /// Remove a service and its nodes
    Delete { service_id: String },
}

fn encode(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let request = match cli.command {
        Commands::Data => client.get(format!("{}/data", cli.url)),
        Commands::Services { command } => match command {
            ServiceCommands::Add {
                service_id,
                load_balance,
            } => client
                .post(format!("{}/services", cli.url))
                .json(&json!({ "service_id": service_id, "load_balance": load_balance })),
            ServiceCommands::Delete { service_id } => {
                client.delete(format!("{}/services/{}", cli.url, encode(&service_id)))
            }
        },
        Commands::Nodes { service_id } => {
            client.get(format!("{}/services/{}/nodes", cli.url, encode(&service_id)))
        }
        Commands::Select { service_id } => {
            client.get(format!("{}/services/{}/select", cli.url, encode(&service_id)))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }

    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
