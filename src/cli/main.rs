use clap::{Parser, Subcommand};
use reqwest::Client;
use std::error::Error;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Stream relay CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an invoice message
    Invoice {
        #[arg(value_name = "PAYLOAD")]
        payload: String,
    },

    /// Publish a payment message
    Payment {
        #[arg(value_name = "PAYLOAD")]
        payload: String,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Invoice { payload } => {
            send(&client, &format!("{}/sendInvoice", cli.endpoint), payload).await?;
        }

        Commands::Payment { payload } => {
            send(&client, &format!("{}/sendPayment", cli.endpoint), payload).await?;
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;

            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn send(client: &Client, url: &str, payload: String) -> Result<(), Box<dyn Error>> {
    let response = client.post(url).body(payload).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        println!("{}", body);
        Ok(())
    } else {
        Err(format!("request failed with {}: {}", status, body).into())
    }
}
