//! pactnet-wallet
//!
//! CLI for PactNet entities: manages encrypted keypairs and drives a
//! running node over its REST surface.
//!
//! Usage:
//!   pactnet-wallet keygen     --entity <id> [--keystore <dir>]
//!   pactnet-wallet balance    --entity <id> [--node <url>]
//!   pactnet-wallet transfer   --entity <id> --to <id> --amount <crd>
//!   pactnet-wallet task       --entity <id> --description <text> --reward <crd>
//!   pactnet-wallet services   [--node <url>]
//!   pactnet-wallet reputation --entity <id> [--node <url>]
//!   pactnet-wallet info       [--node <url>]

use anyhow::Context;
use clap::{Parser, Subcommand};

use pactnet_api::AuthService;
use pactnet_core::constants::MICRO_PER_CRD;
use pactnet_core::types::EntityId;
use pactnet_crypto::Keystore;

mod http_client;
use http_client::NodeClient;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "pactnet-wallet",
    version,
    about = "PactNet wallet — keys, balances and marketplace access"
)]
struct Args {
    /// Keystore directory.
    #[arg(long, global = true, env = "PACTNET_KEYSTORE_DIR", default_value = "keys")]
    keystore: std::path::PathBuf,

    /// Node REST endpoint.
    #[arg(long, global = true, env = "PACTNET_NODE", default_value = "http://127.0.0.1:8800")]
    node: String,

    /// Keystore password.
    #[arg(long, global = true, env = "PACTNET_KEY_PASSWORD", default_value = "")]
    password: String,

    /// HS256 secret shared with the node, used to mint bearer tokens for
    /// authenticated operations.
    #[arg(long, global = true, env = "PACTNET_JWT_SECRET", default_value = "pactnet-dev-secret")]
    jwt_secret: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 keypair and save it encrypted.
    Keygen {
        #[arg(long)]
        entity: String,
    },

    /// Print an entity's balance.
    Balance {
        #[arg(long)]
        entity: String,
    },

    /// Transfer CRD to another entity.
    Transfer {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        to: String,
        /// Amount in CRD (converted to micro-credits internally).
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "wallet transfer")]
        description: String,
    },

    /// Create a reward-bearing task (funds are locked immediately).
    Task {
        #[arg(long)]
        entity: String,
        #[arg(long)]
        description: String,
        /// Reward in CRD.
        #[arg(long)]
        reward: f64,
    },

    /// List marketplace services.
    Services,

    /// Show an entity's reputation record.
    Reputation {
        #[arg(long)]
        entity: String,
    },

    /// Node health and supply statistics.
    Info,
}

fn to_micro(crd: f64) -> u64 {
    (crd * MICRO_PER_CRD as f64).round() as u64
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".parse().expect("default filter parses")),
        )
        .init();

    let args = Args::parse();
    let client = NodeClient::new(&args.node);

    match args.command {
        Command::Keygen { entity } => {
            anyhow::ensure!(!args.password.is_empty(), "set --password or PACTNET_KEY_PASSWORD");
            let keystore = Keystore::open(&args.keystore).context("opening keystore")?;
            let keypair = keystore
                .create(&EntityId::new(entity.clone()), &args.password)
                .context("creating keypair")?;
            println!("entity:     {entity}");
            println!("public key: {}", keypair.public_key_hex());
            println!("x25519:     {}", keypair.x25519_public_hex());
        }

        Command::Balance { entity } => {
            let micro = client.balance(&entity).await?;
            println!(
                "{entity}: {} CRD ({micro} micro-credits)",
                micro as f64 / MICRO_PER_CRD as f64
            );
        }

        Command::Transfer { entity, to, amount, description } => {
            let auth = AuthService::new(args.jwt_secret.clone());
            let token = auth
                .issue_token(
                    &EntityId::new(entity.clone()),
                    None,
                    600,
                    chrono::Utc::now().timestamp(),
                )
                .context("minting bearer token")?;
            client
                .transfer(&token, &entity, &to, to_micro(amount), &description)
                .await?;
            println!("transferred {amount} CRD: {entity} -> {to}");
            let remaining = client.balance(&entity).await?;
            println!(
                "remaining: {} CRD",
                remaining as f64 / MICRO_PER_CRD as f64
            );
        }

        Command::Task { entity, description, reward } => {
            let result = client
                .create_task(&entity, &description, to_micro(reward))
                .await?;
            let task_id = result["task"]["task_id"].as_str().unwrap_or("?");
            println!("task created: {task_id} ({reward} CRD locked)");
        }

        Command::Services => {
            let services = client.services().await?;
            println!("{}", serde_json::to_string_pretty(&services)?);
        }

        Command::Reputation { entity } => {
            let rep = client.reputation(&entity).await?;
            println!(
                "{entity}: score {:.1}, tier {}, streak {}",
                rep["current_score"].as_f64().unwrap_or(0.0),
                rep["tier"].as_str().unwrap_or("?"),
                rep["current_streak"].as_u64().unwrap_or(0),
            );
        }

        Command::Info => {
            let health = client.health().await?;
            println!("health: {}", serde_json::to_string_pretty(&health)?);
            let supply = client.supply().await?;
            println!("supply: {}", serde_json::to_string_pretty(&supply)?);
        }
    }
    Ok(())
}
