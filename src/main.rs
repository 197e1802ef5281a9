// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `plantchain` - command-line client for the PlantChain points ledger.
//!
//! ```bash
//! # Which chain, which account, mock or relay?
//! plantchain status
//!
//! # Credit one encrypted point and show the new balance handle
//! plantchain add-point
//!
//! # Reveal the balance (public decryption, or sign a user decryption)
//! plantchain decrypt
//! plantchain decrypt --user
//!
//! # Read another owner's point log, paying the view fee first
//! plantchain point-logs 3 --pay
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::U256;
use anyhow::Context;
use clap::{Parser, Subcommand};

use plantchain_client::blockchain::{AlloyLedger, LocalWalletTransport, NewPlant, PointsLedgerEntry};
use plantchain_client::config::{
    ClientConfig, KeySource, DEFAULT_LOG_FILTER, DEPLOYMENTS_ENV, LOG_FORMAT_ENV, PRIVATE_KEY_ENV,
    RELAYER_URL_ENV, RPC_URL_ENV, WALLET_KEY_ENV,
};
use plantchain_client::fhevm::relayer::{HttpRuntimeLoader, MissingCodec};
use plantchain_client::fhevm::{detect_mode, InstanceFactory, NetworkMode, RuntimeBootstrapper};
use plantchain_client::logging::{self, LogFormat};
use plantchain_client::{ClientError, DecryptStrategy, PointsLedgerClient};

/// Confidential eco-points client for PlantChain
#[derive(Parser)]
#[command(name = "plantchain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Confidential eco-points client for PlantChain", long_about = None)]
struct Cli {
    /// JSON-RPC endpoint
    #[arg(long, global = true, env = RPC_URL_ENV)]
    rpc_url: Option<String>,

    /// PEM file with the wallet key
    #[arg(long, global = true, env = WALLET_KEY_ENV)]
    wallet_key: Option<PathBuf>,

    /// Hex wallet key (ignored when --wallet-key is set)
    #[arg(long, global = true, env = PRIVATE_KEY_ENV, hide_env_values = true)]
    private_key: Option<String>,

    /// Ledger address book
    #[arg(long, global = true, env = DEPLOYMENTS_ENV)]
    deployments: Option<PathBuf>,

    /// Relayer base URL
    #[arg(long, global = true, env = RELAYER_URL_ENV)]
    relayer_url: Option<String>,

    /// Log output format
    #[arg(long, global = true, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show chain, account, ledger deployment and cryptosystem mode
    Status,

    /// Credit one encrypted point to your account
    AddPoint,

    /// Send one encrypted point to a plant's owner
    Tip { plant_id: u64 },

    /// Reveal your point balance
    Decrypt {
        /// Sign a user decryption instead of asking for public decryption
        #[arg(long)]
        user: bool,
    },

    /// Register a plant
    CreatePlant {
        #[arg(long)]
        name: String,
        #[arg(long)]
        species: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Content id of an already uploaded image
        #[arg(long, default_value = "")]
        image_id: String,
    },

    /// Add a growth log to one of your plants
    AddLog {
        plant_id: u64,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "")]
        image_id: String,
    },

    /// Mint a plant as an NFT
    Mint { plant_id: u64 },

    /// Show a plant's point log
    PointLogs {
        plant_id: u64,
        /// Pay the view fee before reading
        #[arg(long)]
        pay: bool,
    },
}

struct Session {
    config: ClientConfig,
    transport: Arc<LocalWalletTransport>,
    client: PointsLedgerClient,
}

async fn connect(config: ClientConfig) -> anyhow::Result<Session> {
    let signer = config.key.signer().context("failed to load wallet key")?;
    let transport = Arc::new(LocalWalletTransport::new(&config.rpc_url, signer)?);
    let ledger = Arc::new(AlloyLedger::new(transport.provider().clone(), transport.address()));

    let loader = HttpRuntimeLoader::new(config.relayer.relayer_url.clone(), Arc::new(MissingCodec))?;
    let factory = InstanceFactory::new(
        Arc::new(RuntimeBootstrapper::new(Arc::new(loader))),
        config.relayer.clone(),
    );
    let deployments = config
        .load_deployments()
        .with_context(|| format!("failed to read {}", config.deployments_path.display()))?;

    let client =
        PointsLedgerClient::connect(transport.clone(), ledger, Arc::new(factory), deployments).await?;
    Ok(Session {
        config,
        transport,
        client,
    })
}

fn print_point_logs(entries: &[PointsLedgerEntry]) {
    if entries.is_empty() {
        println!("No point log entries");
        return;
    }
    for entry in entries {
        let when = i64::try_from(entry.timestamp)
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| entry.timestamp.to_string());
        println!(
            "{when}  +{}  {:<24} from {}",
            entry.amount,
            entry.reason.label(),
            entry.from_address
        );
    }
}

async fn run(command: Commands, session: &Session) -> anyhow::Result<()> {
    let client = &session.client;
    match command {
        Commands::Status => {
            println!("Account:  {}", client.account());
            println!("Chain:    {}", client.chain_id());
            match client.network() {
                Ok(network) => println!("Ledger:   {}", network.contract_address),
                Err(e) => println!("Ledger:   {e}"),
            }
            match detect_mode(session.transport.as_ref(), &session.config.relayer).await {
                NetworkMode::Mock(config) => println!(
                    "Mode:     mock (KMS verifier {})",
                    config.metadata.kms_verifier_address
                ),
                NetworkMode::Relay(config) => println!("Mode:     relay ({})", config.relayer_url),
            }
        }
        Commands::AddPoint => {
            let receipt = client.add_point().await?;
            println!("Point added in block {}", receipt.block_number);
            if let Some(handle) = client.displayed().handle {
                println!("Balance handle: {handle}");
            }
        }
        Commands::Tip { plant_id } => {
            let receipt = client.tip_point(U256::from(plant_id)).await?;
            println!("Tipped plant {plant_id} in block {}", receipt.block_number);
        }
        Commands::Decrypt { user } => {
            let strategy = if user {
                DecryptStrategy::User
            } else {
                DecryptStrategy::Public
            };
            match client.reveal(strategy).await {
                Ok(Some(points)) => println!("Points: {points}"),
                Ok(None) => println!("Balance view changed before the result arrived"),
                Err(e) if e.is_access_denied() => {
                    println!("Balance is not publicly decryptable; rerun with --user to sign a user decryption");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::CreatePlant {
            name,
            species,
            description,
            image_id,
        } => {
            let plant = NewPlant {
                name,
                species,
                description,
                image_id,
            };
            let receipt = client.create_plant(&plant).await?;
            println!("Plant registered in block {}", receipt.block_number);
            let plants = client.my_plants().await?;
            if let Some(id) = plants.last() {
                println!("Plant id: {id}");
            }
        }
        Commands::AddLog {
            plant_id,
            text,
            image_id,
        } => {
            let receipt = client
                .add_growth_log(U256::from(plant_id), &text, &image_id)
                .await?;
            println!("Growth log added in block {}", receipt.block_number);
        }
        Commands::Mint { plant_id } => {
            let plant_id = U256::from(plant_id);
            if client.is_minted(plant_id).await? {
                println!("Plant {plant_id} is already minted");
                return Ok(());
            }
            let receipt = client.mint_plant_nft(plant_id).await?;
            println!("Minted plant {plant_id} in block {}", receipt.block_number);
        }
        Commands::PointLogs { plant_id, pay } => {
            let plant_id = U256::from(plant_id);
            let entries = if pay {
                client.load_point_logs(plant_id).await
            } else {
                client.point_logs(plant_id).await
            };
            match entries {
                Ok(entries) => print_point_logs(&entries),
                Err(ClientError::CallRejected(reason)) if !pay => {
                    println!("Point log is locked ({reason}); rerun with --pay to pay the view fee");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(DEFAULT_LOG_FILTER, cli.log_format)?;

    let key = KeySource::resolve(cli.wallet_key, cli.private_key).with_context(|| {
        format!("no wallet key: set {WALLET_KEY_ENV} or {PRIVATE_KEY_ENV}")
    })?;
    let config = ClientConfig::new(cli.rpc_url, key, cli.deployments).with_relayer_url(cli.relayer_url);

    let session = connect(config).await?;
    run(cli.command, &session).await
}
