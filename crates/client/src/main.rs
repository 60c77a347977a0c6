//! CLI for the UTXO auction.
//!
//! This binary provides commands for:
//! - Opening auctions
//! - Placing bids
//! - Closing ended auctions
//! - Listing and inspecting auctions

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use auction_client::RpcChain;
use auction_module::{AuctionService, Clock, ProtocolConfig, SystemClock};
use auction_types::{AuctionMetadata, AuctionRecord, KeyHash, Lovelace};

#[derive(Parser)]
#[command(name = "auction-cli")]
#[command(about = "CLI for the UTXO ascending auction")]
struct Cli {
    /// Mock chain RPC endpoint
    #[arg(long, default_value = "http://127.0.0.1:9944")]
    rpc: String,

    /// Protocol configuration file (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new auction
    CreateAuction {
        /// Seller key hash (hex)
        #[arg(long)]
        seller: KeyHash,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        image: Option<String>,

        /// Absolute deadline (unix millis)
        #[arg(long)]
        deadline: Option<i64>,

        /// Deadline relative to now, used when --deadline is absent
        #[arg(long, default_value = "3600")]
        duration_secs: i64,

        /// Advertised minimum bid
        #[arg(long, default_value = "2000000")]
        min_bid: Lovelace,
    },

    /// Place a bid
    Bid {
        /// Bidder key hash (hex)
        #[arg(long)]
        bidder: KeyHash,

        #[arg(long)]
        auction_id: u64,

        #[arg(long)]
        amount: Lovelace,

        /// Fail on the first lost race instead of retrying
        #[arg(long)]
        no_retry: bool,
    },

    /// Close an ended auction and pay the seller
    Close {
        /// Caller key hash (hex), must be the seller
        #[arg(long)]
        caller: KeyHash,

        #[arg(long)]
        auction_id: u64,
    },

    /// List open auctions, newest first
    List,

    /// Show one auction with its live on-chain state
    Show {
        #[arg(long)]
        auction_id: u64,
    },

    /// Show chain info
    Info,
}

fn print_record(r: &AuctionRecord) {
    let live = r
        .live_ref
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".into());
    println!("  [{}] {} ({:?})", r.id, r.metadata.title, r.status);
    println!("      Seller: {}", r.seller);
    println!("      Deadline: {}", r.deadline);
    println!("      Highest bid: {} by {}", r.highest_bid, r.highest_bidder);
    println!("      Live output: {}", live);
}

async fn create_auction_cmd(
    service: &AuctionService,
    seller: KeyHash,
    metadata: AuctionMetadata,
    deadline: i64,
    min_bid: Lovelace,
) -> Result<()> {
    let record = service
        .create_auction(seller, metadata, deadline, min_bid)
        .await?;
    info!("Created auction with ID: {}", record.id);
    println!("Auction ID: {}", record.id);
    print_record(&record);
    Ok(())
}

async fn bid_cmd(
    service: &AuctionService,
    bidder: KeyHash,
    auction_id: u64,
    amount: Lovelace,
    retry: bool,
) -> Result<()> {
    let out_ref = if retry {
        service
            .place_bid_with_retry(auction_id, bidder, amount)
            .await?
    } else {
        service.place_bid(auction_id, bidder, amount).await?
    };

    println!("Bid accepted");
    println!("  Auction ID: {}", auction_id);
    println!("  Amount: {}", amount);
    println!("  Live output: {}", out_ref);
    Ok(())
}

async fn close_cmd(service: &AuctionService, caller: KeyHash, auction_id: u64) -> Result<()> {
    let receipt = service.close_auction_receipt(auction_id, caller).await?;
    println!("Auction {} closed", auction_id);
    println!("  Paid: {} to {}", receipt.payout.value, receipt.payout.address);
    println!("  Payout output: {}", receipt.payout_ref);
    Ok(())
}

async fn list_cmd(service: &AuctionService) -> Result<()> {
    let auctions = service.list_auctions().await?;
    if auctions.is_empty() {
        println!("No open auctions");
    } else {
        println!("Auctions:");
        for a in &auctions {
            print_record(a);
        }
    }
    Ok(())
}

async fn show_cmd(service: &AuctionService, auction_id: u64) -> Result<()> {
    let record = service.get_auction(auction_id).await?;
    println!("Auction {}:", record.id);
    print_record(&record);
    if !record.metadata.description.is_empty() {
        println!("  Description: {}", record.metadata.description);
    }
    if let Some(image) = &record.metadata.image {
        println!("  Image: {}", image);
    }

    if record.is_open() {
        match service.resolve(auction_id).await {
            Ok(resolved) => {
                let state = resolved.output.datum;
                println!("  On-chain:");
                println!("      Locked: {}", resolved.output.value);
                println!("      Highest bid: {} by {}", state.highest_bid, state.highest_bidder);
            }
            Err(e) => println!("  On-chain state unavailable: {}", e),
        }
    }
    Ok(())
}

async fn info_cmd(chain: &RpcChain, config: &ProtocolConfig) -> Result<()> {
    let info = chain.chain_info().await?;
    println!("Chain:");
    println!("  Height: {}", info.height);
    println!("  Unspent outputs: {}", info.utxo_count);
    println!("  Script address: {}", info.script_address);
    if info.script_address != config.script_address() {
        println!("  Warning: local config uses {}", config.script_address());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("auction_cli=info".parse()?)
                .add_directive("auction_module=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProtocolConfig::from_json_file(path)?,
        None => ProtocolConfig::default(),
    };

    let chain = Arc::new(RpcChain::connect(&cli.rpc, config.ledger_timeout())?);

    let clock = Arc::new(SystemClock);
    let now = clock.now_ms();
    let service = AuctionService::from_config(config, chain.clone(), chain.clone(), clock);

    match cli.command {
        Commands::CreateAuction {
            seller,
            title,
            description,
            image,
            deadline,
            duration_secs,
            min_bid,
        } => {
            let deadline = match deadline {
                Some(d) => d,
                None => duration_secs
                    .checked_mul(1_000)
                    .and_then(|ms| now.checked_add(ms))
                    .ok_or_else(|| anyhow!("Duration out of range"))?,
            };
            let metadata = AuctionMetadata {
                title,
                description,
                image,
            };
            create_auction_cmd(&service, seller, metadata, deadline, min_bid).await?;
        }

        Commands::Bid {
            bidder,
            auction_id,
            amount,
            no_retry,
        } => {
            bid_cmd(&service, bidder, auction_id, amount, !no_retry).await?;
        }

        Commands::Close { caller, auction_id } => {
            close_cmd(&service, caller, auction_id).await?;
        }

        Commands::List => {
            list_cmd(&service).await?;
        }

        Commands::Show { auction_id } => {
            show_cmd(&service, auction_id).await?;
        }

        Commands::Info => {
            info_cmd(&chain, service.config()).await?;
        }
    }

    Ok(())
}
