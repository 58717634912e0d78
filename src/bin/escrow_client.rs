//! Escrow Client CLI
//!
//! Inspect and drive a property escrow from the command line.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin escrow-client -- --config config/escrow-client.toml show 0x...
//! cargo run --bin escrow-client -- watch 0x... --interval-ms 2000
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! ESCROW_CLIENT_CONFIG_PATH=escrow-client.toml cargo run --bin escrow-client -- spot-rate
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use escrow_client::{ClientConfig, EscrowClient, EscrowSnapshot, RefreshStatus, TxOutcome};
use ethereum_types::U256;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "escrow-client")]
#[command(about = "Inspect and drive an on-chain property escrow")]
struct Args {
    /// Path to configuration file (default: config/escrow-client.toml or ESCROW_CLIENT_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current state of an escrow
    Show {
        /// Escrow contract address
        escrow: String,
    },

    /// Pay the sale price into an escrow (buyer's solicitor only)
    Deposit {
        /// Escrow contract address
        escrow: String,
    },

    /// Confirm checks passed and complete the sale (buyer's solicitor only)
    Verify {
        /// Escrow contract address
        escrow: String,
    },

    /// Poll an escrow and print every fresh snapshot until Ctrl+C
    Watch {
        /// Escrow contract address
        escrow: String,

        /// Poll interval in milliseconds (overrides the config file)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Convert a fiat amount into native units
    Convert {
        /// Fiat amount, e.g. 250000 or 1999.99
        amount: String,
    },

    /// Print the current fiat price of one native unit
    SpotRate,

    /// Print the owner of a property token
    OwnerOf {
        /// Token ID (decimal)
        token_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first (before initializing logging)
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let mut config = ClientConfig::load_from_path(args.config.as_deref())?;
    info!("Ledger: {} (chain ID: {})", config.ledger.name, config.ledger.chain_id);

    // Only `watch` keeps polling after the first read
    config.service.auto_refresh = matches!(args.command, Commands::Watch { .. });
    if let Commands::Watch {
        interval_ms: Some(interval_ms),
        ..
    } = &args.command
    {
        if *interval_ms == 0 {
            anyhow::bail!("--interval-ms must be greater than 0");
        }
        config.service.polling_interval_ms = *interval_ms;
    }

    let client = EscrowClient::connect(&config).await?;
    info!("Acting as {}", client.account());

    let result = run(&client, args.command).await;
    client.shutdown().await;
    result
}

async fn run(client: &EscrowClient, command: Commands) -> Result<()> {
    match command {
        Commands::Show { escrow } => {
            let snapshot = client.load_escrow(&escrow).await?;
            print_snapshot(&snapshot);
        }
        Commands::Deposit { escrow } => {
            client.load_escrow(&escrow).await?;
            let outcome = client.deposit().await?;
            print_outcome(&outcome);
        }
        Commands::Verify { escrow } => {
            client.load_escrow(&escrow).await?;
            let outcome = client.verify_and_complete().await?;
            print_outcome(&outcome);
        }
        Commands::Watch { escrow, .. } => {
            let mut updates = client.session().subscribe();
            let snapshot = client.load_escrow(&escrow).await?;
            print_snapshot(&snapshot);
            let _ = updates.borrow_and_update();

            let mut last = snapshot;
            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = updates.borrow_and_update().clone();
                        if let Some(current) = current {
                            if current != last {
                                print_snapshot(&current);
                                last = current;
                            }
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Received shutdown signal, stopping watch...");
                        break;
                    }
                }
            }
        }
        Commands::Convert { amount } => {
            match client.convert(&amount).await {
                Ok(conversion) => {
                    println!("{} {} = {} native", amount, conversion.rate.fiat, conversion.native);
                    println!("Rate: {}", conversion.rate);
                }
                Err(e) => {
                    warn!("Conversion failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::SpotRate => {
            let rate = client.spot_rate().await?;
            println!("1 native = {}", rate);
        }
        Commands::OwnerOf { token_id } => {
            let token_id = U256::from_dec_str(&token_id)
                .map_err(|e| anyhow::anyhow!("Invalid token ID '{}': {:?}", token_id, e))?;
            let owner = client.owner_of(token_id).await?;
            println!("Token {} is owned by {}", token_id, owner);
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &EscrowSnapshot) {
    println!("Escrow:           {}", snapshot.contract_address);
    println!("State:            {}", snapshot.lifecycle_state);
    println!("Price:            {}", snapshot.price_native);
    println!("Held balance:     {}", snapshot.held_balance);
    println!("Buyer:            {}", snapshot.roles.buyer);
    println!("Buyer solicitor:  {}", snapshot.roles.buyer_solicitor);
    println!("Seller:           {}", snapshot.roles.seller);
}

fn print_outcome(outcome: &TxOutcome) {
    println!(
        "{} confirmed in block {} ({})",
        outcome.action, outcome.receipt.block_number, outcome.receipt.tx_hash
    );
    match &outcome.refresh {
        RefreshStatus::Fresh(snapshot) => print_snapshot(snapshot),
        RefreshStatus::Stale(e) => println!("Escrow state could not be refreshed: {}", e),
        RefreshStatus::Discarded => println!("Escrow state refresh was superseded"),
    }
}
