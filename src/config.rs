// src/config.rs
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;

use crate::gas::FeeTier;
use crate::lifecycle::DriverConfig;
use crate::paymaster::ServiceConfig;
use crate::sponsorship::{NegotiatorConfig, SponsorshipMode};
use crate::types::ENTRY_POINT_V07;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the endorsement service (pm_getPaymasterStubData / pm_getPaymasterData)
    Serve(ServeArgs),
    /// Send native currency from the smart account
    Send(SendArgs),
    /// Bond the account with the sponsorship authority from the owner key
    Bond(BondArgs),
}

/// Endorsements outliving a year are refused at startup.
const MAX_VALID_DURATION: u64 = 365 * 24 * 3600;

fn address(value: &str, name: &str) -> anyhow::Result<Address> {
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {name} {value:?}: {e}"))
}

fn ether(value: &str, name: &str) -> anyhow::Result<U256> {
    parse_ether(value).with_context(|| format!("invalid {name} {value:?}"))
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[clap(short, long, default_value = "127.0.0.1:8545")]
    pub rpc_server_addr: String,

    /// Custody key of the sponsor signer
    #[clap(short, long)]
    pub private_key: String,

    #[clap(short, long)]
    pub chain_id: u64,

    #[clap(short, long)]
    pub eth_rpc_url: String,

    /// Registry resolving the active sponsorship paymaster
    #[clap(long)]
    pub registry: String,

    #[clap(long, default_value = "sponsor-relay")]
    pub sponsor_name: String,

    /// Validity of final endorsements, in seconds
    #[clap(long, default_value_t = 3600)]
    pub valid_duration: u64,

    /// Percentage added to the max fee when costing an operation
    #[clap(long, default_value_t = 10)]
    pub gas_price_buffer: u64,

    /// Largest sponsored cost per operation, in ether
    #[clap(long, default_value = "0.1")]
    pub max_cost: String,

    #[clap(long, default_value_t = 300)]
    pub registry_ttl_secs: u64,
}

impl ServeArgs {
    pub fn registry_address(&self) -> anyhow::Result<Address> {
        address(&self.registry, "registry")
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        if self.valid_duration == 0 || self.valid_duration > MAX_VALID_DURATION {
            anyhow::bail!(
                "valid duration must be between 1 and {MAX_VALID_DURATION} seconds, got {}",
                self.valid_duration
            );
        }
        Ok(ServiceConfig {
            chain_id: self.chain_id,
            sponsor_name: self.sponsor_name.clone(),
            valid_duration: self.valid_duration,
            gas_price_buffer: self.gas_price_buffer,
            max_cost_per_operation: ether(&self.max_cost, "max cost")?,
            ..ServiceConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[clap(long)]
    pub bundler_url: String,

    #[clap(long)]
    pub paymaster_url: String,

    #[clap(short, long)]
    pub eth_rpc_url: String,

    /// Owner key controlling the smart account
    #[clap(long)]
    pub owner_key: String,

    /// Smart account address
    #[clap(long)]
    pub account: String,

    #[clap(long, default_value = "0x0000000071727De22E5E9d8BAf0edAc6f37da032")]
    pub entry_point: String,

    #[clap(short, long)]
    pub chain_id: u64,

    /// Sponsorship authority used for self-paid operations
    #[clap(long)]
    pub self_paid_paymaster: String,

    #[clap(long, value_enum, default_value = "standard")]
    pub fee_tier: FeeTier,

    /// Sponsorship strategies in fallback order; repeat to add more
    #[clap(long = "strategy", value_enum, default_value = "sponsor-paid")]
    pub strategies: Vec<SponsorshipMode>,

    /// Minimum sponsor deposit (ether) before requesting an endorsement
    #[clap(long, default_value = "0")]
    pub min_sponsor_deposit: String,

    #[clap(long, default_value_t = 120)]
    pub receipt_timeout_secs: u64,

    #[clap(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,
}

impl ClientArgs {
    pub fn negotiator_config(&self) -> anyhow::Result<NegotiatorConfig> {
        let entry_point = address(&self.entry_point, "entry point")?;
        if entry_point != ENTRY_POINT_V07 {
            anyhow::bail!("only the v0.7 entry point is supported for sending");
        }
        Ok(NegotiatorConfig {
            entry_point,
            chain_id: self.chain_id,
            self_paid_paymaster: address(&self.self_paid_paymaster, "self-paid paymaster")?,
            min_sponsor_deposit: ether(&self.min_sponsor_deposit, "minimum sponsor deposit")?,
            context: None,
        })
    }

    pub fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        Ok(DriverConfig {
            sender: address(&self.account, "account")?,
            entry_point: address(&self.entry_point, "entry point")?,
            chain_id: self.chain_id,
            fee_tier: self.fee_tier,
            strategies: self.strategies.clone(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[clap(flatten)]
    pub client: ClientArgs,

    /// Recipient address
    #[clap(long)]
    pub to: String,

    /// Amount in ether
    #[clap(long)]
    pub amount: String,
}

#[derive(Args, Debug)]
pub struct BondArgs {
    #[clap(flatten)]
    pub client: ClientArgs,

    /// Bond amount in ether
    #[clap(long)]
    pub amount: String,
}

impl BondArgs {
    pub fn value(&self) -> anyhow::Result<U256> {
        ether(&self.amount, "bond amount")
    }
}
