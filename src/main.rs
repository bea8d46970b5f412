// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use ethers::prelude::*;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sponsor_relay::chain::OnchainReader;
use sponsor_relay::config::{BondArgs, Cli, ClientArgs, Command, SendArgs, ServeArgs};
use sponsor_relay::encoder::SimpleAccountEncoder;
use sponsor_relay::gas::GasPriceOracle;
use sponsor_relay::registry::{CachedRegistry, OnchainRegistry};
use sponsor_relay::relay::BundlerClient;
use sponsor_relay::rpc::{PaymasterRpcImpl, PaymasterRpcServer};
use sponsor_relay::signer::WalletSigner;
use sponsor_relay::sponsorship::RemoteEndorser;
use sponsor_relay::{LifecycleDriver, Paymaster, SendRequest, SponsorshipNegotiator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Send(args) => send(args).await,
        Command::Bond(args) => bond(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let client = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);
    let wallet = args.private_key.parse::<LocalWallet>()?;

    let registry = CachedRegistry::new(
        OnchainRegistry::new(args.registry_address()?, client.clone()),
        args.registry_ttl(),
    );
    let reader = Arc::new(OnchainReader::new(client));
    let paymaster = Paymaster::new(
        wallet,
        Arc::new(registry),
        reader.clone(),
        reader,
        args.service_config()?,
    );

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let paymaster_rpc = PaymasterRpcImpl::new(Arc::new(paymaster));

    info!("Starting endorsement RPC server on {}", server_addr);

    let server_handle = start_server(server_addr, paymaster_rpc).await?;

    // Keep the server running until Ctrl+C is pressed
    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server(
    server_addr: SocketAddr,
    paymaster_rpc: PaymasterRpcImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;

    let server_handle = server.start(paymaster_rpc.into_rpc());

    Ok(server_handle)
}

fn driver(args: &ClientArgs) -> anyhow::Result<LifecycleDriver> {
    let chain = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);
    let bundler = Arc::new(Provider::<Http>::try_from(args.bundler_url.as_str())?);
    let endorser = Arc::new(Provider::<Http>::try_from(args.paymaster_url.as_str())?);

    let reader = Arc::new(OnchainReader::new(chain.clone()));
    let negotiator = SponsorshipNegotiator::new(
        Arc::new(RemoteEndorser::new(endorser)),
        reader.clone(),
        args.negotiator_config()?,
    );
    let wallet = args.owner_key.parse::<LocalWallet>()?;

    Ok(LifecycleDriver::new(
        Arc::new(GasPriceOracle::new(bundler.clone())),
        Arc::new(BundlerClient::new(
            bundler,
            args.poll_interval(),
            args.receipt_timeout(),
        )),
        reader,
        negotiator,
        Arc::new(WalletSigner::new(wallet, args.chain_id, chain)),
        Arc::new(SimpleAccountEncoder),
        args.driver_config()?,
    ))
}

async fn send(args: SendArgs) -> anyhow::Result<()> {
    let request = SendRequest::parse(&args.to, &args.amount)
        .map_err(|f| anyhow::anyhow!("{} ({})", f.message, f.detail))?;
    let outcome = driver(&args.client)?.send(&request).await;

    for attempt in &outcome.attempts {
        info!(
            "{} attempt: {}",
            attempt.mode,
            attempt
                .history
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        );
    }
    println!("{}", outcome.status_message());

    match outcome.failure {
        None if outcome.is_confirmed() => Ok(()),
        Some(failure) => anyhow::bail!("{}: {}", failure.kind, failure.detail),
        None => anyhow::bail!("{}", outcome.state),
    }
}

async fn bond(args: BondArgs) -> anyhow::Result<()> {
    let chain = Arc::new(Provider::<Http>::try_from(args.client.eth_rpc_url.as_str())?);
    let wallet = args.client.owner_key.parse::<LocalWallet>()?;
    let funder = WalletSigner::new(wallet, args.client.chain_id, chain);

    let driver = driver(&args.client)?;
    if driver.is_bonded().await.map_err(|f| anyhow::anyhow!(f.detail))? {
        info!("Account already bonded; adding to the existing bond");
    }
    let tx_hash = driver
        .bond(&funder, args.value()?)
        .await
        .map_err(|f| anyhow::anyhow!("{}: {}", f.kind, f.detail))?;
    println!("Bond transaction {tx_hash:?}");
    Ok(())
}
