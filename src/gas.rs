// src/gas.rs
use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use ethers::providers::{Http, Provider};
use tracing::debug;

use crate::error::RelayError;
use crate::relay::relay_error;
use crate::types::{GasPrice, GasPriceTiers};

pub const GAS_PRICE_METHOD: &str = "gas_getUserOperationGasPrice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FeeTier {
    Slow,
    #[default]
    Standard,
    Fast,
}

impl GasPriceTiers {
    pub fn select(&self, tier: FeeTier) -> GasPrice {
        match tier {
            FeeTier::Slow => self.slow,
            FeeTier::Standard => self.standard,
            FeeTier::Fast => self.fast,
        }
    }
}

/// Source of fresh fee suggestions. Implementations must not cache: every
/// call is a new round trip.
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn gas_price(&self) -> Result<GasPriceTiers, RelayError>;
}

pub struct GasPriceOracle {
    client: Arc<Provider<Http>>,
}

impl GasPriceOracle {
    pub fn new(client: Arc<Provider<Http>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GasOracle for GasPriceOracle {
    async fn gas_price(&self) -> Result<GasPriceTiers, RelayError> {
        let tiers: GasPriceTiers = self
            .client
            .request(GAS_PRICE_METHOD, ())
            .await
            .map_err(relay_error)?;

        if tiers.standard.max_fee_per_gas < tiers.standard.max_priority_fee_per_gas {
            return Err(RelayError::Malformed(
                "standard tier priority fee exceeds max fee".to_string(),
            ));
        }

        debug!(
            "Relay gas price: standard maxFee={} priority={}",
            tiers.standard.max_fee_per_gas, tiers.standard.max_priority_fee_per_gas
        );
        Ok(tiers)
    }
}
