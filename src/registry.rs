// src/registry.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::prelude::*;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::contracts::registry::SponsorRegistry;
use crate::error::ChainError;

/// Resolves the sponsorship authority's current paymaster address.
#[async_trait]
pub trait PaymasterRegistry: Send + Sync {
    async fn resolve_paymaster(&self) -> Result<Address, ChainError>;
}

pub struct OnchainRegistry {
    registry: SponsorRegistry<Provider<Http>>,
}

impl OnchainRegistry {
    pub fn new(address: Address, client: Arc<Provider<Http>>) -> Self {
        Self {
            registry: SponsorRegistry::new(address, client),
        }
    }
}

#[async_trait]
impl PaymasterRegistry for OnchainRegistry {
    async fn resolve_paymaster(&self) -> Result<Address, ChainError> {
        let paymaster = self
            .registry
            .active_paymaster()
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        if paymaster.is_zero() {
            return Err(ChainError::Contract("registry has no active paymaster".to_string()));
        }
        Ok(paymaster)
    }
}

/// Caches a successful lookup for `ttl`. A failed refresh fails the caller;
/// an expired entry is never served in place of a fresh answer.
pub struct CachedRegistry<R> {
    inner: R,
    ttl: Duration,
    cached: RwLock<Option<(Address, Instant)>>,
}

impl<R: PaymasterRegistry> CachedRegistry<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl<R: PaymasterRegistry> PaymasterRegistry for CachedRegistry<R> {
    async fn resolve_paymaster(&self) -> Result<Address, ChainError> {
        if let Some((address, fetched_at)) = *self.cached.read().await {
            if fetched_at.elapsed() < self.ttl {
                return Ok(address);
            }
        }

        let mut cached = self.cached.write().await;
        match self.inner.resolve_paymaster().await {
            Ok(address) => {
                if (*cached).map(|(previous, _)| previous) != Some(address) {
                    info!("Registry resolved sponsorship paymaster {}", address);
                }
                *cached = Some((address, Instant::now()));
                Ok(address)
            }
            Err(e) => {
                warn!("Registry lookup failed: {}", e);
                *cached = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedRegistry {
        answers: Mutex<Vec<Result<Address, ChainError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaymasterRegistry for ScriptedRegistry {
        async fn resolve_paymaster(&self) -> Result<Address, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().unwrap().remove(0)
        }
    }

    fn scripted(answers: Vec<Result<Address, ChainError>>) -> ScriptedRegistry {
        ScriptedRegistry {
            answers: Mutex::new(answers),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn serves_cached_address_within_ttl() {
        let registry = CachedRegistry::new(
            scripted(vec![Ok(Address::repeat_byte(0x01))]),
            Duration::from_secs(60),
        );
        assert_eq!(registry.resolve_paymaster().await.unwrap(), Address::repeat_byte(0x01));
        assert_eq!(registry.resolve_paymaster().await.unwrap(), Address::repeat_byte(0x01));
        assert_eq!(registry.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn downtime_fails_instead_of_guessing() {
        let registry = CachedRegistry::new(
            scripted(vec![
                Ok(Address::repeat_byte(0x01)),
                Err(ChainError::Rpc("connection refused".into())),
                Ok(Address::repeat_byte(0x02)),
            ]),
            Duration::ZERO,
        );
        assert!(registry.resolve_paymaster().await.is_ok());
        assert!(registry.resolve_paymaster().await.is_err());
        assert_eq!(registry.resolve_paymaster().await.unwrap(), Address::repeat_byte(0x02));
    }
}
