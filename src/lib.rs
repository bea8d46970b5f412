//! Account-abstraction operation construction and sponsorship.
//!
//! - `codec`: canonical packing and hashing of user operations
//! - `gas`, `relay`: the bundler's fee oracle, estimation, submission and receipts
//! - `paymaster`, `rpc`: the endorsement service and its JSON-RPC surface
//! - `sponsorship`: self-paid and sponsor-paid negotiation
//! - `lifecycle`: prepare, endorse, sign, submit and confirm

pub mod chain;
pub mod codec;
pub mod config;
pub mod contracts;
pub mod encoder;
pub mod error;
pub mod gas;
pub mod lifecycle;
pub mod paymaster;
pub mod registry;
pub mod relay;
pub mod rpc;
pub mod signer;
pub mod sponsorship;
pub mod types;

pub use error::{EndorsementError, RelayError, SponsorshipError};
pub use lifecycle::{FailureKind, LifecycleDriver, LifecycleState, SendOutcome, SendRequest};
pub use paymaster::Paymaster;
pub use sponsorship::{SponsorshipMode, SponsorshipNegotiator};
