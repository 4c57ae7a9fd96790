//! The signing capability the bridge hands approved payloads to

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use provider_bridge_core::request::SignPayload;

/// Error returned by a [`WalletSigner`]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("signing failed: {0}")]
pub struct SignerError(pub String);

impl SignerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The wallet's keystore as seen by the bridge
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// returns the accounts the user may connect a site to
    fn accounts(&self) -> Vec<Address>;

    /// signs the validated payload with the given account
    ///
    /// For a transaction with `broadcast` set the returned bytes are the transaction hash,
    /// otherwise they are the signature or the signed raw transaction.
    async fn sign(&self, from: Address, payload: &SignPayload) -> Result<Bytes, SignerError>;

    /// returns true if the account can sign
    fn is_signer_for(&self, address: &Address) -> bool {
        self.accounts().contains(address)
    }
}
