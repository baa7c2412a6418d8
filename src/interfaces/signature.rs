// ============================================================================
// Signature Verifier Interface
// ============================================================================

use async_trait::async_trait;

use crate::error::SignatureError;
use crate::signing::{CancelSaltTypedData, OrderTypedData, TypedDataDomain};

/// Verifies domain-separated typed-data signatures. The recovered signer
/// must equal the `maker` field of the signed struct.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify_order(
        &self,
        domain: &TypedDataDomain,
        order: &OrderTypedData,
        signature: &str,
    ) -> Result<bool, SignatureError>;

    async fn verify_cancel(
        &self,
        domain: &TypedDataDomain,
        cancel: &CancelSaltTypedData,
        signature: &str,
    ) -> Result<bool, SignatureError>;
}
