//! # Digital Signatures
//!
//! Free-function wrappers around [`VouchKeypair`] / [`VouchPublicKey`] so
//! the authorization layer has a single place where signatures are made and
//! checked.

use thiserror::Error;

use super::keys::{VouchKeypair, VouchPublicKey, VouchSignature};

/// Errors during signature operations.
///
/// Intentionally vague; callers learn that verification failed, not why.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Sign a message with `keypair`.
///
/// # Example
///
/// ```
/// use vouch_protocol::crypto::{VouchKeypair, sign, verify};
///
/// let keypair = VouchKeypair::generate();
/// let signature = sign(&keypair, b"refund bounty 3");
/// assert!(verify(&keypair.public_key(), b"refund bounty 3", &signature));
/// ```
pub fn sign(keypair: &VouchKeypair, message: &[u8]) -> VouchSignature {
    keypair.sign(message)
}

/// Verify a signature. `false` covers both a bad signature and a wrong key.
pub fn verify(public_key: &VouchPublicKey, message: &[u8], signature: &VouchSignature) -> bool {
    public_key.verify(message, signature)
}

/// Verify several signatures over the same message.
///
/// Fails as a whole if any single signature is bad. Used to check every
/// co-signer of one invocation.
pub fn batch_verify(
    message: &[u8],
    items: &[(VouchPublicKey, VouchSignature)],
) -> Result<(), SignatureError> {
    for (pubkey, signature) in items {
        if !verify(pubkey, message, signature) {
            return Err(SignatureError::VerificationFailed);
        }
    }
    Ok(())
}
