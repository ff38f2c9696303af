//! # Authorization
//!
//! The escrow never decides on its own who a caller is. Every privileged
//! step asks an [`AuthContext`] to vouch for a principal on a specific
//! [`Invocation`], and the context answers yes or no.
//!
//! Two contexts ship with the crate:
//!
//! - [`SignedInvocation`]: Ed25519 signatures over the invocation digest.
//!   A principal is authorized if it is key-backed and one of the attached
//!   signatures is its own. This is what the node uses.
//! - [`MockAuth`]: authorizes everyone, or a fixed allow-list. For tests and
//!   for embedding the engine behind a host that already authenticated the
//!   caller.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::crypto::{batch_verify, invocation_digest, VouchKeypair, VouchPublicKey, VouchSignature};
use crate::identity::Principal;

/// Authorization failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Nobody vouched for this principal on this invocation.
    #[error("missing authorization for {0}")]
    Missing(Principal),

    /// Signatures were attached but at least one of them does not verify.
    #[error("invalid signature on invocation {0}")]
    InvalidSignature(String),
}

/// A call as seen by the authorization layer: the operation name, the
/// escrow instance it targets, and canonically encoded arguments.
///
/// Both sides (the signer and the escrow) build the same `Invocation`
/// from the same arguments, so a signature for "payout 40 to alice on
/// bounty 7" cannot be replayed as "payout 400 to mallory".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    operation: &'static str,
    args: Vec<Vec<u8>>,
}

impl Invocation {
    /// Start an invocation against the escrow instance identified by its
    /// custody account.
    pub fn new(instance: &Principal, operation: &'static str) -> Self {
        Self {
            operation,
            args: vec![instance.as_str().as_bytes().to_vec()],
        }
    }

    pub fn arg_u64(mut self, value: u64) -> Self {
        self.args.push(value.to_be_bytes().to_vec());
        self
    }

    pub fn arg_principal(mut self, value: &Principal) -> Self {
        self.args.push(value.as_str().as_bytes().to_vec());
        self
    }

    pub fn arg_opt_u64(mut self, value: Option<u64>) -> Self {
        match value {
            Some(v) => self.args.push([&[1u8][..], &v.to_be_bytes()].concat()),
            None => self.args.push(vec![0u8]),
        }
        self
    }

    pub fn arg_opt_principal(mut self, value: Option<&Principal>) -> Self {
        match value {
            Some(p) => self.args.push([&[1u8][..], p.as_str().as_bytes()].concat()),
            None => self.args.push(vec![0u8]),
        }
        self
    }

    pub fn arg_bytes(mut self, value: &[u8]) -> Self {
        self.args.push(value.to_vec());
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The 32-byte digest signers sign.
    pub fn digest(&self) -> [u8; 32] {
        let parts: Vec<&[u8]> = self.args.iter().map(Vec::as_slice).collect();
        invocation_digest(self.operation, &parts)
    }
}

/// Host capability that vouches for principals.
pub trait AuthContext: Send + Sync {
    /// Succeeds iff `principal` authorized `invocation`.
    fn require_auth(&self, principal: &Principal, invocation: &Invocation)
        -> Result<(), AuthError>;
}

// ---------------------------------------------------------------------------
// SignedInvocation
// ---------------------------------------------------------------------------

/// A set of Ed25519 signatures over one invocation digest.
#[derive(Debug, Clone, Default)]
pub struct SignedInvocation {
    digest: [u8; 32],
    signatures: Vec<(VouchPublicKey, VouchSignature)>,
}

impl SignedInvocation {
    /// Sign `invocation` with every keypair in `signers`.
    pub fn sign(invocation: &Invocation, signers: &[&VouchKeypair]) -> Self {
        let digest = invocation.digest();
        let signatures = signers
            .iter()
            .map(|kp| (kp.public_key(), kp.sign(&digest)))
            .collect();
        Self { digest, signatures }
    }

    /// Attach a signature produced elsewhere (e.g. by a co-signer's node).
    pub fn with_signature(mut self, public_key: VouchPublicKey, signature: VouchSignature) -> Self {
        self.signatures.push((public_key, signature));
        self
    }

    /// Principals that signed.
    pub fn signers(&self) -> BTreeSet<Principal> {
        self.signatures
            .iter()
            .map(|(pk, _)| Principal::from_public_key(pk))
            .collect()
    }
}

impl AuthContext for SignedInvocation {
    fn require_auth(
        &self,
        principal: &Principal,
        invocation: &Invocation,
    ) -> Result<(), AuthError> {
        let digest = invocation.digest();
        if digest != self.digest {
            return Err(AuthError::Missing(principal.clone()));
        }
        batch_verify(&digest, &self.signatures)
            .map_err(|_| AuthError::InvalidSignature(invocation.operation().to_string()))?;

        let Some(wanted) = principal.public_key() else {
            return Err(AuthError::Missing(principal.clone()));
        };
        if self.signatures.iter().any(|(pk, _)| *pk == wanted) {
            Ok(())
        } else {
            Err(AuthError::Missing(principal.clone()))
        }
    }
}

// ---------------------------------------------------------------------------
// MockAuth
// ---------------------------------------------------------------------------

/// Authorization context for tests and trusted embeddings.
#[derive(Debug, Clone)]
pub enum MockAuth {
    /// Every principal is authorized.
    All,
    /// Only the listed principals are authorized.
    Only(BTreeSet<Principal>),
}

impl MockAuth {
    pub fn all() -> Self {
        MockAuth::All
    }

    pub fn only<I>(principals: I) -> Self
    where
        I: IntoIterator<Item = Principal>,
    {
        MockAuth::Only(principals.into_iter().collect())
    }

    pub fn none() -> Self {
        MockAuth::Only(BTreeSet::new())
    }
}

impl AuthContext for MockAuth {
    fn require_auth(&self, principal: &Principal, _: &Invocation) -> Result<(), AuthError> {
        match self {
            MockAuth::All => Ok(()),
            MockAuth::Only(set) if set.contains(principal) => Ok(()),
            MockAuth::Only(_) => Err(AuthError::Missing(principal.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Principal {
        Principal::named("vouch-escrow")
    }

    #[test]
    fn signed_invocation_authorizes_signer() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let inv = Invocation::new(&instance(), "refund").arg_u64(7);
        let signed = SignedInvocation::sign(&inv, &[&kp]);
        assert!(signed.require_auth(&kp.principal(), &inv).is_ok());
    }

    #[test]
    fn signed_invocation_rejects_other_principal() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let other = VouchKeypair::from_seed(&[2u8; 32]);
        let inv = Invocation::new(&instance(), "refund").arg_u64(7);
        let signed = SignedInvocation::sign(&inv, &[&kp]);
        assert_eq!(
            signed.require_auth(&other.principal(), &inv),
            Err(AuthError::Missing(other.principal()))
        );
    }

    #[test]
    fn signature_does_not_transfer_to_different_arguments() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let signed_for = Invocation::new(&instance(), "single_payout").arg_u64(40);
        let replayed = Invocation::new(&instance(), "single_payout").arg_u64(400);
        let signed = SignedInvocation::sign(&signed_for, &[&kp]);
        assert!(signed.require_auth(&kp.principal(), &replayed).is_err());
    }

    #[test]
    fn signature_does_not_transfer_between_instances() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let a = Invocation::new(&Principal::named("escrow-a"), "refund").arg_u64(1);
        let b = Invocation::new(&Principal::named("escrow-b"), "refund").arg_u64(1);
        let signed = SignedInvocation::sign(&a, &[&kp]);
        assert!(signed.require_auth(&kp.principal(), &b).is_err());
    }

    #[test]
    fn forged_cosignature_poisons_the_set() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let liar = VouchKeypair::from_seed(&[9u8; 32]);
        let inv = Invocation::new(&instance(), "approve_upgrade").arg_u64(3);
        let signed = SignedInvocation::sign(&inv, &[&kp])
            .with_signature(liar.public_key(), kp.sign(b"something else"));
        assert!(matches!(
            signed.require_auth(&kp.principal(), &inv),
            Err(AuthError::InvalidSignature(_))
        ));
    }

    #[test]
    fn named_principal_cannot_sign() {
        let kp = VouchKeypair::from_seed(&[1u8; 32]);
        let inv = Invocation::new(&instance(), "mint");
        let signed = SignedInvocation::sign(&inv, &[&kp]);
        assert!(signed
            .require_auth(&Principal::named("treasury"), &inv)
            .is_err());
    }

    #[test]
    fn optional_arguments_are_unambiguous() {
        let none = Invocation::new(&instance(), "lock_funds").arg_opt_u64(None);
        let zero = Invocation::new(&instance(), "lock_funds").arg_opt_u64(Some(0));
        assert_ne!(none.digest(), zero.digest());
    }

    #[test]
    fn mock_auth_allow_list() {
        let alice = Principal::named("alice");
        let bob = Principal::named("bob");
        let auth = MockAuth::only([alice.clone()]);
        let inv = Invocation::new(&instance(), "lock_funds");
        assert!(auth.require_auth(&alice, &inv).is_ok());
        assert!(auth.require_auth(&bob, &inv).is_err());
        assert!(MockAuth::all().require_auth(&bob, &inv).is_ok());
        assert!(MockAuth::none().require_auth(&alice, &inv).is_err());
    }
}
