//! HMAC signing of approval links.
//!
//! A link signature is computed in two stages:
//! - MAC: HMAC-SHA512 over `{approve_uri}{reject_uri}{description}{user_id}`, keyed with the
//!   lowercase hex SHA-512 digest of `{secret}a`
//! - Digest: lowercase hex SHA-256 of the raw MAC bytes
//!
//! The fields are concatenated without a delimiter and an absent user id contributes the empty
//! string. Both details must stay as they are, otherwise links that are already in the wild stop
//! verifying.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::approval::error::SigningError;

type HmacSha512 = Hmac<Sha512>;

/// Suffix appended to the secret before deriving the MAC key.
const KEY_DERIVATION_SUFFIX: &str = "a";

/// Hex-encoded link signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Signs and verifies approval links with the process-wide secret.
///
/// The keyed MAC state is computed once at construction and cloned for every signature.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha512,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer from the configured secret.
    pub fn new(secret: &str) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }

        let derived_key = hex::encode(Sha512::digest(format!("{secret}{KEY_DERIVATION_SUFFIX}").as_bytes()));
        let mac = HmacSha512::new_from_slice(derived_key.as_bytes()).map_err(|_| SigningError::InvalidKeyLength)?;

        Ok(Self { mac })
    }

    /// Compute the signature for a link.
    pub fn sign(&self, approve_callback_uri: &str, reject_callback_uri: &str, description: &str, user_id: Option<&str>) -> Signature {
        let mut mac = self.mac.clone();
        mac.update(approve_callback_uri.as_bytes());
        mac.update(reject_callback_uri.as_bytes());
        mac.update(description.as_bytes());
        mac.update(user_id.unwrap_or_default().as_bytes());
        let tag = mac.finalize().into_bytes();

        Signature(hex::encode(Sha256::digest(tag)))
    }

    /// Check a signature supplied by a client.
    ///
    /// Returns `false` on any mismatch, including signatures of the wrong length.
    pub fn verify(
        &self,
        approve_callback_uri: &str,
        reject_callback_uri: &str,
        description: &str,
        signature: &str,
        user_id: Option<&str>,
    ) -> bool {
        let expected = self.sign(approve_callback_uri, reject_callback_uri, description, user_id);
        constant_time_eq(expected.as_str().as_bytes(), signature.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // ct_eq on slices of different length returns false without comparing contents
    a.ct_eq(b).into()
}
