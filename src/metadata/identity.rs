//! Strong-name identity for generated and host modules.
//!
//! This module provides the [`Identity`] enum and related logic for representing and computing
//! module identities, including public-key and token-based identities. A strong-named module
//! carries a public key; other modules reference it through the 8-byte public key token, which
//! is the tail of the key's hash in reversed byte order (ECMA-335 II.6.2.1.3).
//!
//! # Key Types
//! - [`Identity`] - Represents either a full public key or a token (hash) identity
//! - [`HashAlgorithm`] - The hash used to derive the token
//!
//! # Example
//! ```rust
//! use dotweave::metadata::identity::{HashAlgorithm, Identity};
//! let pubkey = vec![1,2,3,4,5,6,7,8];
//! let id = Identity::from(&pubkey, true).unwrap();
//! let token = id.to_token(HashAlgorithm::Sha1).unwrap();
//! assert_ne!(token, 0);
//! ```

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::{Error, Result};

/// Public key shipped as the default strong-name key of generated modules.
///
/// Only the public half matters here: the engine never produces signatures, it only needs a
/// stable identity that other modules can reference.
pub const DEFAULT_PUBLIC_KEY: [u8; 32] = [
    0x00, 0x24, 0x00, 0x00, 0x04, 0x80, 0x00, 0x00, 0x94, 0x00, 0x00, 0x00, 0x06, 0x02, 0x00,
    0x00, 0x00, 0x24, 0x00, 0x00, 0x52, 0x53, 0x41, 0x31, 0x00, 0x04, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x00,
];

/// Hash algorithms a public key token can be derived with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// MD5, used by legacy tooling
    Md5,
    /// SHA-1, the algorithm the runtime uses for public key tokens
    #[default]
    Sha1,
}

/// An identifier for a module.
/// Can be either a public-key or a hashed Token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// The full RSA public-key
    PubKey(Vec<u8>),
    /// 8-byte end of the hash of the public-key
    Token(u64),
}

impl Identity {
    /// Create an `Identity` from raw data.
    ///
    /// # Arguments
    /// * `data`    - The data to create the identity from
    /// * `is_pub`  - Is it a token, or a public-key
    ///
    /// # Errors
    /// Returns an error if a token is requested and `data` holds fewer than 8 bytes.
    pub fn from(data: &[u8], is_pub: bool) -> Result<Self> {
        Ok(if is_pub {
            Identity::PubKey(data.to_vec())
        } else {
            let bytes: [u8; 8] = data
                .get(..8)
                .and_then(|slice| slice.try_into().ok())
                .ok_or(Error::OutOfBounds)?;
            Identity::Token(u64::from_le_bytes(bytes))
        })
    }

    /// Get the token based on the provided `algo`; The token is the last 8 bytes of the hash of
    /// the public-key, read little-endian (which is the reversed byte order of the hash tail).
    ///
    /// # Arguments
    /// * `algo` - The [`HashAlgorithm`] to derive the token with
    ///
    /// # Errors
    /// Returns an error if the hash output is shorter than 8 bytes.
    pub fn to_token(&self, algo: HashAlgorithm) -> Result<u64> {
        match &self {
            Identity::PubKey(data) => {
                let digest: Vec<u8> = match algo {
                    HashAlgorithm::Md5 => {
                        let mut hasher = Md5::new();
                        hasher.update(data);
                        hasher.finalize().to_vec()
                    }
                    HashAlgorithm::Sha1 => {
                        let mut hasher = Sha1::new();
                        hasher.update(data);
                        hasher.finalize().to_vec()
                    }
                };

                let tail: [u8; 8] = digest
                    .get(digest.len().saturating_sub(8)..)
                    .and_then(|slice| slice.try_into().ok())
                    .ok_or(Error::OutOfBounds)?;
                Ok(u64::from_le_bytes(tail))
            }
            Identity::Token(token) => Ok(*token),
        }
    }

    /// Formats the public key token as the lowercase hex string used in display names
    ///
    /// # Errors
    /// Propagates failures of [`Identity::to_token`].
    pub fn token_string(&self) -> Result<String> {
        let token = self.to_token(HashAlgorithm::Sha1)?;
        Ok(token
            .to_le_bytes()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_pubkey() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let identity = Identity::from(&data, true).unwrap();
        assert_eq!(identity, Identity::PubKey(data));
    }

    #[test]
    fn test_identity_from_token() {
        let data = 0x1234_5678_9ABC_DEF0u64.to_le_bytes();
        let identity = Identity::from(&data, false).unwrap();
        assert_eq!(identity, Identity::Token(0x1234_5678_9ABC_DEF0));
    }

    #[test]
    fn test_identity_from_token_insufficient_data() {
        assert!(matches!(
            Identity::from(&[1, 2, 3], false),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_to_token_from_pubkey_sha1() {
        let data = DEFAULT_PUBLIC_KEY.to_vec();
        let identity = Identity::PubKey(data.clone());

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest = hasher.finalize();
        let expected = u64::from_le_bytes(digest[12..20].try_into().unwrap());

        assert_eq!(identity.to_token(HashAlgorithm::Sha1).unwrap(), expected);
    }

    #[test]
    fn test_to_token_algorithms_differ() {
        let identity = Identity::PubKey(DEFAULT_PUBLIC_KEY.to_vec());
        let md5 = identity.to_token(HashAlgorithm::Md5).unwrap();
        let sha1 = identity.to_token(HashAlgorithm::Sha1).unwrap();
        assert_ne!(md5, sha1);
    }

    #[test]
    fn test_token_identity_passthrough() {
        let identity = Identity::Token(42);
        assert_eq!(identity.to_token(HashAlgorithm::Md5).unwrap(), 42);
        assert_eq!(identity.to_token(HashAlgorithm::Sha1).unwrap(), 42);
    }

    #[test]
    fn test_token_string_is_hex() {
        let identity = Identity::Token(0x89e0_3419_565c_7ab7);
        assert_eq!(identity.token_string().unwrap(), "b77a5c561934e089");
    }
}
