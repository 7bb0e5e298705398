// Every account on the tangle is an ECDSA P-256 key pair. The account's
// identity is the SHA3 hash of its public key bytes, and inputs prove
// ownership by signing the spent amount.

use crate::error::{Result, TangleError};
use crate::utils::{base64_decode, base64_encode, gunzip, gzip, sha3_256_base64};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair as RingKeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

/// Fixed probe string used by [`KeyPair::validate`]
pub const VALIDATION_PROBE: &str = "VALIDATION";

/// An ECDSA P-256 key pair identifying one account
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct KeyPair {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.pkcs8.zeroize();
    }
}

impl KeyPair {
    /// Generate a fresh key pair from the system CSPRNG
    pub fn generate() -> Result<KeyPair> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| TangleError::InvalidKey(format!("Failed to generate key pair: {e}")))?
            .as_ref()
            .to_vec();

        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|e| {
                TangleError::InvalidKey(format!("Failed to load generated key pair: {e}"))
            })?;
        let public_key = key_pair.public_key().as_ref().to_vec();

        Ok(KeyPair { pkcs8, public_key })
    }

    /// Sign a message, returning the signature in base64
    pub fn sign(&self, message: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.pkcs8, &rng)
                .map_err(|e| TangleError::InvalidKey(format!("Failed to load key pair: {e}")))?;
        let signature = key_pair
            .sign(&rng, message.as_bytes())
            .map_err(|e| TangleError::Crypto(format!("Failed to sign message: {e}")))?;
        Ok(base64_encode(signature.as_ref()))
    }

    pub fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    /// Canonical base64 form of the public key
    pub fn public_key_b64(&self) -> String {
        base64_encode(&self.public_key)
    }

    /// The account hash: SHA3 of the public key bytes
    pub fn account_hash(&self) -> String {
        sha3_256_base64(&self.public_key)
    }

    /// True iff signing a fixed probe string with the private key verifies
    /// under the public key, i.e. the two halves belong together
    pub fn validate(&self) -> bool {
        match self.sign(VALIDATION_PROBE) {
            Ok(signature) => verify_signature(&self.public_key, VALIDATION_PROBE, &signature),
            Err(_) => false,
        }
    }
}

/// Verify a base64 signature over a message under the given public key bytes
pub fn verify_signature(public_key: &[u8], message: &str, signature_b64: &str) -> bool {
    let signature = match base64_decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    key.verify(message.as_bytes(), &signature).is_ok()
}

/// The account hash of an arbitrary public key
pub fn account_hash_of(public_key: &[u8]) -> String {
    sha3_256_base64(public_key)
}

/// Write a key pair to disk as a gzipped record
pub fn save_key_file<P: AsRef<Path>>(pair: &KeyPair, path: P) -> Result<()> {
    let encoded = crate::utils::serialize(pair)?;
    let compressed = gzip(&encoded)?;
    fs::write(path, compressed)?;
    Ok(())
}

/// Load a key pair saved by [`save_key_file`], refusing mismatched halves
pub fn load_key_file<P: AsRef<Path>>(path: P) -> Result<KeyPair> {
    let compressed = fs::read(path)?;
    let encoded = gunzip(&compressed)?;
    let pair: KeyPair = crate::utils::deserialize(&encoded)?;

    if !pair.validate() {
        return Err(TangleError::InvalidKey(
            "Key file's public and private key were not created from each other".to_string(),
        ));
    }
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_pair_validates() {
        let pair = KeyPair::generate().unwrap();
        assert!(pair.validate());
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::generate().unwrap();
        let signature = pair.sign("100").unwrap();
        assert!(verify_signature(pair.public_key(), "100", &signature));
        // Wrong message must not verify
        assert!(!verify_signature(pair.public_key(), "101", &signature));
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let pair = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let signature = pair.sign("hello").unwrap();
        assert!(!verify_signature(other.public_key(), "hello", &signature));
    }

    #[test]
    fn test_account_hash_matches_free_function() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(pair.account_hash(), account_hash_of(pair.public_key()));
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account.keys");

        let pair = KeyPair::generate().unwrap();
        save_key_file(&pair, &path).unwrap();

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.public_key(), pair.public_key());
        assert!(loaded.validate());
    }

    #[test]
    fn test_key_file_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.keys");
        std::fs::write(&path, b"definitely not a key file").unwrap();
        assert!(load_key_file(&path).is_err());
    }
}
