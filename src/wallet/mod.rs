//! Key management: ECDSA key pairs, account hashes, and key files

pub mod keys;

pub use keys::{
    account_hash_of, load_key_file, save_key_file, verify_signature, KeyPair, VALIDATION_PROBE,
};
