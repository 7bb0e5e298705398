//! Utility helpers shared across the tangle: hashing, compression,
//! timestamps, and the bincode serialization wrapper.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base64_decode, base64_encode, current_timestamp, gunzip, gzip, random_u64, sha3_256_base64,
};
pub use serialization::{deserialize, deserialize_compressed, serialize, serialize_compressed};
