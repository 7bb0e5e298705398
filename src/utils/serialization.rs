// Bincode wrapper shared by the wire codec and the tangle file format.
// Counts come out as varints and strings as length-prefixed byte runs.
use crate::error::{Result, TangleError};
use crate::utils::{gunzip, gzip};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| TangleError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| TangleError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Serialize and gzip in one step. The heavyweight protocol messages
/// (genesis sync, transaction adds) ship their payloads through this.
pub fn serialize_compressed<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    gzip(&serialize(data)?)
}

/// Reverse of [`serialize_compressed`]
pub fn deserialize_compressed<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    deserialize(&gunzip(bytes)?)
}
