//! Error handling for the tangle
//!
//! This module provides comprehensive error types for all tangle operations.

use std::fmt;

/// Result type alias for tangle operations
pub type Result<T> = std::result::Result<T, TangleError>;

/// Comprehensive error types for tangle operations
#[derive(Debug, Clone)]
pub enum TangleError {
    /// A transaction's stored hash disagrees with its recomputed hash
    InvalidHash { actual: String, claimed: String },
    /// A referenced node could not be found in the graph
    NodeNotFound(String),
    /// An account's running balance went negative
    InvalidBalance {
        node: String,
        account: String,
        balance: f64,
    },
    /// Key validation or generation failure
    InvalidKey(String),
    /// Account hash not found among known peer keys
    InvalidAccount(String),
    /// Message-level integrity failure (bad signature, malformed base64, ...)
    Protocol(String),
    /// Transaction validation errors
    Transaction(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Network communication errors
    Network(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
}

impl fmt::Display for TangleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TangleError::InvalidHash { actual, claimed } => {
                write!(
                    f,
                    "Invalid hash: claimed `{claimed}` but recomputed `{actual}`"
                )
            }
            TangleError::NodeNotFound(hash) => {
                write!(f, "Failed to find node with hash `{hash}`")
            }
            TangleError::InvalidBalance {
                node,
                account,
                balance,
            } => {
                write!(
                    f,
                    "Invalid balance {balance} for account `{account}` at node `{node}`"
                )
            }
            TangleError::InvalidKey(reason) => write!(f, "Invalid key: {reason}"),
            TangleError::InvalidAccount(hash) => {
                write!(f, "Account with hash `{hash}` is not known")
            }
            TangleError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            TangleError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            TangleError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            TangleError::Network(msg) => write!(f, "Network error: {msg}"),
            TangleError::Config(msg) => write!(f, "Configuration error: {msg}"),
            TangleError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            TangleError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for TangleError {}

impl From<std::io::Error> for TangleError {
    fn from(err: std::io::Error) -> Self {
        TangleError::Io(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for TangleError {
    fn from(err: bincode::error::EncodeError) -> Self {
        TangleError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for TangleError {
    fn from(err: bincode::error::DecodeError) -> Self {
        TangleError::Serialization(err.to_string())
    }
}
