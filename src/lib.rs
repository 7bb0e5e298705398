//! # Tangle Ledger - A DAG-Structured Distributed Ledger
//!
//! A peer-to-peer ledger of the IOTA/Tangle family. Each node keeps an
//! in-memory replica of a directed acyclic graph of transactions; new
//! transactions approve two (occasionally three) older ones, are mined
//! against a proof-of-work target, signed, and gossiped to every peer.
//!
//! ## How the Code Is Organized
//! - `core/`: the tangle engine (transactions, the DAG, random-walk tip
//!   selection, confirmation confidence, pruning)
//! - `wallet/`: ECDSA key management, account hashes, key files
//! - `network/`: the TCP peer mesh and the synchronization protocol
//! - `storage/`: the orphan queue and the tangle file codec
//! - `config/`: configuration from environment variables
//! - `utils/`: hashing, compression, and serialization helpers
//! - `cli/`: argument parsing and the interactive node menu
//!
//! ## Key Design Decisions
//! - Hashes are printable base64 strings compared under a custom base-64
//!   numeric order; the proof-of-work target check depends on it
//! - Nodes own their children through `Arc` handles and refer to parents
//!   through `Weak` back-references, so the cyclic graph cannot leak
//! - Cumulative weights are eventually consistent, maintained by detached
//!   background passes
//! - Every network path funnels into the same `add`, so validation is
//!   identical for local, gossiped, and file-loaded transactions

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Hash, Tangle, Transaction, TransactionInput, TransactionNode, TransactionOutput,
    TransactionRecord, INVALID_HASH,
};
pub use error::{Result, TangleError};
pub use network::{Message, NetworkedTangle, PeerNetwork};
pub use storage::{OrphanQueue, PendingTransaction};
pub use wallet::{account_hash_of, load_key_file, save_key_file, verify_signature, KeyPair};
