//! The tangle engine: transactions, the DAG, and consensus over it

pub mod consensus;
pub mod node;
pub mod proof_of_work;
pub mod pruning;
pub mod tangle;
pub mod tip_selection;
pub mod transaction;

pub use node::TransactionNode;
pub use tangle::Tangle;
pub use transaction::{
    Hash, Transaction, TransactionInput, TransactionOutput, TransactionRecord,
    DEFAULT_MINING_TARGET, INVALID_HASH,
};
