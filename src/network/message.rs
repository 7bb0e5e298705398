// Typed protocol messages. Every frame on the wire is an `Envelope` JSON
// value; transaction-bearing messages nest their record as a gzipped
// bincode payload so the bulky part stays compact.

use crate::core::{Transaction, TransactionRecord};
use crate::error::Result;
use crate::utils::{deserialize_compressed, serialize_compressed};
use crate::wallet::KeyPair;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Probe string signed in a `PublicKeySyncResponse` to prove the sender
/// owns the private half of the key it is sharing
pub const KEY_VERIFICATION_PROBE: &str = "VERIFY";

/// One frame between peers: who sent it and what it carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub source: Uuid,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// First frame on every new stream, announcing the sender's id
    Hello,
    /// Ask the receiver for its public key
    PublicKeySyncRequest,
    /// Share a public key, signed over the verification probe
    PublicKeySyncResponse {
        public_key_b64: String,
        signature: String,
    },
    /// Ask the receiver to vote on its current genesis
    GenesisVoteRequest,
    /// A genesis vote: the voter's genesis alias hashes with the real
    /// hash last, signed over their concatenation
    GenesisVoteResponse {
        hashes: Vec<String>,
        signature: String,
    },
    /// Ask the receiver to stream its whole tangle back
    TangleSynchronizeRequest,
    /// Ask the receiver to refresh cumulative weights from its tips
    UpdateWeightsRequest,
    /// Install a new genesis. The claimed hash may alias pruned history,
    /// so the derived hash travels separately.
    SyncGenesisRequest {
        claimed_hash: String,
        actual_hash: String,
        signature: String,
        payload: Vec<u8>,
    },
    /// Add one transaction, signed over its hash by the sender
    AddTransactionRequest {
        validity_hash: String,
        signature: String,
        payload: Vec<u8>,
    },
    /// Same as `AddTransactionRequest`, but part of a bulk synchronization
    /// (weight recomputation is suppressed around it)
    SynchronizationAddTransactionRequest {
        validity_hash: String,
        signature: String,
        payload: Vec<u8>,
    },
}

impl Message {
    pub fn public_key_sync_response(keys: &KeyPair) -> Result<Message> {
        Ok(Message::PublicKeySyncResponse {
            public_key_b64: keys.public_key_b64(),
            signature: keys.sign(KEY_VERIFICATION_PROBE)?,
        })
    }

    pub fn genesis_vote_response(hashes: Vec<String>, keys: &KeyPair) -> Result<Message> {
        let signature = keys.sign(&hashes.concat())?;
        Ok(Message::GenesisVoteResponse { hashes, signature })
    }

    pub fn sync_genesis_request(genesis: &Transaction, keys: &KeyPair) -> Result<Message> {
        let claimed_hash = genesis.get_hash().to_string();
        let actual_hash = genesis.compute_hash();
        let signature = keys.sign(&format!("{claimed_hash}{actual_hash}"))?;
        Ok(Message::SyncGenesisRequest {
            claimed_hash,
            actual_hash,
            signature,
            payload: encode_payload(&genesis.to_record())?,
        })
    }

    pub fn add_transaction_request(transaction: &Transaction, keys: &KeyPair) -> Result<Message> {
        let validity_hash = transaction.get_hash().to_string();
        let signature = keys.sign(&validity_hash)?;
        Ok(Message::AddTransactionRequest {
            validity_hash,
            signature,
            payload: encode_payload(&transaction.to_record())?,
        })
    }

    pub fn synchronization_add_transaction_request(
        transaction: &Transaction,
        keys: &KeyPair,
    ) -> Result<Message> {
        let validity_hash = transaction.get_hash().to_string();
        let signature = keys.sign(&validity_hash)?;
        Ok(Message::SynchronizationAddTransactionRequest {
            validity_hash,
            signature,
            payload: encode_payload(&transaction.to_record())?,
        })
    }
}

/// Pack a transaction record for the wire
pub fn encode_payload(record: &TransactionRecord) -> Result<Vec<u8>> {
    serialize_compressed(record)
}

/// Unpack a transaction record from the wire
pub fn decode_payload(payload: &[u8]) -> Result<TransactionRecord> {
    deserialize_compressed(payload)
}
