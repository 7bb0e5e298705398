// Network synchronization for the tangle. A NetworkedTangle wraps the base
// engine with the gossip protocol: key exchange, genesis voting, full-graph
// streaming, orphan queueing, and save/load that replays through the same
// handlers so every path is validated identically.

use crate::core::{
    consensus, tip_selection, Hash, Tangle, Transaction, TransactionInput, TransactionNode,
    TransactionOutput, INVALID_HASH,
};
use crate::error::{Result, TangleError};
use crate::network::message::{decode_payload, Message, KEY_VERIFICATION_PROBE};
use crate::network::peer::PeerNetwork;
use crate::storage::{load_records, save_tangle, OrphanQueue, PendingTransaction};
use crate::utils::base64_decode;
use crate::wallet::{account_hash_of, verify_signature, KeyPair};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Amount granted to every freshly keyed peer by a network founder
const WELCOME_GRANT: f64 = 1_000_000.0;
/// How long forwarding waits before checking a transaction was approved
const PING_DELAY_MS: u64 = 500;

type VoteTally = HashMap<Vec<Hash>, (Uuid, usize)>;

pub struct NetworkedTangle {
    tangle: Arc<Tangle>,
    network: Arc<PeerNetwork>,
    personal_keys: RwLock<Option<KeyPair>>,
    // Public keys of every known peer, our own included
    peer_keys: Mutex<HashMap<Uuid, Vec<u8>>>,
    // Present only while a genesis vote is being collected
    genesis_votes: Mutex<Option<VoteTally>>,
    genesis_sync_expected_hash: Mutex<Hash>,
    orphan_queue: OrphanQueue,
    last_key_sent_to: Mutex<Option<Uuid>>,
    // A founding node hands out a welcome grant to each new key it learns
    network_owner_keys: RwLock<Option<KeyPair>>,
    ping_enabled: AtomicBool,
    // Shared with the forwarding thread so it can clear the flag
    ping_active: Arc<AtomicBool>,
}

impl NetworkedTangle {
    /// Wire a tangle to a peer network. The returned handle receives every
    /// message the network delivers.
    pub fn new(tangle: Arc<Tangle>, network: Arc<PeerNetwork>) -> Arc<NetworkedTangle> {
        let networked = Arc::new(NetworkedTangle {
            tangle,
            network: network.clone(),
            personal_keys: RwLock::new(None),
            peer_keys: Mutex::new(HashMap::new()),
            genesis_votes: Mutex::new(None),
            genesis_sync_expected_hash: Mutex::new(INVALID_HASH.to_string()),
            orphan_queue: OrphanQueue::new(),
            last_key_sent_to: Mutex::new(None),
            network_owner_keys: RwLock::new(None),
            ping_enabled: AtomicBool::new(false),
            ping_active: Arc::new(AtomicBool::new(false)),
        });

        let weak = Arc::downgrade(&networked);
        network.set_handler(Arc::new(move |source, message| {
            if let Some(networked) = weak.upgrade() {
                networked.handle_message(source, message);
            }
        }));

        let weak = Arc::downgrade(&networked);
        network.set_connection_listener(Arc::new(move |peer, connected| {
            if let Some(networked) = weak.upgrade() {
                if !connected {
                    networked.forget_peer(peer);
                }
            }
        }));

        networked
    }

    pub fn tangle(&self) -> &Arc<Tangle> {
        &self.tangle
    }

    pub fn network(&self) -> &Arc<PeerNetwork> {
        &self.network
    }

    /// Install our key pair, optionally announcing it to the network
    pub fn set_key_pair(&self, pair: KeyPair, network_sync: bool) -> Result<()> {
        self.lock_peer_keys()
            .insert(self.network.local_id(), pair.public_key().to_vec());
        if network_sync {
            self.network.send(&Message::public_key_sync_response(&pair)?);
        }

        let mut keys = self
            .personal_keys
            .write()
            .expect("Failed to acquire write lock on keys - this should never happen");
        *keys = Some(pair);
        Ok(())
    }

    pub fn personal_keys(&self) -> Option<KeyPair> {
        self.personal_keys
            .read()
            .expect("Failed to acquire read lock on keys - this should never happen")
            .clone()
    }

    fn require_keys(&self) -> Result<KeyPair> {
        self.personal_keys()
            .ok_or_else(|| TangleError::InvalidKey("Missing personal keypair".to_string()))
    }

    /// Founding nodes call this so every new peer key gets a welcome grant
    pub fn enable_faucet(&self, owner: KeyPair) {
        let mut slot = self
            .network_owner_keys
            .write()
            .expect("Failed to acquire write lock on owner keys - this should never happen");
        *slot = Some(owner);
    }

    /// Add a node locally, then gossip it to every peer
    pub fn add(&self, node: Arc<TransactionNode>) -> Result<Hash> {
        let keys = self.require_keys()?;
        let hash = self.tangle.add(node.clone())?;
        self.network
            .send(&Message::add_transaction_request(node.get_transaction(), &keys)?);
        Ok(hash)
    }

    /// Resolve an account hash against the known peer keys
    pub fn find_account(&self, account_hash: &str) -> Result<Vec<u8>> {
        for key in self.lock_peer_keys().values() {
            if account_hash_of(key) == account_hash {
                return Ok(key.clone());
            }
        }
        Err(TangleError::InvalidAccount(account_hash.to_string()))
    }

    /// The public key we have recorded for a peer, if any
    pub fn peer_account(&self, peer: Uuid) -> Option<Vec<u8>> {
        self.lock_peer_keys().get(&peer).cloned()
    }

    pub fn known_peer_count(&self) -> usize {
        self.lock_peer_keys().len()
    }

    /// Start collecting genesis votes and ask every peer to cast one
    pub fn begin_genesis_vote(&self) {
        let mut votes = self
            .genesis_votes
            .lock()
            .expect("Failed to acquire lock on votes - this should never happen");
        *votes = Some(HashMap::new());
        drop(votes);
        self.network.send(&Message::GenesisVoteRequest);
    }

    /// The genesis hash we are waiting to install, or the invalid sentinel
    pub fn genesis_sync_expected(&self) -> Hash {
        self.genesis_sync_expected_hash
            .lock()
            .expect("Failed to acquire lock on expected hash - this should never happen")
            .clone()
    }

    /// Toggle forwarding of received value to random peers (simulates a
    /// livelier network). Returns the new state.
    pub fn toggle_ping(&self) -> bool {
        let enabled = !self.ping_enabled.load(Ordering::Acquire);
        self.ping_enabled.store(enabled, Ordering::Release);
        enabled
    }

    pub fn orphan_count(&self) -> usize {
        self.orphan_queue.len()
    }

    /// Entry point for every message the peer network delivers
    pub fn handle_message(&self, source: Uuid, message: Message) {
        let result = match message {
            Message::Hello => Ok(()),
            Message::PublicKeySyncRequest => self.on_public_key_sync_request(source),
            Message::PublicKeySyncResponse {
                public_key_b64,
                signature,
            } => self.on_public_key_sync_response(source, public_key_b64, signature),
            Message::GenesisVoteRequest => self.on_genesis_vote_request(source),
            Message::GenesisVoteResponse { hashes, signature } => {
                self.on_genesis_vote_response(source, hashes, signature)
            }
            Message::TangleSynchronizeRequest => self.on_tangle_synchronize_request(source),
            Message::UpdateWeightsRequest => self.on_update_weights_request(),
            Message::SyncGenesisRequest {
                claimed_hash,
                actual_hash,
                signature,
                payload,
            } => self.on_sync_genesis_request(source, claimed_hash, actual_hash, signature, payload),
            Message::AddTransactionRequest {
                validity_hash,
                signature,
                payload,
            } => self.on_add_transaction_request(source, validity_hash, signature, payload, false),
            Message::SynchronizationAddTransactionRequest {
                validity_hash,
                signature,
                payload,
            } => self.on_add_transaction_request(source, validity_hash, signature, payload, true),
        };

        if let Err(e) = result {
            error!("Error handling message from {source}: {e}");
        }
    }

    fn on_public_key_sync_request(&self, source: Uuid) -> Result<()> {
        let keys = self.require_keys()?;
        if !keys.validate() {
            return Err(TangleError::InvalidKey(
                "Personal keypair's public and private key were not created from each other"
                    .to_string(),
            ));
        }

        // Don't bounce keys back and forth with the same peer forever
        let mut last = self
            .last_key_sent_to
            .lock()
            .expect("Failed to acquire lock on last key receiver - this should never happen");
        if *last != Some(source) {
            self.network
                .send_to(source, &Message::public_key_sync_response(&keys)?)?;
            info!("Sent public key to `{source}`");
        }
        *last = Some(source);
        drop(last);

        if !self.lock_peer_keys().contains_key(&source) {
            self.network.send_to(source, &Message::PublicKeySyncRequest)?;
        }
        Ok(())
    }

    fn on_public_key_sync_response(
        &self,
        source: Uuid,
        public_key_b64: String,
        signature: String,
    ) -> Result<()> {
        let key = base64_decode(&public_key_b64)?;
        if !verify_signature(&key, KEY_VERIFICATION_PROBE, &signature) {
            warn!("Failed to verify key from `{source}`");
            return Ok(());
        }

        self.lock_peer_keys().insert(source, key.clone());
        info!("Recorded public key for peer `{source}`");
        self.maybe_grant_welcome(key);
        Ok(())
    }

    fn on_genesis_vote_request(&self, source: Uuid) -> Result<()> {
        let keys = self.require_keys()?;
        let genesis = self.tangle.get_genesis();
        let mut hashes: Vec<Hash> = genesis.get_transaction().get_parent_hashes().to_vec();
        hashes.push(genesis.get_hash().to_string());

        self.network
            .send_to(source, &Message::genesis_vote_response(hashes, &keys)?)
    }

    fn on_genesis_vote_response(
        &self,
        source: Uuid,
        hashes: Vec<Hash>,
        signature: String,
    ) -> Result<()> {
        let mut votes_guard = self
            .genesis_votes
            .lock()
            .expect("Failed to acquire lock on votes - this should never happen");
        // Not voting right now, ignore
        let Some(votes) = votes_guard.as_mut() else {
            return Ok(());
        };

        let Some(key) = self.lock_peer_keys().get(&source).cloned() else {
            // Ask for the key, then ask them to vote again
            let _ = self.network.send_to(source, &Message::PublicKeySyncRequest);
            let _ = self.network.send_to(source, &Message::GenesisVoteRequest);
            return Ok(());
        };
        if !verify_signature(&key, &hashes.concat(), &signature) {
            return Err(TangleError::Protocol(format!(
                "Genesis vote from `{source}` failed, sender's identity could not be verified, discarding"
            )));
        }

        // The first voter for a hash set becomes its proposer
        let count = {
            let entry = votes.entry(hashes.clone()).or_insert((source, 0));
            entry.1 += 1;
            entry.1
        };
        info!("Received genesis vote from `{source}`");

        let known_peers = self.known_peer_count();
        let mut accepted: Option<(Uuid, Hash)> = None;

        if count > known_peers / 2 {
            // Outright majority: sync from whoever just pushed it over
            accepted = hashes.last().cloned().map(|expected| (source, expected));
        } else {
            // Everyone we know of has voted: settle for the plurality
            let total: usize = votes.values().map(|(_, count)| count).sum();
            if total >= known_peers.saturating_sub(1) {
                if let Some((best_hashes, (proposer, _))) =
                    votes.iter().max_by_key(|(_, (_, count))| *count)
                {
                    accepted = best_hashes
                        .last()
                        .cloned()
                        .map(|expected| (*proposer, expected));
                }
            }
        }

        if let Some((proposer, expected)) = accepted {
            *votes_guard = None;
            let mut expected_hash = self
                .genesis_sync_expected_hash
                .lock()
                .expect("Failed to acquire lock on expected hash - this should never happen");
            *expected_hash = expected;
            drop(expected_hash);
            self.network
                .send_to(proposer, &Message::TangleSynchronizeRequest)?;
        }
        Ok(())
    }

    fn on_tangle_synchronize_request(&self, source: Uuid) -> Result<()> {
        let keys = self.require_keys()?;
        let genesis_hash = self.tangle.get_genesis().get_hash().to_string();

        {
            // Hold the structural lock across the whole send so no add or
            // remove can interleave with the stream
            let _guard = self.tangle.lock_structure();

            let mut visited = std::collections::HashSet::new();
            let mut stack = vec![self.tangle.get_genesis()];
            while let Some(node) = stack.pop() {
                if !visited.insert(node.get_hash().to_string()) {
                    continue;
                }

                let transaction = node.get_transaction();
                let message = if node.get_hash() == genesis_hash {
                    Message::sync_genesis_request(transaction, &keys)?
                } else {
                    Message::synchronization_add_transaction_request(transaction, &keys)?
                };
                self.network.send_to(source, &message)?;

                for child in node.child_nodes() {
                    stack.push(child);
                }
            }
        }

        self.network.send_to(source, &Message::UpdateWeightsRequest)?;
        info!("Sent tangle to `{source}`");
        Ok(())
    }

    fn on_update_weights_request(&self) -> Result<()> {
        for tip in self.tangle.get_tips() {
            consensus::spawn_weight_update(tip);
        }
        Ok(())
    }

    fn on_sync_genesis_request(
        &self,
        source: Uuid,
        claimed_hash: String,
        actual_hash: String,
        signature: String,
        payload: Vec<u8>,
    ) -> Result<()> {
        // Only accept a genesis we asked for
        let expected = self.genesis_sync_expected();
        if expected == INVALID_HASH {
            return Ok(());
        }
        if self.tangle.get_genesis().get_hash() == claimed_hash {
            return Ok(());
        }
        if expected != claimed_hash {
            return Err(TangleError::Protocol(
                "Received genesis sync with unexpected hash, discarding".to_string(),
            ));
        }

        let record = decode_payload(&payload)?;
        let transaction = Transaction::from_record_with_claimed_hash(record, claimed_hash.clone());
        let derived = transaction.compute_hash();
        if derived != actual_hash {
            return Err(TangleError::InvalidHash {
                actual: derived,
                claimed: actual_hash,
            });
        }

        let Some(key) = self.lock_peer_keys().get(&source).cloned() else {
            self.network.send_to(source, &Message::PublicKeySyncRequest)?;
            self.network
                .send_to(source, &Message::TangleSynchronizeRequest)?;
            return Ok(());
        };
        if !verify_signature(&key, &format!("{claimed_hash}{actual_hash}"), &signature) {
            return Err(TangleError::Protocol(format!(
                "Syncing of genesis with hash `{claimed_hash}` failed, sender's identity could not be verified, discarding"
            )));
        }

        if !transaction.get_inputs().is_empty() {
            return Err(TangleError::Protocol(format!(
                "Remote genesis with hash `{claimed_hash}` failed, genesis transactions can't have inputs"
            )));
        }

        self.tangle
            .set_genesis(TransactionNode::new(transaction, &[]));

        let mut expected_hash = self
            .genesis_sync_expected_hash
            .lock()
            .expect("Failed to acquire lock on expected hash - this should never happen");
        *expected_hash = INVALID_HASH.to_string();

        info!("Synchronized new genesis with hash `{claimed_hash}` from `{source}`");
        Ok(())
    }

    fn on_add_transaction_request(
        &self,
        source: Uuid,
        validity_hash: String,
        signature: String,
        payload: Vec<u8>,
        synchronization: bool,
    ) -> Result<()> {
        let record = decode_payload(&payload)?;
        let transaction = Transaction::from_record(record);
        if transaction.get_hash() != validity_hash {
            return Err(TangleError::InvalidHash {
                actual: transaction.get_hash().to_string(),
                claimed: validity_hash,
            });
        }

        // Bulk synchronization suppresses per-add weight recomputation;
        // one pass runs at the end of the stream instead
        if synchronization {
            self.tangle.set_update_weights(false);
        }

        let total_received: f64 = transaction
            .get_outputs()
            .iter()
            .map(|output| output.get_amount())
            .sum();
        let added = self.attempt_to_add_transaction(transaction, source, signature);

        // One retry generation for everything waiting on keys or parents
        for entry in self.orphan_queue.drain_generation() {
            self.attempt_to_add_transaction(entry.transaction, entry.peer, entry.signature);
        }

        if synchronization {
            self.tangle.set_update_weights(true);
        }
        self.orphan_queue.shrink_if_wasteful();

        if added && !synchronization {
            self.maybe_ping(total_received);
        }

        info!("Processed remote transaction add with hash `{validity_hash}` from {source}");
        Ok(())
    }

    /// Try to add a received transaction. Unknown senders and missing
    /// parents both park the transaction in the orphan queue for a later
    /// generation; anything else invalid is dropped.
    fn attempt_to_add_transaction(
        &self,
        transaction: Transaction,
        peer: Uuid,
        signature: String,
    ) -> bool {
        let known_key = self.lock_peer_keys().get(&peer).cloned();
        let Some(key) = known_key else {
            let _ = self.network.send_to(peer, &Message::PublicKeySyncRequest);
            info!(
                "Received transaction add from unverified peer `{peer}`, enqueuing transaction with hash `{}` and requesting the peer's key",
                transaction.get_hash()
            );
            self.orphan_queue.push(PendingTransaction {
                transaction,
                peer,
                signature,
            });
            return false;
        };

        if !verify_signature(&key, transaction.get_hash(), &signature) {
            warn!(
                "Transaction with hash `{}` sender's identity failed to be verified, discarding",
                transaction.get_hash()
            );
            return false;
        }

        let mut parents = Vec::new();
        for hash in transaction.get_parent_hashes() {
            match self.tangle.find(hash) {
                Some(parent) => parents.push(parent),
                None => {
                    info!(
                        "Remote transaction with hash `{}` is temporarily orphaned, enqueuing for later",
                        transaction.get_hash()
                    );
                    self.orphan_queue.push(PendingTransaction {
                        transaction,
                        peer,
                        signature,
                    });
                    return false;
                }
            }
        }

        let node = TransactionNode::new(transaction, &parents);
        // The base add re-validates everything; going through it directly
        // avoids echoing the transaction back onto the network
        match self.tangle.add(node) {
            Ok(hash) => {
                info!("Added remote transaction with hash `{hash}` to the tangle");
                true
            }
            Err(e) => {
                error!("Invalid transaction in network queue, discarding: {e}");
                false
            }
        }
    }

    // Gossip a locally created node from a background thread: base add
    // plus the broadcast, without needing a handle back to ourselves
    fn detached_add(
        tangle: &Arc<Tangle>,
        network: &Arc<PeerNetwork>,
        keys: &KeyPair,
        node: Arc<TransactionNode>,
    ) -> Result<Hash> {
        let hash = tangle.add(node.clone())?;
        network.send(&Message::add_transaction_request(node.get_transaction(), keys)?);
        Ok(hash)
    }

    // A founding node greets every fresh key with a welcome grant
    fn maybe_grant_welcome(&self, key: Vec<u8>) {
        let owner = {
            let slot = self
                .network_owner_keys
                .read()
                .expect("Failed to acquire read lock on owner keys - this should never happen");
            slot.clone()
        };
        let Some(owner) = owner else {
            return;
        };
        let Some(personal) = self.personal_keys() else {
            return;
        };

        let tangle = Arc::clone(&self.tangle);
        let network = Arc::clone(&self.network);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(PING_DELAY_MS));
            let account_b64 = crate::utils::base64_encode(&key);
            match tangle.query_balance(&account_b64, 0.0) {
                Ok(balance) if balance == 0.0 => {
                    info!(
                        "Sending `{}` a welcome grant of {WELCOME_GRANT}",
                        account_hash_of(&key)
                    );
                    let result = (|| -> Result<()> {
                        let inputs = vec![TransactionInput::signed(&owner, WELCOME_GRANT)?];
                        let outputs = vec![TransactionOutput::new(&key, WELCOME_GRANT)];
                        let node = tip_selection::create_and_mine(&tangle, inputs, outputs, 1)?;
                        Self::detached_add(&tangle, &network, &personal, node)?;
                        Ok(())
                    })();
                    if let Err(e) = result {
                        error!("Failed to send welcome grant: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Failed to query balance for welcome grant: {e}"),
            }
        });
    }

    // Forward received value to a random peer, at most one forward in
    // flight at a time
    fn maybe_ping(&self, received: f64) {
        if !self.ping_enabled.load(Ordering::Acquire) || received <= 0.0 {
            return;
        }
        if self.ping_active.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(keys) = self.personal_keys() else {
            self.ping_active.store(false, Ordering::Release);
            return;
        };
        let peers = self.network.peers();
        let Some(peer) = peers.choose(&mut rand::thread_rng()).copied() else {
            self.ping_active.store(false, Ordering::Release);
            return;
        };
        let Some(account) = self.peer_account(peer) else {
            self.ping_active.store(false, Ordering::Release);
            return;
        };

        let tangle = Arc::clone(&self.tangle);
        let network = Arc::clone(&self.network);
        let ping_active = Arc::clone(&self.ping_active);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(PING_DELAY_MS));
            let result = (|| -> Result<()> {
                info!("Pinging {received} money onward");
                let inputs = vec![TransactionInput::signed(&keys, received)?];
                let outputs = vec![TransactionOutput::new(&account, received)];
                let node = tip_selection::create_and_mine(&tangle, inputs, outputs, 3)?;
                Self::detached_add(&tangle, &network, &keys, node)?;
                Ok(())
            })();
            if let Err(e) = result {
                error!("Discarding forwarded transaction: {e}");
            }
            ping_active.store(false, Ordering::Release);
        });
    }

    fn forget_peer(&self, peer: Uuid) {
        self.lock_peer_keys().remove(&peer);
        info!("Dropped keys for disconnected peer `{peer}`");
    }

    /// Serialize the whole tangle to a writer
    pub fn save_to<W: Write>(&self, out: &mut W) -> Result<()> {
        save_tangle(&self.tangle, out)
    }

    /// Load a tangle file by replaying it through the normal sync handlers
    pub fn load_from<R: Read>(&self, input: &mut R) -> Result<()> {
        let keys = self.require_keys()?;
        let records = load_records(input)?;
        let mut records = records.into_iter();

        // The genesis is always the first transaction in the file
        let Some(first) = records.next() else {
            return Err(TangleError::Serialization(
                "Tangle file holds no transactions".to_string(),
            ));
        };
        let genesis = Transaction::from_record(first);

        {
            let mut expected = self
                .genesis_sync_expected_hash
                .lock()
                .expect("Failed to acquire lock on expected hash - this should never happen");
            *expected = genesis.get_hash().to_string();
        }
        self.network
            .send_to_self(Message::sync_genesis_request(&genesis, &keys)?);

        for record in records {
            let transaction = Transaction::from_record(record);
            self.network
                .send_to_self(Message::synchronization_add_transaction_request(
                    &transaction,
                    &keys,
                )?);
        }

        self.network.send_to_self(Message::UpdateWeightsRequest);
        Ok(())
    }

    fn lock_peer_keys(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Vec<u8>>> {
        self.peer_keys
            .lock()
            .expect("Failed to acquire lock on peer keys - this should never happen")
    }
}
