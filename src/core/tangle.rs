// The tangle is the local replica of the DAG ledger. All structural
// mutation (adding nodes, removing tips, swapping the genesis) happens
// under one structural mutex; traversals take per-node read locks only.
// The original recursive-mutex design is expressed here as public locking
// wrappers over private `*_locked` helpers.

use crate::core::consensus;
use crate::core::{Hash, Transaction, TransactionNode};
use crate::error::{Result, TangleError};
use log::{info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Tip-set snapshots are recorded as genesis candidates whenever the tip
/// count contracts to this bound or fewer
const CANDIDATE_TIP_BOUND: usize = 3;
/// How many candidate snapshots are retained (oldest evicted)
const CANDIDATE_CAPACITY: usize = 10;
/// Confidence thresholds below this are treated as "no filtering"
const CONFIDENCE_EPSILON: f64 = 1e-9;

pub struct Tangle {
    genesis: RwLock<Arc<TransactionNode>>,
    tips: RwLock<Vec<Arc<TransactionNode>>>,
    // Snapshots of `tips` taken when the tip set contracts; pruning
    // promotes the newest fully-confirmed snapshot to a new genesis
    genesis_candidates: Mutex<VecDeque<Vec<Arc<TransactionNode>>>>,
    // Guards all edge and tip-list mutation
    structural: Mutex<()>,
    // Cleared during bulk synchronization to suppress weight recomputation
    update_weights: AtomicBool,
}

impl Default for Tangle {
    fn default() -> Self {
        Self::new()
    }
}

impl Tangle {
    /// A fresh tangle containing only an empty genesis node
    pub fn new() -> Tangle {
        let genesis_tx = Transaction::new(Vec::new(), Vec::new(), Vec::new(), 0)
            .expect("Empty genesis construction cannot fail");
        let genesis = TransactionNode::new(genesis_tx, &[]);
        genesis.mark_genesis();

        Tangle {
            tips: RwLock::new(vec![genesis.clone()]),
            genesis: RwLock::new(genesis),
            genesis_candidates: Mutex::new(VecDeque::new()),
            structural: Mutex::new(()),
            update_weights: AtomicBool::new(true),
        }
    }

    pub fn get_genesis(&self) -> Arc<TransactionNode> {
        self.genesis
            .read()
            .expect("Failed to acquire read lock on genesis - this should never happen")
            .clone()
    }

    /// Snapshot of the current tip set
    pub fn get_tips(&self) -> Vec<Arc<TransactionNode>> {
        self.tips
            .read()
            .expect("Failed to acquire read lock on tips - this should never happen")
            .clone()
    }

    pub fn tip_count(&self) -> usize {
        self.tips
            .read()
            .expect("Failed to acquire read lock on tips - this should never happen")
            .len()
    }

    pub fn set_update_weights(&self, enabled: bool) {
        self.update_weights.store(enabled, Ordering::Release);
    }

    pub fn update_weights_enabled(&self) -> bool {
        self.update_weights.load(Ordering::Acquire)
    }

    /// Find a node by hash: breadth-first from the genesis through child
    /// edges. The genesis answers for every hash it aliases, since it
    /// represents the merged ancestors of a pruned history.
    pub fn find(&self, hash: &str) -> Option<Arc<TransactionNode>> {
        let genesis = self.get_genesis();
        if genesis.get_hash() == hash
            || genesis
                .get_transaction()
                .get_parent_hashes()
                .iter()
                .any(|h| h == hash)
        {
            return Some(genesis);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
        visited.insert(genesis.get_hash().to_string());
        queue.push_back(genesis);

        while let Some(head) = queue.pop_front() {
            if head.get_hash() == hash {
                return Some(head);
            }
            for child in head.child_nodes() {
                if visited.insert(child.get_hash().to_string()) {
                    queue.push_back(child);
                }
            }
        }
        None
    }

    /// Wrap a received transaction in a node, resolving every parent hash
    /// against the current graph
    pub fn node_from_transaction(&self, transaction: Transaction) -> Result<Arc<TransactionNode>> {
        let mut parents = Vec::new();
        for hash in transaction.get_parent_hashes() {
            let parent = self
                .find(hash)
                .ok_or_else(|| TangleError::NodeNotFound(hash.clone()))?;
            parents.push(parent);
        }
        Ok(TransactionNode::new(transaction, &parents))
    }

    /// Add a node to the tangle. This is the only way the DAG grows; every
    /// network path funnels through here so validation is uniform.
    pub fn add(&self, node: Arc<TransactionNode>) -> Result<Hash> {
        let transaction = node.get_transaction();

        // Signatures and hash integrity
        transaction.validate()?;

        // Value conservation
        if !transaction.validate_totals() {
            return Err(TangleError::Transaction(format!(
                "Transaction with hash `{}` tried to generate something from nothing, discarding",
                transaction.get_hash()
            )));
        }

        // Proof of work
        if !transaction.validate_mined()? {
            return Err(TangleError::Transaction(format!(
                "Transaction with hash `{}` wasn't mined, discarding",
                transaction.get_hash()
            )));
        }

        // No input may overdraw its account as seen from the current
        // genesis. Balances are cached so several inputs from one account
        // within this transaction drain the same running figure.
        let mut balances: HashMap<String, f64> = HashMap::new();
        for input in transaction.get_inputs() {
            let account = input.get_account_b64().to_string();
            let balance = match balances.get(&account) {
                Some(cached) => *cached,
                None => self.query_balance(&account, 0.0)?,
            };
            let remaining = balance - input.get_amount();
            if remaining < 0.0 {
                return Err(TangleError::InvalidBalance {
                    node: transaction.get_hash().to_string(),
                    account: input.get_account_hash().unwrap_or_default(),
                    balance: remaining,
                });
            }
            balances.insert(account, remaining);
        }

        // Every parent must be present, and must not already list this node
        let parents = node.parent_nodes();
        for parent in &parents {
            if self.find(parent.get_hash()).is_none() {
                return Err(TangleError::NodeNotFound(parent.get_hash().to_string()));
            }
            if parent.has_child_with_hash(node.get_hash()) {
                return Err(TangleError::Transaction(format!(
                    "Transaction with hash `{}` already has a child with hash `{}`",
                    parent.get_hash(),
                    node.get_hash()
                )));
            }
        }

        {
            let _guard = self.lock_structure();

            let mut tips = self
                .tips
                .write()
                .expect("Failed to acquire write lock on tips - this should never happen");

            // Parents stop being tips; the new node becomes one
            for parent in &parents {
                tips.retain(|tip| tip.get_hash() != parent.get_hash());
                parent.push_child(node.clone());
            }
            tips.push(node.clone());

            // A contracting tip set is a candidate for a future pruning
            // genesis
            if tips.len() <= CANDIDATE_TIP_BOUND {
                self.record_candidate_snapshot(tips.clone());
            }
        }

        if self.update_weights_enabled() {
            consensus::spawn_weight_update(node.clone());
        }

        Ok(node.get_hash().to_string())
    }

    /// Remove a tip from the graph. Only childless nodes may leave.
    pub fn remove_tip(&self, tip: &Arc<TransactionNode>) -> Result<()> {
        let _guard = self.lock_structure();
        self.remove_tip_locked(tip)
    }

    fn remove_tip_locked(&self, tip: &Arc<TransactionNode>) -> Result<()> {
        if self.find(tip.get_hash()).is_none() {
            return Err(TangleError::NodeNotFound(tip.get_hash().to_string()));
        }
        if tip.has_children() {
            return Err(TangleError::Transaction(format!(
                "Only tip nodes can be removed from the graph. Tried to remove non-tip with hash `{}`",
                tip.get_hash()
            )));
        }

        let mut tips = self
            .tips
            .write()
            .expect("Failed to acquire write lock on tips - this should never happen");

        for parent in tip.parent_nodes() {
            parent.remove_child(tip.get_hash());
            // A parent that just lost its last child becomes a tip again
            if !parent.has_children() && !tips.iter().any(|t| t.get_hash() == parent.get_hash()) {
                tips.push(parent);
            }
        }

        tips.retain(|t| t.get_hash() != tip.get_hash());
        tip.clear_parents();
        Ok(())
    }

    /// Install a new genesis, reclaiming the entire old subgraph by
    /// repeatedly removing tips until the old genesis is childless
    pub fn set_genesis(&self, new_genesis: Arc<TransactionNode>) {
        {
            let _guard = self.lock_structure();
            self.set_genesis_locked(new_genesis);
        }

        if self.update_weights_enabled() {
            for tip in self.get_tips() {
                consensus::spawn_weight_update(tip);
            }
        }
    }

    pub(crate) fn set_genesis_locked(&self, new_genesis: Arc<TransactionNode>) {
        new_genesis.mark_genesis();

        let old_genesis = self.get_genesis();
        loop {
            if !old_genesis.has_children() {
                break;
            }

            let snapshot = self.get_tips();
            let mut progress = false;
            for tip in &snapshot {
                if tip.get_hash() == old_genesis.get_hash() {
                    continue;
                }
                if self.remove_tip_locked(tip).is_ok() {
                    progress = true;
                }
            }

            // Termination must not rely on the graph being well-formed
            if !progress {
                warn!(
                    "Genesis replacement stalled with {} children remaining on `{}`",
                    old_genesis.child_nodes().len(),
                    old_genesis.get_hash()
                );
                break;
            }
        }

        {
            let mut genesis = self
                .genesis
                .write()
                .expect("Failed to acquire write lock on genesis - this should never happen");
            *genesis = new_genesis.clone();
        }

        let mut tips = self
            .tips
            .write()
            .expect("Failed to acquire write lock on tips - this should never happen");
        tips.retain(|t| t.get_hash() != old_genesis.get_hash());
        if tips.is_empty() {
            tips.push(new_genesis);
        }
    }

    /// Current balance of an account, walking forward from the genesis.
    /// With a confidence threshold, only children whose confirmation
    /// confidence reaches the threshold are descended into.
    pub fn query_balance(&self, account_b64: &str, confidence_threshold: f64) -> Result<f64> {
        let genesis = self.get_genesis();
        let mut balance = 0.0f64;
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
        visited.insert(genesis.get_hash().to_string());
        queue.push_back(genesis);

        while let Some(head) = queue.pop_front() {
            let transaction = head.get_transaction();
            for input in transaction.get_inputs() {
                if input.get_account_b64() == account_b64 {
                    balance -= input.get_amount();
                }
            }
            for output in transaction.get_outputs() {
                if output.get_account_b64() == account_b64 {
                    balance += output.get_amount();
                }
            }

            if balance < 0.0 {
                return Err(TangleError::InvalidBalance {
                    node: head.get_hash().to_string(),
                    account: account_b64.to_string(),
                    balance,
                });
            }

            for child in head.child_nodes() {
                if visited.contains(child.get_hash()) {
                    continue;
                }
                if confidence_threshold >= CONFIDENCE_EPSILON
                    && consensus::confirmation_confidence(self, &child) < confidence_threshold
                {
                    continue;
                }
                visited.insert(child.get_hash().to_string());
                queue.push_back(child);
            }
        }

        Ok(balance)
    }

    /// Every node currently reachable from the genesis
    pub fn list_transactions(&self) -> Vec<Arc<TransactionNode>> {
        let genesis = self.get_genesis();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
        let mut out = Vec::new();
        visited.insert(genesis.get_hash().to_string());
        queue.push_back(genesis);

        while let Some(head) = queue.pop_front() {
            out.push(head.clone());
            for child in head.child_nodes() {
                if visited.insert(child.get_hash().to_string()) {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Log the whole graph, one node per line with indentation by depth
    pub fn debug_dump(&self) {
        info!("Genesis:");
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<(Arc<TransactionNode>, usize)> = vec![(self.get_genesis(), 0)];

        while let Some((node, depth)) = stack.pop() {
            if !visited.insert(node.get_hash().to_string()) {
                continue;
            }
            let children: Vec<String> = node
                .child_nodes()
                .iter()
                .map(|c| c.get_hash().to_string())
                .collect();
            info!(
                "{}{} children: {:?}",
                " ".repeat(depth),
                node.get_hash(),
                children
            );
            for child in node.child_nodes() {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Snapshots recorded while the tip set was contracted, oldest first
    pub fn candidate_snapshots(&self) -> Vec<Vec<Arc<TransactionNode>>> {
        self.genesis_candidates
            .lock()
            .expect("Failed to acquire lock on genesis candidates - this should never happen")
            .iter()
            .cloned()
            .collect()
    }

    fn record_candidate_snapshot(&self, snapshot: Vec<Arc<TransactionNode>>) {
        let mut candidates = self
            .genesis_candidates
            .lock()
            .expect("Failed to acquire lock on genesis candidates - this should never happen");
        candidates.push_back(snapshot);
        while candidates.len() > CANDIDATE_CAPACITY {
            candidates.pop_front();
        }
    }

    pub(crate) fn lock_structure(&self) -> MutexGuard<'_, ()> {
        self.structural
            .lock()
            .expect("Failed to acquire structural lock - this should never happen")
    }

    /// Replace the tip list wholesale. Pruning stages temporary tips so
    /// genesis replacement stops at the right frontier, then restores the
    /// real ones.
    pub(crate) fn replace_tips(&self, new_tips: Vec<Arc<TransactionNode>>) {
        let mut tips = self
            .tips
            .write()
            .expect("Failed to acquire write lock on tips - this should never happen");
        *tips = new_tips;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionInput, TransactionOutput};
    use crate::wallet::KeyPair;

    fn funded_tangle(owner: &KeyPair, amount: f64) -> Tangle {
        let tangle = Tangle::new();
        let genesis_tx = Transaction::new(
            Vec::new(),
            Vec::new(),
            vec![TransactionOutput::new(owner.public_key(), amount)],
            0,
        )
        .unwrap();
        let genesis = TransactionNode::new(genesis_tx, &[]);
        tangle.set_genesis(genesis);
        tangle
    }

    fn mined_spend(
        tangle: &Tangle,
        from: &KeyPair,
        to: &KeyPair,
        amount: f64,
    ) -> Arc<TransactionNode> {
        let parents: Vec<String> = tangle
            .get_tips()
            .iter()
            .map(|t| t.get_hash().to_string())
            .collect();
        let mut tx = Transaction::new(
            parents,
            vec![TransactionInput::signed(from, amount).unwrap()],
            vec![TransactionOutput::new(to.public_key(), amount)],
            1,
        )
        .unwrap();
        tx.mine().unwrap();
        tangle.node_from_transaction(tx).unwrap()
    }

    #[test]
    fn test_fresh_tangle_has_only_genesis() {
        let tangle = Tangle::new();
        let genesis = tangle.get_genesis();
        assert_eq!(genesis.height(), 0);
        assert_eq!(tangle.tip_count(), 1);
        assert_eq!(tangle.get_tips()[0].get_hash(), genesis.get_hash());
        assert_eq!(tangle.query_balance("anyone", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_add_moves_tip_from_parent_to_child() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let node = mined_spend(&tangle, &owner, &receiver, 100.0);
        tangle.add(node.clone()).unwrap();

        assert_eq!(tangle.tip_count(), 1);
        assert_eq!(tangle.get_tips()[0].get_hash(), node.get_hash());
        assert!(tangle.get_genesis().has_child_with_hash(node.get_hash()));
    }

    #[test]
    fn test_balances_after_spend() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let node = mined_spend(&tangle, &owner, &receiver, 100.0);
        tangle.add(node).unwrap();

        assert_eq!(
            tangle.query_balance(&owner.public_key_b64(), 0.0).unwrap(),
            999_999_900.0
        );
        assert_eq!(
            tangle
                .query_balance(&receiver.public_key_b64(), 0.0)
                .unwrap(),
            100.0
        );
    }

    #[test]
    fn test_overdraft_rejected() {
        let owner = KeyPair::generate().unwrap();
        let poor = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        // Give `poor` exactly 100, then have them try to spend 100 twice
        let fund = mined_spend(&tangle, &owner, &poor, 100.0);
        tangle.add(fund).unwrap();
        let first = mined_spend(&tangle, &poor, &receiver, 100.0);
        tangle.add(first).unwrap();

        let second = mined_spend(&tangle, &poor, &receiver, 100.0);
        let result = tangle.add(second);
        assert!(matches!(result, Err(TangleError::InvalidBalance { .. })));
    }

    #[test]
    fn test_unmined_transaction_rejected() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let parents = vec![tangle.get_genesis().get_hash().to_string()];
        let tx = Transaction::new(
            parents,
            vec![TransactionInput::signed(&owner, 10.0).unwrap()],
            vec![TransactionOutput::new(receiver.public_key(), 10.0)],
            5,
        )
        .unwrap();
        // Difficulty five without mining is effectively never satisfied
        if !tx.validate_mined().unwrap() {
            let node = tangle.node_from_transaction(tx).unwrap();
            assert!(tangle.add(node).is_err());
        }
    }

    #[test]
    fn test_missing_parent_rejected() {
        let tangle = Tangle::new();
        let tx = Transaction::new(vec!["unknown-parent".to_string()], vec![], vec![], 1).unwrap();
        assert!(matches!(
            tangle.node_from_transaction(tx),
            Err(TangleError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_find_aliases_genesis_parent_hashes() {
        let tangle = Tangle::new();
        let alias = Transaction::genesis_alias(
            "new-genesis".to_string(),
            vec!["old-tip-a".to_string(), "old-tip-b".to_string()],
            vec![],
        )
        .unwrap();
        let node = TransactionNode::new(alias, &[]);
        tangle.set_genesis(node);

        let by_hash = tangle.find("new-genesis").unwrap();
        let by_alias = tangle.find("old-tip-b").unwrap();
        assert_eq!(by_hash.get_hash(), by_alias.get_hash());
        assert!(tangle.find("never-existed").is_none());
    }

    #[test]
    fn test_remove_tip_restores_parent() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let node = mined_spend(&tangle, &owner, &receiver, 100.0);
        tangle.add(node.clone()).unwrap();
        assert_eq!(tangle.get_tips()[0].get_hash(), node.get_hash());

        tangle.remove_tip(&node).unwrap();
        let genesis = tangle.get_genesis();
        assert_eq!(tangle.tip_count(), 1);
        assert_eq!(tangle.get_tips()[0].get_hash(), genesis.get_hash());
        assert!(!genesis.has_children());
    }

    #[test]
    fn test_remove_tip_refuses_inner_node() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let first = mined_spend(&tangle, &owner, &receiver, 1.0);
        tangle.add(first.clone()).unwrap();
        let second = mined_spend(&tangle, &owner, &receiver, 1.0);
        tangle.add(second).unwrap();

        assert!(tangle.remove_tip(&first).is_err());
    }

    #[test]
    fn test_candidate_snapshots_recorded() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        // A linear chain keeps the tip set at size one, so every add
        // records a candidate snapshot
        let node = mined_spend(&tangle, &owner, &receiver, 1.0);
        tangle.add(node).unwrap();
        let node = mined_spend(&tangle, &owner, &receiver, 1.0);
        tangle.add(node).unwrap();

        let snapshots = tangle.candidate_snapshots();
        assert!(!snapshots.is_empty());
        assert!(snapshots.iter().all(|s| s.len() <= 3));
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);

        let node = mined_spend(&tangle, &owner, &receiver, 100.0);
        tangle.add(node.clone()).unwrap();

        // Rebuilding the same transaction hits the duplicate-child check
        let again = tangle
            .node_from_transaction(node.get_transaction().clone())
            .unwrap();
        assert!(tangle.add(again).is_err());
    }
}
