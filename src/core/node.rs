// A transaction node wraps a transaction with graph connectivity. Children
// own their presence in a parent's child list through Arc handles; parents
// are held as Weak back-references so the cyclic parent/child structure
// cannot leak. The cumulative weight is a background-maintained estimate
// and is allowed to lag behind structural changes.

use crate::core::Transaction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

pub struct TransactionNode {
    transaction: Transaction,
    children: RwLock<Vec<Arc<TransactionNode>>>,
    parents: RwLock<Vec<Weak<TransactionNode>>>,
    is_genesis: AtomicBool,
    // f32 bits; eventually consistent, updated by the weight walker
    cumulative_weight: AtomicU32,
}

impl TransactionNode {
    /// Wrap a transaction, wiring weak back-references to the given parents
    pub fn new(transaction: Transaction, parents: &[Arc<TransactionNode>]) -> Arc<TransactionNode> {
        Arc::new(TransactionNode {
            transaction,
            children: RwLock::new(Vec::new()),
            parents: RwLock::new(parents.iter().map(Arc::downgrade).collect()),
            is_genesis: AtomicBool::new(false),
            cumulative_weight: AtomicU32::new(0f32.to_bits()),
        })
    }

    pub fn get_transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn get_hash(&self) -> &str {
        self.transaction.get_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.is_genesis.load(Ordering::Acquire)
    }

    pub fn mark_genesis(&self) {
        self.is_genesis.store(true, Ordering::Release);
    }

    /// Weight a node contributes on its own: difficulty/5 capped at 1
    pub fn own_weight(&self) -> f32 {
        (self.transaction.get_mining_difficulty() as f32 / 5.0).min(1.0)
    }

    pub fn get_cumulative_weight(&self) -> f32 {
        f32::from_bits(self.cumulative_weight.load(Ordering::Acquire))
    }

    pub fn set_cumulative_weight(&self, weight: f32) {
        self.cumulative_weight
            .store(weight.to_bits(), Ordering::Release);
    }

    /// Snapshot of the current children
    pub fn child_nodes(&self) -> Vec<Arc<TransactionNode>> {
        self.children
            .read()
            .map(|children| children.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the still-live parents
    pub fn parent_nodes(&self) -> Vec<Arc<TransactionNode>> {
        self.parents
            .read()
            .map(|parents| parents.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn has_children(&self) -> bool {
        self.children
            .read()
            .map(|children| !children.is_empty())
            .unwrap_or(false)
    }

    pub fn has_child_with_hash(&self, hash: &str) -> bool {
        self.children
            .read()
            .map(|children| children.iter().any(|c| c.get_hash() == hash))
            .unwrap_or(false)
    }

    // Edge mutation below is only called by the tangle while it holds the
    // structural lock.

    pub(crate) fn push_child(&self, child: Arc<TransactionNode>) {
        if let Ok(mut children) = self.children.write() {
            children.push(child);
        }
    }

    pub(crate) fn remove_child(&self, hash: &str) {
        if let Ok(mut children) = self.children.write() {
            children.retain(|c| c.get_hash() != hash);
        }
    }

    /// Remove and return every child in one step (pruning steals children)
    pub(crate) fn take_children(&self) -> Vec<Arc<TransactionNode>> {
        self.children
            .write()
            .map(|mut children| std::mem::take(&mut *children))
            .unwrap_or_default()
    }

    pub(crate) fn clear_parents(&self) {
        if let Ok(mut parents) = self.parents.write() {
            parents.clear();
        }
    }

    pub(crate) fn set_parents(&self, new_parents: &[Arc<TransactionNode>]) {
        if let Ok(mut parents) = self.parents.write() {
            *parents = new_parents.iter().map(Arc::downgrade).collect();
        }
    }

    /// Longest path to the genesis: 0 at the genesis, otherwise one more
    /// than the tallest parent. Iterative so deep graphs cannot blow the
    /// call stack.
    pub fn height(&self) -> usize {
        self.longest_path(|node| node.parent_nodes(), |node| node.is_genesis())
    }

    /// Longest path to a tip: 0 at a tip, otherwise one more than the
    /// deepest child
    pub fn depth(&self) -> usize {
        self.longest_path(|node| node.child_nodes(), |_| false)
    }

    fn longest_path<N, S>(&self, neighbors: N, stop: S) -> usize
    where
        N: Fn(&TransactionNode) -> Vec<Arc<TransactionNode>>,
        S: Fn(&TransactionNode) -> bool,
    {
        if stop(self) {
            return 0;
        }
        let first = neighbors(self);
        if first.is_empty() {
            return 0;
        }

        let mut lengths: HashMap<String, usize> = HashMap::new();
        let mut stack: Vec<(Arc<TransactionNode>, bool)> =
            first.iter().cloned().map(|n| (n, false)).collect();

        while let Some((node, expanded)) = stack.pop() {
            if lengths.contains_key(node.get_hash()) {
                continue;
            }

            let next = if stop(node.as_ref()) {
                Vec::new()
            } else {
                neighbors(node.as_ref())
            };
            if next.is_empty() {
                lengths.insert(node.get_hash().to_string(), 0);
                continue;
            }

            if expanded {
                let longest = next
                    .iter()
                    .map(|n| lengths.get(n.get_hash()).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0);
                lengths.insert(node.get_hash().to_string(), longest + 1);
            } else {
                stack.push((node.clone(), true));
                for neighbor in next {
                    if !lengths.contains_key(neighbor.get_hash()) {
                        stack.push((neighbor, false));
                    }
                }
            }
        }

        1 + first
            .iter()
            .map(|n| lengths.get(n.get_hash()).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_node(parents: &[Arc<TransactionNode>]) -> Arc<TransactionNode> {
        let parent_hashes = parents.iter().map(|p| p.get_hash().to_string()).collect();
        let tx = Transaction::new(parent_hashes, vec![], vec![], 0).unwrap();
        TransactionNode::new(tx, parents)
    }

    #[test]
    fn test_height_and_depth_of_chain() {
        let genesis = bare_node(&[]);
        genesis.mark_genesis();
        let middle = bare_node(&[genesis.clone()]);
        genesis.push_child(middle.clone());
        let tip = bare_node(&[middle.clone()]);
        middle.push_child(tip.clone());

        assert_eq!(genesis.height(), 0);
        assert_eq!(middle.height(), 1);
        assert_eq!(tip.height(), 2);

        assert_eq!(tip.depth(), 0);
        assert_eq!(middle.depth(), 1);
        assert_eq!(genesis.depth(), 2);
    }

    #[test]
    fn test_height_takes_longest_parent_path() {
        // Diamond with one long side: genesis -> a -> b, genesis -> c,
        // and the tip approves both b and c
        let genesis = bare_node(&[]);
        genesis.mark_genesis();
        let a = bare_node(&[genesis.clone()]);
        genesis.push_child(a.clone());
        let b = bare_node(&[a.clone()]);
        a.push_child(b.clone());
        let c = bare_node(&[genesis.clone()]);
        genesis.push_child(c.clone());
        let tip = bare_node(&[b.clone(), c.clone()]);
        b.push_child(tip.clone());
        c.push_child(tip.clone());

        assert_eq!(tip.height(), 3);
    }

    #[test]
    fn test_own_weight_caps_at_one() {
        let tx = Transaction::new(vec![], vec![], vec![], 5).unwrap();
        let node = TransactionNode::new(tx, &[]);
        assert!((node.own_weight() - 1.0).abs() < f32::EPSILON);

        let tx = Transaction::new(vec![], vec![], vec![], 1).unwrap();
        let node = TransactionNode::new(tx, &[]);
        assert!((node.own_weight() - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cumulative_weight_round_trips() {
        let node = bare_node(&[]);
        node.set_cumulative_weight(2.5);
        assert!((node.get_cumulative_weight() - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parents_are_weak() {
        let genesis = bare_node(&[]);
        let child = bare_node(&[genesis.clone()]);
        // Without the parent's Arc, the weak reference goes stale
        drop(genesis);
        assert!(child.parent_nodes().is_empty());
    }
}
