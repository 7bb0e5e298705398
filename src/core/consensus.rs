// Probabilistic consensus over the DAG: a biased random walk selects tips,
// repeated walks from an ancestor set estimate how confirmed a transaction
// is, and a background walker keeps cumulative weights roughly current.

use crate::core::{Tangle, TransactionNode};
use log::debug;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread;

/// How many parent levels the confidence walk set reaches back
const WALK_SET_DEPTH: usize = 5;
/// The walk set is duplicated until it holds at least this many entries
const WALK_SET_MIN_SIZE: usize = 100;

/// Weighted descent from `start` to a tip. Each step samples a child with
/// probability proportional to `exp(-alpha * (weight(here) - weight(child)))`,
/// floored at the smallest positive double so no child is ever impossible.
/// Alpha zero walks uniformly; large alpha descends toward the heaviest
/// child.
pub fn biased_random_walk<R: Rng>(
    start: Arc<TransactionNode>,
    alpha: f64,
    rng: &mut R,
) -> Arc<TransactionNode> {
    let mut current = start;

    loop {
        let children = current.child_nodes();
        if children.is_empty() {
            return current;
        }

        let own_weight = current.get_cumulative_weight() as f64;
        let weights: Vec<f64> = children
            .iter()
            .map(|child| {
                let delta = own_weight - child.get_cumulative_weight() as f64;
                (-alpha * delta).exp().max(f64::MIN_POSITIVE)
            })
            .collect();

        let total: f64 = weights.iter().sum();
        let mut sample = rng.gen::<f64>() * total;
        let mut chosen = children.len() - 1;
        for (index, weight) in weights.iter().enumerate() {
            if sample < *weight {
                chosen = index;
                break;
            }
            sample -= weight;
        }

        current = children[chosen].clone();
    }
}

/// Walk from the tangle's genesis with the given bias
pub fn walk_from_genesis<R: Rng>(
    tangle: &Tangle,
    alpha: f64,
    rng: &mut R,
) -> Arc<TransactionNode> {
    biased_random_walk(tangle.get_genesis(), alpha, rng)
}

/// How confident the network is in a transaction: the fraction of unbiased
/// walks, started from an ancestor set reaching back five parent levels,
/// that land on a descendant of the node. Monte-Carlo with replacement;
/// the walk set is padded by duplication up to a fixed sample count.
pub fn confirmation_confidence(tangle: &Tangle, node: &Arc<TransactionNode>) -> f64 {
    confirmation_confidence_with_rng(tangle, node, &mut rand::thread_rng())
}

pub fn confirmation_confidence_with_rng<R: Rng>(
    tangle: &Tangle,
    node: &Arc<TransactionNode>,
    rng: &mut R,
) -> f64 {
    let mut walk_set = ancestor_walk_set(tangle, node);
    if walk_set.is_empty() {
        return 0.0;
    }

    // Duplicate the set (appending whole copies) until it is large enough
    // to act as a sample population
    let base = walk_set.clone();
    while walk_set.len() < WALK_SET_MIN_SIZE {
        walk_set.extend(base.iter().cloned());
    }

    let mut successes = 0usize;
    for entry in &walk_set {
        let landed = biased_random_walk(entry.clone(), 0.0, rng);
        if is_descendant(node, landed.get_hash()) {
            successes += 1;
        }
    }

    successes as f64 / walk_set.len() as f64
}

// Ancestors within WALK_SET_DEPTH parent levels, clamped at the genesis,
// excluding the node itself and its direct children
fn ancestor_walk_set(tangle: &Tangle, node: &Arc<TransactionNode>) -> Vec<Arc<TransactionNode>> {
    let excluded: HashSet<String> = std::iter::once(node.get_hash().to_string())
        .chain(
            node.child_nodes()
                .iter()
                .map(|c| c.get_hash().to_string()),
        )
        .collect();

    let genesis_hash = tangle.get_genesis().get_hash().to_string();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<Arc<TransactionNode>> = Vec::new();
    let mut frontier = vec![node.clone()];

    for _ in 0..WALK_SET_DEPTH {
        let mut next = Vec::new();
        for member in &frontier {
            for parent in member.parent_nodes() {
                if !seen.insert(parent.get_hash().to_string()) {
                    continue;
                }
                if !excluded.contains(parent.get_hash()) {
                    out.push(parent.clone());
                }
                // The genesis has no parents worth following further
                if parent.get_hash() != genesis_hash {
                    next.push(parent);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    out
}

/// True iff `hash` names the node itself or anything reachable through its
/// children
pub fn is_descendant(node: &Arc<TransactionNode>, hash: &str) -> bool {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
    visited.insert(node.get_hash().to_string());
    queue.push_back(node.clone());

    while let Some(head) = queue.pop_front() {
        if head.get_hash() == hash {
            return true;
        }
        for child in head.child_nodes() {
            if visited.insert(child.get_hash().to_string()) {
                queue.push_back(child);
            }
        }
    }
    false
}

/// One weight pass: starting at `source`, recompute each node's cumulative
/// weight as its own weight plus the sum of its children's, then continue
/// into its parents. Concurrent mutation may leave values briefly stale,
/// which callers tolerate.
pub fn update_weights_from(source: Arc<TransactionNode>) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
    visited.insert(source.get_hash().to_string());
    queue.push_back(source);

    while let Some(node) = queue.pop_front() {
        let children_sum: f32 = node
            .child_nodes()
            .iter()
            .map(|c| c.get_cumulative_weight())
            .sum();
        node.set_cumulative_weight(node.own_weight() + children_sum);

        for parent in node.parent_nodes() {
            if visited.insert(parent.get_hash().to_string()) {
                queue.push_back(parent);
            }
        }
    }
}

/// Run a weight pass on a detached background thread
pub fn spawn_weight_update(source: Arc<TransactionNode>) {
    thread::spawn(move || {
        debug!("Weight update pass starting at `{}`", source.get_hash());
        update_weights_from(source);
    });
}
