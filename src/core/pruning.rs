// Pruning compacts confirmed history into a fresh genesis. The newest
// tip-set snapshot whose members all reached full confidence is promoted:
// one synthetic transaction takes over its hashes and carries every
// account's balance as of that snapshot, and everything older is released.

use crate::core::consensus;
use crate::core::{Tangle, Transaction, TransactionNode, TransactionOutput};
use crate::error::Result;
use log::info;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Build the latest common genesis, or `None` when no candidate snapshot
/// has every member at full confidence (the current genesis then stands).
pub fn create_latest_common_genesis(tangle: &Tangle) -> Result<Option<Arc<TransactionNode>>> {
    let snapshots = tangle.candidate_snapshots();
    if snapshots.is_empty() {
        return Ok(None);
    }
    info!("Genesis candidates found");

    // Keep the most recent snapshot in which every tip is fully confirmed
    let mut chosen: Option<&Vec<Arc<TransactionNode>>> = None;
    for snapshot in &snapshots {
        let confirmed = snapshot
            .iter()
            .all(|node| consensus::confirmation_confidence(tangle, node) >= 1.0);
        if confirmed {
            chosen = Some(snapshot);
        }
    }
    let Some(chosen) = chosen else {
        return Ok(None);
    };
    info!("Picked genesis nodes");

    // Every account the surviving history has ever referenced
    let accounts = list_accounts(tangle, chosen);

    // Each account's balance at the moment of the snapshot becomes one
    // output of the new genesis
    let mut outputs = Vec::new();
    for account in accounts {
        let balance = reverse_balance(chosen, &account)?;
        let account_bytes = crate::utils::base64_decode(&account)?;
        outputs.push(TransactionOutput::new(&account_bytes, balance));
    }
    info!("Tabulated account balances");

    // The synthetic genesis adopts the first chosen hash and aliases the
    // rest through its parent hash list
    let claimed_hash = chosen[0].get_hash().to_string();
    let alias_hashes = chosen
        .iter()
        .skip(1)
        .map(|node| node.get_hash().to_string())
        .collect();
    let transaction = Transaction::genesis_alias(claimed_hash, alias_hashes, outputs)?;
    Ok(Some(TransactionNode::new(transaction, &[])))
}

/// Prune the tangle: promote the latest common genesis and release all
/// history before it. A no-op when no snapshot qualifies.
pub fn prune(tangle: &Tangle) -> Result<()> {
    let Some(new_genesis) = create_latest_common_genesis(tangle)? else {
        return Ok(());
    };

    {
        let _guard = tangle.lock_structure();

        // The real tips survive the swap; stage an empty list so the
        // temporary reclaim frontier can be built up
        let original_tips = tangle.get_tips();
        tangle.replace_tips(Vec::new());

        // Resolve every node the new genesis absorbs before detaching
        // anything, while they are all still reachable
        let mut absorbed = Vec::new();
        let mut hashes = vec![new_genesis.get_hash().to_string()];
        hashes.extend(
            new_genesis
                .get_transaction()
                .get_parent_hashes()
                .iter()
                .cloned(),
        );
        for hash in &hashes {
            if let Some(node) = tangle.find(hash) {
                absorbed.push(node);
            }
        }

        // Steal the children of every absorbed node, and turn each of
        // their parents into a temporary tip so the reclaim below stops
        // exactly at the pre-snapshot frontier
        let mut stolen: Vec<Arc<TransactionNode>> = Vec::new();
        let mut temp_tips: Vec<Arc<TransactionNode>> = Vec::new();
        for node in &absorbed {
            stolen.extend(node.take_children());
            for parent in node.parent_nodes() {
                parent.take_children();
                temp_tips.push(parent);
            }
        }
        dedup_by_hash(&mut stolen);
        dedup_by_hash(&mut temp_tips);
        tangle.replace_tips(temp_tips);

        // The stolen children hang off the new genesis from now on
        for child in &stolen {
            new_genesis.push_child(child.clone());
            child.set_parents(std::slice::from_ref(&new_genesis));
        }
        info!("Situated children");

        // Swap the genesis in; this walks the temporary tips back through
        // the old history and releases it
        tangle.set_genesis_locked(new_genesis);

        tangle.replace_tips(original_tips);
    }

    if tangle.update_weights_enabled() {
        for tip in tangle.get_tips() {
            consensus::spawn_weight_update(tip);
        }
    }
    Ok(())
}

// All accounts referenced by the history from the genesis up to (and
// including) the chosen nodes, without descending past them
fn list_accounts(tangle: &Tangle, chosen: &[Arc<TransactionNode>]) -> Vec<String> {
    let chosen_hashes: HashSet<&str> = chosen.iter().map(|node| node.get_hash()).collect();
    let mut accounts: Vec<String> = Vec::new();
    let mut seen_accounts: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();

    let genesis = tangle.get_genesis();
    visited.insert(genesis.get_hash().to_string());
    queue.push_back(genesis);

    while let Some(head) = queue.pop_front() {
        let transaction = head.get_transaction();
        for input in transaction.get_inputs() {
            if seen_accounts.insert(input.get_account_b64().to_string()) {
                accounts.push(input.get_account_b64().to_string());
            }
        }
        for output in transaction.get_outputs() {
            if seen_accounts.insert(output.get_account_b64().to_string()) {
                accounts.push(output.get_account_b64().to_string());
            }
        }

        if chosen_hashes.contains(head.get_hash()) {
            continue;
        }
        for child in head.child_nodes() {
            if visited.insert(child.get_hash().to_string()) {
                queue.push_back(child);
            }
        }
    }

    accounts
}

// Balance of one account as of the chosen snapshot: walk backward from the
// chosen nodes through parents, applying inputs and outputs. The forward
// validation already guaranteed these never dip below zero.
fn reverse_balance(chosen: &[Arc<TransactionNode>], account_b64: &str) -> Result<f64> {
    let mut balance = 0.0f64;
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<Arc<TransactionNode>> = VecDeque::new();
    for node in chosen {
        if visited.insert(node.get_hash().to_string()) {
            queue.push_back(node.clone());
        }
    }

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

        for parent in head.parent_nodes() {
            if visited.insert(parent.get_hash().to_string()) {
                queue.push_back(parent);
            }
        }
    }

    Ok(balance)
}

fn dedup_by_hash(nodes: &mut Vec<Arc<TransactionNode>>) {
    let mut seen: HashSet<String> = HashSet::new();
    nodes.retain(|node| seen.insert(node.get_hash().to_string()));
}
