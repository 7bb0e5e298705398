// Parent selection for new transactions, following the G-IOTA strategy:
// two random-walk tips, plus at most one "left behind" tip whose height
// lags far enough that it would otherwise never be approved.

use crate::config::GLOBAL_CONFIG;
use crate::core::consensus;
use crate::core::{Tangle, Transaction, TransactionInput, TransactionNode, TransactionOutput};
use crate::error::Result;
use rand::Rng;
use std::sync::Arc;

/// A tip is left behind once its height lags the average parent height by
/// this much
const LEFT_BEHIND_TIP_DELTA: usize = 5;
/// How often the second walk is retried before accepting a duplicate tip
const TIP_RESAMPLE_ATTEMPTS: usize = 256;

/// Select parents, build the transaction, and mine it. The caller still
/// has to `add` the returned node, which re-validates everything.
pub fn create_and_mine(
    tangle: &Tangle,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    difficulty: u8,
) -> Result<Arc<TransactionNode>> {
    create_and_mine_with_rng(tangle, inputs, outputs, difficulty, &mut rand::thread_rng())
}

pub fn create_and_mine_with_rng<R: Rng>(
    tangle: &Tangle,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    difficulty: u8,
    rng: &mut R,
) -> Result<Arc<TransactionNode>> {
    let alpha = GLOBAL_CONFIG.get_walk_alpha();

    // Two independent walks; resample the second while it collides with
    // the first and other tips exist to be found
    let first = consensus::walk_from_genesis(tangle, alpha, rng);
    let mut second = consensus::walk_from_genesis(tangle, alpha, rng);
    for _ in 0..TIP_RESAMPLE_ATTEMPTS {
        if tangle.tip_count() <= 1 || first.get_hash() != second.get_hash() {
            break;
        }
        second = consensus::walk_from_genesis(tangle, alpha, rng);
    }

    let mut parents = vec![first, second];

    // Truncated average height of the chosen parents
    let avg_height = parents.iter().map(|p| p.height()).sum::<usize>() / parents.len();

    // Rescue at most one tip whose height qualifies it as left behind
    if avg_height >= LEFT_BEHIND_TIP_DELTA {
        for tip in tangle.get_tips() {
            if tip.height() <= avg_height - LEFT_BEHIND_TIP_DELTA {
                parents.push(tip);
                break;
            }
        }
    }

    // Each node may only appear once in the parent list
    let mut parent_hashes: Vec<String> =
        parents.iter().map(|p| p.get_hash().to_string()).collect();
    parent_hashes.sort();
    parent_hashes.dedup();

    let mut transaction = Transaction::new(parent_hashes, inputs, outputs, difficulty)?;
    transaction.mine()?;

    tangle.node_from_transaction(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeyPair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn funded_tangle(owner: &KeyPair, amount: f64) -> Tangle {
        let tangle = Tangle::new();
        let genesis_tx = Transaction::new(
            Vec::new(),
            Vec::new(),
            vec![TransactionOutput::new(owner.public_key(), amount)],
            0,
        )
        .unwrap();
        tangle.set_genesis(TransactionNode::new(genesis_tx, &[]));
        tangle
    }

    #[test]
    fn test_single_tip_yields_single_parent() {
        let owner = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);
        let mut rng = StdRng::seed_from_u64(5);

        let node = create_and_mine_with_rng(
            &tangle,
            vec![TransactionInput::signed(&owner, 1.0).unwrap()],
            vec![TransactionOutput::new(owner.public_key(), 1.0)],
            1,
            &mut rng,
        )
        .unwrap();

        // Both walks land on the only tip; deduplication leaves one parent
        assert_eq!(node.get_transaction().get_parent_hashes().len(), 1);
        assert_eq!(
            node.get_transaction().get_parent_hashes()[0],
            tangle.get_genesis().get_hash()
        );
    }

    #[test]
    fn test_created_node_is_mined_and_addable() {
        let owner = KeyPair::generate().unwrap();
        let receiver = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);
        let mut rng = StdRng::seed_from_u64(9);

        let node = create_and_mine_with_rng(
            &tangle,
            vec![TransactionInput::signed(&owner, 25.0).unwrap()],
            vec![TransactionOutput::new(receiver.public_key(), 25.0)],
            1,
            &mut rng,
        )
        .unwrap();

        assert!(node.get_transaction().validate_mined().unwrap());
        tangle.add(node).unwrap();
        assert_eq!(
            tangle
                .query_balance(&receiver.public_key_b64(), 0.0)
                .unwrap(),
            25.0
        );
    }

    #[test]
    fn test_two_tips_yield_two_parents() {
        let owner = KeyPair::generate().unwrap();
        let tangle = funded_tangle(&owner, 1e9);
        let mut rng = StdRng::seed_from_u64(13);

        // Grow two siblings off the genesis so there are two tips
        for _ in 0..2 {
            let parents = vec![tangle.get_genesis().get_hash().to_string()];
            let mut tx = Transaction::new(
                parents,
                vec![TransactionInput::signed(&owner, 1.0).unwrap()],
                vec![TransactionOutput::new(owner.public_key(), 1.0)],
                1,
            )
            .unwrap();
            tx.mine().unwrap();
            let node = tangle.node_from_transaction(tx).unwrap();
            tangle.add(node).unwrap();
        }
        assert_eq!(tangle.tip_count(), 2);

        let node = create_and_mine_with_rng(
            &tangle,
            vec![TransactionInput::signed(&owner, 1.0).unwrap()],
            vec![TransactionOutput::new(owner.public_key(), 1.0)],
            1,
            &mut rng,
        )
        .unwrap();

        assert_eq!(node.get_transaction().get_parent_hashes().len(), 2);
    }
}
