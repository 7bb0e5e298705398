//! Tangle integration tests
//!
//! End-to-end coverage of the ledger: value transfer through tip selection
//! and mining, double-spend rejection, file round trips through the sync
//! handlers, and full two-node synchronization over TCP.

use std::fs::File;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tangle_ledger::core::{tip_selection, Tangle, TransactionNode};
use tangle_ledger::{
    KeyPair, Message, NetworkedTangle, PeerNetwork, Transaction, TransactionInput,
    TransactionOutput,
};
use tempfile::tempdir;

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn networked_with_funded_genesis(owner: &KeyPair, amount: f64) -> Arc<NetworkedTangle> {
    let tangle = Arc::new(Tangle::new());
    let network = PeerNetwork::new("127.0.0.1:0");
    let networked = NetworkedTangle::new(tangle, network);
    networked
        .set_key_pair(KeyPair::generate().unwrap(), false)
        .unwrap();

    let genesis_tx = Transaction::new(
        Vec::new(),
        Vec::new(),
        vec![TransactionOutput::new(owner.public_key(), amount)],
        0,
    )
    .unwrap();
    networked
        .tangle()
        .set_genesis(TransactionNode::new(genesis_tx, &[]));
    networked
}

#[test]
fn test_fresh_replica_is_genesis_only() {
    let tangle = Tangle::new();
    assert_eq!(tangle.get_genesis().height(), 0);
    assert_eq!(tangle.tip_count(), 1);
    assert_eq!(
        tangle.get_tips()[0].get_hash(),
        tangle.get_genesis().get_hash()
    );
    assert_eq!(tangle.query_balance("anybody", 0.0).unwrap(), 0.0);
}

#[test]
fn test_value_transfer_end_to_end() {
    let owner = KeyPair::generate().unwrap();
    let receiver = KeyPair::generate().unwrap();
    let networked = networked_with_funded_genesis(&owner, 1e9);
    let tangle = networked.tangle();

    let node = tip_selection::create_and_mine(
        tangle,
        vec![TransactionInput::signed(&owner, 100.0).unwrap()],
        vec![TransactionOutput::new(receiver.public_key(), 100.0)],
        1,
    )
    .unwrap();
    networked.add(node).unwrap();

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
    assert_eq!(tangle.tip_count(), 1);
}

#[test]
fn test_double_spend_is_rejected() {
    let owner = KeyPair::generate().unwrap();
    let spender = KeyPair::generate().unwrap();
    let receiver = KeyPair::generate().unwrap();
    let networked = networked_with_funded_genesis(&owner, 1e9);
    let tangle = networked.tangle();

    // Fund the spender with exactly 100
    let fund = tip_selection::create_and_mine(
        tangle,
        vec![TransactionInput::signed(&owner, 100.0).unwrap()],
        vec![TransactionOutput::new(spender.public_key(), 100.0)],
        1,
    )
    .unwrap();
    networked.add(fund).unwrap();

    // First spend of the whole balance is fine
    let first = tip_selection::create_and_mine(
        tangle,
        vec![TransactionInput::signed(&spender, 100.0).unwrap()],
        vec![TransactionOutput::new(receiver.public_key(), 100.0)],
        1,
    )
    .unwrap();
    networked.add(first).unwrap();

    // The second spend of the same 100 must fail the balance check
    let second = tip_selection::create_and_mine(
        tangle,
        vec![TransactionInput::signed(&spender, 100.0).unwrap()],
        vec![TransactionOutput::new(receiver.public_key(), 100.0)],
        1,
    )
    .unwrap();
    assert!(networked.add(second).is_err());
    assert_eq!(
        tangle
            .query_balance(&receiver.public_key_b64(), 0.0)
            .unwrap(),
        100.0
    );
}

#[test]
fn test_save_then_load_reproduces_the_tangle() {
    let owner = KeyPair::generate().unwrap();
    let receiver = KeyPair::generate().unwrap();
    let source = networked_with_funded_genesis(&owner, 1e9);

    for _ in 0..3 {
        let node = tip_selection::create_and_mine(
            source.tangle(),
            vec![TransactionInput::signed(&owner, 10.0).unwrap()],
            vec![TransactionOutput::new(receiver.public_key(), 10.0)],
            1,
        )
        .unwrap();
        source.add(node).unwrap();
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.tangle");
    source.save_to(&mut File::create(&path).unwrap()).unwrap();

    // A brand new replica loads the file through the sync handlers
    let replica_tangle = Arc::new(Tangle::new());
    let replica_network = PeerNetwork::new("127.0.0.1:0");
    let replica = NetworkedTangle::new(replica_tangle, replica_network);
    replica
        .set_key_pair(KeyPair::generate().unwrap(), false)
        .unwrap();
    replica.load_from(&mut File::open(&path).unwrap()).unwrap();

    // Same genesis, same transaction set
    assert_eq!(
        replica.tangle().get_genesis().get_hash(),
        source.tangle().get_genesis().get_hash()
    );
    for node in source.tangle().list_transactions() {
        assert!(
            replica.tangle().find(node.get_hash()).is_some(),
            "Missing transaction {} after load",
            node.get_hash()
        );
    }
    assert_eq!(
        replica
            .tangle()
            .query_balance(&receiver.public_key_b64(), 0.0)
            .unwrap(),
        30.0
    );
}

#[test]
fn test_two_nodes_synchronize_over_tcp() {
    let owner = KeyPair::generate().unwrap();
    let receiver = KeyPair::generate().unwrap();

    // Founder node with a funded genesis and a little history
    let founder = networked_with_funded_genesis(&owner, 1e9);
    for _ in 0..2 {
        let node = tip_selection::create_and_mine(
            founder.tangle(),
            vec![TransactionInput::signed(&owner, 50.0).unwrap()],
            vec![TransactionOutput::new(receiver.public_key(), 50.0)],
            1,
        )
        .unwrap();
        founder.add(node).unwrap();
    }
    let founder_addr = founder.network().awake().unwrap();

    // Joining node dials in
    let joiner_tangle = Arc::new(Tangle::new());
    let joiner_network = PeerNetwork::new("127.0.0.1:0");
    let joiner = NetworkedTangle::new(joiner_tangle, joiner_network.clone());
    joiner
        .set_key_pair(KeyPair::generate().unwrap(), false)
        .unwrap();
    joiner_network.connect(&founder_addr.to_string()).unwrap();

    assert!(wait_for(|| {
        founder.network().peer_count() == 1 && joiner.network().peer_count() == 1
    }));

    // Exchange keys both ways
    joiner.network().send(&Message::PublicKeySyncRequest);
    assert!(wait_for(|| {
        joiner
            .peer_account(founder.network().local_id())
            .is_some()
            && founder.peer_account(joiner.network().local_id()).is_some()
    }));

    // Vote on the genesis; the founder is the only other voter, so its
    // genesis wins and a full synchronization follows
    joiner.begin_genesis_vote();

    let expected_genesis = founder.tangle().get_genesis().get_hash().to_string();
    assert!(wait_for(|| {
        joiner.tangle().get_genesis().get_hash() == expected_genesis
    }));
    assert!(wait_for(|| {
        founder
            .tangle()
            .list_transactions()
            .iter()
            .all(|node| joiner.tangle().find(node.get_hash()).is_some())
    }));

    // The replicas agree on balances
    assert_eq!(
        joiner
            .tangle()
            .query_balance(&receiver.public_key_b64(), 0.0)
            .unwrap(),
        100.0
    );

    founder.network().disconnect();
    joiner.network().disconnect();
}
