// The tangle file: a gzipped run of transaction records, count first, with
// the genesis forced to the front and the rest in timestamp order. Loading
// goes back through the normal sync handlers so validation stays uniform.

use crate::core::{Tangle, TransactionRecord};
use crate::error::Result;
use crate::utils::{deserialize, gunzip, gzip, serialize};
use std::io::{Read, Write};

/// Serialize every transaction in the tangle to the writer
pub fn save_tangle<W: Write>(tangle: &Tangle, out: &mut W) -> Result<()> {
    let genesis_hash = tangle.get_genesis().get_hash().to_string();

    let mut nodes = tangle.list_transactions();
    nodes.sort_by(|a, b| {
        // The genesis always leads regardless of its timestamp
        if a.get_hash() == genesis_hash {
            return std::cmp::Ordering::Less;
        }
        if b.get_hash() == genesis_hash {
            return std::cmp::Ordering::Greater;
        }
        a.get_transaction()
            .get_timestamp()
            .cmp(&b.get_transaction().get_timestamp())
    });

    let records: Vec<TransactionRecord> = nodes
        .iter()
        .map(|node| node.get_transaction().to_record())
        .collect();

    let encoded = serialize(&records)?;
    let compressed = gzip(&encoded)?;
    out.write_all(&compressed)?;
    Ok(())
}

/// Read back the records written by [`save_tangle`], genesis first
pub fn load_records<R: Read>(input: &mut R) -> Result<Vec<TransactionRecord>> {
    let mut compressed = Vec::new();
    input.read_to_end(&mut compressed)?;
    let encoded = gunzip(&compressed)?;
    deserialize(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, TransactionInput, TransactionNode, TransactionOutput};
    use crate::wallet::KeyPair;

    fn small_tangle(owner: &KeyPair) -> Tangle {
        let tangle = Tangle::new();
        let genesis_tx = Transaction::new(
            Vec::new(),
            Vec::new(),
            vec![TransactionOutput::new(owner.public_key(), 1e9)],
            0,
        )
        .unwrap();
        tangle.set_genesis(TransactionNode::new(genesis_tx, &[]));

        for _ in 0..3 {
            let parents: Vec<String> = tangle
                .get_tips()
                .iter()
                .map(|t| t.get_hash().to_string())
                .collect();
            let mut tx = Transaction::new(
                parents,
                vec![TransactionInput::signed(owner, 5.0).unwrap()],
                vec![TransactionOutput::new(owner.public_key(), 5.0)],
                1,
            )
            .unwrap();
            tx.mine().unwrap();
            let node = tangle.node_from_transaction(tx).unwrap();
            tangle.add(node).unwrap();
        }
        tangle
    }

    #[test]
    fn test_round_trip_preserves_records() {
        let owner = KeyPair::generate().unwrap();
        let tangle = small_tangle(&owner);

        let mut buffer = Vec::new();
        save_tangle(&tangle, &mut buffer).unwrap();
        let records = load_records(&mut buffer.as_slice()).unwrap();

        assert_eq!(records.len(), 4);
        // The genesis leads and reproduces the stored hash
        let genesis = Transaction::from_record(records[0].clone());
        assert_eq!(genesis.get_hash(), tangle.get_genesis().get_hash());

        // Every saved hash is present in the tangle
        for record in records {
            let tx = Transaction::from_record(record);
            assert!(tangle.find(tx.get_hash()).is_some());
        }
    }

    #[test]
    fn test_rest_of_file_is_timestamp_ordered() {
        let owner = KeyPair::generate().unwrap();
        let tangle = small_tangle(&owner);

        let mut buffer = Vec::new();
        save_tangle(&tangle, &mut buffer).unwrap();
        let records = load_records(&mut buffer.as_slice()).unwrap();

        let timestamps: Vec<i64> = records.iter().skip(1).map(|r| r.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let garbage = vec![1u8, 2, 3, 4];
        assert!(load_records(&mut garbage.as_slice()).is_err());
    }
}
