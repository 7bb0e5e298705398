// Proof of work over printable hashes. A hash is read as a base-64 number
// under a custom total order and must stay at or below a target string of
// `difficulty` target characters padded with '/' (the largest digit).

use crate::core::Transaction;
use crate::error::{Result, TangleError};
use std::cmp::Ordering;

/// Numeric rank of a base-64 digit under the ordering
/// `+` < `0`-`9` < `a`-`z` < `A`-`Z` < `/`.
///
/// This is not codepoint order; the target check depends on it exactly.
pub fn base64_rank(byte: u8) -> Result<u8> {
    match byte {
        b'+' => Ok(0),
        b'0'..=b'9' => Ok(1 + (byte - b'0')),
        b'a'..=b'z' => Ok(11 + (byte - b'a')),
        b'A'..=b'Z' => Ok(37 + (byte - b'A')),
        b'/' => Ok(63),
        other => Err(TangleError::Protocol(format!(
            "Byte {other:#04x} is outside the base-64 alphabet"
        ))),
    }
}

/// Compare two hashes as base-64 numbers. Longer strings are greater;
/// equal-length strings compare digit ranks left to right.
pub fn base64_numeric_cmp(a: &str, b: &str) -> Result<Ordering> {
    if a.len() != b.len() {
        return Ok(a.len().cmp(&b.len()));
    }

    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes()) {
        let ordering = base64_rank(x)?.cmp(&base64_rank(y)?);
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

/// The target string a mined hash must not exceed: `difficulty` copies of
/// the target character followed by '/' padding out to the hash length
pub fn difficulty_target(difficulty: u8, target_char: u8, hash_len: usize) -> String {
    let mut target = String::with_capacity(hash_len);
    for _ in 0..difficulty {
        target.push(target_char as char);
    }
    for _ in difficulty as usize..hash_len {
        target.push('/');
    }
    target
}

/// True iff the transaction's hash meets its own difficulty target
pub fn validate_mined(tx: &Transaction) -> Result<bool> {
    let hash = tx.get_hash();
    let difficulty = tx.get_mining_difficulty();
    if difficulty as usize > hash.len() {
        return Ok(false);
    }

    let target = difficulty_target(difficulty, tx.get_mining_target(), hash.len());
    Ok(base64_numeric_cmp(hash, &target)? != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering_boundaries() {
        assert_eq!(base64_rank(b'+').unwrap(), 0);
        assert_eq!(base64_rank(b'0').unwrap(), 1);
        assert_eq!(base64_rank(b'9').unwrap(), 10);
        assert_eq!(base64_rank(b'a').unwrap(), 11);
        assert_eq!(base64_rank(b'z').unwrap(), 36);
        assert_eq!(base64_rank(b'A').unwrap(), 37);
        assert_eq!(base64_rank(b'Z').unwrap(), 62);
        assert_eq!(base64_rank(b'/').unwrap(), 63);
    }

    #[test]
    fn test_rank_rejects_foreign_bytes() {
        assert!(base64_rank(b'=').is_err());
        assert!(base64_rank(b'\n').is_err());
        assert!(base64_rank(b' ').is_err());
    }

    #[test]
    fn test_longer_string_is_greater() {
        assert_eq!(base64_numeric_cmp("zz", "z").unwrap(), Ordering::Greater);
        assert_eq!(base64_numeric_cmp("+", "++").unwrap(), Ordering::Less);
    }

    #[test]
    fn test_same_length_compares_by_rank() {
        // '+' is the smallest digit, '/' the largest
        assert_eq!(base64_numeric_cmp("+a", "0a").unwrap(), Ordering::Less);
        assert_eq!(base64_numeric_cmp("/a", "Za").unwrap(), Ordering::Greater);
        // Lowercase sorts below uppercase in this order
        assert_eq!(base64_numeric_cmp("z", "A").unwrap(), Ordering::Less);
        assert_eq!(base64_numeric_cmp("abc", "abc").unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_invalid_byte_is_fatal_for_the_call() {
        assert!(base64_numeric_cmp("a=", "ab").is_err());
    }

    #[test]
    fn test_target_shape() {
        let target = difficulty_target(3, b'A', 8);
        assert_eq!(target, "AAA/////");
        let none = difficulty_target(0, b'A', 4);
        assert_eq!(none, "////");
    }

    #[test]
    fn test_zero_difficulty_always_validates() {
        // Difficulty 0 targets all '/' which nothing exceeds
        let tx = Transaction::new(vec![], vec![], vec![], 0).unwrap();
        assert!(validate_mined(&tx).unwrap());
    }

    #[test]
    fn test_mined_transaction_validates() {
        let mut tx = Transaction::new(vec![], vec![], vec![], 1).unwrap();
        tx.mine().unwrap();
        assert!(validate_mined(&tx).unwrap());
    }
}
