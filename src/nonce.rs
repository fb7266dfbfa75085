use crate::{
    consts::NONCE_SEQUENCE_BITS,
    errors::{AccountError, Result},
    types::TransactionType,
};
use ethers::types::U256;
use hashbrown::HashMap;

/// Splits an entry point nonce into its 192-bit key and 64-bit sequence
pub fn split_nonce(nonce: U256) -> (U256, u64) {
    (nonce >> NONCE_SEQUENCE_BITS, nonce.low_u64())
}

/// Joins a key and a sequence into an entry point nonce
pub fn join_nonce(key: U256, sequence: u64) -> U256 {
    (key << NONCE_SEQUENCE_BITS) | U256::from(sequence)
}

/// Replay protection of one account.
///
/// Two independent spaces: the keyed space used by user operations and the
/// batch space (one counter per transaction type) used by the direct path.
/// Batch nonces carry their transaction type in the key bits, so a digest
/// signed for one type never matches a nonce of another.
#[derive(Clone, Debug, Default)]
pub struct NonceManager {
    /// key -> lowest sequence still accepted
    keyed: HashMap<U256, u64>,
    /// batch id -> next sequence
    batches: HashMap<U256, u64>,
}

impl NonceManager {
    /// Lowest nonce currently accepted for `key`
    pub fn keyed_nonce(&self, key: U256) -> U256 {
        join_nonce(key, self.keyed.get(&key).copied().unwrap_or_default())
    }

    /// Consumes a user operation nonce. Sequences must strictly increase per key;
    /// skipping ahead is allowed and makes every lower sequence unusable.
    pub fn use_keyed_nonce(&mut self, nonce: U256) -> Result<()> {
        let (key, sequence) = split_nonce(nonce);
        let next = self.keyed.get(&key).copied().unwrap_or_default();
        if sequence < next {
            return Err(AccountError::NonceReplay { key, nonce });
        }
        let following = sequence
            .checked_add(1)
            .ok_or(AccountError::InvalidNonce(nonce))?;
        self.keyed.insert(key, following);
        Ok(())
    }

    /// Next nonce of a direct-path transaction type: `batch_id << 64 | sequence`.
    /// Only `ContractControlled` (batch id 0) reports the bare sequence.
    pub fn batch_nonce(&self, tx_type: TransactionType) -> U256 {
        let batch_id = tx_type.batch_id();
        join_nonce(batch_id, self.batches.get(&batch_id).copied().unwrap_or_default())
    }

    /// Returns the current nonce of `tx_type` and moves it forward by one
    pub fn consume_batch_nonce(&mut self, tx_type: TransactionType) -> Result<U256> {
        let batch_id = tx_type.batch_id();
        let sequence = self.batches.get(&batch_id).copied().unwrap_or_default();
        let current = join_nonce(batch_id, sequence);
        let next = sequence
            .checked_add(1)
            .ok_or(AccountError::InvalidNonce(current))?;
        self.batches.insert(batch_id, next);
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic_per_key() {
        let mut nonces = NonceManager::default();
        nonces.use_keyed_nonce(U256::zero()).unwrap();
        assert_eq!(
            nonces.use_keyed_nonce(U256::zero()),
            Err(AccountError::NonceReplay {
                key: U256::zero(),
                nonce: U256::zero()
            })
        );
        assert_eq!(nonces.keyed_nonce(U256::zero()), U256::one());
    }

    #[test]
    fn keys_are_independent() {
        let mut nonces = NonceManager::default();
        let key = U256::from(42);
        nonces.use_keyed_nonce(join_nonce(key, 0)).unwrap();
        nonces.use_keyed_nonce(U256::zero()).unwrap();
        nonces.use_keyed_nonce(join_nonce(key, 1)).unwrap();

        assert_eq!(nonces.keyed_nonce(key), join_nonce(key, 2));
        assert_eq!(nonces.keyed_nonce(U256::zero()), U256::one());
        assert_eq!(split_nonce(join_nonce(key, 9)), (key, 9));
    }

    #[test]
    fn skipping_ahead_burns_lower_sequences() {
        let mut nonces = NonceManager::default();
        nonces.use_keyed_nonce(U256::from(5)).unwrap();
        assert!(nonces.use_keyed_nonce(U256::from(3)).is_err());
        assert!(nonces.use_keyed_nonce(U256::from(5)).is_err());
        nonces.use_keyed_nonce(U256::from(6)).unwrap();
    }

    #[test]
    fn exhausted_sequence_is_rejected() {
        let mut nonces = NonceManager::default();
        let last = U256::from(u64::MAX);
        assert_eq!(
            nonces.use_keyed_nonce(last),
            Err(AccountError::InvalidNonce(last))
        );
        // nothing was consumed
        assert_eq!(nonces.keyed_nonce(U256::zero()), U256::zero());
    }

    #[test]
    fn batch_spaces_count_separately() {
        let mut nonces = NonceManager::default();
        let eoa = TransactionType::EoaControlled.batch_id();
        assert_eq!(
            nonces
                .consume_batch_nonce(TransactionType::EoaControlled)
                .unwrap(),
            join_nonce(eoa, 0)
        );
        assert_eq!(
            nonces
                .consume_batch_nonce(TransactionType::EoaControlled)
                .unwrap(),
            join_nonce(eoa, 1)
        );
        assert_eq!(
            nonces.batch_nonce(TransactionType::EoaControlled),
            join_nonce(eoa, 2)
        );
        assert_eq!(
            nonces.batch_nonce(TransactionType::ContractControlled),
            U256::zero()
        );
    }

    #[test]
    fn batch_nonces_never_collide_across_types() {
        let nonces = NonceManager::default();
        assert_ne!(
            nonces.batch_nonce(TransactionType::EoaControlled),
            nonces.batch_nonce(TransactionType::ContractControlled)
        );
    }
}
