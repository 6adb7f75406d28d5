use ethers::types::{Address, Bytes, H256, U256};

/// Why a lift was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Mined, but the Chief rejected it
    Reverted,
    /// Still unconfirmed after the configured number of broadcasts
    AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Broadcast and waiting for inclusion
    Submitted,
    /// Sent, but the node's answer was lost. It may or may not be in the
    /// mempool, so the same signed bytes are sent again unless a receipt
    /// turns up first.
    Unacknowledged,
    /// Successfully included. Final once the block is still canonical on the
    /// next poll.
    Confirmed {
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
    },
    /// The including block was reorged out
    Dropped,
    /// The node refused the latest broadcast. A higher priced one with the
    /// same nonce is due.
    Replaced,
    Failed(FailureReason),
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Failed(_))
    }
}

/// A broadcast that was superseded by a replacement. It stays tracked since
/// it may still be the one that gets mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastAttempt {
    pub tx_hash: H256,
    pub gas_price: U256,
}

/// The single lift transaction the keeper has in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub nonce: U256,
    pub target_candidate: Address,
    /// Price of the latest broadcast
    pub gas_price: U256,
    pub submitted_at_block: u64,
    /// Hash of the latest broadcast
    pub tx_hash: H256,
    /// Signed bytes of the latest broadcast
    pub raw: Bytes,
    /// Broadcasts made for this lift, refused and unanswered ones included
    pub attempts: u32,
    pub status: TxStatus,
    /// Superseded broadcasts, oldest first
    pub replaced: Vec<BroadcastAttempt>,
}

impl PendingTransaction {
    /// Hashes of every broadcast of this lift, latest first. Any of them may
    /// be the one that gets mined.
    pub fn tx_hashes(&self) -> impl Iterator<Item = H256> + '_ {
        std::iter::once(self.tx_hash).chain(self.replaced.iter().rev().map(|a| a.tx_hash))
    }

    /// Gas prices of every broadcast, in broadcast order.
    pub fn gas_prices(&self) -> Vec<U256> {
        self.replaced
            .iter()
            .map(|attempt| attempt.gas_price)
            .chain(std::iter::once(self.gas_price))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_prices_cover_every_broadcast() {
        let tx = PendingTransaction {
            nonce: U256::from(5),
            target_candidate: Address::from_low_u64_be(0xb),
            gas_price: U256::from(30),
            submitted_at_block: 100,
            tx_hash: H256::from_low_u64_be(3),
            raw: Bytes::from(vec![3]),
            attempts: 3,
            status: TxStatus::Submitted,
            replaced: vec![
                BroadcastAttempt {
                    tx_hash: H256::from_low_u64_be(1),
                    gas_price: U256::from(10),
                },
                BroadcastAttempt {
                    tx_hash: H256::from_low_u64_be(2),
                    gas_price: U256::from(20),
                },
            ],
        };

        assert_eq!(
            tx.tx_hashes().collect::<Vec<_>>(),
            vec![
                H256::from_low_u64_be(3),
                H256::from_low_u64_be(2),
                H256::from_low_u64_be(1)
            ]
        );
        assert_eq!(
            tx.gas_prices(),
            vec![U256::from(10), U256::from(20), U256::from(30)]
        );
    }
}
