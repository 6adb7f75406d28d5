//! The capability the keeper needs from a network endpoint.
//!
//! Everything above this module talks to the chain through [`ChainClient`],
//! so the decision and submission logic can be exercised against a mock.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;
use ethers::types::{Address, Bytes, H256, U256};

pub use ethereum::EthereumChainClient;

pub mod chief;
mod ethereum;

/// Errors returned by a [`ChainClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainCommunicationError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc error: {0}")]
    RpcError(String),
    #[error("contract call failed: {0}")]
    ContractError(String),
    /// The node answered and refused the transaction
    #[error("transaction rejected: {0}")]
    TxRejected(String),
    /// The node refused the transaction because its nonce is already used
    #[error("nonce already used: {0}")]
    NonceConsumed(String),
    #[error("{0}")]
    Other(String),
}

impl ChainCommunicationError {
    pub fn from_rpc<E: std::fmt::Display>(err: E) -> Self {
        Self::RpcError(err.to_string())
    }
}

pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// Snapshot of the chain head taken at poll time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct ChainState {
    pub block_number: u64,
    pub block_hash: H256,
}

/// A candidate ("yay") and the approval weight the Chief reports for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct Candidate {
    pub address: Address,
    pub approval_weight: U256,
}

/// The Chief's currently active candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct HatState {
    pub current_hat: Address,
}

/// Inclusion details of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct Receipt {
    pub block_number: u64,
    pub block_hash: H256,
    pub success: bool,
}

/// A signed, network-ready transaction.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct SignedTransaction {
    pub tx_hash: H256,
    pub raw: Bytes,
}

#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// The Chief's current hat
    async fn get_hat(&self) -> ChainResult<HatState>;

    /// Approval weights of `hat` followed by every other known candidate, in
    /// discovery order.
    async fn get_candidate_weights(&self, hat: Address) -> ChainResult<Vec<Candidate>>;

    /// Height and hash of the current head
    async fn get_block_number(&self) -> ChainResult<ChainState>;

    /// Hash of the canonical block at `height`, if there is one
    async fn get_block_hash(&self, height: u64) -> ChainResult<Option<H256>>;

    /// The network's suggested gas price
    async fn suggest_gas_price(&self) -> ChainResult<U256>;

    /// Next nonce to use for `account`, including pending transactions
    async fn get_nonce(&self, account: Address) -> ChainResult<U256>;

    /// Broadcast a signed transaction, returning its hash. A refusal by the
    /// node is reported as [`ChainCommunicationError::TxRejected`] or
    /// [`ChainCommunicationError::NonceConsumed`]; any other error leaves it
    /// open whether the node accepted the transaction.
    async fn submit_signed_transaction(&self, tx: &SignedTransaction) -> ChainResult<H256>;

    /// Receipt of a transaction, `None` if it has not been mined
    async fn get_receipt(&self, hash: H256) -> ChainResult<Option<Receipt>>;
}
