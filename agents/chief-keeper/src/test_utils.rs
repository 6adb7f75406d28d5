use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

use crate::chain::{
    Candidate, ChainClient, ChainCommunicationError, ChainResult, ChainState, HatState, Receipt,
    SignedTransaction,
};
use crate::error::KeeperError;
use crate::signer::{LiftRequest, LiftSigner};

mockall::mock! {
    pub Chief {}

    #[async_trait]
    impl ChainClient for Chief {
        async fn get_hat(&self) -> ChainResult<HatState>;
        async fn get_candidate_weights(&self, hat: Address) -> ChainResult<Vec<Candidate>>;
        async fn get_block_number(&self) -> ChainResult<ChainState>;
        async fn get_block_hash(&self, height: u64) -> ChainResult<Option<H256>>;
        async fn suggest_gas_price(&self) -> ChainResult<U256>;
        async fn get_nonce(&self, account: Address) -> ChainResult<U256>;
        async fn submit_signed_transaction(&self, tx: &SignedTransaction) -> ChainResult<H256>;
        async fn get_receipt(&self, hash: H256) -> ChainResult<Option<Receipt>>;
    }
}

mockall::mock! {
    pub Signer {}

    #[async_trait]
    impl LiftSigner for Signer {
        fn address(&self) -> Address;
        async fn sign_lift(&self, request: &LiftRequest) -> Result<SignedTransaction, KeeperError>;
    }
}

impl std::fmt::Debug for MockChief {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockChief")
    }
}

impl std::fmt::Debug for MockSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockSigner")
    }
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn gwei(amount: &str) -> U256 {
    ethers::utils::parse_units(amount, "gwei").unwrap().into()
}

pub fn keeper_account() -> Address {
    addr(0x4ee9)
}

/// Hash of the canonical block at `height` unless a test reorgs it.
pub fn block_hash(height: u64) -> H256 {
    H256::from_low_u64_be(0xb10c_0000 + height)
}

/// Hash the fake signer gives a lift priced at `gas_price`, so tests can tell
/// broadcasts apart by price.
pub fn lift_hash(gas_price: U256) -> H256 {
    H256::from_low_u64_be(gas_price.low_u64())
}

/// A signer that "signs" by encoding the gas price into the hash.
pub fn fake_signer() -> MockSigner {
    let mut signer = MockSigner::new();
    signer.expect_address().returning(keeper_account);
    signer.expect_sign_lift().returning(|request| {
        Ok(SignedTransaction::new(
            lift_hash(request.gas_price),
            Bytes::from(request.gas_price.low_u64().to_be_bytes().to_vec()),
        ))
    });
    signer
}

/// What the scripted Chief reports. Tests mutate it between polls to move
/// the chain along.
#[derive(Debug, Default)]
pub struct ChainView {
    pub head: u64,
    pub hat: Address,
    pub candidates: Vec<Candidate>,
    pub gas_price: U256,
    pub nonce: U256,
    pub nonce_reads: usize,
    pub receipts: HashMap<H256, Receipt>,
    /// Heights whose canonical hash differs from [`block_hash`]
    pub reorged: HashMap<u64, H256>,
    /// Every accepted broadcast, in order
    pub broadcasts: Vec<H256>,
    /// The node refuses every broadcast as underpriced
    pub reject_broadcasts: bool,
    /// The node refuses every broadcast because the nonce is used
    pub nonce_consumed: bool,
    /// The next this many broadcasts are accepted but the answer is lost
    pub unacknowledged: usize,
    /// Every request fails while set
    pub rpc_down: bool,
    /// Requests made, failed ones included
    pub requests: usize,
}

pub type SharedChain = Arc<Mutex<ChainView>>;

pub fn shared_chain(view: ChainView) -> SharedChain {
    Arc::new(Mutex::new(view))
}

fn read<T>(chain: &SharedChain, f: impl FnOnce(&mut ChainView) -> T) -> ChainResult<T> {
    let mut view = chain.lock().unwrap();
    view.requests += 1;
    if view.rpc_down {
        return Err(ChainCommunicationError::RpcError(
            "connection refused".to_owned(),
        ));
    }
    Ok(f(&mut view))
}

/// A mock Chief whose answers come from `chain`.
pub fn scripted_chief(chain: &SharedChain) -> MockChief {
    let mut chief = MockChief::new();

    let c = chain.clone();
    chief
        .expect_get_hat()
        .returning(move || read(&c, |view| HatState::new(view.hat)));
    let c = chain.clone();
    chief
        .expect_get_candidate_weights()
        .returning(move |_hat| read(&c, |view| view.candidates.clone()));
    let c = chain.clone();
    chief.expect_get_block_number().returning(move || {
        read(&c, |view| ChainState::new(view.head, block_hash(view.head)))
    });
    let c = chain.clone();
    chief.expect_get_block_hash().returning(move |height| {
        read(&c, |view| {
            (height <= view.head)
                .then(|| view.reorged.get(&height).copied().unwrap_or_else(|| block_hash(height)))
        })
    });
    let c = chain.clone();
    chief
        .expect_suggest_gas_price()
        .returning(move || read(&c, |view| view.gas_price));
    let c = chain.clone();
    chief.expect_get_nonce().returning(move |_account| {
        read(&c, |view| {
            view.nonce_reads += 1;
            view.nonce
        })
    });
    let c = chain.clone();
    chief.expect_submit_signed_transaction().returning(move |tx| {
        read(&c, |view| {
            if view.reject_broadcasts {
                return Err(ChainCommunicationError::TxRejected(
                    "replacement transaction underpriced".to_owned(),
                ));
            }
            if view.nonce_consumed {
                return Err(ChainCommunicationError::NonceConsumed(
                    "nonce too low".to_owned(),
                ));
            }
            view.broadcasts.push(tx.tx_hash);
            if view.unacknowledged > 0 {
                view.unacknowledged -= 1;
                return Err(ChainCommunicationError::Timeout(Duration::from_secs(10)));
            }
            Ok(tx.tx_hash)
        })?
    });
    let c = chain.clone();
    chief
        .expect_get_receipt()
        .returning(move |hash| read(&c, |view| view.receipts.get(&hash).copied()));

    chief
}
