use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::providers::{Middleware, MiddlewareError};
use ethers::types::{Address, BlockNumber, TransactionReceipt, H256, U256, U64};
use ethers::utils::format_ether;
use eyre::{ensure, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::chief::DsChief;
use super::{
    Candidate, ChainClient, ChainCommunicationError, ChainResult, ChainState, HatState, Receipt,
    SignedTransaction,
};

/// Candidates discovered so far by scanning `Etch` events.
#[derive(Debug, Default)]
struct YayCache {
    /// First block not yet scanned
    next_block: u64,
    max_yays: Option<u64>,
    seen: HashSet<Address>,
    /// Discovery order
    yays: Vec<Address>,
}

impl YayCache {
    fn insert(&mut self, yay: Address) {
        if self.seen.insert(yay) {
            self.yays.push(yay);
        }
    }
}

/// A [`ChainClient`] backed by an ethers middleware and the DSChief contract.
#[derive(Debug)]
pub struct EthereumChainClient<M> {
    provider: Arc<M>,
    chief: DsChief<M>,
    timeout: Duration,
    log_chunk_size: u64,
    yays: Mutex<YayCache>,
}

impl<M> EthereumChainClient<M>
where
    M: Middleware + 'static,
{
    pub fn new(
        provider: Arc<M>,
        chief_address: Address,
        deployment_block: u64,
        log_chunk_size: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            chief: DsChief::new(chief_address, provider.clone()),
            provider,
            timeout,
            log_chunk_size: log_chunk_size.max(1),
            yays: Mutex::new(YayCache {
                next_block: deployment_block,
                ..Default::default()
            }),
        }
    }

    /// Checks the endpoint and the Chief before the keeper starts. Any error
    /// here is a misconfiguration and should stop the process.
    pub async fn verify_deployment(
        &self,
        expected_chain_id: Option<u64>,
        account: Address,
    ) -> eyre::Result<u64> {
        let chain_id = self
            .timed(self.provider.get_chainid())
            .await
            .wrap_err("Failed to reach the rpc endpoint")?
            .low_u64();
        if let Some(expected) = expected_chain_id {
            ensure!(
                expected == chain_id,
                "Endpoint reports chain id {chain_id}, expected {expected}"
            );
        }

        let chief = self.chief.address();
        let code = self
            .timed(self.provider.get_code(chief, None))
            .await
            .wrap_err("Failed to fetch Chief contract code")?;
        ensure!(!code.is_empty(), "No contract deployed at Chief address {chief:?}");

        let balance = self
            .timed(self.provider.get_balance(account, None))
            .await
            .wrap_err("Failed to fetch keeper balance")?;

        info!(
            chain_id,
            ?chief,
            ?account,
            balance = %format_ether(balance),
            "Confirmed deployment details"
        );
        Ok(chain_id)
    }

    async fn timed<T, E, F>(&self, fut: F) -> ChainResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(ChainCommunicationError::from_rpc),
            Err(_) => Err(ChainCommunicationError::Timeout(self.timeout)),
        }
    }

    async fn timed_call<T, F>(&self, fut: F) -> ChainResult<T>
    where
        F: Future<Output = Result<T, ContractError<M>>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|err| ChainCommunicationError::ContractError(err.to_string())),
            Err(_) => Err(ChainCommunicationError::Timeout(self.timeout)),
        }
    }

    /// Brings the candidate cache up to the current head and returns it.
    async fn known_yays(&self) -> ChainResult<Vec<Address>> {
        let head = self.timed(self.provider.get_block_number()).await?.as_u64();
        let mut cache = self.yays.lock().await;

        let max_yays = match cache.max_yays {
            Some(max_yays) => max_yays,
            None => {
                let call = self.chief.max_yays();
                let max_yays = self.timed_call(call.call()).await?;
                let max_yays = max_yays.min(U256::from(u64::MAX)).low_u64();
                cache.max_yays = Some(max_yays);
                max_yays
            }
        };

        while cache.next_block <= head {
            let from = cache.next_block;
            let to = from
                .saturating_add(self.log_chunk_size.saturating_sub(1))
                .min(head);
            let event = self.chief.etch_filter().from_block(from).to_block(to);
            let etches = self.timed_call(event.query()).await?;
            for etch in etches {
                for yay in self.unpack_slate(etch.slate, max_yays).await? {
                    cache.insert(yay);
                }
            }
            cache.next_block = to.saturating_add(1);
            debug!(from, to, known = cache.yays.len(), "Scanned Etch events");
        }

        Ok(cache.yays.clone())
    }

    /// Reads the addresses of a slate. The Chief exposes no slate length, so
    /// indices are read until the getter reverts.
    async fn unpack_slate(&self, slate: [u8; 32], max_yays: u64) -> ChainResult<Vec<Address>> {
        let mut yays = vec![];
        for i in 0..max_yays {
            let call = self.chief.slates(slate, U256::from(i));
            match tokio::time::timeout(self.timeout, call.call()).await {
                Err(_) => return Err(ChainCommunicationError::Timeout(self.timeout)),
                Ok(Ok(yay)) => yays.push(yay),
                Ok(Err(err)) if is_out_of_bounds(&err) => break,
                Ok(Err(err)) => return Err(ChainCommunicationError::ContractError(err.to_string())),
            }
        }
        Ok(yays)
    }
}

#[async_trait]
impl<M> ChainClient for EthereumChainClient<M>
where
    M: Middleware + 'static,
{
    #[instrument(skip(self), err)]
    async fn get_hat(&self) -> ChainResult<HatState> {
        let call = self.chief.hat();
        let hat = self.timed_call(call.call()).await?;
        Ok(HatState::new(hat))
    }

    #[instrument(skip(self), err)]
    async fn get_candidate_weights(&self, hat: Address) -> ChainResult<Vec<Candidate>> {
        let yays = self.known_yays().await?;

        let mut candidates = Vec::with_capacity(yays.len().saturating_add(1));
        for address in hat_first(hat, yays) {
            let call = self.chief.approvals(address);
            let approval_weight = self.timed_call(call.call()).await?;
            candidates.push(Candidate::new(address, approval_weight));
        }
        Ok(candidates)
    }

    async fn get_block_number(&self) -> ChainResult<ChainState> {
        let block = self
            .timed(self.provider.get_block(BlockNumber::Latest))
            .await?
            .ok_or_else(|| ChainCommunicationError::Other("latest block not found".to_owned()))?;
        match (block.number, block.hash) {
            (Some(number), Some(hash)) => Ok(ChainState::new(number.as_u64(), hash)),
            _ => Err(ChainCommunicationError::Other(
                "latest block is missing its number or hash".to_owned(),
            )),
        }
    }

    async fn get_block_hash(&self, height: u64) -> ChainResult<Option<H256>> {
        let block = self
            .timed(self.provider.get_block(BlockNumber::Number(height.into())))
            .await?;
        Ok(block.and_then(|block| block.hash))
    }

    async fn suggest_gas_price(&self) -> ChainResult<U256> {
        self.timed(self.provider.get_gas_price()).await
    }

    async fn get_nonce(&self, account: Address) -> ChainResult<U256> {
        self.timed(
            self.provider
                .get_transaction_count(account, Some(BlockNumber::Pending.into())),
        )
        .await
    }

    #[instrument(skip(self, tx), fields(tx_hash = ?tx.tx_hash), err)]
    async fn submit_signed_transaction(&self, tx: &SignedTransaction) -> ChainResult<H256> {
        let send = self.provider.send_raw_transaction(tx.raw.clone());
        match tokio::time::timeout(self.timeout, send).await {
            Err(_) => Err(ChainCommunicationError::Timeout(self.timeout)),
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(err)) if is_already_known(&err.to_string()) => {
                debug!(tx_hash = ?tx.tx_hash, "Node already knows this transaction");
                Ok(tx.tx_hash)
            }
            Ok(Err(err)) => match err.as_error_response() {
                Some(response) => Err(rejection(&response.message)),
                None => Err(ChainCommunicationError::from_rpc(err)),
            },
        }
    }

    async fn get_receipt(&self, hash: H256) -> ChainResult<Option<Receipt>> {
        let receipt = self
            .timed(self.provider.get_transaction_receipt(hash))
            .await?;
        Ok(receipt.and_then(receipt_from_ethers))
    }
}

/// Pending receipts (no block yet) are reported as not mined.
fn receipt_from_ethers(receipt: TransactionReceipt) -> Option<Receipt> {
    let block_number = receipt.block_number?.as_u64();
    let block_hash = receipt.block_hash?;
    let success = receipt.status == Some(U64::from(1));
    Some(Receipt::new(block_number, block_hash, success))
}

/// The hat, then every other yay in discovery order.
fn hat_first(hat: Address, yays: Vec<Address>) -> impl Iterator<Item = Address> {
    std::iter::once(hat).chain(yays.into_iter().filter(move |yay| *yay != hat))
}

fn rejection(message: &str) -> ChainCommunicationError {
    let lower = message.to_lowercase();
    if lower.contains("nonce too low") || lower.contains("nonce has already been used") {
        ChainCommunicationError::NonceConsumed(message.to_owned())
    } else {
        ChainCommunicationError::TxRejected(message.to_owned())
    }
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

fn is_out_of_bounds<M: Middleware>(err: &ContractError<M>) -> bool {
    if err.is_revert() {
        return true;
    }
    // older Chief deployments hit an invalid opcode instead of a revert
    let message = err.to_string().to_lowercase();
    message.contains("revert") || message.contains("invalid opcode")
}
