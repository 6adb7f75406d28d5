use std::fmt::Debug;

use async_trait::async_trait;
use derive_new::new;
use ethers::abi::AbiEncode;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;

use crate::chain::chief::LiftCall;
use crate::chain::SignedTransaction;
use crate::error::KeeperError;

/// Everything that varies between two lift transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct LiftRequest {
    pub candidate: Address,
    pub nonce: U256,
    pub gas_price: U256,
}

/// Turns a lift request into a signed, network-ready transaction.
#[async_trait]
pub trait LiftSigner: Send + Sync + Debug {
    /// The account transactions are signed for
    fn address(&self) -> Address;

    async fn sign_lift(&self, request: &LiftRequest) -> Result<SignedTransaction, KeeperError>;
}

/// Signs legacy `lift` transactions with a local key.
#[derive(Debug, Clone)]
pub struct WalletLiftSigner {
    wallet: LocalWallet,
    chief: Address,
    gas_limit: U256,
}

impl WalletLiftSigner {
    /// `chain_id` is baked into every signature (EIP-155).
    pub fn new(wallet: LocalWallet, chain_id: u64, chief: Address, gas_limit: U256) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
            chief,
            gas_limit,
        }
    }

    fn build(&self, request: &LiftRequest) -> TypedTransaction {
        let data = LiftCall {
            whom: request.candidate,
        }
        .encode();
        TransactionRequest::new()
            .from(self.wallet.address())
            .to(self.chief)
            .data(data)
            .nonce(request.nonce)
            .gas(self.gas_limit)
            .gas_price(request.gas_price)
            .chain_id(self.wallet.chain_id())
            .into()
    }
}

#[async_trait]
impl LiftSigner for WalletLiftSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_lift(&self, request: &LiftRequest) -> Result<SignedTransaction, KeeperError> {
        let tx = self.build(request);
        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|err| KeeperError::SigningError(err.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = H256::from(keccak256(&raw));
        Ok(SignedTransaction::new(tx_hash, raw))
    }
}
