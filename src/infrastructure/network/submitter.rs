// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::domain::constants::{
    BPS_DENOMINATOR, DEFAULT_SWAP_GAS_LIMIT, GAS_LIMIT_BUFFER_BPS, MAX_GAS_LIMIT,
};
use crate::domain::swap::{FillReceipt, PreparedTx, SignedTx};
use crate::network::balances::{BalanceReader, received_from_logs};
use crate::network::gas::{GasFees, GasOracle};
use crate::network::nonce::NonceManager;
use crate::network::provider::HttpProvider;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256, TxKind, U256, keccak256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;

/// Signs, broadcasts and tracks transactions from the treasury wallet.
#[derive(Clone)]
pub struct TxSubmitter {
    provider: HttpProvider,
    signer: PrivateKeySigner,
    chain_id: u64,
    nonce: NonceManager,
    gas: GasOracle,
    balances: BalanceReader,
}

/// Pad a venue-provided gas figure, falling back to `default` when absent.
pub fn buffered_gas_limit(suggested: u64, default: u64) -> u64 {
    if suggested == 0 {
        return default;
    }
    let padded = u128::from(suggested) * u128::from(GAS_LIMIT_BUFFER_BPS) / u128::from(BPS_DENOMINATOR);
    u64::try_from(padded).unwrap_or(MAX_GAS_LIMIT).min(MAX_GAS_LIMIT)
}

/// Node errors that mean the exact same transaction is already known to the network.
fn is_duplicate_broadcast(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("already known") || m.contains("known transaction") || m.contains("alreadyknown")
}

impl TxSubmitter {
    pub fn new(provider: HttpProvider, signer: PrivateKeySigner, chain_id: u64) -> Self {
        let signer = signer.with_chain_id(Some(chain_id));
        let nonce = NonceManager::new(provider.clone(), signer.address());
        let gas = GasOracle::new(provider.clone());
        let balances = BalanceReader::new(provider.clone());
        Self {
            provider,
            signer,
            chain_id,
            nonce,
            gas,
            balances,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub async fn fees(&self) -> Result<GasFees, AppError> {
        self.gas.estimate_eip1559_fees().await
    }

    pub async fn balance_of(&self, token: Address) -> Result<U256, AppError> {
        self.balances.balance(token, self.address()).await
    }

    async fn gas_limit(&self, tx: &PreparedTx, default: u64) -> u64 {
        if tx.gas > 0 {
            return buffered_gas_limit(tx.gas, default);
        }
        let request = TransactionRequest::default()
            .from(self.address())
            .to(tx.to)
            .value(tx.value)
            .input(tx.data.clone().into());
        match self.provider.estimate_gas(request).await {
            Ok(estimate) => buffered_gas_limit(estimate, default),
            Err(e) => {
                tracing::debug!(target: "submitter", error = %e, default, "gas estimate failed; using default");
                default
            }
        }
    }

    /// Sign `tx` with a freshly reserved nonce. Nothing is sent to the network.
    pub async fn sign(&self, tx: &PreparedTx, fees: &GasFees) -> Result<SignedTx, AppError> {
        let gas_limit = self.gas_limit(tx, DEFAULT_SWAP_GAS_LIMIT).await;
        let nonce = self.nonce.reserve().await?;
        let mut unsigned = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            gas_limit,
            to: TxKind::Call(tx.to),
            value: tx.value,
            access_list: Default::default(),
            input: tx.data.clone(),
        };
        let sig = TxSignerSync::sign_transaction_sync(&self.signer, &mut unsigned)
            .map_err(|e| AppError::Strategy(format!("Sign swap failed: {}", e)))?;
        let signed: TxEnvelope = unsigned.into_signed(sig).into();
        Ok(SignedTx {
            hash: *signed.tx_hash(),
            raw: signed.encoded_2718(),
            nonce,
        })
    }

    /// Broadcast a raw signed transaction. Re-sending one the node already knows is not an error.
    pub async fn broadcast(&self, raw: &[u8]) -> Result<B256, AppError> {
        let hash = keccak256(raw);
        match self.provider.send_raw_transaction(raw).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) if is_duplicate_broadcast(&e.to_string()) => {
                tracing::debug!(target: "submitter", tx = %format!("{hash:#x}"), "transaction already known");
                Ok(hash)
            }
            Err(e) => {
                self.nonce.resync().await;
                Err(AppError::Transaction {
                    hash: format!("{hash:#x}"),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Receipt for `hash`, or `None` while it is not mined.
    pub async fn receipt(&self, hash: B256, dst_token: Address) -> Result<Option<FillReceipt>, AppError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| AppError::Connection(format!("Receipt fetch failed: {}", e)))?;
        Ok(receipt.map(|rcpt| FillReceipt {
            success: rcpt.status(),
            block_number: rcpt.block_number,
            gas_used: rcpt.gas_used,
            amount_out: received_from_logs(&rcpt, dst_token, self.address()),
        }))
    }
}
