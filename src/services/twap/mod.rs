// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

pub mod executor;
pub mod planner;
pub mod report;
pub mod safety;
pub mod scheduler;

use crate::common::error::AppError;
use crate::domain::swap::{FillReceipt, PreparedTx, Quote, SignedTx, SwapRequest};
use crate::network::gas::GasFees;
use crate::network::oneinch::OneInchClient;
use crate::network::submitter::TxSubmitter;
use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

pub use executor::{ExecutorConfig, TrancheExecutor, TrancheOutcome};
pub use planner::{PlanRequest, TwapPlanner};
pub use safety::SafetyGuard;
pub use scheduler::{SchedulerConfig, TickSummary, TwapScheduler};

/// Where tranches get priced and filled.
pub trait SwapVenue: Send + Sync {
    fn quote(
        &self,
        src: Address,
        dst: Address,
        amount: U256,
    ) -> impl Future<Output = Result<Quote, AppError>> + Send;

    fn build_swap(&self, req: &SwapRequest) -> impl Future<Output = Result<PreparedTx, AppError>> + Send;

    fn spender(&self) -> impl Future<Output = Result<Address, AppError>> + Send;

    fn allowance(
        &self,
        token: Address,
        wallet: Address,
    ) -> impl Future<Output = Result<U256, AppError>> + Send;

    fn approve_transaction(
        &self,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<PreparedTx, AppError>> + Send;
}

/// The wallet's view of the chain: balances, fees, signing and settlement.
pub trait ChainGateway: Send + Sync {
    fn wallet(&self) -> Address;

    fn balance_of(&self, token: Address) -> impl Future<Output = Result<U256, AppError>> + Send;

    fn fees(&self) -> impl Future<Output = Result<GasFees, AppError>> + Send;

    fn sign(
        &self,
        tx: &PreparedTx,
        fees: &GasFees,
    ) -> impl Future<Output = Result<SignedTx, AppError>> + Send;

    fn broadcast(&self, raw: &[u8]) -> impl Future<Output = Result<B256, AppError>> + Send;

    fn receipt(
        &self,
        hash: B256,
        dst_token: Address,
    ) -> impl Future<Output = Result<Option<FillReceipt>, AppError>> + Send;
}

impl SwapVenue for OneInchClient {
    async fn quote(&self, src: Address, dst: Address, amount: U256) -> Result<Quote, AppError> {
        OneInchClient::quote(self, src, dst, amount).await
    }

    async fn build_swap(&self, req: &SwapRequest) -> Result<PreparedTx, AppError> {
        self.swap(req).await
    }

    async fn spender(&self) -> Result<Address, AppError> {
        OneInchClient::spender(self).await
    }

    async fn allowance(&self, token: Address, wallet: Address) -> Result<U256, AppError> {
        OneInchClient::allowance(self, token, wallet).await
    }

    async fn approve_transaction(&self, token: Address, amount: U256) -> Result<PreparedTx, AppError> {
        OneInchClient::approve_transaction(self, token, amount).await
    }
}

impl ChainGateway for TxSubmitter {
    fn wallet(&self) -> Address {
        self.address()
    }

    async fn balance_of(&self, token: Address) -> Result<U256, AppError> {
        TxSubmitter::balance_of(self, token).await
    }

    async fn fees(&self) -> Result<GasFees, AppError> {
        TxSubmitter::fees(self).await
    }

    async fn sign(&self, tx: &PreparedTx, fees: &GasFees) -> Result<SignedTx, AppError> {
        TxSubmitter::sign(self, tx, fees).await
    }

    async fn broadcast(&self, raw: &[u8]) -> Result<B256, AppError> {
        TxSubmitter::broadcast(self, raw).await
    }

    async fn receipt(&self, hash: B256, dst_token: Address) -> Result<Option<FillReceipt>, AppError> {
        TxSubmitter::receipt(self, hash, dst_token).await
    }
}

#[derive(Default, Debug)]
pub struct TwapStats {
    pub ticks: AtomicU64,
    pub executed: AtomicU64,
    pub filled: AtomicU64,
    pub deferred: AtomicU64,
    pub failed: AtomicU64,
    pub expired: AtomicU64,
    pub skipped: AtomicU64,
    pub rebroadcast: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TwapStatsSnapshot {
    pub ticks: u64,
    pub executed: u64,
    pub filled: u64,
    pub deferred: u64,
    pub failed: u64,
    pub expired: u64,
    pub skipped: u64,
    pub rebroadcast: u64,
}

impl TwapStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TwapStatsSnapshot {
        TwapStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rebroadcast: self.rebroadcast.load(Ordering::Relaxed),
        }
    }
}
