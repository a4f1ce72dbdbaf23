// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::app::config::GlobalSettings;
use crate::common::error::AppError;
use crate::data::db::Database;
use crate::domain::constants::is_native;
use crate::domain::swap::{FillReceipt, PreparedTx, SwapRequest};
use crate::domain::tranche::{Tranche, TrancheStatus, TwapPlan, price_floor};
use crate::services::twap::{ChainGateway, SwapVenue, TwapStats};
use alloy::primitives::{Address, B256, U256};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Seconds after `eligible_at` a tranche may still run; 0 disables expiry.
    pub tranche_expiry_secs: u64,
    pub max_attempts: u32,
    pub receipt_poll: Duration,
    pub receipt_timeout: Duration,
    pub auto_approve: bool,
    /// Base-fee ceiling in wei; 0 disables the check.
    pub max_gas_price_wei: u128,
    pub dry_run: bool,
}

impl ExecutorConfig {
    pub fn from_settings(settings: &GlobalSettings, dry_run: bool) -> Self {
        Self {
            tranche_expiry_secs: settings.tranche_expiry_secs,
            max_attempts: settings.max_attempts_value(),
            receipt_poll: settings.receipt_poll(),
            receipt_timeout: settings.receipt_timeout(),
            auto_approve: settings.auto_approve_value(),
            max_gas_price_wei: settings.max_gas_price_wei(),
            dry_run,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tranche_expiry_secs: 0,
            max_attempts: 3,
            receipt_poll: Duration::from_millis(1_000),
            receipt_timeout: Duration::from_millis(90_000),
            auto_approve: false,
            max_gas_price_wei: 200_000_000_000,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrancheOutcome {
    Filled {
        tx_hash: B256,
        amount_out: U256,
    },
    /// Broadcast but not mined before the receipt timeout; reconciled on a later tick.
    Submitted { tx_hash: B256 },
    /// Preconditions not met; the tranche stays pending and keeps its attempts.
    Deferred { reason: String },
    Expired,
    /// Another worker claimed the tranche first.
    Skipped,
    Failed {
        reason: String,
        status: TrancheStatus,
    },
    DryRun {
        quoted_out: U256,
        expected_out: U256,
        floor: U256,
        needs_approval: bool,
    },
}

impl TrancheOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TrancheOutcome::Filled { .. } => "filled",
            TrancheOutcome::Submitted { .. } => "submitted",
            TrancheOutcome::Deferred { .. } => "deferred",
            TrancheOutcome::Expired => "expired",
            TrancheOutcome::Skipped => "skipped",
            TrancheOutcome::Failed { .. } => "failed",
            TrancheOutcome::DryRun { .. } => "dry-run",
        }
    }
}

enum Mined {
    Receipt(FillReceipt),
    TimedOut,
}

/// Runs one tranche through balance, price, allowance and gas checks, then claims,
/// signs, records and broadcasts it.
pub struct TrancheExecutor<V, G> {
    db: Database,
    venue: Arc<V>,
    chain: Arc<G>,
    cfg: ExecutorConfig,
    stats: Arc<TwapStats>,
    dry_run_seen: DashSet<(String, u32)>,
    /// Approvals broadcast but not yet mined, by source token.
    pending_approvals: DashMap<Address, B256>,
}

impl<V: SwapVenue, G: ChainGateway> TrancheExecutor<V, G> {
    pub fn new(
        db: Database,
        venue: Arc<V>,
        chain: Arc<G>,
        cfg: ExecutorConfig,
        stats: Arc<TwapStats>,
    ) -> Self {
        Self {
            db,
            venue,
            chain,
            cfg,
            stats,
            dry_run_seen: DashSet::new(),
            pending_approvals: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &Arc<TwapStats> {
        &self.stats
    }

    async fn defer(&self, tranche: &Tranche, reason: String) -> Result<TrancheOutcome, AppError> {
        tracing::info!(
            target: "twap",
            plan = %tranche.plan_id,
            tranche = tranche.index,
            reason = %reason,
            "Tranche deferred"
        );
        if !self.cfg.dry_run {
            self.db
                .note_deferral(&tranche.plan_id, tranche.index, &reason)
                .await?;
        }
        TwapStats::bump(&self.stats.deferred);
        Ok(TrancheOutcome::Deferred { reason })
    }

    async fn fail(
        &self,
        tranche: &Tranche,
        reason: String,
        retryable: bool,
    ) -> Result<TrancheOutcome, AppError> {
        let status = self
            .db
            .mark_failed(
                &tranche.plan_id,
                tranche.index,
                &reason,
                retryable,
                self.cfg.max_attempts,
            )
            .await?
            .unwrap_or(TrancheStatus::Failed);
        tracing::warn!(
            target: "twap",
            plan = %tranche.plan_id,
            tranche = tranche.index,
            status = %status,
            reason = %reason,
            "Tranche attempt failed"
        );
        TwapStats::bump(&self.stats.failed);
        Ok(TrancheOutcome::Failed { reason, status })
    }

    async fn wait_for_receipt(&self, hash: B256, plan: &TwapPlan) -> Result<Mined, AppError> {
        let deadline = Instant::now() + self.cfg.receipt_timeout;
        loop {
            match self.chain.receipt(hash, plan.dst_token).await {
                Ok(Some(receipt)) => return Ok(Mined::Receipt(receipt)),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(target: "twap", tx = %format!("{hash:#x}"), error = %e, "receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(Mined::TimedOut);
            }
            tokio::time::sleep(self.cfg.receipt_poll).await;
        }
    }

    /// Approve exactly `amount` for the venue's spender and wait for it to be mined.
    /// While an earlier approval for the token is still pending no new one is sent.
    async fn approve(&self, plan: &TwapPlan, amount: U256) -> Result<bool, AppError> {
        let token = plan.src_token;
        let pending = self.pending_approvals.get(&token).map(|h| *h);
        if let Some(prev) = pending {
            match self.chain.receipt(prev, token).await? {
                None => {
                    tracing::debug!(
                        target: "twap",
                        plan = %plan.id,
                        tx = %format!("{prev:#x}"),
                        "Approval still pending"
                    );
                    return Ok(false);
                }
                Some(r) => {
                    self.pending_approvals.remove(&token);
                    if r.success {
                        return Ok(true);
                    }
                    tracing::warn!(target: "twap", plan = %plan.id, tx = %format!("{prev:#x}"), "Approval reverted");
                }
            }
        }

        let tx = self.venue.approve_transaction(plan.src_token, amount).await?;
        let fees = self
            .chain
            .fees()
            .await?
            .capped(self.cfg.max_gas_price_wei);
        let signed = self.chain.sign(&tx, &fees).await?;
        let hash = self.chain.broadcast(&signed.raw).await?;
        tracing::info!(
            target: "twap",
            plan = %plan.id,
            token = %format!("{:#x}", plan.src_token),
            amount = %amount,
            tx = %format!("{hash:#x}"),
            "Approval broadcast"
        );
        match self.wait_for_receipt(hash, plan).await? {
            Mined::Receipt(r) => Ok(r.success),
            Mined::TimedOut => {
                self.pending_approvals.insert(token, hash);
                Ok(false)
            }
        }
    }

    /// Settle a tranche that has a receipt: success fills it, a revert fails the attempt.
    async fn settle(
        &self,
        plan: &TwapPlan,
        tranche: &Tranche,
        hash: B256,
        receipt: FillReceipt,
        expected_out: U256,
    ) -> Result<TrancheOutcome, AppError> {
        if !receipt.success {
            return self
                .fail(tranche, format!("transaction {hash:#x} reverted"), true)
                .await;
        }
        // Native output emits no Transfer log; the venue's quoted amount stands in.
        let amount_out = receipt.amount_out.unwrap_or(expected_out);
        self.db
            .mark_filled(&plan.id, tranche.index, amount_out, receipt.block_number)
            .await?;
        TwapStats::bump(&self.stats.filled);
        tracing::info!(
            target: "twap",
            plan = %plan.id,
            tranche = tranche.index,
            tx = %format!("{hash:#x}"),
            amount_out = %amount_out,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Tranche filled"
        );
        Ok(TrancheOutcome::Filled {
            tx_hash: hash,
            amount_out,
        })
    }

    /// Execute one due tranche of `plan`.
    pub async fn execute(
        &self,
        plan: &TwapPlan,
        tranche: &Tranche,
        now: u64,
    ) -> Result<TrancheOutcome, AppError> {
        TwapStats::bump(&self.stats.executed);
        if tranche.status != TrancheStatus::Pending {
            TwapStats::bump(&self.stats.skipped);
            return Ok(TrancheOutcome::Skipped);
        }
        if tranche.eligible_at > now {
            return self
                .defer(tranche, format!("not eligible until {}", tranche.eligible_at))
                .await;
        }

        if self.cfg.tranche_expiry_secs > 0
            && now > tranche.eligible_at.saturating_add(self.cfg.tranche_expiry_secs)
        {
            if !self.cfg.dry_run {
                self.db.mark_expired(&plan.id, tranche.index).await?;
            }
            TwapStats::bump(&self.stats.expired);
            tracing::warn!(target: "twap", plan = %plan.id, tranche = tranche.index, "Tranche expired");
            return Ok(TrancheOutcome::Expired);
        }

        let amount = tranche.source_amount;
        let balance = self.chain.balance_of(plan.src_token).await?;
        if balance < amount {
            let err = AppError::InsufficientFunds {
                required: amount.to_string(),
                available: balance.to_string(),
            };
            return self.defer(tranche, err.to_string()).await;
        }

        let quote = self
            .venue
            .quote(plan.src_token, plan.dst_token, amount)
            .await?;
        let floor = price_floor(tranche.target_amount_estimate, plan.max_drift_bps);
        if quote.amount_out < floor {
            return self
                .defer(
                    tranche,
                    format!(
                        "quote {} below floor {} (estimate {}, drift {} bps)",
                        quote.amount_out, floor, tranche.target_amount_estimate, plan.max_drift_bps
                    ),
                )
                .await;
        }

        let fees = self.chain.fees().await?;
        if fees.exceeds(self.cfg.max_gas_price_wei) {
            return self
                .defer(
                    tranche,
                    format!(
                        "base fee {} wei above cap {} wei",
                        fees.next_base_fee_per_gas, self.cfg.max_gas_price_wei
                    ),
                )
                .await;
        }
        let fees = fees.capped(self.cfg.max_gas_price_wei);

        let mut needs_approval = false;
        if !is_native(plan.src_token) {
            let allowance = self
                .venue
                .allowance(plan.src_token, self.chain.wallet())
                .await?;
            if allowance < amount {
                needs_approval = true;
                if !self.cfg.dry_run {
                    if !self.cfg.auto_approve {
                        let spender = self.venue.spender().await?;
                        return self
                            .defer(
                                tranche,
                                format!("allowance {allowance} for spender {spender:#x} below {amount}"),
                            )
                            .await;
                    }
                    if !self.approve(plan, amount).await? {
                        return self
                            .defer(tranche, "approval not confirmed".to_string())
                            .await;
                    }
                }
            }
        }

        let request = SwapRequest {
            src: plan.src_token,
            dst: plan.dst_token,
            amount,
            from: self.chain.wallet(),
            slippage_bps: plan.slippage_bps,
        };

        if self.cfg.dry_run {
            let prepared = self.venue.build_swap(&request).await?;
            if self.dry_run_seen.insert((plan.id.clone(), tranche.index)) {
                tracing::info!(
                    target: "twap",
                    plan = %plan.id,
                    tranche = tranche.index,
                    amount_in = %amount,
                    quoted_out = %quote.amount_out,
                    floor = %floor,
                    needs_approval,
                    "Dry run: tranche would execute"
                );
            }
            return Ok(TrancheOutcome::DryRun {
                quoted_out: quote.amount_out,
                expected_out: prepared.expected_out,
                floor,
                needs_approval,
            });
        }

        if !self.db.claim_tranche(&plan.id, tranche.index).await? {
            TwapStats::bump(&self.stats.skipped);
            tracing::debug!(target: "twap", plan = %plan.id, tranche = tranche.index, "Lost tranche claim");
            return Ok(TrancheOutcome::Skipped);
        }

        let prepared: PreparedTx = match self.venue.build_swap(&request).await {
            Ok(p) => p,
            Err(e) => return self.fail(tranche, format!("swap build failed: {e}"), true).await,
        };
        let signed = match self.chain.sign(&prepared, &fees).await {
            Ok(s) => s,
            Err(e) => return self.fail(tranche, format!("signing failed: {e}"), true).await,
        };

        self.db
            .mark_submitted(
                &plan.id,
                tranche.index,
                signed.hash,
                &signed.raw,
                quote.amount_out,
                now,
            )
            .await?;

        let hash = match self.chain.broadcast(&signed.raw).await {
            Ok(h) => h,
            Err(e) if e.is_rejected_broadcast() => {
                return self.fail(tranche, format!("broadcast rejected: {e}"), true).await;
            }
            Err(e) => {
                // The node may have accepted it; only reconcile can tell.
                tracing::warn!(
                    target: "twap",
                    plan = %plan.id,
                    tranche = tranche.index,
                    tx = %format!("{:#x}", signed.hash),
                    error = %e,
                    "Broadcast outcome unknown; tranche stays submitted"
                );
                return Ok(TrancheOutcome::Submitted {
                    tx_hash: signed.hash,
                });
            }
        };
        tracing::info!(
            target: "twap",
            plan = %plan.id,
            tranche = tranche.index,
            nonce = signed.nonce,
            tx = %format!("{hash:#x}"),
            amount_in = %amount,
            quoted_out = %quote.amount_out,
            "Tranche broadcast"
        );

        match self.wait_for_receipt(hash, plan).await? {
            Mined::Receipt(receipt) => {
                self.settle(plan, tranche, hash, receipt, prepared.expected_out)
                    .await
            }
            Mined::TimedOut => {
                tracing::warn!(
                    target: "twap",
                    plan = %plan.id,
                    tranche = tranche.index,
                    tx = %format!("{hash:#x}"),
                    "Receipt timeout; will reconcile on a later tick"
                );
                Ok(TrancheOutcome::Submitted { tx_hash: hash })
            }
        }
    }

    /// Check a submitted tranche again: settle it if mined, re-broadcast the stored
    /// raw transaction if it has been pending for longer than `rebroadcast_after_secs`.
    pub async fn reconcile(
        &self,
        plan: &TwapPlan,
        tranche: &Tranche,
        now: u64,
        rebroadcast_after_secs: u64,
    ) -> Result<Option<TrancheOutcome>, AppError> {
        let Some(hash) = tranche.tx_hash else {
            return Ok(None);
        };
        if let Some(receipt) = self.chain.receipt(hash, plan.dst_token).await? {
            let expected = tranche.quoted_out.unwrap_or(tranche.target_amount_estimate);
            return self
                .settle(plan, tranche, hash, receipt, expected)
                .await
                .map(Some);
        }

        let submitted_at = tranche.submitted_at.unwrap_or(0);
        if self.cfg.dry_run || now.saturating_sub(submitted_at) < rebroadcast_after_secs {
            return Ok(None);
        }
        let Some(raw) = tranche.raw_tx.as_deref() else {
            return Ok(None);
        };
        match self.chain.broadcast(raw).await {
            Ok(_) => {
                TwapStats::bump(&self.stats.rebroadcast);
                tracing::info!(
                    target: "twap",
                    plan = %plan.id,
                    tranche = tranche.index,
                    tx = %format!("{hash:#x}"),
                    "Re-broadcast pending tranche"
                );
                Ok(None)
            }
            Err(e) if !e.is_rejected_broadcast() => Err(e),
            Err(e) => {
                // A consumed nonce may be this very transaction getting mined meanwhile.
                if let Some(receipt) = self.chain.receipt(hash, plan.dst_token).await? {
                    let expected = tranche.quoted_out.unwrap_or(tranche.target_amount_estimate);
                    return self
                        .settle(plan, tranche, hash, receipt, expected)
                        .await
                        .map(Some);
                }
                self.fail(tranche, format!("re-broadcast rejected: {e}"), true)
                    .await
                    .map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constants::NATIVE_TOKEN;
    use crate::domain::tranche::{PlanStatus, plan_id};
    use crate::services::twap::mocks::{MinedAs, MockChain, MockVenue};

    const SRC: Address = Address::with_last_byte(0x11);
    const DST: Address = Address::with_last_byte(0x22);

    async fn setup(
        src: Address,
        cfg: ExecutorConfig,
    ) -> (
        Database,
        TwapPlan,
        Arc<MockVenue>,
        Arc<MockChain>,
        TrancheExecutor<MockVenue, MockChain>,
    ) {
        let db = Database::new("sqlite::memory:").await.expect("db");
        let total = U256::from(3_000u64);
        let id = plan_id(1, src, DST, total, 3, 60, 1_000);
        let plan = TwapPlan {
            id: id.clone(),
            chain_id: 1,
            src_token: src,
            dst_token: DST,
            total_amount: total,
            slices: 3,
            interval_secs: 60,
            start_at: 1_000,
            slippage_bps: 100,
            max_drift_bps: 300,
            status: PlanStatus::Active,
            created_at: 900,
        };
        let tranches: Vec<Tranche> = (0..3)
            .map(|i| {
                Tranche::new(
                    &id,
                    i,
                    U256::from(1_000u64),
                    U256::from(2_000u64),
                    1_000 + u64::from(i) * 60,
                )
            })
            .collect();
        db.insert_plan(&plan, &tranches).await.expect("insert");

        let venue = Arc::new(MockVenue::new(2, 1));
        let chain = Arc::new(MockChain::new(Address::with_last_byte(0x99)));
        chain.fund(src, U256::from(10_000u64));
        let exec = TrancheExecutor::new(
            db.clone(),
            venue.clone(),
            chain.clone(),
            cfg,
            Arc::new(TwapStats::default()),
        );
        (db, plan, venue, chain, exec)
    }

    fn fast() -> ExecutorConfig {
        ExecutorConfig {
            receipt_poll: Duration::from_millis(5),
            receipt_timeout: Duration::from_millis(30),
            ..ExecutorConfig::default()
        }
    }

    async fn tranche(db: &Database, plan: &TwapPlan, idx: u32) -> Tranche {
        db.load_tranche(&plan.id, idx).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn fills_due_tranche_and_persists_hash() {
        let (db, plan, _venue, chain, exec) = setup(SRC, fast()).await;
        let t = tranche(&db, &plan, 0).await;

        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        let TrancheOutcome::Filled { tx_hash, amount_out } = outcome else {
            panic!("expected fill, got {outcome:?}");
        };
        assert_eq!(amount_out, U256::from(2_000u64));

        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Filled);
        assert_eq!(stored.tx_hash, Some(tx_hash));
        assert_eq!(stored.attempts, 1);
        assert!(stored.raw_tx.is_none());
        assert_eq!(chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn insufficient_balance_defers_without_spending_attempts() {
        let (db, plan, _venue, chain, exec) = setup(SRC, fast()).await;
        chain.fund(SRC, U256::from(999u64));
        let t = tranche(&db, &plan, 0).await;

        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Deferred { .. }));
        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert!(stored.last_error.unwrap().contains("Insufficient"));
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn price_drift_defers() {
        let (db, plan, venue, chain, exec) = setup(SRC, fast()).await;
        // estimate is 2x the input; 1x is far beyond the 3% tolerance
        venue.set_price(1);
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        match outcome {
            TrancheOutcome::Deferred { reason } => assert!(reason.contains("below floor")),
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(tranche(&db, &plan, 0).await.attempts, 0);
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn expired_tranche_is_not_executed() {
        let cfg = ExecutorConfig {
            tranche_expiry_secs: 30,
            ..fast()
        };
        let (db, plan, _venue, chain, exec) = setup(SRC, cfg).await;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_031).await.unwrap();
        assert_eq!(outcome, TrancheOutcome::Expired);
        assert_eq!(tranche(&db, &plan, 0).await.status, TrancheStatus::Expired);
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn missing_allowance_defers_unless_auto_approve() {
        let (db, plan, venue, chain, exec) = setup(SRC, fast()).await;
        *venue.allowance.lock().unwrap() = U256::ZERO;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Deferred { ref reason } if reason.contains("allowance")));
        assert_eq!(chain.broadcast_count(), 0);

        let cfg = ExecutorConfig {
            auto_approve: true,
            ..fast()
        };
        let (db, plan, venue, chain, exec) = setup(SRC, cfg).await;
        *venue.allowance.lock().unwrap() = U256::ZERO;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Filled { .. }));
        // approval + swap
        assert_eq!(chain.broadcast_count(), 2);
        assert_eq!(*venue.allowance.lock().unwrap(), U256::from(1_000u64));
    }

    #[tokio::test]
    async fn native_source_skips_allowance() {
        let (db, plan, venue, chain, exec) = setup(NATIVE_TOKEN, fast()).await;
        *venue.allowance.lock().unwrap() = U256::ZERO;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Filled { .. }));
        assert_eq!(chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn revert_returns_tranche_to_pending_until_attempts_run_out() {
        let cfg = ExecutorConfig {
            max_attempts: 2,
            ..fast()
        };
        let (db, plan, _venue, chain, exec) = setup(SRC, cfg).await;
        chain.queue(MinedAs::Reverted);
        chain.queue(MinedAs::Reverted);

        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(
            outcome,
            TrancheOutcome::Failed {
                status: TrancheStatus::Pending,
                ..
            }
        ));

        let t = tranche(&db, &plan, 0).await;
        assert!(t.tx_hash.is_none());
        let outcome = exec.execute(&plan, &t, 1_005).await.unwrap();
        assert!(matches!(
            outcome,
            TrancheOutcome::Failed {
                status: TrancheStatus::Failed,
                ..
            }
        ));
        assert_eq!(tranche(&db, &plan, 0).await.attempts, 2);
    }

    #[tokio::test]
    async fn receipt_timeout_leaves_tranche_submitted_for_reconcile() {
        let (db, plan, _venue, chain, exec) = setup(SRC, fast()).await;
        chain.queue(MinedAs::Pending);
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        let TrancheOutcome::Submitted { tx_hash } = outcome else {
            panic!("expected submitted, got {outcome:?}");
        };

        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Submitted);
        assert!(stored.raw_tx.is_some());

        // Not old enough to re-broadcast.
        assert!(exec.reconcile(&plan, &stored, 1_010, 120).await.unwrap().is_none());
        assert_eq!(chain.broadcast_count(), 1);

        // Old enough: the stored bytes go out again, same hash.
        assert!(exec.reconcile(&plan, &stored, 1_200, 120).await.unwrap().is_none());
        assert_eq!(chain.broadcast_count(), 2);
        assert_eq!(chain.broadcasts.lock().unwrap()[1], tx_hash);

        chain.mine(tx_hash, U256::from(1_990u64));
        let settled = exec.reconcile(&plan, &stored, 1_300, 120).await.unwrap();
        assert_eq!(
            settled,
            Some(TrancheOutcome::Filled {
                tx_hash,
                amount_out: U256::from(1_990u64)
            })
        );
        assert_eq!(tranche(&db, &plan, 0).await.status, TrancheStatus::Filled);
    }

    #[tokio::test]
    async fn dry_run_never_mutates_state() {
        let cfg = ExecutorConfig {
            dry_run: true,
            ..fast()
        };
        let (db, plan, venue, chain, exec) = setup(SRC, cfg).await;
        *venue.allowance.lock().unwrap() = U256::ZERO;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        match outcome {
            TrancheOutcome::DryRun {
                quoted_out,
                needs_approval,
                ..
            } => {
                assert_eq!(quoted_out, U256::from(2_000u64));
                assert!(needs_approval);
            }
            other => panic!("expected dry run, got {other:?}"),
        }
        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(chain.broadcast_count(), 0);
        assert!(db.fill_events(&plan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_pending_past_timeout_is_not_sent_twice() {
        let cfg = ExecutorConfig {
            auto_approve: true,
            ..fast()
        };
        let (db, plan, venue, chain, exec) = setup(SRC, cfg).await;
        *venue.allowance.lock().unwrap() = U256::ZERO;
        *venue.approve_sets_allowance.lock().unwrap() = false;
        chain.queue(MinedAs::Pending);
        let t = tranche(&db, &plan, 0).await;

        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Deferred { ref reason } if reason.contains("approval")));
        assert_eq!(chain.broadcast_count(), 1);

        // Still unmined: wait on the same approval instead of signing another.
        let outcome = exec.execute(&plan, &t, 1_010).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Deferred { .. }));
        assert_eq!(chain.broadcast_count(), 1);

        let approval = chain.broadcasts.lock().unwrap()[0];
        chain.mine(approval, U256::ZERO);
        let outcome = exec.execute(&plan, &t, 1_020).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Filled { .. }));
        // one approval + one swap
        assert_eq!(chain.broadcast_count(), 2);
    }

    #[tokio::test]
    async fn lost_broadcast_response_keeps_tranche_submitted() {
        let (db, plan, venue, chain, exec) = setup(SRC, fast()).await;
        *chain.lose_response.lock().unwrap() = true;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        let TrancheOutcome::Submitted { tx_hash } = outcome else {
            panic!("expected submitted, got {outcome:?}");
        };
        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Submitted);
        assert_eq!(stored.tx_hash, Some(tx_hash));
        assert!(stored.raw_tx.is_some());

        // A later tick holding the old snapshot cannot claim it again.
        *chain.lose_response.lock().unwrap() = false;
        let outcome = exec.execute(&plan, &t, 1_010).await.unwrap();
        assert_eq!(outcome, TrancheOutcome::Skipped);
        assert_eq!(chain.broadcast_count(), 1);
        assert_eq!(*venue.swaps.lock().unwrap(), 1);

        let settled = exec.reconcile(&plan, &stored, 1_020, 120).await.unwrap();
        assert!(matches!(settled, Some(TrancheOutcome::Filled { tx_hash: h, .. }) if h == tx_hash));
        assert_eq!(tranche(&db, &plan, 0).await.status, TrancheStatus::Filled);
        assert_eq!(chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn rejected_broadcast_releases_the_claim() {
        let (db, plan, _venue, chain, exec) = setup(SRC, fast()).await;
        *chain.fail_broadcast.lock().unwrap() = true;
        let t = tranche(&db, &plan, 0).await;
        let outcome = exec.execute(&plan, &t, 1_000).await.unwrap();
        assert!(matches!(outcome, TrancheOutcome::Failed { status: TrancheStatus::Pending, .. }));
        let stored = tranche(&db, &plan, 0).await;
        assert_eq!(stored.status, TrancheStatus::Pending);
        assert!(stored.tx_hash.is_none());
        assert!(stored.raw_tx.is_none());
    }
}
