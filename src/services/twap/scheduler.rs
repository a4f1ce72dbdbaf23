// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::app::config::GlobalSettings;
use crate::common::error::AppError;
use crate::common::time_utils::current_unix;
use crate::data::db::Database;
use crate::domain::tranche::{PlanStatus, TwapPlan};
use crate::services::twap::executor::{TrancheExecutor, TrancheOutcome};
use crate::services::twap::safety::SafetyGuard;
use crate::services::twap::{ChainGateway, SwapVenue, TwapStats};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub rebroadcast_after_secs: u64,
    /// Most due tranches looked at per tick.
    pub batch_limit: u32,
    /// Restrict the loop to a single plan.
    pub plan_filter: Option<String>,
    /// Leave the loop once no active plan remains.
    pub until_done: bool,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            rebroadcast_after_secs: settings.rebroadcast_after_secs,
            batch_limit: 16,
            plan_filter: None,
            until_done: false,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TickSummary {
    pub reconciled: usize,
    pub executed: usize,
    pub filled: usize,
    pub deferred: usize,
    pub failed: usize,
    /// A transaction is still in flight, so no new tranche was started.
    pub waiting_on_inflight: bool,
    pub halted: bool,
    pub finalized: Vec<String>,
    pub active_plans: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: &TrancheOutcome) {
        match outcome {
            TrancheOutcome::Filled { .. } => self.filled += 1,
            TrancheOutcome::Deferred { .. } => self.deferred += 1,
            TrancheOutcome::Failed { .. } => self.failed += 1,
            _ => {}
        }
    }
}

/// Poll loop driving every active plan: reconcile in-flight transactions, execute due
/// tranches one at a time, and close finished plans.
pub struct TwapScheduler<V, G> {
    db: Database,
    executor: TrancheExecutor<V, G>,
    safety: SafetyGuard,
    cfg: SchedulerConfig,
}

impl<V: SwapVenue, G: ChainGateway> TwapScheduler<V, G> {
    pub fn new(
        db: Database,
        executor: TrancheExecutor<V, G>,
        safety: SafetyGuard,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            executor,
            safety,
            cfg,
        }
    }

    pub fn stats(&self) -> &std::sync::Arc<TwapStats> {
        self.executor.stats()
    }

    fn wanted(&self, plan_id: &str) -> bool {
        self.cfg
            .plan_filter
            .as_deref()
            .is_none_or(|wanted| wanted == plan_id)
    }

    /// Claims a previous run left behind never reached the chain; put them back.
    pub async fn startup(&self) -> Result<u64, AppError> {
        if self.executor.config().dry_run {
            return Ok(0);
        }
        self.db.release_stale_claims().await
    }

    async fn plan<'a>(
        &self,
        cache: &'a mut HashMap<String, TwapPlan>,
        plan_id: &str,
    ) -> Result<Option<&'a TwapPlan>, AppError> {
        if !cache.contains_key(plan_id) {
            match self.db.load_plan(plan_id).await? {
                Some(plan) => {
                    cache.insert(plan_id.to_string(), plan);
                }
                None => return Ok(None),
            }
        }
        Ok(cache.get(plan_id))
    }

    fn note_result(&self, outcome: &TrancheOutcome, now: u64) {
        match outcome {
            TrancheOutcome::Filled { .. } => self.safety.report_success(),
            TrancheOutcome::Failed { .. } => self.safety.report_failure_at(now),
            _ => {}
        }
    }

    pub async fn tick(&self, now: u64) -> Result<TickSummary, AppError> {
        TwapStats::bump(&self.stats().ticks);
        let mut summary = TickSummary::default();
        let mut plans: HashMap<String, TwapPlan> = HashMap::new();

        let mut inflight = 0usize;
        for tranche in self.db.submitted_tranches().await? {
            if !self.wanted(&tranche.plan_id) {
                continue;
            }
            let Some(plan) = self.plan(&mut plans, &tranche.plan_id).await? else {
                continue;
            };
            summary.reconciled += 1;
            match self
                .executor
                .reconcile(plan, &tranche, now, self.cfg.rebroadcast_after_secs)
                .await
            {
                Ok(Some(outcome)) => {
                    self.note_result(&outcome, now);
                    summary.record(&outcome);
                }
                Ok(None) => inflight += 1,
                Err(e) => {
                    inflight += 1;
                    tracing::warn!(
                        target: "twap",
                        plan = %tranche.plan_id,
                        tranche = tranche.index,
                        error = %e,
                        "Reconcile failed"
                    );
                }
            }
        }

        if inflight > 0 {
            summary.waiting_on_inflight = true;
            tracing::debug!(target: "twap", inflight, "Waiting for in-flight tranches");
        } else {
            let due = self
                .db
                .due_tranches(now, self.cfg.batch_limit, self.cfg.plan_filter.as_deref())
                .await?;
            // Plans whose head tranche was deferred; their later tranches wait too.
            let mut held: HashSet<String> = HashSet::new();
            for tranche in due {
                if held.contains(&tranche.plan_id) {
                    continue;
                }
                if let Err(e) = self.safety.check_at(now) {
                    tracing::warn!(target: "twap", error = %e, "Execution paused");
                    summary.halted = true;
                    break;
                }
                let Some(plan) = self.plan(&mut plans, &tranche.plan_id).await? else {
                    continue;
                };
                summary.executed += 1;
                match self.executor.execute(plan, &tranche, now).await {
                    Ok(outcome) => {
                        self.note_result(&outcome, now);
                        summary.record(&outcome);
                        match outcome {
                            TrancheOutcome::Submitted { .. } => {
                                summary.waiting_on_inflight = true;
                                break;
                            }
                            TrancheOutcome::Deferred { .. } => {
                                held.insert(tranche.plan_id.clone());
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        self.safety.report_failure_at(now);
                        summary.failed += 1;
                        tracing::warn!(
                            target: "twap",
                            plan = %tranche.plan_id,
                            tranche = tranche.index,
                            error = %e,
                            "Tranche execution error"
                        );
                        break;
                    }
                }
            }
        }

        for plan in self.db.list_plans(Some(PlanStatus::Active)).await? {
            if !self.wanted(&plan.id) {
                continue;
            }
            if self.db.finalize_plan_if_done(&plan.id).await? {
                tracing::info!(target: "twap", plan = %plan.id, "Plan completed");
                summary.finalized.push(plan.id);
            } else {
                summary.active_plans += 1;
            }
        }

        tracing::debug!(
            target: "twap",
            reconciled = summary.reconciled,
            executed = summary.executed,
            filled = summary.filled,
            deferred = summary.deferred,
            failed = summary.failed,
            active = summary.active_plans,
            "Tick finished"
        );
        Ok(summary)
    }

    /// Tick every `poll_interval` until `shutdown` fires (or, with `until_done`, until no
    /// active plan is left). A tick in progress always runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let released = self.startup().await?;
        tracing::info!(
            target: "twap",
            released,
            poll_ms = self.cfg.poll_interval.as_millis() as u64,
            dry_run = self.executor.config().dry_run,
            plan = ?self.cfg.plan_filter,
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "twap", "Shutdown requested; scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick(current_unix()).await {
                        Ok(summary) => {
                            if self.cfg.until_done && summary.active_plans == 0 {
                                tracing::info!(target: "twap", "No active plans left");
                                break;
                            }
                        }
                        Err(e) => tracing::error!(target: "twap", error = %e, "Tick failed"),
                    }
                }
            }
        }
        Ok(())
    }
}
