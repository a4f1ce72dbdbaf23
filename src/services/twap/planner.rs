// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::data::db::Database;
use crate::domain::constants::BPS_DENOMINATOR;
use crate::domain::tranche::{PlanStatus, Tranche, TwapPlan, plan_id, schedule, split_amount};
use crate::services::twap::SwapVenue;
use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_SLICES: u32 = 1_000;
pub const MAX_SLIPPAGE_BPS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub chain_id: u64,
    pub src_token: Address,
    pub dst_token: Address,
    /// Base units of `src_token`.
    pub total_amount: U256,
    pub slices: u32,
    pub interval_secs: u64,
    /// Defaults to "now" when unset.
    pub start_at: Option<u64>,
    pub slippage_bps: u64,
    pub max_drift_bps: u64,
}

#[derive(Debug, Clone)]
pub struct CreatedPlan {
    pub plan: TwapPlan,
    pub tranches: Vec<Tranche>,
    /// False when an identical plan already existed and was resumed instead.
    pub created: bool,
}

impl PlanRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.src_token == self.dst_token {
            return Err(AppError::validation("dst", "source and target token are the same"));
        }
        if self.slices == 0 || self.slices > MAX_SLICES {
            return Err(AppError::validation(
                "slices",
                format!("must be between 1 and {MAX_SLICES}"),
            ));
        }
        if self.total_amount.is_zero() {
            return Err(AppError::validation("amount", "must be greater than zero"));
        }
        if self.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(AppError::validation(
                "slippage_bps",
                format!("{} exceeds {MAX_SLIPPAGE_BPS}", self.slippage_bps),
            ));
        }
        if self.max_drift_bps > BPS_DENOMINATOR {
            return Err(AppError::validation(
                "max_drift_bps",
                format!("{} exceeds {BPS_DENOMINATOR}", self.max_drift_bps),
            ));
        }
        Ok(())
    }
}

pub struct TwapPlanner<V> {
    db: Database,
    venue: Arc<V>,
}

impl<V: SwapVenue> TwapPlanner<V> {
    pub fn new(db: Database, venue: Arc<V>) -> Self {
        Self { db, venue }
    }

    /// Split and schedule `req`, pricing every distinct tranche size once.
    pub async fn build(&self, req: &PlanRequest, now: u64) -> Result<(TwapPlan, Vec<Tranche>), AppError> {
        req.validate()?;
        let start_at = req.start_at.unwrap_or(now);
        let amounts = split_amount(req.total_amount, req.slices)?;
        let times = schedule(start_at, req.interval_secs, req.slices)?;
        let id = plan_id(
            req.chain_id,
            req.src_token,
            req.dst_token,
            req.total_amount,
            req.slices,
            req.interval_secs,
            start_at,
        );

        // The split yields at most two sizes (base and base + 1).
        let mut estimates: HashMap<U256, U256> = HashMap::new();
        for amount in &amounts {
            if estimates.contains_key(amount) {
                continue;
            }
            let quote = self
                .venue
                .quote(req.src_token, req.dst_token, *amount)
                .await?;
            if quote.amount_out.is_zero() {
                return Err(AppError::validation(
                    "amount",
                    format!("venue quotes zero output for a tranche of {amount}"),
                ));
            }
            estimates.insert(*amount, quote.amount_out);
        }

        let tranches = amounts
            .iter()
            .zip(&times)
            .enumerate()
            .map(|(i, (amount, at))| {
                let estimate = estimates.get(amount).copied().unwrap_or_default();
                Tranche::new(&id, i as u32, *amount, estimate, *at)
            })
            .collect();

        let plan = TwapPlan {
            id,
            chain_id: req.chain_id,
            src_token: req.src_token,
            dst_token: req.dst_token,
            total_amount: req.total_amount,
            slices: req.slices,
            interval_secs: req.interval_secs,
            start_at,
            slippage_bps: req.slippage_bps,
            max_drift_bps: req.max_drift_bps,
            status: PlanStatus::Active,
            created_at: now,
        };
        Ok((plan, tranches))
    }

    /// Build and persist a plan. Identical parameters resume the stored plan without
    /// re-quoting. A resume asking for other slippage or drift limits is refused, since
    /// the stored plan would keep trading on its old ones.
    pub async fn create(&self, req: &PlanRequest, now: u64) -> Result<CreatedPlan, AppError> {
        req.validate()?;
        let start_at = req.start_at.unwrap_or(now);
        let id = plan_id(
            req.chain_id,
            req.src_token,
            req.dst_token,
            req.total_amount,
            req.slices,
            req.interval_secs,
            start_at,
        );
        if let Some(plan) = self.db.load_plan(&id).await? {
            if plan.slippage_bps != req.slippage_bps || plan.max_drift_bps != req.max_drift_bps {
                return Err(AppError::validation(
                    "tolerances",
                    format!(
                        "plan {id} exists with slippage {} bps and drift {} bps; \
                         requested {} and {}. Cancel it first or keep its limits",
                        plan.slippage_bps, plan.max_drift_bps, req.slippage_bps, req.max_drift_bps
                    ),
                ));
            }
            let tranches = self.db.load_tranches(&id).await?;
            tracing::info!(target: "twap", plan = %id, status = %plan.status, "Plan already exists; resuming");
            return Ok(CreatedPlan {
                plan,
                tranches,
                created: false,
            });
        }

        let req = PlanRequest {
            start_at: Some(start_at),
            ..req.clone()
        };
        let (plan, tranches) = self.build(&req, now).await?;
        let created = self.db.insert_plan(&plan, &tranches).await?;
        tracing::info!(
            target: "twap",
            plan = %plan.id,
            slices = plan.slices,
            interval_secs = plan.interval_secs,
            start_at = plan.start_at,
            total = %plan.total_amount,
            "Plan created"
        );
        Ok(CreatedPlan {
            plan,
            tranches,
            created,
        })
    }
}
