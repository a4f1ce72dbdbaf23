// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::data_path::ensure_parent_dir;
use crate::common::error::AppError;
use crate::common::parsing::format_token_amount;
use crate::common::time_utils::format_unix;
use crate::data::schema::FillEventRecord;
use crate::domain::tranche::{Tranche, TrancheStatus, TwapPlan};
use alloy::primitives::U256;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct TokenLabel {
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub claimed: usize,
    pub submitted: usize,
    pub filled: usize,
    pub failed: usize,
    pub expired: usize,
    pub cancelled: usize,
}

/// Progress of one plan, suitable for the terminal table and the JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub plan: TwapPlan,
    pub src: TokenLabel,
    pub dst: TokenLabel,
    pub counts: StatusCounts,
    pub source_spent: U256,
    pub target_received: U256,
    pub target_estimated: U256,
    /// Target units received per source unit over filled tranches, in whole tokens.
    pub average_price: Option<f64>,
    pub tranches: Vec<Tranche>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<FillEventRecord>,
}

fn as_f64(amount: U256, decimals: u8) -> Option<f64> {
    format_token_amount(amount, decimals).parse().ok()
}

pub fn build_report(
    plan: TwapPlan,
    tranches: Vec<Tranche>,
    events: Vec<FillEventRecord>,
    src: TokenLabel,
    dst: TokenLabel,
) -> PlanReport {
    let mut counts = StatusCounts::default();
    let mut source_spent = U256::ZERO;
    let mut target_received = U256::ZERO;
    let mut target_estimated = U256::ZERO;
    for t in &tranches {
        target_estimated += t.target_amount_estimate;
        match t.status {
            TrancheStatus::Pending => counts.pending += 1,
            TrancheStatus::Claimed => counts.claimed += 1,
            TrancheStatus::Submitted => counts.submitted += 1,
            TrancheStatus::Filled => {
                counts.filled += 1;
                source_spent += t.source_amount;
                target_received += t.amount_out.unwrap_or_default();
            }
            TrancheStatus::Failed => counts.failed += 1,
            TrancheStatus::Expired => counts.expired += 1,
            TrancheStatus::Cancelled => counts.cancelled += 1,
        }
    }

    let average_price = match (
        as_f64(source_spent, src.decimals),
        as_f64(target_received, dst.decimals),
    ) {
        (Some(spent), Some(received)) if spent > 0.0 => Some(received / spent),
        _ => None,
    };

    PlanReport {
        plan,
        src,
        dst,
        counts,
        source_spent,
        target_received,
        target_estimated,
        average_price,
        tranches,
        events,
    }
}

pub fn render_table(report: &PlanReport) -> String {
    let p = &report.plan;
    let src = &report.src;
    let dst = &report.dst;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan {} [{}] chain {}: {} {} -> {} in {} slices every {}s from {}",
        p.id,
        p.status,
        p.chain_id,
        format_token_amount(p.total_amount, src.decimals),
        src.symbol,
        dst.symbol,
        p.slices,
        p.interval_secs,
        format_unix(p.start_at)
    );
    let _ = writeln!(
        out,
        "{:>4}  {:<20}  {:>18}  {:>18}  {:>18}  {:<9}  {:>3}  {}",
        "#", "eligible", "in", "estimate", "out", "status", "try", "tx / note"
    );
    for t in &report.tranches {
        let out_amount = t
            .amount_out
            .map(|a| format_token_amount(a, dst.decimals))
            .unwrap_or_else(|| "-".to_string());
        let note = match (t.tx_hash, &t.last_error) {
            (Some(hash), _) => format!("{hash:#x}"),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        };
        let _ = writeln!(
            out,
            "{:>4}  {:<20}  {:>18}  {:>18}  {:>18}  {:<9}  {:>3}  {}",
            t.index,
            format_unix(t.eligible_at),
            format_token_amount(t.source_amount, src.decimals),
            format_token_amount(t.target_amount_estimate, dst.decimals),
            out_amount,
            t.status.as_str(),
            t.attempts,
            note
        );
    }
    let c = &report.counts;
    let _ = writeln!(
        out,
        "filled {}/{} (pending {}, submitted {}, failed {}, expired {}, cancelled {})",
        c.filled,
        report.tranches.len(),
        c.pending + c.claimed,
        c.submitted,
        c.failed,
        c.expired,
        c.cancelled
    );
    let _ = write!(
        out,
        "spent {} {}, received {} {} (estimated {})",
        format_token_amount(report.source_spent, src.decimals),
        src.symbol,
        format_token_amount(report.target_received, dst.decimals),
        dst.symbol,
        format_token_amount(report.target_estimated, dst.decimals)
    );
    if let Some(price) = report.average_price {
        let _ = write!(out, ", average {price:.6} {}/{}", dst.symbol, src.symbol);
    }
    out.push('\n');
    out
}

pub fn write_json(report: &PlanReport, path: &Path) -> Result<(), AppError> {
    ensure_parent_dir(path)?;
    let body = serde_json::to_string_pretty(report)
        .map_err(|e| AppError::Initialization(format!("Report encode failed: {e}")))?;
    std::fs::write(path, body)
        .map_err(|e| AppError::Initialization(format!("Report write failed for {}: {e}", path.display())))?;
    tracing::info!(target: "twap", plan = %report.plan.id, path = %path.display(), "Report written");
    Ok(())
}
