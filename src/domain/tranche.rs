// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::BPS_DENOMINATOR;
use crate::domain::error::AppError;
use alloy::primitives::{Address, B256, U256, keccak256};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrancheStatus {
    Pending,
    Claimed,
    Submitted,
    Filled,
    Failed,
    Expired,
    Cancelled,
}

impl TrancheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrancheStatus::Pending => "pending",
            TrancheStatus::Claimed => "claimed",
            TrancheStatus::Submitted => "submitted",
            TrancheStatus::Filled => "filled",
            TrancheStatus::Failed => "failed",
            TrancheStatus::Expired => "expired",
            TrancheStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TrancheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrancheStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TrancheStatus::Pending),
            "claimed" => Ok(TrancheStatus::Claimed),
            "submitted" => Ok(TrancheStatus::Submitted),
            "filled" => Ok(TrancheStatus::Filled),
            "failed" => Ok(TrancheStatus::Failed),
            "expired" => Ok(TrancheStatus::Expired),
            "cancelled" => Ok(TrancheStatus::Cancelled),
            other => Err(AppError::validation(
                "status",
                format!("unknown tranche status {other:?}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Completed => "completed",
            PlanStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(PlanStatus::Active),
            "completed" => Ok(PlanStatus::Completed),
            "cancelled" => Ok(PlanStatus::Cancelled),
            other => Err(AppError::validation(
                "status",
                format!("unknown plan status {other:?}"),
            )),
        }
    }
}

/// A time-sliced transfer of `total_amount` of `src_token` into `dst_token`.
#[derive(Debug, Clone, Serialize)]
pub struct TwapPlan {
    pub id: String,
    pub chain_id: u64,
    pub src_token: Address,
    pub dst_token: Address,
    pub total_amount: U256,
    pub slices: u32,
    pub interval_secs: u64,
    pub start_at: u64,
    pub slippage_bps: u64,
    pub max_drift_bps: u64,
    pub status: PlanStatus,
    pub created_at: u64,
}

/// One time-gated portion of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct Tranche {
    pub plan_id: String,
    pub index: u32,
    pub source_amount: U256,
    pub target_amount_estimate: U256,
    pub eligible_at: u64,
    pub status: TrancheStatus,
    pub attempts: u32,
    pub tx_hash: Option<B256>,
    #[serde(skip)]
    pub raw_tx: Option<Vec<u8>>,
    pub quoted_out: Option<U256>,
    pub amount_out: Option<U256>,
    pub block_number: Option<u64>,
    pub submitted_at: Option<u64>,
    pub last_error: Option<String>,
}

impl Tranche {
    pub fn new(
        plan_id: &str,
        index: u32,
        source_amount: U256,
        target_amount_estimate: U256,
        eligible_at: u64,
    ) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            index,
            source_amount,
            target_amount_estimate,
            eligible_at,
            status: TrancheStatus::Pending,
            attempts: 0,
            tx_hash: None,
            raw_tx: None,
            quoted_out: None,
            amount_out: None,
            block_number: None,
            submitted_at: None,
            last_error: None,
        }
    }

    pub fn filled(&self) -> bool {
        self.status == TrancheStatus::Filled
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.status == TrancheStatus::Pending && self.eligible_at <= now
    }
}

/// Split `total` into `slices` tranches whose sizes differ by at most one base unit.
/// The remainder of the integer division goes to the earliest tranches.
pub fn split_amount(total: U256, slices: u32) -> Result<Vec<U256>, AppError> {
    if slices == 0 {
        return Err(AppError::validation("slices", "must be at least 1"));
    }
    let n = U256::from(slices);
    if total < n {
        return Err(AppError::validation(
            "amount",
            format!("{total} base units cannot fill {slices} non-empty tranches"),
        ));
    }
    let base = total / n;
    let remainder = total % n;
    let remainder = remainder.to::<u64>();

    let out = (0..u64::from(slices))
        .map(|i| {
            if i < remainder {
                base + U256::from(1u8)
            } else {
                base
            }
        })
        .collect();
    Ok(out)
}

/// Eligibility timestamps `start + i * interval` for each tranche.
pub fn schedule(start: u64, interval_secs: u64, slices: u32) -> Result<Vec<u64>, AppError> {
    (0..u64::from(slices))
        .map(|i| {
            i.checked_mul(interval_secs)
                .and_then(|offset| start.checked_add(offset))
                .ok_or_else(|| {
                    AppError::validation("interval", "tranche schedule overflows u64 timestamps")
                })
        })
        .collect()
}

/// Deterministic plan id, so re-submitting identical parameters resumes the same plan.
pub fn plan_id(
    chain_id: u64,
    src: Address,
    dst: Address,
    total: U256,
    slices: u32,
    interval_secs: u64,
    start_at: u64,
) -> String {
    let mut buf = Vec::with_capacity(8 + 20 + 20 + 32 + 4 + 8 + 8);
    buf.extend_from_slice(&chain_id.to_be_bytes());
    buf.extend_from_slice(src.as_slice());
    buf.extend_from_slice(dst.as_slice());
    buf.extend_from_slice(&total.to_be_bytes::<32>());
    buf.extend_from_slice(&slices.to_be_bytes());
    buf.extend_from_slice(&interval_secs.to_be_bytes());
    buf.extend_from_slice(&start_at.to_be_bytes());
    let digest = keccak256(&buf);
    hex::encode(&digest[..8])
}

/// Lowest acceptable output given a reference amount and a tolerance in bps.
pub fn price_floor(estimate: U256, tolerance_bps: u64) -> U256 {
    let keep = BPS_DENOMINATOR.saturating_sub(tolerance_bps.min(BPS_DENOMINATOR));
    estimate * U256::from(keep) / U256::from(BPS_DENOMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_preserves_total_and_spreads_remainder() {
        let total = U256::from(1_000_003u64);
        let parts = split_amount(total, 4).expect("split");
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.iter().copied().fold(U256::ZERO, |a, b| a + b), total);
        assert_eq!(parts[0], U256::from(250_001u64));
        assert_eq!(parts[1], U256::from(250_001u64));
        assert_eq!(parts[2], U256::from(250_001u64));
        assert_eq!(parts[3], U256::from(250_000u64));
    }

    #[test]
    fn split_handles_wei_scale_amounts() {
        // 10 ETH into 3 slices
        let total = U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64));
        let parts = split_amount(total, 3).expect("split");
        let max = parts.iter().max().copied().unwrap();
        let min = parts.iter().min().copied().unwrap();
        assert!(max - min <= U256::from(1u8));
        assert_eq!(parts.iter().copied().fold(U256::ZERO, |a, b| a + b), total);
    }

    #[test]
    fn split_rejects_zero_slices_and_dust() {
        assert!(split_amount(U256::from(10u64), 0).is_err());
        let err = split_amount(U256::from(2u64), 3).expect_err("dust should fail");
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "amount"));
        assert_eq!(split_amount(U256::from(3u64), 3).unwrap(), vec![U256::from(1u8); 3]);
    }

    #[test]
    fn schedule_offsets_from_start() {
        assert_eq!(schedule(1_000, 60, 3).unwrap(), vec![1_000, 1_060, 1_120]);
        assert_eq!(schedule(1_000, 0, 2).unwrap(), vec![1_000, 1_000]);
        assert!(schedule(u64::MAX - 10, 60, 2).is_err());
    }

    #[test]
    fn plan_id_is_stable_and_parameter_sensitive() {
        let src = Address::from([1u8; 20]);
        let dst = Address::from([2u8; 20]);
        let a = plan_id(1, src, dst, U256::from(100u64), 4, 60, 1_000);
        let b = plan_id(1, src, dst, U256::from(100u64), 4, 60, 1_000);
        let c = plan_id(1, src, dst, U256::from(100u64), 5, 60, 1_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn price_floor_applies_tolerance() {
        assert_eq!(price_floor(U256::from(10_000u64), 300), U256::from(9_700u64));
        assert_eq!(price_floor(U256::from(10_000u64), 0), U256::from(10_000u64));
        assert_eq!(price_floor(U256::from(10_000u64), 20_000), U256::ZERO);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TrancheStatus::Pending,
            TrancheStatus::Claimed,
            TrancheStatus::Submitted,
            TrancheStatus::Filled,
            TrancheStatus::Failed,
            TrancheStatus::Expired,
            TrancheStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TrancheStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<PlanStatus>().is_err());
    }
}
