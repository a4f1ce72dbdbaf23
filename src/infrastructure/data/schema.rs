// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::parsing::{parse_b256_hex, parse_hex_bytes, parse_u256_dec};
use crate::domain::error::AppError;
use crate::domain::tranche::{PlanStatus, Tranche, TrancheStatus, TwapPlan};
use alloy::primitives::Address;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;
use std::str::FromStr;

#[derive(Debug, FromRow)]
pub struct PlanRow {
    pub id: String,
    pub chain_id: i64,
    pub src_token: String,
    pub dst_token: String,
    pub total_amount: String,
    pub slices: i64,
    pub interval_secs: i64,
    pub start_at: i64,
    pub slippage_bps: i64,
    pub max_drift_bps: i64,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, FromRow)]
pub struct TrancheRow {
    pub plan_id: String,
    pub idx: i64,
    pub source_amount: String,
    pub target_estimate: String,
    pub eligible_at: i64,
    pub status: String,
    pub attempts: i64,
    pub tx_hash: Option<String>,
    pub raw_tx: Option<String>,
    pub quoted_out: Option<String>,
    pub amount_out: Option<String>,
    pub block_number: Option<i64>,
    pub submitted_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FillEventRecord {
    pub id: i64,
    pub plan_id: String,
    pub idx: i64,
    pub event: String,
    pub detail: Option<String>,
    pub tx_hash: Option<String>,
    pub timestamp: NaiveDateTime,
}

pub(crate) fn non_negative(field: &str, value: i64) -> Result<u64, AppError> {
    u64::try_from(value)
        .map_err(|_| AppError::Database(format!("{field} contains negative value {value}")))
}

fn parse_address(field: &str, raw: &str) -> Result<Address, AppError> {
    Address::from_str(raw)
        .map_err(|e| AppError::Database(format!("{field} holds invalid address {raw}: {e}")))
}

impl TryFrom<PlanRow> for TwapPlan {
    type Error = AppError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(TwapPlan {
            chain_id: non_negative("chain_id", row.chain_id)?,
            src_token: parse_address("src_token", &row.src_token)?,
            dst_token: parse_address("dst_token", &row.dst_token)?,
            total_amount: parse_u256_dec("total_amount", &row.total_amount)?,
            slices: u32::try_from(row.slices)
                .map_err(|_| AppError::Database(format!("slices out of range: {}", row.slices)))?,
            interval_secs: non_negative("interval_secs", row.interval_secs)?,
            start_at: non_negative("start_at", row.start_at)?,
            slippage_bps: non_negative("slippage_bps", row.slippage_bps)?,
            max_drift_bps: non_negative("max_drift_bps", row.max_drift_bps)?,
            status: PlanStatus::from_str(&row.status)?,
            created_at: non_negative("created_at", row.created_at)?,
            id: row.id,
        })
    }
}

impl TryFrom<TrancheRow> for Tranche {
    type Error = AppError;

    fn try_from(row: TrancheRow) -> Result<Self, Self::Error> {
        let tx_hash = match row.tx_hash.as_deref() {
            Some(raw) => Some(
                parse_b256_hex(raw)
                    .ok_or_else(|| AppError::Database(format!("invalid tx_hash {raw}")))?,
            ),
            None => None,
        };
        let raw_tx = match row.raw_tx.as_deref() {
            Some(raw) => Some(
                parse_hex_bytes(raw)
                    .ok_or_else(|| AppError::Database("invalid raw_tx hex".to_string()))?,
            ),
            None => None,
        };
        Ok(Tranche {
            index: u32::try_from(row.idx)
                .map_err(|_| AppError::Database(format!("idx out of range: {}", row.idx)))?,
            source_amount: parse_u256_dec("source_amount", &row.source_amount)?,
            target_amount_estimate: parse_u256_dec("target_estimate", &row.target_estimate)?,
            eligible_at: non_negative("eligible_at", row.eligible_at)?,
            status: TrancheStatus::from_str(&row.status)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            tx_hash,
            raw_tx,
            quoted_out: row
                .quoted_out
                .as_deref()
                .map(|s| parse_u256_dec("quoted_out", s))
                .transpose()?,
            amount_out: row
                .amount_out
                .as_deref()
                .map(|s| parse_u256_dec("amount_out", s))
                .transpose()?,
            block_number: row
                .block_number
                .map(|b| non_negative("block_number", b))
                .transpose()?,
            submitted_at: row
                .submitted_at
                .map(|t| non_negative("submitted_at", t))
                .transpose()?,
            last_error: row.last_error,
            plan_id: row.plan_id,
        })
    }
}
