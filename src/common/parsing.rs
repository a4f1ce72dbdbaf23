// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::domain::error::AppError;
use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{Address, B256, U256};
use std::str::FromStr;

pub fn parse_boolish(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

pub fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    hex::decode(strip_0x(s)).ok()
}

pub fn parse_b256_hex(s: &str) -> Option<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        return None;
    }
    Some(B256::from_slice(&bytes))
}

pub fn parse_address_hex(s: &str) -> Option<Address> {
    Address::from_str(strip_0x(s.trim())).ok()
}

/// Decimal base-unit string as stored in the database and returned by the 1inch API.
pub fn parse_u256_dec(field: &str, s: &str) -> Result<U256, AppError> {
    U256::from_str_radix(s.trim(), 10)
        .map_err(|e| AppError::validation(field, format!("not a base-10 integer {s:?}: {e}")))
}

/// Human amount ("12.5") to base units for a token with `decimals`.
pub fn parse_token_amount(raw: &str, decimals: u8) -> Result<U256, AppError> {
    if raw.trim().starts_with('-') {
        return Err(AppError::validation("amount", format!("{raw:?} is negative")));
    }
    let parsed = parse_units(raw.trim(), decimals)
        .map_err(|e| AppError::validation("amount", format!("{raw:?}: {e}")))?;
    Ok(parsed.get_absolute())
}

/// Base units to a human amount with trailing zeros trimmed.
pub fn format_token_amount(amount: U256, decimals: u8) -> String {
    match format_units(amount, decimals) {
        Ok(s) if s.contains('.') => {
            let trimmed = s.trim_end_matches('0').trim_end_matches('.');
            trimmed.to_string()
        }
        Ok(s) => s,
        Err(_) => amount.to_string(),
    }
}
