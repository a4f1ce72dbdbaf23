// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use alloy::primitives::{Address, address};

// =============================================================================
// NETWORK CONSTANTS
// =============================================================================

pub const CHAIN_ETHEREUM: u64 = 1;
pub const CHAIN_BSC: u64 = 56;
pub const CHAIN_POLYGON: u64 = 137;

pub fn native_symbol(chain_id: u64) -> &'static str {
    match chain_id {
        CHAIN_POLYGON => "POL",
        CHAIN_BSC => "BNB",
        _ => "ETH",
    }
}

// =============================================================================
// 1INCH
// =============================================================================

/// Placeholder the aggregation API uses for the chain's native asset.
pub const NATIVE_TOKEN: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// AggregationRouterV6, deployed at the same address on every supported chain.
pub const ONEINCH_ROUTER_V6: Address = address!("111111125421cA6dc452d289314280a0f8842A65");

pub const ONEINCH_API_BASE: &str = "https://api.1inch.dev/swap/v6.0";

/// Dev-portal free tier allows one request per second.
pub const ONEINCH_MIN_REQUEST_INTERVAL_MS: u64 = 1_100;

// =============================================================================
// GAS & TRANSACTION CONSTANTS
// =============================================================================

pub const DEFAULT_SWAP_GAS_LIMIT: u64 = 350_000;
pub const APPROVE_GAS_LIMIT: u64 = 80_000;
pub const MAX_GAS_LIMIT: u64 = 8_000_000;
pub const DEFAULT_PRIORITY_FEE_GWEI: u64 = 2;
/// Headroom applied on top of the gas figure returned by the swap API.
pub const GAS_LIMIT_BUFFER_BPS: u64 = 12_000;

pub const BPS_DENOMINATOR: u64 = 10_000;

pub fn is_native(token: Address) -> bool {
    token == NATIVE_TOKEN
}
