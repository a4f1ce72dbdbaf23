// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::common::retry::retry_async;
use crate::domain::constants::DEFAULT_PRIORITY_FEE_GWEI;
use crate::network::provider::HttpProvider;
use alloy::providers::Provider;
use alloy::rpc::types::BlockNumberOrTag;
use alloy::rpc::types::eth::FeeHistory;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GWEI: u128 = 1_000_000_000;

#[derive(Clone)]
pub struct GasOracle {
    provider: HttpProvider,
    last_good: Arc<Mutex<Option<GasFees>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GasFees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub next_base_fee_per_gas: u128,
    pub base_fee_per_gas: u128,
    /// Average gas used ratio across the sampled blocks (0.0-2.0, since target is 1.0).
    pub gas_used_ratio: Option<f64>,
}

impl GasFees {
    /// True when the next block's base fee alone is above `cap_wei`. A cap of 0 disables the check.
    pub fn exceeds(&self, cap_wei: u128) -> bool {
        cap_wei > 0 && self.next_base_fee_per_gas > cap_wei
    }

    /// Clamp the fee ceiling to `cap_wei` while keeping the tip under the ceiling.
    pub fn capped(mut self, cap_wei: u128) -> Self {
        if cap_wei > 0 && self.max_fee_per_gas > cap_wei {
            self.max_fee_per_gas = cap_wei;
            self.max_priority_fee_per_gas = self.max_priority_fee_per_gas.min(cap_wei);
        }
        self
    }
}

impl GasOracle {
    pub fn new(provider: HttpProvider) -> Self {
        Self {
            provider,
            last_good: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn estimate_eip1559_fees(&self) -> Result<GasFees, AppError> {
        match self.with_retry_history().await {
            Ok(history) => {
                let fees = Self::fees_from_history(&history)?;
                if let Ok(mut guard) = self.last_good.lock() {
                    *guard = Some(fees.clone());
                }
                Ok(fees)
            }
            Err(e) => {
                tracing::debug!(target: "gas", error = %e, "fee history unavailable");
                if let Ok(guard) = self.last_good.lock()
                    && let Some(fees) = guard.clone()
                {
                    return Ok(fees);
                }
                self.fallback_estimate().await
            }
        }
    }

    async fn with_retry_history(&self) -> Result<FeeHistory, AppError> {
        let provider = self.provider.clone();
        retry_async(
            move |_| {
                let provider = provider.clone();
                async move {
                    provider
                        .get_fee_history(5, BlockNumberOrTag::Latest, &[50.0f64])
                        .await
                }
            },
            3,
            Duration::from_millis(100),
        )
        .await
        .map_err(|e| AppError::Connection(format!("Fee History failed: {}", e)))
    }

    pub(crate) fn fees_from_history(history: &FeeHistory) -> Result<GasFees, AppError> {
        let latest_base_fee = history
            .latest_block_base_fee()
            .or_else(|| history.base_fee_per_gas.iter().rev().nth(1).copied())
            .ok_or(AppError::Initialization("No base fee history".into()))?;

        let raw_next_base = history.next_block_base_fee().unwrap_or(latest_base_fee);
        // 12.5% is the most the base fee can move in one block.
        let next_base_fee = if raw_next_base == 0 {
            latest_base_fee.saturating_mul(1125) / 1000
        } else {
            raw_next_base
        };

        let tips: Vec<u128> = history
            .reward
            .as_ref()
            .map(|rewards| rewards.iter().filter_map(|r| r.first().copied()).collect())
            .unwrap_or_default();
        let tip = if tips.is_empty() {
            u128::from(DEFAULT_PRIORITY_FEE_GWEI) * GWEI
        } else {
            tips.iter().sum::<u128>() / tips.len() as u128
        };

        let gas_used_ratio = if history.gas_used_ratio.is_empty() {
            None
        } else {
            Some(history.gas_used_ratio.iter().sum::<f64>() / history.gas_used_ratio.len() as f64)
        };

        // Headroom for two consecutive full blocks.
        let max_fee = next_base_fee
            .saturating_mul(2)
            .saturating_add(tip);

        Ok(GasFees {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: tip,
            next_base_fee_per_gas: next_base_fee,
            base_fee_per_gas: latest_base_fee,
            gas_used_ratio,
        })
    }

    /// Path for nodes that disable feeHistory (common on some public RPCs).
    async fn fallback_estimate(&self) -> Result<GasFees, AppError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| AppError::Connection(format!("Latest block fetch failed: {}", e)))?;

        let base: u128 = block
            .as_ref()
            .and_then(|b| b.header.base_fee_per_gas)
            .map(u128::from)
            .unwrap_or(3 * GWEI / 2);

        let priority: u128 = self
            .provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(u128::from(DEFAULT_PRIORITY_FEE_GWEI) * GWEI);

        let next_base = base.saturating_mul(1125) / 1000;

        Ok(GasFees {
            max_fee_per_gas: next_base.saturating_mul(2).saturating_add(priority),
            max_priority_fee_per_gas: priority,
            next_base_fee_per_gas: next_base,
            base_fee_per_gas: base,
            gas_used_ratio: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(base: Vec<u128>, tips: Vec<u128>) -> FeeHistory {
        FeeHistory {
            base_fee_per_gas: base,
            gas_used_ratio: vec![0.5, 0.7],
            reward: Some(tips.into_iter().map(|t| vec![t]).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn fees_follow_next_base_fee_and_average_tip() {
        let h = history(vec![10 * GWEI, 11 * GWEI, 12 * GWEI], vec![GWEI, 3 * GWEI]);
        let fees = GasOracle::fees_from_history(&h).unwrap();
        assert_eq!(fees.next_base_fee_per_gas, 12 * GWEI);
        assert_eq!(fees.base_fee_per_gas, 11 * GWEI);
        assert_eq!(fees.max_priority_fee_per_gas, 2 * GWEI);
        assert_eq!(fees.max_fee_per_gas, 26 * GWEI);
        assert!((fees.gas_used_ratio.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn empty_rewards_fall_back_to_default_tip() {
        let h = FeeHistory {
            base_fee_per_gas: vec![GWEI, GWEI],
            ..Default::default()
        };
        let fees = GasOracle::fees_from_history(&h).unwrap();
        assert_eq!(fees.max_priority_fee_per_gas, u128::from(DEFAULT_PRIORITY_FEE_GWEI) * GWEI);
    }

    #[test]
    fn cap_is_enforced() {
        let fees = GasFees {
            max_fee_per_gas: 60 * GWEI,
            max_priority_fee_per_gas: 2 * GWEI,
            next_base_fee_per_gas: 29 * GWEI,
            base_fee_per_gas: 28 * GWEI,
            gas_used_ratio: None,
        };
        assert!(!fees.exceeds(0));
        assert!(!fees.exceeds(30 * GWEI));
        assert!(fees.exceeds(20 * GWEI));
        let capped = fees.capped(40 * GWEI);
        assert_eq!(capped.max_fee_per_gas, 40 * GWEI);
        assert_eq!(capped.max_priority_fee_per_gas, 2 * GWEI);
    }
}
