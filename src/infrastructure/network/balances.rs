// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::common::retry::retry_async;
use crate::domain::constants::is_native;
use crate::network::provider::HttpProvider;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionReceipt;
use alloy::sol;
use std::time::Duration;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

/// Read-only view of wallet balances and token metadata.
#[derive(Clone)]
pub struct BalanceReader {
    provider: HttpProvider,
}

impl BalanceReader {
    pub fn new(provider: HttpProvider) -> Self {
        Self { provider }
    }

    /// Balance of `owner` in `token`, where the native sentinel address reads the ETH balance.
    pub async fn balance(&self, token: Address, owner: Address) -> Result<U256, AppError> {
        if is_native(token) {
            let provider = self.provider.clone();
            return retry_async(
                move |_| {
                    let provider = provider.clone();
                    async move { provider.get_balance(owner).await }
                },
                3,
                Duration::from_millis(100),
            )
            .await
            .map_err(|e| AppError::Connection(format!("Native balance failed: {}", e)));
        }

        let contract = IERC20::new(token, self.provider.clone());
        retry_async(
            move |_| {
                let contract = contract.clone();
                async move { contract.balanceOf(owner).call().await }
            },
            3,
            Duration::from_millis(100),
        )
        .await
        .map_err(|e| AppError::Connection(format!("Token balance failed for {token:#x}: {}", e)))
    }

    pub async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, AppError> {
        if is_native(token) {
            return Ok(U256::MAX);
        }
        IERC20::new(token, self.provider.clone())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| AppError::Connection(format!("Allowance failed for {token:#x}: {}", e)))
    }

    /// On-chain decimals, used when a token is missing from the token list.
    pub async fn decimals(&self, token: Address) -> Result<u8, AppError> {
        if is_native(token) {
            return Ok(18);
        }
        IERC20::new(token, self.provider.clone())
            .decimals()
            .call()
            .await
            .map_err(|e| AppError::Connection(format!("decimals() failed for {token:#x}: {}", e)))
    }

    pub async fn symbol(&self, token: Address) -> Result<String, AppError> {
        IERC20::new(token, self.provider.clone())
            .symbol()
            .call()
            .await
            .map_err(|e| AppError::Connection(format!("symbol() failed for {token:#x}: {}", e)))
    }
}

/// Sum of `token` transfers into `recipient` recorded in the receipt's logs.
/// Returns `None` for native output, which does not emit a Transfer event.
pub fn received_from_logs(
    receipt: &TransactionReceipt,
    token: Address,
    recipient: Address,
) -> Option<U256> {
    if is_native(token) {
        return None;
    }
    let total = receipt
        .inner
        .logs()
        .iter()
        .filter(|log| log.address() == token)
        .filter_map(|log| log.log_decode::<IERC20::Transfer>().ok())
        .map(|decoded| decoded.inner.data)
        .filter(|transfer| transfer.to == recipient)
        .fold(U256::ZERO, |acc, t| acc.saturating_add(t.value));
    Some(total)
}
