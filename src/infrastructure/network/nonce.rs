// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::error::AppError;
use crate::common::retry::retry_async;
use crate::network::provider::HttpProvider;
use alloy::primitives::Address;
use alloy::providers::Provider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Hands out sequential nonces for a single wallet, seeded from the pending pool.
#[derive(Clone)]
pub struct NonceManager {
    provider: HttpProvider,
    address: Address,
    next: Arc<Mutex<Option<u64>>>,
}

impl NonceManager {
    pub fn new(provider: HttpProvider, address: Address) -> Self {
        Self {
            provider,
            address,
            next: Arc::new(Mutex::new(None)),
        }
    }

    async fn on_chain_pending(&self) -> Result<u64, AppError> {
        let provider = self.provider.clone();
        let address = self.address;
        retry_async(
            move |_| {
                let provider = provider.clone();
                async move { provider.get_transaction_count(address).pending().await }
            },
            3,
            Duration::from_millis(100),
        )
        .await
        .map_err(|e| AppError::Connection(format!("Failed to fetch nonce: {}", e)))
    }

    /// Reserve the next nonce. Never goes below the node's pending count, so
    /// transactions sent from elsewhere are respected.
    pub async fn reserve(&self) -> Result<u64, AppError> {
        let mut guard = self.next.lock().await;
        let on_chain = self.on_chain_pending().await?;
        let nonce = guard.map_or(on_chain, |local| local.max(on_chain));
        *guard = Some(nonce + 1);
        Ok(nonce)
    }

    /// Forget the local counter after a failed broadcast.
    pub async fn resync(&self) {
        *self.next.lock().await = None;
        tracing::debug!(target: "nonce", address = %self.address, "Nonce cache cleared");
    }
}
