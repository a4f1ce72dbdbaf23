// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::common::error::AppError;
use crate::common::retry::retry_async;
use alloy::network::Ethereum;
use alloy::providers::{Provider, RootProvider};
use std::time::Duration;
use url::Url;

pub type HttpProvider = RootProvider<Ethereum>;

pub struct ConnectionFactory;

impl ConnectionFactory {
    pub fn http(rpc_url: &str) -> Result<HttpProvider, AppError> {
        let url =
            Url::parse(rpc_url).map_err(|e| AppError::Config(format!("Invalid RPC URL: {}", e)))?;

        let provider = RootProvider::new_http(url);
        Ok(provider)
    }

    /// Connect and make sure the node serves the chain the plan was built for.
    pub async fn http_for_chain(rpc_url: &str, expected_chain: u64) -> Result<HttpProvider, AppError> {
        let provider = Self::http(rpc_url)?;
        let client = provider.clone();
        let chain_id = retry_async(
            move |_| {
                let client = client.clone();
                async move { client.get_chain_id().await }
            },
            3,
            Duration::from_millis(200),
        )
        .await
        .map_err(|e| AppError::Connection(format!("chain_id lookup failed: {e}")))?;
        if chain_id != expected_chain {
            return Err(AppError::Config(format!(
                "RPC {rpc_url} serves chain {chain_id}, expected {expected_chain}"
            )));
        }
        tracing::info!(target: "rpc", chain_id, rpc = %rpc_url, "Connected to RPC");
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_urls() {
        assert!(ConnectionFactory::http("not a url").is_err());
        assert!(ConnectionFactory::http("http://127.0.0.1:8545").is_ok());
    }
}
