// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::common::parsing::parse_u256_dec;
use crate::common::retry::retry_async_if;
use crate::domain::constants::APPROVE_GAS_LIMIT;
use crate::domain::swap::{PreparedTx, Quote, SwapRequest};
use alloy::primitives::{Address, Bytes, U256};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

const PROVIDER: &str = "1inch";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const RETRY_ATTEMPTS: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const ERROR_BODY_LIMIT: usize = 240;

#[derive(Deserialize, Debug)]
struct QuoteResponse {
    #[serde(rename = "dstAmount")]
    dst_amount: String,
    #[serde(default)]
    gas: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct SwapTxResponse {
    to: Address,
    data: Bytes,
    value: String,
    #[serde(default)]
    gas: u64,
}

#[derive(Deserialize, Debug)]
struct SwapResponse {
    #[serde(rename = "dstAmount")]
    dst_amount: String,
    tx: SwapTxResponse,
}

#[derive(Deserialize, Debug)]
struct SpenderResponse {
    address: Address,
}

#[derive(Deserialize, Debug)]
struct AllowanceResponse {
    allowance: String,
}

#[derive(Deserialize, Debug)]
struct ApproveTxResponse {
    to: Address,
    data: Bytes,
    #[serde(default)]
    value: Option<String>,
}

/// Client for the 1inch aggregation (swap) API, one chain per instance.
#[derive(Clone)]
pub struct OneInchClient {
    client: Client,
    base_url: Url,
    chain_id: u64,
    api_key: Option<String>,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

/// 1inch takes slippage as a percentage with up to two decimals.
pub fn slippage_percent(bps: u64) -> String {
    format!("{}.{:02}", bps / 100, bps % 100)
}

impl OneInchClient {
    pub fn new(
        api_url: &str,
        chain_id: u64,
        api_key: Option<String>,
        min_interval: Duration,
    ) -> Result<Self, AppError> {
        let trimmed = api_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{trimmed}/{chain_id}/"))
            .map_err(|e| AppError::Config(format!("Invalid 1inch API URL {api_url}: {e}")))?;
        if api_key.is_none() {
            tracing::warn!(target: "oneinch", "No 1inch API key configured; requests will likely be rejected");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Initialization(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url,
            chain_id,
            api_key,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| AppError::Config(format!("Invalid 1inch endpoint {path}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Space requests out to stay under the portal's rate limit. Holding the lock while
    /// sleeping serializes concurrent callers.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &Url) -> Result<T, AppError> {
        self.throttle().await;
        let mut request = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("1inch {}: {e}", url.path())))?;
        let status = resp.status();
        if status != StatusCode::OK {
            let mut body = resp.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            tracing::debug!(target: "oneinch", path = %url.path(), status = status.as_u16(), body = %body, "1inch request rejected");
            return Err(AppError::ApiCall {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| AppError::Connection(format!("1inch {} decode failed: {e}", url.path())))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, AppError> {
        let url = self.endpoint(path, params)?;
        retry_async_if(
            |attempt| {
                let url = url.clone();
                async move {
                    if attempt > 1 {
                        tracing::debug!(target: "oneinch", attempt, path = %url.path(), "retrying 1inch request");
                    }
                    self.get_once::<T>(&url).await
                }
            },
            AppError::is_transient,
            RETRY_ATTEMPTS,
            Duration::from_millis(RETRY_BASE_DELAY_MS),
        )
        .await
    }

    pub async fn quote(&self, src: Address, dst: Address, amount: U256) -> Result<Quote, AppError> {
        let resp: QuoteResponse = self
            .get(
                "quote",
                &[
                    ("src", format!("{src:#x}")),
                    ("dst", format!("{dst:#x}")),
                    ("amount", amount.to_string()),
                    ("includeGas", "true".to_string()),
                ],
            )
            .await?;
        let amount_out = parse_u256_dec("dstAmount", &resp.dst_amount)?;
        tracing::debug!(
            target: "oneinch",
            src = %format!("{src:#x}"),
            dst = %format!("{dst:#x}"),
            amount_in = %amount,
            amount_out = %amount_out,
            "quote"
        );
        Ok(Quote {
            src,
            dst,
            amount_in: amount,
            amount_out,
            gas: resp.gas,
        })
    }

    pub async fn swap(&self, req: &SwapRequest) -> Result<PreparedTx, AppError> {
        let resp: SwapResponse = self
            .get(
                "swap",
                &[
                    ("src", format!("{:#x}", req.src)),
                    ("dst", format!("{:#x}", req.dst)),
                    ("amount", req.amount.to_string()),
                    ("from", format!("{:#x}", req.from)),
                    ("origin", format!("{:#x}", req.from)),
                    ("slippage", slippage_percent(req.slippage_bps)),
                    // Balance and allowance are checked locally before the swap is built.
                    ("disableEstimate", "true".to_string()),
                ],
            )
            .await?;
        Ok(PreparedTx {
            to: resp.tx.to,
            data: resp.tx.data,
            value: parse_u256_dec("tx.value", &resp.tx.value)?,
            gas: resp.tx.gas,
            expected_out: parse_u256_dec("dstAmount", &resp.dst_amount)?,
        })
    }

    pub async fn spender(&self) -> Result<Address, AppError> {
        let resp: SpenderResponse = self.get("approve/spender", &[]).await?;
        Ok(resp.address)
    }

    pub async fn allowance(&self, token: Address, wallet: Address) -> Result<U256, AppError> {
        let resp: AllowanceResponse = self
            .get(
                "approve/allowance",
                &[
                    ("tokenAddress", format!("{token:#x}")),
                    ("walletAddress", format!("{wallet:#x}")),
                ],
            )
            .await?;
        parse_u256_dec("allowance", &resp.allowance)
    }

    /// Approval calldata for exactly `amount` (no unlimited approvals).
    pub async fn approve_transaction(&self, token: Address, amount: U256) -> Result<PreparedTx, AppError> {
        let resp: ApproveTxResponse = self
            .get(
                "approve/transaction",
                &[
                    ("tokenAddress", format!("{token:#x}")),
                    ("amount", amount.to_string()),
                ],
            )
            .await?;
        let value = match resp.value.as_deref() {
            Some(v) if !v.trim().is_empty() => parse_u256_dec("value", v)?,
            _ => U256::ZERO,
        };
        Ok(PreparedTx {
            to: resp.to,
            data: resp.data,
            value,
            gas: APPROVE_GAS_LIMIT,
            expected_out: U256::ZERO,
        })
    }
}
