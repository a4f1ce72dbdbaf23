// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::data_path::{resolve_data_path, resolve_required_data_path};
use crate::common::parsing::parse_boolish;
use crate::domain::constants;
use crate::domain::error::AppError;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalSettings {
    // General
    #[serde(default = "default_false")]
    pub debug: bool,
    #[serde(default = "default_false")]
    pub log_json: bool,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub database_url: Option<String>,
    pub data_dir: Option<String>,
    pub tokenlist_path: Option<String>,
    pub report_dir: Option<String>,

    // Identity
    pub wallet_key: Option<String>,
    pub wallet_address: Option<Address>,

    // RPC
    pub http_providers: Option<HashMap<String, String>>,
    #[serde(default = "default_max_gas")]
    pub max_gas_price_gwei: u64,

    // 1inch
    pub oneinch_api_key: Option<String>,
    #[serde(default = "default_oneinch_api_url")]
    pub oneinch_api_url: String,
    #[serde(default = "default_oneinch_min_interval_ms")]
    pub oneinch_min_interval_ms: u64,

    // Execution
    /// Slippage passed to the swap endpoint for every tranche.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u64,
    /// How far a fresh quote may fall below the build-time estimate before a tranche is deferred.
    #[serde(default = "default_max_drift_bps")]
    pub max_drift_bps: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds after `eligible_at` a tranche is still executed; 0 disables expiry.
    #[serde(default)]
    pub tranche_expiry_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    #[serde(default = "default_rebroadcast_after_secs")]
    pub rebroadcast_after_secs: u64,
    #[serde(default = "default_false")]
    pub auto_approve: bool,

    // Circuit breaker
    #[serde(default = "default_safety_max_failures")]
    pub safety_max_failures: usize,
    #[serde(default = "default_safety_reset_secs")]
    pub safety_reset_secs: u64,

    // Metrics
    #[serde(default = "default_false")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Defaults
fn default_false() -> bool {
    false
}
fn default_chain_id() -> u64 {
    constants::CHAIN_ETHEREUM
}
fn default_max_gas() -> u64 {
    200
}
fn default_oneinch_api_url() -> String {
    constants::ONEINCH_API_BASE.to_string()
}
fn default_oneinch_min_interval_ms() -> u64 {
    constants::ONEINCH_MIN_REQUEST_INTERVAL_MS
}
fn default_slippage_bps() -> u64 {
    100
}
fn default_max_drift_bps() -> u64 {
    300
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_receipt_poll_ms() -> u64 {
    1_000
}
fn default_receipt_timeout_ms() -> u64 {
    90_000
}
fn default_rebroadcast_after_secs() -> u64 {
    120
}
fn default_safety_max_failures() -> usize {
    5
}
fn default_safety_reset_secs() -> u64 {
    300
}
fn default_metrics_port() -> u16 {
    9000
}

impl GlobalSettings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, AppError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let selected_config = resolve_config_path(path);
        let mut builder = Config::builder();

        if let Some(ref selected_path) = selected_config {
            builder = builder.add_source(File::from(Path::new(selected_path)).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        // Deterministic precedence: CLI (in main) > env/.env > selected profile file.
        builder = builder.add_source(Environment::default());

        let settings: GlobalSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load() -> Result<Self, AppError> {
        Self::load_with_path(None)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.slippage_bps > 5_000 {
            return Err(AppError::validation(
                "slippage_bps",
                format!("{} exceeds 50%", self.slippage_bps),
            ));
        }
        if self.max_drift_bps > constants::BPS_DENOMINATOR {
            return Err(AppError::validation(
                "max_drift_bps",
                format!("{} exceeds 100%", self.max_drift_bps),
            ));
        }
        Url::parse(&self.oneinch_api_url)
            .map_err(|e| AppError::Config(format!("Invalid oneinch_api_url: {e}")))?;
        Ok(())
    }

    fn data_dir_value(&self) -> Option<String> {
        std::env::var("DATA_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.data_dir
                    .as_ref()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
    }

    /// Helper to get RPC URL for a specific chain
    pub fn get_http_provider(&self, chain_id: u64) -> Result<String, AppError> {
        if let Some(urls) = &self.http_providers
            && let Some(url) = urls.get(&chain_id.to_string())
        {
            return Ok(url.clone());
        }

        // Fallback to env var convention: http_provider_1, http_provider_137, then generic http_provider
        let candidates = [
            format!("http_provider_{}", chain_id),
            format!("HTTP_PROVIDER_{}", chain_id),
            "http_provider".to_string(),
            "HTTP_PROVIDER".to_string(),
        ];
        for key in candidates {
            if let Ok(v) = std::env::var(&key) {
                let trimmed = v.trim();
                if !trimmed.is_empty() {
                    return Ok(trimmed.to_string());
                }
            }
        }

        Err(AppError::Config(format!(
            "No RPC URL found for chain {}",
            chain_id
        )))
    }

    /// Parse the signing key and make sure it matches the configured address, if any.
    pub fn wallet_signer(&self) -> Result<PrivateKeySigner, AppError> {
        let key = self
            .wallet_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Config("WALLET_KEY is missing".to_string()))?;
        let signer = PrivateKeySigner::from_str(key)
            .map_err(|e| AppError::Config(format!("Invalid wallet key: {}", e)))?;
        if let Some(expected) = self.wallet_address
            && expected != signer.address()
        {
            return Err(AppError::Config(format!(
                "wallet_address {} does not match wallet_key address {}",
                expected,
                signer.address()
            )));
        }
        Ok(signer)
    }

    /// Address used for read-only commands; falls back to the key's address.
    pub fn wallet_address_value(&self) -> Result<Address, AppError> {
        if let Some(addr) = self.wallet_address {
            return Ok(addr);
        }
        self.wallet_signer().map(|s| s.address())
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = self
            .database_url
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            return url.to_string();
        }
        let path = resolve_data_path("treasury_twap.db", self.data_dir_value().as_deref());
        format!("sqlite://{}", path.to_string_lossy())
    }

    pub fn tokenlist_path(&self) -> Result<String, AppError> {
        let raw = std::env::var("TOKENLIST_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.tokenlist_path.clone())
            .unwrap_or_else(|| "data/tokenlist.json".to_string());
        let resolved = resolve_required_data_path(&raw, self.data_dir_value().as_deref())?;
        Ok(resolved.to_string_lossy().to_string())
    }

    pub fn report_path(&self, plan_id: &str) -> String {
        let file = format!("reports/twap-{plan_id}.json");
        let base = self
            .report_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|dir| Path::new(dir).join(format!("twap-{plan_id}.json")))
            .unwrap_or_else(|| resolve_data_path(&file, self.data_dir_value().as_deref()));
        base.to_string_lossy().to_string()
    }

    pub fn oneinch_api_key_value(&self) -> Option<String> {
        std::env::var("ONEINCH_API_KEY")
            .ok()
            .or_else(|| self.oneinch_api_key.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn oneinch_min_interval(&self) -> Duration {
        Duration::from_millis(self.oneinch_min_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(250))
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(100))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms.max(1_000))
    }

    pub fn max_attempts_value(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn auto_approve_value(&self) -> bool {
        env_bool("AUTO_APPROVE").unwrap_or(self.auto_approve)
    }

    pub fn max_gas_price_wei(&self) -> u128 {
        u128::from(self.max_gas_price_gwei.max(1)) * 1_000_000_000
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| parse_boolish(&v))
}

fn resolve_config_path(path: Option<&str>) -> Option<String> {
    if let Some(path) = path {
        return Some(path.to_string());
    }
    detect_active_config_file()
}

fn detect_active_config_file() -> Option<String> {
    let priority_files = [
        "config.prod.toml",
        "config.dev.toml",
        "config.testnet.toml",
        "config.toml",
    ];

    for file in priority_files.iter() {
        if let Some(true) = config_has_active_flag(file) {
            return Some((*file).to_string());
        }
    }

    // Fallback: scan current dir for config.*.toml with THIS_ACTIVE = true
    if let Ok(entries) = fs::read_dir(".") {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && name.starts_with("config.")
                && name.ends_with(".toml")
                && let Some(true) = config_has_active_flag(name)
            {
                return Some(name.to_string());
            }
        }
    }

    None
}

fn config_has_active_flag(path: &str) -> Option<bool> {
    let p = Path::new(path);
    if !p.exists() {
        return None;
    }

    Config::builder()
        .add_source(File::from(p))
        .build()
        .ok()?
        .get_bool("THIS_ACTIVE")
        .ok()
}
