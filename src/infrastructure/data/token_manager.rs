// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use std::collections::HashMap;
use std::fs;

use alloy::primitives::Address;
use alloy::providers::Provider;
use dashmap::DashSet;
use serde::Deserialize;

use crate::common::parsing::parse_address_hex;
use crate::domain::constants::NATIVE_TOKEN;
use crate::domain::error::AppError;
use crate::network::provider::HttpProvider;

/// Token metadata used to turn operator input ("USDC", "250.5") into base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TokenManager {
    tokens_by_chain: HashMap<u64, HashMap<Address, TokenInfo>>,
    invalid_tokens: DashSet<(u64, Address)>,
}

#[derive(Deserialize)]
struct TokenEntry {
    symbol: String,
    #[serde(default)]
    tags: Vec<String>,
    decimals: u8,
    #[serde(default)]
    addresses: HashMap<String, String>,
}

impl TokenManager {
    fn is_native_tagged(tags: &[String]) -> bool {
        tags.iter().any(|tag| tag.trim().eq_ignore_ascii_case("native"))
    }

    pub fn load_from_file(path: &str) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read tokenlist {path}: {e}")))?;
        Self::from_json(&raw).map_err(|e| AppError::Config(format!("Invalid tokenlist JSON {path}: {e}")))
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<TokenEntry> = serde_json::from_str(raw)?;
        let mut tokens_by_chain: HashMap<u64, HashMap<Address, TokenInfo>> = HashMap::new();

        for entry in entries {
            let native = Self::is_native_tagged(&entry.tags);
            for (chain_str, addr_str) in entry.addresses {
                let Ok(chain_id) = chain_str.parse::<u64>() else {
                    continue;
                };
                // Native entries may omit a real address; the aggregation API uses a placeholder.
                let address = if native {
                    parse_address_hex(&addr_str).unwrap_or(NATIVE_TOKEN)
                } else if let Some(addr) = parse_address_hex(&addr_str) {
                    addr
                } else {
                    tracing::warn!(
                        target: "token_manager",
                        symbol = %entry.symbol,
                        chain_id,
                        address = %addr_str,
                        "Skipping token with invalid address"
                    );
                    continue;
                };
                tokens_by_chain.entry(chain_id).or_default().insert(
                    address,
                    TokenInfo {
                        address,
                        symbol: entry.symbol.clone(),
                        decimals: entry.decimals,
                        tags: entry.tags.clone(),
                    },
                );
            }
        }

        Ok(Self {
            tokens_by_chain,
            invalid_tokens: DashSet::new(),
        })
    }

    pub fn info(&self, chain_id: u64, address: Address) -> Option<&TokenInfo> {
        if self.invalid_tokens.contains(&(chain_id, address)) {
            return None;
        }
        self.tokens_by_chain
            .get(&chain_id)
            .and_then(|m| m.get(&address))
    }

    pub fn decimals(&self, chain_id: u64, address: Address) -> Option<u8> {
        self.info(chain_id, address).map(|t| t.decimals)
    }

    /// Look a token up by address or (case-insensitive) symbol.
    pub fn resolve(&self, chain_id: u64, query: &str) -> Option<&TokenInfo> {
        if let Some(addr) = parse_address_hex(query) {
            return self.info(chain_id, addr);
        }
        let wanted = query.trim();
        self.tokens_by_chain.get(&chain_id)?.values().find(|t| {
            t.symbol.eq_ignore_ascii_case(wanted) && !self.invalid_tokens.contains(&(chain_id, t.address))
        })
    }

    pub fn tokens(&self, chain_id: u64) -> Vec<&TokenInfo> {
        let mut out: Vec<&TokenInfo> = self
            .tokens_by_chain
            .get(&chain_id)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.tokens_by_chain.is_empty()
    }

    /// Flag configured tokens without bytecode so they are never traded. Returns the number flagged.
    pub async fn validate_chain_addresses(&self, provider: &HttpProvider, chain_id: u64) -> usize {
        let Some(tokens) = self.tokens_by_chain.get(&chain_id) else {
            return 0;
        };
        let mut invalid = 0usize;
        for (addr, info) in tokens {
            if Self::is_native_tagged(&info.tags) {
                continue;
            }
            match provider.get_code_at(*addr).await {
                Ok(code) if code.is_empty() => {
                    tracing::warn!(
                        target: "token_manager",
                        symbol = %info.symbol,
                        address = %format!("{:#x}", addr),
                        "Token has no bytecode on this chain; ignoring it"
                    );
                    self.invalid_tokens.insert((chain_id, *addr));
                    invalid += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        target: "token_manager",
                        address = %format!("{:#x}", addr),
                        error = %e,
                        "Failed to validate token code; leaving entry usable"
                    );
                }
            }
        }
        invalid
    }
}
