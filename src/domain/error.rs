// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use thiserror::Error;

/// Node replies that prove a raw transaction was refused and can never be mined.
const BROADCAST_REJECTIONS: [&str; 8] = [
    "nonce too low",
    "insufficient funds",
    "invalid transaction",
    "invalid sender",
    "intrinsic gas too low",
    "exceeds block gas limit",
    "transaction underpriced",
    "fee cap less than block base fee",
];

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Connection failed to endpoint: {0}")]
    Connection(String),

    #[error("Transaction failed: {hash:?}, reason: {reason}")]
    Transaction { hash: String, reason: String },

    #[error("Strategy execution error: {0}")]
    Strategy(String),

    #[error("Insufficient funds. Required: {required}, Available: {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("External API error: {provider} responded with {status}: {body}")]
    ApiCall {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Validation failed for field {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Address {0} is invalid or not checksummed")]
    InvalidAddress(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether the failed call is worth repeating unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Connection(_) => true,
            AppError::ApiCall { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether a failed broadcast was definitely refused by the node. Anything else
    /// (timeouts, dropped connections) may still have reached the mempool.
    pub fn is_rejected_broadcast(&self) -> bool {
        let AppError::Transaction { reason, .. } = self else {
            return false;
        };
        let reason = reason.to_ascii_lowercase();
        BROADCAST_REJECTIONS.iter().any(|m| reason.contains(m))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
