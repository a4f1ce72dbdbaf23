// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::common::error::AppError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Circuit breaker over consecutive tranche failures.
pub struct SafetyGuard {
    consecutive_failures: AtomicUsize,
    last_failure_ts: AtomicU64,
    max_failures: usize,
    reset_interval_sec: u64,
}

impl SafetyGuard {
    pub fn new(max_failures: usize, reset_interval_sec: u64) -> Self {
        Self {
            consecutive_failures: AtomicUsize::new(0),
            last_failure_ts: AtomicU64::new(0),
            max_failures: max_failures.max(1),
            reset_interval_sec,
        }
    }

    pub fn check_at(&self, now: u64) -> Result<(), AppError> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures >= self.max_failures {
            let last = self.last_failure_ts.load(Ordering::Relaxed);
            if now.saturating_sub(last) > self.reset_interval_sec {
                self.reset();
            } else {
                return Err(AppError::Strategy(format!(
                    "Circuit breaker tripped: {failures} consecutive tranche failures"
                )));
            }
        }
        Ok(())
    }

    pub fn report_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn report_failure_at(&self, now: u64) {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ts.store(now, Ordering::Relaxed);
        if count == self.max_failures {
            tracing::error!(target: "twap", failures = count, "SAFETY GUARD: circuit breaker tripped");
        }
    }

    pub fn failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        tracing::info!(target: "twap", "Safety guard: circuit breaker auto-reset");
    }
}
