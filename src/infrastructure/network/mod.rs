// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

pub mod balances;
pub mod gas;
pub mod nonce;
pub mod oneinch;
pub mod provider;
pub mod submitter;
