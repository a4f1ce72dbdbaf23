// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use alloy::primitives::{Address, B256, Bytes, U256};

/// Indicative price for selling `amount_in` of `src` into `dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub src: Address,
    pub dst: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub gas: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub src: Address,
    pub dst: Address,
    pub amount: U256,
    pub from: Address,
    pub slippage_bps: u64,
}

/// Unsigned call returned by the venue, ready to be signed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTx {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Gas figure suggested by the venue; 0 when it did not estimate.
    pub gas: u64,
    pub expected_out: U256,
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub hash: B256,
    pub raw: Vec<u8>,
    pub nonce: u64,
}

/// Settlement facts read back from a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// Amount of the destination token received by the wallet, when it can be measured from logs.
    pub amount_out: Option<U256>,
}
