// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use regex::Regex;
use std::fs;
use std::path::Path;

const CANDIDATES: [&str; 4] = [
    "config.toml",
    "config.example.toml",
    "config.prod.toml",
    "config.dev.toml",
];

/// Fail CI if config files contain 64-hex private keys or obvious secrets.
#[test]
fn no_committed_hex_keys_in_configs() {
    let re = Regex::new(r"0x?[a-fA-F0-9]{64}").unwrap();
    for file in CANDIDATES {
        if !Path::new(file).exists() {
            continue;
        }
        let body = fs::read_to_string(file).expect("read config");
        for (idx, line) in body.lines().enumerate() {
            if re.is_match(line) {
                panic!("Secret-looking hex in {} at line {}", file, idx + 1);
            }
        }
    }
}

/// The 1inch API key belongs in the environment, never in a tracked file.
#[test]
fn no_committed_api_keys_in_configs() {
    let re = Regex::new(r#"(?i)^\s*oneinch_api_key\s*=\s*"[^"]+""#).unwrap();
    for file in CANDIDATES {
        if !Path::new(file).exists() {
            continue;
        }
        let body = fs::read_to_string(file).expect("read config");
        for (idx, line) in body.lines().enumerate() {
            if re.is_match(line) {
                panic!("API key committed in {} at line {}", file, idx + 1);
            }
        }
    }
}
