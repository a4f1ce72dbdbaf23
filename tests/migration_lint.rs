// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const MIGRATIONS_DIR: &str = "migrations";

fn ident(raw: &str) -> String {
    raw.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ';' | '('))
        .to_lowercase()
}

/// `table:<name>`, `index:<name>` or `column:<table>:<name>` for DDL statements that
/// create something; `None` for everything else.
fn ddl_target(line: &str) -> Option<String> {
    let words: Vec<String> = line.split_whitespace().map(|w| w.to_lowercase()).collect();
    let w: Vec<&str> = words.iter().map(String::as_str).collect();
    let skip_if_not_exists = |at: usize| {
        if w.get(at..at + 3) == Some(&["if", "not", "exists"][..]) {
            at + 3
        } else {
            at
        }
    };
    match w.as_slice() {
        ["create", "table", ..] => w.get(skip_if_not_exists(2)).map(|n| format!("table:{}", ident(n))),
        ["create", "index", ..] => w.get(skip_if_not_exists(2)).map(|n| format!("index:{}", ident(n))),
        ["create", "unique", "index", ..] => {
            w.get(skip_if_not_exists(3)).map(|n| format!("index:{}", ident(n)))
        }
        ["alter", "table", table, "add", "column", column, ..] => {
            Some(format!("column:{}:{}", ident(table), ident(column)))
        }
        _ => None,
    }
}

fn migration_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(MIGRATIONS_DIR)
        .expect("read migrations dir")
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    files.sort();
    files
}

/// Every DDL target and the migrations that create it.
fn targets() -> BTreeMap<String, Vec<String>> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in migration_files() {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.sql")
            .to_string();
        let sql = fs::read_to_string(&path).expect("read migration");
        for line in sql.lines().map(str::trim) {
            if line.starts_with("--") {
                continue;
            }
            if let Some(target) = ddl_target(line) {
                seen.entry(target).or_default().push(name.clone());
            }
        }
    }
    seen
}

#[test]
fn migration_names_are_timestamped() {
    for path in migration_files() {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (stamp, _) = name.split_once('_').expect("migration name has a description");
        assert!(
            stamp.len() == 14 && stamp.chars().all(|c| c.is_ascii_digit()),
            "migration {name} should start with a YYYYMMDDHHMMSS stamp"
        );
    }
}

#[test]
fn ddl_targets_are_not_duplicated() {
    let duplicates: Vec<_> = targets().into_iter().filter(|(_, f)| f.len() > 1).collect();
    assert!(
        duplicates.is_empty(),
        "Duplicate DDL targets in {MIGRATIONS_DIR}: {duplicates:?}"
    );
}

#[test]
fn tranche_tables_are_created() {
    let all = targets();
    for expected in ["table:twap_plans", "table:tranches", "table:fill_events"] {
        assert!(
            all.contains_key(expected),
            "missing {expected} in {MIGRATIONS_DIR}: {:?}",
            all.keys().collect::<Vec<_>>()
        );
    }
}
