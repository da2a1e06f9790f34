//! Forwarder output parsing
//!
//! `show memif` output is read as a sequence of records
//! `interface <name> key <hex> file <path>`. Keywords are case-insensitive,
//! records may span lines, and any fields following `file <path>` up to the
//! next `interface` keyword are ignored.

use netbed_common::{Error, Result};
use serde::Serialize;

/// One shared-memory interface reported by the forwarder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemifRecord {
    pub interface: String,
    pub key: u64,
    pub path: String,
}

fn keyword(token: &str, expected: &str) -> bool {
    token.eq_ignore_ascii_case(expected)
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Value following keyword `name` at position `at`
fn field<'t>(tokens: &[&'t str], at: usize, name: &str) -> Result<&'t str> {
    match (tokens.get(at), tokens.get(at + 1)) {
        (Some(k), Some(v)) if keyword(k, name) => Ok(*v),
        (Some(k), _) if !keyword(k, name) => Err(Error::ParseMismatch(format!(
            "expected '{}', found '{}'",
            name, k
        ))),
        _ => Err(Error::ParseMismatch(format!(
            "truncated record, missing value for '{}'",
            name
        ))),
    }
}

/// Parse every record in `text`
pub fn parse_memif(text: &str) -> Result<Vec<MemifRecord>> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut records = Vec::new();
    let mut i = 0;

    // Skip anything before the first record
    while i < tokens.len() && !keyword(tokens[i], "interface") {
        i += 1;
    }

    while i < tokens.len() {
        let interface = field(&tokens, i, "interface")?;
        let key_token = field(&tokens, i + 2, "key")?;
        let path = field(&tokens, i + 4, "file")?;
        let key = parse_hex(key_token)
            .ok_or_else(|| Error::ParseMismatch(format!("'{}' is not a hex key", key_token)))?;

        records.push(MemifRecord {
            interface: interface.to_string(),
            key,
            path: path.to_string(),
        });

        i += 6;
        while i < tokens.len() && !keyword(tokens[i], "interface") {
            i += 1;
        }
    }

    Ok(records)
}

/// Record whose `file` equals `socket_path`
pub fn find_by_socket<'a>(records: &'a [MemifRecord], socket_path: &str) -> Option<&'a MemifRecord> {
    records.iter().find(|r| r.path == socket_path)
}
