//! CLI utilities for Tether.
//!
//! The utilities present in this module turn command line arguments into call
//! targets and parameters.

use crate::protocol::Value;

/// Parses a single call parameter.
///
/// `nil`, `true`/`false`, integers and floats are recognised; anything else is
/// passed as a string. Wrap a value in double quotes to force a string.
pub fn parse_param(raw: &str) -> Value {
    if let Some(quoted) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::from(quoted);
    }

    match raw {
        "nil" | "null" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        s => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(n) = s.parse::<u64>() {
                Value::UInt(n)
            } else if let Ok(f) = s.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::from(s)
            }
        }
    }
}

/// Splits `host:port`, accepting bracketed IPv6 hosts such as `[::1]:18800`.
pub fn split_endpoint(raw: &str) -> Result<(String, u16), String> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid address '{raw}', expected host:port"))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{port}': {e}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return Err(format!("invalid address '{raw}', missing host"));
    }
    Ok((host.to_string(), port))
}
