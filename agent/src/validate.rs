//! Strict validation of externally derived addresses
//!
//! Any value destined for an external action (a source IP pulled from an
//! anomaly, a hostname from configuration) must parse as a dotted-quad
//! IPv4 address or match a conservative hostname pattern before it can
//! reach a controller. Invalid input is rejected with a
//! `ValidationError`, never coerced or passed through.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{ValidationError, ValidationResult};

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Letters, digits, dots and hyphens; must start and end alphanumeric
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?$").expect("hostname pattern")
    })
}

/// An address that has passed strict syntax validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum ValidatedAddress {
    Ip(Ipv4Addr),
    Hostname(String),
}

impl ValidatedAddress {
    pub fn parse(input: &str) -> ValidationResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInput {
                field: "address".to_string(),
            });
        }

        if let Ok(ip) = Ipv4Addr::from_str(trimmed) {
            return Ok(ValidatedAddress::Ip(ip));
        }

        // Anything that looks numeric but failed IPv4 parsing is a
        // malformed address, not a hostname
        if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(ValidationError::InvalidAddress {
                input: trimmed.to_string(),
            });
        }

        if trimmed.len() <= 253 && !trimmed.contains("..") && hostname_regex().is_match(trimmed) {
            return Ok(ValidatedAddress::Hostname(trimmed.to_string()));
        }

        Err(ValidationError::InvalidHostname {
            input: trimmed.to_string(),
        })
    }
}

impl std::fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatedAddress::Ip(ip) => write!(f, "{}", ip),
            ValidatedAddress::Hostname(name) => write!(f, "{}", name),
        }
    }
}

impl From<ValidatedAddress> for String {
    fn from(addr: ValidatedAddress) -> Self {
        addr.to_string()
    }
}

impl FromStr for ValidatedAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        ValidatedAddress::parse(s)
    }
}
