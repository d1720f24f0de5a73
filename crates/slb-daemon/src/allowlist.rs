// crates/slb-daemon/src/allowlist.rs
// ============================================================================
// Module: TCP Allowlist
// Description: CIDR and bare-IP matching for TCP connections.
// Purpose: Drop disallowed peers before the auth handshake runs.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! The allowlist holds CIDR blocks and bare IPs. Matching uses integer
//! prefix comparison; IPv4 and IPv6 entries only ever match peers of the
//! same family. An empty allowlist admits every peer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing allowlist entries.
#[derive(Debug, Error)]
pub enum AllowlistError {
    /// Entry is neither an IP nor a CIDR block.
    #[error("allowlist entry invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Allowlist
// ============================================================================

/// One parsed allowlist rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    /// Network address of the block.
    network: IpAddr,
    /// Prefix length in bits.
    prefix: u8,
}

/// Parsed TCP allowlist.
#[derive(Debug, Clone, Default)]
pub struct IpAllowlist {
    /// Parsed rules; empty admits everything.
    rules: Vec<Rule>,
}

impl IpAllowlist {
    /// Parses allowlist entries (CIDR blocks or bare IPs).
    ///
    /// # Errors
    ///
    /// Returns [`AllowlistError::Invalid`] for malformed entries.
    pub fn parse(entries: &[String]) -> Result<Self, AllowlistError> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            rules.push(parse_entry(entry)?);
        }
        Ok(Self {
            rules,
        })
    }

    /// Returns true when the peer is admitted.
    ///
    /// An empty allowlist admits every peer.
    #[must_use]
    pub fn allows(&self, peer: IpAddr) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        self.rules.iter().any(|rule| rule_matches(*rule, peer))
    }

    /// Returns true when no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parses one entry into a rule.
fn parse_entry(entry: &str) -> Result<Rule, AllowlistError> {
    if let Some((address, prefix)) = entry.split_once('/') {
        let network: IpAddr = address
            .parse()
            .map_err(|_| AllowlistError::Invalid(entry.to_string()))?;
        let prefix: u8 =
            prefix.parse().map_err(|_| AllowlistError::Invalid(entry.to_string()))?;
        let max = max_prefix(network);
        if prefix > max {
            return Err(AllowlistError::Invalid(entry.to_string()));
        }
        return Ok(Rule {
            network,
            prefix,
        });
    }
    let network: IpAddr =
        entry.parse().map_err(|_| AllowlistError::Invalid(entry.to_string()))?;
    Ok(Rule {
        network,
        prefix: max_prefix(network),
    })
}

/// Returns the full prefix length for an address family.
const fn max_prefix(address: IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Returns true when the peer falls inside the rule's block.
fn rule_matches(rule: Rule, peer: IpAddr) -> bool {
    match (rule.network, peer) {
        (IpAddr::V4(network), IpAddr::V4(peer)) => {
            let bits = u32::from(rule.prefix);
            if bits == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - bits);
            (u32::from(network) & mask) == (u32::from(peer) & mask)
        }
        (IpAddr::V6(network), IpAddr::V6(peer)) => {
            let bits = u32::from(rule.prefix);
            if bits == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - bits);
            (u128::from(network) & mask) == (u128::from(peer) & mask)
        }
        _ => false,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
