//! Deterministic alert identities.
//!
//! An identity is derived from the fields of an event that do not change when
//! the same logical alert is re-polled: label, both ip addresses and both
//! ports. Timestamps never take part, so an alert keeps its identity (and the
//! analyst metadata keyed by it) from one poll cycle to the next.

use crate::alerts::SourceTag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Stand-in for absent fields so that a missing value never collapses into
/// its neighbour in the canonical string.
pub const MISSING_FIELD: &str = "unknown";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvariantFields<'a> {
    pub label: Option<&'a str>,
    pub src_ip: Option<&'a str>,
    pub dest_ip: Option<&'a str>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
}

impl InvariantFields<'_> {
    pub fn canonical(&self) -> String {
        let text = |value: Option<&str>| match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => MISSING_FIELD.to_string(),
        };
        let port = |value: Option<u16>| {
            value
                .map(|p| p.to_string())
                .unwrap_or_else(|| MISSING_FIELD.to_string())
        };

        [
            text(self.label),
            text(self.src_ip),
            text(self.dest_ip),
            port(self.src_port),
            port(self.dest_port),
        ]
        .join("|")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityScheme {
    /// `h = h * 31 + c` in wrapping 32-bit arithmetic. Compatible with ids
    /// already persisted by the dashboard.
    #[default]
    Rolling32,
    /// Same polynomial, 64-bit wrapping arithmetic.
    Rolling64,
}

impl FromStr for IdentityScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "rolling32" | "rolling_32" | "32" => Ok(IdentityScheme::Rolling32),
            "rolling64" | "rolling_64" | "64" => Ok(IdentityScheme::Rolling64),
            other => Err(format!("unknown identity scheme '{other}'")),
        }
    }
}

/// Hashes UTF-16 code units so the result matches ids minted by browser code.
pub fn rolling_hash_32(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

pub fn rolling_hash_64(input: &str) -> i64 {
    input
        .encode_utf16()
        .fold(0i64, |hash, unit| hash.wrapping_mul(31).wrapping_add(i64::from(unit)))
}

pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Pure function of the invariant fields; no suffixing happens here.
pub fn assign_identity(
    source: SourceTag,
    fields: &InvariantFields<'_>,
    scheme: IdentityScheme,
) -> String {
    let canonical = fields.canonical();
    let magnitude = match scheme {
        IdentityScheme::Rolling32 => u64::from(rolling_hash_32(&canonical).unsigned_abs()),
        IdentityScheme::Rolling64 => rolling_hash_64(&canonical).unsigned_abs(),
    };
    format!("{}-{}", source.identity_prefix(), to_base36(magnitude))
}

struct SeenIdentity {
    canonical: String,
    occurrences: usize,
}

/// Batch-local uniqueness. Create one per normalization batch and drop it
/// afterwards; the `-dupN` suffixes it hands out depend on batch order.
#[derive(Default)]
pub struct IdentityAllocator {
    seen: HashMap<String, SeenIdentity>,
    collisions: usize,
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, base: String, canonical: &str) -> String {
        let Some(seen) = self.seen.get_mut(&base) else {
            self.seen.insert(
                base.clone(),
                SeenIdentity {
                    canonical: canonical.to_string(),
                    occurrences: 1,
                },
            );
            return base;
        };

        if seen.canonical != canonical {
            self.collisions += 1;
            tracing::warn!(
                identity = %base,
                first = %seen.canonical,
                second = %canonical,
                "identity hash collision between distinct alerts"
            );
        }

        let suffix = seen.occurrences;
        seen.occurrences += 1;
        format!("{base}-dup{suffix}")
    }

    /// Distinct canonical strings that hashed to an id already in use.
    pub fn collisions(&self) -> usize {
        self.collisions
    }
}
