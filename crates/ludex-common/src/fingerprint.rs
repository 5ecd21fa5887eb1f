//! Canonical content fingerprints
//!
//! A fingerprint is a sha256 over a canonicalized rendering of a record's
//! normalized attributes. Field order is fixed by the caller, absent optional
//! fields are rendered as an explicit marker, and nested JSON is serialized
//! with sorted keys (the default `serde_json::Map` is ordered), so attribute
//! reordering or whitespace differences in upstream payloads never change the
//! fingerprint.

use crate::error::{LudexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Marker written for an absent optional field.
///
/// Distinct from JSON `null` so that "field present with null value" and
/// "field missing entirely" canonicalize the same way.
const ABSENT_MARKER: &str = "\u{0}absent\u{0}";

/// A stable content fingerprint (lowercase hex sha256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint over an ordered set of named fields.
    ///
    /// `None` and `Value::Null` both canonicalize to the absent marker.
    pub fn of_fields(fields: &[(&str, Option<&Value>)]) -> Self {
        let canonical = canonicalize(fields);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-computed hex digest (e.g. read back from the store)
    pub fn from_hex(hex_digest: impl Into<String>) -> Self {
        Fingerprint(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify a fingerprint against an expected value
    pub fn verify(&self, expected: &Fingerprint) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(LudexError::FingerprintMismatch {
                expected: expected.0.clone(),
                actual: self.0.clone(),
            })
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Render fields into the canonical string that gets hashed.
///
/// Format: `name=<canonical json>\n` per field, in caller-supplied order.
fn canonicalize(fields: &[(&str, Option<&Value>)]) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        out.push_str(name);
        out.push('=');
        match value {
            Some(Value::Null) | None => out.push_str(ABSENT_MARKER),
            // serde_json maps are sorted, so nested objects are canonical
            Some(v) => out.push_str(&v.to_string()),
        }
        out.push('\n');
    }
    out
}
