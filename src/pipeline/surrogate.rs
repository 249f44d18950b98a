//! Deterministic surrogate keys for dimension and fact rows.

use sha2::{Digest, Sha256};

// ---

/// Field separator inside the hashed string.
pub const FIELD_DELIMITER: &str = "-";

/// SHA-256 hex digest of the fields joined with [`FIELD_DELIMITER`], in the
/// order given. Stable across runs, processes and implementations.
///
/// The delimiter is not escaped, so `["a-b"]` and `["a", "b"]` share a key.
/// Callers key on fields that cannot collide this way.
pub fn surrogate_key<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    // ---
    let mut hasher = Sha256::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_DELIMITER.as_bytes());
        }
        hasher.update(field.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
