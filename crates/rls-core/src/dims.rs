//! Dimension key derivation.
//!
//! A rule declares an ordered list of dimension names; the limiter key for a
//! request is the FNV-1a 64-bit hash of the values rendered in that order.
//! Reordering the declaration must change the key.

use std::collections::HashMap;

use thiserror::Error;

const FNV64_OFFSET: u64 = 0xcbf29ce484222325;
const FNV64_PRIME: u64 = 0x100000001b3;
const FNV32_OFFSET: u32 = 2166136261;
const FNV32_PRIME: u32 = 16777619;

#[derive(Debug, Error)]
pub enum DimError {
    #[error("missing required dimension: {0}")]
    Missing(String),
}

/// Ensure every dimension the rule requires is present in the request.
pub fn validate_dims(
    rule_dims: &[String],
    input: &HashMap<String, String>,
) -> Result<(), DimError> {
    for dim in rule_dims {
        if !input.contains_key(dim) {
            return Err(DimError::Missing(dim.clone()));
        }
    }
    Ok(())
}

/// Pull the rule's dimension values out of the request, in rule order.
pub fn extract_dims<'a>(rule_dims: &[String], input: &'a HashMap<String, String>) -> Vec<&'a str> {
    rule_dims
        .iter()
        .map(|dim| input.get(dim).map(String::as_str).unwrap_or(""))
        .collect()
}

/// Derive the stable limiter key for a (rule, request) pair.
pub fn hash_dims(
    rule_dims: &[String],
    input: &HashMap<String, String>,
) -> Result<String, DimError> {
    validate_dims(rule_dims, input)?;
    let parts = extract_dims(rule_dims, input);
    Ok(format!("{:x}", fnv1a_64(format!("[{}]", parts.join(" ")).as_bytes())))
}

pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

pub fn fnv1a_32(s: &str) -> u32 {
    let mut hash = FNV32_OFFSET;
    for &b in s.as_bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> HashMap<String, String> {
        HashMap::from([
            ("ip".to_string(), "1.1.1.1".to_string()),
            ("route".to_string(), "/api/login".to_string()),
        ])
    }

    #[test]
    fn test_hash_is_stable() {
        let dims = vec!["ip".to_string(), "route".to_string()];
        let a = hash_dims(&dims, &input()).unwrap();
        let b = hash_dims(&dims, &input()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_changes_hash() {
        let forward = vec!["ip".to_string(), "route".to_string()];
        let reverse = vec!["route".to_string(), "ip".to_string()];
        assert_ne!(
            hash_dims(&forward, &input()).unwrap(),
            hash_dims(&reverse, &input()).unwrap()
        );
    }

    #[test]
    fn test_missing_dim_is_an_error() {
        let dims = vec!["ip".to_string(), "user".to_string()];
        let err = hash_dims(&dims, &input()).unwrap_err();
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_fnv_known_vectors() {
        // Reference values for the FNV-1a parameters.
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_32(""), 2166136261);
        assert_eq!(fnv1a_32("a"), 0xe40c292c);
    }
}
