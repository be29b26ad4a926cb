pub mod config;
pub mod time;

use std::hash::Hasher;

/// Hash a string using xxHash64 for use as cache keys
pub fn hash_string(s: &str) -> i64 {
    let mut hasher = twox_hash::XxHash64::default();
    hasher.write(s.trim().to_lowercase().as_bytes());
    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_case_and_padding() {
        assert_eq!(hash_string("Ana@Example.com "), hash_string("ana@example.com"));
        assert_ne!(hash_string("ana@example.com"), hash_string("bo@example.com"));
    }
}
