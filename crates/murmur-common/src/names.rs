//! Principal name handling.
//!
//! Names are compared after normalization everywhere: the relay keys its
//! directory on the normalized form and clients use it for the
//! canonical-initiator tie-break.

/// Maximum length of a principal name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Trim surrounding whitespace and lowercase.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check a name that has already been normalized.
pub fn is_valid_name(name: &str) -> bool {
    let len = name.len();
    if !(1..=MAX_NAME_LEN).contains(&len) {
        return false;
    }
    name.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c == '.'
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize_name("  Alice "), "alice");
        assert_eq!(normalize_name("BOB"), "bob");
        assert_eq!(normalize_name("carol"), "carol");
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("alice"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name("bob_2.0-x"));
        assert!(is_valid_name(&"z".repeat(MAX_NAME_LEN)));
    }

    #[test]
    fn test_invalid_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Alice"));
        assert!(!is_valid_name("with space"));
        assert!(!is_valid_name("émile"));
        assert!(!is_valid_name(&"z".repeat(MAX_NAME_LEN + 1)));
    }

    #[test]
    fn test_normalized_mixed_case_is_valid() {
        assert!(is_valid_name(&normalize_name("  MiXeD_Case ")));
    }
}
