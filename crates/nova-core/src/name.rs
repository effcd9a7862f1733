//! File-name comparison rules.
//!
//! Directories on case-insensitive mounts compare child names with [`fold_case`]; everything else
//! compares them byte-for-byte.

use std::borrow::Cow;

/// Folds `name` for case-insensitive comparison.
///
/// ASCII-only names (the overwhelmingly common case) are borrowed when already lowercase.
pub fn fold_case(name: &str) -> Cow<'_, str> {
    if name.is_ascii() {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Cow::Owned(name.to_ascii_lowercase());
        }
        return Cow::Borrowed(name);
    }
    Cow::Owned(name.to_lowercase())
}

/// Compares two child names using the rules of a directory with the given case sensitivity.
pub fn names_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        return a == b;
    }
    a == b || fold_case(a) == fold_case(b)
}

/// Returns `true` for listing entries that never name a real child (`.`, `..`, empty names).
pub fn is_noise_name(name: &str) -> bool {
    matches!(name, "" | "." | "..")
}
