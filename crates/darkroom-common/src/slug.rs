//! Slug derivation and validation
//!
//! Photo slugs are derived from titles and must be stable: the same title
//! always yields the same slug, which is what makes re-processing an upload
//! item idempotent.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{DarkroomError, Result};

/// Maximum slug length accepted by the catalog.
pub const MAX_SLUG_LENGTH: usize = 250;

/// Convert a title into a URL-safe slug
///
/// Decomposes to NFKD and drops combining marks, so accented letters keep
/// their base letter. Then lowercases ASCII letters, keeps digits and
/// underscores, turns runs of whitespace and hyphens into a single hyphen,
/// and drops everything else.
///
/// # Examples
///
/// ```
/// use darkroom_common::slug::slugify;
///
/// assert_eq!(slugify("Beach Day 0"), "beach-day-0");
/// assert_eq!(slugify("  Rock & Roll -- Live!  "), "rock-roll-live");
/// assert_eq!(slugify("Café 1"), "cafe-1");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_separator = false;

    for c in title.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' {
            pending_separator = true;
        }
    }

    slug
}

/// Validate a slug
///
/// # Rules
/// - Must not be empty
/// - Must not exceed `max_length` characters
/// - Only lowercase letters, digits, hyphens and underscores
/// - Must not start or end with a hyphen
pub fn validate_slug(slug: &str, max_length: usize) -> Result<()> {
    let invalid = |reason: &str| DarkroomError::InvalidSlug {
        slug: slug.to_string(),
        reason: reason.to_string(),
    };

    if slug.is_empty() {
        return Err(invalid("slug cannot be empty"));
    }

    if slug.len() > max_length {
        return Err(invalid(&format!("slug exceeds {} characters", max_length)));
    }

    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            "only lowercase letters, numbers, hyphens and underscores are allowed",
        ));
    }

    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(invalid("slug cannot start or end with a hyphen"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_title_with_ordinal() {
        assert_eq!(slugify("Summer Trip 12"), "summer-trip-12");
    }

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("a  -  b"), "a-b");
        assert_eq!(slugify("--lead and trail--"), "lead-and-trail");
    }

    #[test]
    fn test_slugify_drops_punctuation() {
        assert_eq!(slugify("Rock & Roll!"), "rock-roll");
        assert_eq!(slugify("snake_case title"), "snake_case-title");
    }

    #[test]
    fn test_slugify_strips_accents() {
        assert_eq!(slugify("Café 1"), "cafe-1");
        assert_eq!(slugify("Café: über 7"), "cafe-uber-7");
        assert_eq!(slugify("Ångström Ñandú"), "angstrom-nandu");
        // compatibility forms fold to ASCII
        assert_eq!(slugify("ﬁne ２"), "fine-2");
        // no ASCII decomposition: dropped
        assert_eq!(slugify("東京 3"), "3");
    }

    #[test]
    fn test_slugify_is_deterministic() {
        assert_eq!(slugify("Gallery 3"), slugify("gallery   3"));
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("summer-trip-1", MAX_SLUG_LENGTH).is_ok());
        assert!(validate_slug("", MAX_SLUG_LENGTH).is_err());
        assert!(validate_slug("-leading", MAX_SLUG_LENGTH).is_err());
        assert!(validate_slug("Upper", MAX_SLUG_LENGTH).is_err());
        assert!(validate_slug("abcdef", 3).is_err());
    }
}
