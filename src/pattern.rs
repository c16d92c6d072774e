//! Pattern helpers.
//!
//! A pattern is the textual dependency descriptor used as the key of the
//! lockfile and of the resolver's tables: either a bare `name` (when the
//! lockfile already pins the package) or `name@range`.

/// Build a `name@range` pattern.
pub fn make_pattern(name: &str, range: &str) -> String {
    format!("{name}@{range}")
}

/// Split a pattern into its name and optional range.
///
/// The separator is the first `@` past index 0, so scoped names like
/// `@team/pkg@^1.0.0` keep their leading `@`.
pub fn split_pattern(pattern: &str) -> (&str, Option<&str>) {
    if pattern.is_empty() {
        return (pattern, None);
    }
    match pattern[1..].find('@') {
        Some(i) => (&pattern[..i + 1], Some(&pattern[i + 2..])),
        None => (pattern, None),
    }
}

/// The bare package name of a pattern.
pub fn pattern_name(pattern: &str) -> &str {
    split_pattern(pattern).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_and_range() {
        assert_eq!(split_pattern("a@^1.0.0"), ("a", Some("^1.0.0")));
        assert_eq!(split_pattern("a"), ("a", None));
    }

    #[test]
    fn keeps_scope_prefix() {
        assert_eq!(split_pattern("@team/pkg@~2.1.0"), ("@team/pkg", Some("~2.1.0")));
        assert_eq!(split_pattern("@team/pkg"), ("@team/pkg", None));
    }

    #[test]
    fn round_trips() {
        let pattern = make_pattern("x", ">=1.2.3");
        assert_eq!(split_pattern(&pattern), ("x", Some(">=1.2.3")));
    }
}
