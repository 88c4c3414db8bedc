//! Output comparison
//!
//! Both sides are normalized before an exact comparison: every line is
//! trimmed, blank lines are dropped, and the rest is joined with `\n`.
//! A lone `\r` ends a line just like `\n`.

/// Canonical form of program output
pub fn normalize(text: &str) -> String {
    text.split(&['\n', '\r'][..])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compare program output with expected output
pub fn matches(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}
