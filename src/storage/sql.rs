//! SQL helper functions for the `SQLite` engine.

/// Escapes SQL LIKE wildcards in a string to make them literal.
///
/// SQL LIKE uses `%` (match any characters) and `_` (match single character)
/// as wildcards. Search terms are matched as literal substrings, so both must
/// be escaped with a backslash, as must the backslash itself. The matching
/// query carries an `ESCAPE '\'` clause.
///
/// # Security
///
/// Terms are always bound as parameters, never concatenated into SQL text;
/// escaping here only keeps wildcards in user input from being honored as
/// pattern syntax.
///
/// # Examples
///
/// ```
/// use diagramstore::storage::escape_like_wildcards;
///
/// assert_eq!(escape_like_wildcards("100%"), "100\\%");
/// assert_eq!(escape_like_wildcards("user_name"), "user\\_name");
/// assert_eq!(escape_like_wildcards("path\\file"), "path\\\\file");
/// ```
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_terms_pass_through() {
        assert_eq!(escape_like_wildcards("flow"), "flow");
        assert_eq!(escape_like_wildcards(""), "");
        assert_eq!(escape_like_wildcards("graph TD"), "graph TD");
    }

    #[test]
    fn test_wildcards_are_escaped() {
        assert_eq!(escape_like_wildcards("%_\\"), "\\%\\_\\\\");
        assert_eq!(escape_like_wildcards("a%b_c"), "a\\%b\\_c");
    }
}
