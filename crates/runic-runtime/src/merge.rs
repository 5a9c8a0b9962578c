/// Joins rule descriptions into one display string.
///
/// Parts are separated with single spaces; a part that begins with the
/// literal two characters `\b` is appended without a separator, with the
/// marker stripped.
pub fn merge_descriptions(parts: &[String]) -> String {
    let mut out = String::new();
    for part in parts {
        match part.strip_prefix("\\b") {
            Some(rest) => out.push_str(rest),
            None => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(part);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(parts: &[&str]) -> String {
        let owned: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
        merge_descriptions(&owned)
    }

    #[test]
    fn test_space_separated() {
        assert_eq!(merge(&["GIF image data", "version 87a"]), "GIF image data version 87a");
    }

    #[test]
    fn test_backspace_suppresses_separator() {
        assert_eq!(merge(&["GIF image data", "\\b, version 8%s"]), "GIF image data, version 8%s");
    }

    #[test]
    fn test_leading_backspace() {
        assert_eq!(merge(&["\\bfoo", "bar"]), "foo bar");
    }

    #[test]
    fn test_empty() {
        assert_eq!(merge(&[]), "");
    }
}
