use memchr::memmem;

use crate::reader::SliceReader;
use crate::string::{string_test, StringFlags};

/// Looks for `pattern` anywhere inside the window of `max_len` bytes
/// starting at `at`.
///
/// Returns the 0-based offset of the first occurrence within the window,
/// or -1 when the pattern does not occur there. The match must lie
/// entirely inside the window. A non-empty flag set switches from the
/// plain substring scan to the flag-aware matcher.
pub fn search_test(
    r: &SliceReader,
    at: i64,
    max_len: i64,
    pattern: &[u8],
    flags: StringFlags,
) -> i64 {
    let win = r.window(at, max_len);
    if pattern.is_empty() {
        return 0;
    }

    if flags == 0 {
        return match memmem::find(win.bytes(), pattern) {
            Some(pos) => pos as i64,
            None => -1,
        };
    }

    for pos in 0..win.size() {
        if string_test(&win, pos, pattern, flags) >= 0 {
            return pos;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::LOWER_MATCHES_BOTH;

    fn search(target: &[u8], at: i64, max_len: i64, pattern: &[u8], flags: StringFlags) -> i64 {
        search_test(&SliceReader::new(target), at, max_len, pattern, flags)
    }

    #[test]
    fn test_finds_first_occurrence() {
        assert_eq!(search(b"xxneedlexx", 0, 10, b"needle", 0), 2);
        assert_eq!(search(b"needle", 0, 6, b"needle", 0), 0);
    }

    #[test]
    fn test_absent_pattern() {
        assert_eq!(search(b"haystack", 0, 8, b"needle", 0), -1);
    }

    #[test]
    fn test_window_bounds_the_match() {
        // occurrence straddles the window end, so it does not count
        assert_eq!(search(b"xxneedle", 0, 6, b"needle", 0), -1);
        assert_eq!(search(b"xxneedle", 0, 8, b"needle", 0), 2);
    }

    #[test]
    fn test_window_start() {
        assert_eq!(search(b"aaabbb", 3, 3, b"bbb", 0), 0);
        assert_eq!(search(b"aaabbb", 3, 3, b"aaa", 0), -1);
    }

    #[test]
    fn test_case_insensitive_flags() {
        assert_eq!(
            search(b"... Hello, World ...", 0, 20, b"hello, world", LOWER_MATCHES_BOTH),
            4
        );
        assert_eq!(search(b"... Hello, World ...", 0, 20, b"hello, world", 0), -1);
    }
}
