use crate::reader::SliceReader;

/// Bit set controlling how `string_test` normalises its comparison.
pub type StringFlags = u32;

/// "W": a run of whitespace in the target collapses while matching.
pub const COMPACT_WHITESPACE: StringFlags = 1 << 0;
/// "w": every blank in the pattern is optional.
pub const OPTIONAL_BLANKS: StringFlags = 1 << 1;
/// "c": lowercase pattern letters match both cases in the target.
pub const LOWER_MATCHES_BOTH: StringFlags = 1 << 2;
/// "C": uppercase pattern letters match both cases in the target.
pub const UPPER_MATCHES_BOTH: StringFlags = 1 << 3;
/// "t": force the test to be done for text files.
pub const FORCE_TEXT: StringFlags = 1 << 4;
/// "b": force the test to be done for binary files.
pub const FORCE_BINARY: StringFlags = 1 << 5;

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r')
}

fn is_lower(b: u8) -> bool {
    b.is_ascii_lowercase()
}

fn is_upper(b: u8) -> bool {
    b.is_ascii_uppercase()
}

/// Matches `pattern` against the target at `at`, walking both in
/// lock-step under the given flags.
///
/// Returns the number of target bytes the match consumed (which can
/// exceed the pattern length under `COMPACT_WHITESPACE`), or -1 if the
/// pattern does not match there.
pub fn string_test(r: &SliceReader, at: i64, pattern: &[u8], flags: StringFlags) -> i64 {
    if at < 0 {
        return -1;
    }
    if pattern.is_empty() {
        return 0;
    }

    let size = r.size();
    let mut ti = at;
    let mut pi = 0usize;

    while ti < size {
        let pb = pattern[pi];
        let tb = match r.byte_at(ti) {
            Some(b) => b,
            None => return -1,
        };

        if pb == tb {
            ti += 1;
            pi += 1;
        } else if flags & OPTIONAL_BLANKS != 0 && is_whitespace(pb) {
            // the blank in the pattern is optional, leave the target be
            pi += 1;
        } else if flags & LOWER_MATCHES_BOTH != 0 && is_lower(pb) && tb.to_ascii_lowercase() == pb {
            ti += 1;
            pi += 1;
        } else if flags & UPPER_MATCHES_BOTH != 0 && is_upper(pb) && tb.to_ascii_uppercase() == pb {
            ti += 1;
            pi += 1;
        } else {
            return -1;
        }

        if flags & COMPACT_WHITESPACE != 0 && is_whitespace(tb) {
            while ti < size && r.byte_at(ti).is_some_and(is_whitespace) {
                ti += 1;
            }
        }

        if pi >= pattern.len() {
            return ti - at;
        }
    }

    // target exhausted before the pattern was
    -1
}
