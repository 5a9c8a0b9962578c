//! Spellbook interpreter.
//!
//! Walks the flat rule list of a page with per-level match state, the
//! frame's global offset, and an inherited endian-swap flag. Evaluation
//! never fails: reader errors, out-of-bounds offsets and unresolved
//! pages demote the offending rule to a non-match and are logged.

use runic_rules::{
    ArithOp, Indirect, IntegerKind, IntegerTest, Kind, OffsetValue, Rule, Spellbook, MAX_LEVELS,
};
use runic_runtime::{search_test, string_test, SliceReader};

/// Bound on `use` recursion, so cyclic books terminate.
const MAX_USE_DEPTH: usize = 64;

pub struct Interpreter<'a> {
    book: &'a Spellbook,
}

impl<'a> Interpreter<'a> {
    pub fn new(book: &'a Spellbook) -> Self {
        Interpreter { book }
    }

    /// Follows the book's root page to find out what the target is,
    /// returning the descriptions of every matching rule in source order.
    pub fn identify(&self, r: &SliceReader) -> Vec<String> {
        self.identify_page(r, 0, "", false, 0)
    }

    fn identify_page(
        &self,
        r: &SliceReader,
        page_offset: i64,
        page: &str,
        swap_endian: bool,
        depth: usize,
    ) -> Vec<String> {
        let mut out = Vec::new();
        let rules = self.book.rules(page);
        log::debug!(
            "identifying at {page_offset} using page {page:?} ({} rules)",
            rules.len()
        );

        let mut matched = [false; MAX_LEVELS];
        let mut ever_matched = [false; MAX_LEVELS];
        let mut global_offset: i64 = 0;

        if !page.is_empty() {
            matched[0] = true;
            ever_matched[0] = true;
        }

        for rule in rules {
            // a deeper level has committed to a branch; the page is done
            if (rule.level + 1..MAX_LEVELS).any(|l| ever_matched[l]) {
                break;
            }

            if (0..rule.level).any(|l| !matched[l]) {
                continue;
            }

            log::trace!("| {}", rule.line);

            let lookup_offset = match self.effective_offset(r, rule, page_offset, global_offset, swap_endian)
            {
                Some(off) => off,
                None => {
                    matched[rule.level] = false;
                    continue;
                }
            };

            if lookup_offset < 0 || lookup_offset >= r.size() {
                log::warn!(
                    "effective offset {lookup_offset} out of bounds: {}",
                    rule.line
                );
                matched[rule.level] = false;
                continue;
            }

            let mut success = false;

            match &rule.kind {
                Kind::Integer(ik) => {
                    if ik.match_any {
                        success = true;
                    } else if let Some(value) =
                        self.integer_value(r, ik, lookup_offset, swap_endian)
                    {
                        success = integer_test(ik, value);
                        if success {
                            global_offset = lookup_offset.wrapping_add(i64::from(ik.width));
                        }
                    } else {
                        matched[rule.level] = false;
                        continue;
                    }
                }
                Kind::String(sk) => {
                    let match_len = string_test(r, lookup_offset, &sk.pattern, sk.flags);
                    success = match_len >= 0;
                    if sk.negate {
                        success = !success;
                    } else if success {
                        global_offset = lookup_offset.wrapping_add(match_len);
                    }
                }
                Kind::Search(sk) => {
                    let match_pos = search_test(r, lookup_offset, sk.max_len, &sk.pattern, sk.flags);
                    success = match_pos >= 0;
                    if success {
                        global_offset = lookup_offset
                            .wrapping_add(match_pos)
                            .wrapping_add(sk.pattern.len() as i64);
                    }
                }
                Kind::Default => {
                    success = !ever_matched[rule.level];
                }
                Kind::Clear => {
                    ever_matched[rule.level] = false;
                }
                Kind::Name(_) => {
                    // the stored first rule of a named page; nothing to test
                    success = true;
                }
                Kind::Use(uk) => {
                    if !self.book.contains_page(&uk.page) {
                        log::warn!("use of unknown page {:?}", uk.page);
                    } else if depth >= MAX_USE_DEPTH {
                        log::warn!("use recursion deeper than {MAX_USE_DEPTH}, stopping");
                    } else {
                        log::debug!("using page {:?}", uk.page);
                        let sub = self.identify_page(
                            r,
                            lookup_offset,
                            &uk.page,
                            swap_endian ^ uk.swap_endian,
                            depth + 1,
                        );
                        out.extend(sub);
                    }
                }
                Kind::Switch(_) => {
                    // generator-only kind, never present in a parsed book
                    log::warn!("switch kind reached the interpreter, skipping");
                }
            }

            if success {
                log::trace!("|==> rule matched");
                if !rule.description.is_empty() {
                    out.push(rule.description.clone());
                }
                matched[rule.level] = true;
                ever_matched[rule.level] = true;
            } else {
                matched[rule.level] = false;
            }
        }

        log::debug!("done identifying at {page_offset} using page {page:?}");
        out
    }

    /// Resolves a rule's offset to an absolute target position. `None`
    /// means an indirect read failed and the rule is skipped.
    fn effective_offset(
        &self,
        r: &SliceReader,
        rule: &Rule,
        page_offset: i64,
        global_offset: i64,
        swap_endian: bool,
    ) -> Option<i64> {
        let mut lookup = match &rule.offset.value {
            OffsetValue::Direct(value) => value.wrapping_add(page_offset),
            OffsetValue::Indirect(ind) => self.indirect_offset(r, ind, global_offset, swap_endian)?,
        };
        if rule.offset.relative {
            lookup = lookup.wrapping_add(global_offset);
        }
        Some(lookup)
    }

    fn indirect_offset(
        &self,
        r: &SliceReader,
        ind: &Indirect,
        global_offset: i64,
        swap_endian: bool,
    ) -> Option<i64> {
        let mut address = ind.address;
        if ind.relative {
            address = address.wrapping_add(global_offset);
        }

        let endian = ind.endian.maybe_swapped(swap_endian);
        let base = match r.read_uint(address, ind.width, endian) {
            Some(value) => value as i64,
            None => {
                log::debug!("indirect read at {address} failed, skipping rule");
                return None;
            }
        };

        let adjust = match &ind.adjust {
            Some(adj) => {
                let value = if adj.relative {
                    let adjust_address = address.wrapping_add(adj.value);
                    match r.read_uint(adjust_address, ind.width, endian) {
                        Some(value) => value as i64,
                        None => {
                            log::debug!(
                                "indirect adjustment read at {adjust_address} failed, skipping rule"
                            );
                            return None;
                        }
                    }
                } else {
                    adj.value
                };
                Some((adj.op, value))
            }
            None => None,
        };

        match adjust {
            Some((ArithOp::Add, value)) => Some(base.wrapping_add(value)),
            Some((ArithOp::Sub, value)) => Some(base.wrapping_sub(value)),
            Some((ArithOp::Mul, value)) => Some(base.wrapping_mul(value)),
            Some((ArithOp::Div, value)) => match base.checked_div(value) {
                Some(result) => Some(result),
                None => {
                    log::debug!("indirect adjustment divides by zero, skipping rule");
                    None
                }
            },
            None => Some(base),
        }
    }

    /// Reads, masks and adjusts the value an integer rule compares.
    fn integer_value(
        &self,
        r: &SliceReader,
        ik: &IntegerKind,
        offset: i64,
        swap_endian: bool,
    ) -> Option<u64> {
        let endian = ik.endian.maybe_swapped(swap_endian);
        let mut value = match r.read_uint(offset, ik.width, endian) {
            Some(value) => value,
            None => {
                log::debug!("integer read at {offset} failed, rule does not match");
                return None;
            }
        };

        if let Some(mask) = ik.and_mask {
            value &= mask;
        }

        if let Some((op, operand)) = ik.adjust {
            value = match op {
                ArithOp::Add => value.wrapping_add(operand as u64),
                ArithOp::Sub => value.wrapping_sub(operand as u64),
                ArithOp::Mul => value.wrapping_mul(operand as u64),
                ArithOp::Div => match (value as i64).checked_div(operand) {
                    Some(result) => result as u64,
                    None => {
                        log::debug!("integer adjustment divides by zero, rule does not match");
                        return None;
                    }
                },
            };
        }

        Some(value)
    }
}

fn integer_test(ik: &IntegerKind, value: u64) -> bool {
    match ik.test {
        IntegerTest::Equal => value == ik.value as u64,
        IntegerTest::NotEqual => value != ik.value as u64,
        IntegerTest::LessThan => {
            if ik.signed {
                signed_in_width(value, ik.width) < ik.value
            } else {
                value < ik.value as u64
            }
        }
        IntegerTest::GreaterThan => {
            if ik.signed {
                signed_in_width(value, ik.width) > ik.value
            } else {
                value > ik.value as u64
            }
        }
    }
}

/// Reinterprets a read value as a signed integer of the declared width.
fn signed_in_width(value: u64, width: u8) -> i64 {
    match width {
        1 => i64::from(value as i8),
        2 => i64::from(value as i16),
        4 => i64::from(value as i32),
        _ => value as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runic_rules::ParseContext;

    fn identify(rules: &str, target: &[u8]) -> Vec<String> {
        let mut book = Spellbook::new();
        ParseContext::new().parse_str("test", rules, &mut book).unwrap();
        let reader = SliceReader::new(target);
        Interpreter::new(&book).identify(&reader)
    }

    #[test]
    fn test_gif_detection() {
        let rules = "\
0 string GIF8 GIF image data
>4 string 7a \\b, version 8%s
";
        let out = identify(rules, b"GIF87a-some-image");
        assert_eq!(out, vec!["GIF image data", "\\b, version 8%s"]);
    }

    #[test]
    fn test_masked_integer() {
        let rules = "0 ulelong&0x0000FFFF =0x4D5A possible MZ\n";
        assert!(identify(rules, &[0x4D, 0x5A, 0, 0]).is_empty());
        assert_eq!(identify(rules, &[0x5A, 0x4D, 0, 0]), vec!["possible MZ"]);
    }

    #[test]
    fn test_indirect_offset() {
        let rules = "\
0 string FOO foo
>(4.l) byte =0x01 version 1
";
        let mut target = vec![0u8; 16];
        target[..3].copy_from_slice(b"FOO");
        target[4..8].copy_from_slice(&8u32.to_le_bytes());
        target[8] = 0x01;
        assert_eq!(identify(rules, &target), vec!["foo", "version 1"]);

        target[8] = 0x02;
        assert_eq!(identify(rules, &target), vec!["foo"]);
    }

    #[test]
    fn test_default_rule() {
        let rules = "\
0 byte x kind
>0 byte =1 A
>0 byte =2 B
>0 default x other
";
        assert_eq!(identify(rules, &[3]), vec!["kind", "other"]);
        assert_eq!(identify(rules, &[1]), vec!["kind", "A"]);
        assert_eq!(identify(rules, &[2]), vec!["kind", "B"]);
    }

    #[test]
    fn test_clear_rearms_default() {
        let rules = "\
0 byte x kind
>0 byte =1 one
>0 clear x
>0 default x fallback
";
        // the byte matched, but clear resets the level state, so the
        // default fires again
        assert_eq!(identify(rules, &[1]), vec!["kind", "one", "fallback"]);
    }

    #[test]
    fn test_search_with_flags() {
        // lowercase pattern letters match both cases under /c
        let rules = "0 search/256/c \"hello, world\" greeting\n";
        assert_eq!(identify(rules, b"... Hello, World ..."), vec!["greeting"]);
        assert_eq!(identify(rules, b"... hello, world ..."), vec!["greeting"]);
        assert!(identify(rules, b"... goodbye ...").is_empty());
    }

    #[test]
    fn test_search_updates_global_offset() {
        let rules = "\
0 search AB found
>&0 string CD and more
";
        assert_eq!(identify(rules, b"xxABCD"), vec!["found", "and more"]);
        assert_eq!(identify(rules, b"xxABxx"), vec!["found"]);
    }

    #[test]
    fn test_use_with_endian_swap() {
        let rules = "\
0 lelong x be header follows
>0 use ^hdr
0 name hdr
>0 short =0x1234 little matches
";
        // the page declares a little-endian short, the swap makes the
        // read big-endian
        let out = identify(rules, &[0x12, 0x34, 0, 0]);
        assert_eq!(out, vec!["be header follows", "little matches"]);
        assert!(identify(rules, &[0x34, 0x12, 0, 0]) == vec!["be header follows".to_string()]);
    }

    #[test]
    fn test_endian_swap_symmetry() {
        // a big-endian rule under swap behaves like its little-endian twin
        let be_swapped = "\
0 byte x head
>0 use ^page-be
0 name page-be
>0 beshort =0x1234 match
";
        let le_plain = "\
0 byte x head
>0 use page-le
0 name page-le
>0 leshort =0x1234 match
";
        let target = [0x34, 0x12];
        assert_eq!(identify(be_swapped, &target), identify(le_plain, &target));
    }

    #[test]
    fn test_hierarchy_guard() {
        let rules = "\
0 string AA top
>>2 string BB never reached
";
        // the level-2 rule has no matched level-1 ancestor
        assert_eq!(identify(rules, b"AABB"), vec!["top"]);
    }

    #[test]
    fn test_deeper_match_cutoff() {
        let rules = "\
0 string AA first
>>0 byte x unreachable
0 string AA again
";
        // no level-1 rule matched, so the level-2 rule is skipped and the
        // second top-level rule still runs
        assert_eq!(identify(rules, b"AA"), vec!["first", "again"]);

        let rules = "\
0 string AA first
>2 string BB deep
0 string AA again
";
        // once the nested rule matches, later top-level rules are cut off
        assert_eq!(identify(rules, b"AABB"), vec!["first", "deep"]);
    }

    #[test]
    fn test_out_of_bounds_skipped() {
        let rules = "\
0 string AA found
>100 byte x far away
";
        assert_eq!(identify(rules, b"AA"), vec!["found"]);
        // even a match-any rule needs an in-bounds offset
        assert!(identify("0 byte x anything\n", b"").is_empty());
    }

    #[test]
    fn test_negated_string() {
        let rules = "0 string !MZ not a DOS executable\n";
        assert_eq!(identify(rules, b"ELF!"), vec!["not a DOS executable"]);
        assert!(identify(rules, b"MZ..").is_empty());
    }

    #[test]
    fn test_relative_continuation() {
        // the second child is relative to where the first match ended
        let rules = "\
0 string AB header
>&0 string CD second
>&0 string EF third
";
        assert_eq!(identify(rules, b"ABCDEF"), vec!["header", "second", "third"]);
    }

    #[test]
    fn test_indirect_relative_adjustment() {
        let rules = "0 string FO base\n>(0.b+(1)) byte =0x42 adjusted\n";
        // base byte at 0 is 'F' (0x46); adjustment read at 0+1 is 'O'
        // (0x4F); position 0x46+0x4F = 0x95
        let mut target = vec![0u8; 0xA0];
        target[0] = b'F';
        target[1] = b'O';
        target[0x95] = 0x42;
        assert_eq!(identify(rules, &target), vec!["base", "adjusted"]);
    }

    #[test]
    fn test_unknown_page_is_empty() {
        let rules = "\
0 byte x head
>0 use nowhere
>0 byte x tail
";
        assert_eq!(identify(rules, &[1]), vec!["head", "tail"]);
    }

    #[test]
    fn test_signed_comparison() {
        let rules = "0 byte <0 negative byte\n";
        assert_eq!(identify(rules, &[0xFF]), vec!["negative byte"]);
        assert!(identify(rules, &[0x7F]).is_empty());

        let rules = "0 ubyte >200 large unsigned\n";
        assert_eq!(identify(rules, &[0xFF]), vec!["large unsigned"]);
    }

    #[test]
    fn test_integer_adjustment() {
        let rules = "0 byte+1 =0x10 off by one\n";
        assert_eq!(identify(rules, &[0x0F]), vec!["off by one"]);
        assert!(identify(rules, &[0x10]).is_empty());
    }

    #[test]
    fn test_order_preservation() {
        let rules = "\
0 byte x one
0 byte x two
0 byte x three
";
        assert_eq!(identify(rules, &[0]), vec!["one", "two", "three"]);
    }
}
