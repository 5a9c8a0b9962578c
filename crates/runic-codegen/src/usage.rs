//! Usage analysis: which page variants the generated code can reach.
//!
//! The root page is emitted in its normal variant; every `use` edge
//! propagates the effective swap flag (current variant XOR the rule's
//! own swap) to its target, transitively. Pages with neither variant
//! reachable are not emitted at all.

use std::collections::HashMap;

use runic_rules::{Kind, Spellbook};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageUsage {
    pub normal: bool,
    pub swapped: bool,
}

impl PageUsage {
    pub fn variant(&self, swapped: bool) -> bool {
        if swapped {
            self.swapped
        } else {
            self.normal
        }
    }

    fn mark(&mut self, swapped: bool) -> bool {
        let seen = self.variant(swapped);
        if swapped {
            self.swapped = true;
        } else {
            self.normal = true;
        }
        !seen
    }
}

/// Fix-point over the book's `use` edges.
pub fn compute_usage(book: &Spellbook) -> HashMap<String, PageUsage> {
    let mut usages: HashMap<String, PageUsage> = HashMap::new();
    let mut worklist: Vec<(String, bool)> = Vec::new();

    usages.entry(String::new()).or_default().mark(false);
    worklist.push((String::new(), false));

    while let Some((page, swapped)) = worklist.pop() {
        for rule in book.rules(&page) {
            if let Kind::Use(uk) = &rule.kind {
                let target_swapped = swapped ^ uk.swap_endian;
                if usages.entry(uk.page.clone()).or_default().mark(target_swapped) {
                    worklist.push((uk.page.clone(), target_swapped));
                }
            }
        }
    }

    usages
}

#[cfg(test)]
mod tests {
    use super::*;
    use runic_rules::ParseContext;

    fn usage_of(rules: &str) -> HashMap<String, PageUsage> {
        let mut book = Spellbook::new();
        ParseContext::new().parse_str("test", rules, &mut book).unwrap();
        compute_usage(&book)
    }

    #[test]
    fn test_root_is_normal_only() {
        let usages = usage_of("0 byte x top\n");
        assert_eq!(usages[""], PageUsage { normal: true, swapped: false });
    }

    #[test]
    fn test_use_propagates_swap() {
        let usages = usage_of(
            "\
0 byte x top
>0 use ^hdr
0 name hdr
>0 short =1 s
",
        );
        assert_eq!(usages["hdr"], PageUsage { normal: false, swapped: true });
    }

    #[test]
    fn test_swap_xor_chains() {
        // root -> ^a -> ^b means b is reached with the swaps cancelled
        let usages = usage_of(
            "\
0 byte x top
>0 use ^page-a
0 name page-a
>0 use ^page-b
0 name page-b
>0 byte =1 leaf
",
        );
        assert_eq!(usages["page-a"], PageUsage { normal: false, swapped: true });
        assert_eq!(usages["page-b"], PageUsage { normal: true, swapped: false });
    }

    #[test]
    fn test_unreferenced_page_unused() {
        let usages = usage_of(
            "\
0 byte x top
0 name lonely
>0 byte =1 leaf
",
        );
        assert!(!usages.contains_key("lonely"));
    }

    #[test]
    fn test_both_variants_reachable() {
        let usages = usage_of(
            "\
0 byte x top
>0 use hdr
>0 use ^hdr
0 name hdr
>0 short =1 s
",
        );
        assert_eq!(usages["hdr"], PageUsage { normal: true, swapped: true });
    }

    #[test]
    fn test_cycles_terminate() {
        let usages = usage_of(
            "\
0 name page-a
>0 use ^page-b
0 name page-b
>0 use ^page-a
0 byte x top
>0 use page-a
",
        );
        // the two swaps cancel around the cycle, so each page keeps a
        // single variant
        assert_eq!(usages["page-a"], PageUsage { normal: true, swapped: false });
        assert_eq!(usages["page-b"], PageUsage { normal: false, swapped: true });
    }
}
