//! Tree construction over the flat rule list, and switch coalescing.

use runic_rules::{IntegerTest, Kind, Rule, SwitchCase, SwitchKind};

/// One rule with its nested children, plus the id its failure label is
/// synthesised from.
#[derive(Debug, Clone)]
pub struct RuleNode {
    pub id: u64,
    pub rule: Rule,
    pub children: Vec<RuleNode>,
}

/// Re-parents the flat list into trees: each rule attaches to the
/// nearest preceding rule whose level is exactly one less. Rules whose
/// level jumps past their context are dropped with a warning.
pub fn treeify(rules: &[Rule]) -> Vec<RuleNode> {
    let mut roots: Vec<RuleNode> = Vec::new();
    let mut stack: Vec<RuleNode> = Vec::new();
    let mut next_id: u64 = 0;

    fn attach(roots: &mut Vec<RuleNode>, stack: &mut [RuleNode], node: RuleNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    for rule in rules {
        while stack.len() > rule.level {
            let done = stack.pop().expect("stack is non-empty");
            attach(&mut roots, &mut stack, done);
        }
        if rule.level > stack.len() {
            log::warn!("rule skips a nesting level, dropping: {}", rule.line);
            continue;
        }
        next_id += 1;
        stack.push(RuleNode {
            id: next_id,
            rule: rule.clone(),
            children: Vec::new(),
        });
    }

    while let Some(done) = stack.pop() {
        attach(&mut roots, &mut stack, done);
    }

    roots
}

/// Whether a node can join a switch run headed by `head`.
fn coalescible(head: &Rule, rule: &Rule) -> bool {
    let (head_ik, ik) = match (&head.kind, &rule.kind) {
        (Kind::Integer(a), Kind::Integer(b)) => (a, b),
        _ => return false,
    };
    ik.test == IntegerTest::Equal
        && !ik.match_any
        && ik.and_mask.is_none()
        && ik.adjust.is_none()
        && ik.width == head_ik.width
        && ik.endian == head_ik.endian
        && ik.signed == head_ik.signed
        && rule.offset == head.offset
        && !rule.offset.reads_global()
}

fn qualifies_alone(node: &RuleNode) -> bool {
    if !node.children.is_empty() {
        return false;
    }
    match &node.rule.kind {
        Kind::Integer(ik) => {
            ik.test == IntegerTest::Equal
                && !ik.match_any
                && ik.and_mask.is_none()
                && ik.adjust.is_none()
                && !node.rule.offset.reads_global()
        }
        _ => false,
    }
}

/// Replaces runs of two or more consecutive sibling equality tests on
/// one offset with a single switch node, then recurses into the
/// children that remain.
pub fn switchify(node: &mut RuleNode) {
    node.children = coalesce(std::mem::take(&mut node.children));
    for child in &mut node.children {
        switchify(child);
    }
}

fn coalesce(children: Vec<RuleNode>) -> Vec<RuleNode> {
    let mut out: Vec<RuleNode> = Vec::new();
    let mut run: Vec<RuleNode> = Vec::new();

    fn flush(out: &mut Vec<RuleNode>, run: &mut Vec<RuleNode>) {
        if run.len() < 2 {
            out.append(run);
            return;
        }
        let mut values: Vec<i64> = Vec::with_capacity(run.len());
        for node in run.iter() {
            if let Kind::Integer(ik) = &node.rule.kind {
                values.push(ik.value);
            }
        }
        let mut distinct = values.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != values.len() {
            // duplicate case values would change first-match semantics
            out.append(run);
            return;
        }

        let head = &run[0];
        let head_ik = match &head.rule.kind {
            Kind::Integer(ik) => ik.clone(),
            _ => unreachable!("switch runs hold integer rules"),
        };
        let cases = run
            .iter()
            .map(|node| SwitchCase {
                value: match &node.rule.kind {
                    Kind::Integer(ik) => ik.value,
                    _ => unreachable!("switch runs hold integer rules"),
                },
                description: node.rule.description.clone(),
            })
            .collect();

        let switch = RuleNode {
            id: head.id,
            rule: Rule {
                level: head.rule.level,
                offset: head.rule.offset.clone(),
                kind: Kind::Switch(SwitchKind {
                    width: head_ik.width,
                    endian: head_ik.endian,
                    signed: head_ik.signed,
                    cases,
                }),
                description: String::new(),
                line: head.rule.line.clone(),
            },
            children: Vec::new(),
        };
        run.clear();
        out.push(switch);
    }

    for child in children {
        let joins = qualifies_alone(&child)
            && (run.is_empty() || coalescible(&run[0].rule, &child.rule));
        if joins {
            run.push(child);
        } else {
            flush(&mut out, &mut run);
            // the child may head a new run itself
            if qualifies_alone(&child) {
                run.push(child);
            } else {
                out.push(child);
            }
        }
    }
    flush(&mut out, &mut run);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use runic_rules::{ParseContext, Spellbook};

    fn nodes(rules: &str) -> Vec<RuleNode> {
        let mut book = Spellbook::new();
        ParseContext::new().parse_str("test", rules, &mut book).unwrap();
        treeify(book.rules(""))
    }

    #[test]
    fn test_treeify_shapes() {
        let roots = nodes(
            "\
0 string A a
>4 string B b
>>8 string C c
>4 string D d
0 string E e
",
        );
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].children.len(), 2);
        assert_eq!(roots[0].children[0].children.len(), 1);
        assert_eq!(roots[1].children.len(), 0);
        assert_eq!(roots[1].rule.description, "e");
    }

    #[test]
    fn test_treeify_ids_are_sequential() {
        let roots = nodes("0 string A a\n>4 string B b\n0 string C c\n");
        assert_eq!(roots[0].id, 1);
        assert_eq!(roots[0].children[0].id, 2);
        assert_eq!(roots[1].id, 3);
    }

    #[test]
    fn test_treeify_drops_orphans() {
        let roots = nodes("0 string A a\n>>8 string C gap\n0 string E e\n");
        assert_eq!(roots.len(), 2);
        assert!(roots[0].children.is_empty());
    }

    #[test]
    fn test_switchify_coalesces_run() {
        let mut roots = nodes(
            "\
0 byte x kind
>0 byte =1 one
>0 byte =2 two
>0 byte =3 three
",
        );
        switchify(&mut roots[0]);
        assert_eq!(roots[0].children.len(), 1);
        match &roots[0].children[0].rule.kind {
            Kind::Switch(sk) => {
                assert_eq!(sk.width, 1);
                let values: Vec<i64> = sk.cases.iter().map(|c| c.value).collect();
                assert_eq!(values, vec![1, 2, 3]);
                assert_eq!(sk.cases[2].description, "three");
            }
            other => panic!("expected switch kind, got {other:?}"),
        }
    }

    #[test]
    fn test_switchify_needs_two() {
        let mut roots = nodes("0 byte x kind\n>0 byte =1 one\n");
        switchify(&mut roots[0]);
        assert!(matches!(
            roots[0].children[0].rule.kind,
            Kind::Integer(_)
        ));
    }

    #[test]
    fn test_switchify_respects_offsets_and_children() {
        // differing offsets break the run
        let mut roots = nodes("0 byte x kind\n>0 byte =1 one\n>1 byte =2 two\n");
        switchify(&mut roots[0]);
        assert_eq!(roots[0].children.len(), 2);

        // a child under a candidate keeps it out of the run
        let mut roots = nodes(
            "\
0 byte x kind
>0 byte =1 one
>>1 byte x deep
>0 byte =2 two
",
        );
        switchify(&mut roots[0]);
        assert_eq!(roots[0].children.len(), 2);
        assert!(matches!(roots[0].children[0].rule.kind, Kind::Integer(_)));
    }

    #[test]
    fn test_switchify_rejects_duplicate_values() {
        let mut roots = nodes("0 byte x kind\n>0 byte =1 one\n>0 byte =1 also one\n");
        switchify(&mut roots[0]);
        assert_eq!(roots[0].children.len(), 2);
    }

    #[test]
    fn test_switchify_rejects_relative_offsets() {
        let mut roots = nodes("0 byte x kind\n>&0 byte =1 one\n>&0 byte =2 two\n");
        switchify(&mut roots[0]);
        assert_eq!(roots[0].children.len(), 2);
    }

    #[test]
    fn test_switchify_splits_on_match_any() {
        let mut roots = nodes(
            "\
0 byte x kind
>0 byte =1 one
>0 byte x anything
>0 byte =2 two
",
        );
        switchify(&mut roots[0]);
        // the runs around the match-any rule are both too short
        assert_eq!(roots[0].children.len(), 3);
    }
}
