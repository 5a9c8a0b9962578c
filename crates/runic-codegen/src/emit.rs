//! Emission of the generated evaluator source.
//!
//! Each page variant becomes one entry function; each rule becomes a
//! labelled block that either falls through to its children or breaks to
//! its own failure label. The generated code mirrors the interpreter's
//! semantics statement for statement: offset resolution, bounds check,
//! kind test, description, ever-matched tracking, then children.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use runic_rules::{
    ArithOp, Endian, Indirect, IntegerKind, IntegerTest, Kind, OffsetValue, Rule, Spellbook,
};
use tempfile::NamedTempFile;

use crate::expr::Expr;
use crate::tree::{switchify, treeify, RuleNode};
use crate::usage::compute_usage;
use crate::{CodegenError, CodegenResult};

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Generated rules print their source line as they match.
    pub chatty: bool,
    /// Emit each rule's source line as a comment above its block.
    pub comments: bool,
    /// Crate path the generated file imports the runtime helpers from.
    pub runtime_path: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            chatty: false,
            comments: false,
            runtime_path: "runic_runtime".to_string(),
        }
    }
}

/// Generates the evaluator and writes it to `output` atomically: the
/// source is buffered in full and lands via a temp-file rename, so a
/// failed run never leaves partial output. Returns the byte size.
pub fn compile(book: &Spellbook, output: &Path, opts: &CodegenOptions) -> CodegenResult<u64> {
    let source = generate(book, opts)?;

    let io_err = |source: std::io::Error| CodegenError::Io {
        path: output.to_path_buf(),
        source,
    };

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(source.as_bytes()).map_err(io_err)?;
    tmp.persist(output).map_err(|e| io_err(e.error))?;

    log::debug!("generated {} bytes into {:?}", source.len(), output);
    Ok(source.len() as u64)
}

/// Generates the complete evaluator source in memory.
pub fn generate(book: &Spellbook, opts: &CodegenOptions) -> CodegenResult<String> {
    let mut e = Emitter::new();

    e.line("// Code generated by runic from a set of magic rules.");
    e.line("// You probably do not want to edit it by hand.");
    e.blank();
    e.line("#![allow(non_snake_case)]");
    e.line("#![allow(unused_assignments, unused_labels, unused_mut, unused_parens)]");
    e.line("#![allow(unused_variables, unreachable_code, dead_code)]");
    e.blank();
    e.line(&format!(
        "use {}::{{SliceReader, search_test as ht, string_test as gt}};",
        opts.runtime_path
    ));
    e.blank();

    for width in [1u8, 2, 4, 8] {
        for endian in [Endian::Little, Endian::Big] {
            emit_read_helper(&mut e, width, endian);
        }
    }

    e.line("fn deeper(em: &[bool; 32], level: usize) -> bool {");
    e.indent += 1;
    e.line("em[level + 1..].iter().any(|&m| m)");
    e.indent -= 1;
    e.line("}");
    e.blank();

    let usages = compute_usage(book);

    for page in book.page_names() {
        let mut roots = treeify(book.rules(page));
        for root in &mut roots {
            switchify(root);
        }
        let gf_later = gf_needed_after(&roots);

        let usage = usages.get(page).copied().unwrap_or_default();
        for swapped in [false, true] {
            if !usage.variant(swapped) {
                continue;
            }
            emit_page(&mut e, book, page, &roots, &gf_later, swapped, opts)?;
        }
    }

    Ok(e.finish())
}

fn emit_read_helper(e: &mut Emitter, width: u8, endian: Endian) {
    let letter = endian_letter(endian);
    e.line(&format!(
        "// reads an unsigned {}-bit {} integer",
        width * 8,
        endian
    ));
    e.line(&format!(
        "fn f{width}{letter}(r: &SliceReader, off: i64) -> (u64, bool) {{"
    ));
    e.indent += 1;
    e.line(&format!("let mut tb = [0u8; {width}];"));
    e.line(&format!("if r.read_at(&mut tb, off) < {width} {{ return (0, false); }}"));
    let convert = match (width, endian) {
        (1, _) => "u64::from(tb[0])".to_string(),
        (2, Endian::Little) => "u64::from(u16::from_le_bytes(tb))".to_string(),
        (2, Endian::Big) => "u64::from(u16::from_be_bytes(tb))".to_string(),
        (4, Endian::Little) => "u64::from(u32::from_le_bytes(tb))".to_string(),
        (4, Endian::Big) => "u64::from(u32::from_be_bytes(tb))".to_string(),
        (8, Endian::Little) => "u64::from_le_bytes(tb)".to_string(),
        _ => "u64::from_be_bytes(tb)".to_string(),
    };
    e.line(&format!("({convert}, true)"));
    e.indent -= 1;
    e.line("}");
    e.blank();
}

fn emit_page(
    e: &mut Emitter,
    book: &Spellbook,
    page: &str,
    roots: &[RuleNode],
    gf_later: &HashMap<u64, bool>,
    swapped: bool,
    opts: &CodegenOptions,
) -> CodegenResult<()> {
    e.line(&format!(
        "pub fn {}(r: &SliceReader, po: i64) -> Vec<String> {{",
        page_symbol(page, swapped)
    ));
    e.indent += 1;
    e.line("let mut out: Vec<String> = Vec::new();");
    e.line("let mut gf: i64 = 0;");
    e.line("let mut ro: i64 = 0;");
    e.line("let mut ra: u64 = 0;");
    e.line("let mut rb: u64 = 0;");
    e.line("let mut rc: u64 = 0;");
    e.line("let mut rs: i64 = 0;");
    e.line("let mut k = false;");
    e.line("let mut l = false;");
    e.line("let mut m = false;");
    e.line("let mut em = [false; 32];");
    e.line("let mut d = [false; 32];");

    for root in roots {
        e.blank();
        emit_node(e, book, root, None, None, gf_later, swapped, opts)?;
    }

    e.blank();
    e.line("out");
    e.indent -= 1;
    e.line("}");
    e.blank();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_node(
    e: &mut Emitter,
    book: &Spellbook,
    node: &RuleNode,
    marker: Option<usize>,
    prev: Option<&RuleNode>,
    gf_later: &HashMap<u64, bool>,
    swapped: bool,
    opts: &CodegenOptions,
) -> CodegenResult<()> {
    let rule = &node.rule;
    let label = format!("'f{:x}", node.id);

    if opts.comments {
        e.line(&format!("// {}", rule.line));
    }
    e.line(&format!("{label}: {{"));
    e.indent += 1;

    // a deeper level has committed to a branch; the page is done
    e.line(&format!("if deeper(&em, {}) {{ return out; }}", rule.level));

    // offset resolution; a structurally equal previous sibling already
    // holds it in `ro`, unless it moved the global offset under us
    let reuse = prev.is_some_and(|p| {
        p.rule.offset == rule.offset && !(writes_gf(p, gf_later) && rule.offset.reads_global())
    });

    let mut poisoned = false;
    match &rule.offset.value {
        OffsetValue::Direct(value) => {
            if !reuse {
                let mut off = Expr::add(Expr::Var("po"), Expr::Lit(*value));
                if rule.offset.relative {
                    off = Expr::add(off, Expr::Var("gf"));
                }
                e.line(&format!("ro = {};", off.fold()));
            }
        }
        OffsetValue::Indirect(ind) => {
            poisoned = emit_indirect_offset(e, &label, rule, ind, reuse, swapped);
        }
    }

    if !poisoned {
        e.line(&format!("if ro < 0 || ro >= r.size() {{ break {label}; }}"));
        emit_kind(e, book, node, marker, prev, gf_later, swapped, opts, &label, reuse)?;
    }

    e.indent -= 1;
    e.line("}");
    Ok(())
}

/// Emits the dereference for an indirect offset. Returns true when the
/// offset can never resolve (a zero literal divisor) and the node was
/// lowered to an unconditional failure.
fn emit_indirect_offset(
    e: &mut Emitter,
    label: &str,
    rule: &Rule,
    ind: &Indirect,
    reuse: bool,
    swapped: bool,
) -> bool {
    let letter = endian_letter(ind.endian.maybe_swapped(swapped));

    let mut address = Expr::Lit(ind.address);
    if ind.relative {
        address = Expr::add(address, Expr::Var("gf"));
    }
    let address = address.fold();

    if !reuse {
        e.line(&format!("(ra, k) = f{}{letter}(r, {address});", ind.width));
    }
    e.line(&format!("if !k {{ break {label}; }}"));

    let mut adjust_operand = None;
    if let Some(adjust) = &ind.adjust {
        if adjust.relative {
            let adjust_address = Expr::add(address.clone(), Expr::Lit(adjust.value)).fold();
            if !reuse {
                e.line(&format!(
                    "(rb, l) = f{}{letter}(r, {adjust_address});",
                    ind.width
                ));
            }
            e.line(&format!("if !l {{ break {label}; }}"));
            if adjust.op == ArithOp::Div {
                e.line(&format!("if rb == 0 {{ break {label}; }}"));
            }
            adjust_operand = Some((adjust.op, Expr::Var("(rb as i64)")));
        } else {
            if adjust.op == ArithOp::Div && adjust.value == 0 {
                e.line("// offset adjustment divides by zero");
                e.line(&format!("break {label};"));
                return true;
            }
            adjust_operand = Some((adjust.op, Expr::Lit(adjust.value)));
        }
    }

    if !reuse {
        let mut off = Expr::Var("(ra as i64)");
        if let Some((op, operand)) = adjust_operand {
            off = Expr::bin(op, off, operand);
        }
        if rule.offset.relative {
            off = Expr::add(off, Expr::Var("gf"));
        }
        e.line(&format!("ro = {};", off.fold()));
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn emit_kind(
    e: &mut Emitter,
    book: &Spellbook,
    node: &RuleNode,
    marker: Option<usize>,
    prev: Option<&RuleNode>,
    gf_later: &HashMap<u64, bool>,
    swapped: bool,
    opts: &CodegenOptions,
    label: &str,
    offset_reused: bool,
) -> CodegenResult<()> {
    let rule = &node.rule;
    let write_gf = writes_gf(node, gf_later);

    match &rule.kind {
        Kind::Integer(ik) => {
            if !ik.match_any {
                if let Some((op, value)) = ik.adjust {
                    if op == ArithOp::Div && value == 0 {
                        e.line("// integer adjustment divides by zero");
                        e.line(&format!("break {label};"));
                        return Ok(());
                    }
                }

                let reuse_value = offset_reused
                    && prev.is_some_and(|p| match &p.rule.kind {
                        Kind::Integer(pik) => {
                            !pik.match_any && pik.width == ik.width && pik.endian == ik.endian
                        }
                        _ => false,
                    });
                if !reuse_value {
                    e.line(&format!(
                        "(rc, m) = f{}{}(r, ro);",
                        ik.width,
                        endian_letter(ik.endian.maybe_swapped(swapped))
                    ));
                }
                let test = integer_condition(ik);
                e.line(&format!("if !(m && {test}) {{ break {label}; }}"));
                if write_gf {
                    let gf = Expr::add(Expr::Var("ro"), Expr::Lit(i64::from(ik.width))).fold();
                    e.line(&format!("gf = {gf};"));
                }
            }
        }
        Kind::Switch(sk) => {
            e.line(&format!(
                "(rc, m) = f{}{}(r, ro);",
                sk.width,
                endian_letter(sk.endian.maybe_swapped(swapped))
            ));
            e.line(&format!("if !m {{ break {label}; }}"));
            e.line("match rc {");
            e.indent += 1;
            for case in &sk.cases {
                if case.description.is_empty() {
                    e.line(&format!("{} => {{}}", case.value as u64));
                } else {
                    e.line(&format!(
                        "{} => out.push({}.to_string()),",
                        case.value as u64,
                        string_literal(&case.description)
                    ));
                }
            }
            e.line(&format!("_ => break {label},"));
            e.indent -= 1;
            e.line("}");
            if write_gf {
                e.line(&format!("gf = ro + {};", sk.width));
            }
        }
        Kind::String(sk) => {
            e.line(&format!(
                "rs = gt(r, ro, {}, {});",
                byte_string_literal(&sk.pattern),
                sk.flags
            ));
            if sk.negate {
                e.line(&format!("if rs >= 0 {{ break {label}; }}"));
            } else {
                e.line(&format!("if rs < 0 {{ break {label}; }}"));
                if write_gf {
                    e.line("gf = ro + rs;");
                }
            }
        }
        Kind::Search(sk) => {
            e.line(&format!(
                "rs = ht(r, ro, {}, {}, {});",
                sk.max_len,
                byte_string_literal(&sk.pattern),
                sk.flags
            ));
            e.line(&format!("if rs < 0 {{ break {label}; }}"));
            if write_gf {
                e.line(&format!("gf = ro + rs + {};", sk.pattern.len()));
            }
        }
        Kind::Use(uk) => {
            if book.contains_page(&uk.page) {
                e.line(&format!(
                    "out.extend({}(r, ro));",
                    page_symbol(&uk.page, swapped ^ uk.swap_endian)
                ));
            } else {
                e.line(&format!("// use of unknown page {:?}", uk.page));
            }
            if opts.chatty {
                e.line(&format!("println!(\"{{}}\", {});", string_literal(&rule.line)));
            }
            e.line(&format!("break {label};"));
            return Ok(());
        }
        Kind::Name(_) => {
            // the page's declaration; nothing to test
        }
        Kind::Default => {
            let level = marker.ok_or_else(|| CodegenError::MissingDefaultMarker {
                line: rule.line.clone(),
            })?;
            e.line(&format!("if d[{level}] {{ break {label}; }}"));
        }
        Kind::Clear => {
            let level = marker.ok_or_else(|| CodegenError::MissingDefaultMarker {
                line: rule.line.clone(),
            })?;
            e.line(&format!("d[{level}] = false;"));
            e.line(&format!("em[{}] = false;", rule.level));
            if opts.chatty {
                e.line(&format!("println!(\"{{}}\", {});", string_literal(&rule.line)));
            }
            e.line(&format!("break {label};"));
            return Ok(());
        }
    }

    if opts.chatty {
        e.line(&format!("println!(\"{{}}\", {});", string_literal(&rule.line)));
    }
    if !rule.description.is_empty() {
        e.line(&format!(
            "out.push({}.to_string());",
            string_literal(&rule.description)
        ));
    }
    e.line(&format!("em[{}] = true;", rule.level));

    if !node.children.is_empty() {
        let child_marker = node
            .children
            .iter()
            .any(|child| matches!(child.rule.kind, Kind::Default | Kind::Clear))
            .then_some(rule.level);
        if let Some(level) = child_marker {
            e.line(&format!("d[{level}] = false;"));
        }

        let mut prev_sibling = node;
        for child in &node.children {
            emit_node(e, book, child, child_marker, Some(prev_sibling), gf_later, swapped, opts)?;
            prev_sibling = child;
        }
    }

    if let Some(level) = marker {
        e.line(&format!("d[{level}] = true;"));
    }

    Ok(())
}

/// The boolean test an integer rule compiles to, mirroring the
/// interpreter's mask-adjust-compare pipeline on the raw read value.
fn integer_condition(ik: &IntegerKind) -> String {
    let mut lhs = "rc".to_string();
    if let Some(mask) = ik.and_mask {
        lhs = format!("(rc & {mask})");
    }
    if let Some((op, value)) = ik.adjust {
        lhs = match op {
            ArithOp::Add => format!("{lhs}.wrapping_add({})", value as u64),
            ArithOp::Sub => format!("{lhs}.wrapping_sub({})", value as u64),
            ArithOp::Mul => format!("{lhs}.wrapping_mul({})", value as u64),
            ArithOp::Div => format!("((({lhs} as i64) / {value}) as u64)"),
        };
    }

    match ik.test {
        IntegerTest::Equal => format!("{lhs} == {}", ik.value as u64),
        IntegerTest::NotEqual => format!("{lhs} != {}", ik.value as u64),
        IntegerTest::LessThan | IntegerTest::GreaterThan => {
            let symbol = if ik.test == IntegerTest::LessThan { "<" } else { ">" };
            if ik.signed {
                let cast = match ik.width {
                    1 => format!("(({lhs} as i8) as i64)"),
                    2 => format!("(({lhs} as i16) as i64)"),
                    4 => format!("(({lhs} as i32) as i64)"),
                    _ => format!("({lhs} as i64)"),
                };
                format!("{cast} {symbol} {}", ik.value)
            } else {
                format!("{lhs} {symbol} {}", ik.value as u64)
            }
        }
    }
}

/// Whether this node's success path assigns the frame's global offset.
fn writes_gf(node: &RuleNode, gf_later: &HashMap<u64, bool>) -> bool {
    if !gf_later.get(&node.id).copied().unwrap_or(false) {
        return false;
    }
    match &node.rule.kind {
        Kind::Integer(ik) => !ik.match_any,
        Kind::String(sk) => !sk.negate,
        Kind::Search(_) | Kind::Switch(_) => true,
        _ => false,
    }
}

/// For each node, whether any later rule of the page reads the global
/// offset. Sibling and cousin matches move it in the interpreter, so
/// "later" spans the whole page, not just the node's own children.
fn gf_needed_after(roots: &[RuleNode]) -> HashMap<u64, bool> {
    fn flatten<'a>(nodes: &'a [RuleNode], out: &mut Vec<&'a RuleNode>) {
        for node in nodes {
            out.push(node);
            flatten(&node.children, out);
        }
    }

    let mut order = Vec::new();
    flatten(roots, &mut order);

    let mut map = HashMap::new();
    let mut needed = false;
    for node in order.iter().rev() {
        map.insert(node.id, needed);
        needed |= node.rule.offset.reads_global();
    }
    map
}

fn page_symbol(page: &str, swapped: bool) -> String {
    let mut symbol = String::from("Identify");
    for token in page.split('-') {
        let mut chars = token.chars();
        if let Some(first) = chars.next() {
            let first = if first.is_ascii_alphanumeric() { first } else { '_' };
            symbol.extend(first.to_uppercase());
            for c in chars {
                symbol.push(if c.is_ascii_alphanumeric() { c } else { '_' });
            }
        }
    }
    if swapped {
        symbol.push_str("__Swapped");
    }
    symbol
}

fn endian_letter(endian: Endian) -> char {
    match endian {
        Endian::Little => 'l',
        Endian::Big => 'b',
    }
}

fn string_literal(s: &str) -> String {
    format!("\"{}\"", s.escape_default())
}

fn byte_string_literal(bytes: &[u8]) -> String {
    let mut out = String::from("b\"");
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

struct Emitter {
    buf: String,
    indent: usize,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            buf: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    fn blank(&mut self) {
        self.buf.push('\n');
    }

    fn finish(self) -> String {
        self.buf
    }
}
