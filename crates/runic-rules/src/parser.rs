use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use runic_runtime::{
    StringFlags, COMPACT_WHITESPACE, FORCE_BINARY, FORCE_TEXT, LOWER_MATCHES_BOTH, OPTIONAL_BLANKS,
    UPPER_MATCHES_BOTH,
};

use crate::model::{
    ArithOp, Endian, IntegerKind, IntegerTest, Kind, Offset, OffsetValue, Rule, SearchKind,
    Spellbook, StringKind, UseKind, MAX_LEVELS,
};
use crate::scan;

/// Window size of a `search` rule that gives no explicit count.
pub const DEFAULT_SEARCH_LEN: i64 = 8192;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{origin}:{line_no}: {message}")]
    Line {
        origin: String,
        line_no: usize,
        message: String,
    },
    #[error("failed to read rule source {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Parser entry point and policy.
///
/// Malformed lines are logged and skipped by default, so a partially
/// valid rule corpus still yields a usable book; `strict` elevates the
/// first bad line to an error instead.
#[derive(Debug, Default, Clone)]
pub struct ParseContext {
    pub strict: bool,
}

impl ParseContext {
    pub fn new() -> Self {
        ParseContext::default()
    }

    pub fn strict() -> Self {
        ParseContext { strict: true }
    }

    /// Parses rule text into `book`. `origin` names the source in
    /// diagnostics.
    pub fn parse_str(&self, origin: &str, input: &str, book: &mut Spellbook) -> ParseResult<()> {
        let mut page = String::new();
        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Ok(rule) => {
                    if rule.level == 0 {
                        page.clear();
                        if let Kind::Name(name) = &rule.kind {
                            page = name.clone();
                            // a later definition of a page wins outright
                            book.replace_page(&page, Vec::new());
                            log::debug!("{origin}:{line_no}: page [{page}]");
                        }
                    }
                    log::trace!("{origin}:{line_no}: {}", rule.line);
                    book.add_rule(&page, rule);
                }
                Err(message) => {
                    if self.strict {
                        return Err(ParseError::Line {
                            origin: origin.to_string(),
                            line_no,
                            message,
                        });
                    }
                    log::warn!("{origin}:{line_no}: skipping rule: {message}");
                }
            }
        }
        Ok(())
    }

    pub fn parse_file(&self, path: &Path, book: &mut Spellbook) -> ParseResult<()> {
        let input = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&path.display().to_string(), &input, book)
    }

    /// Parses a rule file, or every regular file of a rule directory in
    /// lexicographic name order.
    pub fn parse_path(&self, path: &Path, book: &mut Spellbook) -> ParseResult<()> {
        let meta = fs::metadata(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return self.parse_file(path, book);
        }

        let entries = fs::read_dir(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ParseError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let entry_path = entry.path();
            if entry_path.is_file() {
                files.push(entry_path);
            }
        }
        files.sort();

        for file in &files {
            self.parse_file(file, book)?;
        }
        Ok(())
    }
}

/// Escape-aware field cursor over one rule line.
///
/// A backslash keeps the following character inside the field, and a
/// double-quoted field keeps its blanks; the quotes themselves are
/// stripped.
struct Fields<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn skip_blanks(&mut self) {
        let bytes = self.line.as_bytes();
        while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\t') {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        self.skip_blanks();
        let bytes = self.line.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        if bytes[self.pos] == b'"' {
            self.pos += 1;
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos] != b'"' {
                if bytes[self.pos] == b'\\' && self.pos + 1 < bytes.len() {
                    self.pos += 1;
                }
                self.pos += 1;
            }
            let field = &self.line[start..self.pos];
            if self.pos < bytes.len() {
                self.pos += 1;
            }
            return Some(field);
        }

        let start = self.pos;
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\t' => break,
                b'\\' if self.pos + 1 < bytes.len() => self.pos += 2,
                _ => self.pos += 1,
            }
        }
        Some(&self.line[start..self.pos])
    }

    /// The remainder of the line past one blank run, verbatim.
    fn rest(&mut self) -> &'a str {
        self.skip_blanks();
        let rest = &self.line[self.pos..];
        self.pos = self.line.len();
        rest
    }
}

/// Partially parsed type field, before the test field gives it a value.
enum KindSpec {
    Integer {
        width: u8,
        endian: Endian,
        signed: bool,
        mask: Option<u64>,
        adjust: Option<(ArithOp, i64)>,
    },
    Str {
        flags: StringFlags,
    },
    Search {
        max_len: i64,
        flags: StringFlags,
    },
    Use,
    Name,
    Default,
    Clear,
}

fn parse_line(line: &str) -> Result<Rule, String> {
    let (level, pos) = parse_level(line);
    if level >= MAX_LEVELS {
        return Err(format!("nesting level {level} exceeds the maximum of {MAX_LEVELS}"));
    }

    let mut fields = Fields { line, pos };
    let offset_field = fields.next().ok_or("missing offset field")?;
    let type_field = fields.next().ok_or("missing type field")?;

    let offset = parse_offset(offset_field)?;
    let spec = parse_kind_field(type_field)?;

    let kind = match spec {
        KindSpec::Integer {
            width,
            endian,
            signed,
            mask,
            adjust,
        } => {
            let test_field = fields.next().ok_or("missing test field")?;
            let (test, value, match_any) = parse_integer_test(test_field)?;
            Kind::Integer(IntegerKind {
                width,
                endian,
                signed,
                match_any,
                and_mask: mask,
                adjust,
                test,
                value,
            })
        }
        KindSpec::Str { flags } => {
            let test_field = fields.next().ok_or("missing test field")?;
            let (negate, pattern_src) = match test_field.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, test_field),
            };
            let pattern = scan::decode_escapes(pattern_src);
            if pattern.is_empty() {
                return Err("empty string pattern".to_string());
            }
            Kind::String(StringKind {
                pattern,
                flags,
                negate,
            })
        }
        KindSpec::Search { max_len, flags } => {
            let test_field = fields.next().ok_or("missing test field")?;
            let pattern_src = match test_field.strip_prefix('!') {
                Some(rest) => {
                    log::warn!("negated search has no effect, ignoring '!'");
                    rest
                }
                None => test_field,
            };
            let pattern = scan::decode_escapes(pattern_src);
            if pattern.is_empty() {
                return Err("empty search pattern".to_string());
            }
            Kind::Search(SearchKind {
                pattern,
                max_len,
                flags,
            })
        }
        KindSpec::Use => {
            let test_field = fields.next().ok_or("missing page reference")?;
            let (swap_endian, page) = match test_field.strip_prefix('^') {
                Some(rest) => (true, rest),
                None => (false, test_field),
            };
            if page.is_empty() {
                return Err("empty page reference".to_string());
            }
            Kind::Use(UseKind {
                page: page.to_string(),
                swap_endian,
            })
        }
        KindSpec::Name => {
            let test_field = fields.next().ok_or("missing page name")?;
            if test_field.is_empty() {
                return Err("empty page name".to_string());
            }
            Kind::Name(test_field.to_string())
        }
        KindSpec::Default => {
            // the customary test field is `x`; it carries no information
            let _ = fields.next();
            Kind::Default
        }
        KindSpec::Clear => {
            let _ = fields.next();
            Kind::Clear
        }
    };

    let description = fields.rest().to_string();

    Ok(Rule {
        level,
        offset,
        kind,
        description,
        line: line.to_string(),
    })
}

fn parse_level(line: &str) -> (usize, usize) {
    let bytes = line.as_bytes();
    let mut pos = 0;
    let mut level = 0;
    while pos < bytes.len() && bytes[pos] == b'>' {
        level += 1;
        pos += 1;
        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
            pos += 1;
        }
    }
    (level, pos)
}

fn parse_offset(field: &str) -> Result<Offset, String> {
    let (relative, rest) = match field.strip_prefix('&') {
        Some(rest) => (true, rest),
        None => (false, field),
    };
    if rest.starts_with('(') {
        let indirect = scan::parse_indirect(rest)
            .ok_or_else(|| format!("malformed indirect offset {field:?}"))?;
        Ok(Offset {
            relative,
            value: OffsetValue::Indirect(indirect),
        })
    } else {
        let value =
            scan::parse_number(rest).ok_or_else(|| format!("malformed offset {field:?}"))?;
        Ok(Offset {
            relative,
            value: OffsetValue::Direct(value),
        })
    }
}

fn parse_kind_field(field: &str) -> Result<KindSpec, String> {
    match field {
        "use" => return Ok(KindSpec::Use),
        "name" => return Ok(KindSpec::Name),
        "default" => return Ok(KindSpec::Default),
        "clear" => return Ok(KindSpec::Clear),
        _ => {}
    }
    if let Some(rest) = field.strip_prefix("string") {
        let flags = parse_flag_segments(rest)?.1;
        return Ok(KindSpec::Str { flags });
    }
    if let Some(rest) = field.strip_prefix("search") {
        let (max_len, flags) = parse_flag_segments(rest)?;
        return Ok(KindSpec::Search {
            max_len: max_len.unwrap_or(DEFAULT_SEARCH_LEN),
            flags,
        });
    }
    parse_integer_spec(field)
}

/// `/`-separated modifiers after `string` or `search`: a numeric segment
/// is the search window, letter segments are flag sets.
fn parse_flag_segments(rest: &str) -> Result<(Option<i64>, StringFlags), String> {
    if rest.is_empty() {
        return Ok((None, 0));
    }
    let rest = rest
        .strip_prefix('/')
        .ok_or_else(|| format!("malformed type modifiers {rest:?}"))?;

    let mut max_len = None;
    let mut flags = 0;
    for segment in rest.split('/') {
        if segment.is_empty() {
            continue;
        }
        if let Some(value) = scan::parse_number(segment) {
            if value <= 0 {
                return Err(format!("search window must be positive, got {value}"));
            }
            max_len = Some(value);
            continue;
        }
        for c in segment.chars() {
            flags |= match c {
                'W' => COMPACT_WHITESPACE,
                'w' => OPTIONAL_BLANKS,
                'c' => LOWER_MATCHES_BOTH,
                'C' => UPPER_MATCHES_BOTH,
                't' => FORCE_TEXT,
                'b' => FORCE_BINARY,
                _ => return Err(format!("unknown string flag {c:?}")),
            };
        }
    }
    Ok((max_len, flags))
}

fn parse_integer_spec(field: &str) -> Result<KindSpec, String> {
    let mut s = field;
    let mut signed = true;
    if let Some(rest) = s.strip_prefix('u') {
        signed = false;
        s = rest;
    }

    let mut endian = Endian::Little;
    if let Some(rest) = s.strip_prefix("le") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("be") {
        endian = Endian::Big;
        s = rest;
    }

    let (width, mut s) = if let Some(rest) = s.strip_prefix("byte") {
        (1u8, rest)
    } else if let Some(rest) = s.strip_prefix("short") {
        (2, rest)
    } else if let Some(rest) = s.strip_prefix("long") {
        (4, rest)
    } else if let Some(rest) = s.strip_prefix("quad") {
        (8, rest)
    } else {
        return Err(format!("unknown type {field:?}"));
    };

    let mut mask = None;
    let mut adjust = None;
    while !s.is_empty() {
        if let Some(rest) = s.strip_prefix('&') {
            if mask.is_some() {
                return Err(format!("duplicate mask in {field:?}"));
            }
            let (value, rest) = scan::number_prefix(rest)
                .ok_or_else(|| format!("malformed mask in {field:?}"))?;
            mask = Some(value as u64);
            s = rest;
        } else if let Some(op) = s.chars().next().and_then(arith_op) {
            if adjust.is_some() {
                return Err(format!("duplicate adjustment in {field:?}"));
            }
            let (value, rest) = scan::number_prefix(&s[1..])
                .ok_or_else(|| format!("malformed adjustment in {field:?}"))?;
            adjust = Some((op, value));
            s = rest;
        } else {
            return Err(format!("unknown type {field:?}"));
        }
    }

    // bitwise forms compare unsigned
    if mask.is_some() {
        signed = false;
    }

    Ok(KindSpec::Integer {
        width,
        endian,
        signed,
        mask,
        adjust,
    })
}

fn arith_op(c: char) -> Option<ArithOp> {
    match c {
        '+' => Some(ArithOp::Add),
        '-' => Some(ArithOp::Sub),
        '*' => Some(ArithOp::Mul),
        '/' => Some(ArithOp::Div),
        _ => None,
    }
}

fn parse_integer_test(field: &str) -> Result<(IntegerTest, i64, bool), String> {
    if field == "x" {
        return Ok((IntegerTest::Equal, 0, true));
    }
    let (test, rest) = match field.chars().next() {
        Some('=') => (IntegerTest::Equal, &field[1..]),
        Some('!') => (IntegerTest::NotEqual, &field[1..]),
        Some('<') => (IntegerTest::LessThan, &field[1..]),
        Some('>') => (IntegerTest::GreaterThan, &field[1..]),
        _ => (IntegerTest::Equal, field),
    };
    let value =
        scan::parse_number(rest).ok_or_else(|| format!("malformed test value {field:?}"))?;
    Ok((test, value, false))
}
