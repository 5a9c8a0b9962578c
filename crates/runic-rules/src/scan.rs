//! Sub-grammar scanners for the offset and number fields.
//!
//! These are the only places where the rule syntax nests, so they get
//! combinator parsers; the line and field layer above is positional.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, hex_digit1, one_of},
    combinator::{map, opt},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::model::{ArithOp, Endian, Indirect, OffsetAdjust};

fn hex_number(input: &str) -> IResult<&str, u64> {
    let (input, digits) = preceded(alt((tag("0x"), tag("0X"))), hex_digit1)(input)?;
    match u64::from_str_radix(digits, 16) {
        Ok(v) => Ok((input, v)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn octal_number(input: &str) -> IResult<&str, u64> {
    let (input, digits) = preceded(char('0'), take_while1(|c: char| ('0'..='7').contains(&c)))(input)?;
    match u64::from_str_radix(digits, 8) {
        Ok(v) => Ok((input, v)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn dec_number(input: &str) -> IResult<&str, u64> {
    let (input, digits) = digit1(input)?;
    match digits.parse::<u64>() {
        Ok(v) => Ok((input, v)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

/// A signed integer literal: decimal, `0x` hex or leading-`0` octal.
pub(crate) fn number(input: &str) -> IResult<&str, i64> {
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, magnitude) = alt((hex_number, octal_number, dec_number))(input)?;
    let value = magnitude as i64;
    let value = if sign == Some('-') { value.wrapping_neg() } else { value };
    Ok((input, value))
}

/// Parses a number that must span the whole field.
pub(crate) fn parse_number(field: &str) -> Option<i64> {
    match number(field) {
        Ok(("", value)) => Some(value),
        _ => None,
    }
}

/// Parses a number prefix, returning the value and the remainder.
pub(crate) fn number_prefix(field: &str) -> Option<(i64, &str)> {
    match number(field) {
        Ok((rest, value)) => Some((value, rest)),
        Err(_) => None,
    }
}

fn type_letter(c: char) -> (u8, Endian) {
    match c {
        'b' => (1, Endian::Little),
        's' => (2, Endian::Little),
        'l' => (4, Endian::Little),
        'q' => (8, Endian::Little),
        'B' => (1, Endian::Big),
        'S' => (2, Endian::Big),
        'L' => (4, Endian::Big),
        'Q' => (8, Endian::Big),
        _ => unreachable!("type letter set is closed"),
    }
}

fn arith_op(c: char) -> ArithOp {
    match c {
        '+' => ArithOp::Add,
        '-' => ArithOp::Sub,
        '*' => ArithOp::Mul,
        '/' => ArithOp::Div,
        _ => unreachable!("operator set is closed"),
    }
}

fn indirect(input: &str) -> IResult<&str, Indirect> {
    let (input, _) = char('(')(input)?;
    let (input, addr_relative) = opt(char('&'))(input)?;
    let (input, address) = number(input)?;
    let (input, type_clause) = opt(tuple((one_of(".,"), one_of("bslqBSLQ"))))(input)?;
    let (input, adjust_clause) = opt(tuple((
        one_of("+-*/"),
        alt((
            map(delimited(char('('), number, char(')')), |v| (v, true)),
            map(number, |v| (v, false)),
        )),
    )))(input)?;
    let (input, _) = char(')')(input)?;

    // a missing type clause reads as an unsigned 4-byte little-endian long
    let (width, endian, signed) = match type_clause {
        Some((sep, letter)) => {
            let (width, endian) = type_letter(letter);
            (width, endian, sep == ',')
        }
        None => (4, Endian::Little, false),
    };

    let adjust = adjust_clause.map(|(op, (value, relative))| OffsetAdjust {
        op: arith_op(op),
        value,
        relative,
    });

    Ok((
        input,
        Indirect {
            address,
            width,
            endian,
            signed,
            relative: addr_relative.is_some(),
            adjust,
        },
    ))
}

/// Parses an indirect offset spanning the whole field, `(` through `)`.
pub(crate) fn parse_indirect(field: &str) -> Option<Indirect> {
    match indirect(field) {
        Ok(("", ind)) => Some(ind),
        _ => None,
    }
}

/// Decodes C-style escapes into raw pattern bytes.
///
/// Handles `\n \r \t \0`, `\xHH`, octal `\NNN`, and the escaped-self
/// forms (`\\`, `\ `, `\'`, `\"`); any other escaped character yields
/// itself.
pub(crate) fn decode_escapes(field: &str) -> Vec<u8> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            out.push(b'\\');
            break;
        }
        match bytes[i] {
            b'n' => {
                out.push(b'\n');
                i += 1;
            }
            b'r' => {
                out.push(b'\r');
                i += 1;
            }
            b't' => {
                out.push(b'\t');
                i += 1;
            }
            b'x' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 && i + 1 < bytes.len() && (bytes[i + 1] as char).is_ascii_hexdigit()
                {
                    value = value * 16 + (bytes[i + 1] as char).to_digit(16).unwrap();
                    digits += 1;
                    i += 1;
                }
                if digits == 0 {
                    out.push(b'x');
                } else {
                    out.push(value as u8);
                }
                i += 1;
            }
            b'0'..=b'7' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    digits += 1;
                    i += 1;
                }
                out.push(value as u8);
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_bases() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("-42"), Some(-42));
        assert_eq!(parse_number("0x1F"), Some(31));
        assert_eq!(parse_number("0X1f"), Some(31));
        assert_eq!(parse_number("010"), Some(8));
        assert_eq!(parse_number("0"), Some(0));
        assert_eq!(parse_number("0xFFFFFFFFFFFFFFFF"), Some(-1));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("12z"), None);
    }

    #[test]
    fn test_number_prefix() {
        assert_eq!(number_prefix("0xFF+2"), Some((255, "+2")));
        assert_eq!(number_prefix("12"), Some((12, "")));
        assert_eq!(number_prefix("z"), None);
    }

    #[test]
    fn test_indirect_plain() {
        let ind = parse_indirect("(4)").unwrap();
        assert_eq!(ind.address, 4);
        assert_eq!(ind.width, 4);
        assert_eq!(ind.endian, Endian::Little);
        assert!(!ind.signed);
        assert!(!ind.relative);
        assert!(ind.adjust.is_none());
    }

    #[test]
    fn test_indirect_typed() {
        let ind = parse_indirect("(4.S)").unwrap();
        assert_eq!(ind.width, 2);
        assert_eq!(ind.endian, Endian::Big);
        assert!(!ind.signed);

        let ind = parse_indirect("(0x10,b)").unwrap();
        assert_eq!(ind.address, 16);
        assert_eq!(ind.width, 1);
        assert!(ind.signed);
    }

    #[test]
    fn test_indirect_adjustments() {
        let ind = parse_indirect("(4.l+8)").unwrap();
        let adj = ind.adjust.unwrap();
        assert_eq!(adj.op, ArithOp::Add);
        assert_eq!(adj.value, 8);
        assert!(!adj.relative);

        let ind = parse_indirect("(4.l-(12))").unwrap();
        let adj = ind.adjust.unwrap();
        assert_eq!(adj.op, ArithOp::Sub);
        assert_eq!(adj.value, 12);
        assert!(adj.relative);

        let ind = parse_indirect("(&8.q*2)").unwrap();
        assert!(ind.relative);
        assert_eq!(ind.width, 8);
        assert_eq!(ind.adjust.unwrap().op, ArithOp::Mul);
    }

    #[test]
    fn test_indirect_rejects_garbage() {
        assert!(parse_indirect("(4.z)").is_none());
        assert!(parse_indirect("(4").is_none());
        assert!(parse_indirect("4)").is_none());
        assert!(parse_indirect("(4)x").is_none());
    }

    #[test]
    fn test_decode_escapes() {
        assert_eq!(decode_escapes(r"GIF8"), b"GIF8");
        assert_eq!(decode_escapes(r"a\nb"), b"a\nb");
        assert_eq!(decode_escapes(r"a\tb"), b"a\tb");
        assert_eq!(decode_escapes(r"a\ b"), b"a b");
        assert_eq!(decode_escapes(r"a\\b"), b"a\\b");
        assert_eq!(decode_escapes(r"\x7fELF"), b"\x7fELF");
        assert_eq!(decode_escapes(r"\x7"), &[0x7]);
        assert_eq!(decode_escapes(r"\0"), &[0]);
        assert_eq!(decode_escapes(r"\101"), b"A");
        assert_eq!(decode_escapes(r"\10"), &[0o10]);
        assert_eq!(decode_escapes(r"\q"), b"q");
        assert_eq!(decode_escapes("tail\\"), b"tail\\");
    }
}
