//! Trace file parsing.
//!
//! A trace holds one operation per line. Blank lines and `#` comments are skipped.
//!
//! ```text
//! mmap <addr> <len> <prot> <flags> <fd> <offset>
//! munmap <addr> <len>
//! mprotect <addr> <len> <prot>
//! open <fd> <name> [nommap]
//! close <fd>
//! dump
//! ```
//!
//! Numbers are decimal or `0x` hex. `prot` is `rwx` style or numeric, and `flags` is a
//! `|`-separated list of `shared`, `private`, `fixed`, `anonymous` and `32bit`, or
//! numeric.

use std::fmt;

use shim::{MapFlags, Protection};
use thiserror::Error;

/// One traced operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOp {
    Mmap {
        addr: usize,
        len: usize,
        prot: Protection,
        flags: MapFlags,
        fd: i32,
        offset: i64,
    },
    Munmap {
        addr: usize,
        len: usize,
    },
    Mprotect {
        addr: usize,
        len: usize,
        prot: Protection,
    },
    /// Opens an in-memory file at `fd`.
    Open {
        fd: i32,
        name: String,
        mappable: bool,
    },
    Close {
        fd: i32,
    },
    /// Prints the VMA table.
    Dump,
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceOp::Mmap {
                addr,
                len,
                prot,
                flags,
                fd,
                offset,
            } => write!(f, "mmap({addr:#x}, {len:#x}, {prot}, {flags}, {fd}, {offset:#x})"),
            TraceOp::Munmap { addr, len } => write!(f, "munmap({addr:#x}, {len:#x})"),
            TraceOp::Mprotect { addr, len, prot } => {
                write!(f, "mprotect({addr:#x}, {len:#x}, {prot})")
            }
            TraceOp::Open { fd, name, mappable } => {
                write!(f, "open({fd}, {name})")?;
                if !mappable {
                    f.write_str(" nommap")?;
                }
                Ok(())
            }
            TraceOp::Close { fd } => write!(f, "close({fd})"),
            TraceOp::Dump => f.write_str("dump"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("unexpected argument `{0}`")]
    UnexpectedArgument(String),

    #[error("invalid number `{0}`")]
    InvalidNumber(String),

    #[error("invalid protection `{0}`")]
    InvalidProtection(String),

    #[error("invalid mapping flag `{0}`")]
    InvalidFlag(String),
}

/// A parse failure with its 1-based line number.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// Parses a whole trace, returning each operation with its line number.
pub fn parse(source: &str) -> Result<Vec<(usize, TraceOp)>, ParseError> {
    let mut ops = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }

        let op = parse_line(text).map_err(|kind| ParseError { line, kind })?;
        ops.push((line, op));
    }

    Ok(ops)
}

struct Args<'a> {
    words: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, name: &'static str) -> Result<&'a str, ParseErrorKind> {
        self.words.next().ok_or(ParseErrorKind::MissingArgument(name))
    }

    fn unsigned(&mut self, name: &'static str) -> Result<usize, ParseErrorKind> {
        let word = self.next(name)?;
        parse_unsigned(word)
            .and_then(|value| usize::try_from(value).ok())
            .ok_or_else(|| ParseErrorKind::InvalidNumber(word.into()))
    }

    fn signed(&mut self, name: &'static str) -> Result<i64, ParseErrorKind> {
        let word = self.next(name)?;
        parse_signed(word).ok_or_else(|| ParseErrorKind::InvalidNumber(word.into()))
    }

    fn fd(&mut self) -> Result<i32, ParseErrorKind> {
        let word = self.next("fd")?;
        parse_signed(word)
            .and_then(|value| i32::try_from(value).ok())
            .ok_or_else(|| ParseErrorKind::InvalidNumber(word.into()))
    }

    fn finish(mut self) -> Result<(), ParseErrorKind> {
        match self.words.next() {
            Some(extra) => Err(ParseErrorKind::UnexpectedArgument(extra.into())),
            None => Ok(()),
        }
    }
}

fn parse_line(text: &str) -> Result<TraceOp, ParseErrorKind> {
    let mut words = text.split_whitespace();
    let Some(name) = words.next() else {
        return Err(ParseErrorKind::MissingArgument("operation"));
    };
    let mut args = Args { words };

    let op = match name {
        "mmap" => TraceOp::Mmap {
            addr: args.unsigned("addr")?,
            len: args.unsigned("len")?,
            prot: parse_protection(args.next("prot")?)?,
            flags: parse_flags(args.next("flags")?)?,
            fd: args.fd()?,
            offset: args.signed("offset")?,
        },
        "munmap" => TraceOp::Munmap {
            addr: args.unsigned("addr")?,
            len: args.unsigned("len")?,
        },
        "mprotect" => TraceOp::Mprotect {
            addr: args.unsigned("addr")?,
            len: args.unsigned("len")?,
            prot: parse_protection(args.next("prot")?)?,
        },
        "open" => {
            let fd = args.fd()?;
            let name = args.next("name")?.to_string();
            let mappable = match args.words.next() {
                None => true,
                Some("nommap") => false,
                Some(other) => return Err(ParseErrorKind::UnexpectedArgument(other.into())),
            };
            TraceOp::Open { fd, name, mappable }
        }
        "close" => TraceOp::Close { fd: args.fd()? },
        "dump" => TraceOp::Dump,
        other => return Err(ParseErrorKind::UnknownOperation(other.into())),
    };

    args.finish()?;
    Ok(op)
}

/// Parses a decimal or `0x` hex number.
pub fn parse_unsigned(word: &str) -> Option<u64> {
    match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => word.parse().ok(),
    }
}

fn parse_signed(word: &str) -> Option<i64> {
    match word.strip_prefix('-') {
        Some(magnitude) => {
            let magnitude = i64::try_from(parse_unsigned(magnitude)?).ok()?;
            Some(-magnitude)
        }
        None => i64::try_from(parse_unsigned(word)?).ok(),
    }
}

fn parse_protection(word: &str) -> Result<Protection, ParseErrorKind> {
    if let Some(raw) = parse_unsigned(word) {
        return Ok(Protection::from_raw(raw));
    }

    let invalid = || ParseErrorKind::InvalidProtection(word.into());
    let bytes = word.as_bytes();
    if bytes.len() != 3 {
        return Err(invalid());
    }

    let mut raw = 0;
    for (byte, (set, bit)) in bytes.iter().zip([
        (b'r', Protection::READ),
        (b'w', Protection::WRITE),
        (b'x', Protection::EXEC),
    ]) {
        match *byte {
            b'-' => {}
            b if b == set => raw |= bit,
            _ => return Err(invalid()),
        }
    }

    Ok(Protection::from_raw(raw as u64))
}

fn parse_flags(word: &str) -> Result<MapFlags, ParseErrorKind> {
    if let Some(raw) = parse_unsigned(word) {
        return Ok(MapFlags::from_raw(raw));
    }

    let mut flags = MapFlags::empty();
    for name in word.split('|') {
        let bit = match name {
            "shared" => MapFlags::SHARED,
            "private" => MapFlags::PRIVATE,
            "fixed" => MapFlags::FIXED,
            "anonymous" | "anon" => MapFlags::ANONYMOUS,
            "32bit" => MapFlags::MAP_32BIT,
            _ => return Err(ParseErrorKind::InvalidFlag(name.into())),
        };
        flags = flags.with(bit);
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_operation() {
        let source = "\
# setup
open 3 data.bin
open 4 socket nommap

mmap 0 4097 rw- private|anonymous -1 0   # anonymous
mmap 0x400000 0x2000 0x1 shared 3 0x1000
mprotect 0x400000 0x1000 ---
munmap 0x400000 0x2000
close 3
dump
";
        let ops = parse(source).unwrap();
        let lines: Vec<_> = ops.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, [2, 3, 5, 6, 7, 8, 9, 10]);

        assert_eq!(
            ops[1].1,
            TraceOp::Open {
                fd: 4,
                name: "socket".into(),
                mappable: false
            }
        );
        assert_eq!(
            ops[2].1,
            TraceOp::Mmap {
                addr: 0,
                len: 4097,
                prot: Protection::read_write(),
                flags: MapFlags::from_raw(0x22),
                fd: -1,
                offset: 0,
            }
        );
        assert_eq!(
            ops[4].1,
            TraceOp::Mprotect {
                addr: 0x40_0000,
                len: 0x1000,
                prot: Protection::none()
            }
        );
        assert_eq!(ops[7].1, TraceOp::Dump);
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse("dump\nmunmap 0x1000\n").unwrap_err();
        assert_eq!(
            err,
            ParseError {
                line: 2,
                kind: ParseErrorKind::MissingArgument("len")
            }
        );
        assert_eq!(err.to_string(), "line 2: missing argument <len>");
    }

    #[test]
    fn rejects_malformed_arguments() {
        let kind = |text| parse(text).unwrap_err().kind;

        assert_eq!(
            kind("mmap 0 0x1000 rwz private -1 0"),
            ParseErrorKind::InvalidProtection("rwz".into())
        );
        assert_eq!(
            kind("mmap 0 0x1000 rw- private|huge -1 0"),
            ParseErrorKind::InvalidFlag("huge".into())
        );
        assert_eq!(kind("munmap 0xzz 1"), ParseErrorKind::InvalidNumber("0xzz".into()));
        assert_eq!(kind("dump now"), ParseErrorKind::UnexpectedArgument("now".into()));
        assert_eq!(kind("brk 0"), ParseErrorKind::UnknownOperation("brk".into()));
    }

    #[test]
    fn numeric_encodings() {
        assert_eq!(parse_unsigned("0x1f"), Some(0x1f));
        assert_eq!(parse_unsigned("42"), Some(42));
        assert_eq!(parse_signed("-0x10"), Some(-16));
        assert_eq!(parse_flags("0x32").unwrap().to_raw(), 0x32);
        assert_eq!(parse_protection("7").unwrap().to_raw(), 0x7);
    }
}
