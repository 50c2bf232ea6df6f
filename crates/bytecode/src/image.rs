//! Binary image of a [`FuncDef`] tree.
//!
//! ```plaintext
//! image    := magic:"QBC\x01" def
//! def      := name arity:u8 flags:u8 slots:len
//!             len code:u32le*  len constant*  len capture*  len def*
//! name     := 0x00 | 0x01 bytes
//! bytes    := len u8*
//! constant := tag:u8 payload
//! capture  := tag:u8 index:len
//! ```
//!
//! `len` is a compact unsigned integer: values below `0x80` take one byte,
//! larger values are prefixed by `0x81`, `0x82` or `0x83` followed by a
//! little-endian `u8`, `u16` or `u32`.

use std::fmt::Display;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smol_str::SmolStr;

use crate::{Capture, Constant, FuncDef, FuncFlags, Instruction};

pub const MAGIC: &[u8; 4] = b"QBC\x01";

/// Nesting limit for definitions inside an image.
const MAX_NESTING: usize = 256;

const CONST_NIL: u8 = 0;
const CONST_FALSE: u8 = 1;
const CONST_TRUE: u8 = 2;
const CONST_INTEGER: u8 = 3;
const CONST_REAL: u8 = 4;
const CONST_STRING: u8 = 5;
const CONST_SYMBOL: u8 = 6;
const CONST_KEYWORD: u8 = 7;

const CAPTURE_LOCAL: u8 = 0;
const CAPTURE_UPVALUE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    BadMagic,
    /// The image ended while reading the named item.
    Truncated(&'static str),
    UnknownConstant(u8),
    UnknownCapture(u8),
    UnknownFlags(u8),
    BadLength(u8),
    InvalidUtf8,
    TooDeep,
    TrailingBytes(usize),
}

impl Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::BadMagic => write!(f, "not a bytecode image (bad magic)"),
            ImageError::Truncated(what) => write!(f, "image truncated while reading {}", what),
            ImageError::UnknownConstant(t) => write!(f, "unknown constant tag {:#04x}", t),
            ImageError::UnknownCapture(t) => write!(f, "unknown capture tag {:#04x}", t),
            ImageError::UnknownFlags(t) => write!(f, "unknown function flags {:#04x}", t),
            ImageError::BadLength(t) => write!(f, "bad length prefix {:#04x}", t),
            ImageError::InvalidUtf8 => write!(f, "name is not valid UTF-8"),
            ImageError::TooDeep => write!(f, "definitions nested too deeply"),
            ImageError::TrailingBytes(n) => write!(f, "{} unexpected bytes after image", n),
        }
    }
}

impl std::error::Error for ImageError {}

pub type Result<T> = std::result::Result<T, ImageError>;

/// Encode a definition tree into an image.
pub fn encode(def: &FuncDef) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + def.code.len() * 4);
    buf.put_slice(MAGIC);
    write_def(def, &mut buf);
    buf.freeze()
}

/// Decode an image produced by [`encode`].
pub fn decode(image: &[u8]) -> Result<FuncDef> {
    let mut r = image;
    if r.len() < MAGIC.len() || &r[..MAGIC.len()] != MAGIC {
        return Err(ImageError::BadMagic);
    }
    r.advance(MAGIC.len());
    let def = read_def(&mut r, 0)?;
    if r.has_remaining() {
        return Err(ImageError::TrailingBytes(r.remaining()));
    }
    Ok(def)
}

fn write_len(v: usize, buf: &mut impl BufMut) {
    let v = v as u32;
    match v {
        0..=0x7f => buf.put_u8(v as u8),
        0x80..=0xff => {
            buf.put_u8(0x81);
            buf.put_u8(v as u8);
        }
        0x100..=0xffff => {
            buf.put_u8(0x82);
            buf.put_u16_le(v as u16);
        }
        _ => {
            buf.put_u8(0x83);
            buf.put_u32_le(v);
        }
    }
}

fn write_bytes(b: &[u8], buf: &mut impl BufMut) {
    write_len(b.len(), buf);
    buf.put_slice(b);
}

fn write_def(def: &FuncDef, buf: &mut BytesMut) {
    match &def.name {
        Some(name) => {
            buf.put_u8(1);
            write_bytes(name.as_bytes(), buf);
        }
        None => buf.put_u8(0),
    }
    buf.put_u8(def.arity);
    buf.put_u8(def.flags.bits());
    write_len(def.slot_count as usize, buf);

    write_len(def.code.len(), buf);
    for inst in &def.code {
        buf.put_u32_le(inst.raw());
    }

    write_len(def.constants.len(), buf);
    for c in &def.constants {
        match c {
            Constant::Nil => buf.put_u8(CONST_NIL),
            Constant::Boolean(false) => buf.put_u8(CONST_FALSE),
            Constant::Boolean(true) => buf.put_u8(CONST_TRUE),
            Constant::Integer(i) => {
                buf.put_u8(CONST_INTEGER);
                buf.put_i32_le(*i);
            }
            Constant::Real(bits) => {
                buf.put_u8(CONST_REAL);
                buf.put_u64_le(*bits);
            }
            Constant::String(s) => {
                buf.put_u8(CONST_STRING);
                write_bytes(s, buf);
            }
            Constant::Symbol(s) => {
                buf.put_u8(CONST_SYMBOL);
                write_bytes(s.as_bytes(), buf);
            }
            Constant::Keyword(s) => {
                buf.put_u8(CONST_KEYWORD);
                write_bytes(s.as_bytes(), buf);
            }
        }
    }

    write_len(def.captures.len(), buf);
    for c in &def.captures {
        let (tag, idx) = match c {
            Capture::Local(slot) => (CAPTURE_LOCAL, *slot),
            Capture::Upvalue(idx) => (CAPTURE_UPVALUE, *idx),
        };
        buf.put_u8(tag);
        write_len(idx as usize, buf);
    }

    write_len(def.defs.len(), buf);
    for nested in &def.defs {
        write_def(nested, buf);
    }
}

fn read_u8(r: &mut &[u8], what: &'static str) -> Result<u8> {
    if r.remaining() < 1 {
        return Err(ImageError::Truncated(what));
    }
    Ok(r.get_u8())
}

fn read_len(r: &mut &[u8], what: &'static str) -> Result<usize> {
    let head = read_u8(r, what)?;
    let need = match head {
        0..=0x7f => return Ok(head as usize),
        0x81 => 1,
        0x82 => 2,
        0x83 => 4,
        _ => return Err(ImageError::BadLength(head)),
    };
    if r.remaining() < need {
        return Err(ImageError::Truncated(what));
    }
    Ok(match need {
        1 => r.get_u8() as usize,
        2 => r.get_u16_le() as usize,
        _ => r.get_u32_le() as usize,
    })
}

fn read_bytes(r: &mut &[u8], what: &'static str) -> Result<Bytes> {
    let len = read_len(r, what)?;
    if r.remaining() < len {
        return Err(ImageError::Truncated(what));
    }
    Ok(r.copy_to_bytes(len))
}

fn read_str(r: &mut &[u8], what: &'static str) -> Result<SmolStr> {
    let b = read_bytes(r, what)?;
    std::str::from_utf8(&b)
        .map(SmolStr::new)
        .map_err(|_| ImageError::InvalidUtf8)
}

fn read_def(r: &mut &[u8], depth: usize) -> Result<FuncDef> {
    if depth > MAX_NESTING {
        return Err(ImageError::TooDeep);
    }

    let name = match read_u8(r, "name")? {
        0 => None,
        _ => Some(read_str(r, "name")?),
    };
    let arity = read_u8(r, "arity")?;
    let flag_bits = read_u8(r, "flags")?;
    let flags = FuncFlags::from_bits(flag_bits).ok_or(ImageError::UnknownFlags(flag_bits))?;
    let slot_count = read_len(r, "slot count")? as u32;

    let code_len = read_len(r, "code")?;
    if r.remaining() < code_len.saturating_mul(4) {
        return Err(ImageError::Truncated("code"));
    }
    let code = (0..code_len)
        .map(|_| Instruction::from_raw(r.get_u32_le()))
        .collect();

    let n_consts = read_len(r, "constants")?;
    let mut constants = Vec::with_capacity(n_consts.min(r.remaining()));
    for _ in 0..n_consts {
        let c = match read_u8(r, "constant")? {
            CONST_NIL => Constant::Nil,
            CONST_FALSE => Constant::Boolean(false),
            CONST_TRUE => Constant::Boolean(true),
            CONST_INTEGER => {
                if r.remaining() < 4 {
                    return Err(ImageError::Truncated("integer constant"));
                }
                Constant::Integer(r.get_i32_le())
            }
            CONST_REAL => {
                if r.remaining() < 8 {
                    return Err(ImageError::Truncated("real constant"));
                }
                Constant::Real(r.get_u64_le())
            }
            CONST_STRING => Constant::String(read_bytes(r, "string constant")?),
            CONST_SYMBOL => Constant::Symbol(read_str(r, "symbol constant")?),
            CONST_KEYWORD => Constant::Keyword(read_str(r, "keyword constant")?),
            t => return Err(ImageError::UnknownConstant(t)),
        };
        constants.push(c);
    }

    let n_captures = read_len(r, "captures")?;
    let mut captures = Vec::with_capacity(n_captures.min(r.remaining()));
    for _ in 0..n_captures {
        let tag = read_u8(r, "capture")?;
        let idx = read_len(r, "capture")? as u32;
        captures.push(match tag {
            CAPTURE_LOCAL => Capture::Local(idx),
            CAPTURE_UPVALUE => Capture::Upvalue(idx),
            t => return Err(ImageError::UnknownCapture(t)),
        });
    }

    let n_defs = read_len(r, "definitions")?;
    let mut defs = Vec::with_capacity(n_defs.min(r.remaining()));
    for _ in 0..n_defs {
        defs.push(Arc::new(read_def(r, depth + 1)?));
    }

    Ok(FuncDef {
        name,
        arity,
        flags,
        slot_count,
        code,
        constants,
        captures,
        defs,
    })
}
