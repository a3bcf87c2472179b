// src/rdata/sexp.rs
//! Decoder for R's XDR serialization stream (format versions 2 and 3).

use anyhow::{anyhow, bail, Context, Result};

use super::buffer::XdrBuffer;

// SEXPTYPE codes written by R's serialize.c
pub(crate) const SYMSXP: u8 = 1;
pub(crate) const LISTSXP: u8 = 2;
pub(crate) const CLOSXP: u8 = 3;
pub(crate) const ENVSXP: u8 = 4;
pub(crate) const PROMSXP: u8 = 5;
pub(crate) const LANGSXP: u8 = 6;
pub(crate) const SPECIALSXP: u8 = 7;
pub(crate) const BUILTINSXP: u8 = 8;
pub(crate) const CHARSXP: u8 = 9;
pub(crate) const LGLSXP: u8 = 10;
pub(crate) const INTSXP: u8 = 13;
pub(crate) const REALSXP: u8 = 14;
pub(crate) const CPLXSXP: u8 = 15;
pub(crate) const STRSXP: u8 = 16;
pub(crate) const DOTSXP: u8 = 17;
pub(crate) const VECSXP: u8 = 19;
pub(crate) const EXPRSXP: u8 = 20;
pub(crate) const BCODESXP: u8 = 21;
pub(crate) const EXTPTRSXP: u8 = 22;
pub(crate) const WEAKREFSXP: u8 = 23;
pub(crate) const RAWSXP: u8 = 24;
pub(crate) const S4SXP: u8 = 25;

// pseudo-types that only exist in the stream
pub(crate) const ALTREP_SXP: u8 = 238;
pub(crate) const ATTRLISTSXP: u8 = 239;
pub(crate) const ATTRLANGSXP: u8 = 240;
pub(crate) const BASEENV_SXP: u8 = 241;
pub(crate) const EMPTYENV_SXP: u8 = 242;
pub(crate) const BCREPREF: u8 = 243;
pub(crate) const BCREPDEF: u8 = 244;
pub(crate) const GENERICREFSXP: u8 = 245;
pub(crate) const CLASSREFSXP: u8 = 246;
pub(crate) const PERSISTSXP: u8 = 247;
pub(crate) const PACKAGESXP: u8 = 248;
pub(crate) const NAMESPACESXP: u8 = 249;
pub(crate) const BASENAMESPACE_SXP: u8 = 250;
pub(crate) const MISSINGARG_SXP: u8 = 251;
pub(crate) const UNBOUNDVALUE_SXP: u8 = 252;
pub(crate) const GLOBALENV_SXP: u8 = 253;
pub(crate) const NILVALUE_SXP: u8 = 254;
pub(crate) const REFSXP: u8 = 255;

const HAS_ATTR_BIT: i32 = 1 << 9;
const HAS_TAG_BIT: i32 = 1 << 10;

// Nesting limit for decoded objects; data frames stay a handful of levels deep.
const MAX_DEPTH: usize = 128;

// Longest compact sequence expanded into memory.
const MAX_COMPACT_LEN: usize = 1 << 28;

// CHARSXP encoding levels
const LATIN1_MASK: i32 = 1 << 2;

/// R's `NA_integer_` (and `NA` for logicals).
pub const NA_INTEGER: i32 = i32::MIN;

/// R's `NA_real_` is a NaN whose low word is 1954.
pub fn is_na_real(v: f64) -> bool {
    v.is_nan() && (v.to_bits() & 0xFFFF_FFFF) == 1954
}

/// One decoded R object.
#[derive(Debug, Clone, PartialEq)]
pub struct RObject {
    pub value: RValue,
    pub attributes: Vec<(String, RObject)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Null,
    Symbol(String),
    /// Tagged pairlist (`LISTSXP`).
    Pairlist(Vec<(Option<String>, RObject)>),
    /// Calls, closures, promises: kept only so the stream stays in sync.
    Language(Vec<(Option<String>, RObject)>),
    /// Environment singletons (global, base, empty, ...).
    Environment(&'static str),
    Logical(Vec<i32>),
    Integer(Vec<i32>),
    Real(Vec<f64>),
    Complex(Vec<(f64, f64)>),
    Character(Vec<Option<String>>),
    /// A bare `CHARSXP`, only seen inside character vectors and symbols.
    Char(Option<String>),
    List(Vec<RObject>),
    Raw(Vec<u8>),
    Builtin(String),
    S4,
}

impl RObject {
    pub fn new(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    pub fn null() -> Self {
        Self::new(RValue::Null)
    }

    pub fn attr(&self, name: &str) -> Option<&RObject> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Values of the `class` attribute, empty when absent.
    pub fn classes(&self) -> Vec<&str> {
        match self.attr("class").map(|c| &c.value) {
            Some(RValue::Character(v)) => v.iter().filter_map(|s| s.as_deref()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    /// Element count for vector types.
    pub fn len(&self) -> usize {
        match &self.value {
            RValue::Null | RValue::Environment(_) | RValue::S4 | RValue::Builtin(_) => 0,
            RValue::Symbol(_) | RValue::Char(_) => 1,
            RValue::Pairlist(v) | RValue::Language(v) => v.len(),
            RValue::Logical(v) | RValue::Integer(v) => v.len(),
            RValue::Real(v) => v.len(),
            RValue::Complex(v) => v.len(),
            RValue::Character(v) => v.len(),
            RValue::List(v) => v.len(),
            RValue::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match &self.value {
            RValue::Null => "NULL",
            RValue::Symbol(_) => "symbol",
            RValue::Pairlist(_) => "pairlist",
            RValue::Language(_) => "language",
            RValue::Environment(_) => "environment",
            RValue::Logical(_) => "logical",
            RValue::Integer(_) => "integer",
            RValue::Real(_) => "double",
            RValue::Complex(_) => "complex",
            RValue::Character(_) => "character",
            RValue::Char(_) => "char",
            RValue::List(_) => "list",
            RValue::Raw(_) => "raw",
            RValue::Builtin(_) => "builtin",
            RValue::S4 => "S4",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Flags {
    sexp_type: u8,
    levels: i32,
    has_attr: bool,
    has_tag: bool,
    raw: i32,
}

impl Flags {
    fn unpack(raw: i32) -> Self {
        Self {
            sexp_type: (raw & 0xFF) as u8,
            levels: raw >> 12,
            has_attr: raw & HAS_ATTR_BIT != 0,
            has_tag: raw & HAS_TAG_BIT != 0,
            raw,
        }
    }
}

/// Serialization header: format version plus the R versions that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: i32,
    pub writer_version: i32,
    pub min_reader_version: i32,
    pub native_encoding: Option<String>,
}

impl StreamHeader {
    /// The R version that wrote the stream, as `major.minor.patch`.
    pub fn writer_release(&self) -> String {
        let v = self.writer_version;
        format!("{}.{}.{}", v / 65536, (v % 65536) / 256, v % 256)
    }
}

pub struct Unserializer<'a> {
    buf: XdrBuffer<'a>,
    refs: Vec<RObject>,
    depth: usize,
}

impl<'a> Unserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            buf: XdrBuffer::new(data),
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Consume a `RDX2\n` / `RDX3\n` workspace magic, if present.
    pub fn workspace_magic(&mut self) -> Result<bool> {
        if self.buf.eat(b"RDX2\n") || self.buf.eat(b"RDX3\n") {
            return Ok(true);
        }
        for other in [&b"RDA2\n"[..], b"RDA3\n", b"RDB2\n", b"RDB3\n"] {
            if self.buf.eat(other) {
                bail!(
                    "workspace format {:?} is not supported, only XDR (RDX)",
                    String::from_utf8_lossy(&other[..4])
                );
            }
        }
        Ok(false)
    }

    pub fn header(&mut self) -> Result<StreamHeader> {
        if !self.buf.eat(b"X\n") {
            if self.buf.eat(b"A\n") {
                bail!("ASCII serialization is not supported");
            }
            if self.buf.eat(b"B\n") {
                bail!("native binary serialization is not supported");
            }
            bail!("not an R serialization stream (missing format marker)");
        }
        let version = self.buf.read_i32()?;
        let writer_version = self.buf.read_i32()?;
        let min_reader_version = self.buf.read_i32()?;
        let native_encoding = match version {
            2 => None,
            3 => {
                let n = self.buf.read_i32()?;
                if n < 0 {
                    bail!("negative encoding name length {}", n);
                }
                let bytes = self.buf.read_bytes(n as usize)?;
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            other => bail!("unsupported serialization version {}", other),
        };
        Ok(StreamHeader {
            version,
            writer_version,
            min_reader_version,
            native_encoding,
        })
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_item(&mut self) -> Result<RObject> {
        if self.depth >= MAX_DEPTH {
            bail!("objects nested deeper than {} levels", MAX_DEPTH);
        }
        let flags = Flags::unpack(self.buf.read_i32()?);
        self.depth += 1;
        let item = self
            .read_item_with(flags)
            .with_context(|| format!("decoding type {} at offset {}", flags.sexp_type, self.buf.pos()));
        self.depth -= 1;
        item
    }

    fn read_item_with(&mut self, flags: Flags) -> Result<RObject> {
        match flags.sexp_type {
            NILVALUE_SXP => Ok(RObject::null()),
            EMPTYENV_SXP => Ok(RObject::new(RValue::Environment("empty"))),
            BASEENV_SXP => Ok(RObject::new(RValue::Environment("base"))),
            GLOBALENV_SXP => Ok(RObject::new(RValue::Environment("global"))),
            BASENAMESPACE_SXP => Ok(RObject::new(RValue::Environment("base namespace"))),
            UNBOUNDVALUE_SXP | MISSINGARG_SXP => Ok(RObject::null()),
            REFSXP => {
                let idx = match flags.raw >> 8 {
                    0 => self.buf.read_i32()?,
                    i => i,
                };
                self.refs
                    .get((idx as usize).wrapping_sub(1))
                    .cloned()
                    .ok_or_else(|| anyhow!("reference {} outside table of {}", idx, self.refs.len()))
            }
            SYMSXP => {
                let name = match self.read_item()?.value {
                    RValue::Char(Some(s)) => s,
                    RValue::Char(None) => "NA".to_string(),
                    other => bail!("symbol name is not a CHARSXP: {:?}", other),
                };
                let sym = RObject::new(RValue::Symbol(name));
                self.refs.push(sym.clone());
                Ok(sym)
            }
            PACKAGESXP | NAMESPACESXP | PERSISTSXP => {
                // persistent name vector, kept as an opaque environment
                if self.buf.read_i32()? != 0 {
                    bail!("unexpected persistent string flag");
                }
                let n = self.buf.read_length()?;
                for _ in 0..n {
                    self.read_item()?;
                }
                let env = RObject::new(RValue::Environment("namespace"));
                self.refs.push(env.clone());
                Ok(env)
            }
            LISTSXP | LANGSXP | CLOSXP | PROMSXP | DOTSXP | ATTRLISTSXP | ATTRLANGSXP => {
                self.read_pairlist(flags)
            }
            ENVSXP => bail!("environments are not supported"),
            BCODESXP | BCREPDEF | BCREPREF => bail!("byte code is not supported"),
            CLASSREFSXP | GENERICREFSXP => bail!("reference objects are not supported"),
            EXTPTRSXP => {
                let obj = RObject::new(RValue::Environment("external pointer"));
                self.refs.push(obj.clone());
                self.read_item()?; // prot
                self.read_item()?; // tag
                self.with_attributes(flags, obj)
            }
            WEAKREFSXP => {
                let obj = RObject::new(RValue::Environment("weak reference"));
                self.refs.push(obj.clone());
                self.with_attributes(flags, obj)
            }
            SPECIALSXP | BUILTINSXP => {
                let n = self.buf.read_length()?;
                let name = String::from_utf8_lossy(self.buf.read_bytes(n)?).into_owned();
                Ok(RObject::new(RValue::Builtin(name)))
            }
            CHARSXP => self.read_charsxp(flags),
            LGLSXP => {
                let n = self.buf.read_length()?;
                let v = self.buf.read_i32_vec(n)?;
                self.with_attributes(flags, RObject::new(RValue::Logical(v)))
            }
            INTSXP => {
                let n = self.buf.read_length()?;
                let v = self.buf.read_i32_vec(n)?;
                self.with_attributes(flags, RObject::new(RValue::Integer(v)))
            }
            REALSXP => {
                let n = self.buf.read_length()?;
                let v = self.buf.read_f64_vec(n)?;
                self.with_attributes(flags, RObject::new(RValue::Real(v)))
            }
            CPLXSXP => {
                let n = self.buf.read_length()?;
                let v = self.buf.read_f64_vec(n.checked_mul(2).ok_or_else(|| anyhow!("overflow"))?)?;
                let pairs = v.chunks_exact(2).map(|c| (c[0], c[1])).collect();
                self.with_attributes(flags, RObject::new(RValue::Complex(pairs)))
            }
            STRSXP => {
                let n = self.buf.read_length()?;
                let mut out = Vec::with_capacity(n.min(self.buf.remaining() / 4));
                for _ in 0..n {
                    match self.read_item()?.value {
                        RValue::Char(s) => out.push(s),
                        other => bail!("character vector element is {:?}", other),
                    }
                }
                self.with_attributes(flags, RObject::new(RValue::Character(out)))
            }
            VECSXP | EXPRSXP => {
                let n = self.buf.read_length()?;
                let mut out = Vec::with_capacity(n.min(self.buf.remaining() / 4));
                for _ in 0..n {
                    out.push(self.read_item()?);
                }
                self.with_attributes(flags, RObject::new(RValue::List(out)))
            }
            RAWSXP => {
                let n = self.buf.read_length()?;
                let v = self.buf.read_bytes(n)?.to_vec();
                self.with_attributes(flags, RObject::new(RValue::Raw(v)))
            }
            S4SXP => self.with_attributes(flags, RObject::new(RValue::S4)),
            ALTREP_SXP => self.read_altrep(),
            other => bail!("unknown type code {}", other),
        }
    }

    fn with_attributes(&mut self, flags: Flags, mut obj: RObject) -> Result<RObject> {
        if flags.has_attr {
            obj.attributes = self.read_attributes()?;
        }
        Ok(obj)
    }

    fn read_attributes(&mut self) -> Result<Vec<(String, RObject)>> {
        match self.read_item()?.value {
            RValue::Pairlist(items) => Ok(items
                .into_iter()
                .map(|(tag, v)| (tag.unwrap_or_default(), v))
                .collect()),
            RValue::Null => Ok(Vec::new()),
            other => bail!("attributes are not a pairlist: {:?}", other),
        }
    }

    fn read_charsxp(&mut self, flags: Flags) -> Result<RObject> {
        let n = self.buf.read_i32()?;
        if n == -1 {
            return Ok(RObject::new(RValue::Char(None)));
        }
        if n < 0 {
            bail!("negative string length {}", n);
        }
        let bytes = self.buf.read_bytes(n as usize)?;
        let s = if flags.levels & LATIN1_MASK != 0 {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(RObject::new(RValue::Char(Some(s))))
    }

    /// Pairlist-shaped cells. The CDR chain is walked iteratively so long
    /// attribute lists or workspaces do not grow the stack.
    fn read_pairlist(&mut self, first: Flags) -> Result<RObject> {
        let kind = first.sexp_type;
        let mut items = Vec::new();
        let mut head_attributes = Vec::new();
        let mut flags = first;

        loop {
            if flags.has_attr {
                let attrs = self.read_attributes()?;
                if items.is_empty() {
                    head_attributes = attrs;
                }
            }
            let tag = if flags.has_tag {
                match self.read_item()?.value {
                    RValue::Symbol(s) => Some(s),
                    RValue::Char(s) => s,
                    _ => None,
                }
            } else {
                None
            };
            let car = self.read_item()?;
            items.push((tag, car));

            let next = Flags::unpack(self.buf.read_i32()?);
            match next.sexp_type {
                NILVALUE_SXP => break,
                LISTSXP | ATTRLISTSXP => flags = next,
                _ => {
                    // dotted pair
                    let tail = self.read_item_with(next)?;
                    items.push((None, tail));
                    break;
                }
            }
        }

        let value = match kind {
            LISTSXP | ATTRLISTSXP => RValue::Pairlist(items),
            _ => RValue::Language(items),
        };
        Ok(RObject {
            value,
            attributes: head_attributes,
        })
    }

    /// ALTREP objects are written as (class info, state, attributes); the
    /// classes R uses for plain vectors are expanded back to ordinary vectors.
    fn read_altrep(&mut self) -> Result<RObject> {
        let info = self.read_item()?;
        let state = self.read_item()?;
        let attr = self.read_item()?;

        let class = match &info.value {
            RValue::Pairlist(items) | RValue::Language(items) => match items.first() {
                Some((_, RObject { value: RValue::Symbol(s), .. })) => s.clone(),
                _ => bail!("ALTREP class info has no class symbol"),
            },
            other => bail!("ALTREP class info is {:?}", other),
        };

        let mut obj = match class.as_str() {
            "compact_intseq" => {
                let (n, start, step) = seq_state(&state)?;
                RObject::new(RValue::Integer(
                    (0..n).map(|i| (start + step * i as f64) as i32).collect(),
                ))
            }
            "compact_realseq" => {
                let (n, start, step) = seq_state(&state)?;
                RObject::new(RValue::Real((0..n).map(|i| start + step * i as f64).collect()))
            }
            c if c.starts_with("wrap_") => match state.value {
                RValue::List(mut parts) if !parts.is_empty() => parts.swap_remove(0),
                other => bail!("{} state is {:?}", c, other),
            },
            "deferred_string" => {
                let arg = match state.value {
                    RValue::Pairlist(mut items) | RValue::Language(mut items) if !items.is_empty() => {
                        items.swap_remove(0).1
                    }
                    other => bail!("deferred_string state is {:?}", other),
                };
                RObject::new(RValue::Character(deferred_strings(&arg)?))
            }
            other => bail!("ALTREP class `{}` is not supported", other),
        };

        match attr.value {
            RValue::Pairlist(items) => {
                obj.attributes = items
                    .into_iter()
                    .map(|(tag, v)| (tag.unwrap_or_default(), v))
                    .collect();
            }
            RValue::Null => {}
            other => bail!("ALTREP attributes are {:?}", other),
        }
        Ok(obj)
    }
}

fn seq_state(state: &RObject) -> Result<(usize, f64, f64)> {
    let v: Vec<f64> = match &state.value {
        RValue::Real(v) => v.clone(),
        RValue::Integer(v) => v.iter().map(|&i| i as f64).collect(),
        other => bail!("compact sequence state is {:?}", other),
    };
    if v.len() != 3 || v[0] < 0.0 || v[0].fract() != 0.0 {
        bail!("compact sequence state {:?} is malformed", v);
    }
    if v[0] > MAX_COMPACT_LEN as f64 {
        bail!("compact sequence of {} elements exceeds {}", v[0], MAX_COMPACT_LEN);
    }
    Ok((v[0] as usize, v[1], v[2]))
}

fn deferred_strings(arg: &RObject) -> Result<Vec<Option<String>>> {
    Ok(match &arg.value {
        RValue::Integer(v) => v
            .iter()
            .map(|&i| (i != NA_INTEGER).then(|| i.to_string()))
            .collect(),
        RValue::Real(v) => v
            .iter()
            .map(|&x| (!is_na_real(x)).then(|| format_real(x)))
            .collect(),
        other => bail!("deferred_string over {:?}", other),
    })
}

/// `as.character()` rendering for doubles.
fn format_real(x: f64) -> String {
    if x.is_nan() {
        "NaN".into()
    } else if x.is_infinite() {
        if x > 0.0 { "Inf".into() } else { "-Inf".into() }
    } else {
        format!("{x}")
    }
}
