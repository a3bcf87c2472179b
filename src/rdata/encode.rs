//! Test-only writer for R's XDR serialization, used to build fixture files.

use std::collections::HashMap;
use std::io::Write;

use super::sexp::*;

const WRITER_VERSION: i32 = 4 * 65536 + 3 * 256 + 1;
const MIN_READER_VERSION: i32 = 3 * 65536 + 5 * 256;

pub(crate) enum Item<'a> {
    Null,
    Int(Vec<i32>),
    Real(Vec<f64>),
    Lgl(Vec<i32>),
    Str(Vec<Option<&'a str>>),
    Latin1(Vec<u8>),
    List(Vec<Item<'a>>),
    Pairlist(Vec<(&'a str, Item<'a>)>),
    /// ALTREP `compact_intseq` as R writes `1:n` style vectors.
    IntSeq { n: usize, start: i32 },
    /// ALTREP `deferred_string` wrapping a numeric vector.
    DeferredString(Box<Item<'a>>),
    Attr(Box<Item<'a>>, Vec<(&'a str, Item<'a>)>),
}

impl<'a> Item<'a> {
    pub fn with_attrs(item: Item<'a>, attrs: Vec<(&'a str, Item<'a>)>) -> Self {
        Item::Attr(Box::new(item), attrs)
    }

    pub fn factor(codes: Vec<i32>, levels: Vec<&'a str>) -> Self {
        Self::with_attrs(
            Item::Int(codes),
            vec![
                ("levels", Item::Str(levels.into_iter().map(Some).collect())),
                ("class", Item::Str(vec![Some("factor")])),
            ],
        )
    }

    pub fn data_frame(columns: Vec<(&'a str, Item<'a>)>, nrow: usize) -> Self {
        let names = columns.iter().map(|(n, _)| Some(*n)).collect();
        let values = columns.into_iter().map(|(_, c)| c).collect();
        Self::with_attrs(
            Item::List(values),
            vec![
                ("names", Item::Str(names)),
                ("class", Item::Str(vec![Some("data.frame")])),
                ("row.names", Item::Int(vec![NA_INTEGER, -(nrow as i32)])),
            ],
        )
    }
}

pub(crate) struct Encoder {
    out: Vec<u8>,
    symbols: HashMap<String, i32>,
}

impl Encoder {
    /// A bare serialization stream, as `saveRDS(compress = FALSE)` writes.
    pub fn rds(version: i32) -> Self {
        let mut e = Self {
            out: Vec::new(),
            symbols: HashMap::new(),
        };
        e.out.extend_from_slice(b"X\n");
        e.i32(version);
        e.i32(WRITER_VERSION);
        e.i32(MIN_READER_VERSION);
        if version == 3 {
            e.i32(5);
            e.out.extend_from_slice(b"UTF-8");
        }
        e
    }

    /// A workspace stream, as `save(compress = FALSE)` writes.
    pub fn rda(version: i32) -> Self {
        let mut e = Self::rds(version);
        let mut out = format!("RDX{version}\n").into_bytes();
        out.append(&mut e.out);
        e.out = out;
        e
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    pub fn i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    pub fn flags(&mut self, ty: u8, has_attr: bool, has_tag: bool) {
        let mut f = ty as i32;
        if has_attr {
            f |= 1 << 9;
        }
        if has_tag {
            f |= 1 << 10;
        }
        self.i32(f);
    }

    fn charsxp(&mut self, s: Option<&str>) {
        match s {
            None => {
                self.flags(CHARSXP, false, false);
                self.i32(-1);
            }
            Some(s) => {
                // UTF8 encoding level
                self.i32(CHARSXP as i32 | (8 << 12));
                self.i32(s.len() as i32);
                self.out.extend_from_slice(s.as_bytes());
            }
        }
    }

    fn symbol(&mut self, name: &str) {
        if let Some(&idx) = self.symbols.get(name) {
            self.i32(REFSXP as i32 | (idx << 8));
            return;
        }
        self.flags(SYMSXP, false, false);
        self.charsxp(Some(name));
        let idx = self.symbols.len() as i32 + 1;
        self.symbols.insert(name.to_string(), idx);
    }

    fn pairlist_cells(&mut self, cells: &[(&str, Item<'_>)]) {
        for (tag, value) in cells {
            self.flags(LISTSXP, false, true);
            self.symbol(tag);
            self.item(value);
        }
        self.flags(NILVALUE_SXP, false, false);
    }

    pub fn item(&mut self, item: &Item<'_>) {
        self.item_with_attrs(item, &[]);
    }

    fn item_with_attrs(&mut self, item: &Item<'_>, attrs: &[(&str, Item<'_>)]) {
        let has_attr = !attrs.is_empty();
        match item {
            Item::Null => self.flags(NILVALUE_SXP, false, false),
            Item::Int(v) => {
                self.flags(INTSXP, has_attr, false);
                self.i32(v.len() as i32);
                for &x in v {
                    self.i32(x);
                }
            }
            Item::Lgl(v) => {
                self.flags(LGLSXP, has_attr, false);
                self.i32(v.len() as i32);
                for &x in v {
                    self.i32(x);
                }
            }
            Item::Real(v) => {
                self.flags(REALSXP, has_attr, false);
                self.i32(v.len() as i32);
                for &x in v {
                    self.out.extend_from_slice(&x.to_be_bytes());
                }
            }
            Item::Str(v) => {
                self.flags(STRSXP, has_attr, false);
                self.i32(v.len() as i32);
                for s in v {
                    self.charsxp(*s);
                }
            }
            Item::Latin1(bytes) => {
                self.flags(STRSXP, has_attr, false);
                self.i32(1);
                self.i32(CHARSXP as i32 | (4 << 12));
                self.i32(bytes.len() as i32);
                self.out.extend_from_slice(bytes);
            }
            Item::List(v) => {
                self.flags(VECSXP, has_attr, false);
                self.i32(v.len() as i32);
                for x in v {
                    self.item(x);
                }
            }
            Item::Pairlist(cells) => {
                self.pairlist_cells(cells);
                return;
            }
            Item::IntSeq { n, start } => {
                self.flags(ALTREP_SXP, false, false);
                self.altrep_info("compact_intseq", INTSXP);
                self.item(&Item::Real(vec![*n as f64, *start as f64, 1.0]));
                self.attr_list(attrs);
                return;
            }
            Item::DeferredString(arg) => {
                self.flags(ALTREP_SXP, false, false);
                self.altrep_info("deferred_string", STRSXP);
                self.flags(LISTSXP, false, false);
                self.item(arg);
                self.item(&Item::Int(vec![0]));
                self.attr_list(attrs);
                return;
            }
            Item::Attr(inner, inner_attrs) => {
                self.item_with_attrs(inner, inner_attrs);
                return;
            }
        }
        if has_attr {
            self.pairlist_cells(attrs);
        }
    }

    fn altrep_info(&mut self, class: &str, ty: u8) {
        self.flags(LISTSXP, false, false);
        self.symbol(class);
        self.flags(LISTSXP, false, false);
        self.symbol("base");
        self.flags(LISTSXP, false, false);
        self.item(&Item::Int(vec![ty as i32]));
        self.flags(NILVALUE_SXP, false, false);
    }

    fn attr_list(&mut self, attrs: &[(&str, Item<'_>)]) {
        if attrs.is_empty() {
            self.flags(NILVALUE_SXP, false, false);
        } else {
            self.pairlist_cells(attrs);
        }
    }
}

/// An uncompressed `.rda` workspace holding the given named objects.
pub(crate) fn rda(version: i32, objects: Vec<(&str, Item<'_>)>) -> Vec<u8> {
    let mut e = Encoder::rda(version);
    e.item(&Item::Pairlist(objects));
    e.finish()
}

pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    enc.write_all(bytes).expect("in-memory gzip");
    enc.finish().expect("in-memory gzip")
}

/// A gzip-compressed workspace with one small policy-like data frame.
pub(crate) fn sample_policies(ids: &[i32]) -> Vec<u8> {
    let n = ids.len();
    let exposure: Vec<f64> = (0..n).map(|i| 0.1 + i as f64 * 0.25).collect();
    let codes: Vec<i32> = (0..n).map(|i| (i % 3) as i32 + 1).collect();
    gzip(&rda(
        3,
        vec![(
            "policies",
            Item::data_frame(
                vec![
                    ("IDpol", Item::Real(ids.iter().map(|&i| i as f64).collect())),
                    ("ClaimNb", Item::Int((0..n).map(|i| (i % 2) as i32).collect())),
                    ("Exposure", Item::Real(exposure)),
                    ("Area", Item::factor(codes, vec!["A", "B", "C"])),
                ],
                n,
            ),
        )],
    ))
}

/// A gzip-compressed workspace with a claims data frame.
pub(crate) fn sample_claims(ids: &[i32], amounts: &[f64]) -> Vec<u8> {
    assert_eq!(ids.len(), amounts.len());
    gzip(&rda(
        3,
        vec![(
            "claims",
            Item::data_frame(
                vec![
                    ("IDpol", Item::Real(ids.iter().map(|&i| i as f64).collect())),
                    ("ClaimAmount", Item::Real(amounts.to_vec())),
                ],
                ids.len(),
            ),
        )],
    ))
}
