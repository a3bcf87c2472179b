// src/rdata/decompress.rs
//! Whole-file decompression for R data files.
//!
//! `save()`/`saveRDS()` compress the serialized stream with gzip (default),
//! bzip2 or xz; the compression is recognised by its magic bytes.

use anyhow::{bail, Context, Result};
use std::io::Read;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Bzip2,
}

pub fn detect(data: &[u8]) -> Compression {
    if data.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else if data.starts_with(XZ_MAGIC) {
        Compression::Xz
    } else if data.starts_with(BZIP2_MAGIC) {
        Compression::Bzip2
    } else {
        Compression::None
    }
}

/// Return the decompressed stream, or the input itself when it is not compressed.
pub fn decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    match detect(&data) {
        Compression::None => Ok(data),
        Compression::Gzip => {
            let mut out = Vec::with_capacity(data.len() * 4);
            flate2::read::MultiGzDecoder::new(data.as_slice())
                .read_to_end(&mut out)
                .context("gzip")?;
            Ok(out)
        }
        Compression::Xz => {
            let mut input = std::io::BufReader::new(data.as_slice());
            let mut out = Vec::with_capacity(data.len() * 4);
            lzma_rs::xz_decompress(&mut input, &mut out).map_err(|e| anyhow::anyhow!("xz: {e}"))?;
            Ok(out)
        }
        Compression::Bzip2 => bail!("bzip2-compressed R data is not supported"),
    }
}
