// src/rdata/mod.rs
//! Reader for R's serialized data files (`.rda`/`.RData` workspaces and
//! single-object `.rds` files).

pub mod buffer;
pub mod decompress;
pub mod frame;
pub mod sexp;

#[cfg(test)]
pub(crate) mod encode;

use anyhow::{bail, Context, Result};
use arrow::record_batch::RecordBatch;
use std::{fs, path::Path};
use tracing::{debug, instrument, warn};

pub use frame::data_frame_to_batch;
pub use sexp::{RObject, RValue, StreamHeader};

/// A decoded file: the stream header plus its named top-level objects.
/// `.rds` files hold a single object named after the file stem.
#[derive(Debug)]
pub struct RFile {
    pub header: StreamHeader,
    pub objects: Vec<(String, RObject)>,
}

impl RFile {
    pub fn names(&self) -> Vec<&str> {
        self.objects.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// The object called `name`, or the first one when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<(&str, &RObject)> {
        let found = match name {
            Some(wanted) => self.objects.iter().find(|(n, _)| n == wanted),
            None => {
                if self.objects.len() > 1 {
                    warn!(
                        objects = ?self.names(),
                        "file holds several objects, taking the first"
                    );
                }
                self.objects.first()
            }
        };
        match found {
            Some((n, obj)) => Ok((n.as_str(), obj)),
            None => match name {
                Some(wanted) => bail!("no object `{}` in file (has {:?})", wanted, self.names()),
                None => bail!("file contains no objects"),
            },
        }
    }
}

/// Decode an (optionally compressed) R data stream held in memory.
pub fn parse_bytes(data: Vec<u8>, default_name: &str) -> Result<RFile> {
    let data = decompress::decompress(data).context("decompressing")?;
    let mut u = sexp::Unserializer::new(&data);
    let workspace = u.workspace_magic()?;
    let header = u.header()?;
    debug!(
        version = header.version,
        writer = %header.writer_release(),
        workspace,
        "R serialization header"
    );

    let top = u.read_item()?;
    let objects = if workspace {
        match top.value {
            RValue::Pairlist(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, (tag, obj))| (tag.unwrap_or_else(|| format!("object{}", i + 1)), obj))
                .collect(),
            RValue::Null => Vec::new(),
            _ => bail!("workspace top level is {}, expected pairlist", top.type_name()),
        }
    } else {
        vec![(default_name.to_string(), top)]
    };
    if u.remaining() > 0 {
        debug!(trailing = u.remaining(), "ignoring trailing bytes after top-level object");
    }
    Ok(RFile { header, objects })
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<RFile> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("object");
    parse_bytes(data, stem)
}

/// Read the selected data frame of an R data file as a record batch.
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn read_table<P: AsRef<Path>>(path: P, object: Option<&str>) -> Result<RecordBatch> {
    let file = read_file(path)?;
    let (name, obj) = file.select(object)?;
    let batch = data_frame_to_batch(obj).with_context(|| format!("converting object `{}`", name))?;
    debug!(object = name, rows = batch.num_rows(), cols = batch.num_columns(), "read table");
    Ok(batch)
}
