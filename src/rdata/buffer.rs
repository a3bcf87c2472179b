// src/rdata/buffer.rs
//! Cursor over XDR (big-endian) encoded R serialization data.

use anyhow::{bail, Result};

pub struct XdrBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            bail!(
                "unexpected end of data: need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            );
        }
        Ok(())
    }

    /// Read a sub-slice of `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// True (and consumes it) when the upcoming bytes equal `magic`.
    pub fn eat(&mut self, magic: &[u8]) -> bool {
        if self.data[self.pos..].starts_with(magic) {
            self.pos += magic.len();
            true
        } else {
            false
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let b = self.read_bytes(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Vector length; `-1` announces a long vector stored as two 32-bit halves.
    pub fn read_length(&mut self) -> Result<usize> {
        match self.read_i32()? {
            -1 => {
                let upper = self.read_i32()? as u32 as u64;
                let lower = self.read_i32()? as u32 as u64;
                usize::try_from((upper << 32) | lower)
                    .map_err(|_| anyhow::anyhow!("long vector length does not fit in memory"))
            }
            n if n < 0 => bail!("negative vector length {} at offset {}", n, self.pos),
            n => Ok(n as usize),
        }
    }

    pub fn read_i32_vec(&mut self, n: usize) -> Result<Vec<i32>> {
        let bytes = self.read_bytes(checked_size(n, 4)?)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn read_f64_vec(&mut self, n: usize) -> Result<Vec<f64>> {
        let bytes = self.read_bytes(checked_size(n, 8)?)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|b| f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }
}

fn checked_size(n: usize, width: usize) -> Result<usize> {
    n.checked_mul(width)
        .ok_or_else(|| anyhow::anyhow!("vector of {} elements overflows", n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_values() {
        let mut data = Vec::new();
        data.extend_from_slice(&7i32.to_be_bytes());
        data.extend_from_slice(&(-2i32).to_be_bytes());
        data.extend_from_slice(&1.5f64.to_be_bytes());
        let mut buf = XdrBuffer::new(&data);
        assert_eq!(buf.read_i32().unwrap(), 7);
        assert_eq!(buf.read_i32().unwrap(), -2);
        assert_eq!(buf.read_f64().unwrap(), 1.5);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn truncated_read_is_an_error() {
        let data = [0u8, 0, 1];
        let mut buf = XdrBuffer::new(&data);
        let err = buf.read_i32().unwrap_err();
        assert!(err.to_string().contains("unexpected end of data"));
    }

    #[test]
    fn long_length_and_vectors() {
        let mut data = Vec::new();
        data.extend_from_slice(&(-1i32).to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&3i32.to_be_bytes());
        for v in [1i32, 2, 3] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let mut buf = XdrBuffer::new(&data);
        let n = buf.read_length().unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf.read_i32_vec(n).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn eat_matches_prefix_only() {
        let mut buf = XdrBuffer::new(b"RDX3\nX\n");
        assert!(!buf.eat(b"RDX2\n"));
        assert!(buf.eat(b"RDX3\n"));
        assert_eq!(buf.pos(), 5);
        assert!(buf.eat(b"X\n"));
    }
}
