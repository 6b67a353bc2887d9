//! FITS-flavoured textual header: fixed 2880-byte blocks of 36 80-byte
//! ASCII lines, terminated by an `END` line, backed by an owned `Vec<u8>`.

use anyhow::{ensure, Context, Result};
use std::io::{Read, Write};

pub const LINE_SIZE: usize = 80;
pub const LINES_PER_BLOCK: usize = 36;
pub const BLOCK_SIZE: usize = LINE_SIZE * LINES_PER_BLOCK; // 2880
pub const KEYWORD_SIZE: usize = 8;
const KEY_FIELD_SIZE: usize = 10; // keyword (8) + "=" + " "
const VALUE_SIZE: usize = LINE_SIZE - KEY_FIELD_SIZE; // 70
const FIXED_WIDTH: usize = 20;

/// A FITS-style textual header: a sequence of 80-byte ASCII lines grouped
/// into 2880-byte blocks, terminated by a single `END` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    raw: Vec<u8>,
}

impl Header {
    /// Build the minimal header for a blank cube of the given geometry and
    /// `BITPIX`, writing just the handful of mandatory keywords.
    pub fn blank(nx: usize, ny: usize, nz: usize, bitpix: i32) -> Self {
        let mut h = Header {
            raw: vec![b' '; BLOCK_SIZE],
        };
        h.write_end_at(0);
        h.put_bool("SIMPLE", true);
        h.put_int("BITPIX", bitpix as i64);
        let naxis = if nz > 1 { 3 } else if ny > 1 { 2 } else { 1 };
        h.put_int("NAXIS", naxis as i64);
        h.put_int("NAXIS1", nx as i64);
        if naxis >= 2 {
            h.put_int("NAXIS2", ny as i64);
        }
        if naxis >= 3 {
            h.put_int("NAXIS3", nz as i64);
        }
        h
    }

    /// Parse header blocks from `reader` until the `END` line is found.
    /// Returns the parsed header; the reader is left positioned at the
    /// first byte of sample data (the next 2880-byte boundary).
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = Vec::with_capacity(BLOCK_SIZE);
        let mut end_found = false;

        while !end_found {
            let start = raw.len();
            raw.resize(start + BLOCK_SIZE, 0);
            reader
                .read_exact(&mut raw[start..])
                .context("FITS file ended unexpectedly while reading header")?;

            for line in raw[start..].chunks_exact(LINE_SIZE) {
                if &line[..3] == b"END" {
                    end_found = true;
                    break;
                }
            }
        }

        ensure!(
            raw.len() >= LINE_SIZE && &raw[..6] == b"SIMPLE",
            "file does not appear to be a FITS file (missing SIMPLE keyword)"
        );

        let header = Header { raw };
        ensure!(
            header.check("END").is_some(),
            "no END keyword found in FITS header"
        );
        Ok(header)
    }

    /// Write the header's raw bytes to `writer`.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.raw).context("failed to write FITS header")
    }

    /// Total size of the header in bytes; always a positive multiple of
    /// [`BLOCK_SIZE`].
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.raw.chunks_exact(LINE_SIZE)
    }

    /// 1-based line number of the first occurrence of `key`, or `None`.
    pub fn check(&self, key: &str) -> Option<usize> {
        assert!(!key.is_empty() && key.len() <= KEYWORD_SIZE, "illegal FITS header keyword: {key}");
        for (i, line) in self.lines().enumerate() {
            if line.starts_with(key.as_bytes()) {
                let next = line.get(key.len()).copied().unwrap_or(b' ');
                if next == b' ' || next == b'=' {
                    return Some(i + 1);
                }
            }
        }
        tracing::warn!(key, "header keyword not found");
        None
    }

    /// Raw 70-byte value field of the first occurrence of `key`.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        for line in self.lines() {
            if line.starts_with(key.as_bytes()) {
                let value = &line[KEY_FIELD_SIZE..];
                return Some(String::from_utf8_lossy(value).into_owned());
            }
        }
        tracing::warn!(key, "header keyword not found");
        None
    }

    pub fn get_int(&self, key: &str) -> i64 {
        match self.get_raw(key) {
            Some(v) => v.trim().parse().unwrap_or(0),
            None => 0,
        }
    }

    pub fn get_flt(&self, key: &str) -> f64 {
        match self.get_raw(key) {
            Some(v) => v.trim().parse().unwrap_or(f64::NAN),
            None => f64::NAN,
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get_raw(key) {
            Some(v) => v.trim_start().as_bytes().first() == Some(&b'T'),
            None => false,
        }
    }

    /// Retrieve a quoted string value, unescaping doubled single quotes.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let raw = self.get_raw(key)?;
        let left = raw.find('\'')?;
        let bytes = raw.as_bytes();
        let mut i = left + 1;
        let mut out = String::new();
        loop {
            let right = raw[i..].find('\'').map(|p| p + i)?;
            out.push_str(&raw[i..right]);
            if bytes.get(right + 1) == Some(&b'\'') {
                out.push('\'');
                i = right + 2;
                continue;
            }
            break;
        }
        Some(out)
    }

    fn write_end_at(&mut self, line_index: usize) {
        let off = line_index * LINE_SIZE;
        self.raw[off..off + LINE_SIZE].fill(b' ');
        self.raw[off..off + 3].copy_from_slice(b"END");
    }

    /// Write a raw 70-byte value buffer (already padded/formatted) into the
    /// header, creating a new entry just before `END` if the keyword does
    /// not already exist. Returns `true` if an existing entry was
    /// overwritten, `false` if a new one was created.
    fn put_raw(&mut self, key: &str, buffer: &[u8]) -> bool {
        assert!(!key.is_empty() && key.len() <= KEYWORD_SIZE, "illegal FITS header keyword: {key}");
        assert_eq!(buffer.len(), VALUE_SIZE);

        if let Some(line) = self.check(key) {
            let off = (line - 1) * LINE_SIZE + KEY_FIELD_SIZE;
            self.raw[off..off + VALUE_SIZE].copy_from_slice(buffer);
            return true;
        }

        tracing::warn!(key, "header keyword not found; creating new entry");
        let end_line = self.check("END").expect("header missing END keyword");

        if end_line % LINES_PER_BLOCK == 0 {
            tracing::warn!("expanding header to fit new entry");
            self.raw.resize(self.raw.len() + BLOCK_SIZE, b' ');
        }

        let off = (end_line - 1) * LINE_SIZE;
        self.raw[off..off + LINE_SIZE].fill(b' ');
        self.raw[off..off + key.len()].copy_from_slice(key.as_bytes());
        self.raw[off + KEYWORD_SIZE..off + KEYWORD_SIZE + 1].copy_from_slice(b"=");
        self.raw[off + KEY_FIELD_SIZE..off + LINE_SIZE].copy_from_slice(buffer);
        self.write_end_at(end_line);
        false
    }

    pub fn put_int(&mut self, key: &str, value: i64) -> bool {
        let mut buf = [b' '; VALUE_SIZE];
        let text = format!("{value:>width$}", width = FIXED_WIDTH);
        buf[..FIXED_WIDTH].copy_from_slice(text.as_bytes());
        self.put_raw(key, &buf)
    }

    pub fn put_flt(&mut self, key: &str, value: f64) -> bool {
        let mut buf = [b' '; VALUE_SIZE];
        let text = format!("{value:>width$.11E}", width = FIXED_WIDTH);
        let text = if text.len() > FIXED_WIDTH {
            text[text.len() - FIXED_WIDTH..].to_string()
        } else {
            text
        };
        buf[..FIXED_WIDTH].copy_from_slice(text.as_bytes());
        self.put_raw(key, &buf)
    }

    pub fn put_bool(&mut self, key: &str, value: bool) -> bool {
        let mut buf = [b' '; VALUE_SIZE];
        buf[FIXED_WIDTH - 1] = if value { b'T' } else { b'F' };
        self.put_raw(key, &buf)
    }

    pub fn put_str(&mut self, key: &str, value: &str) -> Result<bool> {
        ensure!(value.len() <= VALUE_SIZE - 2, "string too long for FITS header line");
        let mut buf = [b' '; VALUE_SIZE];
        buf[0] = b'\'';
        buf[1..1 + value.len()].copy_from_slice(value.as_bytes());
        buf[1 + value.len()] = b'\'';
        Ok(self.put_raw(key, &buf))
    }

    /// Delete every occurrence of `key`, shrinking trailing empty blocks if
    /// possible. Returns `true` if the keyword was found and removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let mut found_any = false;

        while let Some(line) = self.check(key) {
            found_any = true;
            let off = (line - 1) * LINE_SIZE;
            self.raw.copy_within(off + LINE_SIZE.., off);
            let tail = self.raw.len() - LINE_SIZE;
            self.raw[tail..].fill(b' ');
        }

        if !found_any {
            return false;
        }

        let end_line = self.check("END").expect("header missing END keyword after delete");
        let last_line = self.raw.len() / LINE_SIZE;
        let empty_blocks = (last_line - end_line) / LINES_PER_BLOCK;

        if empty_blocks > 0 {
            tracing::warn!("reducing size of header to remove empty block(s)");
            let new_len = self.raw.len() - empty_blocks * BLOCK_SIZE;
            self.raw.truncate(new_len);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_header_has_mandatory_keywords() {
        let h = Header::blank(64, 64, 32, -32);
        assert_eq!(h.size(), BLOCK_SIZE);
        assert_eq!(h.get_int("NAXIS"), 3);
        assert_eq!(h.get_int("NAXIS1"), 64);
        assert_eq!(h.get_int("NAXIS2"), 64);
        assert_eq!(h.get_int("NAXIS3"), 32);
        assert_eq!(h.get_int("BITPIX"), -32);
        assert!(h.get_bool("SIMPLE"));
    }

    #[test]
    fn put_and_get_round_trip() {
        let mut h = Header::blank(4, 4, 1, 8);
        h.put_flt("CRVAL1", 123.5);
        assert!((h.get_flt("CRVAL1") - 123.5).abs() < 1e-9);
        h.put_str("CTYPE1", "RA---TAN").unwrap();
        assert_eq!(h.get_str("CTYPE1").as_deref(), Some("RA---TAN"));
    }

    #[test]
    fn delete_removes_key_and_shrinks_empty_block() {
        let mut h = Header::blank(4, 4, 1, 8);
        // Force the header to grow by adding enough keys to fill a block.
        for i in 0..40 {
            h.put_int(&format!("KEY{i:05}"), i as i64);
        }
        assert!(h.size() > BLOCK_SIZE);
        for i in 0..40 {
            assert!(h.delete(&format!("KEY{i:05}")));
        }
        assert_eq!(h.size(), BLOCK_SIZE);
    }

    #[test]
    fn missing_key_returns_sentinels() {
        let h = Header::blank(4, 4, 1, 8);
        assert_eq!(h.get_int("NOSUCH"), 0);
        assert!(h.get_flt("NOSUCH").is_nan());
        assert!(!h.get_bool("NOSUCH"));
        assert!(h.get_str("NOSUCH").is_none());
    }

    #[test]
    fn check_finds_one_based_line_number() {
        let h = Header::blank(4, 4, 1, 8);
        assert_eq!(h.check("SIMPLE"), Some(1));
    }
}
