// coati is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The file-info store: path → (mode, owner name, group name).
//!
//! Paths and names are raw byte sequences; filesystem names are not
//! required to be valid text and must round-trip byte-exact. The
//! persisted form is one record per line
//!
//! ```text
//! <mode> <owner> <group> <path>
//! ```
//!
//! where the three byte fields are escaped so that embedded spaces,
//! newlines and control bytes survive (`\xNN` escapes), and the whole
//! file is bzip2-compressed. Loading skips malformed lines instead of
//! failing the whole store.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use bzip2::{Compression, read::BzDecoder, write::BzEncoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfoEntry {
    pub mode: u32,
    pub user: Vec<u8>,
    pub group: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    entries: BTreeMap<Vec<u8>, FileInfoEntry>,
}

/// Escapes backslashes, whitespace and control bytes as `\xNN`.
fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\\' || b <= 0x20 || b == 0x7f {
            out.extend_from_slice(format!("\\x{b:02x}").as_bytes());
        } else {
            out.push(b);
        }
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Reverses [`escape`]. Returns `None` on truncated or invalid escapes.
fn unescape(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.get(i + 1) != Some(&b'x') {
                return None;
            }
            let hi = hex_digit(*bytes.get(i + 2)?)?;
            let lo = hex_digit(*bytes.get(i + 3)?)?;
            out.push((hi << 4) | lo);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

impl FileInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<K: AsRef<[u8]>>(&mut self, path: K, mode: u32, user: &[u8], group: &[u8]) {
        self.entries.insert(
            path.as_ref().to_vec(),
            FileInfoEntry {
                mode,
                user: user.to_vec(),
                group: group.to_vec(),
            },
        );
    }

    pub fn lookup<K: AsRef<[u8]>>(&self, path: K) -> Option<&FileInfoEntry> {
        self.entries.get(path.as_ref())
    }

    pub fn contains<K: AsRef<[u8]>>(&self, path: K) -> bool {
        self.entries.contains_key(path.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &FileInfoEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Saves the store bzip2-compressed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Could not create '{}'", path.display()))?;
        let mut encoder = BzEncoder::new(file, Compression::best());

        for (key, entry) in &self.entries {
            let mut line = entry.mode.to_string().into_bytes();
            line.push(b' ');
            line.extend_from_slice(&escape(&entry.user));
            line.push(b' ');
            line.extend_from_slice(&escape(&entry.group));
            line.push(b' ');
            line.extend_from_slice(&escape(key));
            line.push(b'\n');
            encoder.write_all(&line)?;
        }

        encoder
            .finish()
            .with_context(|| format!("Could not write '{}'", path.display()))?;
        Ok(())
    }

    /// Loads a store previously written by [`FileInfo::save`].
    /// Malformed lines are skipped silently.
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Could not open '{}'", path.display()))?;
        let mut decoder = BzDecoder::new(file);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .with_context(|| format!("Could not decompress '{}'", path.display()))?;

        let mut store = Self::new();
        for line in data.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&[u8]> = line.splitn(4, |&b| b == b' ').collect();
            if fields.len() != 4 {
                continue;
            }

            let Ok(mode) = std::str::from_utf8(fields[0]).unwrap_or("").parse::<u32>() else {
                continue;
            };
            let (Some(user), Some(group), Some(key)) = (
                unescape(fields[1]),
                unescape(fields[2]),
                unescape(fields[3]),
            ) else {
                continue;
            };

            store.record(key, mode, &user, &group);
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use bzip2::write::BzEncoder;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let mut store = FileInfo::new();
        store.record(b"/tmp", 123, b"foo", b"bar");
        store.record(b"/tmp/foo", 456, b"asdf", b"qwer");

        assert!(store.contains(b"/tmp"));
        assert_eq!(
            store.lookup(b"/tmp"),
            Some(&FileInfoEntry {
                mode: 123,
                user: b"foo".to_vec(),
                group: b"bar".to_vec(),
            })
        );
        assert_eq!(store.lookup(b"/nothing"), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("fileinfo.bz2");

        let mut store = FileInfo::new();
        store.record(b"/tmp", 16893, b"foo", b"bar");
        store.record(b"/tmp/foo", 33204, b"asdf", b"qwer");

        store.save(&path)?;
        let loaded = FileInfo::load(&path)?;

        assert_eq!(loaded, store);

        Ok(())
    }

    #[test]
    fn test_roundtrip_preserves_awkward_bytes() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("fileinfo.bz2");

        let mut store = FileInfo::new();
        store.record(b"/tmp/with space", 33204, b"user name", b"group\tname");
        store.record(b"/tmp/new\nline", 33188, b"back\\slash", b"group");
        store.record(b"/tmp/\xff\xfe not utf8", 33188, b"u", b"g");

        store.save(&path)?;
        let loaded = FileInfo::load(&path)?;

        assert_eq!(loaded, store);
        assert!(loaded.contains(b"/tmp/new\nline"));
        assert!(loaded.contains(b"/tmp/\xff\xfe not utf8"));

        Ok(())
    }

    #[test]
    fn test_load_skips_malformed_lines() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("fileinfo.bz2");

        let file = File::create(&path)?;
        let mut encoder = BzEncoder::new(file, Compression::best());
        encoder.write_all(b"16893 foo bar /tmp\n")?;
        encoder.write_all(b"this is not a record\n")?;
        encoder.write_all(b"notanumber foo bar /tmp/broken\n")?;
        encoder.write_all(b"33204 asdf qwer /tmp/foo\n")?;
        encoder.finish()?;

        let loaded = FileInfo::load(&path)?;
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(b"/tmp"));
        assert!(loaded.contains(b"/tmp/foo"));

        Ok(())
    }
}
