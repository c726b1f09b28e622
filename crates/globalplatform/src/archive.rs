//! CAP archive reader: a thin wrapper over the ZIP container that ships
//! CAP components.

use std::collections::HashMap;
use std::io::Read;

use zip::ZipArchive;

use crate::error::GpError;

/// A case-insensitive `basename -> raw bytes` map of every `.cap`/`.capx`
/// member in a CAP archive.
///
/// Keys are stored exactly as they appear in the archive; lookups are
/// case-insensitive (`header.cap` and `HEADER.CAP` both resolve).
#[derive(Debug, Clone, Default)]
pub struct CapComponents {
    entries: HashMap<String, Vec<u8>>,
}

impl CapComponents {
    /// Open `bytes` as a ZIP container and collect every entry whose
    /// basename (ignoring any directory prefix) ends in `.cap` or `.capx`.
    pub fn read(bytes: &[u8]) -> Result<Self, GpError> {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = ZipArchive::new(cursor)
            .map_err(|e| GpError::CapMalformed(format!("not a valid CAP archive: {e}")))?;

        let mut entries = HashMap::new();
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| GpError::CapMalformed(format!("corrupt archive entry: {e}")))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let basename = name.rsplit('/').next().unwrap_or(&name).to_string();
            let lower = basename.to_ascii_lowercase();
            if !(lower.ends_with(".cap") || lower.ends_with(".capx")) {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| GpError::CapMalformed(format!("failed to read {basename}: {e}")))?;
            entries.insert(basename, data);
        }

        Ok(Self { entries })
    }

    /// Look up a component by basename, case-insensitively.
    pub fn get(&self, basename: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(basename))
            .map(|(_, data)| data.as_slice())
    }

    /// Remove and discard `debug.cap`/`debug.capx`, which are never sent to
    /// the card.
    pub fn without_debug(mut self) -> Self {
        let debug_keys: Vec<String> = self
            .entries
            .keys()
            .filter(|name| {
                let lower = name.to_ascii_lowercase();
                lower == "debug.cap" || lower == "debug.capx"
            })
            .cloned()
            .collect();
        for key in debug_keys {
            self.entries.remove(&key);
        }
        self
    }

    /// Every stored basename.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether the archive has no recognized components.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn build_test_archive(names: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = ZipWriter::new(cursor);
            let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for name in names {
                writer.start_file(*name, options).unwrap();
                writer.write_all(b"stub").unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn collects_cap_and_capx_members_case_insensitively() {
        let archive = build_test_archive(&[
            "pkg/javacard/HEADER.CAP",
            "pkg/javacard/method.capx",
            "pkg/javacard/readme.txt",
        ]);
        let components = CapComponents::read(&archive).unwrap();
        assert!(components.get("header.cap").is_some());
        assert!(components.get("method.capx").is_some());
        assert!(components.get("readme.txt").is_none());
    }

    #[test]
    fn without_debug_strips_debug_component() {
        let archive = build_test_archive(&["header.cap", "debug.cap"]);
        let components = CapComponents::read(&archive).unwrap().without_debug();
        assert!(components.get("header.cap").is_some());
        assert!(components.get("debug.cap").is_none());
    }
}
