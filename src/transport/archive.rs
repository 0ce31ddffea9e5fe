//! Lazy iteration over the files of a package archive.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use super::TransportError;

/// Open an in-memory zip archive.
pub fn unpack(bytes: Vec<u8>) -> Result<ArchiveEntries, TransportError> {
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    Ok(ArchiveEntries { archive, index: 0 })
}

/// Single-pass sequence of `(filename, bytes)` pairs. Directory entries are
/// skipped; filenames are relative and `/`-separated.
pub struct ArchiveEntries {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    index: usize,
}

impl Iterator for ArchiveEntries {
    type Item = Result<(String, Vec<u8>), TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.archive.len() {
            let i = self.index;
            self.index += 1;

            let mut file = match self.archive.by_index(i) {
                Ok(file) => file,
                Err(e) => return Some(Err(e.into())),
            };
            if file.is_dir() {
                continue;
            }
            let Some(name) = file.enclosed_name() else {
                return Some(Err(TransportError::UnsafeEntry(file.name().to_string())));
            };
            let name = name.to_string_lossy().replace('\\', "/");

            let mut bytes = super::prealloc(file.size());
            if let Err(e) = file.read_to_end(&mut bytes) {
                return Some(Err(TransportError::Io {
                    uri: name,
                    source: e,
                }));
            }
            return Some(Ok((name, bytes)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("Coq/", SimpleFileOptions::default())
            .unwrap();
        for (name, bytes) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn yields_files_and_skips_directories() {
        let bytes = archive(&[("Coq/Init.vo", b"init"), ("Coq/Logic.vo", b"logic")]);
        let entries: Vec<_> = unpack(bytes)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            entries,
            vec![
                ("Coq/Init.vo".to_string(), b"init".to_vec()),
                ("Coq/Logic.vo".to_string(), b"logic".to_vec()),
            ]
        );
    }

    #[test]
    fn garbage_is_not_an_archive() {
        assert!(matches!(
            unpack(b"not a zip".to_vec()),
            Err(TransportError::Archive(_))
        ));
    }
}
