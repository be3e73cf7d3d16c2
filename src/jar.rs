//! Enumeration of class files inside jar archives.
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use log::debug;
use thiserror::Error;
use zip::ZipArchive;

use crate::classfile::ClassFile;
use crate::error::ParseError;

#[derive(Debug, Error)]
pub enum JarError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to parse {entry}: {source}")]
    Class {
        entry: String,
        #[source]
        source: ParseError,
    },
}

/// Decode every `.class` entry of an archive, in archive order.
/// Returns `(entry_name, class)` pairs; other entries are skipped.
pub fn archive_classes<R: Read + Seek>(
    reader: R,
) -> Result<Vec<(String, ClassFile)>, JarError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut classes = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if !entry.name().ends_with(".class") {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        debug!("decoding archive entry {name} ({} bytes)", data.len());
        let class = ClassFile::parse(&data).map_err(|source| JarError::Class {
            entry: name.clone(),
            source,
        })?;
        classes.push((name, class));
    }
    Ok(classes)
}

/// Decode every class in the jar file at `path`.
pub fn jar_classes(path: &Path) -> Result<Vec<(String, ClassFile)>, JarError> {
    archive_classes(File::open(path)?)
}
