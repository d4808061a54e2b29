//! Single-file persistence container.
//!
//! A container is one rkyv archive holding a JSON metadata string and one
//! named section per collection. Each section is the collection's snapshot,
//! sorted by key, so a loaded store can serve point lookups by binary search
//! directly out of the memory mapping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collection::CollectionBackend;
use crate::error::{Result, StoreError};
use crate::mapped_archive::MappedArchive;

/// Schema version written by this code. Containers with any other version
/// are rejected on load.
pub const CURRENT_VERSION: u32 = 2;

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug)]
#[rkyv(derive(Debug))]
pub struct ContainerData {
    pub metadata: String,
    pub sections: Vec<SectionData>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug)]
#[rkyv(derive(Debug))]
pub struct SectionData {
    pub name: String,
    pub entries: Vec<EntryData>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug)]
#[rkyv(derive(Debug))]
pub struct EntryData {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    pub version: u32,
    /// Unix timestamp in seconds.
    pub created: i64,
    /// Number of coordinates in the longest shape.
    pub max_shape_length: u32,
}

impl Metadata {
    pub fn new(max_shape_length: u32) -> Self {
        Metadata {
            version: CURRENT_VERSION,
            created: chrono::Utc::now().timestamp(),
            max_shape_length,
        }
    }
}

impl SectionData {
    pub fn new(name: &str, entries: Vec<(String, Vec<u8>)>) -> Self {
        SectionData {
            name: name.to_owned(),
            entries: entries
                .into_iter()
                .map(|(key, value)| EntryData { key, value })
                .collect(),
        }
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes the container next to `path` and moves it into place, so a crash
/// never leaves a half-written file at `path`.
pub fn write_container(path: &Path, metadata: &Metadata, sections: Vec<SectionData>) -> Result<()> {
    let data = ContainerData {
        metadata: serde_json::to_string(metadata)
            .map_err(|err| StoreError::Metadata(err.to_string()))?,
        sections,
    };
    let buffer = rkyv::to_bytes::<rkyv::rancor::Error>(&data)
        .map_err(|err| StoreError::Archive(err.to_string()))?;

    let temporary = temporary_path(path);
    log::info!("Writing {} bytes to {:?}", buffer.len(), temporary);
    std::fs::write(&temporary, buffer.as_slice()).map_err(StoreError::io(&temporary))?;
    std::fs::rename(&temporary, path).map_err(StoreError::io(path))?;
    log::info!("Saved container {:?}", path);
    Ok(())
}

/// An opened and validated container file.
pub struct Container {
    metadata: Metadata,
    archive: Arc<MappedArchive<ArchivedContainerData>>,
    section_indices: HashMap<String, usize>,
}

impl Container {
    /// Maps the file, validates the archive and checks the metadata version.
    pub fn open(path: &Path) -> Result<Self> {
        log::info!("Loading container {:?}", path);
        let archive = MappedArchive::<ArchivedContainerData>::open(path)?;

        let metadata: Metadata = serde_json::from_str(archive.metadata.as_str())
            .map_err(|err| StoreError::Metadata(err.to_string()))?;
        if metadata.version != CURRENT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: CURRENT_VERSION,
                found: metadata.version,
            });
        }

        let section_indices = archive
            .sections
            .iter()
            .enumerate()
            .map(|(i, section)| (section.name.as_str().to_owned(), i))
            .collect();
        log::debug!(
            "Container has {} sections, {} bytes",
            archive.sections.len(),
            archive.len_bytes()
        );

        Ok(Container {
            metadata,
            archive: Arc::new(archive),
            section_indices,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Read-only backend for the named section.
    pub fn section(&self, name: &'static str) -> Result<ArchivedSection> {
        let index = *self
            .section_indices
            .get(name)
            .ok_or(StoreError::MissingSection(name))?;
        let entries = self.archive.sections[index].entries.as_slice();
        if entries
            .windows(2)
            .any(|pair| pair[0].key.as_str() >= pair[1].key.as_str())
        {
            return Err(StoreError::Archive(format!(
                "section {name:?} is not sorted by key"
            )));
        }
        Ok(ArchivedSection {
            name,
            archive: self.archive.clone(),
            index,
        })
    }
}

/// A container section served straight from the mapping.
pub struct ArchivedSection {
    name: &'static str,
    archive: Arc<MappedArchive<ArchivedContainerData>>,
    index: usize,
}

impl ArchivedSection {
    fn entries(&self) -> &[ArchivedEntryData] {
        self.archive.sections[self.index].entries.as_slice()
    }
}

impl CollectionBackend for ArchivedSection {
    fn put(&mut self, _key: &str, _value: Vec<u8>) -> Result<()> {
        Err(StoreError::ReadOnly(self.name))
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        let entries = self.entries();
        entries
            .binary_search_by(|entry| entry.key.as_str().cmp(key))
            .ok()
            .map(|i| entries[i].value.as_slice())
    }

    fn scan(&self, visit: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        for entry in self.entries() {
            visit(entry.key.as_str(), entry.value.as_slice())?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}
