//! Keyed record collections.
//!
//! A [`CollectionBackend`] stores opaque encoded records under string keys;
//! [`Collection`] layers the record codec on top and tags every failure with
//! the collection's entity name. Backends are swappable: ingest fills an
//! in-memory map, a loaded store reads straight out of the mapped container.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::codec::Record;
use crate::error::{Result, StoreError};

pub trait CollectionBackend: Send + Sync {
    /// Inserts or replaces the record stored under `key`.
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    fn get(&self, key: &str) -> Option<&[u8]>;

    /// Visits every entry. The order is backend-defined.
    fn scan(&self, visit: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            entries: HashMap::new(),
        }
    }
}

impl CollectionBackend for MemoryBackend {
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    fn scan(&self, visit: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        for (key, value) in &self.entries {
            visit(key, value)?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Typed view over a backend for one entity type or index.
pub struct Collection<T: Record> {
    entity: &'static str,
    backend: Box<dyn CollectionBackend>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Collection<T> {
    pub fn new(entity: &'static str, backend: Box<dyn CollectionBackend>) -> Self {
        Collection {
            entity,
            backend,
            _record: PhantomData,
        }
    }

    pub fn in_memory(entity: &'static str) -> Self {
        Self::new(entity, Box::new(MemoryBackend::new()))
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn put(&mut self, key: &str, record: &T) -> Result<()> {
        self.backend.put(key, record.encode())
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<T> {
        T::decode(key, bytes).map_err(|source| StoreError::Decode {
            entity: self.entity,
            key: key.to_owned(),
            source,
        })
    }

    /// Absent keys yield [`StoreError::NotFound`], never a decode error.
    pub fn get(&self, key: &str) -> Result<T> {
        match self.backend.get(key) {
            Some(bytes) => self.decode(key, bytes),
            None => Err(StoreError::not_found(self.entity, key)),
        }
    }

    /// Like [`Collection::get`], with absence as `None`.
    pub fn find(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn scan_all(&self, mut visit: impl FnMut(T) -> Result<()>) -> Result<()> {
        self.backend
            .scan(&mut |key, bytes| visit(self.decode(key, bytes)?))
    }

    pub fn scan_where(&self, mut predicate: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let mut matches = vec![];
        self.scan_all(|record| {
            if predicate(&record) {
                matches.push(record);
            }
            Ok(())
        })?;
        Ok(matches)
    }

    pub fn get_all(&self) -> Result<Vec<T>> {
        self.scan_where(|_| true)
    }

    /// Raw `(key, encoded record)` pairs sorted by key, as written to a
    /// container section.
    pub fn snapshot(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::with_capacity(self.len());
        self.backend.scan(&mut |key, bytes| {
            entries.push((key.to_owned(), bytes.to_vec()));
            Ok(())
        })?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
