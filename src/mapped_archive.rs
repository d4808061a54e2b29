use std::marker::PhantomData;
use std::path::Path;

use rkyv::api::high::HighValidator;
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;

use crate::error::{Result, StoreError};

/// A read-only memory mapping of an rkyv archive file.
///
/// The archive is validated once when the file is opened. Every later access
/// goes through `access_unchecked`, which is sound because the mapping never
/// changes while this value is alive.
pub struct MappedArchive<Archive: rkyv::Portable> {
    mmap: memmap2::Mmap,
    _archive: PhantomData<fn() -> Archive>,
}

impl<Archive> MappedArchive<Archive>
where
    Archive: rkyv::Portable + for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
{
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(StoreError::io(path))?;
        // Safety: This is safe for as long as the underlying file is not modified.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(StoreError::io(path))?;
        rkyv::access::<Archive, rancor::Error>(&mmap)
            .map_err(|err| StoreError::Archive(err.to_string()))?;
        Ok(MappedArchive {
            mmap,
            _archive: PhantomData,
        })
    }
}

impl<Archive: rkyv::Portable> MappedArchive<Archive> {
    pub fn len_bytes(&self) -> usize {
        self.mmap.len()
    }
}

impl<Archive: rkyv::Portable> std::ops::Deref for MappedArchive<Archive> {
    type Target = Archive;

    fn deref(&self) -> &Self::Target {
        // Safety: The buffer was validated in `open` and the mapping is read-only.
        unsafe { rkyv::access_unchecked::<Archive>(&self.mmap) }
    }
}
