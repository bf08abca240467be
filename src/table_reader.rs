//! Shared plumbing for the per-table readers: a windowed view over the
//! mapped combined file and lazy, cached record-batch access.

use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;

use arrow2::array::Array;
use arrow2::chunk::Chunk;
use arrow2::datatypes::Schema;
use arrow2::io::ipc::read::{
    read_batch, read_file_dictionaries, read_file_metadata, Dictionaries, FileMetadata,
};
use lru::LruCache;

use crate::error::{Pod5Error, Result};
use crate::schema::SchemaMetadata;

/// Shared immutable bytes backing a combined file: either a memory map or an
/// owned buffer.
#[derive(Clone)]
pub(crate) struct SharedBytes(Arc<dyn AsRef<[u8]> + Send + Sync>);

impl SharedBytes {
    pub(crate) fn from_mmap(map: memmap2::Mmap) -> Self {
        struct MapBytes(memmap2::Mmap);
        impl AsRef<[u8]> for MapBytes {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
        Self(Arc::new(MapBytes(map)))
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Arc::new(bytes))
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        self.0.as_ref().as_ref()
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// An (offset, length) window over the outer file. Seeks are translated by
/// the window offset and reads are bounded by the window length, so an Arrow
/// IPC reader can treat the embedded file as standalone.
#[derive(Clone)]
pub(crate) struct SubFile {
    bytes: SharedBytes,
    offset: u64,
    length: u64,
    position: u64,
}

impl SubFile {
    pub(crate) fn new(bytes: SharedBytes, offset: u64, length: u64) -> Result<Self> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Pod5Error::consistency("Embedded file window overflows"))?;
        if end > bytes.len() as u64 {
            return Err(Pod5Error::consistency(format!(
                "Embedded file window [{offset}, {end}) is outside the file of {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes,
            offset,
            length,
            position: 0,
        })
    }

    pub(crate) fn full(bytes: SharedBytes) -> Self {
        let length = bytes.len() as u64;
        Self {
            bytes,
            offset: 0,
            length,
            position: 0,
        }
    }
}

impl Read for SubFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let take = (buf.len() as u64).min(remaining) as usize;
        let start = (self.offset + self.position) as usize;
        buf[..take].copy_from_slice(&self.bytes.as_slice()[start..start + take]);
        self.position += take as u64;
        Ok(take)
    }
}

impl Seek for SubFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.length as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of embedded file",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

/// Lazy record-batch access over one embedded Arrow file. A single-slot
/// cache covers the common sequential and per-read access patterns.
pub(crate) struct TableReader {
    file: SubFile,
    metadata: FileMetadata,
    dictionaries: Dictionaries,
    schema_metadata: SchemaMetadata,
    cache: LruCache<usize, Arc<Chunk<Box<dyn Array>>>>,
    message_scratch: Vec<u8>,
    data_scratch: Vec<u8>,
}

impl TableReader {
    pub(crate) fn open(mut file: SubFile, missing: Pod5Error) -> Result<Self> {
        let metadata = read_file_metadata(&mut file).map_err(|_| missing)?;
        let mut scratch = Vec::new();
        let dictionaries = read_file_dictionaries(&mut file, &metadata, &mut scratch)?;
        let schema_metadata = SchemaMetadata::from_metadata(&metadata.schema.metadata)?;
        Ok(Self {
            file,
            metadata,
            dictionaries,
            schema_metadata,
            cache: LruCache::new(NonZeroUsize::new(1).unwrap()),
            message_scratch: Vec::new(),
            data_scratch: Vec::new(),
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.metadata.schema
    }

    pub(crate) fn schema_metadata(&self) -> &SchemaMetadata {
        &self.schema_metadata
    }

    pub(crate) fn num_record_batches(&self) -> usize {
        self.metadata.blocks.len()
    }

    pub(crate) fn read_record_batch(
        &mut self,
        index: usize,
    ) -> Result<Arc<Chunk<Box<dyn Array>>>> {
        if index >= self.num_record_batches() {
            return Err(Pod5Error::invalid_argument(format!(
                "Record batch {index} is outside the table's {} batches",
                self.num_record_batches()
            )));
        }
        if let Some(chunk) = self.cache.get(&index) {
            return Ok(Arc::clone(chunk));
        }
        let chunk = read_batch(
            &mut self.file,
            &self.dictionaries,
            &self.metadata,
            None,
            None,
            index,
            &mut self.message_scratch,
            &mut self.data_scratch,
        )?;
        let chunk = Arc::new(chunk);
        self.cache.put(index, Arc::clone(&chunk));
        Ok(chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subfile_window() -> eyre::Result<()> {
        let bytes = SharedBytes::from_vec((0u8..64).collect());
        let mut sub = SubFile::new(bytes, 16, 8)?;
        let mut buf = [0u8; 4];
        sub.read_exact(&mut buf)?;
        assert_eq!(buf, [16, 17, 18, 19]);
        sub.seek(SeekFrom::End(-2))?;
        let mut buf = [0u8; 2];
        sub.read_exact(&mut buf)?;
        assert_eq!(buf, [22, 23]);
        // Reads stop at the window end.
        assert_eq!(sub.read(&mut [0u8; 4])?, 0);
        Ok(())
    }

    #[test]
    fn test_subfile_rejects_out_of_range_window() {
        let bytes = SharedBytes::from_vec(vec![0u8; 16]);
        assert!(SubFile::new(bytes, 12, 8).is_err());
    }
}
