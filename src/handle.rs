//! # File Handle and Chunk API
//!
//! A [`GsdFile`] mediates every read and write of a GSD file. It owns the
//! descriptor, the index cache, and the namelist buffer, and releases all
//! of them when dropped or closed.
//!
//! ## File Layout
//!
//! ```text
//! +--------------------------+  offset 0
//! | header (256 bytes)       |
//! +--------------------------+  header.index_location
//! | index block              |  fixed-size entries, capacity doubles
//! +--------------------------+  header.namelist_location
//! | namelist block           |  128 fixed 128-byte name slots
//! +--------------------------+
//! | chunk payloads ...       |  appended at the file tail
//! +--------------------------+
//! ```
//!
//! After the index outgrows its block it is rewritten at the file tail
//! and the header is repointed; the old block becomes dead space. Chunk
//! payloads always allocate at the current end of file.
//!
//! ## Open Modes
//!
//! - **ReadOnly**: the index is memory-mapped; writes are rejected.
//! - **ReadWrite**: the index is heap-loaded for editing; reads and
//!   writes both work.
//! - **Append**: only the unwritten index tail is cached, keeping memory
//!   flat for long trajectory writes; reads are rejected.
//!
//! ## Durability Ordering
//!
//! Payload bytes are written when the chunk is written; the index entries
//! referencing them are published later, by `end_frame`. A crash between
//! the two leaves orphaned payload bytes past the last published index
//! prefix and nothing else, so committed frames survive. Index growth
//! flushes the relocated block before the header that points to it for
//! the same reason. [`SyncMode::Full`] additionally flushes payloads
//! before each publish so a published entry never references bytes the
//! disk has not accepted.
//!
//! ## Concurrency
//!
//! A handle is single-threaded by contract: no internal locks are taken,
//! and the caller serializes operations. Multiple read-only handles to a
//! file that nobody is writing are safe.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapOptions;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::error::{GsdError, Result};
use crate::index::{self, IndexCache};
use crate::io;
use crate::layout::{
    Header, IndexEntry, NamelistEntry, HEADER_SIZE, INDEX_ENTRY_SIZE, INITIAL_INDEX_ENTRIES,
    INITIAL_NAMELIST_ENTRIES, NAME_SIZE,
};
use crate::namelist::{clamp_name, Namelist};
use crate::types::ElementType;

/// Block size for streaming the index to its new location in append mode.
const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// How a GSD file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read frames; all writes are rejected.
    ReadOnly,
    /// Read and write frames.
    ReadWrite,
    /// Write new frames with a flat memory footprint; reads are rejected.
    Append,
}

/// When chunk payloads are made durable relative to their index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Flush only on index growth and at frame boundaries that changed
    /// the namelist. A crash can leave a published entry whose payload
    /// bytes the disk had not yet accepted.
    Relaxed,
    /// Also flush file data in `end_frame` before new index entries are
    /// written, and flush again after the publish.
    Full,
}

/// An open GSD file.
#[derive(Debug)]
pub struct GsdFile {
    file: File,
    header: Header,
    index: IndexCache,
    namelist: Namelist,
    index_num_entries: u64,
    index_written_entries: u64,
    cur_frame: u64,
    file_size: u64,
    mode: OpenMode,
    sync_mode: SyncMode,
    needs_sync: bool,
}

/// Truncates `file` and writes the initial layout: header, zeroed index
/// block, zeroed namelist block, flushed in that order.
fn initialize_file(
    file: &File,
    application: &str,
    schema: &str,
    schema_version: u32,
) -> Result<()> {
    file.set_len(0)?;

    let header = Header::new(application, schema, schema_version);
    io::pwrite_all(file, header.as_bytes(), 0)?;

    let index = vec![0u8; INITIAL_INDEX_ENTRIES as usize * INDEX_ENTRY_SIZE];
    io::pwrite_all(file, &index, header.index_location())?;

    let namelist = vec![0u8; INITIAL_NAMELIST_ENTRIES as usize * NAME_SIZE];
    io::pwrite_all(file, &namelist, header.namelist_location())?;

    file.sync_all()?;
    Ok(())
}

fn block_len(bytes: u64) -> Result<usize> {
    usize::try_from(bytes).map_err(|_| GsdError::AllocationFailure)
}

impl GsdFile {
    /// Creates a GSD file at `path` with the initial layout and closes it.
    ///
    /// `application` and `schema` are truncated to 63 bytes. An existing
    /// file at `path` is truncated.
    pub fn create(
        path: impl AsRef<Path>,
        application: &str,
        schema: &str,
        schema_version: u32,
    ) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        initialize_file(&file, application, schema, schema_version)
    }

    /// Creates a GSD file and opens it in one step.
    ///
    /// `mode` must be writable. With `exclusive_create` the call fails if
    /// `path` already exists; otherwise an existing file is truncated.
    pub fn create_and_open(
        path: impl AsRef<Path>,
        application: &str,
        schema: &str,
        schema_version: u32,
        mode: OpenMode,
        exclusive_create: bool,
    ) -> Result<Self> {
        if mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable);
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if exclusive_create {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let file = options.open(path)?;
        initialize_file(&file, application, schema, schema_version)?;
        Self::attach(file, mode)
    }

    /// Opens an existing GSD file.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let file = match mode {
            OpenMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite | OpenMode::Append => {
                OpenOptions::new().read(true).write(true).open(path)?
            }
        };
        Self::attach(file, mode)
    }

    /// Reads and validates the header, then builds the in-memory state
    /// for `mode`. The descriptor is released on every error path by
    /// `file` going out of scope.
    fn attach(file: File, mode: OpenMode) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        let read = io::pread_retry(&file, &mut buf, 0)?;
        if read != HEADER_SIZE {
            return Err(GsdError::InvalidFile(
                "file is smaller than a GSD header".into(),
            ));
        }
        let header = Header::read_from_bytes(&buf)
            .map_err(|_| GsdError::InvalidFile("unreadable header".into()))?;
        header.validate()?;

        let file_size = file.metadata()?.len();

        match header.index_location().checked_add(header.index_block_size()) {
            Some(end) if end <= file_size => {}
            _ => {
                return Err(GsdError::CorruptFile(
                    "index block extends past end of file".into(),
                ))
            }
        }
        match header
            .namelist_location()
            .checked_add(header.namelist_block_size())
        {
            Some(end) if end <= file_size => {}
            _ => {
                return Err(GsdError::CorruptFile(
                    "namelist block extends past end of file".into(),
                ))
            }
        }

        // the namelist is small; always hold it on the heap
        let name_slots = block_len(header.namelist_allocated_entries())?;
        let mut names: Vec<NamelistEntry> = Vec::new();
        names.try_reserve_exact(name_slots)?;
        names.resize(name_slots, NamelistEntry::new_zeroed());
        io::pread_exact(
            &file,
            names.as_mut_slice().as_mut_bytes(),
            header.namelist_location(),
        )?;
        let namelist = Namelist::from_entries(names);

        let index = match mode {
            OpenMode::ReadOnly => {
                let len = block_len(header.index_block_size())?;
                // SAFETY: mapping a file is unsafe because another process
                // could mutate it underneath the map. This is safe because:
                // 1. Concurrent writers to an open GSD file are excluded by
                //    the caller contract
                // 2. This handle is read-only and never writes through the map
                // 3. The map's lifetime is tied to the handle, preventing
                //    use-after-unmap
                // 4. The mapped range was bounds-checked against the file
                //    size above
                let map = unsafe {
                    MmapOptions::new()
                        .offset(header.index_location())
                        .len(len)
                        .map(&file)?
                };
                IndexCache::Mapped(map)
            }
            OpenMode::ReadWrite | OpenMode::Append => {
                let slots = block_len(header.index_allocated_entries())?;
                let mut entries: Vec<IndexEntry> = Vec::new();
                entries.try_reserve_exact(slots)?;
                entries.resize(slots, IndexEntry::new_zeroed());
                io::pread_exact(
                    &file,
                    entries.as_mut_slice().as_mut_bytes(),
                    header.index_location(),
                )?;
                IndexCache::Loaded(entries)
            }
        };

        let index_num_entries = index::used_prefix_len(index.slots()?, namelist.len(), file_size)?;
        let cur_frame = if index_num_entries == 0 {
            0
        } else {
            index.slots()?[index_num_entries as usize - 1].frame() + 1
        };

        // every committed entry is on disk; in append mode the full cache
        // is released in favor of the single-frame tail buffer
        let index = match mode {
            OpenMode::Append => {
                let mut tail = Vec::new();
                tail.try_reserve_exact(1)?;
                IndexCache::Tail(tail)
            }
            _ => index,
        };

        Ok(Self {
            file,
            header,
            index,
            namelist,
            index_num_entries,
            index_written_entries: index_num_entries,
            cur_frame,
            file_size,
            mode,
            sync_mode: SyncMode::Relaxed,
            needs_sync: false,
        })
    }

    /// Number of committed frames; also the frame the next chunk lands in.
    pub fn nframes(&self) -> u64 {
        self.cur_frame
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn set_sync_mode(&mut self, sync_mode: SyncMode) {
        self.sync_mode = sync_mode;
    }

    /// Name of the application that created the file.
    pub fn application(&self) -> &str {
        self.header.application()
    }

    /// Name of the data schema.
    pub fn schema(&self) -> &str {
        self.header.schema()
    }

    /// Schema version as packed by [`crate::make_version`].
    pub fn schema_version(&self) -> u32 {
        self.header.schema_version()
    }

    /// File format version as packed by [`crate::make_version`].
    pub fn gsd_version(&self) -> u32 {
        self.header.gsd_version()
    }

    /// Rebuilds the file as empty, keeping the application, schema, and
    /// schema version it was created with, and reloads the handle.
    pub fn truncate(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument(
                "truncate requires a writable mode",
            ));
        }
        let application = self.header.application().to_owned();
        let schema = self.header.schema().to_owned();
        let schema_version = self.header.schema_version();

        initialize_file(&self.file, &application, &schema, schema_version)?;

        let sync_mode = self.sync_mode;
        *self = Self::attach(self.file.try_clone()?, self.mode)?;
        self.sync_mode = sync_mode;
        Ok(())
    }

    /// Closes the file, releasing the map, the caches, and the descriptor.
    ///
    /// Dropping the handle performs the same teardown.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Writes a chunk of `n` rows by `m` columns into the current frame.
    ///
    /// `data` must hold exactly `n * m * sizeof(elem_type)` bytes; `flags`
    /// is reserved and must be zero. The payload lands at the file tail
    /// immediately, but the chunk only becomes visible to readers once
    /// [`end_frame`](Self::end_frame) publishes its index entry.
    ///
    /// The name is interned on first use. Fails with
    /// [`GsdError::NotFound`] when the name table is full.
    pub fn write_chunk(
        &mut self,
        name: &str,
        elem_type: ElementType,
        n: u64,
        m: u32,
        flags: u8,
        data: &[u8],
    ) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument(
                "write_chunk requires a writable mode",
            ));
        }
        if m == 0 {
            return Err(GsdError::InvalidArgument(
                "chunk column count must be nonzero",
            ));
        }
        if flags != 0 {
            return Err(GsdError::InvalidArgument(
                "index entry flags are reserved and must be zero",
            ));
        }
        let size = n
            .checked_mul(m as u64)
            .and_then(|v| v.checked_mul(elem_type.size() as u64))
            .ok_or(GsdError::InvalidArgument("chunk dimensions overflow"))?;
        if data.len() as u64 != size {
            return Err(GsdError::InvalidArgument(
                "data length does not match n * m * sizeof(type)",
            ));
        }

        let id = self.intern_name(clamp_name(name))?;

        // payload first; the entry referencing it is published at the
        // next frame boundary
        let location = self.file_size;
        io::pwrite_all(&self.file, data, location)?;
        self.file_size += size;

        if self.index_num_entries == self.header.index_allocated_entries() {
            self.expand_index()?;
        }

        let entry = IndexEntry::new(self.cur_frame, id, elem_type.tag(), n, m, location);
        match &mut self.index {
            IndexCache::Loaded(entries) => {
                entries[self.index_num_entries as usize] = entry;
            }
            IndexCache::Tail(tail) => {
                index::push_tail(tail, entry)?;
            }
            IndexCache::Mapped(_) => {
                return Err(GsdError::InvalidArgument(
                    "write_chunk requires a writable mode",
                ))
            }
        }
        self.index_num_entries += 1;
        Ok(())
    }

    /// Commits the current frame: unwritten index entries are written to
    /// the index block and the frame counter advances.
    ///
    /// Calling this with no chunks written still advances the counter,
    /// recording an empty frame.
    pub fn end_frame(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument(
                "end_frame requires a writable mode",
            ));
        }
        self.cur_frame += 1;

        let unwritten = self.index_num_entries - self.index_written_entries;
        if unwritten > 0 {
            if self.sync_mode == SyncMode::Full {
                // payloads must be on disk before the entries that
                // reference them
                self.file.sync_all()?;
                self.needs_sync = true;
            }
            let write_pos = self.header.index_location()
                + self.index_written_entries * INDEX_ENTRY_SIZE as u64;
            match &self.index {
                IndexCache::Loaded(entries) => {
                    let start = self.index_written_entries as usize;
                    let end = self.index_num_entries as usize;
                    io::pwrite_all(&self.file, entries[start..end].as_bytes(), write_pos)?;
                }
                IndexCache::Tail(tail) => {
                    io::pwrite_all(&self.file, tail.as_slice().as_bytes(), write_pos)?;
                }
                IndexCache::Mapped(_) => {
                    return Err(GsdError::InvalidArgument(
                        "end_frame requires a writable mode",
                    ))
                }
            }
            self.index_written_entries = self.index_num_entries;
            if let IndexCache::Tail(tail) = &mut self.index {
                tail.clear();
            }
        }

        if self.needs_sync {
            self.file.sync_all()?;
            self.needs_sync = false;
        }
        Ok(())
    }

    /// Locates the chunk `name` in `frame`.
    ///
    /// When the same name was written more than once in a frame, the last
    /// write wins. Unavailable in append mode.
    pub fn find_chunk(&self, frame: u64, name: &str) -> Result<IndexEntry> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::InvalidArgument(
                "find_chunk is unavailable in append mode",
            ));
        }
        if frame >= self.cur_frame {
            return Err(GsdError::NotFound);
        }
        let id = self
            .namelist
            .find(clamp_name(name))
            .ok_or(GsdError::NotFound)?;
        let slots = self.index.slots()?;
        let used = &slots[..self.index_num_entries as usize];
        index::find_entry(used, frame, id)
            .copied()
            .ok_or(GsdError::NotFound)
    }

    /// Reads the payload of `chunk` into the front of `data`.
    ///
    /// `data` must be at least the payload size. Unavailable in append
    /// mode.
    pub fn read_chunk(&self, data: &mut [u8], chunk: &IndexEntry) -> Result<()> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::InvalidArgument(
                "read_chunk is unavailable in append mode",
            ));
        }
        let size = chunk
            .payload_size()
            .ok_or_else(|| GsdError::CorruptFile("chunk payload size overflows".into()))?;
        if size == 0 || chunk.location() == 0 {
            return Err(GsdError::NotFound);
        }
        match chunk.location().checked_add(size) {
            Some(end) if end <= self.file_size => {}
            _ => {
                return Err(GsdError::CorruptFile(
                    "chunk payload extends past end of file".into(),
                ))
            }
        }
        let len = usize::try_from(size)
            .map_err(|_| GsdError::InvalidArgument("buffer too small for chunk payload"))?;
        if data.len() < len {
            return Err(GsdError::InvalidArgument(
                "buffer too small for chunk payload",
            ));
        }
        io::pread_exact(&self.file, &mut data[..len], chunk.location())?;
        Ok(())
    }

    /// Finds the next interned name beginning with `prefix`.
    ///
    /// `prev` is the cursor returned by the previous call, or `None` to
    /// start from the first slot. Returns the cursor and the name.
    pub fn find_matching_chunk_name(
        &self,
        prefix: &str,
        prev: Option<usize>,
    ) -> Option<(usize, &str)> {
        let start = prev.map_or(0, |slot| slot + 1);
        self.namelist.find_matching(prefix, start)
    }

    /// Iterates all interned names beginning with `prefix`.
    pub fn matching_chunk_names<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        let mut cursor = None;
        std::iter::from_fn(move || {
            let (slot, name) = self.find_matching_chunk_name(prefix, cursor)?;
            cursor = Some(slot);
            Some(name)
        })
    }

    /// Returns the id of `name`, interning it when unseen.
    ///
    /// The new slot is written to disk immediately; the flush that makes
    /// it durable is deferred to the next frame boundary.
    fn intern_name(&mut self, name: &str) -> Result<u16> {
        if let Some(id) = self.namelist.find(name) {
            return Ok(id);
        }
        let Some((id, entry)) = self.namelist.reserve(name) else {
            // the namelist block is never grown; a full table fails the write
            return Err(GsdError::NotFound);
        };
        let offset = self.header.namelist_location() + id as u64 * NAME_SIZE as u64;
        io::pwrite_all(&self.file, entry.as_bytes(), offset)?;
        self.needs_sync = true;
        Ok(id)
    }

    /// Doubles the index block and relocates it to the file tail.
    ///
    /// Flush ordering: the new block is made durable before the header is
    /// rewritten to point at it, so a crash leaves either the old or the
    /// new block referenced, never a half-written one.
    fn expand_index(&mut self) -> Result<()> {
        let old_allocated = self.header.index_allocated_entries();
        let new_allocated = old_allocated * 2;
        self.header.set_index_allocated_entries(new_allocated);

        match &mut self.index {
            IndexCache::Loaded(entries) => {
                let new_len = block_len(new_allocated)?;
                entries.try_reserve_exact(new_len - entries.len())?;
                entries.resize(new_len, IndexEntry::new_zeroed());

                let new_location = self.file_size;
                io::pwrite_all(&self.file, entries.as_slice().as_bytes(), new_location)?;
                self.header.set_index_location(new_location);
                self.file_size = new_location + self.header.index_block_size();
            }
            IndexCache::Tail(_) => {
                // the committed index is not in memory; stream it from the
                // old location to the file tail, then zero the new slots
                let old_location = self.header.index_location();
                let new_location = self.file_size;
                let old_bytes = old_allocated * INDEX_ENTRY_SIZE as u64;
                let new_bytes = new_allocated * INDEX_ENTRY_SIZE as u64;

                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                let mut copied = 0u64;
                while copied < old_bytes {
                    let take = COPY_BUFFER_SIZE.min((old_bytes - copied) as usize);
                    io::pread_exact(&self.file, &mut buf[..take], old_location + copied)?;
                    io::pwrite_all(&self.file, &buf[..take], new_location + copied)?;
                    copied += take as u64;
                }

                buf.fill(0);
                while copied < new_bytes {
                    let take = COPY_BUFFER_SIZE.min((new_bytes - copied) as usize);
                    io::pwrite_all(&self.file, &buf[..take], new_location + copied)?;
                    copied += take as u64;
                }

                self.header.set_index_location(new_location);
                self.file_size = new_location + new_bytes;
            }
            IndexCache::Mapped(_) => {
                return Err(GsdError::InvalidArgument(
                    "index growth requires a writable mode",
                ))
            }
        }

        self.file.sync_all()?;
        io::pwrite_all(&self.file, self.header.as_bytes(), 0)?;
        self.file.sync_all()?;
        Ok(())
    }
}
