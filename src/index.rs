//! # Index Manager
//!
//! The index is an on-disk array of fixed-size entries cataloging every
//! chunk in the file. Used entries form a prefix terminated by the first
//! slot with `location == 0`, and `frame` never decreases across the
//! prefix, so both the used-prefix length and per-frame lookups resolve
//! with binary searches.
//!
//! ## Cache modes
//!
//! How much of the index is held in memory depends on the open mode:
//!
//! - **Mapped** (read-only): a shared read-only memory map of the index
//!   region. Entries are viewed in place through zerocopy.
//! - **Loaded** (read-write): a heap copy of the whole block, editable and
//!   rewritten on growth.
//! - **Tail** (append): only the entries of the in-progress frame, in a
//!   small buffer that doubles from capacity 1. The committed part of the
//!   index stays on disk untouched.
//!
//! ## Validation
//!
//! Every probe of the used-prefix search validates the entry it lands on:
//! known element type, payload extent inside the file, frame within the
//! allocated range, interned id, zero flags, monotonic frames. Any
//! violation declares the file corrupt before its contents are trusted.

use memmap2::Mmap;
use zerocopy::FromBytes;

use crate::error::{GsdError, Result};
use crate::layout::IndexEntry;
use crate::types::size_of_type;

/// In-memory state of the index block, by open mode.
#[derive(Debug)]
pub(crate) enum IndexCache {
    /// Read-only: shared map of the index region.
    Mapped(Mmap),
    /// Read-write: heap copy of all allocated slots.
    Loaded(Vec<IndexEntry>),
    /// Append: unwritten entries of the current frame only.
    Tail(Vec<IndexEntry>),
}

impl IndexCache {
    /// All allocated index slots, used and empty.
    ///
    /// Empty for the append-mode tail cache, which holds no committed
    /// entries.
    pub fn slots(&self) -> Result<&[IndexEntry]> {
        match self {
            IndexCache::Mapped(map) => <[IndexEntry]>::ref_from_bytes(&map[..]).map_err(|_| {
                GsdError::CorruptFile("index block is not a whole number of entries".into())
            }),
            IndexCache::Loaded(entries) => Ok(entries),
            IndexCache::Tail(_) => Ok(&[]),
        }
    }
}

/// Checks the invariants of a used index entry.
pub(crate) fn entry_is_valid(
    entry: &IndexEntry,
    index_allocated: u64,
    namelist_len: usize,
    file_size: u64,
) -> bool {
    if size_of_type(entry.elem_type()) == 0 {
        return false;
    }
    let Some(size) = entry.payload_size() else {
        return false;
    };
    match entry.location().checked_add(size) {
        Some(end) if end <= file_size => {}
        _ => return false,
    }
    if entry.frame() >= index_allocated {
        return false;
    }
    if entry.id() as usize >= namelist_len {
        return false;
    }
    entry.flags() == 0
}

/// Finds the length of the used prefix of `slots`, validating every
/// probed entry along the way.
///
/// The binary search uses the monotonic-frame invariant as its sort key
/// and converges on the first empty slot. A probed used entry that fails
/// validation, or whose frame is below the frame at the left edge of the
/// window, declares the file corrupt.
pub(crate) fn used_prefix_len(
    slots: &[IndexEntry],
    namelist_len: usize,
    file_size: u64,
) -> Result<u64> {
    let Some(first) = slots.first() else {
        return Ok(0);
    };
    if first.is_empty_slot() {
        return Ok(0);
    }
    let allocated = slots.len() as u64;
    if !entry_is_valid(first, allocated, namelist_len, file_size) {
        return Err(GsdError::CorruptFile("index entry 0 is invalid".into()));
    }

    let mut left = 0usize;
    let mut right = slots.len();
    while right - left > 1 {
        let mid = (left + right) / 2;
        let probe = &slots[mid];
        if probe.is_empty_slot() {
            right = mid;
            continue;
        }
        if !entry_is_valid(probe, allocated, namelist_len, file_size) {
            return Err(GsdError::CorruptFile(format!(
                "index entry {} is invalid",
                mid
            )));
        }
        if probe.frame() < slots[left].frame() {
            return Err(GsdError::CorruptFile(format!(
                "index entry {} breaks frame ordering",
                mid
            )));
        }
        left = mid;
    }
    Ok(right as u64)
}

/// Looks up the chunk `(frame, id)` in the used prefix of the index.
///
/// A binary search narrows to the rightmost entry whose frame is at most
/// `frame`; from there a backward linear walk over the equal-frame run
/// returns the first id match, so when the same name was written twice in
/// one frame the last write wins.
pub(crate) fn find_entry(used: &[IndexEntry], frame: u64, id: u16) -> Option<&IndexEntry> {
    if used.is_empty() {
        return None;
    }

    let mut left = 0usize;
    let mut right = used.len();
    while right - left > 1 {
        let mid = (left + right) / 2;
        if frame < used[mid].frame() {
            right = mid;
        } else {
            left = mid;
        }
    }

    used[..=left]
        .iter()
        .rev()
        .take_while(|entry| entry.frame() == frame)
        .find(|entry| entry.id() == id)
}

/// Appends an entry to the append-mode tail cache.
///
/// The buffer doubles from its initial single slot; allocation failure is
/// reported rather than aborting.
pub(crate) fn push_tail(tail: &mut Vec<IndexEntry>, entry: IndexEntry) -> Result<()> {
    if tail.len() == tail.capacity() {
        tail.try_reserve_exact(tail.capacity().max(1))?;
    }
    tail.push(entry);
    Ok(())
}
