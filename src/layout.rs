//! # On-Disk Layout
//!
//! This module defines the wire structs for the three fixed-size on-disk
//! records of a GSD file: the file header, the index entry, and the
//! namelist entry. All multi-byte fields are little-endian so files are
//! interchangeable between hosts of either endianness.
//!
//! ## File Header Layout (256 bytes, at offset 0)
//!
//! ```text
//! Offset  Size  Field                       Description
//! ------  ----  --------------------------  --------------------------------
//! 0       8     magic                       0x65DF65DF65DF65DF
//! 8       4     gsd_version                 Format version, major<<16 | minor
//! 12      64    application                 Generating application, NUL-terminated
//! 76      64    schema                      Data schema name, NUL-terminated
//! 140     4     schema_version              Schema version, major<<16 | minor
//! 144     8     index_location              Absolute offset of the index block
//! 152     8     index_allocated_entries     Capacity of the index block
//! 160     8     namelist_location           Absolute offset of the namelist block
//! 168     8     namelist_allocated_entries  Capacity of the namelist block
//! 176     80    reserved                    Zero
//! ```
//!
//! ## Index Entry Layout (32 bytes)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       8     frame      Frame the chunk belongs to
//! 8       8     n          Number of rows
//! 16      8     location   Absolute offset of the payload; 0 = empty slot
//! 24      2     id         Namelist id of the chunk name
//! 26      4     m          Number of columns
//! 30      1     type       Element type tag (see [`crate::types`])
//! 31      1     flags      Reserved, must be zero
//! ```
//!
//! A slot is in use iff `location != 0`; used slots form a prefix of the
//! index block with non-decreasing `frame`.
//!
//! ## Namelist Entry Layout (128 bytes)
//!
//! A NUL-padded ASCII name. An entry whose first byte is zero marks the
//! end of the list; the id of an entry is its ordinal position.
//!
//! ## Zero-Copy Access
//!
//! All structs derive the zerocopy traits so they can be read directly
//! from buffers or mapped index pages without copying, and written with
//! `as_bytes()`. `Unaligned` keeps them valid at any byte offset, which
//! the memory-mapped index view requires.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{GsdError, Result};
use crate::types::size_of_type;

/// Magic value identifying a GSD file.
pub const GSD_MAGIC: u64 = 0x65DF_65DF_65DF_65DF;

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 256;

/// Size of one index entry in bytes.
pub const INDEX_ENTRY_SIZE: usize = 32;

/// Size of one namelist entry in bytes.
pub const NAME_SIZE: usize = 128;

/// Number of index slots allocated by `create`.
pub const INITIAL_INDEX_ENTRIES: u64 = 128;

/// Number of name slots allocated by `create`.
pub const INITIAL_NAMELIST_ENTRIES: u64 = 128;

/// Packs a major.minor version pair into its 32-bit on-disk encoding.
///
/// Packed versions compare by unsigned integer order.
pub fn make_version(major: u32, minor: u32) -> u32 {
    (major << 16) | minor
}

/// Returns true when `version` is a file format this engine reads.
///
/// Accepted versions are exactly 0.3 and anything in [1.0, 2.0).
pub(crate) fn is_supported_version(version: u32) -> bool {
    if version >= make_version(2, 0) {
        return false;
    }
    version >= make_version(1, 0) || version == make_version(0, 3)
}

/// Reads a NUL-terminated byte field as a string.
///
/// Bytes past the terminator are ignored; non-UTF-8 content reads as "".
pub(crate) fn read_cstr(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Copies a string into a fixed NUL-terminated field, truncating to N-1 bytes.
fn write_cstr<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct Header {
    magic: U64,
    gsd_version: U32,
    application: [u8; 64],
    schema: [u8; 64],
    schema_version: U32,
    index_location: U64,
    index_allocated_entries: U64,
    namelist_location: U64,
    namelist_allocated_entries: U64,
    reserved: [u8; 80],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

impl Header {
    /// Builds the header written by `create`: format version 1.0 and the
    /// initial block layout (index directly after the header, namelist
    /// directly after the index).
    pub fn new(application: &str, schema: &str, schema_version: u32) -> Self {
        let index_location = HEADER_SIZE as u64;
        let namelist_location =
            index_location + INITIAL_INDEX_ENTRIES * INDEX_ENTRY_SIZE as u64;
        Self {
            magic: U64::new(GSD_MAGIC),
            gsd_version: U32::new(make_version(1, 0)),
            application: write_cstr(application),
            schema: write_cstr(schema),
            schema_version: U32::new(schema_version),
            index_location: U64::new(index_location),
            index_allocated_entries: U64::new(INITIAL_INDEX_ENTRIES),
            namelist_location: U64::new(namelist_location),
            namelist_allocated_entries: U64::new(INITIAL_NAMELIST_ENTRIES),
            reserved: [0u8; 80],
        }
    }

    /// Checks the magic value and the supported format version window.
    pub fn validate(&self) -> Result<()> {
        if self.magic.get() != GSD_MAGIC {
            return Err(GsdError::InvalidFile("magic value mismatch".into()));
        }
        let v = self.gsd_version.get();
        if !is_supported_version(v) {
            return Err(GsdError::InvalidFile(format!(
                "unsupported file format version {}.{}",
                v >> 16,
                v & 0xffff
            )));
        }
        if self.index_allocated_entries.get() == 0 || self.namelist_allocated_entries.get() == 0 {
            return Err(GsdError::CorruptFile("zero-capacity block in header".into()));
        }
        Ok(())
    }

    pub fn gsd_version(&self) -> u32 {
        self.gsd_version.get()
    }

    pub fn application(&self) -> &str {
        read_cstr(&self.application)
    }

    pub fn schema(&self) -> &str {
        read_cstr(&self.schema)
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version.get()
    }

    pub fn index_location(&self) -> u64 {
        self.index_location.get()
    }

    pub fn set_index_location(&mut self, location: u64) {
        self.index_location = U64::new(location);
    }

    pub fn index_allocated_entries(&self) -> u64 {
        self.index_allocated_entries.get()
    }

    pub fn set_index_allocated_entries(&mut self, entries: u64) {
        self.index_allocated_entries = U64::new(entries);
    }

    pub fn namelist_location(&self) -> u64 {
        self.namelist_location.get()
    }

    pub fn namelist_allocated_entries(&self) -> u64 {
        self.namelist_allocated_entries.get()
    }

    /// Byte size of the index block.
    pub fn index_block_size(&self) -> u64 {
        self.index_allocated_entries.get() * INDEX_ENTRY_SIZE as u64
    }

    /// Byte size of the namelist block.
    pub fn namelist_block_size(&self) -> u64 {
        self.namelist_allocated_entries.get() * NAME_SIZE as u64
    }
}

/// One slot of the on-disk chunk index.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexEntry {
    frame: U64,
    n: U64,
    location: U64,
    id: U16,
    m: U32,
    elem_type: u8,
    flags: u8,
}

const _: () = assert!(std::mem::size_of::<IndexEntry>() == INDEX_ENTRY_SIZE);

impl IndexEntry {
    pub(crate) fn new(frame: u64, id: u16, elem_type: u8, n: u64, m: u32, location: u64) -> Self {
        Self {
            frame: U64::new(frame),
            n: U64::new(n),
            location: U64::new(location),
            id: U16::new(id),
            m: U32::new(m),
            elem_type,
            flags: 0,
        }
    }

    /// Frame the chunk was written in.
    pub fn frame(&self) -> u64 {
        self.frame.get()
    }

    /// Number of rows.
    pub fn n(&self) -> u64 {
        self.n.get()
    }

    /// Number of columns.
    pub fn m(&self) -> u32 {
        self.m.get()
    }

    /// Absolute byte offset of the chunk payload.
    pub fn location(&self) -> u64 {
        self.location.get()
    }

    /// Namelist id of the chunk name.
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    /// Element type tag.
    pub fn elem_type(&self) -> u8 {
        self.elem_type
    }

    pub(crate) fn flags(&self) -> u8 {
        self.flags
    }

    /// True when this slot has never been written.
    pub(crate) fn is_empty_slot(&self) -> bool {
        self.location.get() == 0
    }

    /// Payload size in bytes: `n * m * sizeof(type)`.
    ///
    /// Returns `None` when the multiplication overflows.
    pub fn payload_size(&self) -> Option<u64> {
        self.n
            .get()
            .checked_mul(self.m.get() as u64)?
            .checked_mul(size_of_type(self.elem_type) as u64)
    }
}

/// One slot of the on-disk name interning table.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct NamelistEntry {
    name: [u8; NAME_SIZE],
}

const _: () = assert!(std::mem::size_of::<NamelistEntry>() == NAME_SIZE);

impl NamelistEntry {
    pub fn new(name: &str) -> Self {
        Self {
            name: write_cstr(name),
        }
    }

    pub fn name(&self) -> &str {
        read_cstr(&self.name)
    }

    /// An all-zero first byte marks the end of the used namelist prefix.
    pub fn is_terminator(&self) -> bool {
        self.name[0] == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_256() {
        assert_eq!(std::mem::size_of::<Header>(), 256);
    }

    #[test]
    fn index_entry_size_is_32() {
        assert_eq!(std::mem::size_of::<IndexEntry>(), 32);
    }

    #[test]
    fn namelist_entry_size_is_128() {
        assert_eq!(std::mem::size_of::<NamelistEntry>(), 128);
    }

    #[test]
    fn version_packs_major_minor() {
        assert_eq!(make_version(1, 0), 0x0001_0000);
        assert_eq!(make_version(0, 3), 3);
        assert!(make_version(1, 9) < make_version(2, 0));
    }

    #[test]
    fn version_window() {
        assert!(is_supported_version(make_version(0, 3)));
        assert!(is_supported_version(make_version(1, 0)));
        assert!(is_supported_version(make_version(1, 4)));
        assert!(!is_supported_version(make_version(0, 2)));
        assert!(!is_supported_version(make_version(0, 9)));
        assert!(!is_supported_version(make_version(2, 0)));
        assert!(!is_supported_version(make_version(3, 1)));
    }

    #[test]
    fn new_header_validates_and_roundtrips() {
        let header = Header::new("app", "hoomd", make_version(1, 4));
        header.validate().unwrap();

        let parsed = Header::read_from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.application(), "app");
        assert_eq!(parsed.schema(), "hoomd");
        assert_eq!(parsed.schema_version(), make_version(1, 4));
        assert_eq!(parsed.index_location(), 256);
        assert_eq!(parsed.index_allocated_entries(), 128);
        assert_eq!(parsed.namelist_location(), 256 + 128 * 32);
        assert_eq!(parsed.namelist_allocated_entries(), 128);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = Header::new("a", "s", 0);
        header.magic = U64::new(0);
        assert!(matches!(header.validate(), Err(GsdError::InvalidFile(_))));
    }

    #[test]
    fn long_identifiers_truncate_to_63_bytes() {
        let long = "x".repeat(200);
        let header = Header::new(&long, &long, 0);
        assert_eq!(header.application().len(), 63);
        assert_eq!(header.schema().len(), 63);
    }

    #[test]
    fn payload_size_overflow_is_detected() {
        let double = crate::types::ElementType::Double.tag();
        let entry = IndexEntry::new(0, 0, double, u64::MAX / 2, 4, 256);
        assert_eq!(entry.payload_size(), None);
    }
}
