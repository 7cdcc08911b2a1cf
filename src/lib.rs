//! # GSD - General Simulation Data File Engine
//!
//! GSD is an append-friendly, random-access binary container for a
//! time-ordered sequence of *frames*, where each frame holds a set of
//! named rectangular data *chunks* (N×M arrays of a numeric element
//! type). It targets molecular-dynamics and related workloads that write
//! long trajectories incrementally and later read arbitrary frames by
//! name.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gsd::{ElementType, GsdFile, OpenMode};
//!
//! GsdFile::create("dump.gsd", "my-app", "hoomd", gsd::make_version(1, 4))?;
//!
//! let mut gsd = GsdFile::open("dump.gsd", OpenMode::ReadWrite)?;
//! let positions: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let bytes: Vec<u8> = positions.iter().flat_map(|v| v.to_le_bytes()).collect();
//! gsd.write_chunk("particles/position", ElementType::Float, 3, 2, 0, &bytes)?;
//! gsd.end_frame()?;
//!
//! let entry = gsd.find_chunk(0, "particles/position")?;
//! let mut buf = vec![0u8; entry.payload_size().unwrap() as usize];
//! gsd.read_chunk(&mut buf, &entry)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Chunk API (GsdFile)           │  write/end_frame/find/read
//! ├──────────────────┬──────────────────┤
//! │  Index Manager   │ Namelist Manager │  search, growth, interning
//! ├──────────────────┴──────────────────┤
//! │      On-Disk Layout (zerocopy)      │  header, entries, name slots
//! ├─────────────────────────────────────┤
//! │   Positional I/O + mmap (read-only) │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! Chunk payloads are appended to the file tail as they are written;
//! their index entries are published atomically at the next
//! [`end_frame`](GsdFile::end_frame). Index growth flushes the relocated
//! block before repointing the header. A crash can orphan bytes past the
//! last published index prefix but never corrupts committed frames.
//!
//! ## Module Overview
//!
//! - `handle`: open modes, handle lifecycle, and the chunk API
//! - `index`: index caches, binary searches, entry validation
//! - `namelist`: chunk-name interning over fixed 128-byte slots
//! - `layout`: little-endian wire structs for the header, index entries,
//!   and name slots
//! - `io`: positional read/write with short-transfer retry
//! - `types`: chunk element types and the tag → byte-size table

mod error;
mod handle;
mod index;
mod io;
mod layout;
mod namelist;
mod types;

pub use error::{GsdError, Result};
pub use handle::{GsdFile, OpenMode, SyncMode};
pub use layout::{
    make_version, IndexEntry, GSD_MAGIC, HEADER_SIZE, INDEX_ENTRY_SIZE, NAME_SIZE,
};
pub use types::{size_of_type, ElementType};
