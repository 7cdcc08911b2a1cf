//! Rejection of malformed files: bad magic, unsupported versions,
//! truncated blocks, and index entries that violate format invariants.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use gsd::{make_version, ElementType, GsdError, GsdFile, OpenMode, HEADER_SIZE};
use tempfile::tempdir;

/// Overwrites raw bytes of the file, bypassing the engine.
fn patch(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

/// A file with one committed frame holding one `i32` chunk named "x".
fn seeded_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("traj.gsd");
    let mut gsd =
        GsdFile::create_and_open(&path, "app", "s", 1, OpenMode::ReadWrite, false).unwrap();
    gsd.write_chunk("x", ElementType::Int32, 1, 1, 0, &7i32.to_le_bytes())
        .unwrap();
    gsd.end_frame().unwrap();
    gsd.close().unwrap();
    path
}

// byte offsets of index entry fields, relative to the entry start
const ENTRY_FRAME: u64 = 0;
const ENTRY_LOCATION: u64 = 16;
const ENTRY_TYPE: u64 = 30;
const ENTRY_FLAGS: u64 = 31;

fn entry_offset(slot: u64) -> u64 {
    HEADER_SIZE as u64 + slot * 32
}

mod header_corruption_tests {
    use super::*;

    #[test]
    fn zeroed_magic_is_invalid() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        patch(&path, 0, &[0u8; 8]);
        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::InvalidFile(_)));
    }

    #[test]
    fn version_window_is_enforced() {
        let dir = tempdir().unwrap();

        for (version, ok) in [
            (make_version(0, 2), false),
            (make_version(0, 3), true),
            (make_version(0, 9), false),
            (make_version(1, 0), true),
            (make_version(1, 9), true),
            (make_version(2, 0), false),
            (make_version(9, 0), false),
        ] {
            let path = seeded_file(dir.path());
            patch(&path, 8, &version.to_le_bytes());
            let result = GsdFile::open(&path, OpenMode::ReadOnly);
            match result {
                Ok(gsd) => {
                    assert!(ok, "version {:#x} opened but is unsupported", version);
                    assert_eq!(gsd.gsd_version(), version);
                }
                Err(err) => {
                    assert!(!ok, "version {:#x} rejected but is supported", version);
                    assert!(matches!(err, GsdError::InvalidFile(_)));
                }
            }
        }
    }

    #[test]
    fn files_shorter_than_a_header_are_invalid() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(100).unwrap();
        drop(file);

        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::InvalidFile(_)));
    }

    #[test]
    fn a_file_cut_inside_the_index_block_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(HEADER_SIZE as u64 + 64).unwrap();
        drop(file);

        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::CorruptFile(_)));
    }
}

mod index_corruption_tests {
    use super::*;

    #[test]
    fn invalid_type_in_first_entry_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        patch(&path, entry_offset(0) + ENTRY_TYPE, &[255]);
        patch(&path, entry_offset(0) + ENTRY_LOCATION, &100u64.to_le_bytes());

        for mode in [OpenMode::ReadOnly, OpenMode::ReadWrite, OpenMode::Append] {
            let err = GsdFile::open(&path, mode).unwrap_err();
            assert!(matches!(err, GsdError::CorruptFile(_)), "mode {:?}", mode);
        }
    }

    #[test]
    fn nonzero_flags_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        patch(&path, entry_offset(0) + ENTRY_FLAGS, &[1]);
        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::CorruptFile(_)));
    }

    #[test]
    fn payload_extent_past_eof_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        let huge = (1u64 << 40).to_le_bytes();
        patch(&path, entry_offset(0) + ENTRY_LOCATION, &huge);
        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::CorruptFile(_)));
    }

    #[test]
    fn non_monotonic_frames_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traj.gsd");
        let mut gsd =
            GsdFile::create_and_open(&path, "app", "s", 1, OpenMode::ReadWrite, false).unwrap();
        for frame in 0..3i32 {
            gsd.write_chunk("x", ElementType::Int32, 1, 1, 0, &frame.to_le_bytes())
                .unwrap();
            gsd.end_frame().unwrap();
        }
        gsd.close().unwrap();

        // raising frame 0 above its successors breaks the sort invariant
        // the prefix search depends on
        patch(&path, entry_offset(0) + ENTRY_FRAME, &5u64.to_le_bytes());
        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::CorruptFile(_)));
    }

    #[test]
    fn entry_referencing_an_uninterned_name_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        // wipe the namelist terminator-first so entry 0's id is out of range
        let namelist_location = HEADER_SIZE as u64 + 128 * 32;
        patch(&path, namelist_location, &[0u8; 128]);

        let err = GsdFile::open(&path, OpenMode::ReadOnly).unwrap_err();
        assert!(matches!(err, GsdError::CorruptFile(_)));
    }

    #[test]
    fn corruption_detection_restores_after_repair() {
        let dir = tempdir().unwrap();
        let path = seeded_file(dir.path());

        patch(&path, 0, &[0u8; 8]);
        assert!(GsdFile::open(&path, OpenMode::ReadOnly).is_err());

        patch(&path, 0, &gsd::GSD_MAGIC.to_le_bytes());
        let gsd = GsdFile::open(&path, OpenMode::ReadOnly).unwrap();
        assert_eq!(gsd.nframes(), 1);
    }
}
