//! Positional file I/O with short-transfer retry.
//!
//! All disk traffic in the engine goes through these helpers. Reads and
//! writes are positional (they never move a shared file cursor), retried
//! until the requested byte count completes, and capped at 1 GiB per
//! syscall because positional I/O on some platforms rejects larger
//! transfers. Reads that hit end-of-file return the partial count.

use std::fs::File;
use std::io;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Largest single transfer handed to the OS.
const MAX_TRANSFER: usize = 1 << 30;

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    file.seek_write(buf, offset)
}

/// Reads up to `buf.len()` bytes at `offset`, returning the number read.
///
/// Stops early only at end of file; short transfers are retried.
pub(crate) fn pread_retry(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let want = (buf.len() - total).min(MAX_TRANSFER);
        let chunk = &mut buf[total..total + want];
        let read = match read_at(file, chunk, offset + total as u64) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if read == 0 {
            break;
        }
        total += read;
    }
    Ok(total)
}

/// Reads exactly `buf.len()` bytes at `offset`.
pub(crate) fn pread_exact(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let read = pread_retry(file, buf, offset)?;
    if read != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read: {} of {} bytes at offset {}", read, buf.len(), offset),
        ));
    }
    Ok(())
}

/// Writes all of `buf` at `offset`, retrying short transfers.
pub(crate) fn pwrite_all(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    let mut total = 0usize;
    while total < buf.len() {
        let want = (buf.len() - total).min(MAX_TRANSFER);
        let chunk = &buf[total..total + want];
        let written = match write_at(file, chunk, offset + total as u64) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("write at offset {} made no progress", offset + total as u64),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        total += written;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn positional_writes_do_not_disturb_each_other() {
        let file = tempfile().unwrap();
        pwrite_all(&file, b"world", 5).unwrap();
        pwrite_all(&file, b"hello", 0).unwrap();

        let mut buf = [0u8; 10];
        pread_exact(&file, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"helloworld");
    }

    #[test]
    fn read_past_eof_returns_partial_count() {
        let file = tempfile().unwrap();
        pwrite_all(&file, b"abc", 0).unwrap();

        let mut buf = [0u8; 8];
        let read = pread_retry(&file, &mut buf, 0).unwrap();
        assert_eq!(read, 3);
        assert_eq!(&buf[..3], b"abc");

        let read = pread_retry(&file, &mut buf, 100).unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn exact_read_fails_on_truncated_file() {
        let file = tempfile().unwrap();
        pwrite_all(&file, b"abc", 0).unwrap();

        let mut buf = [0u8; 8];
        let err = pread_exact(&file, &mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn empty_transfers_are_no_ops() {
        let file = tempfile().unwrap();
        pwrite_all(&file, &[], 0).unwrap();
        let mut buf = [];
        pread_exact(&file, &mut buf, 0).unwrap();
    }
}
