//! File operations driven over a connection that has entered sync mode:
//! `STAT`, `LIST`, `RECV` (streaming read), and `SEND` (streaming write).
//!
//! Each operation consumes the [`SyncConn`] it's given; the resulting
//! streaming handles (readers, writers, the directory-listing cursor) take
//! ownership of the underlying connection so there's no way to use it from
//! two places at once.

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::conn::{ByteStream, SyncConn};
use crate::error::{AdbError, AdbResult};
use crate::wire::sync as wire;

/// A directory entry returned by `LIST`, or the result of a `STAT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub mode: u32,
    pub size: u32,
    pub modified_at: i64,
}

impl DirEntry {
    const S_IFMT: u32 = 0o170_000;
    const S_IFDIR: u32 = 0o040_000;
    const S_IFREG: u32 = 0o100_000;
    const S_IFLNK: u32 = 0o120_000;

    pub fn is_dir(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & Self::S_IFMT == Self::S_IFLNK
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// A value that, when passed as the mtime for [`open_write`], means "use
/// the time the writer is closed" rather than a specific timestamp.
pub const MTIME_OF_CLOSE: Option<i64> = None;

/// `STAT <path>` — returns the file's mode/size/mtime, or
/// [`crate::error::ErrorCode::FileNoExist`] if the server reports the
/// all-zero sentinel it uses to mean "doesn't exist".
pub fn stat(sync: SyncConn, path: &str) -> AdbResult<DirEntry> {
    let mut stream = sync.into_stream();
    wire::send_octet(&mut stream, wire::STAT)?;
    wire::send_string(&mut stream, path)?;
    wire::expect_octet(&mut stream, wire::STAT)?;
    read_stat_body(&mut stream, path)
}

fn read_stat_body(stream: &mut Box<dyn ByteStream>, path: &str) -> AdbResult<DirEntry> {
    let mode = wire::read_file_mode(stream)?;
    let size = wire::read_i32(stream)?;
    let mtime = wire::read_time(stream)?;
    if mode == 0 && size == 0 && mtime == 0 {
        return Err(AdbError::FileNoExist(format!("{path} does not exist")));
    }
    Ok(DirEntry {
        name: String::new(),
        mode,
        size: size as u32,
        modified_at: mtime as i64,
    })
}

/// A lazy, single-pass cursor over a `LIST <path>` response. Owns the
/// connection; closes it once exhausted or dropped early.
pub struct DirEntries {
    stream: Option<Box<dyn ByteStream>>,
    path: String,
    err: Option<AdbError>,
}

/// `LIST <path>` — returns a lazily-read cursor over the directory's
/// entries. No data is read from the wire until the cursor is advanced.
pub fn list_dir_entries(sync: SyncConn, path: &str) -> AdbResult<DirEntries> {
    let mut stream = sync.into_stream();
    wire::send_octet(&mut stream, wire::LIST)?;
    wire::send_string(&mut stream, path)?;
    Ok(DirEntries {
        stream: Some(stream),
        path: path.to_string(),
        err: None,
    })
}

impl DirEntries {
    /// The error that ended iteration, if any.
    pub fn err(&self) -> Option<&AdbError> {
        self.err.as_ref()
    }

    fn finish(&mut self) {
        self.stream = None;
    }
}

impl Iterator for DirEntries {
    type Item = AdbResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        match read_next_list_entry(stream, &self.path) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.err = Some(e.clone_for_report());
                self.finish();
                Some(Err(e))
            }
        }
    }
}

fn read_next_list_entry(
    stream: &mut Box<dyn ByteStream>,
    path: &str,
) -> AdbResult<Option<DirEntry>> {
    let octet = wire::read_octet(stream)?;
    if &octet == wire::DONE {
        return Ok(None);
    }
    if &octet != wire::DENT {
        return Err(AdbError::Assertion(format!(
            "unexpected sync opcode {:?} while listing {path}",
            String::from_utf8_lossy(&octet)
        )));
    }
    let mode = wire::read_file_mode(stream)?;
    let size = wire::read_i32(stream)?;
    let mtime = wire::read_time(stream)?;
    let name = wire::read_string(stream)?;
    Ok(Some(DirEntry {
        name,
        mode,
        size: size as u32,
        modified_at: mtime as i64,
    }))
}

/// A streaming reader over a `RECV <path>` response. Implements
/// [`std::io::Read`]; closing it (via [`SyncReader::close`] or `Drop`)
/// closes the underlying connection.
pub struct SyncReader {
    stream: Box<dyn ByteStream>,
    current_chunk_remaining: usize,
    done: bool,
}

/// `RECV <path>` — opens a streaming reader. Performs a zero-length probe
/// read immediately so that a `FAIL` (e.g. the file doesn't exist) surfaces
/// here, at open time, rather than on the caller's first real read.
pub fn open_read(sync: SyncConn, path: &str) -> AdbResult<SyncReader> {
    let mut stream = sync.into_stream();
    wire::send_octet(&mut stream, wire::RECV)?;
    wire::send_string(&mut stream, path)?;
    let mut reader = SyncReader {
        stream,
        current_chunk_remaining: 0,
        done: false,
    };
    reader.fill_if_needed(path)?;
    Ok(reader)
}

impl SyncReader {
    fn fill_if_needed(&mut self, path: &str) -> AdbResult<()> {
        if self.current_chunk_remaining > 0 || self.done {
            return Ok(());
        }
        let octet = wire::read_octet(&mut self.stream)?;
        if &octet == wire::DONE {
            self.done = true;
            return Ok(());
        }
        if &octet == wire::FAIL {
            let msg = wire::read_string(&mut self.stream)?;
            self.done = true;
            return Err(if is_not_found_message(&msg) {
                AdbError::FileNoExist(format!("{path}: {msg}"))
            } else {
                AdbError::Adb(format!("server error for request 'RECV {path}': {msg}"))
            });
        }
        if &octet != wire::DATA {
            self.done = true;
            return Err(AdbError::Assertion(format!(
                "unexpected sync opcode {:?} while receiving {path}",
                String::from_utf8_lossy(&octet)
            )));
        }
        let len = wire::read_i32(&mut self.stream)?;
        self.current_chunk_remaining = len.max(0) as usize;
        Ok(())
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Read for SyncReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        if self.current_chunk_remaining == 0 {
            self.fill_if_needed("<stream>")
                .map_err(AdbError::into_io_error)?;
            if self.done {
                return Ok(0);
            }
        }
        let to_read = buf.len().min(self.current_chunk_remaining);
        let n = self.stream.read(&mut buf[..to_read])?;
        self.current_chunk_remaining -= n;
        Ok(n)
    }
}

fn is_not_found_message(msg: &str) -> bool {
    msg.contains("No such file or directory")
}

/// A streaming writer over a `SEND <path>,<mode>` request. Implements
/// [`std::io::Write`]; the terminal `DONE` footer (and the mtime it
/// carries) and the server's final status are only sent/read on
/// [`SyncWriter::close`] (or `Drop`, best-effort).
pub struct SyncWriter {
    stream: Box<dyn ByteStream>,
    mtime: Option<i64>,
    path: String,
    closed: bool,
}

/// `SEND <path>,<mode>` — opens a streaming writer. `mtime` of `None` means
/// "use the time the writer is closed".
pub fn open_write(
    sync: SyncConn,
    path: &str,
    mode: u32,
    mtime: Option<i64>,
) -> AdbResult<SyncWriter> {
    let mut stream = sync.into_stream();
    let perms = mode & 0o777;
    let encoded = format!("{path},{perms}");
    wire::send_octet(&mut stream, wire::SEND)?;
    wire::send_string(&mut stream, &encoded)?;
    Ok(SyncWriter {
        stream,
        mtime,
        path: path.to_string(),
        closed: false,
    })
}

impl Write for SyncWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let chunk_len = buf.len().min(wire::MAX_CHUNK_SIZE);
        let chunk = &buf[..chunk_len];
        wire::send_data_chunk(&mut self.stream, chunk)
            .map_err(AdbError::into_io_error)?;
        Ok(chunk_len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SyncWriter {
    /// Sends the terminal `DONE` + mtime footer and reads the server's
    /// final `OKAY`/`FAIL`.
    pub fn close(mut self) -> AdbResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> AdbResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mtime = self.mtime.unwrap_or_else(now_unix_seconds);
        wire::send_octet(&mut self.stream, wire::DONE)?;
        wire::send_time(&mut self.stream, mtime as i32)?;
        match wire::read_octet(&mut self.stream)? {
            ok if &ok == wire::OKAY => Ok(()),
            fail if &fail == wire::FAIL => {
                let msg = wire::read_string(&mut self.stream)?;
                Err(if is_not_found_message(&msg) {
                    AdbError::FileNoExist(format!("{}: {msg}", self.path))
                } else {
                    AdbError::Adb(format!(
                        "server error for request 'SEND {}': {msg}",
                        self.path
                    ))
                })
            }
            other => Err(AdbError::Assertion(format!(
                "unexpected sync opcode {:?} closing send stream",
                String::from_utf8_lossy(&other)
            ))),
        }
    }
}

impl Drop for SyncWriter {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.finish();
        }
    }
}

fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl AdbError {
    /// A cheap clone for reporting via [`DirEntries::err`] without forcing
    /// `AdbError` to implement `Clone` everywhere (it wraps `io::Error`,
    /// which doesn't).
    fn clone_for_report(&self) -> AdbError {
        AdbError::Adb(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_conn_over(bytes: Vec<u8>) -> SyncConn {
        crate::conn::test_support::sync_conn_from_bytes(bytes)
    }

    #[test]
    fn stat_reports_file_not_exist_sentinel() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::STAT);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        let sync = sync_conn_over(body);
        let err = stat(sync, "/missing").unwrap_err();
        assert!(err.has_code(crate::error::ErrorCode::FileNoExist));
    }

    #[test]
    fn stat_parses_real_entry() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::STAT);
        body.extend_from_slice(&0o100_644u32.to_le_bytes());
        body.extend_from_slice(&42i32.to_le_bytes());
        body.extend_from_slice(&1_000i32.to_le_bytes());
        let sync = sync_conn_over(body);
        let entry = stat(sync, "/present").unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.size, 42);
        assert_eq!(entry.modified_at, 1_000);
    }

    #[test]
    fn recv_reader_probes_immediately_on_fail() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::FAIL);
        let msg = "No such file or directory";
        body.extend_from_slice(&(msg.len() as i32).to_le_bytes());
        body.extend_from_slice(msg.as_bytes());
        let sync = sync_conn_over(body);
        let err = open_read(sync, "/missing").unwrap_err();
        assert!(err.has_code(crate::error::ErrorCode::FileNoExist));
    }

    #[test]
    fn recv_reader_yields_data_then_eof() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::DATA);
        body.extend_from_slice(&5i32.to_le_bytes());
        body.extend_from_slice(b"hello");
        body.extend_from_slice(wire::DONE);
        let sync = sync_conn_over(body);
        let mut reader = open_read(sync, "/file").unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn list_dir_entries_reads_dent_then_done() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::DENT);
        body.extend_from_slice(&0o040_755u32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        let name = "subdir";
        body.extend_from_slice(&(name.len() as i32).to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(wire::DONE);
        let sync = sync_conn_over(body);
        let entries: Vec<_> = list_dir_entries(sync, "/").unwrap().collect();
        assert_eq!(entries.len(), 1);
        let entry = entries[0].as_ref().unwrap();
        assert_eq!(entry.name, "subdir");
        assert!(entry.is_dir());
    }

    #[test]
    fn send_writer_close_substitutes_now_for_close_time_sentinel() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::OKAY);
        let sync = sync_conn_over(body);
        let mut writer = open_write(sync, "/out", 0o644, MTIME_OF_CLOSE).unwrap();
        writer.write_all(b"data").unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn send_writer_surfaces_fail_status() {
        let mut body = Vec::new();
        body.extend_from_slice(wire::FAIL);
        let msg = "permission denied";
        body.extend_from_slice(&(msg.len() as i32).to_le_bytes());
        body.extend_from_slice(msg.as_bytes());
        let sync = sync_conn_over(body);
        let writer = open_write(sync, "/out", 0o644, Some(1_000)).unwrap();
        let err = writer.close().unwrap_err();
        assert!(err.has_code(crate::error::ErrorCode::Adb));
    }
}
