//! The binary "sync" sub-protocol framing used once a connection has sent
//! `sync:` and switched out of the textual host protocol: 4-byte ASCII
//! opcodes, little-endian integers, and length-prefixed strings/chunks.

use std::io::{Read, Write};

use crate::error::{AdbError, AdbResult};
use crate::wire::util::{read_exact_checked, write_fully};

/// The largest data chunk either side will send in one `DATA` frame.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

pub const STAT: &[u8; 4] = b"STAT";
pub const LIST: &[u8; 4] = b"LIST";
pub const DENT: &[u8; 4] = b"DENT";
pub const DONE: &[u8; 4] = b"DONE";
pub const RECV: &[u8; 4] = b"RECV";
pub const SEND: &[u8; 4] = b"SEND";
pub const DATA: &[u8; 4] = b"DATA";
pub const FAIL: &[u8; 4] = b"FAIL";
pub const OKAY: &[u8; 4] = b"OKAY";

pub fn send_octet<W: Write + ?Sized>(w: &mut W, octet: &[u8; 4]) -> AdbResult<()> {
    write_fully(w, octet)
}

pub fn read_octet<R: Read + ?Sized>(r: &mut R) -> AdbResult<[u8; 4]> {
    let mut buf = [0u8; 4];
    read_exact_checked(r, &mut buf, "sync octet string")?;
    Ok(buf)
}

pub fn expect_octet<R: Read + ?Sized>(r: &mut R, expected: &[u8; 4]) -> AdbResult<()> {
    let got = read_octet(r)?;
    if &got == expected {
        Ok(())
    } else {
        Err(AdbError::Assertion(format!(
            "expected sync opcode {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&got)
        )))
    }
}

pub fn send_i32<W: Write + ?Sized>(w: &mut W, value: i32) -> AdbResult<()> {
    write_fully(w, &value.to_le_bytes())
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> AdbResult<i32> {
    let mut buf = [0u8; 4];
    read_exact_checked(r, &mut buf, "sync int32")?;
    Ok(i32::from_le_bytes(buf))
}

pub fn send_file_mode<W: Write + ?Sized>(w: &mut W, mode: u32) -> AdbResult<()> {
    write_fully(w, &mode.to_le_bytes())
}

pub fn read_file_mode<R: Read + ?Sized>(r: &mut R) -> AdbResult<u32> {
    let mut buf = [0u8; 4];
    read_exact_checked(r, &mut buf, "sync file mode")?;
    Ok(u32::from_le_bytes(buf))
}

/// Seconds-since-epoch, UTC, matching the wire's 32-bit mtime field.
pub fn send_time<W: Write + ?Sized>(w: &mut W, unix_seconds: i32) -> AdbResult<()> {
    send_i32(w, unix_seconds)
}

pub fn read_time<R: Read + ?Sized>(r: &mut R) -> AdbResult<i32> {
    read_i32(r)
}

pub fn send_string<W: Write + ?Sized>(w: &mut W, s: &str) -> AdbResult<()> {
    if s.len() > MAX_CHUNK_SIZE {
        return Err(AdbError::Assertion(format!(
            "sync string of {} bytes exceeds the {MAX_CHUNK_SIZE} byte limit",
            s.len()
        )));
    }
    send_i32(w, s.len() as i32)?;
    write_fully(w, s.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(r: &mut R) -> AdbResult<String> {
    let len = read_i32(r)?;
    if len < 0 || len as usize > MAX_CHUNK_SIZE {
        return Err(AdbError::Parse(format!(
            "sync string length {len} out of range"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact_checked(r, &mut buf, "sync string")?;
    String::from_utf8(buf).map_err(|e| AdbError::Parse(format!("sync string is not utf-8: {e}")))
}

pub fn send_data_chunk<W: Write + ?Sized>(w: &mut W, data: &[u8]) -> AdbResult<()> {
    debug_assert!(data.len() <= MAX_CHUNK_SIZE);
    send_octet(w, DATA)?;
    send_i32(w, data.len() as i32)?;
    write_fully(w, data)
}

pub fn read_data_chunk<R: Read + ?Sized>(r: &mut R, len: usize) -> AdbResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_checked(r, &mut buf, "sync data chunk")?;
    Ok(buf)
}
