//! The textual "smart socket" framing used by host-addressed requests:
//! a 4-hex-char length prefix on the way out, a 4-byte status and a
//! 4-hex-char length prefix on the way back. Some responses (shell,
//! track-devices) carry no length header and stream to EOF instead.

use std::io::{Read, Write};

use crate::error::{AdbError, AdbResult};
use crate::wire::util::{read_exact_checked, write_fully};

/// Older adb servers clip both outgoing requests and incoming messages to
/// this many bytes.
pub const MAX_MESSAGE_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Fail,
}

pub fn write_request<W: Write + ?Sized>(w: &mut W, payload: &str) -> AdbResult<()> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(AdbError::Assertion(format!(
            "request of {} bytes exceeds the {MAX_MESSAGE_LEN} byte limit: {payload:?}",
            payload.len()
        )));
    }
    let framed = format!("{:04x}{payload}", payload.len());
    write_fully(w, framed.as_bytes())
}

pub fn read_status<R: Read + ?Sized>(r: &mut R) -> AdbResult<Status> {
    let mut buf = [0u8; 4];
    read_exact_checked(r, &mut buf, "status")?;
    match &buf {
        b"OKAY" => Ok(Status::Okay),
        b"FAIL" => Ok(Status::Fail),
        other => Err(AdbError::Parse(format!(
            "unrecognized status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn read_length<R: Read + ?Sized>(r: &mut R) -> AdbResult<usize> {
    let mut buf = [0u8; 4];
    read_exact_checked(r, &mut buf, "length")?;
    let text = std::str::from_utf8(&buf)
        .map_err(|e| AdbError::Parse(format!("non-ascii length prefix: {e}")))?;
    let len = usize::from_str_radix(text, 16)
        .map_err(|e| AdbError::Parse(format!("invalid hex length {text:?}: {e}")))?;
    // As with the reference client, a length longer than the server ever
    // actually sends is clipped rather than trusted outright.
    Ok(len.min(MAX_MESSAGE_LEN))
}

pub fn read_message<R: Read + ?Sized>(r: &mut R) -> AdbResult<Vec<u8>> {
    let len = read_length(r)?;
    let mut buf = vec![0u8; len];
    read_exact_checked(r, &mut buf, "message")?;
    Ok(buf)
}

pub fn read_message_string<R: Read + ?Sized>(r: &mut R) -> AdbResult<String> {
    let bytes = read_message(r)?;
    String::from_utf8(bytes).map_err(|e| AdbError::Parse(format!("message is not utf-8: {e}")))
}

/// Reads until the peer closes its write side. Used for the shell and
/// track-devices streams, which carry no length header.
pub fn read_until_eof<R: Read + ?Sized>(r: &mut R) -> AdbResult<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads a status; on `FAIL`, reads the server's message and classifies it
/// into the appropriate error variant.
pub fn read_status_failure_as_error<R: Read + ?Sized>(r: &mut R, request: &str) -> AdbResult<()> {
    match read_status(r)? {
        Status::Okay => Ok(()),
        Status::Fail => {
            let msg = read_message_string(r)?;
            Err(classify_server_error(request, &msg))
        }
    }
}

/// Most server-reported failures surface as a generic `AdbError`, but a
/// message matching the "device not found" family gets its own code so
/// callers can match on it without string comparison.
pub fn classify_server_error(request: &str, msg: &str) -> AdbError {
    let formatted = if request.is_empty() {
        format!("server error: {msg}")
    } else {
        format!("server error for request '{request}': {msg}")
    };
    if is_device_not_found_message(msg) {
        AdbError::DeviceNotFound(formatted)
    } else {
        AdbError::Adb(formatted)
    }
}

fn is_device_not_found_message(msg: &str) -> bool {
    let msg = msg.trim();
    msg == "device not found"
        || (msg.starts_with("device '") && msg.ends_with("' not found"))
}
