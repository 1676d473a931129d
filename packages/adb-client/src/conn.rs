//! The connection type-state machine: `HostConn -> DeviceConn -> SyncConn`.
//! Each state consumes `self` to move forward, so a connection that has
//! entered sync mode can no longer be asked to run a shell command at
//! compile time, not just by runtime assertion.

use std::io::{Read, Write};

use crate::descriptor::DeviceDescriptor;
use crate::error::AdbResult;
use crate::wire::host as wire;

/// Bound for any concrete duplex byte stream. Boxed so tests can substitute
/// an in-memory duplex for a real `TcpStream`.
pub trait ByteStream: Read + Write + Send {}
impl<T: Read + Write + Send> ByteStream for T {}

/// A connection freshly dialed to the adb server, not yet addressed at
/// anything.
pub struct HostConn {
    stream: Box<dyn ByteStream>,
}

impl HostConn {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self { stream }
    }

    /// Sends a `host:*` request and returns its single response message,
    /// consuming the connection (the server closes after responding).
    pub fn round_trip(mut self, request: &str) -> AdbResult<String> {
        wire::write_request(&mut self.stream, request)?;
        wire::read_status_failure_as_error(&mut self.stream, request)?;
        wire::read_message_string(&mut self.stream)
    }

    /// Sends a request without reading a response (used for `host:kill`,
    /// which the server never acknowledges before closing).
    pub fn send_only(mut self, request: &str) -> AdbResult<()> {
        wire::write_request(&mut self.stream, request)
    }

    /// Sends a request and returns the raw connection positioned to read a
    /// stream-to-EOF response (used for `host:track-devices`).
    pub fn send_for_streaming(mut self, request: &str) -> AdbResult<Box<dyn ByteStream>> {
        wire::write_request(&mut self.stream, request)?;
        wire::read_status_failure_as_error(&mut self.stream, request)?;
        Ok(self.stream)
    }

    /// Sends `host:<transport-descriptor>` to select a device as this
    /// connection's target, returning a connection now addressed at it.
    pub fn select_device(mut self, descriptor: &DeviceDescriptor) -> AdbResult<DeviceConn> {
        let request = format!("host:{}", descriptor.transport_descriptor());
        wire::write_request(&mut self.stream, &request)?;
        wire::read_status_failure_as_error(&mut self.stream, &request)?;
        Ok(DeviceConn {
            stream: self.stream,
        })
    }
}

/// A connection addressed at a single selected device.
pub struct DeviceConn {
    stream: Box<dyn ByteStream>,
}

impl DeviceConn {
    /// Sends `shell:<cmdline>` and reads the merged stdout/stderr stream to
    /// EOF (no length header on this response).
    pub fn run_shell(mut self, cmdline: &str) -> AdbResult<Vec<u8>> {
        let request = format!("shell:{cmdline}");
        wire::write_request(&mut self.stream, &request)?;
        wire::read_status_failure_as_error(&mut self.stream, &request)?;
        wire::read_until_eof(&mut self.stream)
    }

    /// Sends a device-scoped request (e.g. `remount`) and reads its single
    /// response message.
    pub fn round_trip(mut self, request: &str) -> AdbResult<String> {
        wire::write_request(&mut self.stream, request)?;
        wire::read_status_failure_as_error(&mut self.stream, request)?;
        wire::read_message_string(&mut self.stream)
    }

    /// Sends `sync:` and switches this connection to the binary sync
    /// framing.
    pub fn enter_sync(mut self) -> AdbResult<SyncConn> {
        wire::write_request(&mut self.stream, "sync:")?;
        wire::read_status_failure_as_error(&mut self.stream, "sync:")?;
        Ok(SyncConn {
            stream: self.stream,
        })
    }
}

/// A connection in binary sync mode. Exposes only the raw stream; the sync
/// operations in [`crate::sync_client`] drive it directly so that each
/// streaming handle (reader/writer/cursor) can own it exclusively.
pub struct SyncConn {
    stream: Box<dyn ByteStream>,
}

impl SyncConn {
    pub fn into_stream(self) -> Box<dyn ByteStream> {
        self.stream
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SyncConn;
    use std::io::{Cursor, Read, Write};

    /// Reads scripted server bytes; discards anything written to it. Sync
    /// operations write a request and read its response on the same stream,
    /// so a plain `Cursor<Vec<u8>>` won't do: the write would advance the
    /// shared position and clobber the scripted response before it's read.
    struct ScriptedServer {
        responses: Cursor<Vec<u8>>,
    }

    impl Read for ScriptedServer {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.responses.read(buf)
        }
    }

    impl Write for ScriptedServer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Builds a [`SyncConn`] backed by an in-memory buffer of scripted
    /// server bytes, for driving `sync_client` tests without a socket.
    pub(crate) fn sync_conn_from_bytes(bytes: Vec<u8>) -> SyncConn {
        SyncConn {
            stream: Box::new(ScriptedServer {
                responses: Cursor::new(bytes),
            }),
        }
    }
}
