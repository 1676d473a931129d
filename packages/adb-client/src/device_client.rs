//! Operations addressed through a single selected device: attribute
//! queries, shell commands, remount, and the sync-mode file operations.

use std::sync::Arc;

use crate::descriptor::{DeviceDescriptor, DeviceState};
use crate::error::{AdbError, AdbResult, ResultExt};
use crate::host_client::{DeviceInfo, HostClient};
use crate::sync_client::{self, DirEntries, DirEntry, SyncReader, SyncWriter};
use crate::transport::ServerTransport;

/// A client bound to a single device, identified by a [`DeviceDescriptor`].
/// Each method opens a fresh connection for its round trip; no state is
/// shared across calls. The transport is shared (via `Arc`) with any
/// [`HostClient`] built against the same server, rather than duplicated.
pub struct DeviceClient {
    transport: Arc<ServerTransport>,
    descriptor: DeviceDescriptor,
}

impl DeviceClient {
    pub fn new(transport: Arc<ServerTransport>, descriptor: DeviceDescriptor) -> Self {
        Self {
            transport,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// `<host-prefix>:get-serialno`
    pub fn serial(&self) -> AdbResult<String> {
        self.get_attribute("get-serialno")
    }

    /// `<host-prefix>:get-devpath`
    pub fn device_path(&self) -> AdbResult<String> {
        self.get_attribute("get-devpath")
    }

    /// `<host-prefix>:get-state`, parsed into a [`DeviceState`].
    pub fn state(&self) -> AdbResult<DeviceState> {
        let raw = self.get_attribute("get-state")?;
        DeviceState::parse(raw.trim())
            .context_with(|| format!("error performing State on {}", self.descriptor))
    }

    fn get_attribute(&self, attr: &str) -> AdbResult<String> {
        let conn = self.transport.connect()?;
        let request = format!("{}:{attr}", self.descriptor.host_prefix());
        conn.round_trip(&request)
            .context_with(|| format!("error performing {attr} on {}", self.descriptor))
    }

    /// Composes [`DeviceClient::serial`] with a [`HostClient::list_devices`]
    /// lookup; `DeviceNotFound` if this device isn't in the listing.
    pub fn device_info(&self) -> AdbResult<DeviceInfo> {
        let serial = self.serial()?;
        let host = HostClient::new(Arc::clone(&self.transport));
        let devices = host.list_devices()?;
        devices
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| {
                AdbError::DeviceNotFound(format!(
                    "device list doesn't contain serial {serial}"
                ))
            })
            .context_with(|| format!("error performing DeviceInfo on {}", self.descriptor))
    }

    /// Runs `cmd` (plus `args`) via `shell:`, returning the combined
    /// stdout/stderr the server streams back. The response carries no
    /// length header, so this reads to end-of-stream.
    pub fn run_command(&self, cmd: &str, args: &[&str]) -> AdbResult<Vec<u8>> {
        let cmdline = prepare_command_line(cmd, args)?;
        let conn = self.transport.connect()?;
        let device_conn = conn.select_device(&self.descriptor)?;
        device_conn
            .run_shell(&cmdline)
            .context_with(|| format!("error running command on {}", self.descriptor))
    }

    /// `remount` — remounts the device's filesystem read-write.
    pub fn remount(&self) -> AdbResult<String> {
        let conn = self.transport.connect()?;
        let device_conn = conn.select_device(&self.descriptor)?;
        device_conn
            .round_trip("remount")
            .context_with(|| format!("error performing Remount on {}", self.descriptor))
    }

    /// `STAT <path>` on a fresh sync connection.
    pub fn stat(&self, path: &str) -> AdbResult<DirEntry> {
        let sync = self.open_sync()?;
        sync_client::stat(sync, path)
            .context_with(|| format!("error performing Stat on {}", self.descriptor))
    }

    /// `LIST <path>` on a fresh sync connection.
    pub fn list_dir_entries(&self, path: &str) -> AdbResult<DirEntries> {
        let sync = self.open_sync()?;
        sync_client::list_dir_entries(sync, path)
            .context_with(|| format!("error performing ListDirEntries on {}", self.descriptor))
    }

    /// `RECV <path>` on a fresh sync connection.
    pub fn open_read(&self, path: &str) -> AdbResult<SyncReader> {
        let sync = self.open_sync()?;
        sync_client::open_read(sync, path)
            .context_with(|| format!("error performing OpenRead on {}", self.descriptor))
    }

    /// `SEND <path>,<mode>` on a fresh sync connection. `mtime` of `None`
    /// tells the writer to use the close time.
    pub fn open_write(
        &self,
        path: &str,
        mode: u32,
        mtime: Option<i64>,
    ) -> AdbResult<SyncWriter> {
        let sync = self.open_sync()?;
        sync_client::open_write(sync, path, mode, mtime)
            .context_with(|| format!("error performing OpenWrite on {}", self.descriptor))
    }

    fn open_sync(&self) -> AdbResult<crate::conn::SyncConn> {
        let conn = self.transport.connect()?;
        let device_conn = conn.select_device(&self.descriptor)?;
        device_conn.enter_sync()
    }
}

/// Validates and quotes a shell command line the way the reference client
/// does: the command is only checked for being blank (it's passed through
/// as-is otherwise), while arguments containing a double quote are rejected
/// and arguments containing whitespace are wrapped in double quotes before
/// everything is joined with single spaces.
fn prepare_command_line(cmd: &str, args: &[&str]) -> AdbResult<String> {
    if is_blank(cmd) {
        return Err(AdbError::Assertion("command is blank".to_string()));
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(cmd.to_string());
    for arg in args {
        parts.push(quote_argument_if_needed(arg)?);
    }
    Ok(parts.join(" "))
}

fn quote_argument_if_needed(arg: &str) -> AdbResult<String> {
    if arg.contains('"') {
        return Err(AdbError::Parse(format!(
            "arg contains an invalid double quote: {arg}"
        )));
    }
    if contains_whitespace(arg) {
        Ok(format!("\"{arg}\""))
    } else {
        Ok(arg.to_string())
    }
}

fn contains_whitespace(s: &str) -> bool {
    s.chars().any(|c| c == ' ' || c == '\t' || c == '\x0b')
}

fn is_blank(s: &str) -> bool {
    s.chars().all(|c| c.is_whitespace())
}
