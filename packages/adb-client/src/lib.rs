//! A blocking client for the Android Debug Bridge (adb) host/device wire
//! protocol: enumerate devices, watch for connection changes, run shell
//! commands, and push/pull files, by talking to a locally- or
//! remotely-running adb server over TCP.
//!
//! [`Host`] is the entry point: it configures where the server lives and
//! hands out [`HostClient`] (server-wide operations) and [`DeviceClient`]
//! (per-device operations) instances, each of which opens a fresh
//! connection per call rather than holding one open.

pub mod conn;
pub mod descriptor;
pub mod device_client;
pub mod error;
pub mod host_client;
pub mod sync_client;
pub mod transport;
pub mod watcher;
pub mod wire;

use std::path::PathBuf;
use std::sync::Arc;

pub use descriptor::{DeviceDescriptor, DeviceState};
pub use device_client::DeviceClient;
pub use error::{AdbError, AdbResult, ErrorCode};
pub use host_client::{DeviceInfo, HostClient};
pub use sync_client::{DirEntries, DirEntry, SyncReader, SyncWriter, MTIME_OF_CLOSE};
pub use watcher::{DeviceStateChangedEvent, DeviceWatcher};

use transport::{AdbBinaryStarter, ServerTransport, TcpDialer};

/// The default port the adb server listens on.
pub const DEFAULT_PORT: u16 = 5037;

/// Configures where the adb server lives and how to reach it. Cloning a
/// `Host` is cheap: the underlying transport is shared.
#[derive(Clone)]
pub struct Host {
    transport: Arc<ServerTransport>,
}

impl Default for Host {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Host {
    /// Connects to `host:port`, starting the server with the given `adb`
    /// binary path if the first dial fails.
    pub fn new(host: impl Into<String>, port: u16, path_to_adb: impl Into<PathBuf>) -> Self {
        let host = host.into();
        let path_to_adb = path_to_adb.into();
        let transport = ServerTransport::with_collaborators(
            Box::new(TcpDialer {
                host: host.clone(),
                port,
            }),
            Box::new(AdbBinaryStarter {
                path_to_adb,
                host,
                port,
            }),
        );
        Self {
            transport: Arc::new(transport),
        }
    }

    /// `localhost:5037`, starting the server via whatever `adb` resolves to
    /// on `PATH`.
    pub fn local() -> Self {
        Self {
            transport: Arc::new(ServerTransport::new("localhost", DEFAULT_PORT)),
        }
    }

    /// Resolves host/port from `ANDROID_ADB_SERVER_HOST`/
    /// `ANDROID_ADB_SERVER_PORT`, falling back to `localhost:5037`, the way
    /// the real `adb` CLI does.
    pub fn from_env() -> Self {
        Self {
            transport: Arc::new(ServerTransport::from_env()),
        }
    }

    pub fn host_client(&self) -> HostClient {
        HostClient::new(Arc::clone(&self.transport))
    }

    pub fn device(&self, descriptor: DeviceDescriptor) -> DeviceClient {
        DeviceClient::new(Arc::clone(&self.transport), descriptor)
    }

    /// Starts a background subscription to the device change feed.
    pub fn watch(&self) -> DeviceWatcher {
        DeviceWatcher::start(Arc::clone(&self.transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_local_defaults_to_loopback_and_default_port() {
        // Smoke test that construction doesn't touch the network; actual
        // connectivity is exercised by the integration tests.
        let _host = Host::local();
    }
}
