//! Dials the adb server, starting it via a pluggable action if the first
//! dial fails and retrying exactly once.

use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace, warn};

use crate::conn::{ByteStream, HostConn};
use crate::error::{AdbError, AdbResult};

/// Produces a fresh connected byte stream. Implemented for `TcpDialer`;
/// tests substitute their own implementation to avoid touching the network.
pub trait Dialer: Send + Sync {
    fn dial(&self) -> AdbResult<Box<dyn ByteStream>>;
}

/// Invoked when the first dial attempt fails, to bring a server up before
/// retrying.
pub trait StartServer: Send + Sync {
    fn start(&self) -> AdbResult<()>;
}

/// Dials `host:port` over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub host: String,
    pub port: u16,
}

impl Dialer for TcpDialer {
    fn dial(&self) -> AdbResult<Box<dyn ByteStream>> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr).map_err(AdbError::Network)?;
        stream.set_nodelay(true).map_err(AdbError::Network)?;
        Ok(Box::new(stream))
    }
}

/// Starts the server by executing the configured `adb` binary with
/// `-L tcp:<host>:<port> start-server`, mirroring how the real client
/// brings up a server instance bound to a particular address.
#[derive(Debug, Clone)]
pub struct AdbBinaryStarter {
    pub path_to_adb: PathBuf,
    pub host: String,
    pub port: u16,
}

impl AdbBinaryStarter {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            path_to_adb: PathBuf::from("adb"),
            host: host.into(),
            port,
        }
    }
}

impl StartServer for AdbBinaryStarter {
    fn start(&self) -> AdbResult<()> {
        let resolved = resolve_adb_path(&self.path_to_adb)?;
        ensure_executable(&resolved)?;
        let address = format!("tcp:{}:{}", self.host, self.port);
        debug!(adb = %resolved.display(), %address, "starting adb server");
        let output = Command::new(&resolved)
            .args(["-L", &address, "start-server"])
            .output()
            .map_err(AdbError::Network)?;
        if output.status.success() {
            Ok(())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(AdbError::ServerNotAvailable(format!(
                "`{} start-server` exited with {}: {}",
                resolved.display(),
                output.status,
                combined.trim()
            )))
        }
    }
}

fn resolve_adb_path(path: &Path) -> AdbResult<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    // A bare name: let the OS search PATH, same as `exec.LookPath` in the
    // reference implementation. We don't resolve it ourselves; Command does
    // that, but we still need a concrete path to check executability, so
    // only bypass the check when we can't reasonably search PATH ourselves
    // and instead let Command fail loudly if the name doesn't resolve.
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    Ok(meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> io::Result<bool> {
    let meta = std::fs::metadata(path)?;
    Ok(meta.is_file())
}

fn ensure_executable(path: &Path) -> AdbResult<()> {
    match is_executable_file(path) {
        Ok(true) => Ok(()),
        // A bare name (e.g. "adb") isn't a path we can stat directly; trust
        // Command/PATH resolution to either find and run it or fail.
        Ok(false) if path.components().count() <= 1 && !path.is_absolute() => Ok(()),
        Ok(false) => Err(AdbError::ServerNotAvailable(format!(
            "{} is not an executable file",
            path.display()
        ))),
        Err(e) => Err(AdbError::Network(e)),
    }
}

/// Produces addressed connections to a single adb server, restarting it on
/// demand when the initial dial fails.
pub struct ServerTransport {
    dialer: Box<dyn Dialer>,
    starter: Box<dyn StartServer>,
}

impl ServerTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            dialer: Box::new(TcpDialer {
                host: host.clone(),
                port,
            }),
            starter: Box::new(AdbBinaryStarter::new(host, port)),
        }
    }

    /// Resolves `host`/`port` from the `ANDROID_ADB_SERVER_HOST`/
    /// `ANDROID_ADB_SERVER_PORT` environment variables, falling back to
    /// `localhost:5037`, matching the real `adb` CLI's defaults.
    pub fn from_env() -> Self {
        let host = std::env::var("ANDROID_ADB_SERVER_HOST").unwrap_or_else(|_| "localhost".into());
        let port = std::env::var("ANDROID_ADB_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5037);
        Self::new(host, port)
    }

    pub fn with_collaborators(dialer: Box<dyn Dialer>, starter: Box<dyn StartServer>) -> Self {
        Self { dialer, starter }
    }

    /// Invokes the configured start-server action directly, without
    /// dialing. Used by the device watcher's recovery path.
    pub fn start_server(&self) -> AdbResult<()> {
        self.starter.start()
    }

    /// Dials once with no start-server fallback. Used by the device
    /// watcher's recovery path, which drives its own single
    /// start-then-redial sequence and would otherwise end up triggering
    /// the start-server action twice for one fault.
    pub fn dial_plain(&self) -> AdbResult<HostConn> {
        self.dialer.dial().map(HostConn::new)
    }

    /// Dials a fresh connection, starting the server and retrying once if
    /// the first dial fails.
    pub fn connect(&self) -> AdbResult<HostConn> {
        match self.dialer.dial() {
            Ok(stream) => {
                trace!("dialed adb server");
                Ok(HostConn::new(stream))
            }
            Err(first_err) => {
                warn!(error = %first_err, "initial dial failed, starting server");
                self.starter.start()?;
                self.dialer
                    .dial()
                    .map(|stream| {
                        trace!("dialed adb server after starting it");
                        HostConn::new(stream)
                    })
                    .map_err(|e| {
                        AdbError::ServerNotAvailable(format!(
                            "could not connect to adb server even after starting it: {e}"
                        ))
                    })
            }
        }
    }
}
