use thiserror::Error;

/// The error taxonomy callers are expected to match on. Distinct from the
/// [`AdbError`] variant identity: a wrapped/contextualized error keeps the
/// code of whatever it wraps, so callers should use [`AdbError::has_code`]
/// rather than matching on the enum directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Assertion,
    Parse,
    ServerNotAvailable,
    Network,
    ConnectionReset,
    Adb,
    DeviceNotFound,
    FileNoExist,
}

/// Unified ADB error type.
#[derive(Error, Debug)]
pub enum AdbError {
    /// A programmer-visible invariant was violated: an over-length frame,
    /// an unexpected sync opcode, a blank shell command.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The server (or caller input) didn't match the expected grammar.
    #[error("parse error: {0}")]
    Parse(String),

    /// Dialing the server failed and starting it didn't rescue the
    /// situation, or the redial itself failed.
    #[error("adb server not available: {0}")]
    ServerNotAvailable(String),

    /// A transport-level I/O failure not covered by a more specific code.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// The peer closed the stream in the middle of a framed read.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The server reported `FAIL` with a message that didn't match any more
    /// specific pattern.
    #[error("adb error: {0}")]
    Adb(String),

    /// The server reported `FAIL` with a "device ... not found" message, or
    /// a device lookup by serial came up empty.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A sync `STAT` returned the all-zero sentinel, or a sync operation
    /// failed with the server's "no such file" message.
    #[error("no such file: {0}")]
    FileNoExist(String),

    /// Wraps another error with a message identifying the operation (and,
    /// for device operations, the descriptor) that produced it. Carries the
    /// wrapped error's code.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AdbError>,
    },
}

impl AdbError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AdbError::Assertion(_) => ErrorCode::Assertion,
            AdbError::Parse(_) => ErrorCode::Parse,
            AdbError::ServerNotAvailable(_) => ErrorCode::ServerNotAvailable,
            AdbError::Network(_) => ErrorCode::Network,
            AdbError::ConnectionReset(_) => ErrorCode::ConnectionReset,
            AdbError::Adb(_) => ErrorCode::Adb,
            AdbError::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            AdbError::FileNoExist(_) => ErrorCode::FileNoExist,
            AdbError::Context { source, .. } => source.code(),
        }
    }

    /// Walks the (currently single-hop) wrapping chain and checks the
    /// innermost code, the way callers are expected to test for a
    /// particular failure class instead of matching variants directly.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == code
    }

    /// Wraps `self` with a message identifying the operation that produced
    /// it, preserving the original code.
    pub fn context(self, message: impl Into<String>) -> AdbError {
        AdbError::Context {
            context: message.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn incomplete(description: &str, actual: usize, expected: usize) -> AdbError {
        AdbError::ConnectionReset(format!(
            "incomplete {description}: read {actual} bytes, expecting {expected}"
        ))
    }

    /// Converts back to an `io::Error` for use in a `Read`/`Write` impl,
    /// preserving the original `io::ErrorKind` (e.g. `BrokenPipe`) when this
    /// wraps a network failure instead of flattening it to `Other`.
    pub(crate) fn into_io_error(self) -> std::io::Error {
        match self {
            AdbError::Network(e) => e,
            AdbError::Context { source, .. } => source.into_io_error(),
            other => std::io::Error::other(other.to_string()),
        }
    }
}

pub type AdbResult<T> = Result<T, AdbError>;

/// Extension used at call sites to attach operation context, mirroring the
/// `wrapClientError(err, client, operation)` pattern: `op.context_with(||
/// format!("error performing {operation} on {device}"))`.
pub trait ResultExt<T> {
    fn context_with(self, f: impl FnOnce() -> String) -> AdbResult<T>;
}

impl<T> ResultExt<T> for AdbResult<T> {
    fn context_with(self, f: impl FnOnce() -> String) -> AdbResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_preserves_wrapped_code() {
        let err = AdbError::DeviceNotFound("x".into()).context("error performing Shell on foo");
        assert!(err.has_code(ErrorCode::DeviceNotFound));
        assert_eq!(
            err.to_string(),
            "error performing Shell on foo: device not found: x"
        );
    }
}
