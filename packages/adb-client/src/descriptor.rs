use std::fmt;

use crate::error::{AdbError, AdbResult};

/// Selects which device a request should be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceDescriptor {
    /// Any single attached device or emulator.
    Any,
    /// Any device attached over USB.
    AnyUsb,
    /// Any local (emulator/TCP) device.
    AnyLocal,
    /// A specific device by serial.
    Serial(String),
}

impl DeviceDescriptor {
    /// The string sent after `host:` to select this device as the
    /// connection's transport.
    pub fn transport_descriptor(&self) -> String {
        match self {
            DeviceDescriptor::Any => "transport-any".to_string(),
            DeviceDescriptor::AnyUsb => "transport-usb".to_string(),
            DeviceDescriptor::AnyLocal => "transport-local".to_string(),
            DeviceDescriptor::Serial(serial) => format!("transport:{serial}"),
        }
    }

    /// The prefix used for device-scoped host requests like
    /// `<prefix>:get-serialno`.
    pub fn host_prefix(&self) -> String {
        match self {
            DeviceDescriptor::Any => "host".to_string(),
            DeviceDescriptor::AnyUsb => "host-usb".to_string(),
            DeviceDescriptor::AnyLocal => "host-local".to_string(),
            DeviceDescriptor::Serial(serial) => format!("host-serial:{serial}"),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDescriptor::Any => write!(f, "any device"),
            DeviceDescriptor::AnyUsb => write!(f, "any usb device"),
            DeviceDescriptor::AnyLocal => write!(f, "any local device"),
            DeviceDescriptor::Serial(serial) => write!(f, "device {serial}"),
        }
    }
}

/// Connection state of a device as reported by `host:devices`/`get-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Disconnected,
    Offline,
    Online,
    Unauthorized,
}

impl DeviceState {
    pub fn parse(token: &str) -> AdbResult<DeviceState> {
        match token {
            "" => Ok(DeviceState::Disconnected),
            "offline" => Ok(DeviceState::Offline),
            "device" => Ok(DeviceState::Online),
            "unauthorized" => Ok(DeviceState::Unauthorized),
            other => Err(AdbError::Parse(format!("invalid device state {other:?}"))),
        }
    }

    pub fn as_wire_token(self) -> &'static str {
        match self {
            DeviceState::Disconnected => "",
            DeviceState::Offline => "offline",
            DeviceState::Online => "device",
            DeviceState::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Offline => "offline",
            DeviceState::Online => "device",
            DeviceState::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_descriptors_match_wire_forms() {
        assert_eq!(DeviceDescriptor::Any.transport_descriptor(), "transport-any");
        assert_eq!(DeviceDescriptor::AnyUsb.transport_descriptor(), "transport-usb");
        assert_eq!(DeviceDescriptor::AnyLocal.transport_descriptor(), "transport-local");
        assert_eq!(
            DeviceDescriptor::Serial("ABC123".into()).transport_descriptor(),
            "transport:ABC123"
        );
    }

    #[test]
    fn host_prefixes_match_wire_forms() {
        assert_eq!(DeviceDescriptor::Any.host_prefix(), "host");
        assert_eq!(
            DeviceDescriptor::Serial("ABC123".into()).host_prefix(),
            "host-serial:ABC123"
        );
    }

    #[test]
    fn state_tokens_round_trip() {
        for state in [
            DeviceState::Disconnected,
            DeviceState::Offline,
            DeviceState::Online,
            DeviceState::Unauthorized,
        ] {
            assert_eq!(DeviceState::parse(state.as_wire_token()).unwrap(), state);
        }
    }

    #[test]
    fn unrecognized_state_token_is_a_parse_error() {
        let err = DeviceState::parse("bootloader").unwrap_err();
        assert!(err.has_code(crate::error::ErrorCode::Parse));
    }
}
