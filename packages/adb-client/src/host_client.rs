//! Operations addressed to the adb server itself, not to any device:
//! version, kill, and the two device-listing requests.

use std::sync::Arc;

use crate::error::{AdbError, AdbResult, ResultExt};
use crate::transport::ServerTransport;

/// A device entry as reported by `host:devices`/`host:devices-l`. Note that
/// the connection state (`device`, `offline`, ...) is part of the wire line
/// but, matching the reference client, isn't retained here — callers who
/// need it should use [`crate::device_client::DeviceClient::state`] or the
/// [`crate::watcher::DeviceWatcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub product: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub usb: Option<String>,
}

impl DeviceInfo {
    pub fn is_usb(&self) -> bool {
        self.usb.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Operations that address the adb server rather than a specific device.
pub struct HostClient {
    transport: Arc<ServerTransport>,
}

impl HostClient {
    pub fn new(transport: Arc<ServerTransport>) -> Self {
        Self { transport }
    }

    /// `host:version` — the server's protocol version, parsed from its
    /// 4-hex-digit response.
    pub fn server_version(&self) -> AdbResult<u32> {
        let conn = self.transport.connect()?;
        let msg = conn.round_trip("host:version")?;
        u32::from_str_radix(msg.trim(), 16)
            .map_err(|e| AdbError::Parse(format!("invalid server version {msg:?}: {e}")))
            .context_with(|| "error getting server version".to_string())
    }

    /// `host:kill` — asks the server to exit. No response is read.
    pub fn kill_server(&self) -> AdbResult<()> {
        let conn = self.transport.connect()?;
        conn.send_only("host:kill")
            .context_with(|| "error killing adb server".to_string())
    }

    /// `host:devices` — the short listing, serials only.
    pub fn list_device_serials(&self) -> AdbResult<Vec<String>> {
        let conn = self.transport.connect()?;
        let msg = conn.round_trip("host:devices")?;
        parse_device_list(&msg, parse_device_short)
            .map(|devices| devices.into_iter().map(|d| d.serial).collect())
            .context_with(|| "error listing device serials".to_string())
    }

    /// `host:devices-l` — the long listing, with product/model/device/usb
    /// attributes where the server reports them.
    pub fn list_devices(&self) -> AdbResult<Vec<DeviceInfo>> {
        let conn = self.transport.connect()?;
        let msg = conn.round_trip("host:devices-l")?;
        parse_device_list(&msg, parse_device_long).context_with(|| "error listing devices".to_string())
    }
}

fn parse_device_list(
    list: &str,
    parse_line: impl Fn(&str) -> AdbResult<DeviceInfo>,
) -> AdbResult<Vec<DeviceInfo>> {
    list.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_device_short(line: &str) -> AdbResult<DeviceInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(AdbError::Parse(format!(
            "malformed device list line, expected 2 fields: {line:?}"
        )));
    }
    new_device_info(fields[0])
}

/// Requires at least serial, state, and one attribute. Unauthorized devices
/// typically report fewer fields than this in real `adb devices -l` output;
/// such lines are rejected here rather than silently degraded (see
/// DESIGN.md for the rationale).
fn parse_device_long(line: &str) -> AdbResult<DeviceInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(AdbError::Parse(format!(
            "malformed device list line, expected at least 5 fields: {line:?}"
        )));
    }
    let mut info = new_device_info(fields[0])?;
    for attr in &fields[2..] {
        let (key, value) = attr.split_once(':').ok_or_else(|| {
            AdbError::Parse(format!(
                "malformed device attribute {attr:?} in line: {line:?}"
            ))
        })?;
        match key {
            "product" => info.product = Some(value.to_string()),
            "model" => info.model = Some(value.to_string()),
            "device" => info.device = Some(value.to_string()),
            "usb" => info.usb = Some(value.to_string()),
            // transport_id and any future keys are reported but not part of
            // the data model.
            _ => {}
        }
    }
    Ok(info)
}

fn new_device_info(serial: &str) -> AdbResult<DeviceInfo> {
    if serial.is_empty() {
        return Err(AdbError::Parse("device serial is blank".to_string()));
    }
    Ok(DeviceInfo {
        serial: serial.to_string(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_line() {
        let dev = parse_device_short("192.168.56.101:5555\tdevice\n").unwrap();
        assert_eq!(
            dev,
            DeviceInfo {
                serial: "192.168.56.101:5555".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn parse_short_line_rejects_wrong_field_count() {
        assert!(parse_device_short("onlyserial\n").is_err());
    }

    #[test]
    fn parse_long_line() {
        let dev =
            parse_device_long("SERIAL    device product:PRODUCT model:MODEL device:DEVICE\n")
                .unwrap();
        assert_eq!(
            dev,
            DeviceInfo {
                serial: "SERIAL".into(),
                product: Some("PRODUCT".into()),
                model: Some("MODEL".into()),
                device: Some("DEVICE".into()),
                usb: None,
            }
        );
    }

    #[test]
    fn parse_long_line_with_usb() {
        let dev = parse_device_long(
            "SERIAL    device usb:1234 product:PRODUCT model:MODEL device:DEVICE \n",
        )
        .unwrap();
        assert_eq!(
            dev,
            DeviceInfo {
                serial: "SERIAL".into(),
                product: Some("PRODUCT".into()),
                model: Some("MODEL".into()),
                device: Some("DEVICE".into()),
                usb: Some("1234".into()),
            }
        );
    }

    #[test]
    fn parse_device_list_handles_multiple_lines() {
        let list = "192.168.56.101:5555\tdevice\n05856558\tdevice\n";
        let devices = parse_device_list(list, parse_device_short).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "192.168.56.101:5555");
        assert_eq!(devices[1].serial, "05856558");
    }
}
