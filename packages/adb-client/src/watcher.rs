//! Long-lived subscription to `host:track-devices`, diffed into a stream of
//! per-serial state transitions. Runs a background thread that owns its own
//! connection and republishes through a bounded channel; recovers from a
//! transport fault by restarting the server once and re-subscribing once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{AdbError, AdbResult, ErrorCode};
use crate::transport::ServerTransport;
use crate::wire::host as wire;

/// One device's state transition between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStateChangedEvent {
    pub serial: String,
    pub old_state: String,
    pub new_state: String,
}

impl DeviceStateChangedEvent {
    /// `old != device && new == device`
    pub fn came_online(&self) -> bool {
        self.old_state != "device" && self.new_state == "device"
    }

    /// `old == device && new != device`
    pub fn went_offline(&self) -> bool {
        self.old_state == "device" && self.new_state != "device"
    }
}

/// Parses a `track-devices` snapshot (`serial\tstate\n` lines) into a map.
/// A malformed line (missing the tab separator) is reported with the
/// 1-indexed line number it occurred on.
pub(crate) fn parse_device_states(text: &str) -> AdbResult<BTreeMap<String, String>> {
    let mut states = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((serial, state)) => {
                states.insert(serial.to_string(), state.to_string());
            }
            None => {
                return Err(AdbError::Parse(format!(
                    "invalid device state line {}: {line}",
                    idx + 1
                )));
            }
        }
    }
    Ok(states)
}

/// Computes the events needed to go from `old` to `new`, in ascending
/// serial order so the result is deterministic regardless of map iteration
/// order.
pub(crate) fn calculate_state_diffs(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Vec<DeviceStateChangedEvent> {
    let serials: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut events = Vec::new();
    for serial in serials {
        let old_state = old.get(serial).cloned().unwrap_or_default();
        let new_state = new.get(serial).cloned().unwrap_or_default();
        if old_state != new_state {
            events.push(DeviceStateChangedEvent {
                serial: serial.clone(),
                old_state,
                new_state,
            });
        }
    }
    events
}

/// A running subscription to the device change feed.
pub struct DeviceWatcher {
    events: Receiver<DeviceStateChangedEvent>,
    err: Arc<Mutex<Option<AdbError>>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    pub fn start(transport: Arc<ServerTransport>) -> Self {
        let (tx, rx) = mpsc::sync_channel(16);
        let err = Arc::new(Mutex::new(None));
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let err = Arc::clone(&err);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || run(transport, tx, err, cancel))
        };
        Self {
            events: rx,
            err,
            cancel,
            handle: Some(handle),
        }
    }

    /// Blocks until the next event, or returns `None` once the watcher has
    /// terminated and drained.
    pub fn recv(&self) -> Option<DeviceStateChangedEvent> {
        self.events.recv().ok()
    }

    /// Non-blocking receive with a timeout, for callers polling alongside
    /// other work.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<DeviceStateChangedEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// The code of the terminal error, if the watcher has stopped because
    /// of one. Per the recovery contract, this is the *redial's* error code
    /// when a transport fault triggers a restart-and-resubscribe that then
    /// itself fails, not the original fault's code.
    pub fn err_code(&self) -> Option<ErrorCode> {
        self.err.lock().unwrap().as_ref().map(|e| e.code())
    }

    /// The terminal error's display message, if any.
    pub fn err_message(&self) -> Option<String> {
        self.err.lock().unwrap().as_ref().map(|e| e.to_string())
    }

    /// Requests the background thread stop and waits for it to finish.
    pub fn cancel(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    transport: Arc<ServerTransport>,
    tx: SyncSender<DeviceStateChangedEvent>,
    err_slot: Arc<Mutex<Option<AdbError>>>,
    cancel: Arc<AtomicBool>,
) {
    let mut previous: BTreeMap<String, String> = BTreeMap::new();
    let mut restarted_once = false;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        let stream = match subscribe(&transport) {
            Ok(stream) => stream,
            Err(e) => {
                *err_slot.lock().unwrap() = Some(e);
                return;
            }
        };

        match read_snapshots(stream, &tx, &mut previous, &cancel) {
            Ok(()) => return, // peer closed cleanly or caller cancelled
            Err(e) if !restarted_once => {
                warn!(error = %e, "track-devices stream faulted, restarting server and resubscribing");
                restarted_once = true;
                if let Err(start_err) = transport.start_server() {
                    error!(error = %start_err, "failed to restart adb server after track-devices fault");
                    *err_slot.lock().unwrap() = Some(start_err);
                    return;
                }
                // Exactly one redial attempt, via the non-self-healing
                // dialer: the restart above is this watcher's retry, and
                // letting the transport's own dial-retry-start-retry logic
                // run here would start the server a second time for one
                // fault.
                match subscribe_plain(&transport) {
                    Ok(stream) => match read_snapshots(stream, &tx, &mut previous, &cancel) {
                        Ok(()) => return,
                        Err(redial_err) => {
                            error!(error = %redial_err, "track-devices resubscribe failed");
                            *err_slot.lock().unwrap() = Some(redial_err);
                            return;
                        }
                    },
                    Err(redial_err) => {
                        error!(error = %redial_err, "track-devices redial failed");
                        *err_slot.lock().unwrap() = Some(redial_err);
                        return;
                    }
                }
            }
            Err(e) => {
                *err_slot.lock().unwrap() = Some(e);
                return;
            }
        }
    }
}

fn subscribe(transport: &ServerTransport) -> AdbResult<Box<dyn crate::conn::ByteStream>> {
    let conn = transport.connect()?;
    conn.send_for_streaming("host:track-devices")
}

fn subscribe_plain(transport: &ServerTransport) -> AdbResult<Box<dyn crate::conn::ByteStream>> {
    let conn = transport.dial_plain()?;
    conn.send_for_streaming("host:track-devices")
}

/// Reads length-prefixed snapshots until the stream ends or cancellation is
/// requested, diffing and publishing events as they arrive. Returns `Ok(())`
/// on a clean shutdown, `Err` on a transport fault worth recovering from.
fn read_snapshots(
    mut stream: Box<dyn crate::conn::ByteStream>,
    tx: &SyncSender<DeviceStateChangedEvent>,
    previous: &mut BTreeMap<String, String>,
    cancel: &Arc<AtomicBool>,
) -> AdbResult<()> {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot = wire::read_message_string(&mut stream)?;
        let states = parse_device_states(&snapshot)?;
        for event in calculate_state_diffs(previous, &states) {
            if tx.send(event).is_err() {
                return Ok(()); // receiver dropped; nothing left to do
            }
        }
        *previous = states;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_states_single_line() {
        let states = parse_device_states("192.168.56.101:5555\temulator-state\n").unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states["192.168.56.101:5555"], "emulator-state");
    }

    #[test]
    fn parse_device_states_multiple_lines() {
        let states =
            parse_device_states("192.168.56.101:5555\temulator-state\n0x0x0x0x\tusb-state\n")
                .unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states["0x0x0x0x"], "usb-state");
    }

    #[test]
    fn parse_device_states_malformed_line_reports_line_number() {
        let err =
            parse_device_states("192.168.56.101:5555\temulator-state\n0x0x0x0x\n").unwrap_err();
        assert!(err.has_code(crate::error::ErrorCode::Parse));
        assert_eq!(err.to_string(), "parse error: invalid device state line 2: 0x0x0x0x");
    }

    #[test]
    fn diff_empty_to_empty_is_empty() {
        assert!(calculate_state_diffs(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn diff_unchanged_nonempty_is_empty() {
        let m = BTreeMap::from([("1".into(), "device".into()), ("2".into(), "device".into())]);
        assert!(calculate_state_diffs(&m, &m).is_empty());
    }

    #[test]
    fn diff_one_added() {
        let old = BTreeMap::new();
        let new = BTreeMap::from([("serial".to_string(), "added".to_string())]);
        assert_eq!(
            calculate_state_diffs(&old, &new),
            vec![DeviceStateChangedEvent {
                serial: "serial".into(),
                old_state: "".into(),
                new_state: "added".into(),
            }]
        );
    }

    #[test]
    fn diff_one_removed() {
        let old = BTreeMap::from([("serial".to_string(), "removed".to_string())]);
        let new = BTreeMap::new();
        assert_eq!(
            calculate_state_diffs(&old, &new),
            vec![DeviceStateChangedEvent {
                serial: "serial".into(),
                old_state: "removed".into(),
                new_state: "".into(),
            }]
        );
    }

    #[test]
    fn diff_one_added_one_removed_is_sorted_by_serial() {
        let old = BTreeMap::from([("1".to_string(), "removed".to_string())]);
        let new = BTreeMap::from([("2".to_string(), "added".to_string())]);
        assert_eq!(
            calculate_state_diffs(&old, &new),
            vec![
                DeviceStateChangedEvent {
                    serial: "1".into(),
                    old_state: "removed".into(),
                    new_state: "".into(),
                },
                DeviceStateChangedEvent {
                    serial: "2".into(),
                    old_state: "".into(),
                    new_state: "added".into(),
                },
            ]
        );
    }

    #[test]
    fn diff_one_added_one_removed_one_changed_is_sorted_by_serial() {
        let old = BTreeMap::from([
            ("1".to_string(), "oldState".to_string()),
            ("2".to_string(), "removed".to_string()),
        ]);
        let new = BTreeMap::from([
            ("1".to_string(), "newState".to_string()),
            ("3".to_string(), "added".to_string()),
        ]);
        assert_eq!(
            calculate_state_diffs(&old, &new),
            vec![
                DeviceStateChangedEvent {
                    serial: "1".into(),
                    old_state: "oldState".into(),
                    new_state: "newState".into(),
                },
                DeviceStateChangedEvent {
                    serial: "2".into(),
                    old_state: "removed".into(),
                    new_state: "".into(),
                },
                DeviceStateChangedEvent {
                    serial: "3".into(),
                    old_state: "".into(),
                    new_state: "added".into(),
                },
            ]
        );
    }

    #[test]
    fn came_online_and_went_offline() {
        let came_online = DeviceStateChangedEvent {
            serial: "s".into(),
            old_state: "offline".into(),
            new_state: "device".into(),
        };
        assert!(came_online.came_online());
        assert!(!came_online.went_offline());

        let went_offline = DeviceStateChangedEvent {
            serial: "s".into(),
            old_state: "device".into(),
            new_state: "offline".into(),
        };
        assert!(went_offline.went_offline());
        assert!(!went_offline.came_online());
    }

    // Grounded on the reference implementation's device-watcher test that
    // asserts restart-and-resubscribe happens at most once: a fault in the
    // middle of the track-devices stream triggers exactly one start-server
    // call and one redial, and if that redial itself fails, its error code
    // (not the original fault's) becomes the watcher's latched terminal
    // error.
    mod restart_recovery {
        use super::*;
        use crate::conn::ByteStream;
        use crate::transport::{Dialer, ServerTransport, StartServer};
        use std::io::{Cursor, Read as _, Write as _};
        use std::sync::atomic::AtomicUsize;

        struct OneShotOkayThenEof;

        impl Dialer for OneShotOkayThenEof {
            fn dial(&self) -> AdbResult<Box<dyn ByteStream>> {
                Ok(Box::new(ReadOnly(Cursor::new(b"OKAY".to_vec()))))
            }
        }

        struct FailingRedial;

        impl Dialer for FailingRedial {
            fn dial(&self) -> AdbResult<Box<dyn ByteStream>> {
                Err(AdbError::ServerNotAvailable("failed redial".to_string()))
            }
        }

        struct ReadOnly(Cursor<Vec<u8>>);
        impl std::io::Read for ReadOnly {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                self.0.read(buf)
            }
        }
        impl std::io::Write for ReadOnly {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        struct SequencedDialer {
            first: OneShotOkayThenEof,
            second: FailingRedial,
            calls: AtomicUsize,
        }

        impl Dialer for SequencedDialer {
            fn dial(&self) -> AdbResult<Box<dyn ByteStream>> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    self.first.dial()
                } else {
                    self.second.dial()
                }
            }
        }

        struct CountingStarter {
            calls: AtomicUsize,
        }

        impl StartServer for CountingStarter {
            fn start(&self) -> AdbResult<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[test]
        fn restarts_server_once_and_latches_redial_error() {
            let starter = Arc::new(CountingStarter {
                calls: AtomicUsize::new(0),
            });
            let dialer = SequencedDialer {
                first: OneShotOkayThenEof,
                second: FailingRedial,
                calls: AtomicUsize::new(0),
            };

            struct StarterHandle(Arc<CountingStarter>);
            impl StartServer for StarterHandle {
                fn start(&self) -> AdbResult<()> {
                    self.0.start()
                }
            }

            let transport = Arc::new(ServerTransport::with_collaborators(
                Box::new(dialer),
                Box::new(StarterHandle(Arc::clone(&starter))),
            ));

            let (tx, _rx) = mpsc::sync_channel(16);
            let err_slot = Arc::new(Mutex::new(None));
            let cancel = Arc::new(AtomicBool::new(false));

            run(transport, tx, Arc::clone(&err_slot), cancel);

            assert_eq!(starter.calls.load(Ordering::SeqCst), 1);
            let err = err_slot.lock().unwrap();
            assert_eq!(err.as_ref().unwrap().code(), ErrorCode::ServerNotAvailable);
        }
    }
}
