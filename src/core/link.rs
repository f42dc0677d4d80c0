//! Sensor link to the hardware controller
//!
//! Wraps a line transport with the serial protocol: latched button and
//! transit events, last-known channel readings, deduplicated light output
//! with a periodic heartbeat. Once the transport fails the link is down for
//! good; polls return the last-known values and sends become no-ops.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::protocol::{transit_detected, Button, Inbound, Outbound};
use crate::error::LinkError;
use crate::types::{LightState, Triggers};
use crate::CHANNEL_COUNT;

/// Partial input longer than this without a newline is discarded
const MAX_PARTIAL_LINE: usize = 1024;

// =============================================================================
// TRANSPORTS
// =============================================================================

/// A bidirectional, line-oriented channel
pub trait LineTransport: Send {
    /// Write one line; the newline is appended here
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Append every complete line that is available now, without waiting
    fn drain_lines(&mut self, out: &mut Vec<String>) -> Result<(), LinkError>;

    /// Release the underlying device
    fn close(&mut self) {}
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        (**self).write_line(line)
    }

    fn drain_lines(&mut self, out: &mut Vec<String>) -> Result<(), LinkError> {
        (**self).drain_lines(out)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Serial port backend
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    partial: Vec<u8>,
}

impl SerialTransport {
    /// Open `name` with a bounded i/o timeout
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, LinkError> {
        let port = serialport::new(name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|source| LinkError::Open {
                port: name.to_string(),
                source,
            })?;
        info!(port = name, baud_rate, "serial link open");
        Ok(Self {
            name: name.to_string(),
            port: Some(port),
            partial: Vec::new(),
        })
    }

    /// Pick the most likely microcontroller port: a USB-serial bridge if
    /// one is present, otherwise the first port found
    pub fn detect_port() -> Result<String, LinkError> {
        let ports = serialport::available_ports().map_err(|source| LinkError::Open {
            port: "<scan>".to_string(),
            source,
        })?;

        let bridge = ports.iter().find(|p| match &p.port_type {
            serialport::SerialPortType::UsbPort(usb) => usb
                .product
                .as_deref()
                .map(is_usb_serial_bridge)
                .unwrap_or(false),
            _ => false,
        });

        bridge
            .or_else(|| ports.first())
            .map(|p| p.port_name.clone())
            .ok_or(LinkError::NoPort)
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, LinkError> {
        self.port.as_mut().ok_or_else(|| {
            LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port closed",
            ))
        })
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("partial", &self.partial.len())
            .finish()
    }
}

fn is_usb_serial_bridge(product: &str) -> bool {
    ["CP210", "CH340", "USB Serial"]
        .iter()
        .any(|marker| product.contains(marker))
}

impl LineTransport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let port = self.port()?;
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        port.write_all(&bytes)?;
        Ok(())
    }

    fn drain_lines(&mut self, out: &mut Vec<String>) -> Result<(), LinkError> {
        let port = self.port()?;
        let mut received = Vec::new();
        loop {
            let available = port
                .bytes_to_read()
                .map_err(|e| LinkError::Io(e.into()))? as usize;
            if available == 0 {
                break;
            }
            let mut buf = vec![0u8; available];
            let n = port.read(&mut buf)?;
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        self.partial.extend_from_slice(&received);
        split_lines(&mut self.partial, out);
        if self.partial.len() > MAX_PARTIAL_LINE {
            warn!(port = %self.name, bytes = self.partial.len(), "discarding unterminated input");
            self.partial.clear();
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.name, "serial link closed");
        }
    }
}

/// Move every newline-terminated line out of `buf`
fn split_lines(buf: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if !text.is_empty() {
            out.push(text.to_string());
        }
    }
}

#[derive(Debug, Default)]
struct MemoryWire {
    inbound: VecDeque<String>,
    outbound: Vec<String>,
    connected: bool,
    close_count: u32,
}

/// In-process transport for simulation and tests. The paired
/// [`MemoryHandle`] plays the hardware side.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    wire: Arc<Mutex<MemoryWire>>,
}

/// Hardware side of a [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    wire: Arc<Mutex<MemoryWire>>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryHandle) {
        let wire = Arc::new(Mutex::new(MemoryWire {
            connected: true,
            ..Default::default()
        }));
        (
            MemoryTransport { wire: wire.clone() },
            MemoryHandle { wire },
        )
    }
}

fn lock(wire: &Mutex<MemoryWire>) -> MutexGuard<'_, MemoryWire> {
    wire.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn disconnected() -> LinkError {
    LinkError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "memory wire disconnected",
    ))
}

impl LineTransport for MemoryTransport {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let mut wire = lock(&self.wire);
        if !wire.connected {
            return Err(disconnected());
        }
        wire.outbound.push(line.to_string());
        Ok(())
    }

    fn drain_lines(&mut self, out: &mut Vec<String>) -> Result<(), LinkError> {
        let mut wire = lock(&self.wire);
        if !wire.connected {
            return Err(disconnected());
        }
        out.extend(wire.inbound.drain(..));
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.wire).close_count += 1;
    }
}

impl MemoryHandle {
    /// Queue a line as if the hardware had sent it
    pub fn push_line(&self, line: &str) {
        lock(&self.wire).inbound.push_back(line.to_string());
    }

    /// Everything the controller has written so far
    pub fn sent(&self) -> Vec<String> {
        lock(&self.wire).outbound.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.wire).outbound)
    }

    /// Make every further transport call fail
    pub fn disconnect(&self) {
        lock(&self.wire).connected = false;
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.wire).close_count
    }
}

// =============================================================================
// LINK
// =============================================================================

/// Flag that stays set until explicitly consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latch(bool);

impl Latch {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }

    /// Read and clear
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Up,
    Down,
    Closed,
}

/// What one poll saw. Latched flags are peeked, not consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorPoll {
    pub button1: bool,
    pub button2: bool,
    pub transit_latched: bool,
    pub channels: [u8; CHANNEL_COUNT],
    pub status: LinkStatus,
}

impl SensorPoll {
    pub fn link_down(&self) -> bool {
        self.status != LinkStatus::Up
    }
}

/// Protocol endpoint over any line transport
#[derive(Debug)]
pub struct SensorLink<T: LineTransport> {
    transport: Option<T>,
    status: LinkStatus,
    channels: [u8; CHANNEL_COUNT],
    button_start: Latch,
    button_slow: Latch,
    transit: Latch,
    last_lights: Option<LightState>,
    last_lights_sent_ms: u64,
    last_pulse: Option<bool>,
    heartbeat_ms: u64,
    malformed_lines: u64,
    lines_received: u64,
    lines_sent: u64,
}

impl<T: LineTransport> SensorLink<T> {
    pub fn new(transport: T, heartbeat_ms: u64) -> Self {
        Self {
            transport: Some(transport),
            status: LinkStatus::Up,
            channels: [0; CHANNEL_COUNT],
            button_start: Latch::default(),
            button_slow: Latch::default(),
            transit: Latch::default(),
            last_lights: None,
            last_lights_sent_ms: 0,
            last_pulse: None,
            heartbeat_ms,
            malformed_lines: 0,
            lines_received: 0,
            lines_sent: 0,
        }
    }

    /// Drain every queued inbound line and update latches and channels
    pub fn poll(&mut self) -> SensorPoll {
        if self.status == LinkStatus::Up {
            let mut lines = Vec::new();
            let drained = match self.transport.as_mut() {
                Some(transport) => transport.drain_lines(&mut lines),
                None => Ok(()),
            };
            // keep whatever arrived before a failure
            for line in &lines {
                self.handle_line(line);
            }
            if let Err(err) = drained {
                self.mark_down(&err);
            }
        }
        self.peek()
    }

    fn handle_line(&mut self, line: &str) {
        self.lines_received += 1;
        match Inbound::parse(line) {
            Ok(Inbound::Sensors(channels)) => {
                // only the latest reading matters, but any transit pulse is kept
                if transit_detected(&channels) {
                    self.transit.set();
                }
                self.channels = channels;
            }
            Ok(Inbound::Button(Button::Start)) => self.button_start.set(),
            Ok(Inbound::Button(Button::Slow)) => self.button_slow.set(),
            Err(err) => {
                self.malformed_lines += 1;
                warn!(line = %err.line, reason = err.reason, "discarding malformed line");
            }
        }
    }

    /// Current view without touching the transport
    pub fn peek(&self) -> SensorPoll {
        SensorPoll {
            button1: self.button_start.is_set(),
            button2: self.button_slow.is_set(),
            transit_latched: self.transit.is_set(),
            channels: self.channels,
            status: self.status,
        }
    }

    pub fn take_button1(&mut self) -> bool {
        self.button_start.take()
    }

    pub fn take_button2(&mut self) -> bool {
        self.button_slow.take()
    }

    pub fn take_transit(&mut self) -> bool {
        self.transit.take()
    }

    /// Consume all latches as controller triggers
    pub fn take_triggers(&mut self) -> Triggers {
        Triggers {
            manual_start: self.take_button1(),
            transit: self.take_transit(),
            slow_toggle: self.take_button2(),
        }
    }

    /// Send the light state if it changed, or if the heartbeat is due
    pub fn send_light_state(&mut self, lights: LightState, now_ms: u64) {
        let unchanged = self.last_lights == Some(lights);
        let heartbeat_due = now_ms.saturating_sub(self.last_lights_sent_ms) >= self.heartbeat_ms;
        if unchanged && !heartbeat_due {
            return;
        }
        if self.send(Outbound::Lights(lights)) {
            self.last_lights = Some(lights);
            self.last_lights_sent_ms = now_ms;
        }
    }

    /// Button feedback indicator, sent on change only
    pub fn send_pulse(&mut self, active: bool) {
        if self.last_pulse == Some(active) {
            return;
        }
        if self.send(Outbound::Pulse(active)) {
            self.last_pulse = Some(active);
        }
    }

    fn send(&mut self, message: Outbound) -> bool {
        if self.status != LinkStatus::Up {
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let line = message.encode();
        match transport.write_line(&line) {
            Ok(()) => {
                self.lines_sent += 1;
                debug!(%line, "sent");
                true
            }
            Err(err) => {
                self.mark_down(&err);
                false
            }
        }
    }

    fn mark_down(&mut self, err: &LinkError) {
        if self.status == LinkStatus::Up {
            warn!(error = %err, "sensor link down, continuing without hardware");
            self.status = LinkStatus::Down;
        }
    }

    /// Close the transport. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            self.status = LinkStatus::Closed;
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received
    }

    pub fn lines_sent(&self) -> u64 {
        self.lines_sent
    }
}

impl<T: LineTransport> Drop for SensorLink<T> {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PedestrianLight, VehicleLight};

    fn link() -> (SensorLink<MemoryTransport>, MemoryHandle) {
        let (transport, handle) = MemoryTransport::pair();
        (SensorLink::new(transport, 2000), handle)
    }

    #[test]
    fn test_split_lines_keeps_partial() {
        let mut buf = b"S 0 0 0 0 0 0 0 0\r\nB 1\nS 1".to_vec();
        let mut out = Vec::new();
        split_lines(&mut buf, &mut out);
        assert_eq!(out, vec!["S 0 0 0 0 0 0 0 0", "B 1"]);
        assert_eq!(buf, b"S 1");
    }

    #[test]
    fn test_usb_bridge_names() {
        assert!(is_usb_serial_bridge("CP2102 USB to UART Bridge"));
        assert!(is_usb_serial_bridge("USB Serial"));
        assert!(!is_usb_serial_bridge("Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_poll_drains_all_lines() {
        let (mut link, hw) = link();
        hw.push_line("S 1 0 0 0 0 0 0 0");
        hw.push_line("B 1");
        hw.push_line("S 1 1 0 0 0 0 0 0");

        let poll = link.poll();
        assert!(poll.button1);
        assert!(!poll.button2);
        assert_eq!(poll.channels, [1, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(link.lines_received(), 3);
    }

    #[test]
    fn test_transit_latch_survives_until_taken() {
        let (mut link, hw) = link();
        hw.push_line("S 0 0 0 0 0 0 1 0");
        hw.push_line("S 0 0 0 0 0 0 0 0");

        for _ in 0..10 {
            assert!(link.poll().transit_latched);
        }
        assert!(link.take_transit());
        assert!(!link.take_transit());
        assert!(!link.poll().transit_latched);
    }

    #[test]
    fn test_take_triggers_consumes_buttons() {
        let (mut link, hw) = link();
        hw.push_line("B 2");
        link.poll();

        let triggers = link.take_triggers();
        assert!(triggers.slow_toggle);
        assert!(!triggers.manual_start);
        assert!(link.take_triggers().is_empty());
    }

    #[test]
    fn test_malformed_lines_counted_not_fatal() {
        let (mut link, hw) = link();
        hw.push_line("garbage");
        hw.push_line("S 1 1");
        hw.push_line("B 1");

        let poll = link.poll();
        assert!(poll.button1);
        assert_eq!(poll.status, LinkStatus::Up);
        assert_eq!(link.malformed_lines(), 2);
    }

    #[test]
    fn test_light_state_deduplicated_with_heartbeat() {
        let (mut link, hw) = link();
        let idle = LightState::default();

        link.send_light_state(idle, 0);
        link.send_light_state(idle, 16);
        link.send_light_state(idle, 1999);
        assert_eq!(hw.take_sent(), vec!["L 1 0 0 0 1"]);

        link.send_light_state(idle, 2000);
        assert_eq!(hw.take_sent(), vec!["L 1 0 0 0 1"]);

        let walk = LightState::new(PedestrianLight::WALK, VehicleLight::RED);
        link.send_light_state(walk, 2010);
        assert_eq!(hw.take_sent(), vec!["L 0 1 1 0 0"]);
    }

    #[test]
    fn test_pulse_sent_on_change() {
        let (mut link, hw) = link();
        link.send_pulse(true);
        link.send_pulse(true);
        link.send_pulse(false);
        assert_eq!(hw.take_sent(), vec!["P 1", "P 0"]);
    }

    #[test]
    fn test_link_down_keeps_last_values() {
        let (mut link, hw) = link();
        hw.push_line("S 1 0 1 0 0 0 0 0");
        link.poll();

        hw.disconnect();
        let poll = link.poll();
        assert!(poll.link_down());
        assert_eq!(poll.channels, [1, 0, 1, 0, 0, 0, 0, 0]);

        link.send_light_state(LightState::default(), 10_000);
        link.send_pulse(true);
        assert!(hw.sent().is_empty());
    }

    #[test]
    fn test_write_failure_marks_down() {
        let (mut link, hw) = link();
        hw.disconnect();
        link.send_pulse(true);
        assert_eq!(link.status(), LinkStatus::Down);
    }

    #[test]
    fn test_close_exactly_once() {
        let (mut link, hw) = link();
        link.close();
        link.close();
        drop(link);
        assert_eq!(hw.close_count(), 1);
    }
}
