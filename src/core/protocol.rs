//! Serial line protocol
//!
//! Newline-delimited ASCII, one message per line:
//! - out `L <mr> <mg> <cr> <cy> <cg>`: pedestrian red/green, vehicle red/yellow/green
//! - out `P <0|1>`: button feedback indicator
//! - in  `S <s0> .. <s7>`: channel readings, 0-5 presence, 6-7 transit
//! - in  `B <1|2>`: button 1 (start) or button 2 (slow) pressed

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProtocolError;
use crate::types::LightState;
use crate::{CHANNEL_COUNT, TRANSIT_CHANNELS};

lazy_static! {
    static ref RE_SENSORS: Regex = Regex::new(r"^S((?:\s+\d+){8})$").unwrap();
    static ref RE_BUTTON: Regex = Regex::new(r"^B\s+(\d+)$").unwrap();
}

/// Physical buttons on the pole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Manual start
    Start,
    /// Slow-mode toggle
    Slow,
}

/// Messages from the hardware controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Sensors([u8; CHANNEL_COUNT]),
    Button(Button),
}

impl Inbound {
    /// Parse one line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Inbound, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::new(line, "empty line"));
        }

        if let Some(caps) = RE_SENSORS.captures(trimmed) {
            let mut channels = [0u8; CHANNEL_COUNT];
            for (slot, token) in channels.iter_mut().zip(caps[1].split_whitespace()) {
                *slot = match token {
                    "0" => 0,
                    "1" => 1,
                    _ => return Err(ProtocolError::new(line, "channel reading is not 0 or 1")),
                };
            }
            return Ok(Inbound::Sensors(channels));
        }

        if let Some(caps) = RE_BUTTON.captures(trimmed) {
            return match &caps[1] {
                "1" => Ok(Inbound::Button(Button::Start)),
                "2" => Ok(Inbound::Button(Button::Slow)),
                _ => Err(ProtocolError::new(line, "unknown button")),
            };
        }

        match trimmed.chars().next() {
            Some('S') => Err(ProtocolError::new(line, "sensor line needs 8 readings")),
            Some('B') => Err(ProtocolError::new(line, "button line needs one id")),
            _ => Err(ProtocolError::new(line, "unknown message")),
        }
    }
}

/// Any transit detector set in a sensor reading
pub fn transit_detected(channels: &[u8; CHANNEL_COUNT]) -> bool {
    TRANSIT_CHANNELS.iter().any(|&i| channels[i] != 0)
}

/// Messages to the hardware controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Lights(LightState),
    Pulse(bool),
}

impl Outbound {
    /// Encode without the trailing newline
    pub fn encode(&self) -> String {
        match self {
            Outbound::Lights(lights) => format!(
                "L {} {} {} {} {}",
                bit(lights.pedestrian.red),
                bit(lights.pedestrian.green),
                bit(lights.vehicle.red),
                bit(lights.vehicle.yellow),
                bit(lights.vehicle.green),
            ),
            Outbound::Pulse(active) => format!("P {}", bit(*active)),
        }
    }
}

fn bit(on: bool) -> u8 {
    if on {
        1
    } else {
        0
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PedestrianLight, VehicleLight};

    #[test]
    fn test_parse_sensor_line() {
        let msg = Inbound::parse("S 1 0 1 0 0 0 0 1\r\n").unwrap();
        assert_eq!(msg, Inbound::Sensors([1, 0, 1, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn test_parse_buttons() {
        assert_eq!(Inbound::parse("B 1").unwrap(), Inbound::Button(Button::Start));
        assert_eq!(Inbound::parse("B  2 ").unwrap(), Inbound::Button(Button::Slow));
    }

    #[test]
    fn test_malformed_lines_rejected() {
        for line in [
            "",
            "S 1 0 1",
            "S 1 0 1 0 0 0 0 1 1",
            "S 1 0 2 0 0 0 0 1",
            "S a b c d e f g h",
            "B 3",
            "B",
            "X 1",
            "ESP32 Ready. Waiting for LED commands...",
        ] {
            assert!(Inbound::parse(line).is_err(), "accepted {:?}", line);
        }
    }

    #[test]
    fn test_error_keeps_line() {
        let err = Inbound::parse("S 1").unwrap_err();
        assert_eq!(err.line, "S 1");
        assert_eq!(err.reason, "sensor line needs 8 readings");
    }

    #[test]
    fn test_transit_detected() {
        assert!(!transit_detected(&[1, 1, 1, 1, 1, 1, 0, 0]));
        assert!(transit_detected(&[0, 0, 0, 0, 0, 0, 1, 0]));
        assert!(transit_detected(&[0, 0, 0, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn test_encode_lights() {
        let walk = LightState::new(PedestrianLight::WALK, VehicleLight::RED);
        assert_eq!(Outbound::Lights(walk).encode(), "L 0 1 1 0 0");

        let idle = LightState::default();
        assert_eq!(Outbound::Lights(idle).encode(), "L 1 0 0 0 1");

        let red_yellow = LightState::new(PedestrianLight::STOP, VehicleLight::RED_YELLOW);
        assert_eq!(Outbound::Lights(red_yellow).encode(), "L 1 0 1 1 0");
    }

    #[test]
    fn test_encode_pulse() {
        assert_eq!(Outbound::Pulse(true).encode(), "P 1");
        assert_eq!(Outbound::Pulse(false).encode(), "P 0");
    }
}
