// src/io/serial/utils.rs
//
// Line settings shared by the serial back ends.
// Every endpoint runs 8-N-1 with no flow control; only the speed varies.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::io::error::OpenError;

// ============================================================================
// Types
// ============================================================================

/// Standard serial speeds accepted by `open`.
///
/// Anything outside this set is rejected rather than rounded to a neighbour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B300,
    B600,
    B1200,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B460800,
    B921600,
    B1500000,
    B2000000,
    B2500000,
    B3000000,
}

impl BaudRate {
    pub const ALL: [BaudRate; 17] = [
        BaudRate::B300,
        BaudRate::B600,
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
        BaudRate::B460800,
        BaudRate::B921600,
        BaudRate::B1500000,
        BaudRate::B2000000,
        BaudRate::B2500000,
        BaudRate::B3000000,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B300 => 300,
            BaudRate::B600 => 600,
            BaudRate::B1200 => 1_200,
            BaudRate::B2400 => 2_400,
            BaudRate::B4800 => 4_800,
            BaudRate::B9600 => 9_600,
            BaudRate::B19200 => 19_200,
            BaudRate::B38400 => 38_400,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
            BaudRate::B230400 => 230_400,
            BaudRate::B460800 => 460_800,
            BaudRate::B921600 => 921_600,
            BaudRate::B1500000 => 1_500_000,
            BaudRate::B2000000 => 2_000_000,
            BaudRate::B2500000 => 2_500_000,
            BaudRate::B3000000 => 3_000_000,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = OpenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .iter()
            .copied()
            .find(|b| b.as_u32() == value)
            .ok_or(OpenError::UnsupportedBaud(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> u32 {
        baud.as_u32()
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

// ============================================================================
// Line Settings
// ============================================================================

/// Data bits applied to every endpoint.
pub const DATA_BITS: DataBits = DataBits::Eight;
/// Parity applied to every endpoint.
pub const PARITY: Parity = Parity::None;
/// Stop bits applied to every endpoint.
pub const STOP_BITS: StopBits = StopBits::One;
/// Flow control applied to every endpoint.
pub const FLOW_CONTROL: FlowControl = FlowControl::None;

/// Build a serialport builder carrying the fixed 8-N-1 line settings.
pub fn line_builder(port: &str, baud: BaudRate) -> serialport::SerialPortBuilder {
    serialport::new(port, baud.as_u32())
        .data_bits(DATA_BITS)
        .parity(PARITY)
        .stop_bits(STOP_BITS)
        .flow_control(FLOW_CONTROL)
}

/// Short label used in log lines, e.g. `921600 8-N-1`.
pub fn line_label(baud: BaudRate) -> String {
    format!("{} 8-N-1", baud)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rates_accepted() {
        for rate in [9_600u32, 115_200, 921_600, 3_000_000] {
            let baud = BaudRate::try_from(rate).unwrap();
            assert_eq!(baud.as_u32(), rate);
        }
    }

    #[test]
    fn test_unrecognised_rate_rejected() {
        assert!(matches!(
            BaudRate::try_from(115_201),
            Err(OpenError::UnsupportedBaud(115_201))
        ));
        assert!(matches!(
            BaudRate::try_from(0),
            Err(OpenError::UnsupportedBaud(0))
        ));
    }

    #[test]
    fn test_baud_serde_as_number() {
        let json = serde_json::to_string(&BaudRate::B460800).unwrap();
        assert_eq!(json, "460800");
        let parsed: BaudRate = serde_json::from_str("57600").unwrap();
        assert_eq!(parsed, BaudRate::B57600);
        assert!(serde_json::from_str::<BaudRate>("57601").is_err());
    }

    #[test]
    fn test_line_label() {
        assert_eq!(line_label(BaudRate::B921600), "921600 8-N-1");
    }
}
