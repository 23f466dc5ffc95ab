// Serial protocol for the PWM bridge board
//
// The six PWM channels and the driver-enable lines live on a microcontroller
// that takes framed packets over a serial link:
//   request:  [0xFF, 0xFF, Instruction, Length, Params..., Checksum]
//   response: [0xFF, 0xFF, Status, Checksum]            (ping only)
// Checksum is the inverted low byte of the sum of everything after the header.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::pwm::{CHANNEL_COUNT, PwmError, PwmOutput};

pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Largest parameter block (ConfigureChannel: channel + u32 frequency + resolution)
const MAX_PARAMS: usize = 6;
const MAX_PACKET: usize = HEADER.len() + 2 + MAX_PARAMS + 1;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    ConfigureChannel = 0x10,
    AttachPin = 0x11,
    SetLevel = 0x12,
    WriteDuty = 0x13,
}

pub type Result<T> = std::result::Result<T, PwmError>;

/// A packet on the stack; building one never allocates
struct Packet {
    buf: [u8; MAX_PACKET],
    len: usize,
}

impl Packet {
    fn new(instruction: Instruction, params: &[u8]) -> Self {
        debug_assert!(params.len() <= MAX_PARAMS);
        let mut buf = [0u8; MAX_PACKET];
        buf[..2].copy_from_slice(&HEADER);
        buf[2] = instruction as u8;
        buf[3] = params.len() as u8;
        buf[4..4 + params.len()].copy_from_slice(params);
        let end = 4 + params.len();
        buf[end] = checksum(&buf[2..end]);
        Self { buf, len: end + 1 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

fn checksum(data: &[u8]) -> u8 {
    let sum: u16 = data.iter().map(|&b| b as u16).sum();
    (!sum & 0xFF) as u8
}

fn check_channel(channel: u8) -> Result<()> {
    if (channel as usize) < CHANNEL_COUNT {
        Ok(())
    } else {
        Err(PwmError::InvalidChannel { channel })
    }
}

/// PWM bridge board on a serial port
pub struct SerialBridge {
    port: Box<dyn SerialPort>,
}

impl SerialBridge {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.port.write_all(packet.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<()> {
        let mut response = [0u8; 4];
        self.port.read_exact(&mut response).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                PwmError::Timeout
            } else {
                PwmError::Io(e)
            }
        })?;
        parse_status(response)
    }

    /// Check that the board answers
    pub fn ping(&mut self) -> Result<bool> {
        self.send(&Packet::new(Instruction::Ping, &[]))?;
        match self.read_status() {
            Ok(()) => Ok(true),
            Err(PwmError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn parse_status(response: [u8; 4]) -> Result<()> {
    if response[..2] != HEADER {
        return Err(PwmError::InvalidResponse {
            reason: format!("Invalid header: {:02X?}", &response[..2]),
        });
    }
    let status = response[2];
    if checksum(&[status]) != response[3] {
        return Err(PwmError::ChecksumMismatch);
    }
    if status != 0 {
        return Err(PwmError::BridgeError { status });
    }
    Ok(())
}

impl PwmOutput for SerialBridge {
    fn configure_channel(&mut self, channel: u8, frequency_hz: u32, resolution_bits: u8) -> Result<()> {
        check_channel(channel)?;
        let f = frequency_hz.to_le_bytes();
        debug!(
            "Configure channel {}: {} Hz, {} bit",
            channel, frequency_hz, resolution_bits
        );
        self.send(&Packet::new(
            Instruction::ConfigureChannel,
            &[channel, f[0], f[1], f[2], f[3], resolution_bits],
        ))
    }

    fn attach_pin(&mut self, channel: u8, pin: u8) -> Result<()> {
        check_channel(channel)?;
        debug!("Attach channel {} to pin {}", channel, pin);
        self.send(&Packet::new(Instruction::AttachPin, &[channel, pin]))
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        debug!("Set pin {} {}", pin, if high { "high" } else { "low" });
        self.send(&Packet::new(Instruction::SetLevel, &[pin, high as u8]))
    }

    fn write_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        check_channel(channel)?;
        let d = duty.to_le_bytes();
        self.send(&Packet::new(Instruction::WriteDuty, &[channel, d[0], d[1]]))
    }
}
