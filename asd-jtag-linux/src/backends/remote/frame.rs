//! Encoding and decoding of the OEM requests exchanged with the remote controller.
//!
//! Every payload starts with the 3-byte vendor ID (little endian). Multi-byte
//! integers are little endian and bit vectors are LSB-first.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use asd_jtag::{TransportError, bits, tap::TmsSequence};

/// OEM network function of the remote controller
pub const NETFN_OEM_1S: u8 = 0x38;

/// IANA enterprise number 0x009c9c, little endian
pub const VENDOR_ID: [u8; 3] = [0x9c, 0x9c, 0x00];

/// Largest shift the remote controller accepts in one request.
pub const MAX_SHIFT_BITS: u16 = 256;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Init,
    Deinit,
    SetTapState {
        tms: TmsSequence,
    },
    Shift {
        write_bits: u16,
        read_bits: u16,
        last_transaction: bool,
        /// `ceil(write_bits / 8)` bytes
        tdi: Bytes,
    },
    ClockCycles {
        cycles: u8,
        tms: bool,
    },
}

impl Command {
    const CMD_SET_TAP_STATE: u8 = 0x21;
    const CMD_SHIFT: u8 = 0x22;
    const CMD_CLOCK_CYCLES: u8 = 0x23;
    const CMD_INIT: u8 = 0x28;
    const CMD_DEINIT: u8 = 0x29;

    pub fn code(&self) -> u8 {
        match self {
            Command::Init => Self::CMD_INIT,
            Command::Deinit => Self::CMD_DEINIT,
            Command::SetTapState { .. } => Self::CMD_SET_TAP_STATE,
            Command::Shift { .. } => Self::CMD_SHIFT,
            Command::ClockCycles { .. } => Self::CMD_CLOCK_CYCLES,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_slice(&VENDOR_ID);
        match self {
            Command::Init | Command::Deinit => {}
            Command::SetTapState { tms } => {
                buf.put_u8(tms.len());
                buf.put_slice(&tms.to_bytes());
            }
            Command::Shift {
                write_bits,
                read_bits,
                last_transaction,
                tdi,
            } => {
                buf.put_u16_le(*write_bits);
                buf.put_u16_le(*read_bits);
                buf.put_u8(*last_transaction as u8);
                buf.put_slice(tdi);
            }
            Command::ClockCycles { cycles, tms } => {
                buf.put_u8(*cycles);
                buf.put_u8(*tms as u8);
            }
        }
        buf.freeze()
    }

    /// Parses a request payload, as the remote controller sees it.
    pub fn decode(code: u8, mut payload: &[u8]) -> Result<Command, TransportError> {
        strip_vendor_id(&mut payload)?;
        let command = match code {
            Self::CMD_INIT => Command::Init,
            Self::CMD_DEINIT => Command::Deinit,
            Self::CMD_SET_TAP_STATE => {
                need(payload, 1, "TMS length")?;
                let len = payload.get_u8();
                let num_bytes = bits::byte_len(len as usize);
                need(payload, num_bytes, "TMS bits")?;
                let mut raw = [0u8; 2];
                raw[..num_bytes.min(2)].copy_from_slice(&payload[..num_bytes.min(2)]);
                payload.advance(num_bytes);
                let tms = TmsSequence::new(u16::from_le_bytes(raw), len)
                    .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
                Command::SetTapState { tms }
            }
            Self::CMD_SHIFT => {
                need(payload, 5, "shift header")?;
                let write_bits = payload.get_u16_le();
                let read_bits = payload.get_u16_le();
                let last_transaction = payload.get_u8() != 0;
                let num_bytes = bits::byte_len(write_bits as usize);
                need(payload, num_bytes, "TDI")?;
                let tdi = payload.copy_to_bytes(num_bytes);
                Command::Shift {
                    write_bits,
                    read_bits,
                    last_transaction,
                    tdi,
                }
            }
            Self::CMD_CLOCK_CYCLES => {
                need(payload, 2, "clock cycles")?;
                Command::ClockCycles {
                    cycles: payload.get_u8(),
                    tms: payload.get_u8() != 0,
                }
            }
            other => {
                return Err(TransportError::MalformedResponse(format!(
                    "Unknown command 0x{:02x}",
                    other
                )));
            }
        };
        if payload.has_remaining() {
            return Err(TransportError::MalformedResponse(format!(
                "{} trailing bytes after command 0x{:02x}",
                payload.remaining(),
                code
            )));
        }
        Ok(command)
    }
}

fn need(payload: &[u8], len: usize, what: &str) -> Result<(), TransportError> {
    if payload.len() < len {
        return Err(TransportError::MalformedResponse(format!(
            "Truncated {}: need {} bytes, got {}",
            what,
            len,
            payload.len()
        )));
    }
    Ok(())
}

fn strip_vendor_id(payload: &mut &[u8]) -> Result<(), TransportError> {
    need(payload, VENDOR_ID.len(), "vendor ID")?;
    if payload[..VENDOR_ID.len()] != VENDOR_ID {
        return Err(TransportError::MalformedResponse(format!(
            "Unexpected vendor ID {:02x?}",
            &payload[..VENDOR_ID.len()]
        )));
    }
    payload.advance(VENDOR_ID.len());
    Ok(())
}

/// Validates a response body (`[completion code, vendor ID, data...]`) and returns the data.
pub fn response_data(mut body: &[u8]) -> Result<&[u8], TransportError> {
    need(body, 1, "completion code")?;
    let completion_code = body.get_u8();
    if completion_code != 0 {
        return Err(TransportError::Rejected { completion_code });
    }
    strip_vendor_id(&mut body)?;
    Ok(body)
}

/// Builds a response body, as the remote controller sends it.
pub fn encode_response(completion_code: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u8(completion_code);
    if completion_code == 0 {
        buf.put_slice(&VENDOR_ID);
        buf.put_slice(data);
    }
    buf.freeze()
}
