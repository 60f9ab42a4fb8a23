//! Recording transport for unit tests.
use std::io;

use crate::{
    error::TransportError,
    tap::{Register, TapState, TmsSequence},
    transport::{FusedPadding, ShiftMode, ShiftRequest, TapTransition, Transport},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedShift {
    pub register: Register,
    pub from: TapState,
    pub end_state: TapState,
    pub write_bits: usize,
    pub read_bits: usize,
    pub tdi: Vec<u8>,
    pub last_transaction: bool,
    pub padding: Option<FusedPadding>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Initialize(ShiftMode),
    Deinitialize,
    SetTapState(TmsSequence),
    Shift(RecordedShift),
    WaitCycles(u32),
    SetClockRate(u32),
}

/// Loops TDI back to TDO and records every primitive.
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub max_bits: usize,
    pub fused: bool,
    pub fail_initialize: bool,
    /// Number of primitives that still succeed before one fails
    pub fail_after: Option<usize>,
}

impl MockTransport {
    pub fn new(max_bits: usize) -> MockTransport {
        MockTransport {
            calls: Vec::new(),
            max_bits,
            fused: false,
            fail_initialize: false,
            fail_after: None,
        }
    }

    fn check_failure(&mut self) -> Result<(), TransportError> {
        match self.fail_after {
            Some(0) => Err(TransportError::Io(io::Error::other("injected failure"))),
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        if self.fail_initialize {
            return Err(TransportError::Io(io::Error::other("no device")));
        }
        self.calls.push(Call::Initialize(mode));
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Deinitialize);
        Ok(())
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        self.check_failure()?;
        self.calls.push(Call::SetTapState(transition.tms));
        Ok(())
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        self.check_failure()?;
        assert!(request.bits() <= self.max_bits);
        if let Some(tdo) = request.tdo {
            tdo.fill(0);
            let looped = request.write_bits.min(request.read_bits).div_ceil(8);
            tdo[..looped].copy_from_slice(&request.tdi[..looped]);
        }
        self.calls.push(Call::Shift(RecordedShift {
            register: request.register,
            from: request.from,
            end_state: request.end_state,
            write_bits: request.write_bits,
            read_bits: request.read_bits,
            tdi: request.tdi.to_vec(),
            last_transaction: request.last_transaction,
            padding: request.padding,
        }));
        Ok(())
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        self.check_failure()?;
        self.calls.push(Call::WaitCycles(cycles));
        Ok(())
    }

    fn set_clock_rate(&mut self, rate: u32) -> Result<(), TransportError> {
        self.calls.push(Call::SetClockRate(rate));
        Ok(())
    }

    fn max_transfer_bits(&self) -> usize {
        self.max_bits
    }

    fn supports_fused_padding(&self, _mode: ShiftMode) -> bool {
        self.fused
    }
}
