//! Bit-level TAP simulator for integration tests.
//!
//! [`SimulatedChain`] is a [`Transport`] that clocks every request through a
//! reference IEEE 1149.1 state machine and a chain of simulated devices. It
//! checks that the engine's idea of the TAP state matches the simulated one
//! and records every transfer for later inspection.
use bitvec::prelude::*;

use asd_jtag::{
    Register, ShiftMode, ShiftRequest, TapState, TapTransition, Transport, TransportError, bits,
    transport::FusedPadding,
};

/// One TAP on the simulated scan chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimDevice {
    pub ir_len: usize,
    pub idcode: u32,
    pub idcode_opcode: u64,
    /// Last instruction latched in Update-IR
    pub instruction: u64,
    /// Last value latched in Update-DR while selected by a non-bypass instruction
    pub latched_dr: Option<u32>,
}

impl SimDevice {
    pub fn new(ir_len: usize, idcode: u32, idcode_opcode: u64) -> SimDevice {
        SimDevice {
            ir_len,
            idcode,
            idcode_opcode,
            instruction: idcode_opcode,
            latched_dr: None,
        }
    }

    fn bypassed(&self) -> bool {
        self.instruction != self.idcode_opcode
    }

    fn reset(&mut self) {
        self.instruction = self.idcode_opcode;
    }

    fn dr_len(&self) -> usize {
        if self.bypassed() { 1 } else { 32 }
    }
}

/// A shift as seen by the simulator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub register: Register,
    pub from: TapState,
    pub end_state: TapState,
    pub write_bits: usize,
    pub read_bits: usize,
    pub tdi: Vec<u8>,
    pub last_transaction: bool,
    pub padding: Option<FusedPadding>,
}

impl Transfer {
    /// Total TCK cycles spent in the Shift state, padding included.
    pub fn clocked_bits(&self) -> usize {
        let padding = self.padding.map_or(0, |p| (p.pre + p.post) as usize);
        self.write_bits.max(self.read_bits) + padding
    }
}

pub struct SimulatedChain {
    pub state: TapState,
    /// Devices in scan order, index 0 is closest to TDO
    pub devices: Vec<SimDevice>,
    register: BitVec<u8, Lsb0>,
    pub transfers: Vec<Transfer>,
    pub transitions: Vec<TapTransition>,
    pub wait_clocks: u64,
    pub max_bits: usize,
    pub fused: bool,
    pub mode: Option<ShiftMode>,
    /// Number of primitives that still succeed before one fails
    pub fail_after: Option<usize>,
}

impl SimulatedChain {
    pub fn new(devices: Vec<SimDevice>, max_bits: usize) -> SimulatedChain {
        SimulatedChain {
            // Power-on state of the TAP is unknown to the engine
            state: TapState::UpdateDR,
            devices,
            register: BitVec::new(),
            transfers: Vec::new(),
            transitions: Vec::new(),
            wait_clocks: 0,
            max_bits,
            fused: false,
            mode: None,
            fail_after: None,
        }
    }

    /// A single device exposing `idcode`, with a 4 bit IR and IDCODE opcode 0x2.
    pub fn single(idcode: u32, max_bits: usize) -> SimulatedChain {
        SimulatedChain::new(vec![SimDevice::new(4, idcode, 0x2)], max_bits)
    }

    /// Total TCK cycles spent in Shift states across all transfers.
    pub fn shifted_bits(&self) -> usize {
        self.transfers.iter().map(Transfer::clocked_bits).sum()
    }

    pub fn clear_records(&mut self) {
        self.transfers.clear();
        self.transitions.clear();
        self.wait_clocks = 0;
    }

    fn check_failure(&mut self) -> Result<(), TransportError> {
        match self.fail_after {
            Some(0) => Err(TransportError::Io(std::io::Error::other(
                "simulated transport failure",
            ))),
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn expect_state(&self, expected: TapState) -> Result<(), TransportError> {
        if self.state != expected {
            return Err(TransportError::MalformedResponse(format!(
                "Engine believes the TAP is in {}, simulator is in {}",
                expected, self.state
            )));
        }
        Ok(())
    }

    /// One TCK cycle. Returns the TDO bit when the cycle shifted.
    fn clock(&mut self, tms: bool, tdi: bool) -> Option<bool> {
        let tdo = if self.state.is_shift() {
            let out = if self.register.is_empty() {
                false
            } else {
                self.register.remove(0)
            };
            self.register.push(tdi);
            Some(out)
        } else {
            None
        };
        self.state = self.state.next(tms);
        match self.state {
            TapState::TestLogicReset => self.devices.iter_mut().for_each(SimDevice::reset),
            TapState::CaptureDR => self.capture_dr(),
            TapState::CaptureIR => self.capture_ir(),
            TapState::UpdateDR => self.update_dr(),
            TapState::UpdateIR => self.update_ir(),
            _ => {}
        }
        tdo
    }

    fn capture_dr(&mut self) {
        self.register.clear();
        for device in &self.devices {
            if device.bypassed() {
                self.register.push(false);
            } else {
                self.register
                    .extend_from_bitslice(&device.idcode.view_bits::<Lsb0>()[..32]);
            }
        }
    }

    fn capture_ir(&mut self) {
        self.register.clear();
        for device in &self.devices {
            // IEEE 1149.1 requires the two LSBs to capture 0b01
            for bit in 0..device.ir_len {
                self.register.push(bit == 0);
            }
        }
    }

    fn update_dr(&mut self) {
        let mut offset = 0;
        for device in self.devices.iter_mut() {
            let len = device.dr_len();
            if !device.bypassed()
                && let Some(bits) = self.register.get(offset..offset + len)
            {
                device.latched_dr = Some(bits.load_le::<u32>());
            }
            offset += len;
        }
    }

    fn update_ir(&mut self) {
        let mut offset = 0;
        for device in self.devices.iter_mut() {
            if let Some(bits) = self.register.get(offset..offset + device.ir_len) {
                device.instruction = bits.load_le::<u64>();
            }
            offset += device.ir_len;
        }
    }

    fn walk(&mut self, from: TapState, to: TapState) -> Result<(), TransportError> {
        if from == to {
            return Ok(());
        }
        let tms = asd_jtag::tap::TmsSequence::between(from, to)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        for bit in tms.iter() {
            self.clock(bit, false);
        }
        Ok(())
    }
}

impl Transport for SimulatedChain {
    fn name(&self) -> &'static str {
        "simulator"
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        self.mode = None;
        Ok(())
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        self.check_failure()?;
        // Reset converges from any state, including the unknown power-on state
        if transition.to != TapState::TestLogicReset {
            self.expect_state(transition.from)?;
        }
        for bit in transition.tms.iter() {
            self.clock(bit, false);
        }
        if self.state != transition.to {
            return Err(TransportError::MalformedResponse(format!(
                "TMS 0x{:04x} from {} ended in {}, not {}",
                transition.tms.bits(),
                transition.from,
                self.state,
                transition.to
            )));
        }
        self.transitions.push(*transition);
        Ok(())
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        self.check_failure()?;
        self.expect_state(request.from)?;
        if request.from.shift_register() != Some(request.register) {
            return Err(TransportError::MalformedResponse(format!(
                "{:?} shift requested in {}",
                request.register, request.from
            )));
        }
        if request.bits() > self.max_bits {
            return Err(TransportError::MalformedResponse(format!(
                "{} bit request exceeds {} bit limit",
                request.bits(),
                self.max_bits
            )));
        }

        let (pre, post, pad) = match request.padding {
            Some(p) => (p.pre as usize, p.post as usize, p.value.bit()),
            None => (0, 0, false),
        };
        let data_bits = request.bits();
        let total = pre + data_bits + post;
        let leaving = request.end_state != request.from;
        let tdi: Vec<bool> = bits::iter_bits(request.tdi, request.write_bits).collect();

        let mut captured = Vec::with_capacity(request.read_bits);
        for cycle in 0..total {
            let tdi_bit = if cycle < pre || cycle >= pre + data_bits {
                pad
            } else {
                tdi.get(cycle - pre).copied().unwrap_or(false)
            };
            let tms = leaving && cycle + 1 == total;
            let tdo = self.clock(tms, tdi_bit).unwrap_or(false);
            if cycle >= pre && cycle - pre < request.read_bits {
                captured.push(tdo);
            }
        }
        if leaving {
            self.walk(TapState::exit1(request.register), request.end_state)?;
        }

        let transfer = Transfer {
            register: request.register,
            from: request.from,
            end_state: request.end_state,
            write_bits: request.write_bits,
            read_bits: request.read_bits,
            tdi: request.tdi.to_vec(),
            last_transaction: request.last_transaction,
            padding: request.padding,
        };
        log::trace!("Simulated transfer: {:?}", transfer);
        self.transfers.push(transfer);

        if let Some(tdo) = request.tdo {
            let packed = bits::pack_bits(captured);
            tdo[..packed.len()].copy_from_slice(&packed);
        }
        Ok(())
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        self.check_failure()?;
        for _ in 0..cycles {
            self.clock(false, false);
        }
        self.wait_clocks += cycles as u64;
        Ok(())
    }

    fn set_clock_rate(&mut self, _rate: u32) -> Result<(), TransportError> {
        Ok(())
    }

    fn max_transfer_bits(&self) -> usize {
        self.max_bits
    }

    fn supports_fused_padding(&self, mode: ShiftMode) -> bool {
        self.fused && mode == ShiftMode::Hardware
    }
}
