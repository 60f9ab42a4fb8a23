//! IEEE 1149.1 TAP controller model and the precomputed TMS transition table.
use std::fmt::Display;

use crate::error::{JtagError, Result};

/// Number of TMS=1 clocks used to force Test-Logic-Reset.
/// Five are sufficient from any state; the full table width is used.
pub const RESET_TMS_CYCLES: u8 = 8;

/// Extra TMS=0 clocks appended after entering Run-Test/Idle or Pause-DR.
pub const SETTLE_CYCLES: u8 = 5;

/// The 16 states of the TAP controller.
/// The discriminants match the numbering used by the Linux JTAG drivers.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TapState {
    TestLogicReset = 0,
    RunTestIdle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

/// The register class a Shift state accesses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    Instruction,
    Data,
}

impl TapState {
    pub const ALL: [TapState; 16] = [
        TapState::TestLogicReset,
        TapState::RunTestIdle,
        TapState::SelectDR,
        TapState::CaptureDR,
        TapState::ShiftDR,
        TapState::Exit1DR,
        TapState::PauseDR,
        TapState::Exit2DR,
        TapState::UpdateDR,
        TapState::SelectIR,
        TapState::CaptureIR,
        TapState::ShiftIR,
        TapState::Exit1IR,
        TapState::PauseIR,
        TapState::Exit2IR,
        TapState::UpdateIR,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    /// The state reached after one TCK edge with the given TMS value.
    pub fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, true) => TestLogicReset,
            (TestLogicReset, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDR,
            (RunTestIdle, false) => RunTestIdle,
            (SelectDR, true) => SelectIR,
            (SelectDR, false) => CaptureDR,
            (CaptureDR, true) => Exit1DR,
            (CaptureDR, false) => ShiftDR,
            (ShiftDR, true) => Exit1DR,
            (ShiftDR, false) => ShiftDR,
            (Exit1DR, true) => UpdateDR,
            (Exit1DR, false) => PauseDR,
            (PauseDR, true) => Exit2DR,
            (PauseDR, false) => PauseDR,
            (Exit2DR, true) => UpdateDR,
            (Exit2DR, false) => ShiftDR,
            (UpdateDR, true) => SelectDR,
            (UpdateDR, false) => RunTestIdle,
            (SelectIR, true) => TestLogicReset,
            (SelectIR, false) => CaptureIR,
            (CaptureIR, true) => Exit1IR,
            (CaptureIR, false) => ShiftIR,
            (ShiftIR, true) => Exit1IR,
            (ShiftIR, false) => ShiftIR,
            (Exit1IR, true) => UpdateIR,
            (Exit1IR, false) => PauseIR,
            (PauseIR, true) => Exit2IR,
            (PauseIR, false) => PauseIR,
            (Exit2IR, true) => UpdateIR,
            (Exit2IR, false) => ShiftIR,
            (UpdateIR, true) => SelectDR,
            (UpdateIR, false) => RunTestIdle,
        }
    }

    /// Returns the register accessed if this is Shift-IR or Shift-DR.
    pub fn shift_register(self) -> Option<Register> {
        match self {
            TapState::ShiftIR => Some(Register::Instruction),
            TapState::ShiftDR => Some(Register::Data),
            _ => None,
        }
    }

    pub fn is_shift(self) -> bool {
        self.shift_register().is_some()
    }

    /// States that get [`SETTLE_CYCLES`] extra clocks after being entered.
    pub fn needs_settle(self) -> bool {
        matches!(self, TapState::RunTestIdle | TapState::PauseDR)
    }

    /// The state a shift that ends its last bit with TMS=1 parks in.
    pub fn exit1(register: Register) -> TapState {
        match register {
            Register::Instruction => TapState::Exit1IR,
            Register::Data => TapState::Exit1DR,
        }
    }
}

impl TryFrom<u8> for TapState {
    type Error = JtagError;

    fn try_from(value: u8) -> Result<Self> {
        TapState::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| JtagError::invalid(format!("TAP state index {} out of range", value)))
    }
}

impl Display for TapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Minimal TMS sequence between two TAP states.
/// Bits are clocked out low bit first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TmsPath {
    pub tms_bits: u8,
    pub bit_count: u8,
}

const fn p(tms_bits: u8, bit_count: u8) -> TmsPath {
    TmsPath {
        tms_bits,
        bit_count,
    }
}

/// Indexed `[from][to]`.
#[rustfmt::skip]
const TMS_PATHS: [[TmsPath; 16]; 16] = [
    // from TestLogicReset
    [
        p(0x00, 0), p(0x00, 1), p(0x02, 2), p(0x02, 3),
        p(0x02, 4), p(0x0a, 4), p(0x0a, 5), p(0x2a, 6),
        p(0x1a, 5), p(0x06, 3), p(0x06, 4), p(0x06, 5),
        p(0x16, 5), p(0x16, 6), p(0x56, 7), p(0x36, 6),
    ],
    // from RunTestIdle
    [
        p(0x07, 3), p(0x00, 0), p(0x01, 1), p(0x01, 2),
        p(0x01, 3), p(0x05, 3), p(0x05, 4), p(0x15, 5),
        p(0x0d, 4), p(0x03, 2), p(0x03, 3), p(0x03, 4),
        p(0x0b, 4), p(0x0b, 5), p(0x2b, 6), p(0x1b, 5),
    ],
    // from SelectDR
    [
        p(0x03, 2), p(0x03, 3), p(0x00, 0), p(0x00, 1),
        p(0x00, 2), p(0x02, 2), p(0x02, 3), p(0x0a, 4),
        p(0x06, 3), p(0x01, 1), p(0x01, 2), p(0x01, 3),
        p(0x05, 3), p(0x05, 4), p(0x15, 5), p(0x0d, 4),
    ],
    // from CaptureDR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x00, 0),
        p(0x00, 1), p(0x01, 1), p(0x01, 2), p(0x05, 3),
        p(0x03, 2), p(0x0f, 4), p(0x0f, 5), p(0x0f, 6),
        p(0x2f, 6), p(0x2f, 7), p(0xaf, 8), p(0x6f, 7),
    ],
    // from ShiftDR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x07, 4),
        p(0x00, 0), p(0x01, 1), p(0x01, 2), p(0x05, 3),
        p(0x03, 2), p(0x0f, 4), p(0x0f, 5), p(0x0f, 6),
        p(0x2f, 6), p(0x2f, 7), p(0xaf, 8), p(0x6f, 7),
    ],
    // from Exit1DR
    [
        p(0x0f, 4), p(0x01, 2), p(0x03, 2), p(0x03, 3),
        p(0x02, 3), p(0x00, 0), p(0x00, 1), p(0x02, 2),
        p(0x01, 1), p(0x07, 3), p(0x07, 4), p(0x07, 5),
        p(0x17, 5), p(0x17, 6), p(0x57, 7), p(0x37, 6),
    ],
    // from PauseDR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x07, 4),
        p(0x01, 2), p(0x05, 3), p(0x00, 0), p(0x01, 1),
        p(0x03, 2), p(0x0f, 4), p(0x0f, 5), p(0x0f, 6),
        p(0x2f, 6), p(0x2f, 7), p(0xaf, 8), p(0x6f, 7),
    ],
    // from Exit2DR
    [
        p(0x0f, 4), p(0x01, 2), p(0x03, 2), p(0x03, 3),
        p(0x00, 1), p(0x02, 2), p(0x02, 3), p(0x00, 0),
        p(0x01, 1), p(0x07, 3), p(0x07, 4), p(0x07, 5),
        p(0x17, 5), p(0x17, 6), p(0x57, 7), p(0x37, 6),
    ],
    // from UpdateDR
    [
        p(0x07, 3), p(0x00, 1), p(0x01, 1), p(0x01, 2),
        p(0x01, 3), p(0x05, 3), p(0x05, 4), p(0x15, 5),
        p(0x00, 0), p(0x03, 2), p(0x03, 3), p(0x03, 4),
        p(0x0b, 4), p(0x0b, 5), p(0x2b, 6), p(0x1b, 5),
    ],
    // from SelectIR
    [
        p(0x01, 1), p(0x01, 2), p(0x05, 3), p(0x05, 4),
        p(0x05, 5), p(0x15, 5), p(0x15, 6), p(0x55, 7),
        p(0x35, 6), p(0x00, 0), p(0x00, 1), p(0x00, 2),
        p(0x02, 2), p(0x02, 3), p(0x0a, 4), p(0x06, 3),
    ],
    // from CaptureIR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x07, 4),
        p(0x07, 5), p(0x17, 5), p(0x17, 6), p(0x57, 7),
        p(0x37, 6), p(0x0f, 4), p(0x00, 0), p(0x00, 1),
        p(0x01, 1), p(0x01, 2), p(0x05, 3), p(0x03, 2),
    ],
    // from ShiftIR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x07, 4),
        p(0x07, 5), p(0x17, 5), p(0x17, 6), p(0x57, 7),
        p(0x37, 6), p(0x0f, 4), p(0x0f, 5), p(0x00, 0),
        p(0x01, 1), p(0x01, 2), p(0x05, 3), p(0x03, 2),
    ],
    // from Exit1IR
    [
        p(0x0f, 4), p(0x01, 2), p(0x03, 2), p(0x03, 3),
        p(0x03, 4), p(0x0b, 4), p(0x0b, 5), p(0x2b, 6),
        p(0x1b, 5), p(0x07, 3), p(0x07, 4), p(0x02, 3),
        p(0x00, 0), p(0x00, 1), p(0x02, 2), p(0x01, 1),
    ],
    // from PauseIR
    [
        p(0x1f, 5), p(0x03, 3), p(0x07, 3), p(0x07, 4),
        p(0x07, 5), p(0x17, 5), p(0x17, 6), p(0x57, 7),
        p(0x37, 6), p(0x0f, 4), p(0x0f, 5), p(0x01, 2),
        p(0x05, 3), p(0x00, 0), p(0x01, 1), p(0x03, 2),
    ],
    // from Exit2IR
    [
        p(0x0f, 4), p(0x01, 2), p(0x03, 2), p(0x03, 3),
        p(0x03, 4), p(0x0b, 4), p(0x0b, 5), p(0x2b, 6),
        p(0x1b, 5), p(0x07, 3), p(0x07, 4), p(0x00, 1),
        p(0x02, 2), p(0x02, 3), p(0x00, 0), p(0x01, 1),
    ],
    // from UpdateIR
    [
        p(0x07, 3), p(0x00, 1), p(0x01, 1), p(0x01, 2),
        p(0x01, 3), p(0x05, 3), p(0x05, 4), p(0x15, 5),
        p(0x0d, 4), p(0x03, 2), p(0x03, 3), p(0x03, 4),
        p(0x0b, 4), p(0x0b, 5), p(0x2b, 6), p(0x00, 0),
    ],
];

/// Looks up the TMS path between two raw state indices.
/// Indices outside of the 16 defined states fail instead of indexing out of bounds.
pub fn path_for_index(from: u8, to: u8) -> Result<TmsPath> {
    TMS_PATHS
        .get(from as usize)
        .and_then(|row| row.get(to as usize))
        .copied()
        .ok_or_else(|| {
            JtagError::invalid(format!("No TMS path from state {} to state {}", from, to))
        })
}

/// Looks up the minimal TMS path from `from` to `to`.
pub fn path_for(from: TapState, to: TapState) -> Result<TmsPath> {
    path_for_index(from.index(), to.index())
}

/// A TMS bit sequence of up to 16 clocks, as handed to a transport.
/// Bit `n` of `bits` is the TMS value of clock `n`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TmsSequence {
    bits: u16,
    len: u8,
}

impl TmsSequence {
    pub const MAX_LEN: u8 = 16;

    pub fn new(bits: u16, len: u8) -> Result<TmsSequence> {
        if len > Self::MAX_LEN {
            return Err(JtagError::invalid(format!(
                "TMS sequence of {} clocks exceeds {}",
                len,
                Self::MAX_LEN
            )));
        }
        let mask = if len == Self::MAX_LEN {
            u16::MAX
        } else {
            (1u16 << len) - 1
        };
        Ok(TmsSequence {
            bits: bits & mask,
            len,
        })
    }

    /// The sequence that reaches Test-Logic-Reset from any state.
    pub fn reset() -> TmsSequence {
        TmsSequence {
            bits: (1u16 << RESET_TMS_CYCLES) - 1,
            len: RESET_TMS_CYCLES,
        }
    }

    /// The sequence `set_tap_state` drives from `from` to `to`,
    /// including settle clocks where the target requires them.
    pub fn between(from: TapState, to: TapState) -> Result<TmsSequence> {
        if to == TapState::TestLogicReset {
            return Ok(TmsSequence::reset());
        }
        let path = path_for(from, to)?;
        let mut len = path.bit_count;
        if to.needs_settle() {
            // settle clocks are TMS=0, so only the length grows
            len += SETTLE_CYCLES;
        }
        TmsSequence::new(path.tms_bits as u16, len)
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// TMS values in clock order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| (self.bits >> i) & 1 == 1)
    }

    /// Packs the sequence LSB-first into `ceil(len / 8)` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let num_bytes = (self.len as usize).div_ceil(8);
        self.bits.to_le_bytes()[..num_bytes].to_vec()
    }

    /// Replays the sequence from `start` and returns the final state.
    pub fn replay(&self, start: TapState) -> TapState {
        self.iter().fold(start, TapState::next)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_path_reaches_its_destination() {
        for from in TapState::ALL {
            for to in TapState::ALL {
                let path = path_for(from, to).unwrap();
                assert!(path.bit_count <= 8);
                let seq = TmsSequence::new(path.tms_bits as u16, path.bit_count).unwrap();
                assert_eq!(seq.replay(from), to, "path {} -> {}", from, to);
            }
        }
    }

    #[test]
    fn out_of_range_index_fails_closed() {
        assert!(matches!(
            path_for_index(16, 0),
            Err(JtagError::InvalidParameter(_))
        ));
        assert!(matches!(
            path_for_index(3, 200),
            Err(JtagError::InvalidParameter(_))
        ));
        assert!(TapState::try_from(16).is_err());
        assert_eq!(TapState::try_from(11).unwrap(), TapState::ShiftIR);
    }

    #[test]
    fn reset_sequence_converges() {
        for from in TapState::ALL {
            assert_eq!(TmsSequence::reset().replay(from), TapState::TestLogicReset);
        }
    }

    #[test]
    fn settle_clocks_extend_idle_and_pause_dr() {
        let seq = TmsSequence::between(TapState::ShiftDR, TapState::RunTestIdle).unwrap();
        assert_eq!(seq.len(), 3 + SETTLE_CYCLES);
        assert_eq!(seq.bits(), 0x03);
        assert_eq!(seq.replay(TapState::ShiftDR), TapState::RunTestIdle);

        let seq = TmsSequence::between(TapState::ShiftIR, TapState::PauseIR).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn sequence_bytes_are_lsb_first() {
        let seq = TmsSequence::between(TapState::TestLogicReset, TapState::Exit2IR).unwrap();
        assert_eq!(seq.len(), 7);
        assert_eq!(seq.to_bytes(), vec![0x56]);
        assert_eq!(
            seq.iter().collect::<Vec<_>>(),
            vec![false, true, true, false, true, false, true]
        );
        assert_eq!(TmsSequence::reset().to_bytes(), vec![0xff]);
    }

    #[test]
    fn sequence_masks_unused_bits() {
        let seq = TmsSequence::new(0xffff, 3).unwrap();
        assert_eq!(seq.bits(), 0x07);
        assert!(TmsSequence::new(0, 17).is_err());
    }
}
