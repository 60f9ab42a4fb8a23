//! Per-chain TAP bookkeeping and scan padding.
use std::fmt::Display;

use crate::error::{JtagError, Result};
use crate::tap::{Register, TapState};

/// Upper bound on scan chains a single JTAG master can address.
pub const MAX_SCAN_CHAINS: usize = 4;

/// Selects one of the four padding fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PaddingKind {
    DrPre,
    DrPost,
    IrPre,
    IrPost,
}

impl PaddingKind {
    pub fn register(self) -> Register {
        match self {
            PaddingKind::DrPre | PaddingKind::DrPost => Register::Data,
            PaddingKind::IrPre | PaddingKind::IrPost => Register::Instruction,
        }
    }
}

impl TryFrom<u8> for PaddingKind {
    type Error = JtagError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PaddingKind::DrPre),
            1 => Ok(PaddingKind::DrPost),
            2 => Ok(PaddingKind::IrPre),
            3 => Ok(PaddingKind::IrPost),
            other => Err(JtagError::invalid(format!("Unknown padding kind {}", other))),
        }
    }
}

impl Display for PaddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PaddingKind::DrPre => "DR pre",
            PaddingKind::DrPost => "DR post",
            PaddingKind::IrPre => "IR pre",
            PaddingKind::IrPost => "IR post",
        };
        write!(f, "{}", name)
    }
}

/// Bits shifted around the targeted device so that data lines up across a daisy chain.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PaddingConfig {
    pub dr_pre: u32,
    pub dr_post: u32,
    pub ir_pre: u32,
    pub ir_post: u32,
}

impl PaddingConfig {
    /// `(pre, post)` padding for the given register class.
    pub fn for_register(&self, register: Register) -> (u32, u32) {
        match register {
            Register::Instruction => (self.ir_pre, self.ir_post),
            Register::Data => (self.dr_pre, self.dr_post),
        }
    }

    fn field_mut(&mut self, kind: PaddingKind) -> &mut u32 {
        match kind {
            PaddingKind::DrPre => &mut self.dr_pre,
            PaddingKind::DrPost => &mut self.dr_post,
            PaddingKind::IrPre => &mut self.ir_pre,
            PaddingKind::IrPost => &mut self.ir_post,
        }
    }
}

/// The value clocked into padding bits.
/// IR padding of ones selects BYPASS on untargeted devices, DR padding of
/// zeros passes harmlessly through their bypass registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PadValue {
    Zeros,
    Ones,
}

impl PadValue {
    pub fn for_register(register: Register) -> PadValue {
        match register {
            Register::Instruction => PadValue::Ones,
            Register::Data => PadValue::Zeros,
        }
    }

    pub fn bit(self) -> bool {
        self == PadValue::Ones
    }
}

/// Whether a logical shift is spread over several engine calls.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ScanPhase {
    #[default]
    Idle,
    InProgress,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanChain {
    pub tap_state: TapState,
    pub phase: ScanPhase,
    pub padding: PaddingConfig,
}

impl Default for ScanChain {
    fn default() -> Self {
        ScanChain {
            tap_state: TapState::TestLogicReset,
            phase: ScanPhase::Idle,
            padding: PaddingConfig::default(),
        }
    }
}

impl ScanChain {
    pub fn reset(&mut self) {
        *self = ScanChain::default();
    }
}

/// Largest padding accepted per register class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PaddingLimits {
    pub dr_max: u32,
    pub ir_max: u32,
}

impl PaddingLimits {
    pub fn max_for(&self, kind: PaddingKind) -> u32 {
        match kind.register() {
            Register::Data => self.dr_max,
            Register::Instruction => self.ir_max,
        }
    }
}

/// Stores `bits` into `padding` after checking it against `limits`.
/// On failure `padding` is left untouched.
pub fn apply_padding(
    padding: &mut PaddingConfig,
    limits: &PaddingLimits,
    kind: PaddingKind,
    bits: u32,
) -> Result<()> {
    let max = limits.max_for(kind);
    if bits > max {
        return Err(JtagError::invalid(format!(
            "{} padding of {} bits exceeds maximum of {}",
            kind, bits, max
        )));
    }
    *padding.field_mut(kind) = bits;
    Ok(())
}
