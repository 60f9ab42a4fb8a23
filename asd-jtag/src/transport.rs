use crate::{
    chain::PadValue,
    error::TransportError,
    tap::{Register, TapState, TmsSequence},
};

/// How the JTAG master moves bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ShiftMode {
    /// Every TCK edge is driven by software
    Software,
    /// The controller shifts whole vectors on its own
    #[default]
    Hardware,
}

/// A TAP state change, fully resolved into TMS clocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TapTransition {
    pub from: TapState,
    pub to: TapState,
    pub tms: TmsSequence,
}

/// Padding the transport is asked to insert around the data of a single request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FusedPadding {
    pub pre: u32,
    pub post: u32,
    pub value: PadValue,
}

/// One transfer through Shift-IR or Shift-DR, never longer than
/// [`Transport::max_transfer_bits`].
///
/// `tdi` holds `ceil(write_bits / 8)` bytes and `tdo`, when present, has room
/// for `ceil(read_bits / 8)` bytes. The transport clocks `bits()` cycles;
/// cycles past `write_bits` drive TDI low.
#[derive(Debug)]
pub struct ShiftRequest<'a> {
    pub register: Register,
    pub from: TapState,
    pub end_state: TapState,
    pub write_bits: usize,
    pub read_bits: usize,
    pub tdi: &'a [u8],
    pub tdo: Option<&'a mut [u8]>,
    /// Set on the final request of a shift that leaves the Shift state.
    pub last_transaction: bool,
    pub padding: Option<FusedPadding>,
}

impl ShiftRequest<'_> {
    /// Number of TCK cycles spent on data.
    pub fn bits(&self) -> usize {
        self.write_bits.max(self.read_bits)
    }
}

/// Trait that hardware backends implement to drive a JTAG master.
///
/// A [`Handler`](crate::Handler) owns exactly one transport for its whole
/// lifetime and is the only caller. All methods block until the hardware
/// (or remote controller) confirms completion. A returned error means the
/// primitive may have been partially applied.
pub trait Transport {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Acquire the JTAG master and configure the transfer mode.
    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError>;

    /// Release the JTAG master. Calling this on a released transport is a no-op.
    fn deinitialize(&mut self) -> Result<(), TransportError>;

    /// Clock out `transition.tms`, moving the TAP from `transition.from` to `transition.to`.
    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError>;

    /// Shift a single chunk. The TAP starts in `request.from` and must end in
    /// `request.end_state`.
    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError>;

    /// Clock TCK `cycles` times with TMS held low.
    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError>;

    /// Set the TCK rate. Whether `rate` is a frequency or a divisor is backend specific.
    fn set_clock_rate(&mut self, rate: u32) -> Result<(), TransportError>;

    /// Largest number of bits a single [`ShiftRequest`] may carry.
    fn max_transfer_bits(&self) -> usize;

    /// Whether [`ShiftRequest::padding`] is honored in the given mode.
    fn supports_fused_padding(&self, _mode: ShiftMode) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        (**self).initialize(mode)
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        (**self).deinitialize()
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        (**self).set_tap_state(transition)
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        (**self).shift(request)
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        (**self).wait_cycles(cycles)
    }

    fn set_clock_rate(&mut self, rate: u32) -> Result<(), TransportError> {
        (**self).set_clock_rate(rate)
    }

    fn max_transfer_bits(&self) -> usize {
        (**self).max_transfer_bits()
    }

    fn supports_fused_padding(&self, mode: ShiftMode) -> bool {
        (**self).supports_fused_padding(mode)
    }
}
