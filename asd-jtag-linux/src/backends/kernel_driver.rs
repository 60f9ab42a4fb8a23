//! # Kernel Driver Backend
//!
//! For JTAG masters exposed through the Linux JTAG subsystem character device
//! (`/dev/jtagN`).
//!
//! ## Example Usage
//!
//! ```ignore
//! use asd_jtag::Builder;
//! use asd_jtag_linux::backends::kernel_driver::KernelDriverBackend;
//!
//! let mut handler = Builder::new().build(KernelDriverBackend::new("/dev/jtag0"))?;
//! handler.initialize(false)?;
//! ```
use nix::{
    ioctl_readwrite, ioctl_write_ptr, ioctl_write_ptr_bad, request_code_write,
    sys::ioctl::ioctl_num_type,
};
use std::{
    ffi::c_uint,
    fs::{File, OpenOptions},
    io,
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

use asd_jtag::{
    ShiftMode, ShiftRequest, TapState, TapTransition, Transport, TransportError,
    bits, chain::PadValue, tap::{Register, SETTLE_CYCLES}, transport::FusedPadding,
};

use crate::backends::{TckBitbang, tck_sequence};

/// Largest single `JTAG_IOCXFER` payload accepted by the driver.
pub const MAX_XFER_BYTES: usize = 512;
/// Largest number of clocks sent in one `JTAG_IOCBITBANG` call.
pub const MAX_WAIT_CYCLES: usize = 256;

const JTAG_IOCTL_MAGIC: u8 = 0xb2;

const JTAG_NO_RESET: u8 = 0;
const JTAG_FORCE_RESET: u8 = 1;

const JTAG_SIR_XFER: u8 = 0;
const JTAG_SDR_XFER: u8 = 1;

const JTAG_READ_XFER: u8 = 1;
const JTAG_WRITE_XFER: u8 = 2;
const JTAG_READ_WRITE_XFER: u8 = 3;

const JTAG_XFER_MODE: u32 = 0;
const JTAG_XFER_SW_MODE: u32 = 0;
const JTAG_XFER_HW_MODE: u32 = 1;

#[repr(C)]
#[derive(Clone, Debug)]
struct JtagTapState {
    reset: u8,
    from: u8,
    endstate: u8,
    /// Idle clocks spent in `endstate` after the transition
    tck: u32,
}

#[repr(C)]
#[derive(Clone, Debug)]
struct JtagXfer {
    xfer_type: u8,
    direction: u8,
    from: u8,
    endstate: u8,
    padding: u32,
    length: u32,
    tdio: u64,
}

#[repr(C)]
#[derive(Clone, Debug)]
struct JtagMode {
    feature: u32,
    mode: u32,
}

#[repr(C)]
#[derive(Debug)]
struct BitbangPacket {
    data: *mut TckBitbang,
    length: u32,
}

ioctl_write_ptr!(jtag_set_state, JTAG_IOCTL_MAGIC, 0, JtagTapState);
ioctl_write_ptr!(jtag_set_freq, JTAG_IOCTL_MAGIC, 1, c_uint);
ioctl_readwrite!(jtag_xfer, JTAG_IOCTL_MAGIC, 3, JtagXfer);
// The driver declares these two with an `unsigned int` size even though it
// reads a struct, so the codes cannot be derived from the argument type.
const JTAG_SIOCMODE: ioctl_num_type =
    request_code_write!(JTAG_IOCTL_MAGIC, 5, size_of::<c_uint>());
const JTAG_IOCBITBANG: ioctl_num_type =
    request_code_write!(JTAG_IOCTL_MAGIC, 6, size_of::<c_uint>());

ioctl_write_ptr_bad!(jtag_set_mode, JTAG_SIOCMODE, JtagMode);
ioctl_write_ptr_bad!(jtag_bitbang, JTAG_IOCBITBANG, BitbangPacket);

/// The `padding` word of `JTAG_IOCXFER`.
///
/// Host-endian `u32`: bits 0-11 hold the pre-pad bit count, bits 12-23 the
/// post-pad bit count and bit 24 the value clocked into padding bits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PaddingWord {
    pub pre: u16,
    pub post: u16,
    pub ones: bool,
}

impl PaddingWord {
    /// Largest pad count representable in either field.
    pub const MAX_PAD: u16 = 0xfff;

    const PRE_SHIFT: u32 = 0;
    const POST_SHIFT: u32 = 12;
    const VALUE_SHIFT: u32 = 24;

    pub fn from_padding(padding: &FusedPadding) -> io::Result<PaddingWord> {
        let fits = |bits: u32| {
            u16::try_from(bits)
                .ok()
                .filter(|bits| *bits <= Self::MAX_PAD)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("Padding of {} bits does not fit the xfer padding word", bits),
                    )
                })
        };
        Ok(PaddingWord {
            pre: fits(padding.pre)?,
            post: fits(padding.post)?,
            ones: padding.value == PadValue::Ones,
        })
    }

    pub fn encode(&self) -> u32 {
        ((self.pre as u32 & 0xfff) << Self::PRE_SHIFT)
            | ((self.post as u32 & 0xfff) << Self::POST_SHIFT)
            | ((self.ones as u32) << Self::VALUE_SHIFT)
    }

    pub fn decode(word: u32) -> PaddingWord {
        PaddingWord {
            pre: ((word >> Self::PRE_SHIFT) & 0xfff) as u16,
            post: ((word >> Self::POST_SHIFT) & 0xfff) as u16,
            ones: (word >> Self::VALUE_SHIFT) & 1 == 1,
        }
    }
}

fn xfer_direction(request: &ShiftRequest<'_>) -> u8 {
    match (request.write_bits > 0, request.read_bits > 0) {
        (true, true) => JTAG_READ_WRITE_XFER,
        (false, true) => JTAG_READ_XFER,
        _ => JTAG_WRITE_XFER,
    }
}

fn state_change(transition: &TapTransition) -> JtagTapState {
    JtagTapState {
        reset: if transition.to == TapState::TestLogicReset {
            JTAG_FORCE_RESET
        } else {
            JTAG_NO_RESET
        },
        from: transition.from.index(),
        endstate: transition.to.index(),
        tck: if transition.to.needs_settle() {
            SETTLE_CYCLES as u32
        } else {
            0
        },
    }
}

/// Splits `cycles` into bit-bang calls of at most [`MAX_WAIT_CYCLES`] clocks.
fn wait_blocks(cycles: u32) -> impl Iterator<Item = usize> {
    let cycles = cycles as usize;
    (0..cycles)
        .step_by(MAX_WAIT_CYCLES)
        .map(move |start| (cycles - start).min(MAX_WAIT_CYCLES))
}

fn not_open() -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "JTAG device is not open",
    ))
}

/// A JTAG master driven through the Linux JTAG subsystem ioctls.
pub struct KernelDriverBackend {
    path: PathBuf,
    file: Option<File>,
    mode: ShiftMode,
}

impl KernelDriverBackend {
    /// The device is only opened by [`Transport::initialize`].
    pub fn new(device_path: impl AsRef<Path>) -> KernelDriverBackend {
        KernelDriverBackend {
            path: device_path.as_ref().to_path_buf(),
            file: None,
            mode: ShiftMode::Hardware,
        }
    }

    fn fd(&self) -> Result<RawFd, TransportError> {
        self.file.as_ref().map(|f| f.as_raw_fd()).ok_or_else(not_open)
    }

    fn bitbang(&self, mut clocks: Vec<TckBitbang>) -> Result<(), TransportError> {
        let fd = self.fd()?;
        let packet = BitbangPacket {
            data: clocks.as_mut_ptr(),
            length: clocks.len() as u32,
        };
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `packet.data` points to `packet.length` entries that outlive the call
        unsafe {
            jtag_bitbang(fd, &packet).map_err(io::Error::from)?;
        }
        Ok(())
    }
}

impl Transport for KernelDriverBackend {
    fn name(&self) -> &'static str {
        "kernel-driver"
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        log::debug!("Opening JTAG device: {}", self.path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        let jtag_mode = JtagMode {
            feature: JTAG_XFER_MODE,
            mode: match mode {
                ShiftMode::Software => JTAG_XFER_SW_MODE,
                ShiftMode::Hardware => JTAG_XFER_HW_MODE,
            },
        };
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `jtag_mode` is laid out the way the driver expects it
        unsafe {
            jtag_set_mode(file.as_raw_fd(), &jtag_mode).map_err(io::Error::from)?;
        }
        log::info!("Opened {} in {:?} mode", self.path.display(), mode);
        self.file = Some(file);
        self.mode = mode;
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        if self.file.take().is_some() {
            log::info!("Closed {}", self.path.display());
        }
        Ok(())
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        if self.mode == ShiftMode::Software {
            log::trace!("Bit-banging {} TMS clocks", transition.tms.len());
            return self.bitbang(tck_sequence(transition.tms.iter()));
        }
        let fd = self.fd()?;
        let state = state_change(transition);
        log::trace!("JTAG_SIOCSTATE: {:?}", state);
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `state` is laid out the way the driver expects it
        unsafe {
            jtag_set_state(fd, &state).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        let fd = self.fd()?;
        let num_bits = request.bits();
        let mut tdio = vec![0u8; bits::byte_len(num_bits)];
        tdio[..request.tdi.len()].copy_from_slice(request.tdi);
        let padding = match &request.padding {
            Some(padding) => PaddingWord::from_padding(padding)?.encode(),
            None => 0,
        };
        let mut xfer = JtagXfer {
            xfer_type: match request.register {
                Register::Instruction => JTAG_SIR_XFER,
                Register::Data => JTAG_SDR_XFER,
            },
            direction: xfer_direction(&request),
            from: request.from.index(),
            endstate: request.end_state.index(),
            padding,
            length: num_bits as u32,
            tdio: tdio.as_mut_ptr() as u64,
        };
        log::trace!("JTAG_IOCXFER: {:?}", xfer);
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `tdio` holds `ceil(length / 8)` bytes and outlives the call
        unsafe {
            jtag_xfer(fd, &mut xfer).map_err(io::Error::from)?;
        }
        if let Some(tdo) = request.tdo {
            let num_bytes = bits::byte_len(request.read_bits);
            tdo[..num_bytes].copy_from_slice(&tdio[..num_bytes]);
            log::trace!("Kernel driver shift TDO: {:02x?}", &tdo[..num_bytes]);
        }
        Ok(())
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        for block in wait_blocks(cycles) {
            self.bitbang(tck_sequence(std::iter::repeat_n(false, block)))?;
        }
        Ok(())
    }

    fn set_clock_rate(&mut self, rate: u32) -> Result<(), TransportError> {
        let fd = self.fd()?;
        let frequency: c_uint = rate;
        log::debug!("Kernel driver TCK frequency: {} Hz", frequency);
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - The driver reads a single unsigned int
        unsafe {
            jtag_set_freq(fd, &frequency).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn max_transfer_bits(&self) -> usize {
        MAX_XFER_BYTES * 8
    }

    fn supports_fused_padding(&self, mode: ShiftMode) -> bool {
        mode == ShiftMode::Hardware
    }
}
