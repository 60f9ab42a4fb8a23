//! # Legacy Driver Backend
//!
//! For BMCs still running the out-of-tree ASPEED JTAG driver, which predates
//! the Linux JTAG subsystem. TAP transitions are bit-banged one clock per
//! ioctl; shifts use the block read/write scan ioctl. The driver has no notion
//! of padding, so padding is always shifted by the engine.
use nix::{ioctl_readwrite, ioctl_write_ptr};
use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

use asd_jtag::{ShiftMode, ShiftRequest, TapTransition, Transport, TransportError, bits};

use crate::backends::{TckBitbang, tck_sequence};

/// Largest single scan accepted by the driver.
pub const MAX_SCAN_BYTES: usize = 1024;

const JTAGIOC_BASE: u8 = b'T';

const LEGACY_HW_MODE: u8 = 0;
const LEGACY_SW_MODE: u8 = 1;

const CONTROLLER_SLAVE: u32 = 0;
const CONTROLLER_MASTER: u32 = 1;

#[repr(C)]
#[derive(Clone, Debug)]
struct ScanXfer {
    mode: u8,
    tap_state: u32,
    length: u32,
    tdi: *mut u8,
    tdi_bytes: u32,
    tdo: *mut u8,
    tdo_bytes: u32,
    end_tap_state: u32,
}

#[repr(C)]
#[derive(Clone, Debug)]
struct SetTckParam {
    mode: u8,
    tck: u32,
}

#[repr(C)]
#[derive(Clone, Debug)]
struct ControllerModeParam {
    mode: u8,
    controller_mode: u32,
}

ioctl_write_ptr!(ast_jtag_set_tck, JTAGIOC_BASE, 3, SetTckParam);
ioctl_readwrite!(ast_jtag_bitbang, JTAGIOC_BASE, 5, TckBitbang);
ioctl_readwrite!(ast_jtag_readwritescan, JTAGIOC_BASE, 7, ScanXfer);
ioctl_write_ptr!(ast_jtag_slavecontlr, JTAGIOC_BASE, 8, ControllerModeParam);

/// TMS low for `cycles` clocks, one bit-bang ioctl each.
fn idle_clocks(cycles: u32) -> Vec<TckBitbang> {
    tck_sequence(std::iter::repeat_n(false, cycles as usize))
}

/// A JTAG master driven through the legacy ASPEED driver.
pub struct LegacyDriverBackend {
    path: PathBuf,
    file: Option<File>,
    mode: u8,
}

impl LegacyDriverBackend {
    /// The device is only opened by [`Transport::initialize`].
    pub fn new(device_path: impl AsRef<Path>) -> LegacyDriverBackend {
        LegacyDriverBackend {
            path: device_path.as_ref().to_path_buf(),
            file: None,
            mode: LEGACY_HW_MODE,
        }
    }

    fn fd(&self) -> Result<RawFd, TransportError> {
        self.file.as_ref().map(|f| f.as_raw_fd()).ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "Legacy JTAG device is not open",
            ))
        })
    }

    fn set_controller(&self, fd: RawFd, controller_mode: u32) -> io::Result<()> {
        let param = ControllerModeParam {
            mode: self.mode,
            controller_mode,
        };
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `param` is laid out the way the driver expects it
        unsafe {
            ast_jtag_slavecontlr(fd, &param)?;
        }
        Ok(())
    }

    /// Issues one ioctl per clock.
    fn clock_out(&self, clocks: Vec<TckBitbang>) -> Result<(), TransportError> {
        let fd = self.fd()?;
        for mut clock in clocks {
            // SAFETY: The ioctl call is safe because:
            // - File descriptor is valid (file is open)
            // - `clock` is a single packed triple the driver reads and writes back
            unsafe {
                ast_jtag_bitbang(fd, &mut clock).map_err(io::Error::from)?;
            }
        }
        Ok(())
    }
}

impl Transport for LegacyDriverBackend {
    fn name(&self) -> &'static str {
        "legacy-driver"
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        log::debug!("Opening legacy JTAG device: {}", self.path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.mode = match mode {
            ShiftMode::Software => LEGACY_SW_MODE,
            ShiftMode::Hardware => LEGACY_HW_MODE,
        };
        self.set_controller(file.as_raw_fd(), CONTROLLER_MASTER)?;
        log::info!("Opened legacy JTAG device {}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        self.set_controller(file.as_raw_fd(), CONTROLLER_SLAVE)?;
        log::info!("Released legacy JTAG device {}", self.path.display());
        Ok(())
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        log::trace!(
            "Legacy bit-bang {} -> {}: {} clocks",
            transition.from,
            transition.to,
            transition.tms.len()
        );
        self.clock_out(tck_sequence(transition.tms.iter()))
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        let fd = self.fd()?;
        let num_bits = request.bits();
        let num_bytes = bits::byte_len(num_bits);
        let mut tdi = vec![0u8; num_bytes];
        tdi[..request.tdi.len()].copy_from_slice(request.tdi);
        let mut tdo = vec![0u8; num_bytes];
        let mut xfer = ScanXfer {
            mode: self.mode,
            tap_state: request.from.index() as u32,
            length: num_bits as u32,
            tdi: tdi.as_mut_ptr(),
            tdi_bytes: num_bytes as u32,
            tdo: tdo.as_mut_ptr(),
            tdo_bytes: num_bytes as u32,
            end_tap_state: request.end_state.index() as u32,
        };
        log::trace!(
            "AST_JTAG_READWRITESCAN: {} bits {} -> {}",
            num_bits,
            request.from,
            request.end_state
        );
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `tdi` and `tdo` hold `tdi_bytes` / `tdo_bytes` bytes and outlive the call
        unsafe {
            ast_jtag_readwritescan(fd, &mut xfer).map_err(io::Error::from)?;
        }
        if let Some(out) = request.tdo {
            let read_bytes = bits::byte_len(request.read_bits);
            out[..read_bytes].copy_from_slice(&tdo[..read_bytes]);
        }
        Ok(())
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        self.clock_out(idle_clocks(cycles))
    }

    fn set_clock_rate(&mut self, rate: u32) -> Result<(), TransportError> {
        let fd = self.fd()?;
        let param = SetTckParam {
            mode: self.mode,
            tck: rate,
        };
        log::debug!("Legacy driver TCK divisor: {}", rate);
        // SAFETY: The ioctl call is safe because:
        // - File descriptor is valid (file is open)
        // - `param` is laid out the way the driver expects it
        unsafe {
            ast_jtag_set_tck(fd, &param).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn max_transfer_bits(&self) -> usize {
        MAX_SCAN_BYTES * 8
    }
}

impl Drop for LegacyDriverBackend {
    fn drop(&mut self) {
        if let Err(e) = self.deinitialize() {
            log::error!("Failed to release legacy JTAG master: {}", e);
        }
    }
}
