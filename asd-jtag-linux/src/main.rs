use std::error::Error;
use std::path::PathBuf;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use clap::{Parser, Subcommand, ValueEnum};
use clap_num::maybe_hex;
use env_logger::Env;

use asd_jtag::{Builder, Handler, PaddingKind, TapState, Transport, error::JtagError};
use asd_jtag_linux::{
    backends::{
        kernel_driver::KernelDriverBackend, legacy::LegacyDriverBackend, remote::RemoteBackend,
    },
    bus::IpmbClient,
    signals::TerminationSignals,
};

type DynHandler = Handler<Box<dyn Transport + Send>>;

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
enum TransportKind {
    /// Linux JTAG subsystem driver
    Kernel,
    /// Legacy ASPEED JTAG driver
    Legacy,
    /// JTAG master on a companion controller behind the IPMB relay
    Remote,
}

#[derive(Subcommand, Clone, Debug, Eq, PartialEq)]
enum Action {
    /// Force every TAP into Test-Logic-Reset
    Reset,
    /// Read the IDCODE of each device on the chain
    Idcode {
        #[arg(short, long, default_value = "1")]
        devices: usize,
    },
    /// Shift an instruction and print the captured IR bits
    IrScan {
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=64))]
        bits: u32,
        #[arg(short, long, value_parser = maybe_hex::<u64>)]
        value: u64,
    },
    /// Clock TCK in Run-Test/Idle
    Wait {
        #[arg(short, long)]
        cycles: u32,
    },
}

#[derive(Parser)]
#[command(about = "At-scale debug JTAG master diagnostics", long_about = None)]
struct Args {
    #[arg(short, long, value_enum, default_value = "kernel")]
    transport: TransportKind,

    /// Device node of the kernel or legacy driver
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// IPMB bus number of the remote controller
    #[arg(long, default_value = "0")]
    bus: u8,

    /// IPMB slave address of the remote controller
    #[arg(long, default_value = "0x20", value_parser = maybe_hex::<u8>)]
    target: u8,

    /// Directory holding the relay daemon's sockets
    #[arg(long, default_value = "/run/ipmb")]
    relay_dir: PathBuf,

    /// Bit-bang shifts instead of using the hardware engine
    #[arg(long)]
    software_mode: bool,

    #[arg(long)]
    force_hardware: bool,

    /// Scan chain to operate on
    #[arg(long, default_value = "0")]
    chain: usize,

    /// TCK rate or divisor, backend specific
    #[arg(long, value_parser = maybe_hex::<u32>)]
    clock: Option<u32>,

    #[arg(long, default_value = "0")]
    dr_pre: u32,
    #[arg(long, default_value = "0")]
    dr_post: u32,
    #[arg(long, default_value = "0")]
    ir_pre: u32,
    #[arg(long, default_value = "0")]
    ir_post: u32,

    #[clap(subcommand)]
    action: Action,
}

fn open_transport(args: &Args) -> Result<Box<dyn Transport + Send>, Box<dyn Error>> {
    Ok(match args.transport {
        TransportKind::Kernel => {
            let path = args
                .device
                .clone()
                .unwrap_or_else(|| PathBuf::from("/dev/jtag0"));
            log::info!("Using kernel JTAG driver at {}", path.display());
            Box::new(KernelDriverBackend::new(path))
        }
        TransportKind::Legacy => {
            let path = args
                .device
                .clone()
                .unwrap_or_else(|| PathBuf::from("/dev/jtag"));
            log::info!("Using legacy JTAG driver at {}", path.display());
            Box::new(LegacyDriverBackend::new(path))
        }
        TransportKind::Remote => {
            log::info!(
                "Using remote JTAG master on IPMB bus {} address 0x{:02x}",
                args.bus,
                args.target
            );
            let client = IpmbClient::new(&args.relay_dir, args.bus, args.target)?;
            Box::new(RemoteBackend::new(client))
        }
    })
}

fn configure(handler: &mut DynHandler, args: &Args) -> Result<(), JtagError> {
    handler.initialize(args.software_mode)?;
    handler.set_active_chain(args.chain)?;
    for (kind, bits) in [
        (PaddingKind::DrPre, args.dr_pre),
        (PaddingKind::DrPost, args.dr_post),
        (PaddingKind::IrPre, args.ir_pre),
        (PaddingKind::IrPost, args.ir_post),
    ] {
        handler.set_padding(kind, bits)?;
    }
    if let Some(rate) = args.clock {
        handler.set_clock_rate(rate)?;
    }
    Ok(())
}

fn run(handler: &mut DynHandler, action: &Action) -> Result<Vec<String>, JtagError> {
    match *action {
        Action::Reset => {
            handler.tap_reset()?;
            Ok(vec![format!("TAP state: {}", handler.get_tap_state())])
        }
        Action::Idcode { devices } => {
            handler.tap_reset()?;
            handler.set_tap_state(TapState::ShiftDR)?;
            let mut idcodes = vec![0u8; devices * 4];
            handler.shift(devices * 32, None, Some(&mut idcodes), TapState::RunTestIdle)?;
            Ok(idcodes
                .chunks_exact(4)
                .enumerate()
                .map(|(i, raw)| {
                    let idcode = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    format!("Device {}: IDCODE 0x{:08x}", i, idcode)
                })
                .collect())
        }
        Action::IrScan { bits, value } => {
            let bits = bits as usize;
            let num_bytes = bits.div_ceil(8);
            let input = value.to_le_bytes();
            let mut captured = [0u8; 8];
            handler.set_tap_state(TapState::ShiftIR)?;
            handler.shift(
                bits,
                Some(&input[..num_bytes]),
                Some(&mut captured[..num_bytes]),
                TapState::RunTestIdle,
            )?;
            Ok(vec![format!(
                "Captured IR: 0x{:x}",
                u64::from_le_bytes(captured)
            )])
        }
        Action::Wait { cycles } => {
            handler.set_tap_state(TapState::RunTestIdle)?;
            handler.wait_cycles(cycles)?;
            Ok(vec![format!("Clocked {} cycles in {}", cycles, TapState::RunTestIdle)])
        }
    }
}

/// Configures the handler and runs `action`, unless shutdown was requested
/// before the handler became available.
fn session(
    handler: &Mutex<DynHandler>,
    shutdown: &AtomicBool,
    args: &Args,
) -> Result<Option<Vec<String>>, JtagError> {
    let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
    if shutdown.load(Ordering::SeqCst) {
        log::debug!("Shutdown requested, not claiming the JTAG master");
        return Ok(None);
    }
    configure(&mut handler, args)?;
    run(&mut handler, &args.action).map(Some)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting asd-jtagd");

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: transport={:?}, chain={}, action={:?}",
        args.transport,
        args.chain,
        args.action
    );

    let handler = Builder::new()
        .chain_count(args.chain + 1)
        .force_hardware(args.force_hardware)
        .build(open_transport(&args)?)?;
    let handler = Arc::new(Mutex::new(handler));
    let mut signals = TerminationSignals::install()?;

    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = {
        let handler = Arc::clone(&handler);
        let shutdown = Arc::clone(&shutdown);
        tokio::task::spawn_blocking(move || session(&handler, &shutdown, &args))
    };

    let outcome = tokio::select! {
        result = worker => Some(result?),
        name = signals.recv() => {
            log::info!("Received {}, shutting down", name);
            shutdown.store(true, Ordering::SeqCst);
            None
        }
    };

    // Waits for an in-flight operation before the master is released
    let deinit = handler
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .deinitialize();
    if let Err(e) = &deinit {
        log::error!("Failed to release JTAG master: {}", e);
    }

    if let Some(lines) = outcome.transpose()?.flatten() {
        for line in lines {
            println!("{}", line);
        }
    }
    deinit?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn legacy_handler(args: &Args) -> Mutex<DynHandler> {
        let transport = open_transport(args).unwrap();
        Mutex::new(Builder::new().build(transport).unwrap())
    }

    #[test]
    fn shutdown_before_start_skips_the_master() {
        let args = Args::try_parse_from([
            "asd-jtagd",
            "--transport",
            "legacy",
            "--device",
            "/nonexistent/jtag",
            "reset",
        ])
        .unwrap();
        let handler = legacy_handler(&args);

        let shutdown = AtomicBool::new(true);
        assert!(matches!(session(&handler, &shutdown, &args), Ok(None)));
        assert!(!handler.lock().unwrap().is_initialized());

        // Without shutdown the session tries to open the device
        shutdown.store(false, Ordering::SeqCst);
        assert!(session(&handler, &shutdown, &args).is_err());
    }
}
