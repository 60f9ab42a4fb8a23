//! # Remote Backend
//!
//! For processors whose JTAG master is a companion controller on the
//! management bus. Every primitive is relayed as an OEM request, see
//! [`frame`] for the wire format.
//!
//! The remote controller parks the TAP in Exit1-IR/DR after a shift marked
//! as the last transaction; this backend then moves it on to the requested
//! end state with a separate set-tap-state request.
//!
//! The remote controller stays claimed from `initialize` until `deinitialize`.
//! Dropping an initialized backend releases it on a best-effort basis; the
//! `asd-jtagd` binary additionally deinitializes on SIGINT/SIGTERM.
pub mod frame;

use bytes::Bytes;

use asd_jtag::{
    ShiftMode, ShiftRequest, TapState, TapTransition, Transport, TransportError, bits,
    tap::TmsSequence,
};

use crate::bus::ManagementBus;
use frame::{Command, MAX_SHIFT_BITS, NETFN_OEM_1S};

pub struct RemoteBackend<B: ManagementBus> {
    bus: B,
    initialized: bool,
}

impl<B: ManagementBus> RemoteBackend<B> {
    pub fn new(bus: B) -> RemoteBackend<B> {
        RemoteBackend {
            bus,
            initialized: false,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn request(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let body = self
            .bus
            .exchange(NETFN_OEM_1S, command.code(), &command.encode())?;
        frame::response_data(&body).map(<[u8]>::to_vec)
    }

    fn clock_tms(&mut self, tms: TmsSequence) -> Result<(), TransportError> {
        if tms.is_empty() {
            return Ok(());
        }
        self.request(&Command::SetTapState { tms })?;
        Ok(())
    }
}

impl<B: ManagementBus> Transport for RemoteBackend<B> {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn initialize(&mut self, mode: ShiftMode) -> Result<(), TransportError> {
        log::debug!("Claiming remote JTAG master ({:?} mode requested)", mode);
        self.request(&Command::Init)?;
        self.initialized = true;
        log::info!("Remote JTAG master initialized");
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<(), TransportError> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        self.request(&Command::Deinit)?;
        log::info!("Remote JTAG master released");
        Ok(())
    }

    fn set_tap_state(&mut self, transition: &TapTransition) -> Result<(), TransportError> {
        self.clock_tms(transition.tms)
    }

    fn shift(&mut self, request: ShiftRequest<'_>) -> Result<(), TransportError> {
        let write_bits = u16::try_from(request.write_bits)
            .ok()
            .filter(|bits| *bits <= MAX_SHIFT_BITS);
        let read_bits = u16::try_from(request.read_bits)
            .ok()
            .filter(|bits| *bits <= MAX_SHIFT_BITS);
        let (Some(write_bits), Some(read_bits)) = (write_bits, read_bits) else {
            return Err(TransportError::Unsupported("shifts longer than 256 bits"));
        };
        let command = Command::Shift {
            write_bits,
            read_bits,
            last_transaction: request.last_transaction,
            tdi: Bytes::copy_from_slice(request.tdi),
        };
        let data = self.request(&command)?;

        let read_bytes = bits::byte_len(read_bits as usize);
        if let Some(tdo) = request.tdo {
            if data.len() < read_bytes {
                return Err(TransportError::MalformedResponse(format!(
                    "Expected {} TDO bytes, got {}",
                    read_bytes,
                    data.len()
                )));
            }
            tdo[..read_bytes].copy_from_slice(&data[..read_bytes]);
        }

        let parked = if request.last_transaction {
            TapState::exit1(request.register)
        } else {
            request.from
        };
        if parked != request.end_state {
            let tms = TmsSequence::between(parked, request.end_state)
                .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
            self.clock_tms(tms)?;
        }
        Ok(())
    }

    fn wait_cycles(&mut self, cycles: u32) -> Result<(), TransportError> {
        let capped = u8::try_from(cycles).unwrap_or(u8::MAX);
        if capped as u32 != cycles {
            log::warn!("Remote wait of {} cycles capped at {}", cycles, capped);
        }
        self.request(&Command::ClockCycles {
            cycles: capped,
            tms: false,
        })?;
        Ok(())
    }

    fn set_clock_rate(&mut self, _rate: u32) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("setting the TCK rate"))
    }

    fn max_transfer_bits(&self) -> usize {
        MAX_SHIFT_BITS as usize
    }
}

impl<B: ManagementBus> Drop for RemoteBackend<B> {
    fn drop(&mut self) {
        if self.initialized
            && let Err(e) = self.deinitialize()
        {
            log::error!("Failed to release remote JTAG master: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::io;

    use asd_jtag::{Builder, PaddingKind, Register, TapState};

    use super::*;

    /// Decodes each request and answers from a script.
    #[derive(Default)]
    struct ScriptedBus {
        requests: Vec<Command>,
        responses: VecDeque<Vec<u8>>,
        echo_tdi: bool,
    }

    impl ManagementBus for ScriptedBus {
        fn exchange(&mut self, netfn: u8, cmd: u8, payload: &[u8]) -> io::Result<Vec<u8>> {
            assert_eq!(netfn, NETFN_OEM_1S);
            let command = Command::decode(cmd, payload)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            let response = match (&command, self.responses.pop_front()) {
                (_, Some(scripted)) => scripted,
                (Command::Shift { read_bits, tdi, .. }, None) if self.echo_tdi => {
                    let mut data = tdi.to_vec();
                    data.resize(bits::byte_len(*read_bits as usize), 0);
                    frame::encode_response(0, &data).to_vec()
                }
                (_, None) => frame::encode_response(0, &[]).to_vec(),
            };
            self.requests.push(command);
            Ok(response)
        }
    }

    fn shifts(requests: &[Command]) -> Vec<(u16, u16, bool)> {
        requests
            .iter()
            .filter_map(|c| match c {
                Command::Shift {
                    write_bits,
                    read_bits,
                    last_transaction,
                    ..
                } => Some((*write_bits, *read_bits, *last_transaction)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn last_transaction_leaves_through_exit1() {
        let mut backend = RemoteBackend::new(ScriptedBus {
            echo_tdi: true,
            ..Default::default()
        });
        backend.initialize(ShiftMode::Hardware).unwrap();
        let mut tdo = [0u8; 2];
        backend
            .shift(ShiftRequest {
                register: Register::Data,
                from: TapState::ShiftDR,
                end_state: TapState::RunTestIdle,
                write_bits: 16,
                read_bits: 16,
                tdi: &[0xef, 0xbe],
                tdo: Some(&mut tdo),
                last_transaction: true,
                padding: None,
            })
            .unwrap();
        assert_eq!(tdo, [0xef, 0xbe]);
        let requests = &backend.bus().requests;
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2],
            Command::SetTapState {
                tms: TmsSequence::between(TapState::Exit1DR, TapState::RunTestIdle).unwrap()
            }
        );
    }

    #[test]
    fn exit1_end_state_needs_no_transition() {
        let mut backend = RemoteBackend::new(ScriptedBus::default());
        backend
            .shift(ShiftRequest {
                register: Register::Instruction,
                from: TapState::ShiftIR,
                end_state: TapState::Exit1IR,
                write_bits: 8,
                read_bits: 0,
                tdi: &[0xff],
                tdo: None,
                last_transaction: true,
                padding: None,
            })
            .unwrap();
        assert_eq!(backend.bus().requests.len(), 1);
    }

    #[test]
    fn rejected_request_is_reported() {
        let mut backend = RemoteBackend::new(ScriptedBus {
            responses: VecDeque::from([frame::encode_response(0xd5, &[]).to_vec()]),
            ..Default::default()
        });
        assert!(matches!(
            backend.initialize(ShiftMode::Hardware),
            Err(TransportError::Rejected {
                completion_code: 0xd5
            })
        ));
        assert!(!backend.initialized);
    }

    #[test]
    fn wait_cycles_are_capped() {
        let mut backend = RemoteBackend::new(ScriptedBus::default());
        backend.wait_cycles(1000).unwrap();
        assert_eq!(
            backend.bus().requests,
            vec![Command::ClockCycles {
                cycles: 255,
                tms: false
            }]
        );
    }

    #[test]
    fn deinitialize_is_idempotent() {
        let mut backend = RemoteBackend::new(ScriptedBus::default());
        backend.initialize(ShiftMode::Software).unwrap();
        backend.deinitialize().unwrap();
        backend.deinitialize().unwrap();
        assert_eq!(
            backend.bus().requests,
            vec![Command::Init, Command::Deinit]
        );
    }

    #[test]
    fn handler_chunks_to_remote_limit() {
        let backend = RemoteBackend::new(ScriptedBus {
            echo_tdi: true,
            ..Default::default()
        });
        let mut handler = Builder::new().build(backend).unwrap();
        handler.initialize(false).unwrap();
        handler.set_padding(PaddingKind::DrPre, 300).unwrap();
        handler.set_tap_state(TapState::ShiftDR).unwrap();

        let input: Vec<u8> = (0..75u8).collect();
        let mut output = vec![0u8; 75];
        handler
            .shift(600, Some(&input), Some(&mut output), TapState::RunTestIdle)
            .unwrap();
        assert_eq!(output, input);
        assert_eq!(handler.get_tap_state(), TapState::RunTestIdle);

        let requests = &handler.transport().bus().requests;
        assert_eq!(
            shifts(requests),
            vec![
                (256, 0, false),
                (44, 0, false),
                (256, 256, false),
                (256, 256, false),
                (88, 88, true),
            ]
        );
        assert_eq!(
            requests.last(),
            Some(&Command::SetTapState {
                tms: TmsSequence::between(TapState::Exit1DR, TapState::RunTestIdle).unwrap()
            })
        );
    }
}
