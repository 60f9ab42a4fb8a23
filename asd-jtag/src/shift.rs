//! Padding and chunking of scans through Shift-IR / Shift-DR.
//!
//! A logical scan may be streamed over several [`Handler::shift`] calls that
//! stay in the Shift state. Pre-padding is inserted on the first call of such
//! a sequence and post-padding on the call that leaves the Shift state. Each
//! transfer handed to the transport is split into chunks no longer than
//! [`Transport::max_transfer_bits`].
use crate::{
    Handler, bits,
    chain::{PadValue, ScanPhase},
    error::{JtagError, Result},
    tap::{Register, TapState},
    transport::{FusedPadding, ShiftRequest, Transport},
};

impl<T: Transport> Handler<T> {
    /// Shift `number_of_bits` through the register selected by the current
    /// Shift state, then move the TAP to `end_state`.
    ///
    /// `input` and `output` must hold at least `ceil(number_of_bits / 8)`
    /// bytes. Without `input` TDI is held low. Bits of `output` past
    /// `number_of_bits` in the last byte are written as zero.
    ///
    /// Ending in the current Shift state keeps the sequence open for a
    /// following call.
    pub fn shift(
        &mut self,
        number_of_bits: usize,
        input: Option<&[u8]>,
        output: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<()> {
        self.ensure_ready()?;
        let current = self.active().tap_state;
        let register = current
            .shift_register()
            .ok_or(JtagError::NotInShiftState(current))?;
        if number_of_bits == 0 {
            return Err(JtagError::invalid("Shift of zero bits"));
        }
        let num_bytes = bits::byte_len(number_of_bits);
        if let Some(input) = input
            && input.len() < num_bytes
        {
            return Err(JtagError::invalid(format!(
                "Input of {} bytes too short for {} bits",
                input.len(),
                number_of_bits
            )));
        }
        if let Some(output) = output.as_deref()
            && output.len() < num_bytes
        {
            return Err(JtagError::invalid(format!(
                "Output of {} bytes too short for {} bits",
                output.len(),
                number_of_bits
            )));
        }

        let (pre, post) = self.active().padding.for_register(register);
        let pad = PadValue::for_register(register);
        log::debug!(
            "Shift {} bits in {} -> {} (pre={}, post={}, phase={:?})",
            number_of_bits,
            current,
            end_state,
            pre,
            post,
            self.active().phase
        );

        if self.transport.supports_fused_padding(self.mode) {
            return self.shift_fused(register, number_of_bits, input, output, end_state);
        }

        if self.active().phase == ScanPhase::Idle {
            if pre > 0 {
                self.shift_padding(register, pre as usize, pad, current)?;
            }
            self.active_mut().phase = ScanPhase::InProgress;
        }

        if post > 0 && current != end_state {
            self.perform_shift(register, number_of_bits, input, output, current, None)?;
            self.active_mut().phase = ScanPhase::Idle;
            self.shift_padding(register, post as usize, pad, end_state)?;
        } else {
            self.perform_shift(register, number_of_bits, input, output, end_state, None)?;
            if current != end_state {
                self.active_mut().phase = ScanPhase::Idle;
            }
        }
        Ok(())
    }

    /// Hands the padding to the transport instead of shifting it separately.
    fn shift_fused(
        &mut self,
        register: Register,
        number_of_bits: usize,
        input: Option<&[u8]>,
        output: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<()> {
        let chain = self.active();
        let current = chain.tap_state;
        let (pre, post) = chain.padding.for_register(register);
        let leaving = current != end_state;
        let padding = FusedPadding {
            pre: if chain.phase == ScanPhase::Idle { pre } else { 0 },
            post: if leaving { post } else { 0 },
            value: PadValue::for_register(register),
        };
        let padding = (padding.pre > 0 || padding.post > 0).then_some(padding);
        self.perform_shift(register, number_of_bits, input, output, end_state, padding)?;
        self.active_mut().phase = if leaving {
            ScanPhase::Idle
        } else {
            ScanPhase::InProgress
        };
        Ok(())
    }

    fn shift_padding(
        &mut self,
        register: Register,
        number_of_bits: usize,
        pad: PadValue,
        end_state: TapState,
    ) -> Result<()> {
        let pattern = bits::filled(pad.bit(), number_of_bits);
        self.perform_shift(register, number_of_bits, Some(&pattern), None, end_state, None)
    }

    /// Splits one transfer into transport-sized chunks. Only the final chunk
    /// moves the TAP to `end_state`; the chain's recorded state follows each
    /// confirmed chunk.
    fn perform_shift(
        &mut self,
        register: Register,
        number_of_bits: usize,
        input: Option<&[u8]>,
        mut output: Option<&mut [u8]>,
        end_state: TapState,
        padding: Option<FusedPadding>,
    ) -> Result<()> {
        let max_chunk = self.max_chunk_bits();
        let zeros;
        let tdi: &[u8] = match input {
            Some(input) => input,
            None if output.is_none() => {
                zeros = vec![0u8; bits::byte_len(number_of_bits)];
                &zeros
            }
            None => &[],
        };
        let mut write_left = if tdi.is_empty() { 0 } else { number_of_bits };
        let mut read_left = if output.is_some() { number_of_bits } else { 0 };
        let mut written = 0;
        let mut read = 0;
        let mut first = true;

        loop {
            let write_now = write_left.min(max_chunk);
            let read_now = read_left.min(max_chunk);
            write_left -= write_now;
            read_left -= read_now;
            let done = write_left == 0 && read_left == 0;
            let last_transaction = done && !end_state.is_shift();
            let from = self.active().tap_state;
            let chunk_end = if done { end_state } else { from };

            let chunk_padding = padding.and_then(|p| {
                let pre = if first { p.pre } else { 0 };
                let post = if done { p.post } else { 0 };
                (pre > 0 || post > 0).then_some(FusedPadding { pre, post, ..p })
            });
            let request = ShiftRequest {
                register,
                from,
                end_state: chunk_end,
                write_bits: write_now,
                read_bits: read_now,
                tdi: &tdi[written / 8..bits::byte_len(written + write_now)],
                tdo: output
                    .as_deref_mut()
                    .map(|out| &mut out[read / 8..bits::byte_len(read + read_now)]),
                last_transaction,
                padding: chunk_padding,
            };
            log::trace!(
                "{} shift chunk: write={} read={} {} -> {} last={}",
                self.transport.name(),
                write_now,
                read_now,
                from,
                chunk_end,
                last_transaction
            );
            log::trace!("Shift chunk TDI: {:02x?}", request.tdi);

            if let Err(e) = self.transport.shift(request) {
                log::error!(
                    "{} shift of {} bits ({} written, {} read so far) {} -> {} failed: {}",
                    self.transport.name(),
                    number_of_bits,
                    written,
                    read,
                    from,
                    chunk_end,
                    e
                );
                self.desynchronized = true;
                return Err(e.into());
            }
            self.active_mut().tap_state = chunk_end;
            written += write_now;
            read += read_now;
            first = false;
            if done {
                break;
            }
        }

        if let Some(out) = output {
            let num_bytes = bits::byte_len(number_of_bits);
            if number_of_bits % 8 != 0 {
                out[num_bytes - 1] &= (1u8 << (number_of_bits % 8)) - 1;
            }
            log::trace!("Shift TDO: {:02x?}", &out[..num_bytes]);
        }
        Ok(())
    }

    /// Chunks always cover whole bytes so buffers advance on byte boundaries.
    fn max_chunk_bits(&self) -> usize {
        (self.transport.max_transfer_bits() / 8 * 8).max(8)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        Builder, Handler, PaddingKind, TapState,
        chain::ScanPhase,
        error::JtagError,
        mock::{Call, MockTransport, RecordedShift},
    };

    fn handler(max_bits: usize) -> Handler<MockTransport> {
        let mut handler = Builder::new().build(MockTransport::new(max_bits)).unwrap();
        handler.initialize(false).unwrap();
        handler.transport_mut().calls.clear();
        handler
    }

    fn shifts(handler: &Handler<MockTransport>) -> Vec<RecordedShift> {
        handler
            .transport()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Shift(shift) => Some(shift.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rejects_shift_outside_shift_state() {
        let mut handler = handler(64);
        handler.set_tap_state(TapState::PauseDR).unwrap();
        handler.transport_mut().calls.clear();
        let result = handler.shift(8, Some(&[0xff]), None, TapState::RunTestIdle);
        assert!(matches!(
            result,
            Err(JtagError::NotInShiftState(TapState::PauseDR))
        ));
        assert!(handler.transport().calls.is_empty());
    }

    #[test]
    fn rejects_short_buffers_before_io() {
        let mut handler = handler(64);
        handler.set_tap_state(TapState::ShiftDR).unwrap();
        handler.transport_mut().calls.clear();
        assert!(matches!(
            handler.shift(17, Some(&[0, 0]), None, TapState::RunTestIdle),
            Err(JtagError::InvalidParameter(_))
        ));
        let mut out = [0u8; 1];
        assert!(matches!(
            handler.shift(9, None, Some(&mut out), TapState::RunTestIdle),
            Err(JtagError::InvalidParameter(_))
        ));
        assert!(handler.transport().calls.is_empty());
        assert_eq!(handler.active().phase, ScanPhase::Idle);
    }

    #[test]
    fn pre_padding_only_on_first_call_of_sequence() {
        let mut handler = handler(64);
        handler.set_padding(PaddingKind::IrPre, 3).unwrap();
        handler.set_tap_state(TapState::ShiftIR).unwrap();
        handler.transport_mut().calls.clear();

        handler
            .shift(4, Some(&[0x5]), None, TapState::ShiftIR)
            .unwrap();
        assert_eq!(handler.active().phase, ScanPhase::InProgress);
        handler
            .shift(4, Some(&[0xa]), None, TapState::UpdateIR)
            .unwrap();
        assert_eq!(handler.active().phase, ScanPhase::Idle);

        let shifts = shifts(&handler);
        assert_eq!(shifts.len(), 3);
        assert_eq!(shifts[0].write_bits, 3);
        assert_eq!(shifts[0].tdi, vec![0x07]);
        assert_eq!(shifts[0].end_state, TapState::ShiftIR);
        assert_eq!(shifts[1].tdi, vec![0x05]);
        assert!(!shifts[1].last_transaction);
        assert_eq!(shifts[2].end_state, TapState::UpdateIR);
        assert!(shifts[2].last_transaction);
        assert_eq!(handler.get_tap_state(), TapState::UpdateIR);
    }

    #[test]
    fn post_padding_closes_the_scan() {
        let mut handler = handler(64);
        handler.set_padding(PaddingKind::DrPost, 2).unwrap();
        handler.set_tap_state(TapState::ShiftDR).unwrap();
        handler.transport_mut().calls.clear();

        let mut out = [0u8; 1];
        handler
            .shift(8, Some(&[0x3c]), Some(&mut out), TapState::RunTestIdle)
            .unwrap();

        let shifts = shifts(&handler);
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[0].end_state, TapState::ShiftDR);
        assert_eq!(shifts[0].read_bits, 8);
        assert!(!shifts[0].last_transaction);
        assert_eq!(shifts[1].write_bits, 2);
        assert_eq!(shifts[1].tdi, vec![0x00]);
        assert_eq!(shifts[1].read_bits, 0);
        assert!(shifts[1].last_transaction);
        // the mock loops TDI back to TDO
        assert_eq!(out, [0x3c]);
        assert_eq!(handler.active().phase, ScanPhase::Idle);
    }

    #[test]
    fn staying_in_shift_skips_post_padding() {
        let mut handler = handler(64);
        handler.set_padding(PaddingKind::DrPost, 2).unwrap();
        handler.set_tap_state(TapState::ShiftDR).unwrap();
        handler.transport_mut().calls.clear();

        handler
            .shift(8, Some(&[0x3c]), None, TapState::ShiftDR)
            .unwrap();
        assert_eq!(shifts(&handler).len(), 1);
        assert_eq!(handler.active().phase, ScanPhase::InProgress);
    }

    #[test]
    fn output_only_shift_drives_no_tdi() {
        let mut handler = handler(16);
        handler.set_tap_state(TapState::ShiftDR).unwrap();
        handler.transport_mut().calls.clear();

        let mut out = [0xffu8; 3];
        handler
            .shift(20, None, Some(&mut out), TapState::Exit1DR)
            .unwrap();
        let shifts = shifts(&handler);
        assert_eq!(shifts.len(), 2);
        assert_eq!((shifts[0].write_bits, shifts[0].read_bits), (0, 16));
        assert_eq!((shifts[1].write_bits, shifts[1].read_bits), (0, 4));
        assert_eq!(out, [0, 0, 0]);
    }

    #[test]
    fn clock_only_shift_writes_zeros() {
        let mut handler = handler(64);
        handler.set_tap_state(TapState::ShiftIR).unwrap();
        handler.transport_mut().calls.clear();

        handler.shift(12, None, None, TapState::PauseIR).unwrap();
        let shifts = shifts(&handler);
        assert_eq!(shifts[0].write_bits, 12);
        assert_eq!(shifts[0].tdi, vec![0, 0]);
        assert_eq!(handler.get_tap_state(), TapState::PauseIR);
    }

    #[test]
    fn fused_padding_rides_on_first_and_last_chunk() {
        let mut handler = handler(8);
        handler.transport_mut().fused = true;
        handler.set_padding(PaddingKind::DrPre, 5).unwrap();
        handler.set_padding(PaddingKind::DrPost, 6).unwrap();
        handler.set_tap_state(TapState::ShiftDR).unwrap();
        handler.transport_mut().calls.clear();

        handler
            .shift(24, Some(&[1, 2, 3]), None, TapState::RunTestIdle)
            .unwrap();
        let shifts = shifts(&handler);
        assert_eq!(shifts.len(), 3);
        let padding: Vec<_> = shifts
            .iter()
            .map(|s| s.padding.map(|p| (p.pre, p.post)))
            .collect();
        assert_eq!(padding, vec![Some((5, 0)), None, Some((0, 6))]);
        assert_eq!(handler.active().phase, ScanPhase::Idle);
    }
}
