use crate::{
    chain::{self, MAX_SCAN_CHAINS, PaddingKind, PaddingLimits, ScanChain},
    error::{JtagError, Result},
    tap::{TapState, TmsSequence},
    transport::{ShiftMode, TapTransition, Transport},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_count: usize,
    /// Use hardware mode even when software mode is requested at initialization
    pub force_hardware: bool,
    pub dr_padding_max: u32,
    pub ir_padding_max: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_count: 1,
            force_hardware: false,
            dr_padding_max: 1024,
            ir_padding_max: 512,
        }
    }
}

/// Builder to create a [Handler] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use asd_jtag::Builder;
///
/// let handler = Builder::new()
///     .chain_count(2)
///     .force_hardware(true)
///     .build(my_transport)?;
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Number of scan chains addressable through this JTAG master.
    pub fn chain_count(mut self, count: usize) -> Self {
        self.config.chain_count = count;
        self
    }

    pub fn force_hardware(mut self, force: bool) -> Self {
        self.config.force_hardware = force;
        self
    }

    /// Set the largest DR and IR padding accepted by `set_padding`
    pub fn padding_limits(mut self, dr_max: u32, ir_max: u32) -> Self {
        self.config.dr_padding_max = dr_max;
        self.config.ir_padding_max = ir_max;
        self
    }

    /// Build and return the handler
    pub fn build<T: Transport>(self, transport: T) -> Result<Handler<T>> {
        Handler::new(transport, self.config)
    }
}

/// Owns the scan chains of one JTAG master and the transport driving it.
///
/// Not internally synchronized: one debug connection at a time, with
/// external locking if the handler is shared between threads.
#[derive(Debug)]
pub struct Handler<T: Transport> {
    pub(crate) transport: T,
    config: Config,
    pub(crate) chains: Vec<ScanChain>,
    pub(crate) active_chain: usize,
    pub(crate) mode: ShiftMode,
    initialized: bool,
    pub(crate) desynchronized: bool,
}

impl<T: Transport> Handler<T> {
    pub fn new(transport: T, config: Config) -> Result<Handler<T>> {
        if config.chain_count == 0 || config.chain_count > MAX_SCAN_CHAINS {
            return Err(JtagError::invalid(format!(
                "Chain count {} outside of 1..={}",
                config.chain_count, MAX_SCAN_CHAINS
            )));
        }
        let chains = vec![ScanChain::default(); config.chain_count];
        Ok(Handler {
            transport,
            config,
            chains,
            active_chain: 0,
            mode: ShiftMode::default(),
            initialized: false,
            desynchronized: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn mode(&self) -> ShiftMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn active_chain(&self) -> usize {
        self.active_chain
    }

    pub fn chain(&self, id: usize) -> Option<&ScanChain> {
        self.chains.get(id)
    }

    /// Acquire the transport, reset every chain's bookkeeping and force the
    /// TAP into Test-Logic-Reset.
    ///
    /// On failure the handler stays unusable until the next successful call.
    pub fn initialize(&mut self, software_mode: bool) -> Result<()> {
        if self.initialized {
            log::info!("Re-initializing {} transport", self.transport.name());
            self.deinitialize()?;
        }
        self.mode = if software_mode && !self.config.force_hardware {
            ShiftMode::Software
        } else {
            ShiftMode::Hardware
        };
        log::info!(
            "Initializing {} transport in {:?} mode",
            self.transport.name(),
            self.mode
        );
        if let Err(e) = self.transport.initialize(self.mode) {
            log::error!("{} initialize failed: {}", self.transport.name(), e);
            return Err(e.into());
        }
        self.reset_all_chains();
        self.initialized = true;
        self.desynchronized = false;
        self.tap_reset()
    }

    /// Release the transport. Calling this on an uninitialized handler is a no-op.
    pub fn deinitialize(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        log::info!("Deinitializing {} transport", self.transport.name());
        self.transport.deinitialize().map_err(|e| {
            log::error!("{} deinitialize failed: {}", self.transport.name(), e);
            e.into()
        })
    }

    pub fn reset_all_chains(&mut self) {
        for chain in self.chains.iter_mut() {
            chain.reset();
        }
        self.active_chain = 0;
    }

    pub fn set_active_chain(&mut self, id: usize) -> Result<()> {
        if id >= self.chains.len() {
            return Err(JtagError::invalid(format!(
                "Scan chain {} out of range, {} configured",
                id,
                self.chains.len()
            )));
        }
        log::debug!("Selecting scan chain {}", id);
        self.active_chain = id;
        Ok(())
    }

    pub fn set_padding(&mut self, kind: PaddingKind, bits: u32) -> Result<()> {
        let limits = PaddingLimits {
            dr_max: self.config.dr_padding_max,
            ir_max: self.config.ir_padding_max,
        };
        let active = self.active_chain;
        chain::apply_padding(&mut self.chains[active].padding, &limits, kind, bits)?;
        log::debug!("Chain {}: {} padding set to {} bits", active, kind, bits);
        Ok(())
    }

    /// The last confirmed state of the active chain. Never touches hardware.
    pub fn get_tap_state(&self) -> TapState {
        self.active().tap_state
    }

    pub fn tap_reset(&mut self) -> Result<()> {
        self.set_tap_state(TapState::TestLogicReset)
    }

    pub fn set_tap_state(&mut self, target: TapState) -> Result<()> {
        self.ensure_ready()?;
        let current = self.active().tap_state;
        if target != TapState::TestLogicReset && current == target {
            return Ok(());
        }
        let transition = TapTransition {
            from: current,
            to: target,
            tms: TmsSequence::between(current, target)?,
        };
        log::debug!(
            "TAP {} -> {}: {} clocks, tms=0x{:04x}",
            current,
            target,
            transition.tms.len(),
            transition.tms.bits()
        );
        if let Err(e) = self.transport.set_tap_state(&transition) {
            log::error!(
                "{} set_tap_state {} -> {} (tms=0x{:04x}, {} clocks) failed: {}",
                self.transport.name(),
                current,
                target,
                transition.tms.bits(),
                transition.tms.len(),
                e
            );
            self.desynchronized = true;
            return Err(e.into());
        }
        self.active_mut().tap_state = target;
        Ok(())
    }

    /// Clock TCK `cycles` times with TMS low.
    /// Only meaningful in Run-Test/Idle, Pause-DR or Pause-IR.
    pub fn wait_cycles(&mut self, cycles: u32) -> Result<()> {
        self.ensure_ready()?;
        if cycles == 0 {
            return Ok(());
        }
        let state = self.active().tap_state;
        if !matches!(
            state,
            TapState::RunTestIdle | TapState::PauseDR | TapState::PauseIR
        ) {
            log::warn!("Waiting {} cycles in {}", cycles, state);
        }
        log::debug!("Waiting {} TCK cycles in {}", cycles, state);
        self.transport.wait_cycles(cycles).map_err(|e| {
            log::error!(
                "{} wait_cycles({}) failed: {}",
                self.transport.name(),
                cycles,
                e
            );
            self.desynchronized = true;
            e.into()
        })
    }

    pub fn set_clock_rate(&mut self, rate: u32) -> Result<()> {
        self.ensure_ready()?;
        log::debug!("Setting TCK rate to {}", rate);
        self.transport.set_clock_rate(rate).map_err(|e| {
            log::error!(
                "{} set_clock_rate({}) failed: {}",
                self.transport.name(),
                rate,
                e
            );
            e.into()
        })
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if !self.initialized {
            return Err(JtagError::NotInitialized);
        }
        if self.desynchronized {
            return Err(JtagError::Desynchronized);
        }
        Ok(())
    }

    pub(crate) fn active(&self) -> &ScanChain {
        &self.chains[self.active_chain]
    }

    pub(crate) fn active_mut(&mut self) -> &mut ScanChain {
        &mut self.chains[self.active_chain]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::ScanPhase;
    use crate::mock::{Call, MockTransport};

    fn handler() -> Handler<MockTransport> {
        let mut handler = Builder::new()
            .chain_count(2)
            .build(MockTransport::new(64))
            .unwrap();
        handler.initialize(false).unwrap();
        handler.transport_mut().calls.clear();
        handler
    }

    #[test]
    fn rejects_bad_chain_count() {
        assert!(Builder::new().chain_count(0).build(MockTransport::new(8)).is_err());
        assert!(
            Builder::new()
                .chain_count(MAX_SCAN_CHAINS + 1)
                .build(MockTransport::new(8))
                .is_err()
        );
    }

    #[test]
    fn operations_require_initialize() {
        let mut handler = Handler::new(MockTransport::new(8), Config::default()).unwrap();
        assert!(matches!(
            handler.set_tap_state(TapState::RunTestIdle),
            Err(JtagError::NotInitialized)
        ));
        assert!(handler.transport().calls.is_empty());
    }

    #[test]
    fn initialize_resets_tap() {
        let mut handler = Handler::new(MockTransport::new(8), Config::default()).unwrap();
        handler.initialize(true).unwrap();
        assert_eq!(handler.mode(), ShiftMode::Software);
        assert_eq!(
            handler.transport().calls,
            vec![
                Call::Initialize(ShiftMode::Software),
                Call::SetTapState(TmsSequence::reset())
            ]
        );
        assert_eq!(handler.get_tap_state(), TapState::TestLogicReset);
    }

    #[test]
    fn force_hardware_overrides_software_request() {
        let mut handler = Builder::new()
            .force_hardware(true)
            .build(MockTransport::new(8))
            .unwrap();
        handler.initialize(true).unwrap();
        assert_eq!(handler.mode(), ShiftMode::Hardware);
    }

    #[test]
    fn failed_initialize_leaves_handler_unusable() {
        let mut transport = MockTransport::new(8);
        transport.fail_initialize = true;
        let mut handler = Handler::new(transport, Config::default()).unwrap();
        assert!(matches!(
            handler.initialize(false),
            Err(JtagError::Transport(_))
        ));
        assert!(!handler.is_initialized());
        assert!(matches!(handler.tap_reset(), Err(JtagError::NotInitialized)));
    }

    #[test]
    fn same_state_is_a_no_op() {
        let mut handler = handler();
        handler.set_tap_state(TapState::RunTestIdle).unwrap();
        handler.set_tap_state(TapState::RunTestIdle).unwrap();
        assert_eq!(handler.transport().calls.len(), 1);

        // reset is always driven
        handler.tap_reset().unwrap();
        handler.tap_reset().unwrap();
        assert_eq!(handler.transport().calls.len(), 3);
    }

    #[test]
    fn active_chain_selects_bookkeeping() {
        let mut handler = handler();
        handler.set_tap_state(TapState::ShiftIR).unwrap();
        handler.set_active_chain(1).unwrap();
        assert_eq!(handler.get_tap_state(), TapState::TestLogicReset);
        handler.set_padding(PaddingKind::IrPost, 7).unwrap();
        assert_eq!(handler.chain(1).unwrap().padding.ir_post, 7);
        assert_eq!(handler.chain(0).unwrap().padding.ir_post, 0);
        assert!(handler.set_active_chain(2).is_err());
        assert_eq!(handler.active_chain(), 1);
        handler.set_active_chain(0).unwrap();
        assert_eq!(handler.get_tap_state(), TapState::ShiftIR);
    }

    #[test]
    fn oversized_padding_keeps_previous_value() {
        let mut handler = handler();
        handler.set_padding(PaddingKind::DrPre, 16).unwrap();
        assert!(matches!(
            handler.set_padding(PaddingKind::DrPre, 1025),
            Err(JtagError::InvalidParameter(_))
        ));
        assert_eq!(handler.chain(0).unwrap().padding.dr_pre, 16);
    }

    #[test]
    fn failed_transition_desynchronizes() {
        let mut handler = handler();
        handler.transport_mut().fail_after = Some(0);
        assert!(matches!(
            handler.set_tap_state(TapState::ShiftDR),
            Err(JtagError::Transport(_))
        ));
        assert_eq!(handler.get_tap_state(), TapState::TestLogicReset);
        handler.transport_mut().fail_after = None;
        assert!(matches!(
            handler.set_tap_state(TapState::RunTestIdle),
            Err(JtagError::Desynchronized)
        ));

        handler.deinitialize().unwrap();
        handler.initialize(false).unwrap();
        handler.set_tap_state(TapState::RunTestIdle).unwrap();
    }

    #[test]
    fn initialize_clears_chain_state() {
        let mut handler = handler();
        handler.set_active_chain(1).unwrap();
        handler.set_padding(PaddingKind::DrPre, 3).unwrap();
        handler.chains[1].phase = ScanPhase::InProgress;
        handler.initialize(false).unwrap();
        assert_eq!(handler.active_chain(), 0);
        assert_eq!(handler.chain(1).unwrap(), &ScanChain::default());
    }

    #[test]
    fn wait_cycles_skips_zero() {
        let mut handler = handler();
        handler.set_tap_state(TapState::RunTestIdle).unwrap();
        handler.wait_cycles(0).unwrap();
        handler.wait_cycles(300).unwrap();
        assert_eq!(handler.transport().calls.last(), Some(&Call::WaitCycles(300)));
        assert_eq!(handler.transport().calls.len(), 2);
    }
}
