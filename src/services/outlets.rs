//! Paired pump/aerator switching with read-after-write verification.

use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

use crate::powerstrip::{OutletId, OutletSwitch, PowerStripError, on_off};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletCommand {
    PumpOffAeratorOn,
    PumpOnAeratorOff,
}

impl OutletCommand {
    /// Target (pump, aerator) states.
    pub fn targets(self) -> (bool, bool) {
        match self {
            OutletCommand::PumpOffAeratorOn => (false, true),
            OutletCommand::PumpOnAeratorOff => (true, false),
        }
    }
}

impl std::fmt::Display for OutletCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (pump, aerator) = self.targets();
        write!(f, "pump {} / aerator {}", on_off(pump), on_off(aerator))
    }
}

pub struct OutletController<'a> {
    switch: &'a dyn OutletSwitch,
    pump: OutletId,
    aerator: OutletId,
    settle: Duration,
}

impl<'a> OutletController<'a> {
    pub fn new(switch: &'a dyn OutletSwitch, pump: OutletId, aerator: OutletId, settle: Duration) -> Self {
        OutletController {
            switch,
            pump,
            aerator,
            settle,
        }
    }

    /// Pump first, then aerator. The first failing write or read-back stops
    /// the pair and is returned.
    pub fn apply(&self, command: OutletCommand) -> Result<(), PowerStripError> {
        let (pump, aerator) = command.targets();
        info!("Outlets: switching {}", command);
        self.set_verified(self.pump, pump)?;
        self.set_verified(self.aerator, aerator)?;
        Ok(())
    }

    fn set_verified(&self, outlet: OutletId, state: bool) -> Result<(), PowerStripError> {
        self.switch.set_outlet(outlet, state)?;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        let actual = self.switch.get_outlet(outlet)?;
        if actual != state {
            return Err(PowerStripError::Mismatch {
                outlet,
                expected: state,
                actual,
            });
        }
        debug!("Outlets: outlet {} verified {}", outlet, on_off(actual));
        Ok(())
    }

    /// Log the current pump/aerator states; unreadable outlets show as `???`.
    pub fn log_states(&self) {
        let describe = |outlet: OutletId| match self.switch.get_outlet(outlet) {
            Ok(state) => on_off(state).to_string(),
            Err(e) => {
                warn!("Outlets: reading outlet {} failed: {}", outlet, e);
                "???".to_string()
            }
        };
        info!("Pump outlet:    {}", describe(self.pump));
        info!("Aerator outlet: {}", describe(self.aerator));
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeSwitch;
    use super::*;

    const PUMP: OutletId = OutletId(0);
    const AERATOR: OutletId = OutletId(1);

    #[test]
    fn switches_pump_then_aerator() {
        let switch = FakeSwitch::default();
        let ctl = OutletController::new(&switch, PUMP, AERATOR, Duration::ZERO);
        ctl.apply(OutletCommand::PumpOffAeratorOn).expect("apply");
        assert_eq!(*switch.writes.borrow(), vec![(PUMP, false), (AERATOR, true)]);
        assert_eq!(switch.state(PUMP), Some(false));
        assert_eq!(switch.state(AERATOR), Some(true));
    }

    #[test]
    fn mismatch_stops_the_pair() {
        let switch = FakeSwitch {
            stuck: vec![PUMP],
            ..FakeSwitch::default()
        };
        let ctl = OutletController::new(&switch, PUMP, AERATOR, Duration::ZERO);
        let err = ctl.apply(OutletCommand::PumpOnAeratorOff).unwrap_err();
        assert!(matches!(
            err,
            PowerStripError::Mismatch {
                outlet: PUMP,
                expected: true,
                actual: false
            }
        ));
        assert_eq!(*switch.writes.borrow(), vec![(PUMP, true)]);
    }

    #[test]
    fn unreachable_strip_is_an_error_not_a_panic() {
        let switch = FakeSwitch {
            unreachable: true,
            ..FakeSwitch::default()
        };
        let ctl = OutletController::new(&switch, PUMP, AERATOR, Duration::ZERO);
        assert!(matches!(
            ctl.apply(OutletCommand::PumpOffAeratorOn),
            Err(PowerStripError::Transport(_))
        ));
        ctl.log_states();
    }
}
