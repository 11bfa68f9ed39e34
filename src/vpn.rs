//! VPN service control and the poll that confirms its effect.
//!
//! Starting or stopping the service only tells us the command was accepted.
//! The tunnel is considered up once a point-to-point interface shows up in
//! the live interface table, and down once none is left.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub enum VpnState {
    #[default]
    Idle,
    Starting,
    Stopping,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum VpnDirection {
    Start,
    Stop,
}

impl VpnDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VpnDirection::Start => "start",
            VpnDirection::Stop => "stop",
        }
    }

    pub fn failure_verb(&self) -> &'static str {
        match self {
            VpnDirection::Start => "turned on",
            VpnDirection::Stop => "turned off",
        }
    }

    fn in_flight_state(&self) -> VpnState {
        match self {
            VpnDirection::Start => VpnState::Starting,
            VpnDirection::Stop => VpnState::Stopping,
        }
    }
}

impl fmt::Display for VpnDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VpnOutcome {
    TurnedOn,
    TurnedOff,
    TimedOut(VpnDirection),
}

#[derive(Clone, Debug)]
pub struct VpnMachine {
    state: VpnState,
    started: Option<Instant>,
    ceiling: Duration,
}

impl VpnMachine {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            state: VpnState::Idle,
            started: None,
            ceiling,
        }
    }

    pub fn state(&self) -> VpnState {
        self.state
    }

    pub fn is_polling(&self) -> bool {
        self.state != VpnState::Idle
    }

    /// Drops any in-flight poll. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        let was_polling = self.is_polling();
        self.state = VpnState::Idle;
        self.started = None;
        was_polling
    }

    /// Called once the service command for `direction` was accepted at `now`.
    pub fn begin(&mut self, direction: VpnDirection, now: Instant) {
        self.cancel();
        self.state = direction.in_flight_state();
        self.started = Some(now);
    }

    /// One poll tick at `now`. `tunnel_present` is whether a point-to-point
    /// interface exists right now. The ceiling is measured in wall-clock time
    /// from [`Self::begin`], so late ticks never stretch it.
    pub fn tick(&mut self, tunnel_present: bool, now: Instant) -> Option<VpnOutcome> {
        let direction = match self.state {
            VpnState::Idle => return None,
            VpnState::Starting => VpnDirection::Start,
            VpnState::Stopping => VpnDirection::Stop,
        };

        let outcome = match (direction, tunnel_present) {
            (VpnDirection::Start, true) => Some(VpnOutcome::TurnedOn),
            (VpnDirection::Stop, false) => Some(VpnOutcome::TurnedOff),
            _ => {
                let elapsed = self
                    .started
                    .map(|started| now.saturating_duration_since(started))
                    .unwrap_or_default();
                (elapsed >= self.ceiling).then_some(VpnOutcome::TimedOut(direction))
            }
        };

        if outcome.is_some() {
            self.cancel();
        }
        outcome
    }
}

/// Everything needed to drive the VPN service from the worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VpnControl {
    pub start_command: Vec<String>,
    pub stop_command: Vec<String>,
    pub config_path: std::path::PathBuf,
    pub staging_path: std::path::PathBuf,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl VpnControl {
    pub fn command(&self, direction: VpnDirection) -> &[String] {
        match direction {
            VpnDirection::Start => &self.start_command,
            VpnDirection::Stop => &self.stop_command,
        }
    }

    /// Whether the service tooling can be found at all.
    pub fn tooling_present(&self, elevation: &[String]) -> bool {
        elevation
            .first()
            .into_iter()
            .chain(self.start_command.first())
            .chain(self.stop_command.first())
            .all(|program| which::which(program).is_ok())
            && !self.start_command.is_empty()
            && !self.stop_command.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_secs(1);

    /// `n` poll steps after `start`.
    fn at(start: Instant, n: u32) -> Instant {
        start + STEP * n
    }

    #[test]
    fn test_start_succeeds_when_tunnel_appears() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(5));
        machine.begin(VpnDirection::Start, start);
        assert_eq!(machine.state(), VpnState::Starting);

        assert_eq!(machine.tick(false, at(start, 1)), None);
        assert_eq!(machine.tick(true, at(start, 2)), Some(VpnOutcome::TurnedOn));
        assert_eq!(machine.state(), VpnState::Idle);
        assert_eq!(machine.tick(true, at(start, 3)), None);
    }

    #[test]
    fn test_stop_succeeds_when_tunnel_disappears() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(5));
        machine.begin(VpnDirection::Stop, start);
        assert_eq!(machine.tick(true, at(start, 1)), None);
        assert_eq!(machine.tick(false, at(start, 2)), Some(VpnOutcome::TurnedOff));
        assert!(!machine.is_polling());
    }

    #[test]
    fn test_timeout_fires_once() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(3));
        machine.begin(VpnDirection::Start, start);
        let outcomes: Vec<_> = (1..=10)
            .filter_map(|n| machine.tick(false, at(start, n)))
            .collect();
        assert_eq!(outcomes, vec![VpnOutcome::TimedOut(VpnDirection::Start)]);
        assert_eq!(machine.state(), VpnState::Idle);
    }

    #[test]
    fn test_timeout_follows_wall_clock_not_tick_count() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(3));
        machine.begin(VpnDirection::Start, start);

        // A single late tick, e.g. after the worker was busy with a long write.
        assert_eq!(
            machine.tick(false, start + Duration::from_secs(10)),
            Some(VpnOutcome::TimedOut(VpnDirection::Start))
        );
    }

    #[test]
    fn test_new_request_restarts_clock() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(3));
        machine.begin(VpnDirection::Start, start);
        machine.tick(false, at(start, 1));
        machine.tick(false, at(start, 2));

        let restart = at(start, 2);
        machine.begin(VpnDirection::Stop, restart);
        assert_eq!(machine.state(), VpnState::Stopping);
        assert_eq!(machine.tick(true, at(restart, 1)), None);
        assert_eq!(machine.tick(true, at(restart, 2)), None);
        assert_eq!(
            machine.tick(true, at(restart, 3)),
            Some(VpnOutcome::TimedOut(VpnDirection::Stop))
        );
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut machine = VpnMachine::new(Duration::from_secs(3));
        assert!(!machine.cancel());
        machine.begin(VpnDirection::Start, start);
        assert!(machine.cancel());
        assert_eq!(machine.tick(true, at(start, 1)), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_tooling_present() {
        let mut control = VpnControl {
            start_command: vec!["sh".into(), "-c".into(), "true".into()],
            stop_command: vec!["sh".into()],
            config_path: "/tmp/client.conf".into(),
            staging_path: "/tmp/client.conf.tmp".into(),
            poll_interval: STEP,
            timeout: STEP,
        };
        assert!(control.tooling_present(&[]));
        control.stop_command = vec!["hostnet-no-such-service-tool".into()];
        assert!(!control.tooling_present(&[]));
    }
}
