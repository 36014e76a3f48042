use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of "now" for the capture loop. Injected so cooldowns can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum GateState {
    Idle,
    Cooling { last_fire: DateTime<Utc> },
}

/// Promotes motion detections to events, at most one per cooldown window.
#[derive(Debug, Clone)]
pub struct EventGate {
    cooldown: Duration,
    state: GateState,
}

impl EventGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: GateState::Idle,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Feed one frame-pair outcome. Returns `true` when this detection should become an event.
    pub fn observe(&mut self, detected: bool, now: DateTime<Utc>) -> bool {
        if !detected {
            return false;
        }
        let open = match self.state {
            GateState::Idle => true,
            // A clock stepping backwards keeps the gate closed rather than re-firing
            GateState::Cooling { last_fire } => (now - last_fire)
                .to_std()
                .map(|elapsed| elapsed > self.cooldown)
                .unwrap_or(false),
        };
        if open {
            self.state = GateState::Cooling { last_fire: now };
        }
        open
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{Clock, EventGate, GateState};

    /// Clock that moves forward by a fixed step each time it is read
    pub(crate) struct SteppingClock {
        start: DateTime<Utc>,
        step_ms: i64,
        reads: AtomicI64,
    }

    impl SteppingClock {
        pub(crate) fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                start,
                step_ms: step.as_millis() as i64,
                reads: AtomicI64::new(0),
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            self.start + chrono::Duration::milliseconds(n * self.step_ms)
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_fires_once_per_cooldown() {
        let mut gate = EventGate::new(Duration::from_secs(5));
        let fired: Vec<bool> = [0, 1, 2].iter().map(|&t| gate.observe(true, at(t))).collect();
        assert_eq!(fired, vec![true, false, false]);
        assert!(gate.observe(true, at(6)));
        assert_eq!(gate.state(), GateState::Cooling { last_fire: at(6) });
    }

    #[test]
    fn test_cooldown_is_exclusive() {
        let mut gate = EventGate::new(Duration::from_secs(5));
        assert!(gate.observe(true, at(0)));
        assert!(!gate.observe(true, at(5)));
        assert!(gate.observe(true, at(5) + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_no_motion_never_changes_state() {
        let mut gate = EventGate::new(Duration::from_secs(5));
        assert!(!gate.observe(false, at(0)));
        assert_eq!(gate.state(), GateState::Idle);
        assert!(gate.observe(true, at(1)));
        for t in 2..20 {
            assert!(!gate.observe(false, at(t)));
        }
        assert_eq!(gate.state(), GateState::Cooling { last_fire: at(1) });
    }

    #[test]
    fn test_continuous_motion() {
        // 10 fps of uninterrupted motion for 30s with a 5s cooldown
        let mut gate = EventGate::new(Duration::from_secs(5));
        let start = at(0);
        let fires = (0..300)
            .filter(|i| gate.observe(true, start + chrono::Duration::milliseconds(i * 100)))
            .count();
        // t = 0, 5.1, 10.2, 15.3, 20.4, 25.5
        assert_eq!(fires, 6);
    }

    #[test]
    fn test_clock_going_backwards() {
        let mut gate = EventGate::new(Duration::from_secs(1));
        assert!(gate.observe(true, at(10)));
        assert!(!gate.observe(true, at(3)));
    }

    #[test]
    fn test_stepping_clock() {
        let clock = SteppingClock::new(at(0), Duration::from_secs(1));
        assert_eq!(clock.now(), at(0));
        assert_eq!(clock.now(), at(1));
        assert_eq!(clock.now(), at(2));
    }
}
