//! Per-connection protocol timers.
//!
//! Each connection runs four independent timers: the acknowledgement
//! timer, the P-bit poll-cycle timer, the REJ-sent timer, and the
//! remote-busy timer. Starting a running timer restarts it; there is no
//! stacking. Expiry is observed by polling (`Connection::expired_timers`)
//! or by an external scheduler sleeping until `Connection::next_deadline`;
//! the engine itself never blocks.

use std::time::{Duration, Instant};

/// Which of the four connection timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Acknowledgement timer (sent data awaiting ack / delayed outbound ack).
    Ack,
    /// Poll-cycle timer (outstanding P-bit exchange).
    Poll,
    /// REJ-sent timer (awaiting retransmission after REJ).
    RejSent,
    /// Remote-busy timer (peer in receiver-not-ready).
    Busy,
}

/// One named timer: a running flag, a deadline, and its configured duration.
#[derive(Debug, Clone)]
pub struct LinkTimer {
    running: bool,
    expiry: Instant,
    duration: Duration,
}

impl LinkTimer {
    /// Create a stopped timer with the given expiry duration.
    pub fn new(duration: Duration) -> Self {
        Self {
            running: false,
            expiry: Instant::now(),
            duration,
        }
    }

    /// Start (or restart) the timer from now.
    pub fn start(&mut self) {
        self.expiry = Instant::now() + self.duration;
        self.running = true;
    }

    /// Start the timer only if it is not already running.
    pub fn start_if_idle(&mut self) {
        if !self.running {
            self.start();
        }
    }

    /// Stop the timer.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// True while started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True if running and past its deadline.
    pub fn is_expired(&self) -> bool {
        self.running && Instant::now() >= self.expiry
    }

    /// Time left until expiry, or `None` when stopped.
    pub fn remaining(&self) -> Option<Duration> {
        if !self.running {
            return None;
        }
        Some(self.expiry.saturating_duration_since(Instant::now()))
    }

    /// The deadline, or `None` when stopped.
    pub fn deadline(&self) -> Option<Instant> {
        self.running.then_some(self.expiry)
    }

    /// The configured expiry duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_stopped_by_default() {
        let t = LinkTimer::new(Duration::from_millis(50));
        assert!(!t.is_running());
        assert!(!t.is_expired());
        assert!(t.remaining().is_none());
        assert!(t.deadline().is_none());
    }

    #[test]
    fn test_timer_start_stop() {
        let mut t = LinkTimer::new(Duration::from_secs(60));
        t.start();
        assert!(t.is_running());
        assert!(!t.is_expired());
        assert!(t.remaining().unwrap() <= Duration::from_secs(60));

        t.stop();
        assert!(!t.is_running());
        assert!(!t.is_expired());
    }

    #[test]
    fn test_timer_expiry() {
        let mut t = LinkTimer::new(Duration::ZERO);
        t.start();
        assert!(t.is_expired());
        assert_eq!(t.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_timer_restart_replaces_deadline() {
        let mut t = LinkTimer::new(Duration::from_secs(60));
        t.start();
        let first = t.deadline().unwrap();
        t.start();
        assert!(t.deadline().unwrap() >= first);
        assert!(t.is_running());
    }

    #[test]
    fn test_start_if_idle() {
        let mut t = LinkTimer::new(Duration::from_secs(60));
        t.start();
        let first = t.deadline().unwrap();
        t.start_if_idle();
        // Unchanged: already running
        assert_eq!(t.deadline().unwrap(), first);
    }
}
