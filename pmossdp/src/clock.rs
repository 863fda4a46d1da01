//! Source de temps du scheduler

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Horloge monotone injectée dans le [`crate::ClientContext`]
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Horloge système (`Instant::now`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Horloge du runtime tokio.
///
/// Suit le temps virtuel de tokio quand il est mis en pause
/// (`start_paused`), ce qui permet de piloter [`crate::Scheduler::run`] en test.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Horloge simulée, avancée à la main.
///
/// Les clones partagent le même instant courant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Positionne l'horloge sur `instant` (ignoré s'il est dans le passé)
    pub fn advance_to(&self, instant: Instant) {
        if instant > self.now.get() {
            self.now.set(instant);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared_and_monotonic() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        let start = clock.now();

        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));

        clock.advance_to(start);
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }
}
