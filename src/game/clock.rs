//! Game Clock
//!
//! Two countdown clocks, one running at a time. All readings take an
//! explicit `now` so sessions can be driven deterministically in tests.

use chrono::{DateTime, TimeDelta, Utc};

use super::state::{Color, GameMode};

/// Per-side countdown clock.
#[derive(Debug, Clone)]
pub struct GameClock {
    remaining: [TimeDelta; 2],
    running: Option<(Color, DateTime<Utc>)>,
}

impl GameClock {
    /// Both sides start with the mode's allowance.
    pub fn new(mode: GameMode) -> Self {
        let allowance = TimeDelta::seconds(mode.clock_seconds());
        Self {
            remaining: [allowance, allowance],
            running: None,
        }
    }

    /// Start `color`'s clock.
    pub fn start(&mut self, color: Color, now: DateTime<Utc>) {
        self.running = Some((color, now));
    }

    /// Stop the running clock and start the other side's.
    pub fn press(&mut self, now: DateTime<Utc>) {
        if let Some((color, _)) = self.running {
            self.stop(now);
            self.start(color.opposite(), now);
        }
    }

    /// Stop the running clock, charging its elapsed time.
    pub fn stop(&mut self, now: DateTime<Utc>) {
        if let Some((color, since)) = self.running.take() {
            let elapsed = (now - since).max(TimeDelta::zero());
            let slot = &mut self.remaining[color.index()];
            *slot = (*slot - elapsed).max(TimeDelta::zero());
        }
    }

    /// Side whose clock is running.
    pub fn running(&self) -> Option<Color> {
        self.running.map(|(color, _)| color)
    }

    /// Time left for `color` as of `now`.
    pub fn remaining(&self, color: Color, now: DateTime<Utc>) -> TimeDelta {
        let base = self.remaining[color.index()];
        match self.running {
            Some((running, since)) if running == color => {
                (base - (now - since).max(TimeDelta::zero())).max(TimeDelta::zero())
            }
            _ => base,
        }
    }

    /// Whether `color` has run out, allowing `tolerance` of slack.
    pub fn has_flagged(&self, color: Color, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
        let over = self.remaining[color.index()];
        match self.running {
            Some((running, since)) if running == color => now - since >= over + tolerance,
            _ => over <= TimeDelta::zero(),
        }
    }
}
