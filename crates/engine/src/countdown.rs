use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Armed,
    Fired,
    Cancelled,
}

impl CountdownState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Armed => "armed",
            Self::Fired => "fired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A one-shot deadline polled from a cooperative tick.
///
/// The countdown fires at most once. Both `poll` after firing and `cancel`
/// after firing or cancelling are no-ops.
#[derive(Debug, Clone)]
pub struct Countdown {
    started_at: Duration,
    deadline: Duration,
    state: CountdownState,
}

impl Countdown {
    /// Arm at `now`. A window past the clock's range never fires.
    pub fn start(now: Duration, window: Duration) -> Self {
        Self {
            started_at: now,
            deadline: now.checked_add(window).unwrap_or(Duration::MAX),
            state: CountdownState::Armed,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn started_at(&self) -> Duration {
        self.started_at
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Time left before firing; zero once fired or cancelled.
    pub fn remaining(&self, now: Duration) -> Duration {
        match self.state {
            CountdownState::Armed => self.deadline.saturating_sub(now),
            CountdownState::Fired | CountdownState::Cancelled => Duration::ZERO,
        }
    }

    /// Returns true on the first poll at or past the deadline.
    pub fn poll(&mut self, now: Duration) -> bool {
        if self.state == CountdownState::Armed && now >= self.deadline {
            self.state = CountdownState::Fired;
            return true;
        }
        false
    }

    /// Returns true if this call disarmed the countdown.
    pub fn cancel(&mut self) -> bool {
        if self.state == CountdownState::Armed {
            self.state = CountdownState::Cancelled;
            return true;
        }
        false
    }
}
