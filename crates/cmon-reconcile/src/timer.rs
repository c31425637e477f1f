use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed(Instant),
}

/// Single-deadline debounce timer. Re-arming only ever pulls the deadline
/// earlier; firing returns it to idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoalescingTimer {
    due_at: Option<Instant>,
}

impl CoalescingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TimerState {
        match self.due_at {
            Some(due_at) => TimerState::Armed(due_at),
            None => TimerState::Idle,
        }
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.due_at
    }

    /// Requests a fire at `now + delay`. Returns true when the deadline moved.
    pub fn arm(&mut self, now: Instant, delay: Duration) -> bool {
        let requested = now + delay;
        match self.due_at {
            Some(due_at) if requested >= due_at => false,
            _ => {
                self.due_at = Some(requested);
                true
            }
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.due_at.is_some_and(|due_at| due_at <= now)
    }

    /// Consumes the deadline if it has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.due_at = None;
        true
    }

    pub fn cancel(&mut self) {
        self.due_at = None;
    }
}
