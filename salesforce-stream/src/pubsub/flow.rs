/// Tracks how many events have been requested but not yet delivered.
///
/// The window starts at the appetite. Every processed event shrinks it by
/// one; once it drops below the appetite a new fetch of exactly `appetite`
/// events is due and the window grows by the same amount, so the server
/// always has a full batch of credit outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    appetite: i32,
    requested: i32,
}

impl FlowControl {
    /// Creates a window for the initial fetch of `appetite` events.
    pub fn new(appetite: i32) -> Self {
        Self {
            appetite,
            requested: appetite,
        }
    }

    /// Batch size of every fetch request.
    pub fn appetite(&self) -> i32 {
        self.appetite
    }

    /// Events requested and not yet processed.
    pub fn requested(&self) -> i32 {
        self.requested
    }

    /// Records one processed event.
    ///
    /// Returns the number of events to request when the window needs
    /// replenishing.
    pub fn consume(&mut self) -> Option<i32> {
        self.requested = self.requested.saturating_sub(1).max(0);
        if self.requested < self.appetite {
            self.requested = self.requested.saturating_add(self.appetite);
            Some(self.appetite)
        } else {
            None
        }
    }
}
