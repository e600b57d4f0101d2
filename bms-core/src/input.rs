//! Power-button debouncing and the protection-cycle backstop timer. Both are
//! advanced by the UI tick.

/// Ticks the button must stay pressed before a release counts as a press.
pub const PRESS_TICKS: u16 = 3;
/// Ticks held before a long press is reported.
pub const LONG_PRESS_TICKS: u16 = 80;
/// Quiet ticks tolerated before the backstop forces a protection cycle.
pub const CHECKIN_TICKS: u16 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    None,
    ShortPress,
    /// Reported once while the button is still held.
    LongPress,
}

/// Turns the sampled button level into press events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonTracker {
    held: u16,
    long_reported: bool,
}

impl ButtonTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: 0,
            long_reported: false,
        }
    }

    /// Advances one tick with the current button level.
    pub fn tick(&mut self, pressed: bool) -> ButtonEvent {
        if pressed {
            self.held = self.held.saturating_add(1);
            if self.held > LONG_PRESS_TICKS && !self.long_reported {
                self.long_reported = true;
                return ButtonEvent::LongPress;
            }
            return ButtonEvent::None;
        }

        let event = if self.held > PRESS_TICKS && !self.long_reported {
            ButtonEvent::ShortPress
        } else {
            ButtonEvent::None
        };
        *self = Self::new();
        event
    }

    #[must_use]
    pub const fn held_ticks(&self) -> u16 {
        self.held
    }
}

/// Counts UI ticks since the last protection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckinTimer {
    ticks: u16,
}

impl CheckinTimer {
    #[must_use]
    pub const fn new() -> Self {
        Self { ticks: 0 }
    }

    /// Returns `true` once the count passes [`CHECKIN_TICKS`], restarting it.
    pub fn tick(&mut self) -> bool {
        self.ticks = self.ticks.saturating_add(1);
        if self.ticks > CHECKIN_TICKS {
            self.ticks = 0;
            return true;
        }
        false
    }

    /// Called whenever a protection cycle runs.
    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    #[must_use]
    pub const fn ticks(&self) -> u16 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(tracker: &mut ButtonTracker, ticks: u16) -> heapless::Vec<ButtonEvent, 4> {
        let mut events = heapless::Vec::new();
        for _ in 0..ticks {
            let event = tracker.tick(true);
            if event != ButtonEvent::None {
                events.push(event).expect("few events");
            }
        }
        events
    }

    #[test]
    fn bounce_is_ignored() {
        let mut tracker = ButtonTracker::new();
        assert!(hold(&mut tracker, PRESS_TICKS).is_empty());
        assert_eq!(tracker.tick(false), ButtonEvent::None);
    }

    #[test]
    fn short_press_reported_on_release() {
        let mut tracker = ButtonTracker::new();
        assert!(hold(&mut tracker, PRESS_TICKS + 1).is_empty());
        assert_eq!(tracker.tick(false), ButtonEvent::ShortPress);
        assert_eq!(tracker.held_ticks(), 0);
    }

    #[test]
    fn long_press_reported_once_while_held() {
        let mut tracker = ButtonTracker::new();
        let events = hold(&mut tracker, LONG_PRESS_TICKS + 20);
        assert_eq!(events.as_slice(), &[ButtonEvent::LongPress]);
        assert_eq!(tracker.tick(false), ButtonEvent::None, "no short press after a long one");
    }

    #[test]
    fn checkin_fires_after_quiet_period() {
        let mut timer = CheckinTimer::new();
        let fired = (0..=CHECKIN_TICKS).filter(|_| timer.tick()).count();
        assert_eq!(fired, 1);
        assert_eq!(timer.ticks(), 0);

        for _ in 0..CHECKIN_TICKS {
            assert!(!timer.tick());
        }
        timer.reset();
        assert!(!timer.tick());
    }
}
