//! Trip and clear detectors used by the fault pairs.
//!
//! A qualifier answers a single question each protection cycle: has the entry
//! (latch) or exit (clear) criterion of a fault been met on this sample? The
//! three concrete detectors mirror the signal sources available to the
//! controller: latched AFE status bits, MCU-side threshold comparisons with a
//! consecutive-sample debounce, and an externally supplied reset request.

use core::fmt;

use crate::afe::StatusSnapshot;

/// Detector that can move a fault from `Cleared` to `Tripped`.
pub trait LatchQualifier {
    /// Per-cycle input consulted by the detector.
    type Sample: Copy;

    /// Returns `true` when the latch criterion is met on this sample.
    fn latch(&mut self, sample: Self::Sample) -> bool;
}

/// Detector that can move a fault from `Tripped` back to `Cleared`.
pub trait ClearQualifier {
    /// Per-cycle input consulted by the detector.
    type Sample: Copy;

    /// Returns `true` when the clear criterion is met on this sample.
    fn clear(&mut self, sample: Self::Sample) -> bool;
}

/// Comparison direction for threshold qualifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Condition holds while `sample > threshold`.
    Rising,
    /// Condition holds while `sample < threshold`.
    Falling,
}

impl Polarity {
    /// Evaluates the condition for a single sample.
    #[must_use]
    pub fn holds<T: PartialOrd>(self, sample: T, threshold: T) -> bool {
        match self {
            Polarity::Rising => sample > threshold,
            Polarity::Falling => sample < threshold,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Polarity::Rising => "rising",
            Polarity::Falling => "falling",
        })
    }
}

/// Stateless detector for a single status-register bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeQualifier {
    bit: u8,
}

impl AfeQualifier {
    #[must_use]
    pub const fn new(bit: u8) -> Self {
        Self { bit }
    }

    /// Bit index into the status snapshot.
    #[must_use]
    pub const fn bit(&self) -> u8 {
        self.bit
    }

    /// Returns `true` iff the configured bit is set in `snapshot`.
    #[must_use]
    pub const fn evaluate(&self, snapshot: StatusSnapshot) -> bool {
        snapshot.is_set(self.bit)
    }
}

impl LatchQualifier for AfeQualifier {
    type Sample = StatusSnapshot;

    fn latch(&mut self, sample: Self::Sample) -> bool {
        self.evaluate(sample)
    }
}

/// Threshold comparison with a consecutive-sample debounce counter.
///
/// The condition must hold for `limit + 1` consecutive samples before the
/// qualifier fires; any out-of-condition sample resets the counter. Firing
/// also resets the counter, so a persistent condition fires again only after
/// another `limit + 1` samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct McuQualifier<T> {
    polarity: Polarity,
    value: T,
    threshold: T,
    count: u16,
    limit: u16,
}

impl<T> McuQualifier<T>
where
    T: Copy + PartialOrd,
{
    /// Creates a qualifier with an empty counter. The stored sample starts at
    /// the threshold, which never satisfies either polarity.
    #[must_use]
    pub const fn new(polarity: Polarity, threshold: T, limit: u16) -> Self {
        Self {
            polarity,
            value: threshold,
            threshold,
            count: 0,
            limit,
        }
    }

    /// Loads `sample`, updates the counter, and reports whether the qualifier fired.
    pub fn evaluate(&mut self, sample: T) -> bool {
        self.value = sample;

        if self.polarity.holds(sample, self.threshold) {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }

        if self.count > self.limit {
            self.count = 0;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn polarity(&self) -> Polarity {
        self.polarity
    }

    #[must_use]
    pub const fn threshold(&self) -> T {
        self.threshold
    }

    #[must_use]
    pub const fn limit(&self) -> u16 {
        self.limit
    }

    /// Consecutive in-condition samples seen since the last reset.
    #[must_use]
    pub const fn count(&self) -> u16 {
        self.count
    }

    /// Most recent sample handed to [`McuQualifier::evaluate`].
    #[must_use]
    pub const fn value(&self) -> T {
        self.value
    }
}

impl<T> LatchQualifier for McuQualifier<T>
where
    T: Copy + PartialOrd,
{
    type Sample = T;

    fn latch(&mut self, sample: Self::Sample) -> bool {
        self.evaluate(sample)
    }
}

impl<T> ClearQualifier for McuQualifier<T>
where
    T: Copy + PartialOrd,
{
    type Sample = T;

    fn clear(&mut self, sample: Self::Sample) -> bool {
        self.evaluate(sample)
    }
}

/// Retry budget attached to an auto/user-reset qualifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryLimit {
    Count(u8),
    Unlimited,
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryLimit::Count(count) => write!(f, "{count}X"),
            RetryLimit::Unlimited => f.write_str("IX"),
        }
    }
}

/// Auto-retry / user-reset clear detector.
///
/// The clear decision comes from the caller's `clear_requested` flag (a long
/// press of the power button). The retry bookkeeping is carried so that the
/// persisted profile can populate it, but no automatic retry timing is run
/// against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetQualifier {
    auto_retry: bool,
    interval_count: u16,
    interval_limit: u16,
    retry_count: u8,
    retry_limit: RetryLimit,
    needs_user_reset: bool,
}

impl ResetQualifier {
    #[must_use]
    pub const fn new(auto_retry: bool, interval_limit: u16, retry_limit: RetryLimit) -> Self {
        Self {
            auto_retry,
            interval_count: 0,
            interval_limit,
            retry_count: 0,
            retry_limit,
            needs_user_reset: !auto_retry,
        }
    }

    /// Qualifier that clears only on an explicit user request.
    #[must_use]
    pub const fn user_only() -> Self {
        Self::new(false, 0, RetryLimit::Count(0))
    }

    #[must_use]
    pub const fn auto_retry(&self) -> bool {
        self.auto_retry
    }

    #[must_use]
    pub const fn interval_count(&self) -> u16 {
        self.interval_count
    }

    #[must_use]
    pub const fn interval_limit(&self) -> u16 {
        self.interval_limit
    }

    #[must_use]
    pub const fn retry_count(&self) -> u8 {
        self.retry_count
    }

    #[must_use]
    pub const fn retry_limit(&self) -> RetryLimit {
        self.retry_limit
    }

    #[must_use]
    pub const fn needs_user_reset(&self) -> bool {
        self.needs_user_reset
    }
}

impl ClearQualifier for ResetQualifier {
    type Sample = bool;

    fn clear(&mut self, clear_requested: bool) -> bool {
        clear_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afe_qualifier_tracks_single_bit() {
        let qualifier = AfeQualifier::new(2);
        assert!(qualifier.evaluate(StatusSnapshot::from_raw(0b0000_0100)));
        assert!(!qualifier.evaluate(StatusSnapshot::from_raw(0b1111_1011)));
    }

    #[test]
    fn afe_qualifier_ignores_out_of_range_bit() {
        let qualifier = AfeQualifier::new(9);
        assert!(!qualifier.evaluate(StatusSnapshot::from_raw(0xFF)));
    }

    #[test]
    fn falling_qualifier_needs_limit_plus_one_samples() {
        let mut qualifier = McuQualifier::new(Polarity::Falling, -3554_i16, 3);
        let fired: [bool; 4] = core::array::from_fn(|_| qualifier.evaluate(-4000));
        assert_eq!(fired, [false, false, false, true]);
        assert_eq!(qualifier.count(), 0, "counter resets after firing");
        assert_eq!(qualifier.value(), -4000);
    }

    #[test]
    fn out_of_condition_sample_resets_counter() {
        let mut qualifier = McuQualifier::new(Polarity::Falling, -3554_i16, 3);
        for sample in [-4000, -4000, -1000, -4000] {
            assert!(!qualifier.evaluate(sample));
        }
        assert_eq!(qualifier.count(), 1);
    }

    #[test]
    fn zero_limit_fires_on_first_in_condition_sample() {
        let mut qualifier = McuQualifier::new(Polarity::Rising, 100_u16, 0);
        assert!(!qualifier.evaluate(100), "equal sample is not in condition");
        assert!(qualifier.evaluate(101));
        assert!(qualifier.evaluate(101));
    }

    #[test]
    fn reset_qualifier_passes_request_through() {
        let mut qualifier = ResetQualifier::new(true, 40, RetryLimit::Count(3));
        assert!(!qualifier.clear(false));
        assert!(qualifier.clear(true));
        assert_eq!(qualifier.retry_count(), 0);
        assert!(!qualifier.needs_user_reset());
        assert!(ResetQualifier::user_only().needs_user_reset());
    }
}
