//! Edge Detection
//!
//! A hysteretic comparator turning a continuous voltage into a binary clock
//! state plus rising/falling edge events. Every transformer in the crate is
//! fed from one of these.

/// Result of classifying one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edge {
    /// Current binary state after this sample
    pub high: bool,
    /// True only on the sample where the state went low → high
    pub rose: bool,
    /// True only on the sample where the state went high → low
    pub fell: bool,
}

/// Schmitt trigger with separate low and high thresholds.
///
/// The state switches high once the input meets or exceeds `high`, and low
/// once it drops to or below `low`. Values in between leave it unchanged.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    low: f64,
    high: f64,
    state: bool,
}

impl EdgeDetector {
    /// Default thresholds for clock and gate inputs
    pub const LOW_THRESHOLD: f64 = 0.1;
    pub const HIGH_THRESHOLD: f64 = 2.0;

    pub fn new() -> Self {
        Self::with_thresholds(Self::LOW_THRESHOLD, Self::HIGH_THRESHOLD)
    }

    /// Create a detector with explicit thresholds. A reversed pair is swapped.
    pub fn with_thresholds(low: f64, high: f64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            low,
            high,
            state: false,
        }
    }

    /// Classify one sample
    #[inline]
    pub fn process(&mut self, value: f64) -> Edge {
        let was_high = self.state;
        if value >= self.high {
            self.state = true;
        } else if value <= self.low {
            self.state = false;
        }
        Edge {
            high: self.state,
            rose: !was_high && self.state,
            fell: was_high && !self.state,
        }
    }

    pub fn is_high(&self) -> bool {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = false;
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rise_and_fall_reported_once() {
        let mut det = EdgeDetector::new();

        let e = det.process(10.0);
        assert!(e.high && e.rose && !e.fell);

        let e = det.process(10.0);
        assert!(e.high && !e.rose && !e.fell);

        let e = det.process(0.0);
        assert!(!e.high && !e.rose && e.fell);

        let e = det.process(0.0);
        assert_eq!(e, Edge::default());
    }

    #[test]
    fn test_hysteresis_band_holds_state() {
        let mut det = EdgeDetector::new();

        // Between thresholds: stays low
        assert!(!det.process(1.0).high);

        // Exactly at the high threshold switches
        assert!(det.process(2.0).rose);

        // Dropping into the band keeps it high
        let e = det.process(0.5);
        assert!(e.high && !e.fell);

        // Exactly at the low threshold switches
        assert!(det.process(0.1).fell);
    }

    #[test]
    fn test_swapped_thresholds() {
        let mut det = EdgeDetector::with_thresholds(5.0, 1.0);
        assert!(!det.process(3.0).high);
        assert!(det.process(5.0).rose);
        assert!(det.process(1.0).fell);
    }

    #[test]
    fn test_reset_returns_low() {
        let mut det = EdgeDetector::new();
        det.process(10.0);
        det.reset();
        assert!(!det.is_high());
        assert!(det.process(10.0).rose);
    }
}
