#![forbid(unsafe_code)]

use std::time::Duration;

use tokio::time::Instant;

/// Scroll geometry of the list container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self { Self { scroll_top, scroll_height, client_height } }

    /// Fraction of the content scrolled past, counting the visible part.
    /// Content that fits entirely on screen counts as fully scrolled.
    pub fn progress(&self) -> f64 {
        if self.scroll_height <= 0.0 || self.scroll_height <= self.client_height { return 1.0; }
        ((self.scroll_top + self.client_height) / self.scroll_height).clamp(0.0, 1.0)
    }
}

/// Decides whether a scroll event may start a fetch.
#[derive(Debug, Clone)]
pub struct ScrollGate {
    threshold: f64,
    min_interval: Duration,
    last_trigger: Option<Instant>,
}

impl ScrollGate {
    pub fn new(threshold: f64, min_interval: Duration) -> Self { Self { threshold, min_interval, last_trigger: None } }

    pub fn last_trigger(&self) -> Option<Instant> { self.last_trigger }

    /// True when past the threshold, more rows exist, nothing is in flight
    /// and the minimum interval since the last trigger has elapsed. The
    /// trigger time is recorded only when this returns true.
    pub fn check(&mut self, m: &ScrollMetrics, has_more: bool, in_flight: bool, now: Instant) -> bool {
        if !has_more || in_flight || m.progress() < self.threshold { return false; }
        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.min_interval { return false; }
        }
        self.last_trigger = Some(now);
        true
    }

    pub fn reset(&mut self) { self.last_trigger = None; }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTTOM: ScrollMetrics = ScrollMetrics { scroll_top: 960.0, scroll_height: 1600.0, client_height: 600.0 };

    #[test]
    fn progress_counts_the_viewport() {
        assert!((BOTTOM.progress() - 0.975).abs() < 1e-9);
        assert_eq!(ScrollMetrics::new(0.0, 400.0, 600.0).progress(), 1.0);
        assert!(ScrollMetrics::new(0.0, 2000.0, 600.0).progress() < 0.95);
    }

    #[test]
    fn gate_requires_threshold_more_rows_and_idle() {
        let now = Instant::now();
        let mut g = ScrollGate::new(0.95, Duration::from_millis(2000));
        assert!(!g.check(&ScrollMetrics::new(100.0, 1600.0, 600.0), true, false, now));
        assert!(!g.check(&BOTTOM, false, false, now));
        assert!(!g.check(&BOTTOM, true, true, now));
        assert_eq!(g.last_trigger(), None, "refusals never arm the interval");
        assert!(g.check(&BOTTOM, true, false, now));
    }

    #[test]
    fn gate_enforces_minimum_interval() {
        let t0 = Instant::now();
        let mut g = ScrollGate::new(0.95, Duration::from_millis(2000));
        assert!(g.check(&BOTTOM, true, false, t0));
        assert!(!g.check(&BOTTOM, true, false, t0 + Duration::from_millis(1999)));
        assert!(g.check(&BOTTOM, true, false, t0 + Duration::from_millis(2000)));
        g.reset();
        assert!(g.check(&BOTTOM, true, false, t0 + Duration::from_millis(2001)));
    }
}
