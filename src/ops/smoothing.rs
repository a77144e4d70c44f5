//! Drag-delta smoothing and the frame clock that throttles smoothed moves.

use std::collections::VecDeque;

pub const SMOOTHING_WINDOW: usize = 3;
/// Minimum time between two smoothed updates.
pub const MIN_UPDATE_INTERVAL_MS: f64 = 8.0;

/// Short queue of recent drag deltas, averaged with linearly increasing
/// weight towards the newest sample.
#[derive(Clone, Debug)]
pub struct MovementSmoother {
    samples: VecDeque<(f64, f64)>,
    capacity: usize,
}

impl Default for MovementSmoother {
    fn default() -> Self {
        Self::new(SMOOTHING_WINDOW)
    }
}

impl MovementSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, dx: f64, dy: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((dx, dy));
    }

    /// Weighted average; sample `i` (oldest first) has weight `(i + 1) / n`.
    pub fn smoothed(&self) -> (f64, f64) {
        let n = self.samples.len() as f64;
        if n == 0.0 {
            return (0.0, 0.0);
        }
        let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
        for (i, (dx, dy)) in self.samples.iter().enumerate() {
            let w = (i as f64 + 1.0) / n;
            sx += dx * w;
            sy += dy * w;
            total += w;
        }
        (sx / total, sy / total)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Routes drag deltas either straight through (direct mode) or through the
/// smoother, releasing at most one smoothed delta per
/// [`MIN_UPDATE_INTERVAL_MS`] of host frame time.
#[derive(Clone, Debug)]
pub struct MotionController {
    pub smooth: bool,
    smoother: MovementSmoother,
    interval_ms: f64,
    since_update_ms: f64,
    pending: bool,
}

impl Default for MotionController {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MotionController {
    pub fn new(smooth: bool) -> Self {
        Self {
            smooth,
            smoother: MovementSmoother::default(),
            interval_ms: MIN_UPDATE_INTERVAL_MS,
            since_update_ms: MIN_UPDATE_INTERVAL_MS,
            pending: false,
        }
    }

    /// Feed one drag delta.  Returns the delta to apply now, if any.
    pub fn push(&mut self, dx: f64, dy: f64) -> Option<(f64, f64)> {
        if !self.smooth {
            return Some((dx, dy));
        }
        self.smoother.push(dx, dy);
        self.pending = true;
        self.release()
    }

    /// Advance the clock by one host frame.  Returns a smoothed delta when
    /// one was held back by the throttle and the interval has now passed.
    pub fn tick(&mut self, dt_ms: f64) -> Option<(f64, f64)> {
        if dt_ms.is_finite() && dt_ms > 0.0 {
            self.since_update_ms += dt_ms;
        }
        self.release()
    }

    fn release(&mut self) -> Option<(f64, f64)> {
        if !self.pending || self.since_update_ms < self.interval_ms {
            return None;
        }
        self.pending = false;
        self.since_update_ms = 0.0;
        Some(self.smoother.smoothed())
    }

    /// Forget buffered samples (end of a drag).
    pub fn reset(&mut self) {
        self.smoother.clear();
        self.pending = false;
        self.since_update_ms = self.interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_smoother_is_still() {
        assert_eq!(MovementSmoother::default().smoothed(), (0.0, 0.0));
    }

    #[test]
    fn newest_samples_weigh_most() {
        let mut s = MovementSmoother::default();
        s.push(3.0, 0.0);
        s.push(6.0, 0.0);
        s.push(9.0, 3.0);
        // Weights 1/3, 2/3, 3/3 → (3 + 12 + 27) / 6 = 7.
        let (dx, dy) = s.smoothed();
        assert!((dx - 7.0).abs() < 1e-12);
        assert!((dy - 1.5).abs() < 1e-12);
    }

    #[test]
    fn oldest_sample_is_evicted_beyond_capacity() {
        let mut s = MovementSmoother::default();
        for dx in [100.0, 1.0, 1.0, 1.0] {
            s.push(dx, 0.0);
        }
        assert_eq!(s.len(), 3);
        assert!((s.smoothed().0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn direct_mode_passes_deltas_through() {
        let mut m = MotionController::new(false);
        assert_eq!(m.push(2.5, -1.0), Some((2.5, -1.0)));
        assert_eq!(m.push(0.1, 0.1), Some((0.1, 0.1)));
    }

    #[test]
    fn smooth_mode_is_rate_limited_by_tick() {
        let mut m = MotionController::new(true);
        assert_eq!(m.push(4.0, 0.0), Some((4.0, 0.0)));
        // Inside the interval: held back.
        assert_eq!(m.push(4.0, 0.0), None);
        assert_eq!(m.tick(5.0), None);
        assert_eq!(m.tick(3.0), Some((4.0, 0.0)));
        // Nothing pending, nothing released.
        assert_eq!(m.tick(20.0), None);
        m.reset();
        assert_eq!(m.push(1.0, 1.0), Some((1.0, 1.0)));
    }
}
