/// Time constant used for per-transfer smoothing; roughly a 30 sample window
/// at one sample per second.
pub const DEFAULT_TAU_SECS: f64 = 15.0;

/// Exponentially weighted moving average of a byte rate.
///
/// While the average is zero a new sample replaces it outright.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    tau_secs: f64,
    smoothed_bps: f64,
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_TAU_SECS)
    }
}

impl MovingAverage {
    pub fn new(tau_secs: f64) -> Self {
        Self { tau_secs, smoothed_bps: 0.0 }
    }

    /// Fold `bytes_delta` bytes observed over `dt_secs` into the average.
    pub fn update(&mut self, bytes_delta: u64, dt_secs: f64) -> f64 {
        let dt = dt_secs.max(1e-3);
        let inst = (bytes_delta as f64) / dt;
        self.add(inst, dt)
    }

    /// Fold an instantaneous rate that was measured over `dt_secs`.
    pub fn add(&mut self, rate: f64, dt_secs: f64) -> f64 {
        if self.smoothed_bps == 0.0 {
            self.smoothed_bps = rate;
            return self.smoothed_bps;
        }
        let alpha = 1.0 - (-dt_secs.max(1e-3) / self.tau_secs).exp();
        self.smoothed_bps = self.smoothed_bps * (1.0 - alpha) + rate * alpha;
        self.smoothed_bps
    }

    pub fn value(&self) -> f64 {
        self.smoothed_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_smooths_rate() {
        let mut avg = MovingAverage::new(5.0);
        // 1000 bytes per second over 1 second
        let r1 = avg.update(1000, 1.0);
        // next second 0 bytes; smoothed should not drop to zero instantly
        let r2 = avg.update(0, 1.0);
        assert!(r1 > r2);
        assert!(r2 > 0.0);
    }

    #[test]
    fn first_sample_seeds_average() {
        let mut avg = MovingAverage::default();
        assert_eq!(avg.value(), 0.0);
        assert_eq!(avg.update(100, 2.0), 50.0);
        let next = avg.update(200, 1.0);
        assert!(next > 50.0 && next < 200.0);
    }
}
