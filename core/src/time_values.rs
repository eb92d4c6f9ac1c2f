use crate::MAX_LAST_FRAMES;

/// Running statistics over a sliding window of samples.
///
/// The last [`MAX_LAST_FRAMES`] samples are always kept for plotting, but the
/// average only covers the most recent `window` of them. A window of 0 averages
/// over every sample ever added.
#[derive(Clone, Debug)]
pub struct TimeValues {
    last: f64,
    total: f64,
    min: f64,
    max: f64,

    cursor: usize,
    window: usize,
    valid: usize,

    samples: Box<[f64]>,
}

impl TimeValues {
    pub fn new(window: usize) -> Self {
        let mut values = Self {
            last: 0.,
            total: 0.,
            min: f64::MAX,
            max: 0.,
            cursor: 0,
            window: 0,
            valid: 0,
            samples: vec![0.; MAX_LAST_FRAMES].into_boxed_slice(),
        };
        values.init(window);
        values
    }

    /// Changes the window length. History is discarded rather than resampled.
    pub fn init(&mut self, window: usize) {
        debug_assert!(window <= MAX_LAST_FRAMES);
        self.window = window.min(MAX_LAST_FRAMES);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.last = 0.;
        self.total = 0.;
        self.min = f64::MAX;
        self.max = 0.;
        self.cursor = 0;
        self.valid = 0;
        self.samples.fill(0.);
    }

    pub fn add(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.last = v;

        if self.window > 0 {
            if self.valid >= self.window {
                let evicted = (self.cursor + MAX_LAST_FRAMES - self.window) % MAX_LAST_FRAMES;
                self.total -= self.samples[evicted];
            }
            self.total += v;
            self.valid = (self.valid + 1).min(self.window);
        } else {
            self.total += v;
            self.valid += 1;
        }

        self.samples[self.cursor] = v;
        self.cursor = (self.cursor + 1) % MAX_LAST_FRAMES;
    }

    pub fn averaged(&self) -> f64 {
        if self.valid == 0 {
            0.
        } else {
            self.total / self.valid as f64
        }
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    /// Smallest sample seen since the last reset, or 0 without samples.
    pub fn min(&self) -> f64 {
        if self.valid == 0 {
            0.
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn valid_count(&self) -> usize {
        self.valid
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Raw ring buffer; the next write goes to [`Self::cursor`].
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }
}

impl Default for TimeValues {
    fn default() -> Self {
        Self::new(MAX_LAST_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let values = TimeValues::new(4);
        assert_eq!(values.averaged(), 0.);
        assert_eq!(values.min(), 0.);
        assert_eq!(values.valid_count(), 0);
    }

    #[test]
    fn test_mean_within_window() {
        let mut values = TimeValues::new(4);
        for v in [10., 20., 30.] {
            values.add(v);
        }
        assert_eq!(values.valid_count(), 3);
        assert_eq!(values.averaged(), 20.);
        assert_eq!(values.last(), 30.);
        assert_eq!(values.min(), 10.);
        assert_eq!(values.max(), 30.);
    }

    #[test]
    fn test_eviction() {
        let mut values = TimeValues::new(4);
        for v in [100., 120., 80., 140., 90.] {
            values.add(v);
        }
        assert_eq!(values.valid_count(), 4);
        assert_eq!(values.averaged(), (120. + 80. + 140. + 90.) / 4.);
        // min/max are not windowed
        assert_eq!(values.min(), 80.);
        assert_eq!(values.max(), 140.);
    }

    #[test]
    fn test_eviction_wraps_ring() {
        let mut values = TimeValues::new(3);
        for i in 0..(MAX_LAST_FRAMES * 2 + 5) {
            values.add(i as f64);
        }
        let n = (MAX_LAST_FRAMES * 2 + 5) as f64;
        assert_eq!(values.averaged(), (n - 1. + n - 2. + n - 3.) / 3.);
    }

    #[test]
    fn test_full_window() {
        let mut values = TimeValues::new(MAX_LAST_FRAMES);
        for _ in 0..MAX_LAST_FRAMES {
            values.add(1.);
        }
        values.add(3.);
        assert_eq!(values.valid_count(), MAX_LAST_FRAMES);
        assert_eq!(
            values.averaged(),
            (MAX_LAST_FRAMES as f64 + 2.) / MAX_LAST_FRAMES as f64
        );
    }

    #[test]
    fn test_unwindowed() {
        let mut values = TimeValues::new(0);
        for i in 0..1000 {
            values.add(i as f64);
        }
        assert_eq!(values.valid_count(), 1000);
        assert_eq!(values.averaged(), 499.5);
    }

    #[test]
    fn test_init_discards_history() {
        let mut values = TimeValues::new(4);
        values.add(5.);
        values.init(2);
        assert_eq!(values.window(), 2);
        assert_eq!(values.valid_count(), 0);
        assert_eq!(values.last(), 0.);
        assert!(values.samples().iter().all(|&s| s == 0.));
    }
}
