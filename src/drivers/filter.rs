use heapless::Deque;

/// Window used for latitude and longitude smoothing.
pub const POSITION_WINDOW: usize = 5;

/// Fixed-window moving average.
///
/// Holds the last `N` samples and their running sum, so `add` and `average`
/// are both O(1). Until the window fills, the mean is taken over the samples
/// present, not zero-padded.
pub struct MovingAverage<const N: usize> {
    samples: Deque<f64, N>,
    sum: f64,
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MovingAverage<N> {
    pub fn new() -> Self {
        Self {
            samples: Deque::new(),
            sum: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.samples.is_full() {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        // cannot fail: a slot was freed above when full
        let _ = self.samples.push_back(value);
        self.sum += value;
    }

    /// Mean of the held samples, `0.0` when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}
