/// First-order low-pass filter on a scalar signal.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f64,
    last: f64,
    initialized: bool,
}

impl LowPassFilter {
    pub fn new(alpha: f64) -> LowPassFilter {
        LowPassFilter {
            alpha,
            last: 0.0,
            initialized: false,
        }
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }

    pub fn last_value(&self) -> f64 {
        self.last
    }

    pub fn filter(&mut self, input: f64) -> f64 {
        if !self.initialized {
            self.last = input;
            self.initialized = true;
        } else {
            self.last = self.alpha * input + (1.0 - self.alpha) * self.last;
        }
        self.last
    }
}
