//! Rolling volatility computation.
//!
//! Computes the sample standard deviation of simple returns over a rolling window.

use std::collections::VecDeque;

/// Rolling volatility calculator using simple (percentage) returns.
pub struct RollingVolatility {
    /// Window size in returns.
    window: usize,
    /// Recent returns.
    returns: VecDeque<f64>,
    /// Previous price (for computing next return).
    prev_price: Option<f64>,
    /// Running sum of returns (for mean).
    sum: f64,
    /// Running sum of squared returns (for variance).
    sum_sq: f64,
}

impl RollingVolatility {
    /// Create a new rolling volatility calculator.
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            returns: VecDeque::with_capacity(window),
            prev_price: None,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Add a price observation.
    ///
    /// Returns the current volatility once the window is full.
    pub fn add_price(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            if prev > 0.0 && price.is_finite() {
                self.add_return(price / prev - 1.0);
            }
        }
        self.prev_price = Some(price);
        if self.is_ready() {
            self.volatility()
        } else {
            None
        }
    }

    /// Add a return directly.
    fn add_return(&mut self, ret: f64) {
        if self.returns.len() >= self.window {
            if let Some(old) = self.returns.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }

        self.returns.push_back(ret);
        self.sum += ret;
        self.sum_sq += ret * ret;
    }

    /// Sample standard deviation of the returns currently in the window.
    pub fn volatility(&self) -> Option<f64> {
        let n = self.returns.len();
        if n < 2 {
            return None;
        }

        let n_f = n as f64;
        let mean = self.sum / n_f;
        let variance = (self.sum_sq - n_f * mean * mean) / (n_f - 1.0);

        // Running sums can drift slightly negative for flat series.
        if variance <= 0.0 {
            Some(0.0)
        } else {
            Some(variance.sqrt())
        }
    }

    /// Check if the window is full.
    pub fn is_ready(&self) -> bool {
        self.returns.len() >= self.window
    }

    /// Get the number of returns in the window.
    pub fn count(&self) -> usize {
        self.returns.len()
    }

    /// Clear all data.
    pub fn clear(&mut self) {
        self.returns.clear();
        self.prev_price = None;
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_not_ready() {
        let vol = RollingVolatility::new(20);
        assert!(!vol.is_ready());
        assert!(vol.volatility().is_none());
    }

    #[test]
    fn test_constant_price() {
        let mut vol = RollingVolatility::new(5);
        for _ in 0..10 {
            vol.add_price(100.0);
        }
        assert_relative_eq!(vol.volatility().unwrap(), 0.0);
    }

    #[test]
    fn test_first_value_after_full_window() {
        let mut vol = RollingVolatility::new(3);
        assert!(vol.add_price(100.0).is_none());
        assert!(vol.add_price(101.0).is_none());
        assert!(vol.add_price(100.0).is_none());
        // Fourth price yields the third return and fills the window.
        assert!(vol.add_price(101.0).is_some());
    }

    #[test]
    fn test_rolling_window() {
        let mut vol = RollingVolatility::new(3);
        for p in [100.0, 101.0, 102.0, 103.0, 104.0] {
            vol.add_price(p);
        }
        assert_eq!(vol.count(), 3);
        vol.clear();
        assert_eq!(vol.count(), 0);
    }

    #[test]
    fn test_known_sample_std() {
        let mut vol = RollingVolatility::new(3);

        // Returns: 0.01, 0.02, 0.03 -> sample std 0.01
        let mut price = 100.0;
        vol.add_price(price);
        for r in [0.01, 0.02, 0.03] {
            price *= 1.0 + r;
            vol.add_price(price);
        }

        assert_relative_eq!(vol.volatility().unwrap(), 0.01, epsilon = 1e-9);
    }
}
