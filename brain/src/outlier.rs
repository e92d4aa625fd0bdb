//! Rejects outliers from a stream of values.
//!
//! A value is rejected when its distance to the last accepted value exceeds
//! the threshold; after `max_misses` consecutive rejections the next value
//! is accepted anyway and becomes the new reference, so a genuinely moved
//! robot can never be locked out.

use arena_types::Vec2;

pub trait OutlierMetric {
    fn outlier_distance(&self, reference: &Self) -> f64;
}

impl OutlierMetric for f64 {
    fn outlier_distance(&self, reference: &Self) -> f64 {
        (self - reference).abs()
    }
}

impl OutlierMetric for Vec2 {
    fn outlier_distance(&self, reference: &Self) -> f64 {
        self.linf_dist(reference)
    }
}

pub struct OutlierRejecter<T> {
    threshold: f64,
    max_misses: u32,
    misses: u32,
    last: Option<T>,
}

impl<T: Clone + OutlierMetric> OutlierRejecter<T> {
    pub fn new(threshold: f64, max_misses: u32) -> Self {
        Self { threshold, max_misses, misses: 0, last: None }
    }

    /// Gate the next value. Returns the accepted value (the input, or the
    /// previous reference when the input was rejected) and whether the
    /// input passed.
    pub fn next(&mut self, value: T) -> (T, bool) {
        let reference = match &self.last {
            None => {
                self.last = Some(value.clone());
                return (value, true);
            }
            Some(reference) => reference,
        };

        if value.outlier_distance(reference) <= self.threshold {
            self.misses = 0;
            self.last = Some(value.clone());
            return (value, true);
        }

        self.misses += 1;
        if self.misses >= self.max_misses {
            self.misses = 0;
            self.last = Some(value.clone());
            return (value, true);
        }

        (self.last.clone().expect("reference checked above"), false)
    }
}
