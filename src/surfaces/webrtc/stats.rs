//! `getStats` noise.
//!
//! Only fields that are present and non-zero are perturbed; a zero or a
//! missing field is left exactly as the browser reported it.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The stat fields that receive noise, by their JS names.
pub const NOISED_FIELDS: [&str; 4] = ["timestamp", "currentRoundTripTime", "bitrateMean", "jitter"];

/// Numeric fields of one stats entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round_trip_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

fn truthy(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

impl StatSample {
    /// Build from `(field, value)` pairs as read off a stats object.
    pub fn from_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Option<f64>)>,
    {
        let mut sample = Self::default();
        for (name, value) in fields {
            match name {
                "timestamp" => sample.timestamp = value,
                "currentRoundTripTime" => sample.current_round_trip_time = value,
                "bitrateMean" => sample.bitrate_mean = value,
                "jitter" => sample.jitter = value,
                _ => {}
            }
        }
        sample
    }

    /// `(field, value)` pairs for every field that is set.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f64)> {
        NOISED_FIELDS
            .into_iter()
            .zip([self.timestamp, self.current_round_trip_time, self.bitrate_mean, self.jitter])
            .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    /// Noised copy:
    /// - `timestamp` moves by an integer in `[-50, 50)` ms
    /// - `currentRoundTripTime` moves by up to 10 ms, floored at 1 ms
    /// - `bitrateMean` moves by up to 5%
    /// - `jitter` moves by up to 10%, floored at 0
    pub fn noised(&self, rng: &mut impl Rng) -> Self {
        let mut out = *self;
        if let Some(t) = truthy(self.timestamp) {
            out.timestamp = Some(t + (rng.gen::<f64>() * 100.0).floor() - 50.0);
        }
        if let Some(rtt) = truthy(self.current_round_trip_time) {
            out.current_round_trip_time = Some((rtt + rng.gen::<f64>() * 0.02 - 0.01).max(0.001));
        }
        if let Some(bitrate) = truthy(self.bitrate_mean) {
            out.bitrate_mean = Some(bitrate + bitrate * (0.1 * rng.gen::<f64>() - 0.05));
        }
        if let Some(jitter) = truthy(self.jitter) {
            out.jitter = Some((jitter + jitter * (0.2 * rng.gen::<f64>() - 0.1)).max(0.0));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn full() -> StatSample {
        StatSample {
            timestamp: Some(1_700_000_000_000.0),
            current_round_trip_time: Some(0.05),
            bitrate_mean: Some(2_000_000.0),
            jitter: Some(0.004),
        }
    }

    #[test]
    fn test_bounds() {
        let mut rng = StdRng::seed_from_u64(8);
        let base = full();
        for _ in 0..1000 {
            let n = base.noised(&mut rng);
            let dt = n.timestamp.unwrap() - base.timestamp.unwrap();
            assert!((-50.0..50.0).contains(&dt) && dt.fract() == 0.0);
            let drtt = n.current_round_trip_time.unwrap() - 0.05;
            assert!(drtt.abs() <= 0.01 + 1e-12);
            let rel = n.bitrate_mean.unwrap() / 2_000_000.0 - 1.0;
            assert!(rel.abs() <= 0.05 + 1e-12);
            let jrel = n.jitter.unwrap() / 0.004 - 1.0;
            assert!(jrel.abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn test_zero_and_missing_untouched() {
        let mut rng = StdRng::seed_from_u64(9);
        let sample = StatSample {
            timestamp: Some(0.0),
            current_round_trip_time: None,
            bitrate_mean: Some(0.0),
            jitter: None,
        };
        assert_eq!(sample.noised(&mut rng), sample);
    }

    #[test]
    fn test_rtt_floor() {
        let mut rng = StdRng::seed_from_u64(10);
        let sample = StatSample {
            current_round_trip_time: Some(0.0005),
            ..Default::default()
        };
        for _ in 0..200 {
            assert!(sample.noised(&mut rng).current_round_trip_time.unwrap() >= 0.001);
        }
    }

    #[test]
    fn test_field_round_trip() {
        let sample = StatSample::from_fields([("jitter", Some(0.2)), ("timestamp", None), ("kind", Some(1.0))]);
        assert_eq!(sample.jitter, Some(0.2));
        assert_eq!(sample.fields().collect::<Vec<_>>(), vec![("jitter", 0.2)]);
    }
}
