use std::collections::HashMap;

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use super::{SensorParams, SensorType};

/// Values a re-rolled trend may take.
pub const TREND_OPTIONS: [f64; 5] = [-0.3, -0.1, 0.0, 0.1, 0.3];

/// Fraction of the variation range a trend of `1.0` would add per call.
const TREND_SCALE: f64 = 0.1;

/// Produces realistic readings with a trend-biased bounded random walk.
///
/// The trend is shared by every sensor of a type, so one instance serves the
/// whole process.
#[derive(Debug)]
pub struct ValueSynthesizer<R = StdRng> {
    rng: R,
    trends: HashMap<SensorType, f64>,
}

impl ValueSynthesizer<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for ValueSynthesizer<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> ValueSynthesizer<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            trends: SensorType::ALL.into_iter().map(|t| (t, 0.0)).collect(),
        }
    }

    /// Next reading for `sensor_type` around `base_value`, clamped to the
    /// type's bounds and rounded to its decimal places.
    pub fn next(&mut self, sensor_type: SensorType, base_value: f64) -> f64 {
        self.next_with(sensor_type, sensor_type.params(), base_value)
    }

    /// Same as [`next`](Self::next) with explicit parameters, so the trend
    /// state of `sensor_type` can be driven by non-default probabilities.
    ///
    /// A NaN base value walks from the type's default instead.
    pub fn next_with(&mut self, sensor_type: SensorType, params: &SensorParams, base_value: f64) -> f64 {
        if self.rng.gen::<f64>() < params.trend_probability {
            let trend = TREND_OPTIONS.choose(&mut self.rng).copied().unwrap_or(0.0);
            self.set_trend(sensor_type, trend);
        }

        let range = params.variation_range;
        let noise = self.rng.gen_range(-range..=range);
        let trend = self.trend(sensor_type);

        let base = if base_value.is_nan() { params.default_value } else { base_value };
        let raw = base + noise + trend * range * TREND_SCALE;
        let clamped = raw.clamp(params.min_value, params.max_value);
        round_to(clamped, params.decimal_places).clamp(params.min_value, params.max_value)
    }

    pub fn trend(&self, sensor_type: SensorType) -> f64 {
        self.trends.get(&sensor_type).copied().unwrap_or(0.0)
    }

    pub fn set_trend(&mut self, sensor_type: SensorType, trend: f64) {
        self.trends.insert(sensor_type, trend);
    }

    /// Zero every type's trend. Base values are not touched.
    pub fn reset(&mut self) {
        for trend in self.trends.values_mut() {
            *trend = 0.0;
        }
    }
}

/// Round half away from zero at `decimals` places.
fn round_to(value: f64, decimals: u32) -> f64 {
    let multiplier = 10f64.powi(decimals as i32);
    (value * multiplier).round() / multiplier
}
