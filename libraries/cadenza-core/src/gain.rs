//! Gain math
//!
//! Gain is carried as a linear amplitude multiplier. Conversion to and from
//! decibels uses `linear = exp(ln(10) * 0.05 * dB)`.
//!
//! When the known sample peak times the requested gain stays at or below
//! full scale, gain application is a pure amplifier (a multiply). Otherwise
//! a bounded soft-knee curve is used so the output can never clip, at the
//! cost of slight compression near full scale.

/// Convert a gain in dB to a linear amplitude multiplier
pub fn db_to_linear(db: f64) -> f64 {
    (std::f64::consts::LN_10 * 0.05 * db).exp()
}

/// Convert a linear amplitude multiplier to dB
///
/// Returns negative infinity for non-positive input.
pub fn linear_to_db(linear: f64) -> f64 {
    if linear > 0.0 {
        20.0 * linear.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// Apply `gain` to interleaved samples in place
///
/// `peak` is the assumed maximum sample magnitude of the input (1.0 unless
/// known lower). If `peak * gain <= 1.0` the samples are simply multiplied;
/// the output magnitude is then bounded by `peak * gain`. Otherwise each
/// sample runs through `tanh(gain * x)`, which is transparent for quiet
/// material and saturates smoothly below full scale.
pub fn apply_gain(samples: &mut [f32], gain: f32, peak: f32) {
    if gain == 1.0 {
        return;
    }

    if peak * gain <= 1.0 {
        for s in samples.iter_mut() {
            *s *= gain;
        }
    } else {
        for s in samples.iter_mut() {
            *s = (*s * gain).tanh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn db_linear_roundtrip() {
        for db in [-51.0, -18.0, -6.0, 0.0, 6.0, 51.0] {
            let linear = db_to_linear(db);
            assert!((linear_to_db(linear) - db).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_db_is_unity() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn minus_six_db_halves() {
        // -6.0206 dB is exactly 0.5; -6 dB is close
        assert!((db_to_linear(-6.0) - 0.501).abs() < 0.001);
    }

    #[test]
    fn amplifier_path_scales_exactly() {
        let mut samples = vec![0.5_f32, -0.25, 0.1];
        apply_gain(&mut samples, 1.5, 0.5);
        assert!((samples[0] - 0.75).abs() < 1e-6);
        assert!((samples[1] + 0.375).abs() < 1e-6);
    }

    proptest! {
        /// Applying gain never produces magnitudes beyond what peak * gain
        /// predicts, and never beyond full scale on the soft path.
        #[test]
        fn gain_never_clips_beyond_prediction(
            gain in 0.0_f32..8.0,
            peak in 0.01_f32..1.0,
            samples in proptest::collection::vec(-1.0_f32..1.0, 1..256),
        ) {
            let mut scaled: Vec<f32> = samples.iter().map(|s| s * peak).collect();
            apply_gain(&mut scaled, gain, peak);

            let bound = if peak * gain <= 1.0 {
                peak * gain + 1e-5
            } else {
                1.0
            };
            for s in &scaled {
                prop_assert!(s.abs() <= bound, "sample {} exceeds bound {}", s, bound);
            }
        }
    }
}
