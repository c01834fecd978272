//! Empirical temperature-from-resistance models for the heater track.
//!
//! Both models invert a quadratic TCR law
//! `R(T) = R0 * (1 + tcr1 * dT + tcr2 * dT^2)` for `dT`, taking the positive
//! root. A resistance outside the model's domain (negative discriminant)
//! yields NaN, which is logged as-is.

use serde::{Deserialize, Serialize};

use crate::measurement::Sample;

/// Temperature model selected in the `[heater.thermal]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ThermalModel {
    /// Dual resistance model referenced to the ambient reading.
    ///
    /// The measured resistance is split into a heated part (`trh` of the
    /// ambient resistance) and a meander whose rise is scaled by `trm`.
    AmbientReferenced {
        tcr1: f64,
        tcr2: f64,
        trh: f64,
        trm: f64,
        ambient_c: f64,
    },
    /// Fixed track geometry: only a third of the on-chip track heats up.
    TrackCorrected {
        heater_ohms: f64,
        track_on_ohms: f64,
        track_off_ohms: f64,
        ambient_c: f64,
    },
}

impl Default for ThermalModel {
    // 113C CVD heater
    fn default() -> Self {
        ThermalModel::AmbientReferenced {
            tcr1: 2.05e-3,
            tcr2: 3.00e-7,
            trh: 0.766,
            trm: 0.928,
            ambient_c: 25.0,
        }
    }
}

impl ThermalModel {
    pub fn track_corrected() -> Self {
        ThermalModel::TrackCorrected {
            heater_ohms: 36.0,
            track_on_ohms: 9.0,
            track_off_ohms: 3.0 + 2.5,
            ambient_c: 25.0,
        }
    }

    /// Heater temperature in degrees C for `sample`, given the `ambient`
    /// reading taken at the start of the run.
    pub fn temperature(&self, ambient: &Sample, sample: &Sample) -> f64 {
        match *self {
            ThermalModel::AmbientReferenced {
                tcr1,
                tcr2,
                trh,
                trm,
                ambient_c,
            } => {
                let (i, v) = (sample.current, sample.voltage);
                let rm0 = ambient.voltage / ambient.current;
                let rh0 = rm0 * trh;
                let vcalc = i * (rh0 + (v / i - rm0) * trm);
                let c = 1.0 - (vcalc / i) / rh0;
                solve_rise(tcr1, tcr2, c) + ambient_c
            }
            ThermalModel::TrackCorrected {
                heater_ohms,
                track_on_ohms,
                track_off_ohms,
                ambient_c,
            } => {
                let res_heat = heater_ohms + track_on_ohms / 3.0;
                let res_non_heat = track_on_ohms * 2.0 / 3.0 + track_off_ohms;
                let heated = sample.resistance() - res_non_heat;
                let tcr1 = -4.478e-3 * res_heat / 340.0 + 3.7765e-3;
                let tcr2 = 0.4e-6;
                solve_rise(tcr1, tcr2, 1.0 - heated / res_heat) + ambient_c
            }
        }
    }
}

/// Positive root of `tcr2 * x^2 + tcr1 * x + c = 0`.
fn solve_rise(tcr1: f64, tcr2: f64, c: f64) -> f64 {
    (-tcr1 + (tcr1 * tcr1 - 4.0 * tcr2 * c).sqrt()) / (2.0 * tcr2)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMB_I: f64 = 0.003;
    const AMB_V: f64 = 0.15;

    fn ambient() -> Sample {
        Sample::new(AMB_V, AMB_I)
    }

    #[test]
    fn ambient_reading_is_ambient_temperature() {
        let model = ThermalModel::default();
        let t = model.temperature(&ambient(), &ambient());
        assert!((t - 25.0).abs() < 1e-9, "got {t}");
    }

    #[test]
    fn ambient_referenced_is_pure() {
        let model = ThermalModel::default();
        let step = Sample::new(3.2, 0.05);
        let first = model.temperature(&ambient(), &step);
        let second = model.temperature(&ambient(), &step);
        assert_eq!(first.to_bits(), second.to_bits());
        assert_eq!(model, ThermalModel::default());
    }

    #[test]
    fn hotter_with_rising_resistance() {
        let model = ThermalModel::default();
        // ambient is 50 ohm; 60 and 70 ohm steps
        let warm = model.temperature(&ambient(), &Sample::new(3.0, 0.05));
        let hot = model.temperature(&ambient(), &Sample::new(3.5, 0.05));
        assert!(warm > 25.0);
        assert!(hot > warm);
    }

    #[test]
    fn ambient_referenced_matches_hand_calculation() {
        let model = ThermalModel::default();
        let step = Sample::new(3.0, 0.05);
        // Rm0 = 50, Rh0 = 38.3, vcalc/i = 38.3 + 10 * 0.928 = 47.58
        let c: f64 = 1.0 - 47.58 / 38.3;
        let expected =
            (-2.05e-3 + (2.05e-3f64.powi(2) - 4.0 * 3.0e-7 * c).sqrt()) / (2.0 * 3.0e-7) + 25.0;
        let t = model.temperature(&ambient(), &step);
        assert!((t - expected).abs() < 1e-6, "got {t}, expected {expected}");
    }

    #[test]
    fn track_corrected_at_cold_resistance() {
        let model = ThermalModel::track_corrected();
        // 36 + 9/3 heated plus 6 + 5.5 unheated
        let cold = Sample::new(50.5 * 0.01, 0.01);
        let t = model.temperature(&ambient(), &cold);
        assert!((t - 25.0).abs() < 1e-6, "got {t}");

        let hot = Sample::new(60.0 * 0.01, 0.01);
        assert!(model.temperature(&ambient(), &hot) > 25.0);
    }

    #[test]
    fn outside_domain_is_nan() {
        let model = ThermalModel::default();
        // reversed leads read a negative resistance, negative discriminant
        let t = model.temperature(&ambient(), &Sample::new(-5.0, 0.05));
        assert!(t.is_nan());
    }

    #[test]
    fn model_parses_from_toml() {
        let model: ThermalModel = toml::from_str(
            r#"
            model = "track_corrected"
            heater_ohms = 40.0
            track_on_ohms = 9.0
            track_off_ohms = 5.5
            ambient_c = 22.0
            "#,
        )
        .unwrap();
        assert!(matches!(
            model,
            ThermalModel::TrackCorrected { heater_ohms, .. } if heater_ohms == 40.0
        ));
    }
}
