//! Bridge for the hard-coded sleep-wake compartment models.

use crate::payload::{js_error, phase_grid, to_js, VectorFieldPayload};
use anyhow::{anyhow, bail, Result};
use dsa_core::compartment::{
    CompartmentModel, Cycled, InRegime, Regime, SleepWakeCycle, ThreeCompartmentModel,
    ThreeCompartmentRates, TwoCompartmentModel, TwoCompartmentRates,
};
use dsa_core::phase::vector_field;
use dsa_core::simulation::{simulate, SimulationSettings, Trajectory};
use wasm_bindgen::prelude::*;

enum Compartments {
    Two(TwoCompartmentModel),
    Three(ThreeCompartmentModel),
}

#[wasm_bindgen]
pub struct WasmCompartmentModel {
    model: Compartments,
    cycle: SleepWakeCycle,
}

fn parse_regime(regime: &str) -> Result<Regime> {
    match regime {
        "wake" => Ok(Regime::Wake),
        "sleep" => Ok(Regime::Sleep),
        other => Err(anyhow!("Unknown regime '{}'.", other)),
    }
}

impl WasmCompartmentModel {
    pub(crate) fn build(compartments: &str, preset: &str) -> Result<Self> {
        let model = match (compartments, preset) {
            ("two", "phase_plane") => Compartments::Two(TwoCompartmentModel::phase_plane()),
            ("two", "simulation") => Compartments::Two(TwoCompartmentModel::simulation()),
            ("three", "phase_plane") => Compartments::Three(ThreeCompartmentModel::phase_plane()),
            ("three", "simulation") => Compartments::Three(ThreeCompartmentModel::simulation()),
            ("two" | "three", other) => bail!("Unknown preset '{}'.", other),
            (other, _) => bail!("Unknown compartment model '{}'.", other),
        };
        Ok(Self {
            model,
            cycle: SleepWakeCycle::default(),
        })
    }

    fn inner(&self) -> &dyn CompartmentModel {
        match &self.model {
            Compartments::Two(model) => model,
            Compartments::Three(model) => model,
        }
    }

    /// Rates in declaration order: `[A, a12, k]` or `[A, a12, a13, a23, k]`.
    pub(crate) fn apply_rates(&mut self, regime: &str, rates: &[f64]) -> Result<()> {
        let regime = parse_regime(regime)?;
        if rates.iter().any(|r| !r.is_finite()) {
            bail!("Rates must be finite.");
        }
        let expected = 2 * self.inner().dimension() - 1;
        match (&mut self.model, rates) {
            (Compartments::Two(model), &[input, a12, k]) => {
                let slot = match regime {
                    Regime::Wake => &mut model.wake,
                    Regime::Sleep => &mut model.sleep,
                };
                *slot = TwoCompartmentRates { input, a12, k };
            }
            (Compartments::Three(model), &[input, a12, a13, a23, k]) => {
                let slot = match regime {
                    Regime::Wake => &mut model.wake,
                    Regime::Sleep => &mut model.sleep,
                };
                *slot = ThreeCompartmentRates {
                    input,
                    a12,
                    a13,
                    a23,
                    k,
                };
            }
            _ => bail!("Expected {} rates, got {}.", expected, rates.len()),
        }
        Ok(())
    }

    pub(crate) fn equilibrium_for(&self, regime: &str) -> Result<Vec<f64>> {
        Ok(self.inner().equilibrium(parse_regime(regime)?))
    }

    pub(crate) fn vector_field_payload(
        &self,
        regime: &str,
        axis_indices: &[usize],
        axis_mins: &[f64],
        axis_maxs: &[f64],
        axis_samples: &[usize],
        frozen_state: &[f64],
    ) -> Result<VectorFieldPayload> {
        let system = InRegime {
            model: self.inner(),
            regime: parse_regime(regime)?,
        };
        let grid = phase_grid(axis_indices, axis_mins, axis_maxs, axis_samples)?;
        let field = vector_field(&system, &grid, frozen_state)?;
        Ok(field.into())
    }

    pub(crate) fn trajectory(
        &self,
        initial_state: &[f64],
        settings: &SimulationSettings,
    ) -> Result<Trajectory> {
        let system = Cycled {
            model: self.inner(),
            cycle: self.cycle,
        };
        simulate(&system, initial_state, settings)
    }
}

#[wasm_bindgen]
impl WasmCompartmentModel {
    /// `compartments` is `"two"` or `"three"`; `preset` is `"phase_plane"` or `"simulation"`.
    #[wasm_bindgen(constructor)]
    pub fn new(
        compartments: &str,
        preset: &str,
    ) -> std::result::Result<WasmCompartmentModel, JsValue> {
        console_error_panic_hook::set_once();
        WasmCompartmentModel::build(compartments, preset).map_err(js_error)
    }

    pub fn variables(&self) -> Vec<String> {
        self.inner().variables().iter().map(|s| s.to_string()).collect()
    }

    pub fn default_initial_state(&self) -> Vec<f64> {
        match &self.model {
            Compartments::Two(_) => TwoCompartmentModel::SIMULATION_INITIAL_STATE.to_vec(),
            Compartments::Three(_) => ThreeCompartmentModel::SIMULATION_INITIAL_STATE.to_vec(),
        }
    }

    pub fn set_rates(
        &mut self,
        regime: &str,
        rates: Vec<f64>,
    ) -> std::result::Result<(), JsValue> {
        self.apply_rates(regime, &rates).map_err(js_error)
    }

    pub fn equilibrium(&self, regime: &str) -> std::result::Result<Vec<f64>, JsValue> {
        self.equilibrium_for(regime).map_err(js_error)
    }

    pub fn regime_at(&self, t: f64) -> String {
        match self.cycle.regime_at(t) {
            Regime::Wake => "wake".to_string(),
            Regime::Sleep => "sleep".to_string(),
        }
    }

    pub fn vector_field(
        &self,
        regime: &str,
        axis_indices: Vec<usize>,
        axis_mins: Vec<f64>,
        axis_maxs: Vec<f64>,
        axis_samples: Vec<usize>,
        frozen_state: Vec<f64>,
    ) -> std::result::Result<JsValue, JsValue> {
        let payload = self
            .vector_field_payload(
                regime,
                &axis_indices,
                &axis_mins,
                &axis_maxs,
                &axis_samples,
                &frozen_state,
            )
            .map_err(js_error)?;
        to_js(&payload)
    }

    pub fn simulate(
        &self,
        initial_state: Vec<f64>,
        t_start: f64,
        t_end: f64,
        dt: f64,
        sample_every: usize,
    ) -> std::result::Result<JsValue, JsValue> {
        let settings = SimulationSettings {
            t_start,
            t_end,
            dt,
            sample_every,
        };
        let trajectory = self.trajectory(&initial_state, &settings).map_err(js_error)?;
        to_js(&trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_and_unknown_names() {
        let model = WasmCompartmentModel::build("three", "simulation").expect("known preset");
        assert_eq!(model.variables(), vec!["B", "C", "P"]);
        assert_eq!(model.default_initial_state(), vec![600.0, 600.0, 15.0]);
        assert!(WasmCompartmentModel::build("four", "simulation").is_err());
        let err = WasmCompartmentModel::build("two", "fast").err().expect("bad preset");
        assert!(err.to_string().contains("preset"), "{err}");
    }

    #[test]
    fn rates_can_be_replaced_per_regime() {
        let mut model = WasmCompartmentModel::build("two", "phase_plane").expect("known preset");
        model.apply_rates("sleep", &[4.0, 2.0, 1.0]).expect("three rates");
        assert_eq!(model.equilibrium_for("sleep").expect("regime"), vec![2.0, 4.0]);

        let err = model.apply_rates("wake", &[1.0]).expect_err("wrong count");
        assert!(err.to_string().contains("Expected 3 rates"), "{err}");
        assert!(model.apply_rates("noon", &[1.0, 1.0, 1.0]).is_err());
        assert!(model.equilibrium_for("dusk").is_err());
    }

    #[test]
    fn vector_field_vanishes_at_equilibrium() {
        let model = WasmCompartmentModel::build("two", "phase_plane").expect("known preset");
        let eq = model.equilibrium_for("wake").expect("regime");
        let payload = model
            .vector_field_payload(
                "wake",
                &[0, 1],
                &[eq[0] - 1.0, eq[1] - 1.0],
                &[eq[0] + 1.0, eq[1] + 1.0],
                &[3, 3],
                &[0.0, 0.0],
            )
            .expect("valid grid");
        // Centre node of the 3x3 grid.
        assert!(payload.u[4].abs() < 1e-12 && payload.v[4].abs() < 1e-12);
    }

    #[test]
    fn short_simulation_is_sampled() {
        let model = WasmCompartmentModel::build("three", "simulation").expect("known preset");
        let settings = SimulationSettings {
            t_end: 48.0,
            ..SimulationSettings::default()
        };
        let trajectory = model
            .trajectory(&model.default_initial_state(), &settings)
            .expect("valid settings");
        assert_eq!(trajectory.len(), 481);
        assert_eq!(trajectory.dimension, 3);
        assert_eq!(model.regime_at(12.0), "wake");
        assert!(model.trajectory(&[1.0], &settings).is_err());
    }
}
