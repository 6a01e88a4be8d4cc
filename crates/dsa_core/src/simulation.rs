use crate::solvers::RK4;
use crate::traits::{DynamicalSystem, Steppable};
use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Upper bound on integration steps per run.
pub const MAX_STEPS: usize = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub t_start: f64,
    pub t_end: f64,
    pub dt: f64,
    /// Keep every n-th step; the first and last states are always kept.
    pub sample_every: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 2400.0,
            dt: 0.01,
            sample_every: 10,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.t_start.is_finite() || !self.t_end.is_finite() {
            bail!("Simulation bounds must be finite.");
        }
        if self.t_end <= self.t_start {
            bail!(
                "Simulation end ({}) must be after start ({}).",
                self.t_end,
                self.t_start
            );
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            bail!("dt must be positive.");
        }
        if self.sample_every == 0 {
            bail!("sample_every must be at least 1.");
        }
        let steps = ((self.t_end - self.t_start) / self.dt).round();
        if !steps.is_finite() || steps > MAX_STEPS as f64 {
            bail!(
                "Simulation needs {} steps; at most {} are allowed.",
                steps,
                MAX_STEPS
            );
        }
        Ok(())
    }

    fn step_count(&self) -> usize {
        ((self.t_end - self.t_start) / self.dt).round().max(1.0) as usize
    }
}

/// Sampled solution; `states` is row-major with `dimension` values per time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub dimension: usize,
    pub times: Vec<f64>,
    pub states: Vec<f64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.dimension)?;
        self.states.get(start..start + self.dimension)
    }

    /// One coordinate over time.
    pub fn component(&self, variable: usize) -> Vec<f64> {
        if variable >= self.dimension {
            return Vec::new();
        }
        self.states
            .chunks_exact(self.dimension)
            .map(|row| row[variable])
            .collect()
    }

    /// Samples with `from <= t <= to`.
    pub fn window(&self, from: f64, to: f64) -> Trajectory {
        let mut times = Vec::new();
        let mut states = Vec::new();
        for (t, row) in self.times.iter().zip(self.states.chunks_exact(self.dimension)) {
            if *t >= from && *t <= to {
                times.push(*t);
                states.extend_from_slice(row);
            }
        }
        Trajectory {
            dimension: self.dimension,
            times,
            states,
        }
    }
}

/// Integrates `system` from `initial_state` with fixed-step RK4.
pub fn simulate(
    system: &impl DynamicalSystem<f64>,
    initial_state: &[f64],
    settings: &SimulationSettings,
) -> Result<Trajectory> {
    settings.validate()?;
    let dim = system.dimension();
    if dim == 0 {
        bail!("System dimension must be positive.");
    }
    if initial_state.len() != dim {
        bail!(
            "Initial state length ({}) does not match system dimension ({}).",
            initial_state.len(),
            dim
        );
    }
    if initial_state.iter().any(|v| !v.is_finite()) {
        bail!("Initial state must be finite.");
    }

    let steps = settings.step_count();
    let capacity = steps / settings.sample_every + 2;
    let mut times = Vec::with_capacity(capacity);
    let mut states = Vec::with_capacity(capacity * dim);
    let mut solver = RK4::new(dim);
    let mut state = initial_state.to_vec();

    times.push(settings.t_start);
    states.extend_from_slice(&state);
    for i in 1..=steps {
        // Restart from the grid time so round-off does not drift across regime switches.
        let mut t = settings.t_start + (i - 1) as f64 * settings.dt;
        solver.step(system, &mut t, &mut state, settings.dt);
        if state.iter().any(|v| !v.is_finite()) {
            bail!("Simulation diverged at t = {}.", t);
        }
        if i % settings.sample_every == 0 || i == steps {
            times.push(settings.t_start + i as f64 * settings.dt);
            states.extend_from_slice(&state);
        }
    }

    debug!(
        "simulated {} step(s), kept {} sample(s)",
        steps,
        times.len()
    );
    Ok(Trajectory {
        dimension: dim,
        times,
        states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compartment::{
        CompartmentModel, Cycled, InRegime, Regime, SleepWakeCycle, TwoCompartmentModel,
    };

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn frozen_regime_relaxes_to_equilibrium() {
        let model = TwoCompartmentModel::phase_plane();
        let system = InRegime {
            model: &model,
            regime: Regime::Wake,
        };
        let settings = SimulationSettings {
            t_end: 200.0,
            ..SimulationSettings::default()
        };
        let trajectory = simulate(&system, &[0.0, 0.0], &settings).expect("valid settings");
        assert_eq!(trajectory.len(), 2001);
        assert_eq!(trajectory.times[0], 0.0);
        assert!((trajectory.times[2000] - 200.0).abs() < 1e-9);

        let last = trajectory.state(2000).expect("last sample");
        let expected = model.equilibrium(Regime::Wake);
        for (got, want) in last.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6 * want, "{got} vs {want}");
        }
    }

    #[test]
    fn forced_simulation_stays_bounded_and_periodic() {
        let model = TwoCompartmentModel::simulation();
        let system = Cycled {
            model: &model,
            cycle: SleepWakeCycle::default(),
        };
        let trajectory = simulate(
            &system,
            &TwoCompartmentModel::SIMULATION_INITIAL_STATE,
            &SimulationSettings::default(),
        )
        .expect("default settings are valid");
        assert_eq!(trajectory.len(), 24_001);

        let brain = trajectory.component(0);
        assert!(brain.iter().all(|b| b.is_finite() && *b > 0.0));

        // After many days the response repeats with the 24 hour forcing.
        let day_99 = trajectory.state(24_000 - 2 * 2400).expect("sample")[0];
        let day_100 = trajectory.state(24_000 - 2400).expect("sample")[0];
        assert!((day_99 - day_100).abs() < 1e-3 * day_100.abs());

        let tail = trajectory.window(2336.0, 2400.0);
        assert!(!tail.is_empty());
        assert!(tail.times.iter().all(|t| (2336.0..=2400.0).contains(t)));
        assert_eq!(tail.states.len(), tail.len() * 2);
    }

    #[test]
    fn settings_are_validated() {
        let model = TwoCompartmentModel::simulation();
        let system = InRegime {
            model: &model,
            regime: Regime::Sleep,
        };
        let start = [1.0, 1.0];
        let base = SimulationSettings::default();
        assert_err_contains(
            simulate(&system, &start, &SimulationSettings { dt: 0.0, ..base }),
            "dt must be positive",
        );
        assert_err_contains(
            simulate(&system, &start, &SimulationSettings { t_end: -1.0, ..base }),
            "must be after start",
        );
        assert_err_contains(
            simulate(&system, &start, &SimulationSettings { sample_every: 0, ..base }),
            "sample_every",
        );
        assert_err_contains(
            simulate(&system, &start, &SimulationSettings { dt: 1e-12, ..base }),
            "at most 100000000 are allowed",
        );
        assert_err_contains(
            simulate(
                &system,
                &start,
                &SimulationSettings {
                    t_start: -1e300,
                    t_end: 1e300,
                    dt: 1e-300,
                    ..base
                },
            ),
            "steps",
        );
        assert_err_contains(simulate(&system, &[1.0], &base), "Initial state length");
    }
}
