//! Hard-coded brain/CSF/plasma clearance models with sleep-wake forcing.
//!
//! Each model carries one explicit rate set per [`Regime`]. The adapters
//! [`InRegime`] and [`Cycled`] turn a model into a [`DynamicalSystem`], either frozen
//! in one regime (phase planes) or switching on the 24 hour clock (simulation).

use crate::error::ParseError;
use crate::model::{parse, ParameterAssignment, SymbolicModel};
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Wake,
    Sleep,
}

/// Daily forcing: awake while `t mod period` lies in `[wake_start, period)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepWakeCycle {
    pub period: f64,
    pub wake_start: f64,
}

impl Default for SleepWakeCycle {
    fn default() -> Self {
        Self {
            period: 24.0,
            wake_start: 8.0,
        }
    }
}

impl SleepWakeCycle {
    pub fn regime_at(&self, t: f64) -> Regime {
        let phase = t.rem_euclid(self.period);
        if phase >= self.wake_start && phase < self.period {
            Regime::Wake
        } else {
            Regime::Sleep
        }
    }
}

/// Common surface of the compartment models.
pub trait CompartmentModel {
    /// Compartment names in state order.
    fn variables(&self) -> &'static [&'static str];

    fn derivative(&self, regime: Regime, x: &[f64], out: &mut [f64]);

    /// Closed-form steady state of the regime's autonomous system.
    fn equilibrium(&self, regime: Regime) -> Vec<f64>;

    /// The same equations as a symbolic model, for the generic analysis tools.
    fn symbolic_model(&self) -> Result<SymbolicModel, ParseError>;

    /// Parameter values of `regime` keyed by the symbolic model's parameter names.
    fn parameter_values(&self, regime: Regime) -> ParameterAssignment;

    fn dimension(&self) -> usize {
        self.variables().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoCompartmentRates {
    /// Production rate into the brain.
    pub input: f64,
    /// Brain to plasma transfer.
    pub a12: f64,
    /// Plasma clearance.
    pub k: f64,
}

/// Brain (`B`) and plasma (`P`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoCompartmentModel {
    pub wake: TwoCompartmentRates,
    pub sleep: TwoCompartmentRates,
}

impl TwoCompartmentModel {
    /// Sleep transfer is `a` times the waking one; clearance is shared.
    pub fn scaled(input_wake: f64, input_sleep: f64, a12_wake: f64, k: f64, a: f64) -> Self {
        Self {
            wake: TwoCompartmentRates {
                input: input_wake,
                a12: a12_wake,
                k,
            },
            sleep: TwoCompartmentRates {
                input: input_sleep,
                a12: a * a12_wake,
                k,
            },
        }
    }

    /// Rates fitted for the phase-plane view.
    pub fn phase_plane() -> Self {
        Self::scaled(9.992750, 7.210033, 0.476125, 0.240897, 1.01)
    }

    /// Rates fitted for the long-run simulation.
    pub fn simulation() -> Self {
        Self::scaled(55.557583, 7.348874, 0.073739, 0.346573, 1.01)
    }

    pub const SIMULATION_INITIAL_STATE: [f64; 2] = [600.0, 15.5];

    pub fn rates(&self, regime: Regime) -> &TwoCompartmentRates {
        match regime {
            Regime::Wake => &self.wake,
            Regime::Sleep => &self.sleep,
        }
    }
}

impl CompartmentModel for TwoCompartmentModel {
    fn variables(&self) -> &'static [&'static str] {
        &["B", "P"]
    }

    fn derivative(&self, regime: Regime, x: &[f64], out: &mut [f64]) {
        let r = self.rates(regime);
        out[0] = r.input - r.a12 * x[0];
        out[1] = r.a12 * x[0] - r.k * x[1];
    }

    fn equilibrium(&self, regime: Regime) -> Vec<f64> {
        let r = self.rates(regime);
        vec![r.input / r.a12, r.input / r.k]
    }

    fn symbolic_model(&self) -> Result<SymbolicModel, ParseError> {
        parse(["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"])
    }

    fn parameter_values(&self, regime: Regime) -> ParameterAssignment {
        let r = self.rates(regime);
        [("A", r.input), ("a12", r.a12), ("k", r.k)]
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreeCompartmentRates {
    pub input: f64,
    /// Brain to CSF.
    pub a12: f64,
    /// Brain to plasma.
    pub a13: f64,
    /// CSF to plasma.
    pub a23: f64,
    pub k: f64,
}

/// Brain (`B`), CSF (`C`) and plasma (`P`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreeCompartmentModel {
    pub wake: ThreeCompartmentRates,
    pub sleep: ThreeCompartmentRates,
}

impl ThreeCompartmentModel {
    /// All transfer rates scale by `a` during sleep; clearance is shared.
    pub fn scaled(
        input_wake: f64,
        input_sleep: f64,
        a12_wake: f64,
        a13_wake: f64,
        a23_wake: f64,
        k: f64,
        a: f64,
    ) -> Self {
        Self {
            wake: ThreeCompartmentRates {
                input: input_wake,
                a12: a12_wake,
                a13: a13_wake,
                a23: a23_wake,
                k,
            },
            sleep: ThreeCompartmentRates {
                input: input_sleep,
                a12: a * a12_wake,
                a13: a * a13_wake,
                a23: a * a23_wake,
                k,
            },
        }
    }

    /// Wake rates with an independent sleep multiplier per rate.
    pub fn phase_plane() -> Self {
        let wake = ThreeCompartmentRates {
            input: 12.063,
            a12: 1.623,
            a13: 0.199,
            a23: 0.00572,
            k: 0.300,
        };
        let sleep = ThreeCompartmentRates {
            input: 0.782 * wake.input,
            a12: 2.505 * wake.a12,
            a13: 4.618 * wake.a13,
            a23: 5.190 * wake.a23,
            k: 4.670 * wake.k,
        };
        Self { wake, sleep }
    }

    pub fn simulation() -> Self {
        Self::scaled(59.935858, 7.443667, 0.346573, 0.1, 0.057762, 0.346573, 1.01)
    }

    pub const SIMULATION_INITIAL_STATE: [f64; 3] = [600.0, 600.0, 15.0];

    pub fn rates(&self, regime: Regime) -> &ThreeCompartmentRates {
        match regime {
            Regime::Wake => &self.wake,
            Regime::Sleep => &self.sleep,
        }
    }
}

impl CompartmentModel for ThreeCompartmentModel {
    fn variables(&self) -> &'static [&'static str] {
        &["B", "C", "P"]
    }

    fn derivative(&self, regime: Regime, x: &[f64], out: &mut [f64]) {
        let r = self.rates(regime);
        out[0] = r.input - (r.a13 + r.a12) * x[0];
        out[1] = r.a12 * x[0] - r.a23 * x[1];
        out[2] = r.a23 * x[1] + r.a13 * x[0] - r.k * x[2];
    }

    fn equilibrium(&self, regime: Regime) -> Vec<f64> {
        let r = self.rates(regime);
        let brain = r.input / (r.a12 + r.a13);
        vec![brain, r.a12 * brain / r.a23, r.input / r.k]
    }

    fn symbolic_model(&self) -> Result<SymbolicModel, ParseError> {
        parse([
            "dB/dt = A - (a13 + a12)*B",
            "dC/dt = a12*B - a23*C",
            "dP/dt = a23*C + a13*B - k*P",
        ])
    }

    fn parameter_values(&self, regime: Regime) -> ParameterAssignment {
        let r = self.rates(regime);
        [
            ("A", r.input),
            ("a12", r.a12),
            ("a13", r.a13),
            ("a23", r.a23),
            ("k", r.k),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

/// A model frozen in one regime.
#[derive(Debug, Clone, Copy)]
pub struct InRegime<'a, M: ?Sized> {
    pub model: &'a M,
    pub regime: Regime,
}

impl<M: CompartmentModel + ?Sized> DynamicalSystem<f64> for InRegime<'_, M> {
    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        self.model.derivative(self.regime, x, out);
    }
}

/// A model whose regime follows the clock.
#[derive(Debug, Clone, Copy)]
pub struct Cycled<'a, M: ?Sized> {
    pub model: &'a M,
    pub cycle: SleepWakeCycle,
}

impl<M: CompartmentModel + ?Sized> DynamicalSystem<f64> for Cycled<'_, M> {
    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.model.derivative(self.cycle.regime_at(t), x, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equilibrium::solve_equilibria;
    use crate::stability::{build_jacobian, classify, evaluate_stability, StabilityClass};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn cycle_switches_at_eight_and_midnight() {
        let cycle = SleepWakeCycle::default();
        assert_eq!(cycle.regime_at(0.0), Regime::Sleep);
        assert_eq!(cycle.regime_at(7.99), Regime::Sleep);
        assert_eq!(cycle.regime_at(8.0), Regime::Wake);
        assert_eq!(cycle.regime_at(23.99), Regime::Wake);
        assert_eq!(cycle.regime_at(24.0), Regime::Sleep);
        assert_eq!(cycle.regime_at(24.0 * 97.0 + 10.0), Regime::Wake);
    }

    #[test]
    fn sleep_rates_scale_transfer_only() {
        let model = TwoCompartmentModel::simulation();
        assert!(close(model.sleep.a12, 1.01 * 0.073739));
        assert_eq!(model.sleep.k, model.wake.k);
        assert_eq!(model.sleep.input, 7.348874);

        let three = ThreeCompartmentModel::simulation();
        assert!(close(three.sleep.a23, 1.01 * 0.057762));
        assert_eq!(three.sleep.k, 0.346573);
    }

    #[test]
    fn closed_form_equilibria_are_stationary() {
        let two = TwoCompartmentModel::phase_plane();
        let three = ThreeCompartmentModel::phase_plane();
        for regime in [Regime::Wake, Regime::Sleep] {
            let mut out = [1.0; 2];
            two.derivative(regime, &two.equilibrium(regime), &mut out);
            assert!(out.iter().all(|v| v.abs() < 1e-9), "{out:?}");

            let mut out = [1.0; 3];
            three.derivative(regime, &three.equilibrium(regime), &mut out);
            assert!(out.iter().all(|v| v.abs() < 1e-9), "{out:?}");
        }
        let wake = two.equilibrium(Regime::Wake);
        assert!(close(wake[0], 9.992750 / 0.476125));
        assert!(close(wake[1], 9.992750 / 0.240897));
    }

    #[test]
    fn symbolic_model_agrees_with_closed_form() {
        let model = ThreeCompartmentModel::simulation();
        let symbolic = model.symbolic_model().expect("fixed equations parse");
        let branches = solve_equilibria(&symbolic).expect("linear system");
        assert_eq!(branches.len(), 1);
        let jacobian = build_jacobian(&symbolic).expect("polynomial");

        for regime in [Regime::Wake, Regime::Sleep] {
            let values = model.parameter_values(regime);
            let point = branches[0].evaluate(&values).expect("all parameters bound");
            for (numeric, expected) in point.iter().zip(model.equilibrium(regime)) {
                assert!(close(numeric.re, expected), "{numeric} vs {expected}");
                assert!(numeric.im.abs() < 1e-12);
            }
            let spectrum = evaluate_stability(&jacobian, &branches[0], &values).expect("finite");
            assert_eq!(classify(&spectrum), StabilityClass::StableNode);
        }
    }

    #[test]
    fn adapters_pick_the_regime() {
        let model = TwoCompartmentModel::simulation();
        let x = [10.0, 1.0];
        let mut frozen = [0.0; 2];
        InRegime {
            model: &model,
            regime: Regime::Sleep,
        }
        .apply(12.0, &x, &mut frozen);

        let mut cycled = [0.0; 2];
        let system = Cycled {
            model: &model,
            cycle: SleepWakeCycle::default(),
        };
        system.apply(3.0, &x, &mut cycled);
        assert_eq!(frozen, cycled);
        system.apply(12.0, &x, &mut cycled);
        assert!(close(cycled[0], 55.557583 - 0.073739 * 10.0));
        assert_eq!(system.dimension(), 2);
    }
}
