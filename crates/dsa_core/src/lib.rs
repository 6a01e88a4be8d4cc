/// The `dsa_core` crate is the analysis engine behind the dynamical system explorer.
/// It turns `dX/dt = ...` equations into a symbolic model and answers questions about it
/// in closed form wherever the algebra allows, falling back to numerics only for
/// eigenvalues, sweeps and trajectories.
///
/// Key components:
/// - **Expressions**: canonical symbolic `Expr` with rewriting (`algebra`), symbolic
///   differentiation (`derivative`) and plain/LaTeX rendering (`format`).
/// - **Model**: `parse` builds a `SymbolicModel`; `equation_engine` holds the expression
///   grammar and the bytecode VM used for fast numeric evaluation.
/// - **Analysis**: `solve_equilibria`, `build_jacobian` + `evaluate_stability`, and
///   parameter `sweep`s over equilibrium branches.
/// - **Numerics**: phase-plane vector fields, the RK4 integrator and the hard-coded
///   sleep-wake compartment models.
pub mod algebra;
pub mod bifurcation;
pub mod compartment;
pub mod derivative;
pub mod equation_engine;
pub mod equilibrium;
pub mod error;
pub mod expr;
pub mod format;
pub mod model;
pub mod phase;
pub mod simulation;
pub mod solvers;
pub mod stability;
pub mod traits;

pub use bifurcation::{bifurcation_diagram, sweep, BranchCurve, SweepRange};
pub use equilibrium::{solve_equilibria, solve_equilibria_with, EquilibriumSolution, SolverSettings};
pub use error::{
    ComplexResultError, DifferentiationError, ExpressionError, MissingParameterError,
    ParseError, SingularSystemError, StabilityError, SweepError, UnsolvableCause,
    UnsolvableSystemError,
};
pub use expr::{Expr, Func};
pub use model::{parse, ParameterAssignment, SymbolicModel};
pub use stability::{
    build_jacobian, classify, evaluate_stability, evaluate_stability_with, JacobianMatrix,
    Spectrum, StabilityClass, StabilitySettings,
};
