//! WASM bindings for `dsa_core`.
//!
//! `WasmModel` wraps a user-entered equation system; `WasmCompartmentModel` wraps the
//! built-in sleep-wake clearance models. Results cross the boundary as serde values and
//! errors as strings.

mod analysis;
mod compartment;
mod payload;

pub use analysis::WasmModel;
pub use compartment::WasmCompartmentModel;
