//! Physical components built on `cryo-core`.
//!
//! - [`geometry`]: ice thickness, bed, sea level and the derived surface and cell type
//! - [`stressbalance`]: shallow stress balance models and the finite-element SSA solver
//! - [`inverse`]: linearization of the SSA with respect to the vertically averaged hardness
//! - [`ocean`]: sub-shelf ocean models (prescribed fields and the PICO box model)

pub mod geometry;
pub mod inverse;
pub mod ocean;
pub mod stressbalance;
