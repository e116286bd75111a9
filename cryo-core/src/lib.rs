//! Building blocks for shallow ice-flow models.
//!
//! - a domain-decomposed structured [`grid`] with collective reductions ([`comm`])
//! - ghosted multi-component [`field`]s, masks and standard variable metadata
//! - run-time [`config`]uration
//! - [`rheology`] (flow laws and their factory) and [`basal_resistance`] laws
//! - Q1 finite elements ([`fem`]) and a distributed Krylov [`linear_solver`]

pub mod basal_resistance;
pub mod comm;
pub mod config;
pub mod diagnostics;
pub mod enthalpy;
pub mod errors;
pub mod fem;
pub mod field;
pub mod grid;
pub mod io;
pub mod linear_solver;
pub mod mask;
pub mod rheology;
pub mod standard_variables;
pub mod units;
pub mod variable;
