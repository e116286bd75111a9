//! Linearization of the SSA with respect to the vertically averaged hardness.
//!
//! Inverse methods estimate a design variable `ζ` (the hardness `B = d(ζ)`, see
//! [`design`]) from observed velocities. They need the forward residual
//! `R(u, ζ)`, its Jacobians with respect to the state `u` and to `ζ`, and the
//! linearization of the implicit map `u = F(ζ)`:
//!
//! $$ DF\, dζ = -J_{state}^{-1} J_{design}\, dζ, \qquad
//!    DF^T du = -J_{design}^T J_{state}^{-T} du $$
//!
//! These are provided by [`HardavForwardProblem`].

pub mod design;
pub mod forward_problem;

pub use design::DesignVariableParameterization;
pub use forward_problem::HardavForwardProblem;
