//! Finite-element solver for the shallow shelf approximation.
//!
//! The SSA is the nonlinear elliptic system
//!
//! $$ \nabla \cdot (2 \nu H D) - \beta u = \rho g H \nabla s $$
//!
//! for the vertically averaged velocity `u`. It is discretized with Q1 elements
//! (see [`cryo_core::fem`]) and solved with Newton's method, backtracking line search
//! and the distributed GMRES solver.
//!
//! Weak form, with `D = [u_x, v_y, ½(u_y + v_x)]` and test function `φ_k`:
//!
//! $$ R_k = \int \eta\, T_k(D) + \beta\, u\, φ_k - τ_d\, φ_k $$
//!
//! where `η = 2(ε + ν H)` and
//! `T_k(D) = (φ_x (2 D_0 + D_1) + φ_y D_2, φ_y (2 D_1 + D_0) + φ_x D_2)`.
//! Rows of Dirichlet nodes are replaced by `w (u - u_bc)`, where `w` is
//! `ssafem.dirichlet_scale` times the notional strength `2 ν_c H_min` of thin ice.

use cryo_core::basal_resistance::BasalResistanceLaw;
use cryo_core::config::Config;
use cryo_core::enthalpy::EnthalpyConverter;
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::fem::{
    nodal_masks, nodal_values, nodal_vectors, scatter_add, DirichletData, Element,
    ElementContribution, Germ, Quadrature, VectorGradient, N_CHI, N_QUAD,
};
use cryo_core::field::{Field, Ghosts, Vector2};
use cryo_core::grid::Grid;
use cryo_core::linear_solver::{
    DistributedMatrix, DofLayout, KrylovSettings, KrylovSolver, LinearSolver,
};
use cryo_core::mask::CellType;
use cryo_core::rheology::{create_flow_law, second_invariant_2d, FlowLaw};
use cryo_core::standard_variables::VAR_HARDAV;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::StressBalanceInputs;

/// Shortest line search step before the Newton iteration gives up.
const MIN_STEP_LENGTH: f64 = 1.0e-3;
/// Sufficient decrease parameter of the line search.
const ARMIJO: f64 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaParameters {
    /// Regularization added to `ν H` (Pa s m).
    pub epsilon: f64,
    /// Below this thickness `ν H` is replaced by `constant_nu * min_thickness`.
    pub min_thickness: f64,
    pub constant_nu: f64,
    /// Drag coefficient of ice-free land.
    pub beta_ice_free_bedrock: f64,
    /// Scale of the Dirichlet rows, relative to the notional strength of thin ice.
    pub dirichlet_scale: f64,
    pub ice_density: f64,
    pub standard_gravity: f64,
    pub max_iterations: usize,
    /// Newton stops when the residual norm is this fraction of the residual at
    /// zero velocity.
    pub rtol: f64,
    /// Newton stops when the step is this small relative to the solution.
    pub stol: f64,
    pub ksp: KrylovSettings,
}

impl Default for SsaParameters {
    fn default() -> Self {
        Self {
            epsilon: 1.0e13,
            min_thickness: 50.0,
            constant_nu: 9.48e14,
            beta_ice_free_bedrock: 1.8e9,
            dirichlet_scale: 1.0,
            ice_density: 910.0,
            standard_gravity: 9.81,
            max_iterations: 50,
            rtol: 1.0e-8,
            stol: 1.0e-10,
            ksp: KrylovSettings::default(),
        }
    }
}

impl SsaParameters {
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        Ok(Self {
            epsilon: config.get_number("ssa.epsilon")?,
            min_thickness: config.get_number("ssa.strength_extension.min_thickness")?,
            constant_nu: config.get_number("ssa.strength_extension.constant_nu")?,
            beta_ice_free_bedrock: config.get_number("basal_resistance.beta_ice_free_bedrock")?,
            dirichlet_scale: config.get_number("ssafem.dirichlet_scale")?,
            ice_density: config.get_number("constants.ice.density")?,
            standard_gravity: config.get_number("constants.standard_gravity")?,
            max_iterations: config.get_count("ssafem.newton.max_iterations")?,
            rtol: config.get_number("ssafem.newton.rtol")?,
            stol: config.get_number("ssafem.newton.stol")?,
            ksp: KrylovSettings::from_config(config, "ssafem.ksp")?,
        })
    }
}

/// Outcome of a converged Newton solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaReport {
    pub iterations: usize,
    pub residual_norm: f64,
    pub initial_residual_norm: f64,
}

/// Coefficients of the SSA, copied with a one-point halo so that every element
/// touching an owned node can be evaluated.
#[derive(Debug, Clone)]
pub struct SsaCoefficients {
    thickness: Field,
    hardness: Field,
    tauc: Field,
    cell_type: Field,
    driving_stress: Field,
    bc_mask: Option<Field>,
    bc_values: Option<Field>,
}

/// Coefficients of one element at its quadrature points.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementCoefficients {
    pub thickness: [f64; N_QUAD],
    pub hardness: [f64; N_QUAD],
    pub tauc: [f64; N_QUAD],
    pub driving_stress: [Vector2; N_QUAD],
    pub cell_type: [CellType; N_QUAD],
}

impl SsaCoefficients {
    /// Collect the coefficients from the model inputs. Collective.
    ///
    /// The vertically averaged hardness is taken from `ice_hardness` if given and
    /// computed from the enthalpy columns otherwise.
    pub fn new(ssa: &SsaFem, inputs: &StressBalanceInputs) -> CryoResult<Self> {
        let geometry = inputs.geometry;
        let grid = geometry.grid();

        let hardness = match (inputs.ice_hardness, inputs.ice_enthalpy) {
            (Some(hardness), _) => hardness.ghosted(1)?,
            (None, Some(enthalpy)) => {
                enthalpy.values.check_dof(enthalpy.levels.len())?;
                let mut hardness = Field::scalar(grid, &VAR_HARDAV, Ghosts::With(1));
                for (i, j) in grid.points() {
                    let column: Vec<f64> = (0..enthalpy.levels.len())
                        .map(|k| enthalpy.values.get_k(i, j, k))
                        .collect();
                    let value = ssa.flow_law.averaged_hardness(
                        geometry.ice_thickness.get(i, j),
                        enthalpy.levels,
                        &column,
                    )?;
                    hardness.set(i, j, value);
                }
                hardness.update_ghosts();
                hardness
            }
            (None, None) => return Err(CryoError::MissingField(VAR_HARDAV.name.to_string())),
        };

        let bc_mask = inputs.bc_mask.map(|m| m.ghosted(1)).transpose()?;
        let bc_values = match inputs.bc_values {
            Some(values) => {
                values.check_dof(2)?;
                Some(values.ghosted(1)?)
            }
            None => None,
        };

        Ok(Self {
            thickness: geometry.ice_thickness.ghosted(1)?,
            hardness,
            tauc: inputs.basal_yield_stress.ghosted(1)?,
            cell_type: geometry.cell_type.ghosted(1)?,
            driving_stress: driving_stress(ssa, inputs)?,
            bc_mask,
            bc_values,
        })
    }

    pub fn thickness(&self) -> &Field {
        &self.thickness
    }

    pub fn hardness(&self) -> &Field {
        &self.hardness
    }

    pub fn driving_stress(&self) -> &Field {
        &self.driving_stress
    }

    pub fn bc_mask(&self) -> Option<&Field> {
        self.bc_mask.as_ref()
    }

    /// Replace the vertically averaged hardness. Collective.
    pub fn set_hardness(&mut self, hardness: &Field) -> CryoResult<()> {
        hardness.check_dof(1)?;
        self.hardness = hardness.ghosted(1)?;
        Ok(())
    }

    pub fn dirichlet(&self, weight: f64) -> DirichletData<'_> {
        DirichletData::new(self.bc_mask.as_ref(), self.bc_values.as_ref(), weight)
    }

    pub fn homogeneous_dirichlet(&self, weight: f64) -> DirichletData<'_> {
        DirichletData::homogeneous(self.bc_mask.as_ref(), weight)
    }

    pub(crate) fn at_element(&self, quadrature: &Quadrature, element: &Element) -> ElementCoefficients {
        let driving = quadrature.vector_gradients(&nodal_vectors(&self.driving_stress, element));
        ElementCoefficients {
            thickness: quadrature.values(&nodal_values(&self.thickness, element)),
            hardness: quadrature.values(&nodal_values(&self.hardness, element)),
            tauc: quadrature.values(&nodal_values(&self.tauc, element)),
            driving_stress: driving.map(|g| g.value),
            cell_type: nodal_masks(&self.cell_type, element).map(CellType::from_int),
        }
    }
}

/// `τ_d = -ρ g H ∇s`, with one-sided differences at the edges of the domain.
fn driving_stress(ssa: &SsaFem, inputs: &StressBalanceInputs) -> CryoResult<Field> {
    let geometry = inputs.geometry;
    let grid = geometry.grid();
    let surface = geometry.ice_surface_elevation.ghosted(1)?;
    let rho_g = ssa.parameters.ice_density * ssa.parameters.standard_gravity;
    let (mx, my) = (grid.mx(), grid.my());

    let mut result = Field::work(grid, "driving_stress", 2, Ghosts::With(1));
    for (i, j) in grid.points() {
        let pressure = rho_g * geometry.ice_thickness.get(i, j);
        if pressure <= 0.0 {
            result.set_vector(i, j, Vector2::default());
            continue;
        }
        let s = surface.star(i, j);
        let h_x = if mx < 2 {
            0.0
        } else if i == 0 {
            (s.e - s.ij) / grid.dx()
        } else if i == mx - 1 {
            (s.ij - s.w) / grid.dx()
        } else {
            (s.e - s.w) / (2.0 * grid.dx())
        };
        let h_y = if my < 2 {
            0.0
        } else if j == 0 {
            (s.n - s.ij) / grid.dy()
        } else if j == my - 1 {
            (s.ij - s.s) / grid.dy()
        } else {
            (s.n - s.s) / (2.0 * grid.dy())
        };
        result.set_vector(i, j, Vector2::new(-pressure * h_x, -pressure * h_y));
    }
    result.update_ghosts();
    Ok(result)
}

/// `[u_x, v_y, ½(u_y + v_x)]`
pub(crate) fn strain_rates(u: &VectorGradient) -> [f64; 3] {
    [u.dx.u, u.dy.v, 0.5 * (u.dy.u + u.dx.v)]
}

pub(crate) fn strain_rate_invariant(u: &VectorGradient) -> f64 {
    second_invariant_2d(u.dx.u, u.dy.u, u.dx.v, u.dy.v)
}

/// `T_k(D)`: derivative of the strain rate invariant along test function `φ_k`
/// (also the stress direction in the weak form).
pub(crate) fn stress_direction(phi: &Germ, d: &[f64; 3]) -> Vector2 {
    Vector2::new(
        phi.dx * (2.0 * d[0] + d[1]) + phi.dy * d[2],
        phi.dy * (2.0 * d[1] + d[0]) + phi.dx * d[2],
    )
}

pub struct SsaFem {
    grid: Arc<Grid>,
    parameters: SsaParameters,
    flow_law: FlowLaw,
    sliding_law: BasalResistanceLaw,
    quadrature: Quadrature,
    layout: DofLayout,
    solver: KrylovSolver,
}

impl std::fmt::Debug for SsaFem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsaFem")
            .field("flow_law", &self.flow_law.name())
            .field("sliding_law", &self.sliding_law)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl SsaFem {
    pub fn new(grid: &Arc<Grid>, config: &Config) -> CryoResult<Self> {
        let ec = EnthalpyConverter::from_config(config)?;
        let parameters = SsaParameters::from_config(config)?;
        Ok(Self {
            grid: Arc::clone(grid),
            parameters,
            flow_law: create_flow_law("ssa_", config, &ec)?,
            sliding_law: BasalResistanceLaw::from_config(config)?,
            quadrature: Quadrature::for_grid(grid),
            layout: DofLayout::new(grid, 2),
            solver: KrylovSolver::new(parameters.ksp),
        })
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn parameters(&self) -> &SsaParameters {
        &self.parameters
    }

    pub fn flow_law(&self) -> &FlowLaw {
        &self.flow_law
    }

    pub fn quadrature(&self) -> &Quadrature {
        &self.quadrature
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn linear_solver(&self) -> &KrylovSolver {
        &self.solver
    }

    /// Use different stopping criteria for the linear solves.
    pub fn set_linear_solver_settings(&mut self, settings: KrylovSettings) {
        self.parameters.ksp = settings;
        self.solver = KrylovSolver::new(settings);
    }

    /// `η = 2(ε + ν H)` and `dη/dγ`, with the strength extension for thin ice.
    pub(crate) fn viscosity(&self, thickness: f64, hardness: f64, gamma: f64) -> (f64, f64) {
        let p = &self.parameters;
        if thickness < p.min_thickness {
            (2.0 * p.constant_nu * p.min_thickness, 0.0)
        } else {
            let (nu, dnu) = self.flow_law.effective_viscosity_with_derivative(hardness, gamma);
            (2.0 * (p.epsilon + nu * thickness), 2.0 * dnu * thickness)
        }
    }

    /// Weight of the Dirichlet rows of the residual and the Jacobian.
    pub fn dirichlet_weight(&self) -> f64 {
        let p = &self.parameters;
        p.dirichlet_scale * 2.0 * p.constant_nu * p.min_thickness
    }

    /// Basal drag `β` and `dβ/dα` (`α = ½|u|²`).
    fn drag(&self, cell_type: CellType, tauc: f64, u: Vector2) -> (f64, f64) {
        if cell_type.grounded_ice() {
            self.sliding_law.drag_with_derivative(tauc, u.u, u.v)
        } else if cell_type.ice_free_land() {
            (self.parameters.beta_ice_free_bedrock, 0.0)
        } else {
            (0.0, 0.0)
        }
    }

    /// Residual of the discrete SSA at `velocity` (which needs a fresh halo).
    /// Collective.
    pub fn residual(&self, coefficients: &SsaCoefficients, velocity: &Field) -> CryoResult<Field> {
        velocity.check_dof(2)?;
        let dirichlet = coefficients.dirichlet(self.dirichlet_weight());
        let q = &self.quadrature;
        let w = q.weights();

        let mut contributions = Vec::new();
        for element in Element::owned(&self.grid) {
            let mut u_nodal = nodal_vectors(velocity, &element);
            dirichlet.enforce_vector(&element, &mut u_nodal);
            let u = q.vector_gradients(&u_nodal);
            let c = coefficients.at_element(q, &element);

            let mut contribution = ElementContribution::<2>::zero(element);
            for p in 0..N_QUAD {
                let d = strain_rates(&u[p]);
                let (eta, _) = self.viscosity(c.thickness[p], c.hardness[p], strain_rate_invariant(&u[p]));
                let (beta, _) = self.drag(c.cell_type[p], c.tauc[p], u[p].value);
                let tau_d = c.driving_stress[p];
                let basal = u[p].value * beta;

                for k in 0..N_CHI {
                    let phi = q.germ(p, k);
                    let t = stress_direction(&phi, &d);
                    contribution.values[k][0] += w[p] * (eta * t.u + (basal.u - tau_d.u) * phi.val);
                    contribution.values[k][1] += w[p] * (eta * t.v + (basal.v - tau_d.v) * phi.val);
                }
            }
            contributions.push(contribution);
        }

        let mut residual = Field::work(&self.grid, "ssa_residual", 2, Ghosts::Without);
        scatter_add(&contributions, &mut residual);
        dirichlet.fix_residual_vector(velocity, &mut residual);
        Ok(residual)
    }

    /// Jacobian of [`SsaFem::residual`] at `velocity`. Collective.
    pub fn jacobian(&self, coefficients: &SsaCoefficients, velocity: &Field) -> CryoResult<DistributedMatrix> {
        velocity.check_dof(2)?;
        let dirichlet = coefficients.dirichlet(self.dirichlet_weight());
        let q = &self.quadrature;
        let w = q.weights();
        let layout = &self.layout;

        let mut entries = Vec::new();
        for element in Element::owned(&self.grid) {
            let nodes = element.nodes();
            let fixed = dirichlet.element_constraints(&element);
            let mut u_nodal = nodal_vectors(velocity, &element);
            dirichlet.enforce_vector(&element, &mut u_nodal);
            let u = q.vector_gradients(&u_nodal);
            let c = coefficients.at_element(q, &element);

            let mut block = [[[0.0; 4]; N_CHI]; N_CHI];
            for p in 0..N_QUAD {
                let d = strain_rates(&u[p]);
                let (eta, deta) = self.viscosity(c.thickness[p], c.hardness[p], strain_rate_invariant(&u[p]));
                let (beta, dbeta) = self.drag(c.cell_type[p], c.tauc[p], u[p].value);
                let v = u[p].value;

                for k in 0..N_CHI {
                    let phi_k = q.germ(p, k);
                    let t_k = stress_direction(&phi_k, &d);
                    for l in 0..N_CHI {
                        let phi_l = q.germ(p, l);
                        let t_l = stress_direction(&phi_l, &d);
                        let mass = phi_k.val * phi_l.val;

                        let uu = eta * (2.0 * phi_k.dx * phi_l.dx + 0.5 * phi_k.dy * phi_l.dy)
                            + deta * t_k.u * t_l.u
                            + beta * mass
                            + dbeta * v.u * v.u * mass;
                        let uv = eta * (phi_k.dx * phi_l.dy + 0.5 * phi_k.dy * phi_l.dx)
                            + deta * t_k.u * t_l.v
                            + dbeta * v.u * v.v * mass;
                        let vu = eta * (phi_k.dy * phi_l.dx + 0.5 * phi_k.dx * phi_l.dy)
                            + deta * t_k.v * t_l.u
                            + dbeta * v.u * v.v * mass;
                        let vv = eta * (2.0 * phi_k.dy * phi_l.dy + 0.5 * phi_k.dx * phi_l.dx)
                            + deta * t_k.v * t_l.v
                            + beta * mass
                            + dbeta * v.v * v.v * mass;

                        let b = &mut block[k][l];
                        b[0] += w[p] * uu;
                        b[1] += w[p] * uv;
                        b[2] += w[p] * vu;
                        b[3] += w[p] * vv;
                    }
                }
            }

            for (k, &(ik, jk)) in nodes.iter().enumerate() {
                if fixed[k] || !self.grid.is_owned(ik, jk) {
                    continue;
                }
                for (l, &(il, jl)) in nodes.iter().enumerate() {
                    if fixed[l] {
                        continue;
                    }
                    let b = block[k][l];
                    for (a, row_c) in [(0, 0), (1, 0), (2, 1), (3, 1)] {
                        let col_c = a % 2;
                        entries.push((
                            layout.global_index(ik, jk, row_c),
                            layout.global_index(il, jl, col_c),
                            b[a],
                        ));
                    }
                }
            }
        }

        if dirichlet.is_active() {
            for (i, j) in self.grid.points() {
                if dirichlet.constrained(i, j) {
                    for c in 0..2 {
                        let n = layout.global_index(i, j, c);
                        entries.push((n, n, dirichlet.weight()));
                    }
                }
            }
        }

        DistributedMatrix::from_triplets(layout, &entries)
    }

    /// Solve the SSA, using `velocity` as the initial guess and storing the
    /// solution in it. Collective.
    ///
    /// The relative tolerance is measured against the residual at zero velocity,
    /// which does not depend on the initial guess. Solving again from a converged
    /// velocity therefore takes no Newton iterations and leaves it unchanged.
    pub fn solve(&self, coefficients: &SsaCoefficients, velocity: &mut Field) -> CryoResult<SsaReport> {
        velocity.check_dof(2)?;
        let p = &self.parameters;

        let zero = Field::work(&self.grid, "zero_velocity", 2, Ghosts::With(1));
        let initial_residual_norm = self.residual_norm(&self.residual(coefficients, &zero)?)?;
        let target = p.rtol * initial_residual_norm;

        let mut x = velocity.ghosted(1)?;
        let mut residual = self.residual(coefficients, &x)?;
        let mut norm = self.residual_norm(&residual)?;
        log::debug!("SSA Newton: initial residual norm {:.6e} (target {:.3e})", norm, target);

        let mut iterations = 0;
        while norm > target {
            if iterations >= p.max_iterations {
                return Err(CryoError::SolverDivergence {
                    iterations,
                    residual_norm: norm,
                });
            }
            iterations += 1;

            let jacobian = self.jacobian(coefficients, &x)?;
            let mut step: Vec<f64> = residual.owned_values().iter().map(|r| -r).collect();
            self.solver.solve(&jacobian, &mut step).check("SSA Newton step")?;

            let x_values = x.owned_values();
            let x_norm = self.layout.norm(&x_values);
            let step_norm = self.layout.norm(&step);

            let mut lambda = 1.0;
            loop {
                let mut trial = x.clone();
                let values: Vec<f64> = x_values
                    .iter()
                    .zip(&step)
                    .map(|(x, dx)| x + lambda * dx)
                    .collect();
                trial.set_owned_values(&values)?;
                trial.update_ghosts();

                let trial_residual = self.residual(coefficients, &trial)?;
                let trial_norm = self.residual_norm(&trial_residual)?;
                if trial_norm <= (1.0 - ARMIJO * lambda) * norm {
                    x = trial;
                    residual = trial_residual;
                    norm = trial_norm;
                    break;
                }
                lambda *= 0.5;
                if lambda < MIN_STEP_LENGTH {
                    return Err(CryoError::SolverDivergence {
                        iterations,
                        residual_norm: norm,
                    });
                }
            }
            log::debug!(
                "SSA Newton iteration {}: residual norm {:.6e}, step length {}",
                iterations,
                norm,
                lambda
            );

            if lambda * step_norm <= p.stol * x_norm {
                break;
            }
        }

        velocity.copy_from(&x)?;
        velocity.update_ghosts();
        Ok(SsaReport {
            iterations,
            residual_norm: norm,
            initial_residual_norm,
        })
    }

    fn residual_norm(&self, residual: &Field) -> CryoResult<f64> {
        Ok(residual.dot(residual)?.sqrt())
    }
}
