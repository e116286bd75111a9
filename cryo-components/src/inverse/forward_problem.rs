//! The SSA as a function of the vertically averaged hardness.

use cryo_core::config::Config;
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::fem::{
    nodal_values, nodal_vectors, scatter_add, DirichletData, Element, ElementContribution, N_CHI,
    N_QUAD,
};
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::linear_solver::{DistributedMatrix, KrylovSettings, KrylovSolver, LinearSolver};
use cryo_core::standard_variables::{VAR_HARDAV, VAR_UBAR, VAR_VBAR};
use std::sync::Arc;

use super::design::DesignVariableParameterization;
use crate::stressbalance::ssafem::{strain_rate_invariant, strain_rates, stress_direction};
use crate::stressbalance::{with_halo, SsaCoefficients, SsaFem, SsaReport, StressBalanceInputs};

/// Cached state Jacobian. Only [`HardavForwardProblem::set_design`] marks it
/// dirty and only a rebuild makes it clean.
#[derive(Debug, Clone)]
enum StateJacobian {
    Dirty,
    Clean(DistributedMatrix),
}

/// Forward problem `R(u, ζ) = 0` of an SSA whose hardness is `B = d(ζ)`.
///
/// The design variable is shared, not copied: [`set_design`](Self::set_design)
/// keeps the `Arc` until the next call. Operations that depend on `ζ` fail with
/// [`CryoError::NotInitialized`] until a design has been set.
#[derive(Debug)]
pub struct HardavForwardProblem {
    ssa: SsaFem,
    coefficients: SsaCoefficients,
    parameterization: DesignVariableParameterization,
    zeta: Option<Arc<Field>>,
    /// `dB/dζ` at every node, with a halo.
    design_derivative: Field,
    fixed_design_locations: Option<Field>,
    velocity: Field,
    j_state: StateJacobian,
    linearization_solver: KrylovSolver,
}

impl HardavForwardProblem {
    /// Set up the problem for the geometry, yield stress and boundary conditions
    /// in `inputs`; any hardness in `inputs` is ignored. Collective.
    pub fn new(
        grid: &Arc<Grid>,
        config: &Config,
        parameterization: DesignVariableParameterization,
        inputs: &StressBalanceInputs,
    ) -> CryoResult<Self> {
        let ssa = SsaFem::new(grid, config)?;
        let placeholder = Field::scalar(grid, &VAR_HARDAV, Ghosts::Without);
        let coefficients = SsaCoefficients::new(&ssa, &(*inputs).with_hardness(&placeholder))?;

        let settings = KrylovSettings {
            rtol: config.get_number("inverse.ssa.ksp_rtol")?,
            ..ssa.parameters().ksp
        };

        Ok(Self {
            ssa,
            coefficients,
            parameterization,
            zeta: None,
            design_derivative: Field::work(grid, "hardav_design_derivative", 1, Ghosts::With(1)),
            fixed_design_locations: None,
            velocity: Field::new_vector(grid, "bar", [&VAR_UBAR, &VAR_VBAR], Ghosts::With(1)),
            j_state: StateJacobian::Dirty,
            linearization_solver: KrylovSolver::new(settings),
        })
    }

    pub fn ssa(&self) -> &SsaFem {
        &self.ssa
    }

    pub fn parameterization(&self) -> &DesignVariableParameterization {
        &self.parameterization
    }

    /// The SSA velocity at the design of the last [`linearize_at`](Self::linearize_at).
    pub fn velocity(&self) -> &Field {
        &self.velocity
    }

    pub fn design(&self) -> Option<&Arc<Field>> {
        self.zeta.as_ref()
    }

    /// The current hardness `d(ζ)`.
    pub fn hardness(&self) -> &Field {
        self.coefficients.hardness()
    }

    pub fn is_state_jacobian_current(&self) -> bool {
        matches!(self.j_state, StateJacobian::Clean(_))
    }

    /// Nodes (mask > 0.5) where design perturbations are forced to zero. Collective.
    pub fn set_fixed_design_locations(&mut self, mask: Option<&Field>) -> CryoResult<()> {
        self.fixed_design_locations = mask.map(|m| m.ghosted(1)).transpose()?;
        Ok(())
    }

    /// Use `zeta` as the design. Does not solve the SSA. Collective.
    pub fn set_design(&mut self, zeta: Arc<Field>) -> CryoResult<()> {
        zeta.check_dof(1)?;
        let grid = zeta.grid().clone();

        let mut hardness = Field::scalar(&grid, &VAR_HARDAV, Ghosts::With(1));
        for (i, j) in grid.points() {
            let (value, derivative) = self.parameterization.value_with_derivative(zeta.get(i, j));
            hardness.set(i, j, value);
            self.design_derivative.set(i, j, derivative);
        }
        hardness.update_ghosts();
        self.design_derivative.update_ghosts();
        self.coefficients.set_hardness(&hardness)?;

        self.zeta = Some(zeta);
        self.j_state = StateJacobian::Dirty;
        Ok(())
    }

    /// Set the design and solve the SSA for the corresponding velocity, starting
    /// from the previous solution. Collective.
    pub fn linearize_at(&mut self, zeta: Arc<Field>) -> CryoResult<SsaReport> {
        self.set_design(zeta)?;
        let report = self.ssa.solve(&self.coefficients, &mut self.velocity)?;
        log::debug!(
            "hardav forward problem solved in {} Newton iteration(s)",
            report.iterations
        );
        Ok(report)
    }

    fn require_design(&self) -> CryoResult<()> {
        match self.zeta {
            Some(_) => Ok(()),
            None => Err(CryoError::NotInitialized(
                "design variable of the hardav forward problem".to_string(),
            )),
        }
    }

    /// `R(u, ζ)` at the current design. Collective.
    pub fn assemble_residual(&self, u: &Field) -> CryoResult<Field> {
        self.require_design()?;
        self.ssa.residual(&self.coefficients, &*with_halo(u)?)
    }

    /// `∂R/∂u` at `u` and the current design. Collective.
    pub fn assemble_jacobian_state(&self, u: &Field) -> CryoResult<DistributedMatrix> {
        self.require_design()?;
        self.ssa.jacobian(&self.coefficients, &*with_halo(u)?)
    }

    fn dirichlet(&self) -> DirichletData<'_> {
        self.coefficients.dirichlet(self.ssa.dirichlet_weight())
    }

    fn fixed_design(&self) -> DirichletData<'_> {
        DirichletData::homogeneous(self.fixed_design_locations.as_ref(), 1.0)
    }

    /// `J_design dζ` at the state `u`. Rows of Dirichlet nodes are zero. Collective.
    pub fn apply_jacobian_design(&self, u: &Field, dzeta: &Field) -> CryoResult<Field> {
        self.require_design()?;
        u.check_dof(2)?;
        dzeta.check_dof(1)?;
        let u = with_halo(u)?;
        let dzeta = with_halo(dzeta)?;
        let dirichlet = self.dirichlet();
        let fixed = self.fixed_design();
        let q = self.ssa.quadrature();
        let w = q.weights();
        let min_thickness = self.ssa.parameters().min_thickness;

        let mut contributions = Vec::new();
        for element in Element::owned(self.ssa.grid()) {
            let mut u_nodal = nodal_vectors(&u, &element);
            dirichlet.enforce_vector(&element, &mut u_nodal);
            let u_q = q.vector_gradients(&u_nodal);

            let mut dzeta_e = nodal_values(&dzeta, &element);
            fixed.enforce_homogeneous(&element, &mut dzeta_e);
            let derivative = nodal_values(&self.design_derivative, &element);
            let mut db_e = [0.0; N_CHI];
            for k in 0..N_CHI {
                db_e[k] = derivative[k] * dzeta_e[k];
            }
            let db_q = q.values(&db_e);
            let thickness = q.values(&nodal_values(self.coefficients.thickness(), &element));

            let mut contribution = ElementContribution::<2>::zero(element);
            for p in 0..N_QUAD {
                if thickness[p] < min_thickness {
                    continue;
                }
                let d = strain_rates(&u_q[p]);
                let d_nuh = 2.0
                    * thickness[p]
                    * self
                        .ssa
                        .flow_law()
                        .effective_viscosity(db_q[p], strain_rate_invariant(&u_q[p]));
                for k in 0..N_CHI {
                    let t = stress_direction(&q.germ(p, k), &d);
                    contribution.values[k][0] += w[p] * d_nuh * t.u;
                    contribution.values[k][1] += w[p] * d_nuh * t.v;
                }
            }
            contributions.push(contribution);
        }

        let mut result = Field::work(self.ssa.grid(), "du", 2, Ghosts::Without);
        scatter_add(&contributions, &mut result);
        dirichlet.fix_residual_homogeneous(&mut result);
        Ok(result)
    }

    /// `J_design^T du` at the state `u`. Collective.
    pub fn apply_jacobian_design_transpose(&self, u: &Field, du: &Field) -> CryoResult<Field> {
        self.require_design()?;
        u.check_dof(2)?;
        du.check_dof(2)?;
        let u = with_halo(u)?;
        let du = with_halo(du)?;
        let dirichlet = self.dirichlet();
        let q = self.ssa.quadrature();
        let w = q.weights();
        let min_thickness = self.ssa.parameters().min_thickness;

        let mut contributions = Vec::new();
        for element in Element::owned(self.ssa.grid()) {
            let mut du_nodal = nodal_vectors(&du, &element);
            dirichlet.enforce_homogeneous_vector(&element, &mut du_nodal);
            let du_q = q.vector_gradients(&du_nodal);

            let mut u_nodal = nodal_vectors(&u, &element);
            dirichlet.enforce_vector(&element, &mut u_nodal);
            let u_q = q.vector_gradients(&u_nodal);

            let thickness = q.values(&nodal_values(self.coefficients.thickness(), &element));

            let mut contribution = ElementContribution::<1>::zero(element);
            for p in 0..N_QUAD {
                if thickness[p] < min_thickness {
                    continue;
                }
                let d = strain_rates(&u_q[p]);
                // ν is linear in B
                let d_nuh_db = 2.0
                    * thickness[p]
                    * self
                        .ssa
                        .flow_law()
                        .effective_viscosity(1.0, strain_rate_invariant(&u_q[p]));
                let g = &du_q[p];
                let s = g.dx.u * (2.0 * d[0] + d[1])
                    + g.dy.u * d[2]
                    + g.dy.v * (2.0 * d[1] + d[0])
                    + g.dx.v * d[2];
                for k in 0..N_CHI {
                    contribution.values[k][0] += w[p] * d_nuh_db * q.germ(p, k).val * s;
                }
            }
            contributions.push(contribution);
        }

        let grid = self.ssa.grid().clone();
        let mut result = Field::work(&grid, "dzeta", 1, Ghosts::Without);
        scatter_add(&contributions, &mut result);
        for (i, j) in grid.points() {
            let value = result.get(i, j) * self.design_derivative.get(i, j);
            result.set(i, j, value);
        }
        self.fixed_design().fix_residual_homogeneous(&mut result);
        Ok(result)
    }

    fn rebuild_state_jacobian(&mut self) -> CryoResult<()> {
        if let StateJacobian::Dirty = self.j_state {
            let matrix = self.assemble_jacobian_state(&self.velocity)?;
            self.j_state = StateJacobian::Clean(matrix);
        }
        Ok(())
    }

    fn state_jacobian(&self) -> CryoResult<&DistributedMatrix> {
        match &self.j_state {
            StateJacobian::Clean(matrix) => Ok(matrix),
            StateJacobian::Dirty => Err(CryoError::NotInitialized(
                "state Jacobian of the hardav forward problem".to_string(),
            )),
        }
    }

    /// `DF dζ = -J_state^{-1} J_design dζ` at the last linearization point.
    /// Collective.
    pub fn apply_linearization(&mut self, dzeta: &Field) -> CryoResult<Field> {
        self.require_design()?;
        self.rebuild_state_jacobian()?;

        let rhs = self.apply_jacobian_design(&self.velocity, dzeta)?;
        let mut values: Vec<f64> = rhs.owned_values().iter().map(|v| -v).collect();

        let reason = self
            .linearization_solver
            .solve(self.state_jacobian()?, &mut values);
        reason.check("HardavForwardProblem::apply_linearization solve")?;
        log::debug!("HardavForwardProblem::apply_linearization converged (KSP reason {})", reason);

        let mut du = Field::new_vector(self.ssa.grid(), "du", [&VAR_UBAR, &VAR_VBAR], Ghosts::Without);
        du.set_owned_values(&values)?;
        Ok(du)
    }

    /// `DF^T du = -J_design^T J_state^{-T} du` at the last linearization point.
    /// Collective.
    pub fn apply_linearization_transpose(&mut self, du: &Field) -> CryoResult<Field> {
        self.require_design()?;
        du.check_dof(2)?;
        self.rebuild_state_jacobian()?;

        let grid = self.ssa.grid().clone();
        let mut rhs = Field::work(&grid, "du", 2, Ghosts::Without);
        rhs.copy_from(du)?;
        self.dirichlet().fix_residual_homogeneous(&mut rhs);
        let mut values = rhs.owned_values();

        let transpose = self.state_jacobian()?.transpose()?;
        let reason = self.linearization_solver.solve(&transpose, &mut values);
        reason.check("HardavForwardProblem::apply_linearization_transpose solve")?;
        log::debug!(
            "HardavForwardProblem::apply_linearization_transpose converged (KSP reason {})",
            reason
        );

        let mut adjoint = Field::work(&grid, "adjoint", 2, Ghosts::With(1));
        adjoint.set_owned_values(&values)?;
        adjoint.update_ghosts();

        let mut dzeta = self.apply_jacobian_design_transpose(&self.velocity, &adjoint)?;
        dzeta.scale(-1.0);
        Ok(dzeta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use approx::assert_relative_eq;
    use cryo_core::field::Vector2;
    use cryo_core::standard_variables::VAR_TAUC;
    use cryo_core::units::m_per_year_to_m_per_s;

    struct Setup {
        grid: Arc<Grid>,
        config: Config,
        geometry: Geometry,
        tauc: Field,
        bc_mask: Field,
        bc_values: Field,
    }

    fn setup(glen_exponent: f64) -> Setup {
        let grid = Grid::serial(6, 5, 2000.0, 2000.0).unwrap();
        let mut config = Config::default();
        config.set_string("ssa_flow_law", "isothermal_glen");
        config.set_number("ssa_Glen_exponent", glen_exponent);
        config.set_flag("basal_resistance.pseudo_plastic.enabled", true);
        config.set_number("basal_resistance.pseudo_plastic.q", 1.0);
        config.set_number("ssafem.ksp.restart", 200.0);
        config.set_number("ssafem.ksp.rtol", 1.0e-12);

        let mut geometry = Geometry::new(&grid);
        for (i, j) in grid.points() {
            let thickness = 600.0 + 40.0 * i as f64 + 15.0 * j as f64;
            geometry.ice_thickness.set(i, j, thickness);
            geometry.bed_elevation.set(i, j, 500.0 - 2.0e-3 * grid.x(i));
        }
        geometry.ensure_consistency(&config).unwrap();

        let mut tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
        for (i, j) in grid.points() {
            tauc.set(i, j, 5.0e4 + 1.0e4 * ((i + 2 * j) % 3) as f64);
        }

        let mut bc_mask = Field::work(&grid, "bc_mask", 1, Ghosts::Without);
        let mut bc_values = Field::work(&grid, "bc_values", 2, Ghosts::Without);
        for j in 0..grid.my() {
            bc_mask.set(0, j, 1.0);
            bc_values.set_vector(0, j, Vector2::new(m_per_year_to_m_per_s(30.0), 0.0));
        }

        Setup {
            grid,
            config,
            geometry,
            tauc,
            bc_mask,
            bc_values,
        }
    }

    fn problem(s: &Setup, parameterization: DesignVariableParameterization) -> HardavForwardProblem {
        let inputs = StressBalanceInputs::new(&s.geometry, &s.tauc).with_dirichlet(&s.bc_mask, &s.bc_values);
        HardavForwardProblem::new(&s.grid, &s.config, parameterization, &inputs).unwrap()
    }

    fn pattern(grid: &Arc<Grid>, dof: usize, seed: usize, scale: f64) -> Field {
        let mut f = Field::work(grid, "pattern", dof, Ghosts::Without);
        for (i, j) in grid.points() {
            for k in 0..dof {
                let n = (i * 31 + j * 17 + k * 7 + seed * 13) % 23;
                f.set_k(i, j, k, scale * (n as f64 / 23.0 - 0.4));
            }
        }
        f
    }

    fn constant_design(grid: &Arc<Grid>, value: f64) -> Arc<Field> {
        let mut zeta = Field::work(grid, "zeta", 1, Ghosts::Without);
        zeta.fill(value);
        Arc::new(zeta)
    }

    fn velocity(grid: &Arc<Grid>) -> Field {
        let mut u = pattern(grid, 2, 1, m_per_year_to_m_per_s(40.0));
        for (i, j) in grid.points() {
            let v = u.vector(i, j);
            u.set_vector(i, j, Vector2::new(v.u + m_per_year_to_m_per_s(50.0), v.v));
        }
        u
    }

    #[test]
    fn test_operations_require_a_design() {
        let s = setup(3.0);
        let mut problem = problem(&s, DesignVariableParameterization::Identity { scale: 1.0e8 });
        let u = velocity(&s.grid);
        let dzeta = pattern(&s.grid, 1, 2, 1.0);
        assert!(matches!(problem.assemble_residual(&u), Err(CryoError::NotInitialized(_))));
        assert!(matches!(
            problem.apply_linearization(&dzeta),
            Err(CryoError::NotInitialized(_))
        ));
        assert!(!problem.is_state_jacobian_current());
        assert!(problem.design().is_none());
    }

    #[test]
    fn test_set_design_shares_and_converts() {
        let s = setup(3.0);
        let mut problem = problem(&s, DesignVariableParameterization::Square { scale: 1.0e8 });
        let zeta = constant_design(&s.grid, 1.5);
        problem.set_design(Arc::clone(&zeta)).unwrap();

        assert!(Arc::ptr_eq(problem.design().unwrap(), &zeta));
        assert_relative_eq!(problem.hardness().get(2, 3), 2.25e8);
    }

    #[test]
    fn test_jacobian_design_matches_finite_differences() {
        let s = setup(3.0);
        let mut problem = problem(&s, DesignVariableParameterization::Square { scale: 1.0e8 });
        let u = velocity(&s.grid);
        let zeta = constant_design(&s.grid, 1.2);
        let dzeta = pattern(&s.grid, 1, 3, 0.1);

        problem.set_design(Arc::clone(&zeta)).unwrap();
        let j_dzeta = problem.apply_jacobian_design(&u, &dzeta).unwrap();

        let h = 1.0e-4;
        let shifted = |sign: f64| {
            let mut z = (*zeta).clone();
            for (i, j) in s.grid.points() {
                z.set(i, j, zeta.get(i, j) + sign * h * dzeta.get(i, j));
            }
            Arc::new(z)
        };
        problem.set_design(shifted(1.0)).unwrap();
        let plus = problem.assemble_residual(&u).unwrap().owned_values();
        problem.set_design(shifted(-1.0)).unwrap();
        let minus = problem.assemble_residual(&u).unwrap().owned_values();

        let expected: Vec<f64> = plus.iter().zip(&minus).map(|(p, m)| (p - m) / (2.0 * h)).collect();
        let norm = expected.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!(norm > 0.0);
        for (fd, exact) in expected.iter().zip(j_dzeta.owned_values()) {
            assert!((fd - exact).abs() <= 1e-6 * norm, "{} vs {}", fd, exact);
        }
        // Dirichlet rows do not depend on the design
        assert_eq!(j_dzeta.vector(0, 2), Vector2::default());
    }

    #[test]
    fn test_jacobian_design_transpose_is_the_adjoint() {
        let s = setup(3.0);
        let mut problem = problem(&s, DesignVariableParameterization::Exp { scale: 1.0e8, epsilon: 1.0e-5 });
        let mut fixed = Field::work(&s.grid, "fixed", 1, Ghosts::Without);
        fixed.set(3, 2, 1.0);
        problem.set_fixed_design_locations(Some(&fixed)).unwrap();
        problem.set_design(constant_design(&s.grid, 0.3)).unwrap();

        let u = velocity(&s.grid);
        let dzeta = pattern(&s.grid, 1, 4, 1.0);
        let du = pattern(&s.grid, 2, 5, 1.0);

        let j_dzeta = problem.apply_jacobian_design(&u, &dzeta).unwrap();
        let jt_du = problem.apply_jacobian_design_transpose(&u, &du).unwrap();

        let lhs = j_dzeta.dot(&du).unwrap();
        let rhs = dzeta.dot(&jt_du).unwrap();
        assert_relative_eq!(lhs, rhs, max_relative = 1e-10);
        assert_eq!(jt_du.get(3, 2), 0.0);
    }

    #[test]
    fn test_linearization_and_its_transpose() {
        let s = setup(1.0);
        let mut problem = problem(&s, DesignVariableParameterization::Identity { scale: 1.0e14 });
        let report = problem.linearize_at(constant_design(&s.grid, 2.0)).unwrap();
        assert!(report.iterations >= 1);
        assert!(report.residual_norm < report.initial_residual_norm);
        assert!(!problem.is_state_jacobian_current());

        let dzeta = pattern(&s.grid, 1, 6, 0.1);
        let du = pattern(&s.grid, 2, 7, 1.0);

        let l_dzeta = problem.apply_linearization(&dzeta).unwrap();
        assert!(problem.is_state_jacobian_current());
        let lt_du = problem.apply_linearization_transpose(&du).unwrap();

        // J_state DF dζ = -J_design dζ
        let velocity = problem.velocity().clone();
        let j_state = problem.assemble_jacobian_state(&velocity).unwrap();
        let lhs = j_state.mul_vec(&l_dzeta.owned_values());
        let rhs = problem.apply_jacobian_design(&velocity, &dzeta).unwrap().owned_values();
        let scale = rhs.iter().map(|x| x * x).sum::<f64>().sqrt();
        for (a, b) in lhs.iter().zip(&rhs) {
            assert!((a + b).abs() <= 1e-8 * scale);
        }

        let forward = l_dzeta.dot(&du).unwrap();
        let adjoint = dzeta.dot(&lt_du).unwrap();
        assert_relative_eq!(forward, adjoint, max_relative = 1e-6);

        problem.set_design(constant_design(&s.grid, 2.0)).unwrap();
        assert!(!problem.is_state_jacobian_current());
    }
}
