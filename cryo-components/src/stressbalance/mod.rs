//! Shallow stress balance models.
//!
//! A [`ShallowStressBalance`] owns the vertically averaged ice velocity (`bar`) and
//! the basal frictional heating (`bfrict`). The way the velocity is obtained is
//! selected by `stress_balance.model`:
//!
//! - `none`: [`SlidingModel::Zero`], no sliding;
//! - `prescribed_sliding`: [`SlidingModel::Prescribed`], velocity read once from the
//!   file named by `prescribed_sliding_file`;
//! - `ssa`: [`SlidingModel::Ssa`], the shallow shelf approximation solved with
//!   [`SsaFem`].
//!
//! A model must be initialized with [`ShallowStressBalance::init`] before it is
//! updated.

pub mod diagnostics;
pub mod ssafem;

pub use ssafem::{SsaCoefficients, SsaFem, SsaParameters, SsaReport};

use cryo_core::basal_resistance::BasalResistanceLaw;
use cryo_core::config::Config;
use cryo_core::diagnostics::DiagnosticRegistry;
use cryo_core::enthalpy::EnthalpyConverter;
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::field::{Field, Ghosts, Vector2};
use cryo_core::grid::Grid;
use cryo_core::io::InputFiles;
use cryo_core::rheology::{create_flow_law, second_invariant_2d, FlowLaw};
use cryo_core::standard_variables::{VAR_BFRICT, VAR_UBAR, VAR_VBAR};
use std::borrow::Cow;
use std::sync::Arc;

use crate::geometry::Geometry;

pub const MODEL_NONE: &str = "none";
pub const MODEL_PRESCRIBED_SLIDING: &str = "prescribed_sliding";
pub const MODEL_SSA: &str = "ssa";

/// Enthalpy of ice columns: `values` has one component per level in `levels`
/// (heights above the base).
#[derive(Debug, Clone, Copy)]
pub struct ColumnEnthalpy<'a> {
    pub levels: &'a [f64],
    pub values: &'a Field,
}

/// Fields the stress balance reads on every update.
///
/// The SSA needs the vertically averaged hardness, given either directly
/// (`ice_hardness`) or as enthalpy columns to be averaged.
#[derive(Debug, Clone, Copy)]
pub struct StressBalanceInputs<'a> {
    pub geometry: &'a Geometry,
    pub basal_yield_stress: &'a Field,
    pub ice_hardness: Option<&'a Field>,
    pub ice_enthalpy: Option<ColumnEnthalpy<'a>>,
    /// Dirichlet locations (1 where the velocity is prescribed).
    pub bc_mask: Option<&'a Field>,
    pub bc_values: Option<&'a Field>,
}

impl<'a> StressBalanceInputs<'a> {
    pub fn new(geometry: &'a Geometry, basal_yield_stress: &'a Field) -> Self {
        Self {
            geometry,
            basal_yield_stress,
            ice_hardness: None,
            ice_enthalpy: None,
            bc_mask: None,
            bc_values: None,
        }
    }

    pub fn with_hardness(mut self, hardness: &'a Field) -> Self {
        self.ice_hardness = Some(hardness);
        self
    }

    pub fn with_enthalpy(mut self, enthalpy: ColumnEnthalpy<'a>) -> Self {
        self.ice_enthalpy = Some(enthalpy);
        self
    }

    pub fn with_dirichlet(mut self, mask: &'a Field, values: &'a Field) -> Self {
        self.bc_mask = Some(mask);
        self.bc_values = Some(values);
        self
    }
}

#[derive(Debug)]
pub enum SlidingModel {
    Zero,
    Prescribed,
    Ssa(Box<SsaFem>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
}

#[derive(Debug)]
pub struct ShallowStressBalance {
    grid: Arc<Grid>,
    config: Config,
    flow_law: FlowLaw,
    basal_sliding_law: BasalResistanceLaw,
    model: SlidingModel,
    velocity: Field,
    basal_frictional_heating: Field,
    state: Lifecycle,
}

impl ShallowStressBalance {
    /// Create the model selected by `stress_balance.model`.
    pub fn from_config(grid: &Arc<Grid>, config: &Config) -> CryoResult<Self> {
        let name = config.get_string("stress_balance.model")?;
        let ec = EnthalpyConverter::from_config(config)?;
        let model = match name {
            MODEL_NONE => SlidingModel::Zero,
            MODEL_PRESCRIBED_SLIDING => SlidingModel::Prescribed,
            MODEL_SSA => SlidingModel::Ssa(Box::new(SsaFem::new(grid, config)?)),
            other => {
                return Err(CryoError::Configuration(format!(
                    "stress balance model \"{}\" is not available",
                    other
                )))
            }
        };
        // the SSA solver and the diagnostics use the SSA flow law
        let prefix = match model {
            SlidingModel::Ssa(_) => "ssa_",
            _ => "sia_",
        };
        let flow_law = create_flow_law(prefix, config, &ec)?;

        let ghosts = Ghosts::With(grid.max_stencil_width());
        Ok(Self {
            grid: Arc::clone(grid),
            config: config.clone(),
            flow_law,
            basal_sliding_law: BasalResistanceLaw::from_config(config)?,
            model,
            velocity: Field::new_vector(grid, "bar", [&VAR_UBAR, &VAR_VBAR], ghosts),
            basal_frictional_heating: Field::scalar(grid, &VAR_BFRICT, Ghosts::Without),
            state: Lifecycle::Uninitialized,
        })
    }

    pub fn model(&self) -> &SlidingModel {
        &self.model
    }

    pub fn model_name(&self) -> &'static str {
        match self.model {
            SlidingModel::Zero => MODEL_NONE,
            SlidingModel::Prescribed => MODEL_PRESCRIBED_SLIDING,
            SlidingModel::Ssa(_) => MODEL_SSA,
        }
    }

    pub fn flow_law(&self) -> &FlowLaw {
        &self.flow_law
    }

    pub fn sliding_law(&self) -> &BasalResistanceLaw {
        &self.basal_sliding_law
    }

    /// Vertically averaged horizontal velocity.
    pub fn velocity(&self) -> &Field {
        &self.velocity
    }

    pub fn basal_frictional_heating(&self) -> &Field {
        &self.basal_frictional_heating
    }

    pub fn is_initialized(&self) -> bool {
        self.state == Lifecycle::Ready
    }

    /// Prepare the model for updates. Collective.
    pub fn init(&mut self, files: &dyn InputFiles) -> CryoResult<()> {
        match self.model {
            SlidingModel::Zero => {
                log::info!("* Initializing the 'Zero Sliding' stress balance ...");
                self.velocity.fill(0.0);
            }
            SlidingModel::Prescribed => {
                log::info!("* Initializing the 'Prescribed Sliding' stress balance ...");
                if !self.config.contains("prescribed_sliding_file") {
                    return Err(CryoError::Configuration(
                        "option -prescribed_sliding_file is required.".to_string(),
                    ));
                }
                let path = self.config.get_string("prescribed_sliding_file")?;
                let source = files.open(path)?;
                self.velocity = source.read_vector(
                    &self.grid,
                    "bar",
                    [&VAR_UBAR, &VAR_VBAR],
                    Ghosts::With(self.grid.max_stencil_width()),
                )?;
            }
            SlidingModel::Ssa(ref ssa) => {
                log::info!(
                    "* Initializing the SSA stress balance (finite elements, {} flow law) ...",
                    ssa.flow_law().name()
                );
                self.velocity.fill(0.0);
            }
        }
        self.basal_frictional_heating.fill(0.0);
        self.state = Lifecycle::Ready;
        Ok(())
    }

    /// Update the velocity and the basal frictional heating. Collective.
    ///
    /// With `fast` set nothing is recomputed: velocity and heating keep their last values.
    /// The melange back pressure is not used by the finite-element SSA, which has
    /// no calving front boundary condition.
    pub fn update(
        &mut self,
        fast: bool,
        melange_back_pressure: &Field,
        inputs: &StressBalanceInputs,
    ) -> CryoResult<()> {
        if self.state != Lifecycle::Ready {
            return Err(CryoError::NotInitialized(format!(
                "stress balance \"{}\"",
                self.model_name()
            )));
        }
        melange_back_pressure.check_dof(1)?;
        if fast {
            return Ok(());
        }

        match &self.model {
            SlidingModel::Zero => {
                self.velocity.fill(0.0);
                self.basal_frictional_heating.fill(0.0);
            }
            SlidingModel::Prescribed => {
                self.basal_frictional_heating.fill(0.0);
            }
            SlidingModel::Ssa(ssa) => {
                let coefficients = SsaCoefficients::new(ssa, inputs)?;
                let report = ssa.solve(&coefficients, &mut self.velocity)?;
                log::info!(
                    "SSA converged in {} Newton iteration(s), residual {:.3e}",
                    report.iterations,
                    report.residual_norm
                );
                basal_frictional_heating(
                    &self.basal_sliding_law,
                    &self.velocity,
                    inputs.basal_yield_stress,
                    &inputs.geometry.cell_type,
                    &mut self.basal_frictional_heating,
                )?;
            }
        }
        Ok(())
    }

    /// Frictional heating at the base: zero in the ocean, `-τ_b · v` elsewhere.
    pub fn compute_basal_frictional_heating(
        &self,
        velocity: &Field,
        tauc: &Field,
        mask: &Field,
        result: &mut Field,
    ) -> CryoResult<()> {
        basal_frictional_heating(&self.basal_sliding_law, velocity, tauc, mask, result)
    }

    /// Principal strain rates of the vertically averaged flow (2 components,
    /// largest first). Zero at ice-free cells. Collective.
    pub fn compute_2d_principal_strain_rates(
        &self,
        velocity: &Field,
        mask: &Field,
        result: &mut Field,
    ) -> CryoResult<()> {
        result.check_dof(2)?;
        velocity.check_dof(2)?;
        let velocity = with_halo(velocity)?;
        let mask = with_halo(mask)?;

        for (i, j) in self.grid.points() {
            if mask.cell_type(i, j).ice_free() {
                result.set_vector(i, j, Vector2::default());
                continue;
            }
            let d = VelocityDerivatives::at(&velocity, &mask, i, j);

            let a = 0.5 * (d.u_x + d.v_y);
            let b = 0.5 * (d.u_x - d.v_y);
            let dxy = 0.5 * (d.v_x + d.u_y);
            let q = (b * b + dxy * dxy).sqrt();
            result.set_vector(i, j, Vector2::new(a + q, a - q));
        }
        Ok(())
    }

    /// Vertically averaged deviatoric stresses `(σ_xx, σ_yy, σ_xy)` computed with
    /// the constant hardness `ice_softness^(-1/n)`. Collective.
    pub fn compute_2d_stresses(&self, velocity: &Field, mask: &Field, result: &mut Field) -> CryoResult<()> {
        result.check_dof(3)?;
        velocity.check_dof(2)?;
        let softness = self.config.get_number("ice_softness")?;
        let exponent = self.config.get_number("ssa_Glen_exponent")?;
        let hardness = softness.powf(-1.0 / exponent);

        let velocity = with_halo(velocity)?;
        let mask = with_halo(mask)?;

        for (i, j) in self.grid.points() {
            if mask.cell_type(i, j).ice_free() {
                for k in 0..3 {
                    result.set_k(i, j, k, 0.0);
                }
                continue;
            }
            let d = VelocityDerivatives::at(&velocity, &mask, i, j);
            let nu = self
                .flow_law
                .effective_viscosity(hardness, second_invariant_2d(d.u_x, d.u_y, d.v_x, d.v_y));

            result.set_k(i, j, 0, nu * d.u_x);
            result.set_k(i, j, 1, nu * d.v_y);
            result.set_k(i, j, 2, 0.5 * nu * (d.u_y + d.v_x));
        }
        Ok(())
    }

    /// `beta`, `taub`, `taub_mag`, `taud` and `taud_mag`.
    pub fn diagnostics<'a>(&'a self, inputs: &'a StressBalanceInputs<'a>) -> DiagnosticRegistry<'a> {
        diagnostics::registry(self, inputs)
    }
}

/// Uses the field itself when it carries a halo, otherwise a ghosted copy.
/// Collective when a copy is made.
pub(crate) fn with_halo(field: &Field) -> CryoResult<Cow<'_, Field>> {
    if field.stencil_width() > 0 {
        Ok(Cow::Borrowed(field))
    } else {
        Ok(Cow::Owned(field.ghosted(1)?))
    }
}

pub(crate) fn basal_frictional_heating(
    law: &BasalResistanceLaw,
    velocity: &Field,
    tauc: &Field,
    mask: &Field,
    result: &mut Field,
) -> CryoResult<()> {
    velocity.check_dof(2)?;
    result.check_dof(1)?;
    let grid = result.grid().clone();
    for (i, j) in grid.points() {
        if mask.cell_type(i, j).ocean() {
            result.set(i, j, 0.0);
            continue;
        }
        let v = velocity.vector(i, j);
        let c = law.drag(tauc.get(i, j), v.u, v.v);
        let basal_stress = Vector2::new(-c * v.u, -c * v.v);
        result.set(i, j, -basal_stress.u * v.u - basal_stress.v * v.v);
    }
    Ok(())
}

/// One-sided differences weighted by which neighbours are icy.
#[derive(Debug, Clone, Copy, Default)]
struct VelocityDerivatives {
    u_x: f64,
    u_y: f64,
    v_x: f64,
    v_y: f64,
}

impl VelocityDerivatives {
    fn at(velocity: &Field, mask: &Field, i: usize, j: usize) -> Self {
        let grid = velocity.grid();
        let (dx, dy) = (grid.dx(), grid.dy());
        let m = mask.cell_type_star(i, j);
        let u = velocity.vector_star(i, j);

        let weight = |icy: bool| if icy { 1.0 } else { 0.0 };
        let (east, west) = (weight(!m.e.ice_free()), weight(!m.w.ice_free()));
        let (north, south) = (weight(!m.n.ice_free()), weight(!m.s.ice_free()));

        let mut result = Self::default();
        if east + west > 0.0 {
            let scale = 1.0 / (dx * (east + west));
            result.u_x = scale * (west * (u.ij.u - u.w.u) + east * (u.e.u - u.ij.u));
            result.v_x = scale * (west * (u.ij.v - u.w.v) + east * (u.e.v - u.ij.v));
        }
        if north + south > 0.0 {
            let scale = 1.0 / (dy * (north + south));
            result.u_y = scale * (south * (u.ij.u - u.s.u) + north * (u.n.u - u.ij.u));
            result.v_y = scale * (south * (u.ij.v - u.s.v) + north * (u.n.v - u.ij.v));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_core::io::MemoryStore;
    use cryo_core::mask::CellType;
    use cryo_core::standard_variables::{VAR_MASK, VAR_TAUC};
    use cryo_core::units::m_per_year_to_m_per_s;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    fn grid() -> Arc<Grid> {
        Grid::serial(6, 5, 1000.0, 1000.0).unwrap()
    }

    fn zero_sliding(grid: &Arc<Grid>) -> ShallowStressBalance {
        let mut model = ShallowStressBalance::from_config(grid, &Config::default()).unwrap();
        model.init(&BTreeMap::<String, MemoryStore>::new()).unwrap();
        model
    }

    fn mask(grid: &Arc<Grid>, f: impl Fn(usize, usize) -> CellType) -> Field {
        let mut mask = Field::scalar(grid, &VAR_MASK, Ghosts::With(1));
        for (i, j) in grid.points() {
            mask.set(i, j, f(i, j).value());
        }
        mask.update_ghosts();
        mask
    }

    #[test]
    fn test_update_requires_init() {
        let grid = grid();
        let mut model = ShallowStressBalance::from_config(&grid, &Config::default()).unwrap();
        let geometry = Geometry::new(&grid);
        let tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
        let melange = Field::work(&grid, "melange", 1, Ghosts::Without);
        let inputs = StressBalanceInputs::new(&geometry, &tauc);

        assert!(matches!(
            model.update(false, &melange, &inputs),
            Err(CryoError::NotInitialized(_))
        ));
        model.init(&BTreeMap::<String, MemoryStore>::new()).unwrap();
        model.update(false, &melange, &inputs).unwrap();
        assert_eq!(model.velocity().max(), 0.0);
        assert_eq!(model.flow_law().name(), "gpbld");
    }

    #[test]
    fn test_unknown_model() {
        let mut config = Config::default();
        config.set_string("stress_balance.model", "sia");
        assert!(matches!(
            ShallowStressBalance::from_config(&grid(), &config),
            Err(CryoError::Configuration(_))
        ));
    }

    #[test]
    fn test_prescribed_sliding_requires_a_file() {
        let grid = grid();
        let mut config = Config::default();
        config.set_string("stress_balance.model", MODEL_PRESCRIBED_SLIDING);
        let mut model = ShallowStressBalance::from_config(&grid, &config).unwrap();
        let err = model
            .init(&BTreeMap::<String, MemoryStore>::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "option -prescribed_sliding_file is required.");
    }

    #[test]
    fn test_prescribed_sliding_reads_velocity() {
        let grid = grid();
        let mut config = Config::default();
        config.set_string("stress_balance.model", MODEL_PRESCRIBED_SLIDING);
        config.set_string("prescribed_sliding_file", "sliding.nc");

        let u = Array2::from_shape_fn((5, 6), |(j, i)| (i + 10 * j) as f64);
        let v = Array2::from_elem((5, 6), -1.0);
        let mut files = BTreeMap::new();
        files.insert(
            "sliding.nc".to_string(),
            MemoryStore::new().with("ubar", u).with("vbar", v),
        );

        let mut model = ShallowStressBalance::from_config(&grid, &config).unwrap();
        model.init(&files).unwrap();
        assert_eq!(model.velocity().vector(3, 2), Vector2::new(23.0, -1.0));

        // a full update keeps the prescribed velocity
        let geometry = Geometry::new(&grid);
        let tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
        let melange = Field::work(&grid, "melange", 1, Ghosts::Without);
        model
            .update(false, &melange, &StressBalanceInputs::new(&geometry, &tauc))
            .unwrap();
        assert_eq!(model.velocity().vector(3, 2), Vector2::new(23.0, -1.0));
        assert_eq!(model.basal_frictional_heating().max(), 0.0);
    }

    #[test]
    fn test_frictional_heating_is_zero_in_the_ocean() {
        let grid = grid();
        let model = zero_sliding(&grid);
        let mask = mask(&grid, |i, _| {
            if i < 3 {
                CellType::GroundedIce
            } else {
                CellType::FloatingIce
            }
        });
        let mut velocity = Field::work(&grid, "velocity", 2, Ghosts::Without);
        let speed = m_per_year_to_m_per_s(100.0);
        for (i, j) in grid.points() {
            velocity.set_vector(i, j, Vector2::new(speed, 0.0));
        }
        let mut tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
        tauc.fill(5.0e4);

        let mut heating = Field::scalar(&grid, &VAR_BFRICT, Ghosts::Without);
        model
            .compute_basal_frictional_heating(&velocity, &tauc, &mask, &mut heating)
            .unwrap();

        // plastic till: |τ_b| is close to τ_c, heating is τ_c |v|
        assert_relative_eq!(heating.get(1, 2), 5.0e4 * speed, max_relative = 1e-6);
        assert_eq!(heating.get(4, 2), 0.0);
    }

    #[test]
    fn test_principal_strain_rates() {
        let grid = grid();
        let model = zero_sliding(&grid);
        let mask = mask(&grid, |i, _| {
            if i == 0 {
                CellType::IceFreeBedrock
            } else {
                CellType::GroundedIce
            }
        });

        // u = a x: uniaxial stretching
        let a = 1.0e-10;
        let mut velocity = Field::work(&grid, "velocity", 2, Ghosts::With(1));
        for (i, j) in grid.points() {
            velocity.set_vector(i, j, Vector2::new(a * grid.x(i), 0.0));
        }
        velocity.update_ghosts();

        let mut result = Field::work(&grid, "strain_rates", 2, Ghosts::Without);
        model
            .compute_2d_principal_strain_rates(&velocity, &mask, &mut result)
            .unwrap();

        assert_eq!(result.vector(0, 2), Vector2::default());
        // interior: centred difference
        assert_relative_eq!(result.vector(2, 2).u, a, max_relative = 1e-12);
        assert_relative_eq!(result.vector(2, 2).v, 0.0);
        // next to the ice-free column only the east neighbour counts
        assert_relative_eq!(result.vector(1, 2).u, a, max_relative = 1e-12);
        for (i, j) in grid.points() {
            let e = result.vector(i, j);
            assert!(e.u >= e.v);
        }

        let mut wrong = Field::work(&grid, "wrong", 3, Ghosts::Without);
        assert!(matches!(
            model.compute_2d_principal_strain_rates(&velocity, &mask, &mut wrong),
            Err(CryoError::DimensionMismatch { expected: 2, found: 3, .. })
        ));
    }

    #[test]
    fn test_isolated_cell_has_zero_derivatives() {
        let grid = grid();
        let model = zero_sliding(&grid);
        let mask = mask(&grid, |i, j| {
            if (i, j) == (2, 2) {
                CellType::FloatingIce
            } else {
                CellType::IceFreeOcean
            }
        });
        let mut velocity = Field::work(&grid, "velocity", 2, Ghosts::Without);
        for (i, j) in grid.points() {
            velocity.set_vector(i, j, Vector2::new(i as f64, j as f64));
        }

        let mut rates = Field::work(&grid, "rates", 2, Ghosts::Without);
        model
            .compute_2d_principal_strain_rates(&velocity, &mask, &mut rates)
            .unwrap();
        assert_eq!(rates.vector(2, 2), Vector2::default());

        let mut stresses = Field::work(&grid, "stresses", 3, Ghosts::Without);
        model.compute_2d_stresses(&velocity, &mask, &mut stresses).unwrap();
        for k in 0..3 {
            assert_eq!(stresses.get_k(2, 2, k), 0.0);
            assert!(stresses.get_k(2, 2, k).is_finite());
        }
    }

    #[test]
    fn test_deviatoric_stresses() {
        let grid = grid();
        let model = zero_sliding(&grid);
        let mask = mask(&grid, |_, _| CellType::FloatingIce);

        // simple shear: u = a y
        let a = 1.0e-9;
        let mut velocity = Field::work(&grid, "velocity", 2, Ghosts::With(1));
        for (i, j) in grid.points() {
            velocity.set_vector(i, j, Vector2::new(a * grid.y(j), 0.0));
        }
        velocity.update_ghosts();

        let mut result = Field::work(&grid, "stresses", 3, Ghosts::Without);
        model.compute_2d_stresses(&velocity, &mask, &mut result).unwrap();

        let hardness = 3.1689e-24_f64.powf(-1.0 / 3.0);
        let nu = model
            .flow_law()
            .effective_viscosity(hardness, 0.25 * a * a);
        assert_relative_eq!(result.get_k(2, 2, 0), 0.0);
        assert_relative_eq!(result.get_k(2, 2, 1), 0.0);
        assert_relative_eq!(result.get_k(2, 2, 2), 0.5 * nu * a, max_relative = 1e-12);

        let mut wrong = Field::work(&grid, "wrong", 2, Ghosts::Without);
        assert!(model.compute_2d_stresses(&velocity, &mask, &mut wrong).is_err());
    }
}
