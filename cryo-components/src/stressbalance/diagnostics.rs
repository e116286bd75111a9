//! Diagnostics of a shallow stress balance: basal drag and driving stress.

use cryo_core::diagnostics::{Diagnostic, DiagnosticRegistry};
use cryo_core::errors::CryoResult;
use cryo_core::field::{Field, Ghosts, Vector2};
use cryo_core::standard_variables::{
    VAR_BETA, VAR_TAUB_MAG, VAR_TAUB_X, VAR_TAUB_Y, VAR_TAUD_MAG, VAR_TAUD_X, VAR_TAUD_Y,
};
use cryo_core::variable::FieldMetadata;

use super::{with_halo, ShallowStressBalance, StressBalanceInputs};

pub(super) fn registry<'a>(
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
) -> DiagnosticRegistry<'a> {
    let mut registry = DiagnosticRegistry::new();
    registry.insert("beta", Box::new(BasalDrag { model, inputs }));
    registry.insert("taub", Box::new(BasalStress { model, inputs }));
    registry.insert("taub_mag", Box::new(BasalStressMagnitude { model, inputs }));
    registry.insert("taud", Box::new(DrivingStress { model, inputs }));
    registry.insert("taud_mag", Box::new(DrivingStressMagnitude { model, inputs }));
    registry
}

/// Basal drag coefficient `β` (everywhere, using the current velocity).
struct BasalDrag<'a> {
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
}

impl Diagnostic for BasalDrag<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        vec![(&VAR_BETA).into()]
    }

    fn compute(&self) -> CryoResult<Field> {
        let grid = &self.model.grid;
        let tauc = self.inputs.basal_yield_stress;
        let velocity = &self.model.velocity;

        let mut result = Field::scalar(grid, &VAR_BETA, Ghosts::Without);
        for (i, j) in grid.points() {
            let v = velocity.vector(i, j);
            result.set(i, j, self.model.basal_sliding_law.drag(tauc.get(i, j), v.u, v.v));
        }
        Ok(result)
    }
}

/// Basal shear stress `τ_b = -β v` under grounded ice, zero elsewhere.
struct BasalStress<'a> {
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
}

impl Diagnostic for BasalStress<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        vec![(&VAR_TAUB_X).into(), (&VAR_TAUB_Y).into()]
    }

    fn compute(&self) -> CryoResult<Field> {
        let grid = &self.model.grid;
        let tauc = self.inputs.basal_yield_stress;
        let mask = &self.inputs.geometry.cell_type;
        let velocity = &self.model.velocity;

        let mut result = Field::new_vector(grid, "taub", [&VAR_TAUB_X, &VAR_TAUB_Y], Ghosts::Without);
        for (i, j) in grid.points() {
            if mask.cell_type(i, j).grounded_ice() {
                let v = velocity.vector(i, j);
                let beta = self.model.basal_sliding_law.drag(tauc.get(i, j), v.u, v.v);
                result.set_vector(i, j, -v * beta);
            } else {
                result.set_vector(i, j, Vector2::default());
            }
        }
        Ok(result)
    }
}

struct BasalStressMagnitude<'a> {
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
}

impl Diagnostic for BasalStressMagnitude<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        vec![(&VAR_TAUB_MAG).into()]
    }

    fn compute(&self) -> CryoResult<Field> {
        let taub = BasalStress {
            model: self.model,
            inputs: self.inputs,
        }
        .compute()?;
        taub.magnitude(&VAR_TAUB_MAG)
    }
}

/// Driving stress `-ρ g H ∇s` (centred differences), zero where there is no ice.
struct DrivingStress<'a> {
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
}

impl Diagnostic for DrivingStress<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        vec![(&VAR_TAUD_X).into(), (&VAR_TAUD_Y).into()]
    }

    fn compute(&self) -> CryoResult<Field> {
        let grid = &self.model.grid;
        let config = &self.model.config;
        let rho_g = config.get_number("constants.ice.density")?
            * config.get_number("constants.standard_gravity")?;

        let thickness = &self.inputs.geometry.ice_thickness;
        let surface = with_halo(&self.inputs.geometry.ice_surface_elevation)?;

        let mut result = Field::new_vector(grid, "taud", [&VAR_TAUD_X, &VAR_TAUD_Y], Ghosts::Without);
        for (i, j) in grid.points() {
            let pressure = rho_g * thickness.get(i, j);
            if pressure <= 0.0 {
                result.set_vector(i, j, Vector2::default());
            } else {
                result.set_vector(
                    i,
                    j,
                    Vector2::new(
                        -pressure * surface.diff_x_p(i, j),
                        -pressure * surface.diff_y_p(i, j),
                    ),
                );
            }
        }
        Ok(result)
    }
}

struct DrivingStressMagnitude<'a> {
    model: &'a ShallowStressBalance,
    inputs: &'a StressBalanceInputs<'a>,
}

impl Diagnostic for DrivingStressMagnitude<'_> {
    fn metadata(&self) -> Vec<FieldMetadata> {
        vec![(&VAR_TAUD_MAG).into()]
    }

    fn compute(&self) -> CryoResult<Field> {
        let taud = DrivingStress {
            model: self.model,
            inputs: self.inputs,
        }
        .compute()?;
        taud.magnitude(&VAR_TAUD_MAG)
    }
}
