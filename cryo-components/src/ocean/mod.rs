//! Ocean models providing boundary conditions at the base of ice shelves.
//!
//! Every model produces the sub-shelf temperature (`shelfbtemp`) and mass flux
//! (`shelfbmassflux`), the sea level elevation and the melange back pressure
//! fraction. Models are selected by `ocean.models`:
//!
//! - `given`: [`Given`], fields read from the file named by `ocean_given_file`;
//! - `pico`: [`Pico`], the Potsdam Ice-shelf Cavity mOdel driven by the ocean
//!   temperature and salinity in the file named by `ocean_pico_file`.
//!
//! Models serialize their configuration (not their state) through `typetag`, so
//! a `Box<dyn OceanModel>` can be stored and restored; a restored model has to be
//! initialized again.

pub mod given;
pub mod pico;

pub use given::Given;
pub use pico::Pico;

use crate::geometry::Geometry;
use cryo_core::config::Config;
use cryo_core::diagnostics::{DiagnosticRegistry, FieldDiagnostic};
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::io::InputFiles;
use cryo_core::standard_variables::{
    VAR_MELANGE_BACK_PRESSURE_FRACTION, VAR_SEA_LEVEL, VAR_SHELFBMASSFLUX, VAR_SHELFBTEMP,
};
use std::fmt::Debug;
use std::sync::Arc;

pub const MODEL_GIVEN: &str = "given";
pub const MODEL_PICO: &str = "pico";

/// Fields every ocean model provides.
#[derive(Debug, Clone)]
pub struct OceanOutputs {
    pub shelf_base_temperature: Field,
    /// Positive values are a loss of ice, kg m-2 s-1.
    pub shelf_base_mass_flux: Field,
    pub sea_level_elevation: Field,
    pub melange_back_pressure_fraction: Field,
}

impl OceanOutputs {
    pub fn new(grid: &Arc<Grid>) -> Self {
        Self {
            shelf_base_temperature: Field::scalar(grid, &VAR_SHELFBTEMP, Ghosts::Without),
            shelf_base_mass_flux: Field::scalar(grid, &VAR_SHELFBMASSFLUX, Ghosts::Without),
            sea_level_elevation: Field::scalar(grid, &VAR_SEA_LEVEL, Ghosts::Without),
            melange_back_pressure_fraction: Field::scalar(
                grid,
                &VAR_MELANGE_BACK_PRESSURE_FRACTION,
                Ghosts::Without,
            ),
        }
    }

    fn registry(&self) -> DiagnosticRegistry<'_> {
        let mut registry = DiagnosticRegistry::new();
        for field in [
            &self.shelf_base_temperature,
            &self.shelf_base_mass_flux,
            &self.sea_level_elevation,
            &self.melange_back_pressure_fraction,
        ] {
            registry.insert(field.name(), FieldDiagnostic::boxed(field));
        }
        registry
    }
}

#[typetag::serde(tag = "type")]
pub trait OceanModel: Debug {
    fn name(&self) -> &'static str;

    /// Read the forcing and compute the outputs for the current geometry.
    /// Collective.
    fn init(&mut self, files: &dyn InputFiles, geometry: &Geometry) -> CryoResult<()>;

    /// Update the outputs for the interval `[t, t + dt]`. Collective.
    fn update(&mut self, geometry: &Geometry, t: f64, dt: f64) -> CryoResult<()>;

    /// Fails with [`CryoError::NotInitialized`] before [`OceanModel::init`].
    fn outputs(&self) -> CryoResult<&OceanOutputs>;

    fn shelf_base_temperature(&self) -> CryoResult<&Field> {
        Ok(&self.outputs()?.shelf_base_temperature)
    }

    fn shelf_base_mass_flux(&self) -> CryoResult<&Field> {
        Ok(&self.outputs()?.shelf_base_mass_flux)
    }

    fn sea_level_elevation(&self) -> CryoResult<&Field> {
        Ok(&self.outputs()?.sea_level_elevation)
    }

    fn melange_back_pressure_fraction(&self) -> CryoResult<&Field> {
        Ok(&self.outputs()?.melange_back_pressure_fraction)
    }

    fn diagnostics(&self) -> CryoResult<DiagnosticRegistry<'_>> {
        Ok(self.outputs()?.registry())
    }
}

/// Create the ocean model named by `ocean.models`.
pub fn ocean_model_from_config(config: &Config) -> CryoResult<Box<dyn OceanModel>> {
    match config.get_string("ocean.models")? {
        MODEL_GIVEN => Ok(Box::new(Given::from_config(config)?)),
        MODEL_PICO => Ok(Box::new(Pico::from_config(config)?)),
        other => Err(CryoError::Configuration(format!(
            "ocean model \"{}\" is not available",
            other
        ))),
    }
}

/// Value of a command-line style option that has no default.
fn required_option(config: &Config, key: &str) -> CryoResult<String> {
    if !config.contains(key) {
        return Err(CryoError::Configuration(format!("option -{} is required.", key)));
    }
    Ok(config.get_string(key)?.to_string())
}

fn not_initialized(model: &str) -> CryoError {
    CryoError::NotInitialized(format!("ocean model {}", model))
}
