//! Sub-shelf temperature and mass flux read from a file.

use super::{not_initialized, required_option, OceanModel, OceanOutputs, MODEL_GIVEN};
use crate::geometry::Geometry;
use cryo_core::config::Config;
use cryo_core::errors::CryoResult;
use cryo_core::field::{Field, Ghosts};
use cryo_core::io::InputFiles;
use cryo_core::standard_variables::{VAR_SHELFBMASSFLUX, VAR_SHELFBTEMP};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct GivenState {
    shelfbtemp: Field,
    shelfbmassflux: Field,
    outputs: OceanOutputs,
}

/// Passes `shelfbtemp` and `shelfbmassflux` through unchanged. The forcing does
/// not depend on time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Given {
    file: String,
    #[serde(skip)]
    state: Option<GivenState>,
}

impl Given {
    /// Requires `ocean_given_file`.
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        Ok(Self::new(&required_option(config, "ocean_given_file")?))
    }

    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            state: None,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }
}

#[typetag::serde]
impl OceanModel for Given {
    fn name(&self) -> &'static str {
        MODEL_GIVEN
    }

    fn init(&mut self, files: &dyn InputFiles, geometry: &Geometry) -> CryoResult<()> {
        log::info!(
            "* Initializing the ocean model reading base of the shelf temperature\n  and sub-shelf mass flux from {} ...",
            self.file
        );
        let grid = geometry.grid();
        let source = files.open(&self.file)?;
        self.state = Some(GivenState {
            shelfbtemp: source.read(grid, &VAR_SHELFBTEMP, Ghosts::Without)?,
            shelfbmassflux: source.read(grid, &VAR_SHELFBMASSFLUX, Ghosts::Without)?,
            outputs: OceanOutputs::new(grid),
        });
        self.update(geometry, 0.0, 0.0)
    }

    fn update(&mut self, _geometry: &Geometry, t: f64, dt: f64) -> CryoResult<()> {
        let state = self.state.as_mut().ok_or_else(|| not_initialized(MODEL_GIVEN))?;
        log::trace!("given ocean model: update at t = {} (dt = {})", t, dt);

        state.outputs.shelf_base_temperature.copy_from(&state.shelfbtemp)?;
        state.outputs.shelf_base_mass_flux.copy_from(&state.shelfbmassflux)?;
        state.outputs.sea_level_elevation.fill(0.0);
        state.outputs.melange_back_pressure_fraction.fill(0.0);
        Ok(())
    }

    fn outputs(&self) -> CryoResult<&OceanOutputs> {
        self.state
            .as_ref()
            .map(|s| &s.outputs)
            .ok_or_else(|| not_initialized(MODEL_GIVEN))
    }
}
