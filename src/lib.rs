//! Shallow ice-flow building blocks: flow laws, the shallow stress balance and
//! its linearization with respect to ice hardness, and sub-shelf ocean models.
//!
//! The functionality lives in two crates re-exported here:
//!
//! - [`cryo_core`]: grid, fields, configuration, rheology, finite elements and
//!   the Krylov linear solver;
//! - [`cryo_components`]: geometry, stress balance, inverse forward problem and
//!   ocean models.
//!
//! A typical coupling step reads the geometry, updates the ocean model and
//! passes its melange back pressure to the stress balance:
//!
//! ```ignore
//! let config = Config::from_toml_str(document)?;
//! let geometry = Geometry::from_source(&grid, files.open("state.nc")?, &config)?;
//!
//! let mut ocean = ocean_model_from_config(&config)?;
//! ocean.init(&files, &geometry)?;
//!
//! let mut stress_balance = ShallowStressBalance::from_config(&grid, &config)?;
//! stress_balance.init(&files)?;
//! stress_balance.update(false, ocean.melange_back_pressure_fraction()?, &inputs)?;
//! ```

pub use cryo_components;
pub use cryo_core;

pub mod prelude {
    pub use cryo_components::geometry::Geometry;
    pub use cryo_components::inverse::{DesignVariableParameterization, HardavForwardProblem};
    pub use cryo_components::ocean::{ocean_model_from_config, OceanModel};
    pub use cryo_components::stressbalance::{ShallowStressBalance, StressBalanceInputs};
    pub use cryo_core::config::Config;
    pub use cryo_core::errors::{CryoError, CryoResult};
    pub use cryo_core::field::{Field, Ghosts};
    pub use cryo_core::grid::Grid;
    pub use cryo_core::io::{FieldSink, FieldSource, InputFiles, MemoryStore};
}
