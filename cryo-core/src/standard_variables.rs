//! Standard variable definitions.
//!
//! Names follow the conventions of the input and output files used with
//! shallow ice-flow models (`land_ice_thickness`, `bar`, `shelfbtemp`, ...).
//! Units are SI; glaciological units are a concern of the writers.
//!
//! # Available Variables
//!
//! ## Geometry
//! - `VAR_THICKNESS`, `VAR_SURFACE`, `VAR_BED`, `VAR_MASK`, `VAR_CELL_AREA`
//!
//! ## Stress balance
//! - `VAR_UBAR`, `VAR_VBAR`, `VAR_BFRICT`, `VAR_TAUC`, `VAR_HARDAV`
//! - diagnostics `VAR_TAUD_*`, `VAR_TAUB_*`, `VAR_BETA`, strain rates and stresses
//!
//! ## Ocean
//! - forcing `VAR_THETA_OCEAN`, `VAR_SALINITY_OCEAN`, `VAR_BASINS`
//! - outputs `VAR_SHELFBTEMP`, `VAR_SHELFBMASSFLUX`, `VAR_SEA_LEVEL`, `VAR_MELANGE_BACK_PRESSURE_FRACTION`
//! - box model fields `VAR_PICO_*`

use crate::define_variable;
use crate::variable::VariableDefinition;

// ============================================================================
// Geometry
// ============================================================================

define_variable!(
    VAR_THICKNESS,
    name = "land_ice_thickness",
    units = "m",
    long_name = "land ice thickness",
    kind = ModelState,
);

define_variable!(
    VAR_SURFACE,
    name = "surface_altitude",
    units = "m",
    long_name = "ice upper surface elevation",
    kind = Diagnostic,
);

define_variable!(
    VAR_BED,
    name = "bedrock_altitude",
    units = "m",
    long_name = "bedrock surface elevation",
    kind = ModelState,
);

define_variable!(
    VAR_MASK,
    name = "mask",
    units = "",
    long_name = "ice-type (ice-free/grounded/floating/ocean) integer mask",
    kind = Diagnostic,
);

define_variable!(
    VAR_CELL_AREA,
    name = "cell_area",
    units = "m2",
    long_name = "cell areas",
    kind = Diagnostic,
);

// ============================================================================
// Stress balance
// ============================================================================

define_variable!(
    VAR_UBAR,
    name = "ubar",
    units = "m s-1",
    long_name = "thickness-advective ice velocity (x-component)",
    kind = ModelState,
);

define_variable!(
    VAR_VBAR,
    name = "vbar",
    units = "m s-1",
    long_name = "thickness-advective ice velocity (y-component)",
    kind = ModelState,
);

define_variable!(
    VAR_BFRICT,
    name = "bfrict",
    units = "W m-2",
    long_name = "basal frictional heating",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUC,
    name = "tauc",
    units = "Pa",
    long_name = "yield stress for basal till (plastic or pseudo-plastic model)",
    kind = ModelState,
);

define_variable!(
    VAR_HARDAV,
    name = "hardav",
    units = "Pa s1/3",
    long_name = "vertical average of ice hardness",
    kind = Diagnostic,
);

define_variable!(
    VAR_BC_MASK,
    name = "bc_mask",
    units = "",
    long_name = "Dirichlet boundary mask",
    kind = ModelState,
);

define_variable!(
    VAR_U_BC,
    name = "u_bc",
    units = "m s-1",
    long_name = "X-component of the SSA velocity boundary conditions",
    kind = ModelState,
);

define_variable!(
    VAR_V_BC,
    name = "v_bc",
    units = "m s-1",
    long_name = "Y-component of the SSA velocity boundary conditions",
    kind = ModelState,
);

define_variable!(
    VAR_TAUD_X,
    name = "taud_x",
    units = "Pa",
    long_name = "X-component of the driving shear stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUD_Y,
    name = "taud_y",
    units = "Pa",
    long_name = "Y-component of the driving shear stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUD_MAG,
    name = "taud_mag",
    units = "Pa",
    long_name = "magnitude of the gravitational driving stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUB_X,
    name = "taub_x",
    units = "Pa",
    long_name = "X-component of the shear stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUB_Y,
    name = "taub_y",
    units = "Pa",
    long_name = "Y-component of the shear stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_TAUB_MAG,
    name = "taub_mag",
    units = "Pa",
    long_name = "magnitude of the basal shear stress at the base of ice",
    kind = Diagnostic,
);

define_variable!(
    VAR_BETA,
    name = "beta",
    units = "Pa s / m",
    long_name = "basal drag coefficient",
    kind = Diagnostic,
);

define_variable!(
    VAR_EIGEN1,
    name = "eigen1",
    units = "s-1",
    long_name = "first eigenvalue of the horizontal, vertically-integrated strain rate tensor",
    kind = Diagnostic,
);

define_variable!(
    VAR_EIGEN2,
    name = "eigen2",
    units = "s-1",
    long_name = "second eigenvalue of the horizontal, vertically-integrated strain rate tensor",
    kind = Diagnostic,
);

define_variable!(
    VAR_SIGMA_XX,
    name = "sigma_xx",
    units = "Pa",
    long_name = "deviatoric stress in x direction",
    kind = Diagnostic,
);

define_variable!(
    VAR_SIGMA_YY,
    name = "sigma_yy",
    units = "Pa",
    long_name = "deviatoric stress in y direction",
    kind = Diagnostic,
);

define_variable!(
    VAR_SIGMA_XY,
    name = "sigma_xy",
    units = "Pa",
    long_name = "deviatoric shear stress",
    kind = Diagnostic,
);

// ============================================================================
// Ocean
// ============================================================================

define_variable!(
    VAR_THETA_OCEAN,
    name = "theta_ocean",
    units = "Kelvin",
    long_name = "absolute potential temperature of the adjacent ocean",
    kind = ClimateForcing,
);

define_variable!(
    VAR_SALINITY_OCEAN,
    name = "salinity_ocean",
    units = "g/kg",
    long_name = "salinity of the adjacent ocean",
    kind = ClimateForcing,
);

define_variable!(
    VAR_BASINS,
    name = "basins",
    units = "",
    long_name = "mask determines basins for PICO",
    kind = ClimateForcing,
);

define_variable!(
    VAR_SHELFBTEMP,
    name = "shelfbtemp",
    units = "Kelvin",
    long_name = "absolute temperature at ice shelf base",
    kind = ClimateForcing,
);

define_variable!(
    VAR_SHELFBMASSFLUX,
    name = "shelfbmassflux",
    units = "kg m-2 s-1",
    long_name = "ice mass flux from ice shelf base (positive flux is loss from ice shelf)",
    kind = ClimateForcing,
);

define_variable!(
    VAR_SEA_LEVEL,
    name = "sea_level",
    units = "m",
    long_name = "sea level elevation, relative to the geoid",
    kind = Diagnostic,
);

define_variable!(
    VAR_MELANGE_BACK_PRESSURE_FRACTION,
    name = "melange_back_pressure_fraction",
    units = "1",
    long_name = "dimensionless pressure on the calving front due to melange presence",
    kind = Diagnostic,
);

define_variable!(
    VAR_PICO_SOC,
    name = "pico_salinity",
    units = "g/kg",
    long_name = "ocean salinity field",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_SOC_BOX0,
    name = "pico_salinity_box0",
    units = "g/kg",
    long_name = "ocean base salinity field",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_TOC,
    name = "pico_temperature",
    units = "K",
    long_name = "ocean temperature field",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_TOC_BOX0,
    name = "pico_temperature_box0",
    units = "K",
    long_name = "ocean base temperature",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_T_STAR,
    name = "pico_T_star",
    units = "degree C",
    long_name = "T_star field",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_OVERTURNING,
    name = "pico_overturning",
    units = "m^3 s-1",
    long_name = "cavity overturning",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_BMELT_SHELF,
    name = "pico_bmelt_shelf",
    units = "m s-1",
    long_name = "PICO sub-shelf melt rate",
    kind = ModelState,
);

define_variable!(
    VAR_PICO_T_PRESSURE_MELTING,
    name = "pico_T_pressure_melting",
    units = "K",
    long_name = "pressure melting temperature at the ice shelf base",
    kind = Diagnostic,
);

define_variable!(
    VAR_PICO_SHELF_MASK,
    name = "pico_shelf_mask",
    units = "",
    long_name = "mask displaying ice shelf numbering",
    kind = Diagnostic,
);

define_variable!(
    VAR_PICO_BOX_MASK,
    name = "pico_ocean_box_mask",
    units = "",
    long_name = "mask displaying ocean box model grid",
    kind = Diagnostic,
);

define_variable!(
    VAR_PICO_CONTSHELF_MASK,
    name = "pico_ocean_contshelf_mask",
    units = "",
    long_name = "mask displaying the continental shelf region for averaging ocean inputs",
    kind = Diagnostic,
);

/// Every standard variable, for lookups by name.
pub const STANDARD_VARIABLES: &[VariableDefinition] = &[
    VAR_THICKNESS,
    VAR_SURFACE,
    VAR_BED,
    VAR_MASK,
    VAR_CELL_AREA,
    VAR_UBAR,
    VAR_VBAR,
    VAR_BFRICT,
    VAR_TAUC,
    VAR_HARDAV,
    VAR_BC_MASK,
    VAR_U_BC,
    VAR_V_BC,
    VAR_TAUD_X,
    VAR_TAUD_Y,
    VAR_TAUD_MAG,
    VAR_TAUB_X,
    VAR_TAUB_Y,
    VAR_TAUB_MAG,
    VAR_BETA,
    VAR_EIGEN1,
    VAR_EIGEN2,
    VAR_SIGMA_XX,
    VAR_SIGMA_YY,
    VAR_SIGMA_XY,
    VAR_THETA_OCEAN,
    VAR_SALINITY_OCEAN,
    VAR_BASINS,
    VAR_SHELFBTEMP,
    VAR_SHELFBMASSFLUX,
    VAR_SEA_LEVEL,
    VAR_MELANGE_BACK_PRESSURE_FRACTION,
    VAR_PICO_SOC,
    VAR_PICO_SOC_BOX0,
    VAR_PICO_TOC,
    VAR_PICO_TOC_BOX0,
    VAR_PICO_T_STAR,
    VAR_PICO_OVERTURNING,
    VAR_PICO_BMELT_SHELF,
    VAR_PICO_T_PRESSURE_MELTING,
    VAR_PICO_SHELF_MASK,
    VAR_PICO_BOX_MASK,
    VAR_PICO_CONTSHELF_MASK,
];

/// Find a standard variable by name.
pub fn find(name: &str) -> Option<&'static VariableDefinition> {
    STANDARD_VARIABLES.iter().find(|v| v.name == name)
}
