use approx::assert_relative_eq;
use cryo_components::geometry::Geometry;
use cryo_components::ocean::{ocean_model_from_config, OceanModel};
use cryo_components::stressbalance::{ShallowStressBalance, StressBalanceInputs};
use cryo_core::config::Config;
use cryo_core::errors::CryoError;
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::io::{FieldSink, InputFiles, MemoryStore};
use cryo_core::mask::CellType;
use cryo_core::standard_variables::VAR_TAUC;
use cryo_core::units::m_per_year_to_m_per_s;
use ndarray::Array2;
use std::collections::BTreeMap;

const MX: usize = 12;
const MY: usize = 7;

const CONFIG: &str = r#"
ocean_pico_file = "state.nc"
prescribed_sliding_file = "state.nc"

[stress_balance]
model = "prescribed_sliding"

[ocean]
models = "pico"

[ocean.pico]
number_of_boxes = 3
number_of_basins = 2
"#;

/// An ice shelf in an embayment of grounded ice, sliding seawards at 100 m/year.
fn state() -> BTreeMap<String, MemoryStore> {
    let grounded = |i: usize, j: usize| i <= 3 || ((4..=8).contains(&i) && (j == 0 || j == MY - 1));
    let shelf = |i: usize, j: usize| (4..=8).contains(&i) && !grounded(i, j);
    let speed = m_per_year_to_m_per_s(100.0);

    let store = MemoryStore::new()
        .with(
            "land_ice_thickness",
            Array2::from_shape_fn((MY, MX), |(j, i)| {
                if grounded(i, j) {
                    1000.0
                } else if shelf(i, j) {
                    400.0
                } else {
                    0.0
                }
            }),
        )
        .with(
            "bedrock_altitude",
            Array2::from_shape_fn((MY, MX), |(j, i)| if grounded(i, j) { 100.0 } else { -600.0 }),
        )
        .with(
            "ubar",
            Array2::from_shape_fn((MY, MX), |(j, i)| {
                if grounded(i, j) || shelf(i, j) {
                    speed
                } else {
                    0.0
                }
            }),
        )
        .with("vbar", Array2::zeros((MY, MX)))
        .with("theta_ocean", Array2::from_elem((MY, MX), 274.15))
        .with("salinity_ocean", Array2::from_elem((MY, MX), 34.7))
        .with("basins", Array2::from_elem((MY, MX), 1.0));
    BTreeMap::from([("state.nc".to_string(), store)])
}

#[test]
fn test_ocean_and_stress_balance_coupling() {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let grid = Grid::serial(MX, MY, 10.0e3, 10.0e3).unwrap();
    let files = state();

    let geometry = Geometry::from_source(&grid, files.open("state.nc").unwrap(), &config).unwrap();
    assert_eq!(geometry.cell_type.cell_type(6, 3), CellType::FloatingIce);
    assert_eq!(geometry.cell_type.cell_type(1, 3), CellType::GroundedIce);
    assert_eq!(geometry.cell_type.cell_type(10, 3), CellType::IceFreeOcean);

    let mut ocean = ocean_model_from_config(&config).unwrap();
    ocean.init(&files, &geometry).unwrap();
    ocean.update(&geometry, 0.0, 3.15e7).unwrap();

    let mut stress_balance = ShallowStressBalance::from_config(&grid, &config).unwrap();
    stress_balance.init(&files).unwrap();

    let mut tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
    tauc.fill(1.0e5);
    let inputs = StressBalanceInputs::new(&geometry, &tauc);
    stress_balance
        .update(false, ocean.melange_back_pressure_fraction().unwrap(), &inputs)
        .unwrap();

    let speed = m_per_year_to_m_per_s(100.0);
    let flux = ocean.shelf_base_mass_flux().unwrap();
    for (i, j) in grid.points() {
        let floating = geometry.cell_type.cell_type(i, j) == CellType::FloatingIce;
        assert_eq!(flux.get(i, j) > 0.0, floating, "({}, {})", i, j);

        let expected = if geometry.cell_type.cell_type(i, j).icy() { speed } else { 0.0 };
        assert_relative_eq!(stress_balance.velocity().vector(i, j).u, expected);
        assert_eq!(stress_balance.basal_frictional_heating().get(i, j), 0.0);
    }

    // outputs go to a sink under their variable names
    let mut output = MemoryStore::new();
    output.write(ocean.shelf_base_mass_flux().unwrap()).unwrap();
    output
        .write(&ocean.diagnostics().unwrap().compute("pico_ocean_box_mask").unwrap().unwrap())
        .unwrap();
    assert_eq!(output.get("shelfbmassflux").unwrap().dim(), (MY, MX));
    let boxes = output.get("pico_ocean_box_mask").unwrap();
    assert_eq!(boxes[[3, 4]], 1.0);
    assert_eq!(boxes[[3, 8]], 3.0);
}

#[test]
fn test_ocean_model_round_trips_through_toml() {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let model = ocean_model_from_config(&config).unwrap();

    let serialised = toml::to_string(&model).unwrap();
    assert!(serialised.contains("type = \"Pico\""));
    assert!(serialised.contains("file = \"state.nc\""));
    assert!(serialised.contains("[physics]"));

    let restored: Box<dyn OceanModel> = toml::from_str(&serialised).unwrap();
    assert_eq!(restored.name(), "pico");
    assert_eq!(toml::to_string(&restored).unwrap(), serialised);

    // configuration survives, state does not
    assert!(matches!(
        restored.shelf_base_mass_flux(),
        Err(CryoError::NotInitialized(_))
    ));
}
