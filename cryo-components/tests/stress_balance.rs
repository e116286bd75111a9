use approx::assert_relative_eq;
use cryo_components::geometry::Geometry;
use cryo_components::stressbalance::{ShallowStressBalance, StressBalanceInputs};
use cryo_core::config::Config;
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::io::MemoryStore;
use cryo_core::standard_variables::{VAR_HARDAV, VAR_MELANGE_BACK_PRESSURE_FRACTION, VAR_TAUC};
use std::collections::BTreeMap;

const SLOPE: f64 = 1.0e-3;
const TAUC: f64 = 1.0e5;

fn config() -> Config {
    Config::from_toml_str(
        r#"
        ssa_flow_law = "isothermal_glen"

        [stress_balance]
        model = "ssa"

        [basal_resistance.pseudo_plastic]
        enabled = true
        q = 1.0

        [ssafem.ksp]
        restart = 200
        "#,
    )
    .unwrap()
}

fn slab(grid: &std::sync::Arc<Grid>, config: &Config) -> Geometry {
    let mut geometry = Geometry::new(grid);
    for (i, j) in grid.points() {
        geometry.ice_thickness.set(i, j, 1000.0);
        geometry.bed_elevation.set(i, j, 2000.0 - SLOPE * grid.x(i));
    }
    geometry.ensure_consistency(config).unwrap();
    geometry
}

#[test]
fn test_ssa_slab_through_the_stress_balance() {
    let config = config();
    let grid = Grid::serial(7, 5, 5000.0, 5000.0).unwrap();
    let geometry = slab(&grid, &config);

    let mut tauc = Field::scalar(&grid, &VAR_TAUC, Ghosts::Without);
    tauc.fill(TAUC);
    let mut hardness = Field::scalar(&grid, &VAR_HARDAV, Ghosts::Without);
    hardness.fill(1.0e8);
    let melange = Field::scalar(&grid, &VAR_MELANGE_BACK_PRESSURE_FRACTION, Ghosts::Without);

    let mut model = ShallowStressBalance::from_config(&grid, &config).unwrap();
    assert_eq!(model.model_name(), "ssa");
    assert_eq!(model.flow_law().name(), "isothermal_glen");
    model.init(&BTreeMap::<String, MemoryStore>::new()).unwrap();

    let inputs = StressBalanceInputs::new(&geometry, &tauc).with_hardness(&hardness);
    model.update(false, &melange, &inputs).unwrap();

    let u_threshold = config
        .get_number("basal_resistance.pseudo_plastic.u_threshold")
        .unwrap();
    let expected = u_threshold * 910.0 * 9.81 * 1000.0 * SLOPE / TAUC;
    for (i, j) in grid.points() {
        let v = model.velocity().vector(i, j);
        assert_relative_eq!(v.u, expected, max_relative = 1e-5);

        let drag = model.sliding_law().drag(TAUC, v.u, v.v);
        assert_relative_eq!(
            model.basal_frictional_heating().get(i, j),
            drag * (v.u * v.u + v.v * v.v),
            max_relative = 1e-12
        );
    }

    // basal resistance balances the driving stress
    let diagnostics = model.diagnostics(&inputs);
    let taub = diagnostics.compute("taub_mag").unwrap().unwrap();
    let taud = diagnostics.compute("taud_mag").unwrap().unwrap();
    assert_relative_eq!(taub.get(3, 2), taud.get(3, 2), max_relative = 1e-5);
    drop(diagnostics);

    // a fast update keeps the velocity
    let before = model.velocity().vector(3, 2);
    model.update(true, &melange, &inputs).unwrap();
    assert_eq!(model.velocity().vector(3, 2), before);
}
