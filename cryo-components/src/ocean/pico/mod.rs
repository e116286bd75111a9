//! The Potsdam Ice-shelf Cavity mOdel (Reese et al., 2018).
//!
//! Each ice shelf is split into boxes ordered from the grounding line to the
//! calving front. Water enters box 1 with the temperature and salinity of the
//! continental shelf in front of the shelf ("box 0"), is cooled and freshened by
//! melting, and flows on to the next box. An update runs
//!
//! 1. the geometry ([`PicoGeometry`]),
//! 2. per-basin averages of the ocean forcing on the continental shelf,
//! 3. box 0 inputs of every ice shelf cell, weighted by the basins the shelf covers,
//! 4. the Beckmann-Goosse melt rate as background for all floating ice,
//! 5. box 1 and then boxes `2..=n` of every shelf.
//!
//! Problems that are recovered from locally (missing basin data, box 0 water
//! below freezing, a negative square root argument in box 1, missing input from
//! a previous box) are counted over all ranks, logged once per update and
//! recorded in the [`PicoReport`].

pub mod geometry;
pub mod physics;

pub use geometry::{GeometrySettings, PicoGeometry};
pub use physics::PicoPhysics;

use super::{not_initialized, required_option, OceanModel, OceanOutputs, MODEL_PICO};
use crate::geometry::Geometry;
use cryo_core::config::Config;
use cryo_core::diagnostics::{DiagnosticRegistry, FieldDiagnostic};
use cryo_core::errors::{CryoError, CryoResult};
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::io::InputFiles;
use cryo_core::standard_variables::{
    VAR_BASINS, VAR_PICO_BMELT_SHELF, VAR_PICO_OVERTURNING, VAR_PICO_SOC, VAR_PICO_SOC_BOX0,
    VAR_PICO_TOC, VAR_PICO_TOC_BOX0, VAR_PICO_T_PRESSURE_MELTING, VAR_PICO_T_STAR,
    VAR_SALINITY_OCEAN, VAR_THETA_OCEAN,
};
use cryo_core::variable::VariableDefinition;
use geometry::CONTINENTAL_SHELF_INNER;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Offset above the potential freezing point applied to box 0 water that is
/// colder than that, K.
const BOX0_FREEZING_OFFSET: f64 = 0.001;

/// Problems recovered from during the last update, summed over all ranks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PicoReport {
    /// Number of shelf labels in use, including the unused label 0.
    pub n_shelves: usize,
    /// Basins (other than 0) without continental shelf data.
    pub dummy_basins: Vec<usize>,
    /// Cells where box 0 water was raised to the freezing point.
    pub low_temperature_cells: usize,
    /// Box 1 cells with a negative square root argument.
    pub box1_failures: usize,
    /// Cells of boxes 2..n left with the Beckmann-Goosse melt rate.
    pub beckmann_goosse_cells: usize,
}

/// Ocean temperature and salinity averaged per basin.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinInput {
    pub temperature: Vec<f64>,
    pub salinity: Vec<f64>,
    pub dummy_basins: Vec<usize>,
}

#[derive(Debug, Clone)]
struct PicoState {
    basins: Field,
    theta_ocean: Field,
    salinity_ocean: Field,
    geometry: PicoGeometry,
    toc_box0: Field,
    soc_box0: Field,
    toc: Field,
    soc: Field,
    t_star: Field,
    overturning: Field,
    basal_melt_rate: Field,
    outputs: OceanOutputs,
    report: PicoReport,
}

impl PicoState {
    fn new(grid: &Arc<Grid>, basins: Field, theta_ocean: Field, salinity_ocean: Field) -> Self {
        let scalar = |definition: &VariableDefinition| Field::scalar(grid, definition, Ghosts::Without);
        let mut outputs = OceanOutputs::new(grid);
        outputs.shelf_base_temperature = scalar(&VAR_PICO_T_PRESSURE_MELTING);
        Self {
            basins,
            theta_ocean,
            salinity_ocean,
            geometry: PicoGeometry::new(grid),
            toc_box0: scalar(&VAR_PICO_TOC_BOX0),
            soc_box0: scalar(&VAR_PICO_SOC_BOX0),
            toc: scalar(&VAR_PICO_TOC),
            soc: scalar(&VAR_PICO_SOC),
            t_star: scalar(&VAR_PICO_T_STAR),
            overturning: scalar(&VAR_PICO_OVERTURNING),
            basal_melt_rate: scalar(&VAR_PICO_BMELT_SHELF),
            outputs,
            report: PicoReport::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pico {
    file: String,
    number_of_boxes: usize,
    number_of_basins: usize,
    exclude_ice_rises: bool,
    physics: PicoPhysics,
    #[serde(skip)]
    state: Option<PicoState>,
}

impl Pico {
    /// Requires `ocean_pico_file`; the remaining parameters come from
    /// `ocean.pico.*` and the physical constants.
    pub fn from_config(config: &Config) -> CryoResult<Self> {
        Ok(Self {
            file: required_option(config, "ocean_pico_file")?,
            number_of_boxes: config.get_count("ocean.pico.number_of_boxes")?,
            number_of_basins: config.get_count("ocean.pico.number_of_basins")?,
            exclude_ice_rises: config.get_flag("ocean.pico.exclude_icerises")?,
            physics: PicoPhysics::from_config(config)?,
            state: None,
        })
    }

    pub fn physics(&self) -> &PicoPhysics {
        &self.physics
    }

    /// Recovered problems of the last update.
    pub fn report(&self) -> CryoResult<&PicoReport> {
        Ok(&self.state()?.report)
    }

    pub fn geometry(&self) -> CryoResult<&PicoGeometry> {
        Ok(&self.state()?.geometry)
    }

    fn state(&self) -> CryoResult<&PicoState> {
        self.state.as_ref().ok_or_else(|| not_initialized(MODEL_PICO))
    }

    fn geometry_settings(&self) -> GeometrySettings {
        GeometrySettings {
            number_of_boxes: self.number_of_boxes,
            exclude_ice_rises: self.exclude_ice_rises,
            continental_shelf_depth: self.physics.continental_shelf_depth,
        }
    }
}

#[typetag::serde]
impl OceanModel for Pico {
    fn name(&self) -> &'static str {
        MODEL_PICO
    }

    fn init(&mut self, files: &dyn InputFiles, geometry: &Geometry) -> CryoResult<()> {
        log::info!("* Initializing the Potsdam Ice-shelf Cavity mOdel for the ocean ...");
        let grid = geometry.grid();
        let source = files.open(&self.file)?;

        let theta_ocean = source.read(grid, &VAR_THETA_OCEAN, Ghosts::Without)?;
        let salinity_ocean = source.read(grid, &VAR_SALINITY_OCEAN, Ghosts::Without)?;
        let basins = round_basins(&source.read(grid, &VAR_BASINS, Ghosts::With(1))?)?;

        let (min, max) = (basins.min(), basins.max());
        if min < 0.0 || max > (self.number_of_basins as f64 - 1.0) {
            return Err(CryoError::Configuration(format!(
                "Some basin numbers in {} read from {} are invalid: allowed range is [0, {}], found [{}, {}]",
                VAR_BASINS.name,
                self.file,
                self.number_of_basins.saturating_sub(1),
                min,
                max
            )));
        }

        log::info!(
            "  -Using {} drainage basins and values:\n   gamma_T= {:.2e}, overturning_coeff = {:.2e}...",
            self.number_of_basins,
            self.physics.gamma_t,
            self.physics.overturning_coefficient
        );
        log::info!(
            "  -Depth of continental shelf for computation of temperature and salinity input\n   is set for whole domain to continental_shelf_depth={:.0} meter",
            self.physics.continental_shelf_depth
        );

        self.state = Some(PicoState::new(grid, basins, theta_ocean, salinity_ocean));
        // the forcing is time-independent
        self.update(geometry, 0.0, 0.0)
    }

    fn update(&mut self, geometry: &Geometry, t: f64, dt: f64) -> CryoResult<()> {
        let settings = self.geometry_settings();
        let n_basins = self.number_of_basins;
        let n_boxes = self.number_of_boxes;
        let physics = &self.physics;
        let state = self.state.as_mut().ok_or_else(|| not_initialized(MODEL_PICO))?;
        log::debug!("PICO: update at t = {} (dt = {})", t, dt);

        state
            .geometry
            .update(&geometry.bed_elevation, &geometry.cell_type, &settings)?;
        let shelves = state.geometry.ice_shelf_mask();
        let boxes = state.geometry.box_mask();

        // Largest shelf label plus one. Labels are contiguous here, but sizing
        // from the maximum over-allocates whenever they are not.
        let n_shelves = state.geometry.ice_shelf_mask().max().max(0.0) as usize + 1;

        let input = compute_ocean_input_per_basin(
            physics,
            n_basins,
            &state.basins,
            state.geometry.continental_shelf_mask(),
            &state.salinity_ocean,
            &state.theta_ocean,
        );
        if !input.dummy_basins.is_empty() {
            log::warn!(
                "PICO ocean WARNING: basin(s) {:?} contain no cells with ocean data on the continental shelf\n\
                 (no values with ocean_contshelf_mask=2).\n\
                 No mean salinity or temperature values are computed, instead using\n\
                 the standard values T_dummy ={:.3}, S_dummy={:.3}.\n\
                 This might bias your basal melt rates, check your input data carefully.",
                input.dummy_basins,
                physics.t_dummy(),
                physics.s_dummy()
            );
        }

        let low_temperature_cells = set_ocean_input_fields(
            physics,
            n_shelves,
            n_basins,
            &geometry.ice_thickness,
            &geometry.cell_type,
            &state.basins,
            shelves,
            &input,
            &mut state.toc_box0,
            &mut state.soc_box0,
        );
        if low_temperature_cells > 0 {
            log::warn!(
                "PICO ocean warning: temperature has been below pressure melting temperature in {} cases,\n\
                 setting it to pressure melting temperature",
                low_temperature_cells
            );
        }

        for field in [
            &mut state.toc,
            &mut state.soc,
            &mut state.t_star,
            &mut state.overturning,
            &mut state.basal_melt_rate,
            &mut state.outputs.shelf_base_temperature,
        ] {
            field.fill(0.0);
        }

        let mut cells = BoxModelFields {
            t_star: &mut state.t_star,
            toc: &mut state.toc,
            soc: &mut state.soc,
            overturning: &mut state.overturning,
            basal_melt_rate: &mut state.basal_melt_rate,
            t_pressure_melting: &mut state.outputs.shelf_base_temperature,
        };

        beckmann_goosse(
            physics,
            &geometry.ice_thickness,
            &geometry.cell_type,
            shelves,
            &state.toc_box0,
            &state.soc_box0,
            &mut cells,
        );

        let box1_failures = process_box1(
            physics,
            n_shelves,
            &geometry.ice_thickness,
            shelves,
            boxes,
            &state.toc_box0,
            &state.soc_box0,
            &mut cells,
        );
        if box1_failures > 0 {
            log::warn!(
                "PICO ocean warning: square-root argument for temperature calculation has been negative in {} cases!",
                box1_failures
            );
        }

        let beckmann_goosse_cells = process_other_boxes(
            physics,
            n_shelves,
            n_boxes,
            &geometry.ice_thickness,
            shelves,
            boxes,
            &mut cells,
        );

        state.outputs.shelf_base_mass_flux.copy_from(&state.basal_melt_rate)?;
        state.outputs.shelf_base_mass_flux.scale(physics.ice_density);
        state.outputs.sea_level_elevation.fill(0.0);
        state.outputs.melange_back_pressure_fraction.fill(0.0);

        state.report = PicoReport {
            n_shelves,
            dummy_basins: input.dummy_basins,
            low_temperature_cells,
            box1_failures,
            beckmann_goosse_cells,
        };
        Ok(())
    }

    fn outputs(&self) -> CryoResult<&OceanOutputs> {
        Ok(&self.state()?.outputs)
    }

    fn diagnostics(&self) -> CryoResult<DiagnosticRegistry<'_>> {
        let state = self.state()?;
        let mut registry = DiagnosticRegistry::new();
        registry.insert("basins", FieldDiagnostic::boxed(&state.basins));
        registry.insert("pico_overturning", FieldDiagnostic::boxed(&state.overturning));
        registry.insert("pico_salinity_box0", FieldDiagnostic::boxed(&state.soc_box0));
        registry.insert("pico_temperature_box0", FieldDiagnostic::boxed(&state.toc_box0));
        registry.insert("pico_ocean_box_mask", FieldDiagnostic::boxed(state.geometry.box_mask()));
        registry.insert("pico_shelf_mask", FieldDiagnostic::boxed(state.geometry.ice_shelf_mask()));
        registry.insert("pico_bmelt_shelf", FieldDiagnostic::boxed(&state.basal_melt_rate));
        registry.insert(
            "pico_ocean_contshelf_mask",
            FieldDiagnostic::boxed(state.geometry.continental_shelf_mask()),
        );
        registry.insert("pico_salinity", FieldDiagnostic::boxed(&state.soc));
        registry.insert("pico_temperature", FieldDiagnostic::boxed(&state.toc));
        registry.insert("pico_T_star", FieldDiagnostic::boxed(&state.t_star));
        registry.insert(
            "pico_T_pressure_melting",
            FieldDiagnostic::boxed(&state.outputs.shelf_base_temperature),
        );
        Ok(registry)
    }
}

/// Per-cell outputs of the box model.
struct BoxModelFields<'a> {
    t_star: &'a mut Field,
    toc: &'a mut Field,
    soc: &'a mut Field,
    overturning: &'a mut Field,
    basal_melt_rate: &'a mut Field,
    t_pressure_melting: &'a mut Field,
}

/// Index of a mask value in `0..n`, if it is one.
fn mask_index(field: &Field, i: usize, j: usize, n: usize) -> Option<usize> {
    let value = field.as_int(i, j);
    (value >= 0 && (value as usize) < n).then_some(value as usize)
}

/// The first of the most frequent values.
fn most_frequent(values: &[f64; 4]) -> f64 {
    let mut best = (0, 0.0);
    for (k, &x) in values.iter().enumerate() {
        let count = values[..=k].iter().filter(|&&y| y == x).count();
        if count > best.0 {
            best = (count, x);
        }
    }
    best.1
}

/// Replace basin ids that are not integers, or that no diagonal neighbour shares,
/// by the most frequent diagonal neighbour. Cells on the domain boundary get
/// basin 0. Collective.
pub fn round_basins(basins: &Field) -> CryoResult<Field> {
    let input = basins.ghosted(1)?;
    let grid = basins.grid().clone();
    let (mx, my) = (grid.mx(), grid.my());

    let mut result = Field::scalar(&grid, &VAR_BASINS, Ghosts::With(1));
    for (i, j) in grid.points() {
        if i == 0 || j == 0 || i + 2 > mx || j + 2 > my {
            result.set(i, j, 0.0);
            continue;
        }
        let id = input.get(i, j);
        let neighbours = [
            input.get(i + 1, j + 1),
            input.get(i - 1, j + 1),
            input.get(i - 1, j - 1),
            input.get(i + 1, j - 1),
        ];
        if id != id.round() || neighbours.iter().all(|&n| n != id) {
            result.set(i, j, most_frequent(&neighbours));
        } else {
            result.set(i, j, id);
        }
    }
    result.update_ghosts();
    Ok(result)
}

/// Mean forcing over the inner continental shelf of each basin. Basins other
/// than 0 without such cells get the dummy values. Collective.
pub fn compute_ocean_input_per_basin(
    physics: &PicoPhysics,
    n_basins: usize,
    basins: &Field,
    continental_shelf_mask: &Field,
    salinity_ocean: &Field,
    theta_ocean: &Field,
) -> BasinInput {
    let grid = basins.grid().clone();
    // [count, salinity, temperature] per basin
    let mut sums = vec![0.0; 3 * n_basins];
    for (i, j) in grid.points() {
        if continental_shelf_mask.as_int(i, j) != CONTINENTAL_SHELF_INNER {
            continue;
        }
        if let Some(b) = mask_index(basins, i, j, n_basins) {
            sums[3 * b] += 1.0;
            sums[3 * b + 1] += salinity_ocean.get(i, j);
            sums[3 * b + 2] += theta_ocean.get(i, j);
        }
    }
    grid.global_sum_slice(&mut sums);

    let mut input = BasinInput {
        temperature: vec![0.0; n_basins],
        salinity: vec![0.0; n_basins],
        dummy_basins: Vec::new(),
    };
    for b in 0..n_basins {
        let count = sums[3 * b];
        if count > 0.0 {
            input.salinity[b] = sums[3 * b + 1] / count;
            input.temperature[b] = sums[3 * b + 2] / count;
            log::trace!(
                "  {}: temp ={:.3}, salinity={:.3}",
                b,
                input.temperature[b],
                input.salinity[b]
            );
        } else if b > 0 {
            input.temperature[b] = physics.t_dummy();
            input.salinity[b] = physics.s_dummy();
            input.dummy_basins.push(b);
        }
    }
    input
}

/// Box 0 temperature and salinity of floating shelf cells: basin means weighted
/// by the share of the shelf's cells in each basin. Temperatures below the
/// potential freezing point are raised to just above it; returns how many were.
/// Collective.
#[allow(clippy::too_many_arguments)]
fn set_ocean_input_fields(
    physics: &PicoPhysics,
    n_shelves: usize,
    n_basins: usize,
    ice_thickness: &Field,
    cell_type: &Field,
    basins: &Field,
    shelves: &Field,
    input: &BasinInput,
    toc_box0: &mut Field,
    soc_box0: &mut Field,
) -> usize {
    let grid = basins.grid().clone();

    // n_shelves rows of [total, per basin...]
    let stride = n_basins + 1;
    let mut counts = vec![0.0; n_shelves * stride];
    for (i, j) in grid.points() {
        if let Some(s) = mask_index(shelves, i, j, n_shelves) {
            counts[s * stride] += 1.0;
            if let Some(b) = mask_index(basins, i, j, n_basins) {
                counts[s * stride + 1 + b] += 1.0;
            }
        }
    }
    grid.global_sum_slice(&mut counts);

    let mut low_temperature = 0;
    for (i, j) in grid.points() {
        toc_box0.set(i, j, 0.0);
        soc_box0.set(i, j, 0.0);

        let shelf = mask_index(shelves, i, j, n_shelves).filter(|&s| s > 0);
        let s = match shelf {
            Some(s) if cell_type.cell_type(i, j).floating_ice() => s,
            _ => continue,
        };
        let total = counts[s * stride];
        if total <= 0.0 {
            continue;
        }

        let (mut toc, mut soc) = (0.0, 0.0);
        for b in 1..n_basins {
            let weight = counts[s * stride + 1 + b] / total;
            toc += input.temperature[b] * weight;
            soc += input.salinity[b] * weight;
        }

        let theta_pm = physics.theta_pm(soc, physics.pressure(ice_thickness.get(i, j)));
        if toc < theta_pm {
            toc = theta_pm + BOX0_FREEZING_OFFSET;
            low_temperature += 1;
        }
        toc_box0.set(i, j, toc);
        soc_box0.set(i, j, soc);
    }
    grid.global_sum_count(low_temperature)
}

/// Beckmann-Goosse melt rate under every floating shelf cell. Floating ice not
/// connected to the ocean does not melt and is at the pressure melting point.
fn beckmann_goosse(
    physics: &PicoPhysics,
    ice_thickness: &Field,
    cell_type: &Field,
    shelves: &Field,
    toc_box0: &Field,
    soc_box0: &Field,
    out: &mut BoxModelFields,
) {
    let grid = ice_thickness.grid().clone();
    for (i, j) in grid.points() {
        if !cell_type.cell_type(i, j).floating_ice() {
            continue;
        }
        let thickness = ice_thickness.get(i, j);
        if shelves.as_int(i, j) > 0 {
            let pressure = physics.pressure(thickness);
            let (toc, soc) = (toc_box0.get(i, j), soc_box0.get(i, j));
            out.basal_melt_rate
                .set(i, j, physics.melt_rate_beckmann_goosse(physics.theta_pm(soc, pressure), toc));
            out.t_pressure_melting.set(i, j, physics.t_pm(soc, pressure));
            out.toc.set(i, j, toc);
            out.soc.set(i, j, soc);
        } else {
            let pressure = physics.ice_density * physics.standard_gravity * thickness;
            out.t_pressure_melting.set(
                i,
                j,
                physics.melting_point_temperature - physics.beta_clausius_clapeyron * pressure,
            );
            out.basal_melt_rate.set(i, j, 0.0);
        }
    }
}

/// Area of box `box_id` of every shelf. Collective.
fn compute_box_area(box_id: usize, n_shelves: usize, shelves: &Field, boxes: &Field) -> Vec<f64> {
    let grid = shelves.grid().clone();
    let mut result = vec![0.0; n_shelves];
    for (i, j) in grid.points() {
        if let Some(s) = mask_index(shelves, i, j, n_shelves).filter(|&s| s > 0) {
            if boxes.as_int(i, j) == box_id as i32 {
                result[s] += grid.cell_area();
            }
        }
    }
    grid.global_sum_slice(&mut result);
    result
}

/// Mean of `field` over box `box_id` of every shelf; 0 for empty boxes.
/// Collective.
fn compute_box_average(box_id: usize, n_shelves: usize, field: &Field, shelves: &Field, boxes: &Field) -> Vec<f64> {
    let grid = shelves.grid().clone();
    // [count, sum] per shelf
    let mut sums = vec![0.0; 2 * n_shelves];
    for (i, j) in grid.points() {
        if boxes.as_int(i, j) != box_id as i32 {
            continue;
        }
        if let Some(s) = mask_index(shelves, i, j, n_shelves) {
            sums[2 * s] += 1.0;
            sums[2 * s + 1] += field.get(i, j);
        }
    }
    grid.global_sum_slice(&mut sums);
    (0..n_shelves)
        .map(|s| {
            if sums[2 * s] > 0.0 {
                sums[2 * s + 1] / sums[2 * s]
            } else {
                0.0
            }
        })
        .collect()
}

/// Box 1 of every shelf. Returns the number of clamped square roots.
/// Collective.
#[allow(clippy::too_many_arguments)]
fn process_box1(
    physics: &PicoPhysics,
    n_shelves: usize,
    ice_thickness: &Field,
    shelves: &Field,
    boxes: &Field,
    toc_box0: &Field,
    soc_box0: &Field,
    out: &mut BoxModelFields,
) -> usize {
    let grid = shelves.grid().clone();
    let box1_area = compute_box_area(1, n_shelves, shelves, boxes);

    let mut failures = 0;
    for (i, j) in grid.points() {
        let s = match mask_index(shelves, i, j, n_shelves) {
            Some(s) if s > 0 && boxes.as_int(i, j) == 1 => s,
            _ => continue,
        };
        let pressure = physics.pressure(ice_thickness.get(i, j));
        let (toc0, soc0) = (toc_box0.get(i, j), soc_box0.get(i, j));

        let t_star = physics.t_star(soc0, toc0, pressure);
        let toc = physics.toc_box1(box1_area[s], t_star, soc0, toc0);
        if toc.failed {
            log::trace!(
                "PICO ocean WARNING: negative square root argument at {}, {} probably because of positive T_star={}",
                i,
                j,
                t_star
            );
            failures += 1;
        }
        let soc = physics.soc_box1(toc0, soc0, toc.value);

        out.t_star.set(i, j, t_star);
        out.toc.set(i, j, toc.value);
        out.soc.set(i, j, soc);
        out.overturning.set(i, j, physics.overturning(soc0, soc, toc0, toc.value));
        out.basal_melt_rate
            .set(i, j, physics.melt_rate(physics.theta_pm(soc, pressure), toc.value));
        out.t_pressure_melting.set(i, j, physics.t_pm(soc, pressure));
    }
    grid.global_sum_count(failures)
}

/// Boxes `2..=n_boxes`, each fed by the averages of the previous box and the
/// box 1 overturning. Shelves for which any of these averages is zero keep the
/// Beckmann-Goosse values; returns the number of such cells. Collective.
#[allow(clippy::too_many_arguments)]
fn process_other_boxes(
    physics: &PicoPhysics,
    n_shelves: usize,
    n_boxes: usize,
    ice_thickness: &Field,
    shelves: &Field,
    boxes: &Field,
    out: &mut BoxModelFields,
) -> usize {
    let grid = shelves.grid().clone();
    let overturning = compute_box_average(1, n_shelves, out.overturning, shelves, boxes);

    let mut total_fallback = 0;
    for box_id in 2..=n_boxes {
        let temperature = compute_box_average(box_id - 1, n_shelves, out.toc, shelves, boxes);
        let salinity = compute_box_average(box_id - 1, n_shelves, out.soc, shelves, boxes);
        let use_beckmann_goosse: Vec<bool> = (0..n_shelves)
            .map(|s| salinity[s] == 0.0 || temperature[s] == 0.0 || overturning[s] == 0.0)
            .collect();
        let box_area = compute_box_area(box_id, n_shelves, shelves, boxes);

        let mut fallback = 0;
        for (i, j) in grid.points() {
            let s = match mask_index(shelves, i, j, n_shelves) {
                Some(s) if s > 0 && boxes.as_int(i, j) == box_id as i32 => s,
                _ => continue,
            };
            if use_beckmann_goosse[s] {
                fallback += 1;
                continue;
            }
            let (s_previous, t_previous) = (salinity[s], temperature[s]);
            let pressure = physics.pressure(ice_thickness.get(i, j));

            let t_star = physics.t_star(s_previous, t_previous, pressure);
            let toc = physics.toc(box_area[s], t_previous, t_star, overturning[s], s_previous);
            let soc = physics.soc(s_previous, t_previous, toc);

            out.t_star.set(i, j, t_star);
            out.toc.set(i, j, toc);
            out.soc.set(i, j, soc);
            out.basal_melt_rate
                .set(i, j, physics.melt_rate(physics.theta_pm(soc, pressure), toc));
            out.t_pressure_melting.set(i, j, physics.t_pm(soc, pressure));
        }

        let fallback = grid.global_sum_count(fallback);
        if fallback > 0 {
            log::warn!(
                "PICO ocean WARNING: box {}, no boundary data from previous box in {} case(s)!\n\
                 switching to Beckmann Goosse (2003) meltrate calculation",
                box_id,
                fallback
            );
        }
        total_fallback += fallback;
    }
    total_fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cryo_core::io::MemoryStore;
    use cryo_core::mask::CellType;
    use ndarray::Array2;
    use std::collections::BTreeMap;

    #[test]
    fn test_most_frequent() {
        assert_eq!(most_frequent(&[2.0, 3.0, 2.0, 2.0]), 2.0);
        assert_eq!(most_frequent(&[1.0, 3.0, 3.0, 1.0]), 1.0);
        assert_eq!(most_frequent(&[4.0, 5.0, 6.0, 7.0]), 4.0);
    }

    #[test]
    fn test_round_basins() {
        let grid = Grid::serial(5, 5, 1.0, 1.0).unwrap();
        let mut basins = Field::scalar(&grid, &VAR_BASINS, Ghosts::Without);
        basins.fill(2.0);
        basins.set(1, 1, 3.0);
        basins.set(2, 2, 2.4);
        // integer without a matching diagonal neighbour
        basins.set(3, 3, 3.0);
        basins.set(4, 4, 3.0);

        let rounded = round_basins(&basins).unwrap();
        // diagonal neighbours of (2, 2) are {3, 2, 3, 2}
        assert_eq!(rounded.get(2, 2), 3.0);
        // (3, 3) shares a value with (4, 4)
        assert_eq!(rounded.get(3, 3), 3.0);
        // (1, 1) = 3 has no diagonal neighbour equal to 3 in the input
        assert_eq!(rounded.get(1, 1), 2.0);
        for k in 0..5 {
            assert_eq!(rounded.get(k, 0), 0.0);
            assert_eq!(rounded.get(0, k), 0.0);
            assert_eq!(rounded.get(k, 4), 0.0);
            assert_eq!(rounded.get(4, k), 0.0);
        }
    }

    #[test]
    fn test_round_basins_majority() {
        let grid = Grid::serial(5, 5, 1.0, 1.0).unwrap();
        let mut basins = Field::scalar(&grid, &VAR_BASINS, Ghosts::Without);
        basins.fill(2.0);
        basins.set(2, 2, 2.5);
        basins.set(1, 3, 3.0);
        let rounded = round_basins(&basins).unwrap();
        // diagonal neighbours {2, 3, 2, 2}
        assert_eq!(rounded.get(2, 2), 2.0);
    }

    #[test]
    fn test_ocean_input_per_basin() {
        let grid = Grid::serial(6, 4, 1.0, 1.0).unwrap();
        let physics = PicoPhysics::from_config(&Config::default()).unwrap();

        let mut basins = Field::scalar(&grid, &VAR_BASINS, Ghosts::Without);
        let mut shelf = Field::work(&grid, "contshelf", 1, Ghosts::Without);
        let mut salinity = Field::scalar(&grid, &VAR_SALINITY_OCEAN, Ghosts::Without);
        let mut theta = Field::scalar(&grid, &VAR_THETA_OCEAN, Ghosts::Without);
        for (i, j) in grid.points() {
            basins.set(i, j, if i < 3 { 1.0 } else { 2.0 });
            shelf.set(i, j, if i < 3 && j > 0 { 2.0 } else { 1.0 });
            salinity.set(i, j, 34.0 + 0.1 * j as f64);
            theta.set(i, j, 272.0 + i as f64);
        }

        let input = compute_ocean_input_per_basin(&physics, 3, &basins, &shelf, &salinity, &theta);
        // basin 1: i in 0..3, j in 1..4
        assert_relative_eq!(input.salinity[1], 34.2, max_relative = 1e-14);
        assert_relative_eq!(input.temperature[1], 273.0, max_relative = 1e-14);
        // basin 2 has no inner continental shelf
        assert_eq!(input.temperature[2], physics.t_dummy());
        assert_eq!(input.salinity[2], physics.s_dummy());
        assert_eq!(input.dummy_basins, vec![2]);
        assert_eq!(input.temperature[0], 0.0);
    }

    /// An embayment: grounded ice on the left and along both sides of a shelf
    /// that opens to the ocean on the right.
    fn channel(config: &Config) -> (Arc<Grid>, Geometry, BTreeMap<String, MemoryStore>) {
        let (mx, my) = (12, 7);
        let grid = Grid::serial(mx, my, 10.0e3, 10.0e3).unwrap();
        let mut geometry = Geometry::new(&grid);
        for (i, j) in grid.points() {
            let (bed, thickness) = match (i, j) {
                (0..=3, _) | (4..=8, 0 | 6) => (100.0, 1000.0),
                (4..=8, _) => (-600.0, 400.0),
                _ => (-600.0, 0.0),
            };
            geometry.bed_elevation.set(i, j, bed);
            geometry.ice_thickness.set(i, j, thickness);
        }
        geometry.ensure_consistency(config).unwrap();

        let forcing = MemoryStore::new()
            .with("theta_ocean", Array2::from_elem((my, mx), 273.15 + 1.0))
            .with("salinity_ocean", Array2::from_elem((my, mx), 34.7))
            .with("basins", Array2::from_elem((my, mx), 1.0));
        let files = BTreeMap::from([("pico.nc".to_string(), forcing)]);
        (grid, geometry, files)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.set_string("ocean_pico_file", "pico.nc");
        config.set_number("ocean.pico.number_of_boxes", 3.0);
        config.set_number("ocean.pico.number_of_basins", 2.0);
        config
    }

    #[test]
    fn test_box_chain_extracts_heat() {
        let config = config();
        let (grid, geometry, files) = channel(&config);
        let mut model = Pico::from_config(&config).unwrap();
        model.init(&files, &geometry).unwrap();

        let report = model.report().unwrap();
        assert_eq!(report.n_shelves, 2);
        assert!(report.dummy_basins.is_empty());
        assert_eq!(report.low_temperature_cells, 0);
        assert_eq!(report.box1_failures, 0);
        assert_eq!(report.beckmann_goosse_cells, 0);

        let state = model.state().unwrap();
        let shelves = state.geometry.ice_shelf_mask();
        let boxes = state.geometry.box_mask();
        assert_eq!(shelves.get(6, 3), 1.0);
        assert_eq!(shelves.get(6, 0), 0.0);
        // along the centre line
        assert_eq!(boxes.get(4, 3), 1.0);
        assert_eq!(boxes.get(5, 3), 2.0);
        assert_eq!(boxes.get(8, 3), 3.0);

        // every shelf cell sees the basin mean as box 0 input
        assert_relative_eq!(state.toc_box0.get(6, 3), 274.15, max_relative = 1e-14);

        let mean = |box_id: usize| {
            compute_box_average(box_id, 2, &state.toc, shelves, boxes)[1]
        };
        let (t1, t2, t3) = (mean(1), mean(2), mean(3));
        assert!(274.15 > t1 && t1 >= t2 && t2 >= t3, "{} {} {}", t1, t2, t3);

        let melt = &state.basal_melt_rate;
        for (i, j) in grid.points() {
            assert!(melt.get(i, j).is_finite());
            let floating = geometry.cell_type.cell_type(i, j) == CellType::FloatingIce;
            assert_eq!(melt.get(i, j) > 0.0, floating, "({}, {})", i, j);
        }

        let flux = model.shelf_base_mass_flux().unwrap();
        assert_relative_eq!(flux.get(6, 3), melt.get(6, 3) * 910.0, max_relative = 1e-14);
        assert_eq!(model.sea_level_elevation().unwrap().max(), 0.0);

        let diagnostics = model.diagnostics().unwrap();
        assert_eq!(diagnostics.len(), 12);
        let box_mask = diagnostics.compute("pico_ocean_box_mask").unwrap().unwrap();
        assert_eq!(box_mask.get(5, 3), 2.0);
    }

    #[test]
    fn test_invalid_basins() {
        let mut config = config();
        config.set_number("ocean.pico.number_of_basins", 1.0);
        let (_, geometry, files) = channel(&config);
        let mut model = Pico::from_config(&config).unwrap();
        assert!(matches!(
            model.init(&files, &geometry),
            Err(CryoError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_basin_data_uses_dummy_values() {
        let mut config = config();
        config.set_number("ocean.pico.number_of_basins", 3.0);
        let (_, geometry, files) = channel(&config);
        let mut model = Pico::from_config(&config).unwrap();
        model.init(&files, &geometry).unwrap();
        assert_eq!(model.report().unwrap().dummy_basins, vec![2]);
        // basin 2 covers no shelf cells, so the inputs are unaffected
        let toc_box0 = &model.state().unwrap().toc_box0;
        assert_relative_eq!(toc_box0.get(6, 3), 274.15, max_relative = 1e-14);
    }
}
