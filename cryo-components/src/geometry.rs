//! Ice geometry shared by the stress balance and the ocean models.

use cryo_core::config::Config;
use cryo_core::errors::CryoResult;
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::io::FieldSource;
use cryo_core::mask::CellType;
use cryo_core::standard_variables::{VAR_BED, VAR_MASK, VAR_SEA_LEVEL, VAR_SURFACE, VAR_THICKNESS};
use std::sync::Arc;

/// Thickness, bed and sea level plus the fields derived from them.
///
/// Call [`Geometry::ensure_consistency`] after changing any of the inputs so that
/// the surface elevation and cell type match.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub ice_thickness: Field,
    pub bed_elevation: Field,
    pub sea_level_elevation: Field,
    pub ice_surface_elevation: Field,
    pub cell_type: Field,
}

impl Geometry {
    pub fn new(grid: &Arc<Grid>) -> Self {
        let ghosts = Ghosts::With(grid.max_stencil_width());
        Self {
            ice_thickness: Field::scalar(grid, &VAR_THICKNESS, ghosts),
            bed_elevation: Field::scalar(grid, &VAR_BED, ghosts),
            sea_level_elevation: Field::scalar(grid, &VAR_SEA_LEVEL, ghosts),
            ice_surface_elevation: Field::scalar(grid, &VAR_SURFACE, ghosts),
            cell_type: Field::scalar(grid, &VAR_MASK, ghosts),
        }
    }

    /// Read thickness and bed elevation (and sea level, if present) from `source`.
    pub fn from_source(grid: &Arc<Grid>, source: &dyn FieldSource, config: &Config) -> CryoResult<Self> {
        let mut geometry = Self::new(grid);
        let ghosts = Ghosts::With(grid.max_stencil_width());
        geometry.ice_thickness = source.read(grid, &VAR_THICKNESS, ghosts)?;
        geometry.bed_elevation = source.read(grid, &VAR_BED, ghosts)?;
        if source.contains(VAR_SEA_LEVEL.name) {
            geometry.sea_level_elevation = source.read(grid, &VAR_SEA_LEVEL, ghosts)?;
        }
        geometry.ensure_consistency(config)?;
        Ok(geometry)
    }

    /// Recompute the surface elevation and the cell type using the flotation
    /// criterion. Collective.
    pub fn ensure_consistency(&mut self, config: &Config) -> CryoResult<()> {
        let ice_density = config.get_number("constants.ice.density")?;
        let sea_water_density = config.get_number("constants.sea_water.density")?;
        let thickness_threshold = config.get_number("geometry.ice_free_thickness_standard")?;
        let alpha = 1.0 - ice_density / sea_water_density;

        let grid = self.ice_thickness.grid().clone();
        for (i, j) in grid.points() {
            let thickness = self.ice_thickness.get(i, j);
            let bed = self.bed_elevation.get(i, j);
            let sea_level = self.sea_level_elevation.get(i, j);

            let grounded_surface = bed + thickness;
            let floating_surface = sea_level + alpha * thickness;
            let floating = floating_surface > grounded_surface;

            let cell_type = match (thickness > thickness_threshold, floating) {
                (true, true) => CellType::FloatingIce,
                (true, false) => CellType::GroundedIce,
                (false, true) => CellType::IceFreeOcean,
                (false, false) => CellType::IceFreeBedrock,
            };
            self.cell_type.set(i, j, cell_type.value());
            self.ice_surface_elevation
                .set(i, j, grounded_surface.max(floating_surface));
        }

        for field in [
            &mut self.ice_thickness,
            &mut self.bed_elevation,
            &mut self.sea_level_elevation,
            &mut self.ice_surface_elevation,
            &mut self.cell_type,
        ] {
            field.update_ghosts();
        }
        Ok(())
    }

    pub fn grid(&self) -> &Arc<Grid> {
        self.ice_thickness.grid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flotation_criterion() {
        let grid = Grid::serial(4, 3, 1000.0, 1000.0).unwrap();
        let config = Config::default();
        let mut geometry = Geometry::new(&grid);

        // (thickness, bed): grounded, floating, ice-free ocean, ice-free land
        let columns = [(1000.0, 0.0), (200.0, -500.0), (0.0, -100.0), (0.0, 50.0)];
        for j in 0..3 {
            for (i, (thickness, bed)) in columns.iter().enumerate() {
                geometry.ice_thickness.set(i, j, *thickness);
                geometry.bed_elevation.set(i, j, *bed);
            }
        }
        geometry.ensure_consistency(&config).unwrap();

        let expected = [
            CellType::GroundedIce,
            CellType::FloatingIce,
            CellType::IceFreeOcean,
            CellType::IceFreeBedrock,
        ];
        for (i, cell_type) in expected.iter().enumerate() {
            assert_eq!(geometry.cell_type.cell_type(i, 1), *cell_type);
        }
        assert_relative_eq!(geometry.ice_surface_elevation.get(0, 1), 1000.0);
        assert_relative_eq!(
            geometry.ice_surface_elevation.get(1, 1),
            200.0 * (1.0 - 910.0 / 1028.0),
            max_relative = 1e-12
        );
        assert_eq!(geometry.ice_surface_elevation.get(2, 1), 0.0);
        assert_eq!(geometry.ice_surface_elevation.get(3, 1), 50.0);
    }
}
