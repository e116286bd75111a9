//! Geometric part of the box model: which cells belong to which ice shelf and
//! to which box.
//!
//! Connectivity is a global property, so the masks are computed from globally
//! gathered copies of the inputs on every rank. Neighbours are the four direct
//! ones and the domain is not periodic.

use cryo_core::errors::CryoResult;
use cryo_core::field::{Field, Ghosts};
use cryo_core::grid::Grid;
use cryo_core::mask::CellType;
use cryo_core::standard_variables::{VAR_PICO_BOX_MASK, VAR_PICO_CONTSHELF_MASK, VAR_PICO_SHELF_MASK};
use cryo_core::variable::VariableDefinition;
use ndarray::{Array2, Axis};
use petgraph::unionfind::UnionFind;
use std::collections::VecDeque;
use std::sync::Arc;

/// Values of the continental shelf mask.
pub const CONTINENTAL_SHELF_OUTER: i32 = 1;
pub const CONTINENTAL_SHELF_INNER: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySettings {
    pub number_of_boxes: usize,
    /// Ignore grounding lines of grounded islands when measuring the distance
    /// to the grounding line.
    pub exclude_ice_rises: bool,
    pub continental_shelf_depth: f64,
}

/// Masks used by the box model, all indexed like the grid and without halo.
#[derive(Debug, Clone)]
pub struct PicoGeometry {
    ice_shelf_mask: Field,
    continental_shelf_mask: Field,
    box_mask: Field,
}

impl PicoGeometry {
    pub fn new(grid: &Arc<Grid>) -> Self {
        Self {
            ice_shelf_mask: Field::scalar(grid, &VAR_PICO_SHELF_MASK, Ghosts::Without),
            continental_shelf_mask: Field::scalar(grid, &VAR_PICO_CONTSHELF_MASK, Ghosts::Without),
            box_mask: Field::scalar(grid, &VAR_PICO_BOX_MASK, Ghosts::Without),
        }
    }

    /// Ice shelves numbered `1..N`; 0 elsewhere, including floating ice in lakes.
    pub fn ice_shelf_mask(&self) -> &Field {
        &self.ice_shelf_mask
    }

    pub fn continental_shelf_mask(&self) -> &Field {
        &self.continental_shelf_mask
    }

    /// Box number of each ice shelf cell, starting from 1 at the grounding line.
    pub fn box_mask(&self) -> &Field {
        &self.box_mask
    }

    /// Recompute every mask. Collective.
    pub fn update(&mut self, bed_elevation: &Field, cell_type: &Field, settings: &GeometrySettings) -> CryoResult<()> {
        let grid = cell_type.grid().clone();
        let cell_type = cell_type.gather_global_2d().mapv(|v| CellType::from_int(v.round() as i32));
        let bed = bed_elevation.gather_global_2d();

        let lakes = lakes(&cell_type);
        let (shelves, n_shelves) = ice_shelves(&cell_type, &lakes);
        let rises = if settings.exclude_ice_rises {
            ice_rises(&cell_type)
        } else {
            Array2::from_elem(cell_type.dim(), false)
        };
        let continental_shelf = continental_shelf(&cell_type, &bed, &lakes, settings.continental_shelf_depth);

        let grounding_line = |j: usize, i: usize| {
            neighbours(cell_type.dim(), j, i)
                .any(|(jj, ii)| cell_type[[jj, ii]].grounded() && !rises[[jj, ii]])
        };
        let calving_front = |j: usize, i: usize| {
            neighbours(cell_type.dim(), j, i)
                .any(|(jj, ii)| cell_type[[jj, ii]].ice_free_ocean() && !lakes[[jj, ii]])
        };
        let distance_gl = distances(&shelves, grounding_line);
        let distance_cf = distances(&shelves, calving_front);
        let boxes = box_mask(&shelves, n_shelves, &distance_gl, &distance_cf, settings.number_of_boxes);

        log::debug!("PICO geometry: {} ice shelves", n_shelves);

        self.ice_shelf_mask = to_field(&grid, &VAR_PICO_SHELF_MASK, shelves.mapv(|s| s as f64))?;
        self.continental_shelf_mask = to_field(&grid, &VAR_PICO_CONTSHELF_MASK, continental_shelf.mapv(f64::from))?;
        self.box_mask = to_field(&grid, &VAR_PICO_BOX_MASK, boxes.mapv(|b| b as f64))?;
        Ok(())
    }
}

fn to_field(grid: &Arc<Grid>, definition: &VariableDefinition, values: Array2<f64>) -> CryoResult<Field> {
    Field::from_global(
        grid,
        definition.name,
        vec![definition.into()],
        Ghosts::Without,
        &values.insert_axis(Axis(2)),
    )
}

/// In-domain direct neighbours of `[j, i]`.
fn neighbours((my, mx): (usize, usize), j: usize, i: usize) -> impl Iterator<Item = (usize, usize)> {
    let candidates = [
        (j.checked_add(1), Some(i)),
        (j.checked_sub(1), Some(i)),
        (Some(j), i.checked_add(1)),
        (Some(j), i.checked_sub(1)),
    ];
    candidates.into_iter().filter_map(move |c| match c {
        (Some(jj), Some(ii)) if jj < my && ii < mx => Some((jj, ii)),
        _ => None,
    })
}

/// Label the connected components of `active` with `1..=N` in row-major order of
/// their first cell; inactive cells get 0.
pub fn label_components(active: &Array2<bool>) -> (Array2<usize>, usize) {
    let (my, mx) = active.dim();
    let index = |j: usize, i: usize| j * mx + i;

    let mut sets = UnionFind::<usize>::new(my * mx);
    for ((j, i), &a) in active.indexed_iter() {
        if !a {
            continue;
        }
        if i + 1 < mx && active[[j, i + 1]] {
            sets.union(index(j, i), index(j, i + 1));
        }
        if j + 1 < my && active[[j + 1, i]] {
            sets.union(index(j, i), index(j + 1, i));
        }
    }

    let mut labels_of_roots = vec![0; my * mx];
    let mut n = 0;
    let mut result = Array2::zeros((my, mx));
    for ((j, i), &a) in active.indexed_iter() {
        if !a {
            continue;
        }
        let root = sets.find_mut(index(j, i));
        if labels_of_roots[root] == 0 {
            n += 1;
            labels_of_roots[root] = n;
        }
        result[[j, i]] = labels_of_roots[root];
    }
    (result, n)
}

/// Ocean (floating or ice-free) regions not connected to the domain boundary.
pub fn lakes(cell_type: &Array2<CellType>) -> Array2<bool> {
    let (my, mx) = cell_type.dim();
    let (labels, n) = label_components(&cell_type.mapv(|c| c.ocean()));

    let mut open = vec![false; n + 1];
    for ((j, i), &label) in labels.indexed_iter() {
        if label > 0 && (i == 0 || j == 0 || i == mx - 1 || j == my - 1) {
            open[label] = true;
        }
    }
    labels.mapv(|label| label > 0 && !open[label])
}

/// Connected floating regions outside lakes, numbered `1..=N`.
pub fn ice_shelves(cell_type: &Array2<CellType>, lakes: &Array2<bool>) -> (Array2<usize>, usize) {
    let floating = ndarray::Zip::from(cell_type)
        .and(lakes)
        .map_collect(|c, &lake| c.floating_ice() && !lake);
    label_components(&floating)
}

/// Grounded regions other than the largest one (the continent).
pub fn ice_rises(cell_type: &Array2<CellType>) -> Array2<bool> {
    let (labels, n) = label_components(&cell_type.mapv(|c| c.grounded()));
    let mut area = vec![0usize; n + 1];
    for &label in labels.iter().filter(|&&label| label > 0) {
        area[label] += 1;
    }
    // ties go to the lower label
    let continent = (1..=n).fold(0, |best, label| if area[label] > area[best] { label } else { best });
    labels.mapv(|label| label > 0 && label != continent)
}

/// [`CONTINENTAL_SHELF_INNER`] for open ice-free ocean with the bed above
/// `depth`, [`CONTINENTAL_SHELF_OUTER`] for other open ice-free ocean, 0 elsewhere.
pub fn continental_shelf(
    cell_type: &Array2<CellType>,
    bed: &Array2<f64>,
    lakes: &Array2<bool>,
    depth: f64,
) -> Array2<i32> {
    ndarray::Zip::from(cell_type)
        .and(bed)
        .and(lakes)
        .map_collect(|c, &b, &lake| {
            if !c.ice_free_ocean() || lake {
                0
            } else if b > depth {
                CONTINENTAL_SHELF_INNER
            } else {
                CONTINENTAL_SHELF_OUTER
            }
        })
}

/// Distance (in cells, through cells of the same shelf) to the nearest shelf cell
/// satisfying `is_source`, counting sources as 1. Unreachable and non-shelf
/// cells get 0.
pub fn distances(shelves: &Array2<usize>, is_source: impl Fn(usize, usize) -> bool) -> Array2<usize> {
    let dim = shelves.dim();
    let mut result = Array2::zeros(dim);
    let mut queue = VecDeque::new();
    for ((j, i), &s) in shelves.indexed_iter() {
        if s > 0 && is_source(j, i) {
            result[[j, i]] = 1;
            queue.push_back((j, i));
        }
    }
    while let Some((j, i)) = queue.pop_front() {
        let d = result[[j, i]];
        for (jj, ii) in neighbours(dim, j, i) {
            if shelves[[jj, ii]] == shelves[[j, i]] && result[[jj, ii]] == 0 {
                result[[jj, ii]] = d + 1;
                queue.push_back((jj, ii));
            }
        }
    }
    result
}

/// Assign each shelf cell to a box.
///
/// Shelf `D` gets `n_D = 1 + round(sqrt(d_GL(D) / d_max) (n - 1))` boxes, where
/// `d_GL(D)` is its largest distance to the grounding line and `d_max` the
/// largest over all shelves. A cell with relative position
/// `r = d_GL / (d_GL + d_CF)` lies in the first box `k` with
/// `r < 1 - sqrt((n_D - k) / n_D)`. Cells not reached from the grounding line
/// count as `r = 0`, cells not reached from the calving front as `r = 1`.
pub fn box_mask(
    shelves: &Array2<usize>,
    n_shelves: usize,
    distance_gl: &Array2<usize>,
    distance_cf: &Array2<usize>,
    number_of_boxes: usize,
) -> Array2<usize> {
    let mut max_distance = vec![0usize; n_shelves + 1];
    for (&s, &d) in shelves.iter().zip(distance_gl.iter()) {
        max_distance[s] = max_distance[s].max(d);
    }
    let d_max = max_distance.iter().skip(1).copied().max().unwrap_or(0);

    let n_boxes: Vec<usize> = max_distance
        .iter()
        .map(|&d| {
            if d_max == 0 || number_of_boxes <= 1 {
                1
            } else {
                let scaled = ((d as f64 / d_max as f64).sqrt() * (number_of_boxes - 1) as f64).round();
                (1 + scaled as usize).min(number_of_boxes)
            }
        })
        .collect();

    ndarray::Zip::from(shelves)
        .and(distance_gl)
        .and(distance_cf)
        .map_collect(|&s, &d_gl, &d_cf| {
            if s == 0 {
                return 0;
            }
            let r = match (d_gl, d_cf) {
                (0, _) => 0.0,
                (_, 0) => 1.0,
                _ => d_gl as f64 / (d_gl + d_cf) as f64,
            };
            let n = n_boxes[s];
            (1..=n)
                .find(|&k| r < 1.0 - ((n - k) as f64 / n as f64).sqrt())
                .unwrap_or(n)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const G: CellType = CellType::GroundedIce;
    const F: CellType = CellType::FloatingIce;
    const O: CellType = CellType::IceFreeOcean;
    const L: CellType = CellType::IceFreeBedrock;

    #[test]
    fn test_label_components() {
        let active = array![
            [true, true, false, true],
            [false, true, false, true],
            [true, false, false, false],
        ];
        let (labels, n) = label_components(&active);
        assert_eq!(n, 3);
        assert_eq!(labels, array![[1, 1, 0, 2], [0, 1, 0, 2], [3, 0, 0, 0]]);
    }

    #[test]
    fn test_lakes_and_shelves() {
        // a shelf open to the ocean on the right and a lake enclosed by grounded ice
        let cell_type = array![
            [G, G, G, G, G, O],
            [G, F, G, F, F, O],
            [G, G, G, F, F, O],
            [G, G, G, G, G, O],
        ];
        let lakes = lakes(&cell_type);
        assert!(lakes[[1, 1]]);
        assert!(!lakes[[1, 3]]);
        assert!(!lakes[[0, 5]]);

        let (shelves, n) = ice_shelves(&cell_type, &lakes);
        assert_eq!(n, 1);
        assert_eq!(shelves[[1, 1]], 0);
        assert_eq!(shelves[[1, 3]], 1);
        assert_eq!(shelves[[2, 4]], 1);
    }

    #[test]
    fn test_ice_rises_and_continental_shelf() {
        let cell_type = array![
            [G, G, O, O, O],
            [G, G, O, G, O],
            [L, G, O, O, O],
        ];
        let rises = ice_rises(&cell_type);
        assert!(rises[[1, 3]]);
        assert!(!rises[[0, 0]]);
        assert!(!rises[[2, 0]]);

        let bed = array![
            [100.0, 100.0, -500.0, -900.0, -900.0],
            [100.0, 100.0, -500.0, 10.0, -900.0],
            [100.0, 100.0, -500.0, -500.0, -900.0],
        ];
        let no_lakes = Array2::from_elem(cell_type.dim(), false);
        let shelf = continental_shelf(&cell_type, &bed, &no_lakes, -800.0);
        assert_eq!(shelf.row(0).to_vec(), vec![0, 0, 2, 1, 1]);
        assert_eq!(shelf[[1, 3]], 0);
        assert_eq!(shelf[[2, 3]], 2);
    }

    #[test]
    fn test_distances_and_boxes() {
        // one shelf row between the grounded ice and the ocean
        let cell_type = array![
            [O, O, O, O, O, O, O, O],
            [G, F, F, F, F, F, F, O],
            [O, O, O, O, O, O, O, O],
        ];
        let lakes = lakes(&cell_type);
        let (shelves, n) = ice_shelves(&cell_type, &lakes);
        assert_eq!(n, 1);

        let gl = |j: usize, i: usize| {
            neighbours(cell_type.dim(), j, i).any(|(jj, ii)| cell_type[[jj, ii]].grounded())
        };
        let distance_gl = distances(&shelves, gl);
        assert_eq!(distance_gl.row(1).to_vec(), vec![0, 1, 2, 3, 4, 5, 6, 0]);

        // measured along the row only
        let front = |j: usize, i: usize| i == 6 && j == 1;
        let distance_cf = distances(&shelves, front);
        assert_eq!(distance_cf.row(1).to_vec(), vec![0, 6, 5, 4, 3, 2, 1, 0]);

        let boxes = box_mask(&shelves, n, &distance_gl, &distance_cf, 3);
        let row = boxes.row(1).to_vec();
        assert_eq!(row[0], 0);
        assert_eq!(row[1], 1);
        assert_eq!(row[6], 3);
        assert!(row[1..7].windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_smaller_shelves_get_fewer_boxes() {
        let shelves = array![[1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 2]];
        let distance_gl = array![[1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1]];
        let distance_cf = array![[9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 1]];
        let boxes = box_mask(&shelves, 2, &distance_gl, &distance_cf, 5);
        assert_eq!(boxes[[0, 0]], 1);
        assert_eq!(boxes[[0, 8]], 5);
        // n_D = 1 + round(sqrt(1/9) * 4) = 2 and r = 0.5
        assert_eq!(boxes[[0, 10]], 2);
        assert_eq!(boxes[[0, 9]], 0);
    }
}
