//! Fields: named, possibly multi-component arrays over a [`Grid`].
//!
//! A field stores the points owned by this rank plus an optional halo of ghost
//! points (its stencil width). Ghost values are copies of neighbouring tiles (or of
//! the opposite side of the domain) and are only valid after
//! [`Field::update_ghosts`] has been called following the last write:
//!
//! - every write through [`Field::set`], `IndexMut` or [`Field::set_vector`] marks
//!   the ghosts stale;
//! - reading a ghost point while the ghosts are stale panics.
//!
//! Components are stored contiguously per point. Masks are stored as `f64` and read
//! back with [`Field::as_int`] or [`Field::cell_type`].

use crate::errors::{CryoError, CryoResult};
use crate::grid::Grid;
use crate::mask::CellType;
use crate::variable::{FieldMetadata, VariableDefinition};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub};
use std::sync::Arc;

/// A 2D vector, used for horizontal velocities and stresses.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub u: f64,
    pub v: f64,
}

impl Vector2 {
    pub const fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    pub fn magnitude(&self) -> f64 {
        self.u.hypot(self.v)
    }
}

impl Add for Vector2 {
    type Output = Vector2;
    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.u + rhs.u, self.v + rhs.v)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Vector2) {
        self.u += rhs.u;
        self.v += rhs.v;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;
    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.u - rhs.u, self.v - rhs.v)
    }
}

impl Mul<f64> for Vector2 {
    type Output = Vector2;
    fn mul(self, rhs: f64) -> Vector2 {
        Vector2::new(self.u * rhs, self.v * rhs)
    }
}

impl Neg for Vector2 {
    type Output = Vector2;
    fn neg(self) -> Vector2 {
        Vector2::new(-self.u, -self.v)
    }
}

/// Neighbour directions of a [`Star`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    East,
    West,
    North,
    South,
}

/// Values at a point and its four nearest neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Star<T> {
    pub ij: T,
    pub e: T,
    pub w: T,
    pub n: T,
    pub s: T,
}

impl<T> Index<Direction> for Star<T> {
    type Output = T;
    fn index(&self, direction: Direction) -> &T {
        match direction {
            Direction::East => &self.e,
            Direction::West => &self.w,
            Direction::North => &self.n,
            Direction::South => &self.s,
        }
    }
}

/// Ghost halo of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ghosts {
    Without,
    With(usize),
}

impl Ghosts {
    fn width(self) -> usize {
        match self {
            Ghosts::Without => 0,
            Ghosts::With(w) => w,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    grid: Arc<Grid>,
    name: String,
    metadata: Vec<FieldMetadata>,
    stencil_width: usize,
    ghosts_fresh: bool,
    /// Indexed by `[j - ys + w, i - xs + w, component]`.
    data: Array3<f64>,
}

impl Field {
    /// Create a zero-filled field with one component per metadata entry.
    ///
    /// # Panics
    ///
    /// Panics if `metadata` is empty or the stencil width exceeds the grid maximum.
    pub fn new(grid: &Arc<Grid>, name: &str, metadata: Vec<FieldMetadata>, ghosts: Ghosts) -> Self {
        assert!(!metadata.is_empty(), "field {} needs at least one component", name);
        let w = ghosts.width();
        assert!(
            w <= grid.max_stencil_width(),
            "stencil width {} of {} exceeds the grid maximum {}",
            w,
            name,
            grid.max_stencil_width()
        );
        let tile = grid.tile();
        let dof = metadata.len();
        Self {
            grid: Arc::clone(grid),
            name: name.to_string(),
            metadata,
            stencil_width: w,
            ghosts_fresh: true,
            data: Array3::zeros((tile.ym + 2 * w, tile.xm + 2 * w, dof)),
        }
    }

    /// Scalar field described by a standard variable.
    pub fn scalar(grid: &Arc<Grid>, definition: &VariableDefinition, ghosts: Ghosts) -> Self {
        Self::new(grid, definition.name, vec![definition.into()], ghosts)
    }

    /// Two-component field described by a pair of standard variables.
    pub fn new_vector(
        grid: &Arc<Grid>,
        name: &str,
        components: [&VariableDefinition; 2],
        ghosts: Ghosts,
    ) -> Self {
        Self::new(
            grid,
            name,
            components.iter().map(|d| FieldMetadata::from(*d)).collect(),
            ghosts,
        )
    }

    /// Work field with `dof` anonymous components.
    pub fn work(grid: &Arc<Grid>, name: &str, dof: usize, ghosts: Ghosts) -> Self {
        let metadata = (0..dof)
            .map(|k| FieldMetadata::work(&format!("{}[{}]", name, k)))
            .collect();
        Self::new(grid, name, metadata, ghosts)
    }

    /// Build a field from a globally indexed `[j, i, component]` array.
    ///
    /// Every rank holds the complete array, so ghosts are filled without
    /// communication.
    pub fn from_global(
        grid: &Arc<Grid>,
        name: &str,
        metadata: Vec<FieldMetadata>,
        ghosts: Ghosts,
        global: &Array3<f64>,
    ) -> CryoResult<Self> {
        let mut field = Self::new(grid, name, metadata, ghosts);
        let expected = (grid.my(), grid.mx(), field.dof());
        if global.dim() != expected {
            return Err(CryoError::Grid(format!(
                "{} has shape {:?}, expected {:?}",
                name,
                global.dim(),
                expected
            )));
        }
        field.fill_from_global(global);
        Ok(field)
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &[FieldMetadata] {
        &self.metadata
    }

    pub fn dof(&self) -> usize {
        self.metadata.len()
    }

    pub fn stencil_width(&self) -> usize {
        self.stencil_width
    }

    pub fn ghosts_fresh(&self) -> bool {
        self.ghosts_fresh
    }

    /// Fail with a `DimensionMismatch` unless this field has `dof` components.
    pub fn check_dof(&self, dof: usize) -> CryoResult<()> {
        if self.dof() != dof {
            return Err(CryoError::DimensionMismatch {
                field: self.name.clone(),
                expected: dof,
                found: self.dof(),
            });
        }
        Ok(())
    }

    fn local_offset(index: usize, start: usize, len: usize, n: usize, w: usize) -> Option<(usize, bool)> {
        let (w, n) = (w as isize, n as isize);
        let mut d = index as isize - start as isize;
        if d < -w {
            d += n;
        } else if d >= len as isize + w {
            d -= n;
        }
        if d < -w || d >= len as isize + w {
            return None;
        }
        let ghost = d < 0 || d >= len as isize;
        Some(((d + w) as usize, ghost))
    }

    /// Storage position of point `(i, j)` and whether it is a ghost.
    fn locate(&self, i: usize, j: usize) -> (usize, usize, bool) {
        let tile = self.grid.tile();
        let w = self.stencil_width;
        let located = Self::local_offset(i, tile.xs, tile.xm, self.grid.mx(), w)
            .zip(Self::local_offset(j, tile.ys, tile.ym, self.grid.my(), w));
        match located {
            Some(((c, ghost_i), (r, ghost_j))) => (r, c, ghost_i || ghost_j),
            None => panic!(
                "point ({}, {}) is outside the local region of {} (stencil width {})",
                i, j, self.name, w
            ),
        }
    }

    fn read_position(&self, i: usize, j: usize) -> (usize, usize) {
        let (r, c, ghost) = self.locate(i, j);
        assert!(
            !ghost || self.ghosts_fresh,
            "ghosts of {} are stale; call update_ghosts() before reading ({}, {})",
            self.name,
            i,
            j
        );
        (r, c)
    }

    fn write_position(&mut self, i: usize, j: usize) -> (usize, usize) {
        let (r, c, ghost) = self.locate(i, j);
        assert!(!ghost, "cannot write to ghost point ({}, {}) of {}", i, j, self.name);
        if self.stencil_width > 0 {
            self.ghosts_fresh = false;
        }
        (r, c)
    }

    pub fn get_k(&self, i: usize, j: usize, k: usize) -> f64 {
        let (r, c) = self.read_position(i, j);
        self.data[[r, c, k]]
    }

    pub fn set_k(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let (r, c) = self.write_position(i, j);
        self.data[[r, c, k]] = value;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.get_k(i, j, 0)
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.set_k(i, j, 0, value)
    }

    /// Integer value of a mask (rounded to the nearest integer).
    pub fn as_int(&self, i: usize, j: usize) -> i32 {
        self.get(i, j).round() as i32
    }

    pub fn cell_type(&self, i: usize, j: usize) -> CellType {
        CellType::from_int(self.as_int(i, j))
    }

    pub fn vector(&self, i: usize, j: usize) -> Vector2 {
        let (r, c) = self.read_position(i, j);
        Vector2::new(self.data[[r, c, 0]], self.data[[r, c, 1]])
    }

    pub fn set_vector(&mut self, i: usize, j: usize, value: Vector2) {
        let (r, c) = self.write_position(i, j);
        self.data[[r, c, 0]] = value.u;
        self.data[[r, c, 1]] = value.v;
    }

    fn neighbours(&self, i: usize, j: usize) -> Star<(usize, usize)> {
        let (ii, jj) = (i as isize, j as isize);
        Star {
            ij: (i, j),
            e: (self.grid.wrap_x(ii + 1), j),
            w: (self.grid.wrap_x(ii - 1), j),
            n: (i, self.grid.wrap_y(jj + 1)),
            s: (i, self.grid.wrap_y(jj - 1)),
        }
    }

    fn star_with<T>(&self, i: usize, j: usize, f: impl Fn(usize, usize) -> T) -> Star<T> {
        let p = self.neighbours(i, j);
        Star {
            ij: f(p.ij.0, p.ij.1),
            e: f(p.e.0, p.e.1),
            w: f(p.w.0, p.w.1),
            n: f(p.n.0, p.n.1),
            s: f(p.s.0, p.s.1),
        }
    }

    pub fn star(&self, i: usize, j: usize) -> Star<f64> {
        self.star_with(i, j, |i, j| self.get(i, j))
    }

    pub fn int_star(&self, i: usize, j: usize) -> Star<i32> {
        self.star_with(i, j, |i, j| self.as_int(i, j))
    }

    pub fn cell_type_star(&self, i: usize, j: usize) -> Star<CellType> {
        self.star_with(i, j, |i, j| self.cell_type(i, j))
    }

    pub fn vector_star(&self, i: usize, j: usize) -> Star<Vector2> {
        self.star_with(i, j, |i, j| self.vector(i, j))
    }

    /// Centred x-derivative (uses ghosts).
    pub fn diff_x_p(&self, i: usize, j: usize) -> f64 {
        let s = self.star(i, j);
        (s.e - s.w) / (2.0 * self.grid.dx())
    }

    /// Centred y-derivative (uses ghosts).
    pub fn diff_y_p(&self, i: usize, j: usize) -> f64 {
        let s = self.star(i, j);
        (s.n - s.s) / (2.0 * self.grid.dy())
    }

    /// Set every value, ghosts included.
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
        self.ghosts_fresh = true;
    }

    /// Multiply every value, ghosts included.
    pub fn scale(&mut self, alpha: f64) {
        self.data.mapv_inplace(|v| v * alpha);
    }

    /// Copy owned values from `other`, which may have a different stencil width.
    pub fn copy_from(&mut self, other: &Field) -> CryoResult<()> {
        other.check_dof(self.dof())?;
        self.set_owned_values(&other.owned_values())
    }

    /// Copy with a refreshed halo at least `width` wide. Collective.
    pub fn ghosted(&self, width: usize) -> CryoResult<Field> {
        let ghosts = Ghosts::With(width.max(self.stencil_width));
        let mut result = Field::new(&self.grid, &self.name, self.metadata.clone(), ghosts);
        result.set_owned_values(&self.owned_values())?;
        result.update_ghosts();
        Ok(result)
    }

    /// Owned values in `(j, i, component)` order.
    pub fn owned_values(&self) -> Vec<f64> {
        let tile = self.grid.tile();
        let w = self.stencil_width;
        let mut values = Vec::with_capacity(tile.len() * self.dof());
        for r in w..w + tile.ym {
            for c in w..w + tile.xm {
                for k in 0..self.dof() {
                    values.push(self.data[[r, c, k]]);
                }
            }
        }
        values
    }

    /// Replace owned values, given in `(j, i, component)` order.
    pub fn set_owned_values(&mut self, values: &[f64]) -> CryoResult<()> {
        let tile = self.grid.tile();
        let dof = self.dof();
        if values.len() != tile.len() * dof {
            return Err(CryoError::DimensionMismatch {
                field: self.name.clone(),
                expected: tile.len() * dof,
                found: values.len(),
            });
        }
        let w = self.stencil_width;
        let mut it = values.iter();
        for r in w..w + tile.ym {
            for c in w..w + tile.xm {
                for k in 0..dof {
                    // lengths checked above
                    if let Some(v) = it.next() {
                        self.data[[r, c, k]] = *v;
                    }
                }
            }
        }
        if w > 0 {
            self.ghosts_fresh = false;
        }
        Ok(())
    }

    /// Assemble the complete `[j, i, component]` array on every rank. Collective.
    pub fn gather_global(&self) -> Array3<f64> {
        let grid = &self.grid;
        let dof = self.dof();
        let gathered = grid.comm().all_gather(&self.owned_values());
        let mut global = Array3::zeros((grid.my(), grid.mx(), dof));
        for (tile, values) in grid.tiles().iter().zip(gathered) {
            let mut it = values.into_iter();
            for (i, j) in tile.points() {
                for k in 0..dof {
                    global[[j, i, k]] = it.next().unwrap_or(f64::NAN);
                }
            }
        }
        global
    }

    /// First component of [`Field::gather_global`], indexed `[j, i]`. Collective.
    pub fn gather_global_2d(&self) -> Array2<f64> {
        self.gather_global().index_axis_move(ndarray::Axis(2), 0)
    }

    fn fill_from_global(&mut self, global: &Array3<f64>) {
        let tile = self.grid.tile();
        let w = self.stencil_width as isize;
        let (rows, cols, dof) = self.data.dim();
        for r in 0..rows {
            let j = self.grid.wrap_y(tile.ys as isize + r as isize - w);
            for c in 0..cols {
                let i = self.grid.wrap_x(tile.xs as isize + c as isize - w);
                for k in 0..dof {
                    self.data[[r, c, k]] = global[[j, i, k]];
                }
            }
        }
        self.ghosts_fresh = true;
    }

    /// Refresh the ghost halo from neighbouring tiles. Collective.
    pub fn update_ghosts(&mut self) {
        if self.stencil_width == 0 {
            return;
        }
        let global = self.gather_global();
        self.fill_from_global(&global);
    }

    /// Global maximum over all components. Collective.
    pub fn max(&self) -> f64 {
        let local = self
            .owned_values()
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        self.grid.global_max(local)
    }

    /// Global minimum over all components. Collective.
    pub fn min(&self) -> f64 {
        let local = self.owned_values().into_iter().fold(f64::INFINITY, f64::min);
        self.grid.global_min(local)
    }

    /// Global inner product of owned values. Collective.
    pub fn dot(&self, other: &Field) -> CryoResult<f64> {
        other.check_dof(self.dof())?;
        let local = self
            .owned_values()
            .iter()
            .zip(other.owned_values())
            .map(|(a, b)| a * b)
            .sum();
        Ok(self.grid.global_sum(local))
    }

    /// Point-wise magnitude of a two-component field.
    pub fn magnitude(&self, definition: &VariableDefinition) -> CryoResult<Field> {
        self.check_dof(2)?;
        let mut result = Field::scalar(&self.grid, definition, Ghosts::Without);
        for (i, j) in self.grid.points() {
            result.set(i, j, self.vector(i, j).magnitude());
        }
        Ok(result)
    }
}

impl Index<(usize, usize)> for Field {
    type Output = f64;
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        let (r, c) = self.read_position(i, j);
        &self.data[[r, c, 0]]
    }
}

impl IndexMut<(usize, usize)> for Field {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        let (r, c) = self.write_position(i, j);
        &mut self.data[[r, c, 0]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::standard_variables::{VAR_TAUD_MAG, VAR_THICKNESS};
    use std::thread;

    fn serial_grid() -> Arc<Grid> {
        Grid::serial(5, 4, 100.0, 100.0).unwrap()
    }

    #[test]
    fn test_star_wraps_around_the_domain() {
        let grid = serial_grid();
        let mut f = Field::scalar(&grid, &VAR_THICKNESS, Ghosts::With(1));
        for (i, j) in grid.points() {
            f[(i, j)] = (10 * j + i) as f64;
        }
        f.update_ghosts();
        let s = f.star(0, 0);
        assert_eq!(s.ij, 0.0);
        assert_eq!(s.e, 1.0);
        assert_eq!(s.w, 4.0);
        assert_eq!(s.n, 10.0);
        assert_eq!(s.s, 30.0);
        assert_eq!(s[Direction::West], s.w);
    }

    #[test]
    fn test_reading_stale_ghosts_panics() {
        let handles: Vec<_> = LocalCluster::new(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let grid = Grid::new(4, 4, 1.0, 1.0, Arc::new(comm)).unwrap();
                    let mut f = Field::scalar(&grid, &VAR_THICKNESS, Ghosts::With(1));
                    f.update_ghosts();
                    let ys = grid.ys();
                    // fresh ghosts can be read
                    let _ = f.star(1, ys);
                    f.set(1, ys, 2.0);
                    assert!(!f.ghosts_fresh());
                    assert_eq!(f.get(1, ys), 2.0);
                    // the south neighbour of the first owned row is a ghost
                    let _ = f.star(1, ys);
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_err());
        }
    }

    #[test]
    fn test_owned_values_roundtrip_and_dof_check() {
        let grid = serial_grid();
        let mut v = Field::work(&grid, "velocity", 2, Ghosts::With(2));
        v.set_vector(2, 3, Vector2::new(1.0, -2.0));
        let values = v.owned_values();
        assert_eq!(values.len(), 40);

        let mut w = Field::work(&grid, "copy", 2, Ghosts::Without);
        w.set_owned_values(&values).unwrap();
        assert_eq!(w.vector(2, 3), Vector2::new(1.0, -2.0));

        let mut s = Field::work(&grid, "scalar", 1, Ghosts::Without);
        assert!(matches!(
            s.copy_from(&v),
            Err(CryoError::DimensionMismatch { expected: 1, found: 2, .. })
        ));
        assert!(v.magnitude(&VAR_TAUD_MAG).is_ok());
        assert!(s.magnitude(&VAR_TAUD_MAG).is_err());

        let g = w.ghosted(1).unwrap();
        assert_eq!(g.stencil_width(), 1);
        assert!(g.ghosts_fresh());
        assert_eq!(g.vector(2, 3), Vector2::new(1.0, -2.0));
    }

    #[test]
    fn test_halo_exchange_between_ranks() {
        let ranks = LocalCluster::new(3);
        thread::scope(|s| {
            for comm in ranks {
                s.spawn(move || {
                    let grid = Grid::new(4, 7, 1.0, 1.0, Arc::new(comm)).unwrap();
                    let mut f = Field::scalar(&grid, &VAR_THICKNESS, Ghosts::With(1));
                    for (i, j) in grid.points() {
                        f[(i, j)] = (100 * j + i) as f64;
                    }
                    f.update_ghosts();

                    let (ys, ym) = (grid.ys(), grid.ym());
                    for i in 0..4 {
                        let south = grid.wrap_y(ys as isize - 1);
                        let north = grid.wrap_y((ys + ym) as isize);
                        assert_eq!(f.star(i, ys).s, (100 * south + i) as f64);
                        assert_eq!(f.star(i, ys + ym - 1).n, (100 * north + i) as f64);
                    }

                    assert_eq!(f.max(), 603.0);
                    assert_eq!(f.min(), 0.0);
                    let global = f.gather_global_2d();
                    assert_eq!(global[[5, 2]], 502.0);
                });
            }
        });
    }
}
