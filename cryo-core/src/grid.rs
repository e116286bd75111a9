//! Structured, domain-decomposed 2D grid.
//!
//! The grid has `Mx` points in the x direction and `My` in y, with uniform spacing
//! `dx`, `dy`. Point `(i, j)` sits at `x = i * dx`, `y = j * dy`.
//!
//! The index space is split into contiguous strips of rows, one [`Tile`] per rank.
//! Each rank owns its tile; fields may additionally store a halo of ghost points
//! around it, refreshed with [`Field::update_ghosts`](crate::field::Field::update_ghosts).
//! Ghost access wraps around the outer boundary (the index space is periodic).
//!
//! A grid is created once and shared read-only (`Arc<Grid>`) by every field
//! defined on it.

use crate::comm::{Collective, Communicator, SerialCommunicator};
use crate::errors::{CryoError, CryoResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Default halo width available to fields.
pub const DEFAULT_MAX_STENCIL_WIDTH: usize = 2;

/// The block of grid points owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub xs: usize,
    pub xm: usize,
    pub ys: usize,
    pub ym: usize,
}

impl Tile {
    pub fn contains(&self, i: usize, j: usize) -> bool {
        i >= self.xs && i < self.xs + self.xm && j >= self.ys && j < self.ys + self.ym
    }

    pub fn len(&self) -> usize {
        self.xm * self.ym
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned points in row-major order (`i` varies fastest).
    pub fn points(&self) -> impl Iterator<Item = (usize, usize)> {
        let (xs, xm) = (self.xs, self.xm);
        (self.ys..self.ys + self.ym).flat_map(move |j| (xs..xs + xm).map(move |i| (i, j)))
    }
}

#[derive(Debug)]
pub struct Grid {
    mx: usize,
    my: usize,
    dx: f64,
    dy: f64,
    max_stencil_width: usize,
    tiles: Vec<Tile>,
    comm: Arc<dyn Communicator>,
}

impl Grid {
    /// Create a grid decomposed over the ranks of `comm`.
    pub fn new(
        mx: usize,
        my: usize,
        dx: f64,
        dy: f64,
        comm: Arc<dyn Communicator>,
    ) -> CryoResult<Arc<Self>> {
        if mx < 3 || my < 3 {
            return Err(CryoError::Grid(format!(
                "need at least 3x3 points, got {}x{}",
                mx, my
            )));
        }
        if !(dx > 0.0 && dy > 0.0) {
            return Err(CryoError::Grid(format!(
                "grid spacing must be positive, got dx={}, dy={}",
                dx, dy
            )));
        }
        let size = comm.size();
        if my < size {
            return Err(CryoError::Grid(format!(
                "cannot split {} rows over {} ranks",
                my, size
            )));
        }

        let tiles = decompose_rows(mx, my, size);
        log::debug!(
            "rank {} of {} owns rows {}..{} of a {}x{} grid",
            comm.rank(),
            size,
            tiles[comm.rank()].ys,
            tiles[comm.rank()].ys + tiles[comm.rank()].ym,
            mx,
            my
        );

        Ok(Arc::new(Self {
            mx,
            my,
            dx,
            dy,
            max_stencil_width: DEFAULT_MAX_STENCIL_WIDTH,
            tiles,
            comm,
        }))
    }

    /// Create a single-rank grid.
    pub fn serial(mx: usize, my: usize, dx: f64, dy: f64) -> CryoResult<Arc<Self>> {
        Self::new(mx, my, dx, dy, Arc::new(SerialCommunicator))
    }

    pub fn mx(&self) -> usize {
        self.mx
    }

    pub fn my(&self) -> usize {
        self.my
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn dy(&self) -> f64 {
        self.dy
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    pub fn max_stencil_width(&self) -> usize {
        self.max_stencil_width
    }

    pub fn x(&self, i: usize) -> f64 {
        i as f64 * self.dx
    }

    pub fn y(&self, j: usize) -> f64 {
        j as f64 * self.dy
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// The tile owned by this rank.
    pub fn tile(&self) -> Tile {
        self.tiles[self.comm.rank()]
    }

    /// Tiles of all ranks, indexed by rank.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn xs(&self) -> usize {
        self.tile().xs
    }

    pub fn xm(&self) -> usize {
        self.tile().xm
    }

    pub fn ys(&self) -> usize {
        self.tile().ys
    }

    pub fn ym(&self) -> usize {
        self.tile().ym
    }

    /// Points owned by this rank.
    pub fn points(&self) -> impl Iterator<Item = (usize, usize)> {
        self.tile().points()
    }

    pub fn is_owned(&self, i: usize, j: usize) -> bool {
        self.tile().contains(i, j)
    }

    /// Periodic wrap of an x index.
    pub fn wrap_x(&self, i: isize) -> usize {
        i.rem_euclid(self.mx as isize) as usize
    }

    /// Periodic wrap of a y index.
    pub fn wrap_y(&self, j: isize) -> usize {
        j.rem_euclid(self.my as isize) as usize
    }

    /// Q1 elements that have at least one node owned by this rank.
    ///
    /// Element `(i, j)` spans nodes `i..=i+1` and `j..=j+1`. Elements do not wrap
    /// around the domain boundary.
    pub fn element_ranges(&self) -> (Range<usize>, Range<usize>) {
        let t = self.tile();
        let xs = t.xs.saturating_sub(1);
        let xe = (t.xs + t.xm).min(self.mx - 1);
        let ys = t.ys.saturating_sub(1);
        let ye = (t.ys + t.ym).min(self.my - 1);
        (xs..xe, ys..ye)
    }

    pub fn global_sum(&self, value: f64) -> f64 {
        self.comm.global_sum(value)
    }

    pub fn global_sum_slice(&self, values: &mut [f64]) {
        self.comm.global_sum_slice(values)
    }

    pub fn global_sum_count(&self, value: usize) -> usize {
        self.comm.global_sum_count(value)
    }

    pub fn global_max(&self, value: f64) -> f64 {
        self.comm.global_max(value)
    }

    pub fn global_min(&self, value: f64) -> f64 {
        self.comm.global_min(value)
    }
}

fn decompose_rows(mx: usize, my: usize, size: usize) -> Vec<Tile> {
    let base = my / size;
    let remainder = my % size;
    let mut ys = 0;
    (0..size)
        .map(|rank| {
            let ym = base + usize::from(rank < remainder);
            let tile = Tile {
                xs: 0,
                xm: mx,
                ys,
                ym,
            };
            ys += ym;
            tile
        })
        .collect()
}
