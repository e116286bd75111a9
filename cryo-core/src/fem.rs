//! Q1 finite elements on the structured grid.
//!
//! Element `(i, j)` is the rectangle with corners at nodes `(i, j)`, `(i+1, j)`,
//! `(i+1, j+1)` and `(i, j+1)` (in that order). Integrals use 2x2 Gauss quadrature;
//! quadrature point `q` is the one closest to node `q`.
//!
//! Assembly is split in two steps:
//!
//! 1. each element produces an [`ElementContribution`] from values gathered at its
//!    nodes (reading ghosts where the element extends past the owned tile);
//! 2. [`scatter_add`] adds contributions into the output field, at owned nodes only.
//!
//! Every rank visits all elements touching its owned nodes, so each owned node
//! receives contributions from all of its elements and no two ranks write the
//! same node.

use crate::field::{Field, Vector2};
use crate::grid::Grid;

/// Nodes per element.
pub const N_CHI: usize = 4;
/// Quadrature points per element.
pub const N_QUAD: usize = 4;

const NODE_XI: [f64; N_CHI] = [-1.0, 1.0, 1.0, -1.0];
const NODE_ETA: [f64; N_CHI] = [-1.0, -1.0, 1.0, 1.0];

/// Value and physical-space derivatives of a shape function at a point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Germ {
    pub val: f64,
    pub dx: f64,
    pub dy: f64,
}

/// A vector and its derivatives at a quadrature point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VectorGradient {
    pub value: Vector2,
    pub dx: Vector2,
    pub dy: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub i: usize,
    pub j: usize,
}

impl Element {
    /// Corner nodes in the element's local order.
    pub fn nodes(&self) -> [(usize, usize); N_CHI] {
        let (i, j) = (self.i, self.j);
        [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)]
    }

    /// Elements touching the nodes owned by this rank.
    pub fn owned(grid: &Grid) -> impl Iterator<Item = Element> {
        let (is, js) = grid.element_ranges();
        js.flat_map(move |j| is.clone().map(move |i| Element { i, j }))
    }
}

/// Shape functions and weights of the 2x2 Gauss rule on a `dx` by `dy` element.
#[derive(Debug, Clone)]
pub struct Quadrature {
    germs: [[Germ; N_CHI]; N_QUAD],
    weights: [f64; N_QUAD],
}

impl Quadrature {
    pub fn new(dx: f64, dy: f64) -> Self {
        let p = 1.0 / 3.0_f64.sqrt();
        let points: [(f64, f64); N_QUAD] = [(-p, -p), (p, -p), (p, p), (-p, p)];

        let mut germs = [[Germ::default(); N_CHI]; N_QUAD];
        for (q, &(xi, eta)) in points.iter().enumerate() {
            for k in 0..N_CHI {
                let (xk, ek) = (NODE_XI[k], NODE_ETA[k]);
                germs[q][k] = Germ {
                    val: 0.25 * (1.0 + xk * xi) * (1.0 + ek * eta),
                    dx: 0.25 * xk * (1.0 + ek * eta) * 2.0 / dx,
                    dy: 0.25 * ek * (1.0 + xk * xi) * 2.0 / dy,
                };
            }
        }
        // unit Gauss weights times the Jacobian determinant
        let weights = [0.25 * dx * dy; N_QUAD];

        Self { germs, weights }
    }

    pub fn for_grid(grid: &Grid) -> Self {
        Self::new(grid.dx(), grid.dy())
    }

    /// Shape function `k` at quadrature point `q`.
    pub fn germ(&self, q: usize, k: usize) -> Germ {
        self.germs[q][k]
    }

    /// Quadrature weight times Jacobian determinant.
    pub fn weights(&self) -> &[f64; N_QUAD] {
        &self.weights
    }

    pub fn values(&self, nodal: &[f64; N_CHI]) -> [f64; N_QUAD] {
        let mut result = [0.0; N_QUAD];
        for (q, r) in result.iter_mut().enumerate() {
            *r = (0..N_CHI).map(|k| self.germs[q][k].val * nodal[k]).sum();
        }
        result
    }

    /// Values and derivatives of a scalar.
    pub fn values_and_gradients(&self, nodal: &[f64; N_CHI]) -> [Germ; N_QUAD] {
        let mut result = [Germ::default(); N_QUAD];
        for (q, r) in result.iter_mut().enumerate() {
            for k in 0..N_CHI {
                let g = self.germs[q][k];
                r.val += g.val * nodal[k];
                r.dx += g.dx * nodal[k];
                r.dy += g.dy * nodal[k];
            }
        }
        result
    }

    pub fn vector_gradients(&self, nodal: &[Vector2; N_CHI]) -> [VectorGradient; N_QUAD] {
        let mut result = [VectorGradient::default(); N_QUAD];
        for (q, r) in result.iter_mut().enumerate() {
            for k in 0..N_CHI {
                let g = self.germs[q][k];
                r.value += nodal[k] * g.val;
                r.dx += nodal[k] * g.dx;
                r.dy += nodal[k] * g.dy;
            }
        }
        result
    }
}

/// First component of `field` at the nodes of `element`.
pub fn nodal_values(field: &Field, element: &Element) -> [f64; N_CHI] {
    element.nodes().map(|(i, j)| field.get(i, j))
}

pub fn nodal_vectors(field: &Field, element: &Element) -> [Vector2; N_CHI] {
    element.nodes().map(|(i, j)| field.vector(i, j))
}

/// Mask value at each quadrature point, taken from the nearest node.
pub fn nodal_masks(mask: &Field, element: &Element) -> [i32; N_QUAD] {
    element.nodes().map(|(i, j)| mask.as_int(i, j))
}

/// Per-node contributions of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementContribution<const DOF: usize> {
    pub element: Element,
    pub values: [[f64; DOF]; N_CHI],
}

impl<const DOF: usize> ElementContribution<DOF> {
    pub fn zero(element: Element) -> Self {
        Self {
            element,
            values: [[0.0; DOF]; N_CHI],
        }
    }
}

/// Add element contributions into `output` at the nodes this rank owns.
pub fn scatter_add<const DOF: usize>(contributions: &[ElementContribution<DOF>], output: &mut Field) {
    let grid = output.grid().clone();
    for contribution in contributions {
        for (k, (i, j)) in contribution.element.nodes().into_iter().enumerate() {
            if !grid.is_owned(i, j) {
                continue;
            }
            for c in 0..DOF {
                let current = output.get_k(i, j, c);
                output.set_k(i, j, c, current + contribution.values[k][c]);
            }
        }
    }
}

/// Dirichlet boundary conditions: a mask selecting constrained nodes, optional
/// prescribed values and the weight used to scale constrained residual rows.
#[derive(Debug, Clone, Copy)]
pub struct DirichletData<'a> {
    mask: Option<&'a Field>,
    values: Option<&'a Field>,
    weight: f64,
}

impl<'a> DirichletData<'a> {
    pub fn new(mask: Option<&'a Field>, values: Option<&'a Field>, weight: f64) -> Self {
        Self {
            mask,
            values,
            weight,
        }
    }

    /// Constraints that fix perturbations to zero.
    pub fn homogeneous(mask: Option<&'a Field>, weight: f64) -> Self {
        Self::new(mask, None, weight)
    }

    pub fn is_active(&self) -> bool {
        self.mask.is_some()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn constrained(&self, i: usize, j: usize) -> bool {
        self.mask.map_or(false, |m| m.get(i, j) > 0.5)
    }

    pub fn element_constraints(&self, element: &Element) -> [bool; N_CHI] {
        element.nodes().map(|(i, j)| self.constrained(i, j))
    }

    /// Replace constrained nodal vectors by the prescribed values.
    pub fn enforce_vector(&self, element: &Element, nodal: &mut [Vector2; N_CHI]) {
        for (k, (i, j)) in element.nodes().into_iter().enumerate() {
            if self.constrained(i, j) {
                nodal[k] = self.values.map_or(Vector2::default(), |v| v.vector(i, j));
            }
        }
    }

    pub fn enforce_homogeneous_vector(&self, element: &Element, nodal: &mut [Vector2; N_CHI]) {
        for (k, (i, j)) in element.nodes().into_iter().enumerate() {
            if self.constrained(i, j) {
                nodal[k] = Vector2::default();
            }
        }
    }

    pub fn enforce_homogeneous(&self, element: &Element, nodal: &mut [f64; N_CHI]) {
        for (k, (i, j)) in element.nodes().into_iter().enumerate() {
            if self.constrained(i, j) {
                nodal[k] = 0.0;
            }
        }
    }

    /// Set residual rows of constrained nodes to `weight * (x - x_bc)`.
    pub fn fix_residual_vector(&self, x: &Field, residual: &mut Field) {
        if !self.is_active() {
            return;
        }
        let grid = residual.grid().clone();
        for (i, j) in grid.points() {
            if self.constrained(i, j) {
                let bc = self.values.map_or(Vector2::default(), |v| v.vector(i, j));
                residual.set_vector(i, j, (x.vector(i, j) - bc) * self.weight);
            }
        }
    }

    /// Zero every component of constrained residual rows.
    pub fn fix_residual_homogeneous(&self, residual: &mut Field) {
        if !self.is_active() {
            return;
        }
        let grid = residual.grid().clone();
        for (i, j) in grid.points() {
            if self.constrained(i, j) {
                for k in 0..residual.dof() {
                    residual.set_k(i, j, k, 0.0);
                }
            }
        }
    }
}
