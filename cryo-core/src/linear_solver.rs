//! Distributed sparse matrices and the Krylov linear solve.
//!
//! Unknowns of a `dof`-component field are numbered node by node,
//! `(j * Mx + i) * dof + c`. Because the grid is split into strips of whole rows,
//! each rank owns one contiguous range of this numbering and a local vector is just
//! that range (the layout of [`Field::owned_values`](crate::field::Field::owned_values)).
//!
//! A [`DistributedMatrix`] stores the owned rows of a square operator as a CSR block
//! with global column indices. [`KrylovSolver`] solves `A x = b` with restarted
//! GMRES, right-preconditioned by the inverse of the nodal `dof x dof` diagonal
//! blocks (block Jacobi). The outcome is a [`ConvergedReason`] whose numeric codes
//! follow the usual KSP conventions: positive for convergence, negative for
//! divergence.

use crate::comm::Collective;
use crate::config::Config;
use crate::errors::{CryoError, CryoResult};
use crate::grid::Grid;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Why an iterative solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergedReason {
    ConvergedRtol,
    ConvergedAtol,
    DivergedIts,
    DivergedDtol,
    DivergedBreakdown,
    DivergedNanOrInf,
}

impl ConvergedReason {
    pub fn code(self) -> i32 {
        match self {
            ConvergedReason::ConvergedRtol => 2,
            ConvergedReason::ConvergedAtol => 3,
            ConvergedReason::DivergedIts => -3,
            ConvergedReason::DivergedDtol => -4,
            ConvergedReason::DivergedBreakdown => -5,
            ConvergedReason::DivergedNanOrInf => -9,
        }
    }

    pub fn is_converged(self) -> bool {
        self.code() > 0
    }

    pub fn name(self) -> &'static str {
        match self {
            ConvergedReason::ConvergedRtol => "CONVERGED_RTOL",
            ConvergedReason::ConvergedAtol => "CONVERGED_ATOL",
            ConvergedReason::DivergedIts => "DIVERGED_ITS",
            ConvergedReason::DivergedDtol => "DIVERGED_DTOL",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::DivergedNanOrInf => "DIVERGED_NANORINF",
        }
    }

    /// Turn a divergence into a [`CryoError::LinearSolve`].
    pub fn check(self, context: &str) -> CryoResult<()> {
        if self.is_converged() {
            Ok(())
        } else {
            Err(CryoError::LinearSolve {
                context: context.to_string(),
                reason: self,
            })
        }
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Numbering of the unknowns of a `dof`-component field.
#[derive(Debug, Clone)]
pub struct DofLayout {
    grid: Arc<Grid>,
    dof: usize,
}

impl DofLayout {
    pub fn new(grid: &Arc<Grid>, dof: usize) -> Self {
        Self {
            grid: Arc::clone(grid),
            dof,
        }
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn global_len(&self) -> usize {
        self.grid.mx() * self.grid.my() * self.dof
    }

    pub fn local_len(&self) -> usize {
        self.grid.tile().len() * self.dof
    }

    pub fn global_index(&self, i: usize, j: usize, c: usize) -> usize {
        (j * self.grid.mx() + i) * self.dof + c
    }

    /// Global indices owned by `rank`.
    pub fn ownership_range_of(&self, rank: usize) -> Range<usize> {
        let tile = self.grid.tiles()[rank];
        let start = tile.ys * tile.xm * self.dof;
        start..start + tile.len() * self.dof
    }

    /// Global indices owned by this rank.
    pub fn ownership_range(&self) -> Range<usize> {
        self.ownership_range_of(self.grid.rank())
    }

    /// Assemble the full vector from the local parts of every rank. Collective.
    pub fn gather(&self, local: &[f64]) -> Vec<f64> {
        self.grid.comm().all_gather(local).concat()
    }

    /// Global inner product of two local vectors. Collective.
    pub fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        self.grid.comm().global_sum(local)
    }

    pub fn norm(&self, a: &[f64]) -> f64 {
        self.dot(a, a).sqrt()
    }
}

/// The owned rows of a square sparse operator.
#[derive(Debug, Clone)]
pub struct DistributedMatrix {
    layout: DofLayout,
    local: CsMat<f64>,
}

impl DistributedMatrix {
    /// Build from `(global row, global column, value)` entries. Duplicates are summed.
    pub fn from_triplets(layout: &DofLayout, entries: &[(usize, usize, f64)]) -> CryoResult<Self> {
        let rows = layout.ownership_range();
        let n = layout.global_len();
        let mut triplets = TriMat::new((rows.len(), n));
        for &(row, col, value) in entries {
            if !rows.contains(&row) || col >= n {
                return Err(CryoError::Grid(format!(
                    "matrix entry ({}, {}) is outside the owned rows {:?} of a {} x {} operator",
                    row, col, rows, n, n
                )));
            }
            triplets.add_triplet(row - rows.start, col, value);
        }
        Ok(Self {
            layout: layout.clone(),
            local: triplets.to_csr(),
        })
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    /// The local CSR block (local rows, global columns).
    pub fn local_block(&self) -> &CsMat<f64> {
        &self.local
    }

    /// Entry at global `(row, col)`; rows must be owned by this rank.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let start = self.layout.ownership_range().start;
        self.local.get(row - start, col).copied().unwrap_or(0.0)
    }

    fn local_triplets(&self) -> Vec<(usize, usize, f64)> {
        let start = self.layout.ownership_range().start;
        let mut entries = Vec::with_capacity(self.local.nnz());
        for (r, row) in self.local.outer_iterator().enumerate() {
            for (c, &value) in row.iter() {
                entries.push((start + r, c, value));
            }
        }
        entries
    }

    /// `y = A x` for local vectors. Collective.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let global = self.layout.gather(x);
        self.local
            .outer_iterator()
            .map(|row| row.iter().map(|(c, &value)| value * global[c]).sum::<f64>())
            .collect()
    }

    /// The transposed operator, distributed the same way. Collective.
    pub fn transpose(&self) -> CryoResult<DistributedMatrix> {
        let packed: Vec<f64> = self
            .local_triplets()
            .into_iter()
            .flat_map(|(r, c, v)| [r as f64, c as f64, v])
            .collect();
        let gathered = self.layout.grid().comm().all_gather(&packed);

        let owned = self.layout.ownership_range();
        let entries: Vec<(usize, usize, f64)> = gathered
            .iter()
            .flat_map(|part| part.chunks_exact(3))
            .map(|e| (e[1] as usize, e[0] as usize, e[2]))
            .filter(|(row, _, _)| owned.contains(row))
            .collect();
        DistributedMatrix::from_triplets(&self.layout, &entries)
    }

    /// Inverses of the nodal `dof x dof` diagonal blocks.
    ///
    /// Singular blocks fall back to the inverse of their diagonal (or the identity
    /// where the diagonal vanishes).
    pub fn inverse_diagonal_blocks(&self) -> Vec<DMatrix<f64>> {
        let dof = self.layout.dof();
        let start = self.layout.ownership_range().start;
        let n_nodes = self.local.rows() / dof;
        (0..n_nodes)
            .map(|node| {
                let first = node * dof;
                let block = DMatrix::from_fn(dof, dof, |a, b| {
                    self.local
                        .get(first + a, start + first + b)
                        .copied()
                        .unwrap_or(0.0)
                });
                block.clone().try_inverse().unwrap_or_else(|| {
                    DMatrix::from_fn(dof, dof, |a, b| match (a == b, block[(a, a)]) {
                        (true, d) if d != 0.0 => 1.0 / d,
                        (true, _) => 1.0,
                        _ => 0.0,
                    })
                })
            })
            .collect()
    }
}

/// The "solve `A x = b`" service.
pub trait LinearSolver {
    /// Solve in place: `b` holds the right-hand side on entry and the solution on
    /// return. Collective.
    fn solve(&self, a: &DistributedMatrix, b: &mut [f64]) -> ConvergedReason;
}

/// Stopping criteria and restart length of [`KrylovSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovSettings {
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub restart: usize,
    pub max_iterations: usize,
}

impl Default for KrylovSettings {
    fn default() -> Self {
        Self {
            rtol: 1.0e-10,
            atol: 1.0e-50,
            dtol: 1.0e5,
            restart: 50,
            max_iterations: 10_000,
        }
    }
}

impl KrylovSettings {
    /// Read `<section>.rtol`, `<section>.restart` and `<section>.max_iterations`.
    pub fn from_config(config: &Config, section: &str) -> CryoResult<Self> {
        Ok(Self {
            rtol: config.get_number(&format!("{}.rtol", section))?,
            restart: config.get_count(&format!("{}.restart", section))?.max(1),
            max_iterations: config.get_count(&format!("{}.max_iterations", section))?,
            ..Self::default()
        })
    }
}

/// Restarted GMRES with block-Jacobi right preconditioning.
#[derive(Debug, Clone, Default)]
pub struct KrylovSolver {
    pub settings: KrylovSettings,
}

struct BlockJacobi {
    dof: usize,
    inverses: Vec<DMatrix<f64>>,
}

impl BlockJacobi {
    fn new(a: &DistributedMatrix) -> Self {
        Self {
            dof: a.layout().dof(),
            inverses: a.inverse_diagonal_blocks(),
        }
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut result = vec![0.0; x.len()];
        for (node, inverse) in self.inverses.iter().enumerate() {
            let first = node * self.dof;
            for a in 0..self.dof {
                result[first + a] = (0..self.dof).map(|b| inverse[(a, b)] * x[first + b]).sum();
            }
        }
        result
    }
}

fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.iter_mut().zip(x).for_each(|(y, x)| *y += alpha * x);
}

impl KrylovSolver {
    pub fn new(settings: KrylovSettings) -> Self {
        Self { settings }
    }

    fn gmres(&self, a: &DistributedMatrix, b: &[f64], x: &mut [f64]) -> (ConvergedReason, usize) {
        let layout = a.layout();
        let s = self.settings;
        let m = s.restart.max(1);
        let preconditioner = BlockJacobi::new(a);

        let b_norm = layout.norm(b);
        if !b_norm.is_finite() {
            return (ConvergedReason::DivergedNanOrInf, 0);
        }
        let target = (s.rtol * b_norm).max(s.atol);
        let converged = if s.rtol * b_norm >= s.atol {
            ConvergedReason::ConvergedRtol
        } else {
            ConvergedReason::ConvergedAtol
        };
        if b_norm <= target {
            x.iter_mut().for_each(|v| *v = 0.0);
            return (ConvergedReason::ConvergedAtol, 0);
        }

        let mut iterations = 0;
        let mut r = b.to_vec();
        axpy(-1.0, &a.mul_vec(x), &mut r);
        let mut r_norm = layout.norm(&r);

        loop {
            let mut basis: Vec<Vec<f64>> = vec![r.iter().map(|v| v / r_norm).collect()];
            let mut directions: Vec<Vec<f64>> = Vec::with_capacity(m);
            let mut h = DMatrix::<f64>::zeros(m + 1, m);
            let mut cs = vec![0.0; m];
            let mut sn = vec![0.0; m];
            let mut g = vec![0.0; m + 1];
            g[0] = r_norm;
            let mut breakdown = false;

            for k in 0..m {
                iterations += 1;
                let z = preconditioner.apply(&basis[k]);
                let mut w = a.mul_vec(&z);
                directions.push(z);

                // modified Gram-Schmidt
                for (i, v) in basis.iter().enumerate() {
                    h[(i, k)] = layout.dot(&w, v);
                    axpy(-h[(i, k)], v, &mut w);
                }
                h[(k + 1, k)] = layout.norm(&w);

                for i in 0..k {
                    let (hi, hi1) = (h[(i, k)], h[(i + 1, k)]);
                    h[(i, k)] = cs[i] * hi + sn[i] * hi1;
                    h[(i + 1, k)] = -sn[i] * hi + cs[i] * hi1;
                }
                let (hkk, hk1k) = (h[(k, k)], h[(k + 1, k)]);
                let d = hkk.hypot(hk1k);
                let subdiagonal = hk1k;
                if d == 0.0 {
                    // this direction adds nothing to the least-squares problem
                    directions.pop();
                    breakdown = true;
                    break;
                }
                cs[k] = hkk / d;
                sn[k] = hk1k / d;
                h[(k, k)] = d;
                h[(k + 1, k)] = 0.0;
                g[k + 1] = -sn[k] * g[k];
                g[k] *= cs[k];

                let estimate = g[k + 1].abs();
                if !estimate.is_finite() {
                    return (ConvergedReason::DivergedNanOrInf, iterations);
                }
                if estimate <= target || iterations >= s.max_iterations {
                    break;
                }
                if subdiagonal == 0.0 {
                    // the Krylov space is invariant
                    breakdown = true;
                    break;
                }
                basis.push(w.iter().map(|v| v / subdiagonal).collect());
            }

            // back substitution for the least-squares update
            let n = directions.len();
            let mut y = vec![0.0; n];
            for i in (0..n).rev() {
                let sum: f64 = (i + 1..n).map(|j| h[(i, j)] * y[j]).sum();
                y[i] = (g[i] - sum) / h[(i, i)];
            }
            for (yi, z) in y.iter().zip(&directions) {
                axpy(*yi, z, x);
            }

            r = b.to_vec();
            axpy(-1.0, &a.mul_vec(x), &mut r);
            r_norm = layout.norm(&r);

            if !r_norm.is_finite() {
                return (ConvergedReason::DivergedNanOrInf, iterations);
            }
            if r_norm <= target {
                return (converged, iterations);
            }
            if r_norm > s.dtol * b_norm {
                return (ConvergedReason::DivergedDtol, iterations);
            }
            if iterations >= s.max_iterations {
                return (ConvergedReason::DivergedIts, iterations);
            }
            if breakdown {
                return (ConvergedReason::DivergedBreakdown, iterations);
            }
        }
    }
}

impl LinearSolver for KrylovSolver {
    fn solve(&self, a: &DistributedMatrix, b: &mut [f64]) -> ConvergedReason {
        let mut x = vec![0.0; b.len()];
        let (reason, iterations) = self.gmres(a, b, &mut x);
        log::trace!("GMRES stopped after {} iterations: {}", iterations, reason);
        b.copy_from_slice(&x);
        reason
    }
}
