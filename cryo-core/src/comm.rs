//! Collective communication between the ranks sharing a decomposed grid.
//!
//! A [`Communicator`] only has to provide an all-gather; reductions are derived from
//! it by the blanket [`Collective`] extension. Two implementations are provided:
//!
//! - [`SerialCommunicator`]: a single rank, every collective is a local copy.
//! - [`LocalCluster`]: several ranks in one process, each driven by its own thread
//!   and synchronised by a barrier. This exercises exactly the code paths a
//!   distributed run would take.
//!
//! Every collective must be called by all ranks in the same order.

use std::fmt::Debug;
use std::sync::{Arc, Barrier, Mutex};

/// A group of ranks able to exchange data.
pub trait Communicator: Debug + Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Collect `local` from every rank. The result is indexed by rank.
    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>>;
}

/// Global reductions built on top of [`Communicator::all_gather`].
pub trait Collective {
    /// Element-wise sum of `values` over all ranks, in place.
    fn global_sum_slice(&self, values: &mut [f64]);
    fn global_sum(&self, value: f64) -> f64;
    fn global_sum_count(&self, value: usize) -> usize;
    fn global_max(&self, value: f64) -> f64;
    fn global_min(&self, value: f64) -> f64;
}

impl<C: Communicator + ?Sized> Collective for C {
    fn global_sum_slice(&self, values: &mut [f64]) {
        let gathered = self.all_gather(values);
        values.iter_mut().for_each(|v| *v = 0.0);
        // Sum in rank order so that every rank gets a bit-identical result
        for contribution in gathered {
            for (v, c) in values.iter_mut().zip(contribution) {
                *v += c;
            }
        }
    }

    fn global_sum(&self, value: f64) -> f64 {
        let mut buffer = [value];
        self.global_sum_slice(&mut buffer);
        buffer[0]
    }

    fn global_sum_count(&self, value: usize) -> usize {
        self.global_sum(value as f64).round() as usize
    }

    fn global_max(&self, value: f64) -> f64 {
        self.all_gather(&[value])
            .into_iter()
            .map(|v| v[0])
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn global_min(&self, value: f64) -> f64 {
        self.all_gather(&[value])
            .into_iter()
            .map(|v| v[0])
            .fold(f64::INFINITY, f64::min)
    }
}

/// Single-rank communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }
}

#[derive(Debug)]
struct ClusterState {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// Shared-memory ranks. Create one with [`LocalCluster::new`] and hand each
/// [`LocalCommunicator`] to a separate thread.
#[derive(Debug)]
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` communicators sharing the same collective state.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> Vec<LocalCommunicator> {
        assert!(size > 0, "a cluster needs at least one rank");
        let state = Arc::new(ClusterState {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                size,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

/// One rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    state: Arc<ClusterState>,
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&self, local: &[f64]) -> Vec<Vec<f64>> {
        {
            let mut slots = self.state.slots.lock().expect("cluster state lock poisoned");
            slots[self.rank] = local.to_vec();
        }
        self.state.barrier.wait();
        let result = self
            .state
            .slots
            .lock()
            .expect("cluster state lock poisoned")
            .clone();
        // Nobody may overwrite a slot before every rank has read it
        self.state.barrier.wait();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_serial_reductions() {
        let comm = SerialCommunicator;
        assert_eq!(comm.global_sum(2.5), 2.5);
        assert_eq!(comm.global_max(-1.0), -1.0);
        assert_eq!(comm.global_sum_count(7), 7);
    }

    #[test]
    fn test_cluster_reductions() {
        let ranks = LocalCluster::new(3);
        let results: Vec<(f64, f64, f64, Vec<f64>)> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as f64;
                        let mut per_basin = vec![1.0, r, 10.0 * r];
                        comm.global_sum_slice(&mut per_basin);
                        (
                            comm.global_sum(r + 1.0),
                            comm.global_max(r),
                            comm.global_min(r - 5.0),
                            per_basin,
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (sum, max, min, per_basin) in results {
            assert_eq!(sum, 6.0);
            assert_eq!(max, 2.0);
            assert_eq!(min, -5.0);
            assert_eq!(per_basin, vec![3.0, 3.0, 30.0]);
        }
    }

    #[test]
    fn test_all_gather_is_rank_ordered() {
        let ranks = LocalCluster::new(2);
        let gathered: Vec<Vec<Vec<f64>>> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .iter()
                .map(|comm| s.spawn(move || comm.all_gather(&[comm.rank() as f64; 2])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for g in gathered {
            assert_eq!(g, vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
        }
    }
}
