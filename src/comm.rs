//! Collective operations between cooperating workers.
//!
//! Every worker owns a disjoint part of the active cells. Operations that combine data from all
//! workers (norms, maxima, assembly finalization, mesh modification) are rendezvous points:
//! all workers must call them in the same order.

/// Rendezvous-style collective operations.
pub trait Communicator: Send + Sync {
    /// Index of this worker in `0..size()`.
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocks until every worker has reached the barrier.
    fn barrier(&self);

    /// Maximum of `local` over all workers.
    fn max(&self, local: f64) -> f64;

    /// Sum of `local` over all workers.
    fn sum(&self, local: f64) -> f64;

    fn sum_usize(&self, local: usize) -> usize;

    /// Element-wise sum of `values` over all workers, stored in `values` on every worker.
    fn sum_slice(&self, values: &mut [f64]);
}

/// The trivial communicator of a single worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn max(&self, local: f64) -> f64 {
        local
    }

    fn sum(&self, local: f64) -> f64 {
        local
    }

    fn sum_usize(&self, local: usize) -> usize {
        local
    }

    fn sum_slice(&self, _values: &mut [f64]) {}
}
