//! Run-time configuration.
use eyre::eyre;
use serde::{Deserialize, Serialize};

/// The externally supplied parameters of a Stokes simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StokesParameters {
    /// Number of global refinements applied to the coarse mesh before the run.
    pub initial_global_refinement: usize,
    pub max_time_steps: usize,
    /// If `false`, a triggered adaptation refines the mesh globally instead of locally.
    pub adaptive_refinement: bool,
    /// Prefer a dense direct factorization of the Jacobian for small systems.
    pub use_direct_solver: bool,
    /// Enables the error-indicator driven mesh adaptation after accepted steps.
    pub use_space_adaptivity: bool,
    /// Adaptation is triggered when the largest cell indicator exceeds this value.
    pub error_threshold: f64,
    /// Upper bound on the number of active cells. Negative values select the fixed-fraction
    /// marking strategy, which has no bound.
    pub max_cells: i64,
    pub top_fraction: f64,
    pub bottom_fraction: f64,
    pub viscosity: f64,
}

impl Default for StokesParameters {
    fn default() -> Self {
        Self {
            initial_global_refinement: 1,
            max_time_steps: 10000,
            adaptive_refinement: true,
            use_direct_solver: false,
            use_space_adaptivity: true,
            error_threshold: 1e-2,
            max_cells: 1000,
            top_fraction: 0.3,
            bottom_fraction: 0.1,
            viscosity: 1.0,
        }
    }
}

impl StokesParameters {
    /// Checks the parameters for consistency. Must be called before time stepping starts.
    pub fn validate(&self) -> eyre::Result<()> {
        if !(self.viscosity.is_finite() && self.viscosity > 0.0) {
            return Err(eyre!("viscosity must be positive and finite, got {}", self.viscosity));
        }
        for (name, fraction) in [("top_fraction", self.top_fraction), ("bottom_fraction", self.bottom_fraction)] {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(eyre!("{} must lie in [0, 1], got {}", name, fraction));
            }
        }
        if self.top_fraction + self.bottom_fraction > 1.0 {
            return Err(eyre!(
                "top_fraction + bottom_fraction must not exceed 1, got {} + {}",
                self.top_fraction,
                self.bottom_fraction
            ));
        }
        if !(self.error_threshold >= 0.0) {
            return Err(eyre!("error_threshold must be non-negative, got {}", self.error_threshold));
        }
        Ok(())
    }

    /// Whether the cell-count capped marking strategy is selected.
    pub fn uses_fixed_number_marking(&self) -> bool {
        self.max_cells >= 0
    }
}

/// Tolerances and iteration budgets of the saddle-point solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverSettings {
    /// Absolute residual tolerance of the outer FGMRES iteration.
    pub tolerance: f64,
    pub first_tier_max_iterations: usize,
    pub first_tier_restart: usize,
    /// The second tier may use up to as many iterations as there are unknowns.
    pub second_tier_restart: usize,
    /// Relative residual reduction of the inner CG solves.
    pub inner_reduction: f64,
    pub inner_tolerance: f64,
    pub inner_max_iterations: usize,
    /// Largest system for which a dense direct factorization is attempted when requested.
    pub direct_solver_max_dofs: usize,
    pub amg_aggregation_threshold: f64,
    pub amg_smoother_sweeps: usize,
}

impl Default for LinearSolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            first_tier_max_iterations: 30,
            first_tier_restart: 30,
            second_tier_restart: 50,
            inner_reduction: 1e-2,
            inner_tolerance: 1e-8,
            inner_max_iterations: 5000,
            direct_solver_max_dofs: 2000,
            amg_aggregation_threshold: 0.02,
            amg_smoother_sweeps: 2,
        }
    }
}
