//! Time-dependent incompressible Stokes flow on adaptive quadrilateral meshes.
//!
//! The flow is discretized with Taylor-Hood (Q2-Q1) elements on a quadtree forest with hanging
//! nodes and exposed as a differential-algebraic model `F(t, y, y') = 0` through the
//! [`DaeModel`](dae::DaeModel) trait. See [`StokesProblem`](stokes::StokesProblem) for the entry
//! point.

pub mod assembly;
pub mod comm;
pub mod config;
pub mod constraints;
pub mod dae;
pub mod data;
pub mod discretization;
pub mod dofs;
pub mod element;
pub mod error;
pub mod kelly;
pub mod mesh;
pub mod output;
pub mod quadrature;
pub mod space;
pub mod stokes;
pub mod transfer;

pub use comm::{Communicator, SerialCommunicator};
pub use config::{LinearSolverSettings, StokesParameters};
pub use dae::{BackwardEuler, BackwardEulerSettings, DaeModel, LinearSolveOutcome, StepControl};
pub use data::{ExactSolution, FlowData};
pub use stokes::{SimulationResult, StokesProblem};
pub use stokes_sparse::BlockVector;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate stokes_sparse;
