//! Cell-local kernels of the Stokes system and their assembly into global sparse storage.
//!
//! Local contributions are computed in parallel with `rayon`, but always scattered into the
//! global vectors and matrices sequentially in active cell order. Assembly results are therefore
//! bit-for-bit reproducible, independently of the number of threads.
mod global;
mod local;

pub use global::*;
pub use local::*;
