//! Adaptive hierarchical mesh engine.
//!
//! A dyadically refined background mesh carries several independent refinement
//! patterns. Over it live spline (B-spline) and nodal (Lagrange) basis meshes;
//! the T-matrix engine expresses the nodal values of every leaf as a combination of
//! the active spline coefficients, and the multigrid builder coarsens spline dofs
//! by walking the basis hierarchy.

pub mod algorithms;
pub mod basis;
pub mod communication;
pub mod database;
pub mod errors;
pub mod parameters;
pub mod storage;
pub mod utilities;

pub use database::Database;
pub use errors::HMRError;
pub use parameters::Parameters;
pub use storage::cell::{ElementState, Pattern};
