pub mod base;
pub mod bspline;
pub mod lagrange;
