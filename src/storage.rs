pub mod background_mesh;
pub mod basis;
pub mod basis_mesh;
pub mod cell;
