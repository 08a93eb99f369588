pub mod child_relations;
pub mod connectivity;
pub mod multigrid;
pub mod nodal_transfer;
pub mod refinement;
pub mod t_matrix;
