use nalgebra::{DMatrix, RowDVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::HMRError;
use crate::storage::background_mesh::BackgroundMesh;
use crate::storage::basis::{BasisState, InterpolationRecord};
use crate::storage::basis_mesh::BasisMesh;

use super::child_relations::ChildRelations;
use super::nodal_transfer::NodalTransfer;

/// Rows of a truncated T-matrix below this magnitude are dropped.
pub const TRUNCATION_TOLERANCE: f64 = 1e-12;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TMatrixAlgorithm
{
    Untruncated,
    Truncated,
}

///
/// Precomputed reference data of one spline/nodal order combination.
///
#[derive(Clone, Debug)]
pub struct TMatrixEngine
{
    algorithm: TMatrixAlgorithm,
    relations: ChildRelations,
    transfer: NodalTransfer,
}

impl TMatrixEngine
{
    pub fn new(dim: usize, spline_order: usize, nodal_order: usize, algorithm: TMatrixAlgorithm) -> Result<Self, HMRError>
    {
        let relations = ChildRelations::new(dim, spline_order, nodal_order)?;
        let transfer = NodalTransfer::new(dim, nodal_order)?;
        Ok(Self { algorithm, relations, transfer })
    }

    #[inline]
    pub fn algorithm(&self) -> TMatrixAlgorithm
    {
        self.algorithm
    }

    #[inline]
    pub fn relations(&self) -> &ChildRelations
    {
        &self.relations
    }

    #[inline]
    pub fn refinement_matrix(&self, child: usize) -> &DMatrix<f64>
    {
        self.transfer.refinement_matrix(child)
    }

    #[inline]
    pub fn change_order_matrix(&self, target_order: usize) -> Result<&DMatrix<f64>, HMRError>
    {
        self.transfer.change_order_matrix(target_order)
    }

    pub fn view<'a>(&'a self, background: &'a BackgroundMesh, splines: &'a BasisMesh) -> TMatrix<'a>
    {
        TMatrix { engine: self, background, splines }
    }

    ///
    /// Computes the T-matrix of every active leaf of the nodal pattern and stores the
    /// resulting rows as interpolation records in `slot` of the nodal mesh. Spline bases
    /// referenced by any T-matrix are flagged as used.
    ///
    pub fn evaluate(&self, background: &BackgroundMesh, splines: &mut BasisMesh, nodes: &mut BasisMesh, slot: usize)
    {
        let leaves = background.active_cells(nodes.pattern());
        let results: Vec<(DMatrix<f64>, Vec<usize>)> = {
            let view = self.view(background, splines);
            leaves.par_iter().map(|&cell| view.calculate_t_matrix(cell)).collect()
        };
        let mut entries = 0;
        for (&cell, (matrix, bases)) in leaves.iter().zip(results)
        {
            for &basis in &bases
            {
                splines.set_used(basis);
            }
            entries += matrix.len();
            for (local, node) in nodes.local_bases(background, cell).into_iter().enumerate()
            {
                let Some(node) = node else { continue };
                let mut record = InterpolationRecord::default();
                for (row, &basis) in bases.iter().enumerate()
                {
                    let weight = matrix[(row, local)];
                    if weight != 0.0
                    {
                        record.bases.push(basis);
                        record.weights.push(weight);
                    }
                }
                nodes.set_interpolation(node, slot, record);
            }
        }
        log::debug!("evaluated {} T-matrices ({:?}) with {entries} entries", leaves.len(), self.algorithm);
    }
}

///
/// T-matrix computation over a borrowed background mesh and spline mesh.
///
pub struct TMatrix<'a>
{
    engine: &'a TMatrixEngine,
    background: &'a BackgroundMesh,
    splines: &'a BasisMesh,
}

impl<'a> TMatrix<'a>
{
    ///
    /// Dense `(contributing splines × local nodes)` matrix of a leaf cell and the memory
    /// indices of the contributing splines, one per row.
    ///
    pub fn calculate_t_matrix(&self, cell: usize) -> (DMatrix<f64>, Vec<usize>)
    {
        match self.engine.algorithm
        {
            TMatrixAlgorithm::Untruncated => self.untruncated(cell),
            TMatrixAlgorithm::Truncated => self.truncated(cell),
        }
    }

    fn state(&self, basis: Option<usize>) -> BasisState
    {
        basis.map_or(BasisState::Deactive, |basis| self.splines.state(basis))
    }

    fn untruncated(&self, cell: usize) -> (DMatrix<f64>, Vec<usize>)
    {
        let relations = &self.engine.relations;
        let b = relations.spline_to_nodal();
        let n = b.nrows();
        let chain = self.background.ancestor_chain(cell);
        let mut rows: Vec<RowDVector<f64>> = Vec::new();
        let mut bases = Vec::new();
        // maps the local splines of the current ancestor to those of the leaf
        let mut p = DMatrix::<f64>::identity(n, n);
        for (depth, &ancestor) in chain.iter().enumerate()
        {
            if depth > 0
            {
                let position = self.background.child_position(chain[depth - 1]);
                p = relations.child_matrix(position) * p;
            }
            for (local, basis) in self.splines.local_bases(self.background, ancestor).into_iter().enumerate()
            {
                if self.state(basis) == BasisState::Active
                {
                    rows.push(p.row(local) * b);
                    bases.extend(basis);
                }
            }
        }
        (stack_rows(&rows, b.ncols()), bases)
    }

    fn truncated(&self, cell: usize) -> (DMatrix<f64>, Vec<usize>)
    {
        let relations = &self.engine.relations;
        let b = relations.spline_to_nodal();
        let chain = self.background.ancestor_chain(cell);
        let local_bases: Vec<Vec<Option<usize>>> = chain.iter().map(|&ancestor| self.splines.local_bases(self.background, ancestor)).collect();
        let mut rows: Vec<RowDVector<f64>> = Vec::new();
        let mut bases = Vec::new();
        for depth in 0..chain.len()
        {
            for (local, &basis) in local_bases[depth].iter().enumerate()
            {
                if self.state(basis) != BasisState::Active
                {
                    continue;
                }
                let mut v = RowDVector::<f64>::zeros(b.nrows());
                v[local] = 1.0;
                for finer in (0..depth).rev()
                {
                    let position = self.background.child_position(chain[finer]);
                    v = &v * relations.child_matrix(position);
                    // finer splines covering this support replace the coarse one there
                    for (i, &fine) in local_bases[finer].iter().enumerate()
                    {
                        if matches!(self.state(fine), BasisState::Active | BasisState::Refined)
                        {
                            v[i] = 0.0;
                        }
                    }
                }
                let row = v * b;
                if row.amax() < TRUNCATION_TOLERANCE
                {
                    continue;
                }
                rows.push(row);
                bases.extend(basis);
            }
        }
        (stack_rows(&rows, b.ncols()), bases)
    }
}

fn stack_rows(rows: &[RowDVector<f64>], columns: usize) -> DMatrix<f64>
{
    DMatrix::from_fn(rows.len(), columns, |r, c| rows[r][c])
}
