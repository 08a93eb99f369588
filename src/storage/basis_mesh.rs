use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::algorithms::multigrid::BasisHierarchy;
use crate::basis::bspline::BSplineBasis;
use crate::errors::HMRError;
use crate::utilities::multi_index::{local_to_ijk, number_of_local_basis};

use super::background_mesh::BackgroundMesh;
use super::basis::{Basis, BasisKey, BasisState, InterpolationRecord};
use super::cell::{Cell, ElementState, Pattern};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BasisMeshKind
{
    Spline,
    Nodal,
}

///
/// Basis functions of one kind and order living on one pattern of the background
/// mesh. Bases are created the first time a cell defining them exists on the pattern
/// and are kept for the lifetime of the mesh.
///
#[derive(Clone, Debug)]
pub struct BasisMesh
{
    pub(crate) kind: BasisMeshKind,
    pub(crate) order: usize,
    pub(crate) pattern: Pattern,
    pub(crate) dim: usize,
    pub(crate) bases: Vec<Basis>,
    pub(crate) lookup: FxHashMap<BasisKey, usize>,
    pub(crate) max_level: usize,
    pub(crate) external_to_memory: Vec<usize>,
    pub(crate) number_of_used: usize,
}

impl BasisMesh
{
    pub fn new(kind: BasisMeshKind, order: usize, pattern: Pattern, dim: usize) -> Result<Self, HMRError>
    {
        if !(2..=3).contains(&dim)
        {
            return Err(HMRError::UnsupportedDimension(dim));
        }
        if !(1..=3).contains(&order)
        {
            return Err(HMRError::UnsupportedOrder(order));
        }
        Ok(Self {
            kind,
            order,
            pattern,
            dim,
            bases: Vec::new(),
            lookup: FxHashMap::default(),
            max_level: 0,
            external_to_memory: Vec::new(),
            number_of_used: 0,
        })
    }

    #[inline]
    pub fn kind(&self) -> BasisMeshKind
    {
        self.kind
    }

    #[inline]
    pub fn order(&self) -> usize
    {
        self.order
    }

    #[inline]
    pub fn pattern(&self) -> Pattern
    {
        self.pattern
    }

    #[inline]
    pub fn number_of_bases(&self) -> usize
    {
        self.bases.len()
    }

    #[inline]
    pub fn basis(&self, index: usize) -> &Basis
    {
        &self.bases[index]
    }

    #[inline]
    pub fn bases(&self) -> &[Basis]
    {
        &self.bases
    }

    /// Local bases per element, `(order+1)^dim`.
    #[inline]
    pub fn number_of_local_bases(&self) -> usize
    {
        number_of_local_basis(self.order, self.dim)
    }

    /// State of a basis on the pattern of this mesh.
    #[inline]
    pub fn state(&self, basis: usize) -> BasisState
    {
        self.bases[basis].state(self.pattern)
    }

    #[inline]
    pub fn basis_at(&self, level: usize, key: [u32; 3]) -> Option<usize>
    {
        self.lookup.get(&(level as u8, key)).copied()
    }

    pub fn number_of_active_bases(&self) -> usize
    {
        self.bases.iter().filter(|basis| basis.state(self.pattern) == BasisState::Active).count()
    }

    /// Bases referenced by the T-matrices of the last finalize.
    #[inline]
    pub fn number_of_used_bases(&self) -> usize
    {
        self.number_of_used
    }

    #[inline]
    pub fn external_to_memory(&self, external: usize) -> Option<usize>
    {
        self.external_to_memory.get(external).copied()
    }

    ///
    /// Key of local basis `local` of a cell. Spline bases are `(level, ijk + a)`; nodal
    /// bases `(level, ijk * q + m)` reduced to the coarsest level the node lives on.
    ///
    fn local_key(&self, cell: &Cell, local: usize) -> BasisKey
    {
        let offset = local_to_ijk(local, self.order + 1, self.dim);
        let mut key = [0; 3];
        match self.kind
        {
            BasisMeshKind::Spline =>
            {
                for d in 0..self.dim
                {
                    key[d] = cell.ijk[d] + offset[d] as u32;
                }
                (cell.level, key)
            }
            BasisMeshKind::Nodal =>
            {
                for d in 0..self.dim
                {
                    key[d] = cell.ijk[d] * self.order as u32 + offset[d] as u32;
                }
                normalize_node(cell.level, key, self.dim)
            }
        }
    }

    ///
    /// Basis indices of a cell in local order; `None` where the basis was never created.
    ///
    pub fn local_bases(&self, background: &BackgroundMesh, cell: usize) -> Vec<Option<usize>>
    {
        let cell = background.cell(cell);
        (0..self.number_of_local_bases())
            .map(|local| self.lookup.get(&self.local_key(cell, local)).copied())
            .collect()
    }

    ///
    /// Creates bases for every cell present on the pattern, recomputes the basis states and,
    /// for spline meshes, the parent and child lists.
    ///
    pub fn update(&mut self, background: &BackgroundMesh)
    {
        background.check_pattern(self.pattern);
        let n = self.number_of_local_bases();
        for cell in background.cells()
        {
            if !cell.state(self.pattern).exists()
            {
                continue;
            }
            if self.kind == BasisMeshKind::Nodal && cell.is_padding()
            {
                continue;
            }
            for local in 0..n
            {
                let key = self.local_key(cell, local);
                if !self.lookup.contains_key(&key)
                {
                    let index = self.bases.len();
                    self.bases.push(Basis::new(index, key.0, key.1, cell.owner));
                    self.lookup.insert(key, index);
                    self.max_level = self.max_level.max(key.0 as usize);
                }
            }
        }
        match self.kind
        {
            BasisMeshKind::Spline =>
            {
                self.update_spline_states(background);
                self.update_spline_relations();
            }
            BasisMeshKind::Nodal => self.update_nodal_states(background),
        }
        log::debug!("{:?} mesh of order {} on pattern {}: {} bases, {} active", self.kind, self.order, self.pattern.0, self.bases.len(), self.number_of_active_bases());
    }

    // A spline is deactive unless every support cell exists and refined once all of them are.
    fn update_spline_states(&mut self, background: &BackgroundMesh)
    {
        let p = self.order as i64;
        let n = self.number_of_local_bases();
        let pattern = self.pattern;
        for basis in self.bases.iter_mut()
        {
            let level = basis.level as usize;
            let mut state = BasisState::Refined;
            for local in 0..n
            {
                let offset = local_to_ijk(local, self.order + 1, self.dim);
                let mut position = [0_i64; 3];
                for d in 0..self.dim
                {
                    position[d] = basis.key[d] as i64 - p + offset[d] as i64;
                }
                let cell_state = background
                    .cell_at_position(level, position)
                    .map_or(ElementState::Deactive, |cell| background.cell(cell).state(pattern));
                match cell_state
                {
                    ElementState::Deactive =>
                    {
                        state = BasisState::Deactive;
                        break;
                    }
                    ElementState::Refined => {}
                    _ => state = BasisState::Active,
                }
            }
            basis.states[pattern.index()] = state;
        }
    }

    fn update_spline_relations(&mut self)
    {
        let p = self.order;
        let weights = BSplineBasis::new(p).two_scale_weights();
        let width = p + 2;
        for basis in self.bases.iter_mut()
        {
            basis.parents.clear();
            basis.parent_weights.clear();
            basis.children.clear();
        }
        for parent in 0..self.bases.len()
        {
            let (level, key) = (self.bases[parent].level, self.bases[parent].key);
            for local in 0..width.pow(self.dim as u32)
            {
                let k = local_to_ijk(local, width, self.dim);
                let mut child_key = [0; 3];
                let mut weight = 1.0;
                let mut inside = true;
                for d in 0..self.dim
                {
                    let value = 2 * key[d] as i64 - p as i64 + k[d] as i64;
                    if value < 0
                    {
                        inside = false;
                        break;
                    }
                    child_key[d] = value as u32;
                    weight *= weights[k[d]];
                }
                if !inside
                {
                    continue;
                }
                if let Some(&child) = self.lookup.get(&(level + 1, child_key))
                {
                    self.bases[parent].children.push(child);
                    self.bases[child].parents.push(parent);
                    self.bases[child].parent_weights.push(weight);
                }
            }
        }
    }

    fn update_nodal_states(&mut self, background: &BackgroundMesh)
    {
        let pattern = self.pattern;
        for basis in self.bases.iter_mut()
        {
            basis.states[pattern.index()] = BasisState::Deactive;
        }
        let n = self.number_of_local_bases();
        for cell in background.cells()
        {
            if cell.is_padding()
            {
                continue;
            }
            let state = match cell.state(pattern)
            {
                ElementState::Active => BasisState::Active,
                ElementState::Refined => BasisState::Refined,
                _ => continue,
            };
            for local in 0..n
            {
                let key = self.local_key(cell, local);
                if let Some(&basis) = self.lookup.get(&key)
                {
                    let current = &mut self.bases[basis].states[pattern.index()];
                    if *current != BasisState::Active
                    {
                        *current = state;
                    }
                }
            }
        }
    }

    pub(crate) fn clear_used_flags(&mut self)
    {
        for basis in self.bases.iter_mut()
        {
            basis.flags.set_used(false);
        }
    }

    #[inline]
    pub(crate) fn set_used(&mut self, basis: usize)
    {
        self.bases[basis].flags.set_used(true);
    }

    pub(crate) fn reset_interpolation(&mut self, slots: usize)
    {
        for basis in self.bases.iter_mut()
        {
            basis.interpolation = vec![InterpolationRecord::default(); slots];
        }
    }

    #[inline]
    pub(crate) fn set_interpolation(&mut self, basis: usize, slot: usize, record: InterpolationRecord)
    {
        self.bases[basis].interpolation[slot] = record;
    }

    ///
    /// Numbers the bases consecutively. Spline meshes number the bases used by a
    /// T-matrix first, nodal meshes the active nodes; the remaining bases follow so
    /// that coarse multigrid levels can still address them. Both groups are ordered by
    /// level and key.
    ///
    pub fn assign_external_ids(&mut self)
    {
        let pattern = self.pattern;
        let first_group = |basis: &Basis| match self.kind
        {
            BasisMeshKind::Spline => basis.is_used(),
            BasisMeshKind::Nodal => basis.state(pattern) == BasisState::Active,
        };
        let mut order: Vec<(bool, u8, [u32; 3], usize)> = self.bases.iter()
            .map(|basis| (!first_group(basis), basis.level, basis.key, basis.memory_index))
            .collect();
        order.sort_unstable();
        self.number_of_used = order.iter().filter(|entry| !entry.0).count();
        self.external_to_memory = order.iter().map(|entry| entry.3).collect();
        for (external, &memory) in self.external_to_memory.iter().enumerate()
        {
            self.bases[memory].external_id = Some(external);
        }
    }

    ///
    /// Physical coordinates of a nodal basis.
    ///
    pub fn node_coordinates(&self, background: &BackgroundMesh, node: usize) -> [f64; 3]
    {
        let basis = &self.bases[node];
        let mut point = [0.0; 3];
        for d in 0..self.dim
        {
            point[d] = basis.key[d] as f64 / self.order as f64;
        }
        background.to_real_coordinate(basis.level(), &point)
    }
}

///
/// Reduces a node index to the coarsest level on which the same point is a node.
///
pub fn normalize_node(mut level: u8, mut key: [u32; 3], dim: usize) -> BasisKey
{
    while level > 0 && key.iter().take(dim).all(|value| value % 2 == 0)
    {
        for value in key.iter_mut().take(dim)
        {
            *value /= 2;
        }
        level -= 1;
    }
    (level, key)
}

impl BasisHierarchy for BasisMesh
{
    fn max_level(&self) -> usize
    {
        self.max_level
    }

    fn max_external_index(&self) -> usize
    {
        self.external_to_memory.len().saturating_sub(1)
    }

    fn basis_level(&self, external: usize) -> usize
    {
        self.bases[self.external_to_memory[external]].level()
    }

    fn parents(&self, external: usize) -> Vec<(usize, f64)>
    {
        let basis = &self.bases[self.external_to_memory[external]];
        basis.parents.iter().zip(&basis.parent_weights)
            .filter_map(|(&parent, &weight)| self.bases[parent].external_id.map(|id| (id, weight)))
            .collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::parameters::Parameters;

    fn background(elements: usize) -> BackgroundMesh
    {
        let parameters = Parameters { number_of_elements_per_dimension: vec![elements, elements], padding_size: 1, ..Default::default() };
        BackgroundMesh::new(&parameters, 1).unwrap()
    }

    #[test]
    fn linear_spline_states_on_base_mesh()
    {
        let background = background(1);
        let mut mesh = BasisMesh::new(BasisMeshKind::Spline, 1, Pattern::OUTPUT, 2).unwrap();
        mesh.update(&background);
        assert_eq!(mesh.number_of_bases(), 16);
        assert_eq!(mesh.number_of_active_bases(), 4);
        let cell = background.cell_at(0, [1, 1, 0]).unwrap();
        let local = mesh.local_bases(&background, cell);
        assert_eq!(local.len(), 4);
        for basis in local
        {
            assert_eq!(mesh.state(basis.unwrap()), BasisState::Active);
        }
        let outside = mesh.basis_at(0, [0, 1, 0]).unwrap();
        assert_eq!(mesh.state(outside), BasisState::Deactive);
    }

    #[test]
    fn spline_relations_after_refinement()
    {
        let mut background = background(1);
        let cell = background.cell_at(0, [1, 1, 0]).unwrap();
        background.flag_for_refinement(cell, Pattern::OUTPUT);
        background.perform_refinement(Pattern::OUTPUT).unwrap();
        let mut mesh = BasisMesh::new(BasisMeshKind::Spline, 1, Pattern::OUTPUT, 2).unwrap();
        mesh.update(&background);

        // every level-0 cell is refined, so the inner level-0 splines are refined too
        let coarse = mesh.basis_at(0, [1, 1, 0]).unwrap();
        assert_eq!(mesh.state(coarse), BasisState::Refined);
        assert_eq!(mesh.basis(coarse).children().len(), 9);
        let center = mesh.basis_at(1, [2, 2, 0]).unwrap();
        let position = mesh.basis(center).parents().iter().position(|&parent| parent == coarse).unwrap();
        assert_eq!(mesh.basis(center).parent_weights()[position], 1.0);
        let corner = mesh.basis_at(1, [1, 1, 0]).unwrap();
        assert_eq!(mesh.basis(corner).parents().len(), 4);
        let position = mesh.basis(corner).parents().iter().position(|&parent| parent == coarse).unwrap();
        assert_eq!(mesh.basis(corner).parent_weights()[position], 0.25);
        // two-scale weights of a parent sum to 2^d
        let total: f64 = mesh.basis(coarse).children().iter().map(|&child|
        {
            let basis = mesh.basis(child);
            let i = basis.parents().iter().position(|&parent| parent == coarse).unwrap();
            basis.parent_weights()[i]
        }).sum();
        assert!((total - 4.0).abs() < 1e-14);
        assert_eq!(mesh.max_level, 1);
    }

    #[test]
    fn nodal_bases_are_shared_across_levels()
    {
        let mut background = background(1);
        let cell = background.cell_at(0, [1, 1, 0]).unwrap();
        let mut mesh = BasisMesh::new(BasisMeshKind::Nodal, 2, Pattern::OUTPUT, 2).unwrap();
        mesh.update(&background);
        assert_eq!(mesh.number_of_bases(), 9);

        background.flag_for_refinement(cell, Pattern::OUTPUT);
        background.perform_refinement(Pattern::OUTPUT).unwrap();
        mesh.update(&background);
        assert_eq!(mesh.number_of_bases(), 25);
        assert_eq!(mesh.number_of_active_bases(), 25);

        let child = background.cell(cell).child(3).unwrap();
        let local = mesh.local_bases(&background, child);
        // the upper right corner of the child is a corner of the parent
        let corner = local[8].unwrap();
        assert_eq!(mesh.basis(corner).level(), 0);
        assert_eq!(mesh.basis(corner).key(), [4, 4, 0]);
        let coordinates = mesh.node_coordinates(&background, corner);
        assert!((coordinates[0] - 1.0).abs() < 1e-14 && (coordinates[1] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn external_ids_put_first_group_first()
    {
        let background = background(1);
        let mut mesh = BasisMesh::new(BasisMeshKind::Spline, 1, Pattern::OUTPUT, 2).unwrap();
        mesh.update(&background);
        let used = mesh.basis_at(0, [2, 2, 0]).unwrap();
        mesh.set_used(used);
        mesh.assign_external_ids();
        assert_eq!(mesh.number_of_used_bases(), 1);
        assert_eq!(mesh.basis(used).external_id(), Some(0));
        assert_eq!(mesh.external_to_memory(0), Some(used));
        assert_eq!(mesh.max_external_index(), 15);
        let mut ids: Vec<usize> = mesh.bases().iter().map(|basis| basis.external_id().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn normalize_reduces_even_nodes()
    {
        assert_eq!(normalize_node(2, [4, 8, 0], 2), (0, [1, 2, 0]));
        assert_eq!(normalize_node(1, [3, 2, 0], 2), (1, [3, 2, 0]));
        assert_eq!(normalize_node(1, [0, 0, 2], 3), (0, [0, 0, 1]));
    }
}
