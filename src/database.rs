use nalgebra::DMatrix;

use crate::algorithms::connectivity::{Connectivity, Edge, Facet};
use crate::algorithms::multigrid::{MultigridDof, MultigridMaps};
use crate::algorithms::t_matrix::{TMatrixAlgorithm, TMatrixEngine};
use crate::communication::{build_communication_table, Communicator, SerialComm};
use crate::errors::HMRError;
use crate::parameters::Parameters;
use crate::storage::background_mesh::BackgroundMesh;
use crate::storage::basis::{BasisState, InterpolationRecord};
use crate::storage::basis_mesh::{BasisMesh, BasisMeshKind};
use crate::storage::cell::{Pattern, MAX_PATTERNS};

///
/// A spline mesh, a nodal mesh and the engine linking them. `slot` selects the
/// interpolation record on the nodal bases written for this pair.
///
#[derive(Clone, Debug)]
pub struct MeshPair
{
    spline_mesh: usize,
    nodal_mesh: usize,
    slot: usize,
    engine: TMatrixEngine,
}

impl MeshPair
{
    #[inline]
    pub fn spline_mesh(&self) -> usize
    {
        self.spline_mesh
    }

    #[inline]
    pub fn nodal_mesh(&self) -> usize
    {
        self.nodal_mesh
    }

    #[inline]
    pub fn slot(&self) -> usize
    {
        self.slot
    }
}

///
/// Owns the background mesh, the basis meshes and their T-matrix engines. All
/// mutation goes through the refinement entry points; `finalize` recomputes every
/// derived quantity.
///
pub struct Database<C: Communicator = SerialComm>
{
    parameters: Parameters,
    communicator: C,
    background: BackgroundMesh,
    meshes: Vec<BasisMesh>,
    pairs: Vec<MeshPair>,
    connectivity: Connectivity,
    communication_table: Vec<usize>,
    multigrid: Option<MultigridMaps>,
    finalized: bool,
}

impl Database<SerialComm>
{
    pub fn serial(parameters: Parameters) -> Result<Self, HMRError>
    {
        Self::new(parameters, SerialComm)
    }
}

impl<C: Communicator> Database<C>
{
    pub fn new(parameters: Parameters, communicator: C) -> Result<Self, HMRError>
    {
        parameters.validate()?;
        let dim = parameters.dimension();
        let background = BackgroundMesh::new(&parameters, communicator.size())?;
        let algorithm = if parameters.truncate { TMatrixAlgorithm::Truncated } else { TMatrixAlgorithm::Untruncated };
        let mut meshes: Vec<BasisMesh> = Vec::new();
        let mut slots = Vec::new();
        let mut pairs = Vec::with_capacity(parameters.mesh_pairs.len());
        for pair in &parameters.mesh_pairs
        {
            let spline_mesh = find_or_add_mesh(&mut meshes, BasisMeshKind::Spline, pair.spline_order, pair.spline_pattern, dim)?;
            let nodal_mesh = find_or_add_mesh(&mut meshes, BasisMeshKind::Nodal, pair.nodal_order, pair.nodal_pattern, dim)?;
            slots.resize(meshes.len(), 0);
            let slot = slots[nodal_mesh];
            slots[nodal_mesh] += 1;
            let engine = TMatrixEngine::new(dim, pair.spline_order, pair.nodal_order, algorithm)?;
            pairs.push(MeshPair { spline_mesh, nodal_mesh, slot, engine });
        }
        log::info!("database with {} cells, {} basis meshes and {} mesh pairs on rank {} of {}", background.number_of_cells(), meshes.len(), pairs.len(), communicator.rank(), communicator.size());
        Ok(Self {
            parameters,
            communicator,
            background,
            meshes,
            pairs,
            connectivity: Connectivity::default(),
            communication_table: Vec::new(),
            multigrid: None,
            finalized: false,
        })
    }

    #[inline]
    pub fn parameters(&self) -> &Parameters
    {
        &self.parameters
    }

    #[inline]
    pub fn communicator(&self) -> &C
    {
        &self.communicator
    }

    #[inline]
    pub fn background(&self) -> &BackgroundMesh
    {
        &self.background
    }

    #[inline]
    pub fn is_finalized(&self) -> bool
    {
        self.finalized
    }

    fn check_pattern(pattern: Pattern) -> Result<(), HMRError>
    {
        if pattern.index() >= MAX_PATTERNS
        {
            return Err(HMRError::InvalidPattern(pattern.index()));
        }
        Ok(())
    }

    fn check_finalized(&self) -> Result<(), HMRError>
    {
        if self.finalized { Ok(()) } else { Err(HMRError::NotFinalized) }
    }

    // refinement

    pub fn flag_for_refinement(&mut self, cell: usize, pattern: Pattern) -> Result<(), HMRError>
    {
        Self::check_pattern(pattern)?;
        if cell >= self.background.number_of_cells()
        {
            return Err(HMRError::InvalidIndex);
        }
        self.background.flag_for_refinement(cell, pattern);
        Ok(())
    }

    ///
    /// Flags every active leaf of `pattern` whose centroid satisfies `predicate`. Returns the
    /// number of flagged cells.
    ///
    pub fn flag_cells<F: FnMut(usize, [f64; 3]) -> bool>(&mut self, pattern: Pattern, mut predicate: F) -> Result<usize, HMRError>
    {
        Self::check_pattern(pattern)?;
        let mut count = 0;
        for cell in self.background.active_cells(pattern)
        {
            let c = self.background.cell(cell);
            let ijk = c.ijk();
            let centroid = self.background.to_real_coordinate(c.level(), &[ijk[0] as f64 + 0.5, ijk[1] as f64 + 0.5, ijk[2] as f64 + 0.5]);
            if predicate(cell, centroid)
            {
                self.background.flag_for_refinement(cell, pattern);
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn perform_refinement(&mut self, pattern: Pattern) -> Result<usize, HMRError>
    {
        Self::check_pattern(pattern)?;
        self.finalized = false;
        self.background.perform_refinement(pattern)
    }

    /// Refines every active leaf of `pattern` `levels` times.
    pub fn uniform_refinement(&mut self, pattern: Pattern, levels: usize) -> Result<usize, HMRError>
    {
        let mut refined = 0;
        for _ in 0..levels
        {
            self.flag_cells(pattern, |_, _| true)?;
            refined += self.perform_refinement(pattern)?;
        }
        Ok(refined)
    }

    pub fn copy_pattern(&mut self, source: Pattern, target: Pattern) -> Result<(), HMRError>
    {
        Self::check_pattern(source)?;
        Self::check_pattern(target)?;
        self.finalized = false;
        self.background.copy_pattern(source, target);
        Ok(())
    }

    pub fn unite_patterns(&mut self, first: Pattern, second: Pattern, target: Pattern) -> Result<(), HMRError>
    {
        Self::check_pattern(first)?;
        Self::check_pattern(second)?;
        Self::check_pattern(target)?;
        self.finalized = false;
        self.background.unite_patterns(first, second, target);
        Ok(())
    }

    pub fn create_union_pattern(&mut self) -> Result<(), HMRError>
    {
        self.unite_patterns(Pattern::INPUT, Pattern::OUTPUT, Pattern::UNION)
    }

    pub fn reset_pattern(&mut self, pattern: Pattern) -> Result<(), HMRError>
    {
        Self::check_pattern(pattern)?;
        self.finalized = false;
        self.background.reset_pattern(pattern);
        Ok(())
    }

    ///
    /// Updates the basis meshes, evaluates all T-matrices, numbers the bases, builds the
    /// connectivity of the first nodal pattern and the communication table.
    ///
    pub fn finalize(&mut self)
    {
        let mut slots = vec![0; self.meshes.len()];
        for pair in &self.pairs
        {
            slots[pair.nodal_mesh] += 1;
        }
        for (mesh, &slot_count) in self.meshes.iter_mut().zip(&slots)
        {
            mesh.update(&self.background);
            match mesh.kind()
            {
                BasisMeshKind::Spline => mesh.clear_used_flags(),
                BasisMeshKind::Nodal => mesh.reset_interpolation(slot_count),
            }
        }
        for pair in &self.pairs
        {
            let (splines, nodes) = two_meshes_mut(&mut self.meshes, pair.spline_mesh, pair.nodal_mesh);
            pair.engine.evaluate(&self.background, splines, nodes, pair.slot);
        }
        for mesh in self.meshes.iter_mut()
        {
            mesh.assign_external_ids();
        }
        self.connectivity = match self.pairs.first()
        {
            Some(pair) => Connectivity::build(&self.background, self.meshes[pair.nodal_mesh].pattern()),
            None => Connectivity::default(),
        };

        let mut owners: Vec<usize> = Vec::new();
        for mesh in &self.meshes
        {
            for basis in mesh.bases()
            {
                let in_use = match mesh.kind()
                {
                    BasisMeshKind::Spline => basis.is_used(),
                    BasisMeshKind::Nodal => basis.state(mesh.pattern()) == BasisState::Active,
                };
                if in_use
                {
                    owners.push(basis.owner());
                }
            }
        }
        owners.sort_unstable();
        owners.dedup();
        self.communication_table = build_communication_table(&self.communicator, &owners);
        self.check_entity_ids();
        self.multigrid = None;
        self.finalized = true;
        for mesh in &self.meshes
        {
            log::info!("finalized {:?} mesh of order {} on pattern {}: {} bases, {} in use", mesh.kind(), mesh.order(), mesh.pattern().0, mesh.number_of_bases(), mesh.number_of_used_bases());
        }
    }

    fn check_entity_ids(&self)
    {
        for mesh in &self.meshes
        {
            let n = mesh.number_of_bases();
            for basis in mesh.bases()
            {
                assert!(basis.external_id().is_some_and(|id| id < n), "basis {} of a {:?} mesh has an external id out of bounds", basis.memory_index(), mesh.kind());
            }
        }
        for pair in &self.pairs
        {
            let n = self.meshes[pair.spline_mesh].number_of_bases();
            for basis in self.meshes[pair.nodal_mesh].bases()
            {
                if let Some(record) = basis.interpolation(pair.slot)
                {
                    assert!(record.bases.iter().all(|&spline| spline < n), "interpolation record of node {} references a missing spline", basis.memory_index());
                }
            }
        }
        let cells = self.background.number_of_cells();
        assert!(self.connectivity.facets.iter().all(|facet| facet.leader < cells && facet.follower.map_or(true, |f| f < cells)), "facet references a missing cell");
    }

    // accessors

    pub fn get_mesh_by_index(&self, kind: BasisMeshKind, order: usize, pattern: Pattern) -> Option<usize>
    {
        self.meshes.iter().position(|mesh| mesh.kind() == kind && mesh.order() == order && mesh.pattern() == pattern)
    }

    pub fn mesh(&self, index: usize) -> Result<&BasisMesh, HMRError>
    {
        self.meshes.get(index).ok_or(HMRError::InvalidIndex)
    }

    #[inline]
    pub fn number_of_meshes(&self) -> usize
    {
        self.meshes.len()
    }

    pub fn mesh_pair(&self, pair: usize) -> Result<&MeshPair, HMRError>
    {
        self.pairs.get(pair).ok_or(HMRError::InvalidIndex)
    }

    #[inline]
    pub fn number_of_mesh_pairs(&self) -> usize
    {
        self.pairs.len()
    }

    pub fn t_matrix(&self, pair: usize) -> Result<&TMatrixEngine, HMRError>
    {
        Ok(&self.mesh_pair(pair)?.engine)
    }

    ///
    /// T-matrix of a leaf of the pair's nodal pattern on the finalized meshes.
    ///
    pub fn calculate_t_matrix(&self, pair: usize, cell: usize) -> Result<(DMatrix<f64>, Vec<usize>), HMRError>
    {
        self.check_finalized()?;
        let pair = self.mesh_pair(pair)?;
        if cell >= self.background.number_of_cells()
        {
            return Err(HMRError::InvalidIndex);
        }
        let view = pair.engine.view(&self.background, &self.meshes[pair.spline_mesh]);
        Ok(view.calculate_t_matrix(cell))
    }

    /// Interpolation record of a node of the pair's nodal mesh.
    pub fn interpolation(&self, pair: usize, node: usize) -> Result<&InterpolationRecord, HMRError>
    {
        self.check_finalized()?;
        let pair = self.mesh_pair(pair)?;
        self.meshes[pair.nodal_mesh].bases().get(node)
            .and_then(|basis| basis.interpolation(pair.slot))
            .ok_or(HMRError::InvalidIndex)
    }

    pub fn communication_table(&self) -> Result<&[usize], HMRError>
    {
        self.check_finalized()?;
        Ok(&self.communication_table)
    }

    pub fn facets(&self) -> Result<&[Facet], HMRError>
    {
        self.check_finalized()?;
        Ok(&self.connectivity.facets)
    }

    pub fn edges(&self) -> Result<&[Edge], HMRError>
    {
        self.check_finalized()?;
        Ok(&self.connectivity.edges)
    }

    // multigrid

    ///
    /// Builds the coarsening sequence for dofs living on the spline mesh of `pair`.
    /// Dofs are `(type/time identifier, external id)`.
    ///
    pub fn multigrid_initialize(&mut self, pair: usize, dofs: &[MultigridDof], type_times: &[usize], levels: usize) -> Result<&MultigridMaps, HMRError>
    {
        self.check_finalized()?;
        let splines = &self.meshes[self.mesh_pair(pair)?.spline_mesh];
        let maps = MultigridMaps::build(splines, dofs, type_times, levels)?;
        Ok(self.multigrid.insert(maps))
    }

    pub fn multigrid(&self) -> Option<&MultigridMaps>
    {
        self.multigrid.as_ref()
    }

    pub fn read_multigrid_maps(&self, level: usize, externals: &[usize], type_time: usize) -> Result<Vec<usize>, HMRError>
    {
        self.check_finalized()?;
        self.multigrid.as_ref().ok_or(HMRError::MultigridNotInitialized)?.read_multigrid_maps(level, externals, type_time)
    }
}

fn find_or_add_mesh(meshes: &mut Vec<BasisMesh>, kind: BasisMeshKind, order: usize, pattern: Pattern, dim: usize) -> Result<usize, HMRError>
{
    if let Some(index) = meshes.iter().position(|mesh| mesh.kind() == kind && mesh.order() == order && mesh.pattern() == pattern)
    {
        return Ok(index);
    }
    meshes.push(BasisMesh::new(kind, order, pattern, dim)?);
    Ok(meshes.len() - 1)
}

// spline and nodal meshes of a pair are always distinct entries
fn two_meshes_mut(meshes: &mut [BasisMesh], first: usize, second: usize) -> (&mut BasisMesh, &mut BasisMesh)
{
    assert_ne!(first, second, "a mesh pair must link two different meshes");
    if first < second
    {
        let (low, high) = meshes.split_at_mut(second);
        (&mut low[first], &mut high[0])
    }
    else
    {
        let (low, high) = meshes.split_at_mut(first);
        (&mut high[0], &mut low[second])
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::parameters::MeshPairParameters;
    use crate::storage::cell::ElementState;
    use proptest::prelude::*;

    fn parameters(dim: usize, elements: usize, spline_order: usize, nodal_order: usize) -> Parameters
    {
        Parameters {
            number_of_elements_per_dimension: vec![elements; dim],
            domain_dimensions: vec![2.0; dim],
            domain_offset: vec![-1.0; dim],
            padding_size: spline_order,
            mesh_pairs: vec![MeshPairParameters { spline_order, nodal_order, ..Default::default() }],
            ..Default::default()
        }
    }

    #[test]
    fn accessors_require_finalize()
    {
        let database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        assert_eq!(database.facets().err(), Some(HMRError::NotFinalized));
        assert_eq!(database.interpolation(0, 0).err(), Some(HMRError::NotFinalized));
        assert_eq!(database.calculate_t_matrix(0, 0).err(), Some(HMRError::NotFinalized));
        assert_eq!(database.read_multigrid_maps(0, &[0], 0).err(), Some(HMRError::NotFinalized));
    }

    #[test]
    fn invalid_configuration_is_rejected()
    {
        let mut bad = parameters(2, 2, 2, 1);
        bad.padding_size = 1;
        assert!(matches!(Database::serial(bad), Err(HMRError::InvalidParameters(_))));
        let mut database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        assert_eq!(database.perform_refinement(Pattern(9)), Err(HMRError::InvalidPattern(9)));
        assert_eq!(database.flag_for_refinement(10_000, Pattern::OUTPUT), Err(HMRError::InvalidIndex));
    }

    #[test]
    fn meshes_are_shared_between_pairs()
    {
        let mut parameters = parameters(2, 2, 2, 2);
        parameters.mesh_pairs.push(MeshPairParameters { spline_order: 2, nodal_order: 1, ..Default::default() });
        let mut database = Database::serial(parameters).unwrap();
        assert_eq!(database.number_of_meshes(), 3);
        let splines = database.get_mesh_by_index(BasisMeshKind::Spline, 2, Pattern::OUTPUT).unwrap();
        assert_eq!(database.mesh_pair(0).unwrap().spline_mesh(), splines);
        assert_eq!(database.mesh_pair(1).unwrap().spline_mesh(), splines);
        assert_eq!(database.get_mesh_by_index(BasisMeshKind::Nodal, 3, Pattern::OUTPUT), None);

        database.uniform_refinement(Pattern::OUTPUT, 1).unwrap();
        database.finalize();
        for pair in 0..2
        {
            let nodes = database.mesh(database.mesh_pair(pair).unwrap().nodal_mesh()).unwrap();
            for node in 0..nodes.number_of_bases()
            {
                let record = database.interpolation(pair, node).unwrap();
                assert!((record.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn adaptive_finalize_reproduces_linear_fields()
    {
        let mut database = Database::serial(parameters(2, 3, 2, 2)).unwrap();
        database.flag_cells(Pattern::OUTPUT, |_, centroid| centroid[0] < 0.0 && centroid[1] < 0.0).unwrap();
        database.perform_refinement(Pattern::OUTPUT).unwrap();
        database.finalize();

        let pair = database.mesh_pair(0).unwrap();
        let splines = database.mesh(pair.spline_mesh()).unwrap();
        let nodes = database.mesh(pair.nodal_mesh()).unwrap();
        assert!(splines.number_of_used_bases() > 0);
        // used splines come first in the external numbering
        for basis in splines.bases()
        {
            assert_eq!(basis.is_used(), basis.external_id().unwrap() < splines.number_of_used_bases());
        }
        let ones = vec![1.0; splines.number_of_bases()];
        for node in 0..nodes.number_of_bases()
        {
            if nodes.state(node) != BasisState::Active
            {
                continue;
            }
            let record = database.interpolation(0, node).unwrap();
            assert!((record.interpolate(&ones) - 1.0).abs() < 1e-12);
        }
        assert_eq!(database.communication_table().unwrap(), &[0]);
        assert!(!database.facets().unwrap().is_empty());
        assert!(database.edges().unwrap().is_empty());
    }

    #[test]
    fn calculate_t_matrix_matches_records()
    {
        let mut database = Database::serial(parameters(3, 1, 1, 1)).unwrap();
        database.uniform_refinement(Pattern::OUTPUT, 1).unwrap();
        database.finalize();
        let leaf = database.background().active_cells(Pattern::OUTPUT)[0];
        let (matrix, bases) = database.calculate_t_matrix(0, leaf).unwrap();
        assert_eq!(matrix.shape(), (8, 8));
        assert_eq!(bases.len(), 8);
        assert_eq!(database.edges().unwrap().len(), 54);
    }

    #[test]
    fn multigrid_maps_every_fine_dof()
    {
        let mut database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        database.uniform_refinement(Pattern::OUTPUT, 1).unwrap();
        database.finalize();
        let splines = database.mesh(0).unwrap();
        let dofs: Vec<MultigridDof> = (0..splines.number_of_used_bases()).map(|external| (0, external)).collect();
        let maps = database.multigrid_initialize(0, &dofs, &[0], 1).unwrap();
        assert_eq!(maps.number_of_levels(), 2);
        let fine = maps.level(0).unwrap();
        for position in 0..fine.len()
        {
            assert!(!fine.coarse_positions(position).is_empty());
        }
        let coarse = maps.number_of_dofs(1).unwrap();
        assert!(coarse > 0 && coarse <= dofs.len());
        assert!(database.read_multigrid_maps(0, &[0, 1], 0).is_ok());
        assert_eq!(database.multigrid_initialize(0, &[(3, 0)], &[0], 1).err(), Some(HMRError::UnassignedTypeTime(3)));
    }

    #[test]
    fn multigrid_lookup_before_initialize()
    {
        let mut database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        database.finalize();
        assert_eq!(database.read_multigrid_maps(0, &[0], 0).err(), Some(HMRError::MultigridNotInitialized));
    }

    #[test]
    fn coarse_levels_beyond_the_hierarchy_keep_every_dof()
    {
        let mut database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        database.uniform_refinement(Pattern::OUTPUT, 1).unwrap();
        database.finalize();
        let splines = database.mesh(0).unwrap();
        let dofs: Vec<MultigridDof> = (0..splines.number_of_used_bases()).map(|external| (0, external)).collect();
        let maps = database.multigrid_initialize(0, &dofs, &[0], 3).unwrap();
        assert_eq!(maps.number_of_levels(), 4);
        for level in 0..3
        {
            let map = maps.level(level).unwrap();
            let coarser = maps.number_of_dofs(level + 1).unwrap();
            assert!(coarser > 0 && coarser <= map.len());
            for position in 0..map.len()
            {
                assert!(!map.coarse_positions(position).is_empty());
            }
        }
        // the level-0 bases are the coarsest possible and survive unchanged
        assert_eq!(maps.number_of_dofs(2).unwrap(), maps.number_of_dofs(1).unwrap());
        assert_eq!(maps.number_of_dofs(3).unwrap(), maps.number_of_dofs(1).unwrap());
    }

    #[test]
    fn union_pattern_combines_refinements()
    {
        let mut database = Database::serial(parameters(2, 2, 1, 1)).unwrap();
        let first = database.background().cell_at(0, [1, 1, 0]).unwrap();
        let second = database.background().cell_at(0, [2, 2, 0]).unwrap();
        database.flag_for_refinement(first, Pattern::INPUT).unwrap();
        database.perform_refinement(Pattern::INPUT).unwrap();
        database.flag_for_refinement(second, Pattern::OUTPUT).unwrap();
        database.perform_refinement(Pattern::OUTPUT).unwrap();
        database.create_union_pattern().unwrap();
        assert!(database.background().is_refined(first, Pattern::UNION));
        assert!(database.background().is_refined(second, Pattern::UNION));
        database.reset_pattern(Pattern::UNION).unwrap();
        assert_eq!(database.background().state(first, Pattern::UNION), ElementState::Active);
        database.copy_pattern(Pattern::OUTPUT, Pattern::WORKING).unwrap();
        assert!(database.background().is_refined(second, Pattern::WORKING));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn refinement_reaches_a_fixed_point(flags in proptest::collection::vec((0_u32..4, 0_u32..4, 0_usize..2), 1..8))
        {
            let mut database = Database::serial(parameters(2, 4, 2, 1)).unwrap();
            for &(i, j, depth) in &flags
            {
                let mut cell = database.background().cell_at(0, [i + 2, j + 2, 0]).unwrap();
                for _ in 0..depth
                {
                    if let Some(child) = database.background().cell(cell).child(0)
                    {
                        cell = child;
                    }
                }
                database.flag_for_refinement(cell, Pattern::OUTPUT).unwrap();
                database.perform_refinement(Pattern::OUTPUT).unwrap();
            }
            let states: Vec<ElementState> = (0..database.background().number_of_cells()).map(|cell| database.background().state(cell, Pattern::OUTPUT)).collect();
            prop_assert_eq!(database.perform_refinement(Pattern::OUTPUT).unwrap(), 0);
            let after: Vec<ElementState> = (0..database.background().number_of_cells()).map(|cell| database.background().state(cell, Pattern::OUTPUT)).collect();
            prop_assert_eq!(states, after);
            prop_assert_eq!(database.background().number_of_pending_flags(), 0);
        }
    }
}
