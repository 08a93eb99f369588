use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::errors::HMRError;

///
/// Basis ancestry as seen by the multigrid builder. All indices are external ids.
///
pub trait BasisHierarchy
{
    /// Finest level on which bases exist.
    fn max_level(&self) -> usize;
    fn max_external_index(&self) -> usize;
    fn basis_level(&self, external: usize) -> usize;
    /// Coarser bases interpolating into `external`, with their two-scale weights.
    fn parents(&self, external: usize) -> Vec<(usize, f64)>;
}

/// A multigrid dof: type/time identifier and external basis id.
pub type MultigridDof = (usize, usize);

///
/// One level of the coarsening sequence. Entry `i` is mapped onto the positions
/// `coarse[i]` of the next level with the prolongation weights `weights[i]`.
///
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultigridLevel
{
    #[serde_as(as = "Vec<(_, _)>")]
    pub(crate) positions: FxHashMap<MultigridDof, usize>,
    pub(crate) entries: Vec<MultigridDof>,
    pub(crate) coarse: Vec<Vec<usize>>,
    pub(crate) weights: Vec<Vec<f64>>,
}

impl MultigridLevel
{
    fn from_entries(entries: Vec<MultigridDof>) -> Self
    {
        let positions = entries.iter().enumerate().map(|(position, &dof)| (dof, position)).collect();
        Self { positions, entries, coarse: Vec::new(), weights: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[MultigridDof]
    {
        &self.entries
    }

    #[inline]
    pub fn position(&self, dof: MultigridDof) -> Option<usize>
    {
        self.positions.get(&dof).copied()
    }

    /// Positions on the next coarser level an entry maps onto. Empty on the coarsest level.
    #[inline]
    pub fn coarse_positions(&self, position: usize) -> &[usize]
    {
        self.coarse.get(position).map(Vec::as_slice).unwrap_or(&[])
    }
}

///
/// Coarsening sequence of spline dofs obtained by walking basis ancestry. Level zero
/// holds the finest dofs.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultigridMaps
{
    levels: Vec<MultigridLevel>,
}

impl MultigridMaps
{
    ///
    /// Builds `number_of_coarse_levels` coarser levels on top of `dofs`. Every dof type
    /// must be listed in `type_times`.
    ///
    pub fn build<H: BasisHierarchy>(hierarchy: &H, dofs: &[MultigridDof], type_times: &[usize], number_of_coarse_levels: usize) -> Result<Self, HMRError>
    {
        let slots: FxHashMap<usize, usize> = type_times.iter().enumerate().map(|(slot, &type_time)| (type_time, slot)).collect();
        if let Some(&(type_time, _)) = dofs.iter().find(|(type_time, _)| !slots.contains_key(type_time))
        {
            return Err(HMRError::UnassignedTypeTime(type_time));
        }
        let table_size = hierarchy.max_external_index() + 1;
        if dofs.iter().any(|&(_, external)| external >= table_size)
        {
            return Err(HMRError::InvalidIndex);
        }
        let mut finest = Vec::with_capacity(dofs.len());
        let mut seen = FxHashSet::default();
        for &dof in dofs
        {
            if seen.insert(dof)
            {
                finest.push(dof);
            }
        }
        let mut levels = vec![MultigridLevel::from_entries(finest)];
        for level in 0..number_of_coarse_levels
        {
            let threshold = hierarchy.max_level().saturating_sub(level);
            let mut existence: Vec<Vec<Option<usize>>> = vec![vec![None; table_size]; type_times.len()];
            let mut next = Vec::new();
            let current = &levels[level];
            let mut coarse = vec![Vec::new(); current.len()];
            let mut weights = vec![Vec::new(); current.len()];
            let mut too_fine = Vec::new();

            let record = |existence: &mut Vec<Vec<Option<usize>>>, next: &mut Vec<MultigridDof>, dof: MultigridDof| -> usize
            {
                let slot = &mut existence[slots[&dof.0]][dof.1];
                *slot.get_or_insert_with(||
                {
                    next.push(dof);
                    next.len() - 1
                })
            };

            for (position, &(type_time, external)) in current.entries.iter().enumerate()
            {
                if hierarchy.basis_level(external) < threshold
                {
                    let target = record(&mut existence, &mut next, (type_time, external));
                    coarse[position].push(target);
                    weights[position].push(1.0);
                }
                else
                {
                    too_fine.push(position);
                }
            }
            for position in too_fine
            {
                let (type_time, external) = current.entries[position];
                let parents = hierarchy.parents(external);
                // bases without ancestors stay on every coarser level
                if parents.is_empty()
                {
                    let target = record(&mut existence, &mut next, (type_time, external));
                    coarse[position].push(target);
                    weights[position].push(1.0);
                    continue;
                }
                for (parent, weight) in parents
                {
                    let target = record(&mut existence, &mut next, (type_time, parent));
                    coarse[position].push(target);
                    weights[position].push(weight);
                }
            }
            levels[level].coarse = coarse;
            levels[level].weights = weights;
            log::debug!("multigrid level {}: {} dofs, threshold {threshold}", level + 1, next.len());
            levels.push(MultigridLevel::from_entries(next));
        }
        log::info!("multigrid hierarchy with {} levels, dofs per level {:?}", levels.len(), levels.iter().map(MultigridLevel::len).collect::<Vec<_>>());
        Ok(Self { levels })
    }

    #[inline]
    pub fn number_of_levels(&self) -> usize
    {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Result<&MultigridLevel, HMRError>
    {
        self.levels.get(level).ok_or(HMRError::InvalidIndex)
    }

    pub fn number_of_dofs(&self, level: usize) -> Result<usize, HMRError>
    {
        Ok(self.level(level)?.len())
    }

    ///
    /// Positions of external ids of one dof type on a level.
    ///
    pub fn read_multigrid_maps(&self, level: usize, externals: &[usize], type_time: usize) -> Result<Vec<usize>, HMRError>
    {
        let map = self.level(level)?;
        externals.iter()
            .map(|&external| map.position((type_time, external)).ok_or(HMRError::UnmappedMultigridIndex { level, index: external }))
            .collect()
    }

    ///
    /// Prolongation from `level + 1` to `level` as `(fine position, coarse position, weight)`
    /// triplets.
    ///
    pub fn prolongation(&self, level: usize) -> Result<Vec<(usize, usize, f64)>, HMRError>
    {
        let map = self.level(level)?;
        if level + 1 >= self.levels.len()
        {
            return Err(HMRError::InvalidIndex);
        }
        let mut triplets = Vec::new();
        for (fine, (coarse, weights)) in map.coarse.iter().zip(&map.weights).enumerate()
        {
            for (&position, &weight) in coarse.iter().zip(weights)
            {
                triplets.push((fine, position, weight));
            }
        }
        Ok(triplets)
    }
}
