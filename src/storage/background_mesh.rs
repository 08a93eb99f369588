use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::algorithms::refinement;
use crate::errors::HMRError;
use crate::parameters::Parameters;
use crate::utilities::multi_index::number_of_children;

use super::cell::{Cell, ElementState, Pattern, MAX_PATTERNS};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox
{
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl Default for BoundingBox
{
    #[inline]
    fn default() -> Self {
        Self { lower: [0.0; 3], upper: [1.0; 3] }
    }
}

impl BoundingBox
{
    #[inline]
    pub fn new(lower: [f64; 3], upper: [f64; 3]) -> Self
    {
        Self { lower, upper }
    }
    #[inline]
    pub fn width(&self, dim: usize) -> f64
    {
        self.upper[dim] - self.lower[dim]
    }
    #[inline]
    pub fn to_real_coordinate(&self, point: &[f64; 3]) -> [f64; 3]
    {
        let mut r = [0.0; 3];
        for i in 0..3
        {
            r[i] = self.lower[i] + (self.upper[i] - self.lower[i]) * point[i];
        }
        r
    }
}

/// Cell lookup key: level and integer coordinate on that level.
pub type CellKey = (u8, [u32; 3]);

///
/// Dyadic quad/oct tree over the domain plus padding layers. All cells live in one
/// arena and are never destroyed; the refinement state of each cell is tracked
/// independently for every pattern.
///
#[derive(Clone, Debug)]
pub struct BackgroundMesh
{
    pub(crate) dim: usize,
    pub(crate) padding: u32,
    pub(crate) domain_cells: [u32; 3],
    pub(crate) base_cells: [u32; 3],
    pub(crate) domain: BoundingBox,
    pub(crate) cells: Vec<Cell>,
    pub(crate) lookup: FxHashMap<CellKey, usize>,
    pub(crate) queue: IndexSet<usize>,
    pub(crate) initialized: [bool; MAX_PATTERNS],
    pub(crate) max_level: usize,
    pub(crate) max_refinement_level: usize,
    pub(crate) refinement_buffer: usize,
}

impl BackgroundMesh
{
    ///
    /// Builds the level-zero cells, padding included. Every pattern named by the
    /// parameters starts out as the unrefined base mesh.
    ///
    pub fn new(parameters: &Parameters, rank_count: usize) -> Result<Self, HMRError>
    {
        parameters.validate()?;
        let dim = parameters.dimension();
        let padding = parameters.padding_size as u32;
        let mut domain_cells = [1; 3];
        let mut base_cells = [1; 3];
        let mut domain = BoundingBox::default();
        for d in 0..dim
        {
            domain_cells[d] = parameters.number_of_elements_per_dimension[d] as u32;
            base_cells[d] = domain_cells[d] + 2 * padding;
            domain.lower[d] = parameters.domain_offset[d];
            domain.upper[d] = parameters.domain_offset[d] + parameters.domain_dimensions[d];
        }
        let mut mesh = Self {
            dim,
            padding,
            domain_cells,
            base_cells,
            domain,
            cells: Vec::with_capacity((base_cells[0] * base_cells[1] * base_cells[2]) as usize),
            lookup: FxHashMap::default(),
            queue: IndexSet::new(),
            initialized: [false; MAX_PATTERNS],
            max_level: 0,
            max_refinement_level: parameters.max_refinement_level,
            refinement_buffer: parameters.refinement_buffer,
        };
        let rank_count = rank_count.max(1) as u32;
        for k in 0..base_cells[2]
        {
            for j in 0..base_cells[1]
            {
                for i in 0..base_cells[0]
                {
                    let ijk = [i, j, k];
                    let padding_cell = (0..dim).any(|d| ijk[d] < padding || ijk[d] >= padding + domain_cells[d]);
                    // slab decomposition along the first axis
                    let i_domain = i.clamp(padding, padding + domain_cells[0] - 1) - padding;
                    let owner = i_domain * rank_count / domain_cells[0];
                    let index = mesh.cells.len();
                    mesh.cells.push(Cell::new(index, 0, ijk, None, owner, padding_cell));
                    mesh.lookup.insert((0, ijk), index);
                }
            }
        }
        for pattern in parameters.used_patterns()
        {
            mesh.reset_pattern(pattern);
        }
        Ok(mesh)
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.dim
    }

    #[inline]
    pub fn padding_size(&self) -> usize
    {
        self.padding as usize
    }

    #[inline]
    pub fn domain(&self) -> &BoundingBox
    {
        &self.domain
    }

    #[inline]
    pub fn number_of_cells(&self) -> usize
    {
        self.cells.len()
    }

    #[inline]
    pub fn cell(&self, index: usize) -> &Cell
    {
        &self.cells[index]
    }

    #[inline]
    pub fn cells(&self) -> &[Cell]
    {
        &self.cells
    }

    /// Highest level on which cells were allocated.
    #[inline]
    pub fn max_level(&self) -> usize
    {
        self.max_level
    }

    #[inline]
    pub fn max_refinement_level(&self) -> usize
    {
        self.max_refinement_level
    }

    #[inline]
    pub fn number_of_pending_flags(&self) -> usize
    {
        self.queue.len()
    }

    ///
    /// Cells per axis on a level, padding included.
    ///
    #[inline]
    pub fn cells_per_axis(&self, level: usize) -> [u32; 3]
    {
        let mut r = self.base_cells;
        for value in r.iter_mut().take(self.dim)
        {
            *value <<= level;
        }
        r
    }

    #[inline]
    pub fn is_initialized(&self, pattern: Pattern) -> bool
    {
        pattern.index() < MAX_PATTERNS && self.initialized[pattern.index()]
    }

    #[inline]
    pub(crate) fn check_pattern(&self, pattern: Pattern)
    {
        assert!(self.is_initialized(pattern), "pattern {} was queried before it was initialized; a refinement or finalize step is missing", pattern.0);
    }

    ///
    /// State of a cell on a pattern. Querying a pattern that was never initialized is
    /// an internal-consistency error and panics.
    ///
    #[inline]
    pub fn state(&self, cell: usize, pattern: Pattern) -> ElementState
    {
        self.check_pattern(pattern);
        self.cells[cell].state(pattern)
    }

    #[inline]
    pub fn is_active(&self, cell: usize, pattern: Pattern) -> bool
    {
        self.state(cell, pattern) == ElementState::Active
    }

    #[inline]
    pub fn is_refined(&self, cell: usize, pattern: Pattern) -> bool
    {
        self.state(cell, pattern) == ElementState::Refined
    }

    #[inline]
    pub fn is_padding(&self, cell: usize) -> bool
    {
        self.cells[cell].is_padding()
    }

    #[inline]
    pub fn cell_at(&self, level: usize, ijk: [u32; 3]) -> Option<usize>
    {
        self.lookup.get(&(level as u8, ijk)).copied()
    }

    ///
    /// Cell at a possibly out-of-range position on a level. `None` outside the grid or
    /// where no cell was allocated yet.
    ///
    pub fn cell_at_position(&self, level: usize, position: [i64; 3]) -> Option<usize>
    {
        self.position_in_grid(level, position).and_then(|ijk| self.cell_at(level, ijk))
    }

    pub(crate) fn position_in_grid(&self, level: usize, position: [i64; 3]) -> Option<[u32; 3]>
    {
        let size = self.cells_per_axis(level);
        let mut ijk = [0; 3];
        for d in 0..self.dim
        {
            if position[d] < 0 || position[d] >= size[d] as i64
            {
                return None;
            }
            ijk[d] = position[d] as u32;
        }
        Some(ijk)
    }

    /// Same-level neighbor at an offset.
    pub fn neighbor(&self, cell: usize, offset: [i64; 3]) -> Option<usize>
    {
        let c = &self.cells[cell];
        let mut position = [0_i64; 3];
        for d in 0..self.dim
        {
            position[d] = c.ijk[d] as i64 + offset[d];
        }
        self.cell_at_position(c.level(), position)
    }

    ///
    /// Dyadic position of a cell inside its parent (bit `d` set for the upper half on axis `d`).
    ///
    #[inline]
    pub fn child_position(&self, cell: usize) -> usize
    {
        let ijk = self.cells[cell].ijk;
        (0..self.dim).map(|d| ((ijk[d] & 1) as usize) << d).sum()
    }

    pub fn ancestor_at_level(&self, cell: usize, level: usize) -> usize
    {
        let mut current = cell;
        while self.cells[current].level() > level
        {
            current = self.cells[current].parent.expect("cell above level zero without parent");
        }
        current
    }

    ///
    /// Closest cell strictly coarser than `level` that covers the level position `ijk` and
    /// exists on `pattern`, together with its level.
    ///
    pub fn nearest_existing_ancestor(&self, level: usize, ijk: [u32; 3], pattern: Pattern) -> Option<(usize, usize)>
    {
        for coarse in (0..level).rev()
        {
            let shift = level - coarse;
            let mut position = ijk;
            for value in position.iter_mut().take(self.dim)
            {
                *value >>= shift;
            }
            if let Some(cell) = self.cell_at(coarse, position)
            {
                if self.cells[cell].state(pattern).exists()
                {
                    return Some((cell, coarse));
                }
            }
        }
        None
    }

    ///
    /// Memory indices of the cell and its ancestors, from the cell down to level zero.
    ///
    pub fn ancestor_chain(&self, cell: usize) -> Vec<usize>
    {
        let mut chain = Vec::with_capacity(self.cells[cell].level() + 1);
        let mut current = Some(cell);
        while let Some(index) = current
        {
            chain.push(index);
            current = self.cells[index].parent;
        }
        chain
    }

    ///
    /// Active leaves of the physical domain on a pattern, in memory order.
    ///
    pub fn active_cells(&self, pattern: Pattern) -> Vec<usize>
    {
        self.check_pattern(pattern);
        self.cells.iter()
            .filter(|cell| cell.state(pattern) == ElementState::Active)
            .map(|cell| cell.memory_index)
            .collect()
    }

    pub fn number_of_active_cells(&self, pattern: Pattern) -> usize
    {
        self.check_pattern(pattern);
        self.cells.iter().filter(|cell| cell.state(pattern) == ElementState::Active).count()
    }

    pub fn owned_active_cells(&self, pattern: Pattern, rank: usize) -> Vec<usize>
    {
        self.active_cells(pattern).into_iter().filter(|&cell| self.cells[cell].owner() == rank).collect()
    }

    ///
    /// Marks a cell for the next `perform_refinement` on `pattern`. Cells already refined
    /// on that pattern are ignored.
    ///
    pub fn flag_for_refinement(&mut self, cell: usize, pattern: Pattern)
    {
        if self.state(cell, pattern) == ElementState::Refined
        {
            return;
        }
        self.push_flag(cell);
    }

    #[inline]
    pub(crate) fn push_flag(&mut self, cell: usize)
    {
        self.cells[cell].flags.set_flagged(true);
        self.queue.insert(cell);
    }

    ///
    /// Refines every flagged cell on `pattern` and repeats until the buffer and padding
    /// constraints add no more flags. Returns the number of refined cells.
    ///
    pub fn perform_refinement(&mut self, pattern: Pattern) -> Result<usize, HMRError>
    {
        self.check_pattern(pattern);
        refinement::refine_pattern(self, pattern)
    }

    ///
    /// Allocates the children of a cell if needed, marks the cell refined and its
    /// children leaves on `pattern`.
    ///
    pub(crate) fn refine_cell(&mut self, cell: usize, pattern: Pattern)
    {
        let first_child = match self.cells[cell].first_child
        {
            Some(first) => first,
            None => self.allocate_children(cell),
        };
        self.cells[cell].set_state(pattern, ElementState::Refined);
        for position in 0..number_of_children(self.dim)
        {
            let child = first_child + position;
            let state = self.cells[child].leaf_state();
            self.cells[child].set_state(pattern, state);
        }
    }

    fn allocate_children(&mut self, cell: usize) -> usize
    {
        let first = self.cells.len();
        let parent = &self.cells[cell];
        let (level, ijk, owner, padding) = (parent.level + 1, parent.ijk, parent.owner, parent.is_padding());
        for position in 0..number_of_children(self.dim)
        {
            let mut child_ijk = [0; 3];
            for d in 0..self.dim
            {
                child_ijk[d] = 2 * ijk[d] + ((position >> d) & 1) as u32;
            }
            let index = self.cells.len();
            self.cells.push(Cell::new(index, level, child_ijk, Some(cell), owner, padding));
            self.lookup.insert((level, child_ijk), index);
        }
        self.cells[cell].first_child = Some(first);
        self.max_level = self.max_level.max(level as usize);
        first
    }

    ///
    /// Reverts a refined cell whose children are all leaves. The children keep their
    /// ancestry and become deactive on `pattern`.
    ///
    pub fn coarsen(&mut self, cell: usize, pattern: Pattern) -> bool
    {
        if self.state(cell, pattern) != ElementState::Refined
        {
            return false;
        }
        let Some(first) = self.cells[cell].first_child else
        {
            return false;
        };
        let children = first..first + number_of_children(self.dim);
        if children.clone().any(|child| !self.cells[child].state(pattern).is_leaf())
        {
            return false;
        }
        for child in children
        {
            self.cells[child].set_state(pattern, ElementState::Deactive);
        }
        let state = self.cells[cell].leaf_state();
        self.cells[cell].set_state(pattern, state);
        true
    }

    pub fn copy_pattern(&mut self, source: Pattern, target: Pattern)
    {
        self.check_pattern(source);
        for cell in self.cells.iter_mut()
        {
            let state = cell.state(source);
            cell.set_state(target, state);
        }
        self.initialized[target.index()] = true;
    }

    pub fn unite_patterns(&mut self, first: Pattern, second: Pattern, target: Pattern)
    {
        self.check_pattern(first);
        self.check_pattern(second);
        for cell in self.cells.iter_mut()
        {
            let state = cell.state(first).unite(cell.state(second));
            cell.set_state(target, state);
        }
        self.initialized[target.index()] = true;
    }

    ///
    /// Deactivates every cell on `pattern`; level-zero cells return to their base state so
    /// the pattern describes the unrefined mesh.
    ///
    pub fn reset_pattern(&mut self, pattern: Pattern)
    {
        assert!(pattern.index() < MAX_PATTERNS, "pattern {} is out of range", pattern.0);
        for cell in self.cells.iter_mut()
        {
            let state = if cell.level == 0 { cell.leaf_state() } else { ElementState::Deactive };
            cell.set_state(pattern, state);
        }
        self.initialized[pattern.index()] = true;
    }

    ///
    /// Physical coordinate of a point given in cell units of `level`, padding included.
    ///
    pub fn to_real_coordinate(&self, level: usize, point: &[f64; 3]) -> [f64; 3]
    {
        let scale = (1_u64 << level) as f64;
        let mut unit = [0.0; 3];
        for d in 0..self.dim
        {
            unit[d] = (point[d] / scale - self.padding as f64) / self.domain_cells[d] as f64;
        }
        let mut real = self.domain.to_real_coordinate(&unit);
        for value in real.iter_mut().skip(self.dim)
        {
            *value = 0.0;
        }
        real
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn mesh_2d(elements: usize) -> BackgroundMesh
    {
        let parameters = Parameters {
            number_of_elements_per_dimension: vec![elements, elements],
            padding_size: 1,
            ..Default::default()
        };
        BackgroundMesh::new(&parameters, 1).unwrap()
    }

    #[test]
    fn base_mesh_has_padding()
    {
        let mesh = mesh_2d(2);
        assert_eq!(mesh.number_of_cells(), 16);
        assert_eq!(mesh.number_of_active_cells(Pattern::OUTPUT), 4);
        let corner = mesh.cell_at(0, [0, 0, 0]).unwrap();
        assert!(mesh.is_padding(corner));
        assert_eq!(mesh.state(corner, Pattern::OUTPUT), ElementState::Padding);
        let inner = mesh.cell_at(0, [1, 1, 0]).unwrap();
        assert!(mesh.is_active(inner, Pattern::INPUT));
    }

    #[test]
    #[should_panic(expected = "initialized")]
    fn uninitialized_pattern_panics()
    {
        let mesh = mesh_2d(1);
        mesh.state(0, Pattern(5));
    }

    #[test]
    fn refine_cell_creates_children()
    {
        let mut mesh = mesh_2d(1);
        let cell = mesh.cell_at(0, [1, 1, 0]).unwrap();
        mesh.refine_cell(cell, Pattern::OUTPUT);
        assert!(mesh.is_refined(cell, Pattern::OUTPUT));
        assert_eq!(mesh.max_level(), 1);
        for position in 0..4
        {
            let child = mesh.cell(cell).child(position).unwrap();
            assert_eq!(mesh.child_position(child), position);
            assert_eq!(mesh.cell(child).parent(), Some(cell));
            assert!(mesh.is_active(child, Pattern::OUTPUT));
            // other patterns do not see the children
            assert_eq!(mesh.state(child, Pattern::INPUT), ElementState::Deactive);
        }
        let child = mesh.cell_at(1, [3, 2, 0]).unwrap();
        assert_eq!(mesh.ancestor_at_level(child, 0), cell);
        assert_eq!(mesh.ancestor_chain(child), vec![child, cell]);
    }

    #[test]
    fn copy_unite_reset_patterns()
    {
        let mut mesh = mesh_2d(2);
        let first = mesh.cell_at(0, [1, 1, 0]).unwrap();
        let second = mesh.cell_at(0, [2, 2, 0]).unwrap();
        mesh.refine_cell(first, Pattern::INPUT);
        mesh.refine_cell(second, Pattern::OUTPUT);
        mesh.unite_patterns(Pattern::INPUT, Pattern::OUTPUT, Pattern::UNION);
        assert!(mesh.is_refined(first, Pattern::UNION));
        assert!(mesh.is_refined(second, Pattern::UNION));
        assert_eq!(mesh.number_of_active_cells(Pattern::UNION), 2 + 8);

        mesh.copy_pattern(Pattern::INPUT, Pattern(4));
        assert!(mesh.is_refined(first, Pattern(4)));
        assert!(mesh.is_active(second, Pattern(4)));

        mesh.reset_pattern(Pattern::UNION);
        assert_eq!(mesh.number_of_active_cells(Pattern::UNION), 4);
        assert!(mesh.is_active(first, Pattern::UNION));
    }

    #[test]
    fn coarsen_restores_leaf()
    {
        let mut mesh = mesh_2d(1);
        let cell = mesh.cell_at(0, [1, 1, 0]).unwrap();
        mesh.refine_cell(cell, Pattern::OUTPUT);
        assert!(mesh.coarsen(cell, Pattern::OUTPUT));
        assert!(mesh.is_active(cell, Pattern::OUTPUT));
        let child = mesh.cell(cell).child(0).unwrap();
        assert_eq!(mesh.state(child, Pattern::OUTPUT), ElementState::Deactive);
        // children are kept for later refinements
        assert_eq!(mesh.number_of_cells(), 9 + 4);
        assert!(!mesh.coarsen(cell, Pattern::OUTPUT));
    }

    #[test]
    fn real_coordinates_skip_padding()
    {
        let mesh = mesh_2d(2);
        let lower = mesh.to_real_coordinate(0, &[1.0, 1.0, 0.0]);
        assert!((lower[0]).abs() < 1e-14 && (lower[1]).abs() < 1e-14);
        let upper = mesh.to_real_coordinate(1, &[6.0, 6.0, 0.0]);
        assert!((upper[0] - 1.0).abs() < 1e-14 && (upper[1] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn slab_owners()
    {
        let parameters = Parameters { number_of_elements_per_dimension: vec![4, 2], padding_size: 1, ..Default::default() };
        let mesh = BackgroundMesh::new(&parameters, 2).unwrap();
        assert_eq!(mesh.cell(mesh.cell_at(0, [0, 1, 0]).unwrap()).owner(), 0);
        assert_eq!(mesh.cell(mesh.cell_at(0, [2, 1, 0]).unwrap()).owner(), 0);
        assert_eq!(mesh.cell(mesh.cell_at(0, [3, 1, 0]).unwrap()).owner(), 1);
        assert_eq!(mesh.cell(mesh.cell_at(0, [5, 1, 0]).unwrap()).owner(), 1);
    }
}
