use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};

/// Number of independent refinement patterns carried by every cell and basis.
pub const MAX_PATTERNS: usize = 8;

///
/// Selects one of the orthogonal state assignments over the cell set. Switching
/// patterns never touches geometry, only which state slot is read or written.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pattern(pub u8);

impl Pattern
{
    pub const INPUT: Pattern = Pattern(0);
    pub const OUTPUT: Pattern = Pattern(1);
    pub const UNION: Pattern = Pattern(2);
    pub const WORKING: Pattern = Pattern(7);

    #[inline]
    pub fn index(&self) -> usize
    {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementState
{
    #[default]
    Deactive = 0,
    Active = 1,
    Refined = 2,
    /// Leaf outside the physical domain, kept so boundary splines have full support.
    Padding = 3,
}

impl ElementState
{
    /// Active or padding leaf.
    #[inline]
    pub fn is_leaf(&self) -> bool
    {
        matches!(self, ElementState::Active | ElementState::Padding)
    }

    /// Present in the pattern, either as a leaf or refined.
    #[inline]
    pub fn exists(&self) -> bool
    {
        *self != ElementState::Deactive
    }

    ///
    /// Logical OR of two pattern states: refinement wins over leaves, leaves over
    /// deactive cells.
    ///
    pub fn unite(self, other: ElementState) -> ElementState
    {
        use ElementState::*;
        match (self, other)
        {
            (Refined, _) | (_, Refined) => Refined,
            (Padding, _) | (_, Padding) => Padding,
            (Active, _) | (_, Active) => Active,
            _ => Deactive,
        }
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct CellFlags
{
    /// Member of the pending refinement queue.
    pub flagged: bool,
    /// Lies outside the physical domain.
    pub padding: bool,
    #[bits(6)]
    pub _empty: u8
}

///
/// One cell of the dyadic tree. Parent and children are indices into the arena
/// owned by the background mesh; the `2^d` children are stored contiguously.
///
#[derive(Clone, Debug)]
pub struct Cell
{
    pub(crate) memory_index: usize,
    pub(crate) level: u8,
    pub(crate) ijk: [u32; 3],
    pub(crate) parent: Option<usize>,
    pub(crate) first_child: Option<usize>,
    pub(crate) owner: u32,
    pub(crate) states: [ElementState; MAX_PATTERNS],
    pub(crate) flags: CellFlags,
}

impl Cell
{
    pub fn new(memory_index: usize, level: u8, ijk: [u32; 3], parent: Option<usize>, owner: u32, padding: bool) -> Self
    {
        Self {
            memory_index,
            level,
            ijk,
            parent,
            first_child: None,
            owner,
            states: [ElementState::Deactive; MAX_PATTERNS],
            flags: CellFlags::new().with_padding(padding),
        }
    }

    #[inline]
    pub fn memory_index(&self) -> usize
    {
        self.memory_index
    }

    #[inline]
    pub fn level(&self) -> usize
    {
        self.level as usize
    }

    #[inline]
    pub fn ijk(&self) -> [u32; 3]
    {
        self.ijk
    }

    #[inline]
    pub fn parent(&self) -> Option<usize>
    {
        self.parent
    }

    #[inline]
    pub fn owner(&self) -> usize
    {
        self.owner as usize
    }

    #[inline]
    pub fn is_padding(&self) -> bool
    {
        self.flags.padding()
    }

    #[inline]
    pub fn is_flagged(&self) -> bool
    {
        self.flags.flagged()
    }

    #[inline]
    pub fn has_children(&self) -> bool
    {
        self.first_child.is_some()
    }

    ///
    /// Memory index of the child at the given dyadic position, if children were allocated.
    ///
    #[inline]
    pub fn child(&self, position: usize) -> Option<usize>
    {
        self.first_child.map(|first| first + position)
    }

    /// State on a pattern; the background mesh checks that the pattern is initialized.
    #[inline]
    pub(crate) fn state(&self, pattern: Pattern) -> ElementState
    {
        self.states[pattern.index()]
    }

    #[inline]
    pub(crate) fn set_state(&mut self, pattern: Pattern, state: ElementState)
    {
        self.states[pattern.index()] = state;
    }

    /// State a leaf of this cell takes on a pattern.
    #[inline]
    pub(crate) fn leaf_state(&self) -> ElementState
    {
        if self.is_padding() { ElementState::Padding } else { ElementState::Active }
    }
}

#[test]
fn check_unite_states()
{
    use ElementState::*;
    assert_eq!(Active.unite(Refined), Refined);
    assert_eq!(Deactive.unite(Active), Active);
    assert_eq!(Padding.unite(Deactive), Padding);
    assert_eq!(Deactive.unite(Deactive), Deactive);
}

#[test]
fn check_cell_flags()
{
    let mut cell = Cell::new(0, 0, [1, 2, 0], None, 0, true);
    assert!(cell.is_padding());
    assert!(!cell.is_flagged());
    cell.flags.set_flagged(true);
    assert!(cell.is_flagged() && cell.is_padding());
    assert_eq!(cell.leaf_state(), ElementState::Padding);
}
