use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};

use super::cell::{Pattern, MAX_PATTERNS};

/// Basis lookup key: creation level and global index on that level.
pub type BasisKey = (u8, [u32; 3]);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BasisState
{
    #[default]
    Deactive = 0,
    Active = 1,
    Refined = 2,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct BasisFlags
{
    /// Referenced by at least one T-matrix of the last finalize.
    pub used: bool,
    #[bits(7)]
    pub _empty: u8
}

///
/// One row of a T-matrix stored on a nodal basis: the node's value is
/// `Σ weights[i] * coefficient(bases[i])`. Indices are memory indices of the spline mesh.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpolationRecord
{
    pub bases: Vec<usize>,
    pub weights: Vec<f64>,
}

impl InterpolationRecord
{
    #[inline]
    pub fn len(&self) -> usize
    {
        self.bases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.bases.is_empty()
    }

    /// Interpolated value for spline coefficients given by memory index.
    pub fn interpolate(&self, coefficients: &[f64]) -> f64
    {
        self.bases.iter().zip(&self.weights).map(|(&basis, weight)| weight * coefficients[basis]).sum()
    }
}

#[derive(Clone, Debug)]
pub struct Basis
{
    pub(crate) memory_index: usize,
    pub(crate) level: u8,
    pub(crate) key: [u32; 3],
    pub(crate) owner: u32,
    pub(crate) states: [BasisState; MAX_PATTERNS],
    pub(crate) parents: Vec<usize>,
    pub(crate) parent_weights: Vec<f64>,
    pub(crate) children: Vec<usize>,
    pub(crate) external_id: Option<usize>,
    pub(crate) flags: BasisFlags,
    pub(crate) interpolation: Vec<InterpolationRecord>,
}

impl Basis
{
    pub fn new(memory_index: usize, level: u8, key: [u32; 3], owner: u32) -> Self
    {
        Self {
            memory_index,
            level,
            key,
            owner,
            states: [BasisState::Deactive; MAX_PATTERNS],
            parents: Vec::new(),
            parent_weights: Vec::new(),
            children: Vec::new(),
            external_id: None,
            flags: BasisFlags::new(),
            interpolation: Vec::new(),
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
    pub fn key(&self) -> [u32; 3]
    {
        self.key
    }

    #[inline]
    pub fn owner(&self) -> usize
    {
        self.owner as usize
    }

    #[inline]
    pub fn state(&self, pattern: Pattern) -> BasisState
    {
        self.states[pattern.index()]
    }

    #[inline]
    pub fn is_used(&self) -> bool
    {
        self.flags.used()
    }

    #[inline]
    pub fn external_id(&self) -> Option<usize>
    {
        self.external_id
    }

    #[inline]
    pub fn parents(&self) -> &[usize]
    {
        &self.parents
    }

    #[inline]
    pub fn parent_weights(&self) -> &[f64]
    {
        &self.parent_weights
    }

    #[inline]
    pub fn children(&self) -> &[usize]
    {
        &self.children
    }

    ///
    /// Interpolation record for the spline mesh linked at `slot`. Only meaningful on
    /// nodal bases after finalize.
    ///
    #[inline]
    pub fn interpolation(&self, slot: usize) -> Option<&InterpolationRecord>
    {
        self.interpolation.get(slot)
    }
}

#[test]
fn check_interpolation_record()
{
    let record = InterpolationRecord { bases: vec![2, 0], weights: vec![0.25, 0.75] };
    assert_eq!(record.len(), 2);
    assert!((record.interpolate(&[4.0, 0.0, 8.0]) - 5.0).abs() < 1e-15);
    assert!(InterpolationRecord::default().is_empty());
}
