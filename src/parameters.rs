use serde::{Deserialize, Serialize};

use crate::errors::HMRError;
use crate::storage::cell::{Pattern, MAX_PATTERNS};

///
/// A spline/nodal mesh combination for which T-matrices are evaluated.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPairParameters
{
    pub spline_order: usize,
    pub spline_pattern: Pattern,
    pub nodal_order: usize,
    pub nodal_pattern: Pattern,
}

impl Default for MeshPairParameters
{
    fn default() -> Self {
        Self { spline_order: 1, spline_pattern: Pattern::OUTPUT, nodal_order: 1, nodal_pattern: Pattern::OUTPUT }
    }
}

///
/// Configuration of the background mesh, the basis meshes and the engines.
/// Parsing is left to the caller; any serde format works.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters
{
    /// Domain cells on level zero per axis, padding excluded. Its length sets the dimension.
    pub number_of_elements_per_dimension: Vec<usize>,
    /// Physical extent of the domain per axis.
    pub domain_dimensions: Vec<f64>,
    /// Physical position of the lower domain corner.
    pub domain_offset: Vec<f64>,
    /// Layers of padding cells around the domain. Must cover the highest spline order.
    pub padding_size: usize,
    /// Chebyshev distance of same-level neighbors that must exist before a cell is refined.
    pub refinement_buffer: usize,
    /// Cells on this level are never refined.
    pub max_refinement_level: usize,
    pub truncate: bool,
    pub mesh_pairs: Vec<MeshPairParameters>,
}

impl Default for Parameters
{
    fn default() -> Self {
        Self {
            number_of_elements_per_dimension: vec![2, 2],
            domain_dimensions: vec![1.0, 1.0],
            domain_offset: vec![0.0, 0.0],
            padding_size: 3,
            refinement_buffer: 1,
            max_refinement_level: 6,
            truncate: true,
            mesh_pairs: vec![MeshPairParameters::default()],
        }
    }
}

impl Parameters
{
    pub fn dimension(&self) -> usize
    {
        self.number_of_elements_per_dimension.len()
    }

    pub fn max_spline_order(&self) -> usize
    {
        self.mesh_pairs.iter().map(|pair| pair.spline_order).max().unwrap_or(1)
    }

    ///
    /// Patterns referenced by the mesh pairs plus the named patterns, deduplicated and sorted.
    ///
    pub fn used_patterns(&self) -> Vec<Pattern>
    {
        let mut patterns = vec![Pattern::INPUT, Pattern::OUTPUT, Pattern::UNION, Pattern::WORKING];
        for pair in &self.mesh_pairs
        {
            patterns.push(pair.spline_pattern);
            patterns.push(pair.nodal_pattern);
        }
        patterns.sort();
        patterns.dedup();
        patterns
    }

    pub fn validate(&self) -> Result<(), HMRError>
    {
        let dim = self.dimension();
        if !(2..=3).contains(&dim)
        {
            return Err(HMRError::UnsupportedDimension(dim));
        }
        if self.domain_dimensions.len() != dim || self.domain_offset.len() != dim
        {
            return Err(HMRError::InvalidParameters("domain dimensions and offset must match the number of axes"));
        }
        if self.number_of_elements_per_dimension.contains(&0)
        {
            return Err(HMRError::InvalidParameters("every axis needs at least one element"));
        }
        if self.domain_dimensions.iter().any(|&width| width <= 0.0)
        {
            return Err(HMRError::InvalidParameters("domain dimensions must be positive"));
        }
        if self.mesh_pairs.is_empty()
        {
            return Err(HMRError::InvalidParameters("at least one mesh pair is required"));
        }
        for pair in &self.mesh_pairs
        {
            for order in [pair.spline_order, pair.nodal_order]
            {
                if !(1..=3).contains(&order)
                {
                    return Err(HMRError::UnsupportedOrder(order));
                }
            }
            for pattern in [pair.spline_pattern, pair.nodal_pattern]
            {
                if pattern.index() >= MAX_PATTERNS
                {
                    return Err(HMRError::InvalidPattern(pattern.index()));
                }
            }
        }
        if self.padding_size < self.max_spline_order()
        {
            return Err(HMRError::InvalidParameters("padding must cover the highest spline order"));
        }
        if !self.coordinates_fit()
        {
            return Err(HMRError::InvalidParameters("maximum refinement level too large for 32-bit cell coordinates"));
        }
        Ok(())
    }

    // Node keys on the finest level reach `cells * order + order` per axis.
    fn coordinates_fit(&self) -> bool
    {
        const NODES_PER_CELL: u128 = 4;
        if self.max_refinement_level >= u32::BITS as usize
        {
            return false;
        }
        self.number_of_elements_per_dimension.iter().all(|&elements|
        {
            let cells = elements as u128 + 2 * self.padding_size as u128;
            (cells << self.max_refinement_level) * NODES_PER_CELL <= u32::MAX as u128
        })
    }
}
