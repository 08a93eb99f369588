use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::storage::background_mesh::BackgroundMesh;
use crate::storage::basis::BasisKey;
use crate::storage::basis_mesh::normalize_node;
use crate::storage::cell::{ElementState, Pattern};
use crate::utilities::multi_index::{child_bits, number_of_children};

///
/// Face between two active leaves, or between a leaf and the domain boundary.
/// `side` is `2 * axis + direction` seen from the leader.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet
{
    pub leader: usize,
    pub follower: Option<usize>,
    pub side: u8,
    /// The follower is coarser than the leader.
    pub hanging: bool,
}

impl Facet
{
    #[inline]
    pub fn is_boundary(&self) -> bool
    {
        self.follower.is_none()
    }
}

/// Edge of the 3-D mesh between two corner nodes, with the leaves sharing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge
{
    pub corners: [BasisKey; 2],
    pub cells: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Connectivity
{
    pub facets: Vec<Facet>,
    pub edges: Vec<Edge>,
}

impl Connectivity
{
    pub fn build(background: &BackgroundMesh, pattern: Pattern) -> Self
    {
        let leaves = background.active_cells(pattern);
        let facets = build_facets(background, pattern, &leaves);
        let edges = if background.dim() == 3 { build_edges(background, &leaves) } else { Vec::new() };
        log::debug!("pattern {}: {} facets, {} edges", pattern.0, facets.len(), edges.len());
        Self { facets, edges }
    }
}

fn build_facets(background: &BackgroundMesh, pattern: Pattern, leaves: &[usize]) -> Vec<Facet>
{
    let dim = background.dim();
    let mut facets = Vec::new();
    for &leaf in leaves
    {
        let cell = background.cell(leaf);
        let level = cell.level();
        for side in 0..2 * dim
        {
            let mut offset = [0_i64; 3];
            offset[side / 2] = if side % 2 == 0 { -1 } else { 1 };
            let mut position = [0_i64; 3];
            for d in 0..dim
            {
                position[d] = cell.ijk()[d] as i64 + offset[d];
            }
            let Some(ijk) = background.position_in_grid(level, position) else
            {
                facets.push(Facet { leader: leaf, follower: None, side: side as u8, hanging: false });
                continue;
            };
            let same_level = background.cell_at(level, ijk).filter(|&neighbor| background.state(neighbor, pattern).exists());
            let (neighbor, hanging) = match same_level
            {
                Some(neighbor) => (neighbor, false),
                None => match background.nearest_existing_ancestor(level, ijk, pattern)
                {
                    Some((ancestor, _)) => (ancestor, true),
                    None => continue,
                },
            };
            if background.is_padding(neighbor)
            {
                facets.push(Facet { leader: leaf, follower: None, side: side as u8, hanging: false });
                continue;
            }
            match background.state(neighbor, pattern)
            {
                // finer leaves on the other side own the facet
                ElementState::Refined => {}
                ElementState::Active if hanging || leaf < neighbor =>
                {
                    facets.push(Facet { leader: leaf, follower: Some(neighbor), side: side as u8, hanging });
                }
                _ => {}
            }
        }
    }
    facets
}

fn build_edges(background: &BackgroundMesh, leaves: &[usize]) -> Vec<Edge>
{
    let mut edges: IndexMap<(BasisKey, BasisKey), Vec<usize>> = IndexMap::new();
    for &leaf in leaves
    {
        let cell = background.cell(leaf);
        let corner = |position: usize| -> BasisKey
        {
            let bits = child_bits(position, 3);
            let ijk = cell.ijk();
            normalize_node(cell.level() as u8, [ijk[0] + bits[0], ijk[1] + bits[1], ijk[2] + bits[2]], 3)
        };
        for start in 0..number_of_children(3)
        {
            for axis in 0..3
            {
                if start & (1 << axis) != 0
                {
                    continue;
                }
                let (a, b) = (corner(start), corner(start | (1 << axis)));
                let key = if a <= b { (a, b) } else { (b, a) };
                edges.entry(key).or_default().push(leaf);
            }
        }
    }
    edges.into_iter().map(|((first, second), cells)| Edge { corners: [first, second], cells }).collect()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::parameters::Parameters;

    fn background(elements: Vec<usize>) -> BackgroundMesh
    {
        let dim = elements.len();
        let parameters = Parameters {
            number_of_elements_per_dimension: elements,
            domain_dimensions: vec![1.0; dim],
            domain_offset: vec![0.0; dim],
            padding_size: 1,
            ..Default::default()
        };
        BackgroundMesh::new(&parameters, 1).unwrap()
    }

    #[test]
    fn uniform_facets()
    {
        let mesh = background(vec![2, 2]);
        let connectivity = Connectivity::build(&mesh, Pattern::OUTPUT);
        assert_eq!(connectivity.facets.len(), 12);
        assert_eq!(connectivity.facets.iter().filter(|facet| facet.is_boundary()).count(), 8);
        assert!(connectivity.edges.is_empty());
    }

    #[test]
    fn hanging_facets_are_owned_by_fine_cells()
    {
        let mut mesh = background(vec![2, 2]);
        let cell = mesh.cell_at(0, [1, 1, 0]).unwrap();
        mesh.flag_for_refinement(cell, Pattern::OUTPUT);
        mesh.perform_refinement(Pattern::OUTPUT).unwrap();
        let connectivity = Connectivity::build(&mesh, Pattern::OUTPUT);
        let facets = &connectivity.facets;
        assert_eq!(facets.len(), 20);
        assert_eq!(facets.iter().filter(|facet| facet.is_boundary()).count(), 10);
        let hanging: Vec<&Facet> = facets.iter().filter(|facet| facet.hanging).collect();
        assert_eq!(hanging.len(), 4);
        for facet in hanging
        {
            assert_eq!(mesh.cell(facet.leader).level(), 1);
            assert_eq!(mesh.cell(facet.follower.unwrap()).level(), 0);
        }
    }

    #[test]
    fn edges_are_shared()
    {
        let single = background(vec![1, 1, 1]);
        assert_eq!(Connectivity::build(&single, Pattern::OUTPUT).edges.len(), 12);
        let pair = background(vec![2, 1, 1]);
        let edges = Connectivity::build(&pair, Pattern::OUTPUT).edges;
        assert_eq!(edges.len(), 20);
        assert_eq!(edges.iter().filter(|edge| edge.cells.len() == 2).count(), 4);
        let facets = Connectivity::build(&pair, Pattern::OUTPUT).facets;
        assert_eq!(facets.len(), 11);
    }
}
