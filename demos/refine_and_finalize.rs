use hmesh::{errors::HMRError, storage::basis_mesh::BasisMeshKind, Database, Parameters, Pattern};

// Refines a 2-D mesh around a circle, finalizes it and reports the resulting bases.
fn main() -> Result<(), HMRError>
{
    let parameters: Parameters = serde_json::from_str(r#"{
        "number_of_elements_per_dimension": [8, 8],
        "domain_dimensions": [2.0, 2.0],
        "domain_offset": [-1.0, -1.0],
        "padding_size": 2,
        "max_refinement_level": 3,
        "mesh_pairs": [{ "spline_order": 2, "spline_pattern": 1, "nodal_order": 2, "nodal_pattern": 1 }]
    }"#).map_err(|_| HMRError::InvalidParameters("could not parse the demo parameters"))?;

    let mut database = Database::serial(parameters)?;
    for _ in 0..3
    {
        let flagged = database.flag_cells(Pattern::OUTPUT, |_, x| ((x[0] * x[0] + x[1] * x[1]).sqrt() - 0.6).abs() < 0.2)?;
        let refined = database.perform_refinement(Pattern::OUTPUT)?;
        println!("flagged {flagged} cells, refined {refined}");
    }
    database.finalize();

    let splines = database.get_mesh_by_index(BasisMeshKind::Spline, 2, Pattern::OUTPUT).ok_or(HMRError::InvalidIndex)?;
    let nodes = database.get_mesh_by_index(BasisMeshKind::Nodal, 2, Pattern::OUTPUT).ok_or(HMRError::InvalidIndex)?;
    let splines = database.mesh(splines)?;
    let nodes = database.mesh(nodes)?;
    println!("{} active leaves", database.background().number_of_active_cells(Pattern::OUTPUT));
    println!("{} of {} splines used, {} active nodes", splines.number_of_used_bases(), splines.number_of_bases(), nodes.number_of_active_bases());
    println!("{} facets", database.facets()?.len());

    // constant spline coefficients give the same constant at every node
    let coefficients = vec![1.5; splines.number_of_bases()];
    let record = database.interpolation(0, 0)?;
    println!("node 0 at {:?} interpolates {} splines, value {:.4}", nodes.node_coordinates(database.background(), 0), record.len(), record.interpolate(&coefficients));

    let dofs: Vec<(usize, usize)> = (0..splines.number_of_used_bases()).map(|external| (0, external)).collect();
    let maps = database.multigrid_initialize(0, &dofs, &[0], 2)?;
    for level in 0..maps.number_of_levels()
    {
        println!("multigrid level {level}: {} dofs", maps.number_of_dofs(level)?);
    }
    Ok(())
}
