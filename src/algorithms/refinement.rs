use rustc_hash::FxHashSet;

use crate::errors::HMRError;
use crate::storage::background_mesh::BackgroundMesh;
use crate::storage::cell::{ElementState, Pattern};
use crate::utilities::multi_index::neighborhood;

///
/// Runs refinement sweeps on `pattern` until no flags are pending. Every sweep only
/// adds refinement, so the loop reaches a fixed point; a sweep count beyond
/// `max_refinement_level + 1` means the constraints cannot be satisfied.
///
pub(crate) fn refine_pattern(mesh: &mut BackgroundMesh, pattern: Pattern) -> Result<usize, HMRError>
{
    let max_sweeps = mesh.max_refinement_level + 1;
    let mut sweep = 0;
    let mut total = 0;
    while !mesh.queue.is_empty()
    {
        sweep += 1;
        if sweep > max_sweeps
        {
            clear_flags(mesh);
            return Err(HMRError::RefinementDidNotConverge { sweeps: max_sweeps });
        }
        let (refined, deferred) = refinement_sweep(mesh, pattern);
        log::debug!("refinement sweep {sweep} on pattern {}: {refined} cells refined, {} deferred", pattern.0, deferred.len());
        total += refined;
        for cell in deferred
        {
            mesh.push_flag(cell);
        }
    }
    Ok(total)
}

fn clear_flags(mesh: &mut BackgroundMesh)
{
    for cell in std::mem::take(&mut mesh.queue)
    {
        mesh.cells[cell].flags.set_flagged(false);
    }
}

#[inline]
fn schedule(buckets: &mut [Vec<usize>], scheduled: &mut FxHashSet<usize>, cell: usize, level: usize)
{
    if scheduled.insert(cell)
    {
        buckets[level].push(cell);
    }
}

///
/// One sweep: constraints are collected from the finest level down, then cells are
/// refined from level zero up so ancestors are always refined before descendants.
/// Returns the number of refined cells and the cells that have to wait for another sweep.
///
fn refinement_sweep(mesh: &mut BackgroundMesh, pattern: Pattern) -> (usize, Vec<usize>)
{
    let top = mesh.max_level;
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); top + 1];
    let mut scheduled = FxHashSet::default();
    let drained: Vec<usize> = mesh.queue.drain(..).collect();
    for cell in drained
    {
        mesh.cells[cell].flags.set_flagged(false);
        let level = mesh.cells[cell].level();
        schedule(&mut buckets, &mut scheduled, cell, level);
    }

    let buffer_offsets = neighborhood(mesh.refinement_buffer, mesh.dim);
    let padding_offsets = neighborhood(mesh.padding as usize, mesh.dim);
    let mut deferred = Vec::new();
    let mut waiting = FxHashSet::default();

    for level in (0..=top).rev()
    {
        buckets[level].sort_unstable();
        let mut i = 0;
        while i < buckets[level].len()
        {
            let cell = buckets[level][i];
            i += 1;
            match mesh.cells[cell].state(pattern)
            {
                ElementState::Refined => continue,
                ElementState::Deactive =>
                {
                    // the cell only exists on other patterns; its parent has to come first
                    if let Some(parent) = mesh.cells[cell].parent
                    {
                        schedule(&mut buckets, &mut scheduled, parent, level - 1);
                    }
                    waiting.insert(cell);
                    deferred.push(cell);
                    continue;
                }
                _ => {}
            }
            if level >= mesh.max_refinement_level
            {
                log::warn!("cell {cell} is on the maximum refinement level {level}, flag dropped");
                continue;
            }
            if mesh.cells[cell].is_padding()
            {
                continue;
            }
            let ijk = mesh.cells[cell].ijk;
            let mut ready = true;

            for offset in &buffer_offsets
            {
                let position = shifted(ijk, offset);
                let Some(neighbor_ijk) = mesh.position_in_grid(level, position) else { continue };
                if let Some(neighbor) = mesh.cell_at(level, neighbor_ijk)
                {
                    if mesh.cells[neighbor].state(pattern).exists()
                    {
                        continue;
                    }
                }
                if let Some((ancestor, ancestor_level)) = mesh.nearest_existing_ancestor(level, neighbor_ijk, pattern)
                {
                    if mesh.cells[ancestor].state(pattern).is_leaf()
                    {
                        schedule(&mut buckets, &mut scheduled, ancestor, ancestor_level);
                    }
                    // a covering cell one level up is refined earlier in this sweep
                    if ancestor_level + 1 < level
                    {
                        ready = false;
                    }
                }
            }

            for offset in &padding_offsets
            {
                let position = shifted(ijk, offset);
                let Some(neighbor_ijk) = mesh.position_in_grid(level, position) else { continue };
                match mesh.cell_at(level, neighbor_ijk)
                {
                    Some(neighbor) if mesh.cells[neighbor].state(pattern).exists() =>
                    {
                        if mesh.cells[neighbor].is_padding() && mesh.cells[neighbor].state(pattern) == ElementState::Padding
                        {
                            schedule(&mut buckets, &mut scheduled, neighbor, level);
                        }
                    }
                    _ =>
                    {
                        if let Some((ancestor, ancestor_level)) = mesh.nearest_existing_ancestor(level, neighbor_ijk, pattern)
                        {
                            if mesh.cells[ancestor].is_padding() && mesh.cells[ancestor].state(pattern).is_leaf()
                            {
                                schedule(&mut buckets, &mut scheduled, ancestor, ancestor_level);
                                ready = false;
                            }
                        }
                    }
                }
            }

            if !ready
            {
                waiting.insert(cell);
                deferred.push(cell);
            }
        }
    }

    let mut refined = 0;
    for (level, bucket) in buckets.iter_mut().enumerate()
    {
        if level >= mesh.max_refinement_level
        {
            break;
        }
        bucket.sort_unstable();
        for &cell in bucket.iter()
        {
            if waiting.contains(&cell) || !mesh.cells[cell].state(pattern).is_leaf()
            {
                continue;
            }
            mesh.refine_cell(cell, pattern);
            refined += 1;
        }
    }
    (refined, deferred)
}

#[inline]
fn shifted(ijk: [u32; 3], offset: &[i64; 3]) -> [i64; 3]
{
    [ijk[0] as i64 + offset[0], ijk[1] as i64 + offset[1], ijk[2] as i64 + offset[2]]
}
