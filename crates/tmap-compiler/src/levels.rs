// levels.rs -- per-level compilation of the world model
//
// Every level gets its own BSP tree over the brushes visible on it,
// emitted as one model per level. Regions wider than BLOCK_SIZE are
// split in half and joined by a glue node with no real plane, which
// keeps each tree small and lets distant areas compile independently.

use crate::brushbsp::brush_bsp;
use crate::bspfile::{BspData, DNode, LEAFNODE};
use crate::config::Config;
use crate::csg::{chop_brushes, make_bsp_brush_list, map_brushes_bounds, NUM_LEVELS};
use crate::errors::{check_limit, Result};
use crate::faces::{fix_tjuncs, make_faces, FaceArena};
use crate::map::MapData;
use crate::portals::{make_tree_portals, mark_visible_sides};
use crate::tree::{prune_nodes, PLANENUM_LEAF};
use crate::writebsp::{begin_model, emit_drawnode_r, end_model, EdgeTable};
use log::{debug, info};
use tmap_shared::defines::{MAX_MAP_MODELS, MAX_MAP_NODES, MAX_WORLD_WIDTH};
use tmap_shared::math::Bounds;

/// Maximum xy extent of one region tree.
const BLOCK_SIZE: f32 = 512.0;

/// Runs the full pipeline on the brushes of one region and emits the
/// resulting tree, returning its headnode (or a leaf reference when
/// nothing survives).
#[allow(clippy::too_many_arguments)]
fn process_region(
    map: &mut MapData,
    bsp: &mut BspData,
    faces: &mut FaceArena,
    edges: &mut EdgeTable,
    config: &Config,
    brushes: std::ops::Range<usize>,
    level: Option<usize>,
    clip: &Bounds,
    bounds: &Bounds,
) -> Result<i32> {
    let list = make_bsp_brush_list(map, brushes.clone(), level, clip)?;
    if list.is_empty() {
        return Ok(LEAFNODE);
    }
    let list = if config.nocsg { list } else { chop_brushes(list, map) };

    let mut tree = brush_bsp(list, bounds, map, config)?;
    make_tree_portals(&mut tree, &map.planes);
    mark_visible_sides(&mut tree, map, brushes);
    make_faces(&mut tree, map, bsp, config, faces)?;
    fix_tjuncs(&mut tree, bsp, config, faces)?;
    let headnode = tree.headnode;
    prune_nodes(&mut tree, headnode);
    emit_drawnode_r(&tree, tree.headnode, faces, bsp, edges, config)
}

/// Builds the tree for one level inside the region [cmins, cmaxs],
/// splitting oversized regions in half and gluing the halves under a
/// planeless node.
#[allow(clippy::too_many_arguments)]
fn construct_level_nodes_r(
    map: &mut MapData,
    bsp: &mut BspData,
    faces: &mut FaceArena,
    edges: &mut EdgeTable,
    config: &Config,
    level: usize,
    cmins: [f32; 2],
    cmaxs: [f32; 2],
) -> Result<i32> {
    let clip = Bounds {
        mins: [cmins[0], cmins[1], -MAX_WORLD_WIDTH],
        maxs: [cmaxs[0], cmaxs[1], MAX_WORLD_WIDTH],
    };
    let numbrushes = map.entities[0].numbrushes;
    let (bounds, count) = map_brushes_bounds(map, 0..numbrushes, Some(level), &clip);
    if count == 0 {
        return Ok(LEAFNODE);
    }

    let diff = [cmaxs[0] - cmins[0], cmaxs[1] - cmins[1]];
    if diff[0] > BLOCK_SIZE || diff[1] > BLOCK_SIZE {
        let axis = if diff[0] >= diff[1] { 0 } else { 1 };
        let mid = (cmins[axis] + cmaxs[axis]) / 2.0;

        let mut half_maxs = cmaxs;
        half_maxs[axis] = mid;
        let nn0 = construct_level_nodes_r(map, bsp, faces, edges, config, level, cmins, half_maxs)?;

        let mut half_mins = cmins;
        half_mins[axis] = mid;
        let nn1 = construct_level_nodes_r(map, bsp, faces, edges, config, level, half_mins, cmaxs)?;

        // glue nodes must reference real nodes; when one half came up
        // empty the other half stands in for the whole region
        if nn0 < 0 {
            return Ok(nn1);
        }
        if nn1 < 0 {
            return Ok(nn0);
        }

        // glue node: no splitting plane, the tracer separates the
        // halves from the child bounds
        check_limit("MAX_MAP_NODES", bsp.nodes.len(), MAX_MAP_NODES)?;
        let mut dn = DNode {
            planenum: PLANENUM_LEAF,
            children: [nn0, nn1],
            firstface: bsp.faces.len() as u16,
            numfaces: 0,
            ..Default::default()
        };
        for i in 0..3 {
            dn.mins[i] = bounds.mins[i].floor() as i16;
            dn.maxs[i] = bounds.maxs[i].ceil() as i16;
        }
        bsp.nodes.push(dn);
        return Ok(bsp.nodes.len() as i32 - 1);
    }

    debug!(
        "region ({:.0} {:.0})-({:.0} {:.0}) level {level}: {count} brushes",
        cmins[0], cmins[1], cmaxs[0], cmaxs[1]
    );
    process_region(
        map,
        bsp,
        faces,
        edges,
        config,
        0..numbrushes,
        Some(level),
        &clip,
        &bounds,
    )
}

/// Compiles the world entity into NUM_LEVELS models, one per level.
/// The model index doubles as the level number; levels without any
/// brushes keep a leaf reference as their headnode.
pub fn process_world_model(
    map: &mut MapData,
    bsp: &mut BspData,
    faces: &mut FaceArena,
    edges: &mut EdgeTable,
    config: &Config,
) -> Result<()> {
    info!("--- ProcessWorldModel ---");
    let cmins = [map.bounds.mins[0] - 8.0, map.bounds.mins[1] - 8.0];
    let cmaxs = [map.bounds.maxs[0] + 8.0, map.bounds.maxs[1] + 8.0];

    for level in 0..NUM_LEVELS {
        begin_model(map, bsp, edges, 0);
        let headnode =
            construct_level_nodes_r(map, bsp, faces, edges, config, level, cmins, cmaxs)?;
        end_model(bsp, headnode);
    }
    Ok(())
}

/// Compiles every inline model entity after the world models. Entity
/// order is preserved so the entity string can reference models by
/// index.
pub fn process_sub_models(
    map: &mut MapData,
    bsp: &mut BspData,
    faces: &mut FaceArena,
    edges: &mut EdgeTable,
    config: &Config,
) -> Result<()> {
    info!("--- ProcessSubModels ---");
    let clip = Bounds {
        mins: [-MAX_WORLD_WIDTH; 3],
        maxs: [MAX_WORLD_WIDTH; 3],
    };

    for entitynum in 1..map.entities.len() {
        let ent = &map.entities[entitynum];
        if ent.numbrushes == 0 {
            continue;
        }
        let brushes = ent.firstbrush..ent.firstbrush + ent.numbrushes;
        let (bounds, count) = map_brushes_bounds(map, brushes.clone(), None, &clip);
        if count == 0 {
            continue;
        }

        check_limit("MAX_MAP_MODELS", bsp.models.len(), MAX_MAP_MODELS)?;
        begin_model(map, bsp, edges, entitynum);
        let headnode = process_region(
            map, bsp, faces, edges, config, brushes, None, &clip, &bounds,
        )?;
        end_model(bsp, headnode);
        debug!("model {} from entity {entitynum}", bsp.models.len() - 1);
    }
    Ok(())
}
