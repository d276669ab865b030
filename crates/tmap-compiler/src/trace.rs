// trace.rs -- line tracing against the compiled trees
//
// The emitted nodes are flattened into a compact tracing structure,
// one head per level model. Lighting fires millions of occlusion rays
// through it and the routing pass walks it for floor and passage
// checks, so the hot path stays allocation free.

use crate::bspfile::BspData;
use crate::csg::{LEVEL_ACTORCLIP, LEVEL_WEAPONCLIP, NUM_LEVELS};
use crate::errors::{CompileError, Result};
use crate::tree::PLANENUM_LEAF;
use log::debug;
use tmap_shared::defines::ContentFlags;
use tmap_shared::math::*;

pub const TL_FLAG_NONE: u32 = 0x0000;
pub const TL_FLAG_REGULAR_LEVELS: u32 = 0x00ff;
pub const TL_FLAG_ACTORCLIP: u32 = 0x0100;
pub const TL_FLAG_WEAPONCLIP: u32 = 0x0200;
pub const TL_FLAG_ALL: u32 = 0x0300;

/// Contents a trace cannot pass through.
const MASK_IMPASSABLE: u32 = ContentFlags::SOLID.bits()
    | ContentFlags::WINDOW.bits()
    | ContentFlags::ACTORCLIP.bits()
    | ContentFlags::WATER.bits();

/// Axis index for glue separation planes that could not be built.
const PLANE_NONE: u8 = 6;

const LEAF_BIT: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, Default)]
struct TraceNode {
    plane_type: u8,
    normal: Vec3,
    dist: f32,
    /// Child tnode indices; LEAF_BIT marks a leaf, with the low bits
    /// nonzero when the leaf blocks the trace.
    children: [u32; 2],
}

/// Flattened tracing trees for one tile, shared read-only across
/// worker threads.
#[derive(Debug, Default)]
pub struct TraceWorld {
    tnodes: Vec<TraceNode>,
    /// (first tnode, level) per traced model.
    heads: Vec<(usize, usize)>,
}

/// Rebuilds the per-level tracing structures from the emitted nodes.
pub fn make_tnodes(bsp: &BspData) -> Result<TraceWorld> {
    let mut world = TraceWorld::default();
    for level in 0..NUM_LEVELS.min(bsp.models.len()) {
        let headnode = bsp.models[level].headnode;
        if headnode < 0 {
            continue;
        }
        world.heads.push((world.tnodes.len(), level));
        build_tnodes_r(&mut world, bsp, headnode as usize)?;
    }
    debug!("{} tracing heads, {} tnodes", world.heads.len(), world.tnodes.len());
    Ok(world)
}

fn leaf_child(bsp: &BspData, child: i32) -> u32 {
    let leafnum = (-child - 1) as usize;
    let contents = bsp.leafs[leafnum].contents & !LEAF_BIT;
    if contents & MASK_IMPASSABLE != 0 && contents & ContentFlags::PASSABLE.bits() == 0 {
        (-child) as u32 | LEAF_BIT
    } else {
        LEAF_BIT
    }
}

fn build_tnodes_r(world: &mut TraceWorld, bsp: &BspData, nodenum: usize) -> Result<()> {
    let node = bsp.nodes[nodenum];
    let t = world.tnodes.len();
    world.tnodes.push(TraceNode::default());

    if node.planenum == PLANENUM_LEAF {
        // glue node joining two block regions
        if node.children[0] < 0 || node.children[1] < 0 {
            return Err(CompileError::Internal(format!(
                "glue node {nodenum} references a leaf"
            )));
        }
        let c0 = &bsp.nodes[node.children[0] as usize];
        let c1 = &bsp.nodes[node.children[1] as usize];

        for i in 0..2 {
            if c0.maxs[i] <= c1.mins[i] {
                // axial separation plane; the higher-coordinate half
                // lies on the front side
                world.tnodes[t].plane_type = i as u8;
                let mut normal = VEC3_ORIGIN;
                normal[i] = 1.0;
                world.tnodes[t].normal = normal;
                world.tnodes[t].dist = (c0.maxs[i] as f32 + c1.mins[i] as f32) / 2.0;

                world.tnodes[t].children[1] = world.tnodes.len() as u32;
                build_tnodes_r(world, bsp, node.children[0] as usize)?;
                world.tnodes[t].children[0] = world.tnodes.len() as u32;
                build_tnodes_r(world, bsp, node.children[1] as usize)?;
                return Ok(());
            }
        }

        // overlapping halves, both children always get tested
        world.tnodes[t].plane_type = PLANE_NONE;
        for i in 0..2 {
            world.tnodes[t].children[i] = world.tnodes.len() as u32;
            build_tnodes_r(world, bsp, node.children[i] as usize)?;
        }
        return Ok(());
    }

    let plane = &bsp.planes[node.planenum as usize];
    world.tnodes[t].plane_type = plane.plane_type;
    world.tnodes[t].normal = plane.normal;
    world.tnodes[t].dist = plane.dist;

    for i in 0..2 {
        if node.children[i] < 0 {
            world.tnodes[t].children[i] = leaf_child(bsp, node.children[i]);
        } else {
            world.tnodes[t].children[i] = world.tnodes.len() as u32;
            build_tnodes_r(world, bsp, node.children[i] as usize)?;
        }
    }
    Ok(())
}

fn vector_nearer(v1: &Vec3, v2: &Vec3, comp: &Vec3) -> bool {
    let d1 = vector_subtract(comp, v1);
    let d2 = vector_subtract(comp, v2);
    dot_product(&d1, &d1) < dot_product(&d2, &d2)
}

impl TraceWorld {
    fn test_line_r(&self, node: u32, start: &Vec3, stop: &Vec3) -> bool {
        if node & LEAF_BIT != 0 {
            return node & !LEAF_BIT != 0;
        }

        let tnode = &self.tnodes[node as usize];
        let (front, back) = match tnode.plane_type {
            0..=2 => (
                start[tnode.plane_type as usize] - tnode.dist,
                stop[tnode.plane_type as usize] - tnode.dist,
            ),
            PLANE_NONE => {
                return self.test_line_r(tnode.children[0], start, stop)
                    || self.test_line_r(tnode.children[1], start, stop);
            }
            _ => (
                dot_product(start, &tnode.normal) - tnode.dist,
                dot_product(stop, &tnode.normal) - tnode.dist,
            ),
        };

        if front >= -ON_EPSILON && back >= -ON_EPSILON {
            return self.test_line_r(tnode.children[0], start, stop);
        }
        if front < ON_EPSILON && back < ON_EPSILON {
            return self.test_line_r(tnode.children[1], start, stop);
        }

        let side = usize::from(front < 0.0);
        let frac = front / (front - back);
        let mut mid = VEC3_ORIGIN;
        for i in 0..3 {
            mid[i] = start[i] + (stop[i] - start[i]) * frac;
        }

        self.test_line_r(tnode.children[side], start, &mid)
            || self.test_line_r(tnode.children[side ^ 1], &mid, stop)
    }

    /// True if any brush on a level selected by `levelmask` blocks the
    /// segment. A mask without TL_FLAG_REGULAR_LEVELS tests every
    /// regular level; the clip levels are only tested when their flag
    /// is set.
    pub fn test_line(&self, start: &Vec3, stop: &Vec3, levelmask: u32) -> bool {
        let corelevels = levelmask & TL_FLAG_REGULAR_LEVELS;
        for &(head, level) in &self.heads {
            if level != 0 && corelevels != 0 && level as u32 & levelmask == 0 {
                continue;
            }
            if level == LEVEL_ACTORCLIP && levelmask & TL_FLAG_ACTORCLIP == 0 {
                continue;
            }
            if level == LEVEL_WEAPONCLIP && levelmask & TL_FLAG_WEAPONCLIP == 0 {
                continue;
            }
            if self.test_line_r(head as u32, start, stop) {
                return true;
            }
        }
        false
    }

    /// Occlusion test for the light gatherer: every level blocks,
    /// including lightclip, but the actor and weapon clips never do.
    pub fn test_line_lighting(&self, start: &Vec3, stop: &Vec3) -> bool {
        for &(head, level) in &self.heads {
            if level == LEVEL_ACTORCLIP || level == LEVEL_WEAPONCLIP {
                continue;
            }
            if self.test_line_r(head as u32, start, stop) {
                return true;
            }
        }
        false
    }

    fn test_line_dist_r(&self, node: u32, start: &Vec3, stop: &Vec3) -> Option<Vec3> {
        if node & LEAF_BIT != 0 {
            if node & !LEAF_BIT != 0 {
                return Some(*start);
            }
            return None;
        }

        let tnode = &self.tnodes[node as usize];
        let (front, back) = match tnode.plane_type {
            0..=2 => (
                start[tnode.plane_type as usize] - tnode.dist,
                stop[tnode.plane_type as usize] - tnode.dist,
            ),
            PLANE_NONE => {
                let r0 = self.test_line_dist_r(tnode.children[0], start, stop);
                let r1 = self.test_line_dist_r(tnode.children[1], start, stop);
                return match (r0, r1) {
                    (Some(a), Some(b)) => {
                        if vector_nearer(&a, &b, start) {
                            Some(a)
                        } else {
                            Some(b)
                        }
                    }
                    (r0, r1) => r0.or(r1),
                };
            }
            _ => (
                dot_product(start, &tnode.normal) - tnode.dist,
                dot_product(stop, &tnode.normal) - tnode.dist,
            ),
        };

        if front >= -ON_EPSILON && back >= -ON_EPSILON {
            return self.test_line_dist_r(tnode.children[0], start, stop);
        }
        if front < ON_EPSILON && back < ON_EPSILON {
            return self.test_line_dist_r(tnode.children[1], start, stop);
        }

        let side = usize::from(front < 0.0);
        let frac = front / (front - back);
        let mut mid = VEC3_ORIGIN;
        for i in 0..3 {
            mid[i] = start[i] + (stop[i] - start[i]) * frac;
        }

        self.test_line_dist_r(tnode.children[side], start, &mid)
            .or_else(|| self.test_line_dist_r(tnode.children[side ^ 1], &mid, stop))
    }

    /// Like test_line but reports where the segment first hits a
    /// brush; None when the segment is clear.
    pub fn test_line_dm(&self, start: &Vec3, stop: &Vec3, levelmask: u32) -> Option<Vec3> {
        let corelevels = levelmask & TL_FLAG_REGULAR_LEVELS;
        let mut end = *stop;
        for &(head, level) in &self.heads {
            if level != 0 && corelevels != 0 && level as u32 & levelmask == 0 {
                continue;
            }
            if level == LEVEL_ACTORCLIP && levelmask & TL_FLAG_ACTORCLIP == 0 {
                continue;
            }
            if level == LEVEL_WEAPONCLIP && levelmask & TL_FLAG_WEAPONCLIP == 0 {
                continue;
            }
            if let Some(hit) = self.test_line_dist_r(head as u32, start, stop) {
                if vector_nearer(&hit, &end, start) {
                    end = hit;
                }
            }
        }
        if vector_compare_eps(&end, stop, EQUAL_EPSILON) {
            None
        } else {
            Some(end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn traced_box() -> TraceWorld {
        let source = wrap_worldspawn(&cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]));
        let (_, bsp, _) = compile_map_source(&source);
        make_tnodes(&bsp).unwrap()
    }

    #[test]
    fn test_line_through_solid_blocked() {
        let world = traced_box();
        assert!(world.test_line(&[-100.0, 32.0, 32.0], &[200.0, 32.0, 32.0], TL_FLAG_NONE));
    }

    #[test]
    fn test_line_above_solid_clear() {
        let world = traced_box();
        assert!(!world.test_line(&[-100.0, 32.0, 128.0], &[200.0, 32.0, 128.0], TL_FLAG_NONE));
    }

    #[test]
    fn test_line_levelmask_filters() {
        let world = traced_box();
        // the box lives on level 1; a mask for level 2 misses it
        assert!(!world.test_line(&[-100.0, 32.0, 32.0], &[200.0, 32.0, 32.0], 0x02));
        assert!(world.test_line(&[-100.0, 32.0, 32.0], &[200.0, 32.0, 32.0], 0x01));
    }

    #[test]
    fn test_line_dm_returns_entry_point() {
        let world = traced_box();
        let hit = world
            .test_line_dm(&[-100.0, 32.0, 32.0], &[200.0, 32.0, 32.0], TL_FLAG_NONE)
            .unwrap();
        assert!((hit[0] - 0.0).abs() < 1.0, "hit at {hit:?}");
        assert!((hit[1] - 32.0).abs() < 0.01);
    }

    #[test]
    fn test_actorclip_needs_flag() {
        let world_src = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        let clip = cuboid_brush_flags(
            &[0.0, 0.0, 0.0],
            &[64.0, 64.0, 64.0],
            "tex/actorclip",
            "65536 0 0",
        );
        let (_, bsp, _) = compile_map_source(&wrap_worldspawn(&(world_src + &clip)));
        let world = make_tnodes(&bsp).unwrap();

        let start = [-100.0, 32.0, 32.0];
        let stop = [200.0, 32.0, 32.0];
        assert!(!world.test_line(&start, &stop, TL_FLAG_NONE));
        assert!(world.test_line(&start, &stop, TL_FLAG_ACTORCLIP));
        assert!(!world.test_line_lighting(&start, &stop));
    }
}
