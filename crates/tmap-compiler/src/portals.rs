// portals.rs -- portal generation and brush-side visibility marking
//
// Every pair of adjacent BSP regions gets the convex polygon they
// share. The root is first fenced in by six portals against a
// universal outside leaf; each internal node then grows its own
// portal and re-splits the portals it inherited as the tree is
// descended. Once every portal connects two leaves, the content
// difference across each portal decides which brush sides are
// actually visible.

use crate::map::{MapData, Plane, PlaneTable};
use crate::tree::{Portal, PortalSide, Tree, PLANENUM_LEAF};
use log::{debug, warn};
use tmap_shared::defines::MAX_WORLD_WIDTH;
use tmap_shared::math::*;
use tmap_shared::winding::Winding;

/// Padding between the tree bounds and the outside portals.
const SIDESPACE: f32 = 8.0;

const BASE_WINDING_EPSILON: f32 = 0.001;
const SPLIT_WINDING_EPSILON: f32 = 0.001;
const CLIP_EPSILON: f32 = 0.1;

#[derive(Default)]
struct PortalStats {
    tiny: usize,
}

/// The six portals bounding the padded tree volume, linking the head
/// node to the outside leaf.
fn make_headnode_portals(tree: &mut Tree) {
    let mut bounds = Bounds::new();
    for i in 0..3 {
        bounds.mins[i] = tree.bounds.mins[i] - SIDESPACE;
        bounds.maxs[i] = tree.bounds.maxs[i] + SIDESPACE;
    }

    tree.outside_node = tree.alloc_node();
    let outside = tree.outside_node;
    tree.nodes[outside].planenum = PLANENUM_LEAF;

    let headnode = tree.headnode;
    let mut box_planes = Vec::with_capacity(6);
    let mut box_portals = Vec::with_capacity(6);
    for j in 0..2 {
        for i in 0..3 {
            let mut plane = Plane::default();
            if j == 1 {
                plane.normal[i] = -1.0;
                plane.dist = -bounds.maxs[i];
            } else {
                plane.normal[i] = 1.0;
                plane.dist = bounds.mins[i];
            }
            let winding = Winding::base_for_plane(&plane.normal, plane.dist);
            let portal = tree.alloc_portal();
            tree.portals[portal] = Portal {
                plane,
                winding: Some(winding),
                ..Default::default()
            };
            tree.add_portal_to_nodes(portal, headnode, outside);
            box_planes.push(tree.portals[portal].plane.clone());
            box_portals.push(portal);
        }
    }

    // clip the base windings against each other
    for (i, &portal) in box_portals.iter().enumerate() {
        let mut w = tree.portals[portal].winding.take();
        for (j, plane) in box_planes.iter().enumerate() {
            if i == j {
                continue;
            }
            w = match w {
                Some(w) => w.chop(&plane.normal, plane.dist, ON_EPSILON),
                None => break,
            };
        }
        tree.portals[portal].winding = w;
    }
}

/// The polygon of the node's plane inside all ancestor half-spaces.
/// This is the place where the parent links carry their weight.
fn base_winding_for_node(tree: &Tree, node: usize, planes: &PlaneTable) -> Option<Winding> {
    let plane = planes.plane(tree.nodes[node].planenum as u16);
    let mut w = Some(Winding::base_for_plane(&plane.normal, plane.dist));

    let mut child = node;
    while let Some(parent) = tree.nodes[child].parent {
        let plane = planes.plane(tree.nodes[parent].planenum as u16);
        let front = tree.nodes[parent].children[0] == Some(child);
        w = match w {
            Some(w) if front => w.chop(&plane.normal, plane.dist, BASE_WINDING_EPSILON),
            Some(w) => w.chop(
                &vector_negate(&plane.normal),
                -plane.dist,
                BASE_WINDING_EPSILON,
            ),
            None => return None,
        };
        child = parent;
    }
    w
}

/// Creates the portal separating the node's two children, clipped to
/// the portals already bounding the node.
fn make_node_portal(tree: &mut Tree, node: usize, planes: &PlaneTable, stats: &mut PortalStats) {
    let mut w = base_winding_for_node(tree, node, planes);

    for &p in tree.nodes[node].portals.clone().iter() {
        let portal = &tree.portals[p];
        let (normal, dist) = if portal.nodes[0] == node {
            (portal.plane.normal, portal.plane.dist)
        } else {
            (vector_negate(&portal.plane.normal), -portal.plane.dist)
        };
        w = match w {
            Some(w) => w.chop(&normal, dist, CLIP_EPSILON),
            None => break,
        };
    }

    let w = match w {
        Some(w) if w.is_tiny() => {
            stats.tiny += 1;
            return;
        }
        Some(w) => w,
        None => return,
    };

    let plane = planes.plane(tree.nodes[node].planenum as u16).clone();
    let children = tree.nodes[node].children;
    if let [Some(front), Some(back)] = children {
        let portal = tree.alloc_portal();
        tree.portals[portal] = Portal {
            plane,
            onnode: Some(node),
            winding: Some(w),
            ..Default::default()
        };
        tree.add_portal_to_nodes(portal, front, back);
    }
}

/// Splits every portal bounding the node by the node's plane, handing
/// the fragments down to the children. Afterwards the node itself has
/// no portals left.
fn split_node_portals(tree: &mut Tree, node: usize, planes: &PlaneTable, stats: &mut PortalStats) {
    let plane = planes.plane(tree.nodes[node].planenum as u16).clone();
    let children = tree.nodes[node].children;
    let (front_child, back_child) = match children {
        [Some(f), Some(b)] => (f, b),
        _ => return,
    };

    for p in tree.nodes[node].portals.clone() {
        let side = if tree.portals[p].nodes[0] == node { 0 } else { 1 };
        let other = tree.portals[p].nodes[1 - side];
        tree.remove_portal_from_nodes(p);

        let (mut fw, mut bw) = match &tree.portals[p].winding {
            Some(w) => w.clip_epsilon(&plane.normal, plane.dist, SPLIT_WINDING_EPSILON),
            None => (None, None),
        };
        if fw.as_ref().is_some_and(|w| w.is_tiny()) {
            fw = None;
            stats.tiny += 1;
        }
        if bw.as_ref().is_some_and(|w| w.is_tiny()) {
            bw = None;
            stats.tiny += 1;
        }

        match (fw, bw) {
            (None, None) => {} // portal vanished in the split
            (Some(_), None) => {
                // entirely in front of the plane, keep the original winding
                if side == 0 {
                    tree.add_portal_to_nodes(p, front_child, other);
                } else {
                    tree.add_portal_to_nodes(p, other, front_child);
                }
            }
            (None, Some(_)) => {
                if side == 0 {
                    tree.add_portal_to_nodes(p, back_child, other);
                } else {
                    tree.add_portal_to_nodes(p, other, back_child);
                }
            }
            (Some(fw), Some(bw)) => {
                let q = tree.alloc_portal();
                tree.portals[q] = Portal {
                    plane: tree.portals[p].plane.clone(),
                    onnode: tree.portals[p].onnode,
                    winding: Some(bw),
                    ..Default::default()
                };
                tree.portals[p].winding = Some(fw);
                if side == 0 {
                    tree.add_portal_to_nodes(p, front_child, other);
                    tree.add_portal_to_nodes(q, back_child, other);
                } else {
                    tree.add_portal_to_nodes(p, other, front_child);
                    tree.add_portal_to_nodes(q, other, back_child);
                }
            }
        }
    }
    tree.nodes[node].portals.clear();
}

/// Node bounds recovered from its portal windings.
fn calc_node_bounds(tree: &mut Tree, node: usize) {
    let mut bounds = Bounds::new();
    for &p in &tree.nodes[node].portals {
        if let Some(w) = &tree.portals[p].winding {
            for point in &w.points {
                bounds.add_point(point);
            }
        }
    }
    tree.nodes[node].bounds = bounds;
}

fn make_tree_portals_r(tree: &mut Tree, node: usize, planes: &PlaneTable, stats: &mut PortalStats) {
    calc_node_bounds(tree, node);
    if tree.nodes[node].bounds.mins[0] >= tree.nodes[node].bounds.maxs[0] {
        warn!("node without a volume");
    }
    for i in 0..3 {
        if tree.nodes[node].bounds.mins[i] < -2.0 * MAX_WORLD_WIDTH
            || tree.nodes[node].bounds.maxs[i] > 2.0 * MAX_WORLD_WIDTH
        {
            warn!("node with unbounded volume");
            break;
        }
    }
    if tree.nodes[node].is_leaf() {
        return;
    }

    make_node_portal(tree, node, planes, stats);
    split_node_portals(tree, node, planes, stats);

    let children = tree.nodes[node].children;
    for child in children.into_iter().flatten() {
        make_tree_portals_r(tree, child, planes, stats);
    }
}

pub fn make_tree_portals(tree: &mut Tree, planes: &PlaneTable) {
    debug!("--- MakeTreePortals ---");
    make_headnode_portals(tree);
    let mut stats = PortalStats::default();
    make_tree_portals_r(tree, tree.headnode, planes, &mut stats);
    if stats.tiny > 0 {
        debug!("{} tiny portals dropped", stats.tiny);
    }
}

/// Finds the brush side a portal shows: the content type that differs
/// across the portal picks the brush, an exact plane match picks the
/// side, with maximal normal agreement as the fallback.
fn find_portal_side(tree: &Tree, portal: usize, map: &MapData) -> Option<PortalSide> {
    let p = &tree.portals[portal];
    let c0 = tree.nodes[p.nodes[0]].contents;
    let c1 = tree.nodes[p.nodes[1]].contents;
    let viscontents = (c0 ^ c1).visible_contents();
    if viscontents.is_empty() {
        return None;
    }

    let onnode = p.onnode?;
    let planenum = tree.nodes[onnode].planenum as u16;
    let p1 = map.planes.plane(planenum);

    let mut best: Option<PortalSide> = None;
    let mut bestdot = 0.0f32;
    for &leaf in &p.nodes {
        for wb in &tree.nodes[leaf].brushes {
            let mb = &map.brushes[wb.original];
            if !mb.contents.intersects(viscontents) {
                continue;
            }
            for (si, side) in mb.sides.iter().enumerate() {
                if side.bevel {
                    continue;
                }
                let found = PortalSide {
                    planenum: side.planenum,
                    texinfo: side.texinfo,
                    surface_flags: side.surface_flags,
                    original: (wb.original, si),
                };
                if side.planenum & !1 == planenum {
                    return Some(found);
                }
                let p2 = map.planes.plane(side.planenum & !1);
                let dot = dot_product(&p1.normal, &p2.normal);
                if dot > bestdot {
                    bestdot = dot;
                    best = Some(found);
                }
            }
        }
    }
    best
}

/// Matches every leaf portal to a brush side and flags those source
/// sides visible. Only sides bounding a visible content change end up
/// as render geometry.
pub fn mark_visible_sides(
    tree: &mut Tree,
    map: &mut MapData,
    brushes: std::ops::Range<usize>,
) {
    debug!("--- MarkVisibleSides ---");
    for i in brushes {
        for side in &mut map.brushes[i].sides {
            side.visible = false;
        }
    }

    for node in 0..tree.nodes.len() {
        if !tree.nodes[node].is_leaf() {
            continue;
        }
        for p in tree.nodes[node].portals.clone() {
            if tree.portals[p].onnode.is_none() {
                continue; // edge of world
            }
            if !tree.portals[p].sidefound {
                let side = find_portal_side(tree, p, map);
                if side.is_none() && !tree.nodes[node].contents.is_empty() {
                    debug!("side not found for portal");
                }
                tree.portals[p].sidefound = true;
                tree.portals[p].side = side;
            }
            if let Some(side) = tree.portals[p].side.clone() {
                let (bi, si) = side.original;
                map.brushes[bi].sides[si].visible = true;
            }
        }
    }
}
