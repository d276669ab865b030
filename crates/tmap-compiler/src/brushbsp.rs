// brushbsp.rs -- recursive brush partitioning
//
// Takes a list of csg-chopped brushes and recursively picks splitting
// planes from the brush sides themselves until every region is convex.
// Split selection follows the classic heuristic: prefer planes that
// many brushes lie on, punish splits and lopsided trees, and never
// cut a hint with anything but another hint.

use crate::config::Config;
use crate::errors::Result;
use crate::map::{MapBrush, MapData, PlaneTable};
use crate::tree::{Tree, PLANENUM_LEAF};
use log::{debug, warn};
use tmap_shared::defines::*;
use tmap_shared::math::*;
use tmap_shared::winding::Winding;

/// Texinfo sentinel for sides lying on a node plane. Such sides are
/// structural only and never produce faces.
pub const TEXINFO_NODE: i32 = -1;

/// Working copy of a brush side during partitioning.
#[derive(Debug, Clone, Default)]
pub struct BspSide {
    pub planenum: u16,
    pub texinfo: i32,
    pub surface_flags: SurfaceFlags,
    pub winding: Option<Winding>,
    /// (brush, side) indices into the parsed map data.
    pub original: Option<(usize, usize)>,
    pub visible: bool,
    pub bevel: bool,
    pub tested: bool,
}

/// A brush fragment during csg and partitioning. `original` indexes
/// the map brush this fragment came from.
#[derive(Debug, Clone, Default)]
pub struct BspBrush {
    pub original: usize,
    pub sides: Vec<BspSide>,
    pub bounds: Bounds,
    /// Cached side classification from the latest split selection.
    pub side: u8,
    pub testside: u8,
}

/// Sets the bounds based on the windings.
pub fn bound_brush(brush: &mut BspBrush) {
    brush.bounds = Bounds::new();
    for side in &brush.sides {
        if let Some(w) = &side.winding {
            for p in &w.points {
                brush.bounds.add_point(p);
            }
        }
    }
}

/// Rebuilds all side windings from the side planes, then the bounds.
pub fn create_brush_windings(brush: &mut BspBrush, planes: &PlaneTable) {
    for i in 0..brush.sides.len() {
        let plane = planes.plane(brush.sides[i].planenum);
        let mut w = Some(Winding::base_for_plane(&plane.normal, plane.dist));
        for j in 0..brush.sides.len() {
            if i == j
                || brush.sides[j].planenum == (brush.sides[i].planenum ^ 1)
                || brush.sides[j].bevel
            {
                continue;
            }
            let clip = planes.plane(brush.sides[j].planenum ^ 1);
            w = match w {
                Some(w) => w.chop(&clip.normal, clip.dist, 0.0),
                None => break,
            };
            // fix broken windings that would generate trifans
            if let Some(w) = &mut w {
                if !w.fix_degenerate_edges() {
                    debug!("removed degenerated edge(s) from winding");
                }
            }
        }
        brush.sides[i].winding = w;
    }
    bound_brush(brush);
}

/// Creates a new axial brush covering the given bounds.
pub fn brush_from_bounds(bounds: &Bounds, planes: &mut PlaneTable) -> Result<BspBrush> {
    let mut brush = BspBrush::default();
    for i in 0..3 {
        let mut normal = VEC3_ORIGIN;
        normal[i] = 1.0;
        let max_side = BspSide {
            planenum: planes.find_or_create(normal, bounds.maxs[i])?,
            ..Default::default()
        };
        normal[i] = -1.0;
        let min_side = BspSide {
            planenum: planes.find_or_create(normal, -bounds.mins[i])?,
            ..Default::default()
        };
        brush.sides.push(max_side);
        brush.sides.push(min_side);
    }
    create_brush_windings(&mut brush, planes);
    Ok(brush)
}

/// Volume via tetrahedrons from one corner to every face.
pub fn brush_volume(brush: &BspBrush, planes: &PlaneTable) -> f32 {
    let corner = match brush
        .sides
        .iter()
        .find_map(|s| s.winding.as_ref().map(|w| w.points[0]))
    {
        Some(c) => c,
        None => return 0.0,
    };

    let mut volume = 0.0;
    for side in &brush.sides {
        if let Some(w) = &side.winding {
            let plane = planes.plane(side.planenum);
            let d = -(dot_product(&corner, &plane.normal) - plane.dist);
            volume += d * w.area();
        }
    }
    volume / 3.0
}

struct PlaneTest {
    side: u8,
    splits: i32,
    hintsplit: bool,
    epsilonbrush: bool,
}

fn test_brush_to_planenum(brush: &BspBrush, planenum: u16, planes: &PlaneTable) -> PlaneTest {
    let mut result = PlaneTest {
        side: 0,
        splits: 0,
        hintsplit: false,
        epsilonbrush: false,
    };

    // if the brush actually uses the planenum, the side is certain
    for side in &brush.sides {
        if side.planenum == planenum {
            result.side = PSIDE_BACK | PSIDE_FACING;
            return result;
        }
        if side.planenum == (planenum ^ 1) {
            result.side = PSIDE_FRONT | PSIDE_FACING;
            return result;
        }
    }

    let plane = planes.plane(planenum);
    let s = box_on_plane_side(
        &brush.bounds.mins,
        &brush.bounds.maxs,
        &plane.normal,
        plane.dist,
        plane.plane_type,
    );
    result.side = s;
    if s != PSIDE_BOTH {
        return result;
    }

    // both sides: count the visible faces the plane would split
    let mut d_front = 0.0f32;
    let mut d_back = 0.0f32;
    for side in &brush.sides {
        if side.texinfo == TEXINFO_NODE || !side.visible {
            continue;
        }
        let w = match &side.winding {
            Some(w) => w,
            None => continue,
        };
        let mut front = false;
        let mut back = false;
        for p in &w.points {
            let d = dot_product(p, &plane.normal) - plane.dist;
            d_front = d_front.max(d);
            d_back = d_back.min(d);
            if d > 0.1 {
                front = true;
            } else if d < -0.1 {
                back = true;
            }
        }
        if front && back {
            result.splits += 1;
            if side.surface_flags.contains(SurfaceFlags::HINT) {
                result.hintsplit = true;
            }
        }
    }

    result.epsilonbrush =
        (d_front > 0.0 && d_front < 1.0) || (d_back < 0.0 && d_back > -1.0);
    result
}

fn brush_mostly_on_side(brush: &BspBrush, normal: &Vec3, dist: f32) -> u8 {
    let mut max = 0.0f32;
    let mut side = PSIDE_FRONT;
    for s in &brush.sides {
        if let Some(w) = &s.winding {
            for p in &w.points {
                let d = dot_product(p, normal) - dist;
                if d > max {
                    max = d;
                    side = PSIDE_FRONT;
                }
                if -d > max {
                    max = -d;
                    side = PSIDE_BACK;
                }
            }
        }
    }
    side
}

/// True if splitting the volume by the plane leaves real volume on
/// both sides. Planes failing this would create zero-volume leaves.
fn plane_splits_volume(volume: &BspBrush, planenum: u16, planes: &PlaneTable) -> bool {
    let (front, back) = split_brush(volume, planenum, planes);
    front.is_some() && back.is_some()
}

/// The chosen splitter of a node.
#[derive(Debug, Clone, Copy)]
pub struct ChosenSplit {
    /// Positive-facing plane index.
    pub planenum: u16,
    pub surface_flags: SurfaceFlags,
}

/// Picks the best side out of the brush list to partition with, or
/// None when the remaining volume should become a leaf. Caches each
/// brush's side classification for the subsequent list split.
///
/// The search order goes visible-structural, visible-detail,
/// nonvisible-structural, nonvisible-detail; the first pass that
/// yields any candidate wins.
pub fn select_split_side(
    brushes: &mut [BspBrush],
    volume: &BspBrush,
    planes: &PlaneTable,
    map_brushes: &[MapBrush],
) -> Option<ChosenSplit> {
    let mut bestvalue = -99999i32;
    let mut best: Option<ChosenSplit> = None;

    for pass in 0..4 {
        for bi in 0..brushes.len() {
            let detail = map_brushes[brushes[bi].original]
                .contents
                .contains(ContentFlags::DETAIL);
            if (pass & 1 == 1) != detail {
                continue;
            }
            for si in 0..brushes[bi].sides.len() {
                let side = &brushes[bi].sides[si];
                if side.bevel {
                    continue; // never use a bevel as a splitter
                }
                if side.winding.is_none() {
                    continue; // nothing visible, so it can't split
                }
                if side.texinfo == TEXINFO_NODE {
                    continue; // already a node splitter
                }
                if side.tested {
                    continue; // we already have metrics for this plane
                }
                if side.surface_flags.contains(SurfaceFlags::SKIP) {
                    continue; // skip surfaces are never chosen
                }
                if side.visible != (pass < 2) {
                    continue; // only check visible faces on early passes
                }

                // always use the positive facing plane
                let pnum = side.planenum & !1;
                let side_flags = side.surface_flags;

                if !plane_splits_volume(volume, pnum, planes) {
                    continue; // would produce a tiny volume
                }

                let mut front = 0i32;
                let mut back = 0i32;
                let mut facing = 0i32;
                let mut splits = 0i32;
                let mut epsilonbrush = 0i32;
                let mut hintsplit = false;

                for test in brushes.iter_mut() {
                    let r = test_brush_to_planenum(test, pnum, planes);
                    splits += r.splits;
                    test.testside = r.side;
                    if r.hintsplit {
                        hintsplit = true;
                    }
                    if r.epsilonbrush {
                        epsilonbrush += 1;
                    }
                    // a brush sharing the face marks the plane tested
                    // on it, so it is not tried as a splitter again
                    if r.side & PSIDE_FACING != 0 {
                        facing += 1;
                        for s in test.sides.iter_mut() {
                            if s.planenum & !1 == pnum {
                                s.tested = true;
                            }
                        }
                    }
                    if r.side & PSIDE_FRONT != 0 {
                        front += 1;
                    }
                    if r.side & PSIDE_BACK != 0 {
                        back += 1;
                    }
                }

                let mut value = 5 * facing - 5 * splits - (front - back).abs();
                if planes.plane(pnum).is_axial() {
                    value += 5; // axial is better
                }
                value -= epsilonbrush * 1000; // avoid!

                // never split a hint side except with another hint
                if hintsplit && !side_flags.contains(SurfaceFlags::HINT) {
                    value = -9999999;
                }

                if value > bestvalue {
                    bestvalue = value;
                    best = Some(ChosenSplit {
                        planenum: pnum,
                        surface_flags: side_flags,
                    });
                    for test in brushes.iter_mut() {
                        test.side = test.testside;
                    }
                }
            }
        }
        if best.is_some() {
            break;
        }
    }

    for brush in brushes.iter_mut() {
        for side in &mut brush.sides {
            side.tested = false;
        }
    }
    best
}

/// Cuts the brush with the plane, returning the (front, back) pieces.
/// A brush that isn't really cut comes back whole on its majority
/// side, and slivers with volume under 1.0 are dropped.
pub fn split_brush(
    brush: &BspBrush,
    planenum: u16,
    planes: &PlaneTable,
) -> (Option<BspBrush>, Option<BspBrush>) {
    let plane = planes.plane(planenum).clone();

    // check all points
    let mut d_front = 0.0f32;
    let mut d_back = 0.0f32;
    for side in &brush.sides {
        if let Some(w) = &side.winding {
            for p in &w.points {
                let d = dot_product(p, &plane.normal) - plane.dist;
                if d > 0.0 && d > d_front {
                    d_front = d;
                }
                if d < 0.0 && d < d_back {
                    d_back = d;
                }
            }
        }
    }
    if d_front < 0.1 {
        return (None, Some(brush.clone())); // only on back
    }
    if d_back > -0.1 {
        return (Some(brush.clone()), None); // only on front
    }

    // the midwinding is the split plane clipped to the brush
    let mut w = Some(Winding::base_for_plane(&plane.normal, plane.dist));
    for side in &brush.sides {
        let clip = planes.plane(side.planenum ^ 1);
        w = match w {
            Some(w) => w.chop(&clip.normal, clip.dist, 0.0),
            None => break,
        };
    }

    let midwinding = match w {
        Some(w) if !w.is_tiny() => w,
        _ => {
            // the brush isn't really split
            return match brush_mostly_on_side(brush, &plane.normal, plane.dist) {
                PSIDE_FRONT => (Some(brush.clone()), None),
                _ => (None, Some(brush.clone())),
            };
        }
    };
    if midwinding.is_huge() {
        warn!("large winding while splitting brush {}", brush.original);
    }

    // split all the current windings
    let mut pieces = [
        BspBrush {
            original: brush.original,
            ..Default::default()
        },
        BspBrush {
            original: brush.original,
            ..Default::default()
        },
    ];
    for side in &brush.sides {
        let w = match &side.winding {
            Some(w) => w,
            None => continue,
        };
        let (cf, cb) = w.clip_epsilon(&plane.normal, plane.dist, 0.0);
        for (piece, cw) in pieces.iter_mut().zip([cf, cb]) {
            if let Some(cw) = cw {
                let mut cs = side.clone();
                cs.winding = Some(cw);
                cs.tested = false;
                piece.sides.push(cs);
            }
        }
    }

    // see if we have valid polyhedra on both sides
    let mut valid = [false, false];
    for (i, piece) in pieces.iter_mut().enumerate() {
        bound_brush(piece);
        let bogus = (0..3).any(|j| {
            piece.bounds.mins[j] < -MAX_WORLD_WIDTH || piece.bounds.maxs[j] > MAX_WORLD_WIDTH
        });
        if bogus {
            debug!("bogus brush after clip");
        }
        valid[i] = piece.sides.len() >= 3 && !bogus;
    }
    if !(valid[0] && valid[1]) {
        if !valid[0] && !valid[1] {
            debug!("split removed brush");
        } else {
            debug!("split not on both sides");
        }
        if valid[0] {
            return (Some(brush.clone()), None);
        }
        if valid[1] {
            return (None, Some(brush.clone()));
        }
        return (None, None);
    }

    // the midwinding becomes a node side of both pieces
    let [front_piece, back_piece] = &mut pieces;
    front_piece.sides.push(BspSide {
        planenum: planenum ^ 1,
        texinfo: TEXINFO_NODE,
        winding: Some(midwinding.clone()),
        ..Default::default()
    });
    back_piece.sides.push(BspSide {
        planenum,
        texinfo: TEXINFO_NODE,
        winding: Some(midwinding),
        ..Default::default()
    });
    bound_brush(front_piece);
    bound_brush(back_piece);

    let [front_piece, back_piece] = pieces;
    let keep = |piece: BspBrush| {
        if brush_volume(&piece, planes) < 1.0 {
            debug!("tiny volume after clip");
            None
        } else {
            Some(piece)
        }
    };
    (keep(front_piece), keep(back_piece))
}

/// Distributes the brushes over the plane using the classification
/// cached by `select_split_side`, splitting the stragglers.
pub fn split_brush_list(
    brushes: Vec<BspBrush>,
    planenum: u16,
    planes: &PlaneTable,
) -> (Vec<BspBrush>, Vec<BspBrush>) {
    let mut front = Vec::new();
    let mut back = Vec::new();

    for mut brush in brushes {
        let sides = brush.side;

        if sides == PSIDE_BOTH {
            let (f, b) = split_brush(&brush, planenum, planes);
            if let Some(f) = f {
                front.push(f);
            }
            if let Some(b) = b {
                back.push(b);
            }
            continue;
        }

        // a brush lying on the plane gets the side marked so it won't
        // be tried as a splitter again
        if sides & PSIDE_FACING != 0 {
            for side in &mut brush.sides {
                if side.planenum & !1 == planenum {
                    side.texinfo = TEXINFO_NODE;
                }
            }
        }

        if sides & PSIDE_FRONT != 0 {
            front.push(brush);
        } else if sides & PSIDE_BACK != 0 {
            back.push(brush);
        } else {
            debug!("brush {} fell off the map", brush.original);
        }
    }
    (front, back)
}

fn leaf_node(tree: &mut Tree, node: usize, brushes: Vec<BspBrush>, map_brushes: &[MapBrush]) {
    let mut contents = ContentFlags::empty();
    for b in &brushes {
        let original = map_brushes[b.original].contents;
        // a solid brush with all sides on nodes eats everything
        if original.contains(ContentFlags::SOLID) && !original.contains(ContentFlags::PASSABLE) {
            if b.sides.iter().all(|s| s.texinfo == TEXINFO_NODE) {
                contents = ContentFlags::SOLID;
                break;
            }
        }
        contents |= original;
    }

    let n = tree.node_mut(node);
    n.planenum = PLANENUM_LEAF;
    n.contents = contents;
    n.brushes = brushes;
}

fn build_tree_r(
    tree: &mut Tree,
    node: usize,
    mut brushes: Vec<BspBrush>,
    planes: &PlaneTable,
    map_brushes: &[MapBrush],
) {
    let volume = match tree.node(node).volume.clone() {
        Some(v) => v,
        None => {
            leaf_node(tree, node, brushes, map_brushes);
            return;
        }
    };

    let best = select_split_side(&mut brushes, &volume, planes, map_brushes);
    let split = match best {
        Some(split) => split,
        None => {
            leaf_node(tree, node, brushes, map_brushes);
            return;
        }
    };

    debug_assert!(!tree.plane_used_by_parents(node, split.planenum as i32));

    tree.node_mut(node).planenum = split.planenum as i32;
    tree.node_mut(node).split_surface_flags = split.surface_flags;

    let (front_list, back_list) = split_brush_list(brushes, split.planenum, planes);
    let (front_vol, back_vol) = split_brush(&volume, split.planenum, planes);

    let children = [tree.alloc_node(), tree.alloc_node()];
    tree.node_mut(children[0]).parent = Some(node);
    tree.node_mut(children[0]).volume = front_vol;
    tree.node_mut(children[1]).parent = Some(node);
    tree.node_mut(children[1]).volume = back_vol;
    tree.node_mut(node).children = [Some(children[0]), Some(children[1])];

    build_tree_r(tree, children[0], front_list, planes, map_brushes);
    build_tree_r(tree, children[1], back_list, planes, map_brushes);
}

/// Builds a BSP tree over the brush list. `bounds` is the region the
/// tree covers; it becomes the head node's volume.
pub fn brush_bsp(
    brushes: Vec<BspBrush>,
    bounds: &Bounds,
    map: &mut MapData,
    config: &Config,
) -> Result<Tree> {
    debug!("--- BrushBSP ---");

    let mut tree = Tree::new();
    let mut c_faces = 0usize;
    let mut c_nonvisfaces = 0usize;
    for b in &brushes {
        let volume = brush_volume(b, &map.planes);
        if volume < config.microvolume {
            let mb = &map.brushes[b.original];
            warn!(
                "entity {}, brush {}: microbrush, volume {:.3}",
                mb.entitynum, mb.brushnum, volume
            );
        }
        for side in &b.sides {
            if side.bevel || side.winding.is_none() || side.texinfo == TEXINFO_NODE {
                continue;
            }
            if side.visible {
                c_faces += 1;
            } else {
                c_nonvisfaces += 1;
            }
        }
        tree.bounds.add_bounds(&b.bounds);
    }
    debug!("{:5} brushes", brushes.len());
    debug!("{c_faces:5} visible faces");
    debug!("{c_nonvisfaces:5} nonvisible faces");

    let head = tree.alloc_node();
    tree.headnode = head;
    tree.nodes[head].volume = Some(brush_from_bounds(bounds, &mut map.planes)?);

    build_tree_r(&mut tree, head, brushes, &map.planes, &map.brushes);
    debug!("{:5} nodes", tree.nodes.len());
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_brush(planes: &mut PlaneTable, mins: Vec3, maxs: Vec3) -> BspBrush {
        let mut b = brush_from_bounds(&Bounds::from_points(mins, maxs), planes).unwrap();
        for side in &mut b.sides {
            side.visible = true;
        }
        b
    }

    fn solid_map_brush() -> MapBrush {
        MapBrush {
            contents: ContentFlags::SOLID | ContentFlags::LEVEL_1,
            ..Default::default()
        }
    }

    #[test]
    fn test_brush_volume_of_box() {
        let mut planes = PlaneTable::new();
        let b = box_brush(&mut planes, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        assert!((brush_volume(&b, &planes) - 64.0 * 64.0 * 64.0).abs() < 1.0);
    }

    #[test]
    fn test_split_brush_through_middle() {
        let mut planes = PlaneTable::new();
        let b = box_brush(&mut planes, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let pnum = planes.find_or_create([1.0, 0.0, 0.0], 32.0).unwrap();

        let (front, back) = split_brush(&b, pnum, &planes);
        let front = front.unwrap();
        let back = back.unwrap();
        let half = 32.0 * 64.0 * 64.0;
        assert!((brush_volume(&front, &planes) - half).abs() < 1.0);
        assert!((brush_volume(&back, &planes) - half).abs() < 1.0);
        assert_eq!(front.bounds.mins[0], 32.0);
        assert_eq!(back.bounds.maxs[0], 32.0);
        // both pieces gained the midwinding as a node side
        assert!(front.sides.iter().any(|s| s.texinfo == TEXINFO_NODE));
        assert!(back.sides.iter().any(|s| s.texinfo == TEXINFO_NODE));
    }

    #[test]
    fn test_split_brush_plane_outside() {
        let mut planes = PlaneTable::new();
        let b = box_brush(&mut planes, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let pnum = planes.find_or_create([1.0, 0.0, 0.0], 128.0).unwrap();
        let (front, back) = split_brush(&b, pnum, &planes);
        assert!(front.is_none());
        assert!(back.is_some());
    }

    #[test]
    fn test_split_brush_sliver_dropped() {
        let mut planes = PlaneTable::new();
        let b = box_brush(&mut planes, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        // a plane shaving off far less than unit volume
        let pnum = planes.find_or_create([1.0, 0.0, 0.0], 63.999).unwrap();
        let (front, back) = split_brush(&b, pnum, &planes);
        assert!(front.is_none());
        assert!(back.is_some());
    }

    #[test]
    fn test_select_split_side_picks_facing_axial() {
        let mut planes = PlaneTable::new();
        let volume = brush_from_bounds(
            &Bounds::from_points([-128.0, -128.0, -128.0], [128.0, 128.0, 128.0]),
            &mut planes,
        )
        .unwrap();
        let mut brushes = vec![box_brush(&mut planes, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0])];
        let map_brushes = vec![solid_map_brush()];

        let split = select_split_side(&mut brushes, &volume, &planes, &map_brushes).unwrap();
        // positive facing plane of one of the brush sides
        assert_eq!(split.planenum & 1, 0);
        assert!(planes.plane(split.planenum).is_axial());
        assert_eq!(brushes[0].side & PSIDE_FACING, PSIDE_FACING);
        // tested flags were cleared again
        assert!(brushes[0].sides.iter().all(|s| !s.tested));
    }

    #[test]
    fn test_build_tree_single_box_has_solid_leaf() {
        let mut map = MapData::new();
        map.brushes.push(solid_map_brush());
        let brushes = vec![box_brush(
            &mut map.planes,
            [0.0, 0.0, 0.0],
            [64.0, 64.0, 64.0],
        )];
        let bounds = Bounds::from_points([-128.0, -128.0, -128.0], [128.0, 128.0, 128.0]);
        let config = Config::default();

        let tree = brush_bsp(brushes, &bounds, &mut map, &config).unwrap();

        let leafs: Vec<_> = tree.nodes.iter().filter(|n| n.is_leaf()).collect();
        assert!(leafs.len() >= 2);
        let solid: Vec<_> = leafs
            .iter()
            .filter(|n| n.contents.contains(ContentFlags::SOLID))
            .collect();
        assert_eq!(solid.len(), 1);
        assert!(!solid[0].brushes.is_empty());
        // the interior brush fragment has all sides on nodes
        assert!(solid[0].brushes[0]
            .sides
            .iter()
            .all(|s| s.texinfo == TEXINFO_NODE));
    }

    #[test]
    fn test_leaf_contents_solid_eats_translucent() {
        let mut tree = Tree::new();
        let node = tree.alloc_node();
        let map_brushes = vec![solid_map_brush()];
        let eater = BspBrush {
            original: 0,
            sides: vec![BspSide {
                texinfo: TEXINFO_NODE,
                ..Default::default()
            }],
            ..Default::default()
        };
        leaf_node(&mut tree, node, vec![eater], &map_brushes);
        assert_eq!(tree.node(node).contents, ContentFlags::SOLID);
    }
}
