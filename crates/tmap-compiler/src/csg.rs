// csg.rs -- region brush-list building and brush-brush subtraction
//
// Each compiled level picks the unfinished map brushes whose content
// level matches, copies them into working brushes clipped to the
// region box, and optionally carves away brush overlap so no two
// output brushes share interior volume.

use crate::brushbsp::{split_brush, BspBrush, BspSide, TEXINFO_NODE};
use crate::errors::Result;
use crate::map::{MapData, PlaneTable};
use log::debug;
use std::collections::VecDeque;
use tmap_shared::defines::{ContentFlags, SurfaceFlags};
use tmap_shared::math::*;

// special level numbers beyond the 256 regular level-mask values
pub const LEVEL_WEAPONCLIP: usize = 256;
pub const LEVEL_ACTORCLIP: usize = 257;
pub const LEVEL_LIGHTCLIP: usize = 258;
pub const NUM_LEVELS: usize = 259;

/// A brush belongs to exactly one level: its level-mask byte for
/// regular brushes, or one of the special clip levels.
pub fn is_in_level(contents: ContentFlags, level: usize) -> bool {
    match level {
        LEVEL_WEAPONCLIP => contents.contains(ContentFlags::WEAPONCLIP),
        LEVEL_ACTORCLIP => contents.contains(ContentFlags::ACTORCLIP),
        LEVEL_LIGHTCLIP => contents.contains(ContentFlags::LIGHTCLIP),
        _ => !contents.is_clip() && contents.level_flags() as usize == level,
    }
}

/// Bounds and count of the unfinished level brushes intersecting the
/// clip box. A zero count stops the region subdivision. A level of
/// None matches every brush; submodels are not level-partitioned.
pub fn map_brushes_bounds(
    map: &MapData,
    brushes: std::ops::Range<usize>,
    level: Option<usize>,
    clip: &Bounds,
) -> (Bounds, usize) {
    let mut bounds = Bounds::new();
    let mut count = 0;
    for i in brushes {
        let mb = &map.brushes[i];
        if mb.finished || !level.map_or(true, |l| is_in_level(mb.contents, l)) {
            continue;
        }
        if (0..3).any(|j| mb.bounds.mins[j] > clip.maxs[j] || mb.bounds.maxs[j] < clip.mins[j]) {
            continue;
        }
        bounds.add_bounds(&mb.bounds);
        count += 1;
    }
    (bounds, count)
}

/// Clips the brush to the box along x and y; sides created by the box
/// planes are marked as node sides so the region boundary never
/// becomes real geometry. Returns None when nothing is left inside.
fn clip_brush_to_box(
    brush: BspBrush,
    clip: &Bounds,
    planes: &mut PlaneTable,
) -> Result<Option<BspBrush>> {
    let mut brush = brush;
    let mut box_planes = Vec::new();

    for j in 0..2 {
        if brush.bounds.maxs[j] > clip.maxs[j] {
            let mut normal = VEC3_ORIGIN;
            normal[j] = 1.0;
            let pnum = planes.find_or_create(normal, clip.maxs[j])?;
            box_planes.push(pnum);
            let (_, back) = split_brush(&brush, pnum, planes);
            brush = match back {
                Some(b) => b,
                None => return Ok(None),
            };
        }
        if brush.bounds.mins[j] < clip.mins[j] {
            let mut normal = VEC3_ORIGIN;
            normal[j] = -1.0;
            let pnum = planes.find_or_create(normal, -clip.mins[j])?;
            box_planes.push(pnum);
            let (front, _) = split_brush(&brush, pnum, planes);
            brush = match front {
                Some(b) => b,
                None => return Ok(None),
            };
        }
    }

    for side in &mut brush.sides {
        if box_planes.iter().any(|&p| side.planenum & !1 == p & !1) {
            side.texinfo = TEXINFO_NODE;
            side.visible = false;
        }
    }
    Ok(Some(brush))
}

/// Copies the unfinished level brushes intersecting the clip box into
/// working brushes, consuming them from the map. The copies carry
/// (brush, side) back-references so visibility marking can reach the
/// source sides.
pub fn make_bsp_brush_list(
    map: &mut MapData,
    brushes: std::ops::Range<usize>,
    level: Option<usize>,
    clip: &Bounds,
) -> Result<Vec<BspBrush>> {
    let mut list = Vec::new();

    for i in brushes {
        let mb = &map.brushes[i];
        if mb.finished
            || mb.sides.is_empty()
            || !level.map_or(true, |l| is_in_level(mb.contents, l))
        {
            continue;
        }
        if (0..3).any(|j| mb.bounds.mins[j] > clip.maxs[j] || mb.bounds.maxs[j] < clip.mins[j]) {
            continue;
        }

        let mut brush = BspBrush {
            original: i,
            bounds: mb.bounds,
            ..Default::default()
        };
        for (j, side) in mb.sides.iter().enumerate() {
            brush.sides.push(BspSide {
                planenum: side.planenum,
                texinfo: side.texinfo as i32,
                surface_flags: side.surface_flags,
                winding: side.winding.clone(),
                original: Some((i, j)),
                // hint sides are always eligible splitters
                visible: side.visible || side.surface_flags.contains(SurfaceFlags::HINT),
                bevel: side.bevel,
                tested: false,
            });
        }
        map.brushes[i].finished = true;

        if let Some(clipped) = clip_brush_to_box(brush, clip, &mut map.planes)? {
            list.push(clipped);
        }
    }

    debug!("{:5} brushes for level {level:?}", list.len());
    Ok(list)
}

/// Result of carving brush a by brush b.
enum Subtraction {
    /// No part of a was inside b.
    Disjoint,
    /// The pieces of a outside b; empty when b swallows a whole.
    Fragments(Vec<BspBrush>),
}

/// a - b, by clipping a against b's planes one at a time. Whatever
/// ends up inside every plane of b is the carved-away part.
fn subtract_brush(a: &BspBrush, b: &BspBrush, planes: &PlaneTable) -> Subtraction {
    let mut fragments = Vec::new();
    let mut inside = Some(a.clone());
    for side in &b.sides {
        let current = match inside {
            Some(c) => c,
            None => break,
        };
        let (front, back) = split_brush(&current, side.planenum, planes);
        if let Some(f) = front {
            fragments.push(f);
        }
        inside = back;
    }
    if inside.is_none() {
        return Subtraction::Disjoint;
    }
    Subtraction::Fragments(fragments)
}

/// Bounding boxes apart, or sharing a pair of opposed planes.
fn brushes_disjoint(a: &BspBrush, b: &BspBrush) -> bool {
    for j in 0..3 {
        if a.bounds.mins[j] >= b.bounds.maxs[j] || a.bounds.maxs[j] <= b.bounds.mins[j] {
            return true;
        }
    }
    for sa in &a.sides {
        for sb in &b.sides {
            if sa.planenum == (sb.planenum ^ 1) {
                return true;
            }
        }
    }
    false
}

/// True if b1 is allowed to bite b2: only solid brushes bite, and
/// detail never bites structural.
fn brush_ge(b1: &BspBrush, b2: &BspBrush, map: &MapData) -> bool {
    let c1 = map.brushes[b1.original].contents;
    let c2 = map.brushes[b2.original].contents;
    if c1.contains(ContentFlags::DETAIL) && !c2.contains(ContentFlags::DETAIL) {
        return false;
    }
    c1.contains(ContentFlags::SOLID)
}

/// Carves away brush overlap until no two brushes intersect. Works a
/// queue to a fixed point: a popped brush is tested against every
/// settled brush, and whenever a subtraction happens the resulting
/// fragments go back on the queue. When both brushes could bite, the
/// one whose subtraction fragments less gets carved.
pub fn chop_brushes(brushes: Vec<BspBrush>, map: &MapData) -> Vec<BspBrush> {
    debug!("--- ChopBrushes ---");
    let original_count = brushes.len();

    let mut keep: Vec<BspBrush> = Vec::new();
    let mut work: VecDeque<BspBrush> = brushes.into();

    'next: while let Some(b1) = work.pop_front() {
        let mut i = 0;
        while i < keep.len() {
            let b2 = &keep[i];
            if brushes_disjoint(&b1, b2) {
                i += 1;
                continue;
            }

            let sub = if brush_ge(b2, &b1, map) {
                match subtract_brush(&b1, b2, &map.planes) {
                    Subtraction::Disjoint => None,
                    Subtraction::Fragments(f) => Some(f),
                }
            } else {
                None
            };
            let sub2 = if brush_ge(&b1, b2, map) {
                match subtract_brush(b2, &b1, &map.planes) {
                    Subtraction::Disjoint => None,
                    Subtraction::Fragments(f) => Some(f),
                }
            } else {
                None
            };

            match (sub, sub2) {
                (None, None) => {
                    // neither can bite the other
                    i += 1;
                }
                (Some(f1), sub2) => {
                    let carve_b1 = match &sub2 {
                        Some(f2) => f1.len() <= f2.len(),
                        None => true,
                    };
                    if carve_b1 {
                        work.extend(f1);
                        continue 'next;
                    }
                    if let Some(f2) = sub2 {
                        keep.swap_remove(i);
                        work.extend(f2);
                        // retest b1 against the brush swapped into slot i
                    }
                }
                (None, Some(f2)) => {
                    keep.swap_remove(i);
                    work.extend(f2);
                }
            }
        }
        keep.push(b1);
    }

    debug!("{original_count:5} original brushes");
    debug!("{:5} output brushes", keep.len());
    keep
}

/// True if the point is inside the brush (behind every side plane).
pub fn point_in_brush(brush: &BspBrush, point: &Vec3, planes: &PlaneTable) -> bool {
    brush.sides.iter().all(|s| {
        let plane = planes.plane(s.planenum);
        dot_product(point, &plane.normal) - plane.dist < -ON_EPSILON
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brushbsp::{brush_from_bounds, brush_volume};
    use crate::map::MapBrush;
    use rand::{Rng, SeedableRng};

    fn solid_map_data(count: usize) -> MapData {
        let mut map = MapData::new();
        for _ in 0..count {
            map.brushes.push(MapBrush {
                contents: ContentFlags::SOLID | ContentFlags::LEVEL_1,
                ..Default::default()
            });
        }
        map
    }

    fn working_box(map: &mut MapData, original: usize, mins: Vec3, maxs: Vec3) -> BspBrush {
        let mut b =
            brush_from_bounds(&Bounds::from_points(mins, maxs), &mut map.planes).unwrap();
        b.original = original;
        for s in &mut b.sides {
            s.visible = true;
        }
        map.brushes[original].bounds = b.bounds;
        b
    }

    #[test]
    fn test_level_assignment() {
        let regular = ContentFlags::SOLID | ContentFlags::LEVEL_1 | ContentFlags::LEVEL_3;
        assert!(is_in_level(regular, 0b101));
        assert!(!is_in_level(regular, 1));
        assert!(is_in_level(ContentFlags::ACTORCLIP, LEVEL_ACTORCLIP));
        assert!(!is_in_level(ContentFlags::ACTORCLIP, 0));
        assert!(is_in_level(ContentFlags::WEAPONCLIP, LEVEL_WEAPONCLIP));
    }

    #[test]
    fn test_map_brushes_bounds_counts_level_matches() {
        let mut map = solid_map_data(2);
        map.brushes[1].contents = ContentFlags::SOLID | ContentFlags::LEVEL_2;
        working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        working_box(&mut map, 1, [128.0, 0.0, 0.0], [192.0, 64.0, 64.0]);

        let clip = Bounds::from_points([-1024.0, -1024.0, -1024.0], [1024.0, 1024.0, 1024.0]);
        let (bounds, count) = map_brushes_bounds(&map, 0..2, Some(1), &clip);
        assert_eq!(count, 1);
        assert_eq!(bounds.maxs[0], 64.0);

        let (_, count) = map_brushes_bounds(&map, 0..2, Some(2), &clip);
        assert_eq!(count, 1);
        let (_, count) = map_brushes_bounds(&map, 0..2, Some(3), &clip);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_clip_to_box_marks_node_sides() {
        let mut map = solid_map_data(1);
        let b = working_box(&mut map, 0, [-32.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let clip = Bounds::from_points([0.0, -1024.0, -1024.0], [1024.0, 1024.0, 1024.0]);

        let clipped = clip_brush_to_box(b, &clip, &mut map.planes).unwrap().unwrap();
        assert_eq!(clipped.bounds.mins[0], 0.0);
        assert!(clipped
            .sides
            .iter()
            .any(|s| s.texinfo == TEXINFO_NODE && !s.visible));
    }

    #[test]
    fn test_subtract_disjoint_brushes() {
        let mut map = solid_map_data(2);
        let a = working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let b = working_box(&mut map, 1, [128.0, 0.0, 0.0], [192.0, 64.0, 64.0]);
        assert!(brushes_disjoint(&a, &b));
        assert!(matches!(
            subtract_brush(&a, &b, &map.planes),
            Subtraction::Disjoint
        ));
    }

    #[test]
    fn test_subtract_removes_intersection_volume() {
        let mut map = solid_map_data(2);
        let a = working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let b = working_box(&mut map, 1, [32.0, 0.0, 0.0], [96.0, 64.0, 64.0]);

        let fragments = match subtract_brush(&a, &b, &map.planes) {
            Subtraction::Fragments(f) => f,
            Subtraction::Disjoint => panic!("brushes overlap"),
        };
        let total: f32 = fragments
            .iter()
            .map(|f| brush_volume(f, &map.planes))
            .sum();
        // a minus the 32x64x64 overlap
        assert!((total - 32.0 * 64.0 * 64.0).abs() < 1.0);
    }

    #[test]
    fn test_chop_brushes_removes_overlap() {
        let mut map = solid_map_data(2);
        let a = working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let b = working_box(&mut map, 1, [32.0, 32.0, 0.0], [96.0, 96.0, 64.0]);

        let chopped = chop_brushes(vec![a, b], &map);
        let total: f32 = chopped.iter().map(|c| brush_volume(c, &map.planes)).sum();
        let union = 2.0 * 64.0 * 64.0 * 64.0 - 32.0 * 32.0 * 64.0;
        assert!((total - union).abs() < 1.0);

        // no sampled interior point may be inside two brushes
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = [
                rng.gen_range(0.0..96.0),
                rng.gen_range(0.0..96.0),
                rng.gen_range(0.0..64.0),
            ];
            let inside = chopped
                .iter()
                .filter(|c| point_in_brush(c, &p, &map.planes))
                .count();
            assert!(inside <= 1);
        }
    }

    #[test]
    fn test_chop_keeps_disjoint_brushes_whole() {
        let mut map = solid_map_data(2);
        let a = working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        let b = working_box(&mut map, 1, [64.0, 0.0, 0.0], [128.0, 64.0, 64.0]);
        let chopped = chop_brushes(vec![a, b], &map);
        assert_eq!(chopped.len(), 2);
    }

    #[test]
    fn test_make_brush_list_consumes_and_copies() {
        let mut map = solid_map_data(1);
        working_box(&mut map, 0, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]);
        // the map brush needs real sides for the copy
        let template =
            brush_from_bounds(&Bounds::from_points([0.0; 3], [64.0; 3]), &mut map.planes)
                .unwrap();
        map.brushes[0].sides = template
            .sides
            .iter()
            .map(|s| crate::map::Side {
                planenum: s.planenum,
                winding: s.winding.clone(),
                visible: true,
                ..Default::default()
            })
            .collect();

        let clip = Bounds::from_points([-1024.0; 3], [1024.0; 3]);
        let list = make_bsp_brush_list(&mut map, 0..1, Some(1), &clip).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].original, 0);
        assert_eq!(list[0].sides[0].original, Some((0, 0)));
        assert!(map.brushes[0].finished);

        // a second pass finds nothing left
        let list = make_bsp_brush_list(&mut map, 0..1, Some(1), &clip).unwrap();
        assert!(list.is_empty());
    }
}
