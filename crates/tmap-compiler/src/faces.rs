// faces.rs -- renderable face construction
//
// Portals with a matched brush side become faces on their splitting
// node. Coplanar neighbors with identical texture and contents are
// merged, oversized faces are subdivided for the lightmap cache, and
// vertex welding plus t-junction repair closes the cracks between
// faces of different subdivision.
//
// Some faces are removed before saving but still form nodes, for
// example the meeting planes of different water volumes.

use crate::bspfile::BspData;
use crate::config::Config;
use crate::errors::{check_limit, CompileError, Result};
use crate::map::MapData;
use crate::tree::Tree;
use log::debug;
use tmap_shared::defines::*;
use tmap_shared::math::*;
use tmap_shared::winding::Winding;

const INTEGRAL_EPSILON: f32 = 0.01;
const POINT_EPSILON: f32 = 0.5;
const OFF_EPSILON: f32 = 0.5;
const CONTINUOUS_EPSILON: f32 = 0.001;

const MAX_SUPERVERTS: usize = 512;
const HASH_SIZE: usize = 64;

/// A face being built. Merge and subdivision never destroy a face;
/// they mark it superseded and link the replacements, so emission can
/// skip ancestors.
#[derive(Debug, Clone, Default)]
pub struct Face {
    /// Plane index with the low bit holding the side orientation.
    pub planenum: u16,
    pub texinfo: u16,
    pub contents: ContentFlags,
    pub winding: Option<Winding>,
    /// Welded vertex indices, filled during t-junction fixing.
    pub vertexnums: Vec<u16>,
    pub merged: Option<usize>,
    pub split: [Option<usize>; 2],
}

impl Face {
    pub fn superseded(&self) -> bool {
        self.merged.is_some() || self.split[0].is_some() || self.split[1].is_some()
    }
}

/// Arena of all working faces for one model; nodes refer into it.
#[derive(Debug, Default)]
pub struct FaceArena {
    pub faces: Vec<Face>,
}

impl FaceArena {
    pub fn alloc(&mut self, face: Face) -> usize {
        self.faces.push(face);
        self.faces.len() - 1
    }

    /// A fresh face inheriting everything but geometry and links.
    fn derive(&mut self, from: usize) -> usize {
        let f = &self.faces[from];
        self.alloc(Face {
            planenum: f.planenum,
            texinfo: f.texinfo,
            contents: f.contents,
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct FaceStats {
    nodefaces: usize,
    merge: usize,
    subdivide: usize,
}

fn face_from_portal(
    tree: &Tree,
    portal: usize,
    pside: usize,
    map: &MapData,
    bsp: &BspData,
    config: &Config,
) -> Option<Face> {
    let p = &tree.portals[portal];
    // portal does not bridge different visible contents
    let side = p.side.as_ref()?;

    // nodraw/caulk faces
    if side.surface_flags.contains(SurfaceFlags::NODRAW) {
        return None;
    }

    let planenum = (side.planenum & !1) | pside as u16;
    let near = tree.nodes[p.nodes[pside]].contents;
    let far = tree.nodes[p.nodes[1 - pside]].contents;

    // don't show the insides of windows
    if near.contains(ContentFlags::WINDOW)
        && (near ^ far).visible_contents() == ContentFlags::WINDOW
    {
        return None;
    }

    // faces invisible from above are optimized away, unless they
    // rotate or emit light
    if !config.nobackclip && map.planes.plane(planenum).normal[2] < -0.9 {
        let entity = &map.entities[map.brushes[side.original.0].entitynum];
        if entity.classname() != "func_rotating"
            && !bsp.texinfo[side.texinfo as usize]
                .surface_flags
                .contains(SurfaceFlags::LIGHT)
        {
            return None;
        }
    }

    let winding = p.winding.as_ref()?;
    Some(Face {
        planenum,
        texinfo: side.texinfo,
        contents: near,
        winding: Some(if pside == 1 {
            winding.reverse()
        } else {
            winding.clone()
        }),
        ..Default::default()
    })
}

// ---- face merging ----

/// Merges two windings sharing a common edge when the joined boundary
/// stays convex. Colinear joint points are removed.
fn try_merge_winding(f1: &Winding, f2: &Winding, planenormal: &Vec3) -> Option<Winding> {
    let n1 = f1.points.len();
    let n2 = f2.points.len();

    // find a common edge
    let mut found = None;
    'search: for i in 0..n1 {
        let p1 = &f1.points[i];
        let p2 = &f1.points[(i + 1) % n1];
        for j in 0..n2 {
            let p3 = &f2.points[j];
            let p4 = &f2.points[(j + 1) % n2];
            let same = (0..3).all(|k| {
                (p1[k] - p4[k]).abs() <= EQUAL_EPSILON && (p2[k] - p3[k]).abs() <= EQUAL_EPSILON
            });
            if same {
                found = Some((i, j));
                break 'search;
            }
        }
    }
    let (i, j) = found?;
    let p1 = f1.points[i];
    let p2 = f1.points[(i + 1) % n1];

    // if the lines joining at the shared points are colinear, the
    // joint point can be removed
    let back = &f1.points[(i + n1 - 1) % n1];
    let delta = vector_subtract(&p1, back);
    let mut normal = cross_product(planenormal, &delta);
    vector_normalize(&mut normal);

    let back = &f2.points[(j + 2) % n2];
    let delta = vector_subtract(back, &p1);
    let dot = dot_product(&delta, &normal);
    if dot > CONTINUOUS_EPSILON {
        return None; // not a convex polygon
    }
    let keep1 = dot < -CONTINUOUS_EPSILON;

    let back = &f1.points[(i + 2) % n1];
    let delta = vector_subtract(back, &p2);
    let mut normal = cross_product(planenormal, &delta);
    vector_normalize(&mut normal);

    let back = &f2.points[(j + n2 - 1) % n2];
    let delta = vector_subtract(back, &p2);
    let dot = dot_product(&delta, &normal);
    if dot > CONTINUOUS_EPSILON {
        return None;
    }
    let keep2 = dot < -CONTINUOUS_EPSILON;

    let mut points = Vec::with_capacity(n1 + n2);
    let mut k = (i + 1) % n1;
    while k != i {
        if !(k == (i + 1) % n1 && !keep2) {
            points.push(f1.points[k]);
        }
        k = (k + 1) % n1;
    }
    let mut l = (j + 1) % n2;
    while l != j {
        if !(l == (j + 1) % n2 && !keep1) {
            points.push(f2.points[l]);
        }
        l = (l + 1) % n2;
    }
    Some(Winding::new(points))
}

fn try_merge(faces: &FaceArena, f1: usize, f2: usize, planenormal: &Vec3) -> Option<Face> {
    let a = &faces.faces[f1];
    let b = &faces.faces[f2];
    if a.texinfo != b.texinfo || a.planenum != b.planenum || a.contents != b.contents {
        return None;
    }
    let nw = try_merge_winding(a.winding.as_ref()?, b.winding.as_ref()?, planenormal)?;
    Some(Face {
        planenum: a.planenum,
        texinfo: a.texinfo,
        contents: a.contents,
        winding: Some(nw),
        ..Default::default()
    })
}

/// Fixed-point merge over one node's face list. Merged results join
/// the end of the list so they are themselves merge candidates.
fn merge_node_faces(tree: &mut Tree, node: usize, map: &MapData, faces: &mut FaceArena, stats: &mut FaceStats) {
    let planenormal = map.planes.plane(tree.nodes[node].planenum as u16).normal;

    let mut i = 0;
    while i < tree.nodes[node].faces.len() {
        let f1 = tree.nodes[node].faces[i];
        if !faces.faces[f1].superseded() {
            for j in 0..i {
                let f2 = tree.nodes[node].faces[j];
                if faces.faces[f2].superseded() {
                    continue;
                }
                if let Some(merged) = try_merge(faces, f1, f2, &planenormal) {
                    stats.merge += 1;
                    let idx = faces.alloc(merged);
                    faces.faces[f1].merged = Some(idx);
                    faces.faces[f2].merged = Some(idx);
                    tree.nodes[node].faces.push(idx);
                    break;
                }
            }
        }
        i += 1;
    }
}

// ---- subdivision ----

/// Bisects the face along its texture axes until no extent exceeds
/// the subdivide size. Warp surfaces skip the surface cache and never
/// subdivide.
fn subdivide_face(
    tree: &mut Tree,
    node: usize,
    f: usize,
    bsp: &BspData,
    config: &Config,
    faces: &mut FaceArena,
    stats: &mut FaceStats,
) -> Result<()> {
    if faces.faces[f].merged.is_some() {
        return Ok(());
    }
    let tex = &bsp.texinfo[faces.faces[f].texinfo as usize];
    if tex.surface_flags.contains(SurfaceFlags::WARP) {
        return Ok(());
    }

    for axis in 0..2 {
        loop {
            let w = match &faces.faces[f].winding {
                Some(w) => w,
                None => return Ok(()),
            };
            let mut temp = [tex.vecs[axis][0], tex.vecs[axis][1], tex.vecs[axis][2]];
            let mut mins = 999999.0f32;
            let mut maxs = -999999.0f32;
            for p in &w.points {
                let v = dot_product(p, &temp);
                mins = mins.min(v);
                maxs = maxs.max(v);
            }
            if maxs - mins <= config.subdivide_size {
                break;
            }

            stats.subdivide += 1;
            let v = vector_normalize(&mut temp);
            let dist = (mins + config.subdivide_size - 16.0) / v;

            let (frontw, backw) = w.clip_epsilon(&temp, dist, ON_EPSILON);
            let (frontw, backw) = match (frontw, backw) {
                (Some(fw), Some(bw)) => (fw, bw),
                _ => {
                    return Err(CompileError::Internal(format!(
                        "subdivide didn't split the polygon (texture '{}')",
                        tex.texture
                    )))
                }
            };

            let s0 = faces.derive(f);
            faces.faces[s0].winding = Some(frontw);
            let s1 = faces.derive(f);
            faces.faces[s1].winding = Some(backw);
            faces.faces[f].split = [Some(s0), Some(s1)];
            tree.nodes[node].faces.push(s0);
            tree.nodes[node].faces.push(s1);

            subdivide_face(tree, node, s0, bsp, config, faces, stats)?;
            subdivide_face(tree, node, s1, bsp, config, faces, stats)?;
            return Ok(());
        }
    }
    Ok(())
}

fn make_faces_r(
    tree: &mut Tree,
    node: usize,
    map: &MapData,
    bsp: &BspData,
    config: &Config,
    faces: &mut FaceArena,
    stats: &mut FaceStats,
) -> Result<()> {
    if !tree.nodes[node].is_leaf() {
        let children = tree.nodes[node].children;
        for child in children.into_iter().flatten() {
            make_faces_r(tree, child, map, bsp, config, faces, stats)?;
        }

        // merge and chop all visible faces on the node
        if !config.nomerge {
            merge_node_faces(tree, node, map, faces, stats);
        }
        if !config.nosubdiv {
            for f in tree.nodes[node].faces.clone() {
                subdivide_face(tree, node, f, bsp, config, faces, stats)?;
            }
        }
        return Ok(());
    }

    // solid leaves never have visible faces
    if tree.nodes[node].contents.contains(ContentFlags::SOLID) {
        return Ok(());
    }

    for p in tree.nodes[node].portals.clone() {
        let pside = (tree.portals[p].nodes[1] == node) as usize;
        let onnode = match tree.portals[p].onnode {
            Some(n) => n,
            None => continue,
        };
        if let Some(face) = face_from_portal(tree, p, pside, map, bsp, config) {
            stats.nodefaces += 1;
            let idx = faces.alloc(face);
            tree.nodes[onnode].faces.push(idx);
        }
    }
    Ok(())
}

/// Builds, merges and subdivides the visible faces of a model tree.
pub fn make_faces(
    tree: &mut Tree,
    map: &MapData,
    bsp: &BspData,
    config: &Config,
    faces: &mut FaceArena,
) -> Result<()> {
    debug!("--- MakeFaces ---");
    let mut stats = FaceStats::default();
    make_faces_r(tree, tree.headnode, map, bsp, config, faces, &mut stats)?;
    debug!("{:5} makefaces", stats.nodefaces);
    debug!("{:5} merged", stats.merge);
    debug!("{:5} subdivided", stats.subdivide);
    Ok(())
}

// ---- vertex welding and t-junctions ----

#[derive(Default)]
struct TjuncStats {
    totalverts: usize,
    uniqueverts: usize,
    degenerate: usize,
    tjunctions: usize,
    faceoverflows: usize,
    facecollapse: usize,
    badstartverts: usize,
}

/// Spatial hash over the emitted vertices; 0 terminates the chains,
/// which is why vertex 0 stays a dummy.
struct Welder {
    hash: Vec<usize>,
    chain: Vec<usize>,
}

impl Welder {
    fn new(bsp: &BspData) -> Welder {
        Welder {
            hash: vec![0; HASH_SIZE * HASH_SIZE],
            chain: vec![0; bsp.vertexes.len()],
        }
    }

    fn hash_vec(v: &Vec3) -> Result<usize> {
        let x = ((MAX_WORLD_WIDTH + v[0] + 0.5) as i32) >> 7;
        let y = ((MAX_WORLD_WIDTH + v[1] + 0.5) as i32) >> 7;
        if x < 0 || x >= HASH_SIZE as i32 || y < 0 || y >= HASH_SIZE as i32 {
            return Err(CompileError::Internal(
                "vertex outside valid world range".into(),
            ));
        }
        Ok(y as usize * HASH_SIZE + x as usize)
    }

    /// Returns the number of an existing vertex or emits a new one.
    fn get_vertexnum(
        &mut self,
        bsp: &mut BspData,
        input: &Vec3,
        stats: &mut TjuncStats,
    ) -> Result<u16> {
        stats.totalverts += 1;

        let mut vert = *input;
        for c in &mut vert {
            if (*c - rint(*c)).abs() < INTEGRAL_EPSILON {
                *c = rint(*c);
            }
        }

        let h = Welder::hash_vec(&vert)?;
        let mut vnum = self.hash[h];
        while vnum != 0 {
            let p = &bsp.vertexes[vnum].point;
            if (0..3).all(|i| (p[i] - vert[i]).abs() < POINT_EPSILON) {
                return Ok(vnum as u16);
            }
            vnum = self.chain[vnum];
        }

        check_limit("MAX_MAP_VERTS", bsp.vertexes.len(), MAX_MAP_VERTS)?;
        let num = bsp.vertexes.len();
        bsp.vertexes.push(crate::bspfile::DVertex { point: vert });
        bsp.normals.push(crate::bspfile::DNormal::default());
        self.chain.push(self.hash[h]);
        self.hash[h] = num;
        stats.uniqueverts += 1;
        Ok(num as u16)
    }

    /// All hashed vertices in the cells the segment passes through.
    fn edge_verts(&self, v1: &Vec3, v2: &Vec3) -> Vec<usize> {
        let cell = |v: f32| (((MAX_WORLD_WIDTH + v + 0.5) as i32) >> 7).clamp(0, HASH_SIZE as i32 - 1);
        let (mut x1, mut x2) = (cell(v1[0]), cell(v2[0]));
        let (mut y1, mut y2) = (cell(v1[1]), cell(v2[1]));
        if x1 > x2 {
            std::mem::swap(&mut x1, &mut x2);
        }
        if y1 > y2 {
            std::mem::swap(&mut y1, &mut y2);
        }

        let mut verts = Vec::new();
        for x in x1..=x2 {
            for y in y1..=y2 {
                let mut vnum = self.hash[y as usize * HASH_SIZE + x as usize];
                while vnum != 0 {
                    verts.push(vnum);
                    vnum = self.chain[vnum];
                }
            }
        }
        verts
    }
}

/// Rebuilds a face from more vertices than one face can carry by
/// chaining split faces, each holding a window of the loop.
fn face_from_superverts(
    tree: &mut Tree,
    node: usize,
    f: usize,
    superverts: &[u16],
    base: usize,
    faces: &mut FaceArena,
    stats: &mut TjuncStats,
) {
    let total = superverts.len();
    let mut f = f;
    let mut base = base;
    let mut remaining = total;

    while remaining > MAXEDGES {
        stats.faceoverflows += 1;

        let s0 = faces.derive(f);
        faces.faces[s0].vertexnums = (0..MAXEDGES)
            .map(|i| superverts[(i + base) % total])
            .collect();
        tree.nodes[node].faces.push(s0);

        let s1 = faces.derive(f);
        tree.nodes[node].faces.push(s1);
        faces.faces[f].split = [Some(s0), Some(s1)];

        f = s1;
        remaining -= MAXEDGES - 2;
        base = (base + MAXEDGES - 1) % total;
    }

    faces.faces[f].vertexnums = (0..remaining)
        .map(|i| superverts[(i + base) % total])
        .collect();
}

fn emit_vertexes_r(
    tree: &mut Tree,
    node: usize,
    bsp: &mut BspData,
    config: &Config,
    faces: &mut FaceArena,
    welder: &mut Welder,
    stats: &mut TjuncStats,
) -> Result<()> {
    if tree.nodes[node].is_leaf() {
        return Ok(());
    }

    for f in tree.nodes[node].faces.clone() {
        if faces.faces[f].superseded() {
            continue;
        }
        let points = match &faces.faces[f].winding {
            Some(w) => w.points.clone(),
            None => continue,
        };
        let mut superverts = Vec::with_capacity(points.len());
        for p in &points {
            if config.noweld {
                // every point unique
                check_limit("MAX_MAP_VERTS", bsp.vertexes.len(), MAX_MAP_VERTS)?;
                superverts.push(bsp.vertexes.len() as u16);
                bsp.vertexes.push(crate::bspfile::DVertex { point: *p });
                bsp.normals.push(crate::bspfile::DNormal::default());
                welder.chain.push(0);
                stats.totalverts += 1;
                stats.uniqueverts += 1;
            } else {
                superverts.push(welder.get_vertexnum(bsp, p, stats)?);
            }
        }
        // this may fragment the face
        face_from_superverts(tree, node, f, &superverts, 0, faces, stats);
    }

    let children = tree.nodes[node].children;
    for child in children.into_iter().flatten() {
        emit_vertexes_r(tree, child, bsp, config, faces, welder, stats)?;
    }
    Ok(())
}

/// Finds vertices lying on the edge p1-p2 and splits it there. Can
/// reenter for each fragment until no interior vertex remains.
#[allow(clippy::too_many_arguments)]
fn test_edge(
    start: f32,
    end: f32,
    p1: u16,
    p2: u16,
    startvert: usize,
    edge_start: &Vec3,
    edge_dir: &Vec3,
    candidates: &[usize],
    bsp: &BspData,
    superverts: &mut Vec<u16>,
    stats: &mut TjuncStats,
) -> Result<()> {
    if p1 == p2 {
        stats.degenerate += 1;
        return Ok(());
    }

    for k in startvert..candidates.len() {
        let j = candidates[k];
        if j == p1 as usize || j == p2 as usize {
            continue;
        }
        let p = bsp.vertexes[j].point;
        let delta = vector_subtract(&p, edge_start);
        let dist = dot_product(&delta, edge_dir);
        if dist <= start || dist >= end {
            continue; // off an end
        }
        let exact = vector_ma(edge_start, dist, edge_dir);
        let off = vector_subtract(&p, &exact);
        if vector_length(&off) > OFF_EPSILON {
            continue; // not on the edge
        }

        // break the edge
        stats.tjunctions += 1;
        test_edge(start, dist, p1, j as u16, k + 1, edge_start, edge_dir, candidates, bsp, superverts, stats)?;
        test_edge(dist, end, j as u16, p2, k + 1, edge_start, edge_dir, candidates, bsp, superverts, stats)?;
        return Ok(());
    }

    if superverts.len() >= MAX_SUPERVERTS {
        return Err(CompileError::Internal("too many superverts on face".into()));
    }
    superverts.push(p1);
    Ok(())
}

fn fix_face_edges(
    tree: &mut Tree,
    node: usize,
    f: usize,
    bsp: &BspData,
    faces: &mut FaceArena,
    welder: &Welder,
    stats: &mut TjuncStats,
) -> Result<()> {
    if faces.faces[f].superseded() {
        return Ok(());
    }
    let points = faces.faces[f].vertexnums.clone();
    let n = points.len();
    if n == 0 {
        return Ok(());
    }

    let mut superverts: Vec<u16> = Vec::new();
    let mut start = vec![0usize; n];
    let mut count = vec![0usize; n];

    for i in 0..n {
        let p1 = points[i];
        let p2 = points[(i + 1) % n];
        let edge_start = bsp.vertexes[p1 as usize].point;
        let e2 = bsp.vertexes[p2 as usize].point;

        let candidates = welder.edge_verts(&edge_start, &e2);
        let mut edge_dir = vector_subtract(&e2, &edge_start);
        let len = vector_normalize(&mut edge_dir);

        start[i] = superverts.len();
        test_edge(0.0, len, p1, p2, 0, &edge_start, &edge_dir, &candidates, bsp, &mut superverts, stats)?;
        count[i] = superverts.len() - start[i];
    }

    if superverts.len() < 3 {
        // entire face collapsed
        faces.faces[f].vertexnums.clear();
        stats.facecollapse += 1;
        return Ok(());
    }

    // pick a start vertex without tjunctions on either side, which
    // would cause artifacts on trifans
    let mut base = 0;
    let picked = (0..n).find(|&i| count[i] == 1 && count[(i + n - 1) % n] == 1);
    match picked {
        Some(i) => base = start[i],
        None => stats.badstartverts += 1,
    }

    face_from_superverts(tree, node, f, &superverts, base, faces, stats);
    Ok(())
}

fn fix_edges_r(
    tree: &mut Tree,
    node: usize,
    bsp: &BspData,
    faces: &mut FaceArena,
    welder: &Welder,
    stats: &mut TjuncStats,
) -> Result<()> {
    if tree.nodes[node].is_leaf() {
        return Ok(());
    }
    for f in tree.nodes[node].faces.clone() {
        fix_face_edges(tree, node, f, bsp, faces, welder, stats)?;
    }
    let children = tree.nodes[node].children;
    for child in children.into_iter().flatten() {
        fix_edges_r(tree, child, bsp, faces, welder, stats)?;
    }
    Ok(())
}

/// Welds all face vertices into the shared vertex pool, then breaks
/// every edge on vertices that lie along it so adjacent faces of
/// different subdivision can't leave cracks.
pub fn fix_tjuncs(
    tree: &mut Tree,
    bsp: &mut BspData,
    config: &Config,
    faces: &mut FaceArena,
) -> Result<()> {
    debug!("--- FixTjuncs ---");
    let mut welder = Welder::new(bsp);
    let mut stats = TjuncStats::default();

    let head = tree.headnode;
    emit_vertexes_r(tree, head, bsp, config, faces, &mut welder, &mut stats)?;
    debug!("{} unique from {} verts", stats.uniqueverts, stats.totalverts);

    if !config.notjunc {
        fix_edges_r(tree, head, bsp, faces, &welder, &mut stats)?;
    }
    debug!("{:5} edges degenerated", stats.degenerate);
    debug!("{:5} faces degenerated", stats.facecollapse);
    debug!("{:5} edges added by tjunctions", stats.tjunctions);
    debug!("{:5} faces added by tjunctions", stats.faceoverflows);
    debug!("{:5} bad start verts", stats.badstartverts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bspfile::DTexinfo;

    fn square(x0: f32, x1: f32, y0: f32, y1: f32) -> Winding {
        Winding::new(vec![
            [x0, y0, 0.0],
            [x1, y0, 0.0],
            [x1, y1, 0.0],
            [x0, y1, 0.0],
        ])
    }

    #[test]
    fn test_merge_abutting_squares() {
        // squares sharing the x=64 edge; the colinear joints vanish
        let a = square(0.0, 64.0, 0.0, 64.0);
        let b = square(64.0, 128.0, 0.0, 64.0);
        let merged = try_merge_winding(&a, &b, &[0.0, 0.0, -1.0]).unwrap();
        assert_eq!(merged.points.len(), 4);
        assert!((merged.area() - (a.area() + b.area())).abs() < 0.01);
    }

    #[test]
    fn test_merge_rejects_offset_squares() {
        // edges overlap but the endpoints don't coincide
        let a = square(0.0, 64.0, 0.0, 64.0);
        let b = square(64.0, 128.0, 32.0, 96.0);
        assert!(try_merge_winding(&a, &b, &[0.0, 0.0, -1.0]).is_none());
    }

    #[test]
    fn test_merge_keeps_bent_joints() {
        // the right piece tapers, so the boundary bends at the joint
        // vertices and they must survive
        let a = square(0.0, 64.0, 0.0, 64.0);
        let b = Winding::new(vec![
            [64.0, 0.0, 0.0],
            [128.0, 16.0, 0.0],
            [128.0, 48.0, 0.0],
            [64.0, 64.0, 0.0],
        ]);
        let merged = try_merge_winding(&a, &b, &[0.0, 0.0, -1.0]).unwrap();
        assert_eq!(merged.points.len(), 6);
    }

    #[test]
    fn test_merge_rejects_concave_result() {
        // the right piece flares outward past the shared edge
        let a = square(0.0, 64.0, 0.0, 64.0);
        let b = Winding::new(vec![
            [64.0, 0.0, 0.0],
            [128.0, -16.0, 0.0],
            [128.0, 80.0, 0.0],
            [64.0, 64.0, 0.0],
        ]);
        assert!(try_merge_winding(&a, &b, &[0.0, 0.0, -1.0]).is_none());
    }

    #[test]
    fn test_subdivide_splits_wide_face() {
        let mut tree = Tree::new();
        let node = tree.alloc_node();
        tree.nodes[node].planenum = 0;

        let mut bsp = BspData::new();
        bsp.texinfo.push(DTexinfo {
            vecs: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
            ..Default::default()
        });
        let mut config = Config::default();
        config.subdivide_size = 256.0;

        let mut faces = FaceArena::default();
        let f = faces.alloc(Face {
            winding: Some(square(0.0, 1024.0, 0.0, 64.0)),
            ..Default::default()
        });
        tree.nodes[node].faces.push(f);

        let mut stats = FaceStats::default();
        subdivide_face(&mut tree, node, f, &bsp, &config, &mut faces, &mut stats).unwrap();
        assert!(stats.subdivide >= 3);
        assert!(faces.faces[f].superseded());

        let mut area = 0.0;
        for &fi in &tree.nodes[node].faces {
            let face = &faces.faces[fi];
            if face.superseded() {
                continue;
            }
            let w = face.winding.as_ref().unwrap();
            area += w.area();
            // every live fragment fits the cache budget
            let extent = w
                .points
                .iter()
                .map(|p| p[0])
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
            assert!(extent.1 - extent.0 <= 256.0 + 0.1);
        }
        assert!((area - 1024.0 * 64.0).abs() < 1.0);
    }

    #[test]
    fn test_vertex_welding_dedups_near_points() {
        let mut bsp = BspData::new();
        let mut welder = Welder::new(&bsp);
        let mut stats = TjuncStats::default();
        let a = welder
            .get_vertexnum(&mut bsp, &[16.0, 16.0, 0.0], &mut stats)
            .unwrap();
        let b = welder
            .get_vertexnum(&mut bsp, &[16.003, 15.996, 0.0], &mut stats)
            .unwrap();
        let c = welder
            .get_vertexnum(&mut bsp, &[24.0, 16.0, 0.0], &mut stats)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(stats.uniqueverts, 2);
        // snapping made the near-integral point exact
        assert_eq!(bsp.vertexes[a as usize].point, [16.0, 16.0, 0.0]);
    }

    #[test]
    fn test_face_from_superverts_fragments_long_loops() {
        let mut tree = Tree::new();
        let node = tree.alloc_node();
        let mut faces = FaceArena::default();
        let f = faces.alloc(Face::default());
        tree.nodes[node].faces.push(f);

        let superverts: Vec<u16> = (1..=30).collect();
        let mut stats = TjuncStats::default();
        face_from_superverts(&mut tree, node, f, &superverts, 0, &mut faces, &mut stats);

        assert_eq!(stats.faceoverflows, 1);
        assert!(faces.faces[f].superseded());
        // the live fragments together still carry every vertex
        let mut seen: Vec<u16> = Vec::new();
        for &fi in &tree.nodes[node].faces {
            let face = &faces.faces[fi];
            if !face.superseded() {
                assert!(face.vertexnums.len() <= MAXEDGES);
                seen.extend(&face.vertexnums);
            }
        }
        for v in 1..=30u16 {
            assert!(seen.contains(&v));
        }
    }

    #[test]
    fn test_edge_break_on_interior_vertex() {
        let mut bsp = BspData::new();
        let mut welder = Welder::new(&bsp);
        let mut stats = TjuncStats::default();
        let p1 = welder.get_vertexnum(&mut bsp, &[0.0, 0.0, 0.0], &mut stats).unwrap();
        let p2 = welder.get_vertexnum(&mut bsp, &[64.0, 0.0, 0.0], &mut stats).unwrap();
        // a vertex from some other face in the middle of the edge
        let mid = welder.get_vertexnum(&mut bsp, &[32.0, 0.0, 0.0], &mut stats).unwrap();

        let edge_start = [0.0, 0.0, 0.0];
        let edge_dir = [1.0, 0.0, 0.0];
        let candidates = welder.edge_verts(&edge_start, &[64.0, 0.0, 0.0]);
        let mut superverts = Vec::new();
        test_edge(0.0, 64.0, p1, p2, 0, &edge_start, &edge_dir, &candidates, &bsp, &mut superverts, &mut stats).unwrap();

        assert_eq!(stats.tjunctions, 1);
        assert_eq!(superverts, vec![p1, mid]);
    }
}
