// writebsp.rs -- emission of compiled trees into the tile arrays and
// the on-disk tile file
//
// The tree walk turns nodes, leaves and final faces into their flat
// disk records. Edges are shared between two faces of compatible
// contents when possible; a third face on the same edge always gets a
// fresh one.

use crate::bspfile::*;
use crate::config::Config;
use crate::errors::{check_limit, CompileError, Result};
use crate::faces::FaceArena;
use crate::map::MapData;
use crate::tree::Tree;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, info};
use tmap_shared::defines::*;
use tmap_shared::math::*;

/// Edge bookkeeping for one tile. Sharing never crosses models, and
/// never joins faces of different contents.
#[derive(Debug)]
pub struct EdgeTable {
    first_model_edge: usize,
    /// The one or two faces using each edge, parallel to bsp.edges.
    edge_faces: Vec<[Option<usize>; 2]>,
}

impl EdgeTable {
    pub fn new() -> EdgeTable {
        EdgeTable {
            first_model_edge: 1,
            edge_faces: vec![[None, None]],
        }
    }

    /// Resets edge sharing at a model boundary.
    pub fn begin_model(&mut self, bsp: &BspData) {
        self.first_model_edge = bsp.edges.len();
    }

    /// Returns a surfedge for v1->v2: positive for a new edge, the
    /// negated index when reusing another face's edge backwards.
    fn get_edge(
        &mut self,
        bsp: &mut BspData,
        v1: u16,
        v2: u16,
        f: usize,
        faces: &FaceArena,
        config: &Config,
    ) -> Result<i32> {
        if !config.noshare {
            for i in self.first_model_edge..bsp.edges.len() {
                let edge = bsp.edges[i];
                if v1 == edge.v[1] && v2 == edge.v[0] && self.edge_faces[i][1].is_none() {
                    let other = match self.edge_faces[i][0] {
                        Some(o) => o,
                        None => continue,
                    };
                    // translucent boundaries keep their own edges
                    if faces.faces[other].contents != faces.faces[f].contents {
                        continue;
                    }
                    self.edge_faces[i][1] = Some(f);
                    return Ok(-(i as i32));
                }
            }
        }

        check_limit("MAX_MAP_EDGES", bsp.edges.len(), MAX_MAP_EDGES)?;
        let num = bsp.edges.len();
        bsp.edges.push(DEdge { v: [v1, v2] });
        self.edge_faces.push([Some(f), None]);
        Ok(num as i32)
    }
}

/// Leaf 0 is the error leaf; real leaves are referenced as negative
/// child values and start at 1.
pub fn begin_bsp_file(bsp: &mut BspData) {
    debug_assert!(bsp.leafs.is_empty());
    bsp.leafs.push(DLeaf {
        contents: ContentFlags::SOLID.bits(),
        ..Default::default()
    });
}

/// Copies the interned plane table into the tile.
pub fn emit_planes(map: &MapData, bsp: &mut BspData) {
    bsp.planes.clear();
    for p in &map.planes.planes {
        bsp.planes.push(DPlane {
            normal: p.normal,
            dist: p.dist,
            plane_type: p.plane_type,
        });
    }
}

/// Emits every map brush with its sides. Brush records keep the map
/// order, so a leaf's brush list can reference them by source index.
pub fn emit_brushes(map: &MapData, bsp: &mut BspData) -> Result<()> {
    for mb in &map.brushes {
        check_limit("MAX_MAP_BRUSHES", bsp.dbrushes.len(), MAX_MAP_BRUSHES)?;
        let mut db = DBrush {
            firstside: bsp.brushsides.len() as u32,
            numsides: mb.sides.len() as u32,
            contents: mb.contents.bits(),
        };
        for side in &mb.sides {
            check_limit("MAX_MAP_BRUSHSIDES", bsp.brushsides.len(), MAX_MAP_BRUSHSIDES)?;
            bsp.brushsides.push(DBrushSide {
                planenum: side.planenum,
                texinfo: side.texinfo as i16,
            });
        }
        db.numsides = bsp.brushsides.len() as u32 - db.firstside;
        bsp.dbrushes.push(db);
    }
    debug!("{:5} brushes emitted", bsp.dbrushes.len());
    Ok(())
}

fn emit_face(
    bsp: &mut BspData,
    f: usize,
    faces: &FaceArena,
    edges: &mut EdgeTable,
    config: &Config,
) -> Result<()> {
    let face = &faces.faces[f];
    if face.superseded() || face.vertexnums.len() < 3 {
        return Ok(());
    }

    check_limit("MAX_MAP_FACES", bsp.faces.len(), MAX_MAP_FACES)?;
    let mut df = DFace {
        planenum: face.planenum & !1,
        side: (face.planenum & 1) as u16,
        firstedge: bsp.surfedges.len() as u32,
        texinfo: face.texinfo,
        lightofs: [-1, -1],
        ..Default::default()
    };

    let n = face.vertexnums.len();
    for i in 0..n {
        check_limit("MAX_MAP_SURFEDGES", bsp.surfedges.len(), MAX_MAP_SURFEDGES)?;
        let v1 = face.vertexnums[i];
        let v2 = face.vertexnums[(i + 1) % n];
        let e = edges.get_edge(bsp, v1, v2, f, faces, config)?;
        bsp.surfedges.push(e);
    }
    df.numedges = (bsp.surfedges.len() as u32 - df.firstedge) as u16;
    bsp.faces.push(df);
    Ok(())
}

fn emit_leaf(tree: &Tree, node: usize, bsp: &mut BspData) -> Result<i32> {
    check_limit("MAX_MAP_LEAFS", bsp.leafs.len(), MAX_MAP_LEAFS)?;
    let n = &tree.nodes[node];
    let mut leaf = DLeaf {
        contents: n.contents.bits(),
        first_leafbrush: bsp.leafbrushes.len() as u16,
        ..Default::default()
    };
    for i in 0..3 {
        leaf.mins[i] = n.bounds.mins[i].floor() as i16;
        leaf.maxs[i] = n.bounds.maxs[i].ceil() as i16;
    }

    for b in &n.brushes {
        check_limit("MAX_MAP_LEAFBRUSHES", bsp.leafbrushes.len(), MAX_MAP_LEAFBRUSHES)?;
        let brushnum = b.original as u16;
        // fragments of one source brush land adjacent in the list
        if bsp.leafbrushes.last() != Some(&brushnum)
            || bsp.leafbrushes.len() == leaf.first_leafbrush as usize
        {
            bsp.leafbrushes.push(brushnum);
        }
    }
    leaf.num_leafbrushes = bsp.leafbrushes.len() as u16 - leaf.first_leafbrush;

    bsp.leafs.push(leaf);
    Ok(-(bsp.leafs.len() as i32 - 1) - 1)
}

/// Emits the tree below `node` into the flat node array, returning
/// the emitted node index (or a negative leaf reference).
pub fn emit_drawnode_r(
    tree: &Tree,
    node: usize,
    faces: &FaceArena,
    bsp: &mut BspData,
    edges: &mut EdgeTable,
    config: &Config,
) -> Result<i32> {
    if tree.nodes[node].is_leaf() {
        return emit_leaf(tree, node, bsp);
    }

    check_limit("MAX_MAP_NODES", bsp.nodes.len(), MAX_MAP_NODES)?;
    let num = bsp.nodes.len();
    bsp.nodes.push(DNode::default());

    let n = &tree.nodes[node];
    let mut dn = DNode {
        planenum: n.planenum,
        firstface: bsp.faces.len() as u16,
        ..Default::default()
    };
    for i in 0..3 {
        dn.mins[i] = n.bounds.mins[i].floor() as i16;
        dn.maxs[i] = n.bounds.maxs[i].ceil() as i16;
    }

    for &f in &tree.nodes[node].faces {
        emit_face(bsp, f, faces, edges, config)?;
    }
    dn.numfaces = bsp.faces.len() as u16 - dn.firstface;

    for (i, child) in tree.nodes[node].children.into_iter().enumerate() {
        dn.children[i] = match child {
            Some(c) => emit_drawnode_r(tree, c, faces, bsp, edges, config)?,
            None => LEAFNODE,
        };
    }
    bsp.nodes[num] = dn;
    Ok(num as i32)
}

/// Starts a model record; the matching end_model fills the counts in.
pub fn begin_model(map: &MapData, bsp: &mut BspData, edges: &mut EdgeTable, entitynum: usize) {
    let ent = &map.entities[entitynum];
    let mut bounds = Bounds::new();
    for mb in &map.brushes[ent.firstbrush..ent.firstbrush + ent.numbrushes] {
        if mb.bounds.mins[0] > MAX_WORLD_WIDTH {
            continue; // no valid points
        }
        bounds.add_bounds(&mb.bounds);
    }

    edges.begin_model(bsp);
    bsp.models.push(DModel {
        mins: bounds.mins,
        maxs: bounds.maxs,
        origin: ent.origin,
        headnode: LEAFNODE,
        firstface: bsp.faces.len() as u32,
        ..Default::default()
    });
}

pub fn end_model(bsp: &mut BspData, headnode: i32) {
    let firstface = match bsp.models.last() {
        Some(m) => m.firstface,
        None => return,
    };
    let numfaces = bsp.faces.len() as u32 - firstface;
    if let Some(m) = bsp.models.last_mut() {
        m.headnode = headnode;
        m.numfaces = numfaces;
    }
}

/// Rebuilds the entity string for the tile and logs its checksum; the
/// server compares it against the client's copy.
pub fn unparse_entities(map: &MapData, bsp: &mut BspData) {
    let mut out = String::new();
    for ent in &map.entities {
        out.push_str("{\n");
        for (k, v) in &ent.epairs {
            out.push_str(&format!("\"{k}\" \"{v}\"\n"));
        }
        out.push_str("}\n");
    }

    const CKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    info!("entity string: {} bytes, checksum {:#010x}", out.len(), CKSUM.checksum(out.as_bytes()));
    bsp.entdata = out;
}

// ---- tile file ----

const TILE_IDENT: &[u8; 4] = b"TBSP";
const TILE_VERSION: u32 = 1;
const NUM_LUMPS: usize = 17;

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_vec3(out: &mut Vec<u8>, v: &Vec3) {
    for c in v {
        put_f32(out, *c);
    }
}

fn lump_planes(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for p in &bsp.planes {
        put_vec3(&mut out, &p.normal);
        put_f32(&mut out, p.dist);
        put_u32(&mut out, p.plane_type as u32);
    }
    out
}

fn lump_vertexes(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for v in &bsp.vertexes {
        put_vec3(&mut out, &v.point);
    }
    out
}

fn lump_normals(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for n in &bsp.normals {
        put_vec3(&mut out, &n.normal);
    }
    out
}

fn lump_nodes(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for n in &bsp.nodes {
        put_i32(&mut out, n.planenum);
        put_i32(&mut out, n.children[0]);
        put_i32(&mut out, n.children[1]);
        for i in 0..3 {
            put_i16(&mut out, n.mins[i]);
        }
        for i in 0..3 {
            put_i16(&mut out, n.maxs[i]);
        }
        put_u16(&mut out, n.firstface);
        put_u16(&mut out, n.numfaces);
    }
    out
}

fn lump_leafs(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for l in &bsp.leafs {
        put_u32(&mut out, l.contents);
        for i in 0..3 {
            put_i16(&mut out, l.mins[i]);
        }
        for i in 0..3 {
            put_i16(&mut out, l.maxs[i]);
        }
        put_u16(&mut out, l.first_leafbrush);
        put_u16(&mut out, l.num_leafbrushes);
    }
    out
}

fn lump_texinfo(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for t in &bsp.texinfo {
        for row in &t.vecs {
            for v in row {
                put_f32(&mut out, *v);
            }
        }
        put_u32(&mut out, t.surface_flags.bits());
        put_i32(&mut out, t.value);
        // fixed-width name field, truncated or zero-padded
        let mut name = [0u8; 32];
        let bytes = t.texture.as_bytes();
        let n = bytes.len().min(31);
        name[..n].copy_from_slice(&bytes[..n]);
        out.extend_from_slice(&name);
    }
    out
}

fn lump_faces(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for f in &bsp.faces {
        put_u16(&mut out, f.planenum);
        put_u16(&mut out, f.side);
        put_u32(&mut out, f.firstedge);
        put_u16(&mut out, f.numedges);
        put_u16(&mut out, f.texinfo);
        put_i32(&mut out, f.lightofs[0]);
        put_i32(&mut out, f.lightofs[1]);
    }
    out
}

fn lump_models(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for m in &bsp.models {
        put_vec3(&mut out, &m.mins);
        put_vec3(&mut out, &m.maxs);
        put_vec3(&mut out, &m.origin);
        put_i32(&mut out, m.headnode);
        put_u32(&mut out, m.firstface);
        put_u32(&mut out, m.numfaces);
    }
    out
}

fn lump_brushes(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for b in &bsp.dbrushes {
        put_u32(&mut out, b.firstside);
        put_u32(&mut out, b.numsides);
        put_u32(&mut out, b.contents);
    }
    out
}

fn lump_brushsides(bsp: &BspData) -> Vec<u8> {
    let mut out = Vec::new();
    for s in &bsp.brushsides {
        put_u16(&mut out, s.planenum);
        put_i16(&mut out, s.texinfo);
    }
    out
}

/// Serializes the whole tile as an ident/version header followed by a
/// lump directory and the lump payloads.
pub fn write_tile(bsp: &BspData) -> Vec<u8> {
    let lumps: [Vec<u8>; NUM_LUMPS] = [
        lump_planes(bsp),
        lump_vertexes(bsp),
        lump_normals(bsp),
        lump_nodes(bsp),
        lump_leafs(bsp),
        bsp.leafbrushes.iter().flat_map(|v| v.to_le_bytes()).collect(),
        lump_texinfo(bsp),
        lump_faces(bsp),
        bsp.edges
            .iter()
            .flat_map(|e| [e.v[0].to_le_bytes(), e.v[1].to_le_bytes()])
            .flatten()
            .collect(),
        bsp.surfedges.iter().flat_map(|v| v.to_le_bytes()).collect(),
        lump_models(bsp),
        lump_brushes(bsp),
        lump_brushsides(bsp),
        bsp.lightdata[0].clone(),
        bsp.lightdata[1].clone(),
        bsp.routedata.clone(),
        bsp.entdata.as_bytes().to_vec(),
    ];

    let mut out = Vec::new();
    out.extend_from_slice(TILE_IDENT);
    put_u32(&mut out, TILE_VERSION);

    let mut ofs = (8 + NUM_LUMPS * 8) as u32;
    for lump in &lumps {
        put_u32(&mut out, ofs);
        put_u32(&mut out, lump.len() as u32);
        ofs += lump.len() as u32;
    }
    for lump in &lumps {
        out.extend_from_slice(lump);
    }
    out
}

/// Writes the tile to disk.
pub fn write_tile_file(bsp: &BspData, path: &std::path::Path) -> Result<()> {
    let data = write_tile(bsp);
    info!("writing {} ({} bytes)", path.display(), data.len());
    std::fs::write(path, &data)
        .map_err(|e| CompileError::Internal(format!("couldn't write {}: {e}", path.display())))
}
