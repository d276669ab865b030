// bspfile.rs -- the compiled tile: every output array the writer
// serializes and the later phases (tracing, routing, lighting) read

use tmap_shared::defines::*;
use tmap_shared::math::Vec3;

/// Sentinel for leaf nodes in the emitted node array.
pub const LEAFNODE: i32 = -1;

#[derive(Debug, Clone, Copy, Default)]
pub struct DPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub headnode: i32,
    pub firstface: u32,
    pub numfaces: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DVertex {
    pub point: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DNormal {
    pub normal: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DNode {
    pub planenum: i32,
    /// Negative children are -(leafnum + 1).
    pub children: [i32; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstface: u16,
    pub numfaces: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DLeaf {
    pub contents: u32,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub first_leafbrush: u16,
    pub num_leafbrushes: u16,
}

#[derive(Debug, Clone, Default)]
pub struct DTexinfo {
    /// Texture axes: s/t vector plus offset.
    pub vecs: [[f32; 4]; 2],
    pub surface_flags: SurfaceFlags,
    pub value: i32,
    pub texture: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DEdge {
    pub v: [u16; 2],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DFace {
    pub planenum: u16,
    pub side: u16,
    pub firstedge: u32,
    pub numedges: u16,
    pub texinfo: u16,
    /// Byte offset per lightmap (night, day); -1 while unlit.
    pub lightofs: [i32; 2],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DBrush {
    pub firstside: u32,
    pub numsides: u32,
    pub contents: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DBrushSide {
    pub planenum: u16,
    pub texinfo: i16,
}

/// All output arrays for one compiled map tile.
#[derive(Debug, Default)]
pub struct BspData {
    pub models: Vec<DModel>,
    pub vertexes: Vec<DVertex>,
    pub normals: Vec<DNormal>,
    pub planes: Vec<DPlane>,
    pub nodes: Vec<DNode>,
    pub leafs: Vec<DLeaf>,
    pub texinfo: Vec<DTexinfo>,
    pub faces: Vec<DFace>,
    pub edges: Vec<DEdge>,
    pub surfedges: Vec<i32>,
    pub leafbrushes: Vec<u16>,
    pub dbrushes: Vec<DBrush>,
    pub brushsides: Vec<DBrushSide>,
    pub lightdata: [Vec<u8>; 2],
    pub routedata: Vec<u8>,
    pub entdata: String,
}

impl BspData {
    pub fn new() -> Self {
        let mut data = BspData::default();
        // edge 0 is never referenced; real edges start at 1 so that
        // negative surfedges can flag reversed direction
        data.edges.push(DEdge::default());
        // same for vertex 0, which doubles as the hash-chain terminator
        data.vertexes.push(DVertex::default());
        data.normals.push(DNormal::default());
        data
    }

    /// World position of a face vertex i (following surfedge sign).
    pub fn face_vertex(&self, face: &DFace, i: usize) -> Vec3 {
        let e = self.surfedges[face.firstedge as usize + i];
        let v = if e >= 0 {
            self.edges[e as usize].v[0]
        } else {
            self.edges[(-e) as usize].v[1]
        };
        self.vertexes[v as usize].point
    }

    /// Vertex index of a face vertex i (following surfedge sign).
    pub fn face_vertexnum(&self, face: &DFace, i: usize) -> usize {
        let e = self.surfedges[face.firstedge as usize + i];
        if e >= 0 {
            self.edges[e as usize].v[0] as usize
        } else {
            self.edges[(-e) as usize].v[1] as usize
        }
    }
}
