// testutil.rs -- map-source builders shared by the compiler tests

use crate::bspfile::BspData;
use crate::config::Config;
use crate::faces::FaceArena;
use crate::levels::{process_sub_models, process_world_model};
use crate::map::{load_map, MapData};
use crate::writebsp::{begin_bsp_file, emit_brushes, emit_planes, EdgeTable};
use tmap_shared::math::{vector_add, Vec3};

fn side_line(p0: &Vec3, p1: &Vec3, p2: &Vec3, texture: &str, flags: &str) -> String {
    format!(
        "( {} {} {} ) ( {} {} {} ) ( {} {} {} ) {} 0 0 0 1 1 {}\n",
        p0[0], p0[1], p0[2], p1[0], p1[1], p1[2], p2[0], p2[1], p2[2], texture, flags
    )
}

/// A face with outward normal cross(u, v), through base point b.
fn face(b: Vec3, u: Vec3, v: Vec3, texture: &str, flags: &str) -> String {
    side_line(&vector_add(&b, &u), &b, &vector_add(&b, &v), texture, flags)
}

pub fn cuboid_brush_flags(mins: &Vec3, maxs: &Vec3, texture: &str, flags: &str) -> String {
    let (x0, y0, z0) = (mins[0], mins[1], mins[2]);
    let (x1, y1, z1) = (maxs[0], maxs[1], maxs[2]);
    let mut s = String::from("{\n");
    // -x +x -y +y -z +z
    s += &face([x0, y0, z0], [0.0, 0.0, 8.0], [0.0, 8.0, 0.0], texture, flags);
    s += &face([x1, y0, z0], [0.0, 8.0, 0.0], [0.0, 0.0, 8.0], texture, flags);
    s += &face([x0, y0, z0], [8.0, 0.0, 0.0], [0.0, 0.0, 8.0], texture, flags);
    s += &face([x0, y1, z0], [0.0, 0.0, 8.0], [8.0, 0.0, 0.0], texture, flags);
    s += &face([x0, y0, z0], [0.0, 8.0, 0.0], [8.0, 0.0, 0.0], texture, flags);
    s += &face([x0, y0, z1], [8.0, 0.0, 0.0], [0.0, 8.0, 0.0], texture, flags);
    s += "}\n";
    s
}

/// A solid cuboid on level 1, as an editor would write it.
pub fn cuboid_brush(mins: &Vec3, maxs: &Vec3) -> String {
    cuboid_brush_flags(mins, maxs, "tex/base_wall", "257 0 0")
}

pub fn cuboid_brush_textured(mins: &Vec3, maxs: &Vec3, texture: &str) -> String {
    cuboid_brush_flags(mins, maxs, texture, "0 0 0")
}

/// A 64-unit cube with the top sheared from z=64 at x=0 down to z=32
/// at x=64, leaving a single non-axial face.
pub fn wedge_brush() -> String {
    let t = "tex/base_wall";
    let f = "1 0 0";
    let mut s = String::from("{\n");
    s += &face([0.0, 0.0, 0.0], [0.0, 0.0, 8.0], [0.0, 8.0, 0.0], t, f);
    s += &face([64.0, 0.0, 0.0], [0.0, 8.0, 0.0], [0.0, 0.0, 8.0], t, f);
    s += &face([0.0, 0.0, 0.0], [8.0, 0.0, 0.0], [0.0, 0.0, 8.0], t, f);
    s += &face([0.0, 64.0, 0.0], [0.0, 0.0, 8.0], [8.0, 0.0, 0.0], t, f);
    s += &face([0.0, 0.0, 0.0], [0.0, 8.0, 0.0], [8.0, 0.0, 0.0], t, f);
    // slanted top
    s += &side_line(&[64.0, 0.0, 32.0], &[0.0, 0.0, 64.0], &[0.0, 64.0, 64.0], t, f);
    s += "}\n";
    s
}

pub fn wrap_worldspawn(brushes: &str) -> String {
    format!("{{\n\"classname\" \"worldspawn\"\n{brushes}}}\n")
}

/// Worldspawn plus any extra entities given as complete blocks.
pub fn map_source(world_brushes: &str, entities: &[String]) -> String {
    let mut s = wrap_worldspawn(world_brushes);
    for e in entities {
        s += e;
    }
    s
}

/// Runs the geometry pipeline on a map source, up to and including
/// model emission.
pub fn compile_map_source(source: &str) -> (MapData, BspData, Config) {
    compile_map_config(source, Config::default())
}

pub fn compile_map_config(source: &str, mut config: Config) -> (MapData, BspData, Config) {
    let mut bsp = BspData::new();
    begin_bsp_file(&mut bsp);
    let mut map = load_map(source, &mut config, &mut bsp).unwrap();
    let mut faces = FaceArena::default();
    let mut edges = EdgeTable::new();
    process_world_model(&mut map, &mut bsp, &mut faces, &mut edges, &config).unwrap();
    process_sub_models(&mut map, &mut bsp, &mut faces, &mut edges, &config).unwrap();
    emit_planes(&map, &mut bsp);
    emit_brushes(&map, &mut bsp).unwrap();
    (map, bsp, config)
}

pub fn point_light(origin: &Vec3, light: f32) -> String {
    format!(
        "{{\n\"classname\" \"light\"\n\"origin\" \"{} {} {}\"\n\"light\" \"{}\"\n}}\n",
        origin[0], origin[1], origin[2], light
    )
}
