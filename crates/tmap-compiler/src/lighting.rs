// lighting.rs -- light source collection
//
// Direct lights come from three places: emissive surface patches,
// point/spot light entities, and the worldspawn sun/ambient keys.
// The night and day passes each build their own light list; day-only
// entity lights are selected by spawnflag.

use crate::bspfile::BspData;
use crate::config::{Config, LIGHTMAP_DAY};
use crate::map::MapData;
use crate::patches::Patch;
use log::{info, warn};
use std::collections::HashMap;
use std::f32::consts::PI;
use tmap_shared::defines::SurfaceFlags;
use tmap_shared::math::*;

/// Patches dimmer than this on every channel are not worth a light.
pub(crate) const DIRECT_LIGHT: f32 = 3.0;

/// Pseudo angle values for straight up/down spotlights.
const ANGLE_UP: f32 = -1.0;
const ANGLE_DOWN: f32 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightType {
    /// Inverse linear falloff.
    Point,
    /// Point light restricted to a cone.
    Spot,
    /// Area light with inverse square falloff and two cosine terms.
    Surface,
}

#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightType,
    pub origin: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub normal: Vec3,
    /// Cosine of the spot cone half angle.
    pub stopdot: f32,
}

/// Scales a color so its largest component is 1, returning the former
/// maximum.
pub fn color_normalize(color: &Vec3) -> (Vec3, f32) {
    let max = color[0].max(color[1]).max(color[2]);
    if max == 0.0 {
        return ([1.0, 1.0, 1.0], 0.0);
    }
    (vector_scale(color, 1.0 / max), max)
}

fn find_target_entity<'a>(map: &'a MapData, target: &str) -> Option<&'a crate::map::Entity> {
    map.entities.iter().find(|e| e.value("targetname") == target)
}

fn spot_normal(map: &MapData, ent: &crate::map::Entity, origin: &Vec3) -> Vec3 {
    let target = ent.value("target");
    if !target.is_empty() {
        if let Some(e2) = find_target_entity(map, target) {
            let mut dir = vector_subtract(&e2.vector_for_key("origin"), origin);
            vector_normalize(&mut dir);
            return dir;
        }
        warn!(
            "light at ({:.0} {:.0} {:.0}) has missing target '{target}'",
            origin[0], origin[1], origin[2]
        );
    }

    let angle = ent.float_for_key("angle");
    if angle == ANGLE_UP {
        [0.0, 0.0, 1.0]
    } else if angle == ANGLE_DOWN {
        [0.0, 0.0, -1.0]
    } else {
        let rad = angle / 180.0 * PI;
        [rad.cos(), rad.sin(), 0.0]
    }
}

/// Applies the worldspawn sun and ambient keys for one pass to the
/// config. Key names carry a _day or _night suffix.
fn apply_worldspawn_keys(map: &MapData, config: &mut Config, pass: usize) {
    let world = &map.entities[0];
    let suffix = if pass == LIGHTMAP_DAY { "day" } else { "night" };

    let light = world.value(&format!("light_{suffix}"));
    if !light.is_empty() {
        config.sun_intensity[pass] = light.parse().unwrap_or(0.0);
    }

    let angles = world.value(&format!("angles_{suffix}"));
    if !angles.is_empty() {
        let v = world.vector_for_key(&format!("angles_{suffix}"));
        let pitch = v[0] / 180.0 * PI;
        let yaw = v[1] / 180.0 * PI;
        config.sun_dir[pass] = [
            yaw.cos() * pitch.sin(),
            yaw.sin() * pitch.sin(),
            pitch.cos(),
        ];
    }

    let color = world.value(&format!("color_{suffix}"));
    if !color.is_empty() {
        config.sun_color[pass] = world.vector_for_key(&format!("color_{suffix}"));
    }

    let ambient = world.value(&format!("ambient_{suffix}"));
    if !ambient.is_empty() {
        config.ambient[pass] = world.vector_for_key(&format!("ambient_{suffix}"));
    }

    (config.sun_color[pass], _) = color_normalize(&config.sun_color[pass]);
    config.ambient[pass] = vector_scale(&config.ambient[pass], 128.0);
}

/// Builds the direct light list for one lightmap pass.
pub fn build_lights(
    map: &MapData,
    patches: &[Patch],
    config: &mut Config,
    pass: usize,
) -> Vec<Light> {
    let mut lights = Vec::new();

    // emissive patches become area lights
    for p in patches {
        if p.totallight[0] < DIRECT_LIGHT
            && p.totallight[1] < DIRECT_LIGHT
            && p.totallight[2] < DIRECT_LIGHT
        {
            continue;
        }
        let (color, max) = color_normalize(&p.totallight);
        lights.push(Light {
            kind: LightType::Surface,
            origin: p.origin,
            color,
            intensity: max * p.area * config.surface_scale,
            normal: p.normal,
            stopdot: 0.0,
        });
    }

    // light entities
    for ent in &map.entities[1..] {
        if !ent.classname().starts_with("light") {
            continue;
        }
        if pass == LIGHTMAP_DAY {
            let spawnflags = ent.float_for_key("spawnflags") as u32;
            if spawnflags & 1 == 0 {
                continue;
            }
        }

        let origin = ent.vector_for_key("origin");
        let mut intensity = ent.float_for_key("light");
        if intensity == 0.0 {
            intensity = 100.0;
        }

        let color_key = ent.value("_color");
        let color = if color_key.is_empty() {
            [1.0, 1.0, 1.0]
        } else {
            color_normalize(&ent.vector_for_key("_color")).0
        };

        let mut light = Light {
            kind: LightType::Point,
            origin,
            color,
            intensity: intensity * config.entity_scale,
            normal: VEC3_ORIGIN,
            stopdot: 0.0,
        };

        if ent.classname() == "light_spot" || !ent.value("target").is_empty() {
            light.kind = LightType::Spot;
            let mut cone = ent.float_for_key("_cone");
            if cone == 0.0 {
                cone = 10.0;
            }
            light.stopdot = (cone / 180.0 * PI).cos();
            light.normal = spot_normal(map, ent, &origin);
        }
        lights.push(light);
    }

    apply_worldspawn_keys(map, config, pass);

    info!(
        "{} direct lights for the {} pass",
        lights.len(),
        if pass == LIGHTMAP_DAY { "day" } else { "night" }
    );
    lights
}

// ---- phong vertex normals ----

#[inline]
fn point_key(p: &Vec3) -> [i32; 3] {
    [
        (p[0] / EQUAL_EPSILON).round() as i32,
        (p[1] / EQUAL_EPSILON).round() as i32,
        (p[2] / EQUAL_EPSILON).round() as i32,
    ]
}

/// Averages the face plane normals onto the shared vertices of all
/// phong-shaded faces. Vertices that were not welded but sit on the
/// same point still share a normal.
pub fn build_vertex_normals(bsp: &mut BspData) {
    let mut accum: HashMap<[i32; 3], Vec3> = HashMap::new();

    for face in &bsp.faces {
        let tex = &bsp.texinfo[face.texinfo as usize];
        if !tex.surface_flags.contains(SurfaceFlags::PHONG) {
            continue;
        }
        let plane = &bsp.planes[face.planenum as usize];
        let normal = if face.side != 0 {
            vector_scale(&plane.normal, -1.0)
        } else {
            plane.normal
        };
        for i in 0..face.numedges as usize {
            let point = bsp.face_vertex(face, i);
            let e = accum.entry(point_key(&point)).or_insert(VEC3_ORIGIN);
            *e = vector_add(e, &normal);
        }
    }
    if accum.is_empty() {
        return;
    }

    for i in 0..bsp.vertexes.len() {
        if let Some(sum) = accum.get(&point_key(&bsp.vertexes[i].point)) {
            let mut n = *sum;
            if vector_normalize(&mut n) > 0.0 {
                bsp.normals[i].normal = n;
            }
        }
    }
}

/// Normal for a sample position on a phong face: the stored normal of
/// the nearest face vertex.
pub fn sample_normal(bsp: &BspData, face: &crate::bspfile::DFace, pos: &Vec3) -> Vec3 {
    let mut best = f32::MAX;
    let mut normal = VEC3_ORIGIN;
    for i in 0..face.numedges as usize {
        let vnum = bsp.face_vertexnum(face, i);
        let delta = vector_subtract(pos, &bsp.vertexes[vnum].point);
        let dist = dot_product(&delta, &delta);
        if dist < best {
            best = dist;
            normal = bsp.normals[vnum].normal;
        }
    }
    normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patches::build_patches;
    use crate::testutil::*;
    use crate::textures::{NoTextures, Reflectivity};

    #[test]
    fn test_color_normalize() {
        let (c, max) = color_normalize(&[2.0, 1.0, 0.5]);
        assert_eq!(max, 2.0);
        assert_eq!(c, [1.0, 0.5, 0.25]);
        let (c, max) = color_normalize(&VEC3_ORIGIN);
        assert_eq!(max, 0.0);
        assert_eq!(c, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_point_light_from_entity() {
        let world = cuboid_brush(&[-64.0, -64.0, -16.0], &[64.0, 64.0, 0.0]);
        let source = map_source(&world, &[point_light(&[0.0, 0.0, 64.0], 300.0)]);
        let (map, _, mut config) = compile_map_source(&source);

        let lights = build_lights(&map, &[], &mut config, 0);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].kind, LightType::Point);
        assert_eq!(lights[0].intensity, 300.0);
        assert_eq!(lights[0].origin, [0.0, 0.0, 64.0]);
        assert_eq!(lights[0].color, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_day_pass_needs_spawnflag() {
        let world = cuboid_brush(&[-64.0, -64.0, -16.0], &[64.0, 64.0, 0.0]);
        let night_only = point_light(&[0.0, 0.0, 64.0], 300.0);
        let day = "{\n\"classname\" \"light\"\n\"origin\" \"32 0 64\"\n\"spawnflags\" \"1\"\n}\n";
        let source = map_source(&world, &[night_only, day.to_string()]);
        let (map, _, mut config) = compile_map_source(&source);

        assert_eq!(build_lights(&map, &[], &mut config, 0).len(), 2);
        assert_eq!(build_lights(&map, &[], &mut config, 1).len(), 1);
    }

    #[test]
    fn test_spotlight_points_at_target() {
        let world = cuboid_brush(&[-64.0, -64.0, -16.0], &[64.0, 64.0, 0.0]);
        let spot = "{\n\"classname\" \"light\"\n\"origin\" \"0 0 128\"\n\"target\" \"t1\"\n}\n";
        let info = "{\n\"classname\" \"info_null\"\n\"targetname\" \"t1\"\n\"origin\" \"0 0 0\"\n}\n";
        let source = map_source(&world, &[spot.to_string(), info.to_string()]);
        let (map, _, mut config) = compile_map_source(&source);

        let lights = build_lights(&map, &[], &mut config, 0);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].kind, LightType::Spot);
        assert_eq!(lights[0].normal, [0.0, 0.0, -1.0]);
        // default 10 degree cone
        assert!((lights[0].stopdot - (10.0f32 / 180.0 * PI).cos()).abs() < 1e-6);
    }

    #[test]
    fn test_surface_lights_from_patches() {
        let brush = cuboid_brush_flags(
            &[-64.0, -64.0, -16.0],
            &[64.0, 64.0, 0.0],
            "tex/lamp",
            "257 1 100",
        );
        let (map, bsp, mut config) = compile_map_source(&wrap_worldspawn(&brush));
        let mut colors = Reflectivity::new(&NoTextures);
        let patches = build_patches(&bsp, &mut colors);

        let lights = build_lights(&map, &patches, &mut config, 0);
        assert!(!lights.is_empty());
        for l in &lights {
            assert_eq!(l.kind, LightType::Surface);
            assert!(l.intensity > 0.0);
        }
    }

    #[test]
    fn test_worldspawn_sun_keys() {
        let world = cuboid_brush(&[-64.0, -64.0, -16.0], &[64.0, 64.0, 0.0]);
        let source = format!(
            "{{\n\"classname\" \"worldspawn\"\n\"light_day\" \"160\"\n\"angles_day\" \"30 210\"\n\"ambient_day\" \"0.4 0.4 0.4\"\n{world}}}\n"
        );
        let (map, _, mut config) = compile_map_source(&source);

        build_lights(&map, &[], &mut config, LIGHTMAP_DAY);
        assert_eq!(config.sun_intensity[LIGHTMAP_DAY], 160.0);
        for c in config.ambient[LIGHTMAP_DAY] {
            assert!((c - 51.2).abs() < 1e-3);
        }
        let d = config.sun_dir[LIGHTMAP_DAY];
        let pitch = 30.0f32 / 180.0 * PI;
        let yaw = 210.0f32 / 180.0 * PI;
        assert!((d[0] - yaw.cos() * pitch.sin()).abs() < 1e-6);
        assert!((d[2] - pitch.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_vertex_normals_average_on_phong_faces() {
        // phong-flagged box: ridge vertices blend adjacent face planes
        let brush = cuboid_brush_flags(
            &[0.0, 0.0, 0.0],
            &[64.0, 64.0, 64.0],
            "tex/rock",
            "257 1024 0",
        );
        let (_, mut bsp, _) = compile_map_source(&wrap_worldspawn(&brush));
        build_vertex_normals(&mut bsp);

        let mut set = 0;
        for n in &bsp.normals[1..] {
            let len = vector_length(&n.normal);
            if len > 0.0 {
                assert!((len - 1.0).abs() < 1e-5);
                set += 1;
            }
        }
        assert!(set > 0);
    }
}
