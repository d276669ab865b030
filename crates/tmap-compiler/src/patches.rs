// patches.rs -- emissive surface patches
//
// Every face whose texture carries the light flag is cut into small
// patches. The lighting pass turns each patch into a surface light,
// so the subdivision size bounds how pointlike an area light gets.

use crate::bspfile::BspData;
use crate::textures::Reflectivity;
use log::debug;
use tmap_shared::defines::SurfaceFlags;
use tmap_shared::math::*;
use tmap_shared::winding::Winding;

/// Maximum patch extent along any axis, world units.
const PATCH_SUBDIVIDE: f32 = 64.0;

#[derive(Debug, Clone)]
pub struct Patch {
    pub facenum: usize,
    pub winding: Winding,
    /// Patch center lifted off the surface for unoccluded tracing.
    pub origin: Vec3,
    pub normal: Vec3,
    pub area: f32,
    /// Emission color, texture reflectivity scaled by the light value.
    pub totallight: Vec3,
}

fn finish_patch(
    patches: &mut Vec<Patch>,
    winding: Winding,
    facenum: usize,
    normal: &Vec3,
    totallight: &Vec3,
) {
    let area = winding.area();
    if area < 1.0 {
        return;
    }
    let origin = vector_ma(&winding.center(), 2.0, normal);
    patches.push(Patch {
        facenum,
        winding,
        origin,
        normal: *normal,
        area,
        totallight: *totallight,
    });
}

/// Splits the winding along grid planes of PATCH_SUBDIVIDE spacing
/// until no axis extent exceeds the subdivision size.
fn subdivide_patch_r(
    patches: &mut Vec<Patch>,
    winding: Winding,
    facenum: usize,
    normal: &Vec3,
    totallight: &Vec3,
) {
    let bounds = winding.bounds();
    for i in 0..3 {
        if ((bounds.mins[i] + 1.0) / PATCH_SUBDIVIDE).floor()
            < ((bounds.maxs[i] - 1.0) / PATCH_SUBDIVIDE).floor()
        {
            let dist = PATCH_SUBDIVIDE * (1.0 + ((bounds.mins[i] + 1.0) / PATCH_SUBDIVIDE).floor());
            let mut split = VEC3_ORIGIN;
            split[i] = 1.0;

            let (front, back) = winding.clip_epsilon(&split, dist, ON_EPSILON);
            if let Some(f) = front {
                subdivide_patch_r(patches, f, facenum, normal, totallight);
            }
            if let Some(b) = back {
                subdivide_patch_r(patches, b, facenum, normal, totallight);
            }
            return;
        }
    }
    finish_patch(patches, winding, facenum, normal, totallight);
}

/// Builds the patch list for every light-emitting face in the tile.
pub fn build_patches(bsp: &BspData, colors: &mut Reflectivity) -> Vec<Patch> {
    let mut patches = Vec::new();

    for (facenum, face) in bsp.faces.iter().enumerate() {
        let tex = &bsp.texinfo[face.texinfo as usize];
        if !tex.surface_flags.contains(SurfaceFlags::LIGHT) || tex.value <= 0 {
            continue;
        }

        let points: Vec<Vec3> = (0..face.numedges as usize)
            .map(|i| bsp.face_vertex(face, i))
            .collect();
        if points.len() < 3 {
            continue;
        }
        let winding = Winding::new(points);

        let plane = &bsp.planes[face.planenum as usize];
        let normal = if face.side != 0 {
            vector_scale(&plane.normal, -1.0)
        } else {
            plane.normal
        };

        let color = colors.color(&tex.texture);
        let totallight = vector_scale(&color, tex.value as f32);
        subdivide_patch_r(&mut patches, winding, facenum, &normal, &totallight);
    }

    debug!("{} emissive patches", patches.len());
    patches
}
