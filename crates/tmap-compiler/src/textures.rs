// textures.rs -- texinfo interning and texture reflectivity
//
// Texture projection follows the quake lineage: pick the dominant
// base axis pair for the face normal, then rotate/scale/shift it by
// the brush side's texture descriptor. Identical texinfo records are
// shared.

use crate::bspfile::{BspData, DTexinfo};
use crate::errors::{check_limit, Result};
use log::warn;
use std::collections::HashMap;
use tmap_shared::defines::{SurfaceFlags, MAX_MAP_TEXINFO};
use tmap_shared::math::*;

/// Texture descriptor as written in the map source for one side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrushTexture {
    pub name: String,
    pub shift: [f32; 2],
    pub rotate: f32,
    pub scale: [f32; 2],
    pub surface_flags: SurfaceFlags,
    pub value: i32,
}

#[rustfmt::skip]
const BASEAXIS: [[Vec3; 3]; 6] = [
    [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]],   // floor
    [[0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]],  // ceiling
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]],   // west wall
    [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]],  // east wall
    [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]],   // south wall
    [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]],  // north wall
];

fn texture_axis_from_plane(normal: &Vec3) -> (Vec3, Vec3) {
    let mut best = 0.0;
    let mut best_axis = 0;
    for (i, axis) in BASEAXIS.iter().enumerate() {
        let dot = dot_product(normal, &axis[0]);
        if dot > best {
            best = dot;
            best_axis = i;
        }
    }
    (BASEAXIS[best_axis][1], BASEAXIS[best_axis][2])
}

/// Interns the texinfo record for one brush side. `origin` shifts the
/// projection for origin-brush entities; `is_terrain` marks surfaces
/// that later get per-vertex normals regardless of their flags.
pub fn texinfo_for_brush_texture(
    data: &mut BspData,
    td: &BrushTexture,
    plane_normal: &Vec3,
    origin: &Vec3,
    is_terrain: bool,
) -> Result<u16> {
    let (vecs, shift) = texture_vectors(td, plane_normal, origin);

    let mut tx = DTexinfo {
        texture: td.name.clone(),
        surface_flags: td.surface_flags,
        value: td.value,
        ..Default::default()
    };
    if is_terrain {
        tx.surface_flags |= SurfaceFlags::PHONG;
    }
    for i in 0..2 {
        for j in 0..3 {
            tx.vecs[i][j] = vecs[i][j];
        }
        tx.vecs[i][3] = shift[i];
    }

    // reuse an identical record
    for (i, existing) in data.texinfo.iter().enumerate() {
        if existing.texture == tx.texture
            && existing.surface_flags == tx.surface_flags
            && existing.value == tx.value
            && existing.vecs == tx.vecs
        {
            return Ok(i as u16);
        }
    }

    check_limit("MAX_MAP_TEXINFO", data.texinfo.len(), MAX_MAP_TEXINFO)?;
    data.texinfo.push(tx);
    Ok((data.texinfo.len() - 1) as u16)
}

fn texture_vectors(td: &BrushTexture, plane_normal: &Vec3, origin: &Vec3) -> ([Vec3; 2], [f32; 2]) {
    let (s_axis, t_axis) = texture_axis_from_plane(plane_normal);

    let mut scale = td.scale;
    if scale[0] == 0.0 {
        scale[0] = 1.0;
    }
    if scale[1] == 0.0 {
        scale[1] = 1.0;
    }

    // rotate axis
    let (sinv, cosv) = if td.rotate == 0.0 {
        (0.0, 1.0)
    } else if td.rotate == 90.0 {
        (1.0, 0.0)
    } else if td.rotate == 180.0 {
        (0.0, -1.0)
    } else if td.rotate == 270.0 {
        (-1.0, 0.0)
    } else {
        let ang = td.rotate.to_radians();
        (ang.sin(), ang.cos())
    };

    // rotation happens in the plane spanned by the base s/t axes
    let axis_index = |v: &Vec3| if v[0] != 0.0 { 0 } else if v[1] != 0.0 { 1 } else { 2 };
    let sv = axis_index(&s_axis);
    let tv = axis_index(&t_axis);
    let rotate = |v: &Vec3| -> Vec3 {
        let mut out = *v;
        out[sv] = cosv * v[sv] - sinv * v[tv];
        out[tv] = sinv * v[sv] + cosv * v[tv];
        out
    };

    let mut vecs = [rotate(&s_axis), rotate(&t_axis)];
    for i in 0..2 {
        vecs[i] = vector_scale(&vecs[i], 1.0 / scale[i]);
    }

    let shift = [
        td.shift[0] + dot_product(origin, &vecs[0]),
        td.shift[1] + dot_product(origin, &vecs[1]),
    ];
    (vecs, shift)
}

/// Source of per-texture average colors. Image decoding is outside
/// the compiler; the caller supplies whatever loader it has.
pub trait TextureColors: Sync {
    /// Average RGB of the texture in [0,1], or None if it can't load.
    fn average_color(&self, name: &str) -> Option<Vec3>;
}

/// Fallback source that never loads anything.
pub struct NoTextures;

impl TextureColors for NoTextures {
    fn average_color(&self, _name: &str) -> Option<Vec3> {
        None
    }
}

const GRAY: Vec3 = [0.5, 0.5, 0.5];

/// Per-compile cache of texture reflectivity colors.
pub struct Reflectivity<'a> {
    source: &'a dyn TextureColors,
    cache: HashMap<String, Vec3>,
}

impl<'a> Reflectivity<'a> {
    pub fn new(source: &'a dyn TextureColors) -> Self {
        Reflectivity {
            source,
            cache: HashMap::new(),
        }
    }

    pub fn color(&mut self, name: &str) -> Vec3 {
        if let Some(&c) = self.cache.get(name) {
            return c;
        }
        let c = match self.source.average_color(name) {
            Some(c) => c,
            None => {
                warn!("couldn't load texture '{name}', using neutral reflectivity");
                GRAY
            }
        };
        self.cache.insert(name.to_string(), c);
        c
    }
}
