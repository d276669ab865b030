// lightmap.rs -- per-face light sampling and lightmap emission
//
// Every face gets a texture-aligned sample grid at the lightmap
// quantization step. Sample positions are back-projected onto the
// face plane, lit by every direct light with an occlusion trace, and
// finally tone mapped into the packed byte lightmap. Faces are
// independent, so both the gather and the final resolve run on the
// rayon pool; only the byte offset allocation is serialized.

use crate::bspfile::{BspData, DFace};
use crate::config::{Config, LIGHTMAP_DAY};
use crate::errors::{CompileError, Result};
use crate::lighting::{
    build_lights, build_vertex_normals, sample_normal, Light, LightType, DIRECT_LIGHT,
};
use crate::map::MapData;
use crate::patches::{build_patches, Patch};
use crate::textures::Reflectivity;
use crate::trace::{TraceWorld, TL_FLAG_NONE};
use log::info;
use parking_lot::Mutex;
use rayon::prelude::*;
use tmap_shared::defines::*;
use tmap_shared::math::*;

/// Sample budget for a single face.
const SINGLEMAP: usize = 256 * 256 * 4;

const MAX_SAMPLES: usize = 5;
const SAMPLE_OFS: [[f32; 2]; MAX_SAMPLES] =
    [[0.0, 0.0], [-0.4, -0.4], [0.4, -0.4], [0.4, 0.4], [-0.4, 0.4]];

/// Texture-space sampling setup for one face.
struct LightInfo {
    facenormal: Vec3,
    facedist: f32,
    center: Vec3,
    modelorg: Vec3,
    texorg: Vec3,
    worldtotex: [Vec3; 2],
    textoworld: [Vec3; 2],
    texmins: [i32; 2],
    texsize: [i32; 2],
    surfpt: Vec<Vec3>,
}

/// Accumulated float lighting for one face, one entry per sample.
pub struct FaceLight {
    pub samples: Vec<Vec3>,
    pub directions: Vec<Vec3>,
}

impl LightInfo {
    fn new(
        bsp: &BspData,
        face: &DFace,
        modelorg: Vec3,
        lightquant: u8,
        sofs: f32,
        tofs: f32,
    ) -> Result<LightInfo> {
        let plane = &bsp.planes[face.planenum as usize];
        let (facenormal, facedist) = if face.side != 0 {
            (vector_scale(&plane.normal, -1.0), -plane.dist)
        } else {
            (plane.normal, plane.dist)
        };

        let mut l = LightInfo {
            facenormal,
            facedist,
            center: VEC3_ORIGIN,
            modelorg,
            texorg: VEC3_ORIGIN,
            worldtotex: [VEC3_ORIGIN; 2],
            textoworld: [VEC3_ORIGIN; 2],
            texmins: [0; 2],
            texsize: [0; 2],
            surfpt: Vec::new(),
        };
        l.calc_extents(bsp, face, lightquant)?;
        l.calc_vectors(bsp, face);
        l.calc_points(lightquant, sofs, tofs);
        Ok(l)
    }

    /// Face bounds in texture space, quantized to lightmap texels.
    fn calc_extents(&mut self, bsp: &BspData, face: &DFace, lightquant: u8) -> Result<()> {
        let tex = &bsp.texinfo[face.texinfo as usize];
        let mut bounds = Bounds::new();
        let mut stmins = [999999.0f32; 2];
        let mut stmaxs = [-999999.0f32; 2];

        for i in 0..face.numedges as usize {
            let point = bsp.face_vertex(face, i);
            bounds.add_point(&point);
            for j in 0..2 {
                let val = dot_product(&point, &[tex.vecs[j][0], tex.vecs[j][1], tex.vecs[j][2]])
                    + tex.vecs[j][3];
                stmins[j] = stmins[j].min(val);
                stmaxs[j] = stmaxs[j].max(val);
            }
        }

        for i in 0..3 {
            self.center[i] = (bounds.mins[i] + bounds.maxs[i]) / 2.0;
        }

        let step = (1 << lightquant) as f32;
        for i in 0..2 {
            let mins = (stmins[i] / step).floor();
            let maxs = (stmaxs[i] / step).ceil();
            self.texmins[i] = mins as i32;
            self.texsize[i] = (maxs - mins) as i32;
        }
        if (self.texsize[0] * self.texsize[1]) as usize > SINGLEMAP {
            return Err(CompileError::TableOverflow {
                table: "SINGLEMAP",
                value: (self.texsize[0] * self.texsize[1]) as usize,
                limit: SINGLEMAP,
            });
        }
        Ok(())
    }

    /// Derives the texture-to-world projection from the texinfo axes.
    fn calc_vectors(&mut self, bsp: &BspData, face: &DFace) {
        let tex = &bsp.texinfo[face.texinfo as usize];
        for i in 0..2 {
            self.worldtotex[i] = [tex.vecs[i][0], tex.vecs[i][1], tex.vecs[i][2]];
        }

        // a normal to the texture axes; points can move along it
        // without changing their s/t
        let mut texnormal = cross_product(&self.worldtotex[1], &self.worldtotex[0]);
        vector_normalize(&mut texnormal);

        // flip it towards the face normal
        let mut distscale = dot_product(&texnormal, &self.facenormal);
        if distscale == 0.0 {
            distscale = 1.0;
        }
        if distscale < 0.0 {
            distscale = -distscale;
            texnormal = vector_scale(&texnormal, -1.0);
        }
        distscale = 1.0 / distscale;

        for i in 0..2 {
            let len = vector_length(&self.worldtotex[i]);
            let dist = dot_product(&self.worldtotex[i], &self.facenormal) * distscale;
            let v = vector_ma(&self.worldtotex[i], -dist, &texnormal);
            self.textoworld[i] = vector_scale(&v, 1.0 / (len * len));
        }

        // texture origin on the texture plane, projected back onto
        // the face plane
        for i in 0..3 {
            self.texorg[i] =
                -tex.vecs[0][3] * self.textoworld[0][i] - tex.vecs[1][3] * self.textoworld[1][i];
        }
        let dist = (dot_product(&self.texorg, &self.facenormal) - self.facedist - 1.0) * distscale;
        self.texorg = vector_ma(&self.texorg, -dist, &texnormal);
        self.texorg = vector_add(&self.texorg, &self.modelorg);
    }

    /// Back-projects every texel grid point onto the face plane.
    fn calc_points(&mut self, lightquant: u8, sofs: f32, tofs: f32) {
        let w = self.texsize[0] + 1;
        let h = self.texsize[1] + 1;
        let step = (1 << lightquant) as f32;
        let starts = self.texmins[0] as f32 * step;
        let startt = self.texmins[1] as f32 * step;

        self.surfpt.clear();
        for t in 0..h {
            for s in 0..w {
                let us = starts + (s as f32 + sofs) * step;
                let ut = startt + (t as f32 + tofs) * step;
                let mut surf = self.texorg;
                surf = vector_ma(&surf, us, &self.textoworld[0]);
                surf = vector_ma(&surf, ut, &self.textoworld[1]);
                self.surfpt.push(surf);
            }
        }
    }
}

/// Per-face model origin offsets; submodel faces sample in the
/// entity's moved coordinate frame.
fn face_offsets(bsp: &BspData) -> Vec<Vec3> {
    let mut offsets = vec![VEC3_ORIGIN; bsp.faces.len()];
    for model in &bsp.models {
        for f in model.firstface as usize..(model.firstface + model.numfaces) as usize {
            offsets[f] = model.origin;
        }
    }
    offsets
}

/// Adds every visible light contribution at one sample point.
#[allow(clippy::too_many_arguments)]
fn gather_sample_light(
    world: &TraceWorld,
    lights: &[Light],
    sun: (f32, &Vec3, &Vec3),
    mut pos: Vec3,
    normal: &Vec3,
    center: &Vec3,
    lightscale: f32,
    rgb: &mut Vec3,
    direction: &mut Vec3,
) {
    // move off the surface, away from the face center and along the
    // normal, to dodge self-occlusion on the boundary
    let mut away = vector_subtract(&pos, center);
    vector_normalize(&mut away);
    pos = vector_ma(&pos, 0.5, &away);
    pos = vector_ma(&pos, 0.5, normal);

    for l in lights {
        let mut delta = vector_subtract(&l.origin, &pos);
        let dist = vector_normalize(&mut delta);
        let dot = dot_product(&delta, normal);
        if dot <= 0.001 {
            continue; // behind the sample surface
        }

        let scale = match l.kind {
            LightType::Point => (l.intensity - dist) * dot,
            LightType::Surface => {
                let dot2 = -dot_product(&delta, &l.normal);
                if dot2 <= 0.001 {
                    continue; // behind the emitter
                }
                (l.intensity / (dist * dist)) * dot * dot2
            }
            LightType::Spot => {
                let dot2 = -dot_product(&delta, &l.normal);
                if dot2 <= l.stopdot {
                    continue; // outside the cone
                }
                (l.intensity - dist) * dot
            }
        };
        if scale <= 0.0 {
            continue;
        }
        if world.test_line(&pos, &l.origin, TL_FLAG_NONE) {
            continue; // occluded
        }

        *rgb = vector_ma(rgb, scale * lightscale, &l.color);
        *direction = vector_ma(direction, scale * lightscale, &delta);
    }

    let (sun_intensity, sun_color, sun_dir) = sun;
    if sun_intensity == 0.0 {
        return;
    }
    let dot = dot_product(sun_dir, normal);
    if dot <= 0.001 {
        return;
    }
    // long trace toward the sun, well past the world bounds
    let sky = vector_ma(&pos, 8192.0, sun_dir);
    if world.test_line(&pos, &sky, TL_FLAG_NONE) {
        return;
    }
    *rgb = vector_ma(rgb, sun_intensity * dot * lightscale, sun_color);
    *direction = vector_ma(direction, sun_intensity * dot * lightscale, sun_dir);
}

/// Samples all lighting for one face. Returns None for faces that
/// take no lightmap.
#[allow(clippy::too_many_arguments)]
fn build_facelights(
    bsp: &BspData,
    facenum: usize,
    lights: &[Light],
    patches: &[Patch],
    config: &Config,
    world: &TraceWorld,
    modelorg: Vec3,
    pass: usize,
) -> Result<Option<FaceLight>> {
    let face = &bsp.faces[facenum];
    let tex = &bsp.texinfo[face.texinfo as usize];
    if tex.surface_flags.contains(SurfaceFlags::WARP) {
        return Ok(None);
    }

    let numsamples = if config.extrasamples { MAX_SAMPLES } else { 1 };
    let lightscale = 1.0 / numsamples as f32;

    let infos = (0..numsamples)
        .map(|i| {
            LightInfo::new(bsp, face, modelorg, config.lightquant, SAMPLE_OFS[i][0], SAMPLE_OFS[i][1])
        })
        .collect::<Result<Vec<_>>>()?;

    let numsurfpt = infos[0].surfpt.len();
    let mut fl = FaceLight {
        samples: vec![VEC3_ORIGIN; numsurfpt],
        directions: vec![VEC3_ORIGIN; numsurfpt],
    };

    let phong = tex.surface_flags.contains(SurfaceFlags::PHONG);
    let sun = (
        config.sun_intensity[pass],
        &config.sun_color[pass],
        &config.sun_dir[pass],
    );

    for i in 0..numsurfpt {
        for l in &infos {
            let normal = if phong {
                sample_normal(bsp, face, &l.surfpt[i])
            } else {
                l.facenormal
            };
            gather_sample_light(
                world,
                lights,
                sun,
                l.surfpt[i],
                &normal,
                &infos[0].center,
                lightscale,
                &mut fl.samples[i],
                &mut fl.directions[i],
            );
        }
    }

    // emitting textures stay full bright themselves
    if let Some(p) = patches.iter().find(|p| {
        p.facenum == facenum
            && (p.totallight[0] >= DIRECT_LIGHT
                || p.totallight[1] >= DIRECT_LIGHT
                || p.totallight[2] >= DIRECT_LIGHT)
    }) {
        for s in &mut fl.samples {
            *s = vector_add(s, &p.totallight);
        }
    }

    Ok(Some(fl))
}

/// Resolves one accumulated sample into final RGB bytes: ambient,
/// brightness, a hue-preserving overbright rescale, then contrast and
/// saturation, clamped per channel.
fn tone_map(sample: &Vec3, ambient: &Vec3, config: &Config) -> [u8; 3] {
    let mut lb = vector_add(sample, ambient);
    lb = vector_scale(&lb, config.brightness);

    let max = lb[0].max(lb[1]).max(lb[2]);
    if max > 255.0 {
        lb = vector_scale(&lb, 255.0 / max);
    }

    let mean = (lb[0] + lb[1] + lb[2]) / 3.0;
    for c in &mut lb {
        *c = (*c - mean) * config.contrast + mean;
    }

    let lum = 0.299 * lb[0] + 0.587 * lb[1] + 0.114 * lb[2];
    for c in &mut lb {
        *c = lum + (*c - lum) * config.saturation;
    }

    [
        lb[0].clamp(0.0, 255.0) as u8,
        lb[1].clamp(0.0, 255.0) as u8,
        lb[2].clamp(0.0, 255.0) as u8,
    ]
}

fn encode_direction(dir: &Vec3, fallback: &Vec3) -> [u8; 3] {
    let mut d = *dir;
    if vector_normalize(&mut d) == 0.0 {
        d = *fallback;
    }
    [
        ((d[0] + 1.0) * 127.5) as u8,
        ((d[1] + 1.0) * 127.5) as u8,
        ((d[2] + 1.0) * 127.5) as u8,
    ]
}

/// Packs every facelight into the lightmap blob for one pass and
/// patches the face lightofs values. Offset allocation is the only
/// serialized step.
fn final_light_faces(
    bsp: &mut BspData,
    facelights: &[Option<FaceLight>],
    config: &Config,
    pass: usize,
) -> Result<()> {
    let lightdata = Mutex::new(vec![config.lightquant]);
    let ambient = config.ambient[pass];
    let bsp_ref = &*bsp;

    let offsets: Vec<(usize, i32)> = facelights
        .par_iter()
        .enumerate()
        .filter_map(|(i, fl)| fl.as_ref().map(|fl| (i, fl)))
        .map(|(i, fl)| {
            let face = &bsp_ref.faces[i];
            let plane = &bsp_ref.planes[face.planenum as usize];
            let normal = if face.side != 0 {
                vector_scale(&plane.normal, -1.0)
            } else {
                plane.normal
            };

            let mut bytes = Vec::with_capacity(fl.samples.len() * 6);
            for (sample, dir) in fl.samples.iter().zip(&fl.directions) {
                bytes.extend_from_slice(&tone_map(sample, &ambient, config));
                bytes.extend_from_slice(&encode_direction(dir, &normal));
            }

            let mut data = lightdata.lock();
            let ofs = data.len();
            if ofs + bytes.len() > MAX_MAP_LIGHTING {
                return Err(CompileError::TableOverflow {
                    table: "MAX_MAP_LIGHTING",
                    value: ofs + bytes.len(),
                    limit: MAX_MAP_LIGHTING,
                });
            }
            data.extend_from_slice(&bytes);
            Ok((i, ofs as i32))
        })
        .collect::<Result<Vec<_>>>()?;

    for (i, ofs) in offsets {
        bsp.faces[i].lightofs[pass] = ofs;
    }
    bsp.lightdata[pass] = lightdata.into_inner();
    info!(
        "lightmap pass {}: {} bytes",
        pass,
        bsp.lightdata[pass].len()
    );
    Ok(())
}

/// Runs one complete lighting pass over the tile.
pub fn light_world(
    map: &MapData,
    bsp: &mut BspData,
    config: &mut Config,
    world: &TraceWorld,
    colors: &mut Reflectivity,
    pass: usize,
) -> Result<()> {
    info!(
        "--- LightWorld ({}) ---",
        if pass == LIGHTMAP_DAY { "day" } else { "night" }
    );
    let patches = build_patches(bsp, colors);
    let lights = build_lights(map, &patches, config, pass);
    build_vertex_normals(bsp);

    let offsets = face_offsets(bsp);
    let bsp_ref = &*bsp;
    let config_ref = &*config;
    let facelights: Vec<Option<FaceLight>> = (0..bsp_ref.faces.len())
        .into_par_iter()
        .map(|i| {
            build_facelights(bsp_ref, i, &lights, &patches, config_ref, world, offsets[i], pass)
        })
        .collect::<Result<Vec<_>>>()?;

    final_light_faces(bsp, &facelights, config, pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::textures::NoTextures;
    use crate::trace::make_tnodes;

    fn lit_slab(extra: &[String]) -> (BspData, usize) {
        let world = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        let (map, mut bsp, mut config) = compile_map_source(&map_source(&world, extra));
        let world_trace = make_tnodes(&bsp).unwrap();
        let mut colors = Reflectivity::new(&NoTextures);
        light_world(&map, &mut bsp, &mut config, &world_trace, &mut colors, 0).unwrap();
        // the slab's top face
        let m = &bsp.models[1];
        let top = (m.firstface as usize..(m.firstface + m.numfaces) as usize)
            .find(|&f| {
                let face = &bsp.faces[f];
                let n = bsp.planes[face.planenum as usize].normal;
                let n = if face.side != 0 { vector_scale(&n, -1.0) } else { n };
                n[2] > 0.9
            })
            .unwrap();
        (bsp, top)
    }

    #[test]
    fn test_face_extents_match_texel_grid() {
        let world = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        let (_, bsp, config) = compile_map_source(&wrap_worldspawn(&world));
        let m = &bsp.models[1];
        let face = &bsp.faces[m.firstface as usize];
        let l = LightInfo::new(&bsp, face, VEC3_ORIGIN, config.lightquant, 0.0, 0.0).unwrap();
        // every extent is 256 or 16 world units; at quant 4 that is
        // 16 or 1 texels
        for i in 0..2 {
            assert!(l.texsize[i] == 16 || l.texsize[i] == 1, "texsize {:?}", l.texsize);
        }
        assert_eq!(l.surfpt.len(), ((l.texsize[0] + 1) * (l.texsize[1] + 1)) as usize);
    }

    #[test]
    fn test_point_light_falloff_is_centered() {
        let light = point_light(&[0.0, 0.0, 64.0], 300.0);
        let (bsp, top) = lit_slab(&[light]);
        let face = &bsp.faces[top];
        let ofs = face.lightofs[0];
        assert!(ofs >= 1);

        // brightest texel must be the one under the light
        let l = LightInfo::new(&bsp, face, VEC3_ORIGIN, 4, 0.0, 0.0).unwrap();
        let data = &bsp.lightdata[0];
        let mut best = (0usize, 0u32);
        for i in 0..l.surfpt.len() {
            let o = ofs as usize + i * 6;
            let sum = data[o] as u32 + data[o + 1] as u32 + data[o + 2] as u32;
            if sum > best.1 {
                best = (i, sum);
            }
        }
        let p = l.surfpt[best.0];
        assert!(
            p[0].abs() <= 16.0 && p[1].abs() <= 16.0,
            "brightest sample at {p:?}"
        );
    }

    #[test]
    fn test_unlit_samples_stay_dark() {
        let (bsp, top) = lit_slab(&[]);
        let face = &bsp.faces[top];
        let ofs = face.lightofs[0] as usize;
        // no lights, no sun, no ambient: tone mapping of zero is zero
        for i in 0..3 {
            assert_eq!(bsp.lightdata[0][ofs + i], 0);
        }
        // the direction byte falls back to the face normal (+z)
        assert_eq!(bsp.lightdata[0][ofs + 5], 255);
    }

    #[test]
    fn test_tone_map_bounds() {
        let config = Config::default();
        let zero = tone_map(&VEC3_ORIGIN, &VEC3_ORIGIN, &config);
        assert_eq!(zero, [0, 0, 0]);

        // overbright input keeps hue via uniform rescale
        let hot = tone_map(&[510.0, 255.0, 0.0], &VEC3_ORIGIN, &config);
        assert_eq!(hot, [255, 127, 0]);

        let amb = tone_map(&VEC3_ORIGIN, &[20.0, 20.0, 20.0], &config);
        assert_eq!(amb, [20, 20, 20]);
    }

    #[test]
    fn test_tone_map_contrast_and_saturation() {
        let mut config = Config::default();
        config.saturation = 0.0;
        // fully desaturated output is gray at the luminance
        let gray = tone_map(&[100.0, 50.0, 25.0], &VEC3_ORIGIN, &config);
        assert_eq!(gray[0], gray[1]);
        assert_eq!(gray[1], gray[2]);

        let mut config = Config::default();
        config.contrast = 2.0;
        let c = tone_map(&[100.0, 50.0, 25.0], &VEC3_ORIGIN, &config);
        // contrast pushes channels away from the mean
        assert!(c[0] > 100 && c[2] < 25);
    }

    #[test]
    fn test_lightmap_leads_with_quant_byte() {
        let (bsp, _) = lit_slab(&[]);
        assert_eq!(bsp.lightdata[0][0], Config::default().lightquant);
        assert!(bsp.lightdata[0].len() > 1);
    }
}
