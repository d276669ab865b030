// config.rs -- compile options
//
// The CLI that fills these in lives outside the compiler; every field
// has the default the original switch set implies.

use tmap_shared::math::Vec3;

#[derive(Debug, Clone)]
pub struct Config {
    /// Skip the brush-brush CSG subtraction pass.
    pub nocsg: bool,
    /// Keep detail brushes structural.
    pub fulldetail: bool,
    /// Drop detail brushes entirely.
    pub nodetail: bool,
    /// Drop water brushes entirely.
    pub nowater: bool,
    /// Disable coplanar face merging.
    pub nomerge: bool,
    /// Disable face subdivision.
    pub nosubdiv: bool,
    /// Disable T-junction fixing.
    pub notjunc: bool,
    /// Emit every face vertex unshared.
    pub noweld: bool,
    /// Never share edges between faces.
    pub noshare: bool,
    /// Keep steeply downward-facing surfaces.
    pub nobackclip: bool,

    /// Brushes below this volume trigger a microbrush warning.
    pub microvolume: f32,
    /// Faces larger than this along a texture axis get subdivided.
    pub subdivide_size: f32,
    /// Lightmap luxel size as a power-of-two shift of world units.
    pub lightquant: u8,

    /// 5 jittered samples per luxel instead of 1.
    pub extrasamples: bool,
    /// Scale for emissive-surface light intensity.
    pub surface_scale: f32,
    /// Scale for entity light intensity.
    pub entity_scale: f32,
    /// Global output brightness multiplier.
    pub brightness: f32,
    /// Mean-centered contrast factor.
    pub contrast: f32,
    /// Luminance-interpolated saturation factor.
    pub saturation: f32,
    /// Compile the day lightmap (night is always compiled).
    pub day: bool,

    /// Sun and ambient defaults, overridden by worldspawn keys.
    pub sun_intensity: [f32; 2],
    pub sun_color: [Vec3; 2],
    pub sun_dir: [Vec3; 2],
    pub ambient: [Vec3; 2],
}

/// Index into the per-sun/per-lightmap arrays.
pub const LIGHTMAP_NIGHT: usize = 0;
pub const LIGHTMAP_DAY: usize = 1;

impl Default for Config {
    fn default() -> Self {
        Config {
            nocsg: false,
            fulldetail: false,
            nodetail: false,
            nowater: false,
            nomerge: false,
            nosubdiv: false,
            notjunc: false,
            noweld: false,
            noshare: false,
            nobackclip: false,

            microvolume: 1.0,
            subdivide_size: 1024.0,
            lightquant: 4,

            extrasamples: false,
            surface_scale: 0.4,
            entity_scale: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            day: false,

            sun_intensity: [0.0, 0.0],
            sun_color: [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
            sun_dir: [[0.0, 0.0, -1.0], [0.0, 0.0, -1.0]],
            ambient: [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
        }
    }
}
