// defines.rs -- content/surface flags, world and grid dimensions,
// compile-time table limits

use bitflags::bitflags;

bitflags! {
    /// Volume classification carried by every brush side and aggregated
    /// per brush. Bits 8..15 are the level mask (floors 1-8); they are
    /// extracted with `level_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContentFlags: u32 {
        const SOLID        = 0x0000_0001;
        const WINDOW       = 0x0000_0002;
        const WATER        = 0x0000_0020;

        const LEVEL_1      = 0x0000_0100;
        const LEVEL_2      = 0x0000_0200;
        const LEVEL_3      = 0x0000_0400;
        const LEVEL_4      = 0x0000_0800;
        const LEVEL_5      = 0x0000_1000;
        const LEVEL_6      = 0x0000_2000;
        const LEVEL_7      = 0x0000_4000;
        const LEVEL_8      = 0x0000_8000;
        const LEVEL_ALL    = 0x0000_FF00;

        const ACTORCLIP    = 0x0001_0000;
        const PASSABLE     = 0x0002_0000;
        const LIGHTCLIP    = 0x0004_0000;
        const WEAPONCLIP   = 0x0008_0000;
        const TERRAIN      = 0x0010_0000;
        const STEPON       = 0x0040_0000;

        const ORIGIN       = 0x0100_0000;
        const DETAIL       = 0x0800_0000;
        const TRANSLUCENT  = 0x1000_0000;
    }
}

/// Contents above this value never produce visible faces.
pub const LAST_VISIBLE_CONTENTS: u32 = 0x80;

impl ContentFlags {
    /// The subset of flags that can make a portal side visible.
    pub fn visible_contents(self) -> ContentFlags {
        let mut i = 1u32;
        while i <= LAST_VISIBLE_CONTENTS {
            if self.bits() & i != 0 {
                return ContentFlags::from_bits_retain(i);
            }
            i <<= 1;
        }
        ContentFlags::empty()
    }

    /// Level mask (bits 8..15) as a plain byte.
    pub fn level_flags(self) -> u8 {
        ((self.bits() >> 8) & 0xFF) as u8
    }

    pub fn is_clip(self) -> bool {
        self.intersects(ContentFlags::ACTORCLIP | ContentFlags::WEAPONCLIP | ContentFlags::LIGHTCLIP)
    }
}

bitflags! {
    /// Per-side rendering/behavior hints.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceFlags: u32 {
        const LIGHT     = 0x0000_0001;
        const SLICK     = 0x0000_0002;
        const WARP      = 0x0000_0008;
        const BLEND33   = 0x0000_0010;
        const BLEND66   = 0x0000_0020;
        const FLOWING   = 0x0000_0040;
        const NODRAW    = 0x0000_0080;
        const HINT      = 0x0000_0100;
        const SKIP      = 0x0000_0200;
        const PHONG     = 0x0000_0400;
        const FOOTSTEP  = 0x0000_0800;
        const ORIGIN    = 0x0000_1000;
        const ALPHATEST = 0x0000_2000;
    }
}

// world dimensions; brushes outside this range are broken input
pub const MAX_WORLD_WIDTH: f32 = 4096.0;

// routing grid dimensions
pub const UNIT_SIZE: i32 = 32;
pub const UNIT_HEIGHT: i32 = 64;
/// Grid cells across the full world extent in x and y.
pub const PATHFINDING_WIDTH: usize = 256;
/// Grid cells (floors) in z.
pub const PATHFINDING_HEIGHT: usize = 8;
/// Step-height quantization for the routing byte.
pub const QUANT: f32 = 4.0;
/// Actor footprints from 1x1 up to this edge length are compiled.
pub const ACTOR_MAX_SIZE: usize = 2;

// fixed compile limits; exceeding any of these is a fatal error
pub const MAX_MAP_ENTITIES: usize = 2048;
pub const MAX_MAP_BRUSHES: usize = 16384;
pub const MAX_MAP_SIDES: usize = 65536;
pub const MAX_MAP_PLANES: usize = 65536;
pub const MAX_MAP_NODES: usize = 65536;
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_TEXINFO: usize = 16384;
pub const MAX_MAP_VERTS: usize = 65536;
pub const MAX_MAP_EDGES: usize = 128000;
pub const MAX_MAP_SURFEDGES: usize = 256000;
pub const MAX_MAP_FACES: usize = 65536;
pub const MAX_MAP_LEAFBRUSHES: usize = 65536;
pub const MAX_MAP_BRUSHSIDES: usize = 65536;
pub const MAX_MAP_MODELS: usize = 1024;
pub const MAX_MAP_LIGHTING: usize = 0x80_0000;
pub const MAX_MAP_ROUTING: usize = 0x10_0000;
/// Windings with more points than this have to be fragmented.
pub const MAX_POINTS_ON_WINDING: usize = 64;
/// Final faces are capped at this many edges; longer loops are split.
pub const MAXEDGES: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_flags_extraction() {
        let c = ContentFlags::SOLID | ContentFlags::LEVEL_1 | ContentFlags::LEVEL_3;
        assert_eq!(c.level_flags(), 0b101);
        assert_eq!(ContentFlags::SOLID.level_flags(), 0);
    }

    #[test]
    fn test_visible_contents_picks_lowest_bit() {
        let c = ContentFlags::WATER | ContentFlags::WINDOW;
        assert_eq!(c.visible_contents(), ContentFlags::WINDOW);
        assert_eq!(ContentFlags::ACTORCLIP.visible_contents(), ContentFlags::empty());
    }
}
