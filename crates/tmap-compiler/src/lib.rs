// tmap-compiler -- compiles .map sources into lit, routed map tiles

pub mod bsp;
pub mod bspfile;
pub mod brushbsp;
pub mod config;
pub mod csg;
pub mod errors;
pub mod faces;
pub mod levels;
pub mod lighting;
pub mod lightmap;
pub mod map;
pub mod patches;
pub mod portals;
pub mod routing;
pub mod textures;
pub mod trace;
pub mod tree;
pub mod writebsp;

#[cfg(test)]
mod testutil;
