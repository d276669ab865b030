// bsp.rs -- whole-tile compile driver
//
// Runs the stages in their required order: parse, per-level BSP,
// structure emission, tracing nodes, routing, then one lighting pass
// per lightmap. Everything downstream of the geometry works on the
// emitted BspData, never on the map source.

use crate::bspfile::BspData;
use crate::config::{Config, LIGHTMAP_DAY, LIGHTMAP_NIGHT};
use crate::errors::{CompileError, Result};
use crate::faces::FaceArena;
use crate::levels::{process_sub_models, process_world_model};
use crate::lightmap::light_world;
use crate::map::load_map;
use crate::routing::{build_routing, compress_routing};
use crate::textures::{Reflectivity, TextureColors};
use crate::trace::make_tnodes;
use crate::writebsp::{
    begin_bsp_file, emit_brushes, emit_planes, unparse_entities, write_tile_file, EdgeTable,
};
use log::info;
use std::path::{Path, PathBuf};

/// Compiles one map source into a complete in-memory tile.
pub fn compile_source(
    source: &str,
    config: &mut Config,
    textures: &dyn TextureColors,
) -> Result<BspData> {
    let mut bsp = BspData::new();
    begin_bsp_file(&mut bsp);
    let mut map = load_map(source, config, &mut bsp)?;

    let mut faces = FaceArena::default();
    let mut edges = EdgeTable::new();
    process_world_model(&mut map, &mut bsp, &mut faces, &mut edges, config)?;
    process_sub_models(&mut map, &mut bsp, &mut faces, &mut edges, config)?;

    emit_planes(&map, &mut bsp);
    emit_brushes(&map, &mut bsp)?;
    unparse_entities(&map, &mut bsp);

    let world = make_tnodes(&bsp)?;
    let routing = build_routing(&world, &map.bounds)?;
    bsp.routedata = compress_routing(&routing)?;

    let mut colors = Reflectivity::new(textures);
    light_world(&map, &mut bsp, config, &world, &mut colors, LIGHTMAP_NIGHT)?;
    if config.day {
        light_world(&map, &mut bsp, config, &world, &mut colors, LIGHTMAP_DAY)?;
    }

    info!(
        "{} models, {} faces, {} leafs",
        bsp.models.len(),
        bsp.faces.len(),
        bsp.leafs.len()
    );
    Ok(bsp)
}

/// Compiles a .map file and writes the tile next to it. Returns the
/// output path.
pub fn compile_tile(
    map_path: &Path,
    config: &mut Config,
    textures: &dyn TextureColors,
) -> Result<PathBuf> {
    info!("compiling {}", map_path.display());
    let source = std::fs::read_to_string(map_path).map_err(|e| {
        CompileError::Internal(format!("couldn't read {}: {e}", map_path.display()))
    })?;

    let bsp = compile_source(&source, config, textures)?;

    let out = map_path.with_extension("bsp");
    write_tile_file(&bsp, &out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csg::NUM_LEVELS;
    use crate::testutil::*;
    use crate::textures::NoTextures;

    #[test]
    fn test_planes_emitted_in_negated_pairs() {
        let source = wrap_worldspawn(&cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]));
        let bsp = compile_source(&source, &mut Config::default(), &NoTextures).unwrap();

        // six brush planes stored as pairs, plus clip-box planes
        assert!(bsp.planes.len() >= 12);
        assert_eq!(bsp.planes.len() % 2, 0);
        for pair in bsp.planes.chunks(2) {
            for i in 0..3 {
                assert!((pair[0].normal[i] + pair[1].normal[i]).abs() < 1e-6);
            }
            assert!((pair[0].dist + pair[1].dist).abs() < 1e-3);
        }
    }

    #[test]
    fn test_abutting_cuboids_leave_no_interior_face() {
        let mut brushes = cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]);
        brushes += &cuboid_brush(&[64.0, 0.0, 0.0], &[128.0, 64.0, 64.0]);
        let bsp =
            compile_source(&wrap_worldspawn(&brushes), &mut Config::default(), &NoTextures)
                .unwrap();

        let m = &bsp.models[1];
        for f in &bsp.faces[m.firstface as usize..(m.firstface + m.numfaces) as usize] {
            let plane = &bsp.planes[f.planenum as usize];
            // the shared plane at x=64 must not surface
            assert!(
                plane.normal[0].abs() < 0.99 || (plane.dist.abs() - 64.0).abs() > 0.1,
                "interior face on plane {:?} {}",
                plane.normal,
                plane.dist
            );
        }
    }

    #[test]
    fn test_compile_fills_every_section() {
        let world = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        let light = point_light(&[0.0, 0.0, 64.0], 200.0);
        let bsp = compile_source(
            &map_source(&world, &[light]),
            &mut Config::default(),
            &NoTextures,
        )
        .unwrap();

        assert_eq!(bsp.models.len(), NUM_LEVELS);
        assert!(!bsp.routedata.is_empty());
        assert!(bsp.lightdata[0].len() > 1);
        assert!(bsp.entdata.contains("worldspawn"));
        assert!(bsp.entdata.contains("\"classname\" \"light\""));
        assert!(bsp.faces.iter().any(|f| f.lightofs[0] >= 1));
    }

    #[test]
    fn test_day_flag_compiles_second_lightmap() {
        let world = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        let mut config = Config::default();
        config.day = true;
        let bsp = compile_source(&wrap_worldspawn(&world), &mut config, &NoTextures).unwrap();

        assert!(bsp.lightdata[1].len() > 1);
        assert!(bsp.faces.iter().any(|f| f.lightofs[1] >= 1));

        let mut night_only = Config::default();
        let bsp2 =
            compile_source(&wrap_worldspawn(&world), &mut night_only, &NoTextures).unwrap();
        assert!(bsp2.lightdata[1].is_empty());
    }
}
