// routing.rs -- pathfinding grid construction
//
// The whole map is sampled into a coarse cell grid per actor size.
// Two sweeps run over the grid: a height sweep that finds the floor
// under every cell column, then a connectivity sweep that tests
// whether an actor can step between adjacent cells. Both sweeps only
// read the tracing structures, so the columns are farmed out to the
// rayon pool.

use crate::errors::{CompileError, Result};
use crate::trace::{TraceWorld, TL_FLAG_ACTORCLIP};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::{debug, info};
use rayon::prelude::*;
use std::io::Write;
use tmap_shared::defines::*;
use tmap_shared::math::{Bounds, Vec3};

pub const ROUTING_NOT_REACHABLE: u8 = 0xff;

/// Maximum floor height difference an actor can step across, in
/// world units.
const MAX_STEPUP: f32 = 2.0 * QUANT;

const W: usize = PATHFINDING_WIDTH;
const H: usize = PATHFINDING_HEIGHT;

/// Direction bits: +x, -x, +y, -y.
const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

#[derive(Debug, Clone, Copy, PartialEq)]
enum CellFloor {
    /// Nothing to stand on anywhere below the cell.
    Fall,
    /// Solid or without standing clearance.
    Filled,
    /// Floor at the given height above the cell bottom, world units.
    Floor(f32),
}

/// One dense grid per actor footprint size. Cells are addressed as
/// (column, z) with the column index y * width + x, so one column is
/// contiguous in memory.
#[derive(Debug)]
pub struct RoutingGrid {
    /// Quantized floor height, ROUTING_NOT_REACHABLE when unusable.
    pub route: Vec<u8>,
    /// Direction bits per cell.
    pub conn: Vec<u8>,
    /// Fall-through bit per z, one byte per column.
    pub fall: Vec<u8>,
    /// Blocked bit per z, one byte per column.
    pub filled: Vec<u8>,
}

impl RoutingGrid {
    fn new() -> Self {
        RoutingGrid {
            route: vec![ROUTING_NOT_REACHABLE; W * W * H],
            conn: vec![0; W * W * H],
            fall: vec![0; W * W],
            filled: vec![0; W * W],
        }
    }
}

#[derive(Debug)]
pub struct RoutingData {
    pub grids: Vec<RoutingGrid>,
    /// Inclusive cell bounds that contain any floor, [x, y, z].
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
}

#[inline]
fn cell_index(x: usize, y: usize, z: usize) -> usize {
    (y * W + x) * H + z
}

#[inline]
fn world_coord(cell: usize) -> f32 {
    (cell as i32 - W as i32 / 2) as f32 * UNIT_SIZE as f32
}

/// Center of the actor footprint whose lower corner cell is `cell`.
#[inline]
fn footprint_center(cell: usize, size: usize) -> f32 {
    world_coord(cell) + (size as i32 * UNIT_SIZE) as f32 / 2.0
}

/// Classifies one cell by tracing straight down through it.
fn check_cell(world: &TraceWorld, x: usize, y: usize, z: usize, size: usize) -> CellFloor {
    let cx = footprint_center(x, size);
    let cy = footprint_center(y, size);
    let bottom = (z as i32 * UNIT_HEIGHT) as f32;
    let top = bottom + UNIT_HEIGHT as f32;

    // probe down from just under the cell ceiling, reaching slightly
    // below the cell so a floor exactly on the boundary still counts
    let start: Vec3 = [cx, cy, top - 1.0];
    let stop: Vec3 = [cx, cy, bottom - 2.0];
    let hit = match world.test_line_dm(&start, &stop, TL_FLAG_ACTORCLIP) {
        Some(hit) => hit,
        None => return CellFloor::Fall,
    };

    let height = (hit[2] - bottom).max(0.0);
    if height >= UNIT_HEIGHT as f32 - QUANT {
        return CellFloor::Filled;
    }

    // an actor needs headroom above the floor to stand here
    let floor_z = bottom + height;
    let head_start: Vec3 = [cx, cy, floor_z + 2.0];
    let head_stop: Vec3 = [cx, cy, floor_z + UNIT_HEIGHT as f32 - 2.0];
    if world.test_line(&head_start, &head_stop, TL_FLAG_ACTORCLIP) {
        return CellFloor::Filled;
    }

    CellFloor::Floor(height)
}

/// Tests whether an actor standing in cell a can step into the
/// adjacent cell b on the same z level. Both a low near-floor trace
/// and a torso-height trace must be clear.
fn check_connection(
    world: &TraceWorld,
    a: (usize, usize, f32),
    b: (usize, usize, f32),
    z: usize,
    size: usize,
) -> bool {
    let (ax, ay, ah) = a;
    let (bx, by, bh) = b;
    if (ah - bh).abs() > MAX_STEPUP {
        return false;
    }

    let bottom = (z as i32 * UNIT_HEIGHT) as f32;
    let base = bottom + ah.max(bh);
    let from_low: Vec3 = [footprint_center(ax, size), footprint_center(ay, size), base + 2.0];
    let to_low: Vec3 = [footprint_center(bx, size), footprint_center(by, size), base + 2.0];
    if world.test_line(&from_low, &to_low, TL_FLAG_ACTORCLIP) {
        return false;
    }

    let mid = UNIT_HEIGHT as f32 / 2.0;
    let from_mid: Vec3 = [from_low[0], from_low[1], base + mid];
    let to_mid: Vec3 = [to_low[0], to_low[1], base + mid];
    !world.test_line(&from_mid, &to_mid, TL_FLAG_ACTORCLIP)
}

/// Builds the full routing grid for every actor size by sweeping the
/// cell box covered by `bounds`.
pub fn build_routing(world: &TraceWorld, bounds: &Bounds) -> Result<RoutingData> {
    info!("--- BuildRouting ---");

    // world bounds to padded cell bounds
    let mut cmins = [0i32; 3];
    let mut cmaxs = [0i32; 3];
    for i in 0..2 {
        cmins[i] = ((bounds.mins[i] / UNIT_SIZE as f32).floor() as i32 + W as i32 / 2 - 1)
            .clamp(0, W as i32 - 1);
        cmaxs[i] = ((bounds.maxs[i] / UNIT_SIZE as f32).ceil() as i32 + W as i32 / 2 + 1)
            .clamp(0, W as i32 - 1);
    }
    cmins[2] = 0;
    cmaxs[2] = ((bounds.maxs[2] / UNIT_HEIGHT as f32).ceil() as i32).clamp(0, H as i32 - 1);

    let mut columns = Vec::new();
    for y in cmins[1]..=cmaxs[1] {
        for x in cmins[0]..=cmaxs[0] {
            columns.push((x as usize, y as usize));
        }
    }

    let mut data = RoutingData {
        grids: Vec::new(),
        mins: cmins,
        maxs: cmaxs,
    };

    for size in 1..=ACTOR_MAX_SIZE {
        let mut grid = RoutingGrid::new();

        // height sweep, one work item per column
        let heights: Vec<Vec<CellFloor>> = columns
            .par_iter()
            .map(|&(x, y)| {
                (0..=cmaxs[2] as usize)
                    .map(|z| check_cell(world, x, y, z, size))
                    .collect()
            })
            .collect();

        for (&(x, y), floors) in columns.iter().zip(&heights) {
            for (z, floor) in floors.iter().enumerate() {
                match *floor {
                    CellFloor::Fall => grid.fall[y * W + x] |= 1 << z,
                    CellFloor::Filled => grid.filled[y * W + x] |= 1 << z,
                    CellFloor::Floor(h) => {
                        grid.route[cell_index(x, y, z)] = (h / QUANT).round() as u8;
                    }
                }
            }
        }

        // connectivity sweep over the finished height grid
        let conns: Vec<Vec<u8>> = columns
            .par_iter()
            .map(|&(x, y)| {
                let mut bits = vec![0u8; cmaxs[2] as usize + 1];
                for (z, bit) in bits.iter_mut().enumerate() {
                    let ah = grid.route[cell_index(x, y, z)];
                    if ah == ROUTING_NOT_REACHABLE {
                        continue;
                    }
                    for (dir, &(dx, dy)) in DIRECTIONS.iter().enumerate() {
                        let nx = x as i32 + dx;
                        let ny = y as i32 + dy;
                        if nx < cmins[0] || nx > cmaxs[0] || ny < cmins[1] || ny > cmaxs[1] {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        let bh = grid.route[cell_index(nx, ny, z)];
                        // never connect into a blocked cell
                        if bh == ROUTING_NOT_REACHABLE {
                            continue;
                        }
                        let a = (x, y, ah as f32 * QUANT);
                        let b = (nx, ny, bh as f32 * QUANT);
                        if check_connection(world, a, b, z, size) {
                            *bit |= 1 << dir;
                        }
                    }
                }
                bits
            })
            .collect();

        for (&(x, y), bits) in columns.iter().zip(&conns) {
            for (z, &bit) in bits.iter().enumerate() {
                grid.conn[cell_index(x, y, z)] = bit;
            }
        }

        data.grids.push(grid);
    }

    shrink_bounds(&mut data);
    info!(
        "routing bounds ({} {} {}) - ({} {} {})",
        data.mins[0], data.mins[1], data.mins[2], data.maxs[0], data.maxs[1], data.maxs[2]
    );
    Ok(data)
}

/// Trims the cell bounds down to the rows and columns that actually
/// hold a floor for the smallest actor.
fn shrink_bounds(data: &mut RoutingData) {
    let (mut mins, mut maxs) = (data.mins, data.maxs);
    {
        let grid = &data.grids[0];
        let has_floor = |x: i32, y: i32| {
            (0..H).any(|z| {
                grid.route[cell_index(x as usize, y as usize, z)] != ROUTING_NOT_REACHABLE
            })
        };
        let (y0, y1) = (mins[1], maxs[1]);
        while mins[0] < maxs[0] && !(y0..=y1).any(|y| has_floor(mins[0], y)) {
            mins[0] += 1;
        }
        while maxs[0] > mins[0] && !(y0..=y1).any(|y| has_floor(maxs[0], y)) {
            maxs[0] -= 1;
        }
        let (x0, x1) = (mins[0], maxs[0]);
        while mins[1] < maxs[1] && !(x0..=x1).any(|x| has_floor(x, mins[1])) {
            mins[1] += 1;
        }
        while maxs[1] > mins[1] && !(x0..=x1).any(|x| has_floor(x, maxs[1])) {
            maxs[1] -= 1;
        }
    }
    data.mins = mins;
    data.maxs = maxs;
}

/// Packs the shrunk grids into the routing lump: the cell bounds as
/// six little-endian i32 values, followed by the deflated cell data.
pub fn compress_routing(data: &RoutingData) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for v in data.mins.iter().chain(data.maxs.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    let io_err = |e: std::io::Error| CompileError::Internal(format!("routing compression: {e}"));
    for grid in &data.grids {
        let (z0, z1) = (data.mins[2] as usize, data.maxs[2] as usize);
        for y in data.mins[1] as usize..=data.maxs[1] as usize {
            for x in data.mins[0] as usize..=data.maxs[0] as usize {
                let base = (y * W + x) * H;
                enc.write_all(&grid.route[base + z0..=base + z1]).map_err(io_err)?;
                enc.write_all(&grid.conn[base + z0..=base + z1]).map_err(io_err)?;
                enc.write_all(&[grid.fall[y * W + x], grid.filled[y * W + x]])
                    .map_err(io_err)?;
            }
        }
    }
    let packed = enc.finish().map_err(io_err)?;
    out.extend_from_slice(&packed);

    if out.len() > MAX_MAP_ROUTING {
        return Err(CompileError::TableOverflow {
            table: "MAX_MAP_ROUTING",
            value: out.len(),
            limit: MAX_MAP_ROUTING,
        });
    }
    debug!("routing lump: {} bytes", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::trace::make_tnodes;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    /// Floor slab with a solid box on top of it.
    fn routed_scene() -> RoutingData {
        let mut brushes = cuboid_brush(&[-128.0, -128.0, -16.0], &[128.0, 128.0, 0.0]);
        brushes += &cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]);
        let (map, bsp, _) = compile_map_source(&wrap_worldspawn(&brushes));
        let world = make_tnodes(&bsp).unwrap();
        build_routing(&world, &map.bounds).unwrap()
    }

    #[test]
    fn test_box_column_filled_with_clearance_above() {
        let data = routed_scene();
        let grid = &data.grids[0];
        // cell inside the box at ground level
        let (x, y) = (W / 2 + 1, W / 2 + 1);
        assert_ne!(grid.filled[y * W + x] & 1, 0);
        assert_eq!(grid.route[cell_index(x, y, 0)], ROUTING_NOT_REACHABLE);
        // standing on top of the box one level up
        assert_eq!(grid.route[cell_index(x, y, 1)], 0);
    }

    #[test]
    fn test_open_floor_is_connected() {
        let data = routed_scene();
        let grid = &data.grids[0];
        // open slab area west of the box
        let (x, y) = (W / 2 - 3, W / 2 - 3);
        assert_eq!(grid.route[cell_index(x, y, 0)], 0);
        assert_eq!(grid.conn[cell_index(x, y, 0)], 0x0f);
    }

    #[test]
    fn test_no_connection_into_filled_cell() {
        let data = routed_scene();
        let grid = &data.grids[0];
        // the cell just west of the box must not connect east (+x)
        let (x, y) = (W / 2 - 1, W / 2 + 1);
        assert_ne!(grid.filled[y * W + (x + 1)] & 1, 0);
        assert_eq!(grid.conn[cell_index(x, y, 0)] & 1, 0);
    }

    #[test]
    fn test_fall_outside_the_slab() {
        let data = routed_scene();
        let grid = &data.grids[0];
        // the padded border column beyond the shrunk bounds was swept
        // but found nothing to stand on
        let x = data.mins[0] as usize - 1;
        let y = W / 2;
        assert_eq!(grid.route[cell_index(x, y, 0)], ROUTING_NOT_REACHABLE);
        assert_ne!(grid.fall[y * W + x] & 1, 0);
    }

    #[test]
    fn test_connectivity_never_contradicts_filled() {
        let data = routed_scene();
        for grid in &data.grids {
            for y in data.mins[1] as usize..=data.maxs[1] as usize {
                for x in data.mins[0] as usize..=data.maxs[0] as usize {
                    for z in 0..H {
                        let bits = grid.conn[cell_index(x, y, z)];
                        for (dir, &(dx, dy)) in DIRECTIONS.iter().enumerate() {
                            if bits & (1 << dir) == 0 {
                                continue;
                            }
                            let nx = (x as i32 + dx) as usize;
                            let ny = (y as i32 + dy) as usize;
                            assert_eq!(
                                grid.filled[ny * W + nx] & (1 << z),
                                0,
                                "conn at ({x} {y} {z}) points into a filled cell"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_compressed_lump_roundtrip() {
        let data = routed_scene();
        let lump = compress_routing(&data).unwrap();

        let mins: Vec<i32> = (0..3)
            .map(|i| i32::from_le_bytes(lump[i * 4..i * 4 + 4].try_into().unwrap()))
            .collect();
        assert_eq!(mins, data.mins.to_vec());

        let mut raw = Vec::new();
        DeflateDecoder::new(&lump[24..]).read_to_end(&mut raw).unwrap();
        let cols = (data.maxs[0] - data.mins[0] + 1) as usize
            * (data.maxs[1] - data.mins[1] + 1) as usize;
        let zs = (data.maxs[2] - data.mins[2] + 1) as usize;
        assert_eq!(raw.len(), data.grids.len() * cols * (2 * zs + 2));
    }
}
