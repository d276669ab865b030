// map.rs -- map source parsing
//
// Builds the entity list, the brush list and the shared plane table.
// Planes are interned in facing pairs: index n and n^1 are always
// opposites, and axial pairs store the positive-facing plane first.

use crate::bspfile::BspData;
use crate::config::Config;
use crate::errors::{check_limit, CompileError, Result};
use crate::textures::{texinfo_for_brush_texture, BrushTexture};
use log::{debug, info, warn};
use tmap_shared::defines::*;
use tmap_shared::math::*;
use tmap_shared::scriplib::Script;
use tmap_shared::winding::Winding;

const PLANE_HASHES: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
}

impl Plane {
    pub fn is_axial(&self) -> bool {
        plane_is_axial(self.plane_type)
    }
}

fn plane_equal(p: &Plane, normal: &Vec3, dist: f32) -> bool {
    (p.normal[0] - normal[0]).abs() < NORMAL_EPSILON
        && (p.normal[1] - normal[1]).abs() < NORMAL_EPSILON
        && (p.normal[2] - normal[2]).abs() < NORMAL_EPSILON
        && (p.dist - dist).abs() < DIST_EPSILON
}

/// Interning table for the map's planes. Lookup is hashed on the
/// plane distance, searching the neighbor bins to cover snapping.
#[derive(Debug, Default)]
pub struct PlaneTable {
    pub planes: Vec<Plane>,
    hash: Vec<Vec<u16>>,
}

fn hash_for_dist(dist: f32) -> usize {
    ((dist.abs() as usize) * 27) & (PLANE_HASHES - 1)
}

impl PlaneTable {
    pub fn new() -> Self {
        PlaneTable {
            planes: Vec::new(),
            hash: vec![Vec::new(); PLANE_HASHES],
        }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn plane(&self, num: u16) -> &Plane {
        &self.planes[num as usize]
    }

    fn add_to_hash(&mut self, num: u16) {
        let h = hash_for_dist(self.planes[num as usize].dist);
        self.hash[h].push(num);
    }

    fn create(&mut self, normal: Vec3, dist: f32) -> Result<u16> {
        if vector_length(&normal) < 0.5 {
            return Err(CompileError::BadNormal(normal[0], normal[1], normal[2]));
        }
        check_limit("MAX_MAP_PLANES", self.planes.len() + 2, MAX_MAP_PLANES)?;

        let plane_type = plane_type_for_normal(&normal);
        let plane = Plane { normal, dist, plane_type };
        let opposite = Plane {
            normal: vector_negate(&normal),
            dist: -dist,
            plane_type,
        };

        let num = self.planes.len() as u16;
        // axial pairs always store the positive-facing plane first
        let flipped = plane_is_axial(plane_type)
            && (normal[0] < 0.0 || normal[1] < 0.0 || normal[2] < 0.0);
        if flipped {
            self.planes.push(opposite);
            self.planes.push(plane);
        } else {
            self.planes.push(plane);
            self.planes.push(opposite);
        }
        self.add_to_hash(num);
        self.add_to_hash(num + 1);
        Ok(if flipped { num + 1 } else { num })
    }

    /// Looks the plane up, creating the facing pair on a miss. The
    /// normal is snapped to axial and the distance to integer when
    /// within epsilon.
    pub fn find_or_create(&mut self, mut normal: Vec3, mut dist: f32) -> Result<u16> {
        snap_vector(&mut normal);
        if (dist - rint(dist)).abs() < DIST_EPSILON {
            dist = rint(dist);
        }

        // search the border bins as well
        let hash = hash_for_dist(dist) as isize;
        for i in -1..=1 {
            let h = (hash + i) as usize & (PLANE_HASHES - 1);
            for &num in &self.hash[h] {
                if plane_equal(&self.planes[num as usize], &normal, dist) {
                    return Ok(num);
                }
            }
        }

        self.create(normal, dist)
    }

    /// Builds a plane from three points in map-file order. Returns
    /// None for a degenerate triple.
    pub fn from_points(&mut self, p0: &Vec3, p1: &Vec3, p2: &Vec3) -> Result<Option<u16>> {
        let t1 = vector_subtract(p0, p1);
        let t2 = vector_subtract(p2, p1);
        let mut normal = cross_product(&t1, &t2);
        if vector_normalize(&mut normal) < 0.5 {
            return Ok(None);
        }
        let dist = dot_product(p0, &normal);
        Ok(Some(self.find_or_create(normal, dist)?))
    }
}

/// One brush side as parsed (and later beveled). The winding covers
/// the full side before any CSG happens.
#[derive(Debug, Clone, Default)]
pub struct Side {
    pub planenum: u16,
    pub texinfo: u16,
    pub contents: ContentFlags,
    pub surface_flags: SurfaceFlags,
    pub winding: Option<Winding>,
    /// Bevel sides only matter for box expansion, never for faces.
    pub bevel: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MapBrush {
    pub entitynum: usize,
    pub brushnum: usize,
    pub contents: ContentFlags,
    pub sides: Vec<Side>,
    /// Source texture descriptors, parallel to `sides`.
    pub textures: Vec<BrushTexture>,
    pub bounds: Bounds,
    /// Set once a level model has claimed this brush.
    pub finished: bool,
}

impl MapBrush {
    pub fn level_flags(&self) -> u8 {
        self.contents.level_flags()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub epairs: Vec<(String, String)>,
    pub origin: Vec3,
    pub firstbrush: usize,
    pub numbrushes: usize,
}

impl Entity {
    /// Last-set value wins, matching how editors append keys.
    pub fn value(&self, key: &str) -> &str {
        self.epairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn set_value(&mut self, key: &str, value: &str) {
        self.epairs.push((key.to_string(), value.to_string()));
    }

    pub fn classname(&self) -> &str {
        self.value("classname")
    }

    pub fn float_for_key(&self, key: &str) -> f32 {
        self.value(key).parse().unwrap_or(0.0)
    }

    pub fn vector_for_key(&self, key: &str) -> Vec3 {
        let mut v = VEC3_ORIGIN;
        for (i, part) in self.value(key).split_whitespace().take(3).enumerate() {
            v[i] = part.parse().unwrap_or(0.0);
        }
        v
    }
}

/// Everything parsed out of one map source file.
#[derive(Debug, Default)]
pub struct MapData {
    pub planes: PlaneTable,
    pub entities: Vec<Entity>,
    pub brushes: Vec<MapBrush>,
    /// Bounds over the world entity's brushes.
    pub bounds: Bounds,
    num_sides: usize,
}

impl MapData {
    pub fn new() -> Self {
        MapData {
            planes: PlaneTable::new(),
            ..Default::default()
        }
    }

    pub fn world_brushes(&self) -> &[MapBrush] {
        &self.brushes[..self.entities[0].numbrushes]
    }
}

fn need_token(script: &mut Script, crossline: bool) -> Result<String> {
    script.token(crossline).ok_or_else(|| CompileError::Parse {
        line: script.line(),
        reason: "unexpected end of file".into(),
    })
}

fn parse_f32(script: &mut Script) -> Result<f32> {
    Ok(need_token(script, false)?.parse().unwrap_or(0.0))
}

fn parse_flags(script: &mut Script) -> Result<u32> {
    Ok(need_token(script, false)?.parse::<i64>().unwrap_or(0) as u32)
}

/// Well-known utility textures imply flags the editor does not write.
fn set_implied_flags(contents: &mut ContentFlags, td: &mut BrushTexture) {
    match td.name.as_str() {
        "tex_common/actorclip" => *contents |= ContentFlags::ACTORCLIP,
        "tex_common/caulk" | "tex_common/nodraw" | "tex_common/trigger" => {
            td.surface_flags |= SurfaceFlags::NODRAW;
        }
        "tex_common/hint" => td.surface_flags |= SurfaceFlags::HINT,
        "tex_common/lightclip" => *contents |= ContentFlags::LIGHTCLIP,
        "tex_common/origin" => *contents |= ContentFlags::ORIGIN,
        "tex_common/slick" => td.surface_flags |= SurfaceFlags::SLICK,
        "tex_common/weaponclip" => *contents |= ContentFlags::WEAPONCLIP,
        _ => {}
    }
    if td.name.contains("water") {
        *contents |= ContentFlags::WATER | ContentFlags::PASSABLE;
    }

    // nodraw never has phong set
    if td.surface_flags.contains(SurfaceFlags::NODRAW) {
        td.surface_flags &= !SurfaceFlags::PHONG;
    }
}

fn check_flags(contents: ContentFlags, entity: usize, brush: usize) -> Result<()> {
    if contents.contains(ContentFlags::ACTORCLIP) && contents.contains(ContentFlags::PASSABLE) {
        return Err(CompileError::BadBrush {
            entity,
            brush,
            reason: "invalid mix of passable and actorclip".into(),
        });
    }
    if contents.is_clip() && contents.contains(ContentFlags::SOLID) {
        return Err(CompileError::BadBrush {
            entity,
            brush,
            reason: "invalid mix of clips and solid flags".into(),
        });
    }
    Ok(())
}

/// Builds the base windings for every side and the brush bounds.
/// Sides clipped completely away stay, but with no winding.
pub fn make_brush_windings(brush: &mut MapBrush, planes: &PlaneTable) {
    brush.bounds = Bounds::new();

    for i in 0..brush.sides.len() {
        let plane = planes.plane(brush.sides[i].planenum);
        let mut w = Some(Winding::base_for_plane(&plane.normal, plane.dist));
        for j in 0..brush.sides.len() {
            if i == j || brush.sides[j].bevel {
                continue;
            }
            let clip = planes.plane(brush.sides[j].planenum ^ 1);
            w = match w {
                Some(w) => w.chop(&clip.normal, clip.dist, 0.0),
                None => break,
            };
        }

        if let Some(ref w) = w {
            brush.sides[i].visible = true;
            for p in &w.points {
                brush.bounds.add_point(p);
            }
        }
        brush.sides[i].winding = w;
    }

    for i in 0..3 {
        if brush.bounds.mins[i] < -MAX_WORLD_WIDTH || brush.bounds.maxs[i] > MAX_WORLD_WIDTH {
            warn!(
                "entity {}, brush {}: bounds out of world range ({}:{})",
                brush.entitynum, brush.brushnum, brush.bounds.mins[i], brush.bounds.maxs[i]
            );
        }
    }
    if brush.bounds.is_empty() {
        warn!(
            "entity {}, brush {}: no visible sides on brush",
            brush.entitynum, brush.brushnum
        );
        brush.bounds = Bounds::from_points(VEC3_ORIGIN, VEC3_ORIGIN);
    }
}

/// Adds the planes needed to expand the brush against axial boxes:
/// any missing axial planes, then bevels along non-axial edges. Also
/// swaps the six axial sides into canonical order.
pub fn add_brush_bevels(brush: &mut MapBrush, planes: &mut PlaneTable) -> Result<()> {
    // axial planes
    let mut order = 0;
    for axis in 0..3 {
        for dir in [-1.0f32, 1.0] {
            let found = brush
                .sides
                .iter()
                .position(|s| planes.plane(s.planenum).normal[axis] == dir);

            let i = match found {
                Some(i) => i,
                None => {
                    let mut normal = VEC3_ORIGIN;
                    normal[axis] = dir;
                    let dist = if dir == 1.0 {
                        brush.bounds.maxs[axis]
                    } else {
                        -brush.bounds.mins[axis]
                    };
                    let side = Side {
                        planenum: planes.find_or_create(normal, dist)?,
                        texinfo: brush.sides[0].texinfo,
                        contents: brush.sides[0].contents,
                        bevel: true,
                        ..Default::default()
                    };
                    brush.sides.push(side);
                    brush.textures.push(brush.textures[0].clone());
                    brush.sides.len() - 1
                }
            };

            if i != order {
                brush.sides.swap(i, order);
                brush.textures.swap(i, order);
            }
            order += 1;
        }
    }

    if brush.sides.len() == 6 {
        return Ok(()); // pure axial
    }

    // test the non-axial plane edges
    let mut i = 6;
    while i < brush.sides.len() {
        let w = match brush.sides[i].winding.clone() {
            Some(w) => w,
            None => {
                i += 1;
                continue;
            }
        };

        for j in 0..w.len() {
            let k = (j + 1) % w.len();
            let mut vec = vector_subtract(&w.points[j], &w.points[k]);
            if vector_normalize(&mut vec) < 0.5 {
                continue;
            }
            snap_vector(&mut vec);
            let axial = (0..3).any(|k| {
                vec[k] == -1.0 || vec[k] == 1.0 || (vec[k] == 0.0 && vec[(k + 1) % 3] == 0.0)
            });
            if axial {
                continue; // only test non-axial edges
            }

            // try the six possible slanted axials from this edge
            for axis in 0..3 {
                for dir in [-1.0f32, 1.0] {
                    let mut vec2 = VEC3_ORIGIN;
                    vec2[axis] = dir;
                    let mut normal = cross_product(&vec, &vec2);
                    if vector_normalize(&mut normal) < 0.5 {
                        continue;
                    }
                    let dist = dot_product(&w.points[j], &normal);

                    // a proper edge bevel has every point of every
                    // side behind it, and is not an existing plane
                    let mut keep = true;
                    for side in &brush.sides {
                        if plane_equal(planes.plane(side.planenum), &normal, dist) {
                            keep = false;
                            break;
                        }
                        let w2 = match &side.winding {
                            Some(w2) => w2,
                            None => continue,
                        };
                        let mut min_back = 0.0f32;
                        for p in &w2.points {
                            let d = dot_product(p, &normal) - dist;
                            if d > 0.1 {
                                keep = false; // point in front
                                break;
                            }
                            if d < min_back {
                                min_back = d;
                            }
                        }
                        // flush windings lie on the bevel plane
                        if !keep || min_back > -0.1 {
                            keep = false;
                            break;
                        }
                    }
                    if !keep {
                        continue;
                    }

                    let side = Side {
                        planenum: planes.find_or_create(normal, dist)?,
                        texinfo: brush.sides[0].texinfo,
                        contents: brush.sides[0].contents,
                        bevel: true,
                        ..Default::default()
                    };
                    brush.sides.push(side);
                    brush.textures.push(brush.textures[0].clone());
                }
            }
        }
        i += 1;
    }

    Ok(())
}

enum BrushOutcome {
    Kept(Box<MapBrush>),
    Origin(Vec3),
    Dropped,
}

fn parse_brush(
    script: &mut Script,
    map: &mut MapData,
    bsp: &mut BspData,
    config: &Config,
    entitynum: usize,
    firstbrush: usize,
) -> Result<BrushOutcome> {
    check_limit("MAX_MAP_BRUSHES", map.brushes.len(), MAX_MAP_BRUSHES)?;

    let brushnum = map.brushes.len() - firstbrush;
    let mut brush = MapBrush {
        entitynum,
        brushnum,
        ..Default::default()
    };

    loop {
        let first = match script.token(true) {
            Some(t) => t,
            None => break,
        };
        if first == "}" {
            break;
        }

        check_limit("MAX_MAP_SIDES", map.num_sides, MAX_MAP_SIDES)?;

        // the three point plane definition
        let mut planepts = [VEC3_ORIGIN; 3];
        for (i, pt) in planepts.iter_mut().enumerate() {
            let open = if i == 0 { first.clone() } else { need_token(script, true)? };
            if open != "(" {
                return Err(CompileError::Parse {
                    line: script.line(),
                    reason: "expected ( in brush side".into(),
                });
            }
            for c in pt.iter_mut() {
                *c = parse_f32(script)?;
            }
            if need_token(script, false)? != ")" {
                return Err(CompileError::Parse {
                    line: script.line(),
                    reason: "expected ) in brush side".into(),
                });
            }
        }

        // the texturedef
        let mut td = BrushTexture {
            name: need_token(script, false)?,
            ..Default::default()
        };
        td.shift[0] = parse_f32(script)?;
        td.shift[1] = parse_f32(script)?;
        td.rotate = parse_f32(script)?;
        td.scale[0] = parse_f32(script)?;
        td.scale[1] = parse_f32(script)?;

        let mut contents = ContentFlags::empty();
        if script.token_available() {
            contents = ContentFlags::from_bits_retain(parse_flags(script)?);
            td.surface_flags = SurfaceFlags::from_bits_retain(parse_flags(script)?);
            td.value = parse_flags(script)? as i32;
        }

        set_implied_flags(&mut contents, &mut td);

        // translucent sides are automatically detail and window
        if td.surface_flags
            .intersects(SurfaceFlags::BLEND33 | SurfaceFlags::BLEND66 | SurfaceFlags::ALPHATEST)
        {
            contents |= ContentFlags::DETAIL | ContentFlags::TRANSLUCENT | ContentFlags::WINDOW;
            contents &= !ContentFlags::SOLID;
        }
        if config.fulldetail {
            contents &= !ContentFlags::DETAIL;
        }
        // anything without visible or clip contents defaults to solid
        let meaningful = (LAST_VISIBLE_CONTENTS - 1)
            | ContentFlags::ACTORCLIP.bits()
            | ContentFlags::WEAPONCLIP.bits()
            | ContentFlags::LIGHTCLIP.bits();
        if contents.bits() & meaningful == 0 {
            contents |= ContentFlags::SOLID;
        }
        // hints and skips are never detail, and have no content
        if td.surface_flags.intersects(SurfaceFlags::HINT | SurfaceFlags::SKIP) {
            contents = ContentFlags::empty();
        }

        check_flags(contents, entitynum, brushnum)?;

        let planenum = match map.planes.from_points(&planepts[0], &planepts[1], &planepts[2])? {
            Some(num) => num,
            None => {
                warn!(
                    "entity {entitynum}, brush {brushnum}: plane with no normal at line {}",
                    script.line()
                );
                continue;
            }
        };

        // see if the plane has been used already
        let mut duplicated = false;
        for s2 in &brush.sides {
            if s2.planenum == planenum {
                warn!(
                    "entity {entitynum}, brush {brushnum}: duplicate plane at line {}",
                    script.line()
                );
                duplicated = true;
                break;
            }
            if s2.planenum == (planenum ^ 1) {
                warn!(
                    "entity {entitynum}, brush {brushnum}: mirrored plane at line {}",
                    script.line()
                );
                duplicated = true;
                break;
            }
        }
        if duplicated {
            continue;
        }

        let texinfo = texinfo_for_brush_texture(
            bsp,
            &td,
            &map.planes.plane(planenum).normal.clone(),
            &VEC3_ORIGIN,
            contents.contains(ContentFlags::TERRAIN),
        )?;
        brush.sides.push(Side {
            planenum,
            texinfo,
            contents,
            surface_flags: td.surface_flags,
            ..Default::default()
        });
        brush.textures.push(td);
        map.num_sides += 1;
    }

    if brush.sides.is_empty() {
        return Ok(BrushOutcome::Dropped);
    }

    // the brush carries the union of its face contents
    brush.contents = brush.sides[0].contents;
    let first_contents = brush.sides[0].contents;
    for side in &brush.sides[1..] {
        if side.contents != first_contents {
            debug!(
                "entity {entitynum}, brush {brushnum}: mixed face contents ({:?}, {:?})",
                side.contents, first_contents
            );
        }
        brush.contents |= side.contents;
    }
    // detail and translucent spread back to every face
    let transfer = brush.contents & (ContentFlags::DETAIL | ContentFlags::TRANSLUCENT);
    for side in &mut brush.sides {
        side.contents |= transfer;
    }

    if config.nodetail && brush.contents.contains(ContentFlags::DETAIL) {
        return Ok(BrushOutcome::Dropped);
    }
    if config.nowater && brush.contents.contains(ContentFlags::WATER) {
        return Ok(BrushOutcome::Dropped);
    }

    make_brush_windings(&mut brush, &map.planes);

    // origin brushes set the rotation origin of their entity and are
    // not kept; the entity's remaining brushes get shifted afterwards
    if brush.contents.contains(ContentFlags::ORIGIN) {
        if entitynum == 0 {
            return Err(CompileError::BadBrush {
                entity: entitynum,
                brush: brushnum,
                reason: "origin brushes not allowed in world".into(),
            });
        }
        return Ok(BrushOutcome::Origin(brush.bounds.center()));
    }

    add_brush_bevels(&mut brush, &mut map.planes)?;
    Ok(BrushOutcome::Kept(Box::new(brush)))
}

/// Recomputes planes and texinfos of an entity's brushes after an
/// origin brush moved its coordinate space.
fn adjust_brushes_for_origin(
    map: &mut MapData,
    bsp: &mut BspData,
    entitynum: usize,
) -> Result<()> {
    let origin = map.entities[entitynum].origin;
    let first = map.entities[entitynum].firstbrush;
    let count = map.entities[entitynum].numbrushes;

    for bi in first..first + count {
        let mut brush = std::mem::take(&mut map.brushes[bi]);
        for (side, td) in brush.sides.iter_mut().zip(brush.textures.iter_mut()) {
            let plane = map.planes.plane(side.planenum).clone();
            let newdist = plane.dist - dot_product(&plane.normal, &origin);
            side.surface_flags |= SurfaceFlags::ORIGIN;
            td.surface_flags |= SurfaceFlags::ORIGIN;
            side.planenum = map.planes.find_or_create(plane.normal, newdist)?;
            side.texinfo = texinfo_for_brush_texture(
                bsp,
                td,
                &map.planes.plane(side.planenum).normal.clone(),
                &origin,
                side.contents.contains(ContentFlags::TERRAIN),
            )?;
        }
        make_brush_windings(&mut brush, &map.planes);
        map.brushes[bi] = brush;
    }
    Ok(())
}

/// Group entities are editor convenience; their brushes belong to the
/// world. Brush storage is linear per entity, so the group's span is
/// spliced in behind the world's.
fn move_brushes_to_world(map: &mut MapData, entitynum: usize) -> Result<()> {
    let first = map.entities[entitynum].firstbrush;
    let count = map.entities[entitynum].numbrushes;
    if count == 0 {
        return Err(CompileError::Internal(
            "empty func_group - clean your map".into(),
        ));
    }

    let world_end = map.entities[0].numbrushes;
    let mut moved: Vec<MapBrush> = map.brushes.drain(first..first + count).collect();
    for (i, b) in moved.iter_mut().enumerate() {
        b.entitynum = 0;
        b.brushnum = world_end + i;
    }

    let tail = map.brushes.split_off(world_end);
    map.brushes.extend(moved);
    map.brushes.extend(tail);

    map.entities[0].numbrushes += count;
    for ent in &mut map.entities[1..] {
        ent.firstbrush += count;
    }
    map.entities[entitynum].numbrushes = 0;
    Ok(())
}

fn is_inline_model_entity(classname: &str) -> bool {
    matches!(
        classname,
        "func_breakable" | "func_door" | "func_door_sliding" | "func_rotating"
    ) || classname.starts_with("trigger_")
}

fn parse_map_entity(
    script: &mut Script,
    map: &mut MapData,
    bsp: &mut BspData,
    config: &Config,
) -> Result<bool> {
    let open = match script.token(true) {
        Some(t) => t,
        None => return Ok(false),
    };
    if open != "{" {
        return Err(CompileError::Parse {
            line: script.line(),
            reason: format!("expected {{ to open entity, got '{open}'"),
        });
    }

    check_limit("MAX_MAP_ENTITIES", map.entities.len(), MAX_MAP_ENTITIES)?;
    let entitynum = map.entities.len();
    map.entities.push(Entity {
        firstbrush: map.brushes.len(),
        ..Default::default()
    });

    loop {
        let tok = need_token(script, true)?;
        if tok == "}" {
            break;
        }
        if tok == "{" {
            let firstbrush = map.entities[entitynum].firstbrush;
            match parse_brush(script, map, bsp, config, entitynum, firstbrush)? {
                BrushOutcome::Kept(brush) => {
                    map.brushes.push(*brush);
                    map.entities[entitynum].numbrushes += 1;
                }
                BrushOutcome::Origin(origin) => {
                    let s = format!(
                        "{} {} {}",
                        origin[0] as i32, origin[1] as i32, origin[2] as i32
                    );
                    map.entities[entitynum].set_value("origin", &s);
                }
                BrushOutcome::Dropped => {}
            }
        } else {
            let value = need_token(script, true)?;
            map.entities[entitynum].epairs.push((tok, value));
        }
    }

    map.entities[entitynum].origin = map.entities[entitynum].vector_for_key("origin");
    let classname = map.entities[entitynum].classname().to_string();

    if entitynum == 0 && classname != "worldspawn" {
        return Err(CompileError::Parse {
            line: script.line(),
            reason: format!("the first entity must be worldspawn, it is: {classname}"),
        });
    }

    // offset all of the planes and texinfo if needed
    if is_inline_model_entity(&classname) && map.entities[entitynum].origin != VEC3_ORIGIN {
        adjust_brushes_for_origin(map, bsp, entitynum)?;
    }

    if classname == "func_group" {
        move_brushes_to_world(map, entitynum)?;
        map.entities.pop();
    } else if is_inline_model_entity(&classname) && map.entities[entitynum].numbrushes == 0 {
        warn!("{classname} has no brushes assigned (entnum: {entitynum})");
        map.entities.pop();
    }
    Ok(true)
}

/// Parses the whole map source into entities, brushes and planes.
/// The worldspawn "subdivide" key can override the configured face
/// subdivision size.
pub fn load_map(source: &str, config: &mut Config, bsp: &mut BspData) -> Result<MapData> {
    info!("--- LoadMapFile ---");

    let mut script = Script::new(source);
    let mut map = MapData::new();
    while parse_map_entity(&mut script, &mut map, bsp, config)? {}

    if map.entities.is_empty() {
        return Err(CompileError::Parse {
            line: script.line(),
            reason: "empty map".into(),
        });
    }

    let subdivide = map.entities[0].value("subdivide").parse::<i32>().unwrap_or(0);
    if (256..=2048).contains(&subdivide) {
        debug!("using subdivide {subdivide} from worldspawn");
        config.subdivide_size = subdivide as f32;
    }

    let mut bounds = Bounds::new();
    for brush in map.world_brushes() {
        if brush.bounds.mins[0] > MAX_WORLD_WIDTH {
            continue; // no valid points
        }
        bounds.add_bounds(&brush.bounds);
    }
    map.bounds = bounds;

    debug!("{:5} brushes", map.brushes.len());
    debug!("{:5} total sides", map.num_sides);
    debug!("{:5} entities", map.entities.len());
    debug!("{:5} planes", map.planes.len());
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cuboid_brush, wrap_worldspawn};

    fn parse(source: &str) -> (MapData, BspData, Config) {
        let mut config = Config::default();
        let mut bsp = BspData::new();
        let map = load_map(source, &mut config, &mut bsp).unwrap();
        (map, bsp, config)
    }

    #[test]
    fn test_plane_pairs_are_opposed() {
        let mut planes = PlaneTable::new();
        let num = planes.find_or_create([0.0, 0.0, 1.0], 64.0).unwrap();
        assert_eq!(num % 2, 0);
        let p = planes.plane(num).clone();
        let q = planes.plane(num ^ 1).clone();
        assert_eq!(q.normal, vector_negate(&p.normal));
        assert_eq!(q.dist, -p.dist);
    }

    #[test]
    fn test_axial_positive_faces_first() {
        let mut planes = PlaneTable::new();
        let num = planes.find_or_create([-1.0, 0.0, 0.0], -32.0).unwrap();
        // the negative-facing request lands on the odd slot
        assert_eq!(num % 2, 1);
        assert_eq!(planes.plane(num ^ 1).normal, [1.0, 0.0, 0.0]);
        assert_eq!(planes.plane(num ^ 1).dist, 32.0);
    }

    #[test]
    fn test_plane_dedup_with_snapping() {
        let mut planes = PlaneTable::new();
        let a = planes.find_or_create([0.0, 0.0, 1.0], 64.0).unwrap();
        let b = planes
            .find_or_create([0.000001, 0.0, 0.999999], 64.004)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(planes.len(), 2);
    }

    #[test]
    fn test_parse_single_cuboid() {
        let source = wrap_worldspawn(&cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]));
        let (map, _, _) = parse(&source);

        assert_eq!(map.entities.len(), 1);
        assert_eq!(map.brushes.len(), 1);
        let brush = &map.brushes[0];
        // pure axial cuboid gains no bevels
        assert_eq!(brush.sides.len(), 6);
        assert!(brush.contents.contains(ContentFlags::SOLID));
        assert_eq!(brush.bounds.mins, [0.0, 0.0, 0.0]);
        assert_eq!(brush.bounds.maxs, [64.0, 64.0, 64.0]);
        // 6 planes interned as 3 axial pairs plus opposites
        assert_eq!(map.planes.len(), 12);
        // canonical side order: -x +x -y +y -z +z
        for (i, side) in brush.sides.iter().enumerate() {
            let normal = map.planes.plane(side.planenum).normal;
            let axis = i / 2;
            let dir = if i % 2 == 0 { -1.0 } else { 1.0 };
            assert_eq!(normal[axis], dir);
        }
        for side in &brush.sides {
            assert!(side.winding.is_some());
            assert!(side.visible);
        }
    }

    #[test]
    fn test_worldspawn_subdivide_key() {
        let brush = cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]);
        let source = format!(
            "{{\n\"classname\" \"worldspawn\"\n\"subdivide\" \"512\"\n{brush}}}\n"
        );
        let (_, _, config) = parse(&source);
        assert_eq!(config.subdivide_size, 512.0);
    }

    #[test]
    fn test_func_group_brushes_move_to_world() {
        let b1 = cuboid_brush(&[0.0, 0.0, 0.0], &[64.0, 64.0, 64.0]);
        let b2 = cuboid_brush(&[64.0, 0.0, 0.0], &[128.0, 64.0, 64.0]);
        let source = format!(
            "{{\n\"classname\" \"worldspawn\"\n{b1}}}\n{{\n\"classname\" \"func_group\"\n{b2}}}\n"
        );
        let (map, _, _) = parse(&source);
        assert_eq!(map.entities.len(), 1);
        assert_eq!(map.entities[0].numbrushes, 2);
        assert_eq!(map.brushes[1].entitynum, 0);
        assert_eq!(map.brushes[1].brushnum, 1);
    }

    #[test]
    fn test_origin_brush_sets_entity_origin() {
        let world = cuboid_brush(&[-64.0, -64.0, -16.0], &[64.0, 64.0, 0.0]);
        let door = cuboid_brush(&[0.0, 0.0, 0.0], &[32.0, 32.0, 64.0]);
        let origin = crate::testutil::cuboid_brush_textured(
            &[8.0, 8.0, 8.0],
            &[24.0, 24.0, 24.0],
            "tex_common/origin",
        );
        let source = format!(
            "{{\n\"classname\" \"worldspawn\"\n{world}}}\n{{\n\"classname\" \"func_door\"\n{door}{origin}}}\n"
        );
        let (map, _, _) = parse(&source);
        assert_eq!(map.entities.len(), 2);
        let door_ent = &map.entities[1];
        assert_eq!(door_ent.origin, [16.0, 16.0, 16.0]);
        // the origin brush itself is not kept
        assert_eq!(door_ent.numbrushes, 1);
        // remaining brush planes were re-expressed around the origin
        let brush = &map.brushes[door_ent.firstbrush];
        assert!(brush
            .sides
            .iter()
            .all(|s| s.surface_flags.contains(SurfaceFlags::ORIGIN)));
        let top = brush
            .sides
            .iter()
            .find(|s| map.planes.plane(s.planenum).normal == [0.0, 0.0, 1.0])
            .unwrap();
        assert_eq!(map.planes.plane(top.planenum).dist, 64.0 - 16.0);
    }

    #[test]
    fn test_wedge_gets_axial_bevel() {
        // a wedge has no +z face; beveling must supply it
        let source = wrap_worldspawn(&crate::testutil::wedge_brush());
        let (map, _, _) = parse(&source);
        let brush = &map.brushes[0];
        // all six axial slots are filled (some as bevels) and the
        // slanted face comes after
        assert!(brush.sides.len() > 6);
        for (i, side) in brush.sides.iter().take(6).enumerate() {
            let normal = map.planes.plane(side.planenum).normal;
            let axis = i / 2;
            let dir = if i % 2 == 0 { -1.0 } else { 1.0 };
            assert_eq!(normal[axis], dir);
        }
    }

    #[test]
    fn test_hint_side_has_no_contents() {
        let brush = crate::testutil::cuboid_brush_textured(
            &[0.0, 0.0, 0.0],
            &[64.0, 64.0, 64.0],
            "tex_common/hint",
        );
        let source = wrap_worldspawn(&brush);
        let (map, _, _) = parse(&source);
        let b = &map.brushes[0];
        assert!(b.contents.is_empty());
        assert!(b.sides[0].surface_flags.contains(SurfaceFlags::HINT));
    }

    #[test]
    fn test_clip_and_solid_mix_rejected() {
        let brush = "{\n( 0 0 64 ) ( 64 0 64 ) ( 0 64 64 ) tex/a 0 0 0 1 1 65537 0 0\n\
             ( 0 0 0 ) ( 0 64 0 ) ( 64 0 0 ) tex/a 0 0 0 1 1 65537 0 0\n\
             ( 0 0 0 ) ( 0 0 64 ) ( 0 64 0 ) tex/a 0 0 0 1 1 65537 0 0\n\
             ( 64 0 0 ) ( 64 64 0 ) ( 64 0 64 ) tex/a 0 0 0 1 1 65537 0 0\n\
             ( 0 0 0 ) ( 64 0 0 ) ( 0 0 64 ) tex/a 0 0 0 1 1 65537 0 0\n\
             ( 0 64 0 ) ( 0 64 64 ) ( 64 64 0 ) tex/a 0 0 0 1 1 65537 0 0\n}\n";
        let source = wrap_worldspawn(brush);
        let mut config = Config::default();
        let mut bsp = BspData::new();
        assert!(load_map(&source, &mut config, &mut bsp).is_err());
    }
}
