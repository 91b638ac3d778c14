use std::collections::HashSet;
use std::ops::RangeInclusive;

use crate::anim::{controller_label, parse_key_rows, ControllerSpec, KeyForm};
use crate::error::{Diagnostics, Error, Parsed, Result, Warning, WarningKind};
use crate::lex::{list_end, tokenize, Line};
use crate::scene::parent_candidates;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Header,
    Geometry,
    Animation,
    Done,
}

pub struct Parser<'a> {
    lines: Vec<Line<'a>>,
    diagnostics: Diagnostics,
}
impl<'a> Parser<'a> {
    pub fn new(text: &'a str) -> Parser<'a> {
        Parser { lines: tokenize(text), diagnostics: Diagnostics::default() }
    }

    pub fn parse(self) -> Result<Parsed<Model>> {
        let Parser { lines, mut diagnostics } = self;

        let mut model: Option<Model> = None;
        let mut file_dependency = None;
        let mut node_blocks = vec![];
        let mut anim_blocks = vec![];

        let mut state = State::Start;
        let mut idx = 0;
        while idx < lines.len() {
            let line = &lines[idx];
            let label = line.label();
            match (state, label.as_str()) {
                (State::Start | State::Header, "filedependancy") => file_dependency = line.arg(1).map(str::to_owned),
                (State::Start, "newmodel") => {
                    let name = line.arg(1).ok_or(Error::MissingModelName)?;
                    model = Some(Model::new(name));
                    state = State::Header;
                }
                (State::Start, _) => {}
                (State::Header, "beginmodelgeom") => state = State::Geometry,
                (State::Header, _) => {
                    if let Some(model) = model.as_mut() {
                        read_header(model, &label, line, &mut diagnostics);
                    }
                }
                (State::Geometry, "node") => {
                    let end = block_end(&lines, idx, "node", "endnode", &["endmodelgeom", "newanim", "donemodel"]).map_err(|(line, msg)| Error::node_block(line, msg))?;
                    node_blocks.push(idx..=end);
                    idx = end;
                }
                (State::Geometry, "endnode") => return Err(Error::node_block(line.number, "`endnode` without `node`")),
                (State::Geometry, "endmodelgeom") => state = State::Animation,
                (State::Geometry, "doneanim") => return Err(Error::animation_block(line.number, "`doneanim` without `newanim`")),
                (State::Geometry, "newanim" | "donemodel") => {
                    // geometry ends here; read the line again as part of the animations
                    diagnostics.push(Warning::malformed(line.number, "endmodelgeom", format!("missing before `{}`", label)));
                    state = State::Animation;
                    continue;
                }
                (State::Geometry, _) => {}
                (State::Animation, "newanim") => {
                    let end = block_end(&lines, idx, "newanim", "doneanim", &["donemodel"]).map_err(|(line, msg)| Error::animation_block(line, msg))?;
                    anim_blocks.push(idx..=end);
                    idx = end;
                }
                (State::Animation, "doneanim") => return Err(Error::animation_block(line.number, "`doneanim` without `newanim`")),
                (State::Animation, "donemodel") => state = State::Done,
                (State::Animation | State::Done, _) => {}
            }
            idx += 1;
        }

        let mut model = model.ok_or(Error::MissingModelName)?;
        model.file_dependency = file_dependency;
        log::info!("parsing model {}", model.name);

        model.nodes = parse_nodes(&lines, node_blocks, &mut diagnostics)?;
        validate_tree(&model.nodes)?;

        for range in anim_blocks {
            let anim = parse_animation(&lines[range], &model.nodes, &mut diagnostics)?;
            if model.animation(&anim.name).is_some() {
                diagnostics.push(Warning::duplicate(anim.nodes.first().map(|node| node.line), NULL, &anim.name));
                continue;
            }
            model.animations.push(anim);
        }

        Ok(diagnostics.finish(model))
    }

    /// Parses a companion walkmesh: node blocks only, all sharing one parent.
    pub fn parse_walkmesh(self, kind: WalkmeshType) -> Result<Parsed<Walkmesh>> {
        let Parser { lines, mut diagnostics } = self;

        let mut node_blocks = vec![];
        let mut idx = 0;
        while idx < lines.len() {
            let line = &lines[idx];
            match line.label().as_str() {
                "node" => {
                    let end = block_end(&lines, idx, "node", "endnode", &[]).map_err(|(line, msg)| Error::node_block(line, msg))?;
                    node_blocks.push(idx..=end);
                    idx = end;
                }
                "endnode" => return Err(Error::node_block(line.number, "`endnode` without `node`")),
                _ => {}
            }
            idx += 1;
        }

        let mut nodes = parse_nodes(&lines, node_blocks, &mut diagnostics)?;
        if kind == WalkmeshType::Wok {
            // only the walkable mesh matters in a static walkmesh
            nodes = nodes.into_iter().filter(|node| node.mesh().is_some()).take(1).collect();
        }

        let mut root: Option<String> = None;
        for node in &nodes {
            let parent = node.parent.as_deref().ok_or_else(|| Error::InvalidWalkmesh { message: format!("node `{}` has no parent", node.name) })?;
            match &root {
                Some(root) if !root.eq_ignore_ascii_case(parent) => {
                    return Err(Error::InvalidWalkmesh { message: format!("nodes are parented to both `{}` and `{}`", root, parent) });
                }
                Some(_) => {}
                None => root = Some(parent.to_owned()),
            }
        }
        let root = root.ok_or_else(|| Error::InvalidWalkmesh { message: "walkmesh has no nodes".to_owned() })?;

        Ok(diagnostics.finish(Walkmesh { kind, root, nodes }))
    }
}

pub fn parse_model(text: &str) -> Result<Parsed<Model>> {
    Parser::new(text).parse()
}

pub fn parse_walkmesh(text: &str, kind: WalkmeshType) -> Result<Parsed<Walkmesh>> {
    Parser::new(text).parse_walkmesh(kind)
}

fn read_keys(rows: &[Line], spec: &ControllerSpec, form: KeyForm, diag: &mut Diagnostics) -> Vec<Keyframe> {
    let mut warnings = vec![];
    let keys = parse_key_rows(rows, spec, form, &mut warnings);
    diag.extend(warnings);
    keys
}

/// Index of the line closing the block opened at `start`.
///
/// Blocks never nest, so another `open` (or any of `stops`) before `close` is an error, as is
/// running off the end of the input.
fn block_end(lines: &[Line], start: usize, open: &str, close: &str, stops: &[&str]) -> std::result::Result<usize, (usize, String)> {
    for (idx, line) in lines.iter().enumerate().skip(start + 1) {
        let label = line.label();
        if label == close {
            return Ok(idx);
        }
        if label == open || stops.contains(&label.as_str()) {
            return Err((line.number, format!("`{}` inside an unterminated `{}` from line {}", label, open, lines[start].number)));
        }
    }
    Err((lines[start].number, format!("`{}` is never closed by `{}`", open, close)))
}

fn read_header(model: &mut Model, label: &str, line: &Line, diag: &mut Diagnostics) {
    let res = match label {
        "setsupermodel" => line.arg(2).map(|sup| model.supermodel = sup.to_owned()).ok_or_else(|| "missing supermodel name".to_owned()),
        "classification" => match line.arg(1).map(str::parse::<Classification>) {
            Some(Ok(classification)) => Ok(model.classification = classification),
            Some(Err(())) => {
                model.classification = Classification::Unknown;
                Err(format!("unknown classification `{}`", line.text()))
            }
            None => Err("missing classification".to_owned()),
        },
        "classification_unk1" => line.i32_at(1).map(|val| model.classification_unk1 = val),
        "ignorefog" => line.i32_at(1).map(|val| model.ignorefog = val != 0),
        "compress_quaternions" => line.i32_at(1).map(|val| model.compress_quaternions = val != 0),
        "headlink" => line.i32_at(1).map(|val| model.headlink = val != 0),
        "setanimationscale" => line.f32_at(1).map(|val| model.animation_scale = val),
        _ => Ok(()),
    };
    if let Err(msg) = res {
        diag.push(Warning::malformed(line.number, label, msg));
    }
}

fn parse_nodes(lines: &[Line], blocks: Vec<RangeInclusive<usize>>, diag: &mut Diagnostics) -> Result<Vec<Node>> {
    let mut keys = HashSet::new();
    let mut nodes = Vec::with_capacity(blocks.len());
    for range in blocks {
        let node = parse_node(&lines[range], diag)?;
        // identity is (parent, name), the same leaf name may recur under distinct parents
        let key = (node.parent_name().to_ascii_lowercase(), node.name.to_ascii_lowercase());
        if !keys.insert(key) {
            diag.push(Warning::duplicate(Some(node.line), node.parent_name(), &node.name));
            continue;
        }
        nodes.push(node);
    }
    Ok(nodes)
}

/// The first node must be an unparented dummy, and every other parent must resolve to a node
/// that appeared before it.
fn validate_tree(nodes: &[Node]) -> Result<()> {
    let root = nodes.first().ok_or_else(|| Error::MissingRoot { name: String::new() })?;
    if root.node_type() != NodeType::Dummy || root.parent.is_some() {
        return Err(Error::MissingRoot { name: root.name.clone() });
    }

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(root.name.to_ascii_lowercase());
    for node in &nodes[1..] {
        let resolved = node
            .parent
            .as_deref()
            .map_or(false, |parent| parent_candidates(parent).any(|candidate| seen.contains(&candidate.to_ascii_lowercase())));
        if !resolved {
            return Err(Error::DanglingParent { line: node.line, name: node.name.clone(), parent: node.parent_name().to_owned() });
        }
        seen.insert(node.name.to_ascii_lowercase());
    }
    Ok(())
}

/// What a directive reader did with a line.
enum Read {
    /// Handled, plus this many following lines.
    Consumed(usize),
    Unknown,
}

type ReadResult = std::result::Result<Read, String>;

const DONE: ReadResult = Ok(Read::Consumed(0));

fn parse_node(block: &[Line], diag: &mut Diagnostics) -> Result<Node> {
    let header = &block[0];
    let (type_token, name) = match (header.arg(1), header.arg(2)) {
        (Some(node_type), Some(name)) => (node_type, name),
        _ => return Err(Error::node_block(header.number, "`node` needs a type and a name")),
    };
    let node_type = type_token.parse::<NodeType>().map_err(|()| Error::UnsupportedNodeType {
        line: header.number,
        node_type: type_token.to_owned(),
        name: name.to_owned(),
    })?;

    let mut node = Node::new(name, None, NodeData::for_type(node_type));
    node.line = header.number;

    let body = &block[1..block.len() - 1];
    let mut flares = FlareLists::new(body);
    let mut idx = 0;
    while idx < body.len() {
        let line = &body[idx];
        idx += 1;
        if line.is_numeric() {
            node.raw.push(line.text());
            continue;
        }
        let label = line.label();
        let rest = &body[idx..];
        let res = match controller_label(&label, node_type) {
            Some((spec, form)) if form != KeyForm::Constant => {
                let rows = &rest[..list_end(rest, 0)];
                let keys = read_keys(rows, &spec, form, diag);
                node.keyed.insert(Channel { name: spec.name.to_owned(), arity: spec.arity, integer: spec.integer, keys });
                Ok(Read::Consumed(rows.len()))
            }
            _ => read_directive(&mut node, &label, line, rest, &mut flares, diag),
        };
        match res {
            Ok(Read::Consumed(n)) => idx += n,
            Ok(Read::Unknown) => {
                node.raw.push(line.text());
                let end = list_end(body, idx);
                node.raw.extend(body[idx..end].iter().map(Line::text));
                idx = end;
            }
            Err(msg) => {
                diag.push(Warning::malformed(line.number, &label, msg));
                idx = list_end(body, idx);
            }
        }
    }

    if let NodeData::Light(light) = &mut node.data {
        light.flares = flares.finish();
    }
    Ok(node)
}

fn read_directive(node: &mut Node, label: &str, line: &Line, rest: &[Line], flares: &mut FlareLists, diag: &mut Diagnostics) -> ReadResult {
    match label {
        "parent" => {
            let parent = text(line)?;
            node.parent = (!is_null(&parent)).then(|| parent);
        }
        "position" => node.position = vec3(line)?,
        "orientation" => node.orientation = line.floats::<4>(1)?.into(),
        "scale" => node.scale = line.f32_at(1)?,
        "wirecolor" => node.wirecolor = vec3(line)?,
        _ => {
            return match &mut node.data {
                NodeData::Dummy | NodeData::Patch => Ok(Read::Unknown),
                NodeData::Reference(reference) => read_reference(reference, label, line),
                NodeData::Mesh(mesh) => read_mesh(mesh, label, line, rest, diag),
                NodeData::Emitter(emitter) => match emitter.read_param(label, &line.tokens[1..])? {
                    true => DONE,
                    false => Ok(Read::Unknown),
                },
                NodeData::Light(light) => read_light(light, label, line, rest, flares, diag),
            };
        }
    }
    DONE
}

fn text(line: &Line) -> std::result::Result<String, String> {
    line.arg(1).map(str::to_owned).ok_or_else(|| "missing value".to_owned())
}

fn vec3(line: &Line) -> std::result::Result<Vec3d, String> {
    line.floats::<3>(1).map(Vec3d::from)
}

fn flag(line: &Line) -> std::result::Result<bool, String> {
    line.i32_at(1).map(|val| val != 0)
}

/// The rows of a list whose length is given as the directive's first argument.
///
/// A count larger than the numeric run that follows is clamped to it.
fn counted_rows<'l, 'a>(line: &Line, rest: &'l [Line<'a>], diag: &mut Diagnostics) -> std::result::Result<&'l [Line<'a>], String> {
    let count = usize::try_from(line.i32_at(1)?).map_err(|_| "negative count".to_owned())?;
    let available = list_end(rest, 0);
    if count > available {
        diag.push(Warning::malformed(line.number, &line.label(), format!("declares {} rows but only {} follow", count, available)));
    }
    Ok(&rest[..count.min(available)])
}

/// Like [`counted_rows`] for lists whose rows start with a name.
fn named_rows<'l, 'a>(line: &Line, rest: &'l [Line<'a>]) -> std::result::Result<&'l [Line<'a>], String> {
    let count = usize::try_from(line.i32_at(1)?).map_err(|_| "negative count".to_owned())?;
    Ok(&rest[..count.min(rest.len())])
}

/// Collects the rows that parse, warning about the rest.
fn rows_of<T>(rows: &[Line], label: &str, diag: &mut Diagnostics, mut f: impl FnMut(&Line) -> std::result::Result<T, String>) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match f(row) {
            Ok(val) => out.push(val),
            Err(msg) => diag.push(Warning::malformed(row.number, label, msg)),
        }
    }
    out
}

fn uv(row: &Line) -> std::result::Result<[f32; 2], String> {
    row.floats::<2>(0)
}

fn index(row: &Line, idx: usize) -> std::result::Result<u32, String> {
    u32::try_from(row.i32_at(idx)?).map_err(|_| format!("negative index in `{}`", row.text()))
}

fn read_reference(reference: &mut Reference, label: &str, line: &Line) -> ReadResult {
    match label {
        "refmodel" => reference.refmodel = text(line)?,
        "reattachable" => reference.reattachable = flag(line)?,
        _ => return Ok(Read::Unknown),
    }
    DONE
}

fn read_mesh(mesh: &mut Mesh, label: &str, line: &Line, rest: &[Line], diag: &mut Diagnostics) -> ReadResult {
    let surface = &mut mesh.surface;
    match label {
        "tilefade" => surface.tilefade = line.i32_at(1)?,
        "render" => surface.render = flag(line)?,
        "shadow" => surface.shadow = flag(line)?,
        "lightmapped" => surface.lightmapped = flag(line)?,
        "beaming" => surface.beaming = flag(line)?,
        "inheritcolor" => surface.inheritcolor = flag(line)?,
        "tangentspace" => surface.tangentspace = flag(line)?,
        "rotatetexture" => surface.rotatetexture = flag(line)?,
        "m_bisbackgroundgeometry" => surface.background_geometry = flag(line)?,
        "dirt_enabled" => surface.dirt_enabled = flag(line)?,
        "dirt_texture" => surface.dirt_texture = line.i32_at(1)?,
        "dirt_worldspace" => surface.dirt_worldspace = line.i32_at(1)?,
        "hologram_donotdraw" => surface.hologram_donotdraw = flag(line)?,
        "animateuv" => surface.animateuv = flag(line)?,
        "uvdirectionx" => surface.uvdirectionx = line.f32_at(1)?,
        "uvdirectiony" => surface.uvdirectiony = line.f32_at(1)?,
        "uvjitter" => surface.uvjitter = line.f32_at(1)?,
        "uvjitterspeed" => surface.uvjitterspeed = line.f32_at(1)?,
        "alpha" => surface.alpha = line.f32_at(1)?,
        "transparencyhint" => surface.transparencyhint = line.i32_at(1)?,
        "selfillumcolor" => surface.selfillumcolor = vec3(line)?,
        "ambient" => surface.ambient = vec3(line)?,
        "diffuse" => surface.diffuse = vec3(line)?,
        "bitmap" => surface.bitmap = text(line)?,
        "bitmap2" => surface.bitmap2 = text(line)?,
        // often written as `center undefined`
        "center" => mesh.center = vec3(line).ok(),
        "lytposition" => mesh.lytposition = Some(vec3(line)?),
        "verts" => {
            let rows = counted_rows(line, rest, diag)?;
            mesh.verts = rows_of(rows, label, diag, |row| row.floats::<3>(0).map(Vec3d::from));
            return Ok(Read::Consumed(rows.len()));
        }
        "faces" => {
            let rows = counted_rows(line, rest, diag)?;
            mesh.faces = rows_of(rows, label, diag, |row| {
                Ok(Face {
                    verts: [index(row, 0)?, index(row, 1)?, index(row, 2)?],
                    smoothgroup: row.u32_at(3)?,
                    uvs: [index(row, 4)?, index(row, 5)?, index(row, 6)?],
                    material: row.i32_at(7)?,
                })
            });
            return Ok(Read::Consumed(rows.len()));
        }
        "tverts" => {
            let rows = counted_rows(line, rest, diag)?;
            mesh.tverts = rows_of(rows, label, diag, uv);
            return Ok(Read::Consumed(rows.len()));
        }
        "tverts1" => {
            let rows = counted_rows(line, rest, diag)?;
            mesh.tverts1 = rows_of(rows, label, diag, uv);
            return Ok(Read::Consumed(rows.len()));
        }
        "texindices1" => {
            let rows = counted_rows(line, rest, diag)?;
            mesh.texindices1 = rows_of(rows, label, diag, |row| Ok([index(row, 0)?, index(row, 1)?, index(row, 2)?]));
            return Ok(Read::Consumed(rows.len()));
        }
        "roomlinks" => {
            // the count is not always present
            let rows = match counted_rows(line, rest, diag) {
                Ok(rows) => rows,
                Err(_) => &rest[..list_end(rest, 0)],
            };
            mesh.roomlinks = rows_of(rows, label, diag, |row| Ok(RoomLink { face_edge: index(row, 0)?, room: index(row, 1)? }));
            return Ok(Read::Consumed(rows.len()));
        }
        _ => return read_mesh_kind(&mut mesh.kind, label, line, rest, diag),
    }
    DONE
}

fn read_mesh_kind(kind: &mut MeshKind, label: &str, line: &Line, rest: &[Line], diag: &mut Diagnostics) -> ReadResult {
    match (kind, label) {
        (MeshKind::Danglymesh(dangly), "period") => dangly.period = line.f32_at(1)?,
        (MeshKind::Danglymesh(dangly), "tightness") => dangly.tightness = line.f32_at(1)?,
        (MeshKind::Danglymesh(dangly), "displacement") => dangly.displacement = line.f32_at(1)?,
        (MeshKind::Danglymesh(dangly), "constraints") => {
            let rows = counted_rows(line, rest, diag)?;
            dangly.constraints = rows_of(rows, label, diag, |row| row.f32_at(0));
            return Ok(Read::Consumed(rows.len()));
        }
        (MeshKind::Skin(weights), "weights") => {
            let rows = named_rows(line, rest)?;
            *weights = rows_of(rows, label, diag, |row| {
                if row.tokens.len() % 2 != 0 {
                    return Err(format!("expected bone/weight pairs, found `{}`", row.text()));
                }
                row.tokens
                    .chunks(2)
                    .map(|pair| match pair {
                        [bone, weight] => weight
                            .parse()
                            .map(|weight| BoneWeight { bone: (*bone).to_owned(), weight })
                            .map_err(|_| format!("`{}` is not a valid weight", weight)),
                        _ => Err("dangling bone name".to_owned()),
                    })
                    .collect()
            });
            return Ok(Read::Consumed(rows.len()));
        }
        (MeshKind::Aabb(entries), "aabb") => {
            let first = aabb_entry(line, 1)?;
            let rows = &rest[..list_end(rest, 0)];
            entries.clear();
            entries.push(first);
            entries.extend(rows_of(rows, label, diag, |row| aabb_entry(row, 0)));
            return Ok(Read::Consumed(rows.len()));
        }
        _ => return Ok(Read::Unknown),
    }
    DONE
}

fn aabb_entry(line: &Line, from: usize) -> std::result::Result<AabbEntry, String> {
    let [x1, y1, z1, x2, y2, z2] = line.floats::<6>(from)?;
    Ok(AabbEntry {
        bbox: BBox { min: Vec3d::new(x1, y1, z1), max: Vec3d::new(x2, y2, z2) },
        face: line.i32_at(from + 6)?,
        split: None,
    })
}

/// Flare properties arrive as separate parallel lists.
struct FlareLists {
    /// Number of rows under `texturenames`, which are names and cannot be scanned for.
    count: usize,
    textures: Vec<String>,
    sizes: Vec<f32>,
    positions: Vec<f32>,
    colorshifts: Vec<Vec3d>,
}
impl FlareLists {
    fn new(body: &[Line]) -> Self {
        let run = |name: &str| {
            body.iter()
                .position(|line| line.label() == name)
                .map_or(0, |idx| list_end(body, idx + 1) - (idx + 1))
        };
        let count = run("flaresizes").min(run("flarepositions")).min(run("flarecolorshifts"));
        FlareLists { count, textures: vec![], sizes: vec![], positions: vec![], colorshifts: vec![] }
    }

    fn finish(self) -> Vec<Flare> {
        let n = self.count.min(self.textures.len()).min(self.sizes.len()).min(self.positions.len()).min(self.colorshifts.len());
        (0..n)
            .map(|i| Flare {
                texture: self.textures[i].clone(),
                size: self.sizes[i],
                position: self.positions[i],
                colorshift: self.colorshifts[i],
            })
            .collect()
    }
}

fn read_light(light: &mut Light, label: &str, line: &Line, rest: &[Line], flares: &mut FlareLists, diag: &mut Diagnostics) -> ReadResult {
    match label {
        "radius" => light.radius = line.f32_at(1)?,
        "shadow" => light.shadow = flag(line)?,
        "multiplier" => light.multiplier = line.f32_at(1)?,
        "color" => light.color = vec3(line)?,
        "ambientonly" => light.ambientonly = flag(line)?,
        "ndynamictype" => light.ndynamictype = line.i32_at(1)?,
        "isdynamic" => light.isdynamic = flag(line)?,
        "affectdynamic" => light.affectdynamic = flag(line)?,
        "negativelight" => light.negativelight = flag(line)?,
        "lightpriority" => light.lightpriority = line.i32_at(1)?,
        "fadinglight" => light.fadinglight = flag(line)?,
        "lensflares" => light.lensflares = flag(line)?,
        "flareradius" => light.flareradius = line.f32_at(1)?,
        "texturenames" => {
            let rows = &rest[..flares.count.min(rest.len())];
            flares.textures = rows.iter().map(|row| row.tokens[0].to_owned()).collect();
            return Ok(Read::Consumed(rows.len()));
        }
        "flaresizes" | "flarepositions" | "flarecolorshifts" => {
            let rows = &rest[..list_end(rest, 0)];
            match label {
                "flaresizes" => flares.sizes = rows_of(rows, label, diag, |row| row.f32_at(0)),
                "flarepositions" => flares.positions = rows_of(rows, label, diag, |row| row.f32_at(0)),
                _ => flares.colorshifts = rows_of(rows, label, diag, |row| row.floats::<3>(0).map(Vec3d::from)),
            }
            return Ok(Read::Consumed(rows.len()));
        }
        _ => return Ok(Read::Unknown),
    }
    DONE
}

fn parse_animation(block: &[Line], nodes: &[Node], diag: &mut Diagnostics) -> Result<Animation> {
    let header = &block[0];
    let name = header.arg(1).ok_or_else(|| Error::animation_block(header.number, "`newanim` needs a name"))?;
    let mut anim = Animation::new(name, header.arg(2).unwrap_or(NULL));

    let mut keys = HashSet::new();
    let body = &block[1..block.len() - 1];
    let mut idx = 0;
    while idx < body.len() {
        let line = &body[idx];
        let label = line.label();
        let res = match label.as_str() {
            "length" => line.f32_at(1).map(|val| anim.length = val),
            "transtime" => line.f32_at(1).map(|val| anim.transtime = val),
            "animroot" => text(line).map(|root| anim.animroot = root),
            "event" => event(line, 1).map(|event| anim.events.push(event)),
            "eventlist" => {
                let end = list_end(body, idx + 1);
                let events = rows_of(&body[idx + 1..end], &label, diag, |row| event(row, 0));
                anim.events.extend(events);
                idx = end - 1;
                Ok(())
            }
            "node" => {
                let end = block_end(body, idx, "node", "endnode", &[]).map_err(|(line, msg)| Error::animation_block(line, msg))?;
                let node = parse_anim_node(&body[idx..=end], nodes, diag)?;
                idx = end;
                let key = (node.parent.as_deref().unwrap_or(NULL).to_ascii_lowercase(), node.name.to_ascii_lowercase());
                if keys.insert(key) {
                    anim.nodes.push(node);
                } else {
                    diag.push(Warning::duplicate(Some(node.line), node.parent.as_deref().unwrap_or(NULL), &node.name));
                }
                Ok(())
            }
            "endnode" => return Err(Error::animation_block(line.number, "`endnode` without `node`")),
            _ => Ok(()),
        };
        if let Err(msg) = res {
            diag.push(Warning::malformed(line.number, &label, msg));
        }
        idx += 1;
    }

    for anim_node in &mut anim.nodes {
        check_samples(anim_node, anim.length, nodes, diag);
    }
    Ok(anim)
}

fn event(line: &Line, from: usize) -> std::result::Result<AnimEvent, String> {
    let time = line.f32_at(from)?;
    let name = line.arg(from + 1).ok_or("missing event name")?;
    Ok(AnimEvent { time, name: name.to_owned() })
}

fn parse_anim_node(block: &[Line], nodes: &[Node], diag: &mut Diagnostics) -> Result<AnimNode> {
    let header = &block[0];
    let (type_token, name) = match (header.arg(1), header.arg(2)) {
        (Some(node_type), Some(name)) => (node_type, name),
        _ => return Err(Error::animation_block(header.number, "`node` needs a type and a name")),
    };
    let mut anim_node = AnimNode::new(name, None, type_token.to_ascii_lowercase());
    anim_node.line = header.number;

    let body = &block[1..block.len() - 1];
    let parent = body.iter().find(|line| line.label() == "parent").and_then(|line| line.arg(1)).unwrap_or(NULL);

    // channel routing follows the geometry node when there is one
    let node_type = geometry_node(nodes, parent, name)
        .map(Node::node_type)
        .or_else(|| type_token.parse().ok())
        .unwrap_or(NodeType::Dummy);

    let mut idx = 0;
    while idx < body.len() {
        let line = &body[idx];
        idx += 1;
        let label = line.label();
        let rest = &body[idx..];
        let res: std::result::Result<usize, String> = match label.as_str() {
            "parent" => text(line).map(|parent| {
                anim_node.parent = (!is_null(&parent)).then(|| parent);
                0
            }),
            "endlist" => Ok(0),
            "sampleperiod" => line.f32_at(1).map(|val| {
                anim_node.samples.sample_period = Some(val);
                0
            }),
            "animverts" | "animtverts" => counted_rows(line, rest, diag).map(|rows| {
                let samples = rows_of(rows, &label, diag, |row| row.floats::<3>(0).map(Vec3d::from));
                if label == "animverts" {
                    anim_node.samples.verts = samples;
                } else {
                    anim_node.samples.tverts = samples;
                }
                rows.len()
            }),
            _ if line.is_numeric() => {
                anim_node.raw.push(line.text());
                Ok(0)
            }
            _ => match controller_label(&label, node_type) {
                Some((spec, KeyForm::Constant)) => line.float_vec(1, spec.arity).map(|value| {
                    anim_node.channels.insert(Channel {
                        name: spec.name.to_owned(),
                        arity: spec.arity,
                        integer: spec.integer,
                        keys: vec![Keyframe::Constant { value }],
                    });
                    0
                }),
                Some((spec, form)) => {
                    let rows = &rest[..list_end(rest, 0)];
                    let keys = read_keys(rows, &spec, form, diag);
                    anim_node.channels.insert(Channel { name: spec.name.to_owned(), arity: spec.arity, integer: spec.integer, keys });
                    Ok(rows.len())
                }
                None => {
                    // unknown controller: keep it and its rows verbatim
                    let end = list_end(rest, 0);
                    anim_node.raw.push(line.text());
                    anim_node.raw.extend(rest[..end].iter().map(Line::text));
                    Ok(end)
                }
            },
        };
        match res {
            Ok(n) => idx += n,
            Err(msg) => {
                diag.push(Warning::malformed(line.number, &label, msg));
                idx += list_end(rest, 0);
            }
        }
    }
    Ok(anim_node)
}

/// The geometry node an animation node drives, by the same `(parent, name)` identity geometry
/// nodes are told apart by. A name with no node under that parent falls back to the first node
/// of that name.
fn geometry_node<'n>(nodes: &'n [Node], parent: &str, name: &str) -> Option<&'n Node> {
    let named = || nodes.iter().filter(move |node| node.name.eq_ignore_ascii_case(name));
    named().find(|node| node.parent_name().eq_ignore_ascii_case(parent)).or_else(|| named().next())
}

/// Drops sample lists whose size disagrees with the animated mesh.
fn check_samples(anim_node: &mut AnimNode, length: f32, nodes: &[Node], diag: &mut Diagnostics) {
    if anim_node.samples.verts.is_empty() && anim_node.samples.tverts.is_empty() {
        return;
    }
    let parent = anim_node.parent.as_deref().unwrap_or(NULL);
    let mesh = geometry_node(nodes, parent, &anim_node.name).and_then(Node::mesh);
    let frames = match anim_node.samples.sample_period {
        Some(period) if period > 0.0 => (length / period).round() as usize + 1,
        _ => 1,
    };
    let (vert_count, uv_count) = mesh.map_or((0, 0), |mesh| (mesh.verts.len(), mesh.tverts.len()));

    let checks = [("animverts", vert_count * frames), ("animtverts", uv_count * frames)];
    for (channel, expected) in checks {
        let samples = match channel {
            "animverts" => &mut anim_node.samples.verts,
            _ => &mut anim_node.samples.tverts,
        };
        if samples.is_empty() || samples.len() == expected {
            continue;
        }
        diag.push(Warning {
            line: Some(anim_node.line),
            kind: WarningKind::SampleSizeMismatch { node: anim_node.name.clone(), channel: channel.to_owned(), expected, found: samples.len() },
        });
        samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: &str = "\
# sample model
filedependancy box.max
newmodel box
setsupermodel box NULL
classification Character
classification_unk1 2
ignorefog 1
setanimationscale 0.971
beginmodelgeom box
node dummy box
  parent NULL
endnode
node trimesh Plane01
  parent box
  position 0.5 -1 2
  orientation 0 0 1 1.5708
  wirecolor 1 0.5 0.25
  ambient 0.2 0.2 0.2
  diffuse 0.8 0.8 0.8
  bitmap plane_tex
  render 1
  center undefined
  someunknownfield 1 2
    3 4 5
  verts 4
    0 0 0
    1 0 0
    1 1 0
    0 1 0
  faces 2
    0 1 2  1  0 1 2  0
    2 3 0  3  2 3 0  0
  tverts 4
    0 0 0
    1 0 0
    1 1 0
    0 1 0
endnode
node light Light01
  parent box
  color 1 0.9 0.8
  radius 12
  lensflares 1
  texturenames zd
    fxpa_flare
    fxpa_flare2
  flaresizes 2
    0.5
    1.5
  flarepositions 2
    1
    0.25
  flarecolorshifts 2
    0 0 0
    0.1 0.2 0.3
endnode
node emitter Smoke
  parent Plane01
  update Fountain
  render Normal
  blend punchthrough
  birthrate 10
  colorStart 0.5 0.5 0.5
  texture fx_smoke
endnode
endmodelgeom box
newanim idle box
  length 1
  transtime 0.25
  animroot box
  event 0.5 snd_footstep
  node dummy box
    parent NULL
  endnode
  node trimesh Plane01
    parent box
    positionkey 2
      0 0 0 0
      1 1 0 0
    alphabezierkey 2
      0 1 0 0
      1 0 0.25 -0.25
    somecontroller 1
      0 1
  endnode
doneanim idle box
donemodel box
";

    #[test]
    fn test_parse_header() {
        let parsed = parse_model(BOX).unwrap();
        let model = parsed.value;
        assert_eq!(model.name, "box");
        assert_eq!(model.supermodel, NULL);
        assert_eq!(model.classification, Classification::Character);
        assert_eq!(model.classification_unk1, 2);
        assert!(model.ignorefog);
        assert_eq!(model.animation_scale, 0.971);
        assert_eq!(model.file_dependency.as_deref(), Some("box.max"));
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    }

    #[test]
    fn test_parse_trimesh() {
        let model = parse_model(BOX).unwrap().value;
        let node = model.node("plane01").unwrap();
        assert_eq!(node.parent.as_deref(), Some("box"));
        assert_eq!(node.position, Vec3d::new(0.5, -1.0, 2.0));
        assert_eq!(node.orientation.angle, 1.5708);
        let mesh = node.mesh().unwrap();
        assert_eq!(mesh.surface.bitmap, "plane_tex");
        assert_eq!(mesh.center, None);
        assert_eq!(mesh.verts.len(), 4);
        assert_eq!(mesh.faces[1], Face { verts: [2, 3, 0], smoothgroup: 3, uvs: [2, 3, 0], material: 0 });
        assert_eq!(mesh.tverts[2], [1.0, 1.0]);
        assert_eq!(node.raw, vec!["someunknownfield 1 2".to_owned(), "3 4 5".to_owned()]);
    }

    #[test]
    fn test_parse_light_flares() {
        let model = parse_model(BOX).unwrap().value;
        let NodeData::Light(light) = &model.node("Light01").unwrap().data else {
            panic!("not a light");
        };
        assert_eq!(light.radius, 12.0);
        assert!(light.lensflares);
        assert_eq!(light.flares.len(), 2);
        assert_eq!(light.flares[1].texture, "fxpa_flare2");
        assert_eq!(light.flares[1].colorshift, Vec3d::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_parse_emitter() {
        let model = parse_model(BOX).unwrap().value;
        let NodeData::Emitter(emitter) = &model.node("Smoke").unwrap().data else {
            panic!("not an emitter");
        };
        assert_eq!(emitter.birthrate, 10);
        assert_eq!(emitter.blend, Some(BlendType::PunchThrough));
        assert_eq!(emitter.render, Some(RenderType::Normal));
        assert_eq!(emitter.colorstart, Vec3d::new(0.5, 0.5, 0.5));
        assert_eq!(emitter.texture, "fx_smoke");
    }

    #[test]
    fn test_parse_animation() {
        let model = parse_model(BOX).unwrap().value;
        let anim = model.animation("idle").unwrap();
        assert_eq!(anim.transtime, 0.25);
        assert_eq!(anim.events, vec![AnimEvent { time: 0.5, name: "snd_footstep".to_owned() }]);
        let node = anim.node("Plane01").unwrap();
        let position = node.channels.get("position").unwrap();
        assert_eq!(position.keys.len(), 2);
        let alpha = node.channels.get("alpha").unwrap();
        assert_eq!(alpha.keys[1], Keyframe::Bezier { time: 1.0, value: vec![0.0], left: vec![0.25], right: vec![-0.25] });
        assert_eq!(node.raw, vec!["somecontroller 1".to_owned(), "0 1".to_owned()]);
    }

    #[test]
    fn test_missing_root() {
        let text = "newmodel m\nbeginmodelgeom m\nnode trimesh a\nparent NULL\nendnode\nendmodelgeom m\n";
        assert!(matches!(parse_model(text), Err(Error::MissingRoot { name }) if name == "a"));
        let text = "newmodel m\nbeginmodelgeom m\nnode dummy a\nparent b\nendnode\nendmodelgeom m\n";
        assert!(matches!(parse_model(text), Err(Error::MissingRoot { .. })));
    }

    #[test]
    fn test_dangling_parent() {
        let text = "newmodel m\nbeginmodelgeom m\nnode dummy m\nparent NULL\nendnode\nnode dummy a\nparent nowhere\nendnode\nendmodelgeom m\n";
        match parse_model(text) {
            Err(Error::DanglingParent { line, name, parent }) => {
                assert_eq!((line, name.as_str(), parent.as_str()), (6, "a", "nowhere"));
            }
            other => panic!("unexpected {:?}", other.map(|p| p.value.name)),
        }
    }

    #[test]
    fn test_suffixed_parent_resolves() {
        let text = "\
newmodel root
beginmodelgeom root
node dummy root
  parent NULL
endnode
node dummy child
  parent root
endnode
node dummy child.001
  parent root.001
endnode
endmodelgeom root
";
        let model = parse_model(text).unwrap().value;
        assert_eq!(model.nodes.len(), 3);
    }

    #[test]
    fn test_unsupported_node_type() {
        let text = "newmodel m\nbeginmodelgeom m\nnode dummy m\nparent NULL\nendnode\nnode camera cam\nparent m\nendnode\n";
        match parse_model(text) {
            Err(Error::UnsupportedNodeType { line, node_type, name }) => {
                assert_eq!((line, node_type.as_str(), name.as_str()), (6, "camera", "cam"));
            }
            other => panic!("unexpected {:?}", other.map(|p| p.value.name)),
        }
    }

    #[test]
    fn test_malformed_animation_blocks() {
        let head = "newmodel m\nbeginmodelgeom m\nnode dummy m\nparent NULL\nendnode\nendmodelgeom m\n";
        let nested = format!("{}newanim a m\nnewanim b m\ndoneanim b m\n", head);
        assert!(matches!(parse_model(&nested), Err(Error::MalformedAnimationBlock { line: 8, .. })));
        let stray = format!("{}doneanim a m\n", head);
        assert!(matches!(parse_model(&stray), Err(Error::MalformedAnimationBlock { line: 7, .. })));
        let open = format!("{}newanim a m\nlength 1\n", head);
        assert!(matches!(parse_model(&open), Err(Error::MalformedAnimationBlock { line: 7, .. })));
    }

    #[test]
    fn test_doneanim_inside_geometry() {
        let text = "newmodel m\nbeginmodelgeom m\nnode dummy m\n  parent NULL\nendnode\ndoneanim idle m\ndonemodel m\n";
        assert!(matches!(parse_model(text), Err(Error::MalformedAnimationBlock { line: 6, .. })));
    }

    #[test]
    fn test_missing_endmodelgeom_still_reads_animations() {
        let text = BOX.replace("endmodelgeom box\n", "");
        let parsed = parse_model(&text).unwrap();
        assert_eq!(parsed.value.nodes.len(), 4);
        let anim = parsed.value.animation("idle").unwrap();
        assert_eq!(anim.nodes.len(), 2);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(matches!(&parsed.warnings[0].kind, WarningKind::MalformedRecord { directive, .. } if directive == "endmodelgeom"));

        let text = "newmodel m\nbeginmodelgeom m\nnode dummy m\n  parent NULL\nendnode\ndonemodel m\n";
        let parsed = parse_model(text).unwrap();
        assert_eq!(parsed.value.nodes.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_animation_nodes_match_geometry_by_parent() {
        let emitter = "node emitter flap\n  parent right\nendnode\n";
        let mesh = "\
node trimesh flap
  parent left
  verts 3
    0 0 0
    1 0 0
    0 1 0
  faces 1
    0 1 2  1  0 0 0  0
endnode
";
        let anim = "\
newanim wave m
  length 1
  node trimesh flap
    parent left
    animverts 3
      0 0 0
      1 0 0
      0 1 0
  endnode
  node emitter flap
    parent right
    birthrate 5
  endnode
doneanim wave m
donemodel m
";
        // either node may come first; lookups must not depend on it
        for (first, second) in [(emitter, mesh), (mesh, emitter)] {
            let text = format!(
                "newmodel m\nbeginmodelgeom m\nnode dummy m\n  parent NULL\nendnode\nnode dummy left\n  parent m\nendnode\nnode dummy right\n  parent m\nendnode\n{}{}endmodelgeom m\n{}",
                first, second, anim
            );
            let parsed = parse_model(&text).unwrap();
            assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
            let anim = parsed.value.animation("wave").unwrap();
            assert_eq!(anim.nodes.len(), 2);
            assert_eq!(anim.nodes[0].samples.verts.len(), 3);
            assert!(anim.nodes[1].channels.get("birthrate").is_some());
            assert!(anim.nodes[1].raw.is_empty());
        }
    }

    #[test]
    fn test_high_smoothgroup_bits_survive() {
        let text = BOX.replace("    2 3 0  3  2 3 0  0", "    2 3 0  2147483648  2 3 0  0");
        let parsed = parse_model(&text).unwrap();
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        let mesh = parsed.value.node("Plane01").unwrap().mesh().unwrap();
        assert_eq!(mesh.faces[1].smoothgroup, 0x8000_0000);

        let written = parsed.value.to_text(&crate::io::ExportOptions { smoothgroups: true, ..Default::default() });
        let reread = parse_model(&written).unwrap().value;
        assert_eq!(reread.node("Plane01").unwrap().mesh().unwrap().faces[1].smoothgroup, 0x8000_0000);

        let text = BOX.replace("    2 3 0  3  2 3 0  0", "    2 3 0  4294967296  2 3 0  0");
        let parsed = parse_model(&text).unwrap();
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.value.node("Plane01").unwrap().mesh().unwrap().faces.len(), 1);
    }

    #[test]
    fn test_malformed_node_blocks() {
        let text = "newmodel m\nbeginmodelgeom m\nnode dummy m\nparent NULL\nnode dummy n\nendnode\n";
        assert!(matches!(parse_model(text), Err(Error::MalformedNodeBlock { line: 5, .. })));
        assert!(matches!(parse_model("beginmodelgeom m\n"), Err(Error::MissingModelName)));
        assert!(matches!(parse_model("newmodel\n"), Err(Error::MissingModelName)));
    }

    #[test]
    fn test_duplicate_nodes_are_dropped() {
        let text = "\
newmodel m
beginmodelgeom m
node dummy m
  parent NULL
endnode
node dummy a
  parent m
  position 1 0 0
endnode
node dummy a
  parent m
  position 2 0 0
endnode
node dummy b
  parent a
endnode
node dummy a
  parent b
endnode
endmodelgeom m
";
        let parsed = parse_model(text).unwrap();
        assert_eq!(parsed.value.nodes.len(), 4);
        assert_eq!(parsed.value.nodes[1].position.x, 1.0);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0], Warning::duplicate(Some(10), "m", "a"));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let text = "\
newmodel m
beginmodelgeom m
node dummy m
  parent NULL
endnode
node trimesh t
  parent m
  position 1 two 3
  verts 3
    0 0 0
    1 x 0
    1 1 0
  faces 1
    0 1 2 1 0 0 0 0
endnode
endmodelgeom m
";
        let parsed = parse_model(text).unwrap();
        let node = parsed.value.node("t").unwrap();
        assert_eq!(node.position, Vec3d::ZERO);
        assert_eq!(node.mesh().unwrap().verts.len(), 2);
        assert_eq!(node.mesh().unwrap().faces.len(), 1);
        let lines: Vec<_> = parsed.warnings.iter().map(|warning| warning.line).collect();
        assert_eq!(lines, vec![Some(8), Some(11)]);
    }

    #[test]
    fn test_sample_size_mismatch() {
        let text = "\
newmodel m
beginmodelgeom m
node dummy m
  parent NULL
endnode
node trimesh t
  parent m
  verts 2
    0 0 0
    1 0 0
endnode
endmodelgeom m
newanim wave m
  length 1
  node trimesh t
    parent m
    sampleperiod 0.5
    animverts 6
      0 0 0
      1 0 0
      0 0 1
      1 0 1
      0 0 2
      1 0 2
    animtverts 2
      0 0 0
      1 0 0
  endnode
doneanim wave m
";
        let parsed = parse_model(text).unwrap();
        let node = parsed.value.animations[0].node("t").unwrap();
        assert_eq!(node.samples.verts.len(), 6);
        assert!(node.samples.tverts.is_empty());
        assert_eq!(parsed.warnings.len(), 1);
        assert!(matches!(
            &parsed.warnings[0].kind,
            WarningKind::SampleSizeMismatch { channel, expected: 0, found: 2, .. } if channel == "animtverts"
        ));
    }

    #[test]
    fn test_duplicate_animation_dropped() {
        let text = "\
newmodel m
beginmodelgeom m
node dummy m
  parent NULL
endnode
endmodelgeom m
newanim a m
  length 2
doneanim a m
newanim a m
  length 3
doneanim a m
";
        let parsed = parse_model(text).unwrap();
        assert_eq!(parsed.value.animations.len(), 1);
        assert_eq!(parsed.value.animations[0].length, 2.0);
        assert!(matches!(&parsed.warnings[0].kind, WarningKind::DuplicateName { name, .. } if name == "a"));
    }

    #[test]
    fn test_parse_walkmesh() {
        let text = "\
node dummy door_dwk_closed
  parent door
endnode
node trimesh door_wg_closed
  parent door
  verts 3
    0 0 0
    1 0 0
    0 1 0
  faces 1
    0 1 2  0  0 0 0  1
endnode
";
        let walkmesh = parse_walkmesh(text, WalkmeshType::Dwk).unwrap().value;
        assert_eq!(walkmesh.root, "door");
        assert_eq!(walkmesh.nodes.len(), 2);

        let wok = parse_walkmesh(text, WalkmeshType::Wok).unwrap().value;
        assert_eq!(wok.nodes.len(), 1);
        assert_eq!(wok.nodes[0].name, "door_wg_closed");

        let mixed = "node dummy a\n parent x\nendnode\nnode dummy b\n parent y\nendnode\n";
        assert!(matches!(parse_walkmesh(mixed, WalkmeshType::Pwk), Err(Error::InvalidWalkmesh { .. })));
        let orphan = "node dummy a\n parent NULL\nendnode\n";
        assert!(matches!(parse_walkmesh(orphan, WalkmeshType::Pwk), Err(Error::InvalidWalkmesh { .. })));
    }

    #[test]
    fn test_aabb_and_skin() {
        let text = "\
newmodel m
beginmodelgeom m
node dummy m
  parent NULL
endnode
node skin body
  parent m
  verts 2
    0 0 0
    1 0 0
  weights 2
    m 1
    m 0.25 body 0.75
endnode
node aabb walk
  parent m
  verts 3
    0 0 0
    1 0 0
    0 1 0
  faces 1
    0 1 2  0  0 0 0  1
  aabb  0 0 0 1 1 0 0
endnode
endmodelgeom m
";
        let model = parse_model(text).unwrap().value;
        let MeshKind::Skin(weights) = &model.node("body").unwrap().mesh().unwrap().kind else {
            panic!("not a skin");
        };
        assert_eq!(weights[1], vec![BoneWeight { bone: "m".to_owned(), weight: 0.25 }, BoneWeight { bone: "body".to_owned(), weight: 0.75 }]);
        let MeshKind::Aabb(entries) = &model.node("walk").unwrap().mesh().unwrap().kind else {
            panic!("not an aabb");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].face, 0);
        assert_eq!(entries[0].bbox.max, Vec3d::new(1.0, 1.0, 0.0));
    }
}
