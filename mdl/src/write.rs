use std::io::{self, Write};

use itertools::Itertools;

use crate::aabb::build_tree;
use crate::anim::key_deltas;
use crate::io::ExportOptions;
use crate::lex::looks_numeric;
use crate::types::*;

/// Shortest text that reads back as the same `f32`. Negative zero prints as `0`.
pub fn fmt_float(val: f32) -> String {
    if val == 0.0 {
        "0".to_owned()
    } else {
        val.to_string()
    }
}

pub fn fmt_tuple(vals: &[f32]) -> String {
    vals.iter().map(|&val| fmt_float(val)).join(" ")
}

/// [`fmt_float`] with a leading space in place of the sign, so columns of mixed sign line up.
pub fn fmt_signed(val: f32) -> String {
    let text = fmt_float(val);
    if text.starts_with('-') {
        text
    } else {
        format!(" {}", text)
    }
}

pub fn fmt_signed_tuple(vals: &[f32]) -> String {
    vals.iter().map(|&val| fmt_signed(val)).join(" ")
}

/// [`fmt_float`] that keeps a `.0` on whole values, as colors and scales are conventionally written.
pub fn fmt_round(val: f32) -> String {
    if val.fract() == 0.0 && val.is_finite() {
        format!("{:.1}", val)
    } else {
        fmt_float(val)
    }
}

fn fmt_round_tuple(vals: &[f32]) -> String {
    vals.iter().map(|&val| fmt_round(val)).join(" ")
}

fn fmt_values(vals: &[f32], integer: bool) -> String {
    if integer {
        vals.iter().map(|val| (val.round() as i64).to_string()).join(" ")
    } else {
        fmt_tuple(vals)
    }
}

fn vec3(vec: Vec3d) -> [f32; 3] {
    vec.into()
}

fn digits(n: usize) -> usize {
    n.max(1).to_string().len()
}

/// Column widths for face rows, wide enough for the largest index present.
#[derive(Debug, Clone, Copy)]
struct FaceWidths {
    vert: usize,
    uv: usize,
    smoothgroup: usize,
}
impl FaceWidths {
    fn new(mesh: &Mesh, smoothgroups: bool) -> Self {
        let max_group = if smoothgroups { mesh.faces.iter().map(|face| face.smoothgroup).max().unwrap_or(0) } else { 0 };
        FaceWidths { vert: digits(mesh.verts.len()), uv: digits(mesh.tverts.len()), smoothgroup: digits(max_group as usize) }
    }
}

/// Settings that change how nodes are written.
#[derive(Debug, Clone, Copy)]
struct NodeStyle {
    tile: bool,
    smoothgroups: bool,
    /// Walkmesh files carry plain geometry only.
    simple: bool,
}

impl Model {
    pub fn write(&self, w: &mut impl Write, options: &ExportOptions) -> io::Result<()> {
        log::info!("writing model {}", self.name);

        if let Some(header) = &options.header {
            writeln!(w, "# {}", header)?;
        }
        if let Some(dependency) = options.file_dependency.as_ref().or(self.file_dependency.as_ref()) {
            writeln!(w, "filedependancy {}", dependency)?;
        }
        writeln!(w, "newmodel {}", self.name)?;
        writeln!(w, "setsupermodel {} {}", self.name, self.supermodel)?;
        writeln!(w, "classification {}", self.classification.keyword())?;
        writeln!(w, "classification_unk1 {}", self.classification_unk1)?;
        writeln!(w, "ignorefog {}", self.ignorefog as i32)?;
        if self.compress_quaternions {
            writeln!(w, "compress_quaternions 1")?;
        }
        if self.headlink {
            writeln!(w, "headlink 1")?;
        }
        writeln!(w, "setanimationscale {}", fmt_round(self.animation_scale))?;

        writeln!(w, "beginmodelgeom {}", self.name)?;
        let style = NodeStyle { tile: self.classification == Classification::Tile, smoothgroups: options.smoothgroups, simple: false };
        for node in &self.nodes {
            write_node(w, node, style)?;
        }
        writeln!(w, "endmodelgeom {}", self.name)?;

        if options.exports.animation && !self.animations.is_empty() {
            writeln!(w)?;
            writeln!(w, "# ANIM ASCII")?;
            for anim in &self.animations {
                anim.write(w)?;
            }
        }
        writeln!(w, "donemodel {}", self.name)
    }

    pub fn to_text(&self, options: &ExportOptions) -> String {
        let mut out = vec![];
        // writing to a Vec cannot fail
        let _ = self.write(&mut out, options);
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl Walkmesh {
    /// Writes the nodes in simple mode: geometry with blank UVs and no material properties.
    ///
    /// A static walkmesh keeps only its first mesh node, written as a trimesh.
    pub fn write(&self, w: &mut impl Write, smoothgroups: bool) -> io::Result<()> {
        log::info!("writing {} walkmesh for {}", self.kind, self.root);
        let style = NodeStyle { tile: false, smoothgroups, simple: true };
        let nodes: Vec<&Node> = match self.kind {
            WalkmeshType::Wok => self.nodes.iter().filter(|node| node.mesh().is_some()).take(1).collect(),
            WalkmeshType::Pwk | WalkmeshType::Dwk => self.nodes.iter().collect(),
        };
        for node in nodes {
            write_node(w, node, style)?;
        }
        Ok(())
    }
}

fn write_node(w: &mut impl Write, node: &Node, style: NodeStyle) -> io::Result<()> {
    let node_type = match (style.simple, node.node_type()) {
        (true, NodeType::Aabb) => NodeType::Trimesh,
        (_, node_type) => node_type,
    };
    writeln!(w, "node {} {}", node_type.keyword(), node.name)?;
    writeln!(w, "  parent {}", node.parent_name())?;
    writeln!(w, "  position {}", fmt_tuple(&vec3(node.position)))?;
    let [x, y, z] = vec3(node.orientation.axis);
    writeln!(w, "  orientation {}", fmt_tuple(&[x, y, z, node.orientation.angle]))?;

    if !style.simple {
        if node.scale != 1.0 {
            writeln!(w, "  scale {}", fmt_round(node.scale))?;
        }
        writeln!(w, "  wirecolor {}", fmt_round_tuple(&vec3(node.wirecolor)))?;
    }

    match &node.data {
        NodeData::Dummy | NodeData::Patch => {}
        NodeData::Reference(reference) => {
            writeln!(w, "  refmodel {}", reference.refmodel)?;
            writeln!(w, "  reattachable {}", reference.reattachable as i32)?;
        }
        NodeData::Mesh(mesh) => write_mesh(w, mesh, style)?,
        NodeData::Emitter(emitter) => {
            for (name, value) in emitter.params() {
                writeln!(w, "  {} {}", name, value)?;
            }
        }
        NodeData::Light(light) => write_light(w, light)?,
    }

    if !style.simple {
        for channel in &node.keyed {
            write_channel(w, channel, 2)?;
        }
        write_raw(w, &node.raw, 2)?;
    }
    writeln!(w, "endnode")
}

fn write_flag(w: &mut impl Write, name: &str, val: bool) -> io::Result<()> {
    writeln!(w, "  {} {}", name, val as i32)
}

fn write_surface(w: &mut impl Write, surface: &Surface, tile: bool) -> io::Result<()> {
    writeln!(w, "  ambient {}", fmt_round_tuple(&vec3(surface.ambient)))?;
    writeln!(w, "  diffuse {}", fmt_round_tuple(&vec3(surface.diffuse)))?;
    writeln!(w, "  bitmap {}", surface.bitmap)?;
    writeln!(w, "  alpha {}", fmt_round(surface.alpha))?;
    if !is_null(&surface.bitmap2) {
        writeln!(w, "  bitmap2 {}", surface.bitmap2)?;
    }
    writeln!(w, "  selfillumcolor {}", fmt_round_tuple(&vec3(surface.selfillumcolor)))?;
    write_flag(w, "render", surface.render)?;
    write_flag(w, "shadow", surface.shadow)?;
    write_flag(w, "lightmapped", surface.lightmapped)?;
    write_flag(w, "beaming", surface.beaming)?;
    write_flag(w, "inheritcolor", surface.inheritcolor)?;
    write_flag(w, "m_bIsBackgroundGeometry", surface.background_geometry)?;
    write_flag(w, "dirt_enabled", surface.dirt_enabled)?;
    writeln!(w, "  dirt_texture {}", surface.dirt_texture)?;
    writeln!(w, "  dirt_worldspace {}", surface.dirt_worldspace)?;
    write_flag(w, "hologram_donotdraw", surface.hologram_donotdraw)?;
    if surface.tangentspace {
        write_flag(w, "tangentspace", true)?;
    }
    write_flag(w, "animateuv", surface.animateuv)?;
    writeln!(w, "  uvdirectionx {}", fmt_round(surface.uvdirectionx))?;
    writeln!(w, "  uvdirectiony {}", fmt_round(surface.uvdirectiony))?;
    writeln!(w, "  uvjitter {}", fmt_round(surface.uvjitter))?;
    writeln!(w, "  uvjitterspeed {}", fmt_round(surface.uvjitterspeed))?;
    writeln!(w, "  transparencyhint {}", surface.transparencyhint)?;
    if tile {
        write_flag(w, "rotatetexture", surface.rotatetexture)?;
        writeln!(w, "  tilefade {}", surface.tilefade)?;
    }
    Ok(())
}

fn write_mesh(w: &mut impl Write, mesh: &Mesh, style: NodeStyle) -> io::Result<()> {
    if !style.simple {
        write_surface(w, &mesh.surface, style.tile)?;
        match mesh.center {
            Some(center) => writeln!(w, "  center {}", fmt_tuple(&vec3(center)))?,
            None => writeln!(w, "  center undefined")?,
        }
        if let MeshKind::Danglymesh(dangly) = &mesh.kind {
            writeln!(w, "  period {}", fmt_round(dangly.period))?;
            writeln!(w, "  tightness {}", fmt_round(dangly.tightness))?;
            writeln!(w, "  displacement {}", fmt_round(dangly.displacement))?;
        }
    }

    writeln!(w, "  verts {}", mesh.verts.len())?;
    for vert in &mesh.verts {
        writeln!(w, "    {}", fmt_signed_tuple(&vec3(*vert)))?;
    }

    let widths = FaceWidths::new(mesh, style.smoothgroups);
    writeln!(w, "  faces {}", mesh.faces.len())?;
    for face in &mesh.faces {
        write_face(w, face, widths, style)?;
    }

    if style.simple {
        if !mesh.roomlinks.is_empty() {
            write_roomlinks(w, &mesh.roomlinks)?;
        }
        return Ok(());
    }

    writeln!(w, "  tverts {}", mesh.tverts.len())?;
    for [u, v] in &mesh.tverts {
        writeln!(w, "    {}", fmt_signed_tuple(&[*u, *v, 0.0]))?;
    }
    if !mesh.tverts1.is_empty() {
        writeln!(w, "  tverts1 {}", mesh.tverts1.len())?;
        for [u, v] in &mesh.tverts1 {
            writeln!(w, "    {}", fmt_signed_tuple(&[*u, *v, 0.0]))?;
        }
    }
    if !mesh.texindices1.is_empty() {
        writeln!(w, "  texindices1 {}", mesh.texindices1.len())?;
        for [a, b, c] in &mesh.texindices1 {
            writeln!(w, "    {:3} {:3} {:3}", a, b, c)?;
        }
    }

    match &mesh.kind {
        MeshKind::Trimesh | MeshKind::Lightsaber => {}
        MeshKind::Danglymesh(dangly) => {
            writeln!(w, "  constraints {}", dangly.constraints.len())?;
            for constraint in &dangly.constraints {
                writeln!(w, "    {}", fmt_float(*constraint))?;
            }
        }
        MeshKind::Skin(weights) => {
            writeln!(w, "  weights {}", weights.len())?;
            for influences in weights {
                let row: Vec<String> = influences.iter().map(|inf| format!("{} {}", inf.bone, fmt_float(inf.weight))).collect();
                writeln!(w, "    {}", row.join(" "))?;
            }
        }
        MeshKind::Aabb(entries) => {
            if let Some(lytposition) = mesh.lytposition {
                writeln!(w, "  lytposition {}", fmt_tuple(&vec3(lytposition)))?;
            }
            // the tree is derived data, rebuild it whenever there is geometry to build from
            let tree = if mesh.faces.is_empty() { entries.clone() } else { build_tree(&mesh.verts, &mesh.faces) };
            write_aabb(w, &tree)?;
        }
    }

    if !mesh.roomlinks.is_empty() {
        write_roomlinks(w, &mesh.roomlinks)?;
    }
    Ok(())
}

fn write_face(w: &mut impl Write, face: &Face, widths: FaceWidths, style: NodeStyle) -> io::Result<()> {
    let FaceWidths { vert: vw, uv: uw, smoothgroup: sw } = widths;
    let [v0, v1, v2] = face.verts;
    let [u0, u1, u2] = if style.simple { [0; 3] } else { face.uvs };
    let smoothgroup = if style.smoothgroups { face.smoothgroup } else { 0 };
    writeln!(
        w,
        "    {:vw$} {:vw$} {:vw$}  {:sw$}  {:uw$} {:uw$} {:uw$}  {:2}",
        v0, v1, v2, smoothgroup, u0, u1, u2, face.material
    )
}

fn write_roomlinks(w: &mut impl Write, links: &[RoomLink]) -> io::Result<()> {
    writeln!(w, "  roomlinks {}", links.len())?;
    for link in links {
        writeln!(w, "    {} {}", link.face_edge, link.room)?;
    }
    Ok(())
}

fn write_aabb(w: &mut impl Write, tree: &[AabbEntry]) -> io::Result<()> {
    for (idx, entry) in tree.iter().enumerate() {
        let fields = fmt_signed_tuple(&[
            entry.bbox.min.x,
            entry.bbox.min.y,
            entry.bbox.min.z,
            entry.bbox.max.x,
            entry.bbox.max.y,
            entry.bbox.max.z,
        ]);
        let prefix = if idx == 0 { "  aabb  " } else { "    " };
        writeln!(w, "{}{} {}", prefix, fields, entry.face)?;
    }
    Ok(())
}

fn write_light(w: &mut impl Write, light: &Light) -> io::Result<()> {
    writeln!(w, "  radius {}", fmt_round(light.radius))?;
    writeln!(w, "  multiplier {}", fmt_round(light.multiplier))?;
    writeln!(w, "  color {}", fmt_round_tuple(&vec3(light.color)))?;
    write_flag(w, "ambientonly", light.ambientonly)?;
    writeln!(w, "  nDynamicType {}", light.ndynamictype)?;
    write_flag(w, "affectDynamic", light.affectdynamic)?;
    if light.isdynamic {
        write_flag(w, "isdynamic", true)?;
    }
    if light.negativelight {
        write_flag(w, "negativelight", true)?;
    }
    write_flag(w, "shadow", light.shadow)?;
    writeln!(w, "  lightpriority {}", light.lightpriority)?;
    write_flag(w, "fadingLight", light.fadinglight)?;
    write_flag(w, "lensflares", light.lensflares)?;

    if !light.flares.is_empty() {
        let n = light.flares.len();
        writeln!(w, "  texturenames {}", n)?;
        for flare in &light.flares {
            writeln!(w, "    {}", flare.texture)?;
        }
        writeln!(w, "  flarepositions {}", n)?;
        for flare in &light.flares {
            writeln!(w, "    {}", fmt_float(flare.position))?;
        }
        writeln!(w, "  flaresizes {}", n)?;
        for flare in &light.flares {
            writeln!(w, "    {}", fmt_float(flare.size))?;
        }
        writeln!(w, "  flarecolorshifts {}", n)?;
        for flare in &light.flares {
            writeln!(w, "    {}", fmt_tuple(&vec3(flare.colorshift)))?;
        }
    }
    writeln!(w, "  flareradius {}", fmt_round(light.flareradius))
}

/// Writes a controller at `indent`, its key rows two spaces deeper.
///
/// A list holding any bezier key is written as `bezierkey`, linear keys in it get handles along
/// their segments.
fn write_channel(w: &mut impl Write, channel: &Channel, indent: usize) -> io::Result<()> {
    let pad = " ".repeat(indent);
    if channel.is_constant() {
        let value = channel.keys.first().map_or(&[][..], Keyframe::value);
        return writeln!(w, "{}{} {}", pad, channel.name, fmt_values(value, channel.integer));
    }

    if channel.is_bezier() {
        writeln!(w, "{}{}bezierkey {}", pad, channel.name, channel.keys.len())?;
        for (idx, key) in channel.keys.iter().enumerate() {
            let (left, right) = key_deltas(&channel.keys, idx);
            writeln!(
                w,
                "{}  {} {} {} {}",
                pad,
                fmt_float(key.time()),
                fmt_values(key.value(), channel.integer),
                fmt_tuple(&left),
                fmt_tuple(&right)
            )?;
        }
    } else {
        writeln!(w, "{}{}key {}", pad, channel.name, channel.keys.len())?;
        for key in &channel.keys {
            writeln!(w, "{}  {} {}", pad, fmt_float(key.time()), fmt_values(key.value(), channel.integer))?;
        }
    }
    Ok(())
}

/// Re-emits verbatim lines, numeric rows indented under their label.
fn write_raw(w: &mut impl Write, raw: &[String], indent: usize) -> io::Result<()> {
    let pad = " ".repeat(indent);
    for line in raw {
        let numeric = line.split_whitespace().next().map_or(false, looks_numeric);
        let extra = if numeric { "  " } else { "" };
        writeln!(w, "{}{}{}", pad, extra, line)?;
    }
    Ok(())
}

impl Animation {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "newanim {} {}", self.name, self.model)?;
        writeln!(w, "  length {}", fmt_float(self.length))?;
        writeln!(w, "  transtime {}", fmt_float(self.transtime))?;
        writeln!(w, "  animroot {}", self.animroot)?;
        for event in &self.events {
            writeln!(w, "  event {} {}", fmt_float(event.time), event.name)?;
        }
        for node in &self.nodes {
            writeln!(w, "  node {} {}", node.node_type, node.name)?;
            writeln!(w, "    parent {}", node.parent.as_deref().unwrap_or(NULL))?;
            for channel in &node.channels {
                write_channel(w, channel, 4)?;
            }
            write_samples(w, &node.samples)?;
            write_raw(w, &node.raw, 4)?;
            writeln!(w, "  endnode")?;
        }
        writeln!(w, "doneanim {} {}", self.name, self.model)
    }
}

fn write_samples(w: &mut impl Write, samples: &MeshSamples) -> io::Result<()> {
    if let Some(period) = samples.sample_period {
        writeln!(w, "    sampleperiod {}", fmt_float(period))?;
    }
    for (label, list) in [("animverts", &samples.verts), ("animtverts", &samples.tverts)] {
        if list.is_empty() {
            continue;
        }
        writeln!(w, "    {} {}", label, list.len())?;
        for sample in list {
            writeln!(w, "      {}", fmt_signed_tuple(&vec3(*sample)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ExportSet;

    #[test]
    fn test_float_formats() {
        assert_eq!(fmt_float(1.0), "1");
        assert_eq!(fmt_float(0.5), "0.5");
        assert_eq!(fmt_float(-0.0), "0");
        assert_eq!(fmt_float(0.1), "0.1");
        assert_eq!(fmt_signed(2.5), " 2.5");
        assert_eq!(fmt_signed(-2.5), "-2.5");
        assert_eq!(fmt_round(1.0), "1.0");
        assert_eq!(fmt_round(0.25), "0.25");
        assert_eq!(fmt_tuple(&[1.0, -0.5, 3.0]), "1 -0.5 3");
    }

    #[test]
    fn test_face_columns() {
        let mut mesh = Mesh::new(MeshKind::Trimesh);
        mesh.verts = vec![Vec3d::ZERO; 12];
        mesh.tverts = vec![[0.0, 0.0]; 3];
        mesh.faces = vec![Face { verts: [0, 11, 3], smoothgroup: 16, uvs: [0, 1, 2], material: 0 }];
        let style = NodeStyle { tile: false, smoothgroups: true, simple: false };

        let mut out = vec![];
        write_face(&mut out, &mesh.faces[0], FaceWidths::new(&mesh, true), style).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "     0 11  3  16  0 1 2   0\n");

        let mut out = vec![];
        let flat = NodeStyle { smoothgroups: false, ..style };
        write_face(&mut out, &mesh.faces[0], FaceWidths::new(&mesh, false), flat).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "     0 11  3  0  0 1 2   0\n");
    }

    #[test]
    fn test_channel_forms() {
        let constant = Channel { name: "alpha".into(), arity: 1, integer: false, keys: vec![Keyframe::Constant { value: vec![0.5] }] };
        let keyed = Channel {
            name: "birthrate".into(),
            arity: 1,
            integer: true,
            keys: vec![Keyframe::Linear { time: 0.0, value: vec![9.6] }, Keyframe::Linear { time: 1.0, value: vec![20.0] }],
        };
        let bezier = Channel {
            name: "alpha".into(),
            arity: 1,
            integer: false,
            keys: vec![
                Keyframe::Linear { time: 0.0, value: vec![3.0] },
                Keyframe::Bezier { time: 1.0, value: vec![0.0], left: vec![0.25], right: vec![-0.25] },
            ],
        };

        let mut out = vec![];
        write_channel(&mut out, &constant, 2).unwrap();
        write_channel(&mut out, &keyed, 4).unwrap();
        write_channel(&mut out, &bezier, 4).unwrap();
        let expected = "  alpha 0.5\n    birthratekey 2\n      0 10\n      1 20\n    alphabezierkey 2\n      0 3 0 -1\n      1 0 0.25 -0.25\n";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_raw_lines_keep_their_rows() {
        let mut out = vec![];
        write_raw(&mut out, &["someunknownfield 1 2".to_owned(), "3 4 5".to_owned()], 2).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "  someunknownfield 1 2\n    3 4 5\n");
    }

    #[test]
    fn test_model_header() {
        let mut model = Model::new("box");
        model.classification = Classification::Character;
        model.nodes.push(Node::new("box", None, NodeData::Dummy));
        let options = ExportOptions {
            exports: ExportSet { animation: true, walkmesh: false },
            smoothgroups: true,
            header: Some("Exported from mdl-tools".to_owned()),
            file_dependency: Some("box.max".to_owned()),
        };
        let text = model.to_text(&options);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            &lines[..9],
            &[
                "# Exported from mdl-tools",
                "filedependancy box.max",
                "newmodel box",
                "setsupermodel box NULL",
                "classification Character",
                "classification_unk1 0",
                "ignorefog 0",
                "setanimationscale 1.0",
                "beginmodelgeom box",
            ]
        );
        assert_eq!(lines.last(), Some(&"donemodel box"));
        assert!(!text.contains("# ANIM ASCII"));
    }

    #[test]
    fn test_simple_walkmesh() {
        let mut mesh = Mesh::new(MeshKind::Aabb(vec![]));
        mesh.verts = vec![Vec3d::ZERO, Vec3d::new(1.0, 0.0, 0.0), Vec3d::new(0.0, -1.0, 0.0)];
        mesh.faces = vec![Face { verts: [0, 1, 2], smoothgroup: 1, uvs: [0, 1, 2], material: 3 }];
        mesh.roomlinks = vec![RoomLink { face_edge: 2, room: 1 }];
        let walkmesh = Walkmesh {
            kind: WalkmeshType::Wok,
            root: "room".to_owned(),
            nodes: vec![Node::new("room_wok", Some("room".to_owned()), NodeData::Mesh(Box::new(mesh)))],
        };

        let mut out = vec![];
        walkmesh.write(&mut out, true).unwrap();
        let expected = "\
node trimesh room_wok
  parent room
  position 0 0 0
  orientation 0 0 0 0
  verts 3
     0  0  0
     1  0  0
     0 -1  0
  faces 1
    0 1 2  1  0 0 0   3
  roomlinks 1
    2 1
endnode
";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
