//! Moving models in and out of a host scene.
//!
//! The host is reached only through [`SceneBuilder`] on import and [`SceneSource`] on export.
//! [`ArenaScene`] is an in-memory host keeping objects in a flat arena.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::aabb::{corner_tags, room_links};
use crate::anim::{controller, frame_to_time, round_to, time_to_frame, Curve, FPS};
use crate::error::{Error, Result};
use crate::io::{ExportOptions, ImportOptions};
use crate::smoothgroup::{regenerate, sharp_edges, Edge, Policy, Scope};
use crate::types::*;

pub type ObjectId = usize;

/// Frames left free between consecutive animations on the timeline.
pub const ANIM_PADDING: f32 = 10.0;

/// Highest numeric suffix tried when resolving a parent name.
const MAX_SUFFIX: u32 = 29;

/// Model-level properties, carried by the root object.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHeader {
    pub supermodel: String,
    pub classification: Classification,
    pub classification_unk1: i32,
    pub ignorefog: bool,
    pub compress_quaternions: bool,
    pub headlink: bool,
    pub animation_scale: f32,
    pub file_dependency: Option<String>,
}
impl ModelHeader {
    pub fn from_model(model: &Model) -> Self {
        ModelHeader {
            supermodel: model.supermodel.clone(),
            classification: model.classification,
            classification_unk1: model.classification_unk1,
            ignorefog: model.ignorefog,
            compress_quaternions: model.compress_quaternions,
            headlink: model.headlink,
            animation_scale: model.animation_scale,
            file_dependency: model.file_dependency.clone(),
        }
    }

    fn apply(&self, model: &mut Model) {
        model.supermodel = self.supermodel.clone();
        model.classification = self.classification;
        model.classification_unk1 = self.classification_unk1;
        model.ignorefog = self.ignorefog;
        model.compress_quaternions = self.compress_quaternions;
        model.headlink = self.headlink;
        model.animation_scale = self.animation_scale;
        model.file_dependency = self.file_dependency.clone();
    }
}

/// Mesh data in the form a host edits it: per-corner UVs, hard edges and room tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneMesh {
    pub corner_uvs: Vec<[u32; 3]>,
    pub corner_lightmap_uvs: Vec<[u32; 3]>,
    pub sharp_edges: BTreeSet<Edge>,
    pub room_tags: Vec<[i32; 3]>,
}
impl SceneMesh {
    fn from_mesh(mesh: &Mesh, smoothgroups: bool) -> Self {
        SceneMesh {
            corner_uvs: mesh.faces.iter().map(Face::corner_uvs).collect(),
            corner_lightmap_uvs: mesh.faces.iter().zip(&mesh.texindices1).map(|(face, &uvs)| rotate_for_corners(face.verts, uvs)).collect(),
            sharp_edges: if smoothgroups { sharp_edges(&mesh.faces) } else { BTreeSet::new() },
            room_tags: if mesh.roomlinks.is_empty() { vec![] } else { corner_tags(&mesh.faces, &mesh.roomlinks) },
        }
    }

    /// Writes the scene-side data back into the file-side mesh.
    fn apply(&self, mesh: &mut Mesh, smoothgroups: bool) {
        for (face, &corners) in mesh.faces.iter_mut().zip(&self.corner_uvs) {
            face.set_corner_uvs(corners);
        }
        mesh.texindices1 = mesh.faces.iter().zip(&self.corner_lightmap_uvs).map(|(face, &corners)| rotate_for_file(face.verts, corners)).collect();
        if smoothgroups {
            for face in mesh.faces.iter_mut() {
                face.smoothgroup = 0;
            }
            regenerate(&mut mesh.faces, &self.sharp_edges, Policy::Auto, &Scope::All);
        }
        if !self.room_tags.is_empty() {
            mesh.roomlinks = room_links(&mesh.faces, &self.room_tags);
        }
    }
}

/// Everything a scene object knows about the node it represents.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub node: Node,
    pub mesh: Option<SceneMesh>,
    pub header: Option<ModelHeader>,
}

/// The animation data of one object within an animation.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub object: ObjectId,
    /// Node type keyword the animation node was written with.
    pub node_type: String,
    pub curves: Vec<Curve>,
    pub samples: MeshSamples,
    pub raw: Vec<String>,
}

/// An animation placed on the scene timeline.
#[derive(Debug, Clone)]
pub struct SceneAnimation {
    pub name: String,
    /// The model root the animation belongs to.
    pub root: ObjectId,
    pub frame_start: f32,
    pub frame_end: f32,
    /// In frames.
    pub transtime: f32,
    pub animroot: String,
    /// `(frame, name)`, absolute on the timeline.
    pub events: Vec<(f32, String)>,
    pub tracks: Vec<Track>,
}

/// Host operations needed to import a model.
pub trait SceneBuilder {
    /// Creates an object for `node` under `parent` and returns its handle. The host may rename
    /// the object to keep names unique.
    fn instantiate(&mut self, node: SceneNode, parent: Option<ObjectId>) -> ObjectId;

    fn resolve_by_name(&self, name: &str) -> Option<ObjectId>;

    /// `id` or its nearest ancestor satisfying `pred`.
    fn ancestor_matching(&self, id: ObjectId, pred: &dyn Fn(ObjectId) -> bool) -> Option<ObjectId>;

    /// Last frame used by any animation.
    fn animation_end(&self) -> Option<f32>;

    fn add_animation(&mut self, anim: SceneAnimation);
}

/// Host operations needed to export a model.
pub trait SceneSource {
    fn name(&self, id: ObjectId) -> &str;

    /// Position of the object in the order it was created.
    fn import_order(&self, id: ObjectId) -> usize;

    fn enumerate_children(&self, id: ObjectId) -> Vec<ObjectId>;

    /// `None` for objects with no node counterpart.
    fn read_node(&self, id: ObjectId) -> Option<SceneNode>;

    fn animations(&self, root: ObjectId) -> Vec<&SceneAnimation>;
}

/// Names to try, in order, when resolving a node's declared parent.
///
/// The name itself, its base name when it carries a `.NNN` suffix, then the `.001` to `.029`
/// variants hosts create when names collide.
pub fn parent_candidates(parent: &str) -> impl Iterator<Item = String> + '_ {
    let base = split_suffix(parent).map(|(base, _)| base.to_owned());
    std::iter::once(parent.to_owned()).chain(base).chain((1..=MAX_SUFFIX).map(move |n| format!("{}.{:03}", parent, n)))
}

/// Splits `name.NNN` into `(name, NNN)`.
pub fn split_suffix(name: &str) -> Option<(&str, u32)> {
    let (base, digits) = name.rsplit_once('.')?;
    if base.is_empty() || digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, digits.parse().ok()?))
}

fn minimap_node(node: &Node, options: &ImportOptions) -> Option<Node> {
    let hide = match &node.data {
        NodeData::Mesh(mesh) => !mesh.surface.render || (options.minimap_skip_fade && mesh.surface.tilefade != 0),
        NodeData::Emitter(_) | NodeData::Light(_) => true,
        _ => false,
    };
    hide.then(|| {
        let mut dummy = Node::new(node.name.clone(), node.parent.clone(), NodeData::Dummy);
        dummy.position = node.position;
        dummy.orientation = node.orientation;
        dummy
    })
}

/// Tracks which scene object each file node became.
struct Resolver {
    root: ObjectId,
    local: HashMap<String, ObjectId>,
}
impl Resolver {
    fn parent_of(&self, scene: &impl SceneBuilder, node: &Node) -> Result<ObjectId> {
        let dangling = || Error::DanglingParent { line: node.line, name: node.name.clone(), parent: node.parent_name().to_owned() };
        let parent = node.parent.as_deref().ok_or_else(dangling)?;
        parent_candidates(parent)
            .find_map(|candidate| self.find(scene, &candidate))
            .ok_or_else(dangling)
    }

    fn instantiate(&mut self, scene: &mut impl SceneBuilder, node: &Node, options: &ImportOptions) -> Result<ObjectId> {
        let parent = self.parent_of(&*scene, node)?;
        let node = match options.minimap.then(|| minimap_node(node, options)).flatten() {
            Some(dummy) => dummy,
            None => node.clone(),
        };
        let mesh = node.mesh().map(|mesh| SceneMesh::from_mesh(mesh, options.smoothgroups));
        let key = node.name.to_ascii_lowercase();
        let id = scene.instantiate(SceneNode { node, mesh, header: None }, Some(parent));
        self.local.entry(key).or_insert(id);
        Ok(id)
    }

    /// An object of this model called `name`, preferring the names used in the file.
    fn find(&self, scene: &impl SceneBuilder, name: &str) -> Option<ObjectId> {
        if let Some(&id) = self.local.get(&name.to_ascii_lowercase()) {
            return Some(id);
        }
        let id = scene.resolve_by_name(name)?;
        let root = self.root;
        scene.ancestor_matching(id, &|ancestor| ancestor == root).map(|_| id)
    }
}

/// Instantiates `model` (and the placeable/door `walkmesh`, if given) into `scene`.
///
/// Returns the handle of the model root.
pub fn import_model(model: &Model, walkmesh: Option<&Walkmesh>, scene: &mut impl SceneBuilder, options: &ImportOptions) -> Result<ObjectId> {
    let root_node = model.root().ok_or_else(|| Error::MissingRoot { name: String::new() })?;
    if root_node.node_type() != NodeType::Dummy || root_node.parent.is_some() {
        return Err(Error::MissingRoot { name: root_node.name.clone() });
    }

    let resolver = if options.geometry {
        let root = scene.instantiate(
            SceneNode { node: root_node.clone(), mesh: None, header: Some(ModelHeader::from_model(model)) },
            None,
        );
        let mut resolver = Resolver { root, local: HashMap::new() };
        resolver.local.insert(root_node.name.to_ascii_lowercase(), root);

        for node in &model.nodes[1..] {
            resolver.instantiate(&mut *scene, node, options)?;
        }

        // a static walkmesh is merged into the aabb node instead
        if let Some(walkmesh) = walkmesh.filter(|walkmesh| options.walkmesh && walkmesh.kind != WalkmeshType::Wok) {
            if resolver.find(&*scene, &walkmesh.root).is_none() {
                let holder = Node::new(walkmesh.root.clone(), Some(root_node.name.clone()), NodeData::Dummy);
                resolver.instantiate(&mut *scene, &holder, options)?;
            }
            for node in &walkmesh.nodes {
                resolver.instantiate(&mut *scene, node, options)?;
            }
        }
        resolver
    } else {
        // animations only, onto a model already in the scene
        let root = scene.resolve_by_name(&model.name).ok_or_else(|| Error::MissingRoot { name: model.name.clone() })?;
        Resolver { root, local: HashMap::new() }
    };

    if options.animations && !options.minimap {
        for anim in &model.animations {
            let scene_anim = import_animation(model, anim, &resolver, &*scene);
            scene.add_animation(scene_anim);
        }
    }
    Ok(resolver.root)
}

fn import_animation(model: &Model, anim: &Animation, resolver: &Resolver, scene: &impl SceneBuilder) -> SceneAnimation {
    let frame_start = scene.animation_end().map_or(0.0, |end| end + ANIM_PADDING);

    let animroot = match model.node(&anim.animroot) {
        Some(node) => node.name.clone(),
        None => {
            log::debug!("animation {}: retargeted root from {} to {}", anim.name, anim.animroot, model.name);
            model.name.clone()
        }
    };

    let mut tracks = vec![];
    for anim_node in &anim.nodes {
        let Some(object) = resolver.find(scene, &anim_node.name) else {
            log::warn!("animation {}: no object for node {}", anim.name, anim_node.name);
            continue;
        };
        let node_type = model
            .node(&anim_node.name)
            .map(Node::node_type)
            .or_else(|| anim_node.node_type.parse().ok())
            .unwrap_or(NodeType::Dummy);
        let curves = anim_node
            .channels
            .iter()
            .filter_map(|channel| {
                let spec = controller(&channel.name, node_type)?;
                Some(Curve::from_channel(channel, spec.target, frame_start))
            })
            .collect();
        tracks.push(Track {
            object,
            node_type: anim_node.node_type.clone(),
            curves,
            samples: anim_node.samples.clone(),
            raw: anim_node.raw.clone(),
        });
    }

    SceneAnimation {
        name: anim.name.clone(),
        root: resolver.root,
        frame_start,
        frame_end: frame_start + time_to_frame(anim.length),
        transtime: anim.transtime * FPS,
        animroot,
        events: anim.events.iter().map(|event| (frame_start + time_to_frame(event.time), event.name.clone())).collect(),
        tracks,
    }
}

/// A model read back from a scene, plus the placeable/door walkmeshes found under its root.
#[derive(Debug)]
pub struct Exported {
    pub model: Model,
    pub walkmeshes: Vec<Walkmesh>,
}

fn walkmesh_kind(name: &str) -> Option<WalkmeshType> {
    let name = split_suffix(name).map_or(name, |(base, _)| base);
    let lower = name.to_ascii_lowercase();
    if lower.ends_with("_pwk") {
        Some(WalkmeshType::Pwk)
    } else if lower.ends_with("_dwk") {
        Some(WalkmeshType::Dwk)
    } else {
        None
    }
}

fn sorted_children(scene: &impl SceneSource, id: ObjectId) -> Vec<ObjectId> {
    let mut children = scene.enumerate_children(id);
    children.sort_by(|&a, &b| scene.import_order(a).cmp(&scene.import_order(b)).then_with(|| scene.name(a).cmp(scene.name(b))));
    children
}

/// Pre-order walk from `id`, children in their original order.
fn collect_subtree(scene: &impl SceneSource, id: ObjectId, out: &mut Vec<ObjectId>) {
    out.push(id);
    for child in sorted_children(scene, id) {
        collect_subtree(scene, child, out);
    }
}

fn export_node(scene: &impl SceneSource, id: ObjectId, parent: Option<&str>, options: &ExportOptions) -> Result<Node> {
    let name = scene.name(id);
    let scene_node = scene.read_node(id).ok_or_else(|| Error::UnmappedObject { name: name.to_owned() })?;
    let mut node = scene_node.node;
    node.name = name.to_owned();
    node.parent = parent.map(str::to_owned);
    if let (Some(mesh), Some(scene_mesh)) = (node.mesh_mut(), &scene_node.mesh) {
        scene_mesh.apply(mesh, options.smoothgroups);
    }
    Ok(node)
}

/// Rebuilds a model from the subtree under `root`.
pub fn export_model(scene: &impl SceneSource, root: ObjectId, options: &ExportOptions) -> Result<Exported> {
    let root_name = scene.name(root).to_owned();
    let mut model = Model::new(root_name.clone());
    let root_node = scene.read_node(root).ok_or_else(|| Error::UnmappedObject { name: root_name.clone() })?;
    if let Some(header) = &root_node.header {
        header.apply(&mut model);
    }

    let mut ids = vec![root];
    let mut walkmesh_roots = vec![];
    for child in sorted_children(scene, root) {
        match walkmesh_kind(scene.name(child)) {
            Some(kind) => walkmesh_roots.push((kind, child)),
            None => collect_subtree(scene, child, &mut ids),
        }
    }

    let parent_of = parent_map(scene, root);
    for &id in &ids {
        let parent = parent_of.get(&id).map(|&parent| scene.name(parent));
        model.nodes.push(export_node(scene, id, parent, options)?);
    }
    if let Some(root) = model.nodes.first_mut() {
        root.data = NodeData::Dummy;
    }

    let mut walkmeshes = vec![];
    if options.exports.walkmesh {
        for (kind, walk_root) in walkmesh_roots {
            // the holder dummy names the walkmesh root but is not written itself
            let mut walk_ids = vec![];
            for child in sorted_children(scene, walk_root) {
                collect_subtree(scene, child, &mut walk_ids);
            }
            let nodes = walk_ids
                .iter()
                .map(|id| export_node(scene, *id, parent_of.get(id).map(|&parent| scene.name(parent)), options))
                .collect::<Result<Vec<_>>>()?;
            walkmeshes.push(Walkmesh { kind, root: scene.name(walk_root).to_owned(), nodes });
        }
    }

    if options.exports.animation {
        for anim in scene.animations(root) {
            model.animations.push(export_animation(&model, anim, &ids, &parent_of));
        }
    }

    remap_names(&mut model, &mut walkmeshes);
    Ok(Exported { model, walkmeshes })
}

fn parent_map(scene: &impl SceneSource, root: ObjectId) -> HashMap<ObjectId, ObjectId> {
    let mut map = HashMap::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        for child in scene.enumerate_children(id) {
            map.insert(child, id);
            stack.push(child);
        }
    }
    map
}

fn export_animation(model: &Model, anim: &SceneAnimation, ids: &[ObjectId], parent_of: &HashMap<ObjectId, ObjectId>) -> Animation {
    let mut out = Animation::new(anim.name.clone(), model.name.clone());
    out.length = round_to((anim.frame_end - anim.frame_start) / FPS, 5);
    out.transtime = round_to(anim.transtime / FPS, 3);
    out.animroot = anim.animroot.clone();
    out.events = anim.events.iter().map(|(frame, name)| AnimEvent { time: frame_to_time(frame - anim.frame_start), name: name.clone() }).collect();

    let tracks: HashMap<ObjectId, &Track> = anim.tracks.iter().map(|track| (track.object, track)).collect();
    let mut nodes: Vec<(ObjectId, AnimNode)> = vec![];
    for (&id, node) in ids.iter().zip(&model.nodes) {
        let mut anim_node = AnimNode::new(node.name.clone(), node.parent.clone(), node.node_type().keyword());
        if let Some(track) = tracks.get(&id) {
            if !track.node_type.is_empty() {
                anim_node.node_type = track.node_type.clone();
            }
            for curve in &track.curves {
                match controller(&curve.name, node.node_type()) {
                    Some(spec) => anim_node.channels.insert(curve.to_channel(&spec, anim.frame_start)),
                    None => log::warn!("animation {}: `{}` is not a controller of {}", anim.name, curve.name, node.name),
                }
            }
            anim_node.samples = track.samples.clone();
            anim_node.raw = track.raw.clone();
        }
        nodes.push((id, anim_node));
    }

    // keep nodes that animate something or lead to something animated
    let mut keep: HashSet<ObjectId> = HashSet::new();
    for (id, anim_node) in nodes.iter().rev() {
        if !anim_node.is_empty() || keep.contains(id) {
            keep.insert(*id);
            if let Some(parent) = parent_of.get(id) {
                keep.insert(*parent);
            }
        }
    }
    if let Some(&root) = ids.first() {
        keep.insert(root);
    }
    out.nodes = nodes.into_iter().filter(|(id, _)| keep.contains(id)).map(|(_, node)| node).collect();
    out
}

/// Renames `name.NNN` nodes back to `name` when no other node uses the base name.
fn remap_names(model: &mut Model, walkmeshes: &mut [Walkmesh]) {
    let all_nodes = || model.nodes.iter().chain(walkmeshes.iter().flat_map(|walkmesh| walkmesh.nodes.iter()));
    // the root keeps its name, it is the model name
    let names: Vec<String> = all_nodes().skip(1).map(|node| node.name.clone()).chain(walkmeshes.iter().map(|walkmesh| walkmesh.root.clone())).collect();
    let mut taken: HashSet<String> = names.iter().map(|name| name.to_ascii_lowercase()).collect();
    taken.insert(model.name.to_ascii_lowercase());

    let mut renames: HashMap<String, String> = HashMap::new();
    for name in names {
        if let Some((base, _)) = split_suffix(&name) {
            if taken.insert(base.to_ascii_lowercase()) {
                renames.insert(name.clone(), base.to_owned());
            }
        }
    }
    if renames.is_empty() {
        return;
    }

    let rename = |name: &mut String| {
        if let Some(new) = renames.get(name.as_str()) {
            *name = new.clone();
        }
    };
    for walkmesh in walkmeshes.iter_mut() {
        rename(&mut walkmesh.root);
    }
    let nodes = model.nodes.iter_mut().chain(walkmeshes.iter_mut().flat_map(|walkmesh| walkmesh.nodes.iter_mut()));
    for node in nodes {
        rename(&mut node.name);
        if let Some(parent) = node.parent.as_mut() {
            rename(parent);
        }
    }
    for anim in &mut model.animations {
        rename(&mut anim.animroot);
        for node in &mut anim.nodes {
            rename(&mut node.name);
            if let Some(parent) = node.parent.as_mut() {
                rename(parent);
            }
        }
    }
}

/// One object in an [`ArenaScene`].
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    pub import_order: usize,
    pub data: Option<SceneNode>,
}

/// A scene kept as a flat list of objects with parent/child indices.
///
/// Object names are unique case-insensitively; a clashing name gets the first free `.NNN`
/// suffix.
#[derive(Debug, Default)]
pub struct ArenaScene {
    objects: Vec<SceneObject>,
    by_name: HashMap<String, ObjectId>,
    animations: Vec<SceneAnimation>,
}
impl ArenaScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> &SceneObject {
        &self.objects[id]
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut SceneObject {
        &mut self.objects[id]
    }

    pub fn scene_animations(&self) -> &[SceneAnimation] {
        &self.animations
    }

    pub fn scene_animations_mut(&mut self) -> &mut [SceneAnimation] {
        &mut self.animations
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.by_name.contains_key(&name.to_ascii_lowercase()) {
            return name.to_owned();
        }
        let base = split_suffix(name).map_or(name, |(base, _)| base);
        (1..)
            .map(|n| format!("{}.{:03}", base, n))
            .find(|candidate| !self.by_name.contains_key(&candidate.to_ascii_lowercase()))
            .unwrap_or_else(|| name.to_owned())
    }

    /// Adds an object, which may have no node counterpart.
    pub fn add_object(&mut self, name: &str, parent: Option<ObjectId>, data: Option<SceneNode>) -> ObjectId {
        let id = self.objects.len();
        let name = self.unique_name(name);
        self.by_name.insert(name.to_ascii_lowercase(), id);
        self.objects.push(SceneObject { name, parent, children: vec![], import_order: id, data });
        if let Some(parent) = parent {
            self.objects[parent].children.push(id);
        }
        id
    }

    /// Mutable mesh data of an object, when it has any.
    pub fn scene_mesh_mut(&mut self, id: ObjectId) -> Option<&mut SceneMesh> {
        self.objects.get_mut(id)?.data.as_mut()?.mesh.as_mut()
    }
}

impl SceneBuilder for ArenaScene {
    fn instantiate(&mut self, node: SceneNode, parent: Option<ObjectId>) -> ObjectId {
        let name = node.node.name.clone();
        self.add_object(&name, parent, Some(node))
    }

    fn resolve_by_name(&self, name: &str) -> Option<ObjectId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    fn ancestor_matching(&self, id: ObjectId, pred: &dyn Fn(ObjectId) -> bool) -> Option<ObjectId> {
        let mut cur = Some(id);
        while let Some(id) = cur {
            if pred(id) {
                return Some(id);
            }
            cur = self.objects.get(id)?.parent;
        }
        None
    }

    fn animation_end(&self) -> Option<f32> {
        self.animations.iter().map(|anim| anim.frame_end).reduce(f32::max)
    }

    fn add_animation(&mut self, anim: SceneAnimation) {
        self.animations.push(anim);
    }
}

impl SceneSource for ArenaScene {
    fn name(&self, id: ObjectId) -> &str {
        &self.objects[id].name
    }

    fn import_order(&self, id: ObjectId) -> usize {
        self.objects[id].import_order
    }

    fn enumerate_children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects[id].children.clone()
    }

    fn read_node(&self, id: ObjectId) -> Option<SceneNode> {
        self.objects.get(id)?.data.clone()
    }

    fn animations(&self, root: ObjectId) -> Vec<&SceneAnimation> {
        self.animations.iter().filter(|anim| anim.root == root).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ExportSet;

    fn export_options() -> ExportOptions {
        ExportOptions { exports: ExportSet { animation: true, walkmesh: true }, smoothgroups: true, header: None, file_dependency: None }
    }

    fn dummy(name: &str, parent: Option<&str>) -> Node {
        Node::new(name, parent.map(str::to_owned), NodeData::Dummy)
    }

    #[test]
    fn test_parent_candidates() {
        let names: Vec<String> = parent_candidates("root.001").take(4).collect();
        assert_eq!(names, vec!["root.001", "root", "root.001.001", "root.001.002"]);
        assert_eq!(parent_candidates("a").count(), 30);
        assert_eq!(parent_candidates("a").last().as_deref(), Some("a.029"));
        assert_eq!(split_suffix("door.012"), Some(("door", 12)));
        assert_eq!(split_suffix("door.12"), None);
        assert_eq!(split_suffix(".001"), None);
    }

    #[test]
    fn test_arena_renames_collisions() {
        let mut scene = ArenaScene::new();
        let a = scene.add_object("Box", None, None);
        let b = scene.add_object("box", None, None);
        let c = scene.add_object("box.001", None, None);
        assert_eq!(scene.name(a), "Box");
        assert_eq!(scene.name(b), "box.001");
        assert_eq!(scene.name(c), "box.002");
        assert_eq!(scene.resolve_by_name("BOX.001"), Some(b));
    }

    #[test]
    fn test_second_import_resolves_within_its_own_lineage() {
        let mut model = Model::new("m");
        model.nodes = vec![dummy("m", None), dummy("arm", Some("m")), dummy("hand", Some("arm"))];

        let mut scene = ArenaScene::new();
        let first = import_model(&model, None, &mut scene, &ImportOptions::default()).unwrap();
        let second = import_model(&model, None, &mut scene, &ImportOptions::default()).unwrap();
        assert_ne!(first, second);
        assert_eq!(scene.name(second), "m.001");

        let hand = scene.resolve_by_name("hand.001").unwrap();
        assert_eq!(scene.ancestor_matching(hand, &|id| id == second), Some(second));

        let exported = export_model(&scene, second, &export_options()).unwrap().model;
        let names: Vec<(&str, &str)> = exported.nodes.iter().map(|node| (node.name.as_str(), node.parent_name())).collect();
        assert_eq!(names, vec![("m.001", NULL), ("arm", "m.001"), ("hand", "arm")]);
    }

    #[test]
    fn test_export_remaps_suffixed_names() {
        let mut scene = ArenaScene::new();
        let root = scene.add_object("m", None, Some(SceneNode { node: dummy("m", None), mesh: None, header: None }));
        let torso = scene.add_object("torso.001", Some(root), Some(SceneNode { node: dummy("torso.001", None), mesh: None, header: None }));
        scene.add_object("head.001", Some(torso), Some(SceneNode { node: dummy("head.001", None), mesh: None, header: None }));
        scene.add_object("head", Some(root), Some(SceneNode { node: dummy("head", None), mesh: None, header: None }));

        let model = export_model(&scene, root, &export_options()).unwrap().model;
        let names: Vec<(&str, &str)> = model.nodes.iter().map(|node| (node.name.as_str(), node.parent_name())).collect();
        assert_eq!(names, vec![("m", NULL), ("torso", "m"), ("head.001", "torso"), ("head", "m")]);
    }

    #[test]
    fn test_unmapped_object_fails_export() {
        let mut scene = ArenaScene::new();
        let root = scene.add_object("m", None, Some(SceneNode { node: dummy("m", None), mesh: None, header: None }));
        scene.add_object("camera", Some(root), None);
        assert!(matches!(export_model(&scene, root, &export_options()), Err(Error::UnmappedObject { name }) if name == "camera"));
    }

    #[test]
    fn test_minimap_import() {
        let mut model = Model::new("m");
        let mut hidden = Mesh::new(MeshKind::Trimesh);
        hidden.surface.render = false;
        model.nodes = vec![
            dummy("m", None),
            Node::new("floor", Some("m".to_owned()), NodeData::Mesh(Box::new(Mesh::new(MeshKind::Trimesh)))),
            Node::new("shadowcaster", Some("m".to_owned()), NodeData::Mesh(Box::new(hidden))),
            Node::new("lamp", Some("m".to_owned()), NodeData::Light(Light::default())),
        ];
        model.animations.push(Animation::new("idle", "m"));

        let mut scene = ArenaScene::new();
        let options = ImportOptions { minimap: true, ..ImportOptions::default() };
        import_model(&model, None, &mut scene, &options).unwrap();
        let types: Vec<NodeType> = scene.objects().iter().map(|obj| obj.data.as_ref().unwrap().node.node_type()).collect();
        assert_eq!(types, vec![NodeType::Dummy, NodeType::Trimesh, NodeType::Dummy, NodeType::Dummy]);
        assert!(scene.scene_animations().is_empty());
    }

    #[test]
    fn test_animation_timeline_and_pruning() {
        let mut model = Model::new("m");
        model.nodes = vec![dummy("m", None), dummy("a", Some("m")), dummy("b", Some("a")), dummy("c", Some("m"))];

        let mut anim = Animation::new("walk", "m");
        anim.length = 2.0;
        anim.transtime = 0.5;
        anim.animroot = "missing".to_owned();
        anim.events.push(AnimEvent { time: 1.0, name: "step".to_owned() });
        let mut node_b = AnimNode::new("b", Some("a".to_owned()), "dummy");
        node_b.channels.insert(Channel {
            name: "position".to_owned(),
            arity: 3,
            integer: false,
            keys: vec![Keyframe::Linear { time: 0.0, value: vec![0.0, 0.0, 0.0] }, Keyframe::Linear { time: 2.0, value: vec![1.0, 0.0, 0.0] }],
        });
        anim.nodes = vec![AnimNode::new("m", None, "dummy"), AnimNode::new("a", Some("m".to_owned()), "dummy"), node_b];
        model.animations = vec![anim.clone(), Animation { name: "run".to_owned(), ..anim }];

        let mut scene = ArenaScene::new();
        let root = import_model(&model, None, &mut scene, &ImportOptions::default()).unwrap();
        let anims = scene.scene_animations();
        assert_eq!((anims[0].frame_start, anims[0].frame_end), (0.0, 60.0));
        assert_eq!(anims[1].frame_start, 70.0);
        assert_eq!(anims[0].animroot, "m");
        assert_eq!(anims[1].events, vec![(100.0, "step".to_owned())]);

        let exported = export_model(&scene, root, &export_options()).unwrap().model;
        let run = exported.animation("run").unwrap();
        assert_eq!(run.length, 2.0);
        assert_eq!(run.transtime, 0.5);
        assert_eq!(run.events, vec![AnimEvent { time: 1.0, name: "step".to_owned() }]);
        let names: Vec<&str> = run.nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["m", "a", "b"]);
        let keys = &run.node("b").unwrap().channels.get("position").unwrap().keys;
        assert_eq!(keys[1], Keyframe::Linear { time: 2.0, value: vec![1.0, 0.0, 0.0] });
    }

    #[test]
    fn test_mesh_survives_scene_round_trip() {
        let mut mesh = Mesh::new(MeshKind::Trimesh);
        mesh.verts = vec![Vec3d::ZERO, Vec3d::new(1.0, 0.0, 0.0), Vec3d::new(0.0, 1.0, 0.0), Vec3d::new(1.0, 1.0, 0.0)];
        mesh.tverts = vec![[0.0, 0.0]; 4];
        mesh.faces = vec![
            Face { verts: [1, 2, 0], smoothgroup: 1, uvs: [1, 2, 0], material: 0 },
            Face { verts: [1, 3, 2], smoothgroup: 2, uvs: [1, 3, 2], material: 0 },
        ];
        let mut model = Model::new("m");
        model.nodes = vec![dummy("m", None), Node::new("plane", Some("m".to_owned()), NodeData::Mesh(Box::new(mesh.clone())))];

        let mut scene = ArenaScene::new();
        let root = import_model(&model, None, &mut scene, &ImportOptions::default()).unwrap();
        let plane = scene.resolve_by_name("plane").unwrap();
        let scene_mesh = scene.object(plane).data.as_ref().unwrap().mesh.clone().unwrap();
        // eekadoodle: third vertex index is 0
        assert_eq!(scene_mesh.corner_uvs[0], [2, 0, 1]);
        assert_eq!(scene_mesh.sharp_edges, BTreeSet::from([(1, 2)]));

        let exported = export_model(&scene, root, &export_options()).unwrap().model;
        let faces = &exported.node("plane").unwrap().mesh().unwrap().faces;
        assert_eq!(faces[0].uvs, mesh.faces[0].uvs);
        assert_eq!(faces[1].uvs, mesh.faces[1].uvs);
        assert!(crate::smoothgroup::is_sharp(faces[0].smoothgroup, faces[1].smoothgroup));
    }
}
