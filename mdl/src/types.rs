use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use nalgebra::{Unit, UnitQuaternion};
extern crate nalgebra_glm as glm;

pub use crate::emitter::{BlendType, Emitter, RenderType, SpawnType, UpdateType};

/// The sentinel the format uses for "no parent", "no texture" and similar.
pub const NULL: &str = "NULL";

pub(crate) fn is_null(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case(NULL)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}
impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

#[derive(Clone, Copy, Default)]
pub struct Vec3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Eq for Vec3d {}
impl PartialEq for Vec3d {
    // bitwise, so NaN compares equal to itself
    fn eq(&self, other: &Self) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits() && self.z.to_bits() == other.z.to_bits()
    }
}
impl std::hash::Hash for Vec3d {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
        self.z.to_bits().hash(state);
    }
}
impl Debug for Vec3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", &self.x, &self.y, &self.z)
    }
}
impl From<[f32; 3]> for Vec3d {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Vec3d { x, y, z }
    }
}
impl From<Vec3d> for [f32; 3] {
    fn from(Vec3d { x, y, z }: Vec3d) -> Self {
        [x, y, z]
    }
}
impl From<Vec3d> for glm::Vec3 {
    fn from(Vec3d { x, y, z }: Vec3d) -> Self {
        glm::vec3(x, y, z)
    }
}
impl From<glm::Vec3> for Vec3d {
    fn from(vec: glm::Vec3) -> Self {
        <[f32; 3]>::from(vec).into()
    }
}
impl Vec3d {
    pub const ZERO: Vec3d = Vec3d { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3d = Vec3d { x: 1.0, y: 1.0, z: 1.0 };
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3d { x, y, z }
    }
    pub fn magnitude(self) -> f32 {
        f32::sqrt(self.x * self.x + self.y * self.y + self.z * self.z)
    }
    pub fn is_null(self) -> bool {
        self.x.abs() <= 0.000001 && self.y.abs() <= 0.000001 && self.z.abs() <= 0.000001
    }
    pub fn average(iter: impl Iterator<Item = Self>) -> Vec3d {
        let mut out = Vec3d::ZERO;
        let mut n = 0;

        for vec in iter {
            out += vec;
            n += 1;
        }

        if n > 0 {
            out /= n as f32;
        }
        out
    }
}
impl Add for Vec3d {
    type Output = Vec3d;

    fn add(self, rhs: Self) -> Self::Output {
        Vec3d { x: self.x + rhs.x, y: self.y + rhs.y, z: self.z + rhs.z }
    }
}
impl AddAssign for Vec3d {
    fn add_assign(&mut self, rhs: Vec3d) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}
impl Sub for Vec3d {
    type Output = Vec3d;

    fn sub(self, rhs: Self) -> Self::Output {
        Vec3d { x: self.x - rhs.x, y: self.y - rhs.y, z: self.z - rhs.z }
    }
}
impl SubAssign for Vec3d {
    fn sub_assign(&mut self, rhs: Vec3d) {
        self.x -= rhs.x;
        self.y -= rhs.y;
        self.z -= rhs.z;
    }
}
impl MulAssign<f32> for Vec3d {
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
        self.z *= rhs;
    }
}
impl Mul<f32> for Vec3d {
    type Output = Vec3d;

    fn mul(self, rhs: f32) -> Vec3d {
        Vec3d { x: self.x * rhs, y: self.y * rhs, z: self.z * rhs }
    }
}
impl DivAssign<f32> for Vec3d {
    fn div_assign(&mut self, rhs: f32) {
        self.x /= rhs;
        self.y /= rhs;
        self.z /= rhs;
    }
}
impl Div<f32> for Vec3d {
    type Output = Vec3d;

    fn div(self, rhs: f32) -> Vec3d {
        Vec3d { x: self.x / rhs, y: self.y / rhs, z: self.z / rhs }
    }
}
impl Neg for Vec3d {
    type Output = Vec3d;

    fn neg(self) -> Self::Output {
        Vec3d { x: -self.x, y: -self.y, z: -self.z }
    }
}
impl Index<Axis> for Vec3d {
    type Output = f32;

    fn index(&self, index: Axis) -> &Self::Output {
        match index {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}
impl IndexMut<Axis> for Vec3d {
    fn index_mut(&mut self, index: Axis) -> &mut Self::Output {
        match index {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

#[derive(Default, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min: Vec3d,
    pub max: Vec3d,
}
impl Debug for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}, {:?}", &self.min, &self.max))
    }
}
impl BBox {
    pub fn axis_size(&self, axis: Axis) -> f32 {
        self.max[axis] - self.min[axis]
    }
    /// Longest axis; the earlier axis wins a tie.
    pub fn greatest_dimension(&self) -> Axis {
        Axis::ALL
            .into_iter()
            .fold(Axis::X, |best, axis| if self.axis_size(axis) > self.axis_size(best) { axis } else { best })
    }
    pub fn expand_vec(&mut self, vec: Vec3d) {
        self.min.x = self.min.x.min(vec.x);
        self.min.y = self.min.y.min(vec.y);
        self.min.z = self.min.z.min(vec.z);
        self.max.x = self.max.x.max(vec.x);
        self.max.y = self.max.y.max(vec.y);
        self.max.z = self.max.z.max(vec.z);
    }
    pub fn expand_bbox(&mut self, bbox: &BBox) {
        self.expand_vec(bbox.min);
        self.expand_vec(bbox.max);
    }
    pub fn from_vectors(mut iter: impl Iterator<Item = Vec3d>) -> BBox {
        if let Some(vec) = iter.next() {
            iter.fold(BBox { min: vec, max: vec }, |mut bbox, vec| {
                bbox.expand_vec(vec);
                bbox
            })
        } else {
            BBox::default()
        }
    }
    pub fn from_bboxes<'a>(mut iter: impl Iterator<Item = &'a Self>) -> BBox {
        if let Some(bbox) = iter.next() {
            iter.fold(*bbox, |mut acc_bbox, bbox| {
                acc_bbox.expand_bbox(bbox);
                acc_bbox
            })
        } else {
            BBox::default()
        }
    }
    pub fn contains(&self, other: &BBox) -> bool {
        Axis::ALL.into_iter().all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }
}

/// Rotation as stored in the file: a rotation axis plus an angle in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    pub axis: Vec3d,
    pub angle: f32,
}
impl Default for Orientation {
    fn default() -> Self {
        Orientation { axis: Vec3d::ZERO, angle: 0.0 }
    }
}
impl From<[f32; 4]> for Orientation {
    fn from([x, y, z, angle]: [f32; 4]) -> Self {
        Orientation { axis: Vec3d { x, y, z }, angle }
    }
}
impl From<Orientation> for [f32; 4] {
    fn from(Orientation { axis, angle }: Orientation) -> Self {
        [axis.x, axis.y, axis.z, angle]
    }
}
impl Orientation {
    pub fn to_quat(self) -> UnitQuaternion<f32> {
        if self.axis.is_null() {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_axis_angle(&Unit::new_normalize(self.axis.into()), self.angle)
        }
    }
    pub fn from_quat(quat: UnitQuaternion<f32>) -> Self {
        match quat.axis_angle() {
            Some((axis, angle)) => Orientation { axis: axis.into_inner().into(), angle },
            None => Orientation::default(),
        }
    }
    /// XYZ euler angles (roll, pitch, yaw).
    pub fn to_euler(self) -> Vec3d {
        let (x, y, z) = self.to_quat().euler_angles();
        Vec3d { x, y, z }
    }
    pub fn from_euler(euler: Vec3d) -> Self {
        Self::from_quat(UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z))
    }
}

macro_rules! mk_keyword_enum {
    ($($(#[$meta:meta])* pub enum $tyname:ident {
        $($(#[$doc:meta])* $name:ident = $kw:literal,)*
    })*) => {
        $(
            $(#[$meta])*
            pub enum $tyname {
                $($(#[$doc])* $name,)*
            }

            impl $tyname {
                pub fn keyword(self) -> &'static str {
                    match self {
                        $($tyname::$name => $kw,)*
                    }
                }
            }

            impl FromStr for $tyname {
                type Err = ();

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    $(if s.eq_ignore_ascii_case($kw) {
                        return Ok($tyname::$name);
                    })*
                    Err(())
                }
            }

            impl Display for $tyname {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.keyword())
                }
            }
        )*
    };
}
pub(crate) use mk_keyword_enum;

mk_keyword_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Classification {
        Unknown = "Unknown",
        Effect = "Effect",
        Tile = "Tile",
        Character = "Character",
        Door = "Door",
        Saber = "Lightsaber",
        Item = "Item",
        Flyer = "Flyer",
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum NodeType {
        Dummy = "dummy",
        Patch = "patch",
        Reference = "reference",
        Trimesh = "trimesh",
        Danglymesh = "danglymesh",
        Lightsaber = "lightsaber",
        Skin = "skin",
        Emitter = "emitter",
        Light = "light",
        Aabb = "aabb",
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum WalkmeshType {
        /// placeable
        Pwk = "pwk",
        /// door
        Dwk = "dwk",
        /// static room geometry
        Wok = "wok",
    }
}
impl Default for Classification {
    fn default() -> Self {
        Classification::Unknown
    }
}
impl NodeType {
    pub fn is_mesh(self) -> bool {
        matches!(self, NodeType::Trimesh | NodeType::Danglymesh | NodeType::Lightsaber | NodeType::Skin | NodeType::Aabb)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// `None` for the `NULL` parent.
    pub parent: Option<String>,
    pub position: Vec3d,
    pub orientation: Orientation,
    pub scale: f32,
    pub wirecolor: Vec3d,
    pub data: NodeData,
    /// Controllers written in keyed form inside the geometry block.
    pub keyed: ChannelSet,
    /// Unrecognized directive lines, re-emitted verbatim.
    pub raw: Vec<String>,
    /// Source line of the `node` header, 0 when not parsed from text.
    pub line: usize,
}
impl Node {
    pub fn new(name: impl Into<String>, parent: Option<String>, data: NodeData) -> Self {
        Node {
            name: name.into(),
            parent,
            position: Vec3d::ZERO,
            orientation: Orientation::default(),
            scale: 1.0,
            wirecolor: Vec3d::ONE,
            data,
            keyed: ChannelSet::default(),
            raw: vec![],
            line: 0,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }

    pub fn parent_name(&self) -> &str {
        self.parent.as_deref().unwrap_or(NULL)
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        match &self.data {
            NodeData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut Mesh> {
        match &mut self.data {
            NodeData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Dummy,
    Patch,
    Reference(Reference),
    Mesh(Box<Mesh>),
    Emitter(Box<Emitter>),
    Light(Light),
}
impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Dummy => NodeType::Dummy,
            NodeData::Patch => NodeType::Patch,
            NodeData::Reference(_) => NodeType::Reference,
            NodeData::Mesh(mesh) => mesh.kind.node_type(),
            NodeData::Emitter(_) => NodeType::Emitter,
            NodeData::Light(_) => NodeType::Light,
        }
    }

    /// Empty payload for `node_type`.
    pub fn for_type(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Dummy => NodeData::Dummy,
            NodeType::Patch => NodeData::Patch,
            NodeType::Reference => NodeData::Reference(Reference::default()),
            NodeType::Trimesh => NodeData::Mesh(Box::new(Mesh::new(MeshKind::Trimesh))),
            NodeType::Lightsaber => NodeData::Mesh(Box::new(Mesh::new(MeshKind::Lightsaber))),
            NodeType::Danglymesh => NodeData::Mesh(Box::new(Mesh::new(MeshKind::Danglymesh(Dangly::default())))),
            NodeType::Skin => NodeData::Mesh(Box::new(Mesh::new(MeshKind::Skin(vec![])))),
            NodeType::Aabb => NodeData::Mesh(Box::new(Mesh::new(MeshKind::Aabb(vec![])))),
            NodeType::Emitter => NodeData::Emitter(Box::default()),
            NodeType::Light => NodeData::Light(Light::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub refmodel: String,
    pub reattachable: bool,
}
impl Default for Reference {
    fn default() -> Self {
        Reference { refmodel: NULL.to_owned(), reattachable: false }
    }
}

#[derive(Debug, Clone)]
pub enum MeshKind {
    Trimesh,
    Lightsaber,
    Danglymesh(Dangly),
    /// Per-vertex bone influences.
    Skin(Vec<Vec<BoneWeight>>),
    /// The collision tree as read from the file; rebuilt from the faces on write.
    Aabb(Vec<AabbEntry>),
}
impl MeshKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            MeshKind::Trimesh => NodeType::Trimesh,
            MeshKind::Lightsaber => NodeType::Lightsaber,
            MeshKind::Danglymesh(_) => NodeType::Danglymesh,
            MeshKind::Skin(_) => NodeType::Skin,
            MeshKind::Aabb(_) => NodeType::Aabb,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dangly {
    pub period: f32,
    pub tightness: f32,
    pub displacement: f32,
    /// One per vertex, in [0, 255].
    pub constraints: Vec<f32>,
}
impl Default for Dangly {
    fn default() -> Self {
        Dangly { period: 1.0, tightness: 1.0, displacement: 1.0, constraints: vec![] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoneWeight {
    pub bone: String,
    pub weight: f32,
}

/// Surface and material settings shared by every mesh type.
#[derive(Debug, Clone)]
pub struct Surface {
    pub tilefade: i32,
    pub render: bool,
    pub shadow: bool,
    pub lightmapped: bool,
    pub beaming: bool,
    pub inheritcolor: bool,
    pub tangentspace: bool,
    pub rotatetexture: bool,
    pub background_geometry: bool,
    pub dirt_enabled: bool,
    pub dirt_texture: i32,
    pub dirt_worldspace: i32,
    pub hologram_donotdraw: bool,
    pub animateuv: bool,
    pub uvdirectionx: f32,
    pub uvdirectiony: f32,
    pub uvjitter: f32,
    pub uvjitterspeed: f32,
    pub alpha: f32,
    pub transparencyhint: i32,
    pub selfillumcolor: Vec3d,
    pub ambient: Vec3d,
    pub diffuse: Vec3d,
    pub bitmap: String,
    pub bitmap2: String,
}
impl Default for Surface {
    fn default() -> Self {
        Surface {
            tilefade: 0,
            render: true,
            shadow: true,
            lightmapped: false,
            beaming: false,
            inheritcolor: false,
            tangentspace: false,
            rotatetexture: false,
            background_geometry: false,
            dirt_enabled: false,
            dirt_texture: 1,
            dirt_worldspace: 1,
            hologram_donotdraw: false,
            animateuv: false,
            uvdirectionx: 1.0,
            uvdirectiony: 1.0,
            uvjitter: 0.0,
            uvjitterspeed: 0.0,
            alpha: 1.0,
            transparencyhint: 0,
            selfillumcolor: Vec3d::ZERO,
            ambient: Vec3d::ZERO,
            diffuse: Vec3d::ZERO,
            bitmap: NULL.to_owned(),
            bitmap2: NULL.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub kind: MeshKind,
    pub surface: Surface,
    /// `None` when absent or written as `undefined`.
    pub center: Option<Vec3d>,
    /// Offset between the room layout and the static walkmesh.
    pub lytposition: Option<Vec3d>,
    pub verts: Vec<Vec3d>,
    pub faces: Vec<Face>,
    pub tverts: Vec<[f32; 2]>,
    /// Lightmap UVs.
    pub tverts1: Vec<[f32; 2]>,
    /// Lightmap UV indices, one triple per face, in file order.
    pub texindices1: Vec<[u32; 3]>,
    pub roomlinks: Vec<RoomLink>,
}
impl Mesh {
    pub fn new(kind: MeshKind) -> Self {
        Mesh {
            kind,
            surface: Surface::default(),
            center: None,
            lytposition: None,
            verts: vec![],
            faces: vec![],
            tverts: vec![],
            tverts1: vec![],
            texindices1: vec![],
            roomlinks: vec![],
        }
    }
}

/// Material index the game reserves for non-walkable walkmesh faces.
pub const NON_WALKABLE: i32 = 7;

/// One triangle. `uvs` holds the indices in file order; use
/// [`Face::corner_uvs`] for the per-corner assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Face {
    pub verts: [u32; 3],
    pub smoothgroup: u32,
    pub uvs: [u32; 3],
    pub material: i32,
}
impl Face {
    /// UV indices in corner order. A face whose third vertex index is 0 stores
    /// its UV triple rotated by one.
    pub fn corner_uvs(&self) -> [u32; 3] {
        rotate_for_corners(self.verts, self.uvs)
    }

    /// Inverse of [`Face::corner_uvs`].
    pub fn set_corner_uvs(&mut self, corners: [u32; 3]) {
        self.uvs = rotate_for_file(self.verts, corners);
    }
}

pub(crate) fn rotate_for_corners(verts: [u32; 3], [u0, u1, u2]: [u32; 3]) -> [u32; 3] {
    if verts[2] == 0 {
        [u1, u2, u0]
    } else {
        [u0, u1, u2]
    }
}

pub(crate) fn rotate_for_file(verts: [u32; 3], [c0, c1, c2]: [u32; 3]) -> [u32; 3] {
    if verts[2] == 0 {
        [c2, c0, c1]
    } else {
        [c0, c1, c2]
    }
}

/// `face_edge` is `3 * walkable_face_index + edge_within_face`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLink {
    pub face_edge: u32,
    pub room: u32,
}

/// One serialized AABB tree node. `face` is the triangle index for leaves, -1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AabbEntry {
    pub bbox: BBox,
    pub face: i32,
    /// Split axis of internal nodes, known only for trees built in memory.
    pub split: Option<Axis>,
}
impl AabbEntry {
    pub fn is_leaf(&self) -> bool {
        self.face >= 0
    }
}

#[derive(Debug, Clone)]
pub struct Flare {
    pub texture: String,
    pub size: f32,
    pub position: f32,
    pub colorshift: Vec3d,
}

#[derive(Debug, Clone)]
pub struct Light {
    pub shadow: bool,
    pub radius: f32,
    pub multiplier: f32,
    pub lightpriority: i32,
    pub color: Vec3d,
    pub ambientonly: bool,
    pub ndynamictype: i32,
    pub isdynamic: bool,
    pub affectdynamic: bool,
    pub negativelight: bool,
    pub fadinglight: bool,
    pub lensflares: bool,
    pub flareradius: f32,
    pub flares: Vec<Flare>,
}
impl Default for Light {
    fn default() -> Self {
        Light {
            shadow: true,
            radius: 5.0,
            multiplier: 1.0,
            lightpriority: 5,
            color: Vec3d::ZERO,
            ambientonly: true,
            ndynamictype: 1,
            isdynamic: true,
            affectdynamic: true,
            negativelight: false,
            fadinglight: true,
            lensflares: false,
            flareradius: 1.0,
            flares: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub supermodel: String,
    pub classification: Classification,
    pub classification_unk1: i32,
    pub ignorefog: bool,
    pub compress_quaternions: bool,
    pub headlink: bool,
    pub animation_scale: f32,
    pub file_dependency: Option<String>,
    /// In file order; the first node is the root dummy.
    pub nodes: Vec<Node>,
    pub animations: Vec<Animation>,
}
impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            supermodel: NULL.to_owned(),
            classification: Classification::Unknown,
            classification_unk1: 0,
            ignorefog: false,
            compress_quaternions: false,
            headlink: false,
            animation_scale: 1.0,
            file_dependency: None,
            nodes: vec![],
            animations: vec![],
        }
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// First node called `name`, compared case-insensitively.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name.eq_ignore_ascii_case(name))
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |node| node.parent.as_deref().map_or(false, |parent| parent.eq_ignore_ascii_case(name)))
    }

    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animations.iter().find(|anim| anim.name.eq_ignore_ascii_case(name))
    }

    /// The first `aabb` node, which doubles as the static walkmesh.
    pub fn aabb_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.node_type() == NodeType::Aabb)
    }
}

#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    /// Model name from the `newanim` line.
    pub model: String,
    pub length: f32,
    pub transtime: f32,
    pub animroot: String,
    pub events: Vec<AnimEvent>,
    pub nodes: Vec<AnimNode>,
}
impl Animation {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Animation {
            name: name.into(),
            model: model.into(),
            length: 1.0,
            transtime: 1.0,
            animroot: NULL.to_owned(),
            events: vec![],
            nodes: vec![],
        }
    }

    pub fn node(&self, name: &str) -> Option<&AnimNode> {
        self.nodes.iter().find(|node| node.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimEvent {
    pub time: f32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AnimNode {
    pub name: String,
    pub parent: Option<String>,
    /// Type keyword as written in the animation block.
    pub node_type: String,
    pub channels: ChannelSet,
    pub samples: MeshSamples,
    /// Unrecognized controllers and their key lines, verbatim.
    pub raw: Vec<String>,
    pub line: usize,
}
impl AnimNode {
    pub fn new(name: impl Into<String>, parent: Option<String>, node_type: impl Into<String>) -> Self {
        AnimNode {
            name: name.into(),
            parent,
            node_type: node_type.into(),
            channels: ChannelSet::default(),
            samples: MeshSamples::default(),
            raw: vec![],
            line: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.samples.is_empty() && self.raw.is_empty()
    }
}

/// Per-frame vertex and UV samples of an animated mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshSamples {
    pub sample_period: Option<f32>,
    pub verts: Vec<Vec3d>,
    pub tverts: Vec<Vec3d>,
}
impl MeshSamples {
    pub fn is_empty(&self) -> bool {
        self.sample_period.is_none() && self.verts.is_empty() && self.tverts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyframe {
    /// Unkeyed controller.
    Constant { value: Vec<f32> },
    Linear { time: f32, value: Vec<f32> },
    /// `left`/`right` are handle offsets relative to `value`.
    Bezier { time: f32, value: Vec<f32>, left: Vec<f32>, right: Vec<f32> },
}
impl Keyframe {
    pub fn time(&self) -> f32 {
        match self {
            Keyframe::Constant { .. } => 0.0,
            Keyframe::Linear { time, .. } | Keyframe::Bezier { time, .. } => *time,
        }
    }

    pub fn value(&self) -> &[f32] {
        match self {
            Keyframe::Constant { value } | Keyframe::Linear { value, .. } | Keyframe::Bezier { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Canonical controller name, without any `key`/`bezierkey` suffix.
    pub name: String,
    /// Values per key.
    pub arity: usize,
    /// Written as integers.
    pub integer: bool,
    pub keys: Vec<Keyframe>,
}
impl Channel {
    pub fn is_bezier(&self) -> bool {
        self.keys.iter().any(|key| matches!(key, Keyframe::Bezier { .. }))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.keys.as_slice(), [Keyframe::Constant { .. }])
    }
}

/// Channels by name, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}
impl ChannelSet {
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.name.eq_ignore_ascii_case(name))
    }

    /// Adds `channel`, replacing any channel of the same name in place.
    pub fn insert(&mut self, channel: Channel) {
        match self.channels.iter_mut().find(|existing| existing.name.eq_ignore_ascii_case(&channel.name)) {
            Some(existing) => *existing = channel,
            None => self.channels.push(channel),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
impl<'a> IntoIterator for &'a ChannelSet {
    type Item = &'a Channel;

    type IntoIter = std::slice::Iter<'a, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A companion collision file: nodes only, no header, no animations.
#[derive(Debug, Clone)]
pub struct Walkmesh {
    pub kind: WalkmeshType,
    /// The parent name all nodes share.
    pub root: String,
    pub nodes: Vec<Node>,
}
