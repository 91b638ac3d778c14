//! File-level loading and saving: the model file, its companion walkmeshes and texture
//! property files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::aabb::layout_position;
use crate::error::{Parsed, Result};
use crate::parse::{parse_model, parse_walkmesh};
use crate::txi::Txi;
use crate::types::*;

/// What to bring in when loading a model.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Instantiate nodes. When false, only animations are imported onto an existing model.
    pub geometry: bool,
    /// Read companion `.pwk`/`.dwk`/`.wok` files.
    pub walkmesh: bool,
    /// Keep smoothgroup masks (as sharp edges) on import.
    pub smoothgroups: bool,
    pub animations: bool,
    /// Look for `<bitmap>.txi` next to the model, or in `texture_path`.
    pub texture_search: bool,
    pub texture_path: Option<PathBuf>,
    /// Load for minimap rendering: helpers and hidden meshes become dummies.
    pub minimap: bool,
    /// In minimap mode, also hide meshes that fade with the tile.
    pub minimap_skip_fade: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            geometry: true,
            walkmesh: true,
            smoothgroups: true,
            animations: true,
            texture_search: false,
            texture_path: None,
            minimap: false,
            minimap_skip_fade: false,
        }
    }
}

/// Optional parts of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSet {
    pub animation: bool,
    pub walkmesh: bool,
}

impl Default for ExportSet {
    fn default() -> Self {
        ExportSet { animation: true, walkmesh: true }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub exports: ExportSet,
    /// When false every face is written with mask 0.
    pub smoothgroups: bool,
    /// Written as a `# ` comment on the first line.
    pub header: Option<String>,
    /// Overrides the model's own `filedependancy`.
    pub file_dependency: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions { exports: ExportSet::default(), smoothgroups: true, header: None, file_dependency: None }
    }
}

/// Everything read for one model file.
#[derive(Debug)]
pub struct Loaded {
    pub model: Model,
    /// A placeable or door walkmesh; static walkmeshes are merged into the model.
    pub walkmesh: Option<Walkmesh>,
    /// Texture property files keyed by bitmap name.
    pub textures: Vec<(String, Txi)>,
}

fn is_ascii_suffixed(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("ascii"))
}

/// The model path without `.ascii` and without its extension.
pub fn model_stem(path: &Path) -> PathBuf {
    let path = if is_ascii_suffixed(path) { path.with_extension("") } else { path.to_path_buf() };
    path.with_extension("")
}

/// `stem` with `.ext` appended, leaving any dots already in the stem alone.
fn sibling(stem: &Path, ext: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn companion_path(stem: &Path, kind: WalkmeshType) -> Option<PathBuf> {
    let plain = sibling(stem, kind.keyword());
    let ascii = sibling(stem, &format!("{}.ascii", kind.keyword()));
    [plain, ascii].into_iter().find(|path| path.is_file())
}

/// Reads a model file and, depending on `options`, its companion files.
pub fn load(path: &Path, options: &ImportOptions) -> Result<Parsed<Loaded>> {
    log::info!("parsing {}", path.display());
    let text = fs::read_to_string(path)?;
    let Parsed { value: mut model, mut warnings } = parse_model(&text)?;

    let mut walkmesh = None;
    if options.walkmesh && options.geometry {
        let stem = model_stem(path);
        for kind in [WalkmeshType::Pwk, WalkmeshType::Dwk, WalkmeshType::Wok] {
            let Some(walk_path) = companion_path(&stem, kind) else {
                log::debug!("no {} file next to {}", kind, path.display());
                continue;
            };
            log::info!("parsing {}", walk_path.display());
            let parsed = parse_walkmesh(&fs::read_to_string(&walk_path)?, kind)?;
            warnings.extend(parsed.warnings);
            if kind == WalkmeshType::Wok {
                merge_static_walkmesh(&mut model, &parsed.value);
            } else if walkmesh.is_none() {
                walkmesh = Some(parsed.value);
            } else {
                log::debug!("skipping {}, a walkmesh was already loaded", walk_path.display());
            }
        }
    }

    let mut textures = vec![];
    if options.texture_search {
        let dir = match &options.texture_path {
            Some(dir) => dir.clone(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        for bitmap in bitmaps(&model) {
            if let Some(parsed) = find_txi(&dir, &bitmap)? {
                warnings.extend(parsed.warnings);
                textures.push((bitmap, parsed.value));
            }
        }
    }

    Ok(Parsed { value: Loaded { model, walkmesh, textures }, warnings })
}

/// Distinct texture names used by the model's meshes.
fn bitmaps(model: &Model) -> Vec<String> {
    let mut out: Vec<String> = vec![];
    for mesh in model.nodes.iter().filter_map(Node::mesh) {
        let bitmap = &mesh.surface.bitmap;
        if !is_null(bitmap) && !out.iter().any(|seen| seen.eq_ignore_ascii_case(bitmap)) {
            out.push(bitmap.clone());
        }
    }
    out
}

fn find_txi(dir: &Path, bitmap: &str) -> Result<Option<Parsed<Txi>>> {
    for ext in ["txi", "TXI"] {
        let path = dir.join(format!("{}.{}", bitmap, ext));
        if path.is_file() {
            return load_txi(&path).map(Some);
        }
    }
    log::debug!("no txi for {}", bitmap);
    Ok(None)
}

pub fn load_txi(path: &Path) -> Result<Parsed<Txi>> {
    log::info!("parsing {}", path.display());
    Ok(Txi::parse(&fs::read_to_string(path)?))
}

/// Writes the modified properties of `txi`. Nothing is written when none were modified.
pub fn save_txi(path: &Path, txi: &Txi, header: Option<&str>) -> Result<bool> {
    if txi.modified().next().is_none() {
        return Ok(false);
    }
    log::info!("writing {}", path.display());
    let mut w = BufWriter::new(File::create(path)?);
    txi.write(&mut w, header)?;
    w.flush()?;
    Ok(true)
}

/// Moves the room links and the layout offset of a static walkmesh onto the model's aabb node.
pub fn merge_static_walkmesh(model: &mut Model, wok: &Walkmesh) {
    let Some(walk_node) = wok.nodes.iter().find(|node| node.mesh().is_some()) else {
        log::warn!("static walkmesh for {} has no mesh", model.name);
        return;
    };
    let Some(aabb_node) = model.nodes.iter_mut().find(|node| node.node_type() == NodeType::Aabb) else {
        log::debug!("{} has no aabb node, ignoring its static walkmesh", model.name);
        return;
    };
    let (Some(walk_mesh), Some(aabb_mesh)) = (walk_node.mesh(), aabb_node.mesh_mut()) else {
        return;
    };
    aabb_mesh.roomlinks = walk_mesh.roomlinks.clone();
    if let Some(offset) = layout_position(walk_mesh, walk_node.position, aabb_mesh) {
        aabb_mesh.lytposition = Some(offset);
    }
}

/// The static walkmesh for `model`: its first aabb node with vertices moved into layout space.
pub fn static_walkmesh(model: &Model) -> Option<Walkmesh> {
    let mut node = model.aabb_node()?.clone();
    let position = node.position;
    let mesh = node.mesh_mut()?;
    let offset = mesh.lytposition.unwrap_or_default() + position;
    for vert in &mut mesh.verts {
        *vert += offset;
    }
    Some(Walkmesh { kind: WalkmeshType::Wok, root: model.name.clone(), nodes: vec![node] })
}

/// Writes `model` to `path` and, when requested, its walkmeshes next to it. A model written as
/// `.mdl.ascii` gets `.wok.ascii` style companions.
pub fn save(path: &Path, model: &Model, walkmeshes: &[Walkmesh], options: &ExportOptions) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    model.write(&mut w, options)?;
    w.flush()?;

    if options.exports.walkmesh {
        let stem = model_stem(path);
        let written: Vec<Walkmesh> = match static_walkmesh(model) {
            Some(wok) => vec![wok],
            None => walkmeshes.iter().filter(|walkmesh| walkmesh.kind != WalkmeshType::Wok).cloned().collect(),
        };
        for walkmesh in &written {
            let walk_path = if is_ascii_suffixed(path) {
                sibling(&stem, &format!("{}.ascii", walkmesh.kind.keyword()))
            } else {
                sibling(&stem, walkmesh.kind.keyword())
            };
            let mut w = BufWriter::new(File::create(&walk_path)?);
            if let Some(header) = &options.header {
                writeln!(w, "# {}", header)?;
            }
            walkmesh.write(&mut w, options.smoothgroups)?;
            w.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_stem() {
        assert_eq!(model_stem(Path::new("dir/plc_chair.mdl")), PathBuf::from("dir/plc_chair"));
        assert_eq!(model_stem(Path::new("dir/plc_chair.mdl.ascii")), PathBuf::from("dir/plc_chair"));
        assert_eq!(model_stem(Path::new("plc_chair.MDL.ASCII")), PathBuf::from("plc_chair"));
    }

    #[test]
    fn test_static_walkmesh_moves_into_layout_space() {
        let mut mesh = Mesh::new(MeshKind::Aabb(vec![]));
        mesh.verts = vec![Vec3d::new(1.0, 0.0, 0.0), Vec3d::new(0.0, 1.0, 0.0), Vec3d::ZERO];
        mesh.faces = vec![Face { verts: [0, 1, 2], smoothgroup: 1, uvs: [0; 3], material: 1 }];
        mesh.lytposition = Some(Vec3d::new(10.0, 0.0, 0.0));
        let mut aabb = Node::new("room_aabb", Some("room".to_owned()), NodeData::Mesh(Box::new(mesh)));
        aabb.position = Vec3d::new(0.0, 5.0, 0.0);

        let mut model = Model::new("room");
        model.nodes = vec![Node::new("room", None, NodeData::Dummy), aabb];
        let wok = static_walkmesh(&model).unwrap();
        let verts = &wok.nodes[0].mesh().unwrap().verts;
        assert_eq!(verts[0], Vec3d::new(11.0, 5.0, 0.0));
        assert_eq!(wok.nodes[0].position, Vec3d::new(0.0, 5.0, 0.0));

        // reading it back recovers the layout offset
        let mut reloaded = model.clone();
        reloaded.nodes[1].mesh_mut().unwrap().lytposition = None;
        merge_static_walkmesh(&mut reloaded, &wok);
        assert_eq!(reloaded.nodes[1].mesh().unwrap().lytposition, Some(Vec3d::new(10.0, 0.0, 0.0)));
    }
}
