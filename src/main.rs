//! mdl-tools: convert, inspect and touch up Odyssey ASCII models from the command line.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mdl::io::{load, load_txi, model_stem, save, save_txi};
use mdl::scene::SceneSource;
use mdl::smoothgroup::{regenerate, sharp_edges, Policy, Scope};
use mdl::txi::TxiValue;
use mdl::{export_model, import_model, ArenaScene, ExportOptions, ExportSet, ImportOptions, NodeType, Warning};
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, SimpleLogger, WriteLogger};

#[derive(Parser)]
#[command(name = "mdl-tools")]
#[command(about = "Reads and writes Odyssey ASCII models, walkmeshes and texture properties", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output; repeat for debug output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a model (and its walkmeshes) and write it back out
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Leave animations out of the output
        #[arg(long)]
        no_animations: bool,
        /// Neither read nor write companion walkmeshes
        #[arg(long)]
        no_walkmesh: bool,
        /// Write every face with smoothgroup 0
        #[arg(long)]
        no_smoothgroups: bool,
        /// Pass the model through an in-memory scene, as an editor import/export would
        #[arg(long)]
        via_scene: bool,
        /// Override the `filedependancy` line
        #[arg(long)]
        file_dependency: Option<String>,
    },
    /// Print a summary of a model
    Info { file: PathBuf },
    /// Edit a texture property file
    Txi {
        input: PathBuf,
        /// Output file, `<input>.new.txi` by default
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// `token=value` assignments applied after reading
        #[arg(short, long = "set", value_name = "TOKEN=VALUE")]
        sets: Vec<String>,
    },
    /// Reassign smoothgroups on every mesh of a model
    RegenSmoothgroups {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = PolicyArg::Auto)]
        policy: PolicyArg,
        /// Only touch faces without a smoothgroup
        #[arg(long)]
        unassigned: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Separate,
    Single,
    Auto,
}
impl From<PolicyArg> for Policy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Separate => Policy::Separate,
            PolicyArg::Single => Policy::Single,
            PolicyArg::Auto => Policy::Auto,
        }
    }
}

fn init_logging(level: LevelFilter) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![SimpleLogger::new(level, Config::default())];
    let log_path = std::env::temp_dir().join("mdl-tools.log");
    match File::create(&log_path) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file)),
        Err(err) => eprintln!("cannot open {}: {}", log_path.display(), err),
    }
    let _ = CombinedLogger::init(loggers);
    log::info!("mdl-tools {} started at {}", env!("CARGO_PKG_VERSION"), chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("{}\n{:?}", info, backtrace::Backtrace::new());
        default_hook(info);
    }));
}

fn export_header() -> String {
    chrono::Local::now().format("Exported from mdl-tools at %A, %Y-%m-%d").to_string()
}

fn report(path: &Path, warnings: &[Warning]) {
    if !warnings.is_empty() {
        log::info!("{}: {} warning(s)", path.display(), warnings.len());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };
    init_logging(level);

    match cli.command {
        Commands::Convert { input, output, no_animations, no_walkmesh, no_smoothgroups, via_scene, file_dependency } => {
            let import = ImportOptions { walkmesh: !no_walkmesh, ..ImportOptions::default() };
            let export = ExportOptions {
                exports: ExportSet { animation: !no_animations, walkmesh: !no_walkmesh },
                smoothgroups: !no_smoothgroups,
                header: Some(export_header()),
                file_dependency,
            };
            convert(&input, &output, &import, &export, via_scene)
        }
        Commands::Info { file } => info(&file),
        Commands::Txi { input, output, sets } => {
            let output = output.unwrap_or_else(|| {
                let mut name = model_stem(&input).into_os_string();
                name.push(".new.txi");
                PathBuf::from(name)
            });
            edit_txi(&input, &output, &sets)
        }
        Commands::RegenSmoothgroups { input, output, policy, unassigned } => {
            let scope = if unassigned { Scope::Unassigned } else { Scope::All };
            regen_smoothgroups(&input, &output, policy.into(), &scope)
        }
    }
}

fn convert(input: &Path, output: &Path, import: &ImportOptions, export: &ExportOptions, via_scene: bool) -> Result<()> {
    let loaded = load(input, import).with_context(|| format!("failed to read {}", input.display()))?;
    report(input, &loaded.warnings);
    let loaded = loaded.value;

    let (model, walkmeshes) = if via_scene {
        let mut scene = ArenaScene::new();
        let root = import_model(&loaded.model, loaded.walkmesh.as_ref(), &mut scene, import)
            .with_context(|| format!("failed to import {}", input.display()))?;
        log::debug!("scene holds {} objects under {}", scene.objects().len(), scene.name(root));
        let exported = export_model(&scene, root, export).context("failed to export from the scene")?;
        (exported.model, exported.walkmeshes)
    } else {
        (loaded.model, loaded.walkmesh.into_iter().collect())
    };

    save(output, &model, &walkmeshes, export).with_context(|| format!("failed to write {}", output.display()))?;
    log::info!("wrote {}", output.display());
    Ok(())
}

fn info(path: &Path) -> Result<()> {
    let options = ImportOptions { texture_search: true, ..ImportOptions::default() };
    let loaded = load(path, &options).with_context(|| format!("failed to read {}", path.display()))?;
    let model = &loaded.value.model;

    println!("model {}", model.name);
    println!("  supermodel {}", model.supermodel);
    println!("  classification {}", model.classification);
    println!("  animation scale {}", model.animation_scale);

    let mut counts: Vec<(NodeType, usize)> = vec![];
    for node in &model.nodes {
        match counts.iter_mut().find(|(node_type, _)| *node_type == node.node_type()) {
            Some((_, count)) => *count += 1,
            None => counts.push((node.node_type(), 1)),
        }
    }
    println!("  {} nodes", model.nodes.len());
    for (node_type, count) in counts {
        println!("    {:<12} {}", node_type.keyword(), count);
    }
    let (verts, faces) = model.nodes.iter().filter_map(|node| node.mesh()).fold((0, 0), |(v, f), mesh| (v + mesh.verts.len(), f + mesh.faces.len()));
    println!("  {} vertices, {} faces", verts, faces);

    println!("  {} animations", model.animations.len());
    for anim in &model.animations {
        println!("    {:<16} length {:<8} events {}", anim.name, anim.length, anim.events.len());
    }
    if let Some(walkmesh) = &loaded.value.walkmesh {
        println!("  {} walkmesh with {} nodes", walkmesh.kind, walkmesh.nodes.len());
    }
    for (bitmap, txi) in &loaded.value.textures {
        println!("  {}.txi sets {}", bitmap, txi.modified().collect::<Vec<_>>().join(", "));
    }

    if !loaded.warnings.is_empty() {
        println!("  {} warnings", loaded.warnings.len());
        for warning in &loaded.warnings {
            println!("    {}", warning);
        }
    }
    Ok(())
}

/// Reads `text` as the same kind of value `current` holds.
fn txi_value(current: &TxiValue, text: &str) -> Result<TxiValue> {
    let floats = || -> Result<Vec<f32>> { text.split_whitespace().map(|tok| tok.parse::<f32>().map_err(|_| anyhow!("`{}` is not a number", tok))).collect() };
    Ok(match current {
        TxiValue::Bool(_) => TxiValue::Bool(matches!(text.to_ascii_lowercase().as_str(), "1" | "true")),
        TxiValue::Int(_) => TxiValue::Int(text.parse().with_context(|| format!("`{}` is not an integer", text))?),
        TxiValue::Float(_) => TxiValue::Float(text.parse().with_context(|| format!("`{}` is not a number", text))?),
        TxiValue::Text(_) => TxiValue::Text(text.to_owned()),
        TxiValue::Color(_) => match floats()?[..] {
            [r, g, b] => TxiValue::Color([r, g, b]),
            _ => bail!("a color needs 3 values"),
        },
        TxiValue::List(_) => match floats()?[..] {
            [a, b, c, d] => TxiValue::List([a, b, c, d]),
            _ => bail!("a channel list needs 4 values"),
        },
    })
}

fn edit_txi(input: &Path, output: &Path, sets: &[String]) -> Result<()> {
    let parsed = load_txi(input).with_context(|| format!("failed to read {}", input.display()))?;
    report(input, &parsed.warnings);
    let mut txi = parsed.value;

    for set in sets {
        let (token, text) = set.split_once('=').ok_or_else(|| anyhow!("expected TOKEN=VALUE, got `{}`", set))?;
        let current = txi.get(token).ok_or_else(|| anyhow!("unknown txi token `{}`", token))?;
        let value = txi_value(current, text)?;
        txi.set(token, value).map_err(|err| anyhow!(err))?;
    }

    let header = export_header();
    if save_txi(output, &txi, Some(&header)).with_context(|| format!("failed to write {}", output.display()))? {
        log::info!("wrote {}", output.display());
    } else {
        log::warn!("{} sets nothing, no file written", input.display());
    }
    Ok(())
}

fn regen_smoothgroups(input: &Path, output: &Path, policy: Policy, scope: &Scope) -> Result<()> {
    let import = ImportOptions::default();
    let loaded = load(input, &import).with_context(|| format!("failed to read {}", input.display()))?;
    report(input, &loaded.warnings);
    let mut model = loaded.value.model;

    for node in &mut model.nodes {
        let name = node.name.clone();
        if let Some(mesh) = node.mesh_mut() {
            let sharp = sharp_edges(&mesh.faces);
            regenerate(&mut mesh.faces, &sharp, policy, scope);
            log::debug!("{}: {} faces, {} hard edges kept", name, mesh.faces.len(), sharp.len());
        }
    }

    let export = ExportOptions { header: Some(export_header()), ..ExportOptions::default() };
    let walkmeshes: Vec<_> = loaded.value.walkmesh.into_iter().collect();
    save(output, &model, &walkmeshes, &export).with_context(|| format!("failed to write {}", output.display()))?;
    log::info!("wrote {}", output.display());
    Ok(())
}
