use mdl::{parse_model, ExportOptions, Model, Parsed};
use std::{fs, io, path::Path};

fn is_model(path: &Path) -> bool {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    name.ends_with(".mdl") || name.ends_with(".mdl.ascii")
}

fn process_path(path: &Path, f: &mut impl FnMut(&Path, Parsed<Model>)) -> io::Result<()> {
    if !is_model(path) {
        return Ok(());
    }
    let text = fs::read_to_string(path)?;
    println!("- parsing {}...", path.display());
    match parse_model(&text) {
        Ok(parsed) => f(path, parsed),
        Err(err) => println!("  failed: {}", err),
    }
    Ok(())
}

fn run_census(locations: impl IntoIterator<Item = String>, mut f: impl FnMut(&Path, Parsed<Model>)) {
    for loc in locations {
        for entry in walkdir::WalkDir::new(loc) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    println!("  skipped: {}", err);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                if let Err(err) = process_path(entry.path(), &mut f) {
                    println!("  unreadable {}: {}", entry.path().display(), err);
                }
            }
        }
    }
}

#[derive(Default)]
struct Census {
    models: usize,
    nodes: usize,
    animations: usize,
    warnings: usize,
    mismatches: Vec<String>,
}

/// A written model should read back into text identical to itself.
fn round_trips(model: &Model) -> bool {
    let options = ExportOptions::default();
    let first = model.to_text(&options);
    match parse_model(&first) {
        Ok(parsed) => parsed.value.to_text(&options) == first,
        Err(_) => false,
    }
}

fn main() {
    let mut census = Census::default();
    run_census(std::env::args().skip(1), |path, parsed| {
        census.models += 1;
        census.nodes += parsed.value.nodes.len();
        census.animations += parsed.value.animations.len();
        census.warnings += parsed.warnings.len();
        for warning in &parsed.warnings {
            println!("  {}", warning);
        }
        if !round_trips(&parsed.value) {
            census.mismatches.push(path.display().to_string());
        }
    });

    println!("{} models, {} nodes, {} animations, {} warnings", census.models, census.nodes, census.animations, census.warnings);
    if !census.mismatches.is_empty() {
        println!("{} models do not round trip:", census.mismatches.len());
        for path in &census.mismatches {
            println!("  {}", path);
        }
    }
}
