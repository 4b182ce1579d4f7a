use baked::codec::{Dict, Value};
use baked::writer::{archive_path, module_file, BakeOptions, BakedWriter};
use baked::{BakedReader, HASH_KEY};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "baked", about = "Build and inspect .baked source bundles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bake a source directory into a .baked archive
    Bake {
        package: PathBuf,
        /// Output file name (default: the directory name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// JSON encoded metadata
        #[arg(short, long, default_value = "{}")]
        metadata: String,
        /// Store a SHA-256 of all modules in the metadata
        #[arg(long)]
        hash: bool,
        /// Extension of the source files to include
        #[arg(long, default_value = "py")]
        ext: String,
        /// Additional directory names to skip
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Show archive contents, or print a single module
    Read {
        archive: PathBuf,
        /// Module to print, with or without the archive prefix
        #[arg(short, long)]
        module: Option<String>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract every module back into a source tree
    Unpack {
        archive: PathBuf,
        /// Output directory (default: the archive name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Extension given to extracted files
        #[arg(long, default_value = "py")]
        ext: String,
    },
}

#[derive(Serialize)]
struct Summary {
    path:       String,
    created:    String,
    hash_match: Option<bool>,
    metadata:   serde_json::Value,
    packages:   Vec<String>,
    modules:    Vec<ModuleSummary>,
}

#[derive(Serialize)]
struct ModuleSummary {
    name:   String,
    offset: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Bake ─────────────────────────────────────────────────────────────
        Commands::Bake { package, output, metadata, hash, ext, exclude } => {
            let mut opts = BakeOptions {
                source_extension: ext,
                hash_content: hash,
                ..BakeOptions::default()
            };
            opts.excluded_dirs.extend(exclude);

            let mut writer = BakedWriter::from_dir(&package, &opts)?;
            let json: serde_json::Value = serde_json::from_str(&metadata)?;
            writer.set_metadata(Value::from_json(json)?)?;

            let output = match output {
                Some(output) => output,
                None => writer
                    .default_file_name()
                    .map(PathBuf::from)
                    .ok_or("cannot derive an archive name from the package path; pass --output")?,
            };
            let written = writer.write_to_file(&output)?;
            println!(
                "Baked {} module(s) from {} into {}",
                writer.fragments().len(),
                package.display(),
                written.display()
            );
        }

        // ── Read ─────────────────────────────────────────────────────────────
        Commands::Read { archive, module, json } => {
            let mut reader = BakedReader::open(archive_path(&archive))?;

            if let Some(module) = module {
                let name = reader.qualify(&module);
                let source = reader
                    .read_module(&name)?
                    .ok_or_else(|| format!("Module {module} not found in {}", reader.path().display()))?;
                std::io::stdout().write_all(&source)?;
                return Ok(());
            }

            let hash_match = reader.hash_match()?;
            let packages = subpackages(&mut reader)?;
            let modules = reader.modules()?.to_vec();

            if json {
                let summary = Summary {
                    path:     reader.path().display().to_string(),
                    created:  reader.created().to_rfc3339(),
                    hash_match,
                    metadata: reader.metadata().to_json(),
                    packages,
                    modules:  modules
                        .into_iter()
                        .map(|m| ModuleSummary { name: m.name, offset: m.offset })
                        .collect(),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!("Archive:        {}", reader.path().display());
            println!("Hash supported: {}", hash_match.is_some());
            if let Some(matched) = hash_match {
                println!("Hash matched:   {matched}");
            }
            println!("Creation date:  {}", reader.created());
            println!("Metadata:");
            let mut metadata = reader.metadata();
            metadata.remove(HASH_KEY);
            print_metadata(&metadata, 1);
            println!();
            println!("Subpackages ({}):", packages.len());
            for package in &packages {
                println!("\t- {}", strip_root(reader.name(), package));
            }
            println!();
            println!("Modules ({}):", modules.len());
            for module in &modules {
                let relative = strip_root(reader.name(), &module.name);
                println!("\t- {} ({relative})", relative.replace('.', "/"));
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { archive, output, ext } => {
            let mut reader = BakedReader::open(archive_path(&archive))?;
            let output = output.unwrap_or_else(|| PathBuf::from(reader.name()));

            let modules = reader.modules()?.to_vec();
            // fail before writing anything if a name would leave the output dir
            let targets = modules
                .iter()
                .map(|m| module_file(&output, strip_root(reader.name(), &m.name), &ext))
                .collect::<baked::Result<Vec<_>>>()?;
            for (module, target) in modules.iter().zip(&targets) {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(target, reader.read_specific(module.offset)?)?;
                println!("  created {}", target.display());
            }
            println!("Unpacked {} module(s) into {}", modules.len(), output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Packages below the archive's own top level.
fn subpackages(reader: &mut BakedReader) -> baked::Result<Vec<String>> {
    let root = reader.name().to_owned();
    Ok(reader.packages()?.iter().filter(|p| **p != root).cloned().collect())
}

fn strip_root<'a>(root: &str, name: &'a str) -> &'a str {
    name.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name)
}

fn print_metadata(dict: &Dict, depth: usize) {
    let pad = "\t".repeat(depth);
    for (key, value) in dict.iter() {
        match value {
            Value::Dict(inner) => {
                println!("{pad}{key}:");
                print_metadata(inner, depth + 1);
            }
            Value::List(items) => {
                println!("{pad}{key}:");
                for item in items {
                    println!("{pad}\t- {}", render(item));
                }
            }
            other => println!("{pad}{key}: {}", render(other)),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("{s:?}"),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::DateTime(dt) => dt.to_string(),
        other => other.to_json().to_string(),
    }
}
