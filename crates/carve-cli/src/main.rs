//! carve CLI - inspect and rebuild model streams.
//!
//! Reads model files in the carve stream format and runs the kernel's
//! divide / facet passes over them from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use carve::io::{load_model, save_model};
use carve::model::{default_decision, DivideParams, ModelKind};
use carve::set::Membership;

#[derive(Parser)]
#[command(name = "carve")]
#[command(about = "Set-theoretic solid modelling kernel tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display information about a model file
    Info {
        /// Path to the model file
        file: PathBuf,
    },
    /// Divide a model and write the result
    Divide {
        /// Input model file
        input: PathBuf,
        /// Output model file
        output: PathBuf,
        /// Maximum subdivision depth (overrides the config file)
        #[arg(short, long)]
        depth: Option<u32>,
        /// TOML file with divide parameters
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Facet a model (divide + polygonise) and write the result
    Facet {
        /// Input model file
        input: PathBuf,
        /// Output model file
        output: PathBuf,
        /// Maximum subdivision depth (overrides the config file)
        #[arg(short, long)]
        depth: Option<u32>,
        /// TOML file with divide parameters
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Read a model and write it back out (format upgrade)
    Roundtrip {
        /// Input model file
        input: PathBuf,
        /// Output model file
        output: PathBuf,
    },
    /// Classify a point against a model
    Member {
        /// Path to the model file
        file: PathBuf,
        /// Point coordinates
        x: f64,
        /// Point coordinates
        y: f64,
        /// Point coordinates
        z: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { file } => show_info(&file),
        Commands::Divide {
            input,
            output,
            depth,
            config,
        } => {
            let params = divide_params(depth, config.as_deref())?;
            let m = load_model(&input).with_context(|| format!("reading {}", input.display()))?;
            let divided = m.divide(&params, &default_decision);
            save_model(&output, &divided)
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "divided to {} leaves (depth {})",
                divided.leaves().len(),
                divided.max_depth()
            );
            Ok(())
        }
        Commands::Facet {
            input,
            output,
            depth,
            config,
        } => {
            let params = divide_params(depth, config.as_deref())?;
            let m = load_model(&input).with_context(|| format!("reading {}", input.display()))?;
            let faceted = m.facet(&params, &default_decision);
            save_model(&output, &faceted)
                .with_context(|| format!("writing {}", output.display()))?;
            let polys: usize = faceted
                .leaves()
                .iter()
                .map(|l| l.polygons().len())
                .sum();
            println!("faceted: {polys} polygons across {} leaves", faceted.leaves().len());
            Ok(())
        }
        Commands::Roundtrip { input, output } => {
            let m = load_model(&input).with_context(|| format!("reading {}", input.display()))?;
            save_model(&output, &m).with_context(|| format!("writing {}", output.display()))?;
            println!("rewrote {} as {}", input.display(), output.display());
            Ok(())
        }
        Commands::Member { file, x, y, z } => {
            let m = load_model(&file).with_context(|| format!("reading {}", file.display()))?;
            let p = carve::geom::Point3::new(x, y, z);
            let (verdict, witness) = m.member(&p);
            match verdict {
                Membership::In => println!("in"),
                Membership::Out => println!("out"),
                Membership::Air => println!("air"),
                Membership::On => match witness {
                    Some(w) => println!("on (degree {} surface)", w.degree()),
                    None => println!("on"),
                },
            }
            Ok(())
        }
    }
}

fn divide_params(depth: Option<u32>, config: Option<&std::path::Path>) -> Result<DivideParams> {
    let mut params = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => DivideParams::default(),
    };
    if let Some(d) = depth {
        params.max_depth = d;
    }
    Ok(params)
}

fn show_info(file: &std::path::Path) -> Result<()> {
    let m = load_model(file).with_context(|| format!("reading {}", file.display()))?;
    let b = m.boxx();
    println!(
        "box: [{}, {}] x [{}, {}] x [{}, {}]",
        b.x.lo, b.x.hi, b.y.lo, b.y.hi, b.z.lo, b.z.hi
    );
    let leaves = m.leaves();
    println!(
        "{} ({} leaves, depth {})",
        match m.kind() {
            ModelKind::Leaf => "undivided",
            _ => "divided",
        },
        leaves.len(),
        m.max_depth()
    );
    let surface_leaves = leaves
        .iter()
        .filter(|l| !l.set_list().is_trivial())
        .count();
    let polygons: usize = leaves.iter().map(|l| l.polygons().len()).sum();
    println!("{surface_leaves} surface leaves, {polygons} polygons");
    println!("root set-list: {} sets, {} primitives", m.set_list().len(), m.set_list().contents());
    Ok(())
}
