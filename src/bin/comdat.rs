//! Compute the spectra a map predicts on the layout of a template dataset.
//!
//! ```text
//! comdat map template output [--seed N]
//! ```
//!
//! With `--seed`, Gaussian noise of each point's uncertainty is added.
use anyhow::Context;
use clap::Parser;
use doppler::storage::{load_data, load_map, save_data, StorageConfig};
use doppler::synthetic::{synthesize, synthesize_with_noise};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Parser, Debug)]
#[command(author, version, about = "Predicted spectra of a Doppler map")]
struct Args {
    /// Map to project
    map: String,

    /// Dataset supplying phases, wavelengths, resolution and uncertainties
    template: String,

    /// Output dataset
    output: String,

    /// Add noise drawn with this seed
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for relative file names
    #[arg(long, env = "DOPPLER_DIR", default_value = ".")]
    dir: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let store = StorageConfig::new(args.dir.as_str());
    let map = load_map(&store, &args.map)
        .with_context(|| format!("loading map {}", store.resolve(&args.map)))?;
    let template = load_data(&store, &args.template)
        .with_context(|| format!("loading data {}", store.resolve(&args.template)))?;

    let data = match args.seed {
        Some(seed) => {
            info!("adding noise with seed {seed}");
            synthesize_with_noise(&map, &template, &mut StdRng::seed_from_u64(seed))?
        }
        None => synthesize(&map, &template)?,
    };

    let path = save_data(&store, &args.output, &data)?;
    println!("{} spectra written to {path}", data.len());
    Ok(())
}
