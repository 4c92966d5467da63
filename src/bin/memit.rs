//! Iterate a Doppler map towards the maximum entropy solution of a dataset.
//!
//! ```text
//! memit imap data niter caim omap [-r rmax] [-t tlim]
//! ```
//!
//! Relative file names are taken from `--dir` (or `DOPPLER_DIR`); names
//! without extension get `.json`. When an iteration fails, the last valid
//! map is still written to `omap` before the error is reported.
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use doppler::doppler_errors::DopplerError;
use doppler::mem::MemitParams;
use doppler::memit::{memit, MemitStatus};
use doppler::storage::{load_data, load_map, save_map, StorageConfig};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Maximum entropy iterations of a Doppler map")]
struct Args {
    /// Starting map
    imap: String,

    /// Spectra to fit
    data: String,

    /// Maximum number of iterations
    niter: usize,

    /// Reduced chi**2 to aim for
    caim: f64,

    /// Output map
    omap: String,

    /// Largest fractional change of any pixel per iteration
    #[arg(short, long, default_value_t = 0.2)]
    rmax: f64,

    /// Fractional chi**2 change below which a run at the target stops
    #[arg(short, long, default_value_t = 1.0e-4)]
    tlim: f64,

    /// Relative tolerance on caim
    #[arg(long, default_value_t = 0.005)]
    tolerance: f64,

    /// Consecutive chi**2 rises above the target before giving up
    #[arg(long, default_value_t = 5)]
    diverge_run: usize,

    /// Directory for relative file names
    #[arg(long, env = "DOPPLER_DIR", default_value = ".")]
    dir: String,

    /// Exit with status 2 if the run diverges
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let params = MemitParams::builder()
        .niter(args.niter)
        .caim(args.caim)
        .tlim(args.tlim)
        .rmax(args.rmax)
        .chi2_tolerance(args.tolerance)
        .diverge_run(args.diverge_run)
        .build()?;
    info!("{params}");

    let store = StorageConfig::new(args.dir.as_str());
    let mut map = load_map(&store, &args.imap)
        .with_context(|| format!("loading map {}", store.resolve(&args.imap)))?;
    let data = load_data(&store, &args.data)
        .with_context(|| format!("loading data {}", store.resolve(&args.data)))?;

    let outcome = match memit(&mut map, &data, &params) {
        Ok(outcome) => outcome,
        Err(err @ DopplerError::IterationFailed { .. }) => {
            let path = save_map(&store, &args.omap, &map)
                .with_context(|| format!("writing map {}", store.resolve(&args.omap)))?;
            warn!("last valid map written to {path}");
            return Err(anyhow::Error::new(err)
                .context(format!("memit stopped, last valid map written to {path}")));
        }
        Err(err) => return Err(err.into()),
    };
    let path = save_map(&store, &args.omap, &map)
        .with_context(|| format!("writing map {}", store.resolve(&args.omap)))?;

    println!(
        "{:?} after {} iterations, chi**2 = {:.6}; map written to {path}",
        outcome.status, outcome.iterations, outcome.chi2
    );

    if outcome.status == MemitStatus::Diverged {
        warn!("chi**2 diverged from the target {}", params.caim);
        if args.strict {
            return Ok(ExitCode::from(2));
        }
    }
    Ok(ExitCode::SUCCESS)
}
