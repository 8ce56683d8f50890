//! Pipelines -- the whole run of the denoiser, configured by a TOML file.
//!
//! The `denoise` subcommand and the `pipeline` subcommand share [run_denoise]; the latter
//! reads every parameter from a [PipelineConfig].
use denoiser::batch::{run_batch, BatchConfig};
use denoiser::cancel::{CancelToken, Outcome};
use denoiser::em::DenoiseConfig;
use denoiser::entry::{parse_manifest, FlowInput};
use denoiser::lookup::LookupModel;
use serde::{Deserialize, Serialize};
extern crate log;
use log::*;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// The configuration of the pipeline.
/// This struct is a comprehensive list of the parameters that can be set by a user.
/// The other parameters of the algorithm are hard-coded.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PipelineConfig {
    /// Flow files. Ignored if `manifest` is given.
    #[serde(default)]
    inputs: Vec<PathBuf>,
    /// A file listing `path [group]` per line.
    #[serde(default)]
    manifest: Option<PathBuf>,
    /// The calibration table.
    lookup: PathBuf,
    /// The path to the output directory.
    out_dir: PathBuf,
    prefix: String,
    verbose: usize,
    threads: usize,
    cutoff: f64,
    sigma: f64,
    min_delta: f64,
    max_iterations: usize,
    flow_order: String,
    #[serde(default)]
    shard_size: Option<usize>,
    #[serde(default)]
    report: Option<PathBuf>,
}

pub fn set_logger(verbose: usize) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

pub fn run_pipeline(config: &PipelineConfig, token: &CancelToken) -> std::io::Result<()> {
    let PipelineConfig {
        inputs,
        manifest,
        lookup,
        out_dir,
        prefix,
        verbose,
        threads,
        cutoff,
        sigma,
        min_delta,
        max_iterations,
        flow_order,
        shard_size,
        report,
    } = config.clone();
    set_logger(verbose);
    let inputs = match manifest {
        Some(manifest) => parse_manifest(&manifest)?,
        None => inputs.into_iter().map(FlowInput::new).collect(),
    };
    let config =
        DenoiseConfig::new(cutoff, sigma, min_delta, max_iterations).with_flow_order(&flow_order);
    let mut batch = BatchConfig::new(threads, out_dir, &prefix);
    batch.shard_size = shard_size;
    run_denoise(&inputs, &lookup, &config, &batch, report.as_deref(), token)
}

/// Load the calibration table, run the batch, and write the report if asked.
pub fn run_denoise(
    inputs: &[FlowInput],
    lookup: &Path,
    config: &DenoiseConfig,
    batch: &BatchConfig,
    report: Option<&Path>,
    token: &CancelToken,
) -> std::io::Result<()> {
    if inputs.is_empty() {
        warn!("No flow file is given.");
        return Ok(());
    }
    let model = LookupModel::from_path(lookup)?;
    debug!("{:?}", config);
    debug!("{:?}", batch);
    let report_body = match run_batch(inputs, &model, config, batch, token)? {
        Outcome::Finished(report_body) => report_body,
        Outcome::Cancelled => {
            error!("Interrupted. No output is written.");
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "cancelled",
            ));
        }
    };
    for file in report_body.files.iter() {
        info!("{}\t{}\t{:?}", file.input.display(), file.group, file.status);
    }
    if 0 < report_body.num_skipped() {
        warn!("{} files were skipped.", report_body.num_skipped());
    }
    if let Some(path) = report {
        let mut wtr = std::fs::File::create(path).map(BufWriter::new)?;
        report_body.write_json(&mut wtr)?;
        wtr.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn parse_profile() {
        let profile = r#"
manifest = "samples.txt"
lookup = "LookUp_Titanium.pat"
out_dir = "result"
prefix = "run"
verbose = 1
threads = 4
cutoff = 0.01
sigma = 60.0
min_delta = 0.000001
max_iterations = 1000
flow_order = "TACG"
shard_size = 5000
"#;
        let config: PipelineConfig = toml::from_str(profile).unwrap();
        assert!(config.inputs.is_empty());
        assert_eq!(config.manifest, Some(PathBuf::from("samples.txt")));
        assert_eq!(config.shard_size, Some(5000));
        assert_eq!(config.report, None);
        assert_eq!(config.threads, 4);
    }
}
