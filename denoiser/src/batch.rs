//! Running the denoiser over many flow files.
//!
//! Each input is processed by a worker of a rayon pool and written into private fragment
//! files `{prefix}.{index}.shhh.*`. After every worker returns, the fragments are concatenated
//! in the order of the inputs into `{prefix}.shhh.*`. Shards of the i-th input are
//! `{prefix}.{i}.{k}.flow`.
use crate::cancel::{CancelToken, Outcome};
use crate::em::DenoiseConfig;
use crate::entry::{parse_flow_file, FlowInput};
use crate::error::DenoiseError;
use crate::finalize::{output_path, write_outputs, SUFFIXES};
use crate::lookup::LookupModel;
use definitions::{DenoisedSet, RunSummary};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchConfig {
    pub threads: usize,
    pub out_dir: PathBuf,
    pub prefix: String,
    /// If set, each flow file is split into shards of at most this many reads.
    pub shard_size: Option<usize>,
}

impl std::default::Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            out_dir: PathBuf::from("."),
            prefix: "pyrodenoise".to_string(),
            shard_size: None,
        }
    }
}

impl BatchConfig {
    pub fn new(threads: usize, out_dir: PathBuf, prefix: &str) -> Self {
        Self {
            threads,
            out_dir,
            prefix: prefix.to_string(),
            shard_size: None,
        }
    }
    pub fn with_shard_size(mut self, shard_size: usize) -> Self {
        self.shard_size = Some(shard_size);
        self
    }
    fn prefix_path(&self) -> PathBuf {
        self.out_dir.join(&self.prefix)
    }
    fn fragment_prefix(&self, index: usize) -> PathBuf {
        self.out_dir.join(format!("{}.{}", self.prefix, index))
    }
    fn shard_stem(&self, input: usize) -> String {
        format!("{}.{}", self.prefix, input)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FileStatus {
    Denoised(RunSummary),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileReport {
    pub input: PathBuf,
    pub group: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    /// The composite output files.
    pub outputs: Vec<PathBuf>,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn summaries(&self) -> Vec<&RunSummary> {
        self.files
            .iter()
            .filter_map(|f| match &f.status {
                FileStatus::Denoised(summary) => Some(summary),
                FileStatus::Skipped(_) => None,
            })
            .collect()
    }
    pub fn num_skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Skipped(_)))
            .count()
    }
    /// Dump the summaries of the denoised files as JSON.
    pub fn write_json<W: Write>(&self, wtr: W) -> std::io::Result<()> {
        serde_json::to_writer_pretty(wtr, &self.summaries())?;
        Ok(())
    }
}

/// Parse and denoise one flow file.
pub fn denoise_file(
    input: &FlowInput,
    model: &LookupModel,
    config: &DenoiseConfig,
    token: &CancelToken,
) -> Result<Outcome<DenoisedSet>, DenoiseError> {
    let ds = parse_flow_file(&input.path, Some(input.group.as_str()), &config.flow_order)?;
    Ok(crate::denoise(ds, model, config, token))
}

/// Split a flow file into shards of at most `size` reads, each with the header of the file.
/// The shards are `{stem}.{k}.flow` under `out_dir`. An existing file is never overwritten:
/// the split fails and the shards written so far are removed.
pub fn split_flow_file(
    path: &Path,
    size: usize,
    out_dir: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>, DenoiseError> {
    let size = size.max(1);
    let reader = std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|why| DenoiseError::io(path, why))?;
    let mut header = None;
    let mut records = vec![];
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|why| DenoiseError::io(path, why))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match header {
            Some(_) => records.push(line.to_string()),
            None => {
                let (cycles, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
                if cycles.parse::<usize>().is_err() {
                    let reason = "cycle count is not an integer";
                    return Err(DenoiseError::malformed(path, idx + 1, reason));
                }
                header = Some(cycles.to_string());
                if !rest.trim().is_empty() {
                    records.push(rest.trim().to_string());
                }
            }
        }
    }
    let header = header.ok_or_else(|| DenoiseError::malformed(path, 1, "empty flow file"))?;
    std::fs::create_dir_all(out_dir).map_err(|why| DenoiseError::io(out_dir, why))?;
    let mut shards = vec![];
    for (k, chunk) in records.chunks(size).enumerate() {
        let shard = out_dir.join(format!("{stem}.{k}.flow"));
        if let Err(why) = write_shard(&shard, &header, chunk) {
            shards.iter().for_each(|s: &PathBuf| remove_if_exists(s));
            return Err(why);
        }
        shards.push(shard);
    }
    debug!("SPLIT\t{}\t{}\t{}", path.display(), records.len(), shards.len());
    Ok(shards)
}

fn write_shard(shard: &Path, header: &str, records: &[String]) -> Result<(), DenoiseError> {
    // `create_new` refuses to clobber an existing file, the input itself included.
    let mut wtr = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(shard)
        .map(BufWriter::new)
        .map_err(|why| DenoiseError::io(shard, why))?;
    let written: std::io::Result<()> = (|| {
        writeln!(wtr, "{}", header)?;
        for record in records {
            writeln!(wtr, "{}", record)?;
        }
        wtr.flush()
    })();
    written.map_err(|why| {
        drop(wtr);
        remove_if_exists(shard);
        DenoiseError::io(shard, why)
    })
}

/// Run `job` on every input with a pool of `threads` workers.
/// A pool that can not be built, or a panicking worker, is a `WorkerSpawnFailure`.
fn distribute<T, F>(
    inputs: &[FlowInput],
    threads: usize,
    job: &F,
) -> Result<Vec<T>, DenoiseError>
where
    T: Send,
    F: Fn(usize, &FlowInput) -> T + Sync,
{
    let spawn_failure = |reason: String| DenoiseError::WorkerSpawnFailure { threads, reason };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|why| spawn_failure(why.to_string()))?;
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        pool.install(|| {
            inputs
                .par_iter()
                .enumerate()
                .map(|(idx, input)| job(idx, input))
                .collect::<Vec<_>>()
        })
    }));
    result.map_err(|why| {
        let reason = why
            .downcast_ref::<&str>()
            .map(|x| x.to_string())
            .or_else(|| why.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "a worker panicked".to_string());
        spawn_failure(reason)
    })
}

/// `distribute`, retried once on a smaller pool. `cleanup` runs after each failed attempt.
fn distribute_with_retry<T, F, C>(
    inputs: &[FlowInput],
    threads: usize,
    job: &F,
    cleanup: C,
) -> Result<Vec<T>, DenoiseError>
where
    T: Send,
    F: Fn(usize, &FlowInput) -> T + Sync,
    C: Fn(),
{
    let threads = threads.max(1);
    match distribute(inputs, threads, job) {
        Ok(result) => Ok(result),
        Err(why) => {
            warn!("{}", why);
            cleanup();
            let fewer = (threads / 2).max(1);
            info!("BATCH\tRetry\t{}", fewer);
            distribute(inputs, fewer, job).map_err(|why| {
                cleanup();
                why
            })
        }
    }
}

enum JobOutcome {
    Denoised(RunSummary),
    Skipped(String),
    Cancelled,
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(why) = std::fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), why);
        }
    }
}

fn remove_fragments(config: &BatchConfig, num_inputs: usize) {
    for idx in 0..num_inputs {
        let prefix = config.fragment_prefix(idx);
        for suffix in SUFFIXES {
            remove_if_exists(&output_path(&prefix, suffix));
        }
    }
}

/// Denoise every input and merge the results into `{out_dir}/{prefix}.shhh.*`.
/// A malformed flow file is skipped. Cancellation removes every intermediate file and
/// writes no composite.
pub fn run_batch(
    inputs: &[FlowInput],
    model: &LookupModel,
    config: &DenoiseConfig,
    batch: &BatchConfig,
    token: &CancelToken,
) -> Result<Outcome<BatchReport>, DenoiseError> {
    config.validate()?;
    run_batch_with(inputs, batch, token, |input: &FlowInput| {
        denoise_file(input, model, config, token)
    })
}

fn run_batch_with<P>(
    inputs: &[FlowInput],
    batch: &BatchConfig,
    token: &CancelToken,
    process: P,
) -> Result<Outcome<BatchReport>, DenoiseError>
where
    P: Fn(&FlowInput) -> Result<Outcome<DenoisedSet>, DenoiseError> + Sync,
{
    let created_out_dir = !batch.out_dir.exists();
    std::fs::create_dir_all(&batch.out_dir)
        .map_err(|why| DenoiseError::io(&batch.out_dir, why))?;
    // Remove the output directory if this run created it and left nothing in it.
    let restore_out_dir = || {
        if created_out_dir {
            if let Err(why) = std::fs::remove_dir(&batch.out_dir) {
                debug!("BATCH\tKeep\t{}\t{}", batch.out_dir.display(), why);
            }
        }
    };
    let mut shards = vec![];
    let jobs: Vec<FlowInput> = match batch.shard_size {
        Some(size) => {
            let mut jobs = vec![];
            for (idx, input) in inputs.iter().enumerate() {
                let stem = batch.shard_stem(idx);
                let split = match split_flow_file(&input.path, size, &batch.out_dir, &stem) {
                    Ok(split) => split,
                    Err(why) => {
                        shards.iter().for_each(|s: &PathBuf| remove_if_exists(s));
                        restore_out_dir();
                        return Err(why);
                    }
                };
                for shard in split {
                    jobs.push(FlowInput::with_group(shard.clone(), input.group.clone()));
                    shards.push(shard);
                }
            }
            jobs
        }
        None => inputs.to_vec(),
    };
    debug!("BATCH\tStart\t{}\t{}", jobs.len(), batch.threads);
    let job = |idx: usize, input: &FlowInput| -> Result<JobOutcome, DenoiseError> {
        if token.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }
        let set = match process(input) {
            Ok(Outcome::Finished(set)) => set,
            Ok(Outcome::Cancelled) => return Ok(JobOutcome::Cancelled),
            Err(why) if why.is_malformed() => {
                warn!("Skipping {}", why);
                return Ok(JobOutcome::Skipped(why.to_string()));
            }
            Err(why) => return Err(why),
        };
        let prefix = batch.fragment_prefix(idx);
        write_outputs(&set, &prefix).map_err(|why| DenoiseError::io(&prefix, why))?;
        info!(
            "BATCH\tDone\t{}\t{}\t{}",
            input.path.display(),
            set.summary.reads,
            set.summary.otus
        );
        Ok(JobOutcome::Denoised(set.summary))
    };
    let cleanup = || remove_fragments(batch, jobs.len());
    let discard = |shards: &[PathBuf]| {
        cleanup();
        shards.iter().for_each(|s| remove_if_exists(s));
        restore_out_dir();
    };
    let results = match distribute_with_retry(&jobs, batch.threads, &job, cleanup) {
        Ok(results) => results,
        Err(why) => {
            discard(&shards);
            return Err(why);
        }
    };
    if token.is_cancelled() || results.iter().any(|r| matches!(r, Ok(JobOutcome::Cancelled))) {
        info!("BATCH\tCancelled");
        discard(&shards);
        return Ok(Outcome::Cancelled);
    }
    let mut outcomes = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(why) => {
                discard(&shards);
                return Err(why);
            }
        }
    }
    let outputs = merge_fragments(batch, &outcomes).map_err(|why| {
        discard(&shards);
        why
    })?;
    shards.iter().for_each(|s| remove_if_exists(s));
    let files = jobs
        .iter()
        .zip(outcomes)
        .map(|(input, outcome)| FileReport {
            input: input.path.clone(),
            group: input.group.clone(),
            status: match outcome {
                JobOutcome::Denoised(summary) => FileStatus::Denoised(summary),
                JobOutcome::Skipped(reason) => FileStatus::Skipped(reason),
                JobOutcome::Cancelled => FileStatus::Skipped("cancelled".to_string()),
            },
        })
        .collect();
    Ok(Outcome::Finished(BatchReport { outputs, files }))
}

fn merge_fragments(
    batch: &BatchConfig,
    outcomes: &[JobOutcome],
) -> Result<Vec<PathBuf>, DenoiseError> {
    let prefix = batch.prefix_path();
    let mut outputs = vec![];
    for suffix in SUFFIXES {
        let path = output_path(&prefix, suffix);
        let mut wtr = std::fs::File::create(&path)
            .map(BufWriter::new)
            .map_err(|why| DenoiseError::io(&path, why))?;
        for (idx, outcome) in outcomes.iter().enumerate() {
            if !matches!(outcome, JobOutcome::Denoised(_)) {
                continue;
            }
            let fragment = output_path(&batch.fragment_prefix(idx), suffix);
            let mut rdr = std::fs::File::open(&fragment)
                .map(BufReader::new)
                .map_err(|why| DenoiseError::io(&fragment, why))?;
            std::io::copy(&mut rdr, &mut wtr).map_err(|why| DenoiseError::io(&path, why))?;
            drop(rdr);
            remove_if_exists(&fragment);
        }
        wtr.flush().map_err(|why| DenoiseError::io(&path, why))?;
        outputs.push(path);
    }
    debug!("BATCH\tMerged\t{}", prefix.display());
    Ok(outputs)
}
