//! Parsing flow files and manifests into [FlowDataSet].
//!
//! A flow file starts with the number of flow cycles. Each following line is a record
//! `name length v_1 ... v_n`, where `length <= n <= cycles`.
use crate::error::DenoiseError;
use definitions::{quantize, FlowDataSet, FlowRead};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub trait Entry {
    fn entry<R: BufRead>(
        input_file: &Path,
        group: &str,
        flow_order: &str,
        reader: R,
    ) -> Result<Self, DenoiseError>
    where
        Self: Sized;
}

impl Entry for FlowDataSet {
    fn entry<R: BufRead>(
        input_file: &Path,
        group: &str,
        flow_order: &str,
        reader: R,
    ) -> Result<Self, DenoiseError> {
        let lines = reader
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line));
        let mut num_cycles = None;
        let mut reads = vec![];
        for (lineno, line) in lines {
            let line = line.map_err(|why| DenoiseError::io(input_file, why))?;
            let mut tokens = line.split_whitespace().peekable();
            if tokens.peek().is_none() {
                continue;
            }
            let cycles = match num_cycles {
                Some(cycles) => cycles,
                None => {
                    let header = tokens.next().unwrap_or_default();
                    let cycles = header.parse::<usize>().map_err(|_| {
                        DenoiseError::malformed(input_file, lineno, "cycle count is not an integer")
                    })?;
                    num_cycles = Some(cycles);
                    // Some writers put the first record on the header line.
                    if tokens.peek().is_none() {
                        continue;
                    }
                    cycles
                }
            };
            let read = parse_record(tokens, reads.len(), cycles)
                .map_err(|reason| DenoiseError::malformed(input_file, lineno, reason))?;
            reads.push(read);
        }
        let num_cycles = match num_cycles {
            Some(cycles) => cycles,
            None => return Err(DenoiseError::malformed(input_file, 1, "empty flow file")),
        };
        debug!("Input\tReadNum\t{}", reads.len());
        debug!("Input\tCycles\t{}", num_cycles);
        Ok(FlowDataSet::new(
            input_file.to_path_buf(),
            group.to_string(),
            num_cycles,
            flow_order.to_string(),
            reads,
        ))
    }
}

fn parse_record<'a, I: Iterator<Item = &'a str>>(
    mut tokens: I,
    id: usize,
    num_cycles: usize,
) -> Result<FlowRead, String> {
    let name = tokens.next().ok_or("missing read name")?.to_string();
    let length: usize = match tokens.next().map(|x| x.parse()) {
        Some(Ok(len)) => len,
        Some(Err(_)) => return Err(format!("{name}: length is not an integer")),
        None => return Err(format!("{name}: missing length")),
    };
    if num_cycles < length {
        return Err(format!(
            "{name}: length {length} exceeds the cycle count {num_cycles}"
        ));
    }
    let mut bins = Vec::with_capacity(num_cycles);
    for token in tokens {
        let intensity: f64 = token
            .parse()
            .map_err(|_| format!("{name}: {token} is not a number"))?;
        if !intensity.is_finite() {
            return Err(format!("{name}: {token} is not a finite intensity"));
        }
        bins.push(quantize(intensity));
    }
    if bins.len() < length {
        return Err(format!(
            "{name}: {} intensities for length {length}",
            bins.len()
        ));
    }
    if num_cycles < bins.len() {
        return Err(format!(
            "{name}: {} intensities for {num_cycles} cycles",
            bins.len()
        ));
    }
    bins.resize(num_cycles, 0);
    Ok(FlowRead::new(id, name, length, bins))
}

/// Open and parse a flow file. The group tag is the given one, or the stem of the file.
pub fn parse_flow_file(
    path: &Path,
    group: Option<&str>,
    flow_order: &str,
) -> Result<FlowDataSet, DenoiseError> {
    debug!("Opening {}", path.display());
    let reader = std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|why| DenoiseError::io(path, why))?;
    let group = match group {
        Some(group) => group.to_string(),
        None => group_of(path),
    };
    FlowDataSet::entry(path, &group, flow_order, reader)
}

/// The default group tag of a flow file: the file name up to the first dot.
pub fn group_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// An input of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInput {
    pub path: PathBuf,
    pub group: String,
}

impl FlowInput {
    pub fn new(path: PathBuf) -> Self {
        let group = group_of(&path);
        Self { path, group }
    }
    pub fn with_group(path: PathBuf, group: String) -> Self {
        Self { path, group }
    }
}

/// Parse a manifest: one `path [group]` per line. Empty lines and `#` comments are skipped.
/// Relative paths are resolved against the directory of the manifest.
pub fn parse_manifest(path: &Path) -> Result<Vec<FlowInput>, DenoiseError> {
    let reader = std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|why| DenoiseError::io(path, why))?;
    let base = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    let mut inputs = vec![];
    for line in reader.lines() {
        let line = line.map_err(|why| DenoiseError::io(path, why))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let file = match fields.next() {
            Some(file) => PathBuf::from(file),
            None => continue,
        };
        let file = if file.is_relative() {
            base.join(file)
        } else {
            file
        };
        match fields.next() {
            Some(group) => inputs.push(FlowInput::with_group(file, group.to_string())),
            None => inputs.push(FlowInput::new(file)),
        }
    }
    debug!("MANIFEST\t{}\t{}", path.display(), inputs.len());
    Ok(inputs)
}
