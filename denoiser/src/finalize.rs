//! Hard assignment, quality scores, and translation from flow space into bases.
use crate::cancel::{CancelToken, Outcome};
use crate::em::Denoiser;
use definitions::{DenoisedOtu, DenoisedSet, FlowDataSet, RunSummary, HOMOPS, KEY_LENGTH};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// The largest quality value.
pub const MAX_QUALITY: u8 = 100;
/// Emitted instead of a consensus shorter than the key.
pub const SHORT_PLACEHOLDER: &str = "NNNN";
/// Suffixes of the output files, in the order they are written.
pub const SUFFIXES: [&str; 5] = ["fasta", "qual", "names", "groups", "counts"];

/// Decode homopolymer calls into bases. The c-th cycle emits `flow_order[c % |flow_order|]`
/// as many times as its call.
pub fn decode(calls: &[u8], length: usize, flow_order: &[u8]) -> Vec<u8> {
    if flow_order.is_empty() {
        return vec![];
    }
    calls
        .iter()
        .take(length)
        .enumerate()
        .flat_map(|(cycle, &call)| {
            let base = flow_order[cycle % flow_order.len()];
            std::iter::repeat(base).take(call as usize)
        })
        .collect()
}

/// Drop the key from a decoded sequence.
pub fn trim_key(seq: &[u8]) -> String {
    match seq.len() < KEY_LENGTH {
        true => SHORT_PLACEHOLDER.to_string(),
        false => String::from_utf8_lossy(&seq[KEY_LENGTH..]).to_string(),
    }
}

fn to_quality(cumulative: f64) -> u8 {
    if cumulative <= 0f64 {
        return MAX_QUALITY;
    }
    let value = (-10f64 * cumulative.log10()).floor();
    value.clamp(0f64, MAX_QUALITY as f64) as u8
}

/// Quality values of the bases of an OTU, key included. One value per called base.
/// `members` are (read, tau) pairs.
pub fn qualities(
    denoiser: &Denoiser,
    centroid: usize,
    members: &[(usize, f64)],
) -> Vec<u8> {
    let ds = denoiser.dataset();
    let model = denoiser.model();
    let unique = &ds.uniques[centroid];
    let mut qualities = vec![];
    let mut pr = [0f64; HOMOPS];
    for cycle in 0..unique.length {
        pr.iter_mut().for_each(|x| *x = 0f64);
        for &(read, tau) in members.iter() {
            let bin = ds.reads[read].bins[cycle] as usize;
            for (s, x) in pr.iter_mut().enumerate() {
                *x += tau * model.single(s, bin);
            }
        }
        // Costs are -log; shift by the smallest before exponentiating.
        let offset = pr.iter().copied().fold(f64::INFINITY, f64::min);
        let probs: Vec<_> = pr.iter().map(|&x| (offset - x).exp()).collect();
        let norm: f64 = probs.iter().sum();
        let call = unique.calls[cycle] as usize;
        let mut cumulative = 0f64;
        for s in 1..=call {
            cumulative += probs[s - 1] / norm;
            qualities.push(to_quality(cumulative));
        }
    }
    qualities
}

/// Hard-assign the reads and summarize each nonempty OTU.
pub fn finalize(denoiser: &mut Denoiser, token: &CancelToken) -> Outcome<DenoisedSet> {
    let num_seeds = denoiser.otus().len();
    proceed!(denoiser.harden(token));
    let ds: &FlowDataSet = denoiser.dataset();
    let flow_order = ds.flow_order.as_bytes();
    let mut otus = vec![];
    for otu in denoiser.otus().iter() {
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        let members: Vec<(usize, f64)> = denoiser
            .membership()
            .of_otu(otu.id)
            .iter()
            .map(|&e| {
                let entry = denoiser.tau().entry(e);
                (entry.read, entry.tau)
            })
            .collect();
        if members.is_empty() {
            continue;
        }
        let centroid = match otu.centroid {
            Some(centroid) => centroid,
            None => {
                warn!("FINAL\tNoCentroid\t{}\t{}", otu.id, members.len());
                continue;
            }
        };
        let unique = &ds.uniques[centroid];
        let seq = decode(&unique.calls, unique.length, flow_order);
        let sequence = trim_key(&seq);
        let qualities = match seq.len() < KEY_LENGTH {
            true => vec![],
            false => qualities(denoiser, centroid, &members)[KEY_LENGTH..].to_vec(),
        };
        let member_sequences = members
            .iter()
            .map(|&(read, _)| {
                let read = &ds.reads[read];
                trim_key(&decode(&read.calls(), read.length, flow_order))
            })
            .collect();
        let members: Vec<_> = members.iter().map(|&(read, _)| read).collect();
        trace!("FINAL\t{}\t{}\t{}", otu.id, centroid, members.len());
        otus.push(DenoisedOtu {
            otu: otu.id,
            centroid,
            members,
            sequence,
            qualities,
            member_sequences,
        });
    }
    let last = denoiser.trace().last();
    let summary = RunSummary {
        input_file: ds.input_file.clone(),
        reads: ds.reads.len(),
        uniques: ds.uniques.len(),
        seeds: num_seeds,
        otus: otus.len(),
        iterations: denoiser.iterations(),
        max_delta: last.map(|s| s.max_delta).unwrap_or_default(),
        neg_log_likelihood: last.map(|s| s.neg_log_likelihood).unwrap_or_default(),
    };
    debug!(
        "FINAL\t{}\t{}\t{}",
        ds.input_file.display(),
        summary.reads,
        summary.otus
    );
    Outcome::Finished(DenoisedSet {
        input_file: ds.input_file.clone(),
        group: ds.group.clone(),
        read_names: ds.reads.iter().map(|r| r.name.clone()).collect(),
        otus,
        summary,
    })
}

pub fn write_fasta<W: Write>(set: &DenoisedSet, wtr: W) -> std::io::Result<()> {
    let mut wtr = bio_utils::fasta::Writer::new(wtr);
    for otu in set.otus.iter() {
        let name = set.name_of(otu.members[0]);
        let record = bio_utils::fasta::Record::with_data(name, &None, otu.sequence.as_bytes());
        wtr.write_record(&record)?;
    }
    Ok(())
}

pub fn write_qualities<W: Write>(set: &DenoisedSet, mut wtr: W) -> std::io::Result<()> {
    for otu in set.otus.iter() {
        writeln!(wtr, ">{}", set.name_of(otu.members[0]))?;
        let values: Vec<_> = otu.qualities.iter().map(|q| q.to_string()).collect();
        writeln!(wtr, "{}", values.join(" "))?;
    }
    Ok(())
}

pub fn write_names<W: Write>(set: &DenoisedSet, mut wtr: W) -> std::io::Result<()> {
    for otu in set.otus.iter() {
        let names: Vec<_> = otu.members.iter().map(|&r| set.name_of(r)).collect();
        writeln!(wtr, "{}\t{}", names[0], names.join(","))?;
    }
    Ok(())
}

pub fn write_groups<W: Write>(set: &DenoisedSet, mut wtr: W) -> std::io::Result<()> {
    for name in set.read_names.iter() {
        writeln!(wtr, "{}\t{}", name, set.group)?;
    }
    Ok(())
}

/// The OTU report: the ideal sequence and the sequence of every member.
pub fn write_counts<W: Write>(set: &DenoisedSet, mut wtr: W) -> std::io::Result<()> {
    for otu in set.otus.iter() {
        writeln!(wtr, ">{}", otu.otu)?;
        writeln!(wtr, "ideal\t{}", otu.sequence)?;
        for (&read, seq) in otu.members.iter().zip(otu.member_sequences.iter()) {
            writeln!(wtr, "{}\t{}", set.name_of(read), seq)?;
        }
        writeln!(wtr)?;
    }
    Ok(())
}

/// The path of an output file: `{prefix}.shhh.{suffix}`.
pub fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!(".shhh.{suffix}"));
    PathBuf::from(name)
}

/// Write the five output files next to `prefix`.
pub fn write_outputs(set: &DenoisedSet, prefix: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for suffix in SUFFIXES {
        let path = output_path(prefix, suffix);
        let mut wtr = std::fs::File::create(&path).map(BufWriter::new)?;
        match suffix {
            "fasta" => write_fasta(set, &mut wtr)?,
            "qual" => write_qualities(set, &mut wtr)?,
            "names" => write_names(set, &mut wtr)?,
            "groups" => write_groups(set, &mut wtr)?,
            _ => write_counts(set, &mut wtr)?,
        }
        wtr.flush()?;
        paths.push(path);
    }
    Ok(paths)
}
