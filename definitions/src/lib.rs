//! Definitions -- A tiny interface for flowgram denoising.
//! Every stage of the denoiser reads and writes the structures defined here. The whole input of one flow file is packed into [FlowDataSet](FlowDataSet), and the result of the denoising into [DenoisedSet](DenoisedSet). Both are serializable so that a run can be dumped into JSON and inspected.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The number of quantized intensity bins (0.00 to 9.99).
pub const NUMBINS: usize = 1000;
/// The number of homopolymer lengths modeled (0..HOMOPS).
pub const HOMOPS: usize = 10;
/// The flow order of the 454 instruments.
pub const DEFAULT_FLOW_ORDER: &str = "TACG";
/// The number of leading bases (the key) removed from every output sequence.
pub const KEY_LENGTH: usize = 4;

/// Quantize a raw flow intensity into a bin in `0..NUMBINS`.
pub fn quantize(intensity: f64) -> u16 {
    let clamped = intensity.clamp(0f64, 9.99);
    ((clamped * 100f64).round() as u16).min(NUMBINS as u16 - 1)
}

/// The homopolymer call of a quantized intensity. Calls longer than the model are clamped.
pub fn call_of(bin: u16) -> u8 {
    (((bin as usize + 50) / 100).min(HOMOPS - 1)) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowRead {
    /// The id of the read. It is the index of the read in the flow file.
    pub id: usize,
    /// Name of the read, as written in the flow file.
    pub name: String,
    /// The number of trustworthy flow cycles.
    pub length: usize,
    /// Quantized intensities. Padded with zero up to the cycle count of the file.
    pub bins: Vec<u16>,
}

impl FlowRead {
    pub fn new(id: usize, name: String, length: usize, bins: Vec<u16>) -> Self {
        Self {
            id,
            name,
            length,
            bins,
        }
    }
    pub fn calls(&self) -> Vec<u8> {
        self.bins.iter().map(|&b| call_of(b)).collect()
    }
}

impl std::fmt::Display for FlowRead {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let bins: Vec<_> = self.bins[..self.length]
            .iter()
            .map(|b| format!("{}.{:02}", b / 100, b % 100))
            .collect();
        write!(f, "{}\t{}\t{}", self.name, self.length, bins.join(" "))
    }
}

/// A set of reads sharing identical homopolymer calls on their overlap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UniqueFlowgram {
    pub id: usize,
    /// The id of the first read creating this unique flowgram.
    pub representative: usize,
    /// Homopolymer calls of the representative, for every cycle.
    pub calls: Vec<u8>,
    /// The number of reads merged into this flowgram.
    pub count: usize,
    /// The longest length among the member reads.
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDataSet {
    pub input_file: PathBuf,
    /// Group tag written in the group file. Usually the stem of the flow file.
    pub group: String,
    /// The number of flow cycles declared in the header of the file.
    pub num_cycles: usize,
    pub flow_order: String,
    pub reads: Vec<FlowRead>,
    pub uniques: Vec<UniqueFlowgram>,
    /// If read_to_unique[i] = j, the i-th read belongs to the j-th unique flowgram.
    pub read_to_unique: Vec<usize>,
}

impl FlowDataSet {
    pub fn new(
        input_file: PathBuf,
        group: String,
        num_cycles: usize,
        flow_order: String,
        reads: Vec<FlowRead>,
    ) -> Self {
        Self {
            input_file,
            group,
            num_cycles,
            flow_order,
            reads,
            uniques: vec![],
            read_to_unique: vec![],
        }
    }
    pub fn is_uniqued(&self) -> bool {
        self.read_to_unique.len() == self.reads.len() && !self.reads.is_empty()
    }
    /// The representative read of a unique flowgram.
    pub fn representative(&self, unique: usize) -> &FlowRead {
        &self.reads[self.uniques[unique].representative]
    }
}

/// Operational taxonomic unit refined by the EM loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Otu {
    pub id: usize,
    /// The id of the unique flowgram serving as the centroid.
    pub centroid: Option<usize>,
    pub weight: f64,
    /// True if the centroid changed in the last round.
    pub changed: bool,
}

impl Otu {
    pub fn seeded(id: usize) -> Self {
        Self {
            id,
            centroid: None,
            weight: 0f64,
            changed: true,
        }
    }
}

/// Summary of one EM round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IterationStats {
    pub iteration: usize,
    pub max_delta: f64,
    pub neg_log_likelihood: f64,
    pub live_otus: usize,
}

/// An OTU after hard assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenoisedOtu {
    pub otu: usize,
    /// The unique flowgram chosen as the centroid.
    pub centroid: usize,
    /// Member read ids, in increasing order.
    pub members: Vec<usize>,
    /// The reconstructed consensus, key trimmed.
    pub sequence: String,
    /// Phred-like quality of each base of `sequence`.
    pub qualities: Vec<u8>,
    /// Sequence of each member, decoded from its own calls and key trimmed.
    pub member_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenoisedSet {
    pub input_file: PathBuf,
    pub group: String,
    /// Read names, indexed by read id.
    pub read_names: Vec<String>,
    pub otus: Vec<DenoisedOtu>,
    pub summary: RunSummary,
}

impl DenoisedSet {
    pub fn name_of(&self, read: usize) -> &str {
        &self.read_names[read]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunSummary {
    pub input_file: PathBuf,
    pub reads: usize,
    pub uniques: usize,
    pub seeds: usize,
    pub otus: usize,
    pub iterations: usize,
    pub max_delta: f64,
    pub neg_log_likelihood: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn quantize_test() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.004), 100);
        assert_eq!(quantize(1.006), 101);
        assert_eq!(quantize(12.5), 999);
        assert_eq!(quantize(-0.3), 0);
    }
    #[test]
    fn call_test() {
        assert_eq!(call_of(0), 0);
        assert_eq!(call_of(49), 0);
        assert_eq!(call_of(50), 1);
        assert_eq!(call_of(149), 1);
        assert_eq!(call_of(150), 2);
        assert_eq!(call_of(999), (HOMOPS - 1) as u8);
    }
    #[test]
    fn display_read() {
        let read = FlowRead::new(0, "r1".to_string(), 2, vec![103, 7, 0]);
        assert_eq!(format!("{}", read), "r1\t2\t1.03 0.07");
    }
    #[test]
    fn serialize_dataset() {
        let read = FlowRead::new(0, "r1".to_string(), 1, vec![100]);
        let ds = FlowDataSet::new(
            PathBuf::from("a.flow"),
            "a".to_string(),
            1,
            DEFAULT_FLOW_ORDER.to_string(),
            vec![read],
        );
        let json = serde_json::to_string(&ds).unwrap();
        let back: FlowDataSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.reads, ds.reads);
        assert!(!back.is_uniqued());
    }
}
