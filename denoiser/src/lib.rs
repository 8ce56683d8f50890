#[macro_use]
extern crate log;
#[macro_use]
pub mod cancel;
pub mod batch;
pub mod em;
pub mod entry;
pub mod error;
pub mod finalize;
pub mod find_union;
pub mod lookup;
pub mod seed_clustering;
pub mod tau;
pub mod uniquing;

use cancel::{CancelToken, Outcome};
use definitions::{DenoisedSet, FlowDataSet};
use em::{DenoiseConfig, Denoiser};
use lookup::LookupModel;
use uniquing::Uniquing;

/// Denoise the reads of one flow file: uniquing, seed clustering, EM, and finalization.
pub fn denoise(
    mut ds: FlowDataSet,
    model: &LookupModel,
    config: &DenoiseConfig,
    token: &CancelToken,
) -> Outcome<DenoisedSet> {
    debug!("START\t{}\t{}", ds.input_file.display(), ds.reads.len());
    proceed!(ds.unique_flowgrams(token));
    let seeds = proceed!(seed_clustering::seed_otus(&ds, model, config.cutoff, token));
    let mut denoiser = Denoiser::new(&ds, model, config, &seeds);
    proceed!(denoiser.run(token));
    finalize::finalize(&mut denoiser, token)
}
