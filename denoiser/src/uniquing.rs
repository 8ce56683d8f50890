//! Collapse reads with identical homopolymer calls into unique flowgrams.
use crate::cancel::{CancelToken, Outcome};
use definitions::{FlowDataSet, UniqueFlowgram};

pub trait Uniquing {
    /// Fill `uniques` and `read_to_unique`. Each read is compared with the existing uniques over
    /// their overlap; the first exact match absorbs the read, otherwise the read starts a new unique.
    fn unique_flowgrams(&mut self, token: &CancelToken) -> Outcome<()>;
}

impl Uniquing for FlowDataSet {
    fn unique_flowgrams(&mut self, token: &CancelToken) -> Outcome<()> {
        let mut uniques: Vec<UniqueFlowgram> = vec![];
        let mut read_to_unique = Vec::with_capacity(self.reads.len());
        for read in self.reads.iter() {
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            let calls = read.calls();
            let matched = uniques.iter_mut().find(|unique| {
                let overlap = unique.length.min(read.length);
                calls[..overlap] == unique.calls[..overlap]
            });
            match matched {
                Some(unique) => {
                    unique.count += 1;
                    unique.length = unique.length.max(read.length);
                    read_to_unique.push(unique.id);
                }
                None => {
                    let id = uniques.len();
                    read_to_unique.push(id);
                    uniques.push(UniqueFlowgram {
                        id,
                        representative: read.id,
                        calls,
                        count: 1,
                        length: read.length,
                    });
                }
            }
        }
        debug!("UNIQUE\t{}\t{}", self.reads.len(), uniques.len());
        self.uniques = uniques;
        self.read_to_unique = read_to_unique;
        Outcome::Finished(())
    }
}
