//! The EM refinement of OTU centroids.
//!
//! Each OTU holds a centroid, an observed unique flowgram, and a weight. Reads are softly
//! assigned to OTUs (tau) according to `weight * exp(-sigma * distance)`. Every round
//! recomputes the centroids as tau-weighted medoids, updates the weights, merges duplicated
//! OTUs, and reassigns the reads, until the weights stop moving.
use crate::cancel::{CancelToken, Outcome};
use crate::error::DenoiseError;
use crate::lookup::LookupModel;
use crate::seed_clustering::Seeds;
use crate::tau::{Membership, TauTable};
use definitions::{FlowDataSet, IterationStats, Otu, DEFAULT_FLOW_ORDER};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// An OTU with aggregate tau no more than this value loses its centroid.
pub const MIN_COUNT: f64 = 0.1;
/// An OTU with weight no more than this value is dead.
pub const MIN_WEIGHT: f64 = 0.1;
/// Tau values no more than this value are not stored.
pub const MIN_TAU: f64 = 0.0001;
/// The minimum number of rounds.
pub const MIN_ITER: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenoiseConfig {
    /// Distance cutoff of the seed clustering.
    pub cutoff: f64,
    /// Sharpness of the soft assignment.
    pub sigma: f64,
    /// The rounds stop when no weight moves more than this value.
    pub min_delta: f64,
    pub max_iterations: usize,
    pub flow_order: String,
}

impl std::default::Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.01,
            sigma: 60f64,
            min_delta: 0.000001,
            max_iterations: 1000,
            flow_order: DEFAULT_FLOW_ORDER.to_string(),
        }
    }
}

impl DenoiseConfig {
    pub fn new(cutoff: f64, sigma: f64, min_delta: f64, max_iterations: usize) -> Self {
        Self {
            cutoff,
            sigma,
            min_delta,
            max_iterations,
            ..Default::default()
        }
    }
    pub fn with_flow_order(mut self, flow_order: &str) -> Self {
        self.flow_order = flow_order.to_string();
        self
    }
    /// Reject parameters the denoiser can not run with.
    pub fn validate(&self) -> Result<(), DenoiseError> {
        let invalid = |reason: String| Err(DenoiseError::InvalidConfig(reason));
        if self.flow_order.is_empty() {
            return invalid("empty flow order".to_string());
        }
        if !self.flow_order.bytes().all(|b| b.is_ascii_alphabetic()) {
            return invalid(format!("flow order {:?} is not a string of bases", self.flow_order));
        }
        if !(self.sigma.is_finite() && 0f64 < self.sigma) {
            return invalid(format!("sigma {} is not positive", self.sigma));
        }
        if !(self.cutoff.is_finite() && 0f64 <= self.cutoff) {
            return invalid(format!("cutoff {} is negative", self.cutoff));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoiseState {
    Seeded,
    Iterating,
    Converged,
}

/// The mean of -log P(read bin | centroid call) over the read.
pub fn distance_to_centroid(
    ds: &FlowDataSet,
    model: &LookupModel,
    centroid: usize,
    read: usize,
) -> f64 {
    let read = &ds.reads[read];
    if read.length == 0 {
        return 0f64;
    }
    let calls = &ds.uniques[centroid].calls[..read.length];
    let sum: f64 = calls
        .iter()
        .zip(read.bins.iter())
        .map(|(&call, &bin)| model.single(call as usize, bin as usize))
        .sum();
    sum / read.length as f64
}

#[derive(Debug, Clone)]
pub struct Denoiser<'a> {
    ds: &'a FlowDataSet,
    model: &'a LookupModel,
    config: &'a DenoiseConfig,
    otus: Vec<Otu>,
    // distances[read * otus.len() + otu]
    distances: Vec<f64>,
    tau: TauTable,
    membership: Membership,
    seed_assignment: Vec<usize>,
    state: DenoiseState,
    iteration: usize,
    trace: Vec<IterationStats>,
}

impl<'a> Denoiser<'a> {
    pub fn new(
        ds: &'a FlowDataSet,
        model: &'a LookupModel,
        config: &'a DenoiseConfig,
        seeds: &Seeds,
    ) -> Self {
        let num_otus = seeds.num_otus();
        let otus: Vec<_> = (0..num_otus).map(Otu::seeded).collect();
        let tau = TauTable::hard(&seeds.assignment);
        let membership = tau.membership(num_otus);
        Self {
            ds,
            model,
            config,
            otus,
            distances: vec![0f64; ds.reads.len() * num_otus],
            tau,
            membership,
            seed_assignment: seeds.assignment.clone(),
            state: DenoiseState::Seeded,
            iteration: 0,
            trace: vec![],
        }
    }
    pub fn dataset(&self) -> &FlowDataSet {
        self.ds
    }
    pub fn model(&self) -> &LookupModel {
        self.model
    }
    pub fn otus(&self) -> &[Otu] {
        &self.otus
    }
    pub fn tau(&self) -> &TauTable {
        &self.tau
    }
    pub fn membership(&self) -> &Membership {
        &self.membership
    }
    pub fn state(&self) -> DenoiseState {
        self.state
    }
    pub fn iterations(&self) -> usize {
        self.iteration
    }
    pub fn trace(&self) -> &[IterationStats] {
        &self.trace
    }
    pub fn is_live(&self, otu: usize) -> bool {
        let otu = &self.otus[otu];
        MIN_WEIGHT < otu.weight && otu.centroid.is_some()
    }
    pub fn live_otus(&self) -> usize {
        (0..self.otus.len()).filter(|&j| self.is_live(j)).count()
    }
    /// Iterate until the weights converge or the iteration cap is reached.
    pub fn run(&mut self, token: &CancelToken) -> Outcome<()> {
        self.state = DenoiseState::Iterating;
        let mut max_delta = 0f64;
        while self.iteration < MIN_ITER
            || (self.config.min_delta < max_delta && self.iteration < self.config.max_iterations)
        {
            let stats = proceed!(self.step(token));
            max_delta = stats.max_delta;
        }
        self.state = DenoiseState::Converged;
        debug!(
            "EM\tConverged\t{}\t{}\t{}",
            self.iteration,
            max_delta,
            self.live_otus()
        );
        Outcome::Finished(())
    }
    /// One EM round.
    pub fn step(&mut self, token: &CancelToken) -> Outcome<IterationStats> {
        self.state = DenoiseState::Iterating;
        self.membership = self.tau.membership(self.otus.len());
        proceed!(self.calc_centroids(token));
        let max_delta = self.update_weights();
        let neg_log_likelihood = self.likelihood();
        self.check_centroids();
        proceed!(self.reassign(token));
        self.iteration += 1;
        let stats = IterationStats {
            iteration: self.iteration,
            max_delta,
            neg_log_likelihood,
            live_otus: self.live_otus(),
        };
        debug!(
            "EM\t{}\t{:.6}\t{:.4}\t{}",
            stats.iteration, stats.max_delta, stats.neg_log_likelihood, stats.live_otus
        );
        self.trace.push(stats);
        Outcome::Finished(stats)
    }
    /// The tau-weighted medoid among the distinct uniques of the members.
    fn medoid(&self, otu: usize) -> Option<usize> {
        let members = self.membership.of_otu(otu);
        let mut candidates: Vec<usize> = vec![];
        for &e in members.iter() {
            let unique = self.ds.read_to_unique[self.tau.entry(e).read];
            if !candidates.contains(&unique) {
                candidates.push(unique);
            }
        }
        candidates
            .iter()
            .map(|&candidate| {
                let cost: f64 = members
                    .iter()
                    .map(|&e| {
                        let entry = self.tau.entry(e);
                        entry.tau * distance_to_centroid(self.ds, self.model, candidate, entry.read)
                    })
                    .sum();
                (candidate, cost)
            })
            .fold(None, |best: Option<(usize, f64)>, (candidate, cost)| match best {
                Some((_, min)) if min <= cost => best,
                _ => Some((candidate, cost)),
            })
            .map(|(candidate, _)| candidate)
    }
    /// Recompute the centroid of each OTU. `changed` flags the OTUs whose centroid moved.
    pub fn calc_centroids(&mut self, token: &CancelToken) -> Outcome<()> {
        let this = &*self;
        let centroids: Vec<Option<usize>> = (0..this.otus.len())
            .into_par_iter()
            .map(|otu| {
                if token.is_cancelled() {
                    return None;
                }
                let count: f64 = this
                    .membership
                    .of_otu(otu)
                    .iter()
                    .map(|&e| this.tau.entry(e).tau)
                    .sum();
                match MIN_COUNT < count {
                    true => this.medoid(otu),
                    false => None,
                }
            })
            .collect();
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }
        for (otu, centroid) in self.otus.iter_mut().zip(centroids) {
            otu.changed = otu.centroid != centroid;
            otu.centroid = centroid;
        }
        Outcome::Finished(())
    }
    /// Set the weights to the tau mass of the members. Return the largest change.
    pub fn update_weights(&mut self) -> f64 {
        let mut max_delta = 0f64;
        for otu in self.otus.iter_mut() {
            let weight: f64 = self
                .membership
                .of_otu(otu.id)
                .iter()
                .map(|&e| self.tau.entry(e).tau)
                .sum();
            max_delta = max_delta.max((weight - otu.weight).abs());
            otu.weight = weight;
        }
        max_delta
    }
    /// Negative log-likelihood of the reads under the current mixture. Only for reporting.
    pub fn likelihood(&self) -> f64 {
        let num_otus = self.otus.len();
        let sigma = self.config.sigma;
        let mut probs = vec![0f64; self.ds.reads.len()];
        for otu in 0..num_otus {
            let weight = self.otus[otu].weight;
            for &e in self.membership.of_otu(otu) {
                let read = self.tau.entry(e).read;
                let distance = self.distances[read * num_otus + otu];
                probs[read] += weight * (-distance * sigma).exp();
            }
        }
        // Underflowed probabilities are floored, not propagated as infinity.
        let nll: f64 = probs.iter().map(|&p| -p.max(f64::EPSILON).ln()).sum();
        nll - self.ds.reads.len() as f64 * sigma.ln()
    }
    /// Merge OTUs sharing a centroid into the one with the lowest id.
    pub fn check_centroids(&mut self) {
        let num_otus = self.otus.len();
        let mut unique = vec![true; num_otus];
        for (j, otu) in self.otus.iter().enumerate() {
            if otu.centroid.is_none() || otu.weight <= MIN_WEIGHT {
                unique[j] = false;
            }
        }
        for i in 0..num_otus {
            if !unique[i] {
                continue;
            }
            for j in i + 1..num_otus {
                if unique[j] && self.otus[j].centroid == self.otus[i].centroid {
                    unique[j] = false;
                    let absorbed = self.otus[j].weight;
                    self.otus[j].centroid = None;
                    self.otus[j].weight = 0f64;
                    self.otus[i].weight += absorbed;
                    trace!("EM\tMerge\t{}\t{}", j, i);
                }
            }
        }
    }
    /// Recompute distances to the moved centroids and rebuild the tau table.
    pub fn reassign(&mut self, token: &CancelToken) -> Outcome<()> {
        let num_otus = self.otus.len();
        let sigma = self.config.sigma;
        let live: Vec<_> = (0..num_otus).filter(|&j| self.is_live(j)).collect();
        let mut tau = TauTable::with_capacity(self.ds.reads.len(), self.tau.len());
        let mut new_tau = vec![0f64; num_otus];
        for read in 0..self.ds.reads.len() {
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            let row = &mut self.distances[read * num_otus..(read + 1) * num_otus];
            let mut offset = f64::INFINITY;
            for &j in live.iter() {
                let otu = &self.otus[j];
                if let (true, Some(centroid)) = (otu.changed, otu.centroid) {
                    row[j] = distance_to_centroid(self.ds, self.model, centroid, read);
                }
                offset = offset.min(row[j]);
            }
            if live.is_empty() {
                tau.push_read(std::iter::empty());
                continue;
            }
            let mut norm = 0f64;
            for &j in live.iter() {
                new_tau[j] = (sigma * (offset - row[j])).exp() * self.otus[j].weight;
                norm += new_tau[j];
            }
            tau.push_read(
                live.iter()
                    .map(|&j| (j, new_tau[j] / norm))
                    .filter(|&(_, t)| MIN_TAU < t),
            );
        }
        self.tau = tau;
        Outcome::Finished(())
    }
    /// Collapse the soft assignment: each read goes to its most probable OTU.
    /// Then the centroids are recomputed under the hard assignment.
    pub fn harden(&mut self, token: &CancelToken) -> Outcome<Vec<usize>> {
        let assignment: Vec<_> = self
            .tau
            .argmax()
            .into_iter()
            .zip(self.seed_assignment.iter())
            .map(|(best, &seed)| best.unwrap_or(seed))
            .collect();
        self.tau = TauTable::hard(&assignment);
        self.membership = self.tau.membership(self.otus.len());
        proceed!(self.calc_centroids(token));
        self.update_weights();
        Outcome::Finished(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::mock_model;
    use crate::seed_clustering::seed_otus;
    use crate::uniquing::Uniquing;
    use definitions::FlowRead;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    // Three templates, reads are noisy copies of them.
    fn mock_dataset(seed: u64, per_template: usize, cycles: usize) -> FlowDataSet {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
        let templates: Vec<Vec<u16>> = (0..3)
            .map(|_| (0..cycles).map(|_| 100 * rng.gen_range(0..4)).collect())
            .collect();
        let mut reads = vec![];
        for template in templates.iter() {
            for _ in 0..per_template {
                let bins: Vec<u16> = template
                    .iter()
                    .map(|&x| {
                        let noise = match rng.gen_bool(0.05) {
                            true => rng.gen_range(-70..70),
                            false => rng.gen_range(-20..20),
                        };
                        (x as i32 + noise).clamp(0, 999) as u16
                    })
                    .collect();
                let id = reads.len();
                reads.push(FlowRead::new(id, format!("r{}", id), cycles, bins));
            }
        }
        let mut ds = FlowDataSet::new("m.flow".into(), "m".into(), cycles, "TACG".into(), reads);
        ds.unique_flowgrams(&CancelToken::new());
        ds
    }
    fn seeded<'a>(
        ds: &'a FlowDataSet,
        model: &'a LookupModel,
        config: &'a DenoiseConfig,
    ) -> Denoiser<'a> {
        let seeds = seed_otus(ds, model, config.cutoff, &CancelToken::new())
            .finished()
            .unwrap();
        Denoiser::new(ds, model, config, &seeds)
    }
    #[test]
    fn config_validation() {
        assert!(DenoiseConfig::default().validate().is_ok());
        let empty = DenoiseConfig::default().with_flow_order("");
        assert!(matches!(empty.validate(), Err(DenoiseError::InvalidConfig(_))));
        let garbage = DenoiseConfig::default().with_flow_order("TA-G");
        assert!(garbage.validate().is_err());
        let sigma = DenoiseConfig::new(0.01, 0f64, 0.000001, 10);
        assert!(sigma.validate().is_err());
    }
    #[test]
    fn distance_to_own_centroid_is_small() {
        let ds = mock_dataset(3, 5, 40);
        let model = mock_model(0.15);
        for read in 0..ds.reads.len() {
            let own = ds.read_to_unique[read];
            let d = distance_to_centroid(&ds, &model, own, read);
            for unique in 0..ds.uniques.len() {
                assert!(d <= distance_to_centroid(&ds, &model, unique, read) + 1e-9);
            }
        }
    }
    #[test]
    fn tau_is_normalized() {
        let ds = mock_dataset(1, 10, 40);
        let model = mock_model(0.15);
        let config = DenoiseConfig::new(0.05, 60f64, 0.000001, 30);
        let mut denoiser = seeded(&ds, &model, &config);
        let token = CancelToken::new();
        for _ in 0..5 {
            denoiser.step(&token);
            let num_otus = denoiser.otus().len() as f64;
            for read in 0..ds.reads.len() {
                let entries = denoiser.tau().of_read(read);
                let sum: f64 = entries.iter().map(|e| e.tau).sum();
                assert!(!entries.is_empty());
                assert!(sum <= 1f64 + 1e-9, "{}", sum);
                assert!(1f64 - num_otus * MIN_TAU <= sum, "{}", sum);
                assert!(entries.iter().all(|e| MIN_TAU < e.tau));
            }
        }
    }
    #[test]
    fn live_otus_never_increase() {
        let ds = mock_dataset(5, 12, 50);
        let model = mock_model(0.2);
        let config = DenoiseConfig::new(0.2, 60f64, 0.000001, 40);
        let mut denoiser = seeded(&ds, &model, &config);
        assert_eq!(denoiser.run(&CancelToken::new()), Outcome::Finished(()));
        let trace = denoiser.trace();
        assert!(trace.windows(2).all(|w| w[1].live_otus <= w[0].live_otus));
        assert!(0 < denoiser.live_otus());
    }
    #[test]
    fn terminates_within_max_iterations() {
        let ds = mock_dataset(11, 8, 30);
        let model = mock_model(0.15);
        // A negative threshold can never be reached.
        let config = DenoiseConfig::new(0.05, 60f64, -1f64, 15);
        let mut denoiser = seeded(&ds, &model, &config);
        assert_eq!(denoiser.state(), DenoiseState::Seeded);
        denoiser.run(&CancelToken::new());
        assert_eq!(denoiser.iterations(), 15);
        assert_eq!(denoiser.state(), DenoiseState::Converged);
    }
    #[test]
    fn single_read_converges_trivially() {
        let read = FlowRead::new(0, "only".to_string(), 20, vec![100; 20]);
        let mut ds = FlowDataSet::new("s.flow".into(), "s".into(), 20, "TACG".into(), vec![read]);
        ds.unique_flowgrams(&CancelToken::new());
        let model = mock_model(0.15);
        let config = DenoiseConfig::default();
        let mut denoiser = seeded(&ds, &model, &config);
        denoiser.run(&CancelToken::new());
        assert_eq!(denoiser.iterations(), MIN_ITER);
        assert_eq!(denoiser.otus().len(), 1);
        assert!((denoiser.otus()[0].weight - 1f64).abs() < 1e-12);
        assert_eq!(denoiser.otus()[0].centroid, Some(0));
        let last = denoiser.trace().last().unwrap();
        assert_eq!(last.max_delta, 0f64);
        assert_eq!(denoiser.trace()[0].max_delta, 1f64);
    }
    #[test]
    fn duplicated_centroids_are_merged() {
        let ds = mock_dataset(2, 4, 30);
        let model = mock_model(0.15);
        let config = DenoiseConfig::default();
        let mut denoiser = seeded(&ds, &model, &config);
        denoiser.otus = vec![
            Otu {
                id: 0,
                centroid: Some(1),
                weight: 2f64,
                changed: false,
            },
            Otu {
                id: 1,
                centroid: Some(1),
                weight: 3f64,
                changed: false,
            },
            Otu {
                id: 2,
                centroid: Some(0),
                weight: 0.05,
                changed: false,
            },
        ];
        denoiser.check_centroids();
        assert_eq!(denoiser.otus[0].weight, 5f64);
        assert_eq!(denoiser.otus[1].centroid, None);
        assert_eq!(denoiser.otus[1].weight, 0f64);
        assert!(!denoiser.is_live(2));
        assert_eq!(denoiser.live_otus(), 1);
    }
    #[test]
    fn weight_at_threshold_is_dead() {
        let ds = mock_dataset(2, 4, 30);
        let model = mock_model(0.15);
        let config = DenoiseConfig::default();
        let mut denoiser = seeded(&ds, &model, &config);
        denoiser.otus = vec![
            Otu {
                id: 0,
                centroid: Some(1),
                weight: MIN_WEIGHT,
                changed: false,
            },
            Otu {
                id: 1,
                centroid: Some(1),
                weight: 3f64,
                changed: false,
            },
        ];
        assert!(!denoiser.is_live(0));
        denoiser.check_centroids();
        // A dead OTU does not absorb a live one sharing its centroid.
        assert_eq!(denoiser.otus[0].weight, MIN_WEIGHT);
        assert_eq!(denoiser.otus[1].weight, 3f64);
        assert_eq!(denoiser.otus[1].centroid, Some(1));
        assert_eq!(denoiser.live_otus(), 1);
    }
    #[test]
    fn cancellation_stops_the_loop() {
        let ds = mock_dataset(8, 5, 30);
        let model = mock_model(0.15);
        let config = DenoiseConfig::default();
        let mut denoiser = seeded(&ds, &model, &config);
        let token = CancelToken::new();
        token.cancel();
        assert!(denoiser.run(&token).is_cancelled());
        assert_eq!(denoiser.iterations(), 0);
        assert_ne!(denoiser.state(), DenoiseState::Converged);
    }
}
