//! Seeding OTUs by complete-linkage clustering of unique flowgrams.
use crate::cancel::{CancelToken, Outcome};
use crate::find_union::FindUnion;
use crate::lookup::LookupModel;
use definitions::FlowDataSet;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Distances below this value are regarded as zero.
const ZERO_DISTANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairwiseDistance {
    pub a: usize,
    pub b: usize,
    pub distance: f64,
}

/// The seeds of the EM: a partition of the uniques and the OTU of each read.
#[derive(Debug, Clone)]
pub struct Seeds {
    pub clusters: Vec<Vec<usize>>,
    /// If assignment[i] = j, the i-th read is seeded into the j-th OTU.
    pub assignment: Vec<usize>,
}

impl Seeds {
    pub fn num_otus(&self) -> usize {
        self.clusters.len()
    }
}

/// The normalized divergence between two unique flowgrams over their overlap.
/// Return None if the flowgrams do not overlap.
pub fn unique_distance(ds: &FlowDataSet, model: &LookupModel, a: usize, b: usize) -> Option<f64> {
    let overlap = ds.uniques[a].length.min(ds.uniques[b].length);
    if overlap == 0 {
        return None;
    }
    let bins_a = &ds.representative(a).bins[..overlap];
    let bins_b = &ds.representative(b).bins[..overlap];
    let sum: f64 = bins_a
        .iter()
        .zip(bins_b.iter())
        .map(|(&x, &y)| model.divergence(x as usize, y as usize))
        .sum();
    let distance = sum / overlap as f64;
    match distance < ZERO_DISTANCE {
        true => Some(0f64),
        false => Some(distance),
    }
}

/// Sparse list of the pairs of uniques within `cutoff`.
pub fn pairwise_distances(
    ds: &FlowDataSet,
    model: &LookupModel,
    cutoff: f64,
    token: &CancelToken,
) -> Outcome<Vec<PairwiseDistance>> {
    let rows: Vec<Vec<PairwiseDistance>> = (0..ds.uniques.len())
        .into_par_iter()
        .map(|a| {
            if token.is_cancelled() {
                return vec![];
            }
            (0..a)
                .filter_map(|b| {
                    let distance = unique_distance(ds, model, a, b)?;
                    (distance <= cutoff).then(|| PairwiseDistance { a, b, distance })
                })
                .collect()
        })
        .collect();
    if token.is_cancelled() {
        return Outcome::Cancelled;
    }
    let distances: Vec<_> = rows.into_iter().flatten().collect();
    debug!("DIST\t{}\t{}", ds.uniques.len(), distances.len());
    Outcome::Finished(distances)
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    a: usize,
    b: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed, so that the heap pops the closest pair, then the lowest ids.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.a.cmp(&self.a))
            .then_with(|| other.b.cmp(&self.b))
    }
}

/// Complete-linkage clustering over a sparse distance list. A missing pair is farther than `cutoff`.
/// Each cluster is sorted, and the clusters are ordered by their smallest member.
pub fn complete_linkage(n: usize, distances: &[PairwiseDistance], cutoff: f64) -> Vec<Vec<usize>> {
    let mut fu = FindUnion::new(n);
    let mut neighbors: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
    for d in distances.iter().filter(|d| d.distance <= cutoff && d.a != d.b) {
        fu.unite(d.a, d.b);
        neighbors[d.a].insert(d.b, d.distance);
        neighbors[d.b].insert(d.a, d.distance);
    }
    let components = fu.components();
    let mut clusters: Vec<Vec<usize>> = components
        .into_par_iter()
        .flat_map_iter(|component| link_component(&component, &neighbors, cutoff))
        .collect();
    clusters.sort_by_key(|c| c[0]);
    clusters
}

fn link_component(
    component: &[usize],
    neighbors: &[HashMap<usize, f64>],
    cutoff: f64,
) -> Vec<Vec<usize>> {
    if component.len() == 1 {
        return vec![component.to_vec()];
    }
    let local: HashMap<usize, usize> = component
        .iter()
        .enumerate()
        .map(|(idx, &node)| (node, idx))
        .collect();
    let mut links: Vec<HashMap<usize, f64>> = component
        .iter()
        .map(|node| {
            neighbors[*node]
                .iter()
                .map(|(to, &d)| (local[to], d))
                .collect()
        })
        .collect();
    let mut members: Vec<Vec<usize>> = component.iter().map(|&node| vec![node]).collect();
    let mut alive = vec![true; component.len()];
    let mut heap: BinaryHeap<_> = links
        .iter()
        .enumerate()
        .flat_map(|(a, link)| {
            link.iter()
                .filter(move |&(&b, _)| a < b)
                .map(move |(&b, &distance)| Candidate { distance, a, b })
        })
        .collect();
    while let Some(Candidate { distance, a, b }) = heap.pop() {
        if !alive[a] || !alive[b] || links[a].get(&b) != Some(&distance) {
            continue;
        }
        // Merge b into a. The linkage to c is the larger of the two, and is lost if either is missing.
        alive[b] = false;
        let link_a = std::mem::take(&mut links[a]);
        let link_b = std::mem::take(&mut links[b]);
        let mut merged = HashMap::new();
        for (&c, &da) in link_a.iter().filter(|&(&c, _)| c != b) {
            if let Some(&db) = link_b.get(&c) {
                let d = da.max(db);
                if d <= cutoff {
                    merged.insert(c, d);
                }
            }
        }
        for &c in link_a.keys().chain(link_b.keys()) {
            if c != a && c != b {
                links[c].remove(&a);
                links[c].remove(&b);
            }
        }
        for (&c, &d) in merged.iter() {
            links[c].insert(a, d);
            let (x, y) = (a.min(c), a.max(c));
            heap.push(Candidate {
                distance: d,
                a: x,
                b: y,
            });
        }
        links[a] = merged;
        let absorbed = std::mem::take(&mut members[b]);
        members[a].extend(absorbed);
    }
    members
        .into_iter()
        .zip(alive)
        .filter_map(|(mut cluster, alive)| {
            cluster.sort_unstable();
            alive.then(|| cluster)
        })
        .collect()
}

/// Compute the sparse distances, cluster the uniques, and seed one OTU per cluster.
pub fn seed_otus(
    ds: &FlowDataSet,
    model: &LookupModel,
    cutoff: f64,
    token: &CancelToken,
) -> Outcome<Seeds> {
    let distances = proceed!(pairwise_distances(ds, model, cutoff, token));
    let clusters = complete_linkage(ds.uniques.len(), &distances, cutoff);
    let mut unique_to_otu = vec![0; ds.uniques.len()];
    for (otu, cluster) in clusters.iter().enumerate() {
        for &unique in cluster.iter() {
            unique_to_otu[unique] = otu;
        }
    }
    let assignment: Vec<_> = ds.read_to_unique.iter().map(|&u| unique_to_otu[u]).collect();
    debug!(
        "SEED\t{}\t{}\t{}",
        ds.uniques.len(),
        distances.len(),
        clusters.len()
    );
    Outcome::Finished(Seeds {
        clusters,
        assignment,
    })
}
