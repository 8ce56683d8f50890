//! The calibration model of flow intensities.
//! For each homopolymer length `k` in `0..HOMOPS` and each intensity bin `b`, the table holds
//! `-log P(b | k)`. The joint table holds, for each pair of bins, the best supported
//! combined cost assuming both bins come from the same length.
use crate::error::DenoiseError;
use definitions::{HOMOPS, NUMBINS};
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LookupModel {
    // single[k * NUMBINS + b]
    single: Vec<f64>,
    // best[b] = min_k single[k][b]
    best: Vec<f64>,
    // joint[a * NUMBINS + b]
    joint: Vec<f64>,
}

impl LookupModel {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DenoiseError> {
        let path = path.as_ref();
        debug!("LOOKUP\tOpen\t{}", path.display());
        let file = std::fs::File::open(path).map_err(|why| {
            DenoiseError::CalibrationLoadFailure {
                path: path.to_path_buf(),
                reason: why.to_string(),
            }
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|why| match why {
            DenoiseError::CalibrationLoadFailure { reason, .. } => {
                DenoiseError::CalibrationLoadFailure {
                    path: path.to_path_buf(),
                    reason,
                }
            }
            other => other,
        })
    }
    /// Read HOMOPS rows, each of which is a scalar followed by NUMBINS -log-probabilities.
    /// The leading scalar (log fraction of the length) is not used.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self, DenoiseError> {
        let failure = |reason: String| DenoiseError::CalibrationLoadFailure {
            path: Default::default(),
            reason,
        };
        let mut contents = String::new();
        reader
            .read_to_string(&mut contents)
            .map_err(|why| failure(why.to_string()))?;
        let mut tokens = contents.split_whitespace();
        let mut single = Vec::with_capacity(HOMOPS * NUMBINS);
        for homop in 0..HOMOPS {
            let _log_freq: f64 = match tokens.next().map(|x| x.parse::<f64>()) {
                Some(Ok(x)) => x,
                Some(Err(why)) => return Err(failure(format!("row {homop}: {why}"))),
                None => return Err(failure(format!("only {homop} rows out of {HOMOPS}"))),
            };
            for bin in 0..NUMBINS {
                match tokens.next().map(|x| x.parse::<f64>()) {
                    Some(Ok(x)) => single.push(x),
                    Some(Err(why)) => {
                        return Err(failure(format!("row {homop}, bin {bin}: {why}")))
                    }
                    None => {
                        return Err(failure(format!("row {homop} has only {bin} bins")));
                    }
                }
            }
        }
        if tokens.next().is_some() {
            warn!("LOOKUP\tTrailing values are ignored.");
        }
        Self::from_table(single).map_err(|why| match why {
            DenoiseError::CalibrationLoadFailure { reason, .. } => failure(reason),
            other => other,
        })
    }
    /// Build the model from a homopolymer-major table of size HOMOPS x NUMBINS.
    pub fn from_table(single: Vec<f64>) -> Result<Self, DenoiseError> {
        if single.len() != HOMOPS * NUMBINS {
            return Err(DenoiseError::CalibrationLoadFailure {
                path: Default::default(),
                reason: format!("{} values, expected {}", single.len(), HOMOPS * NUMBINS),
            });
        }
        if let Some(pos) = single.iter().position(|x| !x.is_finite()) {
            return Err(DenoiseError::CalibrationLoadFailure {
                path: Default::default(),
                reason: format!("non-finite value at {pos}"),
            });
        }
        let best: Vec<_> = (0..NUMBINS)
            .map(|bin| {
                (0..HOMOPS)
                    .map(|k| single[k * NUMBINS + bin])
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let mut joint = vec![0f64; NUMBINS * NUMBINS];
        for a in 0..NUMBINS {
            for b in a..NUMBINS {
                let min = (0..HOMOPS)
                    .map(|k| single[k * NUMBINS + a] + single[k * NUMBINS + b])
                    .fold(f64::INFINITY, f64::min);
                joint[a * NUMBINS + b] = min;
                joint[b * NUMBINS + a] = min;
            }
        }
        debug!("LOOKUP\tBuilt\t{}x{}", HOMOPS, NUMBINS);
        Ok(Self {
            single,
            best,
            joint,
        })
    }
    /// -log P(bin | homopolymer length).
    #[inline]
    pub fn single(&self, homop: usize, bin: usize) -> f64 {
        self.single[homop * NUMBINS + bin]
    }
    /// The cost of the most likely length for this bin.
    #[inline]
    pub fn best(&self, bin: usize) -> f64 {
        self.best[bin]
    }
    #[inline]
    pub fn joint(&self, a: usize, b: usize) -> f64 {
        self.joint[a * NUMBINS + b]
    }
    /// The excess cost of explaining two bins by one shared length. Always non-negative.
    #[inline]
    pub fn divergence(&self, a: usize, b: usize) -> f64 {
        (self.joint(a, b) - self.best(a) - self.best(b)).max(0f64)
    }
}

/// A Gaussian mock of the calibration table: the intensity of a length-k homopolymer
/// is centered at k with the given standard deviation.
#[cfg(test)]
pub(crate) fn mock_model(sd: f64) -> LookupModel {
    let mut single = Vec::with_capacity(HOMOPS * NUMBINS);
    for k in 0..HOMOPS {
        for bin in 0..NUMBINS {
            let x = bin as f64 / 100f64 - k as f64;
            single.push(x * x / (2f64 * sd * sd));
        }
    }
    LookupModel::from_table(single).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn load_from_reader() {
        let mut text = String::new();
        for k in 0..HOMOPS {
            text.push_str(&format!("{:.3}", -(k as f64)));
            for bin in 0..NUMBINS {
                let cost = ((bin as f64 / 100f64) - k as f64).abs();
                text.push_str(&format!(" {:.4}", cost));
            }
            text.push('\n');
        }
        let model = LookupModel::from_reader(text.as_bytes()).unwrap();
        assert!((model.single(2, 200)).abs() < 1e-9);
        assert!((model.single(0, 150) - 1.5).abs() < 1e-9);
        assert!((model.best(150) - 0.5).abs() < 1e-9);
        // Either length 1 or 2 explains 1.00 and 2.00 at cost 1.
        assert!((model.joint(100, 200) - 1.0).abs() < 1e-9);
        assert!((model.divergence(100, 200) - 1.0).abs() < 1e-9);
    }
    #[test]
    fn short_table_is_rejected() {
        let text = "0.0 1.0 2.0\n";
        match LookupModel::from_reader(text.as_bytes()) {
            Err(DenoiseError::CalibrationLoadFailure { reason, .. }) => {
                assert!(reason.contains("bins"), "{}", reason)
            }
            other => panic!("{:?}", other.map(|_| ())),
        }
        let bad = "0.0 x";
        assert!(LookupModel::from_reader(bad.as_bytes()).is_err());
    }
    #[test]
    fn missing_file() {
        let path = std::path::Path::new("/nonexistent/LookUp_Titanium.pat");
        match LookupModel::from_path(path) {
            Err(DenoiseError::CalibrationLoadFailure { path: p, .. }) => assert_eq!(p, path),
            other => panic!("{:?}", other.map(|_| ())),
        }
    }
    #[test]
    fn divergence_is_symmetric() {
        let model = mock_model(0.15);
        for &(a, b) in &[(0, 0), (100, 103), (149, 151), (300, 420), (999, 0)] {
            let (x, y) = (model.divergence(a, b), model.divergence(b, a));
            assert!((x - y).abs() < 1e-12);
            assert!(x >= 0f64);
        }
        for bin in (0..NUMBINS).step_by(37) {
            assert!(model.divergence(bin, bin).abs() < 1e-12);
        }
    }
}
