//! Cooperative cancellation.
//! A [CancelToken] is shared by every worker of a run and polled at the top of the hot loops.
//! Cancellable stages return [Outcome] instead of zeroing their state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Finished(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Finished(x) => Outcome::Finished(f(x)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
    pub fn finished(self) -> Option<T> {
        match self {
            Outcome::Finished(x) => Some(x),
            Outcome::Cancelled => None,
        }
    }
}

/// Unwrap a finished outcome, or return `Outcome::Cancelled` from the enclosing function.
#[macro_export]
macro_rules! proceed {
    ($outcome:expr) => {
        match $outcome {
            $crate::cancel::Outcome::Finished(x) => x,
            $crate::cancel::Outcome::Cancelled => return $crate::cancel::Outcome::Cancelled,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    fn sum_until_cancelled(xs: &[u32], token: &CancelToken) -> Outcome<u32> {
        let mut sum = 0;
        for &x in xs {
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            sum += x;
        }
        Outcome::Finished(sum)
    }
    fn doubled(xs: &[u32], token: &CancelToken) -> Outcome<u32> {
        let sum = proceed!(sum_until_cancelled(xs, token));
        Outcome::Finished(2 * sum)
    }
    #[test]
    fn token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
    #[test]
    fn outcome_propagation() {
        let token = CancelToken::new();
        assert_eq!(doubled(&[1, 2, 3], &token), Outcome::Finished(12));
        token.cancel();
        assert_eq!(doubled(&[1, 2, 3], &token), Outcome::Cancelled);
        assert_eq!(Outcome::Finished(3).map(|x| x + 1).finished(), Some(4));
    }
}
