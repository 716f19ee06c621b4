use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

/// Decides, independently per call, whether a new trace should be recorded.
///
/// Configured with a `fixed_target` — a number of traces per second
/// guaranteed to be sampled — and a `fallback_rate` applied once that
/// target is exhausted for the current second. This guarantees a minimum
/// visibility floor per second while bounding overall sample volume under
/// load.
#[derive(Debug)]
pub struct Sampler {
    fixed_target: u32,
    fallback_rate: f64,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    this_second: u64,
    used_this_second: u32,
}

impl Default for Sampler {
    /// A sampler guaranteeing up to 10 traces per second, falling back to
    /// sampling 5% of traffic beyond that.
    fn default() -> Self {
        Sampler::new(10, 0.05)
    }
}

impl Sampler {
    /// Creates a sampler with the given fixed per-second target and
    /// fallback probability (expected to be in `[0, 1]`).
    pub fn new(
        fixed_target: u32,
        fallback_rate: f64,
    ) -> Self {
        Sampler {
            fixed_target,
            fallback_rate,
            state: Mutex::new(State::default()),
        }
    }

    /// Decides whether the caller's trace should be sampled.
    pub fn is_sampled(&self) -> bool {
        let now = current_second();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if now != state.this_second {
            state.this_second = now;
            state.used_this_second = 0;
        }

        if self.fixed_target > 0 && state.used_this_second < self.fixed_target {
            state.used_this_second += 1;
            return true;
        }
        drop(state);

        if self.fallback_rate <= 0.0 {
            return false;
        }

        rand::random::<f64>() < self.fallback_rate
    }
}

fn current_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_target_and_zero_fallback_never_samples() {
        let sampler = Sampler::new(0, 0.0);
        for _ in 0..50 {
            assert!(!sampler.is_sampled());
        }
    }

    #[test]
    fn fixed_target_admits_at_most_n_per_second() {
        let sampler = Sampler::new(5, 0.0);
        let admitted = (0..5).filter(|_| sampler.is_sampled()).count();
        assert_eq!(admitted, 5);
        // the target is exhausted for this second and fallback is disabled
        assert!(!sampler.is_sampled());
    }

    #[test]
    fn fallback_rate_of_one_always_samples_once_exhausted() {
        let sampler = Sampler::new(1, 1.0);
        assert!(sampler.is_sampled()); // consumes the fixed target
        for _ in 0..20 {
            assert!(sampler.is_sampled());
        }
    }
}
