//! Deterministic synthetic statement traces.
//!
//! Traces mimic instrumented programs: bursts of statements from one class,
//! loop bodies repeated many times, occasionally nested in an outer loop.
//! The same `(config, seed)` always produces the same trace.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::codec::{encode, CLASS_ID_BITS, COUNTER_ID_BITS};
use crate::error::Result;
use crate::sequence::IntSequence;

/// Shape of generated traces.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Distinct class ids used.
    pub classes: u32,
    /// Distinct counter ids per class.
    pub counters_per_class: u32,
    /// Longest loop body.
    pub max_body: usize,
    /// Most iterations of one loop.
    pub max_iterations: usize,
    /// Probability that a body is looped at all.
    pub loop_probability: f64,
    /// Probability that a loop sits inside an outer loop.
    pub nesting_probability: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            classes: 8,
            counters_per_class: 256,
            max_body: 6,
            max_iterations: 50,
            loop_probability: 0.7,
            nesting_probability: 0.2,
        }
    }
}

impl SynthConfig {
    /// Copy with every field forced into the range the generator supports.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let class_limit = 1 << CLASS_ID_BITS;
        let counter_limit = 1 << COUNTER_ID_BITS;
        if self.classes == 0 {
            self.classes = 1;
        } else if self.classes > class_limit {
            self.classes = class_limit;
        }
        // Room for the body plus the statement that follows the loop.
        let max_counter = counter_limit - 2;
        if self.counters_per_class == 0 {
            self.counters_per_class = 1;
        } else if self.counters_per_class > max_counter {
            self.counters_per_class = max_counter;
        }
        if self.max_body == 0 {
            self.max_body = 1;
        }
        if self.max_iterations < 2 {
            self.max_iterations = 2;
        }
        self
    }
}

/// Append `len` generated statements to `out`.
pub fn generate_into<S>(out: &mut S, len: usize, config: &SynthConfig, seed: u64) -> Result<()>
where
    S: IntSequence + ?Sized,
{
    let cfg = config.clamped();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut left = len;

    loop {
        let class = rng.random_range(0..cfg.classes);
        let body = rng.random_range(1..=cfg.max_body);
        let body_u32 = u32::try_from(body).unwrap_or(u32::MAX);
        let first = rng.random_range(0..cfg.counters_per_class.saturating_sub(body_u32).max(1));
        let iterations = if rng.random_bool(cfg.loop_probability.clamp(0.0, 1.0)) {
            rng.random_range(2..=cfg.max_iterations)
        } else {
            1
        };
        let outer = if rng.random_bool(cfg.nesting_probability.clamp(0.0, 1.0)) {
            rng.random_range(2..=4usize)
        } else {
            1
        };

        for _ in 0..outer {
            for _ in 0..iterations {
                for j in 0..body_u32 {
                    if left == 0 {
                        return Ok(());
                    }
                    out.push(encode(class, first + j))?;
                    left -= 1;
                }
            }
            if left == 0 {
                return Ok(());
            }
            out.push(encode(class, first + body_u32))?;
            left -= 1;
        }
    }
}

/// Generate an in-memory trace of `len` statements.
pub fn generate_trace(len: usize, config: &SynthConfig, seed: u64) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(len);
    generate_into(&mut out, len, config, seed)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_class_id, decode_counter_id};

    #[test]
    fn deterministic_and_exact_length() {
        let cfg = SynthConfig::default();
        let a = generate_trace(5_000, &cfg, 7).unwrap();
        let b = generate_trace(5_000, &cfg, 7).unwrap();
        let c = generate_trace(5_000, &cfg, 8).unwrap();
        assert_eq!(a.len(), 5_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ids_stay_in_range() {
        let cfg = SynthConfig {
            classes: 3,
            counters_per_class: 10,
            ..SynthConfig::default()
        };
        for s in generate_trace(2_000, &cfg, 1).unwrap() {
            assert!(decode_class_id(s) < 3);
            assert!(decode_counter_id(s) <= 10);
        }
    }

    #[test]
    fn zero_length_is_empty() {
        assert!(generate_trace(0, &SynthConfig::default(), 0).unwrap().is_empty());
    }
}
