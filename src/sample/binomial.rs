//! Binomial sampling with injectable RNG (spec §4.6, §9 "Binomial
//! splitting"). Small `n` falls back to independent coin tosses; larger `n`
//! uses a normal-approximation inversion, exactly as spec §9 prescribes.

use rand::Rng;

const COIN_TOSS_THRESHOLD: u64 = 10;

/// Draws `k ~ Binomial(n, p)`, `p` clamped to `[0, 1]`.
pub fn sample_binomial(rng: &mut impl Rng, n: u64, p: f64) -> u64 {
    let p = p.clamp(0.0, 1.0);
    if n == 0 || p == 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    if n < COIN_TOSS_THRESHOLD {
        return (0..n).filter(|_| rng.gen_bool(p)).count() as u64;
    }
    normal_approximation(rng, n, p)
}

/// Normal approximation with continuity correction, clamped into `[0, n]`.
/// Adequate for the sample-buffer sizes this index deals with (spec never
/// requires exact tail behavior, only an unbiased, symmetric estimator).
fn normal_approximation(rng: &mut impl Rng, n: u64, p: f64) -> u64 {
    let nf = n as f64;
    let mean = nf * p;
    let sd = (nf * p * (1.0 - p)).sqrt();
    if sd <= 0.0 {
        return mean.round().clamp(0.0, nf) as u64;
    }
    let z: f64 = {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    };
    let draw = mean + z * sd;
    draw.round().clamp(0.0, nf) as u64
}

/// Splits demand `total` across `weights` proportionally, each part
/// `~ Binomial(remaining, w_i / remaining_weight)` drawn in sequence so
/// the parts always sum to exactly `total` (spec §4.6's recursive
/// partition step).
pub fn split_proportionally(rng: &mut impl Rng, total: u64, weights: &[u64]) -> Vec<u64> {
    let mut parts = vec![0u64; weights.len()];
    let mut remaining_total = total;
    let mut remaining_weight: u64 = weights.iter().sum();
    for (i, &w) in weights.iter().enumerate() {
        if remaining_total == 0 || remaining_weight == 0 {
            break;
        }
        let part = if i == weights.len() - 1 {
            remaining_total
        } else {
            sample_binomial(rng, remaining_total, w as f64 / remaining_weight as f64)
        };
        parts[i] = part;
        remaining_total -= part;
        remaining_weight -= w;
    }
    parts
}
