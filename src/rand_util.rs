//! # Backoff Randomization
//!
//! `ExponentialRand`/`UniformRand`-equivalent helpers used by the repair
//! timer (§4.5), the CC timer (§4.7), and the watermark-ACK timer (§4.8) to
//! desynchronize receivers so their feedback doesn't collide. Grounded on
//! the teacher's use of the `rand` crate for randomized backoff in
//! `congestion.rs` (`BiscayController`'s pacing jitter).

use rand::Rng;

/// Group-size-biased exponential backoff sample in `[0, max]`, matching the
/// shape used at the NACK/CC backoff call sites in `original_source`
/// (`ExponentialRand(maxBackoff, groupSizeEstimate)`): larger estimated
/// group sizes flatten the distribution towards `max` so that, in
/// aggregate, collision probability across many receivers stays low.
pub fn exponential_rand(max: f64, group_size_estimate: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    let k = group_size_estimate.max(2.0);
    let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
    let sample = -max * u.ln() / k.ln();
    sample.clamp(0.0, max)
}

/// Uniform backoff sample in `[0, max]` (watermark-ACK timer, §4.8).
pub fn uniform_rand(max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    rand::thread_rng().gen_range(0.0..=max)
}
