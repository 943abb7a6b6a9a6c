//! Anomaly classification policies.
//!
//! A classifier takes a fetched [`Snapshot`] and returns it with zero or more
//! anomaly flags set. It never changes length, order or values. Whether a
//! snapshot is anomalous is always answered by [`Snapshot::has_anomaly`].

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::Snapshot;

/// Flags anomalous readings in a snapshot.
pub trait Classifier: Send + Sync {
    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    fn classify(&self, snapshot: Snapshot) -> Snapshot;
}

/// Which classifier the fleet runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierPolicy {
    /// Discard upstream flags and randomly flag one channel with a fixed
    /// probability.
    #[default]
    Simulated,
    /// Keep the flags reported by the upstream as-is.
    Upstream,
}

impl fmt::Display for ClassifierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Upstream => write!(f, "upstream"),
        }
    }
}

impl FromStr for ClassifierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "sim" | "random" => Ok(Self::Simulated),
            "upstream" | "passthrough" => Ok(Self::Upstream),
            other => Err(format!(
                "unknown classifier '{other}' (expected simulated or upstream)"
            )),
        }
    }
}

/// Build the classifier for a policy.
pub fn build_classifier(policy: ClassifierPolicy, anomaly_rate: f64) -> Box<dyn Classifier> {
    match policy {
        ClassifierPolicy::Simulated => Box::new(SimulatedClassifier::new(anomaly_rate)),
        ClassifierPolicy::Upstream => Box::new(UpstreamFlagsClassifier),
    }
}

// ---------------------------------------------------------------------------
// Simulated detector
// ---------------------------------------------------------------------------

/// Stand-in detector: with probability `rate`, flags one channel chosen
/// uniformly at random. Flags reported by the upstream are discarded first, so
/// the anomalous fraction is exactly `rate`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedClassifier {
    rate: f64,
}

impl SimulatedClassifier {
    /// Create with an anomaly rate, clamped to `[0, 1]`.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Classify using the given random source.
    pub fn classify_with<R: Rng>(&self, rng: &mut R, mut snapshot: Snapshot) -> Snapshot {
        snapshot.clear_flags();
        if snapshot.is_empty() || !rng.random_bool(self.rate) {
            return snapshot;
        }
        let channel = rng.random_range(0..snapshot.len());
        snapshot.flag(channel);
        snapshot
    }
}

impl Classifier for SimulatedClassifier {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn classify(&self, snapshot: Snapshot) -> Snapshot {
        self.classify_with(&mut rand::rng(), snapshot)
    }
}

// ---------------------------------------------------------------------------
// Upstream flags
// ---------------------------------------------------------------------------

/// Deterministic policy that trusts the upstream's own anomaly flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamFlagsClassifier;

impl Classifier for UpstreamFlagsClassifier {
    fn name(&self) -> &'static str {
        "upstream"
    }

    fn classify(&self, snapshot: Snapshot) -> Snapshot {
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use statrs::distribution::{Binomial, DiscreteCDF};

    fn six() -> Snapshot {
        Snapshot::from_values(&[1023.0, 692.0, 31.0, 542.0, 134.0, 1023.0])
    }

    // -----------------------------------------------------------------------
    // Contract
    // -----------------------------------------------------------------------

    #[test]
    fn test_classify_preserves_length_order_and_values() {
        let c = SimulatedClassifier::new(1.0);
        let mut rng = StdRng::seed_from_u64(1);
        let before = six();
        for _ in 0..100 {
            let after = c.classify_with(&mut rng, before.clone());
            assert_eq!(after.len(), before.len());
            for (a, b) in after.readings().iter().zip(before.readings()) {
                assert_eq!(a.channel, b.channel);
                assert_eq!(a.value, b.value);
            }
        }
    }

    #[test]
    fn test_classify_flags_exactly_one_channel() {
        let c = SimulatedClassifier::new(1.0);
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..200 {
            let out = c.classify_with(&mut rng, six());
            assert_eq!(out.flagged_channels().len(), 1);
        }
    }

    #[test]
    fn test_classify_discards_upstream_flags() {
        let mut flagged = six();
        flagged.flag(4);
        flagged.flag(1);

        let out = SimulatedClassifier::new(0.0).classify(flagged.clone());
        assert!(!out.has_anomaly());

        let c = SimulatedClassifier::new(1.0);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let out = c.classify_with(&mut rng, flagged.clone());
            assert_eq!(out.flagged_channels().len(), 1);
        }
    }

    #[test]
    fn test_zero_rate_never_flags() {
        let c = SimulatedClassifier::new(0.0);
        let mut rng = StdRng::seed_from_u64(3);
        assert!((0..1000).all(|_| !c.classify_with(&mut rng, six()).has_anomaly()));
    }

    #[test]
    fn test_empty_snapshot_untouched() {
        let c = SimulatedClassifier::new(1.0);
        let out = c.classify(Snapshot::from_values(&[]));
        assert!(out.is_empty());
        assert!(!out.has_anomaly());
    }

    #[test]
    fn test_rate_is_clamped() {
        assert_eq!(SimulatedClassifier::new(3.0).rate(), 1.0);
        assert_eq!(SimulatedClassifier::new(-1.0).rate(), 0.0);
        assert_eq!(SimulatedClassifier::new(f64::NAN).rate(), 0.0);
    }

    // -----------------------------------------------------------------------
    // Determinism and long-run rate
    // -----------------------------------------------------------------------

    #[test]
    fn test_same_draw_same_result() {
        let c = SimulatedClassifier::new(0.5);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            assert_eq!(c.classify_with(&mut a, six()), c.classify_with(&mut b, six()));
        }
    }

    #[test]
    fn test_anomaly_fraction_converges_to_rate() {
        let p = 0.05;
        let n: u64 = 20_000;
        let c = SimulatedClassifier::new(p);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let hits = (0..n)
            .filter(|_| c.classify_with(&mut rng, six()).has_anomaly())
            .count() as u64;

        let dist = Binomial::new(p, n).unwrap();
        let lower_tail = dist.cdf(hits);
        let upper_tail = 1.0 - dist.cdf(hits.saturating_sub(1));
        assert!(
            lower_tail > 1e-6 && upper_tail > 1e-6,
            "{hits}/{n} anomalous is implausible for rate {p}"
        );
    }

    #[test]
    fn test_flagged_channel_is_roughly_uniform() {
        let c = SimulatedClassifier::new(1.0);
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0u32; 6];
        for _ in 0..6000 {
            let ch = c.classify_with(&mut rng, six()).flagged_channels()[0];
            counts[ch] += 1;
        }
        assert!(counts.iter().all(|&n| (800..1200).contains(&n)), "{counts:?}");
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    #[test]
    fn test_upstream_policy_is_identity() {
        let mut s = six();
        s.flag(2);
        assert_eq!(UpstreamFlagsClassifier.classify(s.clone()), s);
    }

    #[test]
    fn test_policy_parse_and_build() {
        assert_eq!("simulated".parse(), Ok(ClassifierPolicy::Simulated));
        assert_eq!("Upstream".parse(), Ok(ClassifierPolicy::Upstream));
        assert!("bogus".parse::<ClassifierPolicy>().is_err());
        assert_eq!(build_classifier(ClassifierPolicy::Upstream, 0.5).name(), "upstream");
        assert_eq!(build_classifier(ClassifierPolicy::Simulated, 0.5).name(), "simulated");
    }
}
