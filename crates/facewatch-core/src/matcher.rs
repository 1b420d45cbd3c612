//! Nearest-group face matcher.
//!
//! Each labeled group is scored by the mean Euclidean distance between the
//! query and the group's descriptors. The closest group wins unless its
//! distance exceeds the threshold, in which case the result is `unknown`.

use crate::types::{Descriptor, LabeledDescriptors};
use std::fmt;

/// Label reported when no group is within the distance threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Default decision threshold on mean Euclidean distance.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// Result of matching one query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub label: String,
    /// Mean distance to the best group. Infinite when the matcher is empty.
    pub distance: f32,
}

impl BestMatch {
    fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

impl fmt::Display for BestMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distance.is_finite() {
            write!(f, "{} ({:.2})", self.label, self.distance)
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Immutable matcher over labeled descriptor groups.
///
/// Built once per recognition session and shared behind an `Arc`; all
/// methods take `&self`.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    groups: Vec<LabeledDescriptors>,
    threshold: f32,
}

impl FaceMatcher {
    /// Build a matcher. Groups without descriptors are dropped.
    pub fn new(groups: Vec<LabeledDescriptors>, threshold: f32) -> Self {
        let groups = groups.into_iter().filter(|g| !g.is_empty()).collect();
        Self { groups, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.label())
    }

    /// Find the closest labeled group for `query`.
    pub fn best_match(&self, query: &Descriptor) -> BestMatch {
        let best = self
            .groups
            .iter()
            .map(|group| (group, mean_distance(query, group.descriptors())))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((group, distance)) if distance <= self.threshold => BestMatch {
                label: group.label().to_string(),
                distance,
            },
            Some((_, distance)) => BestMatch::unknown(distance),
            None => BestMatch::unknown(f32::INFINITY),
        }
    }
}

fn mean_distance(query: &Descriptor, descriptors: &[Descriptor]) -> f32 {
    let total: f32 = descriptors.iter().map(|d| query.euclidean_distance(d)).sum();
    total / descriptors.len() as f32
}
