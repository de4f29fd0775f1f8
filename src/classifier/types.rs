use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wellness labels in model output order.
pub const WELLNESS_LABELS: [&str; 5] = ["Anxiety", "Normal", "Depression", "Suicidal", "Stress"];

/// Maps a model class index to a human-readable label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// The wellness label set shared by every ingress.
    pub fn wellness() -> Self {
        Self::new(WELLNESS_LABELS)
    }

    /// Label for a class index; unknown indices render as the index itself.
    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::wellness()
    }
}

/// One label with its probability as a percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub percent: f64,
}

/// Classification result for one journal entry.
///
/// Scores are kept in descending order of probability. Serializes as a JSON
/// object (`{"Normal": 71.2, "Stress": 12.03, ...}`) in that order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WellnessState {
    scores: Vec<LabelScore>,
}

impl WellnessState {
    /// Build from scores, sorting them by descending percentage.
    /// Ties keep their original (class index) order.
    pub fn from_scores(mut scores: Vec<LabelScore>) -> Self {
        scores.sort_by(|a, b| b.percent.total_cmp(&a.percent));
        Self { scores }
    }

    /// Keep only the `k` most probable labels.
    pub fn truncate(&mut self, k: usize) {
        self.scores.truncate(k);
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.percent)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelScore> {
        self.scores.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.scores.iter().map(|s| s.label.as_str())
    }

    /// Most probable label, if any.
    pub fn top(&self) -> Option<&LabelScore> {
        self.scores.first()
    }

    /// Sum of all percentages (≈100 unless truncated).
    pub fn total(&self) -> f64 {
        self.scores.iter().map(|s| s.percent).sum()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// JSON text as stored in `journal_entries.wellness_state`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for WellnessState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for score in &self.scores {
            map.serialize_entry(&score.label, &score.percent)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WellnessState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StateVisitor;

        impl<'de> Visitor<'de> for StateVisitor {
            type Value = WellnessState;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of label to percentage")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
                let mut scores = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, percent)) = access.next_entry::<String, f64>()? {
                    scores.push(LabelScore { label, percent });
                }
                Ok(WellnessState::from_scores(scores))
            }
        }

        deserializer.deserialize_map(StateVisitor)
    }
}
