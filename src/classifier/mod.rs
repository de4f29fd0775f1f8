//! Wellness classification of journal text.
//!
//! A `TextClassifier` turns texts into raw logits; `WellnessAnalyzer`
//! converts those into label → percentage maps. The ONNX-backed
//! classifier lives behind the `onnx-classifier` feature.

pub mod types;
#[cfg(feature = "onnx-classifier")]
pub mod onnx;

pub use types::*;
#[cfg(feature = "onnx-classifier")]
pub use onnx::OnnxClassifier;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Classifier initialization: {0}")]
    ModelInit(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned {got} logit rows for {expected} inputs")]
    OutputMismatch { expected: usize, got: usize },

    #[error("Classifier support not compiled in (enable the `onnx-classifier` feature)")]
    Unavailable,
}

/// Sequence classification model with a fixed input/output contract:
/// one row of logits per input text, in input order.
pub trait TextClassifier: Send + Sync {
    fn logits(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClassifierError>;
}

/// Text to analyze: one string or a list of strings.
#[derive(Debug, Clone, Copy)]
pub enum TextInput<'a> {
    Single(&'a str),
    Batch(&'a [&'a str]),
}

impl<'a> From<&'a str> for TextInput<'a> {
    fn from(text: &'a str) -> Self {
        TextInput::Single(text)
    }
}

impl<'a> From<&'a [&'a str]> for TextInput<'a> {
    fn from(texts: &'a [&'a str]) -> Self {
        TextInput::Batch(texts)
    }
}

/// Result shape follows the input shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    Single(WellnessState),
    Batch(Vec<WellnessState>),
}

impl Analysis {
    pub fn into_single(self) -> Option<WellnessState> {
        match self {
            Analysis::Single(state) => Some(state),
            Analysis::Batch(_) => None,
        }
    }
}

/// Converts classifier logits into wellness states.
///
/// Built once at startup; the model behind it is loaded exactly once.
pub struct WellnessAnalyzer {
    classifier: Box<dyn TextClassifier>,
    labels: LabelTable,
}

impl WellnessAnalyzer {
    pub fn new(classifier: Box<dyn TextClassifier>, labels: LabelTable) -> Self {
        Self { classifier, labels }
    }

    /// Analyze one text or a batch of texts.
    ///
    /// Each result is softmax probabilities as percentages (2 decimals),
    /// sorted descending and cut to `top_k` labels when given.
    pub fn analyze_text<'a>(
        &self,
        input: impl Into<TextInput<'a>>,
        top_k: Option<usize>,
    ) -> Result<Analysis, ClassifierError> {
        match input.into() {
            TextInput::Single(text) => {
                let mut states = self.run(&[text], top_k)?;
                // run() guarantees one state per input
                Ok(Analysis::Single(states.pop().unwrap_or_default()))
            }
            TextInput::Batch(texts) => Ok(Analysis::Batch(self.run(texts, top_k)?)),
        }
    }

    /// Analyze a single journal entry.
    pub fn analyze_one(&self, text: &str) -> Result<WellnessState, ClassifierError> {
        let mut states = self.run(&[text], None)?;
        Ok(states.pop().unwrap_or_default())
    }

    fn run(&self, texts: &[&str], top_k: Option<usize>) -> Result<Vec<WellnessState>, ClassifierError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.classifier.logits(texts)?;
        if rows.len() != texts.len() {
            return Err(ClassifierError::OutputMismatch {
                expected: texts.len(),
                got: rows.len(),
            });
        }

        Ok(rows
            .iter()
            .map(|logits| {
                let mut state = self.to_state(logits);
                if let Some(k) = top_k {
                    state.truncate(k);
                }
                state
            })
            .collect())
    }

    fn to_state(&self, logits: &[f32]) -> WellnessState {
        let scores = softmax(logits)
            .into_iter()
            .enumerate()
            .map(|(index, p)| LabelScore {
                label: self.labels.label(index),
                percent: round2(p * 100.0),
            })
            .collect();
        WellnessState::from_scores(scores)
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .map(|&l| l as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        exps
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
