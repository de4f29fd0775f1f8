use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::{ClassifierError, TextClassifier};

/// Sequence classification model (e.g. fine-tuned XLM-RoBERTa) run with
/// ONNX Runtime.
///
/// Requires two files in the model directory:
/// - `model.onnx`: exported with `input_ids`, `attention_mask` (and optionally
///   `token_type_ids`) inputs and a `[batch, num_labels]` logits output
/// - `tokenizer.json`: HuggingFace tokenizer definition
///
/// Uses interior mutability (Mutex) because ort::Session::run requires `&mut self`.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    use_token_type_ids: bool,
}

impl OnnxClassifier {
    /// Load the model and tokenizer from `model_dir`.
    ///
    /// Inputs longer than `max_length` tokens are truncated; batches are
    /// padded to their longest member.
    pub fn load(
        model_dir: &Path,
        max_length: usize,
        use_token_type_ids: bool,
    ) -> Result<Self, ClassifierError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path));
        }
        if !tokenizer_path.exists() {
            return Err(ClassifierError::ModelNotFound(tokenizer_path));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ClassifierError::ModelInit(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e: ort::Error| ClassifierError::ModelInit(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| ClassifierError::ModelInit(format!("ONNX load failed: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ClassifierError::ModelInit(format!("Tokenizer load failed: {e}")))?;

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| ClassifierError::ModelInit(format!("Truncation setup failed: {e}")))?;

        if tokenizer.get_padding().is_none() {
            let pad_token = ["<pad>", "[PAD]"]
                .into_iter()
                .find(|t| tokenizer.token_to_id(t).is_some())
                .unwrap_or("[PAD]");
            let pad_id = tokenizer.token_to_id(pad_token).unwrap_or(0);
            tokenizer.with_padding(Some(PaddingParams {
                strategy: PaddingStrategy::BatchLongest,
                pad_id,
                pad_token: pad_token.to_string(),
                ..Default::default()
            }));
        }

        tracing::info!(
            model_dir = %model_dir.display(),
            max_length,
            use_token_type_ids,
            "ONNX classifier loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            use_token_type_ids,
        })
    }

    fn infer(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        use ort::value::TensorRef;

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ClassifierError::Tokenization(e.to_string()))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        let mut token_type_ids = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            // BatchLongest padding makes every row seq_len long
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| t as i64));
        }

        let ids_array = ndarray::Array2::from_shape_vec((batch, seq_len), input_ids)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let mask_array = ndarray::Array2::from_shape_vec((batch, seq_len), attention_mask)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let type_array = ndarray::Array2::from_shape_vec((batch, seq_len), token_type_ids)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let ids_tensor = TensorRef::from_array_view(&ids_array)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let mask_tensor = TensorRef::from_array_view(&mask_array)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("Session lock poisoned".to_string()))?;

        let outputs = if self.use_token_type_ids {
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| ClassifierError::Inference(e.to_string()))?;
            session.run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
        } else {
            session.run(ort::inputs![ids_tensor, mask_tensor])
        }
        .map_err(|e| ClassifierError::Inference(format!("ONNX inference failed: {e}")))?;

        // Output shape: [batch, num_labels]
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("Output extraction: {e}")))?;

        if shape.len() != 2 || shape[0] as usize != batch {
            return Err(ClassifierError::Inference(format!(
                "Unexpected output shape: {shape:?}, expected [{batch}, num_labels]"
            )));
        }

        let num_labels = shape[1] as usize;
        Ok(logits
            .chunks(num_labels.max(1))
            .take(batch)
            .map(<[f32]>::to_vec)
            .collect())
    }
}

impl TextClassifier for OnnxClassifier {
    fn logits(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        self.infer(texts)
    }
}
