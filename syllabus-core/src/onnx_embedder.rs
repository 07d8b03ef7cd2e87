//! Local ONNX embedding backend running `all-MiniLM-L6-v2`, the same
//! sentence-transformers model the course corpus is indexed with.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::embeddings::{EmbeddingBackend, EmbeddingError, OnnxConfig};

const MODEL_FILE: &str = "all-MiniLM-L6-v2.onnx";
const TOKENIZER_FILE: &str = "all-MiniLM-L6-v2-tokenizer.json";

pub struct OnnxEmbeddingClient {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingClient")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingClient {
    /// Loads the model and tokenizer. Either file missing → `ModelNotFound`.
    pub fn new(config: OnnxConfig) -> Result<Self, EmbeddingError> {
        for path in [&config.model_path, &config.tokenizer_path] {
            if !path.exists() {
                return Err(EmbeddingError::ModelNotFound {
                    path: path.display().to_string(),
                });
            }
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        tracing::info!(
            model = %config.model_path.display(),
            dimensions = config.dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // Inference is CPU-bound.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let dimensions = self.dimensions;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|e| EmbeddingError::OnnxInference(format!("session lock poisoned: {e}")))?;
            embed_sync(&mut guard, &tokenizer, &text, dimensions)
        })
        .await
        .map_err(|e| EmbeddingError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

fn onnx_err(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::OnnxInference(e.to_string())
}

fn embed_sync(
    session: &mut Session,
    tokenizer: &tokenizers::Tokenizer,
    text: &str,
    expected_dims: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

    let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<i64>>();
    let input_ids = to_i64(encoding.get_ids());
    let attention_mask = to_i64(encoding.get_attention_mask());
    let token_type_ids = to_i64(encoding.get_type_ids());

    let shape = vec![1i64, input_ids.len() as i64];

    let inputs = ort::inputs! {
        "input_ids" => Tensor::from_array((shape.clone(), input_ids)).map_err(onnx_err)?,
        "attention_mask" => Tensor::from_array((shape.clone(), attention_mask.clone())).map_err(onnx_err)?,
        "token_type_ids" => Tensor::from_array((shape, token_type_ids)).map_err(onnx_err)?,
    };

    let outputs = session.run(inputs).map_err(onnx_err)?;

    // last_hidden_state: [1, seq_len, hidden_dim]
    let (out_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(onnx_err)?;
    if out_shape.len() != 3 {
        return Err(EmbeddingError::OnnxInference(format!(
            "Expected 3D output, got {}D",
            out_shape.len()
        )));
    }
    let seq_len = out_shape[1] as usize;
    let hidden_dim = out_shape[2] as usize;

    let pooled = mean_pool(data, &attention_mask, seq_len, hidden_dim);
    let pooled = l2_normalize(pooled);

    if pooled.len() != expected_dims {
        return Err(EmbeddingError::InvalidDimensions {
            expected: expected_dims,
            actual: pooled.len(),
        });
    }

    Ok(pooled)
}

/// Attention-masked mean over the token axis of a flat `[seq_len, hidden_dim]` buffer.
fn mean_pool(data: &[f32], mask: &[i64], seq_len: usize, hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut counted = 0.0f32;

    for (tok_idx, &m) in mask.iter().enumerate().take(seq_len) {
        if m == 0 {
            continue;
        }
        counted += 1.0;
        let row = &data[tok_idx * hidden_dim..(tok_idx + 1) * hidden_dim];
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
    }

    if counted > 0.0 {
        pooled.iter_mut().for_each(|v| *v /= counted);
    }
    pooled
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("syllabus/models")
}

/// Model and tokenizer paths. An empty config value means the default model dir;
/// otherwise the tokenizer sits next to the model as `<stem>-tokenizer.json`.
pub fn resolve_onnx_paths(onnx_model_path: &str) -> (PathBuf, PathBuf) {
    if onnx_model_path.is_empty() {
        let dir = default_model_dir();
        return (dir.join(MODEL_FILE), dir.join(TOKENIZER_FILE));
    }

    let model = PathBuf::from(onnx_model_path);
    let stem = model
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let tokenizer = model.with_file_name(format!("{stem}-tokenizer.json"));
    (model, tokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::ONNX_DIMENSIONS;

    #[test]
    fn test_model_not_found_returns_error() {
        let config = OnnxConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            dimensions: ONNX_DIMENSIONS,
        };

        match OnnxEmbeddingClient::new(config) {
            Err(EmbeddingError::ModelNotFound { path }) => {
                assert!(path.contains("model.onnx"), "path was: {path}");
            }
            other => panic!("Expected ModelNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_onnx_paths_default() {
        let (model, tokenizer) = resolve_onnx_paths("");
        assert!(model.ends_with("syllabus/models/all-MiniLM-L6-v2.onnx"));
        assert!(tokenizer.ends_with("syllabus/models/all-MiniLM-L6-v2-tokenizer.json"));
    }

    #[test]
    fn test_resolve_onnx_paths_custom() {
        let (model, tokenizer) = resolve_onnx_paths("/opt/models/minilm.onnx");
        assert_eq!(model, PathBuf::from("/opt/models/minilm.onnx"));
        assert_eq!(tokenizer, PathBuf::from("/opt/models/minilm-tokenizer.json"));
    }

    #[test]
    fn test_mean_pool_ignores_masked_tokens() {
        // two tokens, hidden_dim 2; second token is padding
        let data = [1.0, 3.0, 100.0, 100.0];
        let pooled = mean_pool(&data, &[1, 0], 2, 2);
        assert_eq!(pooled, vec![1.0, 3.0]);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
