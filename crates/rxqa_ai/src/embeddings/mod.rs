use std::sync::Arc;

use rxqa_core::error::AppError;
use tracing::debug;

pub mod ollama_embed;

/// Text-to-vector capability. One call per invocation, order preserving.
pub trait Embedder: Send + Sync {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
}

/// Thin front over an [`Embedder`]: single and batched embedding with the
/// empty-batch short circuit. Vector width is not checked here; the index
/// rejects vectors that disagree with its configured dimension.
#[derive(Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut out = self.embedder.embed(&[text.to_string()])?;
        if out.len() != 1 {
            return Err(AppError::new(
                "AI_EMBEDDINGS_FAILED",
                "Embedding provider returned an unexpected number of vectors",
            )
            .with_details(format!("expected=1; got={}", out.len())));
        }
        Ok(out.remove(0))
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let out = self.embedder.embed(texts)?;
        if out.len() != texts.len() {
            return Err(AppError::new(
                "AI_EMBEDDINGS_FAILED",
                "Embedding provider returned an unexpected number of vectors",
            )
            .with_details(format!("expected={}; got={}", texts.len(), out.len())));
        }
        debug!(count = texts.len(), "embedded batch");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LenEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for LenEmbedder {
        fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|s| vec![s.len() as f32, 1.0]).collect())
        }
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            Ok(vec![vec![1.0]])
        }
    }

    #[test]
    fn empty_batch_skips_the_provider() {
        let inner = Arc::new(LenEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::new(inner.clone());
        assert!(gateway.embed_batch(&[]).unwrap().is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn batch_preserves_order_in_one_call() {
        let inner = Arc::new(LenEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::new(inner.clone());
        let out = gateway
            .embed_batch(&["a".to_string(), "abc".to_string(), "ab".to_string()])
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.embed("abcd").unwrap(), vec![4.0, 1.0]);
    }

    #[test]
    fn count_mismatch_is_a_provider_error() {
        let gateway = EmbeddingGateway::new(Arc::new(ShortEmbedder));
        let err = gateway
            .embed_batch(&["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert_eq!(err.code, "AI_EMBEDDINGS_FAILED");
    }
}
