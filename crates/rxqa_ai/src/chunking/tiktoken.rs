use std::sync::Arc;

use rxqa_core::error::AppError;
use tiktoken_rs::CoreBPE;

use super::Tokenizer;

/// `cl100k_base` BPE, the default chunking tokenizer.
#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    pub fn cl100k() -> Result<Self, AppError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            AppError::new("TOKENIZER_INIT_FAILED", "Failed to load cl100k_base tokenizer")
                .with_details(e.to_string())
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, AppError> {
        match self.bpe.decode(tokens.to_vec()) {
            Ok(text) => Ok(text),
            // Every token resolved but a window edge split a multi-byte
            // character. Keep all bytes and mark the broken edge with U+FFFD.
            Err(e) if e.to_string().contains("UTF-8") => {
                let bytes: Vec<u8> = self.bpe._decode_native_and_split(tokens.to_vec()).flatten().collect();
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(AppError::new("TOKENIZER_DECODE_FAILED", "Token window could not be decoded")
                .with_details(format!("tokens={}; err={e}", tokens.len()))),
        }
    }
}
