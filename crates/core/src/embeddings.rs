use crate::error::CapabilityError;
use async_trait::async_trait;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Text embedding capability. Ingestion and querying must go through the same
/// `model_id`; vectors always have `dimensions()` entries.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

/// Hashed character-trigram embedder; deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const HASH_SEED: u64 = 1_469_598_103_934_665_603;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

impl CharacterNgramEmbedder {
    /// Counts lowercased character trigrams into `dimensions` hashed buckets and
    /// scales the result to unit length. Texts shorter than three chars map to
    /// the zero vector.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars = text.to_lowercase().chars().collect::<Vec<_>>();

        for trigram in chars.windows(3) {
            let bucket = trigram_hash(trigram) % vector.len() as u64;
            vector[bucket as usize] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

/// FNV-1a style hash over the UTF-8 bytes of the trigram. Bucket assignment
/// is part of the model id contract, so the seed must not change.
fn trigram_hash(trigram: &[char]) -> u64 {
    let mut buffer = [0u8; 4];
    trigram.iter().fold(HASH_SEED, |hash, ch| {
        ch.encode_utf8(&mut buffer)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    })
}

fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vector.iter_mut().for_each(|value| *value /= magnitude);
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("char-trigram-{}", self.dimensions.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        Ok(self.embed_sync(text))
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, CharacterNgramEmbedder, Embedder};

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.model_id(), "char-trigram-32");
    }

    #[test]
    fn related_text_is_closer() {
        let embedder = CharacterNgramEmbedder::default();
        let question = embedder.embed_sync("What color is the sky?");
        let sky = embedder.embed_sync("The sky is blue. ");
        let grass = embedder.embed_sync("Grass is green.");
        assert!(cosine_similarity(&question, &sky) > cosine_similarity(&question, &grass));
    }

    #[test]
    fn short_and_multibyte_text_embed_cleanly() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        assert!(embedder.embed_sync("ab").iter().all(|value| *value == 0.0));

        let vector = embedder.embed_sync("Überdruck für Ventile");
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(vector, embedder.embed_sync("überdruck FÜR ventile"));
    }

    #[test]
    fn zero_vectors_have_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
