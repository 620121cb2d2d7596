//! Token-budget packing of retrieved chunks into LLM-sized batches.

use serde::{Deserialize, Serialize};

use omni_common::CommonError;
use omni_indexing::Chunk;

use crate::error::Result;

/// Chunks merged into one prompt-sized piece of context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedBatch {
    /// Merged chunk text.
    pub text: String,

    /// Ids of the chunks in this batch, in order.
    pub chunk_ids: Vec<String>,

    /// Sum of the chunks' token counts.
    pub token_count: usize,
}

impl PackedBatch {
    fn push(&mut self, chunk: &Chunk) {
        self.text = combine_without_overlap(&self.text, &chunk.text);
        self.chunk_ids.push(chunk.id.clone());
        self.token_count += chunk.token_count;
    }

    fn contains(&self, chunk_id: &str) -> bool {
        self.chunk_ids.iter().any(|id| id == chunk_id)
    }
}

/// Append `next` to `acc`, dropping the longest prefix of `next` that `acc`
/// already ends with.
pub fn combine_without_overlap(acc: &str, next: &str) -> String {
    let overlap = next
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rfind(|&end| end <= acc.len() && acc.ends_with(&next[..end]))
        .unwrap_or(0);

    let mut combined = String::with_capacity(acc.len() + next.len() - overlap);
    combined.push_str(acc);
    combined.push_str(&next[overlap..]);
    combined
}

/// Greedily pack `chunks`, in order, into batches of at most `max_tokens`.
///
/// A chunk larger than the budget on its own is emitted as a single-chunk
/// batch. A chunk id already present in the open batch is skipped.
pub fn pack(chunks: &[Chunk], max_tokens: usize) -> Result<Vec<PackedBatch>> {
    if max_tokens == 0 {
        return Err(CommonError::InvalidInput("token budget must be positive".to_string()).into());
    }

    let mut batches = Vec::new();
    let mut current = PackedBatch::default();

    for chunk in chunks {
        if current.contains(&chunk.id) {
            continue;
        }

        if chunk.token_count > max_tokens {
            if !current.chunk_ids.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            let mut alone = PackedBatch::default();
            alone.push(chunk);
            batches.push(alone);
            continue;
        }

        if current.token_count + chunk.token_count > max_tokens {
            batches.push(std::mem::take(&mut current));
        }
        current.push(chunk);
    }

    if !current.chunk_ids.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}
