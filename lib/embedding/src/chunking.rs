//! Text chunking
//!
//! Long texts are first broken into splits no longer than `chunk_size`
//! (newlines are dropped, sentence terminators and spaces are kept), then
//! merged greedily into chunks. Consecutive chunks share up to
//! `chunk_overlap` characters of trailing splits.

use linkvec_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

const REMOVED_SEPARATORS: [&str; 1] = ["\n"];
const KEPT_SEPARATORS: [&str; 4] = [".", "!", "?", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Split `text` into overlapping chunks.
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let splits = split(text, self.chunk_size);
        merge(&splits, self.chunk_size, self.chunk_overlap)
    }
}

fn split_on(text: &str, separator: &str, keep: bool) -> Vec<String> {
    let parts: Vec<&str> = text.split(separator).collect();
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .filter(|(_, part)| !part.is_empty())
        .map(|(i, part)| {
            if keep && i < last {
                format!("{}{} ", part, separator.trim_end())
            } else {
                (*part).to_string()
            }
        })
        .collect()
}

fn split(text: &str, chunk_size: usize) -> Vec<String> {
    let separators = REMOVED_SEPARATORS
        .iter()
        .map(|s| (*s, false))
        .chain(KEPT_SEPARATORS.iter().map(|s| (*s, true)));
    let separators: Vec<(&str, bool)> = separators.collect();

    let mut pending: std::collections::VecDeque<String> = [text.to_string()].into();
    let mut splits = Vec::new();
    while let Some(current) = pending.pop_front() {
        if current.chars().count() <= chunk_size {
            splits.push(current);
            continue;
        }
        let sub_splits = separators.iter().find_map(|(separator, keep)| {
            let source = if *keep {
                current.split_whitespace().collect::<Vec<_>>().join(" ")
            } else {
                current.clone()
            };
            let parts = split_on(&source, separator, *keep);
            (parts.len() > 1).then_some(parts)
        });
        match sub_splits {
            Some(parts) => {
                for part in parts.into_iter().rev() {
                    pending.push_front(part);
                }
            }
            // an unbreakable run longer than the chunk size stays whole
            None => splits.push(current),
        }
    }
    splits
}

fn merge(splits: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
    let mut current_len = 0usize;

    for split in splits {
        let split_len = split.chars().count();
        if current_len + split_len > chunk_size {
            let chunk = current.iter().copied().collect::<String>();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            while current_len > chunk_overlap || (current_len + split_len > chunk_size && current_len > 0) {
                match current.pop_front() {
                    Some(first) => current_len -= first.chars().count(),
                    None => break,
                }
            }
        }
        current.push_back(split);
        current_len += split_len;
    }

    let chunk = current.iter().copied().collect::<String>();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let config = ChunkingConfig::default();
        assert_eq!(config.chunk("A short review."), vec!["A short review."]);
    }

    #[test]
    fn test_chunks_respect_size() {
        let config = ChunkingConfig::new(40, 10).unwrap();
        let text = "The battery lasts two days. The screen is bright! Would I buy it again? \
                    Probably yes, the price was fair and shipping was quick.";
        let chunks = config.chunk(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "{:?}", chunk);
        }
    }

    #[test]
    fn test_newlines_dropped() {
        let config = ChunkingConfig::new(10, 0).unwrap();
        let chunks = config.chunk("first line\nsecond line");
        assert!(chunks.iter().all(|c| !c.contains('\n')));
    }

    #[test]
    fn test_invalid_config() {
        assert!(ChunkingConfig::new(0, 0).is_err());
        assert!(ChunkingConfig::new(10, 10).is_err());
    }
}
