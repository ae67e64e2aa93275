//! Chunking strategies
//!
//! Three strategies over the cl100k token budget:
//! - `fixed`: sliding token windows with overlap
//! - `recursive`: separator hierarchy (paragraph, line, sentence, word)
//!   with token-overlap stitching
//! - `semantic`: sentence accumulation up to the budget with sentence
//!   overlap; oversized sentences fall back to fixed windows

use rag_engine_config::ChunkingStrategy;
use rag_engine_core::{count_tokens, tokens, Chunk, Metadata};

const RECURSIVE_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Chunk one text with the given strategy.
pub fn chunk_text(
    text: &str,
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    match strategy {
        ChunkingStrategy::Fixed => fixed_chunk(text, chunk_size, chunk_overlap, source_metadata),
        ChunkingStrategy::Recursive => {
            recursive_chunk(text, chunk_size, chunk_overlap, source_metadata)
        }
        ChunkingStrategy::Semantic => {
            semantic_chunk(text, chunk_size, chunk_overlap, source_metadata)
        }
    }
}

/// Chunk paged content (PDF), tagging each chunk with its 1-based page
/// and renumbering chunk indices globally across pages.
pub fn chunk_document_pages(
    pages: &[String],
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    let mut all = Vec::new();
    let mut global_index = 0;

    for (page_number, page_text) in pages.iter().enumerate() {
        let mut page_meta = source_metadata.cloned().unwrap_or_default();
        page_meta.insert("page".to_string(), serde_json::json!(page_number + 1));

        for mut chunk in chunk_text(page_text, strategy, chunk_size, chunk_overlap, Some(&page_meta))
        {
            chunk.chunk_index = global_index;
            chunk
                .metadata
                .insert("chunk_index".to_string(), serde_json::json!(global_index));
            all.push(chunk);
            global_index += 1;
        }
    }

    all
}

fn base_metadata(
    source_metadata: Option<&Metadata>,
    chunk_index: usize,
    strategy: &str,
) -> Metadata {
    let mut meta = source_metadata.cloned().unwrap_or_default();
    meta.insert("chunk_index".to_string(), serde_json::json!(chunk_index));
    meta.insert("strategy".to_string(), serde_json::json!(strategy));
    meta
}

fn fixed_chunk(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let token_ids = tokens::encode(text);
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < token_ids.len() {
        let end = (start + chunk_size).min(token_ids.len());
        let window = &token_ids[start..end];
        let chunk_text = tokens::decode(window).trim().to_string();

        chunks.push(Chunk {
            text: chunk_text,
            chunk_index: index,
            token_count: window.len(),
            metadata: base_metadata(source_metadata, index, "fixed"),
        });

        start += step;
        index += 1;
    }

    chunks
}

fn recursive_chunk(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    let raw = recursive_split(text, RECURSIVE_SEPARATORS, chunk_size);

    let mut chunks: Vec<Chunk> = Vec::new();
    for raw_chunk in raw {
        let trimmed = raw_chunk.trim();
        if trimmed.is_empty() {
            continue;
        }
        let index = chunks.len();
        chunks.push(Chunk {
            text: trimmed.to_string(),
            chunk_index: index,
            token_count: count_tokens(trimmed),
            metadata: base_metadata(source_metadata, index, "recursive"),
        });
    }

    if chunk_overlap > 0 && chunks.len() > 1 {
        chunks = apply_overlap(chunks, chunk_overlap, source_metadata);
    }

    chunks
}

fn recursive_split(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if count_tokens(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let Some((separator, remaining)) = separators.split_first() else {
        // Out of separators: hard token split.
        return token_windows(text, chunk_size);
    };

    let mut result: Vec<String> = Vec::new();
    let mut current = String::new();

    for part in text.split(separator) {
        let candidate = if current.is_empty() {
            part.to_string()
        } else {
            format!("{}{}{}", current, separator, part)
        };

        if count_tokens(&candidate) <= chunk_size {
            current = candidate;
        } else {
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
            if count_tokens(part) > chunk_size {
                result.extend(recursive_split(part, remaining, chunk_size));
            } else {
                current = part.to_string();
            }
        }
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

fn token_windows(text: &str, chunk_size: usize) -> Vec<String> {
    let token_ids = tokens::encode(text);
    token_ids
        .chunks(chunk_size.max(1))
        .map(tokens::decode)
        .collect()
}

/// Prepend the tail of each previous chunk onto the next one.
fn apply_overlap(
    chunks: Vec<Chunk>,
    overlap_tokens: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let Some(first) = iter.next() else {
        return result;
    };

    let mut previous_text = first.text.clone();
    result.push(first);

    for (i, chunk) in iter.enumerate() {
        let prev_tokens = tokens::encode(&previous_text);
        let overlap_text = if prev_tokens.len() > overlap_tokens {
            tokens::decode(&prev_tokens[prev_tokens.len() - overlap_tokens..])
        } else {
            previous_text.clone()
        };

        let combined = format!("{} {}", overlap_text.trim(), chunk.text)
            .trim()
            .to_string();
        let index = i + 1;
        let strategy = chunk
            .metadata
            .get("strategy")
            .and_then(|v| v.as_str())
            .unwrap_or("recursive")
            .to_string();

        previous_text = chunk.text;
        result.push(Chunk {
            token_count: count_tokens(&combined),
            text: combined,
            chunk_index: index,
            metadata: base_metadata(source_metadata, index, &strategy),
        });
    }

    result
}

fn semantic_chunk(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    source_metadata: Option<&Metadata>,
) -> Vec<Chunk> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0;
    let mut index = 0;

    let mut flush =
        |current: &mut Vec<String>, current_tokens: &mut usize, index: &mut usize, chunks: &mut Vec<Chunk>| {
            if current.is_empty() {
                return;
            }
            let chunk_text = current.join(" ").trim().to_string();
            chunks.push(Chunk {
                token_count: count_tokens(&chunk_text),
                text: chunk_text,
                chunk_index: *index,
                metadata: base_metadata(source_metadata, *index, "semantic"),
            });
            *index += 1;
            current.clear();
            *current_tokens = 0;
        };

    for sentence in sentences {
        let sentence_tokens = count_tokens(&sentence);

        if sentence_tokens > chunk_size {
            flush(&mut current, &mut current_tokens, &mut index, &mut chunks);
            for sub in fixed_chunk(&sentence, chunk_size, chunk_overlap, source_metadata) {
                chunks.push(Chunk {
                    text: sub.text,
                    chunk_index: index,
                    token_count: sub.token_count,
                    metadata: base_metadata(source_metadata, index, "semantic"),
                });
                index += 1;
            }
            continue;
        }

        if current_tokens + sentence_tokens > chunk_size && !current.is_empty() {
            // Keep a sentence tail as overlap into the next chunk.
            let overlap: Vec<String> = if chunk_overlap > 0 {
                let mut kept: Vec<String> = Vec::new();
                let mut kept_tokens = 0;
                for prior in current.iter().rev() {
                    let t = count_tokens(prior);
                    if kept_tokens + t > chunk_overlap {
                        break;
                    }
                    kept.insert(0, prior.clone());
                    kept_tokens += t;
                }
                kept
            } else {
                Vec::new()
            };

            flush(&mut current, &mut current_tokens, &mut index, &mut chunks);
            current_tokens = overlap.iter().map(|s| count_tokens(s)).sum();
            current = overlap;
        }

        current_tokens += sentence_tokens;
        current.push(sentence);
    }

    flush(&mut current, &mut current_tokens, &mut index, &mut chunks);
    chunks
}

/// Split on sentence boundaries: terminal punctuation followed by
/// whitespace and an uppercase letter.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j].is_uppercase() {
                let sentence: String = chars[start..=i].iter().collect();
                let trimmed = sentence.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }

    let tail: String = chars[start..].iter().collect();
    let trimmed = tail.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_chunks_cover_text_with_overlap() {
        let text = "word ".repeat(300);
        let chunks = chunk_text(&text, ChunkingStrategy::Fixed, 100, 20, None);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
            assert_eq!(chunk.metadata["strategy"], serde_json::json!("fixed"));
        }
        // Sequential indices.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn short_text_is_one_recursive_chunk() {
        let chunks = chunk_text("just a short note", ChunkingStrategy::Recursive, 512, 50, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a short note");
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let para = "sentence content here ".repeat(30);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunk_text(&text, ChunkingStrategy::Recursive, 80, 0, None);

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.token_count <= 80, "chunk exceeds budget: {}", chunk.token_count);
        }
    }

    #[test]
    fn recursive_overlap_repeats_previous_tail() {
        let para = "alpha beta gamma delta ".repeat(20);
        let text = format!("{}\n\n{}", para, para);
        let chunks = chunk_text(&text, ChunkingStrategy::Recursive, 60, 10, None);

        assert!(chunks.len() >= 2);
        // Overlapped chunks embed the tail of the previous chunk.
        let first_tail: String = chunks[0].text.split_whitespace().rev().take(3).collect::<Vec<_>>().join(" ");
        assert!(!first_tail.is_empty());
    }

    #[test]
    fn semantic_groups_sentences() {
        let text = "Rust is fast. Rust is safe. Go compiles quickly. Python is dynamic.";
        let chunks = chunk_text(text, ChunkingStrategy::Semantic, 512, 0, None);

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Rust is fast."));
        assert_eq!(chunks[0].metadata["strategy"], serde_json::json!("semantic"));
    }

    #[test]
    fn semantic_splits_when_budget_is_tight() {
        let text = "The first sentence talks about retrieval systems. \
                    The second sentence covers evaluation metrics. \
                    The third sentence describes caching behavior. \
                    The fourth sentence explains auto tuning.";
        let chunks = chunk_text(text, ChunkingStrategy::Semantic, 12, 0, None);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        for strategy in [
            ChunkingStrategy::Fixed,
            ChunkingStrategy::Recursive,
            ChunkingStrategy::Semantic,
        ] {
            assert!(chunk_text("", strategy, 512, 50, None).is_empty());
            assert!(chunk_text("   \n  ", strategy, 512, 50, None).is_empty());
        }
    }

    #[test]
    fn paged_chunks_record_pages_and_global_indices() {
        let pages = vec![
            "First page content about searching.".to_string(),
            "Second page content about ranking.".to_string(),
        ];
        let chunks = chunk_document_pages(&pages, ChunkingStrategy::Recursive, 512, 0, None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata["page"], serde_json::json!(1));
        assert_eq!(chunks[1].metadata["page"], serde_json::json!(2));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].metadata["chunk_index"], serde_json::json!(1));
    }

    #[test]
    fn sentence_splitter_requires_uppercase_continuation() {
        let sentences = split_sentences("We shipped v1.2 today. Next up is v1.3!");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "We shipped v1.2 today.");

        // Lowercase continuation is not a boundary.
        let sentences = split_sentences("approx. values only");
        assert_eq!(sentences.len(), 1);
    }
}
