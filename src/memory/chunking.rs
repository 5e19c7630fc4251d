//! Line-based text chunking with token-budget targets and overlap.

/// Clamped chunking parameters. Targets are approximate token counts; the
/// token estimate is chars/4, which tracks English prose closely enough for
/// retrieval purposes.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkParams {
    /// Clamp to the safe band: target in [100, 2000], overlap in [0, 100].
    pub fn clamped(target_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            target_tokens: target_tokens.clamp(100, 2000),
            overlap_tokens: overlap_tokens.min(100),
        }
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            target_tokens: 512,
            overlap_tokens: 32,
        }
    }
}

/// A bounded fragment with its 1-indexed source line range.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

pub fn approx_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

/// Split `lines` into chunks of roughly `target_tokens`, overlapping
/// consecutive chunks by roughly `overlap_tokens`. `line_offset` shifts the
/// reported line numbers (used when chunking a tail of a larger file).
pub fn chunk_lines(lines: &[&str], params: ChunkParams, line_offset: usize) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut tokens = 0usize;
        let mut end = start;
        while end < lines.len() {
            tokens += approx_tokens(lines[end]);
            end += 1;
            if tokens >= params.target_tokens {
                break;
            }
        }

        let text = lines[start..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(TextChunk {
                start_line: line_offset + start + 1,
                end_line: line_offset + end,
                text,
            });
        }

        if end >= lines.len() {
            break;
        }

        // Step back far enough to carry ~overlap_tokens into the next chunk,
        // but always move forward by at least one line.
        let mut overlap_lines = 0usize;
        let mut overlap_tokens = 0usize;
        while overlap_lines < end - start - 1 && overlap_tokens < params.overlap_tokens {
            overlap_tokens += approx_tokens(lines[end - 1 - overlap_lines]);
            overlap_lines += 1;
        }
        start = end - overlap_lines;
    }

    chunks
}

/// Convenience wrapper for whole-file chunking.
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<TextChunk> {
    let lines: Vec<&str> = text.lines().collect();
    chunk_lines(&lines, params, 0)
}
