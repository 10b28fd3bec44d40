//! Deterministic token counting.
//!
//! Measures text length in the model's approximate token units without a
//! network tokenizer: each maximal run of non-whitespace characters is
//! split into pieces of at most [`CHARS_PER_TOKEN`] characters, and each
//! piece counts as one token. The same counter is used for chunk
//! budgeting, overlap extraction, and window splitting, so every invariant
//! stated in token units is internally consistent.
//!
//! Byte spans are tracked alongside counts so that "the last N tokens of
//! this text" is an exact substring operation, never a character estimate.

/// Approximate characters per token. Matches the ratio commonly produced
/// by BPE tokenizers on Latin-script prose.
pub const CHARS_PER_TOKEN: usize = 4;

/// Count tokens in `text`. Pure and deterministic.
pub fn count_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut run_chars = 0;
    for ch in text.chars() {
        if ch.is_whitespace() {
            count += tokens_in_run(run_chars);
            run_chars = 0;
        } else {
            run_chars += 1;
        }
    }
    count + tokens_in_run(run_chars)
}

fn tokens_in_run(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Byte range of one token within the source text.
pub type TokenSpan = (usize, usize);

/// Compute the byte span of every token in `text`, in order.
pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut piece_start: Option<usize> = None;
    let mut piece_chars = 0;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = piece_start.take() {
                spans.push((start, idx));
                piece_chars = 0;
            }
            continue;
        }
        let start = *piece_start.get_or_insert(idx);
        piece_chars += 1;
        if piece_chars == CHARS_PER_TOKEN {
            spans.push((start, idx + ch.len_utf8()));
            piece_start = None;
            piece_chars = 0;
        }
    }
    if let Some(start) = piece_start {
        spans.push((start, text.len()));
    }
    spans
}

/// The suffix of `text` containing its last `n` tokens (the whole text
/// when it holds `n` tokens or fewer). Used to build inter-chunk overlap
/// measured in tokens, not characters.
pub fn tail_tokens(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let spans = token_spans(text);
    if spans.len() <= n {
        return text;
    }
    let start = spans[spans.len() - n].0;
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   \n\t "), 0);
        assert!(token_spans("  \n").is_empty());
    }

    #[test]
    fn test_short_words_one_token_each() {
        assert_eq!(count_tokens("uno dos tres"), 3);
        assert_eq!(token_spans("uno dos tres").len(), 3);
    }

    #[test]
    fn test_long_run_splits_into_pieces() {
        // 10 chars -> ceil(10/4) = 3 tokens
        assert_eq!(count_tokens("abcdefghij"), 3);
        let spans = token_spans("abcdefghij");
        assert_eq!(spans, vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn test_count_matches_spans() {
        let text = "Desembolso programado: 1.250.000 USD (CAF Realizado)\n\nSegundo párrafo.";
        assert_eq!(count_tokens(text), token_spans(text).len());
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "ñandú über 日本語テキスト";
        let spans = token_spans(text);
        for (start, end) in &spans {
            // Spans must be valid UTF-8 slice boundaries
            let _ = &text[*start..*end];
        }
        assert_eq!(spans.len(), count_tokens(text));
    }

    #[test]
    fn test_tail_tokens_exact() {
        let text = "a b c d e f";
        assert_eq!(tail_tokens(text, 2), "e f");
        assert_eq!(tail_tokens(text, 6), text);
        assert_eq!(tail_tokens(text, 100), text);
        assert_eq!(tail_tokens(text, 0), "");
    }

    #[test]
    fn test_deterministic() {
        let text = "Informe de auditoría 2024 — opinión sin salvedades.";
        assert_eq!(token_spans(text), token_spans(text));
        assert_eq!(count_tokens(text), count_tokens(text));
    }
}
