//! Translation of free-text queries into FTS5 MATCH expressions.

/// Words too common in documentation questions to be useful as keywords.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with", "how", "what",
    "when", "where", "which", "who", "why", "can", "do", "does", "should", "would",
];

/// Terms at least this long are also matched as prefixes.
const PREFIX_MIN_CHARS: usize = 3;

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Build an FTS5 query from user text.
///
/// Quoted phrases are kept as phrases; other words are lower-cased, stripped
/// of punctuation and stop words, quoted, and prefix-matched when long enough.
/// All parts are OR-ed so BM25 ranks partial matches. Returns an empty string
/// when nothing searchable remains.
pub fn build_fts_query(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let mut phrases = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let mut pieces = text.split('"');
    if let Some(first) = pieces.next() {
        remaining.push_str(first);
    }
    // Odd pieces sit between a pair of quotes; an unpaired trailing quote is plain text.
    let pieces: Vec<&str> = pieces.collect();
    for (i, piece) in pieces.iter().enumerate() {
        let closed = i % 2 == 0 && i + 1 < pieces.len();
        if closed && !piece.trim().is_empty() {
            phrases.push(*piece);
        } else if i % 2 == 1 || !closed {
            remaining.push(' ');
            remaining.push_str(piece);
        }
    }

    let mut parts = Vec::new();

    for phrase in phrases {
        let words: Vec<&str> = phrase
            .split_whitespace()
            .filter(|w| !is_stop_word(w))
            .collect();
        if !words.is_empty() {
            parts.push(format!("\"{}\"", words.join(" ")));
        }
    }

    for word in remaining.split_whitespace() {
        let term: String = word
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if term.chars().count() <= 1 || is_stop_word(&term) {
            continue;
        }
        if term.chars().count() >= PREFIX_MIN_CHARS {
            parts.push(format!("\"{}\"*", term));
        } else {
            parts.push(format!("\"{}\"", term));
        }
    }

    parts.join(" OR ")
}
