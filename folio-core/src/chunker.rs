//! Boundary-aware text chunking.
//!
//! Splits extracted page text into overlapping windows of a configured
//! size, extending each window up to 200 characters to close on a natural
//! boundary (newline or end of sentence) instead of mid-word. All offsets
//! are in Unicode scalar values, not bytes, so multi-byte text windows the
//! same way single-byte text does.

/// How far past the window boundary to scan for a natural break.
const SOFT_BOUNDARY_WINDOW: usize = 200;

/// Split `text` into overlapping chunks of roughly `size` characters.
///
/// The text is normalized first: `\r` becomes `\n`, every line is trimmed,
/// and lines are rejoined with `\n`. Blank pages yield no chunks. Each
/// window that stops short of the text end is extended to the nearest
/// newline or `". "` within the next 200 characters, whichever comes
/// first, so a chunk is at most `size + 200` characters long. Consecutive
/// chunks share `overlap` characters of context.
///
/// Forward progress is guaranteed for any inputs: `overlap` is clamped
/// below `size`, so every iteration advances at least one character.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let normalized = normalize(text);
    if normalized.chars().all(char::is_whitespace) {
        return Vec::new();
    }

    let size = size.max(1);
    let overlap = effective_overlap(size, overlap);

    let chars: Vec<char> = normalized.chars().collect();
    let n = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < n {
        let mut end = (start + size).min(n);
        if end < n {
            let soft = &chars[end..(end + SOFT_BOUNDARY_WINDOW).min(n)];
            if let Some(bump) = nearest_break(soft) {
                end += bump + 1;
            }
        }
        chunks.push(chars[start..end].iter().collect());
        if end >= n {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Clamp `overlap` below `size` so each window advances.
pub(crate) fn effective_overlap(size: usize, overlap: usize) -> usize {
    if overlap >= size { size - 1 } else { overlap }
}

/// Normalize line endings and per-line whitespace.
fn normalize(text: &str) -> String {
    text.replace('\r', "\n")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Offset of the nearest `\n` or `". "` in the soft window, if any.
fn nearest_break(soft: &[char]) -> Option<usize> {
    let newline = soft.iter().position(|&c| c == '\n');
    let sentence = soft
        .windows(2)
        .position(|pair| pair[0] == '.' && pair[1] == ' ');
    match (newline, sentence) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
