//! Separator-aware text splitter with fixed overlap.
//!
//! Splits unit text into [`Chunk`]s no longer than `max_chars` characters.
//! Each chunk boundary is placed after the coarsest separator available
//! inside the current window, falling back to finer separators and finally
//! to a hard character cut.
//!
//! # Algorithm
//!
//! 1. A window starts at `start` and may end anywhere in
//!    `(start + overlap_chars, start + max_chars]`.
//! 2. Separator levels are tried in priority order: paragraph break,
//!    line break, sentence end, whitespace. The chunk ends after the last
//!    occurrence of the first level found in the window.
//! 3. With no separator in the window the chunk is cut at `start + max_chars`.
//! 4. The next window starts `overlap_chars` characters before the end of
//!    the previous chunk, so adjacent chunks share exactly that many chars.
//! 5. The remainder becomes the final chunk once it fits in `max_chars`.
//!
//! Sizes are counted in `char`s, never bytes, so multi-byte text is never
//! cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use knowba_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(40, 10).unwrap();
//! let pieces = splitter.split_text("First paragraph here.\n\nSecond paragraph follows it.");
//! assert_eq!(pieces.len(), 2);
//! assert!(pieces.iter().all(|p| p.chars().count() <= 40));
//! ```

use anyhow::{bail, Result};

use crate::models::{Chunk, File, Unit};

/// Default separator levels, coarsest first.
pub const DEFAULT_SEPARATORS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &[" ", "\t"],
];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    max_chars: usize,
    overlap_chars: usize,
    separators: Vec<Vec<String>>,
}

impl TextSplitter {
    /// Create a splitter with the default separator levels.
    ///
    /// # Errors
    ///
    /// Fails when `max_chars` is zero or `overlap_chars >= max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            bail!("max_chars must be > 0");
        }
        if overlap_chars >= max_chars {
            bail!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                overlap_chars,
                max_chars
            );
        }
        Ok(Self {
            max_chars,
            overlap_chars,
            separators: DEFAULT_SEPARATORS
                .iter()
                .map(|level| level.iter().map(|s| s.to_string()).collect())
                .collect(),
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split every unit of a file, in unit order.
    pub fn split(&self, file: &File) -> Vec<Chunk> {
        file.units
            .iter()
            .flat_map(|unit| self.split_unit(unit))
            .collect()
    }

    /// Split one unit; each chunk carries a copy of the unit's metadata.
    pub fn split_unit(&self, unit: &Unit) -> Vec<Chunk> {
        self.split_text(&unit.content)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                text,
                metadata: unit.metadata.clone(),
                index,
            })
            .collect()
    }

    /// Split raw text. Empty text yields no pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut pieces = Vec::new();
        if len == 0 {
            return pieces;
        }

        let mut start = 0;
        loop {
            if len - start <= self.max_chars {
                pieces.push(chars[start..].iter().collect());
                break;
            }
            let end = self.find_end(&chars, start);
            pieces.push(chars[start..end].iter().collect());
            start = end - self.overlap_chars;
        }

        pieces
    }

    /// Pick the end (exclusive) of the chunk that starts at `start`.
    ///
    /// Always returns a value in `(start + overlap_chars, start + max_chars]`.
    fn find_end(&self, chars: &[char], start: usize) -> usize {
        let lo = start + self.overlap_chars + 1;
        let hi = start + self.max_chars;

        for level in &self.separators {
            for end in (lo..=hi).rev() {
                let hit = level.iter().any(|sep| {
                    let sep_len = sep.chars().count();
                    sep_len > 0
                        && end >= start + sep_len
                        && chars[end - sep_len..end].iter().copied().eq(sep.chars())
                });
                if hit {
                    return end;
                }
            }
        }

        hi
    }
}
