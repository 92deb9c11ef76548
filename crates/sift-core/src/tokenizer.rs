//! Tokenizers turn decoded text into terms.
//!
//! The index treats tokenization as an external collaborator: anything that
//! implements [`Tokenizer`] can be plugged in, including plain closures.

use crate::types::Term;
use unicode_segmentation::UnicodeSegmentation;

/// Maps raw text to a sequence of terms.
///
/// Implementations must be pure: the same text always yields the same terms.
/// The index calls the tokenizer once per added file and once per
/// modification.
pub trait Tokenizer: Send + Sync {
    /// Split text into terms. Duplicates are allowed.
    fn tokenize(&self, text: &str) -> Vec<Term>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<Term> + Send + Sync,
{
    fn tokenize(&self, text: &str) -> Vec<Term> {
        self(text)
    }
}

/// Splits text on Unicode word boundaries.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    /// Fold terms to lowercase
    pub lowercase: bool,

    /// Words longer than this (in bytes) are dropped
    pub max_term_length: usize,
}

impl Default for WordTokenizer {
    fn default() -> Self {
        WordTokenizer {
            lowercase: false,
            max_term_length: 255,
        }
    }
}

impl WordTokenizer {
    /// Create a tokenizer that folds terms to lowercase
    pub fn lowercase() -> Self {
        WordTokenizer {
            lowercase: true,
            ..Default::default()
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Term> {
        text.unicode_words()
            .filter(|word| word.len() <= self.max_term_length)
            .map(|word| {
                if self.lowercase {
                    Term::new(word.to_lowercase())
                } else {
                    Term::from(word)
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "words"
    }
}
