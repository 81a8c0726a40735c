//! Token counting.
//!
//! "Tokens" are an abstract countable unit proportional to text length.
//! Callers supply the real, model-dependent counter; the engine treats it
//! as an opaque `text -> usize` contract. The default heuristic is
//! ~4 characters per token, accurate within ~10% for BPE tokenizers on
//! English text.

/// The caller-pluggable token counting contract.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Any plain function or closure works as a counter.
impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Character-based heuristic: 1 token ≈ 4 characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(HeuristicCounter.count(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(HeuristicCounter.count("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(HeuristicCounter.count("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(HeuristicCounter.count(&text), 25);
    }

    #[test]
    fn closures_are_counters() {
        let exact = |text: &str| text.split_whitespace().count();
        assert_eq!(exact.count("one two three"), 3);
    }
}
