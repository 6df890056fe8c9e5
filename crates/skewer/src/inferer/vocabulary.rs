use std::collections::HashMap;
use std::path::Path;
use crate::error::{PipelineError, Result};

/// Two-way word / index map read from `<word> <index>` lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    word_to_ix: HashMap<String, i64>,
    ix_to_word: HashMap<i64, String>,
}

impl Vocabulary {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            PipelineError::resource(format!("Failed to open vocabulary {}: {}", path.display(), err))
        })?;
        Self::parse(&contents)
    }

    /// Blank lines are skipped. Any other line must be exactly a word and an integer index.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut vocab = Self::default();
        for (line_no, line) in contents.lines().enumerate() {
            let mut parts = line.split_whitespace();
            let (word, index) = match (parts.next(), parts.next(), parts.next()) {
                (None, _, _) => continue,
                (Some(word), Some(index), None) => (word, index),
                _ => return Err(malformed(line_no, line)),
            };
            let index: i64 = index.parse().map_err(|_| malformed(line_no, line))?;
            vocab.word_to_ix.insert(word.to_string(), index);
            vocab.ix_to_word.insert(index, word.to_string());
        }
        if vocab.is_empty() {
            return Err(PipelineError::resource("vocabulary is empty"));
        }
        Ok(vocab)
    }

    pub fn index(&self, word: &str) -> Option<i64> {
        self.word_to_ix.get(word).copied()
    }

    pub fn word(&self, index: i64) -> Option<&str> {
        self.ix_to_word.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.word_to_ix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_to_ix.is_empty()
    }
}

fn malformed(line_no: usize, line: &str) -> PipelineError {
    PipelineError::resource(format!("vocabulary line {}: expected `<word> <index>`, got `{}`", line_no + 1, line))
}
