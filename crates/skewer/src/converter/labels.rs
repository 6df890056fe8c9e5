use std::fs;
use std::path::Path;
use crate::error::{PipelineError, Result};

/// Class index to label text, loaded once and shared read-only.
///
/// One label per line: the class index is the line number, so a blank line
/// is an empty label rather than a skipped one. When a line carries a
/// single-quoted span (`{0: 'tench, Tinca tinca',`) the first such span is the
/// label, otherwise the trimmed line is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PipelineError::resource(format!("Failed to open labels file {}: {}", path.display(), err))
        })?;
        let table = Self::parse(&contents);
        if table.labels.iter().all(String::is_empty) {
            return Err(PipelineError::resource(format!("labels file {} is empty", path.display())));
        }
        Ok(table)
    }

    pub fn parse(contents: &str) -> Self {
        let labels = contents
            .lines()
            .map(str::trim)
            .map(|line| quoted_span(line).unwrap_or(line).to_string())
            .collect();
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn quoted_span(line: &str) -> Option<&str> {
    let start = line.find('\'')? + 1;
    let len = line[start..].find('\'')?;
    Some(&line[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_plain_and_quoted() {
        let table = LabelTable::parse("{0: 'tench, Tinca tinca',\n1: 'goldfish',\nbanana\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("tench, Tinca tinca"));
        assert_eq!(table.get(1), Some("goldfish"));
        assert_eq!(table.get(2), Some("banana"));
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn test_blank_line_keeps_index_of_later_labels() {
        let table = LabelTable::parse("tench\n\ngoldfish\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some(""));
        assert_eq!(table.get(2), Some("goldfish"));
    }

    #[test]
    fn test_unbalanced_quote_keeps_line() {
        let table = LabelTable::parse("it's\n");
        assert_eq!(table.get(0), Some("it's"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat\ndog").unwrap();
        let table = LabelTable::from_file(file.path()).unwrap();
        assert_eq!(table.get(1), Some("dog"));
    }

    #[test]
    fn test_unreadable_or_empty_file() {
        let err = LabelTable::from_file(Path::new("/nonexistent/labels.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let empty = tempfile::NamedTempFile::new().unwrap();
        let err = LabelTable::from_file(empty.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let mut blank = tempfile::NamedTempFile::new().unwrap();
        writeln!(blank, "\n\n").unwrap();
        let err = LabelTable::from_file(blank.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }
}
