//! Data loading for labelled text files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

/// A single training example: a string and its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub text: String,
    pub label: String,
}

impl Example {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Load a dataset of `label<TAB>text` lines.
///
/// Blank lines and `#` comments are skipped, as are lines without a tab.
pub fn load_tsv<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<Example>> {
    let file = File::open(path)?;
    read_tsv(BufReader::new(file))
}

/// Parse `label<TAB>text` lines from any reader.
pub fn read_tsv<R: BufRead>(reader: R) -> std::io::Result<Vec<Example>> {
    let mut examples = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once('\t') {
            Some((label, text)) if !label.trim().is_empty() => {
                examples.push(Example::new(text, label.trim()));
            }
            _ => warn!(line = lineno + 1, "skipping malformed dataset line"),
        }
    }

    Ok(examples)
}

/// Split examples into parallel text and label vectors.
pub fn unzip(examples: &[Example]) -> (Vec<String>, Vec<String>) {
    examples
        .iter()
        .map(|e| (e.text.clone(), e.label.clone()))
        .unzip()
}

/// Distinct labels in first-seen order.
///
/// Pass every split the model will be scored on, so that a label seen only in
/// held-out data still gets an output row.
pub fn label_names<'a, I>(examples: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Example>,
{
    let mut names: Vec<String> = Vec::new();
    for example in examples {
        if !names.contains(&example.label) {
            names.push(example.label.clone());
        }
    }
    names
}
