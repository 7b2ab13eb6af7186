use super::LoadError;
use crate::core::models::pattern::ExperimentalPattern;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Defines the interface for reading measured powder patterns from text formats.
///
/// Implementors handle format-specific tokenization; validation of the resulting
/// samples is left to [`ExperimentalPattern::new`].
pub trait PatternFile {
    /// Reads a pattern from a buffered reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The buffered reader to read from.
    /// * `source` - A human-readable name of the input, used in error messages.
    ///
    /// # Return
    ///
    /// Returns the parsed and validated experimental pattern.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the text cannot be tokenized or the samples are invalid.
    fn read_from(reader: &mut impl BufRead, source: &str)
    -> Result<ExperimentalPattern, LoadError>;

    /// Reads a pattern from a file path.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the file to read.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Io`] if the file cannot be opened, or any error of
    /// [`PatternFile::read_from`].
    fn read_from_path(path: &Path) -> Result<ExperimentalPattern, LoadError> {
        let source = path.to_string_lossy().to_string();
        let file = File::open(path).map_err(|e| LoadError::Io {
            path: source.clone(),
            source: e,
        })?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader, &source)
    }
}
