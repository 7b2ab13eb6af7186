use super::LoadError;
use super::traits::PatternFile;
use crate::core::models::pattern::ExperimentalPattern;
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;

/// Comma-separated `two_theta,intensity[,sigma]` rows with an optional header line.
pub struct CsvPattern;

/// Whitespace-separated `two_theta intensity [sigma]` rows.
pub struct XyPattern;

#[derive(Default)]
struct Columns {
    two_theta: Vec<f64>,
    intensity: Vec<f64>,
    sigma: Vec<f64>,
}

impl Columns {
    fn push_row<'a>(
        &mut self,
        fields: impl Iterator<Item = &'a str>,
        source: &str,
        line: usize,
    ) -> Result<(), LoadError> {
        let values = fields
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| f.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoadError::Parse {
                path: source.to_string(),
                line,
                message: e.to_string(),
            })?;

        match values.as_slice() {
            [x, y] => {
                self.two_theta.push(*x);
                self.intensity.push(*y);
            }
            [x, y, s, ..] => {
                self.two_theta.push(*x);
                self.intensity.push(*y);
                self.sigma.push(*s);
            }
            _ => {
                return Err(LoadError::Parse {
                    path: source.to_string(),
                    line,
                    message: format!("expected 2 or 3 numeric columns, found {}", values.len()),
                });
            }
        }
        Ok(())
    }

    fn into_pattern(self, source: &str) -> Result<ExperimentalPattern, LoadError> {
        let sigma = if self.sigma.is_empty() {
            None
        } else if self.sigma.len() == self.two_theta.len() {
            Some(self.sigma)
        } else {
            return Err(LoadError::Parse {
                path: source.to_string(),
                line: 0,
                message: "uncertainty column is present on some rows only".to_string(),
            });
        };
        ExperimentalPattern::new(self.two_theta, self.intensity, sigma).map_err(|e| {
            LoadError::Pattern {
                path: source.to_string(),
                source: e,
            }
        })
    }
}

fn looks_like_header(first_field: &str) -> bool {
    first_field.trim().parse::<f64>().is_err()
}

impl PatternFile for CsvPattern {
    fn read_from(
        reader: &mut impl BufRead,
        source: &str,
    ) -> Result<ExperimentalPattern, LoadError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut columns = Columns::default();
        for (index, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| LoadError::Csv {
                path: source.to_string(),
                source: e,
            })?;
            let line = record.position().map_or(index + 1, |p| p.line() as usize);
            if index == 0 && record.get(0).is_some_and(looks_like_header) {
                continue;
            }
            columns.push_row(record.iter(), source, line)?;
        }
        columns.into_pattern(source)
    }
}

impl PatternFile for XyPattern {
    fn read_from(
        reader: &mut impl BufRead,
        source: &str,
    ) -> Result<ExperimentalPattern, LoadError> {
        let mut columns = Columns::default();
        let mut seen_data = false;
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| LoadError::Io {
                path: source.to_string(),
                source: e,
            })?;
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            if !seen_data && content.split_whitespace().next().is_some_and(looks_like_header) {
                continue;
            }
            seen_data = true;
            columns.push_row(content.split_whitespace(), source, index + 1)?;
        }
        columns.into_pattern(source)
    }
}

/// Reads a pattern, choosing the format from the file extension (`.csv` is
/// comma-separated, anything else is treated as whitespace-separated).
pub fn read_pattern(path: &Path) -> Result<ExperimentalPattern, LoadError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        CsvPattern::read_from_path(path)
    } else {
        XyPattern::read_from_path(path)
    }
}

#[derive(Debug, Serialize)]
struct ProfileRow {
    two_theta: f64,
    observed: f64,
    calculated: f64,
    difference: f64,
}

/// Writes observed, calculated and difference curves as CSV with a header row.
pub fn write_profile_csv(
    path: &Path,
    two_theta: &[f64],
    observed: &[f64],
    calculated: &[f64],
) -> Result<(), LoadError> {
    let source = path.to_string_lossy().to_string();
    let mut writer = csv::Writer::from_path(path).map_err(|e| LoadError::Csv {
        path: source.clone(),
        source: e,
    })?;
    for ((&x, &obs), &calc) in two_theta.iter().zip(observed).zip(calculated) {
        writer
            .serialize(ProfileRow {
                two_theta: x,
                observed: obs,
                calculated: calc,
                difference: obs - calc,
            })
            .map_err(|e| LoadError::Csv {
                path: source.clone(),
                source: e,
            })?;
    }
    writer.flush().map_err(|e| LoadError::Io {
        path: source,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn csv_with_header_and_comments_is_parsed() {
        let text = "# exported pattern\ntwo_theta,intensity\n10.0,5.0\n10.1,7.0\n# trailing\n10.2,9.0\n";
        let pattern = CsvPattern::read_from(&mut Cursor::new(text), "mem").unwrap();
        assert_eq!(pattern.original().two_theta(), &[10.0, 10.1, 10.2]);
        assert_eq!(pattern.original().intensity(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn csv_third_column_is_used_as_uncertainty() {
        let text = "10.0,4.0,0.5\n10.1,9.0,0.25\n";
        let pattern = CsvPattern::read_from(&mut Cursor::new(text), "mem").unwrap();
        assert_eq!(pattern.original().sigma(), &[0.5, 0.25]);
    }

    #[test]
    fn xy_with_whitespace_columns_is_parsed() {
        let text = "  # header comment\n10.0   16.0\n10.1\t25.0  # inline\n\n10.2 36.0\n";
        let pattern = XyPattern::read_from(&mut Cursor::new(text), "mem").unwrap();
        assert_eq!(pattern.original().len(), 3);
        assert_eq!(pattern.original().sigma(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn non_numeric_data_row_reports_the_line() {
        let text = "10.0 1.0\n10.1 abc\n";
        let result = XyPattern::read_from(&mut Cursor::new(text), "mem");
        assert!(matches!(result, Err(LoadError::Parse { line: 2, .. })));
    }

    #[test]
    fn single_column_rows_are_rejected() {
        let text = "10.0\n";
        let result = XyPattern::read_from(&mut Cursor::new(text), "mem");
        assert!(matches!(result, Err(LoadError::Parse { .. })));
    }

    #[test]
    fn decreasing_angles_surface_as_pattern_errors() {
        let text = "10.1,1.0\n10.0,1.0\n";
        let result = CsvPattern::read_from(&mut Cursor::new(text), "mem");
        assert!(matches!(result, Err(LoadError::Pattern { .. })));
    }

    #[test]
    fn read_pattern_dispatches_on_extension() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("scan.csv");
        fs::write(&csv_path, "10.0,1.0\n10.1,2.0\n").unwrap();
        let xy_path = dir.path().join("scan.xy");
        fs::write(&xy_path, "10.0 1.0\n10.1 2.0\n").unwrap();
        assert_eq!(read_pattern(&csv_path).unwrap().original().len(), 2);
        assert_eq!(read_pattern(&xy_path).unwrap().original().len(), 2);
    }

    #[test]
    fn missing_file_reports_io_error() {
        let dir = tempdir().unwrap();
        let result = read_pattern(&dir.path().join("absent.xy"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn profile_csv_contains_header_and_difference_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.csv");
        write_profile_csv(&path, &[10.0, 10.1], &[5.0, 6.0], &[4.0, 6.5]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("two_theta,observed,calculated,difference")
        );
        assert_eq!(lines.next(), Some("10.0,5.0,4.0,1.0"));
        assert_eq!(lines.next(), Some("10.1,6.0,6.5,-0.5"));
    }
}
