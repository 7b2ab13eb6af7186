use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid window '{0}'. Expected 'MIN:MAX' in degrees (e.g., '10:60').")]
    InvalidWindowFormat(String),

    #[error("Invalid --set format: '{0}'. Expected KEY=VALUE.")]
    InvalidAssignment(String),

    #[error("Component '{component}' cannot be empty in '{input}'.")]
    EmptyComponent {
        component: &'static str,
        input: String,
    },
}

/// Parses an angular window given as `MIN:MAX`. Ordering is validated by the library.
pub fn parse_window(input: &str) -> Result<(f64, f64), ParseError> {
    let (min, max) = input
        .split_once(':')
        .ok_or_else(|| ParseError::InvalidWindowFormat(input.to_string()))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidWindowFormat(input.to_string()))
    };
    Ok((parse(min)?, parse(max)?))
}

/// Splits a `KEY=VALUE` assignment into its trimmed parts.
pub fn parse_assignment(input: &str) -> Result<(&str, &str), ParseError> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| ParseError::InvalidAssignment(input.to_string()))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() {
        return Err(ParseError::EmptyComponent {
            component: "key",
            input: input.to_string(),
        });
    }
    if value.is_empty() {
        return Err(ParseError::EmptyComponent {
            component: "value",
            input: input.to_string(),
        });
    }
    Ok((key, value))
}
