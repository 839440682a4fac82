//! Slash/bracket path parsing
//!
//! Tree navigation uses paths like `PID/PID_5[0]/XPN_1`: names separated by
//! `/`, each optionally carrying a 0-based repetition index in brackets.
//! Names are case-insensitive and may be schema keys, long names, or
//! data-type aliases; resolution happens at each tree level.

use crate::{Error, Result};

/// One step of a parsed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathStep<'a> {
    pub name: &'a str,
    pub index: Option<usize>,
}

/// Split a path into steps, validating bracket syntax
pub(crate) fn parse_path(path: &str) -> Result<Vec<PathStep<'_>>> {
    let mut steps = Vec::new();
    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }
        if let Some(open) = part.find('[') {
            let close = part.find(']').ok_or_else(|| Error::InvalidPath {
                path: path.to_string(),
                reason: format!("unclosed bracket in '{part}'"),
            })?;
            if close != part.len() - 1 || close < open {
                return Err(Error::InvalidPath {
                    path: path.to_string(),
                    reason: format!("malformed index in '{part}'"),
                });
            }
            let index = part[open + 1..close]
                .parse::<usize>()
                .map_err(|_| Error::InvalidPath {
                    path: path.to_string(),
                    reason: format!("invalid index in '{part}'"),
                })?;
            steps.push(PathStep {
                name: &part[..open],
                index: Some(index),
            });
        } else {
            steps.push(PathStep {
                name: part,
                index: None,
            });
        }
    }
    if steps.is_empty() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "empty path".to_string(),
        });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_name() {
        let steps = parse_path("PID").unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "PID");
        assert_eq!(steps[0].index, None);
    }

    #[test]
    fn test_nested_with_indexes() {
        let steps = parse_path("PID/PID_13[2]/XTN_1").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].name, "PID_13");
        assert_eq!(steps[1].index, Some(2));
        assert_eq!(steps[2].index, None);
    }

    #[test]
    fn test_empty_segments_skipped() {
        let steps = parse_path("//PID//PID_5").unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_malformed_brackets() {
        assert!(parse_path("PID[0").is_err());
        assert!(parse_path("PID[x]").is_err());
        assert!(parse_path("PID[1]x").is_err());
        assert!(parse_path("").is_err());
    }
}
