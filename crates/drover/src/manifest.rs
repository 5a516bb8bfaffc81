use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ManifestError;

/// Well-known manifest file at the root of an extracted tree.
pub const MANIFEST_FILE: &str = "Procfile";

fn valid_process_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse the manifest at the root of `dir` into `process type -> command`.
///
/// Blank lines and `#` comments are skipped. Each remaining line must read
/// `name: command`; the command is everything after the first colon, trimmed.
/// Declaring the same name twice is an error.
pub fn parse(dir: &Path) -> Result<BTreeMap<String, String>, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManifestError::Missing)
        }
        Err(e) => return Err(ManifestError::Io(e.to_string())),
    };
    parse_str(&text)
}

pub fn parse_str(text: &str) -> Result<BTreeMap<String, String>, ManifestError> {
    let mut entries = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((name, command)) = trimmed.split_once(':') else {
            return Err(ManifestError::Syntax { line });
        };
        let name = name.trim();
        if !valid_process_name(name) {
            return Err(ManifestError::InvalidName {
                line,
                name: name.to_string(),
            });
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(ManifestError::EmptyCommand {
                name: name.to_string(),
            });
        }
        if entries
            .insert(name.to_string(), command.to_string())
            .is_some()
        {
            return Err(ManifestError::Duplicate {
                name: name.to_string(),
            });
        }
    }
    Ok(entries)
}

/// Split a manifest command into argv without shell interpretation.
///
/// Whitespace separates arguments except inside single or double quotes;
/// quotes group but do not nest or escape.
pub fn split_command(command: &str) -> Result<Vec<String>, ManifestError> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        argv.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(ManifestError::UnterminatedQuote);
    }
    if in_word {
        argv.push(current);
    }
    if argv.is_empty() {
        return Err(ManifestError::EmptyCommand {
            name: String::new(),
        });
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_skips_comments() {
        let text = "# managed by deploy\nweb: bundle exec server -p 5000\n\nworker: run-worker\n";
        let entries = parse_str(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["web"], "bundle exec server -p 5000");
        assert_eq!(entries["worker"], "run-worker");
    }

    #[test]
    fn command_keeps_later_colons() {
        let entries = parse_str("web: serve --bind 0.0.0.0:8000\n").unwrap();
        assert_eq!(entries["web"], "serve --bind 0.0.0.0:8000");
    }

    #[test]
    fn rejects_missing_colon() {
        assert_eq!(
            parse_str("just some words\n"),
            Err(ManifestError::Syntax { line: 1 })
        );
    }

    #[test]
    fn rejects_invalid_names() {
        let err = parse_str("we b: run\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { line: 1, .. }));
    }

    #[test]
    fn rejects_duplicates() {
        let err = parse_str("web: one\nweb: two\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::Duplicate {
                name: "web".to_string()
            }
        );
    }

    #[test]
    fn rejects_empty_command() {
        let err = parse_str("web:   \n").unwrap_err();
        assert!(matches!(err, ManifestError::EmptyCommand { .. }));
    }

    #[test]
    fn missing_file_is_its_own_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(parse(dir.path()), Err(ManifestError::Missing));
    }

    #[test]
    fn split_plain_words() {
        assert_eq!(
            split_command("echo hello world").unwrap(),
            vec!["echo", "hello", "world"]
        );
    }

    #[test]
    fn split_respects_quotes() {
        assert_eq!(
            split_command("sh -c \"echo hello\"").unwrap(),
            vec!["sh", "-c", "echo hello"]
        );
        assert_eq!(
            split_command("run 'a b' c\"d e\"f").unwrap(),
            vec!["run", "a b", "cd ef"]
        );
    }

    #[test]
    fn split_handles_empty_quoted_argument() {
        assert_eq!(split_command("run \"\" next").unwrap(), vec!["run", "", "next"]);
    }

    #[test]
    fn split_rejects_unterminated_quote() {
        assert_eq!(
            split_command("run \"oops"),
            Err(ManifestError::UnterminatedQuote)
        );
    }

    #[test]
    fn split_rejects_blank_command() {
        assert!(matches!(
            split_command("   "),
            Err(ManifestError::EmptyCommand { .. })
        ));
    }
}
