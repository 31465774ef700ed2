//! `.env` files and the process environment
//!
//! `.env` lines follow the usual dotenv rules:
//!
//! - blank lines and lines starting with `#` are skipped
//! - an optional `export ` prefix is ignored
//! - keys are ASCII letters, digits, `_` and `.`, not starting with a digit
//! - unquoted values run to the end of the line or to a ` #` comment and are
//!   trimmed
//! - single-quoted values are literal
//! - double-quoted values understand `\n`, `\r`, `\t`, `\"`, `\\` and `\$`
//! - quoted values may span several lines
//!
//! Values are taken as written: `$VAR` and `${VAR}` are never expanded and the
//! process environment is never consulted or modified.
//!
//! Environment sources take the spec location as a prefix. With the default
//! `__` delimiter, prefix `APP` matches `APP__DATABASE__USER` and yields the
//! key `DATABASE__USER`; an empty prefix reads every variable.

use super::{FlatMap, SourceError, SourceResult};
use std::ffi::OsString;
use std::io::Read;
use std::str::Lines;
use tracing::debug;
use zeroize::Zeroizing;

/// Parse `.env` content into a flat map
///
/// Later duplicates of a key override earlier ones, as in a shell.
pub fn parse_dotenv<R: Read>(source_id: &str, mut reader: R) -> SourceResult<FlatMap> {
    let mut content = Zeroizing::new(String::new());
    reader.read_to_string(&mut content).map_err(|e| {
        let reason = match e.kind() {
            std::io::ErrorKind::InvalidData => "content is not valid UTF-8".to_string(),
            kind => format!("cannot read content: {}", kind),
        };
        SourceError::parse(source_id, reason)
    })?;
    parse_dotenv_str(source_id, &content)
}

/// Parse `.env` content held in memory
pub fn parse_dotenv_bytes(source_id: &str, bytes: &[u8]) -> SourceResult<FlatMap> {
    let content = std::str::from_utf8(bytes)
        .map_err(|_| SourceError::parse(source_id, "content is not valid UTF-8"))?;
    parse_dotenv_str(source_id, content)
}

/// Parse `.env` text
pub fn parse_dotenv_str(source_id: &str, content: &str) -> SourceResult<FlatMap> {
    let mut values = FlatMap::new();
    let mut lines = content.lines().enumerate();

    while let Some((index, line)) = lines.next() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Errors carry the line number only, the line may hold a secret
        let invalid = |reason: &str| SourceError::parse(source_id, format!("line {}: {}", index + 1, reason));

        let (key, rest) = split_assignment(strip_export(line)).ok_or_else(|| invalid("expected KEY=value"))?;
        let rest = rest.trim_start();

        let value = match rest.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let (value, tail) = read_quoted(&rest[1..], quote, &mut lines)
                    .ok_or_else(|| invalid("unterminated quoted value"))?;
                let tail = tail.trim_start();
                if !tail.is_empty() && !tail.starts_with('#') {
                    return Err(invalid("unexpected characters after closing quote"));
                }
                value
            }
            _ => unquoted_value(rest).to_string(),
        };

        values.insert(key.to_string(), value);
    }

    Ok(values)
}

fn strip_export(line: &str) -> &str {
    line.strip_prefix("export")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(str::trim_start)
        .unwrap_or(line)
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let key = &line[..end];
    if key.is_empty() || key.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let rest = line[end..].trim_start().strip_prefix('=')?;
    Some((key, rest))
}

/// Value up to an inline ` #` comment, trimmed
fn unquoted_value(rest: &str) -> &str {
    let mut after_space = true;
    for (i, c) in rest.char_indices() {
        if c == '#' && after_space {
            return rest[..i].trim_end();
        }
        after_space = c.is_whitespace();
    }
    rest.trim_end()
}

/// Read a quoted value starting after its opening quote, pulling further
/// lines while the quote is open
///
/// Returns the value and the text after the closing quote.
fn read_quoted<'a>(
    first: &'a str,
    quote: char,
    lines: &mut std::iter::Enumerate<Lines<'a>>,
) -> Option<(String, &'a str)> {
    let mut value = String::new();
    let mut segment = first;

    loop {
        let mut chars = segment.char_indices();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                return Some((value, &segment[i + c.len_utf8()..]));
            }
            if c == '\\' && quote == '"' {
                match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped @ ('"' | '\\' | '$'))) => value.push(escaped),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => value.push('\\'),
                }
                continue;
            }
            value.push(c);
        }

        let (_, next) = lines.next()?;
        value.push('\n');
        segment = next;
    }
}

/// Read the process environment, keeping variables under `prefix`
pub fn read_environment(prefix: &str, delimiter: &str) -> FlatMap {
    collect_environment(std::env::vars_os(), prefix, delimiter)
}

/// Filter and strip an environment snapshot
///
/// Variables whose name or value is not valid Unicode are skipped, and so are
/// names that do not form a key path (empty segments such as in
/// `__CF_USER_TEXT_ENCODING` or `A____B`). The prefix match ignores ASCII
/// case and must be followed by the delimiter, which is removed along with it.
pub fn collect_environment<I>(vars: I, prefix: &str, delimiter: &str) -> FlatMap
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut values = FlatMap::new();

    for (name, value) in vars {
        let (Ok(name), Ok(value)) = (name.into_string(), value.into_string()) else {
            continue;
        };

        let key = if prefix.is_empty() {
            Some(name.as_str())
        } else {
            strip_prefix_ignore_case(&name, prefix).and_then(|rest| rest.strip_prefix(delimiter))
        };

        match key {
            Some(key) if is_key_path(key, delimiter) => {
                values.insert(key.to_string(), value);
            }
            Some(_) => debug!(variable = %name, "Skipping environment variable that is not a key path"),
            None => {}
        }
    }

    values
}

fn is_key_path(key: &str, delimiter: &str) -> bool {
    if delimiter.is_empty() {
        return !key.is_empty();
    }
    key.split(delimiter).all(|segment| !segment.is_empty())
}

fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head = name.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        name.get(prefix.len()..)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_parse_dotenv() {
        let content = r#"
# Application settings
APP_NAME=Base
export DEBUG=true
DATABASE__USER="admin user"
DATABASE__PASSWORD='p@ss#word'
EMPTY=
"#;
        let values = parse_dotenv_bytes("dotenv", content.as_bytes()).unwrap();

        assert_eq!(values.get("APP_NAME").unwrap(), "Base");
        assert_eq!(values.get("DEBUG").unwrap(), "true");
        assert_eq!(values.get("DATABASE__USER").unwrap(), "admin user");
        assert_eq!(values.get("DATABASE__PASSWORD").unwrap(), "p@ss#word");
        assert_eq!(values.get("EMPTY").unwrap(), "");
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn test_parse_dotenv_last_duplicate_wins() {
        let values = parse_dotenv_bytes("dotenv", b"A=1\nA=2\n").unwrap();
        assert_eq!(values.get("A").unwrap(), "2");
    }

    #[test]
    fn test_parse_dotenv_rejects_malformed_line() {
        let result = parse_dotenv_bytes("dotenv", b"GOOD=1\nthis is not valid\n");
        match result {
            Err(SourceError::Parse { source_id, reason }) => {
                assert_eq!(source_id, "dotenv");
                assert!(!reason.contains("this is not valid"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_environment_with_prefix() {
        let snapshot = vars(&[
            ("APP__DATABASE__USER", "admin"),
            ("app__debug", "true"),
            ("APPLE", "fruit"),
            ("HOME", "/root"),
        ]);

        let values = collect_environment(snapshot, "APP", "__");

        assert_eq!(values.get("DATABASE__USER").unwrap(), "admin");
        assert_eq!(values.get("debug").unwrap(), "true");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_collect_environment_without_prefix() {
        let snapshot = vars(&[("A", "1"), ("B__C", "2")]);
        let values = collect_environment(snapshot, "", "__");
        assert_eq!(values.len(), 2);
        assert_eq!(values.get("B__C").unwrap(), "2");
    }

    #[test]
    fn test_collect_environment_skips_bare_prefix() {
        let snapshot = vars(&[("APP", "x"), ("APP__", "y")]);
        assert!(collect_environment(snapshot, "APP", "__").is_empty());
    }

    #[test]
    #[serial]
    fn test_dollar_signs_are_literal() {
        std::env::set_var("DOTENV_TEST_LEAK", "leaked");
        let content = "PASSWORD=ab$cd\nQUOTED=\"x$DOTENV_TEST_LEAK\"\nBRACED=${DOTENV_TEST_LEAK}\nSINGLE='$DOTENV_TEST_LEAK'\nESCAPED=\"a\\$b\"\n";
        let values = parse_dotenv_bytes("dotenv", content.as_bytes());
        std::env::remove_var("DOTENV_TEST_LEAK");

        let values = values.unwrap();
        assert_eq!(values.get("PASSWORD").unwrap(), "ab$cd");
        assert_eq!(values.get("QUOTED").unwrap(), "x$DOTENV_TEST_LEAK");
        assert_eq!(values.get("BRACED").unwrap(), "${DOTENV_TEST_LEAK}");
        assert_eq!(values.get("SINGLE").unwrap(), "$DOTENV_TEST_LEAK");
        assert_eq!(values.get("ESCAPED").unwrap(), "a$b");
    }

    #[test]
    fn test_parse_dotenv_quoting_rules() {
        let content = "URL=postgres://h/db?a=1#frag\nCOMMENTED=value # trailing\nSPACED =  padded value  \nESCAPES=\"line1\\nline2\\t\\\"q\\\"\"\nRAW='a\\nb'\nMULTI=\"first\nsecond\"\nexport_ME=1\nAFTER=ok\n";
        let values = parse_dotenv_bytes("dotenv", content.as_bytes()).unwrap();

        assert_eq!(values.get("URL").unwrap(), "postgres://h/db?a=1#frag");
        assert_eq!(values.get("COMMENTED").unwrap(), "value");
        assert_eq!(values.get("SPACED").unwrap(), "padded value");
        assert_eq!(values.get("ESCAPES").unwrap(), "line1\nline2\t\"q\"");
        assert_eq!(values.get("RAW").unwrap(), "a\\nb");
        assert_eq!(values.get("MULTI").unwrap(), "first\nsecond");
        assert_eq!(values.get("export_ME").unwrap(), "1");
        assert_eq!(values.get("AFTER").unwrap(), "ok");
    }

    #[test]
    fn test_parse_dotenv_rejects_bad_quoting() {
        for content in ["A=\"open\n", "A='x' junk\n", "1A=x\n", "=x\n"] {
            let err = parse_dotenv_bytes("dotenv", content.as_bytes()).unwrap_err();
            assert!(matches!(err, SourceError::Parse { .. }), "{:?}", content);
        }
    }

    #[test]
    fn test_parse_dotenv_rejects_invalid_utf8() {
        assert!(matches!(
            parse_dotenv_bytes("dotenv", b"A=\xff\n"),
            Err(SourceError::Parse { .. })
        ));
        assert!(matches!(
            parse_dotenv("dotenv", &b"A=\xff\n"[..]),
            Err(SourceError::Parse { .. })
        ));
    }

    #[test]
    fn test_collect_environment_skips_invalid_key_paths() {
        let snapshot = vars(&[
            ("__CF_USER_TEXT_ENCODING", "0x1F5"),
            ("TRAILING__", "x"),
            ("DOUBLED____KEY", "x"),
            ("DATABASE__USER", "admin"),
        ]);
        let values = collect_environment(snapshot, "", "__");
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("DATABASE__USER").unwrap(), "admin");

        let prefixed = vars(&[("APP____X", "1"), ("APP__Y", "2")]);
        let values = collect_environment(prefixed, "APP", "__");
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("Y").unwrap(), "2");
    }
}
