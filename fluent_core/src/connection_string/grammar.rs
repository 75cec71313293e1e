//! Text form of connection strings: `prefix://key=value;key=value`.
//!
//! Values may contain `;`, `=` and `\` when escaped with a backslash. A run
//! of `=` at the very end of a value is taken literally so base64 account
//! keys can be pasted without escaping. A backslash that does not start one
//! of the three escapes is a literal backslash, which keeps Windows paths
//! readable.

pub(crate) const PREFIX_SEPARATOR: &str = "://";
const SEGMENT_SEPARATOR: char = ';';
const KEY_VALUE_SEPARATOR: char = '=';
const ESCAPE: char = '\\';

/// Errors raised while parsing the text form of a connection string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("connection string has an empty prefix before '://'")]
    MissingPrefix,

    #[error("malformed segment '{segment}': {reason}")]
    MalformedSegment {
        segment: String,
        reason: &'static str,
    },

    #[error("unescaped '=' inside the value of segment '{segment}'")]
    UnescapedDelimiter { segment: String },
}

/// Result of splitting the raw text.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Parsed {
    /// No `://` marker: a vendor-native string passed through untouched.
    Native,
    Structured {
        prefix: String,
        pairs: Vec<(String, String)>,
    },
}

pub(crate) fn parse(text: &str) -> Result<Parsed, ParseError> {
    let Some((prefix, body)) = text.split_once(PREFIX_SEPARATOR) else {
        return Ok(Parsed::Native);
    };
    if prefix.is_empty() {
        return Err(ParseError::MissingPrefix);
    }
    if !prefix.chars().all(is_prefix_char) {
        // e.g. `AccountName=x;BlobEndpoint=https://...`
        return Ok(Parsed::Native);
    }

    let segments = split_segments(body);
    let last = segments.len() - 1;
    let mut pairs = Vec::with_capacity(segments.len());

    for (idx, segment) in segments.into_iter().enumerate() {
        if segment.is_empty() {
            if idx == last {
                // trailing ';' (or an empty body)
                continue;
            }
            return Err(malformed(segment, "empty segment"));
        }
        pairs.push(parse_segment(segment)?);
    }

    Ok(Parsed::Structured {
        prefix: prefix.to_string(),
        pairs,
    })
}

/// Splits on every `;` that is not part of an escape sequence.
fn split_segments(body: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (idx, c) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            ESCAPE => escaped = true,
            SEGMENT_SEPARATOR => {
                segments.push(&body[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&body[start..]);
    segments
}

fn parse_segment(segment: &str) -> Result<(String, String), ParseError> {
    let Some((key, raw_value)) = segment.split_once(KEY_VALUE_SEPARATOR) else {
        return Err(malformed(segment, "expected 'key=value'"));
    };
    validate_key(key).map_err(|reason| malformed(segment, reason))?;
    let value = unescape_value(raw_value, segment)?;
    Ok((key.to_string(), value))
}

pub(crate) fn validate_key(key: &str) -> Result<(), &'static str> {
    if key.trim().is_empty() {
        return Err("empty key");
    }
    if !key.chars().all(is_key_char) {
        return Err("keys may only contain letters, digits, '.', '_', '-' and blanks");
    }
    Ok(())
}

fn is_prefix_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ' | '\t')
}

fn unescape_value(raw: &str, segment: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            ESCAPE => match chars.peek() {
                Some(&(_, next @ (SEGMENT_SEPARATOR | KEY_VALUE_SEPARATOR | ESCAPE))) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(ESCAPE),
            },
            KEY_VALUE_SEPARATOR => {
                let rest = &raw[idx..];
                if rest.chars().all(|c| c == KEY_VALUE_SEPARATOR) {
                    out.push_str(rest);
                    break;
                }
                return Err(ParseError::UnescapedDelimiter {
                    segment: segment.to_string(),
                });
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Appends `value` to `out` with the escapes [`parse`] expects.
pub(crate) fn escape_value(value: &str, out: &mut String) {
    let body_len = value.trim_end_matches(KEY_VALUE_SEPARATOR).len();
    let (body, padding) = value.split_at(body_len);
    let mut chars = value.chars().peekable();
    let mut consumed = 0;

    while consumed < body.len() {
        let Some(c) = chars.next() else { break };
        consumed += c.len_utf8();
        match c {
            SEGMENT_SEPARATOR | KEY_VALUE_SEPARATOR => {
                out.push(ESCAPE);
                out.push(c);
            }
            ESCAPE => {
                // only escape a backslash the parser would otherwise fold
                // into the next character
                let needs_escape = matches!(
                    chars.peek(),
                    None | Some(&(SEGMENT_SEPARATOR | KEY_VALUE_SEPARATOR | ESCAPE))
                );
                if needs_escape {
                    out.push(ESCAPE);
                }
                out.push(ESCAPE);
            }
            c => out.push(c),
        }
    }

    out.push_str(padding);
}

fn malformed(segment: &str, reason: &'static str) -> ParseError {
    ParseError::MalformedSegment {
        segment: segment.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(text: &str) -> (String, Vec<(String, String)>) {
        match parse(text).unwrap() {
            Parsed::Structured { prefix, pairs } => (prefix, pairs),
            Parsed::Native => panic!("expected a structured connection string"),
        }
    }

    fn escaped(value: &str) -> String {
        let mut out = String::new();
        escape_value(value, &mut out);
        out
    }

    #[test]
    fn splits_prefix_and_pairs() {
        let (prefix, pairs) = structured("disk://path=/tmp/data;create=true");
        assert_eq!(prefix, "disk");
        assert_eq!(
            pairs,
            vec![
                ("path".to_string(), "/tmp/data".to_string()),
                ("create".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn text_without_marker_is_native() {
        assert_eq!(
            parse("DefaultEndpointsProtocol=https;AccountName=x").unwrap(),
            Parsed::Native
        );
        assert_eq!(parse("").unwrap(), Parsed::Native);
        assert_eq!(
            parse("AccountName=x;BlobEndpoint=https://x.blob.core.windows.net/").unwrap(),
            Parsed::Native
        );
    }

    #[test]
    fn trailing_separator_and_empty_body() {
        let (_, pairs) = structured("inmemory://a=1;");
        assert_eq!(pairs.len(), 1);

        let (prefix, pairs) = structured("inmemory://");
        assert_eq!(prefix, "inmemory");
        assert!(pairs.is_empty());
    }

    #[test]
    fn empty_value_is_kept() {
        let (_, pairs) = structured("x://key=");
        assert_eq!(pairs, vec![("key".to_string(), String::new())]);
    }

    #[test]
    fn whitespace_is_preserved() {
        let (_, pairs) = structured("x:// key = value ");
        assert_eq!(pairs, vec![(" key ".to_string(), " value ".to_string())]);
    }

    #[test]
    fn trailing_equals_run_is_literal() {
        let (_, pairs) = structured("x://key=abc==;other===");
        assert_eq!(pairs[0].1, "abc==");
        assert_eq!(pairs[1].1, "==");
    }

    #[test]
    fn interior_equals_must_be_escaped() {
        assert_eq!(
            parse("x://key=a=b"),
            Err(ParseError::UnescapedDelimiter {
                segment: "key=a=b".to_string()
            })
        );
        let (_, pairs) = structured(r"x://key=a\=b");
        assert_eq!(pairs[0].1, "a=b");
    }

    #[test]
    fn escapes_are_folded() {
        let (_, pairs) = structured(r"x://a=one\;two;b=back\\slash;c=C:\data\logs");
        assert_eq!(pairs[0].1, "one;two");
        assert_eq!(pairs[1].1, r"back\slash");
        assert_eq!(pairs[2].1, r"C:\data\logs");
    }

    #[test]
    fn malformed_segments() {
        assert!(matches!(
            parse("x://novalue"),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert!(matches!(
            parse("x://a=1;;b=2"),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert!(matches!(
            parse("x://=value"),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert!(matches!(
            parse(r"x://ke\y=value"),
            Err(ParseError::MalformedSegment { .. })
        ));
        assert_eq!(parse("://a=b"), Err(ParseError::MissingPrefix));
    }

    #[test]
    fn escape_value_matches_parser() {
        assert_eq!(escaped("plain"), "plain");
        assert_eq!(escaped("a;b"), r"a\;b");
        assert_eq!(escaped("a=b"), r"a\=b");
        assert_eq!(escaped("pad=="), "pad==");
        assert_eq!(escaped(r"C:\data"), r"C:\data");
        assert_eq!(escaped(r"ends\"), r"ends\\");
        assert_eq!(escaped(r"a\="), r"a\\=");
        assert_eq!(escaped(r"a\\b"), r"a\\\b");

        for value in ["a;b", "a=b", "pad==", r"C:\data", r"ends\", r"a\=", r"a\\b", "=x", ""] {
            let text = format!("x://k={}", escaped(value));
            let (_, pairs) = structured(&text);
            assert_eq!(pairs[0].1, value, "value {value:?} via {text:?}");
        }
    }
}
