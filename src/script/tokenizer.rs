//! Command tokenizer for script templates.
//!
//! A token is either a quoted span (`'...'` or `"..."`, quotes kept) or a
//! maximal run of non-whitespace. An unmatched quote is not an error: it is
//! simply part of the surrounding non-whitespace run.

use regex::Regex;
use std::sync::LazyLock;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'.*?'|".*?"|\S+"#).unwrap());

/// Split one line into raw tokens.
pub fn tokenize_line(line: &str) -> Vec<String> {
    TOKEN_REGEX
        .find_iter(line)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Lazily tokenize every line of `script`, skipping lines with no tokens.
pub fn tokenize_script(script: &str) -> impl Iterator<Item = Vec<String>> + '_ {
    script
        .lines()
        .map(tokenize_line)
        .filter(|tokens| !tokens.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(
            tokenize_line("cargo build --release"),
            vec!["cargo", "build", "--release"]
        );
    }

    #[test]
    fn test_quoted_spans_keep_quotes_and_spaces() {
        assert_eq!(
            tokenize_line(r#"deploy --name 'svc $BRANCH' --msg "hello world""#),
            vec!["deploy", "--name", "'svc $BRANCH'", "--msg", "\"hello world\""]
        );
    }

    #[test]
    fn test_unmatched_quote_is_literal() {
        assert_eq!(tokenize_line("echo 'oops now"), vec!["echo", "'oops", "now"]);
    }

    #[test]
    fn test_quote_inside_word_does_not_start_span() {
        // The word alternative wins once a non-quote character starts the token.
        assert_eq!(
            tokenize_line("--name='svc main'"),
            vec!["--name='svc", "main'"]
        );
    }

    #[test]
    fn test_blank_and_whitespace_lines_are_skipped() {
        let script = "make build\n\n   \t\nmake deploy\n";
        let lines: Vec<Vec<String>> = tokenize_script(script).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], vec!["make", "build"]);
        assert_eq!(lines[1], vec!["make", "deploy"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let lines: Vec<Vec<String>> = tokenize_script("a b\r\nc\r\n").collect();
        assert_eq!(lines, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_empty_script() {
        assert_eq!(tokenize_script("").count(), 0);
    }
}
