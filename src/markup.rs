//! Single-pass tokenizer for the inline markup users type into a turn.
//!
//! Grammar (spans never nest and never cross a line break):
//!
//! ```text
//! input     := (escape | directive | action | whisper | char)*
//! escape    := '\' ( '[' | ']' | '(' | ')' | '*' | '\' )
//! directive := '[' body ']'
//! action    := '(' body ')'      -- only when actions are enabled
//! whisper   := '*' body '*'      -- only when whispers are enabled
//! ```
//!
//! A span closes at the first matching unescaped delimiter. An opener with no
//! closer on the same line is kept as a literal character.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkupOptions {
    pub actions: bool,
    pub whispers: bool,
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self {
            actions: true,
            whispers: true,
        }
    }
}

impl MarkupOptions {
    pub fn directives_only() -> Self {
        Self {
            actions: false,
            whispers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Token {
    Text(String),
    Directive(String),
    Action(String),
    Whisper(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedInput {
    pub raw: String,
    pub cleaned: String,
    pub directives: Vec<String>,
    pub actions: Vec<String>,
    pub whispers: Vec<String>,
    pub tokens: Vec<Token>,
}

impl ParsedInput {
    pub fn has_hidden_content(&self) -> bool {
        !(self.directives.is_empty() && self.actions.is_empty() && self.whispers.is_empty())
    }
}

const ESCAPABLE: [char; 6] = ['[', ']', '(', ')', '*', '\\'];

pub fn tokenize(input: &str, options: MarkupOptions) -> Vec<Token> {
    let chars = input.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut index = 0usize;

    while index < chars.len() {
        let character = chars[index];

        if character == '\\' {
            match chars.get(index + 1) {
                Some(next) if ESCAPABLE.contains(next) => {
                    text.push(*next);
                    index += 2;
                }
                _ => {
                    text.push(character);
                    index += 1;
                }
            }
            continue;
        }

        let Some(closer) = closer_for(character, options) else {
            text.push(character);
            index += 1;
            continue;
        };

        match scan_span(&chars, index + 1, closer) {
            Some((body, end)) => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                let body = body.trim();
                if !body.is_empty() {
                    tokens.push(span_token(character, body.to_owned()));
                }
                index = end + 1;
            }
            None => {
                text.push(character);
                index += 1;
            }
        }
    }

    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }

    tokens
}

pub fn parse(input: &str, options: MarkupOptions) -> ParsedInput {
    let mut parsed = ParsedInput {
        raw: input.to_owned(),
        ..ParsedInput::default()
    };
    let mut text = String::new();

    let tokens = tokenize(input, options);
    for token in &tokens {
        let (bucket, body) = match token {
            Token::Text(chunk) => {
                text.push_str(chunk);
                continue;
            }
            Token::Directive(body) => (&mut parsed.directives, body),
            Token::Action(body) => (&mut parsed.actions, body),
            Token::Whisper(body) => (&mut parsed.whispers, body),
        };
        text.push(' ');
        bucket.push(body.clone());
    }

    parsed.cleaned = collapse_whitespace(&text);
    parsed.tokens = tokens;
    parsed
}

fn closer_for(opener: char, options: MarkupOptions) -> Option<char> {
    match opener {
        '[' => Some(']'),
        '(' if options.actions => Some(')'),
        '*' if options.whispers => Some('*'),
        _ => None,
    }
}

fn span_token(opener: char, body: String) -> Token {
    match opener {
        '(' => Token::Action(body),
        '*' => Token::Whisper(body),
        _ => Token::Directive(body),
    }
}

/// Returns the unescaped body and the index of the closing delimiter.
fn scan_span(chars: &[char], start: usize, closer: char) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut index = start;

    while index < chars.len() {
        let character = chars[index];
        if character == '\n' {
            return None;
        }
        if character == '\\' {
            if let Some(next) = chars.get(index + 1).filter(|next| ESCAPABLE.contains(next)) {
                body.push(*next);
                index += 2;
                continue;
            }
        }
        if character == closer {
            return Some((body, index));
        }
        body.push(character);
        index += 1;
    }

    None
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::{MarkupOptions, Token, parse, tokenize};

    #[test]
    fn extracts_directives_in_order_and_cleans_text() {
        let parsed = parse(
            "Hello [be cheerful] there [mention the rain]!",
            MarkupOptions::default(),
        );
        assert_eq!(parsed.cleaned, "Hello there !");
        assert_eq!(parsed.directives, vec!["be cheerful", "mention the rain"]);
        assert_eq!(parsed.tokens.len(), 5);
    }

    #[test]
    fn unbalanced_brackets_stay_literal() {
        let parsed = parse("open [bracket and ] close ] stray [", MarkupOptions::default());
        assert_eq!(parsed.directives, vec!["bracket and"]);
        assert_eq!(parsed.cleaned, "open close ] stray [");

        let parsed = parse("no closer [here", MarkupOptions::default());
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.cleaned, "no closer [here");
    }

    #[test]
    fn span_closes_at_first_closer() {
        let parsed = parse("[outer [inner] tail]", MarkupOptions::default());
        assert_eq!(parsed.directives, vec!["outer [inner"]);
        assert_eq!(parsed.cleaned, "tail]");
    }

    #[test]
    fn spans_do_not_cross_line_breaks() {
        let parsed = parse("[first\nsecond]", MarkupOptions::default());
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.cleaned, "[first\nsecond]");
    }

    #[test]
    fn backslash_escapes_keep_delimiters_literal() {
        let parsed = parse(r"array\[0\] is *not* \*bold\*", MarkupOptions::default());
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.whispers, vec!["not"]);
        assert_eq!(parsed.cleaned, "array[0] is *bold*");
    }

    #[test]
    fn escaped_closer_inside_directive_is_kept() {
        let parsed = parse(r"[say \] twice]", MarkupOptions::default());
        assert_eq!(parsed.directives, vec!["say ] twice"]);
        assert_eq!(parsed.cleaned, "");
    }

    #[test]
    fn actions_and_whispers_are_optional() {
        let input = "I wave (smiling) and *psst* leave";
        let with_all = parse(input, MarkupOptions::default());
        assert_eq!(with_all.actions, vec!["smiling"]);
        assert_eq!(with_all.whispers, vec!["psst"]);
        assert_eq!(with_all.cleaned, "I wave and leave");

        let directives_only = parse(input, MarkupOptions::directives_only());
        assert!(directives_only.actions.is_empty());
        assert!(directives_only.whispers.is_empty());
        assert_eq!(directives_only.cleaned, input);
    }

    #[test]
    fn empty_spans_are_removed_without_entries() {
        let parsed = parse("hi [ ] there", MarkupOptions::default());
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.cleaned, "hi there");
    }

    #[test]
    fn token_stream_preserves_order() {
        let tokens = tokenize("a [b] (c) *d*", MarkupOptions::default());
        assert_eq!(
            tokens,
            vec![
                Token::Text("a ".into()),
                Token::Directive("b".into()),
                Token::Text(" ".into()),
                Token::Action("c".into()),
                Token::Text(" ".into()),
                Token::Whisper("d".into()),
            ]
        );
    }

    #[test]
    fn lone_backslash_is_literal() {
        let parsed = parse(r"path\to\file", MarkupOptions::default());
        assert_eq!(parsed.cleaned, r"path\to\file");
    }
}
