//! Minimal SQL tokenizer used by the safety gate. It recognizes just enough
//! structure (identifiers, quoted names, literals, punctuation) to find table
//! references; it is not a parser.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word, lower-cased.
    Word(String),
    /// `"name"`, `` `name` `` or `[name]`, lower-cased with quoting removed.
    Quoted(String),
    /// `'text'`; contents are irrelevant to the gate.
    StringLiteral,
    /// Anything starting with a digit, kept verbatim.
    Number(String),
    Punct(char),
}

impl Token {
    #[must_use]
    pub fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Self::Word(word) if word == keyword)
    }

    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Word(name) | Self::Quoted(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnterminatedQuote {
    pub opened_at: usize,
    pub quote: char,
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>, UnterminatedQuote> {
    let chars = sql.char_indices().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < chars.len() {
        let (offset, ch) = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        match ch {
            '\'' => {
                index = skip_quoted(&chars, index, '\'').ok_or(UnterminatedQuote {
                    opened_at: offset,
                    quote: ch,
                })?;
                tokens.push(Token::StringLiteral);
            }
            '"' | '`' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                let end = skip_quoted(&chars, index, close).ok_or(UnterminatedQuote {
                    opened_at: offset,
                    quote: ch,
                })?;
                let inner = chars[index + 1..end - 1]
                    .iter()
                    .map(|(_, ch)| *ch)
                    .collect::<String>();
                let doubled = format!("{close}{close}");
                let name = if ch == '[' {
                    inner
                } else {
                    inner.replace(&doubled, &close.to_string())
                };
                tokens.push(Token::Quoted(name.to_ascii_lowercase()));
                index = end;
            }
            _ if ch.is_ascii_digit() => {
                let start = index;
                while index < chars.len()
                    && (is_word_char(chars[index].1) || chars[index].1 == '.')
                {
                    index += 1;
                }
                tokens.push(Token::Number(collect(&chars[start..index])));
            }
            _ if is_word_start(ch) => {
                let start = index;
                while index < chars.len() && is_word_char(chars[index].1) {
                    index += 1;
                }
                tokens.push(Token::Word(collect(&chars[start..index]).to_ascii_lowercase()));
            }
            _ => {
                tokens.push(Token::Punct(ch));
                index += 1;
            }
        }
    }

    Ok(tokens)
}

/// Returns the index just past the closing quote. A doubled closing quote is
/// an escape, except for `[...]` which has none.
fn skip_quoted(chars: &[(usize, char)], open: usize, close: char) -> Option<usize> {
    let escapable = close != ']';
    let mut index = open + 1;
    while index < chars.len() {
        if chars[index].1 == close {
            if escapable && chars.get(index + 1).is_some_and(|(_, next)| *next == close) {
                index += 2;
                continue;
            }
            return Some(index + 1);
        }
        index += 1;
    }
    None
}

fn is_word_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

fn collect(chars: &[(usize, char)]) -> String {
    chars.iter().map(|(_, ch)| *ch).collect()
}
