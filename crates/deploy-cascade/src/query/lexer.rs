use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Term(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub kind: TokenKind,
    /// byte offset into the query
    pub offset: usize,
}

fn is_term_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '-' | '.' | '\\' | '_')
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

pub(super) fn tokenize(query: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = vec![];
    let mut chars = query.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let kind = match c {
            c if is_whitespace(c) => continue,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '&' => TokenKind::And,
            ':' => TokenKind::Or,
            '!' => TokenKind::Not,
            c if is_term_char(c) => {
                let mut end = offset + c.len_utf8();
                while let Some(&(next, c)) = chars.peek() {
                    if !is_term_char(c) {
                        break;
                    }
                    end = next + c.len_utf8();
                    chars.next();
                }
                TokenKind::Term(query[offset..end].to_string())
            }
            c => {
                return Err(SyntaxError::new(
                    query,
                    c.to_string(),
                    "unrecognized character",
                ))
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}
