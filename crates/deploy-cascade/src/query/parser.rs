//! recursive descent over the token stream
//!
//! ```text
//! program := or EOF
//! or      := and (':' and)*
//! and     := unary ('&' unary)*
//! unary   := '!' unary | primary
//! primary := TERM | '(' or ')'
//! ```
use super::{
    lexer::{tokenize, Token, TokenKind},
    QueryExpression, SyntaxError,
};

pub(super) fn parse(query: &str) -> Result<QueryExpression, SyntaxError> {
    let tokens = tokenize(query)?;
    let mut parser = Parser {
        query,
        tokens,
        position: 0,
    };
    let expression = parser.or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token, "unexpected trailing input"));
    }
    tracing::trace!(query, %expression, "parsed query");
    Ok(expression)
}

struct Parser<'q> {
    query: &'q str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'q> Parser<'q> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next_if(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|token| &token.kind == kind) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn error_at(&self, token: &Token, reason: &'static str) -> SyntaxError {
        SyntaxError::new(self.query, self.query[token.offset..].to_string(), reason)
    }

    fn or(&mut self) -> Result<QueryExpression, SyntaxError> {
        let mut left = self.and()?;
        while self.next_if(&TokenKind::Or) {
            let right = self.and()?;
            left = QueryExpression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<QueryExpression, SyntaxError> {
        let mut left = self.unary()?;
        while self.next_if(&TokenKind::And) {
            let right = self.unary()?;
            left = QueryExpression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<QueryExpression, SyntaxError> {
        if self.next_if(&TokenKind::Not) {
            return Ok(QueryExpression::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<QueryExpression, SyntaxError> {
        let Some(token) = self.peek().cloned() else {
            return Err(SyntaxError::new(self.query, String::new(), "unexpected end of query"));
        };
        self.position += 1;

        match token.kind {
            TokenKind::Term(term) => Ok(QueryExpression::term(&term)),
            TokenKind::LParen => {
                let inner = self.or()?;
                if self.next_if(&TokenKind::RParen) {
                    return Ok(inner);
                }
                match self.peek() {
                    Some(unexpected) => Err(self.error_at(unexpected, "expected )")),
                    None => Err(self.error_at(&token, "unterminated parenthesis")),
                }
            }
            _ => Err(self.error_at(&token, "expected a term or (")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(query: &str) -> String {
        parse(query).unwrap().to_string()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(text("a:b&c"), "a : b & c");
        assert_eq!(text("(a:b)&c"), "(a : b) & c");
        assert!(matches!(parse("a:b&c").unwrap(), QueryExpression::Or(..)));
    }

    #[test]
    fn not_binds_tightest() {
        assert!(matches!(parse("!a&b").unwrap(), QueryExpression::And(..)));
        assert_eq!(text("!(a&b)"), "!(a & b)");
        assert_eq!(text("!!a"), "!!a");
    }

    #[test]
    fn syntax_errors_name_the_fragment() {
        let err = parse("(a & b").unwrap_err();
        assert_eq!(err.fragment, "(a & b");
        assert_eq!(err.reason, "unterminated parenthesis");

        let err = parse("a b").unwrap_err();
        assert_eq!(err.fragment, "b");

        let err = parse("a &").unwrap_err();
        assert_eq!(err.reason, "unexpected end of query");

        let err = parse("a & )").unwrap_err();
        assert_eq!(err.fragment, ")");

        assert!(parse("").is_err());
    }
}
