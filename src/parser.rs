//! Tokenizer and recursive-descent parser for bound expressions, guard predicates and
//! serialized domains.
//!
//! Grammar (usual precedence, left associative):
//!
//! ```text
//! expr      := term (('+' | '-') term)*
//! term      := unary (('*' | '/') unary)*
//! unary     := '-' unary | primary
//! primary   := INT | IDENT | ('min' | 'max') '(' expr (',' expr)+ ')' | '(' expr ')'
//! predicate := expr ('<' | '<=' | '>' | '>=' | '==' | '=') expr
//! ```

use crate::error::{Error, Result};
use crate::expr::BoundExpr;
use crate::loops::{Predicate, RelOp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Int(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Arrow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<i64>()
                .map_err(|_| Error::invalid_argument(format!("integer literal out of range: {}", text)))?;
            tokens.push(Token::Int(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '\'') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('-', Some('>')) => (Token::Arrow, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semi, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('=', _) => (Token::Eq, 1),
            _ => return Err(Error::invalid_argument(format!("unexpected character `{}` at offset {}", c, i))),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub(crate) fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes `token` if it is next.
    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, token: &Token) -> Result<()> {
        match self.bump() {
            Some(ref t) if t == token => Ok(()),
            Some(t) => Err(Error::invalid_argument(format!("expected {:?}, found {:?}", token, t))),
            None => Err(Error::invalid_argument(format!("expected {:?}, found end of input", token))),
        }
    }

    pub(crate) fn ident(&mut self) -> Result<String> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(Error::invalid_argument(format!("expected identifier, found {:?}", t))),
            None => Err(Error::invalid_argument("expected identifier, found end of input")),
        }
    }

    /// Fails unless every token has been consumed.
    pub(crate) fn finish(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(Error::invalid_argument(format!("trailing input starting at {:?}", t))),
        }
    }

    pub(crate) fn expr(&mut self) -> Result<BoundExpr> {
        let mut lhs = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                lhs = lhs + self.term()?;
            } else if self.eat(&Token::Minus) {
                lhs = lhs - self.term()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn term(&mut self) -> Result<BoundExpr> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                lhs = lhs * self.unary()?;
            } else if self.eat(&Token::Slash) {
                lhs = BoundExpr::div(lhs, self.unary()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<BoundExpr> {
        if self.eat(&Token::Minus) {
            // Negative literals stay literals.
            return Ok(match self.unary()? {
                BoundExpr::Int(v) => BoundExpr::Int(-v),
                e => -e,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<BoundExpr> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(BoundExpr::Int(v)),
            Some(Token::Ident(name)) if (name == "min" || name == "max") && self.peek() == Some(&Token::LParen) => {
                self.expect(&Token::LParen)?;
                let mut acc = self.expr()?;
                let mut arity = 1;
                while self.eat(&Token::Comma) {
                    let arg = self.expr()?;
                    acc = if name == "min" {
                        BoundExpr::min(acc, arg)
                    } else {
                        BoundExpr::max(acc, arg)
                    };
                    arity += 1;
                }
                self.expect(&Token::RParen)?;
                if arity < 2 {
                    return Err(Error::invalid_argument(format!("`{}` needs at least two arguments", name)));
                }
                Ok(acc)
            }
            Some(Token::Ident(name)) => Ok(BoundExpr::Var(name)),
            Some(Token::LParen) => {
                let e = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(t) => Err(Error::invalid_argument(format!("unexpected token {:?}", t))),
            None => Err(Error::invalid_argument("unexpected end of input")),
        }
    }

    pub(crate) fn rel_op(&mut self) -> Option<RelOp> {
        let op = match self.peek()? {
            Token::Lt => RelOp::Lt,
            Token::Le => RelOp::Le,
            Token::Gt => RelOp::Gt,
            Token::Ge => RelOp::Ge,
            Token::Eq => RelOp::Eq,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    pub(crate) fn predicate(&mut self) -> Result<Predicate> {
        let lhs = self.expr()?;
        let op = self
            .rel_op()
            .ok_or_else(|| Error::invalid_argument(format!("expected a comparison after `{}`", lhs)))?;
        let rhs = self.expr()?;
        Ok(Predicate::new(lhs, op, rhs))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("[n] -> {[i]: i <= n - 1}").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::LBracket,
                Token::Ident("n".into()),
                Token::RBracket,
                Token::Arrow,
                Token::LBrace,
                Token::LBracket,
                Token::Ident("i".into()),
                Token::RBracket,
                Token::Colon,
                Token::Ident("i".into()),
                Token::Le,
                Token::Ident("n".into()),
                Token::Minus,
                Token::Int(1),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_garbage() {
        assert!(tokenize("i % 2").is_err());
    }

    #[test]
    fn test_precedence() {
        let e: BoundExpr = "a + b * c - d".parse().unwrap();
        let expected = BoundExpr::var("a") + BoundExpr::var("b") * BoundExpr::var("c") - BoundExpr::var("d");
        assert_eq!(e, expected);
    }

    #[test]
    fn test_min_max_variadic() {
        let e: BoundExpr = "min(a, b, 3)".parse().unwrap();
        assert_eq!(e, BoundExpr::min(BoundExpr::min("a".into(), "b".into()), 3.into()));
        assert!("max(a)".parse::<BoundExpr>().is_err());
    }

    #[test]
    fn test_negative_literal() {
        let e: BoundExpr = "-3".parse().unwrap();
        assert_eq!(e, BoundExpr::int(-3));
        let e: BoundExpr = "-n".parse().unwrap();
        assert_eq!(e, -BoundExpr::var("n"));
    }

    #[test]
    fn test_predicate() {
        let mut p = Parser::new("i + j < n").unwrap();
        let pred = p.predicate().unwrap();
        assert_eq!(pred.op, RelOp::Lt);
        assert_eq!(pred.rhs, BoundExpr::var("n"));
        assert!(Parser::new("i + j").unwrap().predicate().is_err());
    }

    #[test]
    fn test_trailing_input() {
        assert!("n )".parse::<BoundExpr>().is_err());
    }
}
