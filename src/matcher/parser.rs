//! Tokenizer and recursive-descent parser for route predicates.

use super::ast::{CmpOp, FilterExpr, LeafTest, Operand, Path, PathRoot, Segment, Selector};
use crate::utils::{DispatchError, DispatchResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dollar,
    At,
    Dot,
    DotDot,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Question,
    Not,
    AndAnd,
    OrOr,
    Op(CmpOp),
    Ident(String),
    Str(String),
    Number(String),
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

#[derive(Debug)]
struct ParseError {
    offset: usize,
    reason: String,
}

type ParseResult<T> = Result<T, ParseError>;

/// Parse predicate text into its path and optional top-level leaf test.
///
/// Lines starting with `#` are comments. Offsets in errors refer to the
/// original text.
pub(crate) fn parse(source_name: &str, text: &str) -> DispatchResult<(Path, Option<LeafTest>)> {
    let stripped = strip_comments(text);
    let to_dispatch_error = |e: ParseError| DispatchError::routing(source_name, e.offset, e.reason);

    let tokens = Tokenizer::new(&stripped).tokenize().map_err(to_dispatch_error)?;
    Parser { tokens, pos: 0 }
        .parse_predicate()
        .map_err(to_dispatch_error)
}

fn strip_comments(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if line.trim_start().starts_with('#') {
                " ".repeat(line.len())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Tokenizer { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, offset: usize, reason: impl Into<String>) -> ParseResult<T> {
        Err(ParseError {
            offset,
            reason: reason.into(),
        })
    }

    fn tokenize(mut self) -> ParseResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            }

            let offset = self.pos;
            let Some(ch) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    offset,
                });
                return Ok(tokens);
            };

            let token = match ch {
                '$' | '@' | '*' | '[' | ']' | '(' | ')' | ',' | ':' | '?' => {
                    self.bump();
                    match ch {
                        '$' => Token::Dollar,
                        '@' => Token::At,
                        '*' => Token::Star,
                        '[' => Token::LBracket,
                        ']' => Token::RBracket,
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        ',' => Token::Comma,
                        ':' => Token::Colon,
                        _ => Token::Question,
                    }
                }
                '.' => {
                    self.bump();
                    if self.eat('.') {
                        Token::DotDot
                    } else {
                        Token::Dot
                    }
                }
                '!' => {
                    self.bump();
                    if self.eat('=') {
                        Token::Op(CmpOp::Ne)
                    } else {
                        Token::Not
                    }
                }
                '=' => {
                    self.bump();
                    self.eat('=');
                    Token::Op(CmpOp::Eq)
                }
                '<' => {
                    self.bump();
                    if self.eat('=') {
                        Token::Op(CmpOp::Le)
                    } else {
                        Token::Op(CmpOp::Lt)
                    }
                }
                '>' => {
                    self.bump();
                    if self.eat('=') {
                        Token::Op(CmpOp::Ge)
                    } else {
                        Token::Op(CmpOp::Gt)
                    }
                }
                '&' => {
                    self.bump();
                    if !self.eat('&') {
                        return self.error(offset, "expected '&&'");
                    }
                    Token::AndAnd
                }
                '|' => {
                    self.bump();
                    if !self.eat('|') {
                        return self.error(offset, "expected '||'");
                    }
                    Token::OrOr
                }
                '\'' | '"' => self.read_string(offset, ch)?,
                '-' | '0'..='9' => self.read_number(offset)?,
                c if c.is_alphabetic() || c == '_' => self.read_ident(),
                other => return self.error(offset, format!("unexpected character '{}'", other)),
            };
            tokens.push(Spanned { token, offset });
        }
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            self.bump();
        }
        Token::Ident(self.input[start..self.pos].to_string())
    }

    fn read_number(&mut self, offset: usize) -> ParseResult<Token> {
        let start = self.pos;
        self.eat('-');
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return self.error(offset, "expected a digit");
        }
        self.consume_digits();

        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.consume_digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if !self.eat('+') {
                self.eat('-');
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return self.error(offset, "malformed exponent");
            }
            self.consume_digits();
        }

        Ok(Token::Number(self.input[start..self.pos].to_string()))
    }

    fn consume_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    fn read_string(&mut self, offset: usize, quote: char) -> ParseResult<Token> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return self.error(offset, "unterminated string literal"),
                Some(c) if c == quote => return Ok(Token::Str(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('b') => '\u{0008}',
                        Some('f') => '\u{000C}',
                        Some('u') => self.read_unicode_escape()?,
                        Some(c @ ('"' | '\'' | '\\' | '/')) => c,
                        Some(other) => {
                            return self.error(self.pos, format!("unknown escape '\\{}'", other))
                        }
                        None => return self.error(offset, "unterminated string literal"),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> ParseResult<char> {
        let start = self.pos;
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| ParseError {
                    offset: start,
                    reason: "expected four hex digits after '\\u'".to_string(),
                })?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| ParseError {
            offset: start,
            reason: format!("invalid unicode scalar \\u{:04x}", code),
        })
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at<T>(&self, offset: usize, reason: impl Into<String>) -> ParseResult<T> {
        Err(ParseError {
            offset,
            reason: reason.into(),
        })
    }

    fn expect(&mut self, expected: Token, what: &str) -> ParseResult<()> {
        let offset = self.offset();
        let found = self.advance();
        if found == expected {
            Ok(())
        } else {
            self.error_at(offset, format!("expected {}, found {:?}", what, found))
        }
    }

    fn comparison_op(&self) -> Option<CmpOp> {
        match self.peek() {
            Token::Op(op) => Some(*op),
            Token::Ident(word) if word == "contains" => Some(CmpOp::Contains),
            Token::Ident(word) if word == "in" => Some(CmpOp::In),
            _ => None,
        }
    }

    fn parse_predicate(&mut self) -> ParseResult<(Path, Option<LeafTest>)> {
        if *self.peek() != Token::Dollar {
            return self.error_at(self.offset(), "predicate must start with '$'");
        }
        self.advance();
        let path = Path {
            root: PathRoot::Document,
            segments: self.parse_segments()?,
        };

        let test = match self.comparison_op() {
            Some(op) => {
                self.advance();
                let literal = self.parse_literal()?;
                Some(LeafTest { op, literal })
            }
            None => None,
        };

        if *self.peek() != Token::Eof {
            return self.error_at(self.offset(), format!("unexpected {:?}", self.peek()));
        }
        Ok((path, test))
    }

    fn parse_segments(&mut self) -> ParseResult<Vec<Segment>> {
        let mut segments = Vec::new();
        loop {
            let offset = self.offset();
            let segment = match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Star => Segment::Child(vec![Selector::Wildcard]),
                        Token::Ident(name) => Segment::Child(vec![Selector::Name(name)]),
                        other => {
                            return self.error_at(
                                offset,
                                format!("expected a name or '*' after '.', found {:?}", other),
                            )
                        }
                    }
                }
                Token::DotDot => {
                    self.advance();
                    match self.peek().clone() {
                        Token::Star => {
                            self.advance();
                            Segment::Descendant(vec![Selector::Wildcard])
                        }
                        Token::Ident(name) => {
                            self.advance();
                            Segment::Descendant(vec![Selector::Name(name)])
                        }
                        Token::LBracket => Segment::Descendant(self.parse_bracket()?),
                        other => {
                            return self.error_at(
                                offset,
                                format!("expected a name, '*' or '[' after '..', found {:?}", other),
                            )
                        }
                    }
                }
                Token::LBracket => Segment::Child(self.parse_bracket()?),
                _ => break,
            };
            segments.push(segment);
        }
        Ok(segments)
    }

    fn parse_bracket(&mut self) -> ParseResult<Vec<Selector>> {
        self.expect(Token::LBracket, "'['")?;
        let mut selectors = vec![self.parse_selector()?];
        while *self.peek() == Token::Comma {
            self.advance();
            selectors.push(self.parse_selector()?);
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(selectors)
    }

    fn parse_selector(&mut self) -> ParseResult<Selector> {
        let offset = self.offset();
        match self.peek().clone() {
            Token::Str(name) => {
                self.advance();
                Ok(Selector::Name(name))
            }
            Token::Star => {
                self.advance();
                Ok(Selector::Wildcard)
            }
            Token::Question => {
                self.advance();
                self.expect(Token::LParen, "'(' after '?'")?;
                let filter = self.parse_or()?;
                self.expect(Token::RParen, "')' closing the filter")?;
                Ok(Selector::Filter(Box::new(filter)))
            }
            Token::Number(_) | Token::Colon => self.parse_index_or_slice(),
            other => self.error_at(offset, format!("unexpected {:?} in brackets", other)),
        }
    }

    fn parse_index_or_slice(&mut self) -> ParseResult<Selector> {
        let offset = self.offset();
        let start = self.parse_optional_int()?;
        if *self.peek() != Token::Colon {
            return match start {
                Some(index) => Ok(Selector::Index(index)),
                None => self.error_at(offset, "expected an index"),
            };
        }
        self.advance();
        let end = self.parse_optional_int()?;

        let mut step = 1;
        if *self.peek() == Token::Colon {
            self.advance();
            if let Some(value) = self.parse_optional_int()? {
                step = value;
            }
        }
        if step == 0 {
            return self.error_at(offset, "slice step cannot be zero");
        }
        Ok(Selector::Slice { start, end, step })
    }

    fn parse_optional_int(&mut self) -> ParseResult<Option<i64>> {
        let offset = self.offset();
        if let Token::Number(text) = self.peek() {
            let value = text
                .parse::<i64>()
                .map_err(|_| ParseError {
                    offset,
                    reason: format!("'{}' is not an integer", text),
                })?;
            self.advance();
            return Ok(Some(value));
        }
        Ok(None)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(word) if word == keyword)
    }

    fn parse_or(&mut self) -> ParseResult<FilterExpr> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::OrOr || self.is_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<FilterExpr> {
        let mut left = self.parse_unary()?;
        while *self.peek() == Token::AndAnd || self.is_keyword("and") {
            self.advance();
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<FilterExpr> {
        match self.peek() {
            Token::Not => {
                self.advance();
                Ok(FilterExpr::Not(Box::new(self.parse_unary()?)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<FilterExpr> {
        let offset = self.offset();
        let left = self.parse_operand()?;
        match self.comparison_op() {
            Some(op) => {
                self.advance();
                let right = self.parse_operand()?;
                Ok(FilterExpr::Compare { left, op, right })
            }
            None => match left {
                Operand::Path(path) => Ok(FilterExpr::Exists(path)),
                Operand::Literal(Value::Bool(value)) => Ok(FilterExpr::Constant(value)),
                Operand::Literal(_) => {
                    self.error_at(offset, "a literal in a filter needs a comparison")
                }
            },
        }
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        let root = match self.peek() {
            Token::At => PathRoot::Current,
            Token::Dollar => PathRoot::Document,
            _ => return Ok(Operand::Literal(self.parse_literal()?)),
        };
        self.advance();
        Ok(Operand::Path(Path {
            root,
            segments: self.parse_segments()?,
        }))
    }

    fn parse_literal(&mut self) -> ParseResult<Value> {
        let offset = self.offset();
        match self.advance() {
            Token::Str(value) => Ok(Value::String(value)),
            Token::Number(text) => number_literal(&text).ok_or_else(|| ParseError {
                offset,
                reason: format!("'{}' is not a valid number", text),
            }),
            Token::Ident(word) if word == "true" => Ok(Value::Bool(true)),
            Token::Ident(word) if word == "false" => Ok(Value::Bool(false)),
            Token::Ident(word) if word == "null" => Ok(Value::Null),
            Token::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    loop {
                        items.push(self.parse_literal()?);
                        if *self.peek() == Token::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket, "']' closing the list")?;
                Ok(Value::Array(items))
            }
            other => self.error_at(offset, format!("expected a literal, found {:?}", other)),
        }
    }
}

fn number_literal(text: &str) -> Option<Value> {
    if text.contains(['.', 'e', 'E']) {
        let value = text.parse::<f64>().ok()?;
        return serde_json::Number::from_f64(value).map(Value::Number);
    }
    if let Ok(value) = text.parse::<i64>() {
        return Some(Value::from(value));
    }
    if let Ok(value) = text.parse::<u64>() {
        return Some(Value::from(value));
    }
    let value = text.parse::<f64>().ok()?;
    serde_json::Number::from_f64(value).map(Value::Number)
}
