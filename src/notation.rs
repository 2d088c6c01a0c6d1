//! Textual notation for syntax trees and patterns.
//!
//! Lets tests, benches and collaborators hand in fixtures without building
//! nodes by hand. The notation is the same one `Display` produces.
//!
//! ```text
//! tree     := name attrs? ( '(' tree (',' tree)* ')' )?
//! pattern  := '$' int (':' name)?
//!           | name attrs? ( '(' pattern (',' pattern)* ')' )?
//! attrs    := '{' ( name ':' value (',' name ':' value)* )? '}'
//! value    := int | float | string | true | false | name
//! name     := identifier | 'quoted name'
//! ```
//!
//! `%` starts a comment running to the end of the line.
//!
//! # Example
//!
//! ```rust
//! use snippet_search::notation::{parse_pattern, parse_tree};
//! use snippet_search::syntax::NodeFactory;
//!
//! let mut nodes = NodeFactory::new();
//! let tree = parse_tree("return(ident{name: x})", &mut nodes).unwrap();
//! let pattern = parse_pattern("return($0:ident)").unwrap();
//!
//! assert_eq!(tree.kind(), "return");
//! assert_eq!(pattern.placeholder_ids().len(), 1);
//! ```

use crate::pattern::{Pattern, PatternError, PatternNode, PlaceholderId};
use crate::syntax::{Attributes, NodeFactory, SyntaxNode, Value};
use ordered_float::OrderedFloat;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;
use thiserror::Error;

/// Parser error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected character: {0}")]
    UnexpectedChar(char),
    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("placeholders are not allowed in syntax trees")]
    PlaceholderInTree,
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Quoted(String),
    Placeholder(PlaceholderId),

    Int(i64),
    Float(f64),
    String(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,

    Eof,
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        self.input.next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == '%' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> String {
        let mut result = String::new();
        while let Some(c) = self.peek() {
            if predicate(c) {
                result.push(c);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_delimited(&mut self, close: char) -> ParseResult<String> {
        self.advance();
        let mut result = String::new();
        loop {
            match self.advance() {
                Some(c) if c == close => return Ok(result),
                Some('\\') => match self.advance() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some('r') => result.push('\r'),
                    Some(c) => result.push(c),
                    None => return Err(ParseError::UnterminatedString),
                },
                Some(c) => result.push(c),
                None => return Err(ParseError::UnterminatedString),
            }
        }
    }

    fn read_number(&mut self, first: char) -> ParseResult<Token> {
        let mut s = String::new();
        s.push(first);
        s.push_str(&self.read_while(|c| c.is_ascii_digit()));

        if self.peek() == Some('.') {
            s.push('.');
            self.advance();
            s.push_str(&self.read_while(|c| c.is_ascii_digit()));
        }

        if let Some(c @ ('e' | 'E')) = self.peek() {
            s.push(c);
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                s.push(sign);
                self.advance();
            }
            s.push_str(&self.read_while(|c| c.is_ascii_digit()));
        }

        if s.contains(['.', 'e', 'E']) {
            let f = s.parse::<f64>().map_err(|_| ParseError::InvalidNumber(s))?;
            Ok(Token::Float(f))
        } else {
            let n = s.parse::<i64>().map_err(|_| ParseError::InvalidNumber(s))?;
            Ok(Token::Int(n))
        }
    }

    fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };
        match c {
            '(' => { self.advance(); Ok(Token::LParen) }
            ')' => { self.advance(); Ok(Token::RParen) }
            '{' => { self.advance(); Ok(Token::LBrace) }
            '}' => { self.advance(); Ok(Token::RBrace) }
            ',' => { self.advance(); Ok(Token::Comma) }
            ':' => { self.advance(); Ok(Token::Colon) }
            '$' => {
                self.advance();
                let digits = self.read_while(|c| c.is_ascii_digit());
                if digits.is_empty() {
                    return match self.peek() {
                        Some(c) => Err(ParseError::UnexpectedChar(c)),
                        None => Err(ParseError::UnexpectedEof),
                    };
                }
                let id = digits
                    .parse::<PlaceholderId>()
                    .map_err(|_| ParseError::InvalidNumber(digits))?;
                Ok(Token::Placeholder(id))
            }
            '-' => {
                self.advance();
                match self.peek() {
                    Some(d) if d.is_ascii_digit() => self.read_number('-'),
                    _ => Err(ParseError::UnexpectedChar('-')),
                }
            }
            '"' => Ok(Token::String(self.read_delimited('"')?)),
            '\'' => Ok(Token::Quoted(self.read_delimited('\'')?)),
            c if c.is_ascii_digit() => {
                self.advance();
                self.read_number(c)
            }
            c if c.is_alphabetic() || c == '_' => {
                Ok(Token::Name(self.read_while(|c| c.is_alphanumeric() || c == '_')))
            }
            c => Err(ParseError::UnexpectedChar(c)),
        }
    }
}

/// Parser for the tree notation.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input.
    pub fn new(input: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> ParseResult<Token> {
        let prev = std::mem::replace(&mut self.current, self.lexer.next_token()?);
        Ok(prev)
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current == expected {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", expected)))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        if self.current == Token::Eof {
            return ParseError::UnexpectedEof;
        }
        ParseError::Expected {
            expected: expected.to_string(),
            found: format!("{:?}", self.current),
        }
    }

    fn parse_name(&mut self) -> ParseResult<Arc<str>> {
        let name: Arc<str> = match &self.current {
            Token::Name(name) | Token::Quoted(name) => name.as_str().into(),
            _ => return Err(self.unexpected("name")),
        };
        self.advance()?;
        Ok(name)
    }

    fn parse_value(&mut self) -> ParseResult<Value> {
        let value = match &self.current {
            Token::Int(n) => Value::Int(*n),
            Token::Float(f) => Value::Float(OrderedFloat(*f)),
            Token::String(s) => Value::Str(s.as_str().into()),
            Token::Name(name) if name == "true" => Value::Bool(true),
            Token::Name(name) if name == "false" => Value::Bool(false),
            Token::Name(name) | Token::Quoted(name) => Value::Symbol(name.as_str().into()),
            _ => return Err(self.unexpected("attribute value")),
        };
        self.advance()?;
        Ok(value)
    }

    fn parse_attributes(&mut self) -> ParseResult<Attributes> {
        let mut attrs = Attributes::new();
        if self.current != Token::LBrace {
            return Ok(attrs);
        }
        self.advance()?;
        if self.current != Token::RBrace {
            loop {
                let key = self.parse_name()?;
                self.expect(Token::Colon)?;
                let value = self.parse_value()?;
                attrs.insert(key, value);
                if self.current != Token::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(attrs)
    }

    /// Parse `( item, ... )` if present.
    fn parse_children<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        let mut children = Vec::new();
        if self.current != Token::LParen {
            return Ok(children);
        }
        self.advance()?;
        if self.current != Token::RParen {
            children.push(item(self)?);
            while self.current == Token::Comma {
                self.advance()?;
                children.push(item(self)?);
            }
        }
        self.expect(Token::RParen)?;
        Ok(children)
    }

    /// Parse a syntax tree, drawing node identities from `nodes`.
    pub fn parse_tree(&mut self, nodes: &mut NodeFactory) -> ParseResult<SyntaxNode> {
        if matches!(self.current, Token::Placeholder(_)) {
            return Err(ParseError::PlaceholderInTree);
        }
        let kind = self.parse_name()?;
        let attributes = self.parse_attributes()?;
        let children = self.parse_children(|p| p.parse_tree(nodes))?;
        Ok(nodes.node_with(kind, attributes, children))
    }

    /// Parse a pattern node.
    pub fn parse_pattern_node(&mut self) -> ParseResult<PatternNode> {
        if let Token::Placeholder(id) = self.current {
            self.advance()?;
            let kind = if self.current == Token::Colon {
                self.advance()?;
                Some(self.parse_name()?)
            } else {
                None
            };
            if self.current == Token::LParen {
                return Err(PatternError::PlaceholderWithChildren(id).into());
            }
            return Ok(PatternNode::placeholder(id, kind));
        }
        let kind = self.parse_name()?;
        let attributes = self.parse_attributes()?;
        let children = self.parse_children(Self::parse_pattern_node)?;
        Ok(PatternNode::concrete(kind, attributes, children))
    }

    fn finish(&mut self) -> ParseResult<()> {
        if self.current == Token::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }
}

/// Parse a single syntax tree.
pub fn parse_tree(input: &str, nodes: &mut NodeFactory) -> ParseResult<SyntaxNode> {
    let mut parser = Parser::new(input)?;
    let tree = parser.parse_tree(nodes)?;
    parser.finish()?;
    Ok(tree)
}

/// Parse a well-formed pattern.
pub fn parse_pattern(input: &str) -> ParseResult<Pattern> {
    let mut parser = Parser::new(input)?;
    let pattern = Pattern::new(parser.parse_pattern_node()?);
    parser.finish()?;
    pattern.validate()?;
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(src: &str) -> ParseResult<SyntaxNode> {
        parse_tree(src, &mut NodeFactory::new())
    }

    #[test]
    fn test_parse_leaf() {
        let t = tree("ret").unwrap();
        assert_eq!(t.kind(), "ret");
        assert!(t.is_leaf());
    }

    #[test]
    fn test_parse_nested() {
        let t = tree("if(gt(ident{name: x}, lit{value: 0}), return(ident{name: x}))").unwrap();
        assert_eq!(t.kind(), "if");
        assert_eq!(t.arity(), 2);
        assert_eq!(t.size(), 6);
        let lit = t.child(0).and_then(|g| g.child(1)).unwrap();
        assert_eq!(lit.attribute("value"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_parse_attribute_values() {
        let t = tree(r#"n{a: -3, b: 2.5, c: "s\"q", d: true, e: sym, f: 'two words'}"#).unwrap();
        assert_eq!(t.attribute("a"), Some(&Value::int(-3)));
        assert_eq!(t.attribute("b"), Some(&Value::float(2.5)));
        assert_eq!(t.attribute("c"), Some(&Value::str("s\"q")));
        assert_eq!(t.attribute("d"), Some(&Value::bool(true)));
        assert_eq!(t.attribute("e"), Some(&Value::symbol("sym")));
        assert_eq!(t.attribute("f"), Some(&Value::symbol("two words")));
    }

    #[test]
    fn test_unique_ids() {
        let mut nodes = NodeFactory::new();
        let a = parse_tree("f(a, b)", &mut nodes).unwrap();
        let b = parse_tree("f(a, b)", &mut nodes).unwrap();
        let ids: std::collections::BTreeSet<_> =
            a.descendants().chain(b.descendants()).map(|n| n.id()).collect();
        assert_eq!(ids.len(), 6);
        assert!(a.same_shape(&b));
    }

    #[test]
    fn test_display_reparses() {
        let src = "if{line: 3}(gt(ident{name: x}, lit{value: 1.5}), 'weird kind'(s{v: \"a b\"}))";
        let t = tree(src).unwrap();
        let again = tree(&format!("{}", t)).unwrap();
        assert!(t.same_shape(&again));
    }

    #[test]
    fn test_parse_pattern() {
        let p = parse_pattern("if($0:gt, return($1))").unwrap();
        assert_eq!(p.placeholder_ids().len(), 2);
        assert_eq!(p.get(&[0]).and_then(|n| n.kind()), Some("gt"));
        assert_eq!(format!("{}", p), "if($0:gt, return($1))");
    }

    #[test]
    fn test_pattern_errors() {
        assert_eq!(
            parse_pattern("f($0(x))"),
            Err(ParseError::Pattern(PatternError::PlaceholderWithChildren(0)))
        );
        assert_eq!(
            parse_pattern("f($0:a, $0:b)"),
            Err(ParseError::Pattern(PatternError::ConflictingPlaceholder(0)))
        );
        assert_eq!(tree("f($0)").unwrap_err(), ParseError::PlaceholderInTree);
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(tree("f(a,").unwrap_err(), ParseError::UnexpectedEof);
        assert_eq!(tree("f(a b)").unwrap_err(), ParseError::Expected {
            expected: "RParen".to_string(),
            found: "Name(\"b\")".to_string(),
        });
        assert_eq!(tree("f{a: \"x").unwrap_err(), ParseError::UnterminatedString);
        assert_eq!(tree("f#").unwrap_err(), ParseError::UnexpectedChar('#'));
    }

    #[test]
    fn test_comments() {
        let t = tree("% leading comment\nblock(  % trailing\n ret)").unwrap();
        assert_eq!(t.arity(), 1);
    }
}
