//! The reader: turns source text into a sequence of [`Expr`] value
//! trees. A list literal becomes a proper list, `(a . b)` a dotted one,
//! and the quotation shorthands become two-element lists headed by
//! `quote`, `quasiquote`, `unquote` or `unquote-splicing`.

use crate::interp::{sym, Expr, Exprs};
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected `)` at line {line}, column {column}")]
    UnexpectedRParen { line: usize, column: usize },
    #[error("unexpected `.` at line {line}, column {column}")]
    UnexpectedDot { line: usize, column: usize },
    #[error("expected a single expression after `.` at line {line}, column {column}")]
    BadDottedTail { line: usize, column: usize },
    #[error("unclosed string literal starting at line {line}, column {column}")]
    UnclosedString { line: usize, column: usize },
    #[error("bad `#` syntax `#{text}` at line {line}, column {column}")]
    BadHash {
        text: String,
        line: usize,
        column: usize,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    LParen,
    RParen,
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplicing,
    Dot,
    Boolean(bool),
    Char(char),
    Str(String),
    Atom(String),
}

#[derive(Debug, PartialEq)]
pub struct TokenInfo {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

pub struct Tokenizer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Tokenizer<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Tokenizer {
            input: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.input.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn emit(&self, token: Token) -> TokenInfo {
        TokenInfo {
            token,
            line: self.line,
            column: self.column,
        }
    }

    fn is_delimiter(c: char) -> bool {
        c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '`' | ',' | ';' | '"')
    }

    fn read_atom(&mut self) -> String {
        let mut text = String::new();
        while let Some(&c) = self.input.peek() {
            if Self::is_delimiter(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn read_string(&mut self) -> Result<TokenInfo, ParseError> {
        let line = self.line;
        let column = self.column;
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    return Ok(TokenInfo {
                        token: Token::Str(text),
                        line,
                        column,
                    })
                }
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(c) => text.push(c),
                    None => return Err(ParseError::UnclosedString { line, column }),
                },
                Some(c) => text.push(c),
                None => return Err(ParseError::UnclosedString { line, column }),
            }
        }
    }

    fn read_hash(&mut self) -> Result<TokenInfo, ParseError> {
        let line = self.line;
        let column = self.column;
        self.bump(); // the '#'
        if self.input.peek() == Some(&'\\') {
            self.bump();
            // one mandatory character, plus trailing alphabetics for
            // the named characters
            let Some(first) = self.bump() else {
                return Err(ParseError::BadHash {
                    text: "\\".to_string(),
                    line,
                    column,
                });
            };
            let mut name = String::from(first);
            if first.is_alphabetic() {
                while let Some(&c) = self.input.peek() {
                    if !c.is_alphabetic() {
                        break;
                    }
                    name.push(c);
                    self.bump();
                }
            }
            let c = match name.as_str() {
                "space" => ' ',
                "newline" => '\n',
                "tab" => '\t',
                name if name.chars().count() == 1 => name.chars().next().expect("length checked"),
                _ => {
                    return Err(ParseError::BadHash {
                        text: format!("\\{name}"),
                        line,
                        column,
                    })
                }
            };
            return Ok(TokenInfo {
                token: Token::Char(c),
                line,
                column,
            });
        }
        let text = self.read_atom();
        let token = match text.as_str() {
            "t" => Token::Boolean(true),
            "f" => Token::Boolean(false),
            _ => return Err(ParseError::BadHash { text, line, column }),
        };
        Ok(TokenInfo {
            token,
            line,
            column,
        })
    }

    pub fn next_token(&mut self) -> Option<Result<TokenInfo, ParseError>> {
        while let Some(&c) = self.input.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                ';' => {
                    while let Some(&c) = self.input.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '(' => {
                    let info = self.emit(Token::LParen);
                    self.bump();
                    return Some(Ok(info));
                }
                ')' => {
                    let info = self.emit(Token::RParen);
                    self.bump();
                    return Some(Ok(info));
                }
                '\'' => {
                    let info = self.emit(Token::Quote);
                    self.bump();
                    return Some(Ok(info));
                }
                '`' => {
                    let info = self.emit(Token::Quasiquote);
                    self.bump();
                    return Some(Ok(info));
                }
                ',' => {
                    let line = self.line;
                    let column = self.column;
                    self.bump();
                    let token = if self.input.peek() == Some(&'@') {
                        self.bump();
                        Token::UnquoteSplicing
                    } else {
                        Token::Unquote
                    };
                    return Some(Ok(TokenInfo {
                        token,
                        line,
                        column,
                    }));
                }
                '"' => return Some(self.read_string()),
                '#' => return Some(self.read_hash()),
                _ => {
                    let line = self.line;
                    let column = self.column;
                    let text = self.read_atom();
                    let token = if text == "." {
                        Token::Dot
                    } else {
                        Token::Atom(text)
                    };
                    return Some(Ok(TokenInfo {
                        token,
                        line,
                        column,
                    }));
                }
            }
        }
        None
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<TokenInfo, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

fn parse_atom(text: String) -> Expr {
    if let Ok(n) = text.parse::<i64>() {
        Expr::Integer(n)
    } else if let Ok(f) = text.parse::<f64>() {
        Expr::Float(f)
    } else {
        Expr::Symbol(sym(&text))
    }
}

fn quotation_call(name: &str, tokens: &mut Peekable<Tokenizer>) -> Result<Expr, ParseError> {
    let quoted = parse_expression(tokens)?;
    Ok(Expr::new_proper_list(crate::exprs![
        Expr::new_symbol(name),
        quoted
    ]))
}

pub fn parse_expression(tokens: &mut Peekable<Tokenizer>) -> Result<Expr, ParseError> {
    let info = match tokens.next() {
        Some(result) => result?,
        None => return Err(ParseError::UnexpectedEof),
    };
    match info.token {
        Token::LParen => parse_list(tokens),
        Token::Quote => quotation_call("quote", tokens),
        Token::Quasiquote => quotation_call("quasiquote", tokens),
        Token::Unquote => quotation_call("unquote", tokens),
        Token::UnquoteSplicing => quotation_call("unquote-splicing", tokens),
        Token::Boolean(b) => Ok(Expr::Boolean(b)),
        Token::Char(c) => Ok(Expr::Char(c)),
        Token::Str(s) => Ok(Expr::new_string(s)),
        Token::Atom(text) => Ok(parse_atom(text)),
        Token::Dot => Err(ParseError::UnexpectedDot {
            line: info.line,
            column: info.column,
        }),
        Token::RParen => Err(ParseError::UnexpectedRParen {
            line: info.line,
            column: info.column,
        }),
    }
}

fn parse_list(tokens: &mut Peekable<Tokenizer>) -> Result<Expr, ParseError> {
    let mut elems = Exprs::new();
    loop {
        let info = match tokens.peek() {
            Some(Ok(info)) => info,
            Some(Err(_)) => {
                return Err(tokens
                    .next()
                    .expect("peeked")
                    .expect_err("peeked an error"))
            }
            None => return Err(ParseError::UnexpectedEof),
        };
        match info.token {
            Token::RParen => {
                tokens.next();
                return Ok(Expr::new_proper_list(elems));
            }
            Token::Dot => {
                let line = info.line;
                let column = info.column;
                if elems.is_empty() {
                    return Err(ParseError::UnexpectedDot { line, column });
                }
                tokens.next();
                let tail = parse_expression(tokens)?;
                match tokens.next() {
                    Some(Ok(TokenInfo {
                        token: Token::RParen,
                        ..
                    })) => {}
                    Some(Ok(_)) => return Err(ParseError::BadDottedTail { line, column }),
                    Some(Err(err)) => return Err(err),
                    None => return Err(ParseError::UnexpectedEof),
                }
                // `(a . (b c))` reads as the proper list `(a b c)`
                return Ok(Expr::list_with_tail(elems, tail));
            }
            _ => elems.push_back(parse_expression(tokens)?),
        }
    }
}

/// Parses a whole source text into its sequence of top-level forms.
pub fn parse(source: &str) -> Result<Vec<Expr>, ParseError> {
    let mut tokens = Tokenizer::new(source).peekable();
    let mut forms = Vec::new();
    while tokens.peek().is_some() {
        forms.push(parse_expression(&mut tokens)?);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exprs;

    fn symbol(name: &str) -> Expr {
        Expr::new_symbol(name)
    }

    #[test]
    fn test_tokenizer_tracks_positions() {
        let tokens: Vec<TokenInfo> = Tokenizer::new("(a\n  b)")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            tokens,
            vec![
                TokenInfo {
                    token: Token::LParen,
                    line: 1,
                    column: 1
                },
                TokenInfo {
                    token: Token::Atom("a".to_string()),
                    line: 1,
                    column: 2
                },
                TokenInfo {
                    token: Token::Atom("b".to_string()),
                    line: 2,
                    column: 3
                },
                TokenInfo {
                    token: Token::RParen,
                    line: 2,
                    column: 4
                },
            ]
        );
    }

    #[test]
    fn test_parse_nested_call() {
        let parsed = parse("(cos (* 3.5 1))").unwrap();
        assert_eq!(
            parsed,
            vec![Expr::new_proper_list(exprs![
                symbol("cos"),
                Expr::new_proper_list(exprs![symbol("*"), Expr::Float(3.5), Expr::Integer(1)]),
            ])]
        );
    }

    #[test]
    fn test_parse_quote_sugar() {
        let parsed = parse("'(1 2)").unwrap();
        assert_eq!(
            parsed,
            vec![Expr::new_proper_list(exprs![
                symbol("quote"),
                Expr::new_proper_list(exprs![Expr::Integer(1), Expr::Integer(2)]),
            ])]
        );
    }

    #[test]
    fn test_parse_quasiquote_family() {
        let parsed = parse("`(list ,(+ 1 2) ,@xs)").unwrap();
        assert_eq!(parsed[0].to_string(), "`(list ,(+ 1 2) ,@xs)");
    }

    #[test]
    fn test_parse_dotted_list() {
        let parsed = parse("(f x . y)").unwrap();
        assert_eq!(
            parsed,
            vec![Expr::new_dotted_list(exprs![
                symbol("f"),
                symbol("x"),
                symbol("y")
            ])]
        );
    }

    #[test]
    fn test_dot_with_list_tail_normalizes() {
        let parsed = parse("(1 . (2 3))").unwrap();
        assert_eq!(
            parsed,
            vec![Expr::new_proper_list(exprs![
                Expr::Integer(1),
                Expr::Integer(2),
                Expr::Integer(3)
            ])]
        );
    }

    #[test]
    fn test_parse_booleans_and_chars() {
        assert_eq!(
            parse("#t #f #\\e #\\space #\\newline").unwrap(),
            vec![
                Expr::Boolean(true),
                Expr::Boolean(false),
                Expr::Char('e'),
                Expr::Char(' '),
                Expr::Char('\n'),
            ]
        );
    }

    #[test]
    fn test_parse_string_escapes() {
        assert_eq!(
            parse(r#""a\nb\"c""#).unwrap(),
            vec![Expr::new_string("a\nb\"c".to_string())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let parsed = parse("; intro\n(+ 1 2) ; trailing\n").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].to_string(), "(+ 1 2)");
    }

    #[test]
    fn test_numeric_atoms() {
        assert_eq!(
            parse("42 -17 3.5 -0.25").unwrap(),
            vec![
                Expr::Integer(42),
                Expr::Integer(-17),
                Expr::Float(3.5),
                Expr::Float(-0.25),
            ]
        );
        // not numbers, just symbols
        assert_eq!(parse("+ -").unwrap(), vec![symbol("+"), symbol("-")]);
    }

    #[test]
    fn test_error_unclosed_list() {
        assert_eq!(parse("(+ 1 2"), Err(ParseError::UnexpectedEof));
    }

    #[test]
    fn test_error_stray_rparen() {
        assert!(matches!(
            parse("(+ 1 2))"),
            Err(ParseError::UnexpectedRParen { .. })
        ));
    }

    #[test]
    fn test_error_unclosed_string() {
        assert!(matches!(
            parse(r#"(display "hello)"#),
            Err(ParseError::UnclosedString { .. })
        ));
    }

    #[test]
    fn test_error_bad_hash() {
        assert!(matches!(parse("#q"), Err(ParseError::BadHash { .. })));
    }

    #[test]
    fn test_error_multiple_dotted_tails() {
        assert!(matches!(
            parse("(1 . 2 3)"),
            Err(ParseError::BadDottedTail { .. })
        ));
        assert!(matches!(parse("(. 2)"), Err(ParseError::UnexpectedDot { .. })));
    }

    #[test]
    fn test_parse_empty_source() {
        assert_eq!(parse(""), Ok(vec![]));
        assert_eq!(parse("  ; nothing\n"), Ok(vec![]));
    }
}
