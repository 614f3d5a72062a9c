// Rule text tokenizer
//
// `#` starts a comment that runs to end of line. Identifiers starting with a lowercase
// letter name relations (and types); identifiers starting with an uppercase letter are
// variables; `_` or `_Name` is a wildcard.

use crate::error::{CompileError, CompileResult};
use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("decl")]
    Decl,

    #[token("derive")]
    Derive,

    #[token("not")]
    Not,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[regex(r"[a-z][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[A-Z][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Variable(String),

    #[regex(r"_[a-zA-Z0-9_]*")]
    Wildcard,

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[token(":-")]
    Implies,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token(":")]
    Colon,

    #[token("!")]
    Bang,

    #[token("=")]
    Eq,

    #[token("!=")]
    Ne,

    #[token("<")]
    Lt,

    #[token("<=")]
    Le,

    #[token(">")]
    Gt,

    #[token(">=")]
    Ge,
}

impl Token {
    /// Short description used in syntax errors
    pub fn describe(&self) -> String {
        match self {
            Token::Decl => "'decl'".to_string(),
            Token::Derive => "'derive'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::True => "'true'".to_string(),
            Token::False => "'false'".to_string(),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Variable(name) => format!("variable '{}'", name),
            Token::Wildcard => "'_'".to_string(),
            Token::Str(s) => format!("string {:?}", s),
            Token::Float(x) => format!("number {}", x),
            Token::Int(i) => format!("number {}", i),
            Token::Implies => "':-'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Bang => "'!'".to_string(),
            Token::Eq => "'='".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
        }
    }
}

/// A token with its byte span in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Strip quotes and resolve `\"`, `\\`, `\n`, `\t` escapes
fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// 1-based line and column of a byte offset
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|nl| before[nl + 1..].chars().count())
        .unwrap_or_else(|| before.chars().count())
        + 1;
    (line, column)
}

/// Tokenize the whole source
pub fn tokenize(source: &str) -> CompileResult<Vec<Spanned>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(()) => {
                let (line, column) = line_col(source, span.start);
                return Err(CompileError::Syntax {
                    line,
                    column,
                    message: format!("unexpected input {:?}", lexer.slice()),
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_rule_tokens() {
        assert_eq!(
            tokens(r#"title(B, T) :- !marc_title(B, _), T = "x y". # trailing"#),
            vec![
                Token::Ident("title".into()),
                Token::LParen,
                Token::Variable("B".into()),
                Token::Comma,
                Token::Variable("T".into()),
                Token::RParen,
                Token::Implies,
                Token::Bang,
                Token::Ident("marc_title".into()),
                Token::LParen,
                Token::Variable("B".into()),
                Token::Comma,
                Token::Wildcard,
                Token::RParen,
                Token::Comma,
                Token::Variable("T".into()),
                Token::Eq,
                Token::Str("x y".into()),
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_numbers_and_comparisons() {
        assert_eq!(
            tokens("C >= 0.7, Y != -3."),
            vec![
                Token::Variable("C".into()),
                Token::Ge,
                Token::Float(0.7),
                Token::Comma,
                Token::Variable("Y".into()),
                Token::Ne,
                Token::Int(-3),
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_keywords_do_not_swallow_identifiers() {
        assert_eq!(
            tokens("decl declared derive not notes"),
            vec![
                Token::Decl,
                Token::Ident("declared".into()),
                Token::Derive,
                Token::Not,
                Token::Ident("notes".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(tokens(r#""say \"hi\"""#), vec![Token::Str("say \"hi\"".into())]);
    }

    #[test]
    fn test_unexpected_input_reports_position() {
        let err = tokenize("title(B, T) :-\n  marc_title(B, T) @").unwrap_err();
        assert_eq!(
            err,
            CompileError::Syntax {
                line: 2,
                column: 20,
                message: "unexpected input \"@\"".to_string()
            }
        );
    }
}
