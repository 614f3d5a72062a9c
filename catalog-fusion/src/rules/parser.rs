// Rule text parser
//
// Grammar:
//   program   := statement*
//   statement := decl | derive | rule
//   decl      := "decl" IDENT "(" VAR ("," VAR ":" type)* ")" ["multi"] "."
//   type      := "string" | "int" | "float" | "bool" | "list" "<" type ">"
//   derive    := "derive" IDENT ("merge" | "internal")* "."
//   rule      := atom ":-" literal ("," literal)* "."
//   literal   := atom | ("!" | "not") atom | term cmp term
//   atom      := IDENT "(" term ("," term)* ")"
//   term      := VAR | "_" | STRING | INT | FLOAT | "true" | "false"

use crate::error::{CompileError, CompileResult};
use crate::facts::{RelationSchema, Value, ValueType};
use crate::rules::ast::{Atom, CmpOp, DeriveDecl, Literal, Program, RuleDef, Statement, Term};
use crate::rules::lexer::{line_col, tokenize, Spanned, Token};

/// Parse rule text into a program
pub fn parse_program(source: &str) -> CompileResult<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };

    let mut statements = Vec::new();
    while !parser.at_end() {
        statements.push(parser.statement()?);
    }

    Ok(Program { statements })
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Line of the current token (or of the end of input)
    fn line(&self) -> usize {
        self.position().0
    }

    fn position(&self) -> (usize, usize) {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|t| t.span.start)
            .unwrap_or(self.source.len());
        line_col(self.source, offset)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        let (line, column) = self.position();
        CompileError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        match self.peek() {
            Some(token) => self.error(format!("expected {}, found {}", expected, token.describe())),
            None => self.error(format!("expected {}, found end of input", expected)),
        }
    }

    fn expect(&mut self, token: Token) -> CompileResult<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    fn ident(&mut self) -> CompileResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("relation name")),
        }
    }

    fn variable(&mut self) -> CompileResult<String> {
        match self.peek() {
            Some(Token::Variable(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("variable")),
        }
    }

    fn statement(&mut self) -> CompileResult<Statement> {
        match self.peek() {
            Some(Token::Decl) => self.decl(),
            Some(Token::Derive) => self.derive(),
            Some(Token::Ident(_)) => self.rule().map(Statement::Rule),
            _ => Err(self.unexpected("'decl', 'derive' or a rule")),
        }
    }

    fn decl(&mut self) -> CompileResult<Statement> {
        let line = self.line();
        self.expect(Token::Decl)?;
        let name = self.ident()?;
        self.expect(Token::LParen)?;
        let key_name = self.variable()?;
        let mut schema = RelationSchema::new(name, key_name);

        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            let field = self.variable()?;
            self.expect(Token::Colon)?;
            let ty = self.value_type()?;
            schema = schema.field(field, ty);
        }
        self.expect(Token::RParen)?;

        if let Some(Token::Ident(option)) = self.peek() {
            if option == "multi" {
                self.pos += 1;
                schema = schema.multi();
            } else {
                return Err(self.error(format!("unknown relation option '{}'", option)));
            }
        }
        self.expect(Token::Dot)?;

        Ok(Statement::Decl { schema, line })
    }

    fn value_type(&mut self) -> CompileResult<ValueType> {
        let name = match self.peek() {
            Some(Token::Ident(name)) => name.clone(),
            _ => return Err(self.unexpected("type")),
        };
        self.pos += 1;

        match name.as_str() {
            "string" => Ok(ValueType::String),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "list" => {
                self.expect(Token::Lt)?;
                let inner = self.value_type()?;
                self.expect(Token::Gt)?;
                Ok(ValueType::List(Box::new(inner)))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unknown type '{}'", other)))
            }
        }
    }

    fn derive(&mut self) -> CompileResult<Statement> {
        let line = self.line();
        self.expect(Token::Derive)?;
        let relation = self.ident()?;
        let mut decl = DeriveDecl {
            relation,
            line,
            ..Default::default()
        };

        while let Some(Token::Ident(option)) = self.peek() {
            match option.as_str() {
                "merge" => decl.merge = true,
                "internal" => decl.internal = true,
                other => return Err(self.error(format!("unknown derive option '{}'", other))),
            }
            self.pos += 1;
        }
        self.expect(Token::Dot)?;

        Ok(Statement::Derive(decl))
    }

    fn rule(&mut self) -> CompileResult<RuleDef> {
        let line = self.line();
        let head = self.atom()?;
        self.expect(Token::Implies)?;

        let mut body = vec![self.literal()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            body.push(self.literal()?);
        }
        self.expect(Token::Dot)?;

        Ok(RuleDef { head, body, line })
    }

    fn literal(&mut self) -> CompileResult<Literal> {
        match self.peek() {
            Some(Token::Bang) | Some(Token::Not) => {
                self.pos += 1;
                Ok(Literal::Absent(self.atom()?))
            }
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::LParen) => {
                Ok(Literal::Positive(self.atom()?))
            }
            _ => {
                let left = self.term()?;
                let op = self.cmp_op()?;
                let right = self.term()?;
                Ok(Literal::Compare { left, op, right })
            }
        }
    }

    fn cmp_op(&mut self) -> CompileResult<CmpOp> {
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Err(self.unexpected("comparison operator")),
        };
        self.pos += 1;
        Ok(op)
    }

    fn atom(&mut self) -> CompileResult<Atom> {
        let relation = self.ident()?;
        self.expect(Token::LParen)?;

        let mut terms = vec![self.term()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            terms.push(self.term()?);
        }
        self.expect(Token::RParen)?;

        Ok(Atom { relation, terms })
    }

    fn term(&mut self) -> CompileResult<Term> {
        let term = match self.peek() {
            Some(Token::Variable(name)) => Term::Var(name.clone()),
            Some(Token::Wildcard) => Term::Wildcard,
            Some(Token::Str(s)) => Term::Const(Value::Str(s.clone())),
            Some(Token::Int(i)) => Term::Const(Value::Int(*i)),
            Some(Token::Float(x)) => Term::Const(Value::Float(*x)),
            Some(Token::True) => Term::Const(Value::Bool(true)),
            Some(Token::False) => Term::Const(Value::Bool(false)),
            _ => return Err(self.unexpected("term")),
        };
        self.advance();
        Ok(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decl_derive_and_rules() {
        let program = parse_program(
            r#"
            decl vertex_classification(Barcode, Class: string, Conf: float).
            decl vertex_genre(Barcode, Genre: string) multi.
            decl tags(Barcode, Tags: list<string>).
            derive genres merge internal.

            classification(B, C) :- vertex_classification(B, C, Conf), Conf >= 0.7.
            title(B, T) :- marc_title(B, T), not google_books_title(B, _).
            "#,
        )
        .unwrap();

        assert_eq!(program.statements.len(), 6);

        match &program.statements[0] {
            Statement::Decl { schema, line } => {
                assert_eq!(*line, 2);
                assert_eq!(schema.name, "vertex_classification");
                assert_eq!(schema.key_name, "Barcode");
                assert_eq!(schema.fields.len(), 2);
                assert!(!schema.multi);
            }
            other => panic!("expected decl, got {:?}", other),
        }

        match &program.statements[2] {
            Statement::Decl { schema, .. } => assert_eq!(
                schema.fields[0].ty,
                ValueType::List(Box::new(ValueType::String))
            ),
            other => panic!("expected decl, got {:?}", other),
        }

        match &program.statements[3] {
            Statement::Derive(decl) => {
                assert!(decl.merge);
                assert!(decl.internal);
            }
            other => panic!("expected derive, got {:?}", other),
        }

        match &program.statements[4] {
            Statement::Rule(rule) => {
                assert_eq!(rule.body.len(), 2);
                assert_eq!(
                    rule.body[1],
                    Literal::Compare {
                        left: Term::Var("Conf".into()),
                        op: CmpOp::Ge,
                        right: Term::Const(Value::Float(0.7)),
                    }
                );
            }
            other => panic!("expected rule, got {:?}", other),
        }

        match &program.statements[5] {
            Statement::Rule(rule) => {
                assert!(matches!(rule.body[1], Literal::Absent(_)));
                assert_eq!(
                    rule.to_string(),
                    "title(B, T) :- marc_title(B, T), !google_books_title(B, _)."
                );
            }
            other => panic!("expected rule, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dot_is_syntax_error() {
        let err = parse_program("title(B, T) :- marc_title(B, T)\nauthor(B, A) :- marc_author(B, A).")
            .unwrap_err();
        match err {
            CompileError::Syntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("expected '.'"), "{}", message);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_body_is_rejected() {
        assert!(matches!(
            parse_program("title(B, T) :- ."),
            Err(CompileError::Syntax { .. })
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = parse_program("decl marc_title(Barcode, Title: text).").unwrap_err();
        match err {
            CompileError::Syntax { message, .. } => assert!(message.contains("unknown type 'text'")),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
