use std::sync::Arc;

use crate::{
    ast::{
        Argument, AssignOp, BinaryOp, Block, CaseKind, Declarative, Expr, ExprKind,
        FunctionLiteral, FunctionParam, Literal, MatchArm, Pattern, PostfixOp, Program, Stmt,
        StmtKind, SwitchCase, UnaryOp,
    },
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_block_items(&mut self, terminator: TokenKind) -> Result<Block, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator.clone()) && !self.is_at_end() {
            items.push(self.parse_statement()?);
        }
        self.consume(terminator, "expected `}` to close block")?;
        Ok(items)
    }

    fn parse_block(&mut self) -> Result<(Block, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let items = self.parse_block_items(TokenKind::RBrace)?;
        let span = lbrace.span.to(self.previous().span);
        Ok((items, span))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of input"));
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::Let) => self.parse_binding(Keyword::Let),
            TokenKind::Keyword(Keyword::Const) => self.parse_binding(Keyword::Const),
            TokenKind::Keyword(Keyword::Func) if self.peek_next_is(TokenKind::Identifier) => {
                self.parse_named_function(false)
            }
            TokenKind::Keyword(Keyword::Async)
                if self.peek_next_is(TokenKind::Keyword(Keyword::Func))
                    && self.peek_at_is(2, TokenKind::Identifier) =>
            {
                self.advance();
                self.parse_named_function(true)
            }
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_optional_semicolon();
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span: token.span,
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_optional_semicolon();
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    span: token.span,
                })
            }
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Repeat) => self.parse_repeat(),
            TokenKind::Keyword(Keyword::Package) => self.parse_package(),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::Keyword(Keyword::Include) => {
                self.advance();
                let path = self.parse_expression()?;
                self.finish_simple(token.span, StmtKind::Include(path))
            }
            TokenKind::Keyword(Keyword::Enum) => self.parse_enum(),
            TokenKind::Keyword(Keyword::Error) => self.parse_error_statement(),
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.parse_expression()?;
                self.finish_simple(token.span, StmtKind::Throw(value))
            }
            TokenKind::Keyword(Keyword::Defer) => {
                self.advance();
                let call = self.parse_expression()?;
                if !matches!(call.kind, ExprKind::Call { .. } | ExprKind::Method { .. }) {
                    return Err(self.error(&token, "defer must be followed by a function call"));
                }
                self.finish_simple(token.span, StmtKind::Defer(call))
            }
            TokenKind::Keyword(Keyword::Go) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.finish_simple(token.span, StmtKind::Go(expr))
            }
            TokenKind::Keyword(keyword @ (Keyword::Todo
            | Keyword::Warn
            | Keyword::Info
            | Keyword::Debug
            | Keyword::Note
            | Keyword::Success)) => {
                let kind = match keyword {
                    Keyword::Todo => Declarative::Todo,
                    Keyword::Warn => Declarative::Warn,
                    Keyword::Info => Declarative::Info,
                    Keyword::Debug => Declarative::Debug,
                    Keyword::Note => Declarative::Note,
                    _ => Declarative::Success,
                };
                self.advance();
                let value = self.parse_expression()?;
                self.finish_simple(token.span, StmtKind::Declarative { kind, value })
            }
            TokenKind::LBrace => {
                let (items, span) = self.parse_block()?;
                Ok(Stmt {
                    kind: StmtKind::Block(items),
                    span,
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn finish_simple(&mut self, start: SourceSpan, kind: StmtKind) -> Result<Stmt, Diagnostic> {
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: start.to(self.previous().span),
            kind,
        })
    }

    fn parse_binding(&mut self, keyword: Keyword) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(keyword)?.span;
        let name = self.consume_identifier("expected variable name")?.lexeme;
        self.consume(TokenKind::Assign, "expected `=` in declaration")?;
        let value = name_function(self.parse_expression()?, &name);
        let kind = match keyword {
            Keyword::Const => StmtKind::Const { name, value },
            _ => StmtKind::Let { name, value },
        };
        self.finish_simple(start, kind)
    }

    fn parse_named_function(&mut self, is_async: bool) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Func)?.span;
        let name = self.consume_identifier("expected function name")?.lexeme;
        let literal = self.parse_function_rest(Some(name.clone()), is_async)?;
        let span = start.to(self.previous().span);
        Ok(Stmt {
            kind: StmtKind::Let {
                name,
                value: Expr {
                    kind: ExprKind::Function(Arc::new(literal)),
                    span,
                },
            },
            span,
        })
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        is_async: bool,
    ) -> Result<FunctionLiteral, Diagnostic> {
        self.consume(TokenKind::LParen, "expected `(` before parameters")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                let default = if self.matches(TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                if params.iter().any(|p: &FunctionParam| p.name == param.lexeme) {
                    return Err(self.error(&param, "duplicate parameter name"));
                }
                params.push(FunctionParam {
                    name: param.lexeme.clone(),
                    default,
                    span: param.span,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let (body, _) = self.parse_block()?;
        Ok(FunctionLiteral {
            name,
            params,
            body: Arc::new(body),
            is_async,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let ends_here = self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.is_at_end()
            || self.peek().is_some_and(|next| next.span.line != token.span.line);
        let expr = if ends_here {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.finish_simple(token.span, StmtKind::Return(expr))
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::For)?.span;
        let first = self.consume_identifier("expected loop binding")?.lexeme;
        let second = if self.matches(TokenKind::Comma) {
            Some(self.consume_identifier("expected second loop binding")?.lexeme)
        } else {
            None
        };
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::For {
                first,
                second,
                iterable,
                body,
            },
        })
    }

    fn parse_repeat(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Repeat)?.span;
        let count = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::Repeat { count, body },
        })
    }

    fn parse_package(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Package)?.span;
        let name = self.consume_identifier("expected package name")?.lexeme;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::Package { name, body },
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Import)?.span;
        let mut names = vec![self.consume_identifier("expected module name")?.lexeme];
        while self.matches(TokenKind::Comma) {
            names.push(self.consume_identifier("expected module name after `,`")?.lexeme);
        }
        self.finish_simple(start, StmtKind::Import(names))
    }

    fn parse_enum(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Enum)?.span;
        let name = self.consume_identifier("expected enum name")?.lexeme;
        self.consume(TokenKind::LBrace, "expected `{` after enum name")?;
        let mut members: Vec<(String, Option<Expr>)> = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let member = self.consume_identifier("expected enum member")?;
            if members.iter().any(|(existing, _)| *existing == member.lexeme) {
                return Err(self.error(&member, "duplicate enum member"));
            }
            let value = if self.matches(TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            members.push((member.lexeme, value));
            self.matches(TokenKind::Comma);
        }
        self.consume(TokenKind::RBrace, "expected `}` after enum members")?;
        self.finish_simple(start, StmtKind::Enum { name, members })
    }

    fn parse_error_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Error)?.span;
        if self.check(TokenKind::Identifier) && self.peek_next_is(TokenKind::LParen) {
            let name = self.advance().lexeme;
            self.advance();
            let mut params = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    params.push(self.consume_identifier("expected parameter name")?.lexeme);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RParen, "expected `)` after error parameters")?;
            return self.finish_simple(start, StmtKind::ErrorType { name, params });
        }
        let value = self.parse_expression()?;
        self.finish_simple(start, StmtKind::Raise(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_coalesce()?;
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Assign) => AssignOp::Assign,
            Some(TokenKind::PlusAssign) => AssignOp::Compound(BinaryOp::Add),
            Some(TokenKind::MinusAssign) => AssignOp::Compound(BinaryOp::Sub),
            Some(TokenKind::StarAssign) => AssignOp::Compound(BinaryOp::Mul),
            Some(TokenKind::SlashAssign) => AssignOp::Compound(BinaryOp::Div),
            Some(TokenKind::PercentAssign) => AssignOp::Compound(BinaryOp::Mod),
            _ => return Ok(expr),
        };
        let operator = self.advance();
        let value = self.parse_assignment()?;
        match expr.kind {
            ExprKind::Variable(_)
            | ExprKind::Index { .. }
            | ExprKind::Property { .. }
            | ExprKind::Unary {
                op: UnaryOp::Deref,
                ..
            } => Ok(Expr {
                span: expr.span.to(value.span),
                kind: ExprKind::Assign {
                    op,
                    target: Box::new(expr),
                    value: Box::new(value),
                },
            }),
            _ => Err(self.error(&operator, "invalid assignment target")),
        }
    }

    fn parse_coalesce(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_or()?;
        while self.matches(TokenKind::QuestionQuestion) {
            let right = self.parse_or()?;
            expr = binary(BinaryOp::Coalesce, expr, right);
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::DoublePipe) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_membership()?;
        while self.matches(TokenKind::DoubleAmpersand) {
            let right = self.parse_membership()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_membership(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches_keyword(Keyword::In) {
            let right = self.parse_equality()?;
            expr = binary(BinaryOp::In, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.matches(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_range()?;
        while let Some(op) = if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            let right = self.parse_range()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_range(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_term()?;
        if self.matches(TokenKind::DotDot) {
            let right = self.parse_term()?;
            return Ok(binary(BinaryOp::Range, expr, right));
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = if self.matches(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_power()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_power()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_power(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_unary()?;
        if self.matches(TokenKind::StarStar) {
            let right = self.parse_power()?;
            return Ok(binary(BinaryOp::Pow, expr, right));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => Some(UnaryOp::Negate),
            Some(TokenKind::Plus) => Some(UnaryOp::Plus),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            Some(TokenKind::Ampersand) => Some(UnaryOp::AddressOf),
            Some(TokenKind::Star) => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            let operator = self.advance().span;
            let right = self.parse_unary()?;
            return Ok(Expr {
                span: operator.to(right.span),
                kind: ExprKind::Unary {
                    op,
                    expr: Box::new(right),
                },
            });
        }
        if self.matches_keyword(Keyword::Await) {
            let start = self.previous().span;
            let expr = self.parse_unary()?;
            return Ok(Expr {
                span: start.to(expr.span),
                kind: ExprKind::Await(Box::new(expr)),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_call()?;
        let op = if self.check_same_line(TokenKind::PlusPlus) {
            PostfixOp::Increment
        } else if self.check_same_line(TokenKind::MinusMinus) {
            PostfixOp::Decrement
        } else {
            return Ok(expr);
        };
        let operator = self.advance();
        if !matches!(
            expr.kind,
            ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Property { .. }
        ) {
            return Err(self.error(&operator, "invalid target for postfix operator"));
        }
        Ok(Expr {
            span: expr.span.to(operator.span),
            kind: ExprKind::Postfix {
                op,
                target: Box::new(expr),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_same_line(TokenKind::LParen) {
                self.advance();
                let args = self.parse_arguments()?;
                expr = Expr {
                    span: expr.span.to(self.previous().span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.check_same_line(TokenKind::LBracket) {
                self.advance();
                expr = self.parse_index(expr)?;
            } else if self.matches(TokenKind::Dot) {
                let name = self.consume_member_name("expected property name after `.`")?;
                if self.check_same_line(TokenKind::LParen) {
                    self.advance();
                    let args = self.parse_arguments()?;
                    expr = Expr {
                        span: expr.span.to(self.previous().span),
                        kind: ExprKind::Method {
                            target: Box::new(expr),
                            name: name.lexeme,
                            args,
                        },
                    };
                } else {
                    expr = Expr {
                        span: expr.span.to(name.span),
                        kind: ExprKind::Property {
                            target: Box::new(expr),
                            name: name.lexeme,
                        },
                    };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, Diagnostic> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_at_end() {
            let expr = self.parse_expression()?;
            let argument = match expr.kind {
                ExprKind::Assign {
                    op: AssignOp::Assign,
                    target,
                    value,
                } => match target.kind {
                    ExprKind::Variable(name) => Argument {
                        name: Some(name),
                        value: *value,
                    },
                    _ => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Parser,
                            "keyword argument name must be an identifier",
                        )
                        .with_span(target.span));
                    }
                },
                kind => Argument {
                    name: None,
                    value: Expr {
                        kind,
                        span: expr.span,
                    },
                },
            };
            args.push(argument);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after arguments")?;
        Ok(args)
    }

    fn parse_index(&mut self, target: Expr) -> Result<Expr, Diagnostic> {
        let start = if self.check(TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        if self.matches(TokenKind::Colon) {
            let end = if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let bracket = self.consume(TokenKind::RBracket, "expected `]` after slice")?;
            return Ok(Expr {
                span: target.span.to(bracket.span),
                kind: ExprKind::Slice {
                    target: Box::new(target),
                    start,
                    end,
                },
            });
        }
        let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
        let Some(index) = start else {
            return Err(self.error(&bracket, "expected index expression"));
        };
        Ok(Expr {
            span: target.span.to(bracket.span),
            kind: ExprKind::Index {
                target: Box::new(target),
                index,
            },
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        let literal = |kind| Expr {
            span: token.span,
            kind: ExprKind::Literal(kind),
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(literal(Literal::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(literal(Literal::Bool(false)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(literal(Literal::Null))
            }
            TokenKind::Number => {
                self.advance();
                let text = token.lexeme.replace('_', "");
                let value = if text.contains(['.', 'e', 'E']) {
                    text.parse().map(Literal::Float).ok()
                } else {
                    text.parse().map(Literal::Int).ok()
                };
                value
                    .map(literal)
                    .ok_or_else(|| self.error(&token, "invalid number literal"))
            }
            TokenKind::String => {
                self.advance();
                Ok(literal(Literal::String(token.lexeme.clone())))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Variable(token.lexeme.clone()),
                })
            }
            TokenKind::At => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::At,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(Expr {
                    span: token.span.to(rparen.span),
                    kind: ExprKind::Group(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(TokenKind::RBracket) && !self.is_at_end() {
                    elements.push(self.parse_expression()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after array literal")?;
                Ok(Expr {
                    span: token.span.to(rbracket.span),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_dict_literal(),
            TokenKind::Keyword(Keyword::Func) => {
                self.advance();
                let literal = self.parse_function_rest(None, false)?;
                Ok(Expr {
                    span: token.span.to(self.previous().span),
                    kind: ExprKind::Function(Arc::new(literal)),
                })
            }
            TokenKind::Keyword(Keyword::Async) => {
                self.advance();
                self.consume_keyword(Keyword::Func)?;
                let literal = self.parse_function_rest(None, true)?;
                Ok(Expr {
                    span: token.span.to(self.previous().span),
                    kind: ExprKind::Function(Arc::new(literal)),
                })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::Match) => self.parse_match(),
            TokenKind::Keyword(Keyword::Chan) => {
                self.advance();
                let buffer = if self.check_same_line(TokenKind::LParen) {
                    self.advance();
                    let size = self.parse_expression()?;
                    self.consume(TokenKind::RParen, "expected `)` after channel size")?;
                    Some(Box::new(size))
                } else {
                    None
                };
                Ok(Expr {
                    span: token.span.to(self.previous().span),
                    kind: ExprKind::Channel(buffer),
                })
            }
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn parse_dict_literal(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let key = self.parse_expression()?;
            self.consume(TokenKind::Colon, "expected `:` in dict literal")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after dict literal")?;
        Ok(Expr {
            span: lbrace.span.to(rbrace.span),
            kind: ExprKind::DictLiteral(entries),
        })
    }

    fn parse_if(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span;
        let condition = self.parse_expression()?;
        let (then_branch, then_span) = self.parse_block()?;
        let mut end = then_span;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let nested = self.parse_if()?;
                end = nested.span;
                Some(vec![Stmt {
                    span: nested.span,
                    kind: StmtKind::Expr(nested),
                }])
            } else {
                let (branch, span) = self.parse_block()?;
                end = span;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Expr {
            span: start.to(end),
            kind: ExprKind::If {
                condition: Box::new(condition),
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_switch(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.consume_keyword(Keyword::Switch)?.span;
        let subject = self.parse_expression()?;
        self.consume(TokenKind::LBrace, "expected `{` after switch subject")?;
        let mut cases = Vec::new();
        let mut default = None;
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.matches_keyword(Keyword::Default) {
                if default.is_some() {
                    let token = self.previous().clone();
                    return Err(self.error(&token, "switch has more than one default case"));
                }
                default = Some(self.parse_block()?.0);
                continue;
            }
            let case_token = self.consume_keyword(Keyword::Case)?;
            let kind = if self.matches_keyword(Keyword::Let) {
                let name = self.consume_identifier("expected binding name in case")?.lexeme;
                let guard = if self.matches_keyword(Keyword::If) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                CaseKind::Binding { name, guard }
            } else {
                let mut values = vec![self.parse_expression()?];
                while self.matches(TokenKind::Comma) {
                    values.push(self.parse_expression()?);
                }
                CaseKind::Values(values)
            };
            let (body, span) = self.parse_block()?;
            cases.push(SwitchCase {
                kind,
                body,
                span: case_token.span.to(span),
            });
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after switch cases")?;
        Ok(Expr {
            span: start.to(rbrace.span),
            kind: ExprKind::Switch {
                subject: Box::new(subject),
                cases,
                default,
            },
        })
    }

    fn parse_match(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.consume_keyword(Keyword::Match)?.span;
        let subject = self.parse_expression()?;
        self.consume(TokenKind::LBrace, "expected `{` after match subject")?;
        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            self.matches_keyword(Keyword::Case);
            let arm_start = self.peek().map(|t| t.span).unwrap_or_default();
            let pattern = self.parse_pattern()?;
            let guard = if self.matches_keyword(Keyword::If) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.consume(TokenKind::FatArrow, "expected `=>` after match pattern")?;
            let body = if self.check(TokenKind::LBrace) {
                self.parse_block()?.0
            } else {
                let expr = self.parse_expression()?;
                vec![Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                }]
            };
            arms.push(MatchArm {
                pattern,
                guard,
                body,
                span: arm_start.to(self.previous().span),
            });
            self.matches(TokenKind::Comma);
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after match arms")?;
        Ok(Expr {
            span: start.to(rbrace.span),
            kind: ExprKind::Match {
                subject: Box::new(subject),
                arms,
            },
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of input in pattern"));
        };
        match token.kind {
            TokenKind::Identifier
                if !self.peek_next_is(TokenKind::Dot)
                    && !self.peek_next_is(TokenKind::LParen)
                    && !self.peek_next_is(TokenKind::LBracket) =>
            {
                self.advance();
                if token.lexeme == "_" {
                    Ok(Pattern::Wildcard)
                } else {
                    Ok(Pattern::Binding(token.lexeme))
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                let mut rest = None;
                while !self.check(TokenKind::RBracket) && !self.is_at_end() {
                    if self.matches(TokenKind::Ellipsis) {
                        rest = Some(self.consume_identifier("expected name after `...`")?.lexeme);
                        self.matches(TokenKind::Comma);
                        if !self.check(TokenKind::RBracket) {
                            return Err(self.error(&token, "rest pattern must come last"));
                        }
                        break;
                    }
                    elements.push(self.parse_pattern()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RBracket, "expected `]` to close array pattern")?;
                Ok(Pattern::Array { elements, rest })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(TokenKind::RBrace) && !self.is_at_end() {
                    let key = self.parse_coalesce()?;
                    self.consume(TokenKind::Colon, "expected `:` in dict pattern")?;
                    let value = self.parse_pattern()?;
                    entries.push((key, value));
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.consume(TokenKind::RBrace, "expected `}` to close dict pattern")?;
                Ok(Pattern::Dict(entries))
            }
            _ => Ok(Pattern::Value(self.parse_coalesce()?)),
        }
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        let message = format!("expected keyword `{}`", format!("{keyword:?}").to_lowercase());
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    /// Property and method names may reuse keywords (`ch.close`, `d.default`).
    fn consume_member_name(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Identifier | TokenKind::Keyword(_) => Ok(self.advance()),
                _ => Err(self.error(token, message)),
            }
        } else {
            Err(self.error_eof(message))
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
    }

    /// Calls, indexing and postfix operators only bind on the same line.
    fn check_same_line(&self, kind: TokenKind) -> bool {
        self.check(kind)
            && self.current > 0
            && self
                .peek()
                .is_some_and(|token| token.span.line == self.previous().span.line)
    }

    fn peek_next_is(&self, kind: TokenKind) -> bool {
        self.peek_at_is(1, kind)
    }

    fn peek_at_is(&self, offset: usize, kind: TokenKind) -> bool {
        self.tokens
            .get(self.current + offset)
            .is_some_and(|token| token.kind == kind)
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("`{}`", token.lexeme)
        };
        Diagnostic::new(
            DiagnosticKind::Parser,
            format!("Line {}: {message}, found {found}", token.span.line),
        )
        .with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

/// Back-fills the name of an anonymous function literal bound by `let`/`const`.
fn name_function(mut expr: Expr, name: &str) -> Expr {
    if let ExprKind::Function(literal) = &mut expr.kind {
        if literal.name.is_none() {
            Arc::make_mut(literal).name = Some(name.to_string());
        }
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_expr(source: &str) -> ExprKind {
        let program = parse_program(source).expect("parse");
        match program.statements.into_iter().next().map(|stmt| stmt.kind) {
            Some(StmtKind::Expr(expr)) => expr.kind,
            other => panic!("expected expression statement, found {other:?}"),
        }
    }

    #[test]
    fn keyword_arguments_are_split_from_positional() {
        match first_expr("f(1, b = 2)") {
            ExprKind::Call { args, .. } => {
                assert!(args[0].name.is_none());
                assert_eq!(args[1].name.as_deref(), Some("b"));
            }
            other => panic!("expected call, found {other:?}"),
        }
    }

    #[test]
    fn let_names_function_literals() {
        let program = parse_program("let add = func(a, b = 1) { a + b }").expect("parse");
        match &program.statements[0].kind {
            StmtKind::Let {
                value:
                    Expr {
                        kind: ExprKind::Function(literal),
                        ..
                    },
                ..
            } => {
                assert_eq!(literal.name.as_deref(), Some("add"));
                assert!(literal.params[1].default.is_some());
            }
            other => panic!("expected let, found {other:?}"),
        }
    }

    #[test]
    fn call_does_not_continue_across_lines() {
        let program = parse_program("let a = b\n(c)").expect("parse");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn match_rest_pattern_must_be_last() {
        let err = parse_program("match x { [...rest, a] => 1 }").expect_err("should fail");
        assert!(err.message.contains("rest pattern must come last"), "{}", err.message);
    }

    #[test]
    fn slices_allow_open_bounds() {
        match first_expr("xs[:2]") {
            ExprKind::Slice { start, end, .. } => {
                assert!(start.is_none());
                assert!(end.is_some());
            }
            other => panic!("expected slice, found {other:?}"),
        }
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        let err = parse_program("1 + 2 = 3").expect_err("should fail");
        assert!(err.message.contains("invalid assignment target"));
    }
}
