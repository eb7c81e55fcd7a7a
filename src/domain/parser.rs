//! Recursive descent parser for quantscript.
//!
//! Converts the token stream into a [`ProgramAst`]. The grammar is LL(1), so
//! every decision is made on the next token alone. Errors carry the line and
//! column of the token that could not be parsed.

use crate::domain::ast::{
    BinaryOp, Block, Expr, ExprKind, Literal, NodeId, ProgramAst, Span, Stmt, StmtKind, UnaryOp,
};
use crate::domain::error::{CompileError, ErrorCode};
use crate::domain::lexer::{tokenize, SectionKind, Token, TokenKind};
use crate::domain::source::{METADATA_KEYS, Metadata, Mode, ParamDecl, ParamType, ParamValue};

/// Maximum expression nesting accepted by the parser. Every link of an
/// operator, member or call chain counts as one level, as does every nested
/// block, so no accepted tree is deeper than this.
pub const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: NodeId,
    depth: usize,
    blocks: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            depth: 0,
            blocks: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn peek_second(&self) -> &TokenKind {
        let idx = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> CompileError {
        CompileError::syntax(
            ErrorCode::UnexpectedToken,
            format!("expected {}, found {}", expected, self.peek()),
            self.peek_span(),
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, CompileError> {
        if *self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(self.error_here(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, Span), CompileError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.error_here(expected)),
        }
    }

    fn expect_newline(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::Newline, "end of line").map(|_| ())
    }

    fn alloc_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn node(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr {
            id: self.alloc_id(),
            span,
            kind,
        }
    }

    fn stmt(&mut self, kind: StmtKind, span: Span) -> Stmt {
        Stmt {
            id: self.alloc_id(),
            span,
            kind,
        }
    }

    fn too_deep(&self, what: &str) -> CompileError {
        CompileError::syntax(
            ErrorCode::NestingTooDeep,
            format!("{} nesting exceeds {} levels", what, MAX_NESTING),
            self.peek_span(),
        )
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.too_deep("expression"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// One more link in a left-nested chain; released by [`Parser::unlink`].
    fn link(&mut self, links: &mut usize) -> Result<(), CompileError> {
        *links += 1;
        self.enter()
    }

    fn unlink(&mut self, links: usize) {
        self.depth -= links;
    }

    // ---- program structure -------------------------------------------------

    fn parse_program(&mut self) -> Result<ProgramAst, CompileError> {
        let mut metadata: Option<Metadata> = None;
        let mut params: Option<Vec<ParamDecl>> = None;
        let mut body: Option<(Mode, Block)> = None;

        loop {
            match self.peek().clone() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Section(kind) => {
                    let header = self.advance().span;
                    self.expect_newline()?;
                    match kind {
                        SectionKind::Metadata => {
                            if metadata.is_some() {
                                return Err(duplicate_section(kind, header));
                            }
                            metadata = Some(self.parse_metadata()?);
                        }
                        SectionKind::Params => {
                            if params.is_some() {
                                return Err(duplicate_section(kind, header));
                            }
                            params = Some(self.parse_params()?);
                        }
                        SectionKind::Calculate | SectionKind::Strategy => {
                            let mode = if kind == SectionKind::Calculate {
                                Mode::Indicator
                            } else {
                                Mode::Strategy
                            };
                            if let Some((existing, _)) = &body {
                                if *existing == mode {
                                    return Err(duplicate_section(kind, header));
                                }
                                return Err(CompileError::syntax(
                                    ErrorCode::ConflictingSections,
                                    "a program declares exactly one of @calculate or @strategy",
                                    header,
                                ));
                            }
                            body = Some((mode, self.parse_block()?));
                        }
                    }
                }
                _ => return Err(self.error_here("a section header such as @calculate")),
            }
        }

        let (mode, body) = body.ok_or_else(|| {
            CompileError::syntax(
                ErrorCode::MissingSection,
                "program needs a @calculate or @strategy block",
                self.peek_span(),
            )
        })?;

        Ok(ProgramAst {
            metadata: metadata.unwrap_or_default(),
            params: params.unwrap_or_default(),
            mode,
            body,
            next_id: self.next_id,
        })
    }

    fn parse_metadata(&mut self) -> Result<Metadata, CompileError> {
        self.expect(TokenKind::Indent, "an indented @metadata block")?;
        let mut metadata = Metadata::default();
        let mut seen: Vec<String> = Vec::new();

        while !self.eat(&TokenKind::Dedent) {
            let (key, key_span) = self.expect_ident("a metadata key")?;
            if !METADATA_KEYS.contains(&key.as_str()) {
                return Err(CompileError::syntax(
                    ErrorCode::UnknownMetadataKey,
                    format!(
                        "unknown metadata key '{}' (expected one of {})",
                        key,
                        METADATA_KEYS.join(", ")
                    ),
                    key_span,
                ));
            }
            if seen.contains(&key) {
                return Err(CompileError::syntax(
                    ErrorCode::UnexpectedToken,
                    format!("duplicate metadata key '{}'", key),
                    key_span,
                ));
            }
            self.expect(TokenKind::Colon, "':'")?;
            let value = match self.peek().clone() {
                TokenKind::Str(s) => {
                    self.advance();
                    s
                }
                TokenKind::Number(v) => {
                    self.advance();
                    v.to_string()
                }
                _ => return Err(self.error_here("a string value")),
            };
            self.expect_newline()?;

            let slot = match key.as_str() {
                "name" => &mut metadata.name,
                "category" => &mut metadata.category,
                "description" => &mut metadata.description,
                "version" => &mut metadata.version,
                _ => &mut metadata.stdlib,
            };
            *slot = Some(value);
            seen.push(key);
        }
        Ok(metadata)
    }

    fn parse_params(&mut self) -> Result<Vec<ParamDecl>, CompileError> {
        self.expect(TokenKind::Indent, "an indented @params block")?;
        let mut params: Vec<ParamDecl> = Vec::new();

        while !self.eat(&TokenKind::Dedent) {
            let (name, name_span) = self.expect_ident("a parameter name")?;
            if params.iter().any(|p| p.name == name) {
                return Err(CompileError::syntax(
                    ErrorCode::DuplicateParam,
                    format!("parameter '{}' is declared twice", name),
                    name_span,
                ));
            }
            self.expect(TokenKind::Colon, "':'")?;
            let (type_name, type_span) = self.expect_ident("a parameter type")?;
            let ty = ParamType::parse(&type_name).ok_or_else(|| {
                CompileError::syntax(
                    ErrorCode::InvalidParamDecl,
                    format!(
                        "unknown parameter type '{}' (expected int, float, string or bool)",
                        type_name
                    ),
                    type_span,
                )
            })?;

            let mut decl = ParamDecl {
                name,
                ty,
                default: None,
                min: None,
                max: None,
                span: name_span,
            };

            if self.eat(&TokenKind::Assign) {
                let value_span = self.peek_span();
                let value = self.parse_param_literal()?;
                decl.default = Some(value);
                decl.span = name_span.to(value_span);
            }

            if self.eat(&TokenKind::LParen) {
                loop {
                    let (bound, bound_span) = self.expect_ident("'min' or 'max'")?;
                    self.expect(TokenKind::Assign, "'='")?;
                    let value = self.parse_signed_number()?;
                    match bound.as_str() {
                        "min" => decl.min = Some(value),
                        "max" => decl.max = Some(value),
                        _ => {
                            return Err(CompileError::syntax(
                                ErrorCode::InvalidParamDecl,
                                format!("unknown parameter bound '{}'", bound),
                                bound_span,
                            ));
                        }
                    }
                    if self.eat(&TokenKind::RParen) {
                        break;
                    }
                    self.expect(TokenKind::Comma, "',' or ')'")?;
                }
            }

            if let Some(default) = &decl.default {
                decl.check(default).map_err(|reason| {
                    CompileError::syntax(
                        ErrorCode::InvalidParamDecl,
                        format!("invalid default for '{}': {}", decl.name, reason),
                        decl.span,
                    )
                })?;
            }
            self.expect_newline()?;
            params.push(decl);
        }
        Ok(params)
    }

    fn parse_param_literal(&mut self) -> Result<ParamValue, CompileError> {
        match self.peek().clone() {
            TokenKind::Str(s) => {
                self.advance();
                Ok(ParamValue::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(ParamValue::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(ParamValue::Bool(false))
            }
            _ => self.parse_signed_number().map(ParamValue::Number),
        }
    }

    fn parse_signed_number(&mut self) -> Result<f64, CompileError> {
        let negative = self.eat(&TokenKind::Minus);
        match self.peek().clone() {
            TokenKind::Number(v) => {
                self.advance();
                Ok(if negative { -v } else { v })
            }
            _ => Err(self.error_here("a number")),
        }
    }

    // ---- statements --------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let start = self.expect(TokenKind::Indent, "an indented block")?.span;
        self.blocks += 1;
        if self.blocks > MAX_NESTING {
            return Err(self.too_deep("block"));
        }
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::Dedent | TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        let end = self.peek_span();
        self.expect(TokenKind::Dedent, "end of block")?;
        self.blocks -= 1;
        Ok(Block {
            span: start.to(end),
            stmts,
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek_span();
        match self.peek().clone() {
            TokenKind::Return => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect_newline()?;
                let span = start.to(value.span);
                Ok(self.stmt(StmtKind::Return(value), span))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Import => {
                self.advance();
                let (path, end) = self.parse_dotted_name()?;
                self.expect_newline()?;
                Ok(self.stmt(StmtKind::Import { path }, start.to(end)))
            }
            TokenKind::From => {
                self.advance();
                let (mut path, _) = self.parse_dotted_name()?;
                self.expect(TokenKind::Import, "'import'")?;
                let (name, end) = self.expect_ident("a name to import")?;
                path.push(name);
                self.expect_newline()?;
                Ok(self.stmt(StmtKind::Import { path }, start.to(end)))
            }
            TokenKind::Ident(name) if *self.peek_second() == TokenKind::Assign => {
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                self.expect_newline()?;
                let span = start.to(value.span);
                Ok(self.stmt(StmtKind::Assignment { name, value }, span))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect_newline()?;
                let span = expr.span;
                Ok(self.stmt(StmtKind::Expr(expr), span))
            }
        }
    }

    fn parse_dotted_name(&mut self) -> Result<(Vec<String>, Span), CompileError> {
        let (first, mut end) = self.expect_ident("a module name")?;
        let mut path = vec![first];
        while self.eat(&TokenKind::Dot) {
            let (segment, span) = self.expect_ident("a name after '.'")?;
            path.push(segment);
            end = span;
        }
        Ok((path, end))
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let start = self.advance().span;
        let mut branches = Vec::new();

        let condition = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        self.expect_newline()?;
        let body = self.parse_block()?;
        let mut end = body.span;
        branches.push((condition, body));

        while self.eat(&TokenKind::Elif) {
            let condition = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':'")?;
            self.expect_newline()?;
            let body = self.parse_block()?;
            end = body.span;
            branches.push((condition, body));
        }

        let else_block = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::Colon, "':'")?;
            self.expect_newline()?;
            let body = self.parse_block()?;
            end = body.span;
            Some(body)
        } else {
            None
        };

        Ok(self.stmt(
            StmtKind::If {
                branches,
                else_block,
            },
            start.to(end),
        ))
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let start = self.advance().span;
        let (var, _) = self.expect_ident("a loop variable")?;
        self.expect(TokenKind::In, "'in'")?;
        let (range, range_span) = self.expect_ident("'range'")?;
        if range != "range" {
            return Err(CompileError::syntax(
                ErrorCode::UnexpectedToken,
                format!("expected 'range', found '{}'", range),
                range_span,
            ));
        }
        self.expect(TokenKind::LParen, "'('")?;
        let first = self.parse_expr()?;
        let (begin, end) = if self.eat(&TokenKind::Comma) {
            let second = self.parse_expr()?;
            (first, second)
        } else {
            let zero = self.node(ExprKind::Literal(Literal::Number(0.0)), first.span);
            (zero, first)
        };
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;
        self.expect_newline()?;
        let body = self.parse_block()?;
        let span = start.to(body.span);
        Ok(self.stmt(
            StmtKind::For {
                var,
                start: begin,
                end,
                body,
            },
            span,
        ))
    }

    // ---- expressions -------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.enter()?;
        let value = self.parse_or()?;
        let result = if self.eat(&TokenKind::If) {
            let condition = self.parse_or()?;
            self.expect(TokenKind::Else, "'else' in conditional expression")?;
            let otherwise = self.parse_expr()?;
            let span = value.span.to(otherwise.span);
            self.node(
                ExprKind::Conditional {
                    condition: Box::new(condition),
                    then_branch: Box::new(value),
                    else_branch: Box::new(otherwise),
                },
                span,
            )
        } else {
            value
        };
        self.leave();
        Ok(result)
    }

    fn binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.to(right.span);
        self.node(
            ExprKind::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut links = 0;
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.link(&mut links)?;
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut links = 0;
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            self.link(&mut links)?;
            let right = self.parse_not()?;
            left = self.binary(BinaryOp::And, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, CompileError> {
        if *self.peek() == TokenKind::Not {
            let start = self.advance().span;
            self.enter()?;
            let operand = self.parse_not()?;
            self.leave();
            let span = start.to(operand.span);
            return Ok(self.node(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        match self.peek() {
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_additive()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_additive()?;
        if self.comparison_op().is_some() {
            return Err(CompileError::syntax(
                ErrorCode::UnexpectedToken,
                "chained comparisons are not supported; combine them with 'and'",
                self.peek_span(),
            ));
        }
        Ok(self.binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut links = 0;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_term()?;
            left = self.binary(op, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut links = 0;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            self.link(&mut links)?;
            let right = self.parse_unary()?;
            left = self.binary(op, left, right);
        }
        self.unlink(links);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if *self.peek() == TokenKind::Minus {
            let start = self.advance().span;
            self.enter()?;
            let operand = self.parse_unary()?;
            self.leave();
            let span = start.to(operand.span);
            return Ok(self.node(
                ExprKind::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut links = 0;
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    self.link(&mut links)?;
                    let (field, field_span) = self.expect_ident("a name after '.'")?;
                    let span = expr.span.to(field_span);
                    expr = self.node(
                        ExprKind::DottedAccess {
                            base: Box::new(expr),
                            field,
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    self.link(&mut links)?;
                    let mut args = Vec::new();
                    if *self.peek() != TokenKind::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if *self.peek() == TokenKind::RParen {
                                break;
                            }
                            self.expect(TokenKind::Comma, "',' or ')'")?;
                        }
                    }
                    let end = self.expect(TokenKind::RParen, "')'")?.span;
                    let span = expr.span.to(end);
                    expr = self.node(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        self.unlink(links);
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.peek_span();
        let kind = match self.peek().clone() {
            TokenKind::Number(v) => ExprKind::Literal(Literal::Number(v)),
            TokenKind::Str(s) => ExprKind::Literal(Literal::Str(s)),
            TokenKind::True => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::False => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::Ident(name) => ExprKind::Identifier(name),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            _ => return Err(self.error_here("an expression")),
        };
        self.advance();
        Ok(self.node(kind, span))
    }
}

fn duplicate_section(kind: SectionKind, span: Span) -> CompileError {
    CompileError::syntax(
        ErrorCode::DuplicateSection,
        format!("{} is declared more than once", kind.name()),
        span,
    )
}

/// Parse program source text into an AST.
pub fn parse(source: &str) -> Result<ProgramAst, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
