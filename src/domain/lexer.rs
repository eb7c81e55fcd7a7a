//! Lexer for quantscript source text.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and `Dedent`
//! tokens so the parser never has to look at whitespace. Newlines inside
//! parentheses are ignored, which lets long argument lists wrap.

use std::fmt;

use crate::domain::ast::Span;
use crate::domain::error::{CompileError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Metadata,
    Params,
    Calculate,
    Strategy,
}

impl SectionKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "metadata" => Some(SectionKind::Metadata),
            "params" => Some(SectionKind::Params),
            "calculate" => Some(SectionKind::Calculate),
            "strategy" => Some(SectionKind::Strategy),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Metadata => "@metadata",
            SectionKind::Params => "@params",
            SectionKind::Calculate => "@calculate",
            SectionKind::Strategy => "@strategy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Section(SectionKind),
    Ident(String),
    Number(f64),
    Str(String),
    If,
    Elif,
    Else,
    For,
    In,
    Return,
    And,
    Or,
    Not,
    True,
    False,
    Import,
    From,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Assign,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "return" => TokenKind::Return,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Section(kind) => f.write_str(kind.name()),
            TokenKind::Ident(name) => write!(f, "'{}'", name),
            TokenKind::Number(v) => write!(f, "number {}", v),
            TokenKind::Str(s) => write!(f, "string \"{}\"", s),
            TokenKind::If => f.write_str("'if'"),
            TokenKind::Elif => f.write_str("'elif'"),
            TokenKind::Else => f.write_str("'else'"),
            TokenKind::For => f.write_str("'for'"),
            TokenKind::In => f.write_str("'in'"),
            TokenKind::Return => f.write_str("'return'"),
            TokenKind::And => f.write_str("'and'"),
            TokenKind::Or => f.write_str("'or'"),
            TokenKind::Not => f.write_str("'not'"),
            TokenKind::True => f.write_str("'true'"),
            TokenKind::False => f.write_str("'false'"),
            TokenKind::Import => f.write_str("'import'"),
            TokenKind::From => f.write_str("'from'"),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Percent => f.write_str("'%'"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Le => f.write_str("'<='"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Ge => f.write_str("'>='"),
            TokenKind::EqEq => f.write_str("'=='"),
            TokenKind::NotEq => f.write_str("'!='"),
            TokenKind::Assign => f.write_str("'='"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::Newline => f.write_str("end of line"),
            TokenKind::Indent => f.write_str("indented block"),
            TokenKind::Dedent => f.write_str("end of block"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Lexer {
    tokens: Vec<Token>,
    indents: Vec<usize>,
    depth: usize,
    last_paren: Option<Span>,
}

/// Tokenize a whole program.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer {
        tokens: Vec::new(),
        indents: vec![0],
        depth: 0,
        last_paren: None,
    };

    let mut offset = 0;
    let mut line_no = 0u32;
    for raw in source.split_inclusive('\n') {
        line_no += 1;
        let line = raw.trim_end_matches(['\n', '\r']);
        lexer.lex_line(line, line_no, offset)?;
        offset += raw.len();
    }

    let end = Span {
        offset: source.len(),
        len: 0,
        line: line_no.max(1),
        column: 1,
    };
    if lexer.depth > 0 {
        return Err(CompileError::lex(
            ErrorCode::UnbalancedParen,
            "unclosed '(' at end of input",
            lexer.last_paren.unwrap_or(end),
        ));
    }
    if lexer
        .tokens
        .last()
        .is_some_and(|t| t.kind != TokenKind::Newline && t.kind != TokenKind::Dedent)
    {
        lexer.push(TokenKind::Newline, end);
    }
    while lexer.indents.len() > 1 {
        lexer.indents.pop();
        lexer.push(TokenKind::Dedent, end);
    }
    lexer.push(TokenKind::Eof, end);
    Ok(lexer.tokens)
}

impl Lexer {
    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn lex_line(&mut self, line: &str, line_no: u32, offset: usize) -> Result<(), CompileError> {
        let chars: Vec<(usize, char)> = line.char_indices().collect();
        let span_at = |i: usize, len: usize| Span {
            offset: offset + chars.get(i).map(|(b, _)| *b).unwrap_or(line.len()),
            len,
            line: line_no,
            column: i as u32 + 1,
        };

        let mut i = 0;
        while i < chars.len() && (chars[i].1 == ' ' || chars[i].1 == '\t') {
            if chars[i].1 == '\t' && self.depth == 0 {
                return Err(CompileError::lex(
                    ErrorCode::TabIndent,
                    "tabs are not allowed in indentation",
                    span_at(i, 1),
                ));
            }
            i += 1;
        }
        if i == chars.len() || chars[i].1 == '#' {
            return Ok(());
        }

        if self.depth == 0 {
            let indent = i;
            let current = *self.indents.last().unwrap_or(&0);
            if indent > current {
                self.indents.push(indent);
                self.push(TokenKind::Indent, span_at(i, 0));
            } else if indent < current {
                while self.indents.last().is_some_and(|&level| level > indent) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, span_at(i, 0));
                }
                if self.indents.last().copied().unwrap_or(0) != indent {
                    return Err(CompileError::lex(
                        ErrorCode::InconsistentIndent,
                        "indentation does not match any enclosing block",
                        span_at(i, 0),
                    ));
                }
            }
        }

        while i < chars.len() {
            let (_, ch) = chars[i];
            let start = i;
            match ch {
                ' ' | '\t' => {
                    i += 1;
                }
                '#' => break,
                '0'..='9' => {
                    while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                    let value = text.parse::<f64>().map_err(|_| {
                        CompileError::lex(
                            ErrorCode::InvalidNumber,
                            format!("invalid number: {}", text),
                            span_at(start, text.len()),
                        )
                    })?;
                    self.push(TokenKind::Number(value), span_at(start, text.len()));
                }
                '"' | '\'' => {
                    let quote = ch;
                    i += 1;
                    let mut text = String::new();
                    let mut closed = false;
                    while i < chars.len() {
                        let c = chars[i].1;
                        if c == quote {
                            closed = true;
                            i += 1;
                            break;
                        }
                        if c == '\\' && i + 1 < chars.len() {
                            let escaped = match chars[i + 1].1 {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            };
                            text.push(escaped);
                            i += 2;
                            continue;
                        }
                        text.push(c);
                        i += 1;
                    }
                    if !closed {
                        return Err(CompileError::lex(
                            ErrorCode::UnterminatedString,
                            "unterminated string literal",
                            span_at(start, i - start),
                        ));
                    }
                    let len = chars
                        .get(i)
                        .map(|(b, _)| *b)
                        .unwrap_or(line.len())
                        - chars[start].0;
                    self.push(TokenKind::Str(text), span_at(start, len));
                }
                c if c.is_alphabetic() || c == '_' => {
                    while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().map(|(_, c)| c).collect();
                    let len = word.len();
                    let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word));
                    self.push(kind, span_at(start, len));
                }
                '@' => {
                    i += 1;
                    while i < chars.len() && chars[i].1.is_alphanumeric() {
                        i += 1;
                    }
                    let name: String = chars[start + 1..i].iter().map(|(_, c)| c).collect();
                    let span = span_at(start, name.len() + 1);
                    let kind = SectionKind::from_name(&name).ok_or_else(|| {
                        CompileError::lex(
                            ErrorCode::UnknownSection,
                            format!("unknown section '@{}'", name),
                            span,
                        )
                    })?;
                    self.push(TokenKind::Section(kind), span);
                }
                _ => {
                    let next = chars.get(i + 1).map(|(_, c)| *c);
                    let (kind, width) = match (ch, next) {
                        ('<', Some('=')) => (TokenKind::Le, 2),
                        ('>', Some('=')) => (TokenKind::Ge, 2),
                        ('=', Some('=')) => (TokenKind::EqEq, 2),
                        ('!', Some('=')) => (TokenKind::NotEq, 2),
                        ('<', _) => (TokenKind::Lt, 1),
                        ('>', _) => (TokenKind::Gt, 1),
                        ('=', _) => (TokenKind::Assign, 1),
                        ('+', _) => (TokenKind::Plus, 1),
                        ('-', _) => (TokenKind::Minus, 1),
                        ('*', _) => (TokenKind::Star, 1),
                        ('/', _) => (TokenKind::Slash, 1),
                        ('%', _) => (TokenKind::Percent, 1),
                        (':', _) => (TokenKind::Colon, 1),
                        (',', _) => (TokenKind::Comma, 1),
                        ('.', _) => (TokenKind::Dot, 1),
                        ('(', _) => (TokenKind::LParen, 1),
                        (')', _) => (TokenKind::RParen, 1),
                        _ => {
                            return Err(CompileError::lex(
                                ErrorCode::UnexpectedCharacter,
                                format!("unexpected character '{}'", ch),
                                span_at(start, ch.len_utf8()),
                            ));
                        }
                    };
                    let span = span_at(start, width);
                    match kind {
                        TokenKind::LParen => {
                            self.depth += 1;
                            self.last_paren = Some(span);
                        }
                        TokenKind::RParen => {
                            self.depth = self.depth.checked_sub(1).ok_or_else(|| {
                                CompileError::lex(
                                    ErrorCode::UnbalancedParen,
                                    "unmatched ')'",
                                    span,
                                )
                            })?;
                        }
                        _ => {}
                    }
                    self.push(kind, span);
                    i += width;
                }
            }
        }

        if self.depth == 0 {
            self.push(TokenKind::Newline, span_at(chars.len(), 0));
        }
        Ok(())
    }
}
