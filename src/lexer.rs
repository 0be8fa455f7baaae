use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Func,
    Async,
    Await,
    Go,
    Chan,
    Return,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Match,
    Import,
    Include,
    Package,
    Enum,
    Error,
    Throw,
    Defer,
    Repeat,
    True,
    False,
    Null,
    Todo,
    Warn,
    Info,
    Debug,
    Note,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Ellipsis,
    Colon,
    Semicolon,
    FatArrow,
    At,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Plus,
    PlusPlus,
    Minus,
    MinusMinus,
    Star,
    StarStar,
    Slash,
    Percent,
    Ampersand,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    QuestionQuestion,
    Unknown,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    line: usize,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            line: 1,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some((idx, ch)) = self.peeked.take() {
            Some((idx, ch))
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
            }
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// Character after the peeked one.
    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((_, ch)) = self.peek() {
            if ch == expected {
                self.bump();
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn skip_shebang(&mut self) {
        if self.source.starts_with("#!") {
            while let Some((_, ch)) = self.peek() {
                if ch == '\n' {
                    break;
                }
                self.bump();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let mut progressed = false;

            while let Some((_, ch)) = self.peek() {
                if ch.is_whitespace() {
                    self.bump();
                    progressed = true;
                } else {
                    break;
                }
            }

            if let Some((_, '/')) = self.peek() {
                match self.peek_second() {
                    Some('/') => {
                        self.bump();
                        self.bump();
                        while let Some((_, ch)) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.bump();
                        }
                        progressed = true;
                    }
                    Some('*') => {
                        self.bump();
                        self.bump();
                        let mut depth = 1;
                        while let Some((_, ch)) = self.bump() {
                            if ch == '/' && self.match_next('*') {
                                depth += 1;
                            } else if ch == '*' && self.match_next('/') {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                        }
                        progressed = true;
                    }
                    _ => {}
                }
            }

            if !progressed {
                break;
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize, line: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: SourceSpan::new(start, end, line),
        }
    }

    fn number_literal(&mut self, start: usize, line: usize) -> Token {
        let mut seen_dot = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' => {
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let end = self.current;
        Token {
            kind: TokenKind::Number,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan::new(start, end, line),
        }
    }

    fn string_literal(&mut self, start: usize, line: usize, quote: char) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                c if c == quote => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: SourceSpan::new(start, self.current, line),
                    });
                }
                '\\' => {
                    if let Some((_, esc)) = self.bump() {
                        match esc {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            '0' => value.push('\0'),
                            other => value.push(other),
                        }
                    } else {
                        break;
                    }
                }
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(SourceSpan::new(start, self.current, line)),
        )
    }

    fn simple_token(&mut self, start: usize, line: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan::new(start, end, line),
        }
    }

    /// Emits `compound` when the next char is `=`, otherwise `plain`.
    fn with_assign(&mut self, start: usize, line: usize, plain: TokenKind, compound: TokenKind) -> Token {
        if self.match_next('=') {
            self.simple_token(start, line, compound)
        } else {
            self.simple_token(start, line, plain)
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        self.skip_shebang();
        loop {
            self.skip_whitespace_and_comments();
            let line = self.line;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan::new(self.current, self.current, self.line),
                    });
                    break;
                }
            };

            let token = match ch {
                c if c.is_alphabetic() || c == '_' => self.identifier_or_keyword(start, line),
                '0'..='9' => self.number_literal(start, line),
                '"' | '\'' => self.string_literal(start, line, ch)?,
                '(' => self.simple_token(start, line, TokenKind::LParen),
                ')' => self.simple_token(start, line, TokenKind::RParen),
                '{' => self.simple_token(start, line, TokenKind::LBrace),
                '}' => self.simple_token(start, line, TokenKind::RBrace),
                '[' => self.simple_token(start, line, TokenKind::LBracket),
                ']' => self.simple_token(start, line, TokenKind::RBracket),
                ',' => self.simple_token(start, line, TokenKind::Comma),
                '@' => self.simple_token(start, line, TokenKind::At),
                '.' => {
                    if self.match_next('.') {
                        if self.match_next('.') {
                            self.simple_token(start, line, TokenKind::Ellipsis)
                        } else {
                            self.simple_token(start, line, TokenKind::DotDot)
                        }
                    } else {
                        self.simple_token(start, line, TokenKind::Dot)
                    }
                }
                ';' => self.simple_token(start, line, TokenKind::Semicolon),
                ':' => self.simple_token(start, line, TokenKind::Colon),
                '+' => {
                    if self.match_next('+') {
                        self.simple_token(start, line, TokenKind::PlusPlus)
                    } else {
                        self.with_assign(start, line, TokenKind::Plus, TokenKind::PlusAssign)
                    }
                }
                '-' => {
                    if self.match_next('-') {
                        self.simple_token(start, line, TokenKind::MinusMinus)
                    } else {
                        self.with_assign(start, line, TokenKind::Minus, TokenKind::MinusAssign)
                    }
                }
                '*' => {
                    if self.match_next('*') {
                        self.simple_token(start, line, TokenKind::StarStar)
                    } else {
                        self.with_assign(start, line, TokenKind::Star, TokenKind::StarAssign)
                    }
                }
                '/' => self.with_assign(start, line, TokenKind::Slash, TokenKind::SlashAssign),
                '%' => self.with_assign(start, line, TokenKind::Percent, TokenKind::PercentAssign),
                '=' => {
                    if self.match_next('>') {
                        self.simple_token(start, line, TokenKind::FatArrow)
                    } else {
                        self.with_assign(start, line, TokenKind::Assign, TokenKind::EqualEqual)
                    }
                }
                '!' => self.with_assign(start, line, TokenKind::Bang, TokenKind::BangEqual),
                '<' => self.with_assign(start, line, TokenKind::Less, TokenKind::LessEqual),
                '>' => self.with_assign(start, line, TokenKind::Greater, TokenKind::GreaterEqual),
                '&' => {
                    if self.match_next('&') {
                        self.simple_token(start, line, TokenKind::DoubleAmpersand)
                    } else {
                        self.simple_token(start, line, TokenKind::Ampersand)
                    }
                }
                '|' => {
                    if self.match_next('|') {
                        self.simple_token(start, line, TokenKind::DoublePipe)
                    } else {
                        self.simple_token(start, line, TokenKind::Unknown)
                    }
                }
                '?' => {
                    if self.match_next('?') {
                        self.simple_token(start, line, TokenKind::QuestionQuestion)
                    } else {
                        self.simple_token(start, line, TokenKind::Unknown)
                    }
                }
                _ => self.simple_token(start, line, TokenKind::Unknown),
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "let" => Kw::Let,
        "const" => Kw::Const,
        "func" => Kw::Func,
        "async" => Kw::Async,
        "await" => Kw::Await,
        "go" => Kw::Go,
        "chan" => Kw::Chan,
        "return" => Kw::Return,
        "if" => Kw::If,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "switch" => Kw::Switch,
        "case" => Kw::Case,
        "default" => Kw::Default,
        "match" => Kw::Match,
        "import" => Kw::Import,
        "include" => Kw::Include,
        "package" => Kw::Package,
        "enum" => Kw::Enum,
        "error" => Kw::Error,
        "throw" => Kw::Throw,
        "defer" => Kw::Defer,
        "repeat" => Kw::Repeat,
        "true" => Kw::True,
        "false" => Kw::False,
        "null" => Kw::Null,
        "todo" => Kw::Todo,
        "warn" => Kw::Warn,
        "info" => Kw::Info,
        "debug" => Kw::Debug,
        "note" => Kw::Note,
        "success" => Kw::Success,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn range_after_integer_is_not_a_float() {
        assert_eq!(
            kinds("1..3"),
            vec![
                TokenKind::Number,
                TokenKind::DotDot,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("x += 1 ?? y ** 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusAssign,
                TokenKind::Number,
                TokenKind::QuestionQuestion,
                TokenKind::Identifier,
                TokenKind::StarStar,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn tracks_lines_and_skips_comments() {
        let tokens = Lexer::new("#!/usr/bin/env vint\nlet a = 1 // one\n/* two\n */ a")
            .tokenize()
            .expect("tokenize");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Let));
        assert_eq!(tokens[0].span.line, 2);
        assert_eq!(tokens[4].lexeme, "a");
        assert_eq!(tokens[4].span.line, 4);
    }

    #[test]
    fn single_quoted_strings_unescape() {
        let tokens = Lexer::new(r"'it\'s' ...").tokenize().expect("tokenize");
        assert_eq!(tokens[0].lexeme, "it's");
        assert_eq!(tokens[1].kind, TokenKind::Ellipsis);
    }

    #[test]
    fn unterminated_string_is_reported() {
        let err = Lexer::new("\"open").tokenize().expect_err("should fail");
        assert_eq!(err.kind, DiagnosticKind::Lexer);
    }
}
