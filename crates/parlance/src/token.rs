use std::fmt;

use crate::location::SourceRange;

/// The closed set of token kinds produced by the scanner.
///
/// Keyword recognition happens after lexing a word: the lowercased text is
/// compared against a fixed table, so keywords are case-insensitive while
/// literals keep their original spelling in [`Token::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ampersand,
    An,
    And,
    Arrow,
    BoolLiteral,
    Carrot,
    ClosedInterpolation,
    ClosedRange,
    Colon,
    Comma,
    Comment,
    Else,
    Empty,
    End,
    EndOfFile,
    Equal,
    Error,
    Exit,
    FloatLiteral,
    For,
    Forever,
    Function,
    Global,
    GreaterThan,
    GreaterThanOrEqual,
    If,
    In,
    IntLiteral,
    Interpolation,
    Is,
    LeftBrace,
    LeftBracket,
    LeftParen,
    LessThan,
    LessThanOrEqual,
    Local,
    Minus,
    NewLine,
    Next,
    Not,
    NotEqual,
    OpenInterpolation,
    OpenRange,
    Or,
    Percent,
    Plus,
    Repeat,
    Return,
    RightBrace,
    RightBracket,
    RightParen,
    Set,
    Slash,
    Star,
    StringLiteral,
    Then,
    To,
    Try,
    Until,
    Use,
    Using,
    While,
    Word,
}

/// Looks up the keyword kind for a lowercased word, if any.
pub(crate) fn keyword_kind(lowercased: &str) -> Option<TokenKind> {
    let kind = match lowercased {
        "a" | "an" => TokenKind::An,
        "and" => TokenKind::And,
        "else" => TokenKind::Else,
        "empty" => TokenKind::Empty,
        "end" => TokenKind::End,
        "exit" => TokenKind::Exit,
        "false" | "true" => TokenKind::BoolLiteral,
        "for" => TokenKind::For,
        "forever" => TokenKind::Forever,
        "function" => TokenKind::Function,
        "global" => TokenKind::Global,
        "if" => TokenKind::If,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "local" => TokenKind::Local,
        "next" => TokenKind::Next,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "repeat" => TokenKind::Repeat,
        "return" => TokenKind::Return,
        "set" => TokenKind::Set,
        "then" => TokenKind::Then,
        "to" => TokenKind::To,
        "try" => TokenKind::Try,
        "until" => TokenKind::Until,
        "use" => TokenKind::Use,
        "using" => TokenKind::Using,
        "while" => TokenKind::While,
        _ => return None,
    };
    Some(kind)
}

/// A single lexical token with its source range and original spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
    pub text: String,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, range: SourceRange, text: String) -> Self {
        Self { kind, range, text }
    }

    /// True for any identifier-like token: plain words and the keywords,
    /// which may all appear inside function signatures.
    #[must_use]
    pub fn is_word(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::Ampersand
                | TokenKind::Arrow
                | TokenKind::BoolLiteral
                | TokenKind::Carrot
                | TokenKind::ClosedInterpolation
                | TokenKind::ClosedRange
                | TokenKind::Colon
                | TokenKind::Comma
                | TokenKind::Comment
                | TokenKind::EndOfFile
                | TokenKind::Equal
                | TokenKind::Error
                | TokenKind::FloatLiteral
                | TokenKind::GreaterThan
                | TokenKind::GreaterThanOrEqual
                | TokenKind::IntLiteral
                | TokenKind::Interpolation
                | TokenKind::LeftBrace
                | TokenKind::LeftBracket
                | TokenKind::LeftParen
                | TokenKind::LessThan
                | TokenKind::LessThanOrEqual
                | TokenKind::Minus
                | TokenKind::NewLine
                | TokenKind::NotEqual
                | TokenKind::OpenInterpolation
                | TokenKind::OpenRange
                | TokenKind::Percent
                | TokenKind::Plus
                | TokenKind::RightBrace
                | TokenKind::RightBracket
                | TokenKind::RightParen
                | TokenKind::Slash
                | TokenKind::Star
                | TokenKind::StringLiteral
        )
    }

    /// True when this token terminates a statement.
    #[must_use]
    pub fn is_end_of_statement(&self) -> bool {
        matches!(self.kind, TokenKind::NewLine | TokenKind::EndOfFile)
    }

    /// The quote byte that opened a string or interpolation token.
    ///
    /// For `OpenInterpolation` the text begins with the quote itself; for
    /// `StringLiteral` likewise. Defaults to `"` for other kinds.
    #[must_use]
    pub fn opening_string_terminal(&self) -> u8 {
        match self.text.as_bytes().first() {
            Some(b'\'') => b'\'',
            _ => b'"',
        }
    }

    /// Decodes the literal content of a string-ish token.
    ///
    /// Strips the surrounding delimiters (quotes for `StringLiteral`, quote
    /// and `{` for `OpenInterpolation`, `}` and `{` for `Interpolation`,
    /// `}` and quote for `ClosedInterpolation`) and resolves the escape
    /// sequences `\n`, `\t`, `\\`, `\"`, and `\'`.
    #[must_use]
    pub fn string_contents(&self) -> String {
        let bytes = self.text.as_bytes();
        let strip_leading = match self.kind {
            TokenKind::StringLiteral
            | TokenKind::OpenInterpolation
            | TokenKind::Interpolation
            | TokenKind::ClosedInterpolation => usize::from(!bytes.is_empty()),
            _ => 0,
        };
        let strip_trailing = match self.kind {
            TokenKind::StringLiteral
            | TokenKind::OpenInterpolation
            | TokenKind::Interpolation
            | TokenKind::ClosedInterpolation => usize::from(bytes.len() > 1),
            _ => 0,
        };
        let inner = &self.text[strip_leading..self.text.len() - strip_trailing];
        let mut result = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        }
        result
    }

    /// A human-readable description used in diagnostics.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            TokenKind::NewLine => "new line".to_owned(),
            TokenKind::EndOfFile => "end of script".to_owned(),
            TokenKind::Error => self.text.clone(),
            _ => format!("\u{201c}{}\u{201d}", self.text),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
