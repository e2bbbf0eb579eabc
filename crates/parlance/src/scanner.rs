use crate::{
    location::{SourceLocation, SourceRange},
    report::messages,
    token::{Token, TokenKind, keyword_kind},
};

/// The lexer. Operates on raw bytes; UTF-8 continuation bytes are allowed
/// inside identifiers, and multi-byte characters never collide with the
/// ASCII punctuation the scanner dispatches on.
///
/// Three mode flags are visible to the parser:
///
/// - [`ignore_new_lines`](Self::ignore_new_lines) swallows `NewLine` tokens
///   (set inside bracketed literals).
/// - [`interpolating`](Self::interpolating) makes the next `scan()` resume
///   string scanning when it meets a `}`, continuing a string that
///   previously produced an `OpenInterpolation` or `Interpolation` token.
/// - [`string_terminal`](Self::string_terminal) is the quote byte that closes
///   the interpolated string.
#[derive(Debug, Default)]
pub struct Scanner {
    source: String,
    start: usize,
    current: usize,
    start_location: SourceLocation,
    current_location: SourceLocation,
    pub ignore_new_lines: bool,
    pub interpolating: bool,
    pub string_terminal: u8,
}

impl Scanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the source text and restarts scanning from the beginning.
    pub fn reset(&mut self, source: &str) {
        self.source = source.to_owned();
        self.start = 0;
        self.current = 0;
        self.start_location = SourceLocation::default();
        self.current_location = SourceLocation::default();
        self.ignore_new_lines = false;
        self.interpolating = false;
        self.string_terminal = 0;
    }

    /// Replaces the source text and continues scanning from `location`.
    ///
    /// Used when the reader supplies another chunk of an unfinished script:
    /// the new text must extend the old, and scanning picks up where the
    /// previous end-of-file was reported.
    pub fn resume(&mut self, source: &str, location: SourceLocation) {
        self.source = source.to_owned();
        self.start = location.offset;
        self.current = location.offset;
        self.start_location = location;
        self.current_location = location;
    }

    /// Produces the next token.
    pub fn scan(&mut self) -> Token {
        if self.interpolating {
            self.skip_blank();
            if self.peek() == Some(b'}') {
                self.begin_token();
                self.advance();
                return self.scan_string(b'}', self.string_terminal);
            }
        }
        loop {
            self.skip_blank();
            self.begin_token();
            let Some(byte) = self.peek() else {
                return self.make(TokenKind::EndOfFile);
            };
            self.advance();
            match byte {
                b'\n' => {
                    if self.ignore_new_lines {
                        continue;
                    }
                    return self.make(TokenKind::NewLine);
                }
                b'(' => return self.make(TokenKind::LeftParen),
                b')' => return self.make(TokenKind::RightParen),
                b'[' => return self.make(TokenKind::LeftBracket),
                b']' => return self.make(TokenKind::RightBracket),
                b'{' => return self.make(TokenKind::LeftBrace),
                b'}' => return self.make(TokenKind::RightBrace),
                b',' => return self.make(TokenKind::Comma),
                b':' => return self.make(TokenKind::Colon),
                b'+' => return self.make(TokenKind::Plus),
                b'*' => return self.make(TokenKind::Star),
                b'/' => return self.make(TokenKind::Slash),
                b'%' => return self.make(TokenKind::Percent),
                b'^' => return self.make(TokenKind::Carrot),
                b'&' => return self.make(TokenKind::Ampersand),
                b'=' => return self.make(TokenKind::Equal),
                b'-' => {
                    if self.match_byte(b'-') {
                        return self.scan_comment();
                    }
                    if self.match_byte(b'>') {
                        return self.make(TokenKind::Arrow);
                    }
                    return self.make(TokenKind::Minus);
                }
                b'<' => {
                    if self.match_byte(b'=') {
                        return self.make(TokenKind::LessThanOrEqual);
                    }
                    if self.match_byte(b'>') {
                        return self.make(TokenKind::NotEqual);
                    }
                    return self.make(TokenKind::LessThan);
                }
                b'>' => {
                    if self.match_byte(b'=') {
                        return self.make(TokenKind::GreaterThanOrEqual);
                    }
                    return self.make(TokenKind::GreaterThan);
                }
                b'!' => {
                    if self.match_byte(b'=') {
                        return self.make(TokenKind::NotEqual);
                    }
                    return self.make_error(messages::unknown_character('!'));
                }
                b'.' => {
                    if self.match_byte(b'.') {
                        if self.match_byte(b'.') {
                            return self.make(TokenKind::ClosedRange);
                        }
                        if self.match_byte(b'<') {
                            return self.make(TokenKind::OpenRange);
                        }
                    }
                    return self.make_error(messages::unknown_character('.'));
                }
                b'"' | b'\'' => return self.scan_string(byte, byte),
                b'0'..=b'9' => return self.scan_number(),
                _ => {
                    if is_word_start(byte) {
                        return self.scan_word();
                    }
                    let character = self.source[self.start..].chars().next().unwrap_or('?');
                    // Consume the remaining bytes of a multi-byte character
                    // so the next scan starts on a boundary.
                    for _ in 1..character.len_utf8() {
                        self.advance();
                    }
                    return self.make_error(messages::unknown_character(character));
                }
            }
        }
    }

    fn skip_blank(&mut self) {
        while let Some(byte) = self.peek() {
            match byte {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                _ => return,
            }
        }
    }

    fn scan_comment(&mut self) -> Token {
        while let Some(byte) = self.peek() {
            if byte == b'\n' {
                break;
            }
            self.advance();
        }
        self.make(TokenKind::Comment)
    }

    /// Scans string content until the terminal quote, an interpolation brace,
    /// or the end of input.
    ///
    /// `opening` is the byte already consumed: a quote when starting a fresh
    /// string, or `}` when resuming after an interpolated expression. The
    /// emitted token text includes both delimiters, so the parser and the
    /// annotator see exactly the source slice.
    fn scan_string(&mut self, opening: u8, terminal: u8) -> Token {
        let resuming = opening == b'}';
        loop {
            let Some(byte) = self.peek() else {
                return self.make_error(if resuming || self.interpolating {
                    messages::UNTERMINATED_INTERPOLATION.to_owned()
                } else {
                    messages::UNTERMINATED_STRING.to_owned()
                });
            };
            self.advance();
            match byte {
                b'\\' => {
                    // Keep the escape pair intact; decoding happens in
                    // Token::string_contents.
                    if self.peek().is_some() {
                        self.advance();
                    }
                }
                b'{' => {
                    return self.make(if resuming {
                        TokenKind::Interpolation
                    } else {
                        TokenKind::OpenInterpolation
                    });
                }
                b'\n' => {
                    return self.make_error(if resuming {
                        messages::UNTERMINATED_INTERPOLATION.to_owned()
                    } else {
                        messages::UNTERMINATED_STRING.to_owned()
                    });
                }
                _ if byte == terminal => {
                    return self.make(if resuming {
                        TokenKind::ClosedInterpolation
                    } else {
                        TokenKind::StringLiteral
                    });
                }
                _ => {}
            }
        }
    }

    fn scan_number(&mut self) -> Token {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let mut is_float = false;
        // A dot only continues the number when followed by a digit, so that
        // range operators after an integer are left alone: 1...3
        if self.peek() == Some(b'.') && matches!(self.peek_next(), Some(b'0'..=b'9')) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = self.current + 1;
            if matches!(self.source.as_bytes().get(lookahead), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if matches!(self.source.as_bytes().get(lookahead), Some(b'0'..=b'9')) {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.advance();
                }
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.advance();
                }
            } else if !is_word_continue_at(self.source.as_bytes(), lookahead) {
                // "1e" followed by something that can't continue a word
                self.advance();
                return self.make_error(messages::MALFORMED_NUMBER.to_owned());
            }
        }
        self.make(if is_float { TokenKind::FloatLiteral } else { TokenKind::IntLiteral })
    }

    fn scan_word(&mut self) -> Token {
        while let Some(byte) = self.peek() {
            if is_word_continue(byte) {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.source[self.start..self.current];
        let kind = keyword_kind(&text.to_ascii_lowercase()).unwrap_or(TokenKind::Word);
        self.make(kind)
    }

    fn begin_token(&mut self) {
        self.start = self.current;
        self.start_location = self.current_location;
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current + 1).copied()
    }

    fn advance(&mut self) {
        let Some(byte) = self.peek() else { return };
        self.current += 1;
        self.current_location.offset = self.current;
        if byte == b'\n' {
            self.current_location.line += 1;
            self.current_location.column = 0;
        } else {
            self.current_location.column += 1;
        }
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            return true;
        }
        false
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            SourceRange::new(self.start_location, self.current_location),
            self.source[self.start..self.current].to_owned(),
        )
    }

    fn make_error(&self, message: String) -> Token {
        Token::new(
            TokenKind::Error,
            SourceRange::new(self.start_location, self.current_location),
            message,
        )
    }
}

fn is_word_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte >= 0x80
}

fn is_word_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte >= 0x80
}

fn is_word_continue_at(bytes: &[u8], index: usize) -> bool {
    bytes.get(index).copied().is_some_and(is_word_continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new();
        scanner.reset(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan();
            let kind = token.kind;
            kinds.push(kind);
            if kind == TokenKind::EndOfFile {
                return kinds;
            }
        }
    }

    #[test]
    fn ranges_and_operators() {
        assert_eq!(
            kinds("1...3 ..< -> <> !="),
            vec![
                TokenKind::IntLiteral,
                TokenKind::ClosedRange,
                TokenKind::IntLiteral,
                TokenKind::OpenRange,
                TokenKind::Arrow,
                TokenKind::NotEqual,
                TokenKind::NotEqual,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("1 -- two three\n4"),
            vec![
                TokenKind::IntLiteral,
                TokenKind::Comment,
                TokenKind::NewLine,
                TokenKind::IntLiteral,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("IF Then ELSE end"),
            vec![
                TokenKind::If,
                TokenKind::Then,
                TokenKind::Else,
                TokenKind::End,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new();
        scanner.reset("\"abc");
        let token = scanner.scan();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.text, "unterminated string");
    }
}
