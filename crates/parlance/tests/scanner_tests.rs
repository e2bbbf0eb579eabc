//! Scanner behavior: token sequences, source ranges, and the
//! string-interpolation handshake with the parser.

use parlance::{Scanner, Token, TokenKind};

fn scan_all(source: &str) -> Vec<Token> {
    let mut scanner = Scanner::new();
    scanner.reset(source);
    let mut tokens = Vec::new();
    loop {
        let token = scanner.scan();
        let done = token.kind == TokenKind::EndOfFile;
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}

#[test]
fn token_type_sequence() {
    let tokens = scan_all("this is a 100 list of + tokens - if else (then) -- cmt");
    let kinds: Vec<TokenKind> = tokens.iter().map(|token| token.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Word,
            TokenKind::Is,
            TokenKind::An,
            TokenKind::IntLiteral,
            TokenKind::Word,
            TokenKind::Word,
            TokenKind::Plus,
            TokenKind::Word,
            TokenKind::Minus,
            TokenKind::If,
            TokenKind::Else,
            TokenKind::LeftParen,
            TokenKind::Then,
            TokenKind::RightParen,
            TokenKind::Comment,
            TokenKind::EndOfFile,
        ]
    );
}

/// The interpolation protocol: the scanner emits the leading string part
/// with both delimiters, the parser flips `interpolating` on, the embedded
/// expression scans normally, and the `}` resumes string scanning.
#[test]
fn interpolated_string() {
    let mut scanner = Scanner::new();
    scanner.reset("print \"Hello, {name}!\"");

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::Word);
    assert_eq!(token.text, "print");

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::OpenInterpolation);
    assert_eq!(token.text, "\"Hello, {");

    // What the parser does after seeing OpenInterpolation.
    scanner.interpolating = true;
    scanner.string_terminal = b'"';

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::Word);
    assert_eq!(token.text, "name");

    let token = scanner.scan();
    assert_eq!(
        token.kind,
        TokenKind::ClosedInterpolation,
        "expected ClosedInterpolation, got {:?} with text {:?}",
        token.kind,
        token.text
    );
    assert_eq!(token.text, "}!\"");

    assert_eq!(scanner.scan().kind, TokenKind::EndOfFile);
}

#[test]
fn interpolation_with_inner_segment() {
    let mut scanner = Scanner::new();
    scanner.reset("\"a{x}b{y}c\"");

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::OpenInterpolation);
    assert_eq!(token.text, "\"a{");
    scanner.interpolating = true;
    scanner.string_terminal = b'"';

    assert_eq!(scanner.scan().text, "x");

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::Interpolation);
    assert_eq!(token.text, "}b{");

    assert_eq!(scanner.scan().text, "y");

    let token = scanner.scan();
    assert_eq!(token.kind, TokenKind::ClosedInterpolation);
    assert_eq!(token.text, "}c\"");
}

#[test]
fn numbers_and_ranges() {
    let kinds: Vec<TokenKind> = scan_all("1 2.5 3e2 1...3 1..<3")
        .iter()
        .map(|token| token.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::IntLiteral,
            TokenKind::FloatLiteral,
            TokenKind::FloatLiteral,
            TokenKind::IntLiteral,
            TokenKind::ClosedRange,
            TokenKind::IntLiteral,
            TokenKind::IntLiteral,
            TokenKind::OpenRange,
            TokenKind::IntLiteral,
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn ranges_track_lines_and_columns() {
    let tokens = scan_all("a\n  bb");
    assert_eq!(tokens[0].range.start.line, 0);
    assert_eq!(tokens[0].range.start.column, 0);
    // tokens[1] is the newline
    assert_eq!(tokens[2].range.start.line, 1);
    assert_eq!(tokens[2].range.start.column, 2);
    assert_eq!(tokens[2].range.end.column, 4);
}

#[test]
fn string_escapes_decode() {
    let tokens = scan_all(r#""a\n\t\"b""#);
    assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
    assert_eq!(tokens[0].string_contents(), "a\n\t\"b");
}

#[test]
fn unknown_character_is_an_error_token() {
    let tokens = scan_all("set @ to 1");
    let error = tokens.iter().find(|token| token.kind == TokenKind::Error).unwrap();
    assert!(error.text.contains('@'), "message should name the character: {}", error.text);
}

#[test]
fn ignore_new_lines_swallows_new_line_tokens() {
    let mut scanner = Scanner::new();
    scanner.reset("1\n2");
    scanner.ignore_new_lines = true;
    assert_eq!(scanner.scan().kind, TokenKind::IntLiteral);
    assert_eq!(scanner.scan().kind, TokenKind::IntLiteral);
    assert_eq!(scanner.scan().kind, TokenKind::EndOfFile);
}
