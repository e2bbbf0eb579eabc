use std::io::Write;

use crate::{location::SourceRange, value::Value};

/// A diagnostic produced by the scanner, parser, compiler, or VM.
///
/// Errors carry a source range and a payload [`Value`], typically a string,
/// but `try` handlers may observe any value a native chose to raise.
#[derive(Debug, Clone)]
pub struct Error {
    pub range: SourceRange,
    pub value: Value,
}

impl Error {
    pub fn new(range: SourceRange, value: impl Into<Value>) -> Self {
        Self { range, value: value.into() }
    }

    /// The error message rendered as text.
    #[must_use]
    pub fn what(&self) -> String {
        self.value.to_text()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.range, self.what())
    }
}

/// The catalogue of diagnostic messages.
///
/// Messages quote source tokens with typographic quotes, matching what the
/// annotated editors render.
pub mod messages {
    pub const DUPLICATE_ARGUMENT_NAMES: &str = "duplicate argument names in function declaration";
    pub const EMPTY_INTERPOLATION: &str = "empty interpolation";
    pub const EXPECTED_A_NEW_LINE: &str = "expected a new line";
    pub const EXPECTED_AN_EXPRESSION: &str = "expected an expression";
    pub const EXPECTED_A_VARIABLE_NAME: &str = "expected a variable name";
    pub const EXPECTED_COLON_COMMA_OR_BRACKET: &str = "expected \u{201c}:\u{201d}, \u{201c},\u{201d}, or \u{201c}]\u{201d}";
    pub const EXPECTED_END: &str = "expected \u{201c}end\u{201d}";
    pub const EXPECTED_END_OR_ELSE: &str = "expected \u{201c}end\u{201d} or \u{201c}else\u{201d}";
    pub const EXPECTED_FOREVER_WHILE_UNTIL_FOR: &str =
        "expected \u{201c}forever\u{201d}, \u{201c}while\u{201d}, \u{201c}until\u{201d}, \u{201c}for\u{201d}, or a new line";
    pub const EXPECTED_IN: &str = "expected \u{201c}in\u{201d}";
    pub const EXPECTED_NEW_LINE_OR_END_OF_SCRIPT: &str = "expected a new line or end of script";
    pub const EXPECTED_REPEAT: &str = "expected \u{201c}repeat\u{201d}";
    pub const EXPECTED_RIGHT_BRACKET: &str = "expected \u{201c}]\u{201d}";
    pub const EXPECTED_RIGHT_CURLY_BRACE: &str = "expected \u{201c}}\u{201d}";
    pub const EXPECTED_RIGHT_PARENS: &str = "expected \u{201c})\u{201d}";
    pub const EXPECTED_STRING_OR_WORD: &str = "expected a string or word";
    pub const EXPECTED_THEN: &str = "expected \u{201c}then\u{201d}";
    pub const EXPECTED_TO: &str = "expected \u{201c}to\u{201d}";
    pub const EXPECTED_WORD: &str = "expected a word";
    pub const EXPECTED_WORD_PAREN_OR_CURLY: &str =
        "expected a word, \u{201c}(\u{201d}, or \u{201c}{\u{201d}";
    pub const UNDERSCORE_NOT_ALLOWED: &str =
        "\u{201c}_\u{201d} may not be used as a variable name";
    pub const UNEXPECTED_EXIT: &str = "unexpected \u{201c}exit\u{201d} outside repeat block";
    pub const UNEXPECTED_NEXT: &str = "unexpected \u{201c}next\u{201d} outside repeat block";
    pub const UNTERMINATED_INTERPOLATION: &str = "unterminated interpolation";
    pub const UNTERMINATED_STRING: &str = "unterminated string";
    pub const MALFORMED_NUMBER: &str = "malformed number";
    pub const TOO_MANY_CONSTANTS: &str = "too many constants";
    pub const TOO_MANY_LOCAL_VARIABLES: &str = "too many local variables";
    pub const VALUE_OUT_OF_RANGE: &str = "value is either too large or too small";
    pub const CIRCULAR_MODULE_IMPORT: &str = "circular module import";
    pub const EXPECTED_LIST_STRING_DICT_RANGE: &str =
        "expected a list, string, dictionary, or range";
    pub const BOUNDS_MISMATCH: &str =
        "lower bound must be less than or equal to the upper bound";
    pub const EXPECTED_INTEGER: &str = "expected an integer";
    pub const UNEXPECTED_TYPE_FOR_CALL: &str = "unexpected type for function call";
    pub const PROGRAM_HALTED: &str = "program halted";
    pub const EXPECTED_TRUE_OR_FALSE: &str = "expected true or false";
    pub const EXPECTED_ENUMERATOR: &str = "expected an enumerator";
    pub const DIVIDE_BY_ZERO: &str = "divide by zero";
    pub const INVALID_FUNCTION_SIGNATURE: &str = "invalid function signature";

    #[must_use]
    pub fn unexpected_token(description: &str) -> String {
        format!("unexpected {description}")
    }

    #[must_use]
    pub fn unknown_character(character: char) -> String {
        format!("unknown character \u{201c}{character}\u{201d}")
    }

    #[must_use]
    pub fn unused_local_variable(name: &str) -> String {
        format!("unused local variable \u{201c}{name}\u{201d} will always be empty")
    }

    #[must_use]
    pub fn module_not_found(name: &str) -> String {
        format!("module \u{201c}{name}\u{201d} not found")
    }

    #[must_use]
    pub fn mismatched_types(lhs: &str, operator: &str, rhs: &str) -> String {
        format!("mismatched types: {lhs} {operator} {rhs}")
    }

    #[must_use]
    pub fn expected_list(got: &str) -> String {
        format!("expected a list but got {got}")
    }

    #[must_use]
    pub fn expected_number(got: &str) -> String {
        format!("expected a number but got {got}")
    }

    #[must_use]
    pub fn unpack_list_mismatch(expected: usize, got: usize) -> String {
        format!("expected {expected} values but got {got}")
    }
}

/// A sink for parse and compile diagnostics.
pub trait Reporter {
    fn report(&mut self, error: Error);
}

/// A reporter that stores diagnostics for later inspection.
#[derive(Debug, Default)]
pub struct CaptureReporter {
    errors: Vec<Error>,
}

impl CaptureReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl Reporter for CaptureReporter {
    fn report(&mut self, error: Error) {
        self.errors.push(error);
    }
}

/// A reporter that writes `line:column: message` lines to an output stream.
pub struct IoReporter<W: Write> {
    out: W,
    path: String,
}

impl<W: Write> IoReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, path: String::new() }
    }

    /// Prefixes reported locations with a file path.
    pub fn with_path(out: W, path: impl Into<String>) -> Self {
        Self { out, path: path.into() }
    }
}

impl<W: Write> Reporter for IoReporter<W> {
    fn report(&mut self, error: Error) {
        let result = if self.path.is_empty() {
            writeln!(self.out, "{}: {}", error.range, error.what())
        } else {
            writeln!(self.out, "{}:{}: {}", self.path, error.range, error.what())
        };
        // A broken error stream leaves us nowhere better to report to.
        drop(result);
    }
}
