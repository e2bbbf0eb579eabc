use strum::Display;

use crate::{
    ast::{AssignmentTarget, Expression, ExpressionKind, Statement, StatementKind},
    location::SourceRange,
    token::TokenKind,
};

/// The classification of one annotated source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AnnotationKind {
    Keyword,
    Function,
    Variable,
    Operator,
    String,
    Number,
    Comment,
    Namespace,
}

/// A classified source range, as consumed by editors and the semantic-token
/// encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annotation {
    pub range: SourceRange,
    pub kind: AnnotationKind,
    pub modifiers: u32,
}

impl Annotation {
    #[must_use]
    pub fn new(range: SourceRange, kind: AnnotationKind) -> Self {
        Self { range, kind, modifiers: 0 }
    }
}

/// Produces annotations for a parsed program.
///
/// The AST supplies functions, variables, and literals; the parser's
/// recorded keyword, operator, and comment ranges fill in the token-level
/// classifications. The result is sorted by source position.
#[derive(Debug, Default)]
pub struct SourceAnnotator {
    annotations: Vec<Annotation>,
}

impl SourceAnnotator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn annotate(
        mut self,
        statement: &Statement,
        comments: &[SourceRange],
        keywords: &[SourceRange],
        operators: &[SourceRange],
    ) -> Vec<Annotation> {
        self.visit_statement(statement);
        for range in comments {
            self.push(*range, AnnotationKind::Comment);
        }
        for range in keywords {
            self.push(*range, AnnotationKind::Keyword);
        }
        for range in operators {
            self.push(*range, AnnotationKind::Operator);
        }
        self.annotations.sort_by_key(|annotation| {
            (annotation.range.start.offset, annotation.range.end.offset)
        });
        self.annotations.dedup();
        self.annotations
    }

    fn push(&mut self, range: SourceRange, kind: AnnotationKind) {
        if range.start.offset < range.end.offset {
            self.annotations.push(Annotation::new(range, kind));
        }
    }

    fn visit_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Block(statements) => {
                for statement in statements {
                    self.visit_statement(statement);
                }
            }
            StatementKind::FunctionDecl { signature, body } => {
                self.push(signature.range, AnnotationKind::Function);
                self.visit_statement(body);
            }
            StatementKind::If { condition, then_branch, else_branch } => {
                self.visit_expression(condition);
                self.visit_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit_statement(else_branch);
                }
            }
            StatementKind::Try { body } => self.visit_statement(body),
            StatementKind::Use { target, .. } => {
                self.push(target.range, AnnotationKind::Namespace);
            }
            StatementKind::Using { target, body, .. } => {
                self.push(target.range, AnnotationKind::Namespace);
                self.visit_statement(body);
            }
            StatementKind::Assignment { targets, expression } => {
                for target in targets {
                    self.visit_target(target);
                }
                self.visit_expression(expression);
            }
            StatementKind::Return { expression } => {
                if let Some(expression) = expression {
                    self.visit_expression(expression);
                }
            }
            StatementKind::ExpressionStatement(expression) => self.visit_expression(expression),
            StatementKind::Repeat { body } => self.visit_statement(body),
            StatementKind::RepeatCondition { condition, body, .. } => {
                self.visit_expression(condition);
                self.visit_statement(body);
            }
            StatementKind::RepeatFor { variables, expression, body } => {
                for variable in variables {
                    self.push(variable.name.range, AnnotationKind::Variable);
                }
                self.visit_expression(expression);
                self.visit_statement(body);
            }
            StatementKind::ExitRepeat | StatementKind::NextRepeat => {}
        }
    }

    fn visit_target(&mut self, target: &AssignmentTarget) {
        match target {
            AssignmentTarget::Variable { variable, subscripts, .. } => {
                self.push(variable.name.range, AnnotationKind::Variable);
                for subscript in subscripts {
                    self.visit_expression(subscript);
                }
            }
            AssignmentTarget::Grouping(targets) => {
                for target in targets {
                    self.visit_target(target);
                }
            }
        }
    }

    fn visit_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Call { arguments, word_ranges, .. } => {
                for range in word_ranges {
                    self.push(*range, AnnotationKind::Function);
                }
                for argument in arguments {
                    self.visit_expression(argument);
                }
            }
            ExpressionKind::Binary { left, right, .. } => {
                self.visit_expression(left);
                self.visit_expression(right);
            }
            ExpressionKind::Unary { operand, .. } => self.visit_expression(operand),
            ExpressionKind::Grouping(inner) => self.visit_expression(inner),
            ExpressionKind::Variable(variable) => {
                self.push(variable.name.range, AnnotationKind::Variable);
            }
            ExpressionKind::RangeLiteral { start, end, .. } => {
                self.visit_expression(start);
                self.visit_expression(end);
            }
            ExpressionKind::ListLiteral(expressions) => {
                for expression in expressions {
                    self.visit_expression(expression);
                }
            }
            ExpressionKind::DictionaryLiteral(pairs) => {
                for (key, value) in pairs {
                    self.visit_expression(key);
                    self.visit_expression(value);
                }
            }
            ExpressionKind::Literal(token) => match token.kind {
                TokenKind::IntLiteral | TokenKind::FloatLiteral => {
                    self.push(token.range, AnnotationKind::Number);
                }
                TokenKind::StringLiteral
                | TokenKind::Interpolation
                | TokenKind::ClosedInterpolation => {
                    self.push(token.range, AnnotationKind::String);
                }
                _ => {}
            },
            ExpressionKind::StringInterpolation { left, expression, right } => {
                self.push(left.range, AnnotationKind::String);
                self.visit_expression(expression);
                self.visit_expression(right);
            }
        }
    }
}

/// The LSP semantic-token type index for each annotation kind, following
/// the standard token-type registry.
#[must_use]
pub fn semantic_token_type(kind: AnnotationKind) -> u32 {
    match kind {
        AnnotationKind::Namespace => 0,
        AnnotationKind::Variable => 8,
        AnnotationKind::Function => 12,
        AnnotationKind::Keyword => 15,
        AnnotationKind::Comment => 17,
        AnnotationKind::String => 18,
        AnnotationKind::Number => 19,
        AnnotationKind::Operator => 21,
    }
}

/// Encodes annotations in the LSP semantic-tokens wire format: five `u32`s
/// per token: delta line, delta start, length, type, modifiers.
///
/// Internal columns are UTF-8 byte offsets; the wire format wants
/// code-point counts, so both the start column and the length are converted
/// against the source text. Multi-line annotations are clamped to their
/// first line.
#[must_use]
pub fn encode_semantic_tokens(source: &str, annotations: &[Annotation]) -> Vec<u32> {
    let mut line_starts = vec![0usize];
    for (offset, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            line_starts.push(offset + 1);
        }
    }

    let mut sorted: Vec<&Annotation> = annotations.iter().collect();
    sorted.sort_by_key(|annotation| annotation.range.start.offset);

    let mut encoded = Vec::with_capacity(sorted.len() * 5);
    let mut previous_line = 0u32;
    let mut previous_column = 0u32;
    for annotation in sorted {
        let line = annotation.range.start.line;
        let Some(line_start) = line_starts.get(line as usize).copied() else { continue };
        let start_offset = annotation.range.start.offset.min(source.len());
        let line_end = line_starts
            .get(line as usize + 1)
            .map_or(source.len(), |next| next - 1);
        let end_offset = annotation.range.end.offset.clamp(start_offset, line_end.max(start_offset));

        let column = source[line_start..start_offset].chars().count() as u32;
        let length = source[start_offset..end_offset].chars().count() as u32;
        if length == 0 {
            continue;
        }

        let delta_line = line - previous_line;
        let delta_column = if delta_line == 0 { column - previous_column } else { column };
        encoded.extend_from_slice(&[
            delta_line,
            delta_column,
            length,
            semantic_token_type(annotation.kind),
            annotation.modifiers,
        ]);
        previous_line = line;
        previous_column = column;
    }
    encoded
}
