use crate::{
    ast::{
        AssignmentTarget, BinaryOperator, Expression, ExpressionKind, Statement, StatementKind,
        UnaryOperator, Variable, VariableScope,
    },
    signature::{Signature, Term},
    token::TokenKind,
};

/// Formats an AST back into canonical source text.
///
/// The output is stable: pretty-printing the parse of pretty-printed text
/// reproduces it byte for byte. Calls render from their signatures, with
/// optional words omitted and the first alternative of each choice.
#[must_use]
pub fn pretty_print(statement: &Statement) -> String {
    let mut printer = Printer { out: String::new(), indent: 0 };
    printer.statement(statement);
    printer.out
}

struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Block(statements) => {
                for statement in statements {
                    self.statement(statement);
                }
            }
            StatementKind::FunctionDecl { signature, body } => {
                self.line(&format!("function {}", signature_source(signature)));
                self.indented(body);
                self.line("end function");
            }
            StatementKind::If { condition, then_branch, else_branch } => {
                self.line(&format!("if {} then", expression_source(condition)));
                self.indented(then_branch);
                if let Some(else_branch) = else_branch {
                    self.line("else");
                    self.indented(else_branch);
                }
                self.line("end if");
            }
            StatementKind::Try { body } => {
                self.line("try");
                self.indented(body);
                self.line("end try");
            }
            StatementKind::Use { target, .. } => {
                self.line(&format!("use {}", target.text));
            }
            StatementKind::Using { target, body, .. } => {
                self.line(&format!("using {}", target.text));
                self.indented(body);
                self.line("end using");
            }
            StatementKind::Assignment { targets, expression } => {
                let targets: Vec<String> = targets.iter().map(target_source).collect();
                self.line(&format!(
                    "set {} to {}",
                    targets.join(", "),
                    expression_source(expression)
                ));
            }
            StatementKind::Return { expression } => match expression {
                Some(expression) => {
                    self.line(&format!("return {}", expression_source(expression)));
                }
                None => self.line("return"),
            },
            StatementKind::ExpressionStatement(expression) => {
                self.line(&expression_source(expression));
            }
            StatementKind::Repeat { body } => {
                self.line("repeat");
                self.indented(body);
                self.line("end repeat");
            }
            StatementKind::RepeatCondition { condition, until, body } => {
                let keyword = if *until { "until" } else { "while" };
                self.line(&format!("repeat {keyword} {}", expression_source(condition)));
                self.indented(body);
                self.line("end repeat");
            }
            StatementKind::RepeatFor { variables, expression, body } => {
                let names: Vec<String> =
                    variables.iter().map(|variable| variable.name.text.clone()).collect();
                self.line(&format!(
                    "repeat for {} in {}",
                    names.join(", "),
                    expression_source(expression)
                ));
                self.indented(body);
                self.line("end repeat");
            }
            StatementKind::ExitRepeat => self.line("exit repeat"),
            StatementKind::NextRepeat => self.line("next repeat"),
        }
    }

    fn indented(&mut self, statement: &Statement) {
        self.indent += 1;
        self.statement(statement);
        self.indent -= 1;
    }
}

fn signature_source(signature: &Signature) -> String {
    let mut parts = Vec::new();
    for term in &signature.terms {
        match term {
            Term::Keyword(token) => parts.push(token.text.to_lowercase()),
            Term::Choice(choice) => {
                let words: Vec<String> =
                    choice.tokens.iter().map(|token| token.text.to_lowercase()).collect();
                parts.push(words.join("/"));
            }
            Term::Option(choice) => {
                let words: Vec<String> =
                    choice.tokens.iter().map(|token| token.text.to_lowercase()).collect();
                parts.push(format!("({})", words.join("/")));
            }
            Term::Argument(argument) => {
                let targets: Vec<String> = argument
                    .targets
                    .iter()
                    .map(|target| {
                        let mut out = String::new();
                        if let Some(name) = &target.name {
                            out.push_str(&name.text);
                        }
                        if let Some(type_name) = &target.type_name {
                            out.push_str(": ");
                            out.push_str(&type_name.text);
                        }
                        out
                    })
                    .collect();
                parts.push(format!("{{{}}}", targets.join(", ")));
            }
        }
    }
    if let Some(type_name) = &signature.type_name {
        parts.push("->".to_owned());
        parts.push(type_name.text.clone());
    }
    parts.join(" ")
}

fn variable_source(variable: &Variable) -> String {
    match variable.scope {
        Some(VariableScope::Global) => format!("global {}", variable.name.text),
        Some(VariableScope::Local) => format!("local {}", variable.name.text),
        None => variable.name.text.clone(),
    }
}

fn target_source(target: &AssignmentTarget) -> String {
    match target {
        AssignmentTarget::Variable { variable, type_name, subscripts } => {
            let mut out = variable_source(variable);
            if let Some(type_name) = type_name {
                out.push_str(": ");
                out.push_str(&type_name.text);
            }
            for subscript in subscripts {
                out.push('[');
                out.push_str(&expression_source(subscript));
                out.push(']');
            }
            out
        }
        AssignmentTarget::Grouping(targets) => {
            let targets: Vec<String> = targets.iter().map(target_source).collect();
            format!("({})", targets.join(", "))
        }
    }
}

fn operator_source(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::And => "and",
        BinaryOperator::Or => "or",
        BinaryOperator::Equal => "=",
        BinaryOperator::NotEqual => "<>",
        BinaryOperator::LessThan => "<",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::LessThanOrEqual => "<=",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::Plus => "+",
        BinaryOperator::Minus => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulo => "%",
        BinaryOperator::Exponent => "^",
        BinaryOperator::Concat => "&",
        BinaryOperator::Subscript => "[",
    }
}

/// Renders an expression as source text.
#[must_use]
pub fn expression_source(expression: &Expression) -> String {
    match &expression.kind {
        ExpressionKind::Call { signature, arguments, .. } => {
            let mut parts = Vec::new();
            let mut remaining = arguments.iter();
            for term in &signature.terms {
                match term {
                    Term::Keyword(token) => parts.push(token.text.to_lowercase()),
                    Term::Choice(choice) => {
                        if let Some(token) = choice.tokens.first() {
                            parts.push(token.text.to_lowercase());
                        }
                    }
                    Term::Option(_) => {}
                    Term::Argument(_) => {
                        if let Some(argument) = remaining.next() {
                            parts.push(expression_source(argument));
                        }
                    }
                }
            }
            parts.join(" ")
        }
        ExpressionKind::Binary { left, operator, right } => {
            if *operator == BinaryOperator::Subscript {
                format!("{}[{}]", expression_source(left), expression_source(right))
            } else {
                format!(
                    "{} {} {}",
                    expression_source(left),
                    operator_source(*operator),
                    expression_source(right)
                )
            }
        }
        ExpressionKind::Unary { operator, operand } => match operator {
            UnaryOperator::Minus => format!("-{}", expression_source(operand)),
            UnaryOperator::Not => format!("not {}", expression_source(operand)),
        },
        ExpressionKind::Grouping(inner) => format!("({})", expression_source(inner)),
        ExpressionKind::Variable(variable) => variable_source(variable),
        ExpressionKind::RangeLiteral { start, end, closed } => {
            let operator = if *closed { "..." } else { "..<" };
            format!("{}{operator}{}", expression_source(start), expression_source(end))
        }
        ExpressionKind::ListLiteral(expressions) => {
            let items: Vec<String> = expressions.iter().map(expression_source).collect();
            format!("[{}]", items.join(", "))
        }
        ExpressionKind::DictionaryLiteral(pairs) => {
            if pairs.is_empty() {
                return "[:]".to_owned();
            }
            let items: Vec<String> = pairs
                .iter()
                .map(|(key, value)| {
                    format!("{}: {}", expression_source(key), expression_source(value))
                })
                .collect();
            format!("[{}]", items.join(", "))
        }
        ExpressionKind::Literal(token) => match token.kind {
            TokenKind::Empty => "empty".to_owned(),
            TokenKind::BoolLiteral => token.text.to_lowercase(),
            _ => token.text.clone(),
        },
        ExpressionKind::StringInterpolation { left, expression, right } => {
            format!(
                "{}{}{}",
                left.text,
                expression_source(expression),
                expression_source(right)
            )
        }
    }
}
