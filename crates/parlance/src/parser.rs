use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    ast::{
        AssignmentTarget, BinaryOperator, Expression, ExpressionKind, Statement, StatementKind,
        UnaryOperator, Variable, VariableScope,
    },
    grammar::GrammarNode,
    location::SourceRange,
    module::{ModuleLoader, ModuleProvider},
    reader::{Reader, StringReader},
    report::{CaptureReporter, Error, Reporter, messages},
    scanner::Scanner,
    signature::{Argument, Choice, Signature, Target, Term, invalid_signature_error},
    token::{Token, TokenKind},
};

/// Collaborators handed to the parser.
pub struct ParserConfig<'a> {
    pub reader: &'a mut dyn Reader,
    pub module_provider: &'a mut dyn ModuleProvider,
    pub reporter: &'a mut dyn Reporter,
    #[cfg(debug_assertions)]
    pub enable_tracing: bool,
}

/// One lexical scope: the signatures and variables declared inside it.
/// Function bodies push a scope; structural blocks share their parent's.
#[derive(Debug, Default)]
struct Scope {
    signatures: Vec<Signature>,
    variables: AHashSet<String>,
}

/// The recursive-descent + Pratt parser.
///
/// Tokens are pulled lazily from the scanner into a buffer. Outside of
/// checkpoints the buffer holds only the previous and current token; while
/// any checkpoint is active ("recording") the buffer keeps everything after
/// the oldest saved index so [`rewind`](Self::rewind) can restore it. The
/// outermost [`commit`](Self::commit) trims the consumed prefix.
///
/// Function calls are resolved against the grammar trie of every declared
/// signature: at each call site the parser walks keyword edges and, on
/// argument edges, recursively parses an expression under a checkpoint.
/// The longest successful path wins.
pub struct Parser<'a> {
    reader: &'a mut dyn Reader,
    module_provider: &'a mut dyn ModuleProvider,
    reporter: &'a mut dyn Reporter,
    scanner: Scanner,

    scopes: Vec<Scope>,
    exported_declarations: Vec<Signature>,
    grammar: GrammarNode,

    comment_ranges: Vec<SourceRange>,
    keyword_ranges: Vec<SourceRange>,
    operator_ranges: Vec<SourceRange>,

    tokens: Vec<Token>,
    saved: Vec<usize>,
    index: usize,
    recording: bool,

    parsing_repeat: bool,
    parsing_depth: u32,
    failed: bool,

    #[cfg(debug_assertions)]
    tracing: bool,
}

impl<'a> Parser<'a> {
    pub fn new(config: ParserConfig<'a>) -> Self {
        let mut scanner = Scanner::new();
        scanner.reset(config.reader.contents());
        Self {
            reader: config.reader,
            module_provider: config.module_provider,
            reporter: config.reporter,
            scanner,
            scopes: vec![Scope::default()],
            exported_declarations: Vec::new(),
            grammar: GrammarNode::default(),
            comment_ranges: Vec::new(),
            keyword_ranges: Vec::new(),
            operator_ranges: Vec::new(),
            tokens: Vec::new(),
            saved: Vec::new(),
            index: 0,
            recording: false,
            parsing_repeat: false,
            parsing_depth: 0,
            failed: false,
            #[cfg(debug_assertions)]
            tracing: config.enable_tracing,
        }
    }

    /// Parses the whole input as a block of statements.
    ///
    /// Errors are reported through the configured reporter and recovery
    /// continues at the next line; check [`failed`](Self::failed) before
    /// compiling the result.
    pub fn statement(&mut self) -> Statement {
        self.parse_block(&[])
    }

    /// Parses a single signature, as used by `Signature::parse`.
    pub fn signature(&mut self) -> Option<Signature> {
        while self.check(&[TokenKind::NewLine]) {
            self.advance();
        }
        match self.parse_signature_decl() {
            Ok(signature) => Some(signature),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    /// True when any error was reported during parsing. The returned AST
    /// must not be compiled in that case.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Registers a signature as callable. Duplicates (same normalized name)
    /// keep the first registration.
    pub fn declare(&mut self, signature: &Signature) -> bool {
        let inserted = self.grammar.borrow_mut().insert(signature);
        if inserted
            && let Some(scope) = self.scopes.last_mut()
        {
            scope.signatures.push(signature.clone());
        }
        inserted
    }

    /// Registers a list of signatures.
    pub fn declare_all(&mut self, signatures: &[Signature]) {
        for signature in signatures {
            self.declare(signature);
        }
    }

    /// Registers a variable name in the current scope.
    pub fn declare_variable(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.variables.insert(name.to_lowercase());
        }
    }

    /// The signatures declared by `function` statements at the top level,
    /// in declaration order. These are a module's exports.
    #[must_use]
    pub fn declarations(&self) -> &[Signature] {
        &self.exported_declarations
    }

    /// Every signature visible in the current scope chain.
    #[must_use]
    pub fn signatures(&self) -> Vec<Signature> {
        self.scopes.iter().flat_map(|scope| scope.signatures.iter().cloned()).collect()
    }

    /// Every variable declared so far, across all scopes.
    #[must_use]
    pub fn variables(&self) -> AHashSet<String> {
        self.scopes.iter().flat_map(|scope| scope.variables.iter().cloned()).collect()
    }

    #[must_use]
    pub fn comment_ranges(&self) -> &[SourceRange] {
        &self.comment_ranges
    }

    #[must_use]
    pub fn keyword_ranges(&self) -> &[SourceRange] {
        &self.keyword_ranges
    }

    #[must_use]
    pub fn operator_ranges(&self) -> &[SourceRange] {
        &self.operator_ranges
    }

    // ------------------------------------------------------------------
    // Token access
    // ------------------------------------------------------------------

    fn scan(&mut self) {
        loop {
            let token = self.scanner.scan();
            match token.kind {
                TokenKind::Comment => {
                    self.comment_ranges.push(token.range);
                    continue;
                }
                kind if is_keyword_kind(kind) => self.keyword_ranges.push(token.range),
                kind if is_operator_kind(kind) => self.operator_ranges.push(token.range),
                _ => {}
            }
            self.trace(format_args!("scanned {token:?}"));
            self.tokens.push(token);
            return;
        }
    }

    fn peek(&mut self) -> &Token {
        if self.tokens.is_empty() {
            self.scan();
        }
        &self.tokens[self.index]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.index - 1]
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            if !self.recording && self.tokens.len() > 1 {
                self.tokens.remove(0);
            }
            if self.recording || self.index == 0 {
                self.index += 1;
            }
            if self.index == self.tokens.len() {
                self.scan();
            }
        }
        self.previous().clone()
    }

    fn is_at_end(&mut self) -> bool {
        self.peek().kind == TokenKind::EndOfFile
    }

    fn check(&mut self, kinds: &[TokenKind]) -> bool {
        if self.is_at_end() {
            return false;
        }
        let kind = self.peek().kind;
        kinds.contains(&kind)
    }

    fn match_kinds(&mut self, kinds: &[TokenKind]) -> Option<Token> {
        if self.check(kinds) {
            return Some(self.advance());
        }
        None
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Error> {
        if self.check(&[kind]) {
            return Ok(self.advance());
        }
        Err(self.error_at_peek(message))
    }

    /// Consumes `end`, optionally followed by the matching opener keyword.
    fn consume_end(&mut self, kind: TokenKind) -> Result<Token, Error> {
        let end = self.consume(TokenKind::End, messages::EXPECTED_END)?;
        if let Some(token) = self.match_kinds(&[kind]) {
            return Ok(token);
        }
        Ok(end)
    }

    /// Consumes a word-like token (plain words and keywords both qualify as
    /// names in this grammar).
    fn consume_word(&mut self, message: &str) -> Result<Token, Error> {
        if !self.is_at_end() && self.peek().is_word() {
            return Ok(self.advance());
        }
        Err(self.error_at_peek(message))
    }

    fn consume_new_line(&mut self) -> Result<(), Error> {
        if self.is_at_end() {
            return Ok(());
        }
        if self.check(&[TokenKind::NewLine]) {
            self.advance();
            return Ok(());
        }
        Err(self.error_at_peek(messages::EXPECTED_NEW_LINE_OR_END_OF_SCRIPT))
    }

    fn error_at_peek(&mut self, message: &str) -> Error {
        let token = self.peek().clone();
        // Scanner error tokens carry their message in the text.
        if token.kind == TokenKind::Error {
            return Error::new(token.range, token.text);
        }
        Error::new(token.range, message)
    }

    fn report(&mut self, error: Error) {
        self.failed = true;
        self.reporter.report(error);
    }

    /// Skips ahead to just past the next new line, abandoning the statement.
    fn synchronize(&mut self) {
        self.trace(format_args!("synchronizing"));
        self.recording = false;
        self.saved.clear();
        let mut token = self.advance();
        while !self.is_at_end() {
            if token.kind == TokenKind::NewLine {
                return;
            }
            token = self.advance();
        }
    }

    /// Consumes tokens up to and including the next new line; used for
    /// recovery inside a statement parser that wants to keep its block.
    fn recover_to_new_line(&mut self) {
        while !self.is_at_end() {
            if self.advance().kind == TokenKind::NewLine {
                return;
            }
        }
    }

    /// If `kind` appears before the end of the line, consumes up to and
    /// including it and returns true. Otherwise leaves the position alone.
    fn recover_to(&mut self, kind: TokenKind) -> bool {
        self.checkpoint();
        let mut found = false;
        while !self.is_at_end() && !self.check(&[TokenKind::NewLine]) {
            if self.advance().kind == kind {
                found = true;
                break;
            }
        }
        if found {
            self.commit();
        } else {
            self.rewind();
        }
        found
    }

    fn checkpoint(&mut self) {
        self.recording = true;
        self.saved.push(self.index);
        self.trace(format_args!("checkpoint at {}", self.index));
    }

    fn rewind(&mut self) {
        self.index = self.saved.pop().unwrap_or(self.index);
        if self.saved.is_empty() {
            self.recording = false;
        }
        self.trace(format_args!("rewind to {}", self.index));
    }

    fn commit(&mut self) {
        self.saved.pop();
        if self.saved.is_empty() {
            self.recording = false;
            if self.index > 1 {
                self.tokens.drain(..self.index - 1);
                self.index = 1;
            }
        }
        self.trace(format_args!("commit at {}", self.index));
    }

    /// Asks the reader for another chunk when a block is still open at the
    /// end of the buffer, then resumes scanning where the end-of-file was.
    fn refill(&mut self) -> bool {
        if !self.reader.readable() {
            return false;
        }
        if self.reader.read(self.parsing_depth).is_err() {
            return false;
        }
        let resume_at = self.peek().range.start;
        self.scanner.resume(self.reader.contents(), resume_at);
        // Drop the buffered end-of-file token and rescan from its position.
        self.tokens.truncate(self.index);
        self.scan();
        true
    }

    #[cfg(debug_assertions)]
    fn trace(&self, message: std::fmt::Arguments<'_>) {
        if self.tracing {
            eprintln!("parse: {message}");
        }
    }

    #[cfg(not(debug_assertions))]
    fn trace(&self, _message: std::fmt::Arguments<'_>) {}

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self, end_kinds: &[TokenKind]) -> Statement {
        let start = self.peek().range;
        let mut statements = Vec::new();
        loop {
            if self.check(&[TokenKind::NewLine]) {
                self.advance();
                continue;
            }
            if self.check(end_kinds) {
                break;
            }
            if self.is_at_end() {
                if self.parsing_depth > 0 && self.refill() {
                    continue;
                }
                break;
            }
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => {
                    self.report(error);
                    self.synchronize();
                }
            }
        }
        let end = if self.index > 0 { self.previous().range } else { start };
        Statement::new(StatementKind::Block(statements), start.union(end))
    }

    fn parse_statement(&mut self) -> Result<Statement, Error> {
        if self.match_kinds(&[TokenKind::Function]).is_some() {
            return self.parse_function();
        }
        if self.match_kinds(&[TokenKind::If]).is_some() {
            return self.parse_if();
        }
        if self.match_kinds(&[TokenKind::Try]).is_some() {
            return self.parse_try();
        }
        if self.match_kinds(&[TokenKind::Use]).is_some() {
            return self.parse_use();
        }
        if self.match_kinds(&[TokenKind::Using]).is_some() {
            return self.parse_using();
        }
        if self.match_kinds(&[TokenKind::Repeat]).is_some() {
            let was_parsing_repeat = self.parsing_repeat;
            self.parsing_repeat = true;
            let statement = self.parse_repeat();
            self.parsing_repeat = was_parsing_repeat;
            return statement;
        }
        let statement = self.parse_simple_statement()?;
        self.consume_new_line()?;
        Ok(statement)
    }

    fn parse_simple_statement(&mut self) -> Result<Statement, Error> {
        if self.match_kinds(&[TokenKind::Set]).is_some() {
            return self.parse_assignment();
        }
        if self.match_kinds(&[TokenKind::Exit]).is_some() {
            return self.parse_exit();
        }
        if self.match_kinds(&[TokenKind::Next]).is_some() {
            return self.parse_next();
        }
        if self.match_kinds(&[TokenKind::Return]).is_some() {
            return self.parse_return();
        }
        let expression = self.parse_expression()?;
        let range = expression.range;
        Ok(Statement::new(StatementKind::ExpressionStatement(expression), range))
    }

    fn parse_signature_decl(&mut self) -> Result<Signature, Error> {
        let start = self.peek().range;
        let mut terms = Vec::new();
        loop {
            if !self.is_at_end() && self.peek().is_word() {
                let word = self.advance();
                if self.check(&[TokenKind::Slash]) {
                    let mut tokens = vec![word];
                    while self.match_kinds(&[TokenKind::Slash]).is_some() {
                        tokens.push(self.consume_word(messages::EXPECTED_WORD)?);
                    }
                    terms.push(Term::Choice(Choice { tokens }));
                } else {
                    terms.push(Term::Keyword(word));
                }
            } else if self.match_kinds(&[TokenKind::LeftParen]).is_some() {
                let mut tokens = vec![self.consume_word(messages::EXPECTED_WORD)?];
                while self.match_kinds(&[TokenKind::Slash]).is_some() {
                    tokens.push(self.consume_word(messages::EXPECTED_WORD)?);
                }
                self.consume(TokenKind::RightParen, messages::EXPECTED_RIGHT_PARENS)?;
                terms.push(Term::Option(Choice { tokens }));
            } else if self.match_kinds(&[TokenKind::LeftBrace]).is_some() {
                let mut targets = Vec::new();
                if !self.check(&[TokenKind::RightBrace]) {
                    loop {
                        let name = if !self.is_at_end() && self.peek().is_word() {
                            Some(self.advance())
                        } else {
                            None
                        };
                        let type_name = if self.match_kinds(&[TokenKind::Colon]).is_some() {
                            Some(self.consume_word(messages::EXPECTED_WORD)?)
                        } else {
                            None
                        };
                        targets.push(Target { name, type_name });
                        if self.match_kinds(&[TokenKind::Comma]).is_none() {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightBrace, messages::EXPECTED_RIGHT_CURLY_BRACE)?;
                if targets.is_empty() {
                    targets.push(Target { name: None, type_name: None });
                }
                terms.push(Term::Argument(Argument { targets }));
            } else {
                break;
            }
        }
        if terms.is_empty() {
            return Err(self.error_at_peek(messages::EXPECTED_WORD_PAREN_OR_CURLY));
        }
        let type_name = if self.match_kinds(&[TokenKind::Arrow]).is_some() {
            Some(self.consume_word(messages::EXPECTED_WORD)?)
        } else {
            None
        };
        let range = start.union(self.previous().range);
        Ok(Signature { terms, type_name, range })
    }

    fn parse_function(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let signature = self.parse_signature_decl()?;
        if !signature.is_valid() {
            let error = invalid_signature_error(signature.range);
            self.report(error);
        }
        if let Some(duplicate) = signature.duplicate_argument_name() {
            let error = Error::new(duplicate.range, messages::DUPLICATE_ARGUMENT_NAMES);
            self.report(error);
        }
        if let Err(error) = self.consume_new_line() {
            self.report(error);
            self.recover_to_new_line();
        }
        self.declare(&signature);
        if self.scopes.len() == 1 {
            self.exported_declarations.push(signature.clone());
        }

        let was_parsing_repeat = self.parsing_repeat;
        self.parsing_repeat = false;
        self.begin_scope();
        for argument in signature.arguments() {
            for target in &argument.targets {
                if let Some(name) = &target.name {
                    self.declare_variable(&name.text);
                }
            }
        }
        self.parsing_depth += 1;
        let body = self.parse_block(&[TokenKind::End]);
        self.parsing_depth -= 1;
        self.end_scope();
        self.parsing_repeat = was_parsing_repeat;

        self.consume_end(TokenKind::Function)?;
        self.consume_new_line()?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(
            StatementKind::FunctionDecl { signature, body: Box::new(body) },
            range,
        ))
    }

    fn parse_if(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let condition = self.parse_expression()?;
        self.match_kinds(&[TokenKind::NewLine]);
        if self.match_kinds(&[TokenKind::Then]).is_none() {
            // When "then" appears later on the line, recover into the
            // statement; otherwise abandon it.
            let error = self.error_at_peek(messages::EXPECTED_THEN);
            if !self.recover_to(TokenKind::Then) {
                return Err(error);
            }
            self.report(error);
        }

        let mut end_token: Option<Token> = None;
        let then_branch = if self.match_kinds(&[TokenKind::NewLine]).is_some() {
            self.parsing_depth += 1;
            let block = self.parse_block(&[TokenKind::End, TokenKind::Else]);
            self.parsing_depth -= 1;
            let Some(token) = self.match_kinds(&[TokenKind::End, TokenKind::Else]) else {
                return Err(self.error_at_peek(messages::EXPECTED_END_OR_ELSE));
            };
            if token.kind == TokenKind::End {
                self.match_kinds(&[TokenKind::If]);
                self.consume_new_line()?;
            }
            end_token = Some(token);
            block
        } else {
            let statement = match self.parse_simple_statement() {
                Ok(statement) => statement,
                Err(error) => {
                    self.report(error);
                    self.recover_to_new_line();
                    Statement::new(StatementKind::Block(Vec::new()), start)
                }
            };
            self.match_kinds(&[TokenKind::NewLine]);
            statement
        };

        let has_else = end_token.as_ref().is_some_and(|token| token.kind == TokenKind::Else)
            || (end_token.is_none() && self.match_kinds(&[TokenKind::Else]).is_some());
        let else_branch = if has_else {
            if self.match_kinds(&[TokenKind::NewLine]).is_some() {
                self.parsing_depth += 1;
                let block = self.parse_block(&[TokenKind::End]);
                self.parsing_depth -= 1;
                self.consume_end(TokenKind::If)?;
                self.consume_new_line()?;
                Some(block)
            } else if self.match_kinds(&[TokenKind::If]).is_some() {
                Some(self.parse_if()?)
            } else {
                let statement = self.parse_simple_statement()?;
                self.consume_new_line()?;
                Some(statement)
            }
        } else {
            None
        };

        let range = start.union(self.previous().range);
        Ok(Statement::new(
            StatementKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
            range,
        ))
    }

    fn parse_try(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let body = if self.match_kinds(&[TokenKind::NewLine]).is_some() {
            self.parsing_depth += 1;
            let block = self.parse_block(&[TokenKind::End]);
            self.parsing_depth -= 1;
            self.consume_end(TokenKind::Try)?;
            self.consume_new_line()?;
            block
        } else {
            let statement = self.parse_simple_statement()?;
            self.consume_new_line()?;
            statement
        };
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::Try { body: Box::new(body) }, range))
    }

    fn parse_module_name(&mut self) -> Result<(Token, Option<Rc<crate::module::Module>>), Error> {
        if self.is_at_end() || (!self.peek().is_word() && self.peek().kind != TokenKind::StringLiteral)
        {
            return Err(self.error_at_peek(messages::EXPECTED_STRING_OR_WORD));
        }
        let token = self.advance();
        let name = if token.kind == TokenKind::StringLiteral {
            token.string_contents()
        } else {
            token.text.clone()
        };
        match self.module_provider.module(&name, token.range) {
            Ok(module) => Ok((token, Some(module))),
            Err(error) => {
                self.report(error);
                Ok((token, None))
            }
        }
    }

    fn parse_use(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let (target, module) = self.parse_module_name()?;
        if let Some(module) = &module {
            self.declare_all(&module.signatures().to_vec());
        }
        self.consume_new_line()?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::Use { target, module }, range))
    }

    fn parse_using(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let (target, module) = self.parse_module_name()?;
        self.begin_scope();
        if let Some(module) = &module {
            self.declare_all(&module.signatures().to_vec());
        }
        let body = if self.match_kinds(&[TokenKind::NewLine]).is_some() {
            self.parsing_depth += 1;
            let block = self.parse_block(&[TokenKind::End]);
            self.parsing_depth -= 1;
            self.end_scope();
            self.consume_end(TokenKind::Using)?;
            self.consume_new_line()?;
            block
        } else {
            let statement = self.parse_simple_statement();
            self.end_scope();
            let statement = statement?;
            self.consume_new_line()?;
            statement
        };
        let range = start.union(self.previous().range);
        Ok(Statement::new(
            StatementKind::Using { target, module, body: Box::new(body) },
            range,
        ))
    }

    fn parse_repeat(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        if let Some(token) = self.match_kinds(&[TokenKind::Forever, TokenKind::NewLine]) {
            if token.kind == TokenKind::Forever
                && let Err(error) = self.consume_new_line()
            {
                self.report(error);
                self.recover_to_new_line();
            }
            let body = self.parse_repeat_block()?;
            let range = start.union(self.previous().range);
            return Ok(Statement::new(StatementKind::Repeat { body: Box::new(body) }, range));
        }
        if let Some(token) = self.match_kinds(&[TokenKind::While, TokenKind::Until]) {
            let until = token.kind == TokenKind::Until;
            let condition = match self.parse_expression() {
                Ok(condition) => {
                    if let Err(error) = self.consume_new_line() {
                        self.report(error);
                        self.recover_to_new_line();
                    }
                    Some(condition)
                }
                Err(error) => {
                    self.report(error);
                    self.recover_to_new_line();
                    None
                }
            };
            let body = self.parse_repeat_block()?;
            let range = start.union(self.previous().range);
            return Ok(match condition {
                Some(condition) => Statement::new(
                    StatementKind::RepeatCondition { condition, until, body: Box::new(body) },
                    range,
                ),
                // The condition failed to parse; keep the body so its
                // diagnostics still surface.
                None => Statement::new(StatementKind::Repeat { body: Box::new(body) }, range),
            });
        }
        if self.match_kinds(&[TokenKind::For]).is_some() {
            match self.parse_repeat_for_header() {
                Ok((variables, expression)) => {
                    let body = self.parse_repeat_block()?;
                    let range = start.union(self.previous().range);
                    return Ok(Statement::new(
                        StatementKind::RepeatFor { variables, expression, body: Box::new(body) },
                        range,
                    ));
                }
                Err(error) => {
                    self.report(error);
                    self.recover_to_new_line();
                    let body = self.parse_repeat_block()?;
                    let range = start.union(self.previous().range);
                    return Ok(Statement::new(
                        StatementKind::Repeat { body: Box::new(body) },
                        range,
                    ));
                }
            }
        }
        let error = self.error_at_peek(messages::EXPECTED_FOREVER_WHILE_UNTIL_FOR);
        self.report(error);
        self.recover_to_new_line();
        let body = self.parse_repeat_block()?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::Repeat { body: Box::new(body) }, range))
    }

    fn parse_repeat_for_header(&mut self) -> Result<(Vec<Variable>, Expression), Error> {
        let mut variables = Vec::new();
        loop {
            let name = self.consume_word(messages::EXPECTED_A_VARIABLE_NAME)?;
            self.declare_variable(&name.text);
            variables.push(Variable { name, scope: None });
            if self.match_kinds(&[TokenKind::Comma]).is_none() {
                break;
            }
        }
        self.consume(TokenKind::In, messages::EXPECTED_IN)?;
        let expression = self.parse_expression()?;
        self.consume_new_line()?;
        Ok((variables, expression))
    }

    fn parse_repeat_block(&mut self) -> Result<Statement, Error> {
        self.parsing_depth += 1;
        let body = self.parse_block(&[TokenKind::End]);
        self.parsing_depth -= 1;
        self.consume_end(TokenKind::Repeat)?;
        self.consume_new_line()?;
        Ok(body)
    }

    fn parse_assignment(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let mut targets = vec![self.parse_target(false)?];
        while self.match_kinds(&[TokenKind::Comma]).is_some() {
            targets.push(self.parse_target(false)?);
        }
        self.consume(TokenKind::To, messages::EXPECTED_TO)?;
        let expression = self.parse_expression()?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::Assignment { targets, expression }, range))
    }

    fn parse_target(&mut self, in_grouping: bool) -> Result<AssignmentTarget, Error> {
        if self.match_kinds(&[TokenKind::LeftParen]).is_some() {
            let mut targets = vec![self.parse_target(true)?];
            while self.match_kinds(&[TokenKind::Comma]).is_some() {
                targets.push(self.parse_target(true)?);
            }
            self.consume(TokenKind::RightParen, messages::EXPECTED_RIGHT_PARENS)?;
            return Ok(AssignmentTarget::Grouping(targets));
        }
        let scope = self.match_kinds(&[TokenKind::Global, TokenKind::Local]).map(|token| {
            if token.kind == TokenKind::Global { VariableScope::Global } else { VariableScope::Local }
        });
        let name = self.consume_word(messages::EXPECTED_A_VARIABLE_NAME)?;
        if name.text == "_" && !in_grouping {
            return Err(Error::new(name.range, messages::UNDERSCORE_NOT_ALLOWED));
        }
        let type_name = if self.match_kinds(&[TokenKind::Colon]).is_some() {
            Some(self.consume_word(messages::EXPECTED_WORD)?)
        } else {
            None
        };
        // Destructuring slots are plain names; subscript chains only apply
        // to standalone targets.
        let mut subscripts = Vec::new();
        while !in_grouping && self.match_kinds(&[TokenKind::LeftBracket]).is_some() {
            let was_ignoring = self.scanner.ignore_new_lines;
            self.scanner.ignore_new_lines = true;
            let index = self.parse_expression();
            self.scanner.ignore_new_lines = was_ignoring;
            subscripts.push(index?);
            self.consume(TokenKind::RightBracket, messages::EXPECTED_RIGHT_BRACKET)?;
        }
        self.declare_variable(&name.text);
        Ok(AssignmentTarget::Variable {
            variable: Variable { name, scope },
            type_name,
            subscripts,
        })
    }

    fn parse_exit(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        if !self.parsing_repeat {
            return Err(Error::new(start, messages::UNEXPECTED_EXIT));
        }
        self.consume(TokenKind::Repeat, messages::EXPECTED_REPEAT)?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::ExitRepeat, range))
    }

    fn parse_next(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        if !self.parsing_repeat {
            return Err(Error::new(start, messages::UNEXPECTED_NEXT));
        }
        self.consume(TokenKind::Repeat, messages::EXPECTED_REPEAT)?;
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::NextRepeat, range))
    }

    fn parse_return(&mut self) -> Result<Statement, Error> {
        let start = self.previous().range;
        let expression = if self.is_at_end() || self.check(&[TokenKind::NewLine]) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let range = start.union(self.previous().range);
        Ok(Statement::new(StatementKind::Return { expression }, range))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expression, Error> {
        self.parse_clause()
    }

    fn parse_clause(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_equality()?;
        while let Some(token) = self.match_kinds(&[TokenKind::And, TokenKind::Or]) {
            let operator =
                if token.kind == TokenKind::And { BinaryOperator::And } else { BinaryOperator::Or };
            let right = self.parse_equality()?;
            expression = binary(expression, operator, right);
        }
        Ok(expression)
    }

    fn parse_equality(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_comparison()?;
        while let Some(token) =
            self.match_kinds(&[TokenKind::Equal, TokenKind::NotEqual, TokenKind::Is])
        {
            let operator = match token.kind {
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                // "is not" flips to inequality.
                TokenKind::Is => {
                    if self.match_kinds(&[TokenKind::Not]).is_some() {
                        BinaryOperator::NotEqual
                    } else {
                        BinaryOperator::Equal
                    }
                }
                _ => BinaryOperator::Equal,
            };
            let right = self.parse_comparison()?;
            expression = binary(expression, operator, right);
        }
        Ok(expression)
    }

    fn parse_comparison(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_list()?;
        while let Some(token) = self.match_kinds(&[
            TokenKind::LessThan,
            TokenKind::GreaterThan,
            TokenKind::LessThanOrEqual,
            TokenKind::GreaterThanOrEqual,
        ]) {
            let operator = match token.kind {
                TokenKind::LessThan => BinaryOperator::LessThan,
                TokenKind::GreaterThan => BinaryOperator::GreaterThan,
                TokenKind::LessThanOrEqual => BinaryOperator::LessThanOrEqual,
                _ => BinaryOperator::GreaterThanOrEqual,
            };
            let right = self.parse_list()?;
            expression = binary(expression, operator, right);
        }
        Ok(expression)
    }

    fn parse_list(&mut self) -> Result<Expression, Error> {
        let expression = self.parse_range()?;
        if !self.check(&[TokenKind::Comma]) {
            return Ok(expression);
        }
        let start = expression.range;
        let mut expressions = vec![expression];
        while self.match_kinds(&[TokenKind::Comma]).is_some() {
            expressions.push(self.parse_range()?);
        }
        let range = start.union(self.previous().range);
        Ok(Expression::new(ExpressionKind::ListLiteral(expressions), range))
    }

    fn parse_range(&mut self) -> Result<Expression, Error> {
        let expression = self.parse_term()?;
        if let Some(token) = self.match_kinds(&[TokenKind::ClosedRange, TokenKind::OpenRange]) {
            let closed = token.kind == TokenKind::ClosedRange;
            let end = self.parse_term()?;
            let range = expression.range.union(end.range);
            return Ok(Expression::new(
                ExpressionKind::RangeLiteral {
                    start: Box::new(expression),
                    end: Box::new(end),
                    closed,
                },
                range,
            ));
        }
        Ok(expression)
    }

    fn parse_term(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_factor()?;
        while let Some(token) =
            self.match_kinds(&[TokenKind::Plus, TokenKind::Minus, TokenKind::Ampersand])
        {
            let operator = match token.kind {
                TokenKind::Plus => BinaryOperator::Plus,
                TokenKind::Minus => BinaryOperator::Minus,
                _ => BinaryOperator::Concat,
            };
            let right = self.parse_factor()?;
            expression = binary(expression, operator, right);
        }
        Ok(expression)
    }

    fn parse_factor(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_exponent()?;
        while let Some(token) =
            self.match_kinds(&[TokenKind::Star, TokenKind::Slash, TokenKind::Percent])
        {
            let operator = match token.kind {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                _ => BinaryOperator::Modulo,
            };
            let right = self.parse_exponent()?;
            expression = binary(expression, operator, right);
        }
        Ok(expression)
    }

    fn parse_exponent(&mut self) -> Result<Expression, Error> {
        let expression = self.parse_unary()?;
        if self.match_kinds(&[TokenKind::Carrot]).is_some() {
            // Right-associative: 2 ^ 3 ^ 2 is 2 ^ (3 ^ 2).
            let right = self.parse_exponent()?;
            return Ok(binary(expression, BinaryOperator::Exponent, right));
        }
        Ok(expression)
    }

    fn parse_unary(&mut self) -> Result<Expression, Error> {
        if let Some(token) = self.match_kinds(&[TokenKind::Minus, TokenKind::Not]) {
            let operator =
                if token.kind == TokenKind::Minus { UnaryOperator::Minus } else { UnaryOperator::Not };
            let operand = self.parse_unary()?;
            let range = token.range.union(operand.range);
            return Ok(Expression::new(
                ExpressionKind::Unary { operator, operand: Box::new(operand) },
                range,
            ));
        }
        self.parse_call()
    }

    fn parse_call(&mut self) -> Result<Expression, Error> {
        let start = self.peek().range;
        let root = self.grammar.clone();
        let mut arguments = Vec::new();
        let mut word_ranges = Vec::new();
        if let Some(signature) = self.match_grammar(&root, &mut arguments, &mut word_ranges) {
            let range = start.union(self.previous().range);
            let argument_ranges = arguments.iter().map(|argument| argument.range).collect();
            return Ok(Expression::new(
                ExpressionKind::Call { signature, arguments, argument_ranges, word_ranges },
                range,
            ));
        }
        self.parse_subscript()
    }

    /// Walks the grammar trie from `node`, consuming keywords and parsing
    /// argument expressions under checkpoints. Prefers the deepest match:
    /// extension edges are tried before accepting a terminal signature.
    fn match_grammar(
        &mut self,
        node: &GrammarNode,
        arguments: &mut Vec<Expression>,
        word_ranges: &mut Vec<SourceRange>,
    ) -> Option<Signature> {
        let token = self.peek().clone();
        if token.is_word() {
            let child = node.borrow().terms.get(&token.text.to_lowercase()).cloned();
            if let Some(child) = child {
                self.checkpoint();
                self.advance();
                word_ranges.push(token.range);
                if let Some(signature) = self.match_grammar(&child, arguments, word_ranges) {
                    self.commit();
                    return Some(signature);
                }
                self.rewind();
                word_ranges.pop();
            }
        }
        let argument_child = node.borrow().argument.clone();
        if let Some(child) = argument_child {
            // A trailing argument slot takes a whole expression; inner slots
            // parse at subscript precedence to avoid consuming the keywords
            // that continue the signature.
            let trailing = {
                let child = child.borrow();
                child.is_leaf() && child.signature.is_some()
            };
            self.checkpoint();
            let argument_count = arguments.len();
            let word_count = word_ranges.len();
            let parsed =
                if trailing { self.parse_expression() } else { self.parse_subscript() };
            if let Ok(expression) = parsed {
                arguments.push(expression);
                if let Some(signature) = self.match_grammar(&child, arguments, word_ranges) {
                    self.commit();
                    return Some(signature);
                }
            }
            self.rewind();
            arguments.truncate(argument_count);
            word_ranges.truncate(word_count);
        }
        node.borrow().signature.clone()
    }

    fn parse_subscript(&mut self) -> Result<Expression, Error> {
        let mut expression = self.parse_primary()?;
        while self.match_kinds(&[TokenKind::LeftBracket]).is_some() {
            let was_ignoring = self.scanner.ignore_new_lines;
            self.scanner.ignore_new_lines = true;
            let index = self.parse_expression();
            self.scanner.ignore_new_lines = was_ignoring;
            let index = index?;
            self.consume(TokenKind::RightBracket, messages::EXPECTED_RIGHT_BRACKET)?;
            let range = expression.range.union(self.previous().range);
            expression = Expression::new(
                ExpressionKind::Binary {
                    left: Box::new(expression),
                    operator: BinaryOperator::Subscript,
                    right: Box::new(index),
                },
                range,
            );
        }
        Ok(expression)
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        if let Some(token) = self.match_kinds(&[
            TokenKind::IntLiteral,
            TokenKind::FloatLiteral,
            TokenKind::StringLiteral,
            TokenKind::BoolLiteral,
            TokenKind::Empty,
        ]) {
            let range = token.range;
            return Ok(Expression::new(ExpressionKind::Literal(token), range));
        }
        if self.check(&[TokenKind::OpenInterpolation]) {
            return self.parse_interpolation();
        }
        if self.match_kinds(&[TokenKind::LeftParen]).is_some() {
            let start = self.previous().range;
            let expression = self.parse_expression()?;
            self.consume(TokenKind::RightParen, messages::EXPECTED_RIGHT_PARENS)?;
            let range = start.union(self.previous().range);
            return Ok(Expression::new(ExpressionKind::Grouping(Box::new(expression)), range));
        }
        if self.check(&[TokenKind::LeftBracket]) {
            return self.parse_container_literal();
        }
        if let Some(token) = self.match_kinds(&[TokenKind::Global, TokenKind::Local]) {
            let scope = if token.kind == TokenKind::Global {
                VariableScope::Global
            } else {
                VariableScope::Local
            };
            let name = self.consume_word(messages::EXPECTED_A_VARIABLE_NAME)?;
            let range = token.range.union(name.range);
            return Ok(Expression::new(
                ExpressionKind::Variable(Variable { name, scope: Some(scope) }),
                range,
            ));
        }
        if !self.is_at_end() && self.peek().is_word() {
            let name = self.advance();
            let range = name.range;
            return Ok(Expression::new(
                ExpressionKind::Variable(Variable { name, scope: None }),
                range,
            ));
        }
        Err(self.error_at_peek(messages::EXPECTED_AN_EXPRESSION))
    }

    fn parse_interpolation(&mut self) -> Result<Expression, Error> {
        let open = self.peek().clone();
        // The mode flags must be set before consuming the token: advancing
        // scans the next token, which belongs to the embedded expression.
        self.scanner.interpolating = true;
        self.scanner.string_terminal = open.opening_string_terminal();
        self.advance();
        self.finish_interpolation(open)
    }

    fn finish_interpolation(&mut self, left: Token) -> Result<Expression, Error> {
        let start = left.range;
        if self.check(&[TokenKind::Interpolation, TokenKind::ClosedInterpolation]) {
            if self.peek().kind == TokenKind::ClosedInterpolation {
                self.scanner.interpolating = false;
                self.advance();
            }
            return Err(Error::new(start, messages::EMPTY_INTERPOLATION));
        }
        let expression = self.parse_expression()?;
        let next = self.peek().clone();
        let right = match next.kind {
            TokenKind::ClosedInterpolation => {
                self.scanner.interpolating = false;
                self.advance();
                let range = next.range;
                Expression::new(ExpressionKind::Literal(next), range)
            }
            TokenKind::Interpolation => {
                self.advance();
                self.finish_interpolation(next)?
            }
            _ => return Err(self.error_at_peek(messages::UNTERMINATED_INTERPOLATION)),
        };
        let range = start.union(self.previous().range);
        Ok(Expression::new(
            ExpressionKind::StringInterpolation {
                left,
                expression: Box::new(expression),
                right: Box::new(right),
            },
            range,
        ))
    }

    fn parse_container_literal(&mut self) -> Result<Expression, Error> {
        // The next token is scanned when the bracket is consumed, so the
        // flag goes up first; brackets swallow new lines.
        let was_ignoring = self.scanner.ignore_new_lines;
        self.scanner.ignore_new_lines = true;
        let result = self.parse_container_literal_inner();
        self.scanner.ignore_new_lines = was_ignoring;
        let expression = result?;
        self.consume(TokenKind::RightBracket, messages::EXPECTED_RIGHT_BRACKET)?;
        let range = expression.range.union(self.previous().range);
        Ok(Expression::new(expression.kind, range))
    }

    fn parse_container_literal_inner(&mut self) -> Result<Expression, Error> {
        let start = self.advance().range; // the left bracket
        if self.match_kinds(&[TokenKind::Colon]).is_some() {
            return Ok(Expression::new(ExpressionKind::DictionaryLiteral(Vec::new()), start));
        }
        if self.check(&[TokenKind::RightBracket]) {
            return Ok(Expression::new(ExpressionKind::ListLiteral(Vec::new()), start));
        }
        let first = self.parse_range()?;
        if self.match_kinds(&[TokenKind::Colon]).is_some() {
            let value = self.parse_range()?;
            let mut pairs = vec![(first, value)];
            while self.match_kinds(&[TokenKind::Comma]).is_some() {
                let key = self.parse_range()?;
                self.consume(TokenKind::Colon, messages::EXPECTED_COLON_COMMA_OR_BRACKET)?;
                let value = self.parse_range()?;
                pairs.push((key, value));
            }
            let range = start.union(self.previous().range);
            return Ok(Expression::new(ExpressionKind::DictionaryLiteral(pairs), range));
        }
        let mut expressions = vec![first];
        while self.match_kinds(&[TokenKind::Comma]).is_some() {
            expressions.push(self.parse_range()?);
        }
        let range = start.union(self.previous().range);
        Ok(Expression::new(ExpressionKind::ListLiteral(expressions), range))
    }
}

fn binary(left: Expression, operator: BinaryOperator, right: Expression) -> Expression {
    let range = left.range.union(right.range);
    Expression::new(
        ExpressionKind::Binary { left: Box::new(left), operator, right: Box::new(right) },
        range,
    )
}

// `a`/`an` are deliberately absent: they read as articles in signatures but
// are ordinary variable names everywhere else, so they annotate through the
// AST walk instead.
fn is_keyword_kind(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::And
            | TokenKind::BoolLiteral
            | TokenKind::Else
            | TokenKind::Empty
            | TokenKind::End
            | TokenKind::Exit
            | TokenKind::For
            | TokenKind::Forever
            | TokenKind::Function
            | TokenKind::Global
            | TokenKind::If
            | TokenKind::In
            | TokenKind::Is
            | TokenKind::Local
            | TokenKind::Next
            | TokenKind::Not
            | TokenKind::Or
            | TokenKind::Repeat
            | TokenKind::Return
            | TokenKind::Set
            | TokenKind::Then
            | TokenKind::To
            | TokenKind::Try
            | TokenKind::Until
            | TokenKind::Use
            | TokenKind::Using
            | TokenKind::While
    )
}

fn is_operator_kind(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Ampersand
            | TokenKind::Arrow
            | TokenKind::Carrot
            | TokenKind::ClosedRange
            | TokenKind::Equal
            | TokenKind::GreaterThan
            | TokenKind::GreaterThanOrEqual
            | TokenKind::LessThan
            | TokenKind::LessThanOrEqual
            | TokenKind::Minus
            | TokenKind::NotEqual
            | TokenKind::OpenRange
            | TokenKind::Percent
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
    )
}

/// Parses a signature from a format string, using a throwaway parser. This
/// is the implementation behind [`Signature::parse`].
pub(crate) fn parse_signature_text(format: &str) -> Result<Signature, Error> {
    let mut reader = StringReader::new(format);
    let mut loader = ModuleLoader::new();
    let mut reporter = CaptureReporter::new();
    let config = ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: false,
    };
    let mut parser = Parser::new(config);
    let signature = parser.signature();
    let failed = parser.failed();
    drop(parser);
    match signature {
        Some(signature) if !failed => {
            if !signature.is_valid() {
                return Err(invalid_signature_error(signature.range));
            }
            Ok(signature)
        }
        _ => Err(reporter
            .errors()
            .first()
            .cloned()
            .unwrap_or_else(|| Error::new(SourceRange::default(), messages::EXPECTED_WORD))),
    }
}
