use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    ast::{
        AssignmentTarget, BinaryOperator, Expression, ExpressionKind, Statement, StatementKind,
        UnaryOperator, Variable, VariableScope,
    },
    bytecode::{Bytecode, Opcode},
    location::{SourceLocation, SourceRange},
    object::{Capture, Function, Object},
    report::{Error, Reporter, messages},
    token::TokenKind,
    value::Value,
};

/// Compiler collaborators and switches.
pub struct CompilerConfig<'a> {
    pub reporter: &'a mut dyn Reporter,
    /// Interactive sessions display the value of top-level expression
    /// statements (the `Show` opcode).
    pub interactive: bool,
}

#[derive(Debug)]
struct Local {
    name: String,
    depth: i32,
    read: bool,
    range: SourceRange,
}

#[derive(Debug)]
struct Frame {
    bytecode: Bytecode,
    locals: Vec<Local>,
    captures: Vec<Capture>,
    last_opcode: Option<Opcode>,
}

impl Frame {
    fn new(name: &str) -> Self {
        let mut frame = Self {
            bytecode: Bytecode::new(name),
            locals: Vec::new(),
            captures: Vec::new(),
            last_opcode: None,
        };
        // Slot zero holds the callee, so locals start at one.
        frame.locals.push(Local {
            name: String::new(),
            depth: 0,
            read: true,
            range: SourceRange::default(),
        });
        frame.bytecode.add_local("");
        frame
    }
}

#[derive(Debug)]
struct LoopContext {
    top: usize,
    locals_len: usize,
    exit_patches: Vec<usize>,
}

/// The single-pass tree-walking compiler.
///
/// Each function gets a frame with its own bytecode buffer, local stack,
/// and capture records. Blocks first discover their `function` declarations
/// and reserve bindings for them, then emit statements in source order, so
/// forward calls between siblings resolve.
pub struct Compiler<'a> {
    reporter: &'a mut dyn Reporter,
    interactive: bool,
    scope_depth: i32,
    frames: Vec<Frame>,
    globals: AHashSet<String>,
    loops: Vec<LoopContext>,
    failed: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(config: CompilerConfig<'a>) -> Self {
        Self {
            reporter: config.reporter,
            interactive: config.interactive,
            scope_depth: 0,
            frames: Vec::new(),
            globals: AHashSet::new(),
            loops: Vec::new(),
            failed: false,
        }
    }

    /// Compiles a program into bytecode. Returns `None` when any error was
    /// reported; the partial bytecode must not run.
    pub fn compile(&mut self, statement: &Statement) -> Option<Rc<Bytecode>> {
        self.frames.push(Frame::new(""));
        self.compile_statement(statement);
        let location = statement.range.end;
        self.add_implicit_return(location);
        let frame = self.frames.pop()?;
        if self.failed {
            return None;
        }
        Some(Rc::new(frame.bytecode))
    }

    /// The global names assigned during compilation.
    #[must_use]
    pub fn globals(&self) -> &AHashSet<String> {
        &self.globals
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("compiler frame stack is never empty")
    }

    fn emit(&mut self, location: SourceLocation, opcode: Opcode) -> usize {
        let frame = self.frame();
        frame.last_opcode = Some(opcode);
        frame.bytecode.add(location, opcode)
    }

    fn emit_with(&mut self, location: SourceLocation, opcode: Opcode, argument: u16) -> usize {
        let frame = self.frame();
        frame.last_opcode = Some(opcode);
        frame.bytecode.add_with_argument(location, opcode, argument)
    }

    fn emit_jump(&mut self, location: SourceLocation, opcode: Opcode) -> usize {
        self.emit_with(location, opcode, 0xffff)
    }

    fn patch_jump(&mut self, offset: usize, range: SourceRange) {
        if !self.frame().bytecode.patch_jump(offset) {
            self.error(range, messages::VALUE_OUT_OF_RANGE);
        }
    }

    fn emit_repeat(&mut self, location: SourceLocation, target: usize, range: SourceRange) {
        let frame = self.frame();
        frame.last_opcode = Some(Opcode::Repeat);
        if !frame.bytecode.add_repeat(location, target) {
            self.error(range, messages::VALUE_OUT_OF_RANGE);
        }
    }

    fn constant_index(&mut self, value: Value, range: SourceRange) -> u16 {
        match self.frame().bytecode.add_constant(value) {
            Some(index) => index,
            None => {
                self.error(range, messages::TOO_MANY_CONSTANTS);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value, range: SourceRange) {
        let index = self.constant_index(value, range);
        self.emit_with(range.start, Opcode::Constant, index);
    }

    fn name_constant(&mut self, name: &str, range: SourceRange) -> u16 {
        self.constant_index(Value::from(name), range)
    }

    fn error(&mut self, range: SourceRange, message: impl Into<Value>) {
        self.failed = true;
        self.reporter.report(Error::new(range, message));
    }

    fn warn(&mut self, range: SourceRange, message: impl Into<Value>) {
        self.reporter.report(Error::new(range, message));
    }

    // ------------------------------------------------------------------
    // Locals, captures, scopes
    // ------------------------------------------------------------------

    fn add_local(&mut self, name: &str, range: SourceRange) -> u16 {
        let depth = self.scope_depth;
        if self.frame().locals.len() > usize::from(u16::MAX) {
            self.error(range, messages::TOO_MANY_LOCAL_VARIABLES);
            return 0;
        }
        let frame = self.frame();
        frame.locals.push(Local { name: name.to_lowercase(), depth, read: false, range });
        frame.bytecode.add_local(name)
    }

    fn find_local(&self, frame_index: usize, name: &str) -> Option<u16> {
        let frame = &self.frames[frame_index];
        frame
            .locals
            .iter()
            .rposition(|local| !local.name.is_empty() && local.name == name)
            .map(|index| index as u16)
    }

    fn mark_local_read(&mut self, frame_index: usize, index: u16) {
        self.frames[frame_index].locals[usize::from(index)].read = true;
    }

    /// Resolves `name` against enclosing frames, threading a capture chain
    /// down to `frame_index`. Returns the capture slot in that frame.
    fn resolve_capture(&mut self, frame_index: usize, name: &str) -> Option<u16> {
        if frame_index == 0 {
            return None;
        }
        let parent = frame_index - 1;
        if let Some(local) = self.find_local(parent, name) {
            self.mark_local_read(parent, local);
            return Some(self.add_capture(frame_index, local, true));
        }
        let capture = self.resolve_capture(parent, name)?;
        Some(self.add_capture(frame_index, capture, false))
    }

    fn add_capture(&mut self, frame_index: usize, index: u16, is_local: bool) -> u16 {
        let captures = &mut self.frames[frame_index].captures;
        let capture = Capture { index, is_local };
        if let Some(existing) = captures.iter().position(|c| *c == capture) {
            return existing as u16;
        }
        captures.push(capture);
        (captures.len() - 1) as u16
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Leaves a structural scope, popping the locals it introduced.
    fn end_scope(&mut self, location: SourceLocation) {
        self.scope_depth -= 1;
        loop {
            let depth = self.scope_depth;
            let Some(local) = self.frame().locals.last() else { break };
            if local.depth <= depth {
                break;
            }
            let last_index = self.frame().locals.len() - 1;
            self.check_unused_local(last_index);
            self.frame().locals.pop();
            self.emit(location, Opcode::Pop);
        }
    }

    fn check_unused_local(&mut self, index: usize) {
        let local = &self.frames.last().expect("frame").locals[index];
        if local.read || local.name.is_empty() || local.name.starts_with('_') {
            return;
        }
        let name = local.name.clone();
        let range = local.range;
        self.warn(range, messages::unused_local_variable(&name));
    }

    fn add_implicit_return(&mut self, location: SourceLocation) {
        if self.frame().last_opcode != Some(Opcode::Return) {
            self.emit(location, Opcode::Empty);
            self.emit(location, Opcode::Return);
        }
    }

    fn in_root_frame(&self) -> bool {
        self.frames.len() == 1
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_statement(&mut self, statement: &Statement) {
        let location = statement.range.start;
        match &statement.kind {
            StatementKind::Block(statements) => self.compile_block(statements),
            StatementKind::FunctionDecl { signature, body } => {
                self.compile_function_decl(statement, signature, body);
            }
            StatementKind::If { condition, then_branch, else_branch } => {
                self.compile_expression(condition);
                let skip_then = self.emit_jump(condition.range.start, Opcode::JumpIfFalse);
                self.emit(condition.range.start, Opcode::Pop);
                self.begin_scope();
                self.compile_statement(then_branch);
                self.end_scope(then_branch.range.end);
                let skip_else = self.emit_jump(then_branch.range.end, Opcode::Jump);
                self.patch_jump(skip_then, statement.range);
                self.emit(then_branch.range.end, Opcode::Pop);
                if let Some(else_branch) = else_branch {
                    self.begin_scope();
                    self.compile_statement(else_branch);
                    self.end_scope(else_branch.range.end);
                }
                self.patch_jump(skip_else, statement.range);
            }
            StatementKind::Try { body } => {
                let push = self.emit_jump(location, Opcode::PushJump);
                self.begin_scope();
                self.compile_statement(body);
                self.end_scope(body.range.end);
                self.emit(body.range.end, Opcode::PopJump);
                let after = self.emit_jump(body.range.end, Opcode::Jump);
                // The handler target: the VM has already stored the error in
                // the frame's error register and unwound the operand stack.
                self.patch_jump(push, statement.range);
                self.patch_jump(after, statement.range);
            }
            StatementKind::Use { module, .. } => {
                if let Some(module) = module {
                    self.compile_module_import(module, statement.range);
                }
            }
            StatementKind::Using { module, body, .. } => {
                if let Some(module) = module {
                    self.compile_module_import(module, statement.range);
                }
                self.begin_scope();
                self.compile_statement(body);
                self.end_scope(body.range.end);
            }
            StatementKind::Assignment { targets, expression } => {
                self.compile_assignment(targets, expression, statement.range);
            }
            StatementKind::Return { expression } => {
                match expression {
                    Some(expression) => self.compile_expression(expression),
                    None => {
                        self.emit(location, Opcode::Empty);
                    }
                }
                self.emit(statement.range.end, Opcode::Return);
            }
            StatementKind::ExpressionStatement(expression) => {
                self.compile_expression(expression);
                if self.interactive && self.in_root_frame() {
                    self.emit(statement.range.end, Opcode::Show);
                }
                self.emit(statement.range.end, Opcode::SetIt);
            }
            StatementKind::Repeat { body } => self.compile_repeat_forever(body),
            StatementKind::RepeatCondition { condition, until, body } => {
                self.compile_repeat_condition(condition, *until, body);
            }
            StatementKind::RepeatFor { variables, expression, body } => {
                self.compile_repeat_for(variables, expression, body);
            }
            StatementKind::ExitRepeat => self.compile_exit_repeat(statement.range),
            StatementKind::NextRepeat => self.compile_next_repeat(statement.range),
        }
    }

    /// Compiles a block in two passes: first discover the block's `function`
    /// declarations and reserve their bindings, then emit every statement in
    /// source order. The reserved slots let earlier statements (and sibling
    /// functions) reference declarations that appear later in the block.
    fn compile_block(&mut self, statements: &[Statement]) {
        for statement in statements {
            if let StatementKind::FunctionDecl { signature, .. } = &statement.kind {
                let name = signature.name();
                if self.in_root_frame() {
                    self.globals.insert(name);
                } else if self.find_local(self.frames.len() - 1, &name).is_none() {
                    self.emit(statement.range.start, Opcode::Empty);
                    let slot = self.add_local(&name, statement.range);
                    // The binding is filled in when the declaration runs.
                    self.mark_local_read(self.frames.len() - 1, slot);
                }
            }
        }
        for statement in statements {
            self.compile_statement(statement);
        }
    }

    fn compile_function_decl(
        &mut self,
        statement: &Statement,
        signature: &crate::signature::Signature,
        body: &Statement,
    ) {
        let name = signature.name();
        let location = statement.range.start;

        self.frames.push(Frame::new(&name));
        self.begin_scope();

        // One entry local per argument slot, in signature order. Multi-target
        // arguments land in a hidden entry local and unpack below.
        let mut unpacks: Vec<(u16, &crate::signature::Argument)> = Vec::new();
        for argument in signature.arguments() {
            if argument.targets.len() == 1 {
                let target = &argument.targets[0];
                match &target.name {
                    Some(token) => {
                        self.add_local(&token.text, token.range);
                    }
                    None => {
                        self.add_local("_", statement.range);
                    }
                }
            } else {
                let slot = self.add_local("", statement.range);
                unpacks.push((slot, argument));
            }
        }
        for (slot, argument) in unpacks {
            self.emit_with(location, Opcode::GetLocal, slot);
            self.emit_with(location, Opcode::UnpackList, argument.targets.len() as u16);
            for target in &argument.targets {
                match &target.name {
                    Some(token) => {
                        self.add_local(&token.text, token.range);
                    }
                    None => {
                        self.add_local("_", statement.range);
                    }
                }
            }
        }

        self.compile_statement(body);
        self.add_implicit_return(body.range.end);

        let local_count = self.frame().locals.len();
        for index in 1..local_count {
            self.check_unused_local(index);
        }
        self.scope_depth -= 1;
        let frame = self.frames.pop().expect("function frame");

        let function = Function {
            signature: signature.clone(),
            bytecode: Rc::new(frame.bytecode),
            captures: frame.captures,
        };
        self.emit_constant(Value::Object(Rc::new(Object::Function(function))), statement.range);
        self.assign_name(&name, statement.range);
    }

    fn compile_module_import(&mut self, module: &crate::module::Module, range: SourceRange) {
        for (name, value) in module.values() {
            self.emit_constant(value.clone(), range);
            let index = self.name_constant(name, range);
            self.emit_with(range.start, Opcode::SetGlobal, index);
        }
    }

    fn compile_repeat_forever(&mut self, body: &Statement) {
        self.begin_scope();
        let top = self.frame().bytecode.code().len();
        self.push_loop(top);
        self.begin_scope();
        self.compile_statement(body);
        self.end_scope(body.range.end);
        self.emit_repeat(body.range.end, top, body.range);
        self.pop_loop(body.range);
        self.end_scope(body.range.end);
    }

    fn compile_repeat_condition(&mut self, condition: &Expression, until: bool, body: &Statement) {
        self.begin_scope();
        let top = self.frame().bytecode.code().len();
        self.push_loop(top);
        self.compile_expression(condition);
        let opcode = if until { Opcode::JumpIfTrue } else { Opcode::JumpIfFalse };
        let exit_jump = self.emit_jump(condition.range.start, opcode);
        self.emit(condition.range.start, Opcode::Pop);
        self.begin_scope();
        self.compile_statement(body);
        self.end_scope(body.range.end);
        self.emit_repeat(body.range.end, top, body.range);
        self.patch_jump(exit_jump, condition.range);
        self.emit(body.range.end, Opcode::Pop);
        self.pop_loop(body.range);
        self.end_scope(body.range.end);
    }

    fn compile_repeat_for(
        &mut self,
        variables: &[Variable],
        expression: &Expression,
        body: &Statement,
    ) {
        self.begin_scope();
        // Loop variables bind before the enumerator takes its stack slot.
        for variable in variables {
            self.predeclare_variable(variable);
        }
        self.compile_expression(expression);
        self.emit(expression.range.start, Opcode::GetEnumerator);
        self.add_local("", expression.range);

        let top = self.frame().bytecode.code().len();
        self.push_loop(top);
        let exit_jump = self.emit_jump(expression.range.start, Opcode::JumpIfAtEnd);
        self.emit(expression.range.start, Opcode::Enumerate);
        if let [variable] = variables {
            self.compile_assign_variable(variable, variable.name.range);
        } else {
            self.emit_with(
                expression.range.start,
                Opcode::UnpackList,
                variables.len() as u16,
            );
            for variable in variables.iter().rev() {
                self.compile_assign_variable(variable, variable.name.range);
            }
        }
        self.begin_scope();
        self.compile_statement(body);
        self.end_scope(body.range.end);
        self.emit_repeat(body.range.end, top, body.range);
        self.patch_jump(exit_jump, expression.range);
        self.pop_loop(body.range);
        self.end_scope(body.range.end);
    }

    fn push_loop(&mut self, top: usize) {
        let locals_len = self.frame().locals.len();
        self.loops.push(LoopContext { top, locals_len, exit_patches: Vec::new() });
    }

    fn pop_loop(&mut self, range: SourceRange) {
        let Some(context) = self.loops.pop() else { return };
        for patch in context.exit_patches {
            self.patch_jump(patch, range);
        }
    }

    fn emit_loop_unwind(&mut self, location: SourceLocation) -> Option<usize> {
        let context = self.loops.last()?;
        let locals_len = context.locals_len;
        let top = context.top;
        let current = self.frame().locals.len();
        for _ in locals_len..current {
            self.emit(location, Opcode::Pop);
        }
        Some(top)
    }

    fn compile_exit_repeat(&mut self, range: SourceRange) {
        if self.emit_loop_unwind(range.start).is_none() {
            self.error(range, messages::UNEXPECTED_EXIT);
            return;
        }
        let patch = self.emit_jump(range.start, Opcode::Jump);
        if let Some(context) = self.loops.last_mut() {
            context.exit_patches.push(patch);
        }
    }

    fn compile_next_repeat(&mut self, range: SourceRange) {
        let Some(top) = self.emit_loop_unwind(range.start) else {
            self.error(range, messages::UNEXPECTED_NEXT);
            return;
        };
        self.emit_repeat(range.start, top, range);
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn compile_assignment(
        &mut self,
        targets: &[AssignmentTarget],
        expression: &Expression,
        range: SourceRange,
    ) {
        match targets {
            [AssignmentTarget::Variable { variable, subscripts, .. }] if subscripts.is_empty() => {
                self.compile_expression(expression);
                self.compile_assign_variable(variable, range);
            }
            [AssignmentTarget::Variable { variable, subscripts, .. }] => {
                self.compile_variable_read(variable, variable.name.range);
                let (last, leading) = subscripts.split_last().expect("non-empty subscripts");
                for subscript in leading {
                    self.compile_expression(subscript);
                    self.emit(subscript.range.start, Opcode::Subscript);
                }
                self.compile_expression(last);
                self.compile_expression(expression);
                self.emit(range.start, Opcode::SetSubscript);
            }
            [AssignmentTarget::Grouping(sub_targets)] => {
                self.predeclare_targets(sub_targets);
                self.compile_expression(expression);
                self.compile_destructure(sub_targets, range);
            }
            _ => {
                self.predeclare_targets(targets);
                self.compile_expression(expression);
                self.compile_destructure(targets, range);
            }
        }
    }

    /// Destructuring needs every plain target to already have a binding:
    /// the unpacked values pop in reverse order, which is incompatible with
    /// creating new stack-slot locals on the fly.
    fn predeclare_targets(&mut self, targets: &[AssignmentTarget]) {
        for target in targets {
            match target {
                AssignmentTarget::Grouping(sub_targets) => self.predeclare_targets(sub_targets),
                AssignmentTarget::Variable { variable, .. } => {
                    self.predeclare_variable(variable);
                }
            }
        }
    }

    fn predeclare_variable(&mut self, variable: &Variable) {
        let name = variable.name.text.to_lowercase();
        if name == "it" || name == "_" {
            return;
        }
        if variable.scope == Some(VariableScope::Global) {
            return;
        }
        let frame_index = self.frames.len() - 1;
        if self.find_local(frame_index, &name).is_some() {
            return;
        }
        if variable.scope.is_none() {
            if self.resolve_capture(frame_index, &name).is_some() {
                return;
            }
            if self.in_root_frame() || self.globals.contains(&name) {
                return;
            }
        }
        self.emit(variable.name.range.start, Opcode::Empty);
        self.add_local(&variable.name.text, variable.name.range);
    }

    fn compile_destructure(&mut self, targets: &[AssignmentTarget], range: SourceRange) {
        self.emit_with(range.start, Opcode::UnpackList, targets.len() as u16);
        for target in targets.iter().rev() {
            match target {
                AssignmentTarget::Grouping(sub_targets) => {
                    self.compile_destructure(sub_targets, range);
                }
                AssignmentTarget::Variable { variable, subscripts, .. } => {
                    if !subscripts.is_empty() {
                        // Subscripted destructuring slots have no stack
                        // discipline that works with reversed unpacking.
                        self.error(variable.name.range, messages::EXPECTED_A_VARIABLE_NAME);
                        self.emit(variable.name.range.start, Opcode::Pop);
                    } else if variable.name.text == "_" {
                        self.emit(variable.name.range.start, Opcode::Pop);
                    } else {
                        self.compile_assign_variable(variable, variable.name.range);
                    }
                }
            }
        }
    }

    /// Stores the value on top of the stack into `variable`. New unpinned
    /// bindings become globals in the root frame and locals inside
    /// functions; a brand-new local simply keeps the value as its stack
    /// slot, so nothing is emitted.
    fn compile_assign_variable(&mut self, variable: &Variable, range: SourceRange) {
        let name = variable.name.text.to_lowercase();
        let location = range.start;
        if name == "it" && variable.scope.is_none() {
            self.emit(location, Opcode::SetIt);
            return;
        }
        if name == "_" {
            self.error(variable.name.range, messages::UNDERSCORE_NOT_ALLOWED);
            return;
        }
        let frame_index = self.frames.len() - 1;
        match variable.scope {
            Some(VariableScope::Global) => {
                self.globals.insert(name.clone());
                let index = self.name_constant(&name, range);
                self.emit_with(location, Opcode::SetGlobal, index);
            }
            Some(VariableScope::Local) => {
                if let Some(slot) = self.find_local(frame_index, &name) {
                    self.emit_with(location, Opcode::SetLocal, slot);
                } else {
                    self.add_local(&variable.name.text, range);
                }
            }
            None => {
                if let Some(slot) = self.find_local(frame_index, &name) {
                    self.emit_with(location, Opcode::SetLocal, slot);
                } else if let Some(capture) = self.resolve_capture(frame_index, &name) {
                    self.emit_with(location, Opcode::SetCapture, capture);
                } else if self.in_root_frame() || self.globals.contains(&name) {
                    self.globals.insert(name.clone());
                    let index = self.name_constant(&name, range);
                    self.emit_with(location, Opcode::SetGlobal, index);
                } else {
                    self.add_local(&variable.name.text, range);
                }
            }
        }
    }

    /// Binds a function object (on top of the stack) under its signature's
    /// normalized name, using the same resolution as plain assignment.
    fn assign_name(&mut self, name: &str, range: SourceRange) {
        let frame_index = self.frames.len() - 1;
        if let Some(slot) = self.find_local(frame_index, name) {
            self.emit_with(range.start, Opcode::SetLocal, slot);
        } else if self.in_root_frame() {
            self.globals.insert(name.to_owned());
            let index = self.name_constant(name, range);
            self.emit_with(range.start, Opcode::SetGlobal, index);
        } else {
            self.add_local(name, range);
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expression(&mut self, expression: &Expression) {
        let location = expression.range.start;
        match &expression.kind {
            ExpressionKind::Call { signature, arguments, argument_ranges, .. } => {
                let name = signature.name();
                self.compile_name_read(&name, expression.range);
                for argument in arguments {
                    self.compile_expression(argument);
                }
                let offset = self.emit_with(location, Opcode::Call, arguments.len() as u16);
                self.frame().bytecode.add_argument_ranges(offset, argument_ranges.clone());
            }
            ExpressionKind::Binary { left, operator, right } => {
                self.compile_binary(expression, left, *operator, right);
            }
            ExpressionKind::Unary { operator, operand } => {
                self.compile_expression(operand);
                let opcode = match operator {
                    UnaryOperator::Minus => Opcode::Negate,
                    UnaryOperator::Not => Opcode::Not,
                };
                self.emit(location, opcode);
            }
            ExpressionKind::Grouping(inner) => self.compile_expression(inner),
            ExpressionKind::Variable(variable) => {
                self.compile_variable_read(variable, expression.range);
            }
            ExpressionKind::RangeLiteral { start, end, closed } => {
                self.compile_expression(start);
                self.compile_expression(end);
                let opcode = if *closed { Opcode::ClosedRange } else { Opcode::OpenRange };
                self.emit(location, opcode);
            }
            ExpressionKind::ListLiteral(expressions) => {
                for expression in expressions {
                    self.compile_expression(expression);
                }
                self.emit_with(location, Opcode::List, expressions.len() as u16);
            }
            ExpressionKind::DictionaryLiteral(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key);
                    self.compile_expression(value);
                }
                self.emit_with(location, Opcode::Dictionary, pairs.len() as u16);
            }
            ExpressionKind::Literal(token) => self.compile_literal(token, expression.range),
            ExpressionKind::StringInterpolation { left, expression: inner, right } => {
                self.emit_constant(Value::from(left.string_contents()), expression.range);
                self.compile_expression(inner);
                self.emit(inner.range.start, Opcode::ToString);
                self.emit(inner.range.start, Opcode::Add);
                self.compile_expression(right);
                self.emit(right.range.start, Opcode::Add);
            }
        }
    }

    fn compile_binary(
        &mut self,
        expression: &Expression,
        left: &Expression,
        operator: BinaryOperator,
        right: &Expression,
    ) {
        let location = expression.range.start;
        match operator {
            BinaryOperator::And => {
                self.compile_expression(left);
                let short_circuit = self.emit_jump(location, Opcode::JumpIfFalse);
                self.emit(location, Opcode::Pop);
                self.compile_expression(right);
                self.patch_jump(short_circuit, expression.range);
            }
            BinaryOperator::Or => {
                self.compile_expression(left);
                let short_circuit = self.emit_jump(location, Opcode::JumpIfTrue);
                self.emit(location, Opcode::Pop);
                self.compile_expression(right);
                self.patch_jump(short_circuit, expression.range);
            }
            BinaryOperator::Concat => {
                self.compile_expression(left);
                self.emit(left.range.start, Opcode::ToString);
                self.compile_expression(right);
                self.emit(right.range.start, Opcode::ToString);
                self.emit(location, Opcode::Add);
            }
            _ => {
                self.compile_expression(left);
                self.compile_expression(right);
                let opcode = match operator {
                    BinaryOperator::Equal => Opcode::Equal,
                    BinaryOperator::NotEqual => Opcode::NotEqual,
                    BinaryOperator::LessThan => Opcode::LessThan,
                    BinaryOperator::GreaterThan => Opcode::GreaterThan,
                    BinaryOperator::LessThanOrEqual => Opcode::LessThanOrEqual,
                    BinaryOperator::GreaterThanOrEqual => Opcode::GreaterThanOrEqual,
                    BinaryOperator::Plus => Opcode::Add,
                    BinaryOperator::Minus => Opcode::Subtract,
                    BinaryOperator::Multiply => Opcode::Multiply,
                    BinaryOperator::Divide => Opcode::Divide,
                    BinaryOperator::Modulo => Opcode::Modulo,
                    BinaryOperator::Exponent => Opcode::Exponent,
                    BinaryOperator::Subscript => Opcode::Subscript,
                    BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Concat => {
                        unreachable!("handled above")
                    }
                };
                self.emit(location, opcode);
            }
        }
    }

    fn compile_literal(&mut self, token: &crate::token::Token, range: SourceRange) {
        match token.kind {
            TokenKind::IntLiteral => match token.text.parse::<i64>() {
                Ok(value) => {
                    if let Ok(short) = u16::try_from(value) {
                        self.emit_with(range.start, Opcode::Short, short);
                    } else {
                        self.emit_constant(Value::Integer(value), range);
                    }
                }
                Err(_) => self.error(range, messages::VALUE_OUT_OF_RANGE),
            },
            TokenKind::FloatLiteral => match token.text.parse::<f64>() {
                Ok(value) => self.emit_constant(Value::Float(value), range),
                Err(_) => self.error(range, messages::VALUE_OUT_OF_RANGE),
            },
            TokenKind::StringLiteral
            | TokenKind::Interpolation
            | TokenKind::ClosedInterpolation => {
                self.emit_constant(Value::from(token.string_contents()), range);
            }
            TokenKind::BoolLiteral => {
                let opcode = if token.text.eq_ignore_ascii_case("true") {
                    Opcode::True
                } else {
                    Opcode::False
                };
                self.emit(range.start, opcode);
            }
            TokenKind::Empty => {
                self.emit(range.start, Opcode::Empty);
            }
            _ => self.error(range, messages::EXPECTED_AN_EXPRESSION),
        }
    }

    fn compile_variable_read(&mut self, variable: &Variable, range: SourceRange) {
        let name = variable.name.text.to_lowercase();
        if name == "it" && variable.scope.is_none() {
            self.emit(range.start, Opcode::GetIt);
            return;
        }
        match variable.scope {
            Some(VariableScope::Global) => {
                let index = self.name_constant(&name, range);
                self.emit_with(range.start, Opcode::GetGlobal, index);
            }
            _ => self.compile_name_read(&name, range),
        }
    }

    /// Emits a read of `name` through the local → capture → global chain.
    fn compile_name_read(&mut self, name: &str, range: SourceRange) {
        let name = name.to_lowercase();
        let frame_index = self.frames.len() - 1;
        if let Some(slot) = self.find_local(frame_index, &name) {
            self.mark_local_read(frame_index, slot);
            self.emit_with(range.start, Opcode::GetLocal, slot);
            return;
        }
        if let Some(capture) = self.resolve_capture(frame_index, &name) {
            self.emit_with(range.start, Opcode::GetCapture, capture);
            return;
        }
        let index = self.name_constant(&name, range);
        self.emit_with(range.start, Opcode::GetGlobal, index);
    }
}
