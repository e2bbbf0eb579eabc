//! Parlance is a small dynamically-typed scripting language whose source
//! reads like natural English: function signatures are mix-fix templates
//! with interleaved keywords and argument slots, resolved at parse time
//! through a signature trie.
//!
//! The core pipeline:
//!
//! - [`Scanner`] turns source text into tokens with precise ranges,
//!   including the three-part string-interpolation protocol.
//! - [`Parser`] builds an AST with recursive descent plus Pratt precedence,
//!   matching user-defined call signatures with checkpoint/rewind.
//! - [`Compiler`] lowers the AST in a single pass to stack bytecode with
//!   lexical captures.
//! - [`VirtualMachine`] executes the bytecode with per-frame locals, an
//!   implicit `it` register, `try`-frame error propagation, and a tracing
//!   cycle collector over the reference-counted container objects.
//!
//! ```
//! use parlance::{
//!     CaptureReporter, Compiler, CompilerConfig, ModuleLoader, Parser, ParserConfig,
//!     StringReader, VirtualMachine,
//! };
//!
//! let mut reader = StringReader::new("set answer to 6 * 7\nanswer");
//! let mut loader = ModuleLoader::new();
//! let mut reporter = CaptureReporter::new();
//! let mut parser = Parser::new(ParserConfig {
//!     reader: &mut reader,
//!     module_provider: &mut loader,
//!     reporter: &mut reporter,
//!     #[cfg(debug_assertions)]
//!     enable_tracing: false,
//! });
//! let program = parser.statement();
//! assert!(!parser.failed());
//!
//! let mut reporter = CaptureReporter::new();
//! let mut compiler = Compiler::new(CompilerConfig { reporter: &mut reporter, interactive: false });
//! let bytecode = compiler.compile(&program).expect("compiles");
//!
//! let mut vm = VirtualMachine::default();
//! vm.execute(&bytecode).expect("runs");
//! assert_eq!(vm.it(), parlance::Value::Integer(42));
//! ```

mod annotate;
mod ast;
mod bytecode;
mod compiler;
mod grammar;
mod location;
mod module;
mod modules;
mod object;
mod parser;
mod pretty;
mod reader;
mod report;
mod scanner;
mod signature;
mod token;
mod value;
mod vm;

pub use crate::{
    annotate::{Annotation, AnnotationKind, SourceAnnotator, encode_semantic_tokens, semantic_token_type},
    ast::{
        AssignmentTarget, BinaryOperator, Expression, ExpressionKind, Statement, StatementKind,
        UnaryOperator, Variable, VariableScope,
    },
    bytecode::{Bytecode, Opcode},
    compiler::{Compiler, CompilerConfig},
    grammar::{Grammar, GrammarNode},
    location::{SourceLocation, SourceRange},
    module::{Module, ModuleLoader, ModuleProvider},
    modules::{Core, CoreConfig, System, SystemConfig},
    object::{
        Capture, EnumerationItem, Enumerator, ForeignObject, Function, Native, NativeCallContext,
        Object, Range, ValueMap,
    },
    parser::{Parser, ParserConfig},
    pretty::{expression_source, pretty_print},
    reader::{LineReader, Reader, StringReader},
    report::{CaptureReporter, Error, IoReporter, Reporter, messages},
    scanner::Scanner,
    signature::{Argument, Choice, Signature, Target, Term},
    token::{Token, TokenKind},
    value::Value,
    vm::{VirtualMachine, VirtualMachineConfig},
};
