//! The pretty-printer: canonical formatting and reparse stability.

use parlance::{
    CaptureReporter, ModuleLoader, Parser, ParserConfig, Signature, Statement, StringReader,
    pretty_print,
};
use pretty_assertions::assert_eq;

fn parse(source: &str) -> Statement {
    let mut reader = StringReader::new(source);
    let mut loader = ModuleLoader::new();
    let mut reporter = CaptureReporter::new();
    let mut parser = Parser::new(ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: false,
    });
    for format in ["print {value}", "insert {value} into {target}"] {
        let signature = Signature::parse(format).unwrap();
        parser.declare(&signature);
    }
    let program = parser.statement();
    assert!(!parser.failed(), "parse failed: {:?}", reporter.errors());
    program
}

/// Pretty-printing the parse of pretty-printed source reproduces it
/// exactly.
fn assert_stable(source: &str) {
    let first = pretty_print(&parse(source));
    let second = pretty_print(&parse(&first));
    assert_eq!(first, second, "printing must be a fixed point");
}

#[test]
fn assignments_and_expressions() {
    assert_eq!(pretty_print(&parse("set a to 1+2 * 3\n")), "set a to 1 + 2 * 3\n");
    assert_eq!(pretty_print(&parse("set a to (1+2) * 3\n")), "set a to (1 + 2) * 3\n");
    assert_eq!(pretty_print(&parse("set items to [1,2 , 3]\n")), "set items to [1, 2, 3]\n");
    assert_eq!(pretty_print(&parse("set d to [:]\n")), "set d to [:]\n");
    assert_eq!(pretty_print(&parse("set (a, b) to [1, 2]\n")), "set (a, b) to [1, 2]\n");
}

#[test]
fn blocks_indent_their_bodies() {
    let printed = pretty_print(&parse("if true then\nset a to 1\nelse\nset a to 2\nend if\n"));
    assert_eq!(printed, "if true then\n  set a to 1\nelse\n  set a to 2\nend if\n");
}

#[test]
fn single_statement_if_normalizes_to_block_form() {
    let printed = pretty_print(&parse("if true then set a to 1\n"));
    assert_eq!(printed, "if true then\n  set a to 1\nend if\n");
}

#[test]
fn repeat_forms() {
    assert_eq!(
        pretty_print(&parse("repeat while a < 3\nset a to a + 1\nend repeat\n")),
        "repeat while a < 3\n  set a to a + 1\nend repeat\n"
    );
    assert_eq!(
        pretty_print(&parse("repeat for i in 1...3\nprint i\nend repeat\n")),
        "repeat for i in 1...3\n  print i\nend repeat\n"
    );
}

#[test]
fn functions_print_their_signatures() {
    let printed =
        pretty_print(&parse("function greet {who}\nreturn \"hi \" & who\nend function\n"));
    assert_eq!(printed, "function greet {who}\n  return \"hi \" & who\nend function\n");
}

#[test]
fn calls_render_from_their_signatures() {
    assert_eq!(pretty_print(&parse("print 10 + 5\n")), "print 10 + 5\n");
    assert_eq!(
        pretty_print(&parse("insert 3 into items\n")),
        "insert 3 into items\n"
    );
}

#[test]
fn interpolations_round_trip() {
    let printed = pretty_print(&parse("print \"Hi, {name}!\"\n"));
    assert_eq!(printed, "print \"Hi, {name}!\"\n");
}

/// Reformatting is semantically lossless: compiling the pretty-printed
/// source yields the same instruction stream as compiling the original
/// (source locations aside).
#[test]
fn recompiling_pretty_printed_source_preserves_bytecode() {
    use parlance::{Compiler, CompilerConfig};

    let compile = |source: &str| {
        let program = parse(source);
        let mut reporter = CaptureReporter::new();
        let mut compiler =
            Compiler::new(CompilerConfig { reporter: &mut reporter, interactive: false });
        compiler.compile(&program).expect("compiles")
    };

    for source in [
        "set a to 1 + 2 * 3\n",
        "if a = 1 then set b to 2 else set b to 3\n",
        "repeat for i in 1...3\nprint i\nend repeat\n",
        "function twice {x}\nreturn x * 2\nend function\nprint twice 4\n",
        "try\nset a to 1/0\nend try\n",
    ] {
        let original = compile(source);
        let reformatted = compile(&pretty_print(&parse(source)));
        assert_eq!(
            original.code(),
            reformatted.code(),
            "instruction streams must match for {source:?}"
        );
        assert_eq!(original.constants().len(), reformatted.constants().len());
    }
}

#[test]
fn formatting_is_a_fixed_point() {
    assert_stable("set a to 1+2\n");
    assert_stable("if a = 1 then set b to 2 else set b to 3\n");
    assert_stable("repeat\nexit repeat\nend repeat\n");
    assert_stable("try\nset a to 1/0\nend try\n");
    assert_stable("function twice {x}\nreturn x * 2\nend function\nprint twice 4\n");
    assert_stable("repeat for k, v in [\"a\": 1]\nprint k\nend repeat\n");
}
