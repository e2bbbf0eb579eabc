//! Readers: fixed strings, line-by-line refills, and the parser's
//! read-ahead for unterminated blocks.

use std::io::Cursor;

use parlance::{
    CaptureReporter, LineReader, ModuleLoader, Parser, ParserConfig, Reader, StatementKind,
    StringReader,
};

#[test]
fn string_readers_are_not_re_readable() {
    let mut reader = StringReader::new("print 1");
    assert!(!reader.readable());
    assert!(reader.read(0).is_ok());
    assert_eq!(reader.contents(), "print 1");
}

#[test]
fn line_readers_accumulate_lines() {
    let mut reader = LineReader::new(Cursor::new("one\ntwo\n"));
    assert!(reader.readable());
    reader.read(0).unwrap();
    assert_eq!(reader.contents(), "one\n");
    reader.read(0).unwrap();
    assert_eq!(reader.contents(), "one\ntwo\n");
    assert!(reader.read(0).is_err(), "end of input must report an error");
    assert!(!reader.readable());
}

#[test]
fn line_reader_prompts_with_the_scope_depth() {
    let depths = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let recorded = depths.clone();
    let mut reader = LineReader::new(Cursor::new("a\nb\n"))
        .with_prompt(move |depth| recorded.borrow_mut().push(depth));
    reader.read(0).unwrap();
    reader.read(2).unwrap();
    assert_eq!(*depths.borrow(), vec![0, 2]);
}

/// An open block at the end of the buffer pulls the next chunk from a
/// readable reader, so multi-line constructs work interactively.
#[test]
fn parser_refills_inside_open_blocks() {
    let mut reader =
        LineReader::new(Cursor::new("if true then\n  set a to 1\nend if\n"));
    reader.read(0).unwrap(); // the driver reads the first line
    let mut loader = ModuleLoader::new();
    let mut reporter = CaptureReporter::new();
    let mut parser = Parser::new(ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: false,
    });
    let program = parser.statement();
    assert!(!parser.failed(), "errors: {:?}", reporter.errors());
    let StatementKind::Block(statements) = &program.kind else { panic!("not a block") };
    assert_eq!(statements.len(), 1);
    assert!(matches!(statements[0].kind, StatementKind::If { .. }));
}

#[test]
fn parser_refills_through_nested_blocks() {
    let mut reader = LineReader::new(Cursor::new(
        "repeat for i in 1...2\n  if i = 1 then\n    set a to i\n  end if\nend repeat\n",
    ));
    reader.read(0).unwrap();
    let mut loader = ModuleLoader::new();
    let mut reporter = CaptureReporter::new();
    let mut parser = Parser::new(ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: false,
    });
    let program = parser.statement();
    assert!(!parser.failed(), "errors: {:?}", reporter.errors());
    let StatementKind::Block(statements) = &program.kind else { panic!("not a block") };
    assert!(matches!(statements[0].kind, StatementKind::RepeatFor { .. }));
}

/// Without more input, an unterminated block is an ordinary parse error.
#[test]
fn unterminated_blocks_fail_on_fixed_input() {
    let mut reader = StringReader::new("if true then\n  set a to 1\n");
    let mut loader = ModuleLoader::new();
    let mut reporter = CaptureReporter::new();
    let mut parser = Parser::new(ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: false,
    });
    parser.statement();
    assert!(parser.failed());
}
