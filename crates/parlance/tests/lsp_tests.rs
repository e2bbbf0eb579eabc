//! The annotation surface consumed by the language server: classified
//! source ranges and their LSP semantic-token encoding.

use parlance::{
    Annotation, AnnotationKind, CaptureReporter, ModuleLoader, Parser, ParserConfig, Signature,
    SourceAnnotator, SourceRange, StringReader, encode_semantic_tokens, semantic_token_type,
};

fn annotate(source: &str) -> Vec<Annotation> {
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
    let signature = Signature::parse("print {value}").unwrap();
    parser.declare(&signature);
    let program = parser.statement();
    let failed = parser.failed();
    let comments = parser.comment_ranges().to_vec();
    let keywords = parser.keyword_ranges().to_vec();
    let operators = parser.operator_ranges().to_vec();
    drop(parser);
    assert!(!failed, "parse failed: {:?}", reporter.errors());
    SourceAnnotator::new().annotate(&program, &comments, &keywords, &operators)
}

fn kinds_at(annotations: &[Annotation], source: &str) -> Vec<(String, AnnotationKind)> {
    annotations
        .iter()
        .map(|annotation| {
            let text =
                source[annotation.range.start.offset..annotation.range.end.offset].to_owned();
            (text, annotation.kind)
        })
        .collect()
}

#[test]
fn classifies_keywords_variables_numbers_and_comments() {
    let source = "set total to 1 + 2 -- tally\n";
    let annotations = annotate(source);
    let classified = kinds_at(&annotations, source);
    assert!(classified.contains(&("set".to_owned(), AnnotationKind::Keyword)));
    assert!(classified.contains(&("to".to_owned(), AnnotationKind::Keyword)));
    assert!(classified.contains(&("total".to_owned(), AnnotationKind::Variable)));
    assert!(classified.contains(&("1".to_owned(), AnnotationKind::Number)));
    assert!(classified.contains(&("+".to_owned(), AnnotationKind::Operator)));
    assert!(classified.contains(&("-- tally".to_owned(), AnnotationKind::Comment)));
}

#[test]
fn annotations_sort_by_source_position() {
    let source = "set a to 1\nset b to 2\n";
    let annotations = annotate(source);
    let mut offsets: Vec<usize> =
        annotations.iter().map(|annotation| annotation.range.start.offset).collect();
    let sorted = {
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted
    };
    assert_eq!(offsets, sorted);
    offsets.dedup();
    assert!(!offsets.is_empty());
}

#[test]
fn call_words_classify_as_functions() {
    let source = "print 42\n";
    let annotations = annotate(source);
    let classified = kinds_at(&annotations, source);
    assert!(classified.contains(&("print".to_owned(), AnnotationKind::Function)));
    assert!(classified.contains(&("42".to_owned(), AnnotationKind::Number)));
}

#[test]
fn strings_and_interpolations_classify_as_strings() {
    let source = "print \"Hi, {name}!\"\n";
    let annotations = annotate(source);
    let classified = kinds_at(&annotations, source);
    assert!(classified.contains(&("\"Hi, {".to_owned(), AnnotationKind::String)));
    assert!(classified.contains(&("name".to_owned(), AnnotationKind::Variable)));
    assert!(classified.contains(&("}!\"".to_owned(), AnnotationKind::String)));
}

#[test]
fn semantic_tokens_delta_encode() {
    let source = "set a to 1\n";
    // set(0..3) Keyword, a(4..5) Variable, to(6..8) Keyword, 1(9..10) Number
    let annotations = annotate(source);
    let encoded = encode_semantic_tokens(source, &annotations);
    assert_eq!(encoded.len() % 5, 0);
    let rows: Vec<&[u32]> = encoded.chunks(5).collect();
    assert_eq!(rows[0], &[0, 0, 3, semantic_token_type(AnnotationKind::Keyword), 0]);
    assert_eq!(rows[1], &[0, 4, 1, semantic_token_type(AnnotationKind::Variable), 0]);
    assert_eq!(rows[2], &[0, 2, 2, semantic_token_type(AnnotationKind::Keyword), 0]);
    assert_eq!(rows[3], &[0, 3, 1, semantic_token_type(AnnotationKind::Number), 0]);
}

#[test]
fn delta_lines_reset_the_column() {
    let source = "set a to 1\nset b to 2\n";
    let annotations = annotate(source);
    let encoded = encode_semantic_tokens(source, &annotations);
    let rows: Vec<&[u32]> = encoded.chunks(5).collect();
    // The first token of line 1 carries delta_line = 1 and an absolute column.
    let second_line = rows.iter().find(|row| row[0] == 1).expect("a second-line token");
    assert_eq!(second_line[1], 0, "columns restart after a line delta");
}

/// Columns on the wire are code points, not UTF-8 bytes.
#[test]
fn non_ascii_columns_count_code_points() {
    let source = "set ané to 1\n";
    let annotations = annotate(source);
    let encoded = encode_semantic_tokens(source, &annotations);
    let rows: Vec<&[u32]> = encoded.chunks(5).collect();
    // set(3) ané(3 code points) to(2) 1(1)
    assert_eq!(rows[0][2], 3);
    assert_eq!(rows[1][1], 4, "variable starts at code-point column 4");
    assert_eq!(rows[1][2], 3, "ané is three code points");
    // "to" follows at code-point column 8 (byte column 9).
    assert_eq!(rows[2][1], 4);
}

#[test]
fn empty_annotations_encode_to_nothing() {
    assert!(encode_semantic_tokens("", &[]).is_empty());
    let zero_width = Annotation::new(SourceRange::default(), AnnotationKind::Keyword);
    assert!(encode_semantic_tokens("x", &[zero_width]).is_empty());
}
