//! Signature parsing, normalization, and trie registration.

use parlance::{Grammar, Signature};

#[test]
fn names_normalize_keywords_choices_options_and_arguments() {
    let signature = Signature::parse("Add {value} To (the) list/queue {target}").unwrap();
    assert_eq!(signature.name(), "add {} to (the) list/queue {}");
}

#[test]
fn choice_alternatives_sort_in_the_name() {
    let signature = Signature::parse("delete row/item {index}").unwrap();
    assert_eq!(signature.name(), "delete item/row {}");
}

#[test]
fn argument_names_do_not_affect_identity() {
    let a = Signature::parse("print {value}").unwrap();
    let b = Signature::parse("print {thing}").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.name(), b.name());
}

#[test]
fn all_argument_signatures_are_invalid() {
    assert!(Signature::parse("{a} {b}").is_err());
    assert!(Signature::parse("greet {who}").is_ok());
}

#[test]
fn result_type_annotations_parse() {
    let signature = Signature::parse("the answer -> integer").unwrap();
    assert_eq!(signature.type_name.as_ref().unwrap().text, "integer");
    // The result type is not part of the identity.
    assert_eq!(signature.name(), "the answer");
}

#[test]
fn destructuring_argument_slots_parse() {
    let signature = Signature::parse("swap {a, b}").unwrap();
    let arguments: Vec<_> = signature.arguments().collect();
    assert_eq!(arguments.len(), 1);
    assert_eq!(arguments[0].targets.len(), 2);
}

#[test]
fn ends_with_argument() {
    assert!(Signature::parse("print {value}").unwrap().ends_with_argument());
    assert!(!Signature::parse("{value} is even").unwrap().ends_with_argument());
}

/// Any two distinct accepted signatures have distinct normalized names:
/// the trie refuses the second insertion of an equivalent shape.
#[test]
fn trie_enforces_unique_normalized_names() {
    let mut grammar = Grammar::new();
    let mut accepted: Vec<Signature> = Vec::new();
    let candidates = [
        "print {value}",
        "print {thing}",
        "print (the) value {thing}",
        "the error",
        "The Error",
        "insert {value} into {target}",
    ];
    for candidate in candidates {
        let signature = Signature::parse(candidate).unwrap();
        if grammar.insert(&signature) {
            accepted.push(signature);
        }
    }
    for (index, a) in accepted.iter().enumerate() {
        for b in &accepted[index + 1..] {
            assert_ne!(a.name(), b.name(), "duplicate accepted: {}", a.name());
        }
    }
    assert_eq!(accepted.len(), 4);
}

#[test]
fn duplicate_argument_names_are_detected() {
    let signature = Signature::parse("pair {a} with {a}").unwrap();
    assert!(signature.duplicate_argument_name().is_some());
    let signature = Signature::parse("pair {a} with {b}").unwrap();
    assert!(signature.duplicate_argument_name().is_none());
}
