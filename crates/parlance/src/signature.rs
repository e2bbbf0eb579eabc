use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use crate::{
    location::SourceRange,
    report::{Error, messages},
    token::Token,
};

/// One binding slot inside an argument term: an optional name and an
/// optional declared type.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: Option<Token>,
    pub type_name: Option<Token>,
}

/// An argument term. A single target binds the incoming value directly;
/// multiple targets destructure it as a list.
#[derive(Debug, Clone)]
pub struct Argument {
    pub targets: Vec<Target>,
}

/// A set of interchangeable words, one of which must match.
#[derive(Debug, Clone)]
pub struct Choice {
    pub tokens: Vec<Token>,
}

impl Choice {
    /// The normalized spelling: lowercased alternatives joined by `/` in
    /// sorted order, so equivalent choices compare equal.
    #[must_use]
    pub fn name(&self) -> String {
        let mut words: Vec<String> =
            self.tokens.iter().map(|token| token.text.to_lowercase()).collect();
        words.sort();
        words.join("/")
    }
}

/// One term of a signature.
#[derive(Debug, Clone)]
pub enum Term {
    /// A keyword word that must match by lowercased text.
    Keyword(Token),
    /// A required choice between several words.
    Choice(Choice),
    /// An expression slot.
    Argument(Argument),
    /// An optional choice; matching may skip it entirely.
    Option(Choice),
}

impl Term {
    fn name(&self) -> String {
        match self {
            Self::Keyword(token) => token.text.to_lowercase(),
            Self::Choice(choice) => choice.name(),
            Self::Argument(_) => "{}".to_owned(),
            Self::Option(choice) => format!("({})", choice.name()),
        }
    }
}

/// The declaration pattern of a function: an ordered mix of keywords,
/// choices, options, and argument slots.
///
/// `add {value} to (the) list/queue {target}` has six terms. Signatures are
/// compared, hashed, and registered by their normalized [`name`](Self::name),
/// which lowercases keywords, sorts choice alternatives, parenthesizes
/// options, and renders every argument slot as `{}`.
#[derive(Debug, Clone)]
pub struct Signature {
    pub terms: Vec<Term>,
    pub type_name: Option<Token>,
    pub range: SourceRange,
}

impl Signature {
    /// Builds a signature by parsing a format string, e.g.
    /// `"(the) size (of) {value}"`.
    ///
    /// This runs the real scanner and parser over the text, so hosts declare
    /// natives with exactly the syntax scripts use for `function` headers.
    pub fn parse(format: &str) -> Result<Self, Error> {
        crate::parser::parse_signature_text(format)
    }

    /// The normalized name used for equality, hashing, and registration.
    #[must_use]
    pub fn name(&self) -> String {
        let names: Vec<String> = self.terms.iter().map(Term::name).collect();
        names.join(" ")
    }

    /// A debug rendering close to the declared source, including argument
    /// names and the result type.
    #[must_use]
    pub fn description(&self) -> String {
        let mut out = String::new();
        for (index, term) in self.terms.iter().enumerate() {
            if index > 0 {
                out.push(' ');
            }
            match term {
                Term::Keyword(token) => out.push_str(&token.text.to_lowercase()),
                Term::Choice(choice) => out.push_str(&choice.name()),
                Term::Option(choice) => {
                    out.push('(');
                    out.push_str(&choice.name());
                    out.push(')');
                }
                Term::Argument(argument) => {
                    out.push('{');
                    for (target_index, target) in argument.targets.iter().enumerate() {
                        if target_index > 0 {
                            out.push_str(", ");
                        }
                        if let Some(name) = &target.name {
                            out.push_str(&name.text);
                        }
                        if let Some(type_name) = &target.type_name {
                            out.push_str(": ");
                            out.push_str(&type_name.text);
                        }
                    }
                    out.push('}');
                }
            }
        }
        if let Some(type_name) = &self.type_name {
            out.push_str(" -> ");
            out.push_str(&type_name.text);
        }
        out
    }

    /// A signature is valid iff it contains at least one keyword or choice
    /// term. All-argument signatures would match any expression sequence.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.terms
            .iter()
            .any(|term| matches!(term, Term::Keyword(_) | Term::Choice(_)))
    }

    /// Whether the final term is an argument slot. Trailing arguments parse
    /// at full expression precedence during call matching.
    #[must_use]
    pub fn ends_with_argument(&self) -> bool {
        matches!(self.terms.last(), Some(Term::Argument(_)))
    }

    /// The argument terms in order.
    pub fn arguments(&self) -> impl Iterator<Item = &Argument> {
        self.terms.iter().filter_map(|term| match term {
            Term::Argument(argument) => Some(argument),
            _ => None,
        })
    }

    /// Checks for duplicate argument names, returning the offending name.
    #[must_use]
    pub fn duplicate_argument_name(&self) -> Option<&Token> {
        let mut seen: Vec<String> = Vec::new();
        for argument in self.arguments() {
            for target in &argument.targets {
                let Some(name) = &target.name else { continue };
                if name.text == "_" {
                    continue;
                }
                let lowered = name.text.to_lowercase();
                if seen.contains(&lowered) {
                    return Some(name);
                }
                seen.push(lowered);
            }
        }
        None
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Signature {}

impl PartialOrd for Signature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Signature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(&other.name())
    }
}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Convenience used by error paths that need a message for an invalid
/// signature declaration.
pub(crate) fn invalid_signature_error(range: SourceRange) -> Error {
    Error::new(range, messages::INVALID_FUNCTION_SIGNATURE)
}
