use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::signature::{Choice, Signature, Term};

/// A shared, mutable trie node. Nodes are reference-counted so the parser
/// can walk the trie while it still owns (and later extends) the root.
pub type GrammarNode = Rc<RefCell<Grammar>>;

/// A prefix tree over registered signatures.
///
/// Keyword and choice words become edges in [`terms`](Self::terms), keyed by
/// lowercased text. An argument slot becomes the single
/// [`argument`](Self::argument) edge, meaning "any primary expression here". A node
/// holding a [`signature`](Self::signature) is a terminal: the path from the
/// root spells that signature. Options insert both with and without their
/// edge, so matching never needs special option handling.
#[derive(Debug, Default)]
pub struct Grammar {
    pub argument: Option<GrammarNode>,
    pub terms: AHashMap<String, GrammarNode>,
    pub signature: Option<Signature>,
}

impl Grammar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a signature, descending the trie along its terms. Returns
    /// false when a signature with the same normalized shape was already
    /// registered (the existing registration is kept).
    pub fn insert(&mut self, signature: &Signature) -> bool {
        self.insert_from(signature, 0)
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.argument.is_none() && self.terms.is_empty()
    }

    fn insert_from(&mut self, signature: &Signature, index: usize) -> bool {
        let Some(term) = signature.terms.get(index) else {
            if self.signature.is_some() {
                return false;
            }
            self.signature = Some(signature.clone());
            return true;
        };
        match term {
            Term::Keyword(token) => self.insert_word(&token.text, signature, index),
            Term::Choice(choice) => self.insert_choice(choice, signature, index),
            Term::Argument(_) => {
                let child = self
                    .argument
                    .get_or_insert_with(|| Rc::new(RefCell::new(Self::new())));
                child.borrow_mut().insert_from(signature, index + 1)
            }
            Term::Option(choice) => {
                let mut result = self.insert_choice(choice, signature, index);
                // The optional path: continue inserting at this node as if
                // the option were absent.
                if !self.insert_from(signature, index + 1) {
                    result = false;
                }
                result
            }
        }
    }

    fn insert_word(&mut self, word: &str, signature: &Signature, index: usize) -> bool {
        let child = self
            .terms
            .entry(word.to_lowercase())
            .or_insert_with(|| Rc::new(RefCell::new(Self::new())));
        child.borrow_mut().insert_from(signature, index + 1)
    }

    fn insert_choice(&mut self, choice: &Choice, signature: &Signature, index: usize) -> bool {
        let mut result = true;
        for token in &choice.tokens {
            if !self.insert_word(&token.text, signature, index) {
                result = false;
            }
        }
        result
    }
}
