use std::io::BufRead;

use crate::{
    location::SourceRange,
    report::Error,
};

/// A source of program text for the parser.
///
/// The parser asks a readable reader for more input when the current buffer
/// ends while a block is still open; this is how multi-line constructs work
/// at an interactive prompt. `scope_depth` is the current block nesting, so
/// an implementation can render a continuation prompt.
pub trait Reader {
    /// Whether the reader can supply more text.
    fn readable(&self) -> bool;

    /// Appends the next chunk of text to [`Reader::contents`].
    fn read(&mut self, scope_depth: u32) -> Result<(), Error>;

    /// The full text read so far.
    fn contents(&self) -> &str;
}

/// A reader over a fixed string. Never re-readable.
#[derive(Debug)]
pub struct StringReader {
    contents: String,
}

impl StringReader {
    pub fn new(contents: impl Into<String>) -> Self {
        Self { contents: contents.into() }
    }
}

impl Reader for StringReader {
    fn readable(&self) -> bool {
        false
    }

    fn read(&mut self, _scope_depth: u32) -> Result<(), Error> {
        Ok(())
    }

    fn contents(&self) -> &str {
        &self.contents
    }
}

/// A line-oriented reader that accumulates input one line at a time.
///
/// Used for interactive sessions: the parser calls [`Reader::read`] when a
/// block is unterminated, and the optional prompt callback receives the
/// current scope depth before each line is read.
pub struct LineReader<R: BufRead> {
    input: R,
    contents: String,
    at_end: bool,
    prompt: Option<Box<dyn FnMut(u32)>>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, contents: String::new(), at_end: false, prompt: None }
    }

    /// Installs a callback invoked with the scope depth before each read.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl FnMut(u32) + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }
}

impl<R: BufRead> Reader for LineReader<R> {
    fn readable(&self) -> bool {
        !self.at_end
    }

    fn read(&mut self, scope_depth: u32) -> Result<(), Error> {
        if let Some(prompt) = &mut self.prompt {
            prompt(scope_depth);
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => {
                self.at_end = true;
                Err(Error::new(SourceRange::default(), "unexpected end of input"))
            }
            Ok(_) => {
                self.contents.push_str(&line);
                Ok(())
            }
            Err(error) => {
                self.at_end = true;
                Err(Error::new(SourceRange::default(), format!("read failed: {error}")))
            }
        }
    }

    fn contents(&self) -> &str {
        &self.contents
    }
}
