use std::{
    cell::RefCell,
    io::{BufRead, Write},
    rc::Rc,
};

use crate::{
    location::SourceRange,
    module::Module,
    object::{Native, Object},
    report::Error,
    signature::Signature,
    value::Value,
};

/// Shared output stream handle.
pub type OutputStream = Rc<RefCell<dyn Write>>;
/// Shared input stream handle.
pub type InputStream = Rc<RefCell<dyn BufRead>>;

/// Host streams for the System module. Tests swap these for in-memory
/// buffers to capture transcripts.
pub struct SystemConfig {
    pub out: OutputStream,
    pub err: OutputStream,
    pub input: InputStream,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            out: Rc::new(RefCell::new(std::io::stdout())),
            err: Rc::new(RefCell::new(std::io::stderr())),
            input: Rc::new(RefCell::new(std::io::stdin().lock())),
        }
    }
}

/// The I/O natives: printing, error output, and line input.
pub struct System {
    signatures: Vec<Signature>,
    values: Vec<(String, Value)>,
}

impl System {
    #[must_use]
    pub fn new(config: SystemConfig) -> Self {
        let mut system = Self { signatures: Vec::new(), values: Vec::new() };

        {
            let out = config.out.clone();
            system.add("print {value}", Native::new(move |context| {
                let text = context.argument(0).to_text();
                write_all(&out, &text, true)
            }));
        }
        {
            let out = config.out.clone();
            system.add("write {value}", Native::new(move |context| {
                let text = context.argument(0).to_text();
                write_all(&out, &text, false)
            }));
        }
        {
            let err = config.err.clone();
            system.add("write error {value}", Native::new(move |context| {
                let text = context.argument(0).to_text();
                write_all(&err, &text, true)
            }));
        }
        {
            let input = config.input.clone();
            system.add("read (a) line", Native::new(move |_context| {
                let mut line = String::new();
                match input.borrow_mut().read_line(&mut line) {
                    Ok(0) => Ok(Value::Empty),
                    Ok(_) => {
                        if line.ends_with('\n') {
                            line.pop();
                            if line.ends_with('\r') {
                                line.pop();
                            }
                        }
                        Ok(Value::from(line))
                    }
                    Err(error) => {
                        Err(Error::new(SourceRange::default(), format!("read failed: {error}")))
                    }
                }
            }));
        }

        system
    }

    fn add(&mut self, format: &str, native: Native) {
        let signature = Signature::parse(format).expect("system signature is well-formed");
        self.values
            .push((signature.name(), Value::Object(Rc::new(Object::Native(native)))));
        self.signatures.push(signature);
    }

    /// The signatures to declare with the parser.
    #[must_use]
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// The `(name, value)` pairs to install as VM globals.
    #[must_use]
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    /// Packages the module for a `use`-style import.
    #[must_use]
    pub fn module(&self) -> Module {
        let mut module = Module::new("system");
        for (signature, (name, value)) in self.signatures.iter().zip(self.values.iter()) {
            debug_assert_eq!(&signature.name(), name);
            module.export(signature.clone(), value.clone());
        }
        module
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new(SystemConfig::default())
    }
}

fn write_all(stream: &OutputStream, text: &str, newline: bool) -> Result<Value, Error> {
    let mut stream = stream.borrow_mut();
    let result = if newline {
        writeln!(stream, "{text}")
    } else {
        write!(stream, "{text}")
    };
    match result.and_then(|()| stream.flush()) {
        Ok(()) => Ok(Value::Empty),
        Err(error) => Err(Error::new(SourceRange::default(), format!("write failed: {error}"))),
    }
}
