//! Shared harness for the integration tests: builds the full
//! scanner → parser → compiler → VM pipeline with the Core and System
//! modules installed, capturing output and diagnostics.

use std::{cell::RefCell, io::Cursor, rc::Rc};

use parlance::{
    CaptureReporter, Compiler, CompilerConfig, Core, CoreConfig, Error, ModuleLoader, Parser,
    ParserConfig, StringReader, System, SystemConfig, Value, VirtualMachine,
    VirtualMachineConfig,
};
use rand::SeedableRng;

/// An output sink that several handles can share.
#[derive(Clone, Default)]
pub struct SharedBuffer(pub Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Everything a test wants to know about one run.
pub struct Transcript {
    pub result: Result<Value, Error>,
    pub output: String,
    pub error_output: String,
    pub parse_errors: Vec<String>,
    pub vm: VirtualMachine,
}

pub fn run(source: &str) -> Transcript {
    run_with_input(source, "")
}

pub fn run_with_input(source: &str, input: &str) -> Transcript {
    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    let core = Core::new(CoreConfig { engine: rand::rngs::StdRng::seed_from_u64(7) });
    let system = System::new(SystemConfig {
        out: Rc::new(RefCell::new(out.clone())),
        err: Rc::new(RefCell::new(err.clone())),
        input: Rc::new(RefCell::new(Cursor::new(input.as_bytes().to_vec()))),
    });

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
    parser.declare_all(core.signatures());
    parser.declare_all(system.signatures());
    let program = parser.statement();
    let failed = parser.failed();
    drop(parser);
    let parse_errors: Vec<String> = reporter.errors().iter().map(Error::what).collect();
    if failed {
        return Transcript {
            result: Err(Error::new(
                parlance::SourceRange::default(),
                parse_errors.first().cloned().unwrap_or_else(|| "parse failed".to_owned()),
            )),
            output: out.contents(),
            error_output: err.contents(),
            parse_errors,
            vm: VirtualMachine::default(),
        };
    }

    let mut compile_reporter = CaptureReporter::new();
    let mut compiler =
        Compiler::new(CompilerConfig { reporter: &mut compile_reporter, interactive: false });
    let bytecode = compiler.compile(&program);
    drop(compiler);
    let compile_errors: Vec<String> =
        compile_reporter.errors().iter().map(Error::what).collect();

    let mut vm = VirtualMachine::new(VirtualMachineConfig::default());
    for (name, value) in core.values() {
        vm.add_global(name.clone(), value.clone());
    }
    for (name, value) in system.values() {
        vm.add_global(name.clone(), value.clone());
    }

    let result = match bytecode {
        Some(bytecode) => vm.execute(&bytecode),
        None => Err(Error::new(
            parlance::SourceRange::default(),
            compile_errors.first().cloned().unwrap_or_else(|| "compile failed".to_owned()),
        )),
    };
    Transcript {
        result,
        output: out.contents(),
        error_output: err.contents(),
        parse_errors: compile_errors,
        vm,
    }
}
