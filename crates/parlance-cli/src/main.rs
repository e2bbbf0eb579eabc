use std::{env, fs, io::Read, process::ExitCode};

use parlance::{
    Compiler, CompilerConfig, Core, CoreConfig, IoReporter, ModuleLoader, Parser, ParserConfig,
    StringReader, System, SystemConfig, VirtualMachine, messages, pretty_print,
};

struct Options {
    path: Option<String>,
    pretty: bool,
    #[cfg(debug_assertions)]
    trace_parse: bool,
}

fn usage(program: &str) -> ExitCode {
    eprintln!("Usage: {program} [options...] [file]");
    eprintln!(" -p, --pretty-print\t Print the reformatted source and exit");
    #[cfg(debug_assertions)]
    eprintln!("     --trace-parse\t Print parser events");
    eprintln!(" -h, --help\t\t Print this help and exit");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let arguments: Vec<String> = env::args().collect();
    let program = arguments.first().map_or("parlance", String::as_str);

    let mut options = Options {
        path: None,
        pretty: false,
        #[cfg(debug_assertions)]
        trace_parse: false,
    };
    for argument in &arguments[1..] {
        match argument.as_str() {
            "-p" | "--pretty-print" => options.pretty = true,
            #[cfg(debug_assertions)]
            "--trace-parse" => options.trace_parse = true,
            "-h" | "--help" => return usage(program),
            other if other.starts_with('-') => {
                eprintln!("unknown option: {other}");
                return usage(program);
            }
            other => options.path = Some(other.to_owned()),
        }
    }

    let (source, path) = match &options.path {
        Some(path) => match fs::read_to_string(path) {
            Ok(source) => (source, path.clone()),
            Err(error) => {
                eprintln!("error: can't open file {path}: {error}");
                return ExitCode::from(2);
            }
        },
        None => {
            let mut source = String::new();
            if let Err(error) = std::io::stdin().read_to_string(&mut source) {
                eprintln!("error: {error}");
                return ExitCode::from(2);
            }
            (source, "<stdin>".to_owned())
        }
    };

    run(&source, &path, &options)
}

fn run(source: &str, path: &str, options: &Options) -> ExitCode {
    let core = Core::new(CoreConfig::default());
    let system = System::new(SystemConfig::default());

    let mut reader = StringReader::new(source);
    let mut loader = ModuleLoader::new();
    let mut reporter = IoReporter::with_path(std::io::stderr(), path);
    let mut parser = Parser::new(ParserConfig {
        reader: &mut reader,
        module_provider: &mut loader,
        reporter: &mut reporter,
        #[cfg(debug_assertions)]
        enable_tracing: options.trace_parse,
    });
    parser.declare_all(core.signatures());
    parser.declare_all(system.signatures());

    let program = parser.statement();
    if parser.failed() {
        return ExitCode::from(2);
    }

    if options.pretty {
        print!("{}", pretty_print(&program));
        return ExitCode::SUCCESS;
    }

    let mut compiler = Compiler::new(CompilerConfig { reporter: &mut reporter, interactive: false });
    let Some(bytecode) = compiler.compile(&program) else {
        return ExitCode::from(2);
    };

    let mut vm = VirtualMachine::default();
    for (name, value) in core.values() {
        vm.add_global(name.clone(), value.clone());
    }
    for (name, value) in system.values() {
        vm.add_global(name.clone(), value.clone());
    }

    match vm.execute(&bytecode) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            let halted = error.what() == messages::PROGRAM_HALTED;
            eprintln!("{path}:{error}");
            if halted { ExitCode::from(130) } else { ExitCode::FAILURE }
        }
    }
}
