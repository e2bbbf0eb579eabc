//! The tracked-container collector: debt accounting, threshold behavior,
//! cycle reclamation, and safety of collections triggered inside natives.

mod common;

use std::{cell::Cell, rc::Rc};

use parlance::{
    CaptureReporter, Compiler, CompilerConfig, Core, CoreConfig, ForeignObject, ModuleLoader,
    Native, Object, Parser, ParserConfig, Signature, StringReader, System, SystemConfig, Value,
    VirtualMachine, VirtualMachineConfig,
};
use rand::SeedableRng;

fn tight_config() -> VirtualMachineConfig {
    VirtualMachineConfig {
        initial_garbage_collection_threshold_bytes: 0,
        minimum_garbage_collection_threshold_bytes: 0,
        garbage_collection_growth_factor: 1.0,
    }
}

/// A host object that counts its live instances, so tests can observe
/// exactly when the collector frees container interiors.
struct TrackingObject {
    counter: Rc<Cell<i64>>,
}

impl TrackingObject {
    fn new(counter: &Rc<Cell<i64>>) -> Self {
        counter.set(counter.get() + 1);
        Self { counter: counter.clone() }
    }
}

impl Drop for TrackingObject {
    fn drop(&mut self) {
        self.counter.set(self.counter.get() - 1);
    }
}

impl ForeignObject for TrackingObject {
    fn type_name(&self) -> String {
        "tracking object".to_owned()
    }

    fn description(&self) -> String {
        "tracking object".to_owned()
    }
}

#[test]
fn tracks_allocation_debt_on_new_containers() {
    let mut vm = VirtualMachine::new(VirtualMachineConfig {
        initial_garbage_collection_threshold_bytes: 1024,
        minimum_garbage_collection_threshold_bytes: 256,
        garbage_collection_growth_factor: 1.0,
    });
    assert_eq!(vm.bytes_since_last_collection(), 0);

    let list = vm.make_list(vec![Value::Integer(1); 16]);
    vm.notify_container_mutation(&list);
    vm.service_garbage_collection();
    assert!(vm.current_tracked_bytes() > 0);

    let dictionary = vm.make_dictionary(parlance::ValueMap::default());
    if let Object::Dictionary(values) = dictionary.as_ref() {
        values.borrow_mut().insert(Value::Integer(1), Value::Integer(2));
    }
    vm.notify_container_mutation(&dictionary);
    vm.service_garbage_collection();
    assert!(vm.current_tracked_bytes() >= size_of::<Object>());
}

#[test]
fn reports_lower_tracked_bytes_after_reclaim() {
    let mut vm = VirtualMachine::new(VirtualMachineConfig {
        initial_garbage_collection_threshold_bytes: 64 * 1024,
        minimum_garbage_collection_threshold_bytes: 32,
        garbage_collection_growth_factor: 1.0,
    });

    {
        let list = vm.make_list(vec![Value::Integer(42); 16]);
        vm.notify_container_mutation(&list);
        assert!(vm.current_tracked_bytes() > 0);
    }

    vm.service_garbage_collection();
    assert_eq!(vm.current_tracked_bytes(), 0);
}

#[test]
fn mutation_notifications_increase_debt() {
    let mut vm = VirtualMachine::new(VirtualMachineConfig {
        initial_garbage_collection_threshold_bytes: 512,
        minimum_garbage_collection_threshold_bytes: 128,
        garbage_collection_growth_factor: 1.0,
    });

    let list = vm.make_list(Vec::new());
    let debt_before = vm.bytes_since_last_collection();
    let collections_before = vm.garbage_collection_count();

    if let Object::List(values) = list.as_ref() {
        let mut values = values.borrow_mut();
        for index in 0..64 {
            values.push(Value::Integer(index));
        }
    }
    vm.notify_container_mutation(&list);

    assert!(
        vm.bytes_since_last_collection() > debt_before
            || vm.garbage_collection_count() > collections_before,
        "growing a container must add debt or trigger a collection"
    );

    let mut iterations = 0;
    while vm.garbage_collection_count() == collections_before && iterations < 8 {
        if let Object::List(values) = list.as_ref() {
            values.borrow_mut().extend(std::iter::repeat_n(Value::Integer(iterations), 32));
        }
        vm.notify_container_mutation(&list);
        iterations += 1;
    }
    vm.service_garbage_collection();
    assert!(vm.garbage_collection_count() > collections_before);
}

#[test]
fn threshold_adapts_after_collection() {
    let mut vm = VirtualMachine::new(VirtualMachineConfig {
        initial_garbage_collection_threshold_bytes: 0,
        minimum_garbage_collection_threshold_bytes: 1,
        garbage_collection_growth_factor: 2.0,
    });
    let _live = vm.make_list(vec![Value::Integer(0); 64]);
    vm.service_garbage_collection();
    // With live bytes and a growth factor of 2, the next threshold exceeds
    // the minimum, so a tiny new allocation no longer collects immediately.
    let collections = vm.garbage_collection_count();
    let _small = vm.make_list(vec![Value::Integer(1)]);
    assert_eq!(vm.garbage_collection_count(), collections);
}

#[test]
fn reclaims_cycles_through_clear_and_refcount() {
    let counter = Rc::new(Cell::new(0));
    let mut vm = VirtualMachine::new(tight_config());

    {
        let a = vm.make_list(Vec::new());
        let b = vm.make_list(Vec::new());
        let tracker = vm.make_foreign(Box::new(TrackingObject::new(&counter)));
        assert_eq!(counter.get(), 1);

        if let Object::List(values) = a.as_ref() {
            values.borrow_mut().push(Value::from(b.clone()));
            values.borrow_mut().push(Value::from(tracker));
        }
        if let Object::List(values) = b.as_ref() {
            values.borrow_mut().push(Value::from(a.clone()));
        }
        vm.notify_container_mutation(&a);
        vm.notify_container_mutation(&b);
        // Still externally held: the cycle must survive this collection.
        vm.service_garbage_collection();
        assert_eq!(counter.get(), 1);
    }

    // All outer handles dropped; only the a <-> b cycle remains.
    vm.service_garbage_collection();
    assert_eq!(counter.get(), 0, "the collector must break the cycle");
    vm.service_garbage_collection();
    assert_eq!(vm.current_tracked_bytes(), 0);
}

fn run_with_native(
    source: &str,
    signature: &str,
    native: Native,
    config: VirtualMachineConfig,
) -> (VirtualMachine, Result<Value, parlance::Error>) {
    let core = Core::new(CoreConfig { engine: rand::rngs::StdRng::seed_from_u64(7) });
    let out = common::SharedBuffer::default();
    let system = System::new(SystemConfig {
        out: Rc::new(std::cell::RefCell::new(out.clone())),
        err: Rc::new(std::cell::RefCell::new(common::SharedBuffer::default())),
        input: Rc::new(std::cell::RefCell::new(std::io::Cursor::new(Vec::new()))),
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
    let parsed_signature = Signature::parse(signature).unwrap();
    parser.declare(&parsed_signature);
    let program = parser.statement();
    let failed = parser.failed();
    drop(parser);
    assert!(!failed, "parse failed: {:?}", reporter.errors());

    let mut compile_reporter = CaptureReporter::new();
    let mut compiler =
        Compiler::new(CompilerConfig { reporter: &mut compile_reporter, interactive: false });
    let bytecode = compiler.compile(&program).expect("compiles");
    drop(compiler);

    let mut vm = VirtualMachine::new(config);
    for (name, value) in core.values() {
        vm.add_global(name.clone(), value.clone());
    }
    for (name, value) in system.values() {
        vm.add_global(name.clone(), value.clone());
    }
    vm.add_global(
        parsed_signature.name(),
        Value::Object(Rc::new(Object::Native(native))),
    );

    let result = vm.execute(&bytecode);
    (vm, result)
}

/// A native allocates a list, mutates it, and services the collector before
/// returning: the allocation it still holds must survive.
#[test]
fn preserves_native_allocations_during_call() {
    let native = Native::new(|context| {
        let list = context.vm.make_list(Vec::new());
        if let Object::List(values) = list.as_ref() {
            values.borrow_mut().push(Value::Integer(1));
        }
        context.vm.notify_container_mutation(&list);
        context.vm.service_garbage_collection();
        Ok(Value::from(list))
    });

    let (vm, result) =
        run_with_native("set rows to transient list\nrows\n", "transient list", native, tight_config());
    assert!(result.is_ok(), "error: {:?}", result.err());
    assert!(vm.garbage_collection_count() > 0);

    let rows = vm.it();
    let rows = rows.as_object().expect("rows is a list");
    let Object::List(values) = rows.as_ref() else { panic!("rows is not a list") };
    assert_eq!(*values.borrow(), vec![Value::Integer(1)]);
}

/// A native allocates scratch containers it does not return; once nothing
/// roots them, a collection frees everything they held.
#[test]
fn releases_transient_allocations_without_roots() {
    let counter = Rc::new(Cell::new(0));
    let native = {
        let counter = counter.clone();
        Native::new(move |context| {
            let tracker = context.vm.make_foreign(Box::new(TrackingObject::new(&counter)));
            let list = context.vm.make_list(vec![Value::from(tracker)]);
            context.vm.notify_container_mutation(&list);
            context.vm.service_garbage_collection();
            Ok(Value::Empty)
        })
    };

    let (mut vm, result) =
        run_with_native("transient scratch\n", "transient scratch", native, tight_config());
    assert!(result.is_ok(), "error: {:?}", result.err());
    vm.service_garbage_collection();
    assert_eq!(counter.get(), 0, "nothing roots the scratch list after the call");
}
