use std::{cell::RefCell, rc::Rc};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    module::Module,
    object::{Native, Object},
    report::messages,
    signature::Signature,
    value::Value,
};

/// Configuration for the Core module. The random engine is injected so
/// hosts (and tests) can seed it deterministically.
pub struct CoreConfig {
    pub engine: StdRng,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { engine: StdRng::from_entropy() }
    }
}

/// The language's built-in helpers: sizes, types, copies, containment,
/// random numbers, and access to the current error register.
pub struct Core {
    signatures: Vec<Signature>,
    values: Vec<(String, Value)>,
}

impl Core {
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        let mut core = Self { signatures: Vec::new(), values: Vec::new() };
        let engine = Rc::new(RefCell::new(config.engine));

        core.add("(the) size (of) {value}", Native::new(|context| {
            let value = context.argument(0);
            let size = match value.as_object().map(|object| object.as_ref()) {
                Some(Object::List(values)) => values.borrow().len() as i64,
                Some(Object::Dictionary(values)) => values.borrow().len() as i64,
                Some(Object::String(text)) => text.chars().count() as i64,
                Some(Object::Range(range)) => range.length(),
                _ => {
                    return Err(
                        context.argument_error(0, messages::EXPECTED_LIST_STRING_DICT_RANGE)
                    );
                }
            };
            Ok(Value::Integer(size))
        }));

        core.add("(the) type (of) {value}", Native::new(|context| {
            Ok(Value::from(context.argument(0).type_name()))
        }));

        core.add("the error", Native::new(|context| Ok(context.vm.error())));

        {
            let engine = engine.clone();
            core.add("random (number) up to {limit}", Native::new(move |context| {
                let Some(limit) = context.argument(0).as_integer() else {
                    return Err(context.argument_error(0, messages::EXPECTED_INTEGER));
                };
                if limit <= 0 {
                    return Err(context.argument_error(0, messages::VALUE_OUT_OF_RANGE));
                }
                Ok(Value::Integer(engine.borrow_mut().gen_range(0..limit)))
            }));
        }

        core.add("insert {value} into {container}", Native::new(|context| {
            let value = context.argument(0);
            let container = context.argument(1);
            let Some(object) = container.as_object() else {
                return Err(context.argument_error(1, messages::expected_list(&container.type_name())));
            };
            let Object::List(values) = object.as_ref() else {
                return Err(context.argument_error(1, messages::expected_list(&container.type_name())));
            };
            values.borrow_mut().push(value);
            let object = object.clone();
            context.vm.notify_container_mutation(&object);
            Ok(Value::Empty)
        }));

        core.add("{container} contains {value}", Native::new(|context| {
            let container = context.argument(0);
            let value = context.argument(1);
            let contained = match container.as_object().map(|object| object.as_ref()) {
                Some(Object::List(values)) => values.borrow().contains(&value),
                Some(Object::Dictionary(values)) => values.borrow().contains_key(&value),
                Some(Object::String(text)) => text.contains(&value.to_text()),
                Some(Object::Range(range)) => value
                    .as_integer()
                    .is_some_and(|candidate| range.item(candidate - range.start).is_some()),
                _ => {
                    return Err(
                        context.argument_error(0, messages::EXPECTED_LIST_STRING_DICT_RANGE)
                    );
                }
            };
            Ok(Value::Bool(contained))
        }));

        core.add("(a) copy (of) {value}", Native::new(|context| {
            let value = context.argument(0);
            let copied = match value.as_object().map(|object| object.as_ref()) {
                Some(Object::List(values)) => {
                    let values = values.borrow().clone();
                    Some(Value::from(context.vm.make_list(values)))
                }
                Some(Object::Dictionary(values)) => {
                    let values = values.borrow().clone();
                    Some(Value::from(context.vm.make_dictionary(values)))
                }
                // Immutable objects and immediates share or copy freely.
                _ => None,
            };
            Ok(copied.unwrap_or(value))
        }));

        core
    }

    fn add(&mut self, format: &str, native: Native) {
        let signature = Signature::parse(format).expect("core signature is well-formed");
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
        let mut module = Module::new("core");
        for (signature, (name, value)) in self.signatures.iter().zip(self.values.iter()) {
            debug_assert_eq!(&signature.name(), name);
            module.export(signature.clone(), value.clone());
        }
        module
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}
