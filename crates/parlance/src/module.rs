use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::{
    location::SourceRange,
    report::{Error, messages},
    signature::Signature,
    value::Value,
};

/// A loadable module: the signatures it exports for parsing, and the values
/// (functions, natives, constants) the compiler installs under them.
#[derive(Debug, Default)]
pub struct Module {
    name: String,
    signatures: Vec<Signature>,
    values: Vec<(String, Value)>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), signatures: Vec::new(), values: Vec::new() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exports `value` under `signature`. The value is registered by the
    /// signature's normalized name, which is also how call sites resolve it.
    pub fn export(&mut self, signature: Signature, value: Value) {
        self.values.push((signature.name(), value));
        self.signatures.push(signature);
    }

    /// Exports a plain named value with no callable signature.
    pub fn export_value(&mut self, name: impl Into<String>, value: Value) {
        self.values.push((name.into(), value));
    }

    #[must_use]
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    #[must_use]
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }
}

/// Resolves module names for `use` and `using` statements.
pub trait ModuleProvider {
    fn module(&mut self, name: &str, range: SourceRange) -> Result<Rc<Module>, Error>;
}

/// A registry-backed module provider.
///
/// Hosts register modules up front; `module()` hands them out and guards
/// against re-entrant loads. File-system search lives outside the core; an
/// embedding loader calls [`begin_loading`](Self::begin_loading) around its
/// own recursive load to get circular-import detection.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    modules: AHashMap<String, Rc<Module>>,
    loading: AHashSet<String>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) {
        self.modules.insert(module.name().to_owned(), Rc::new(module));
    }

    /// Marks `name` as being loaded. Returns false when the module is
    /// already mid-load, i.e. the import chain is circular.
    pub fn begin_loading(&mut self, name: &str) -> bool {
        self.loading.insert(name.to_owned())
    }

    pub fn end_loading(&mut self, name: &str) {
        self.loading.remove(name);
    }
}

impl ModuleProvider for ModuleLoader {
    fn module(&mut self, name: &str, range: SourceRange) -> Result<Rc<Module>, Error> {
        if self.loading.contains(name) {
            return Err(Error::new(range, messages::CIRCULAR_MODULE_IMPORT));
        }
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(range, messages::module_not_found(name)))
    }
}
