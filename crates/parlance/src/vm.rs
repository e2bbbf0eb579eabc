use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use crate::{
    bytecode::{Bytecode, Opcode},
    location::{SourceLocation, SourceRange},
    object::{EnumerationItem, ForeignObject, NativeCallContext, Object, ValueMap},
    report::{Error, messages},
    value::Value,
};

/// Tunables for the tracked-container collector.
#[derive(Debug, Clone, Copy)]
pub struct VirtualMachineConfig {
    /// Debt level that triggers the first collection.
    pub initial_garbage_collection_threshold_bytes: usize,
    /// Lower bound for the adaptive threshold.
    pub minimum_garbage_collection_threshold_bytes: usize,
    /// Threshold multiplier applied to live tracked bytes after each
    /// collection. Must be at least 1.0.
    pub garbage_collection_growth_factor: f64,
}

impl Default for VirtualMachineConfig {
    fn default() -> Self {
        Self {
            initial_garbage_collection_threshold_bytes: 256 * 1024,
            minimum_garbage_collection_threshold_bytes: 64 * 1024,
            garbage_collection_growth_factor: 1.5,
        }
    }
}

/// One activation record.
#[derive(Debug)]
struct CallFrame {
    bytecode: Rc<Bytecode>,
    ip: usize,
    /// Absolute operand-stack slots for each of the function's captures,
    /// resolved against the calling frame when this frame was pushed.
    captures: Vec<usize>,
    /// Operand-stack base: locals live at `sp + slot`.
    sp: usize,
    /// Installed `try` handler targets, innermost last.
    jumps: SmallVec<[usize; 4]>,
    /// Stack heights matching `jumps`, restored when a handler fires.
    sps: SmallVec<[usize; 4]>,
    /// The error caught by the innermost `try`, if any.
    error: Value,
    /// The implicit `it` register.
    it: Value,
}

impl CallFrame {
    fn new(bytecode: Rc<Bytecode>, captures: Vec<usize>, sp: usize) -> Self {
        Self {
            bytecode,
            ip: 0,
            captures,
            sp,
            jumps: SmallVec::new(),
            sps: SmallVec::new(),
            error: Value::Empty,
            it: Value::Empty,
        }
    }
}

#[derive(Debug)]
struct TrackedContainer {
    object: Weak<Object>,
    bytes: usize,
}

enum Step {
    Continue,
    Finished(Value),
}

/// The stack virtual machine.
///
/// A single operand stack of values, a call-frame stack, a global table,
/// and the tracked-container collector. Immutable objects (strings,
/// functions, natives, ranges, enumerators) live purely by reference
/// counting; lists and dictionaries created through [`make`](Self::make)
/// are additionally registered with the collector so unreachable cycles
/// can be reclaimed.
pub struct VirtualMachine {
    pub config: VirtualMachineConfig,

    halt_requested: Arc<AtomicBool>,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: AHashMap<String, Value>,
    exports: AHashMap<String, Value>,
    it: Value,

    tracked_containers: AHashMap<usize, TrackedContainer>,
    bytes_since_last_collection: usize,
    current_tracked_bytes: usize,
    garbage_collection_count: usize,
    collection_threshold: usize,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(VirtualMachineConfig::default())
    }
}

impl VirtualMachine {
    #[must_use]
    pub fn new(config: VirtualMachineConfig) -> Self {
        Self {
            halt_requested: Arc::new(AtomicBool::new(false)),
            stack: Vec::new(),
            frames: Vec::new(),
            globals: AHashMap::new(),
            exports: AHashMap::new(),
            it: Value::Empty,
            tracked_containers: AHashMap::new(),
            bytes_since_last_collection: 0,
            current_tracked_bytes: 0,
            garbage_collection_count: 0,
            collection_threshold: config.initial_garbage_collection_threshold_bytes,
            config,
        }
    }

    /// Requests that execution stop. Safe to call from another thread via
    /// [`halt_handle`](Self::halt_handle); the dispatcher checks the flag
    /// once per opcode.
    pub fn request_halt(&self) {
        self.halt_requested.store(true, Ordering::Relaxed);
    }

    /// A handle to the halt flag, for installing in a signal handler.
    #[must_use]
    pub fn halt_handle(&self) -> Arc<AtomicBool> {
        self.halt_requested.clone()
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn add_globals<I: IntoIterator<Item = (String, Value)>>(&mut self, globals: I) {
        for (name, value) in globals {
            self.globals.insert(name, value);
        }
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    #[must_use]
    pub fn globals(&self) -> &AHashMap<String, Value> {
        &self.globals
    }

    pub fn add_export(&mut self, name: impl Into<String>, value: Value) {
        self.exports.insert(name.into(), value);
    }

    #[must_use]
    pub fn exports(&self) -> &AHashMap<String, Value> {
        &self.exports
    }

    /// The implicit `it` register of the innermost frame (the last value an
    /// expression statement produced).
    #[must_use]
    pub fn it(&self) -> Value {
        self.frames.last().map_or_else(|| self.it.clone(), |frame| frame.it.clone())
    }

    /// The error caught by the innermost `try` of the current frame.
    #[must_use]
    pub fn error(&self) -> Value {
        self.frames.last().map(|frame| frame.error.clone()).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Allocation and garbage collection
    // ------------------------------------------------------------------

    /// Allocates an object through the VM. Mutable containers (lists and
    /// dictionaries) are registered with the cycle collector and count
    /// toward the allocation debt; other objects are plain reference
    /// counted.
    pub fn make(&mut self, object: Object) -> Rc<Object> {
        let object = Rc::new(object);
        if object.is_tracked_container() {
            let bytes = object.estimated_size();
            let pointer = Rc::as_ptr(&object) as usize;
            self.tracked_containers
                .insert(pointer, TrackedContainer { object: Rc::downgrade(&object), bytes });
            self.bytes_since_last_collection =
                self.bytes_since_last_collection.saturating_add(bytes);
            self.current_tracked_bytes = self.current_tracked_bytes.saturating_add(bytes);
            self.collect_if_indebted();
        }
        object
    }

    pub fn make_string(&mut self, string: impl Into<String>) -> Rc<Object> {
        self.make(Object::String(string.into()))
    }

    pub fn make_list(&mut self, values: Vec<Value>) -> Rc<Object> {
        self.make(Object::List(RefCell::new(values)))
    }

    pub fn make_dictionary(&mut self, values: ValueMap) -> Rc<Object> {
        self.make(Object::Dictionary(RefCell::new(values)))
    }

    pub fn make_foreign(&mut self, foreign: Box<dyn ForeignObject>) -> Rc<Object> {
        self.make(Object::Foreign(foreign))
    }

    /// Tells the collector that a tracked container changed size. The
    /// container's byte estimate is refreshed and growth is added to the
    /// allocation debt.
    pub fn notify_container_mutation(&mut self, object: &Rc<Object>) {
        if !object.is_tracked_container() {
            return;
        }
        let pointer = Rc::as_ptr(object) as usize;
        let bytes = object.estimated_size();
        if let Some(entry) = self.tracked_containers.get_mut(&pointer) {
            let previous = entry.bytes;
            entry.bytes = bytes;
            if bytes > previous {
                let growth = bytes - previous;
                self.bytes_since_last_collection =
                    self.bytes_since_last_collection.saturating_add(growth);
                self.current_tracked_bytes = self.current_tracked_bytes.saturating_add(growth);
            } else {
                self.current_tracked_bytes =
                    self.current_tracked_bytes.saturating_sub(previous - bytes);
            }
        } else {
            // A container that was built outside the allocator; adopt it.
            self.tracked_containers
                .insert(pointer, TrackedContainer { object: Rc::downgrade(object), bytes });
            self.bytes_since_last_collection =
                self.bytes_since_last_collection.saturating_add(bytes);
            self.current_tracked_bytes = self.current_tracked_bytes.saturating_add(bytes);
        }
        self.collect_if_indebted();
    }

    #[must_use]
    pub fn bytes_since_last_collection(&self) -> usize {
        self.bytes_since_last_collection
    }

    #[must_use]
    pub fn current_tracked_bytes(&self) -> usize {
        self.current_tracked_bytes
    }

    #[must_use]
    pub fn garbage_collection_count(&self) -> usize {
        self.garbage_collection_count
    }

    fn collect_if_indebted(&mut self) {
        if self.bytes_since_last_collection >= self.collection_threshold {
            self.service_garbage_collection();
        }
    }

    /// Runs a full mark-sweep over the tracked containers.
    ///
    /// Roots are every value on the operand stack, every frame's `it` and
    /// error registers, the globals and exports tables, the VM-level `it`,
    /// and any tracked container with references from outside the tracked
    /// set (for example a handle a native function still holds). Unreached
    /// containers have their interiors cleared, which releases the
    /// references keeping a cycle alive; ordinary reference counting then
    /// frees the members.
    pub fn service_garbage_collection(&mut self) {
        self.garbage_collection_count += 1;
        self.tracked_containers.retain(|_, entry| entry.object.strong_count() > 0);

        // References between tracked containers; anything above this count
        // is an external handle and roots the container.
        let mut internal_references: AHashMap<usize, usize> = AHashMap::new();
        for entry in self.tracked_containers.values() {
            let Some(object) = entry.object.upgrade() else { continue };
            object.trace(&mut |child| {
                let pointer = Rc::as_ptr(child) as usize;
                if self.tracked_containers.contains_key(&pointer) {
                    *internal_references.entry(pointer).or_insert(0) += 1;
                }
            });
        }

        let mut worklist: Vec<Rc<Object>> = Vec::new();
        let push_value = |worklist: &mut Vec<Rc<Object>>, value: &Value| {
            if let Value::Object(object) = value {
                worklist.push(object.clone());
            }
        };
        for value in &self.stack {
            push_value(&mut worklist, value);
        }
        for frame in &self.frames {
            push_value(&mut worklist, &frame.it);
            push_value(&mut worklist, &frame.error);
        }
        push_value(&mut worklist, &self.it);
        for value in self.globals.values() {
            push_value(&mut worklist, value);
        }
        for value in self.exports.values() {
            push_value(&mut worklist, value);
        }
        for (pointer, entry) in &self.tracked_containers {
            let Some(object) = entry.object.upgrade() else { continue };
            // One strong count belongs to the upgrade itself. Root-gathering
            // clones above only duplicate objects that are roots already.
            let external = Rc::strong_count(&object) - 1;
            let internal = internal_references.get(pointer).copied().unwrap_or(0);
            if external > internal {
                worklist.push(object);
            }
        }

        let mut visited: AHashSet<usize> = AHashSet::new();
        while let Some(object) = worklist.pop() {
            let pointer = Rc::as_ptr(&object) as usize;
            if !visited.insert(pointer) {
                continue;
            }
            object.trace(&mut |child| worklist.push(child.clone()));
        }

        let unreachable: Vec<Rc<Object>> = self
            .tracked_containers
            .iter()
            .filter(|(pointer, _)| !visited.contains(*pointer))
            .filter_map(|(_, entry)| entry.object.upgrade())
            .collect();
        for object in &unreachable {
            object.clear_interior();
        }
        drop(unreachable);

        self.tracked_containers.retain(|_, entry| entry.object.strong_count() > 0);
        let mut total = 0;
        for entry in self.tracked_containers.values_mut() {
            if let Some(object) = entry.object.upgrade() {
                entry.bytes = object.estimated_size();
                total += entry.bytes;
            }
        }
        self.current_tracked_bytes = total;
        self.bytes_since_last_collection = 0;
        let factor = self.config.garbage_collection_growth_factor.max(1.0);
        let grown = (self.current_tracked_bytes as f64 * factor) as usize;
        self.collection_threshold =
            grown.max(self.config.minimum_garbage_collection_threshold_bytes);
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Runs a compiled program to completion, returning the value of its
    /// final `Return`.
    pub fn execute(&mut self, bytecode: &Rc<Bytecode>) -> Result<Value, Error> {
        self.stack.clear();
        self.frames.clear();
        self.stack.push(Value::Empty);
        self.frames.push(CallFrame::new(bytecode.clone(), Vec::new(), 0));
        self.run()
    }

    fn run(&mut self) -> Result<Value, Error> {
        loop {
            if self.halt_requested.swap(false, Ordering::Relaxed) {
                let range = SourceRange::at(self.current_location());
                self.unwind_all();
                return Err(Error::new(range, messages::PROGRAM_HALTED));
            }
            let offset = self.frame().ip;
            let byte = {
                let frame = self.frame_mut();
                let byte = frame.bytecode.code()[frame.ip];
                frame.ip += 1;
                byte
            };
            let Some(opcode) = Opcode::from_repr(byte) else {
                let range = self.op_range(offset);
                self.unwind_all();
                return Err(Error::new(range, format!("invalid opcode {byte:#04x}")));
            };
            match self.step(opcode, offset) {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(value)) => return Ok(value),
                Err(error) => {
                    if let Some(fatal) = self.catch(error) {
                        return Err(fatal);
                    }
                }
            }
        }
    }

    /// Routes an error to the innermost installed `try` handler, unwinding
    /// frames as needed. Returns the error when no handler exists.
    fn catch(&mut self, error: Error) -> Option<Error> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Some(error);
            };
            let sp = frame.sp;
            if let (Some(handler), Some(height)) = (frame.jumps.pop(), frame.sps.pop()) {
                frame.ip = handler;
                frame.error = error.value;
                self.stack.truncate(height);
                return None;
            }
            if self.frames.len() == 1 {
                self.unwind_all();
                return Some(error);
            }
            self.frames.pop();
            self.stack.truncate(sp);
        }
    }

    fn unwind_all(&mut self) {
        self.frames.clear();
        self.stack.clear();
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("the VM always runs with at least one frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("the VM always runs with at least one frame")
    }

    fn current_location(&self) -> SourceLocation {
        let frame = self.frame();
        frame.bytecode.location(frame.ip)
    }

    fn op_range(&self, offset: usize) -> SourceRange {
        SourceRange::at(self.frame().bytecode.location(offset))
    }

    fn fetch_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let argument = frame.bytecode.read_u16(frame.ip);
        frame.ip += 2;
        argument
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    fn step(&mut self, opcode: Opcode, offset: usize) -> Result<Step, Error> {
        match opcode {
            Opcode::Jump => {
                let distance = usize::from(self.fetch_u16());
                self.frame_mut().ip += distance;
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let distance = usize::from(self.fetch_u16());
                let Some(condition) = self.stack.last().and_then(Value::as_bool) else {
                    return Err(Error::new(self.op_range(offset), messages::EXPECTED_TRUE_OR_FALSE));
                };
                let jump_on = opcode == Opcode::JumpIfTrue;
                if condition == jump_on {
                    self.frame_mut().ip += distance;
                }
            }
            Opcode::JumpIfAtEnd => {
                let distance = usize::from(self.fetch_u16());
                let at_end = match self.stack.last().and_then(Value::as_object) {
                    Some(object) => match object.as_ref() {
                        Object::Enumerator(enumerator) => enumerator.borrow().is_at_end(),
                        _ => {
                            return Err(Error::new(
                                self.op_range(offset),
                                messages::EXPECTED_ENUMERATOR,
                            ));
                        }
                    },
                    None => {
                        return Err(Error::new(
                            self.op_range(offset),
                            messages::EXPECTED_ENUMERATOR,
                        ));
                    }
                };
                if at_end {
                    self.frame_mut().ip += distance;
                }
            }
            Opcode::Repeat => {
                let distance = usize::from(self.fetch_u16());
                self.frame_mut().ip -= distance;
            }
            Opcode::Pop => {
                self.pop();
            }
            Opcode::Constant => {
                let index = usize::from(self.fetch_u16());
                let value = self.frame().bytecode.constants().get(index).cloned();
                self.stack.push(value.unwrap_or_default());
            }
            Opcode::OpenRange | Opcode::ClosedRange => {
                let upper = self.pop();
                let lower = self.pop();
                let (Some(start), Some(end)) = (lower.as_integer(), upper.as_integer()) else {
                    return Err(Error::new(self.op_range(offset), messages::EXPECTED_INTEGER));
                };
                if start > end {
                    return Err(Error::new(self.op_range(offset), messages::BOUNDS_MISMATCH));
                }
                let closed = opcode == Opcode::ClosedRange;
                let range = self.make(Object::Range(crate::object::Range { start, end, closed }));
                self.stack.push(range.into());
            }
            Opcode::List => {
                let count = usize::from(self.fetch_u16());
                let values = self.stack.split_off(self.stack.len() - count);
                let list = self.make_list(values);
                self.stack.push(list.into());
            }
            Opcode::UnpackList => {
                let count = usize::from(self.fetch_u16());
                let value = self.pop();
                let values = match value.as_object() {
                    Some(object) => match object.as_ref() {
                        Object::List(values) => values.borrow().clone(),
                        _ => {
                            return Err(Error::new(
                                self.op_range(offset),
                                messages::expected_list(&value.type_name()),
                            ));
                        }
                    },
                    None => {
                        return Err(Error::new(
                            self.op_range(offset),
                            messages::expected_list(&value.type_name()),
                        ));
                    }
                };
                if values.len() != count {
                    return Err(Error::new(
                        self.op_range(offset),
                        messages::unpack_list_mismatch(count, values.len()),
                    ));
                }
                self.stack.extend(values);
            }
            Opcode::Dictionary => {
                let count = usize::from(self.fetch_u16());
                let flat = self.stack.split_off(self.stack.len() - count * 2);
                let mut values = ValueMap::default();
                let mut pairs = flat.into_iter();
                while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                    values.insert(key, value);
                }
                let dictionary = self.make_dictionary(values);
                self.stack.push(dictionary.into());
            }
            Opcode::Short => {
                let value = self.fetch_u16();
                self.stack.push(Value::Integer(i64::from(value)));
            }
            Opcode::Negate => {
                let value = self.pop();
                let negated = match value {
                    Value::Integer(value) => Value::Integer(value.wrapping_neg()),
                    Value::Float(value) => Value::Float(-value),
                    other => {
                        return Err(Error::new(
                            self.op_range(offset),
                            messages::expected_number(&other.type_name()),
                        ));
                    }
                };
                self.stack.push(negated);
            }
            Opcode::Not => {
                let value = self.pop();
                let Some(value) = value.as_bool() else {
                    return Err(Error::new(self.op_range(offset), messages::EXPECTED_TRUE_OR_FALSE));
                };
                self.stack.push(Value::Bool(!value));
            }
            Opcode::Increment => {
                let value = self.pop();
                let incremented = match value {
                    Value::Integer(value) => Value::Integer(value.wrapping_add(1)),
                    Value::Float(value) => Value::Float(value + 1.0),
                    other => {
                        return Err(Error::new(
                            self.op_range(offset),
                            messages::expected_number(&other.type_name()),
                        ));
                    }
                };
                self.stack.push(incremented);
            }
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Exponent
            | Opcode::Modulo
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::LessThanOrEqual
            | Opcode::GreaterThanOrEqual => {
                let value = self.binary_op(opcode, offset)?;
                self.stack.push(value);
            }
            Opcode::Subscript => {
                let index = self.pop();
                let receiver = self.pop();
                let Some(object) = receiver.as_object() else {
                    return Err(Error::new(
                        self.op_range(offset),
                        messages::EXPECTED_LIST_STRING_DICT_RANGE,
                    ));
                };
                let value = object.subscript(self.op_range(offset), &index)?;
                self.stack.push(value);
            }
            Opcode::SetSubscript => {
                let value = self.pop();
                let index = self.pop();
                let receiver = self.pop();
                let Some(object) = receiver.as_object() else {
                    return Err(Error::new(
                        self.op_range(offset),
                        messages::EXPECTED_LIST_STRING_DICT_RANGE,
                    ));
                };
                object.set_subscript(self.op_range(offset), index, value)?;
                let object = object.clone();
                self.notify_container_mutation(&object);
            }
            Opcode::Enumerate => {
                let enumerator = match self.stack.last().and_then(Value::as_object) {
                    Some(object) => object.clone(),
                    None => {
                        return Err(Error::new(
                            self.op_range(offset),
                            messages::EXPECTED_ENUMERATOR,
                        ));
                    }
                };
                let Object::Enumerator(state) = enumerator.as_ref() else {
                    return Err(Error::new(self.op_range(offset), messages::EXPECTED_ENUMERATOR));
                };
                let item = state.borrow_mut().enumerate();
                match item {
                    EnumerationItem::Single(value) => self.stack.push(value),
                    EnumerationItem::Pair(key, value) => {
                        let pair = self.make_list(vec![key, value]);
                        self.stack.push(pair.into());
                    }
                }
            }
            Opcode::Return => {
                let value = self.pop();
                let frame = self.frames.pop().expect("return needs a frame");
                self.stack.truncate(frame.sp);
                if self.frames.is_empty() {
                    self.it = frame.it;
                    return Ok(Step::Finished(value));
                }
                self.stack.push(value);
            }
            Opcode::True => self.stack.push(Value::Bool(true)),
            Opcode::False => self.stack.push(Value::Bool(false)),
            Opcode::SetGlobal => {
                let index = usize::from(self.fetch_u16());
                let name = self
                    .frame()
                    .bytecode
                    .constants()
                    .get(index)
                    .map(Value::to_text)
                    .unwrap_or_default();
                let value = self.pop();
                self.globals.insert(name, value);
            }
            Opcode::GetGlobal => {
                let index = usize::from(self.fetch_u16());
                let name = self
                    .frame()
                    .bytecode
                    .constants()
                    .get(index)
                    .map(Value::to_text)
                    .unwrap_or_default();
                let value = self.globals.get(&name).cloned().unwrap_or_default();
                self.stack.push(value);
            }
            Opcode::SetLocal => {
                let slot = self.frame().sp + usize::from(self.fetch_u16());
                let value = self.pop();
                let Some(place) = self.stack.get_mut(slot) else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                *place = value;
            }
            Opcode::GetLocal => {
                let slot = self.frame().sp + usize::from(self.fetch_u16());
                let Some(value) = self.stack.get(slot).cloned() else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                self.stack.push(value);
            }
            Opcode::SetCapture => {
                let index = usize::from(self.fetch_u16());
                let Some(slot) = self.frame().captures.get(index).copied() else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                let value = self.pop();
                let Some(place) = self.stack.get_mut(slot) else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                *place = value;
            }
            Opcode::GetCapture => {
                let index = usize::from(self.fetch_u16());
                let Some(slot) = self.frame().captures.get(index).copied() else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                let Some(value) = self.stack.get(slot).cloned() else {
                    return Err(Error::new(self.op_range(offset), messages::VALUE_OUT_OF_RANGE));
                };
                self.stack.push(value);
            }
            Opcode::GetEnumerator => {
                let value = self.pop();
                let enumerator = value.as_object().and_then(Object::enumerator);
                let Some(enumerator) = enumerator else {
                    return Err(Error::new(
                        self.op_range(offset),
                        messages::EXPECTED_LIST_STRING_DICT_RANGE,
                    ));
                };
                let object = self.make(Object::Enumerator(RefCell::new(enumerator)));
                self.stack.push(object.into());
            }
            Opcode::Show => {
                if let Some(value) = self.stack.last() {
                    println!("{value}");
                }
            }
            Opcode::Call => {
                let count = usize::from(self.fetch_u16());
                self.call(count, offset)?;
            }
            Opcode::Empty => self.stack.push(Value::Empty),
            Opcode::GetIt => {
                let value = self.frame().it.clone();
                self.stack.push(value);
            }
            Opcode::SetIt => {
                let value = self.pop();
                self.frame_mut().it = value;
            }
            Opcode::PushJump => {
                let distance = usize::from(self.fetch_u16());
                let height = self.stack.len();
                let frame = self.frame_mut();
                let handler = frame.ip + distance;
                frame.jumps.push(handler);
                frame.sps.push(height);
            }
            Opcode::PopJump => {
                let frame = self.frame_mut();
                frame.jumps.pop();
                frame.sps.pop();
            }
            Opcode::ToString => {
                let value = self.pop();
                if value.is_string() {
                    self.stack.push(value);
                } else {
                    let text = value.to_text();
                    let string = self.make_string(text);
                    self.stack.push(string.into());
                }
            }
        }
        Ok(Step::Continue)
    }

    fn binary_op(&mut self, opcode: Opcode, offset: usize) -> Result<Value, Error> {
        let rhs = self.pop();
        let lhs = self.pop();
        let range = self.op_range(offset);
        let mismatched = |lhs: &Value, rhs: &Value| {
            Error::new(
                range,
                messages::mismatched_types(&lhs.type_name(), operator_symbol(opcode), &rhs.type_name()),
            )
        };
        let value = match opcode {
            Opcode::Equal => Value::Bool(lhs == rhs),
            Opcode::NotEqual => Value::Bool(lhs != rhs),
            Opcode::Add => {
                if lhs.is_string() || rhs.is_string() {
                    let mut text = lhs.to_text();
                    text.push_str(&rhs.to_text());
                    Value::from(text)
                } else {
                    match (&lhs, &rhs) {
                        (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_add(*b)),
                        _ => match (lhs.cast_float(), rhs.cast_float()) {
                            (Some(a), Some(b)) => Value::Float(a + b),
                            _ => return Err(mismatched(&lhs, &rhs)),
                        },
                    }
                }
            }
            Opcode::Subtract => match (&lhs, &rhs) {
                (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_sub(*b)),
                _ => match (lhs.cast_float(), rhs.cast_float()) {
                    (Some(a), Some(b)) => Value::Float(a - b),
                    _ => return Err(mismatched(&lhs, &rhs)),
                },
            },
            Opcode::Multiply => match (&lhs, &rhs) {
                (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_mul(*b)),
                _ => match (lhs.cast_float(), rhs.cast_float()) {
                    (Some(a), Some(b)) => Value::Float(a * b),
                    _ => return Err(mismatched(&lhs, &rhs)),
                },
            },
            Opcode::Divide => match (&lhs, &rhs) {
                (Value::Integer(a), Value::Integer(b)) => {
                    if *b == 0 {
                        return Err(Error::new(range, messages::DIVIDE_BY_ZERO));
                    }
                    Value::Integer(a.wrapping_div(*b))
                }
                _ => match (lhs.cast_float(), rhs.cast_float()) {
                    (Some(a), Some(b)) => {
                        if b == 0.0 {
                            return Err(Error::new(range, messages::DIVIDE_BY_ZERO));
                        }
                        Value::Float(a / b)
                    }
                    _ => return Err(mismatched(&lhs, &rhs)),
                },
            },
            Opcode::Modulo => match (&lhs, &rhs) {
                (Value::Integer(a), Value::Integer(b)) => {
                    if *b == 0 {
                        return Err(Error::new(range, messages::DIVIDE_BY_ZERO));
                    }
                    Value::Integer(a.wrapping_rem(*b))
                }
                _ => match (lhs.cast_float(), rhs.cast_float()) {
                    (Some(a), Some(b)) => Value::Float(a % b),
                    _ => return Err(mismatched(&lhs, &rhs)),
                },
            },
            // Exponentiation is always computed in floating point, even for
            // two integers.
            Opcode::Exponent => match (lhs.cast_float(), rhs.cast_float()) {
                (Some(a), Some(b)) => Value::Float(a.powf(b)),
                _ => {
                    let offending = if lhs.is_number() { &rhs } else { &lhs };
                    return Err(Error::new(
                        range,
                        messages::expected_number(&offending.type_name()),
                    ));
                }
            },
            Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::LessThanOrEqual
            | Opcode::GreaterThanOrEqual => match (&lhs, &rhs) {
                (Value::Integer(a), Value::Integer(b)) => {
                    Value::Bool(compare(opcode, (*a).cmp(b)))
                }
                _ => match (lhs.cast_float(), rhs.cast_float()) {
                    (Some(a), Some(b)) => {
                        let ordering = a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
                        Value::Bool(compare(opcode, ordering))
                    }
                    _ => return Err(mismatched(&lhs, &rhs)),
                },
            },
            _ => return Err(mismatched(&lhs, &rhs)),
        };
        Ok(value)
    }

    /// Implements `Call n`: the callee sits `n` slots below the stack top.
    ///
    /// Functions push a frame whose base is the callee slot, with captures
    /// resolved against the calling frame. Natives run synchronously over a
    /// view of the arguments; on success the callee and arguments are
    /// replaced by the result.
    fn call(&mut self, count: usize, offset: usize) -> Result<(), Error> {
        let callee_slot = self.stack.len() - count - 1;
        let Some(callee) = self.stack.get(callee_slot).and_then(Value::as_object).cloned() else {
            return Err(Error::new(self.op_range(offset), messages::UNEXPECTED_TYPE_FOR_CALL));
        };
        match callee.as_ref() {
            Object::Function(function) => {
                let current = self.frame();
                let mut captures = Vec::with_capacity(function.captures.len());
                for capture in &function.captures {
                    let slot = if capture.is_local {
                        current.sp + usize::from(capture.index)
                    } else {
                        current.captures.get(usize::from(capture.index)).copied().unwrap_or(0)
                    };
                    captures.push(slot);
                }
                self.frames.push(CallFrame::new(function.bytecode.clone(), captures, callee_slot));
                Ok(())
            }
            Object::Native(native) => {
                let arguments: Vec<Value> = self.stack[callee_slot + 1..].to_vec();
                let argument_ranges = self.frame().bytecode.argument_ranges(offset);
                let location = self.frame().bytecode.location(offset);
                let result = native.call(NativeCallContext {
                    vm: self,
                    location,
                    arguments: &arguments,
                    argument_ranges: &argument_ranges,
                });
                match result {
                    Ok(value) => {
                        self.stack.truncate(callee_slot);
                        self.stack.push(value);
                        Ok(())
                    }
                    Err(mut error) => {
                        if error.range == SourceRange::default() {
                            error.range = self.op_range(offset);
                        }
                        Err(error)
                    }
                }
            }
            _ => Err(Error::new(self.op_range(offset), messages::UNEXPECTED_TYPE_FOR_CALL)),
        }
    }
}

fn compare(opcode: Opcode, ordering: std::cmp::Ordering) -> bool {
    match opcode {
        Opcode::LessThan => ordering.is_lt(),
        Opcode::GreaterThan => ordering.is_gt(),
        Opcode::LessThanOrEqual => ordering.is_le(),
        Opcode::GreaterThanOrEqual => ordering.is_ge(),
        _ => false,
    }
}

fn operator_symbol(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "+",
        Opcode::Subtract => "-",
        Opcode::Multiply => "*",
        Opcode::Divide => "/",
        Opcode::Modulo => "%",
        Opcode::Exponent => "^",
        Opcode::LessThan => "<",
        Opcode::GreaterThan => ">",
        Opcode::LessThanOrEqual => "<=",
        Opcode::GreaterThanOrEqual => ">=",
        Opcode::Equal => "=",
        Opcode::NotEqual => "<>",
        _ => "?",
    }
}
