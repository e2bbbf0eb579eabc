use std::{
    cell::RefCell,
    fmt,
    hash::Hasher,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    bytecode::Bytecode,
    location::{SourceLocation, SourceRange},
    report::{Error, messages},
    signature::Signature,
    value::Value,
    vm::VirtualMachine,
};

/// Dictionary storage. Iteration follows insertion order, which makes
/// enumeration and printing deterministic.
pub type ValueMap = IndexMap<Value, Value, ahash::RandomState>;

/// A capture record on a function: where an inner function finds a binding
/// that lives in an enclosing frame.
///
/// `is_local` selects between an enclosing frame's local slot and an
/// enclosing frame's own capture, chaining upwards through nesting levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub index: u16,
    pub is_local: bool,
}

/// A compiled function: immutable bytecode plus its capture records.
#[derive(Debug)]
pub struct Function {
    pub signature: Signature,
    pub bytecode: Rc<Bytecode>,
    pub captures: Vec<Capture>,
}

/// The calling context handed to a native function.
///
/// Exposes the VM (for allocation, globals, and the error register), the
/// source location of the call, and the source range of each argument so
/// natives can point diagnostics at the offending argument.
pub struct NativeCallContext<'a> {
    pub vm: &'a mut VirtualMachine,
    pub location: SourceLocation,
    pub arguments: &'a [Value],
    pub argument_ranges: &'a [SourceRange],
}

impl NativeCallContext<'_> {
    #[must_use]
    pub fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    /// The source range of argument `index`, falling back to the call site.
    #[must_use]
    pub fn argument_range(&self, index: usize) -> SourceRange {
        self.argument_ranges
            .get(index)
            .copied()
            .unwrap_or_else(|| SourceRange::at(self.location))
    }

    /// Builds an error pointing at argument `index`.
    #[must_use]
    pub fn argument_error(&self, index: usize, message: impl Into<Value>) -> Error {
        Error::new(self.argument_range(index), message)
    }
}

type NativeCallable = Box<dyn Fn(NativeCallContext<'_>) -> Result<Value, Error>>;

/// A host-callable function, registered under a signature's normalized name.
pub struct Native {
    callable: NativeCallable,
}

impl Native {
    pub fn new(callable: impl Fn(NativeCallContext<'_>) -> Result<Value, Error> + 'static) -> Self {
        Self { callable: Box::new(callable) }
    }

    pub fn call(&self, context: NativeCallContext<'_>) -> Result<Value, Error> {
        (self.callable)(context)
    }
}

/// An opaque object contributed by the host. The core only needs a name, a
/// description, and (optionally) tracing of any values it holds.
pub trait ForeignObject {
    fn type_name(&self) -> String;
    fn description(&self) -> String;
    fn trace(&self, _visitor: &mut dyn FnMut(&Rc<Object>)) {}
}

/// An integer interval, closed (`1...3`) or half-open (`1..<3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: i64,
    pub closed: bool,
}

impl Range {
    #[must_use]
    pub fn length(&self) -> i64 {
        let length = self.end - self.start + i64::from(self.closed);
        length.max(0)
    }

    #[must_use]
    pub fn item(&self, index: i64) -> Option<i64> {
        if index < 0 || index >= self.length() {
            return None;
        }
        Some(self.start + index)
    }
}

/// What one enumeration step yields: a plain value, or a key/value pair
/// that the VM materializes as a two-element list.
pub enum EnumerationItem {
    Single(Value),
    Pair(Value, Value),
}

/// Iteration state for a `repeat for` loop.
#[derive(Debug)]
pub enum Enumerator {
    List {
        list: Rc<Object>,
        index: usize,
    },
    Dictionary {
        dictionary: Rc<Object>,
        index: usize,
    },
    Range {
        range: Range,
        current: i64,
    },
    String {
        string: Rc<Object>,
        byte_index: usize,
    },
}

impl Enumerator {
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        match self {
            Self::List { list, index } => match list.as_ref() {
                Object::List(values) => *index >= values.borrow().len(),
                _ => true,
            },
            Self::Dictionary { dictionary, index } => match dictionary.as_ref() {
                Object::Dictionary(values) => *index >= values.borrow().len(),
                _ => true,
            },
            Self::Range { range, current } => {
                if range.closed { *current > range.end } else { *current >= range.end }
            }
            Self::String { string, byte_index } => match string.as_ref() {
                Object::String(text) => *byte_index >= text.len(),
                _ => true,
            },
        }
    }

    /// Yields the next item and advances. Returns `Empty` past the end,
    /// which can happen when a container shrinks mid-loop.
    pub fn enumerate(&mut self) -> EnumerationItem {
        match self {
            Self::List { list, index } => {
                let value = match list.as_ref() {
                    Object::List(values) => values.borrow().get(*index).cloned().unwrap_or_default(),
                    _ => Value::Empty,
                };
                *index += 1;
                EnumerationItem::Single(value)
            }
            Self::Dictionary { dictionary, index } => {
                let pair = match dictionary.as_ref() {
                    Object::Dictionary(values) => values
                        .borrow()
                        .get_index(*index)
                        .map(|(key, value)| (key.clone(), value.clone())),
                    _ => None,
                };
                *index += 1;
                match pair {
                    Some((key, value)) => EnumerationItem::Pair(key, value),
                    None => EnumerationItem::Single(Value::Empty),
                }
            }
            Self::Range { current, .. } => {
                let value = Value::Integer(*current);
                *current += 1;
                EnumerationItem::Single(value)
            }
            Self::String { string, byte_index } => {
                let value = match string.as_ref() {
                    Object::String(text) => text[*byte_index..].chars().next().map(|character| {
                        *byte_index += character.len_utf8();
                        Value::from(character.to_string())
                    }),
                    _ => None,
                };
                EnumerationItem::Single(value.unwrap_or_default())
            }
        }
    }

    fn backing(&self) -> Option<&Rc<Object>> {
        match self {
            Self::List { list, .. } => Some(list),
            Self::Dictionary { dictionary, .. } => Some(dictionary),
            Self::String { string, .. } => Some(string),
            Self::Range { .. } => None,
        }
    }
}

/// A heap object. Strings, ranges, functions, natives, and enumerators are
/// immutable (or internally self-contained) and live purely by reference
/// counting. Lists and dictionaries are the mutable containers: they can
/// form cycles, so the VM additionally tracks them for the cycle collector.
pub enum Object {
    String(String),
    List(RefCell<Vec<Value>>),
    Dictionary(RefCell<ValueMap>),
    Range(Range),
    Function(Function),
    Native(Native),
    Enumerator(RefCell<Enumerator>),
    Foreign(Box<dyn ForeignObject>),
}

impl Object {
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::String(_) => "string".to_owned(),
            Self::List(_) => "list".to_owned(),
            Self::Dictionary(_) => "dictionary".to_owned(),
            Self::Range(_) => "range".to_owned(),
            Self::Function(_) => "function".to_owned(),
            Self::Native(_) => "native".to_owned(),
            Self::Enumerator(_) => "enumerator".to_owned(),
            Self::Foreign(foreign) => foreign.type_name(),
        }
    }

    /// Containers that participate in cycle collection.
    #[must_use]
    pub fn is_tracked_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Dictionary(_))
    }

    /// Estimated retained bytes, used for the collector's debt accounting:
    /// element count times the value size, plus structural overhead.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let value_size = size_of::<Value>();
        match self {
            Self::List(values) => size_of::<Self>() + values.borrow().len() * value_size,
            Self::Dictionary(values) => {
                size_of::<Self>() + values.borrow().len() * 2 * value_size
            }
            _ => size_of::<Self>(),
        }
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::String(string) => string.clone(),
            _ => self.describe(&mut Vec::new()),
        }
    }

    pub(crate) fn describe(&self, visited: &mut Vec<*const Self>) -> String {
        let pointer = std::ptr::from_ref(self);
        if visited.contains(&pointer) {
            return "...".to_owned();
        }
        match self {
            Self::String(string) => {
                let escaped = string.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{escaped}\"")
            }
            Self::List(values) => {
                visited.push(pointer);
                let items: Vec<String> =
                    values.borrow().iter().map(|value| value.describe(visited)).collect();
                visited.pop();
                format!("[{}]", items.join(", "))
            }
            Self::Dictionary(values) => {
                visited.push(pointer);
                let map = values.borrow();
                let description = if map.is_empty() {
                    "[:]".to_owned()
                } else {
                    let items: Vec<String> = map
                        .iter()
                        .map(|(key, value)| {
                            format!("{}: {}", key.describe(visited), value.describe(visited))
                        })
                        .collect();
                    format!("[{}]", items.join(", "))
                };
                visited.pop();
                description
            }
            Self::Range(range) => {
                format!("{}{}{}", range.start, if range.closed { "..." } else { "..<" }, range.end)
            }
            Self::Function(function) => format!("function {}", function.signature.name()),
            Self::Native(_) => "native function".to_owned(),
            Self::Enumerator(_) => "enumerator".to_owned(),
            Self::Foreign(foreign) => foreign.description(),
        }
    }

    #[must_use]
    pub fn equals(&self, other: &Rc<Self>) -> bool {
        if std::ptr::eq(self, Rc::as_ptr(other)) {
            return true;
        }
        match (self, other.as_ref()) {
            (Self::String(lhs), Self::String(rhs)) => lhs == rhs,
            (Self::Range(lhs), Self::Range(rhs)) => lhs == rhs,
            (Self::List(lhs), Self::List(rhs)) => *lhs.borrow() == *rhs.borrow(),
            (Self::Dictionary(lhs), Self::Dictionary(rhs)) => {
                let lhs = lhs.borrow();
                let rhs = rhs.borrow();
                lhs.len() == rhs.len()
                    && lhs.iter().all(|(key, value)| rhs.get(key) == Some(value))
            }
            _ => false,
        }
    }

    pub(crate) fn hash_into(&self, state: &mut dyn Hasher) {
        match self {
            Self::String(string) => state.write(string.as_bytes()),
            Self::Range(range) => {
                state.write_i64(range.start);
                state.write_i64(range.end);
                state.write_u8(u8::from(range.closed));
            }
            // Containers hash by length only: equal containers always have
            // equal lengths, and element hashing could recurse into cycles.
            Self::List(values) => state.write_usize(values.borrow().len()),
            Self::Dictionary(values) => state.write_usize(values.borrow().len()),
            _ => state.write_usize(std::ptr::from_ref(self) as usize),
        }
    }

    /// Reads an element. Dispatches on the receiver kind; missing dictionary
    /// keys read as `Empty`.
    pub fn subscript(&self, range: SourceRange, index: &Value) -> Result<Value, Error> {
        match self {
            Self::List(values) => {
                let index = integer_index(range, index)?;
                let values = values.borrow();
                usize::try_from(index)
                    .ok()
                    .and_then(|i| values.get(i).cloned())
                    .ok_or_else(|| Error::new(range, messages::VALUE_OUT_OF_RANGE))
            }
            Self::Dictionary(values) => {
                Ok(values.borrow().get(index).cloned().unwrap_or_default())
            }
            Self::String(text) => {
                let index = integer_index(range, index)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| text.chars().nth(i))
                    .map(|character| Value::from(character.to_string()))
                    .ok_or_else(|| Error::new(range, messages::VALUE_OUT_OF_RANGE))
            }
            Self::Range(object_range) => {
                let index = integer_index(range, index)?;
                object_range
                    .item(index)
                    .map(Value::Integer)
                    .ok_or_else(|| Error::new(range, messages::VALUE_OUT_OF_RANGE))
            }
            _ => Err(Error::new(range, messages::EXPECTED_LIST_STRING_DICT_RANGE)),
        }
    }

    /// Writes an element in place. Only lists and dictionaries are mutable.
    pub fn set_subscript(
        &self,
        range: SourceRange,
        index: Value,
        value: Value,
    ) -> Result<(), Error> {
        match self {
            Self::List(values) => {
                let position = integer_index(range, &index)?;
                let mut values = values.borrow_mut();
                let slot = usize::try_from(position)
                    .ok()
                    .and_then(|i| values.get_mut(i))
                    .ok_or_else(|| Error::new(range, messages::VALUE_OUT_OF_RANGE))?;
                *slot = value;
                Ok(())
            }
            Self::Dictionary(values) => {
                values.borrow_mut().insert(index, value);
                Ok(())
            }
            _ => Err(Error::new(range, messages::EXPECTED_LIST_STRING_DICT_RANGE)),
        }
    }

    /// Builds iteration state for a `repeat for` loop over this object.
    #[must_use]
    pub fn enumerator(self: &Rc<Self>) -> Option<Enumerator> {
        match self.as_ref() {
            Self::List(_) => Some(Enumerator::List { list: self.clone(), index: 0 }),
            Self::Dictionary(_) => {
                Some(Enumerator::Dictionary { dictionary: self.clone(), index: 0 })
            }
            Self::Range(range) => Some(Enumerator::Range { range: *range, current: range.start }),
            Self::String(_) => Some(Enumerator::String { string: self.clone(), byte_index: 0 }),
            _ => None,
        }
    }

    /// Visits every object handle directly reachable from this one. The
    /// collector's mark phase drives this transitively.
    pub fn trace(&self, visitor: &mut dyn FnMut(&Rc<Self>)) {
        match self {
            Self::List(values) => {
                for value in values.borrow().iter() {
                    if let Value::Object(object) = value {
                        visitor(object);
                    }
                }
            }
            Self::Dictionary(values) => {
                for (key, value) in values.borrow().iter() {
                    if let Value::Object(object) = key {
                        visitor(object);
                    }
                    if let Value::Object(object) = value {
                        visitor(object);
                    }
                }
            }
            Self::Enumerator(enumerator) => {
                if let Some(backing) = enumerator.borrow().backing() {
                    visitor(backing);
                }
            }
            Self::Foreign(foreign) => foreign.trace(visitor),
            _ => {}
        }
    }

    /// Empties a container, releasing the references its elements hold.
    /// Called by the collector's sweep on unreachable containers.
    pub(crate) fn clear_interior(&self) {
        match self {
            Self::List(values) => values.borrow_mut().clear(),
            Self::Dictionary(values) => values.borrow_mut().clear(),
            _ => {}
        }
    }
}

fn integer_index(range: SourceRange, index: &Value) -> Result<i64, Error> {
    index
        .as_integer()
        .ok_or_else(|| Error::new(range, messages::EXPECTED_INTEGER))
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(string) => f.debug_tuple("String").field(string).finish(),
            Self::List(values) => f.debug_tuple("List").field(&values.borrow().len()).finish(),
            Self::Dictionary(values) => {
                f.debug_tuple("Dictionary").field(&values.borrow().len()).finish()
            }
            Self::Range(range) => f.debug_tuple("Range").field(range).finish(),
            Self::Function(function) => {
                f.debug_tuple("Function").field(&function.signature.name()).finish()
            }
            Self::Native(_) => f.write_str("Native"),
            Self::Enumerator(_) => f.write_str("Enumerator"),
            Self::Foreign(foreign) => f.debug_tuple("Foreign").field(&foreign.type_name()).finish(),
        }
    }
}
