// The dynamically kinded value graph shared by every codec.
// Highlights:
// - `Value` is a reference-counted handle; clone = retain, drop = release.
// - Eight closed kinds; a value never changes kind after construction.
// - `null`, `true` and `false` are per-thread read-only singletons.
// - Containers own their children; `copy` retains children, `deep_copy` clones them.
use std::any::Any;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::number::Number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Data = 1,
    Date = 2,
    Array = 3,
    String = 4,
    Number = 5,
    Boolean = 6,
    Dictionary = 7,
    Null = 8,
}

impl Kind {
    pub fn from_id(id: u64) -> Option<Kind> {
        Some(match id {
            1 => Kind::Data,
            2 => Kind::Date,
            3 => Kind::Array,
            4 => Kind::String,
            5 => Kind::Number,
            6 => Kind::Boolean,
            7 => Kind::Dictionary,
            8 => Kind::Null,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn is_container(self) -> bool {
        matches!(self, Kind::Array | Kind::Dictionary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Mutation and clear are refused
    pub const READONLY: Flags = Flags(1);
    /// One shared instance per constructor
    pub const SINGLETON: Flags = Flags(2);
    /// Container was built in non-owning (increment) mode
    pub const INCREMENT: Flags = Flags(4);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

#[derive(Clone)]
enum Data {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Data(Vec<u8>),
    Date(i64),
    Array(Vec<Value>),
    /// Insertion ordered, hashed by key
    Dictionary(IndexMap<String, Value>),
}

impl Data {
    fn kind(&self) -> Kind {
        match self {
            Data::Null => Kind::Null,
            Data::Boolean(_) => Kind::Boolean,
            Data::Number(_) => Kind::Number,
            Data::String(_) => Kind::String,
            Data::Data(_) => Kind::Data,
            Data::Date(_) => Kind::Date,
            Data::Array(_) => Kind::Array,
            Data::Dictionary(_) => Kind::Dictionary,
        }
    }

    fn zero(kind: Kind) -> Data {
        match kind {
            Kind::Null => Data::Null,
            Kind::Boolean => Data::Boolean(false),
            Kind::Number => Data::Number(Number::U8(0)),
            Kind::String => Data::String(String::new()),
            Kind::Data => Data::Data(Vec::new()),
            Kind::Date => Data::Date(0),
            Kind::Array => Data::Array(Vec::new()),
            Kind::Dictionary => Data::Dictionary(IndexMap::new()),
        }
    }
}

struct Object {
    flags: Flags,
    data: RefCell<Data>,
    user: RefCell<Option<Rc<dyn Any>>>,
}

#[derive(Clone)]
pub struct Value(Rc<Object>);

thread_local! {
    static NULL: Value = Value::with_flags(Flags::READONLY | Flags::SINGLETON, Data::Null);
    static TRUE: Value = Value::with_flags(Flags::READONLY | Flags::SINGLETON, Data::Boolean(true));
    static FALSE: Value = Value::with_flags(Flags::READONLY | Flags::SINGLETON, Data::Boolean(false));
}

impl Value {
    fn with_flags(flags: Flags, data: Data) -> Value {
        Value(Rc::new(Object {
            flags,
            data: RefCell::new(data),
            user: RefCell::new(None),
        }))
    }

    fn new(data: Data) -> Value {
        Self::with_flags(Flags::NONE, data)
    }

    /// Zero value of `kind` carrying `flags`. Singleton null/boolean requests return the shared instance.
    pub fn init(flags: Flags, kind: Kind) -> Value {
        if flags.contains(Flags::SINGLETON) {
            match kind {
                Kind::Null => return Value::null(),
                Kind::Boolean => return Value::boolean(false),
                _ => {}
            }
        }
        Self::with_flags(flags, Data::zero(kind))
    }

    pub fn null() -> Value {
        NULL.with(Value::clone)
    }

    pub fn boolean(b: bool) -> Value {
        if b {
            TRUE.with(Value::clone)
        } else {
            FALSE.with(Value::clone)
        }
    }

    pub fn number(n: impl Into<Number>) -> Value {
        Self::new(Data::Number(n.into()))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Self::new(Data::String(s.into()))
    }

    pub fn data(bytes: impl Into<Vec<u8>>) -> Value {
        Self::new(Data::Data(bytes.into()))
    }

    /// Seconds since the Unix epoch
    pub fn date(secs: i64) -> Value {
        Self::new(Data::Date(secs))
    }

    pub fn date_now() -> Value {
        Self::date(Utc::now().timestamp())
    }

    pub fn array() -> Value {
        Self::new(Data::Array(Vec::new()))
    }

    /// Array built in increment mode: the caller keeps its own reference to inserted items.
    pub fn array_incr() -> Value {
        Self::with_flags(Flags::INCREMENT, Data::Array(Vec::new()))
    }

    pub fn array_from(items: impl IntoIterator<Item = Value>) -> Value {
        Self::new(Data::Array(items.into_iter().collect()))
    }

    pub fn dictionary() -> Value {
        Self::new(Data::Dictionary(IndexMap::new()))
    }

    pub fn dictionary_incr() -> Value {
        Self::with_flags(Flags::INCREMENT, Data::Dictionary(IndexMap::new()))
    }

    pub fn dictionary_from<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        let dict = Self::dictionary();
        {
            let mut data = dict.0.data.borrow_mut();
            if let Data::Dictionary(map) = &mut *data {
                for (k, v) in entries {
                    map.insert(k.into(), v);
                }
            }
        }
        dict
    }

    // -------- lifecycle --------

    pub fn kind(&self) -> Kind {
        self.0.data.borrow().kind()
    }

    pub fn flags(&self) -> Flags {
        self.0.flags
    }

    pub fn is_readonly(&self) -> bool {
        self.0.flags.contains(Flags::READONLY)
    }

    /// New handle to the same object
    pub fn retain(&self) -> Value {
        self.clone()
    }

    /// Drops this handle; the object goes away with its last handle.
    pub fn release(self) {
        drop(self)
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Same object, not merely equal content
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity key, stable while any handle is alive
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Independent value of the same kind. Containers retain their children; read-only singletons return themselves.
    pub fn copy(&self) -> Value {
        if self.0.flags.contains(Flags::SINGLETON) {
            return self.clone();
        }
        let data = self.0.data.borrow().clone();
        let flags = if self.0.flags.contains(Flags::INCREMENT) {
            Flags::INCREMENT
        } else {
            Flags::NONE
        };
        Self::with_flags(flags, data)
    }

    /// Copy of the whole graph below this value
    pub fn deep_copy(&self) -> Value {
        if self.0.flags.contains(Flags::SINGLETON) {
            return self.clone();
        }
        let data = match &*self.0.data.borrow() {
            Data::Array(items) => Data::Array(items.iter().map(Value::deep_copy).collect()),
            Data::Dictionary(entries) => Data::Dictionary(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ),
            other => other.clone(),
        };
        Self::with_flags(self.0.flags, data)
    }

    /// Reset to the kind's zero value in place; no-op on read-only values.
    pub fn clear(&self) {
        if self.is_readonly() {
            return;
        }
        let mut data = self.0.data.borrow_mut();
        *data = match &*data {
            Data::Number(n) => Data::Number(Number::zero(n.number_type())),
            other => Data::zero(other.kind()),
        };
    }

    pub fn set_user_data(&self, user: Option<Rc<dyn Any>>) {
        *self.0.user.borrow_mut() = user;
    }

    pub fn user_data(&self) -> Option<Rc<dyn Any>> {
        self.0.user.borrow().clone()
    }

    // -------- scalar access --------

    pub fn is_null(&self) -> bool {
        self.kind() == Kind::Null
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.0.data.borrow() {
            Data::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match &*self.0.data.borrow() {
            Data::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrowed view of a String payload
    pub fn as_str(&self) -> Option<Ref<'_, str>> {
        Ref::filter_map(self.0.data.borrow(), |d| match d {
            Data::String(s) => Some(s.as_str()),
            _ => None,
        })
        .ok()
    }

    pub fn to_string_value(&self) -> Option<String> {
        self.as_str().map(|s| s.to_string())
    }

    pub fn as_bytes(&self) -> Option<Ref<'_, [u8]>> {
        Ref::filter_map(self.0.data.borrow(), |d| match d {
            Data::Data(b) => Some(b.as_slice()),
            _ => None,
        })
        .ok()
    }

    pub fn as_date(&self) -> Option<i64> {
        match &*self.0.data.borrow() {
            Data::Date(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        self.as_date().and_then(|t| DateTime::from_timestamp(t, 0))
    }

    fn mutate<R>(&self, expected: Kind, f: impl FnOnce(&mut Data) -> R) -> Result<R> {
        if self.is_readonly() {
            return Err(Error::ReadOnly);
        }
        let mut data = self.0.data.borrow_mut();
        let found = data.kind();
        if found != expected {
            return Err(Error::WrongKind { expected, found });
        }
        Ok(f(&mut data))
    }

    pub fn set_bool(&self, b: bool) -> Result<()> {
        self.mutate(Kind::Boolean, |d| *d = Data::Boolean(b))
    }

    /// Replaces the numeric payload; the subtype follows `n`.
    pub fn set_number(&self, n: impl Into<Number>) -> Result<()> {
        let n = n.into();
        self.mutate(Kind::Number, |d| *d = Data::Number(n))
    }

    pub fn set_string(&self, s: impl Into<String>) -> Result<()> {
        let s = s.into();
        self.mutate(Kind::String, |d| *d = Data::String(s))
    }

    pub fn set_data(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let bytes = bytes.into();
        self.mutate(Kind::Data, |d| *d = Data::Data(bytes))
    }

    pub fn set_date(&self, secs: i64) -> Result<()> {
        self.mutate(Kind::Date, |d| *d = Data::Date(secs))
    }

    // -------- containers --------

    /// Element count for containers, byte length for String/Data, 0 otherwise
    pub fn len(&self) -> usize {
        match &*self.0.data.borrow() {
            Data::Array(items) => items.len(),
            Data::Dictionary(entries) => entries.len(),
            Data::String(s) => s.len(),
            Data::Data(b) => b.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        match &*self.0.data.borrow() {
            Data::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    pub fn get_key(&self, key: &str) -> Option<Value> {
        match &*self.0.data.borrow() {
            Data::Dictionary(entries) => entries.get(key).cloned(),
            _ => None,
        }
    }

    /// Snapshot of array items (handles are retained)
    pub fn items(&self) -> Vec<Value> {
        match &*self.0.data.borrow() {
            Data::Array(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of dictionary entries in insertion order
    pub fn entries(&self) -> Vec<(String, Value)> {
        match &*self.0.data.borrow() {
            Data::Dictionary(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match &*self.0.data.borrow() {
            Data::Dictionary(entries) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn push(&self, item: Value) -> Result<()> {
        self.mutate(Kind::Array, |d| {
            if let Data::Array(items) = d {
                items.push(item);
            }
        })
    }

    pub fn insert_at(&self, index: usize, item: Value) -> Result<()> {
        self.mutate(Kind::Array, |d| match d {
            Data::Array(items) if index <= items.len() => {
                items.insert(index, item);
                Ok(())
            }
            Data::Array(items) => Err(Error::OutOfBounds {
                index,
                len: items.len(),
            }),
            _ => Ok(()),
        })?
    }

    /// Replaces the item at `index`, returning the previous one.
    pub fn set_item(&self, index: usize, item: Value) -> Result<Value> {
        self.mutate(Kind::Array, |d| match d {
            Data::Array(items) => match items.get_mut(index) {
                Some(slot) => Ok(std::mem::replace(slot, item)),
                None => Err(Error::OutOfBounds {
                    index,
                    len: items.len(),
                }),
            },
            _ => unreachable!("kind checked by mutate"),
        })?
    }

    pub fn remove_at(&self, index: usize) -> Result<Value> {
        self.mutate(Kind::Array, |d| match d {
            Data::Array(items) if index < items.len() => Ok(items.remove(index)),
            Data::Array(items) => Err(Error::OutOfBounds {
                index,
                len: items.len(),
            }),
            _ => unreachable!("kind checked by mutate"),
        })?
    }

    /// Inserts or replaces `key`; returns the replaced value if any.
    pub fn insert_key(&self, key: impl Into<String>, val: Value) -> Result<Option<Value>> {
        let key = key.into();
        self.mutate(Kind::Dictionary, |d| match d {
            Data::Dictionary(entries) => entries.insert(key, val),
            _ => None,
        })
    }

    pub fn remove_key(&self, key: &str) -> Result<Option<Value>> {
        self.mutate(Kind::Dictionary, |d| match d {
            // shift keeps the remaining keys in insertion order
            Data::Dictionary(entries) => entries.shift_remove(key),
            _ => None,
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.0.data.borrow(), other.0.data.borrow());
        match (&*a, &*b) {
            (Data::Null, Data::Null) => true,
            (Data::Boolean(x), Data::Boolean(y)) => x == y,
            (Data::Number(x), Data::Number(y)) => x == y,
            (Data::String(x), Data::String(y)) => x == y,
            (Data::Data(x), Data::Data(y)) => x == y,
            (Data::Date(x), Data::Date(y)) => x == y,
            (Data::Array(x), Data::Array(y)) => x == y,
            (Data::Dictionary(x), Data::Dictionary(y)) => {
                x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|v2| v == v2))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.data.borrow() {
            Data::Null => write!(f, "null"),
            Data::Boolean(b) => write!(f, "{b}"),
            Data::Number(n) => write!(f, "{n}"),
            Data::String(s) => write!(f, "{s:?}"),
            Data::Data(b) => write!(f, "<data {}>", b.len()),
            Data::Date(t) => write!(f, "<date {t}>"),
            Data::Array(items) => f.debug_list().entries(items).finish(),
            Data::Dictionary(entries) => f
                .debug_map()
                .entries(entries.iter())
                .finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::number(n)
    }
}
