//! Class system with single inheritance
//!
//! A class is described once, at startup, by a [`ClassBuilder`] and turned
//! into an immutable [`ClassDescriptor`] by [`ClassRegistry::register`].
//! Registration also publishes the class to Lua as a global table.

use std::any::{Any, TypeId};
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue};
use tracing::{debug, warn};

use super::property::{IndexMissHandler, NewIndexMissHandler, Property, PropertyEntry};
use super::{ClassError, ObjectRef, SignalRegistry, Subscriber, Token, Tokens};
use crate::lua::bridge;

/// Identity of a registered class, unique within its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(usize);

/// Object method callable from Lua as `obj:name(...)`
pub type NativeMethod = Rc<dyn Fn(&Lua, &ObjectRef, MultiValue) -> mlua::Result<MultiValue>>;

/// Function stored in the class table, callable as `Class.name(...)`
pub type ClassFunction = Rc<dyn Fn(&Lua, MultiValue) -> mlua::Result<MultiValue>>;

pub(crate) type Hook = Rc<dyn Fn(&mut dyn Any)>;
pub(crate) type Checker = Rc<dyn Fn(&dyn Any) -> bool>;

/// How a class's own payload is laid out and created
pub(crate) struct Payload {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) allocate: fn() -> Box<dyn Any>,
}

fn allocate<T: Default + 'static>() -> Box<dyn Any> {
    Box::new(T::default())
}

/// What a key names on an instance
pub enum Member<'a> {
    Method(Function),
    Property(&'a PropertyEntry),
}

/// Static metadata of one class
pub struct ClassDescriptor {
    id: ClassId,
    name: String,
    parent: Option<Rc<ClassDescriptor>>,
    instance_size: usize,
    pub(crate) payload: Payload,
    pub(crate) initializer: Option<Hook>,
    pub(crate) collector: Option<Hook>,
    pub(crate) checker: Option<Checker>,
    properties: HashMap<Token, PropertyEntry>,
    index_miss: Option<IndexMissHandler>,
    newindex_miss: Option<NewIndexMissHandler>,
    /// Object methods, filled in once while the class is being registered
    pub(crate) methods: OnceCell<HashMap<Token, Function>>,
    signals: SignalRegistry,
    tokens: Rc<Tokens>,
    instances: Cell<usize>,
}

impl ClassDescriptor {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Rc<ClassDescriptor>> {
        self.parent.as_ref()
    }

    /// Size of the payloads of this class and all of its ancestors
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Type name of this class's own payload
    pub fn payload_type(&self) -> &'static str {
        self.payload.type_name
    }

    /// This class followed by its ancestors, up to the root
    pub fn ancestry(&self) -> impl Iterator<Item = &ClassDescriptor> {
        std::iter::successors(Some(self), |class: &&ClassDescriptor| {
            let class: &ClassDescriptor = *class;
            class.parent.as_deref()
        })
    }

    /// Check if this class is `ancestor` or derives from it
    pub fn is_a(&self, ancestor: &ClassDescriptor) -> bool {
        self.ancestry().any(|c| c.id == ancestor.id)
    }

    /// Property defined by this class itself, ignoring ancestors
    pub fn own_property(&self, name: &str) -> Option<&PropertyEntry> {
        let key = self.tokens.lookup(name)?;
        self.properties.get(&key)
    }

    /// Find a property, most-derived definition first
    pub fn find_property(&self, key: Token) -> Option<&PropertyEntry> {
        self.ancestry().find_map(|c| c.properties.get(&key))
    }

    /// Find an object method, most-derived definition first
    pub fn find_method(&self, key: Token) -> Option<Function> {
        self.ancestry()
            .find_map(|c| c.methods.get().and_then(|m| m.get(&key)))
            .cloned()
    }

    /// Resolve what `key` names on an instance of this class.
    ///
    /// Each level is checked for a method and then a property before moving
    /// on to its parent, so the most-derived definition wins whatever its
    /// kind.
    pub fn resolve(&self, key: Token) -> Option<Member<'_>> {
        self.ancestry().find_map(|c| {
            if let Some(method) = c.methods.get().and_then(|m| m.get(&key)) {
                return Some(Member::Method(method.clone()));
            }
            c.properties.get(&key).map(Member::Property)
        })
    }

    pub fn index_miss(&self) -> Option<&IndexMissHandler> {
        self.index_miss.as_ref()
    }

    pub fn newindex_miss(&self) -> Option<&NewIndexMissHandler> {
        self.newindex_miss.as_ref()
    }

    /// Number of live instances whose concrete class is this one
    pub fn instances(&self) -> usize {
        self.instances.get()
    }

    pub(crate) fn instance_created(&self) {
        self.instances.set(self.instances.get() + 1);
    }

    pub(crate) fn instance_collected(&self) {
        self.instances.set(self.instances.get().saturating_sub(1));
    }

    pub fn tokens(&self) -> &Rc<Tokens> {
        &self.tokens
    }

    /// Class-level signals
    pub fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    /// Subscribe to a class-level signal
    pub fn connect_signal(&self, name: &str, subscriber: Subscriber) {
        self.signals.connect(self.tokens.intern(name), subscriber);
    }

    /// Unsubscribe from a class-level signal
    pub fn disconnect_signal(&self, name: &str, subscriber: &Subscriber) -> bool {
        match self.tokens.lookup(name) {
            Some(signal) => self.signals.disconnect(signal, subscriber),
            None => false,
        }
    }

    /// Emit a class-level signal. Subscriber failures are logged and returned.
    pub fn emit_signal(&self, lua: &Lua, name: &str, args: MultiValue) -> Vec<mlua::Error> {
        let Some(signal) = self.tokens.lookup(name) else {
            return Vec::new();
        };

        let failures = self.signals.emit(lua, signal, args);
        for e in &failures {
            warn!("Subscriber of {}::{} failed: {}", self.name, name, e);
        }
        failures
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("instance_size", &self.instance_size)
            .field("payload", &self.payload.type_name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

/// Description of a class before registration.
///
/// `T` is the payload this class adds to every instance; ancestors keep
/// their own payloads.
pub struct ClassBuilder<T> {
    name: String,
    parent: Option<String>,
    initializer: Option<Rc<dyn Fn(&mut T)>>,
    collector: Option<Rc<dyn Fn(&mut T)>>,
    checker: Option<Rc<dyn Fn(&T) -> bool>>,
    properties: Vec<(String, Property)>,
    index_miss: Option<IndexMissHandler>,
    newindex_miss: Option<NewIndexMissHandler>,
    methods: Vec<(String, NativeMethod)>,
    class_functions: Vec<(String, ClassFunction)>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Default + 'static> ClassBuilder<T> {
    /// Start describing a class
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            initializer: None,
            collector: None,
            checker: None,
            properties: Vec::new(),
            index_miss: None,
            newindex_miss: None,
            methods: Vec::new(),
            class_functions: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// Derive from an already registered class
    pub fn parent(mut self, name: &str) -> Self {
        self.parent = Some(name.to_string());
        self
    }

    /// Run on the payload of every new instance
    pub fn initializer(mut self, f: impl Fn(&mut T) + 'static) -> Self {
        self.initializer = Some(Rc::new(f));
        self
    }

    /// Run on the payload when Lua collects the instance
    pub fn collector(mut self, f: impl Fn(&mut T) + 'static) -> Self {
        self.collector = Some(Rc::new(f));
        self
    }

    /// Decide whether an instance is still usable
    pub fn checker(mut self, f: impl Fn(&T) -> bool + 'static) -> Self {
        self.checker = Some(Rc::new(f));
        self
    }

    /// Add a property. Adding the same key twice keeps the last one.
    pub fn add_property(mut self, key: &str, property: Property) -> Self {
        self.properties.retain(|(k, _)| k != key);
        self.properties.push((key.to_string(), property));
        self
    }

    pub fn index_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, &str) -> mlua::Result<mlua::Value> + 'static,
    {
        self.index_miss = Some(Rc::new(f));
        self
    }

    pub fn newindex_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, &str, mlua::Value) -> mlua::Result<()> + 'static,
    {
        self.newindex_miss = Some(Rc::new(f));
        self
    }

    /// Add an object method
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, MultiValue) -> mlua::Result<MultiValue> + 'static,
    {
        self.methods.push((name.to_string(), Rc::new(f)));
        self
    }

    /// Add a function to the class table
    pub fn class_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Lua, MultiValue) -> mlua::Result<MultiValue> + 'static,
    {
        self.class_functions.push((name.to_string(), Rc::new(f)));
        self
    }
}

fn erase_hook<T: 'static>(f: Rc<dyn Fn(&mut T)>) -> Hook {
    Rc::new(move |data: &mut dyn Any| {
        if let Some(data) = data.downcast_mut::<T>() {
            f(data)
        }
    })
}

fn erase_checker<T: 'static>(f: Rc<dyn Fn(&T) -> bool>) -> Checker {
    Rc::new(move |data: &dyn Any| data.downcast_ref::<T>().is_some_and(|data| f(data)))
}

/// Registry of all classes, created at startup and passed to whoever needs it
#[derive(Debug, Default)]
pub struct ClassRegistry {
    tokens: Rc<Tokens>,
    classes: HashMap<String, Rc<ClassDescriptor>>,
    next_id: usize,
}

impl ClassRegistry {
    /// Create an empty registry with its own token table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry sharing an existing token table
    pub fn with_tokens(tokens: Rc<Tokens>) -> Self {
        Self {
            tokens,
            classes: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a class and publish it to Lua.
    ///
    /// Fails if the name is taken or the parent is not registered yet.
    pub fn register<T: Default + 'static>(
        &mut self,
        lua: &Lua,
        builder: ClassBuilder<T>,
    ) -> Result<Rc<ClassDescriptor>, ClassError> {
        let ClassBuilder {
            name,
            parent,
            initializer,
            collector,
            checker,
            properties,
            index_miss,
            newindex_miss,
            methods,
            class_functions,
            ..
        } = builder;

        if self.classes.contains_key(&name) {
            return Err(ClassError::DuplicateClass(name));
        }
        if lua.globals().contains_key(name.as_str())? {
            return Err(ClassError::GlobalTaken(name));
        }

        let parent = match parent {
            Some(parent_name) => match self.classes.get(&parent_name) {
                Some(p) => Some(p.clone()),
                None => {
                    return Err(ClassError::ParentNotRegistered {
                        class: name,
                        parent: parent_name,
                    })
                }
            },
            None => None,
        };

        let properties = properties
            .into_iter()
            .map(|(key, property)| {
                let token = self.tokens.intern(&key);
                (token, PropertyEntry::new(token, &key, property))
            })
            .collect();

        let size = std::mem::size_of::<T>();
        let class = Rc::new(ClassDescriptor {
            id: ClassId(self.next_id),
            name: name.clone(),
            instance_size: size + parent.as_ref().map_or(0, |p| p.instance_size),
            parent,
            payload: Payload {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                allocate: allocate::<T>,
            },
            initializer: initializer.map(erase_hook),
            collector: collector.map(erase_hook),
            checker: checker.map(erase_checker),
            properties,
            index_miss,
            newindex_miss,
            methods: OnceCell::new(),
            signals: SignalRegistry::new(),
            tokens: self.tokens.clone(),
            instances: Cell::new(0),
        });

        bridge::install_class(lua, &class, methods, class_functions)?;

        self.next_id += 1;
        self.classes.insert(name, class.clone());
        debug!(
            "Registered class '{}' (parent: {:?}, {} properties)",
            class.name,
            class.parent.as_ref().map(|p| p.name.as_str()),
            class.properties.len()
        );
        Ok(class)
    }

    /// Get a class by name
    pub fn get(&self, name: &str) -> Option<Rc<ClassDescriptor>> {
        self.classes.get(name).cloned()
    }

    /// Check if a class exists
    pub fn exists(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Get the inheritance chain for a class (child -> ... -> root)
    pub fn get_chain(&self, name: &str) -> Vec<String> {
        self.classes
            .get(name)
            .map(|class| class.ancestry().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Check if a class is a descendant of another class
    pub fn is_a(&self, child: &str, ancestor: &str) -> bool {
        match (self.classes.get(child), self.classes.get(ancestor)) {
            (Some(child), Some(ancestor)) => child.is_a(ancestor),
            _ => false,
        }
    }

    /// Names of all registered classes, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn tokens(&self) -> &Rc<Tokens> {
        &self.tokens
    }
}
