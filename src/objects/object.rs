//! Object instances shared with Lua
//!
//! Every instance is an [`Object`] userdata: the concrete class, the
//! instance signals, and one payload per class in the inheritance chain.
//! Native code reaches an instance through [`ObjectRef`].
//!
//! Lua values owned by an instance (the `data` table and the Lua callbacks
//! of its signals) live in the userdata's user value, where the garbage
//! collector can see them. A callback that captures its own object does not
//! keep the object alive.

use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use mlua::{AnyUserData, FromLua, Function, IntoLua, Lua, MultiValue, Table, Value};
use tracing::{trace, warn};

use super::signal::invoke_all;
use super::{ClassDescriptor, ClassError, NativeCallback, SignalRegistry, Subscriber};
use crate::lua::bridge;

/// User value field holding the `data` table
const DATA: &str = "data";

/// User value field holding Lua signal callbacks, keyed by slot id
const CALLBACKS: &str = "callbacks";

/// Entry of an instance signal
#[derive(Clone)]
pub(crate) enum Slot {
    Native(NativeCallback),
    /// Key into the object's callbacks table
    Stored(i64),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Native(cb) => write!(f, "Native({:p})", Rc::as_ptr(cb)),
            Slot::Stored(id) => write!(f, "Stored({id})"),
        }
    }
}

/// Payload contributed by one class of the chain
pub(crate) struct Segment {
    class: Rc<ClassDescriptor>,
    data: RefCell<Box<dyn Any>>,
}

impl Segment {
    fn holds<T: 'static>(&self) -> bool {
        self.class.payload.type_id == TypeId::of::<T>()
    }

    fn is_valid(&self) -> bool {
        let Some(checker) = &self.class.checker else {
            return true;
        };
        // A payload that is being written to is not judged
        match self.data.try_borrow() {
            Ok(data) => checker(&**data),
            Err(_) => true,
        }
    }
}

/// A class instance as stored in Lua
pub struct Object {
    class: Rc<ClassDescriptor>,
    signals: Rc<SignalRegistry<Slot>>,
    next_slot: Cell<i64>,
    /// Root class first
    segments: Vec<Segment>,
}

impl Object {
    /// Allocate default payloads for every class of the chain and run the
    /// initializers, root class first.
    pub(crate) fn allocate(class: &Rc<ClassDescriptor>) -> Self {
        let mut chain = vec![class.clone()];
        while let Some(parent) = chain.last().and_then(|c| c.parent()).cloned() {
            chain.push(parent);
        }

        let segments: Vec<Segment> = chain
            .into_iter()
            .rev()
            .map(|class| {
                let mut data = (class.payload.allocate)();
                if let Some(init) = &class.initializer {
                    init(&mut *data);
                }
                Segment {
                    class,
                    data: RefCell::new(data),
                }
            })
            .collect();

        class.instance_created();
        trace!("Allocated {} instance", class.name());

        Self {
            class: class.clone(),
            signals: Rc::new(SignalRegistry::default()),
            next_slot: Cell::new(0),
            segments,
        }
    }

    pub fn class(&self) -> &Rc<ClassDescriptor> {
        &self.class
    }

    /// Valid while every checker of the chain accepts its payload
    pub fn is_valid(&self) -> bool {
        self.segments.iter().all(Segment::is_valid)
    }

    fn segment<T: 'static>(&self) -> Result<&Segment, ClassError> {
        self.segments
            .iter()
            .rev()
            .find(|s| s.holds::<T>())
            .ok_or_else(|| ClassError::MissingData {
                class: self.class.name().to_string(),
                data: type_name::<T>(),
            })
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        for segment in self.segments.iter().rev() {
            let Some(collector) = &segment.class.collector else {
                continue;
            };
            match segment.data.try_borrow_mut() {
                Ok(mut data) => collector(&mut **data),
                Err(_) => warn!(
                    "Skipping collector of {}: payload still borrowed",
                    segment.class.name()
                ),
            }
        }
        self.class.instance_collected();
        trace!("Collected {} instance", self.class.name());
    }
}

/// Handle on an object, passed to every native handler
#[derive(Clone, Debug)]
pub struct ObjectRef {
    ud: AnyUserData,
}

impl ObjectRef {
    /// Wrap a userdata if it is an object
    pub fn from_userdata(ud: AnyUserData) -> Option<Self> {
        ud.is::<Object>().then_some(Self { ud })
    }

    /// Wrap a Lua value if it is an object
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::UserData(ud) => Self::from_userdata(ud.clone()),
            _ => None,
        }
    }

    pub fn userdata(&self) -> &AnyUserData {
        &self.ud
    }

    /// Concrete class of the object
    pub fn class(&self) -> mlua::Result<Rc<ClassDescriptor>> {
        Ok(self.ud.borrow::<Object>()?.class.clone())
    }

    /// Check if the concrete class is `class` or derives from it
    pub fn is_a(&self, class: &ClassDescriptor) -> bool {
        self.class().is_ok_and(|c| c.is_a(class))
    }

    pub fn is_valid(&self) -> bool {
        self.ud
            .borrow::<Object>()
            .map(|o| o.is_valid())
            .unwrap_or(false)
    }

    /// Read the payload of type `T` contributed by one class of the chain
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> mlua::Result<R> {
        let object = self.ud.borrow::<Object>()?;
        let segment = object.segment::<T>()?;
        let data = segment.data.try_borrow().map_err(|_| ClassError::DataBorrowed {
            class: object.class.name().to_string(),
            data: type_name::<T>(),
        })?;
        let data = (**data).downcast_ref::<T>().ok_or_else(|| ClassError::MissingData {
            class: object.class.name().to_string(),
            data: type_name::<T>(),
        })?;
        Ok(f(data))
    }

    /// Modify the payload of type `T` contributed by one class of the chain
    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> mlua::Result<R> {
        let object = self.ud.borrow::<Object>()?;
        let segment = object.segment::<T>()?;
        let mut data = segment
            .data
            .try_borrow_mut()
            .map_err(|_| ClassError::DataBorrowed {
                class: object.class.name().to_string(),
                data: type_name::<T>(),
            })?;
        let data = (**data).downcast_mut::<T>().ok_or_else(|| ClassError::MissingData {
            class: object.class.name().to_string(),
            data: type_name::<T>(),
        })?;
        Ok(f(data))
    }

    /// Read a property the way `obj.key` does in Lua
    pub fn get(&self, lua: &Lua, key: &str) -> mlua::Result<Value> {
        bridge::class_index(lua, self, key)
    }

    /// Write a property the way `obj.key = value` does in Lua
    pub fn set(&self, lua: &Lua, key: &str, value: Value) -> mlua::Result<()> {
        bridge::class_newindex(lua, self, key, value)
    }

    /// Give a freshly created userdata its user value table
    pub(crate) fn attach_store(&self, lua: &Lua) -> mlua::Result<()> {
        let store = lua.create_table()?;
        store.raw_set(CALLBACKS, lua.create_table()?)?;
        self.ud.set_user_value(store)
    }

    fn store(&self) -> mlua::Result<Table> {
        self.ud.user_value::<Table>()
    }

    fn callbacks(&self) -> mlua::Result<Table> {
        self.store()?.raw_get(CALLBACKS)
    }

    /// Per-object Lua table for script-side storage, created on first use
    pub fn data(&self, lua: &Lua) -> mlua::Result<Table> {
        let store = self.store()?;
        if let Some(data) = store.raw_get::<Option<Table>>(DATA)? {
            return Ok(data);
        }
        let data = lua.create_table()?;
        store.raw_set(DATA, data.clone())?;
        Ok(data)
    }

    fn signals(&self) -> mlua::Result<(Rc<ClassDescriptor>, Rc<SignalRegistry<Slot>>)> {
        let object = self.ud.borrow::<Object>()?;
        Ok((object.class.clone(), object.signals.clone()))
    }

    fn next_slot(&self) -> mlua::Result<i64> {
        let object = self.ud.borrow::<Object>()?;
        let id = object.next_slot.get() + 1;
        object.next_slot.set(id);
        Ok(id)
    }

    /// Subscribe to an instance signal
    pub fn connect_signal(&self, name: &str, subscriber: Subscriber) -> mlua::Result<()> {
        let (class, signals) = self.signals()?;
        let slot = match subscriber {
            Subscriber::Native(f) => Slot::Native(f),
            Subscriber::Script(f) => {
                let id = self.next_slot()?;
                self.callbacks()?.raw_set(id, f)?;
                Slot::Stored(id)
            }
        };
        signals.connect(class.tokens().intern(name), slot);
        Ok(())
    }

    /// Unsubscribe from an instance signal
    pub fn disconnect_signal(&self, name: &str, subscriber: &Subscriber) -> mlua::Result<bool> {
        let (class, signals) = self.signals()?;
        let Some(signal) = class.tokens().lookup(name) else {
            return Ok(false);
        };

        match subscriber {
            Subscriber::Native(f) => Ok(signals.disconnect_where(signal, |slot| {
                matches!(slot, Slot::Native(g) if std::ptr::addr_eq(Rc::as_ptr(f), Rc::as_ptr(g)))
            })),
            Subscriber::Script(f) => {
                let callbacks = self.callbacks()?;
                let mut removed = None;
                signals.disconnect_where(signal, |slot| {
                    let Slot::Stored(id) = slot else {
                        return false;
                    };
                    let hit = callbacks
                        .raw_get::<Option<Function>>(*id)
                        .ok()
                        .flatten()
                        .is_some_and(|g| g == *f);
                    if hit {
                        removed = Some(*id);
                    }
                    hit
                });
                match removed {
                    Some(id) => {
                        callbacks.raw_set(id, Value::Nil)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Number of subscribers of an instance signal
    pub fn subscriber_count(&self, name: &str) -> mlua::Result<usize> {
        let (class, signals) = self.signals()?;
        Ok(class
            .tokens()
            .lookup(name)
            .map_or(0, |signal| signals.subscriber_count(signal)))
    }

    /// Emit an instance signal with the object as first argument.
    ///
    /// Subscriber failures are logged and returned; they never reach the
    /// caller as an error. The class-level registry is not involved.
    pub fn emit_signal(
        &self,
        lua: &Lua,
        name: &str,
        mut args: MultiValue,
    ) -> mlua::Result<Vec<mlua::Error>> {
        let (class, signals) = self.signals()?;
        let Some(signal) = class.tokens().lookup(name) else {
            return Ok(Vec::new());
        };

        // resolve every callback before the first one runs
        let callbacks = self.callbacks()?;
        let mut subscribers = Vec::new();
        for slot in signals.subscribers(signal) {
            match slot {
                Slot::Native(f) => subscribers.push(Subscriber::Native(f)),
                Slot::Stored(id) => {
                    if let Some(f) = callbacks.raw_get::<Option<Function>>(id)? {
                        subscribers.push(Subscriber::Script(f));
                    }
                }
            }
        }

        args.push_front(Value::UserData(self.ud.clone()));
        let failures = invoke_all(lua, subscribers, args);
        for e in &failures {
            warn!("Subscriber of {} signal '{}' failed: {}", class.name(), name, e);
        }
        Ok(failures)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ud.to_pointer() == other.ud.to_pointer()
    }
}

impl IntoLua for ObjectRef {
    fn into_lua(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::UserData(self.ud))
    }
}

impl FromLua for ObjectRef {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        ObjectRef::from_value(&value).ok_or_else(|| {
            ClassError::TypeMismatch {
                expected: "object".to_string(),
                got: value.type_name().to_string(),
            }
            .into()
        })
    }
}
