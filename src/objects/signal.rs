//! Signal registry - named event channels with ordered subscribers
//!
//! Both classes and objects own one. Emission works on a snapshot of the
//! subscriber list, so subscribers may connect or disconnect (on the same
//! registry) while it runs; such changes apply from the next emission on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue};

use super::Token;

/// Native subscriber callback
pub type NativeCallback = Rc<dyn Fn(&Lua, MultiValue) -> mlua::Result<()>>;

/// A subscriber attached to a signal
#[derive(Clone)]
pub enum Subscriber {
    /// Rust closure, compared by identity
    Native(NativeCallback),
    /// Lua function, compared with Lua raw equality
    Script(Function),
}

impl Subscriber {
    /// Wrap a Rust closure
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&Lua, MultiValue) -> mlua::Result<()> + 'static,
    {
        Subscriber::Native(Rc::new(f))
    }

    pub(crate) fn invoke(&self, lua: &Lua, args: MultiValue) -> mlua::Result<()> {
        match self {
            Subscriber::Native(f) => f(lua, args),
            Subscriber::Script(f) => {
                let _: MultiValue = f.call(args)?;
                Ok(())
            }
        }
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Subscriber::Native(a), Subscriber::Native(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            (Subscriber::Script(a), Subscriber::Script(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Native(cb) => write!(f, "Native({:p})", Rc::as_ptr(cb)),
            Subscriber::Script(func) => write!(f, "Script({:?})", func),
        }
    }
}

impl From<Function> for Subscriber {
    fn from(f: Function) -> Self {
        Subscriber::Script(f)
    }
}

/// Mapping from signal name to its subscribers.
///
/// `S` is the stored entry; classes store [`Subscriber`]s directly, objects
/// store handles whose Lua side lives in the object's user value.
pub struct SignalRegistry<S = Subscriber> {
    slots: RefCell<HashMap<Token, Vec<S>>>,
}

impl<S> Default for SignalRegistry<S> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SignalRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("slots", &self.slots)
            .finish()
    }
}

impl SignalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every subscriber in connection order.
    ///
    /// A failing subscriber does not stop the others; its error is returned
    /// in the order the failures happened.
    pub fn emit(&self, lua: &Lua, signal: Token, args: MultiValue) -> Vec<mlua::Error> {
        invoke_all(lua, self.subscribers(signal), args)
    }
}

impl<S: Clone> SignalRegistry<S> {
    /// Append a subscriber. Connecting the same callback twice makes it run twice.
    pub fn connect(&self, signal: Token, subscriber: S) {
        self.slots
            .borrow_mut()
            .entry(signal)
            .or_default()
            .push(subscriber);
    }

    /// Remove the first subscriber matching `pred`
    pub fn disconnect_where(&self, signal: Token, mut pred: impl FnMut(&S) -> bool) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(list) = slots.get_mut(&signal) else {
            return false;
        };

        let Some(pos) = list.iter().position(|s| pred(s)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            slots.remove(&signal);
        }
        true
    }

    /// Snapshot of the subscribers of a signal, in connection order
    pub fn subscribers(&self, signal: Token) -> Vec<S> {
        self.slots
            .borrow()
            .get(&signal)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of subscribers of a signal
    pub fn subscriber_count(&self, signal: Token) -> usize {
        self.slots.borrow().get(&signal).map_or(0, Vec::len)
    }
}

impl<S: Clone + PartialEq> SignalRegistry<S> {
    /// Remove the first subscriber equal to `subscriber`
    pub fn disconnect(&self, signal: Token, subscriber: &S) -> bool {
        self.disconnect_where(signal, |s| s == subscriber)
    }
}

/// Call `subscribers` in order, collecting failures
pub(crate) fn invoke_all(
    lua: &Lua,
    subscribers: Vec<Subscriber>,
    args: MultiValue,
) -> Vec<mlua::Error> {
    let mut failures = Vec::new();
    for subscriber in subscribers {
        if let Err(e) = subscriber.invoke(lua, args.clone()) {
            failures.push(e);
        }
    }
    failures
}
