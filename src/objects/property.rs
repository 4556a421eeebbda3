//! Per-class property tables

use std::fmt;
use std::rc::Rc;

use mlua::{Lua, Value};

use super::{ObjectRef, Token};

/// Reads a property from an object
pub type ReadHandler = Rc<dyn Fn(&Lua, &ObjectRef) -> mlua::Result<Value>>;

/// Writes a property on an object (also used for construction-time writes)
pub type WriteHandler = Rc<dyn Fn(&Lua, &ObjectRef, Value) -> mlua::Result<()>>;

/// Called when reading a key no class in the chain defines
pub type IndexMissHandler = Rc<dyn Fn(&Lua, &ObjectRef, &str) -> mlua::Result<Value>>;

/// Called when writing a key no class in the chain defines
pub type NewIndexMissHandler = Rc<dyn Fn(&Lua, &ObjectRef, &str, Value) -> mlua::Result<()>>;

/// Handlers of a property, before it is attached to a class.
///
/// A missing read handler makes the property write-only, a missing write
/// handler makes it read-only. A missing construct handler means the key is
/// ignored in constructor tables.
#[derive(Clone, Default)]
pub struct Property {
    pub(crate) read: Option<ReadHandler>,
    pub(crate) write: Option<WriteHandler>,
    pub(crate) construct: Option<WriteHandler>,
}

impl Property {
    /// A property with no handlers yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read handler
    pub fn read<F>(mut self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef) -> mlua::Result<Value> + 'static,
    {
        self.read = Some(Rc::new(f));
        self
    }

    /// Set the write handler
    pub fn write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, Value) -> mlua::Result<()> + 'static,
    {
        self.write = Some(Rc::new(f));
        self
    }

    /// Set the handler used for keys given to the constructor
    pub fn construct<F>(mut self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, Value) -> mlua::Result<()> + 'static,
    {
        self.construct = Some(Rc::new(f));
        self
    }

    /// Use the write handler for construction too
    pub fn write_on_construct<F>(self, f: F) -> Self
    where
        F: Fn(&Lua, &ObjectRef, Value) -> mlua::Result<()> + 'static,
    {
        let f: WriteHandler = Rc::new(f);
        Self {
            write: Some(f.clone()),
            construct: Some(f),
            ..self
        }
    }
}

/// A property attached to a class
#[derive(Clone)]
pub struct PropertyEntry {
    pub key: Token,
    pub name: String,
    pub read: Option<ReadHandler>,
    pub write: Option<WriteHandler>,
    pub construct: Option<WriteHandler>,
}

impl PropertyEntry {
    pub(crate) fn new(key: Token, name: &str, property: Property) -> Self {
        Self {
            key,
            name: name.to_string(),
            read: property.read,
            write: property.write,
            construct: property.construct,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.read.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }
}

impl fmt::Debug for PropertyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyEntry")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("construct", &self.construct.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Tokens;

    #[test]
    fn test_handler_presence() {
        let tokens = Tokens::new();
        let entry = PropertyEntry::new(
            tokens.intern("name"),
            "name",
            Property::new().read(|_, _| Ok(Value::Nil)),
        );
        assert!(entry.is_readable());
        assert!(!entry.is_writable());
        assert!(entry.construct.is_none());
    }

    #[test]
    fn test_write_on_construct_shares_handler() {
        let tokens = Tokens::new();
        let entry = PropertyEntry::new(
            tokens.intern("x"),
            "x",
            Property::new().write_on_construct(|_, _, _| Ok(())),
        );
        assert!(!entry.is_readable());
        assert!(entry.is_writable());
        assert!(entry.construct.is_some());
    }
}
