//! classbridge - native classes for embedded Lua
//!
//! Rust structures are exposed to Lua scripts as objects of registered
//! classes. Classes form single-inheritance chains, expose properties
//! through per-class handler tables, and carry signals that both Rust and
//! Lua code can connect to and emit.

pub mod config;
pub mod lua;
pub mod objects;

pub use config::Config;
pub use lua::{
    checked_cast, checked_cast_or_nil, class_index, class_newindex, classname, new_object,
    to_object, Host, HostError,
};
pub use objects::{
    ClassBuilder, ClassDescriptor, ClassError, ClassRegistry, ObjectRef, Property,
    SignalRegistry, Subscriber, Token, Tokens,
};
