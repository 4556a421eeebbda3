//! Object system - native classes with single inheritance, properties and signals

mod class;
mod error;
mod object;
mod property;
mod signal;
mod token;

pub use class::{
    ClassBuilder, ClassDescriptor, ClassFunction, ClassId, ClassRegistry, Member, NativeMethod,
};
pub use error::ClassError;
pub use object::{Object, ObjectRef};
pub use property::{
    IndexMissHandler, NewIndexMissHandler, Property, PropertyEntry, ReadHandler, WriteHandler,
};
pub use signal::{NativeCallback, SignalRegistry, Subscriber};
pub use token::{Token, Tokens};
