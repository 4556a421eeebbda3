//! Lua side of the class system: attribute dispatch and the script host

pub(crate) mod bridge;
mod host;

pub use bridge::{
    checked_cast, checked_cast_or_nil, class_index, class_newindex, classname, new_object,
    to_object,
};
pub use host::{Host, HostError};
