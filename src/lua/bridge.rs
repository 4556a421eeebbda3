//! Bridge between Lua attribute access and class descriptors
//!
//! All objects share one userdata type, so there is a single `__index` and
//! `__newindex` implementation; it looks up the concrete class of the
//! object and walks the class chain from there.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use mlua::{
    AnyUserData, FromLua, Function, Lua, MetaMethod, MultiValue, Table, UserData,
    UserDataMethods, Value,
};
use tracing::trace;

use crate::objects::{
    ClassDescriptor, ClassError, ClassFunction, Member, NativeMethod, Object, ObjectRef,
    Subscriber,
};

/// Property name reporting whether the object passes its checkers
const VALID: &str = "valid";

/// Property name of the per-object table for script-side storage
const DATA: &str = "data";

impl UserData for Object {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(
            MetaMethod::Index,
            |lua, (ud, key): (AnyUserData, Value)| {
                let object = expect_object(ud)?;
                match key {
                    Value::String(key) => class_index(lua, &object, &key.to_str()?),
                    _ => Ok(Value::Nil),
                }
            },
        );

        methods.add_meta_function(
            MetaMethod::NewIndex,
            |lua, (ud, key, value): (AnyUserData, Value, Value)| {
                let object = expect_object(ud)?;
                match key {
                    Value::String(key) => class_newindex(lua, &object, &key.to_str()?, value),
                    other => Err(ClassError::UnknownProperty {
                        class: object.class()?.name().to_string(),
                        property: format!("<{}>", other.type_name()),
                    }
                    .into()),
                }
            },
        );

        methods.add_meta_function(MetaMethod::ToString, |_, ud: AnyUserData| {
            let object = expect_object(ud)?;
            let class = object.class()?;
            Ok(format!("{}: {:p}", class.name(), object.userdata().to_pointer()))
        });
    }
}

fn expect_object(ud: AnyUserData) -> mlua::Result<ObjectRef> {
    ObjectRef::from_userdata(ud).ok_or_else(|| {
        ClassError::TypeMismatch {
            expected: "object".to_string(),
            got: "userdata".to_string(),
        }
        .into()
    })
}

fn ensure_valid(object: &ObjectRef, class: &ClassDescriptor) -> Result<(), ClassError> {
    if object.is_valid() {
        Ok(())
    } else {
        Err(ClassError::InvalidObject(class.name().to_string()))
    }
}

/// Resolve `object.key`.
///
/// The class chain is walked from the concrete class up; at each level an
/// object method is found before a property. Keys nobody defines fall back
/// to the `valid` and `data` built-ins, then to the concrete class's
/// index-miss handler, and otherwise read as nil.
pub fn class_index(lua: &Lua, object: &ObjectRef, key: &str) -> mlua::Result<Value> {
    let class = object.class()?;
    let member = class.tokens().lookup(key).and_then(|t| class.resolve(t));

    match member {
        Some(Member::Method(method)) => Ok(Value::Function(method)),
        Some(Member::Property(property)) => {
            ensure_valid(object, &class)?;
            match &property.read {
                Some(read) => read(lua, object),
                None => Ok(Value::Nil),
            }
        }
        None => match key {
            VALID => Ok(Value::Boolean(object.is_valid())),
            DATA => {
                ensure_valid(object, &class)?;
                object.data(lua).map(Value::Table)
            }
            _ => match class.index_miss() {
                Some(miss) => {
                    ensure_valid(object, &class)?;
                    miss(lua, object, key)
                }
                None => Ok(Value::Nil),
            },
        },
    }
}

/// Resolve `object.key = value`.
///
/// Fails with [`ClassError::ImmutableProperty`] for methods, the built-ins
/// and properties without a write handler, and with
/// [`ClassError::UnknownProperty`] for keys nobody defines, unless the
/// concrete class has a newindex-miss handler.
pub fn class_newindex(lua: &Lua, object: &ObjectRef, key: &str, value: Value) -> mlua::Result<()> {
    let class = object.class()?;
    let immutable = || ClassError::ImmutableProperty {
        class: class.name().to_string(),
        property: key.to_string(),
    };

    match class.tokens().lookup(key).and_then(|t| class.resolve(t)) {
        Some(Member::Method(_)) => Err(immutable().into()),
        Some(Member::Property(property)) => match &property.write {
            Some(write) => {
                ensure_valid(object, &class)?;
                write(lua, object, value)
            }
            None => Err(immutable().into()),
        },
        None if key == VALID || key == DATA => Err(immutable().into()),
        None => match class.newindex_miss() {
            Some(miss) => {
                ensure_valid(object, &class)?;
                miss(lua, object, key, value)
            }
            None => Err(ClassError::UnknownProperty {
                class: class.name().to_string(),
                property: key.to_string(),
            }
            .into()),
        },
    }
}

/// Create an instance of `class`.
///
/// Keys of `props` naming a property with a construct handler are applied
/// in table order; other keys are ignored. The class-level `new` signal is
/// emitted last, with the object as argument.
pub fn new_object(
    lua: &Lua,
    class: &Rc<ClassDescriptor>,
    props: Option<Table>,
) -> mlua::Result<ObjectRef> {
    let ud = lua.create_userdata(Object::allocate(class))?;
    let object = expect_object(ud)?;
    object.attach_store(lua)?;

    if let Some(props) = props {
        for pair in props.pairs::<Value, Value>() {
            let (key, value) = pair?;
            let Value::String(key) = key else {
                continue;
            };
            let key = key.to_str()?;
            let Some(token) = class.tokens().lookup(&key) else {
                continue;
            };
            if let Some(construct) = class.find_property(token).and_then(|p| p.construct.as_ref()) {
                construct(lua, &object, value)?;
            }
        }
    }

    trace!("Created {} object", class.name());
    class.emit_signal(
        lua,
        "new",
        MultiValue::from_vec(vec![Value::UserData(object.userdata().clone())]),
    );
    Ok(object)
}

/// Object of `class` (or a subclass), regardless of validity
fn instance_of(value: &Value, class: &ClassDescriptor) -> Option<ObjectRef> {
    ObjectRef::from_value(value).filter(|object| object.is_a(class))
}

/// Non-failing cast: `None` unless the value is a valid instance of `class`
/// or of one of its subclasses
pub fn to_object(value: &Value, class: &ClassDescriptor) -> Option<ObjectRef> {
    instance_of(value, class).filter(ObjectRef::is_valid)
}

/// Class name of an object, or the Lua type name of any other value
pub fn classname(value: &Value) -> String {
    ObjectRef::from_value(value)
        .and_then(|object| object.class().ok())
        .map_or_else(|| value.type_name().to_string(), |class| class.name().to_string())
}

/// Cast a Lua value to an instance of `class` or of one of its subclasses
pub fn checked_cast(value: &Value, class: &ClassDescriptor) -> Result<ObjectRef, ClassError> {
    let Some(object) = instance_of(value, class) else {
        return Err(ClassError::TypeMismatch {
            expected: class.name().to_string(),
            got: classname(value),
        });
    };
    if !object.is_valid() {
        return Err(ClassError::InvalidObject(class.name().to_string()));
    }
    Ok(object)
}

/// Like [`checked_cast`], but nil is accepted as "no object"
pub fn checked_cast_or_nil(
    value: &Value,
    class: &ClassDescriptor,
) -> Result<Option<ObjectRef>, ClassError> {
    if value.is_nil() {
        Ok(None)
    } else {
        checked_cast(value, class).map(Some)
    }
}

fn upgrade(class: &Weak<ClassDescriptor>) -> mlua::Result<Rc<ClassDescriptor>> {
    class
        .upgrade()
        .ok_or_else(|| mlua::Error::RuntimeError("class no longer registered".to_string()))
}

fn take_arg<T: FromLua>(lua: &Lua, args: &mut MultiValue) -> mlua::Result<T> {
    T::from_lua(args.pop_front().unwrap_or(Value::Nil), lua)
}

/// Which registry a signal function call targets: an object passed as the
/// first argument selects the object, anything else the class
enum SignalTarget {
    Object(ObjectRef),
    Class(Rc<ClassDescriptor>),
}

fn signal_target(
    lua: &Lua,
    class: &Weak<ClassDescriptor>,
    args: &mut MultiValue,
) -> mlua::Result<(SignalTarget, String)> {
    let class = upgrade(class)?;
    let first = args.pop_front().unwrap_or(Value::Nil);
    match instance_of(&first, &class) {
        Some(object) => Ok((SignalTarget::Object(object), take_arg(lua, args)?)),
        None => Ok((SignalTarget::Class(class), String::from_lua(first, lua)?)),
    }
}

fn signal_functions(
    lua: &Lua,
    class: &Rc<ClassDescriptor>,
) -> mlua::Result<Vec<(&'static str, Function)>> {
    let weak = Rc::downgrade(class);
    let connect = lua.create_function(move |lua, mut args: MultiValue| {
        let (target, name) = signal_target(lua, &weak, &mut args)?;
        let callback: Function = take_arg(lua, &mut args)?;
        match target {
            SignalTarget::Object(object) => object.connect_signal(&name, callback.into()),
            SignalTarget::Class(class) => {
                class.connect_signal(&name, callback.into());
                Ok(())
            }
        }
    })?;

    let weak = Rc::downgrade(class);
    let disconnect = lua.create_function(move |lua, mut args: MultiValue| {
        let (target, name) = signal_target(lua, &weak, &mut args)?;
        let callback: Subscriber = take_arg::<Function>(lua, &mut args)?.into();
        match target {
            SignalTarget::Object(object) => object.disconnect_signal(&name, &callback),
            SignalTarget::Class(class) => Ok(class.disconnect_signal(&name, &callback)),
        }
    })?;

    let weak = Rc::downgrade(class);
    let emit = lua.create_function(move |lua, mut args: MultiValue| {
        let (target, name) = signal_target(lua, &weak, &mut args)?;
        match target {
            SignalTarget::Object(object) => {
                object.emit_signal(lua, &name, args)?;
            }
            SignalTarget::Class(class) => {
                class.emit_signal(lua, &name, args);
            }
        }
        Ok(())
    })?;

    Ok(vec![
        ("connect_signal", connect),
        ("disconnect_signal", disconnect),
        ("emit_signal", emit),
    ])
}

/// Fill in the object methods of a freshly built class and publish its
/// class table as a global.
pub(crate) fn install_class(
    lua: &Lua,
    class: &Rc<ClassDescriptor>,
    methods: Vec<(String, NativeMethod)>,
    class_functions: Vec<(String, ClassFunction)>,
) -> mlua::Result<()> {
    let tokens = class.tokens().clone();
    let table = lua.create_table()?;
    let mut object_methods = HashMap::new();

    for (name, f) in signal_functions(lua, class)? {
        table.set(name, f.clone())?;
        object_methods.insert(tokens.intern(name), f);
    }

    for (name, method) in methods {
        let weak = Rc::downgrade(class);
        let f = lua.create_function(move |lua, mut args: MultiValue| {
            let class = upgrade(&weak)?;
            let this = args.pop_front().unwrap_or(Value::Nil);
            let object = checked_cast(&this, &class)?;
            method(lua, &object, args)
        })?;
        object_methods.insert(tokens.intern(&name), f);
    }

    if class.methods.set(object_methods).is_err() {
        return Err(mlua::Error::RuntimeError(format!(
            "class '{}' installed twice",
            class.name()
        )));
    }

    let weak = Rc::downgrade(class);
    let instances = lua.create_function(move |_, ()| Ok(upgrade(&weak)?.instances()))?;
    table.set("instances", instances)?;

    for (name, f) in class_functions {
        table.set(name, lua.create_function(move |lua, args: MultiValue| f(lua, args))?)?;
    }

    let weak = Rc::downgrade(class);
    let constructor = lua.create_function(move |lua, (_, props): (Value, Option<Table>)| {
        new_object(lua, &upgrade(&weak)?, props)
    })?;
    let meta = lua.create_table()?;
    meta.set("__call", constructor)?;
    table.set_metatable(Some(meta));

    lua.globals().set(class.name(), table)?;
    Ok(())
}
