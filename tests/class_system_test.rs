//! Integration tests for classes, properties and signals as seen from
//! both Rust and Lua

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use classbridge::{
    checked_cast, ClassBuilder, ClassError, Host, ObjectRef, Property, Subscriber,
};
use mlua::{FromLua, Lua, MultiValue, Value};

#[derive(Default)]
struct Base {
    x: i64,
}

#[derive(Default)]
struct Derived {
    x: i64,
}

fn int(lua: &Lua, value: Value) -> mlua::Result<i64> {
    i64::from_lua(value, lua)
}

/// Base defines `x`; Derived overrides it with a handler that scales the
/// value on read and emits "changed" on write
fn base_and_derived(host: &mut Host) {
    host.register(
        ClassBuilder::<Base>::new("Base").add_property(
            "x",
            Property::new()
                .read(|_, obj| obj.with(|b: &Base| Value::Integer(b.x)))
                .write_on_construct(|lua, obj, value| {
                    let x = int(lua, value)?;
                    obj.with_mut(|b: &mut Base| b.x = x)
                }),
        ),
    )
    .expect("Failed to register Base");

    host.register(
        ClassBuilder::<Derived>::new("Derived")
            .parent("Base")
            .add_property(
                "x",
                Property::new()
                    .read(|_, obj| obj.with(|d: &Derived| Value::Integer(d.x * 10)))
                    .write(|lua, obj, value| {
                        let x = int(lua, value)?;
                        obj.with_mut(|d: &mut Derived| d.x = x)?;
                        obj.emit_signal(lua, "changed", MultiValue::new())?;
                        Ok(())
                    }),
            ),
    )
    .expect("Failed to register Derived");
}

#[test]
fn test_override_emits_changed_from_rust() {
    let mut host = common::host();
    base_and_derived(&mut host);
    let lua = host.lua();
    let derived = host.class("Derived").unwrap();

    let obj = host.new_object(&derived, None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    obj.connect_signal(
        "changed",
        Subscriber::native(move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        }),
    )
    .unwrap();

    obj.set(lua, "x", Value::Integer(5)).unwrap();

    assert_eq!(hits.get(), 1);
    assert!(matches!(obj.get(lua, "x").unwrap(), Value::Integer(50)));
    // Base's handler never ran
    assert_eq!(obj.with(|b: &Base| b.x).unwrap(), 0);
}

#[test]
fn test_override_emits_changed_from_lua() {
    let mut host = common::host();
    base_and_derived(&mut host);

    let (count, x, base_x): (i64, i64, i64) = host
        .execute(
            r#"
            local d = Derived{}
            local b = Base{ x = 3 }
            local count = 0
            d:connect_signal("changed", function(obj)
                assert(obj == d)
                count = count + 1
            end)
            d.x = 5
            return count, d.x, b.x
            "#,
        )
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(x, 50);
    assert_eq!(base_x, 3);
}

#[test]
fn test_reentrant_read_from_subscriber() {
    let mut host = common::host();
    base_and_derived(&mut host);

    let seen: i64 = host
        .execute(
            r#"
            local d = Derived{}
            local seen
            d:connect_signal("changed", function(obj)
                seen = obj.x
                if seen < 100 then
                    obj.x = seen
                end
            end)
            d.x = 2
            return seen
            "#,
        )
        .unwrap();

    // 2 -> reads 20, writes 20 -> reads 200, stops
    assert_eq!(seen, 200);
}

/// a <- b <- c <- d, plus an unrelated e; `who` is defined on a, b and d
fn chain(host: &mut Host) {
    fn who(name: &'static str) -> Property {
        Property::new().read(move |lua, _| lua.create_string(name).map(Value::String))
    }

    host.register(
        ClassBuilder::<()>::new("a")
            .add_property("who", who("a"))
            .add_property("root_only", who("root")),
    )
    .unwrap();
    host.register(ClassBuilder::<()>::new("b").parent("a").add_property("who", who("b")))
        .unwrap();
    host.register(ClassBuilder::<()>::new("c").parent("b")).unwrap();
    host.register(ClassBuilder::<()>::new("d").parent("c").add_property("who", who("d")))
        .unwrap();
    host.register(ClassBuilder::<()>::new("e")).unwrap();
}

#[test]
fn test_shadowing_up_the_chain() {
    let mut host = common::host();
    chain(&mut host);

    let (a, b, c, d, root): (String, String, String, String, String) = host
        .execute("return a{}.who, b{}.who, c{}.who, d{}.who, d{}.root_only")
        .unwrap();

    assert_eq!(a, "a");
    assert_eq!(b, "b");
    assert_eq!(c, "b");
    assert_eq!(d, "d");
    assert_eq!(root, "root");
}

#[test]
fn test_checked_cast_is_covariant() {
    let mut host = common::host();
    chain(&mut host);
    let d = host.class("d").unwrap();
    let obj = host.new_object(&d, None).unwrap();
    let value = Value::UserData(obj.userdata().clone());

    for ancestor in ["a", "b", "c", "d"] {
        let class = host.class(ancestor).unwrap();
        assert!(
            checked_cast(&value, &class).is_ok(),
            "d should pass as {ancestor}"
        );
    }

    let e = host.class("e").unwrap();
    assert!(matches!(
        checked_cast(&value, &e),
        Err(ClassError::TypeMismatch { .. })
    ));

    // an ancestor instance does not pass as a descendant
    let a = host.new_object(&host.class("a").unwrap(), None).unwrap();
    let value = Value::UserData(a.userdata().clone());
    assert!(checked_cast(&value, &d).is_err());
}

#[test]
fn test_subscribers_run_once_in_order() {
    let mut host = common::host();
    chain(&mut host);
    let lua = host.lua();
    let obj = host.new_object(&host.class("a").unwrap(), None).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let subscribers: Vec<Subscriber> = (0..5)
        .map(|i| {
            let order = order.clone();
            Subscriber::native(move |_, _| {
                order.borrow_mut().push(i);
                Ok(())
            })
        })
        .collect();
    for sub in &subscribers {
        obj.connect_signal("tick", sub.clone()).unwrap();
    }

    obj.emit_signal(lua, "tick", MultiValue::new()).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);

    order.borrow_mut().clear();
    assert!(obj.disconnect_signal("tick", &subscribers[2]).unwrap());
    obj.emit_signal(lua, "tick", MultiValue::new()).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 3, 4]);
    assert_eq!(obj.subscriber_count("tick").unwrap(), 4);
}

#[test]
fn test_failing_subscriber_reported_not_raised() {
    let mut host = common::host();
    chain(&mut host);
    let lua = host.lua();
    let obj = host.new_object(&host.class("a").unwrap(), None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();

    obj.connect_signal(
        "tick",
        Subscriber::native(|_, _| Err(mlua::Error::RuntimeError("observer broke".into()))),
    )
    .unwrap();
    obj.connect_signal(
        "tick",
        Subscriber::native(move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        }),
    )
    .unwrap();

    let failures = obj.emit_signal(lua, "tick", MultiValue::new()).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_read_only_and_unknown_from_lua() {
    let mut host = common::host();
    chain(&mut host);

    let (who, ok_ro, err_ro, ok_unknown, err_unknown, missing): (
        String,
        bool,
        String,
        bool,
        String,
        bool,
    ) = host
        .execute(
            r#"
            local obj = b{}
            local ok_ro, err_ro = pcall(function() obj.who = "z" end)
            local ok_unknown, err_unknown = pcall(function() obj.nope = 1 end)
            return obj.who, ok_ro, tostring(err_ro), ok_unknown, tostring(err_unknown),
                obj.nope == nil
            "#,
        )
        .unwrap();

    assert_eq!(who, "b");
    assert!(!ok_ro);
    assert!(err_ro.contains("read-only"), "{err_ro}");
    assert!(!ok_unknown);
    assert!(err_unknown.contains("has no property"), "{err_unknown}");
    assert!(missing);
}

#[test]
fn test_class_and_object_channels_are_separate() {
    let mut host = common::host();
    chain(&mut host);

    let (a_new, b_new, class_ticks): (i64, i64, i64) = host
        .execute(
            r#"
            local a_new, b_new, class_ticks = 0, 0, 0
            a.connect_signal("new", function() a_new = a_new + 1 end)
            b.connect_signal("new", function(obj)
                assert(tostring(obj):find("^b: "))
                b_new = b_new + 1
            end)
            b.connect_signal("tick", function() class_ticks = class_ticks + 1 end)

            local obj = b{}
            obj:emit_signal("tick")
            b.emit_signal("tick")
            return a_new, b_new, class_ticks
            "#,
        )
        .unwrap();

    // "new" goes to the concrete class only
    assert_eq!(a_new, 0);
    assert_eq!(b_new, 1);
    // only the class-level emission reaches the class subscriber
    assert_eq!(class_ticks, 1);
}

#[derive(Default)]
struct Handle {
    id: u32,
}

#[test]
fn test_collectors_run_on_gc() {
    let mut host = common::host();
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = collected.clone();
    let next = Rc::new(Cell::new(0));

    let handle = host
        .register(
            ClassBuilder::<Handle>::new("handle")
                .initializer(move |h: &mut Handle| {
                    next.set(next.get() + 1);
                    h.id = next.get();
                })
                .collector(move |h: &mut Handle| sink.borrow_mut().push(h.id))
                .class_function("count", |lua, _| {
                    let n: i64 = lua.load("return handle.instances()").eval()?;
                    Ok(MultiValue::from_vec(vec![Value::Integer(n)]))
                }),
        )
        .unwrap();

    let live: i64 = host
        .execute(
            r#"
            local keep = handle{}
            for i = 1, 3 do local _ = handle{} end
            kept = keep
            return handle.count()
            "#,
        )
        .unwrap();
    assert_eq!(live, 4);

    host.collect_garbage().unwrap();
    let mut ids = collected.borrow().clone();
    ids.sort();
    assert_eq!(ids, vec![2, 3, 4]);
    assert_eq!(handle.instances(), 1);

    let kept: ObjectRef = host.lua().globals().get("kept").unwrap();
    assert_eq!(kept.with(|h: &Handle| h.id).unwrap(), 1);
}

#[test]
fn test_self_capturing_callback_does_not_leak() {
    let mut host = common::host();
    let collected = Rc::new(Cell::new(0));
    let seen = collected.clone();

    let handle = host
        .register(
            ClassBuilder::<Handle>::new("handle")
                .collector(move |_: &mut Handle| seen.set(seen.get() + 1)),
        )
        .unwrap();

    let fired: bool = host
        .execute(
            r#"
            local fired = false
            do
                local o = handle{}
                o:connect_signal("x", function(obj)
                    fired = rawequal(obj, o)
                end)
                o:emit_signal("x")
            end
            do
                local p = handle{}
                p:connect_signal("x", function() end)
            end
            return fired
            "#,
        )
        .unwrap();
    assert!(fired);
    assert_eq!(handle.instances(), 2);

    host.collect_garbage().unwrap();
    assert_eq!(collected.get(), 2);
    assert_eq!(handle.instances(), 0);
}
