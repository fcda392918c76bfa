//! Proxy and Reflect wrappers used by every surface.
//!
//! Every trap installed through these helpers is a WASM-compiled function, so
//! `Function.prototype.toString()` on a patched member reports
//! `"function () { [native code] }"` without any spoofing on our side.
//!
//! All helpers take the scope (a window object) explicitly instead of
//! reaching for `js_sys::global()`, so the same code patches the top window
//! and any same-origin child window handed to it.

use js_sys::{Array, Function, Object, Proxy, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Trap signature shared by `apply` and `construct` handlers:
/// `(target, thisArg | argumentsList, argumentsList | newTarget)`.
pub type Trap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>;

/// `get` trap signature: `(target, property, receiver)`.
pub type GetTrap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>;

/// Box a Rust closure as a three-argument trap.
pub fn trap<F>(f: F) -> Trap
where
    F: FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue> + 'static,
{
    Closure::wrap(Box::new(f) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>)
}

/// Read `obj[name]`.
#[inline]
pub fn member(obj: &JsValue, name: &str) -> Result<JsValue, JsValue> {
    Reflect::get(obj, &JsValue::from_str(name))
}

/// `true` for `undefined` and `null`.
#[inline]
pub fn is_absent(value: &JsValue) -> bool {
    value.is_undefined() || value.is_null()
}

/// Get `scope[constructor].prototype`, or `None` when the constructor is
/// missing from this scope.
pub fn prototype_of(scope: &JsValue, constructor: &str) -> Result<Option<JsValue>, JsValue> {
    let ctor = member(scope, constructor)?;
    if is_absent(&ctor) {
        return Ok(None);
    }
    let proto = member(&ctor, "prototype")?;
    Ok((!is_absent(&proto)).then_some(proto))
}

/// View an `argumentsList` as an array.
#[inline]
pub fn args_array(args: &JsValue) -> Array {
    args.clone().unchecked_into()
}

/// Call a JS function with arguments via Reflect.apply.
pub fn call_function(func: &JsValue, this_arg: &JsValue, args: &JsValue) -> Result<JsValue, JsValue> {
    let func: &Function = func.unchecked_ref();
    Reflect::apply(func, this_arg, args.unchecked_ref())
}

fn define(obj: &JsValue, prop: &str, descriptor: &Object) -> Result<(), JsValue> {
    let target: &Object = obj.unchecked_ref();
    if Reflect::define_property(target, &JsValue::from_str(prop), descriptor)? {
        Ok(())
    } else {
        Err(JsValue::from_str(&format!("{} is not configurable", prop)))
    }
}

/// Override a property with a getter.
pub fn patch_getter(
    obj: &JsValue,
    prop: &str,
    getter: Closure<dyn FnMut() -> JsValue>,
) -> Result<(), JsValue> {
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), getter.as_ref())?;
    Reflect::set(&descriptor, &JsValue::from_str("configurable"), &JsValue::TRUE)?;
    Reflect::set(&descriptor, &JsValue::from_str("enumerable"), &JsValue::TRUE)?;
    define(obj, prop, &descriptor)?;
    getter.forget();
    Ok(())
}

/// Wrap the getter of an accessor property in an `apply` proxy.
///
/// The trap receives `(originalGetter, this, [])`. The setter, if any, is
/// carried over unchanged. Fails when `prop` is not an own accessor of `obj`.
pub fn wrap_accessor(obj: &JsValue, prop: &str, apply: Trap) -> Result<(), JsValue> {
    let target: &Object = obj.unchecked_ref();
    let existing = Reflect::get_own_property_descriptor(target, &JsValue::from_str(prop))?;
    let getter = if is_absent(&existing) {
        JsValue::UNDEFINED
    } else {
        member(&existing, "get")?
    };
    if !getter.is_function() {
        return Err(JsValue::from_str(&format!("{} has no getter", prop)));
    }

    let proxied = proxy_function_with_apply(&getter, apply)?;
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), &proxied)?;
    let setter = member(&existing, "set")?;
    if setter.is_function() {
        Reflect::set(&descriptor, &JsValue::from_str("set"), &setter)?;
    }
    Reflect::set(&descriptor, &JsValue::from_str("configurable"), &JsValue::TRUE)?;
    Reflect::set(&descriptor, &JsValue::from_str("enumerable"), &member(&existing, "enumerable")?)?;
    define(obj, prop, &descriptor)
}

/// Replace `obj[name]` with an `apply` proxy around it. Returns the original.
pub fn wrap_method(obj: &JsValue, name: &str, apply: Trap) -> Result<JsValue, JsValue> {
    let original = member(obj, name)?;
    if !original.is_function() {
        return Err(JsValue::from_str(&format!("{} is not a function", name)));
    }
    let proxied = proxy_function_with_apply(&original, apply)?;
    Reflect::set(obj, &JsValue::from_str(name), &proxied)?;
    Ok(original)
}

/// Create a Proxy around a target function with an `apply` trap.
/// The trap receives (target, thisArg, argumentsList).
pub fn proxy_function_with_apply(target: &JsValue, apply: Trap) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("apply"), apply.as_ref())?;
    apply.forget();
    Ok(Proxy::new(target, &handler).into())
}

/// Create a Proxy around a constructor with a `construct` trap and an
/// optional `apply` trap for calls without `new`.
pub fn proxy_constructor(target: &JsValue, construct: Trap, apply: Option<Trap>) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("construct"), construct.as_ref())?;
    construct.forget();
    if let Some(apply) = apply {
        Reflect::set(&handler, &JsValue::from_str("apply"), apply.as_ref())?;
        apply.forget();
    }
    Ok(Proxy::new(target, &handler).into())
}

/// Create a Proxy around an object with a `get` trap.
pub fn proxy_object_with_get(target: &JsValue, get: GetTrap) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("get"), get.as_ref())?;
    get.forget();
    Ok(Proxy::new(target, &handler).into())
}

/// Read a property from a proxied target, binding methods to the target so
/// that internal-slot checks (`Illegal invocation`) still pass.
pub fn forward_get(target: &JsValue, prop: &JsValue) -> JsValue {
    let value = Reflect::get(target, prop).unwrap_or(JsValue::UNDEFINED);
    match value.dyn_ref::<Function>() {
        Some(func) => func.bind0(target).into(),
        None => value,
    }
}

/// `Object.assign({}, source, { [key]: value })`, ignoring a non-object source.
pub fn assign_with(source: &JsValue, key: &str, value: &JsValue) -> Result<Object, JsValue> {
    let out = Object::new();
    if source.is_object() {
        Object::assign(&out, source.unchecked_ref());
    }
    Reflect::set(&out, &JsValue::from_str(key), value)?;
    Ok(out)
}
