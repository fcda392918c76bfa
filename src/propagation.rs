//! Cross-frame patch propagation.
//!
//! A child frame that cannot be patched directly asks its parent with a
//! plain-string handshake (`inject-date-into-source`, ...). The parent then
//! copies its own patched members onto the child's globals and registers
//! the same listener on the child, so grandchildren can ask in turn.
//!
//! A handshake is only honoured when:
//! - the sender's origin is the receiver's own origin or explicitly trusted
//! - the sender is a direct child frame of the receiving window
//! - the receiving context actually installed the requested surface

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::config::PropagationPolicy;
use crate::error::{PoisonError, Result};
use crate::surfaces::date::{GETTER_ALIASES, LEGACY_METHODS, RENDERED_METHODS, SETTER_ALIASES};
use crate::surfaces::font::GEOMETRY_PROPERTIES;
use crate::surfaces::proxy_helpers::{self, is_absent, member};
use crate::surfaces::screen::WindowMetric;
use crate::surfaces::SurfaceKind;

/// Origin string of opaque (sandboxed, `data:`) contexts.
pub const OPAQUE_ORIGIN: &str = "null";

/// Propagation request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handshake {
    Canvas,
    Date,
    Font,
    Screen,
}

impl Handshake {
    pub const ALL: [Handshake; 4] = [Handshake::Canvas, Handshake::Date, Handshake::Font, Handshake::Screen];

    pub fn message(self) -> &'static str {
        match self {
            Handshake::Canvas => "inject-script-into-source",
            Handshake::Date => "inject-date-into-source",
            Handshake::Font => "inject-font-into-source",
            Handshake::Screen => "inject-screen-into-source",
        }
    }

    pub fn parse(message: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.message() == message)
    }

    pub fn surface(self) -> SurfaceKind {
        match self {
            Handshake::Canvas => SurfaceKind::Canvas,
            Handshake::Date => SurfaceKind::Date,
            Handshake::Font => SurfaceKind::Font,
            Handshake::Screen => SurfaceKind::Screen,
        }
    }

    /// Members copied from the parent's context into the child's.
    pub fn members(self) -> Vec<PropagatedMember> {
        match self {
            Handshake::Canvas => vec![
                PropagatedMember::value(Owner::Prototype("HTMLCanvasElement"), "toDataURL"),
                PropagatedMember::value(Owner::Prototype("HTMLCanvasElement"), "toBlob"),
                PropagatedMember::value(Owner::Prototype("HTMLCanvasElement"), "getContext"),
                PropagatedMember::value(Owner::Prototype("CanvasRenderingContext2D"), "getImageData"),
            ],
            Handshake::Date => {
                let mut members: Vec<_> = GETTER_ALIASES
                    .iter()
                    .chain(SETTER_ALIASES)
                    .map(|(local, _)| *local)
                    .chain(["getTimezoneOffset"])
                    .chain(RENDERED_METHODS.iter().copied())
                    .map(|name| PropagatedMember::value(Owner::Prototype("Date"), name))
                    .collect();
                members.extend(
                    LEGACY_METHODS
                        .iter()
                        .map(|&name| PropagatedMember::value(Owner::Prototype("Date"), name).optional()),
                );
                members.push(PropagatedMember::value(Owner::Namespace("Intl"), "DateTimeFormat").optional());
                members
            }
            Handshake::Font => {
                let mut members: Vec<_> = GEOMETRY_PROPERTIES
                    .iter()
                    .map(|&(owner, prop)| PropagatedMember::descriptor(Owner::Prototype(owner), prop))
                    .collect();
                members.push(PropagatedMember::value(Owner::Prototype("HTMLElement"), "getBoundingClientRect"));
                members.push(PropagatedMember::value(Owner::Global, "queryLocalFonts").optional());
                members.push(PropagatedMember::value(Owner::Prototype("FontFace"), "load").optional());
                members
            }
            // The screen object and the window metrics derived from it
            Handshake::Screen => std::iter::once("screen")
                .chain(WindowMetric::ALL.iter().map(|m| m.name()))
                .chain(["devicePixelRatio"])
                .map(|name| PropagatedMember::descriptor(Owner::Global, name))
                .collect(),
        }
    }
}

/// Where a propagated member lives, relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The window object itself.
    Global,
    /// `window[name].prototype`.
    Prototype(&'static str),
    /// `window[name]`, e.g. `Intl`.
    Namespace(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Plain assignment of the member's value.
    Value,
    /// `Object.defineProperty` with the member's own property descriptor.
    Descriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagatedMember {
    pub owner: Owner,
    pub property: &'static str,
    pub mode: CopyMode,
    /// A missing optional member is skipped instead of failing the handshake.
    pub required: bool,
}

impl PropagatedMember {
    pub fn value(owner: Owner, property: &'static str) -> Self {
        Self {
            owner,
            property,
            mode: CopyMode::Value,
            required: true,
        }
    }

    pub fn descriptor(owner: Owner, property: &'static str) -> Self {
        Self {
            owner,
            property,
            mode: CopyMode::Descriptor,
            required: true,
        }
    }

    pub fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }
}

/// Decides whether a handshake sender is allowed to receive our patches.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    own_origin: String,
    trusted: Vec<String>,
    require_child_frame: bool,
}

impl TrustPolicy {
    pub fn new(own_origin: impl Into<String>, policy: &PropagationPolicy) -> Self {
        Self {
            own_origin: own_origin.into(),
            trusted: policy.trusted_origins.clone(),
            require_child_frame: policy.require_child_frame,
        }
    }

    pub fn authorize(&self, origin: &str, is_direct_child: bool) -> Result<()> {
        let known = origin == self.own_origin || self.trusted.iter().any(|t| t == origin);
        if origin == OPAQUE_ORIGIN || !known {
            return Err(PoisonError::UntrustedSender { origin: origin.to_string() });
        }
        if self.require_child_frame && !is_direct_child {
            return Err(PoisonError::Propagation(format!(
                "sender from {} is not a direct child frame",
                origin
            )));
        }
        Ok(())
    }
}

/// Access to the contexts a propagator operates on.
pub trait ContextScope {
    type Context;

    /// Whether `source` is a direct child frame of `receiver`.
    fn is_child_of(&self, source: &Self::Context, receiver: &Self::Context) -> bool;

    /// Copy `member` from `from` onto `to`. Fails with
    /// [`PoisonError::Unsupported`] when the member does not exist.
    fn copy_member(&self, from: &Self::Context, to: &Self::Context, member: &PropagatedMember) -> Result<()>;

    /// Register the handshake listener on `context`.
    fn install_listener(&self, context: &Self::Context) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationResult {
    /// Not a handshake, or for a surface this context never installed.
    Ignored,
    Rejected(String),
    Propagated { handshake: Handshake, copied: usize },
    Failed(String),
}

pub struct CrossContextPropagator<S: ContextScope> {
    scope: S,
    policy: TrustPolicy,
    installed: HashSet<SurfaceKind>,
}

impl<S: ContextScope> CrossContextPropagator<S> {
    pub fn new(scope: S, policy: TrustPolicy, installed: HashSet<SurfaceKind>) -> Self {
        Self { scope, policy, installed }
    }

    pub fn scope(&self) -> &S {
        &self.scope
    }

    /// Answer one message received by `receiver` from `source`.
    pub fn handle(&self, receiver: &S::Context, source: &S::Context, message: &str, origin: &str) -> PropagationResult {
        let Some(handshake) = Handshake::parse(message) else {
            return PropagationResult::Ignored;
        };
        if !self.installed.contains(&handshake.surface()) {
            log::debug!("Ignoring {} handshake; surface not installed", handshake.message());
            return PropagationResult::Ignored;
        }

        let is_child = self.scope.is_child_of(source, receiver);
        if let Err(e) = self.policy.authorize(origin, is_child) {
            log::warn!("🚫 Rejected {} handshake: {}", handshake.message(), e);
            return PropagationResult::Rejected(e.to_string());
        }

        let mut copied = 0;
        for member in handshake.members() {
            match self.scope.copy_member(receiver, source, &member) {
                Ok(()) => copied += 1,
                Err(PoisonError::Unsupported(_)) if !member.required => {}
                Err(e) => {
                    log::warn!(
                        "⚠️ Child frame left unprotected ({}): {}",
                        handshake.surface().name(),
                        e
                    );
                    return PropagationResult::Failed(e.to_string());
                }
            }
        }

        if let Err(e) = self.scope.install_listener(source) {
            log::warn!("⚠️ Could not extend propagation below child frame: {}", e);
        }
        log::info!(
            "🔁 Propagated {} surface into child frame ({} members)",
            handshake.surface().name(),
            copied
        );
        PropagationResult::Propagated { handshake, copied }
    }
}

// ===== DOM layer =====

/// Windows as propagation contexts.
#[derive(Default)]
pub struct WindowScope {
    listener: RefCell<Option<Function>>,
}

impl WindowScope {
    fn owner_of(window: &JsValue, owner: Owner) -> std::result::Result<JsValue, JsValue> {
        match owner {
            Owner::Global => Ok(window.clone()),
            Owner::Prototype(name) => Ok(proxy_helpers::prototype_of(window, name)?.unwrap_or(JsValue::UNDEFINED)),
            Owner::Namespace(name) => member(window, name),
        }
    }

    fn copy(&self, from: &JsValue, to: &JsValue, item: &PropagatedMember) -> std::result::Result<bool, JsValue> {
        let source = Self::owner_of(from, item.owner)?;
        let target = Self::owner_of(to, item.owner)?;
        if is_absent(&source) || is_absent(&target) {
            return Ok(false);
        }
        let key = JsValue::from_str(item.property);
        match item.mode {
            CopyMode::Value => {
                let value = Reflect::get(&source, &key)?;
                if value.is_undefined() {
                    return Ok(false);
                }
                Reflect::set(&target, &key, &value)
            }
            CopyMode::Descriptor => {
                let descriptor = Reflect::get_own_property_descriptor::<JsValue>(source.unchecked_ref(), &key)?;
                if descriptor.is_undefined() {
                    return Ok(false);
                }
                Reflect::define_property::<JsValue>(target.unchecked_ref(), &key, descriptor.unchecked_ref())
            }
        }
    }
}

impl ContextScope for WindowScope {
    type Context = JsValue;

    fn is_child_of(&self, source: &JsValue, receiver: &JsValue) -> bool {
        if is_absent(source) || Object::is(source, receiver) {
            return false;
        }
        member(source, "parent")
            .map(|parent| Object::is(&parent, receiver))
            .unwrap_or(false)
    }

    fn copy_member(&self, from: &JsValue, to: &JsValue, item: &PropagatedMember) -> Result<()> {
        match self.copy(from, to, item) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PoisonError::Unsupported(item.property.into())),
            Err(e) => Err(PoisonError::Propagation(format!(
                "{}: {}",
                item.property,
                PoisonError::describe_js(&e)
            ))),
        }
    }

    fn install_listener(&self, context: &JsValue) -> Result<()> {
        let listener = self
            .listener
            .borrow()
            .clone()
            .ok_or_else(|| PoisonError::Internal("propagation listener not attached".into()))?;
        let add = member(context, "addEventListener")?;
        proxy_helpers::call_function(&add, context, &Array::of2(&JsValue::from_str("message"), &listener))?;
        Ok(())
    }
}

impl CrossContextPropagator<WindowScope> {
    /// Start answering handshakes sent to `window`.
    pub fn attach(self: &Rc<Self>, window: &JsValue) -> Result<()> {
        let propagator = Rc::clone(self);
        let on_message = Closure::wrap(Box::new(move |event: JsValue| {
            let Some(message) = member(&event, "data").ok().and_then(|d| d.as_string()) else {
                return;
            };
            let origin = member(&event, "origin").ok().and_then(|o| o.as_string()).unwrap_or_default();
            let source = member(&event, "source").unwrap_or(JsValue::NULL);
            let receiver = member(&event, "currentTarget").unwrap_or(JsValue::NULL);
            propagator.handle(&receiver, &source, &message, &origin);
        }) as Box<dyn FnMut(JsValue)>);

        let function: Function = on_message.as_ref().clone().unchecked_into();
        on_message.forget();
        *self.scope.listener.borrow_mut() = Some(function);
        self.scope.install_listener(window)
    }
}

/// Ask the parent frame to propagate every surface into `window`.
///
/// The handshake strings carry no secret, so they are posted to any origin;
/// the parent decides whether to answer.
pub fn request_from_parent(window: &JsValue) -> Result<usize> {
    let parent = member(window, "parent")?;
    if is_absent(&parent) || Object::is(&parent, window) {
        return Ok(0);
    }
    let post = member(&parent, "postMessage")?;
    for handshake in Handshake::ALL {
        proxy_helpers::call_function(
            &post,
            &parent,
            &Array::of2(&JsValue::from_str(handshake.message()), &JsValue::from_str("*")),
        )?;
    }
    Ok(Handshake::ALL.len())
}
