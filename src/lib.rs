//! # Fingerprint Poisoner
//!
//! Browser fingerprinting countermeasures compiled to WebAssembly.
//!
//! Instead of blocking fingerprinting APIs, the engine answers them with
//! plausible but perturbed values drawn from a per-context identity
//! profile, so a tracker sees a different device on every session.
//!
//! ## Architecture
//!
//! ```text
//! Page context                         Background worker
//! ────────────                         ─────────────────
//! PageEngine                           BackgroundService
//!   ↓ one IdentityProfile                ↓
//! SurfaceInterceptor × 5               RotationScheduler
//!   canvas · date · screen               ↓
//!   font · webrtc                      HeaderRuleSynchronizer
//!   ↓                                    ↓
//! CrossContextPropagator               declarativeNetRequest
//!   (child frames)
//! ```
//!
//! ## Surfaces
//!
//! - **Canvas**: pixel readback shifted by a session-stable RGB offset
//! - **Date**: local time pinned to UTC
//! - **Screen**: geometry jittered around a common baseline
//! - **Font**: element metrics nudged by a pixel
//! - **WebRTC**: SDP addresses masked, stats and devices noised

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;

// Modules
pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod profile;
pub mod propagation;
pub mod rng;
pub mod surfaces;

pub use background::{BackgroundHandle, BackgroundService};
pub use config::{BackgroundConfig, EngineConfig, PropagationPolicy, RotationWindow, UserAgentSource, WebRtcOptions};
pub use engine::{InstallRecord, InstallReport, PageEngine};
pub use error::{ErrorCode, ErrorInfo, PoisonError, Result};
pub use profile::{HeaderProfile, IdentityProfile, IdentityProfileGenerator};
pub use propagation::{CrossContextPropagator, Handshake, PropagationResult, TrustPolicy, WindowScope};
pub use rng::SessionRng;
pub use surfaces::{InstallOutcome, NoisePolicy, SurfaceInterceptor, SurfaceKind};

use surfaces::proxy_helpers::member;

/// Initialize logging for the module.
#[wasm_bindgen(start)]
pub fn init() {
    // A second module instance in the same realm already has a logger
    if console_log::init_with_level(log::Level::Info).is_ok() {
        log::info!("Fingerprint poisoner initialized");
    }
}

struct PageState {
    engine: PageEngine,
    report: InstallReport,
    _propagator: Option<Rc<CrossContextPropagator<WindowScope>>>,
}

thread_local! {
    static PAGE: RefCell<Option<PageState>> = const { RefCell::new(None) };
}

fn to_js<T: Serialize>(value: &T) -> std::result::Result<JsValue, JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    Ok(value.serialize(&serializer).map_err(PoisonError::from)?)
}

fn own_origin(window: &JsValue) -> String {
    member(window, "location")
        .and_then(|location| member(&location, "origin"))
        .ok()
        .and_then(|origin| origin.as_string())
        .unwrap_or_default()
}

fn start_propagation(
    window: &JsValue,
    engine: &PageEngine,
    policy: &PropagationPolicy,
) -> Option<Rc<CrossContextPropagator<WindowScope>>> {
    if !policy.enabled {
        return None;
    }
    let trust = TrustPolicy::new(own_origin(window), policy);
    let propagator = Rc::new(CrossContextPropagator::new(
        WindowScope::default(),
        trust,
        engine.installed_kinds(),
    ));
    match propagator.attach(window) {
        Ok(()) => Some(propagator),
        Err(e) => {
            log::warn!("⚠️ Child frame propagation unavailable: {}", e);
            None
        }
    }
}

/// Install every enabled surface in this context.
///
/// Safe to call more than once: later calls report the first outcome of
/// each surface and patch nothing new. Returns the install report.
#[wasm_bindgen]
pub fn install_page_defenses(options: JsValue) -> std::result::Result<JsValue, JsValue> {
    PAGE.with(|page| {
        let mut page = page.borrow_mut();
        if let Some(state) = page.as_mut() {
            return to_js(&state.engine.install_all());
        }

        let window: JsValue = js_sys::global().into();
        let config = EngineConfig::from_js(options);
        let mut engine = PageEngine::for_window(&window, &config, SessionRng::from_entropy());
        let report = engine.install_all();
        let propagator = start_propagation(&window, &engine, &config.propagation);

        let js = to_js(&report)?;
        *page = Some(PageState {
            engine,
            report,
            _propagator: propagator,
        });
        Ok(js)
    })
}

/// The context's identity profile, or `null` before installation.
#[wasm_bindgen]
pub fn get_identity_profile() -> std::result::Result<JsValue, JsValue> {
    PAGE.with(|page| match page.borrow().as_ref() {
        Some(state) => to_js(state.engine.profile().as_ref()),
        None => Ok(JsValue::NULL),
    })
}

#[derive(Serialize)]
struct DefenseStatus<'a> {
    installed: bool,
    report: Option<&'a InstallReport>,
}

/// `{ installed, report }` for this context.
#[wasm_bindgen]
pub fn check_defense_status() -> std::result::Result<JsValue, JsValue> {
    PAGE.with(|page| {
        let page = page.borrow();
        to_js(&DefenseStatus {
            installed: page.is_some(),
            report: page.as_ref().map(|state| &state.report),
        })
    })
}

/// Ask the parent frame to propagate its patches into this one.
/// Returns the number of handshakes sent.
#[wasm_bindgen]
pub fn request_parent_propagation() -> std::result::Result<u32, JsValue> {
    let window: JsValue = js_sys::global().into();
    let sent = propagation::request_from_parent(&window)?;
    Ok(sent as u32)
}

/// Start header rotation in the extension background worker.
#[wasm_bindgen]
pub fn start_background(options: JsValue) -> std::result::Result<BackgroundHandle, JsValue> {
    let global: JsValue = js_sys::global().into();
    let config = BackgroundConfig::from_js(options);
    let service = BackgroundService::start(&global, config)?;
    Ok(BackgroundHandle::new(service))
}
