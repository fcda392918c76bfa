//! Background worker: rotates the network-visible header identity.
//!
//! ```text
//! RotationScheduler ──(every 30-120 min)──┐
//! control message "updateHeaders" ────────┤
//!                                         ▼
//!                           HeaderRuleSynchronizer ──▶ declarativeNetRequest
//! ```

pub mod chrome;
pub mod control;
pub mod rotation;
pub mod rules;
pub mod synchronizer;

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Promise;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::config::BackgroundConfig;
use crate::error::Result;
use crate::rng::SessionRng;

pub use chrome::ChromeRuleEngine;
pub use control::{ControlRequest, ControlResponse};
pub use rotation::{RotationHandle, RotationScheduler, RotationTask, Sleeper};
pub use rules::{HeaderRule, RuleUpdate, MANAGED_RULE_IDS};
pub use synchronizer::{HeaderRuleSynchronizer, HeaderSource, RandomHeaderSource, RuleEngine, SyncStats};

/// Owns the synchronizer and the rotation loop of one worker.
pub struct BackgroundService {
    synchronizer: Rc<HeaderRuleSynchronizer<ChromeRuleEngine>>,
    rotation: RefCell<Option<RotationHandle>>,
}

impl BackgroundService {
    /// Wire the rule engine, control listener and rotation loop on `global`.
    pub fn start(global: &JsValue, config: BackgroundConfig) -> Result<Rc<Self>> {
        let engine = ChromeRuleEngine::from_global(global)?;
        let rng = SessionRng::from_entropy();
        let source = RandomHeaderSource::new(rng.clone(), config.user_agent.clone(), chrome::native_user_agent(global));
        let synchronizer = Rc::new(HeaderRuleSynchronizer::new(engine, Box::new(source)));

        if let Err(e) = chrome::listen_for_control(global, synchronizer.clone()) {
            log::warn!("⚠️ Control messages unavailable: {}", e);
        }

        if config.update_on_start {
            let initial = Rc::clone(&synchronizer);
            spawn_local(async move {
                // Logged by the synchronizer
                let _ = initial.update_rules().await;
            });
        }

        let rotation = RotationScheduler::new(config.rotation, rng).start(synchronizer.clone());
        log::info!("✅ Background header rotation started");

        Ok(Rc::new(Self {
            synchronizer,
            rotation: RefCell::new(Some(rotation)),
        }))
    }

    pub fn synchronizer(&self) -> &Rc<HeaderRuleSynchronizer<ChromeRuleEngine>> {
        &self.synchronizer
    }

    pub fn stop(&self) {
        if let Some(handle) = self.rotation.borrow_mut().take() {
            handle.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.rotation
            .borrow()
            .as_ref()
            .map(|handle| !handle.is_stopped())
            .unwrap_or(false)
    }

    pub fn rotations(&self) -> u64 {
        self.rotation.borrow().as_ref().map(RotationHandle::rotations).unwrap_or(0)
    }
}

/// JS handle to a running background service.
#[wasm_bindgen]
pub struct BackgroundHandle {
    service: Rc<BackgroundService>,
}

impl BackgroundHandle {
    pub(crate) fn new(service: Rc<BackgroundService>) -> Self {
        Self { service }
    }
}

#[wasm_bindgen]
impl BackgroundHandle {
    /// Stop the rotation loop. Installed rules stay in place.
    #[wasm_bindgen]
    pub fn stop(&self) {
        self.service.stop();
    }

    /// Rotate immediately; resolves once the rules are replaced.
    #[wasm_bindgen(js_name = updateHeaders)]
    pub fn update_headers(&self) -> Promise {
        let synchronizer = Rc::clone(self.service.synchronizer());
        future_to_promise(async move {
            synchronizer.update_rules().await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = isRunning)]
    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    /// Completed scheduled rotations.
    #[wasm_bindgen]
    pub fn rotations(&self) -> f64 {
        self.service.rotations() as f64
    }

    /// `{ applied, failed }` counters of the synchronizer.
    #[wasm_bindgen(js_name = syncStats)]
    pub fn sync_stats(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.service.synchronizer().stats()).unwrap_or(JsValue::NULL)
    }
}
