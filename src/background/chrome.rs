//! Extension-runtime bindings for the background worker.

use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{Array, Function, Promise};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};

use super::control::{handle_control, parse_request};
use super::rotation::RotationTask;
use super::rules::{HeaderRule, RuleUpdate};
use super::synchronizer::RuleEngine;
use crate::error::{PoisonError, Result};
use crate::surfaces::proxy_helpers::{call_function, is_absent, member};

fn chrome_namespace(global: &JsValue, name: &str) -> Result<JsValue> {
    let chrome = member(global, "chrome")?;
    if is_absent(&chrome) {
        return Err(PoisonError::Unsupported("chrome".into()));
    }
    let namespace = member(&chrome, name)?;
    if is_absent(&namespace) {
        return Err(PoisonError::Unsupported(format!("chrome.{}", name)));
    }
    Ok(namespace)
}

/// `chrome.declarativeNetRequest` dynamic rules.
pub struct ChromeRuleEngine {
    dnr: JsValue,
}

impl ChromeRuleEngine {
    pub fn from_global(global: &JsValue) -> Result<Self> {
        Ok(Self {
            dnr: chrome_namespace(global, "declarativeNetRequest")?,
        })
    }

    async fn call(&self, method: &str, args: &Array) -> Result<JsValue> {
        let func = member(&self.dnr, method)?;
        if !func.is_function() {
            return Err(PoisonError::Unsupported(format!("declarativeNetRequest.{}", method)));
        }
        let result = call_function(&func, &self.dnr, args)
            .map_err(|e| PoisonError::RuleSync(PoisonError::describe_js(&e)))?;
        JsFuture::from(Promise::resolve(&result))
            .await
            .map_err(|e| PoisonError::RuleSync(PoisonError::describe_js(&e)))
    }
}

#[async_trait(?Send)]
impl RuleEngine for ChromeRuleEngine {
    async fn update_dynamic_rules(&self, update: &RuleUpdate) -> Result<()> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let options = update.serialize(&serializer)?;
        self.call("updateDynamicRules", &Array::of1(&options)).await?;
        Ok(())
    }

    async fn dynamic_rules(&self) -> Result<Vec<HeaderRule>> {
        let rules = self.call("getDynamicRules", &Array::new()).await?;
        if !Array::is_array(&rules) {
            return Ok(Vec::new());
        }
        // Rules installed by anything else may not be header rules
        Ok(rules
            .unchecked_into::<Array>()
            .iter()
            .filter_map(|rule| serde_wasm_bindgen::from_value(rule).ok())
            .collect())
    }
}

/// The browser's own User-Agent, when the worker can see one.
pub fn native_user_agent(global: &JsValue) -> Option<String> {
    let navigator = member(global, "navigator").ok()?;
    if is_absent(&navigator) {
        return None;
    }
    member(&navigator, "userAgent").ok()?.as_string()
}

/// Answer control messages arriving on `chrome.runtime.onMessage`.
pub fn listen_for_control(global: &JsValue, task: Rc<dyn RotationTask>) -> Result<()> {
    let runtime = chrome_namespace(global, "runtime")?;
    let on_message = member(&runtime, "onMessage")?;
    if is_absent(&on_message) {
        return Err(PoisonError::Unsupported("chrome.runtime.onMessage".into()));
    }

    let listener = Closure::wrap(Box::new(move |message: JsValue, _sender: JsValue, send_response: JsValue| {
        let request = serde_wasm_bindgen::from_value::<serde_json::Value>(message)
            .ok()
            .and_then(|value| parse_request(&value));
        let Some(request) = request else {
            return JsValue::FALSE;
        };
        let task = Rc::clone(&task);
        spawn_local(async move {
            let response = handle_control(request, task.as_ref()).await;
            let serializer = serde_wasm_bindgen::Serializer::json_compatible();
            match (response.serialize(&serializer), send_response.dyn_ref::<Function>()) {
                (Ok(body), Some(reply)) => {
                    if let Err(e) = reply.call1(&JsValue::NULL, &body) {
                        log::warn!("⚠️ Control reply failed: {}", PoisonError::describe_js(&e));
                    }
                }
                (Err(e), _) => log::warn!("⚠️ Control reply not serializable: {}", e),
                (_, None) => {}
            }
        });
        // Keep the response channel open for the async reply
        JsValue::TRUE
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);

    let add = member(&on_message, "addListener")?;
    call_function(&add, &on_message, &Array::of1(listener.as_ref()))?;
    listener.forget();
    log::info!("📨 Listening for control messages");
    Ok(())
}
