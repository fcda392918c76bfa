//! Engine configuration.
//!
//! Both configs are plain serde structs with `#[serde(default)]`, so a JS
//! caller only has to pass the fields it wants to change:
//!
//! ```javascript
//! install_page_defenses({ webrtc_options: { disable_webrtc: true } });
//! start_background({ rotation: { min_minutes: 10, max_minutes: 20 } });
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wasm_bindgen::JsValue;

use crate::error::{PoisonError, Result};

/// Which page surfaces to install, and how.
/// All surfaces are enabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub canvas: bool,
    pub date: bool,
    pub screen: bool,
    pub font: bool,
    pub webrtc: bool,
    pub webrtc_options: WebRtcOptions,
    pub propagation: PropagationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas: true,
            date: true,
            screen: true,
            font: true,
            webrtc: true,
            webrtc_options: WebRtcOptions::default(),
            propagation: PropagationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read a config from an optional JS object, falling back to defaults.
    pub fn from_js(options: JsValue) -> Self {
        from_js_or_default(options)
    }
}

/// WebRTC surface behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcOptions {
    /// Make peer-connection construction fail with a resource error.
    pub disable_webrtc: bool,
    /// Replace every SDP address with `0.0.0.0` instead of the private decoy.
    pub remove_all_ips: bool,
    /// Perturb rtpmap sample rates and `getStats` numbers.
    pub add_noise: bool,
    /// Intercept `navigator.mediaDevices.enumerateDevices`.
    pub mask_devices: bool,
}

impl Default for WebRtcOptions {
    fn default() -> Self {
        Self {
            disable_webrtc: false,
            remove_all_ips: false,
            add_noise: true,
            mask_devices: true,
        }
    }
}

/// Who may ask this context to propagate its patches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationPolicy {
    pub enabled: bool,
    /// Origins besides our own whose frames are trusted.
    pub trusted_origins: Vec<String>,
    /// Only honour handshakes from direct child frames.
    pub require_child_frame: bool,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            trusted_origins: Vec::new(),
            require_child_frame: true,
        }
    }
}

/// Background worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub rotation: RotationWindow,
    pub user_agent: UserAgentSource,
    /// Install a fresh rule set immediately instead of waiting for the
    /// first rotation.
    pub update_on_start: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            rotation: RotationWindow::default(),
            user_agent: UserAgentSource::Candidates,
            update_on_start: true,
        }
    }
}

impl BackgroundConfig {
    /// Read a config from an optional JS object, falling back to defaults.
    /// A rotation window that fails validation is replaced by the default.
    pub fn from_js(options: JsValue) -> Self {
        let mut config: Self = from_js_or_default(options);
        if let Err(e) = config.rotation.validate() {
            log::warn!("⚠️ {}; using default rotation window", e);
            config.rotation = RotationWindow::default();
        }
        config
    }
}

/// Where the rotated User-Agent comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentSource {
    /// Pick from the fixed candidate list.
    Candidates,
    /// Perturb the browser's own User-Agent version token.
    PerturbNative,
}

/// Bounds for the randomized delay between header rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationWindow {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

impl Default for RotationWindow {
    fn default() -> Self {
        Self {
            min_minutes: 30,
            max_minutes: 120,
        }
    }
}

impl RotationWindow {
    pub fn min(&self) -> Duration {
        Duration::from_secs(u64::from(self.min_minutes) * 60)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_minutes) * 60)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_minutes == 0 {
            return Err(PoisonError::Config(
                "rotation window must be at least one minute".into(),
            ));
        }
        if self.min_minutes > self.max_minutes {
            return Err(PoisonError::Config(format!(
                "rotation window is inverted ({} > {} minutes)",
                self.min_minutes, self.max_minutes
            )));
        }
        // Browser timers take an i32 millisecond delay
        if self.max().as_millis() > i32::MAX as u128 {
            return Err(PoisonError::Config(format!(
                "rotation window of {} minutes exceeds the timer range",
                self.max_minutes
            )));
        }
        Ok(())
    }
}

fn from_js_or_default<T>(options: JsValue) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    if options.is_undefined() || options.is_null() {
        return T::default();
    }
    serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
        log::warn!("⚠️ Ignoring malformed options: {}", e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything() {
        let config = EngineConfig::default();
        assert!(config.canvas && config.date && config.screen && config.font && config.webrtc);
        assert!(!config.webrtc_options.disable_webrtc);
        assert!(config.webrtc_options.add_noise);
        assert!(config.propagation.enabled);
        assert!(config.propagation.require_child_frame);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"canvas": false, "webrtc_options": {"disable_webrtc": true}}"#)
                .unwrap();
        assert!(!config.canvas);
        assert!(config.date);
        assert!(config.webrtc_options.disable_webrtc);
        assert!(config.webrtc_options.mask_devices);
    }

    #[test]
    fn test_rotation_window_default() {
        let window = RotationWindow::default();
        assert_eq!(window.min(), Duration::from_secs(30 * 60));
        assert_eq!(window.max(), Duration::from_secs(120 * 60));
        assert!(window.validate().is_ok());
    }

    #[test]
    fn test_rotation_window_rejects_inverted() {
        let window = RotationWindow {
            min_minutes: 90,
            max_minutes: 30,
        };
        assert!(matches!(window.validate(), Err(PoisonError::Config(_))));
    }

    #[test]
    fn test_rotation_window_rejects_overflow() {
        let window = RotationWindow {
            min_minutes: 1,
            max_minutes: 60 * 24 * 30,
        };
        assert!(window.validate().is_err());
    }

    #[test]
    fn test_user_agent_source_json() {
        let config: BackgroundConfig =
            serde_json::from_str(r#"{"user_agent": "perturb_native"}"#).unwrap();
        assert_eq!(config.user_agent, UserAgentSource::PerturbNative);
        assert!(config.update_on_start);
    }
}
