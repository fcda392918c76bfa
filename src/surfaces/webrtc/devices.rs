//! `enumerateDevices` masking.

use serde::{Deserialize, Serialize};

use crate::rng::SessionRng;

/// Prefix of every generated device and group id.
pub const TOKEN_PREFIX: &str = "fp-";

const TOKEN_BYTES: usize = 16;

/// Plain-object view of a `MediaDeviceInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub group_id: String,
    pub kind: String,
    pub label: String,
}

/// Decides per call whether to hide the list or mask each entry.
#[derive(Debug, Clone)]
pub struct DeviceMasker {
    hide_probability: f64,
    rng: SessionRng,
}

impl DeviceMasker {
    pub const HIDE_PROBABILITY: f64 = 0.5;

    pub fn new(rng: SessionRng) -> Self {
        Self {
            hide_probability: Self::HIDE_PROBABILITY,
            rng,
        }
    }

    /// Decide before the real list is fetched; a hidden answer never needs it.
    pub fn should_hide(&self) -> bool {
        self.rng.chance(self.hide_probability)
    }

    /// Fresh ids on every call and a label naming only the device kind.
    pub fn mask(&self, devices: &[DeviceRecord]) -> Vec<DeviceRecord> {
        devices
            .iter()
            .map(|device| DeviceRecord {
                device_id: self.fresh_token(&device.device_id),
                group_id: self.fresh_token(&device.group_id),
                kind: device.kind.clone(),
                label: format!("{} (Protected)", device.kind),
            })
            .collect()
    }

    fn fresh_token(&self, original: &str) -> String {
        loop {
            let token = format!("{}{}", TOKEN_PREFIX, self.rng.token(TOKEN_BYTES));
            if token != original {
                return token;
            }
        }
    }
}
