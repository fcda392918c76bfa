//! Screen and window geometry.
//!
//! All reported dimensions derive from the profile's 1920x1080 baseline with
//! fresh bounded noise on every read; depths are pinned and offsets read as
//! zero. Window metrics are derived from the same baseline so that
//! `innerWidth < outerWidth <= screen.width` stays plausible.

use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use super::proxy_helpers::{self, is_absent, member};
use super::{PatchMarker, SurfaceInterceptor, SurfaceKind};
use crate::error::{PoisonError, Result};
use crate::profile::{IdentityProfile, ScreenBaseline};
use crate::rng::SessionRng;

/// Relative noise bound for every dimension.
pub const NOISE_FRACTION: f64 = 0.02;

/// Height of browser chrome added to `outerHeight`: `[70, 85)`.
const CHROME_MIN: f64 = 70.0;
const CHROME_SPREAD: f64 = 15.0;

/// `screen` members served by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenProperty {
    Width,
    Height,
    AvailWidth,
    AvailHeight,
    ColorDepth,
    PixelDepth,
    Left,
    Top,
    AvailLeft,
    AvailTop,
}

impl ScreenProperty {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "width" => Self::Width,
            "height" => Self::Height,
            "availWidth" => Self::AvailWidth,
            "availHeight" => Self::AvailHeight,
            "colorDepth" => Self::ColorDepth,
            "pixelDepth" => Self::PixelDepth,
            "left" => Self::Left,
            "top" => Self::Top,
            "availLeft" => Self::AvailLeft,
            "availTop" => Self::AvailTop,
            _ => return None,
        })
    }
}

/// Window metrics served by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMetric {
    InnerWidth,
    InnerHeight,
    OuterWidth,
    OuterHeight,
}

impl WindowMetric {
    pub const ALL: [WindowMetric; 4] = [
        WindowMetric::InnerWidth,
        WindowMetric::InnerHeight,
        WindowMetric::OuterWidth,
        WindowMetric::OuterHeight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowMetric::InnerWidth => "innerWidth",
            WindowMetric::InnerHeight => "innerHeight",
            WindowMetric::OuterWidth => "outerWidth",
            WindowMetric::OuterHeight => "outerHeight",
        }
    }
}

/// Normalize a device pixel ratio to 1 or 2. Only a ratio that rounds to
/// exactly 1 reports 1; zoomed-out ratios that round to 0 report 2.
pub fn device_pixel_ratio(actual: f64) -> f64 {
    if actual.round() == 1.0 {
        1.0
    } else {
        2.0
    }
}

/// Computes noised geometry from the baseline.
#[derive(Debug, Clone)]
pub struct ScreenModel {
    baseline: ScreenBaseline,
    rng: SessionRng,
}

impl ScreenModel {
    pub fn new(baseline: ScreenBaseline, rng: SessionRng) -> Self {
        Self { baseline, rng }
    }

    /// `value` plus a whole-pixel offset strictly inside `±2%` of it.
    ///
    /// The offset is truncated toward zero so the bound holds on both sides.
    pub fn jitter(&self, value: f64) -> f64 {
        value + (self.rng.signed_unit() * value * NOISE_FRACTION).trunc()
    }

    pub fn read(&self, property: ScreenProperty) -> f64 {
        let width = f64::from(self.baseline.width);
        let height = f64::from(self.baseline.height);
        match property {
            ScreenProperty::Width => self.jitter(width),
            ScreenProperty::Height => self.jitter(height),
            ScreenProperty::AvailWidth => self.jitter(width - 20.0),
            ScreenProperty::AvailHeight => self.jitter(height - 40.0),
            ScreenProperty::ColorDepth => f64::from(self.baseline.color_depth),
            ScreenProperty::PixelDepth => f64::from(self.baseline.pixel_depth),
            ScreenProperty::Left | ScreenProperty::Top | ScreenProperty::AvailLeft | ScreenProperty::AvailTop => 0.0,
        }
    }

    pub fn window_metric(&self, metric: WindowMetric) -> f64 {
        let width = f64::from(self.baseline.width);
        let height = f64::from(self.baseline.height);
        match metric {
            WindowMetric::InnerWidth => self.jitter(width - 30.0),
            WindowMetric::InnerHeight => self.jitter(height - 150.0),
            WindowMetric::OuterWidth => self.jitter(width),
            WindowMetric::OuterHeight => {
                let chrome = (CHROME_MIN + self.rng.unit() * CHROME_SPREAD).floor();
                self.jitter(height - 80.0) + chrome
            }
        }
    }
}

// ===== DOM layer =====

pub struct ScreenSurface {
    scope: JsValue,
    rng: SessionRng,
    marker: PatchMarker,
}

impl ScreenSurface {
    pub fn new(scope: JsValue, rng: SessionRng) -> Self {
        Self {
            scope,
            rng,
            marker: PatchMarker::default(),
        }
    }
}

impl SurfaceInterceptor for ScreenSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Screen
    }

    fn marker(&self) -> &PatchMarker {
        &self.marker
    }

    fn marker_mut(&mut self) -> &mut PatchMarker {
        &mut self.marker
    }

    fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()> {
        let screen = member(&self.scope, "screen")?;
        if is_absent(&screen) {
            return Err(PoisonError::Unsupported("screen".into()));
        }
        let model = Rc::new(ScreenModel::new(profile.screen_baseline, self.rng.clone()));

        // --- screen proxy ---
        let screen_model = Rc::clone(&model);
        let get_trap = Closure::wrap(Box::new(move |target: JsValue, prop: JsValue, _receiver: JsValue| -> JsValue {
            match prop.as_string().as_deref().and_then(ScreenProperty::from_name) {
                Some(property) => JsValue::from_f64(screen_model.read(property)),
                None => proxy_helpers::forward_get(&target, &prop),
            }
        }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
        let proxied = proxy_helpers::proxy_object_with_get(&screen, get_trap)?;
        let getter = Closure::wrap(Box::new(move || -> JsValue { proxied.clone() }) as Box<dyn FnMut() -> JsValue>);
        proxy_helpers::patch_getter(&self.scope, "screen", getter)
            .map_err(|e| PoisonError::patch("screen", PoisonError::describe_js(&e)))?;

        // --- window metrics ---
        for metric in WindowMetric::ALL {
            let model = Rc::clone(&model);
            let getter = Closure::wrap(
                Box::new(move || -> JsValue { JsValue::from_f64(model.window_metric(metric)) })
                    as Box<dyn FnMut() -> JsValue>,
            );
            proxy_helpers::patch_getter(&self.scope, metric.name(), getter)
                .map_err(|e| PoisonError::patch("screen", PoisonError::describe_js(&e)))?;
        }

        // --- devicePixelRatio, sampled once ---
        let actual = Reflect::get(&self.scope, &JsValue::from_str("devicePixelRatio"))?
            .as_f64()
            .unwrap_or(1.0);
        let ratio = device_pixel_ratio(actual);
        let getter = Closure::wrap(Box::new(move || -> JsValue { JsValue::from_f64(ratio) }) as Box<dyn FnMut() -> JsValue>);
        proxy_helpers::patch_getter(&self.scope, "devicePixelRatio", getter)
            .map_err(|e| PoisonError::patch("screen", PoisonError::describe_js(&e)))?;

        log::debug!("Screen baseline {}x{}, devicePixelRatio {}", profile.screen_baseline.width, profile.screen_baseline.height, ratio);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(seed: u64) -> ScreenModel {
        ScreenModel::new(ScreenBaseline::default(), SessionRng::seeded(seed))
    }

    fn within(value: f64, center: f64) -> bool {
        (value - center).abs() <= center * NOISE_FRACTION && value.fract() == 0.0
    }

    #[test]
    fn test_dimensions_within_bound() {
        let model = model(1);
        for _ in 0..2000 {
            assert!(within(model.read(ScreenProperty::Width), 1920.0));
            assert!(within(model.read(ScreenProperty::Height), 1080.0));
            assert!(within(model.read(ScreenProperty::AvailWidth), 1900.0));
            assert!(within(model.read(ScreenProperty::AvailHeight), 1040.0));
        }
    }

    #[test]
    fn test_noise_is_per_read() {
        let model = model(2);
        let reads: std::collections::HashSet<i64> =
            (0..50).map(|_| model.read(ScreenProperty::Width) as i64).collect();
        assert!(reads.len() > 1);
    }

    #[test]
    fn test_pinned_values() {
        let model = model(3);
        assert_eq!(model.read(ScreenProperty::ColorDepth), 24.0);
        assert_eq!(model.read(ScreenProperty::PixelDepth), 24.0);
        assert_eq!(model.read(ScreenProperty::AvailLeft), 0.0);
        assert_eq!(model.read(ScreenProperty::Top), 0.0);
    }

    #[test]
    fn test_window_metrics() {
        let model = model(4);
        for _ in 0..1000 {
            assert!(within(model.window_metric(WindowMetric::InnerWidth), 1890.0));
            assert!(within(model.window_metric(WindowMetric::InnerHeight), 930.0));
            assert!(within(model.window_metric(WindowMetric::OuterWidth), 1920.0));

            let outer = model.window_metric(WindowMetric::OuterHeight);
            let lo = 1000.0 - 1000.0 * NOISE_FRACTION + CHROME_MIN;
            let hi = 1000.0 + 1000.0 * NOISE_FRACTION + CHROME_MIN + CHROME_SPREAD;
            assert!(outer >= lo && outer < hi, "outerHeight {}", outer);
        }
    }

    #[test]
    fn test_device_pixel_ratio() {
        assert_eq!(device_pixel_ratio(1.0), 1.0);
        assert_eq!(device_pixel_ratio(0.75), 1.0);
        assert_eq!(device_pixel_ratio(0.5), 1.0);
        assert_eq!(device_pixel_ratio(0.3), 2.0);
        assert_eq!(device_pixel_ratio(0.0), 2.0);
        assert_eq!(device_pixel_ratio(1.25), 1.0);
        assert_eq!(device_pixel_ratio(1.5), 2.0);
        assert_eq!(device_pixel_ratio(3.0), 2.0);
    }

    #[test]
    fn test_property_names() {
        assert_eq!(ScreenProperty::from_name("availHeight"), Some(ScreenProperty::AvailHeight));
        assert_eq!(ScreenProperty::from_name("orientation"), None);
        assert_eq!(WindowMetric::OuterHeight.name(), "outerHeight");
    }
}
