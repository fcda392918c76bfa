//! Font-metric noise.
//!
//! Font detection measures rendered text boxes and compares them against
//! fallback fonts. Occasional one-pixel noise on element geometry makes
//! those comparisons unreliable, and local font enumeration is answered
//! with a fixed list of ubiquitous families.

use std::rc::Rc;

use js_sys::Promise;
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use super::proxy_helpers::{self, is_absent, member, trap};
use super::{PatchMarker, SurfaceInterceptor, SurfaceKind};
use crate::error::{PoisonError, Result};
use crate::profile::{FontNoise, IdentityProfile};
use crate::rng::SessionRng;

/// Families reported by `queryLocalFonts`.
pub const LOCAL_FONT_FAMILIES: [&str; 5] = ["Arial", "Courier New", "Georgia", "Times New Roman", "Verdana"];

/// `(prototype owner, accessor)` pairs that receive geometry noise.
pub const GEOMETRY_PROPERTIES: &[(&str, &str)] = &[
    ("HTMLElement", "offsetWidth"),
    ("HTMLElement", "offsetHeight"),
    ("Element", "clientWidth"),
    ("Element", "clientHeight"),
];

/// Occasional one-pixel noise on non-zero measurements.
#[derive(Debug, Clone)]
pub struct GeometryNoise {
    probability: f64,
    rng: SessionRng,
}

impl GeometryNoise {
    pub fn new(noise: FontNoise, rng: SessionRng) -> Self {
        Self {
            probability: noise.probability,
            rng,
        }
    }

    /// Zero stays zero; otherwise with the configured probability the value
    /// moves by exactly one pixel, never below zero.
    pub fn perturb(&self, value: f64) -> f64 {
        if value == 0.0 || !value.is_finite() || !self.rng.chance(self.probability) {
            return value;
        }
        let delta = if self.rng.chance(0.5) { 1.0 } else { -1.0 };
        (value + delta).max(0.0)
    }
}

/// Plain-object copy of a `DOMRect` with noised size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectSnapshot {
    pub x: f64,
    pub y: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl RectSnapshot {
    const FIELDS: [&'static str; 8] = ["x", "y", "top", "right", "bottom", "left", "width", "height"];

    /// Only `width` and `height` are touched; edges keep their true values.
    pub fn noised(self, noise: &GeometryNoise) -> Self {
        Self {
            width: noise.perturb(self.width),
            height: noise.perturb(self.height),
            ..self
        }
    }

    fn read(rect: &JsValue) -> Result<Self> {
        let mut values = [0.0; 8];
        for (slot, field) in values.iter_mut().zip(Self::FIELDS) {
            *slot = member(rect, field)?.as_f64().unwrap_or(0.0);
        }
        let [x, y, top, right, bottom, left, width, height] = values;
        Ok(Self { x, y, top, right, bottom, left, width, height })
    }
}

/// One entry of the `queryLocalFonts` answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFontRecord {
    pub family: &'static str,
    pub full_name: &'static str,
    pub postscript_name: String,
    pub style: &'static str,
}

pub fn local_font_records() -> Vec<LocalFontRecord> {
    LOCAL_FONT_FAMILIES
        .iter()
        .map(|&family| LocalFontRecord {
            family,
            full_name: family,
            postscript_name: family.replace(' ', ""),
            style: "Regular",
        })
        .collect()
}

// ===== DOM layer =====

pub struct FontSurface {
    scope: JsValue,
    rng: SessionRng,
    marker: PatchMarker,
}

impl FontSurface {
    pub fn new(scope: JsValue, rng: SessionRng) -> Self {
        Self {
            scope,
            rng,
            marker: PatchMarker::default(),
        }
    }

    fn patch_geometry(&self, noise: &Rc<GeometryNoise>) -> Result<()> {
        for (owner, property) in GEOMETRY_PROPERTIES {
            let proto = proxy_helpers::prototype_of(&self.scope, owner)?
                .ok_or_else(|| PoisonError::Unsupported((*owner).into()))?;
            let noise = Rc::clone(noise);
            proxy_helpers::wrap_accessor(
                &proto,
                property,
                trap(move |getter, this_arg, args| {
                    let value = proxy_helpers::call_function(&getter, &this_arg, &args)?;
                    Ok(match value.as_f64() {
                        Some(v) => JsValue::from_f64(noise.perturb(v)),
                        None => value,
                    })
                }),
            )
            .map_err(|e| PoisonError::patch("font", PoisonError::describe_js(&e)))?;
        }

        let proto = proxy_helpers::prototype_of(&self.scope, "HTMLElement")?
            .ok_or_else(|| PoisonError::Unsupported("HTMLElement".into()))?;
        let noise = Rc::clone(noise);
        proxy_helpers::wrap_method(
            &proto,
            "getBoundingClientRect",
            trap(move |target, this_arg, args| {
                let rect = proxy_helpers::call_function(&target, &this_arg, &args)?;
                let snapshot = RectSnapshot::read(&rect).map_err(JsValue::from)?.noised(&noise);
                let plain = serde_wasm_bindgen::to_value(&snapshot)?;
                // Keep rect.toJSON() working on the copy
                let to_json = member(&rect, "toJSON")?;
                if to_json.is_function() {
                    js_sys::Reflect::set(&plain, &JsValue::from_str("toJSON"), &to_json)?;
                }
                Ok(plain)
            }),
        )
        .map_err(|e| PoisonError::patch("font", PoisonError::describe_js(&e)))?;
        Ok(())
    }

    fn patch_font_apis(&self) -> Result<()> {
        if member(&self.scope, "queryLocalFonts")?.is_function() {
            proxy_helpers::wrap_method(
                &self.scope,
                "queryLocalFonts",
                trap(|_, _, _| {
                    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
                    let fonts = local_font_records().serialize(&serializer)?;
                    Ok(Promise::resolve(&fonts).into())
                }),
            )?;
        }

        if let Some(proto) = proxy_helpers::prototype_of(&self.scope, "FontFace")? {
            proxy_helpers::wrap_method(
                &proto,
                "load",
                trap(|target, this_arg, args| {
                    let family = member(&this_arg, "family")?.as_string().unwrap_or_default();
                    log::debug!("FontFace.load({})", family);
                    proxy_helpers::call_function(&target, &this_arg, &args)
                }),
            )?;
        }
        Ok(())
    }
}

impl SurfaceInterceptor for FontSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Font
    }

    fn marker(&self) -> &PatchMarker {
        &self.marker
    }

    fn marker_mut(&mut self) -> &mut PatchMarker {
        &mut self.marker
    }

    fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()> {
        if is_absent(&member(&self.scope, "Element")?) {
            return Err(PoisonError::Unsupported("Element".into()));
        }
        let noise = Rc::new(GeometryNoise::new(profile.font_noise, self.rng.clone()));
        self.patch_geometry(&noise)?;
        self.patch_font_apis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(p: f64, seed: u64) -> GeometryNoise {
        GeometryNoise::new(FontNoise { probability: p }, SessionRng::seeded(seed))
    }

    #[test]
    fn test_zero_is_untouched() {
        let noise = noise(1.0, 1);
        for _ in 0..100 {
            assert_eq!(noise.perturb(0.0), 0.0);
        }
    }

    #[test]
    fn test_noise_is_one_pixel() {
        let noise = noise(1.0, 2);
        let mut up = false;
        let mut down = false;
        for _ in 0..200 {
            let v = noise.perturb(100.0);
            assert!(v == 99.0 || v == 101.0, "unexpected {}", v);
            up |= v == 101.0;
            down |= v == 99.0;
        }
        assert!(up && down);
    }

    #[test]
    fn test_noise_rate() {
        let noise = noise(0.1, 3);
        let changed = (0..10_000).filter(|_| noise.perturb(50.0) != 50.0).count();
        assert!(changed > 800 && changed < 1200, "changed {}/10000", changed);
    }

    #[test]
    fn test_never_negative() {
        let noise = noise(1.0, 4);
        for _ in 0..100 {
            assert!(noise.perturb(0.5) >= 0.0);
        }
    }

    #[test]
    fn test_rect_only_size_noised() {
        let rect = RectSnapshot {
            x: 10.0,
            y: 20.0,
            top: 20.0,
            right: 110.0,
            bottom: 70.0,
            left: 10.0,
            width: 100.0,
            height: 50.0,
        };
        let noised = rect.noised(&noise(1.0, 5));
        assert_eq!((noised.x, noised.y, noised.top, noised.left), (10.0, 20.0, 20.0, 10.0));
        assert_eq!((noised.right, noised.bottom), (110.0, 70.0));
        assert_eq!((noised.width - 100.0).abs(), 1.0);
        assert_eq!((noised.height - 50.0).abs(), 1.0);
    }

    #[test]
    fn test_local_fonts() {
        let records = local_font_records();
        let families: Vec<_> = records.iter().map(|r| r.family).collect();
        assert_eq!(families, LOCAL_FONT_FAMILIES);
        assert_eq!(records[3].postscript_name, "TimesNewRoman");

        let json = serde_json::to_value(&records[1]).unwrap();
        assert_eq!(json["fullName"], "Courier New");
    }
}
