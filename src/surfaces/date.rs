//! Clock normalization to UTC.
//!
//! Local-time accessors become aliases of their UTC counterparts, the
//! timezone offset reads as zero, and the string renderings use fixed
//! `YYYY-MM-DD` / `HH:MM:SS` layouts so neither the host timezone nor the
//! host locale leaks through `Date`. `Intl.DateTimeFormat` keeps the
//! caller's locale but always formats in UTC.

use std::rc::Rc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::proxy_helpers::{self, is_absent, member, trap};
use super::{PatchMarker, SurfaceInterceptor, SurfaceKind};
use crate::error::{PoisonError, Result};
use crate::profile::IdentityProfile;

/// `(local, utc)` getter pairs.
pub const GETTER_ALIASES: &[(&str, &str)] = &[
    ("getDate", "getUTCDate"),
    ("getDay", "getUTCDay"),
    ("getFullYear", "getUTCFullYear"),
    ("getHours", "getUTCHours"),
    ("getMilliseconds", "getUTCMilliseconds"),
    ("getMinutes", "getUTCMinutes"),
    ("getMonth", "getUTCMonth"),
    ("getSeconds", "getUTCSeconds"),
];

/// `(local, utc)` setter pairs.
pub const SETTER_ALIASES: &[(&str, &str)] = &[
    ("setDate", "setUTCDate"),
    ("setFullYear", "setUTCFullYear"),
    ("setHours", "setUTCHours"),
    ("setMilliseconds", "setUTCMilliseconds"),
    ("setMinutes", "setUTCMinutes"),
    ("setMonth", "setUTCMonth"),
    ("setSeconds", "setUTCSeconds"),
];

/// Methods replaced by fixed-layout renderings.
pub const RENDERED_METHODS: &[&str] = &[
    "toLocaleDateString",
    "toLocaleTimeString",
    "toLocaleString",
    "toString",
    "toTimeString",
];

/// Legacy two-digit-year methods; absent on some engines.
pub const LEGACY_METHODS: &[&str] = &["getYear", "setYear"];

pub const UTC_TIME_ZONE: &str = "UTC";
pub const DEFAULT_LOCALE: &str = "en-US";
pub const INVALID_DATE: &str = "Invalid Date";

/// Convert a JS time value (ms since the epoch) into a UTC timestamp.
fn utc(time_value: f64) -> Option<DateTime<Utc>> {
    if !time_value.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(time_value as i64).single()
}

/// Years the fixed layouts can express as four digits.
const RENDERABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// `None` when the fixed layout cannot express the time value; the caller
/// then falls back to the platform rendering.
fn render(time_value: f64, layout: &str) -> Option<String> {
    if !time_value.is_finite() {
        return Some(INVALID_DATE.to_string());
    }
    let t = utc(time_value)?;
    if !RENDERABLE_YEARS.contains(&t.year()) {
        return None;
    }
    Some(t.format(layout).to_string())
}

/// `YYYY-MM-DD`.
pub fn format_date(time_value: f64) -> Option<String> {
    render(time_value, "%Y-%m-%d")
}

/// `HH:MM:SS`.
pub fn format_time(time_value: f64) -> Option<String> {
    render(time_value, "%H:%M:%S")
}

/// `YYYY-MM-DD HH:MM:SS UTC`.
pub fn format_date_time(time_value: f64) -> Option<String> {
    render(time_value, "%Y-%m-%d %H:%M:%S UTC")
}

/// `HH:MM:SS UTC`.
pub fn format_time_string(time_value: f64) -> Option<String> {
    render(time_value, "%H:%M:%S UTC")
}

/// Rendering for one of [`RENDERED_METHODS`]. `None` for other methods and
/// for dates outside the four-digit year range.
pub fn render_method(method: &str, time_value: f64) -> Option<String> {
    match method {
        "toLocaleDateString" => format_date(time_value),
        "toLocaleTimeString" => format_time(time_value),
        "toLocaleString" | "toString" => format_date_time(time_value),
        "toTimeString" => format_time_string(time_value),
        _ => None,
    }
}

/// `getYear`: UTC full year minus 1900, `NaN` for an invalid date.
pub fn legacy_year(time_value: f64) -> f64 {
    utc(time_value)
        .map(|t| f64::from(t.year() - 1900))
        .unwrap_or(f64::NAN)
}

/// `setYear` argument mapping: years below 100 are offsets from 1900.
pub fn normalize_legacy_year(year: f64) -> f64 {
    if year < 100.0 {
        year + 1900.0
    } else {
        year
    }
}

/// The locale argument of `Intl.DateTimeFormat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocaleArg {
    Tag(String),
    List(Vec<String>),
    /// Missing, falsy or of an unusable type.
    Default,
}

impl LocaleArg {
    pub fn from_js(value: &JsValue) -> Self {
        if let Some(tag) = value.as_string() {
            if !tag.is_empty() {
                return LocaleArg::Tag(tag);
            }
        } else if Array::is_array(value) {
            let list: &Array = value.unchecked_ref();
            return LocaleArg::List(list.iter().filter_map(|v| v.as_string()).collect());
        }
        LocaleArg::Default
    }

    pub fn to_js(&self) -> JsValue {
        match self {
            LocaleArg::Tag(tag) => JsValue::from_str(tag),
            LocaleArg::List(list) => list.iter().map(|s| JsValue::from_str(s)).collect::<Array>().into(),
            LocaleArg::Default => JsValue::from_str(DEFAULT_LOCALE),
        }
    }
}

/// `[locale, { ...options, timeZone: "UTC" }]`.
fn utc_format_args(args: &JsValue) -> std::result::Result<Array, JsValue> {
    let list = proxy_helpers::args_array(args);
    let locale = LocaleArg::from_js(&list.get(0)).to_js();
    let options = proxy_helpers::assign_with(&list.get(1), "timeZone", &JsValue::from_str(UTC_TIME_ZONE))?;
    Ok(Array::of2(&locale, &options))
}

// ===== DOM layer =====

pub struct DateSurface {
    scope: JsValue,
    marker: PatchMarker,
}

impl DateSurface {
    pub fn new(scope: JsValue) -> Self {
        Self {
            scope,
            marker: PatchMarker::default(),
        }
    }

    fn patch_intl(&self) -> Result<()> {
        let intl = member(&self.scope, "Intl")?;
        if is_absent(&intl) {
            log::debug!("Intl is not available; skipping DateTimeFormat");
            return Ok(());
        }
        let original = member(&intl, "DateTimeFormat")?;
        if !original.is_function() {
            return Ok(());
        }

        let construct = trap(|target, args, new_target| {
            let target: Function = target.unchecked_into();
            let new_target: Function = new_target.unchecked_into();
            Reflect::construct_with_new_target(&target, &utc_format_args(&args)?, &new_target)
        });
        // Called without `new`
        let apply = trap(|target, _this, args| {
            let target: Function = target.unchecked_into();
            Reflect::construct(&target, &utc_format_args(&args)?)
        });
        let proxied = proxy_helpers::proxy_constructor(&original, construct, Some(apply))?;
        Reflect::set(&intl, &JsValue::from_str("DateTimeFormat"), &proxied)?;
        Ok(())
    }
}

impl SurfaceInterceptor for DateSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Date
    }

    fn marker(&self) -> &PatchMarker {
        &self.marker
    }

    fn marker_mut(&mut self) -> &mut PatchMarker {
        &mut self.marker
    }

    fn patch(&mut self, _profile: &Rc<IdentityProfile>) -> Result<()> {
        let proto = proxy_helpers::prototype_of(&self.scope, "Date")?
            .ok_or_else(|| PoisonError::Unsupported("Date".into()))?;

        let get_time: Function = member(&proto, "getTime")?
            .dyn_into()
            .map_err(|_| PoisonError::patch("date", "getTime is not a function"))?;
        let set_utc_full_year = member(&proto, "setUTCFullYear")?;

        // --- Accessor aliases ---
        for (local, utc_name) in GETTER_ALIASES.iter().chain(SETTER_ALIASES) {
            let utc_fn = member(&proto, utc_name)?;
            if !utc_fn.is_function() {
                return Err(PoisonError::patch("date", format!("{} is missing", utc_name)));
            }
            Reflect::set(&proto, &JsValue::from_str(local), &utc_fn)?;
        }

        proxy_helpers::wrap_method(&proto, "getTimezoneOffset", trap(|_, _, _| Ok(JsValue::from_f64(0.0))))?;

        // --- Legacy year accessors ---
        if member(&proto, "getYear")?.is_function() {
            let get_time = get_time.clone();
            proxy_helpers::wrap_method(
                &proto,
                "getYear",
                trap(move |_, this_arg, _| {
                    let time = get_time.call0(&this_arg)?.as_f64().unwrap_or(f64::NAN);
                    Ok(JsValue::from_f64(legacy_year(time)))
                }),
            )?;
        }
        if member(&proto, "setYear")?.is_function() {
            let set_full_year = set_utc_full_year.clone();
            proxy_helpers::wrap_method(
                &proto,
                "setYear",
                trap(move |_, this_arg, args| {
                    let year = proxy_helpers::args_array(&args).get(0).as_f64().unwrap_or(f64::NAN);
                    let year = JsValue::from_f64(normalize_legacy_year(year));
                    proxy_helpers::call_function(&set_full_year, &this_arg, &Array::of1(&year))
                }),
            )?;
        }

        // --- Fixed renderings ---
        for method in RENDERED_METHODS {
            let get_time = get_time.clone();
            proxy_helpers::wrap_method(
                &proto,
                method,
                trap(move |original, this_arg, args| {
                    let time = get_time.call0(&this_arg)?.as_f64().unwrap_or(f64::NAN);
                    match render_method(method, time) {
                        Some(rendered) => Ok(JsValue::from_str(&rendered)),
                        None => proxy_helpers::call_function(&original, &this_arg, &args),
                    }
                }),
            )?;
        }

        self.patch_intl()
    }
}
