//! WebRTC address and capability masking.
//!
//! `RTCPeerConnection` can reveal local and public addresses through the SDP
//! it generates, and media-device enumeration exposes stable hardware ids.
//!
//! - peer-connection constructors are proxied; with `disable_webrtc` set,
//!   construction fails with a resource error
//! - `createOffer`/`createAnswer` results and `setLocalDescription` input
//!   are rewritten by [`SdpRewriter`]
//! - `getStats` entries receive [`StatSample`] noise
//! - `enumerateDevices` answers through the [`DeviceMasker`]

pub mod devices;
pub mod sdp;
pub mod stats;

use std::rc::Rc;

use js_sys::{Array, Function, Object, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use super::proxy_helpers::{self, is_absent, member, trap};
use super::{PatchMarker, SurfaceInterceptor, SurfaceKind};
use crate::config::WebRtcOptions;
use crate::error::{PoisonError, Result};
use crate::profile::IdentityProfile;
use crate::rng::SessionRng;

pub use devices::{DeviceMasker, DeviceRecord};
pub use sdp::{AddressPolicy, SdpRewriter};
pub use stats::StatSample;

/// Peer-connection constructor names, in lookup order.
pub const CONSTRUCTOR_NAMES: [&str; 3] = ["RTCPeerConnection", "webkitRTCPeerConnection", "mozRTCPeerConnection"];

/// Message of the error thrown when WebRTC is disabled.
pub const DISABLED_MESSAGE: &str = "Failed to construct 'RTCPeerConnection': Not enough resources";

pub struct WebRtcSurface {
    scope: JsValue,
    options: WebRtcOptions,
    rng: SessionRng,
    marker: PatchMarker,
}

impl WebRtcSurface {
    pub fn new(scope: JsValue, options: WebRtcOptions, rng: SessionRng) -> Self {
        Self {
            scope,
            options,
            rng,
            marker: PatchMarker::default(),
        }
    }

    fn rewriter(&self, profile: &IdentityProfile) -> SdpRewriter {
        let policy = if self.options.remove_all_ips {
            AddressPolicy::RemoveAll
        } else {
            AddressPolicy::Substitute(profile.private_ip)
        };
        SdpRewriter::new(policy, self.options.add_noise)
    }

    fn find_constructor(&self) -> Result<Option<JsValue>> {
        for name in CONSTRUCTOR_NAMES {
            let ctor = member(&self.scope, name)?;
            if ctor.is_function() {
                return Ok(Some(ctor));
            }
        }
        Ok(None)
    }

    fn patch_constructor(&self, ctor: &JsValue) -> Result<()> {
        let disabled = self.options.disable_webrtc;
        let construct = trap(move |target, args, new_target| {
            if disabled {
                return Err(js_sys::Error::new(DISABLED_MESSAGE).into());
            }
            let target: Function = target.unchecked_into();
            let new_target: Function = new_target.unchecked_into();
            Reflect::construct_with_new_target(&target, &proxy_helpers::args_array(&args), &new_target)
        });
        let proxied = proxy_helpers::proxy_constructor(ctor, construct, None)?;
        for name in CONSTRUCTOR_NAMES {
            Reflect::set(&self.scope, &JsValue::from_str(name), &proxied)?;
        }
        Ok(())
    }

    fn patch_prototype(&self, ctor: &JsValue, rewriter: SdpRewriter) -> Result<()> {
        let proto = member(ctor, "prototype")?;

        for method in ["createOffer", "createAnswer"] {
            let rng = self.rng.clone();
            proxy_helpers::wrap_method(
                &proto,
                method,
                trap(move |target, this_arg, args| {
                    let result = proxy_helpers::call_function(&target, &this_arg, &args)?;
                    // Legacy callback form resolves to undefined; nothing to rewrite
                    let pending = JsFuture::from(Promise::resolve(&result));
                    let mut rng = rng.clone();
                    Ok(future_to_promise(async move {
                        let description = pending.await?;
                        rewrite_description(&description, &rewriter, &mut rng)
                    })
                    .into())
                }),
            )?;
        }

        let rng = self.rng.clone();
        proxy_helpers::wrap_method(
            &proto,
            "setLocalDescription",
            trap(move |target, this_arg, args| {
                let list = proxy_helpers::args_array(&args);
                let description = list.get(0);
                if description.is_object() {
                    list.set(0, rewrite_description(&description, &rewriter, &mut rng.clone())?);
                }
                proxy_helpers::call_function(&target, &this_arg, &list)
            }),
        )?;

        if self.options.add_noise {
            let rng = self.rng.clone();
            proxy_helpers::wrap_method(
                &proto,
                "getStats",
                trap(move |target, this_arg, args| {
                    let pending = JsFuture::from(Promise::resolve(&proxy_helpers::call_function(
                        &target, &this_arg, &args,
                    )?));
                    let rng = rng.clone();
                    Ok(future_to_promise(async move {
                        let report = pending.await?;
                        noise_stats_report(&report, &rng)?;
                        Ok(report)
                    })
                    .into())
                }),
            )?;
        }
        Ok(())
    }

    fn patch_media_devices(&self) -> Result<()> {
        let navigator = member(&self.scope, "navigator")?;
        let media = if is_absent(&navigator) {
            JsValue::UNDEFINED
        } else {
            member(&navigator, "mediaDevices")?
        };
        if is_absent(&media) || !member(&media, "enumerateDevices")?.is_function() {
            log::debug!("mediaDevices.enumerateDevices is not available");
            return Ok(());
        }

        let masker = Rc::new(DeviceMasker::new(self.rng.clone()));
        proxy_helpers::wrap_method(
            &media,
            "enumerateDevices",
            trap(move |target, this_arg, args| {
                if masker.should_hide() {
                    return Ok(Promise::resolve(&Array::new()).into());
                }
                let pending = JsFuture::from(Promise::resolve(&proxy_helpers::call_function(
                    &target, &this_arg, &args,
                )?));
                let masker = Rc::clone(&masker);
                Ok(future_to_promise(async move {
                    let list = pending.await?;
                    let devices = read_devices(&list)?;
                    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
                    Ok(masker.mask(&devices).serialize(&serializer)?)
                })
                .into())
            }),
        )?;
        Ok(())
    }
}

/// Copy of a session description with its SDP rewritten. Anything that is
/// not a description with a string `sdp` is returned unchanged.
fn rewrite_description(
    description: &JsValue,
    rewriter: &SdpRewriter,
    rng: &mut SessionRng,
) -> std::result::Result<JsValue, JsValue> {
    if !description.is_object() {
        return Ok(description.clone());
    }
    let Some(sdp) = member(description, "sdp")?.as_string() else {
        return Ok(description.clone());
    };
    let rewritten = Object::new();
    Reflect::set(&rewritten, &JsValue::from_str("type"), &member(description, "type")?)?;
    Reflect::set(&rewritten, &JsValue::from_str("sdp"), &JsValue::from_str(&rewriter.rewrite(&sdp, rng)))?;
    Ok(rewritten.into())
}

/// Noise every entry of an `RTCStatsReport` in place.
fn noise_stats_report(report: &JsValue, rng: &SessionRng) -> std::result::Result<(), JsValue> {
    let for_each = member(report, "forEach")?;
    if !for_each.is_function() {
        return Ok(());
    }
    let rng = rng.clone();
    let visit = Closure::wrap(Box::new(move |stat: JsValue| {
        let sample = StatSample::from_fields(
            stats::NOISED_FIELDS.map(|name| (name, member(&stat, name).ok().and_then(|v| v.as_f64()))),
        );
        write_stat_fields(&stat, sample.noised(&mut rng.clone()).fields());
    }) as Box<dyn FnMut(JsValue)>);
    // forEach is synchronous, so the closure can be dropped afterwards
    proxy_helpers::call_function(&for_each, report, &Array::of1(visit.as_ref()))?;
    Ok(())
}

/// Store noised values on one stats entry. Returns how many fields took.
fn write_stat_fields(stat: &JsValue, fields: impl IntoIterator<Item = (&'static str, f64)>) -> usize {
    let mut written = 0;
    for (name, value) in fields {
        match Reflect::set(stat, &JsValue::from_str(name), &JsValue::from_f64(value)) {
            Ok(true) => written += 1,
            Ok(false) => log::debug!("Stat field {} is read-only", name),
            Err(e) => log::debug!("Stat field {} not writable: {}", name, PoisonError::describe_js(&e)),
        }
    }
    written
}

fn read_devices(list: &JsValue) -> std::result::Result<Vec<DeviceRecord>, JsValue> {
    if !Array::is_array(list) {
        return Ok(Vec::new());
    }
    let text = |device: &JsValue, name: &str| -> std::result::Result<String, JsValue> {
        Ok(member(device, name)?.as_string().unwrap_or_default())
    };
    let list: &Array = list.unchecked_ref();
    list.iter()
        .map(|device| {
            Ok(DeviceRecord {
                device_id: text(&device, "deviceId")?,
                group_id: text(&device, "groupId")?,
                kind: text(&device, "kind")?,
                label: text(&device, "label")?,
            })
        })
        .collect()
}

impl SurfaceInterceptor for WebRtcSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::WebRtc
    }

    fn marker(&self) -> &PatchMarker {
        &self.marker
    }

    fn marker_mut(&mut self) -> &mut PatchMarker {
        &mut self.marker
    }

    fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()> {
        let ctor = self
            .find_constructor()?
            .ok_or_else(|| PoisonError::Unsupported("RTCPeerConnection".into()))?;

        if !self.options.disable_webrtc {
            self.patch_prototype(&ctor, self.rewriter(profile))
                .map_err(|e| PoisonError::patch("webrtc", e))?;
        }
        self.patch_constructor(&ctor)
            .map_err(|e| PoisonError::patch("webrtc", e))?;

        if self.options.mask_devices {
            self.patch_media_devices()?;
        }
        log::debug!(
            "WebRTC decoy address {} (disabled: {}, remove all: {})",
            profile.private_ip,
            self.options.disable_webrtc,
            self.options.remove_all_ips
        );
        Ok(())
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn fields() -> [(&'static str, f64); 2] {
        [("timestamp", 1_000.5), ("jitter", 0.02)]
    }

    #[wasm_bindgen_test]
    fn test_stat_fields_written() {
        let stat: JsValue = Object::new().into();
        assert_eq!(write_stat_fields(&stat, fields()), 2);
        assert_eq!(member(&stat, "jitter").unwrap().as_f64(), Some(0.02));
    }

    #[wasm_bindgen_test]
    fn test_frozen_stat_left_alone() {
        let stat = Object::new();
        Reflect::set(&stat, &JsValue::from_str("timestamp"), &JsValue::from_f64(7.0)).unwrap();
        let stat: JsValue = Object::freeze(&stat).into();
        assert_eq!(write_stat_fields(&stat, fields()), 0);
        assert_eq!(member(&stat, "timestamp").unwrap().as_f64(), Some(7.0));
    }

    #[wasm_bindgen_test]
    fn test_primitive_stat_ignored() {
        assert_eq!(write_stat_fields(&JsValue::from_f64(3.0), fields()), 0);
    }
}
