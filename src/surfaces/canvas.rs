//! Canvas readback poisoning.
//!
//! On the first read of a canvas (`toDataURL`, `toBlob`, `getImageData`) the
//! true pixels are snapshotted, a coarse grid of pixels is shifted by the
//! profile's `canvas_shift`, the shifted buffer is written back, and a
//! zero-delay restore is scheduled. While a snapshot is live the canvas is
//! not poisoned again, so every read inside that window sees identical
//! bytes. The restore writes the snapshot back verbatim and frees the entry.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use gloo_timers::callback::Timeout;
use js_sys::{Array, Function, Uint8ClampedArray, WeakMap};
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};

use super::proxy_helpers::{self, is_absent, member, trap};
use super::{PatchMarker, SurfaceInterceptor, SurfaceKind};
use crate::error::{PoisonError, Result};
use crate::profile::{CanvasShift, IdentityProfile};

/// Stable per-canvas identifier for the lifetime of the context.
pub type CanvasId = u32;

/// Grid density: one sample column/row per tenth of each dimension.
const GRID_DIVISOR: u32 = 10;

/// A pixel surface that can be read and overwritten.
pub trait RasterTarget {
    fn canvas_id(&self) -> CanvasId;

    /// `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    /// Read RGBA pixels, bypassing any installed patch.
    fn read_original(&self) -> Result<Vec<u8>>;

    fn write(&self, pixels: &[u8]) -> Result<()>;
}

/// Runs a task after the current script turn.
pub trait DeferredRestore {
    fn defer(&self, task: Box<dyn FnOnce()>);
}

/// Shift every `max(1, dim / 10)`-th pixel along both axes.
///
/// Color channels are clamped to `[0, 255]`; alpha is left alone. A buffer
/// shorter than `width * height * 4` is shifted as far as it reaches.
pub fn shift_sample_grid(pixels: &mut [u8], width: u32, height: u32, shift: CanvasShift) {
    let step_x = (width / GRID_DIVISOR).max(1) as usize;
    let step_y = (height / GRID_DIVISOR).max(1) as usize;
    let width = width as usize;

    for y in (0..height as usize).step_by(step_y) {
        for x in (0..width).step_by(step_x) {
            let offset = (y * width + x) * 4;
            if let Some(pixel) = pixels.get_mut(offset..offset + 4) {
                shift.apply(pixel);
            }
        }
    }
}

/// Live snapshots of canvases currently serving poisoned pixels.
#[derive(Debug, Default)]
struct SnapshotArena {
    snapshots: HashMap<CanvasId, Vec<u8>>,
}

/// Snapshot, poison and restore bookkeeping for all canvases of a context.
#[derive(Clone)]
pub struct CanvasPoisoner {
    shift: CanvasShift,
    arena: Rc<RefCell<SnapshotArena>>,
}

impl CanvasPoisoner {
    pub fn new(shift: CanvasShift) -> Self {
        Self {
            shift,
            arena: Rc::new(RefCell::new(SnapshotArena::default())),
        }
    }

    pub fn shift(&self) -> CanvasShift {
        self.shift
    }

    /// Whether `id` currently holds poisoned pixels.
    pub fn is_poisoned(&self, id: CanvasId) -> bool {
        self.arena.borrow().snapshots.contains_key(&id)
    }

    pub fn live_snapshots(&self) -> usize {
        self.arena.borrow().snapshots.len()
    }

    /// Poison `target` unless it is empty or already poisoned.
    ///
    /// Returns `Ok(true)` when a snapshot was taken and a restore scheduled.
    pub fn protect<T>(&self, target: Rc<T>, scheduler: &dyn DeferredRestore) -> Result<bool>
    where
        T: RasterTarget + 'static,
    {
        let id = target.canvas_id();
        if self.is_poisoned(id) {
            return Ok(false);
        }
        let (width, height) = target.size();
        if width == 0 || height == 0 {
            return Ok(false);
        }

        let original = target.read_original()?;
        let mut poisoned = original.clone();
        shift_sample_grid(&mut poisoned, width, height, self.shift);

        // The entry must exist before the write so nested reads see it
        self.arena.borrow_mut().snapshots.insert(id, original);
        if let Err(e) = target.write(&poisoned) {
            self.arena.borrow_mut().snapshots.remove(&id);
            return Err(e);
        }

        let arena = Rc::clone(&self.arena);
        scheduler.defer(Box::new(move || {
            let snapshot = arena.borrow_mut().snapshots.remove(&id);
            if let Some(snapshot) = snapshot {
                if let Err(e) = target.write(&snapshot) {
                    log::warn!("⚠️ Canvas {} restore failed: {}", id, e);
                }
            }
        }));
        Ok(true)
    }
}

// ===== DOM layer =====

/// Zero-delay timer restore.
struct TimerRestore;

impl DeferredRestore for TimerRestore {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        Timeout::new(0, task).forget();
    }
}

/// Assigns ids to canvas objects without keeping them alive.
#[derive(Clone)]
struct CanvasRegistry {
    ids: WeakMap,
    next: Rc<Cell<CanvasId>>,
}

impl CanvasRegistry {
    fn new() -> Self {
        Self {
            ids: WeakMap::new(),
            next: Rc::new(Cell::new(1)),
        }
    }

    fn id_of(&self, canvas: &JsValue) -> CanvasId {
        let key: &js_sys::Object = canvas.unchecked_ref();
        if let Some(id) = self.ids.get(key).as_f64() {
            return id as CanvasId;
        }
        let id = self.next.get();
        self.next.set(id.wrapping_add(1));
        self.ids.set(key, &JsValue::from(id));
        id
    }
}

/// A 2d canvas read through the unpatched `getImageData`.
struct DomCanvas {
    id: CanvasId,
    width: u32,
    height: u32,
    context: JsValue,
    original_get_image_data: Function,
}

impl DomCanvas {
    /// `None` when the canvas has no 2d context (WebGL, bitmaprenderer).
    fn attach(
        canvas: &JsValue,
        context: Option<JsValue>,
        registry: &CanvasRegistry,
        original_get_image_data: &Function,
    ) -> Result<Option<Self>> {
        let context = match context {
            Some(ctx) => ctx,
            None => {
                let get_context = member(canvas, "getContext")?;
                if !get_context.is_function() {
                    return Ok(None);
                }
                proxy_helpers::call_function(&get_context, canvas, &Array::of1(&"2d".into()))?
            }
        };
        if is_absent(&context) {
            return Ok(None);
        }
        let dimension = |name: &str| -> Result<u32> {
            Ok(member(canvas, name)?.as_f64().unwrap_or(0.0).max(0.0) as u32)
        };
        Ok(Some(Self {
            id: registry.id_of(canvas),
            width: dimension("width")?,
            height: dimension("height")?,
            context,
            original_get_image_data: original_get_image_data.clone(),
        }))
    }
}

impl RasterTarget for DomCanvas {
    fn canvas_id(&self) -> CanvasId {
        self.id
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_original(&self) -> Result<Vec<u8>> {
        let args = Array::of4(&0.into(), &0.into(), &self.width.into(), &self.height.into());
        let image = self.original_get_image_data.apply(&self.context, &args)?;
        let data: Uint8ClampedArray = member(&image, "data")?.unchecked_into();
        Ok(data.to_vec())
    }

    fn write(&self, pixels: &[u8]) -> Result<()> {
        let image =
            web_sys::ImageData::new_with_u8_clamped_array_and_sh(Clamped(pixels), self.width, self.height)?;
        let put = member(&self.context, "putImageData")?;
        proxy_helpers::call_function(&put, &self.context, &Array::of3(&image, &0.into(), &0.into()))?;
        Ok(())
    }
}

/// Installs the canvas traps on a window.
pub struct CanvasSurface {
    scope: JsValue,
    marker: PatchMarker,
}

impl CanvasSurface {
    pub fn new(scope: JsValue) -> Self {
        Self {
            scope,
            marker: PatchMarker::default(),
        }
    }
}

fn poison_before_read(
    poisoner: &CanvasPoisoner,
    registry: &CanvasRegistry,
    original_get_image_data: &Function,
    canvas: &JsValue,
    context: Option<JsValue>,
) {
    let attached = DomCanvas::attach(canvas, context, registry, original_get_image_data);
    let outcome = match attached {
        Ok(Some(target)) => poisoner.protect(Rc::new(target), &TimerRestore),
        Ok(None) => Ok(false),
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        log::debug!("Canvas read served unpoisoned: {}", e);
    }
}

impl SurfaceInterceptor for CanvasSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Canvas
    }

    fn marker(&self) -> &PatchMarker {
        &self.marker
    }

    fn marker_mut(&mut self) -> &mut PatchMarker {
        &mut self.marker
    }

    fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()> {
        let canvas_proto = proxy_helpers::prototype_of(&self.scope, "HTMLCanvasElement")?
            .ok_or_else(|| PoisonError::Unsupported("HTMLCanvasElement".into()))?;
        let ctx_proto = proxy_helpers::prototype_of(&self.scope, "CanvasRenderingContext2D")?
            .ok_or_else(|| PoisonError::Unsupported("CanvasRenderingContext2D".into()))?;

        let poisoner = CanvasPoisoner::new(profile.canvas_shift);
        let registry = CanvasRegistry::new();
        let original_get_image_data: Function = member(&ctx_proto, "getImageData")?
            .dyn_into()
            .map_err(|_| PoisonError::patch("canvas", "getImageData is not a function"))?;

        // --- getImageData ---
        {
            let poisoner = poisoner.clone();
            let registry = registry.clone();
            let original = original_get_image_data.clone();
            proxy_helpers::wrap_method(
                &ctx_proto,
                "getImageData",
                trap(move |target, this_arg, args| {
                    let canvas = member(&this_arg, "canvas")?;
                    if !is_absent(&canvas) {
                        poison_before_read(&poisoner, &registry, &original, &canvas, Some(this_arg.clone()));
                    }
                    proxy_helpers::call_function(&target, &this_arg, &args)
                }),
            )
            .map_err(|e| PoisonError::patch("canvas", PoisonError::describe_js(&e)))?;
        }

        // --- toDataURL / toBlob ---
        for method in ["toDataURL", "toBlob"] {
            let poisoner = poisoner.clone();
            let registry = registry.clone();
            let original = original_get_image_data.clone();
            proxy_helpers::wrap_method(
                &canvas_proto,
                method,
                trap(move |target, this_arg, args| {
                    poison_before_read(&poisoner, &registry, &original, &this_arg, None);
                    proxy_helpers::call_function(&target, &this_arg, &args)
                }),
            )
            .map_err(|e| PoisonError::patch("canvas", PoisonError::describe_js(&e)))?;
        }

        // --- getContext: keep 2d readback on the CPU path ---
        proxy_helpers::wrap_method(
            &canvas_proto,
            "getContext",
            trap(|target, this_arg, args| {
                let list = proxy_helpers::args_array(&args);
                if list.get(0).as_string().as_deref() == Some("2d") {
                    let options = proxy_helpers::assign_with(&list.get(1), "willReadFrequently", &JsValue::TRUE)?;
                    list.set(1, options.into());
                }
                proxy_helpers::call_function(&target, &this_arg, &list)
            }),
        )
        .map_err(|e| PoisonError::patch("canvas", PoisonError::describe_js(&e)))?;

        log::debug!(
            "Canvas shift r={} g={} b={}",
            poisoner.shift().r,
            poisoner.shift().g,
            poisoner.shift().b
        );
        Ok(())
    }
}
