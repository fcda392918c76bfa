//! Fingerprint surface interceptors.
//!
//! Each surface patches one family of platform APIs (canvas readback, the
//! clock, screen geometry, font metrics, WebRTC) and reads its parameters
//! from the shared [`IdentityProfile`].
//!
//! ## Install contract
//!
//! - `install` runs at most once per surface; the outcome of the first
//!   attempt is remembered in the surface's [`PatchMarker`]
//! - a failure leaves that one surface unprotected and is reported, never
//!   thrown to the page
//! - a missing platform feature turns the surface into a no-op
//!
//! Every surface splits into a pure core (noise, rewriting, formatting) that
//! is unit tested natively and a thin DOM layer that wires the core into
//! Proxy traps.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{PoisonError, Result};
use crate::profile::IdentityProfile;

pub mod canvas;
pub mod date;
pub mod font;
pub mod proxy_helpers;
pub mod screen;
pub mod webrtc;

pub use canvas::CanvasSurface;
pub use date::DateSurface;
pub use font::FontSurface;
pub use screen::ScreenSurface;
pub use webrtc::WebRtcSurface;

/// The patchable surface families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Canvas,
    Date,
    Screen,
    Font,
    WebRtc,
}

impl SurfaceKind {
    pub const ALL: [SurfaceKind; 5] = [
        SurfaceKind::Canvas,
        SurfaceKind::Date,
        SurfaceKind::Screen,
        SurfaceKind::Font,
        SurfaceKind::WebRtc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SurfaceKind::Canvas => "canvas",
            SurfaceKind::Date => "date",
            SurfaceKind::Screen => "screen",
            SurfaceKind::Font => "font",
            SurfaceKind::WebRtc => "webrtc",
        }
    }

    /// How repeated reads of this surface relate to each other.
    pub fn noise_policy(self) -> NoisePolicy {
        match self {
            SurfaceKind::Canvas => NoisePolicy::SessionStable,
            SurfaceKind::Date => NoisePolicy::Deterministic,
            SurfaceKind::Screen | SurfaceKind::Font | SurfaceKind::WebRtc => NoisePolicy::PerRead,
        }
    }
}

/// Relationship between consecutive reads of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisePolicy {
    /// One offset for the whole context lifetime.
    SessionStable,
    /// Fresh noise on every read.
    PerRead,
    /// No noise; values are normalized instead.
    Deterministic,
}

/// Result of an install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
    /// The platform lacks the API; the surface is a no-op.
    Unsupported(String),
    /// Patching failed; the surface reports real values.
    Unprotected(String),
}

impl InstallOutcome {
    /// Whether patched values are being served.
    pub fn is_protected(&self) -> bool {
        matches!(self, InstallOutcome::Installed | InstallOutcome::AlreadyInstalled)
    }
}

/// Remembers the first install outcome of a surface.
#[derive(Debug, Default, Clone)]
pub struct PatchMarker {
    first: Option<InstallOutcome>,
}

impl PatchMarker {
    pub fn is_set(&self) -> bool {
        self.first.is_some()
    }

    pub fn outcome(&self) -> Option<&InstallOutcome> {
        self.first.as_ref()
    }

    fn record(&mut self, outcome: InstallOutcome) {
        self.first.get_or_insert(outcome);
    }
}

/// A patchable platform API family.
pub trait SurfaceInterceptor {
    fn kind(&self) -> SurfaceKind;

    fn marker(&self) -> &PatchMarker;

    fn marker_mut(&mut self) -> &mut PatchMarker;

    /// Apply the patches. Called at most once.
    fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()>;

    /// Install once, converting every failure into an outcome.
    fn install(&mut self, profile: &Rc<IdentityProfile>) -> InstallOutcome {
        let name = self.kind().name();
        if let Some(first) = self.marker().outcome() {
            return match first {
                InstallOutcome::Installed => InstallOutcome::AlreadyInstalled,
                other => other.clone(),
            };
        }

        let outcome = match self.patch(profile) {
            Ok(()) => {
                log::info!("🛡️ {} surface installed", name);
                InstallOutcome::Installed
            }
            Err(PoisonError::Unsupported(what)) => {
                log::info!("⏭️ {} surface skipped: {} is not available", name, what);
                InstallOutcome::Unsupported(what)
            }
            Err(e) => {
                log::warn!("⚠️ {} surface left unprotected: {}", name, e);
                InstallOutcome::Unprotected(e.to_string())
            }
        };
        self.marker_mut().record(outcome.clone());
        outcome
    }
}
