//! Page-context engine: one profile, a set of surfaces, one install report.

use std::cell::OnceCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::JsValue;

use crate::config::EngineConfig;
use crate::profile::{IdentityProfile, IdentityProfileGenerator};
use crate::rng::SessionRng;
use crate::surfaces::{
    CanvasSurface, DateSurface, FontSurface, InstallOutcome, NoisePolicy, ScreenSurface, SurfaceInterceptor,
    SurfaceKind, WebRtcSurface,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallRecord {
    pub surface: SurfaceKind,
    pub outcome: InstallOutcome,
    pub noise_policy: NoisePolicy,
}

/// Outcome of one `install_all` pass, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub records: Vec<InstallRecord>,
}

impl InstallReport {
    pub fn outcome_of(&self, surface: SurfaceKind) -> Option<&InstallOutcome> {
        self.records
            .iter()
            .find(|record| record.surface == surface)
            .map(|record| &record.outcome)
    }

    pub fn protected_count(&self) -> usize {
        self.records.iter().filter(|record| record.outcome.is_protected()).count()
    }
}

pub struct PageEngine {
    profile: OnceCell<Rc<IdentityProfile>>,
    rng: SessionRng,
    surfaces: Vec<Box<dyn SurfaceInterceptor>>,
}

impl PageEngine {
    pub fn new(rng: SessionRng) -> Self {
        Self {
            profile: OnceCell::new(),
            rng,
            surfaces: Vec::new(),
        }
    }

    /// Engine whose surfaces all read `profile`.
    pub fn with_profile(profile: IdentityProfile, rng: SessionRng) -> Self {
        let engine = Self::new(rng);
        let _ = engine.profile.set(Rc::new(profile));
        engine
    }

    /// Engine with the surfaces `config` enables, bound to `scope`.
    pub fn for_window(scope: &JsValue, config: &EngineConfig, rng: SessionRng) -> Self {
        let mut engine = Self::new(rng.clone());
        if config.canvas {
            engine.register(Box::new(CanvasSurface::new(scope.clone())));
        }
        if config.date {
            engine.register(Box::new(DateSurface::new(scope.clone())));
        }
        if config.screen {
            engine.register(Box::new(ScreenSurface::new(scope.clone(), rng.clone())));
        }
        if config.font {
            engine.register(Box::new(FontSurface::new(scope.clone(), rng.clone())));
        }
        if config.webrtc {
            engine.register(Box::new(WebRtcSurface::new(
                scope.clone(),
                config.webrtc_options.clone(),
                rng,
            )));
        }
        engine
    }

    /// Add a surface. A second surface of an already registered kind is
    /// ignored.
    pub fn register(&mut self, surface: Box<dyn SurfaceInterceptor>) {
        if self.surfaces.iter().any(|s| s.kind() == surface.kind()) {
            log::debug!("{} surface already registered", surface.kind().name());
            return;
        }
        self.surfaces.push(surface);
    }

    /// The context's profile, generated on first use.
    pub fn profile(&self) -> Rc<IdentityProfile> {
        Rc::clone(
            self.profile
                .get_or_init(|| Rc::new(IdentityProfileGenerator::generate_with(&mut self.rng.clone()))),
        )
    }

    pub fn install_all(&mut self) -> InstallReport {
        let profile = self.profile();
        let records: Vec<_> = self
            .surfaces
            .iter_mut()
            .map(|surface| InstallRecord {
                surface: surface.kind(),
                outcome: surface.install(&profile),
                noise_policy: surface.kind().noise_policy(),
            })
            .collect();

        let report = InstallReport { records };
        log::info!(
            "🛡️ {}/{} fingerprint surfaces protected",
            report.protected_count(),
            report.records.len()
        );
        report
    }

    /// Surfaces currently serving patched values.
    pub fn installed_kinds(&self) -> HashSet<SurfaceKind> {
        self.surfaces
            .iter()
            .filter(|s| s.marker().outcome().is_some_and(InstallOutcome::is_protected))
            .map(|s| s.kind())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PoisonError, Result};
    use crate::surfaces::PatchMarker;
    use std::cell::RefCell;

    struct Recording {
        kind: SurfaceKind,
        fail: Option<PoisonError>,
        seen: Rc<RefCell<Vec<Rc<IdentityProfile>>>>,
        marker: PatchMarker,
    }

    impl SurfaceInterceptor for Recording {
        fn kind(&self) -> SurfaceKind {
            self.kind
        }
        fn marker(&self) -> &PatchMarker {
            &self.marker
        }
        fn marker_mut(&mut self) -> &mut PatchMarker {
            &mut self.marker
        }
        fn patch(&mut self, profile: &Rc<IdentityProfile>) -> Result<()> {
            self.seen.borrow_mut().push(Rc::clone(profile));
            self.fail.clone().map_or(Ok(()), Err)
        }
    }

    fn recording(
        kind: SurfaceKind,
        fail: Option<PoisonError>,
        seen: &Rc<RefCell<Vec<Rc<IdentityProfile>>>>,
    ) -> Box<dyn SurfaceInterceptor> {
        Box::new(Recording {
            kind,
            fail,
            seen: Rc::clone(seen),
            marker: PatchMarker::default(),
        })
    }

    #[test]
    fn test_surfaces_share_one_profile() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = PageEngine::new(SessionRng::seeded(1));
        engine.register(recording(SurfaceKind::Canvas, None, &seen));
        engine.register(recording(SurfaceKind::Screen, None, &seen));
        engine.install_all();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(Rc::ptr_eq(&seen[0], &seen[1]));
        assert!(Rc::ptr_eq(&seen[0], &engine.profile()));
    }

    #[test]
    fn test_profile_created_once() {
        let engine = PageEngine::new(SessionRng::seeded(2));
        assert!(Rc::ptr_eq(&engine.profile(), &engine.profile()));
    }

    #[test]
    fn test_report_and_degradation() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = PageEngine::new(SessionRng::seeded(3));
        engine.register(recording(SurfaceKind::Canvas, None, &seen));
        engine.register(recording(
            SurfaceKind::WebRtc,
            Some(PoisonError::Unsupported("RTCPeerConnection".into())),
            &seen,
        ));
        engine.register(recording(SurfaceKind::Font, Some(PoisonError::patch("font", "frozen")), &seen));

        let report = engine.install_all();
        assert_eq!(report.outcome_of(SurfaceKind::Canvas), Some(&InstallOutcome::Installed));
        assert_eq!(
            report.outcome_of(SurfaceKind::WebRtc),
            Some(&InstallOutcome::Unsupported("RTCPeerConnection".into()))
        );
        assert!(matches!(report.outcome_of(SurfaceKind::Font), Some(InstallOutcome::Unprotected(_))));
        assert_eq!(report.protected_count(), 1);
        assert_eq!(engine.installed_kinds(), HashSet::from([SurfaceKind::Canvas]));
    }

    #[test]
    fn test_second_pass_reports_already_installed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = PageEngine::new(SessionRng::seeded(4));
        engine.register(recording(SurfaceKind::Date, None, &seen));
        engine.install_all();
        let report = engine.install_all();

        assert_eq!(report.outcome_of(SurfaceKind::Date), Some(&InstallOutcome::AlreadyInstalled));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_duplicate_kind_ignored() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = PageEngine::new(SessionRng::seeded(5));
        engine.register(recording(SurfaceKind::Date, None, &seen));
        engine.register(recording(SurfaceKind::Date, None, &seen));
        assert_eq!(engine.install_all().records.len(), 1);
    }

    #[test]
    fn test_report_json_carries_noise_policy() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = PageEngine::new(SessionRng::seeded(6));
        engine.register(recording(SurfaceKind::Canvas, None, &seen));
        let value = serde_json::to_value(engine.install_all()).unwrap();
        assert_eq!(value["records"][0]["surface"], "canvas");
        assert_eq!(value["records"][0]["outcome"]["status"], "installed");
        assert_eq!(value["records"][0]["noise_policy"], "session_stable");
    }
}
