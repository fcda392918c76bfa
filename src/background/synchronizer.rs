//! Mirrors the header identity into the declarative rule engine.
//!
//! Every update removes the managed rule ids and adds the fresh rules in one
//! engine call. Updates are serialized through a single async writer, so two
//! overlapping rotations can never interleave their remove/add pairs. A
//! failed update leaves the previously installed rules in place.

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use futures::lock::Mutex;
use serde::Serialize;

use super::rules::{HeaderRule, RuleUpdate, MANAGED_RULE_IDS};
use crate::config::UserAgentSource;
use crate::error::{PoisonError, Result};
use crate::profile::{HeaderProfile, IdentityProfileGenerator};
use crate::rng::SessionRng;

/// The declarative request-rule engine.
#[async_trait(?Send)]
pub trait RuleEngine {
    /// Apply one update. Either all of it takes effect or none of it.
    async fn update_dynamic_rules(&self, update: &RuleUpdate) -> Result<()>;

    /// Currently installed dynamic rules.
    async fn dynamic_rules(&self) -> Result<Vec<HeaderRule>>;
}

/// Supplies a new header identity for each rotation.
pub trait HeaderSource {
    fn next_headers(&self) -> HeaderProfile;
}

pub struct RandomHeaderSource {
    rng: SessionRng,
    user_agent: UserAgentSource,
    native_user_agent: Option<String>,
}

impl RandomHeaderSource {
    pub fn new(rng: SessionRng, user_agent: UserAgentSource, native_user_agent: Option<String>) -> Self {
        Self {
            rng,
            user_agent,
            native_user_agent,
        }
    }
}

impl HeaderSource for RandomHeaderSource {
    fn next_headers(&self) -> HeaderProfile {
        IdentityProfileGenerator::generate_headers_with(
            &mut self.rng.clone(),
            &self.user_agent,
            self.native_user_agent.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub applied: u64,
    pub failed: u64,
}

pub struct HeaderRuleSynchronizer<E: RuleEngine> {
    engine: E,
    source: Box<dyn HeaderSource>,
    writer: Mutex<()>,
    stats: Cell<SyncStats>,
    current: RefCell<Option<HeaderProfile>>,
}

impl<E: RuleEngine> HeaderRuleSynchronizer<E> {
    pub fn new(engine: E, source: Box<dyn HeaderSource>) -> Self {
        Self {
            engine,
            source,
            writer: Mutex::new(()),
            stats: Cell::new(SyncStats::default()),
            current: RefCell::new(None),
        }
    }

    /// Replace the managed rules with a freshly generated header identity.
    pub async fn update_rules(&self) -> Result<()> {
        let _writer = self.writer.lock().await;

        let headers = self.source.next_headers();
        let update = RuleUpdate::replace_managed(&headers);
        let mut stats = self.stats.get();

        let result = self.engine.update_dynamic_rules(&update).await;
        match result {
            Ok(()) => {
                stats.applied += 1;
                log::info!(
                    "🔄 Header rules rotated (User-Agent: {}, Accept-Language: {})",
                    headers.user_agent,
                    headers.accept_language
                );
                *self.current.borrow_mut() = Some(headers);
                self.stats.set(stats);
                Ok(())
            }
            Err(e) => {
                stats.failed += 1;
                self.stats.set(stats);
                log::warn!("⚠️ Header rule update failed, previous rules stay active: {}", e);
                Err(match e {
                    PoisonError::RuleSync(_) => e,
                    other => PoisonError::RuleSync(other.to_string()),
                })
            }
        }
    }

    /// Installed rules owned by this engine.
    pub async fn installed_rules(&self) -> Result<Vec<HeaderRule>> {
        let rules = self.engine.dynamic_rules().await?;
        Ok(rules
            .into_iter()
            .filter(|rule| MANAGED_RULE_IDS.contains(&rule.id))
            .collect())
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.get()
    }

    /// The header identity of the last successful update.
    pub fn current_headers(&self) -> Option<HeaderProfile> {
        self.current.borrow().clone()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}
