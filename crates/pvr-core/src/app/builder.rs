//! PvrManagerBuilder - collaborator のワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - 必須の port（store / epg / markers / strategy）が欠けていれば `BuildError::MissingPort`
//! - config が不正なら `BuildError::Config`
//! - remote recorder と clock は省略可能（remote なし = すべて local、clock は SystemClock）

use std::sync::Arc;

use tracing::info;

use super::manager::{Ports, PvrManager};
use crate::config::{ConfigError, PvrConfig};
use crate::ports::{
    Clock, ConflictStrategy, EpgLookup, MarkerStore, RemoteRecorder, SchedulerStore, SystemClock,
};

/// 使用例
/// ```ignore
/// let manager = PvrManagerBuilder::new()
///     .store(store)
///     .epg(guide)
///     .markers(markers)
///     .strategy(strategy)
///     .build()?;
/// ```
#[derive(Default)]
pub struct PvrManagerBuilder {
    store: Option<Arc<dyn SchedulerStore>>,
    remote: Option<Arc<dyn RemoteRecorder>>,
    epg: Option<Arc<dyn EpgLookup>>,
    markers: Option<Arc<dyn MarkerStore>>,
    strategy: Option<Arc<dyn ConflictStrategy>>,
    clock: Option<Arc<dyn Clock>>,
    config: PvrConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing port: {0}. Set it on the builder before build().")]
    MissingPort(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PvrManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn SchedulerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables whole-home recording.
    pub fn remote(mut self, remote: Arc<dyn RemoteRecorder>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn epg(mut self, epg: Arc<dyn EpgLookup>) -> Self {
        self.epg = Some(epg);
        self
    }

    pub fn markers(mut self, markers: Arc<dyn MarkerStore>) -> Self {
        self.markers = Some(markers);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: PvrConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Arc<PvrManager>, BuildError> {
        self.config.validate()?;
        let ports = Ports {
            store: self.store.ok_or(BuildError::MissingPort("store"))?,
            epg: self.epg.ok_or(BuildError::MissingPort("epg"))?,
            markers: self.markers.ok_or(BuildError::MissingPort("markers"))?,
            strategy: self.strategy.ok_or(BuildError::MissingPort("strategy"))?,
            remote: self.remote,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };
        info!(
            whole_home = ports.remote.is_some(),
            page_size = self.config.page_size,
            "pvr manager built"
        );
        Ok(Arc::new(PvrManager::new(ports, self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::StoreQueries;
    use crate::impls::{InMemoryMarkers, InMemoryStore, OverlapGroupingStrategy, StaticGuide};

    fn complete() -> PvrManagerBuilder {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));
        PvrManagerBuilder::new()
            .store(store.clone())
            .epg(Arc::new(StaticGuide::new()))
            .markers(Arc::new(InMemoryMarkers::new()))
            .strategy(Arc::new(OverlapGroupingStrategy::new(
                StoreQueries::new(store, 10),
                2,
            )))
    }

    #[test]
    fn test_build_success() {
        let manager = complete().build().unwrap();
        assert!(manager.remote().is_none());
    }

    #[test]
    fn test_build_missing_markers() {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));
        let result = PvrManagerBuilder::new()
            .store(store)
            .epg(Arc::new(StaticGuide::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingPort("markers"))));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = PvrConfig {
            page_size: 0,
            ..PvrConfig::default()
        };
        let result = complete().config(config).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }
}
