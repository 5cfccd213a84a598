//! ListenerRegistry - `PvrEventKind` → listener の一覧
//!
//! listener list と「名前付きの単一スロット callback」を一つにまとめたもの。
//! 登録・解除は冪等（同じ listener の二重登録も、未登録の解除も no-op）。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::domain::{PvrEvent, PvrEventKind};

pub trait PvrListener: Send + Sync {
    fn on_event(&self, event: &PvrEvent);
}

impl<F> PvrListener for F
where
    F: Fn(&PvrEvent) + Send + Sync,
{
    fn on_event(&self, event: &PvrEvent) {
        self(event)
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    by_kind: RwLock<HashMap<PvrEventKind, Vec<Arc<dyn PvrListener>>>>,
}

fn same(a: &Arc<dyn PvrListener>, b: &Arc<dyn PvrListener>) -> bool {
    // vtable は比較しない
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `listener` was already registered for `kind`.
    pub fn register(&self, kind: PvrEventKind, listener: Arc<dyn PvrListener>) -> bool {
        let mut by_kind = self.by_kind.write();
        let slot = by_kind.entry(kind).or_default();
        if slot.iter().any(|l| same(l, &listener)) {
            return false;
        }
        slot.push(listener);
        true
    }

    pub fn register_all(&self, listener: Arc<dyn PvrListener>) {
        for kind in PvrEventKind::ALL {
            self.register(kind, Arc::clone(&listener));
        }
    }

    /// Returns false when `listener` was not registered for `kind`.
    pub fn unregister(&self, kind: PvrEventKind, listener: &Arc<dyn PvrListener>) -> bool {
        let mut by_kind = self.by_kind.write();
        let Some(slot) = by_kind.get_mut(&kind) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|l| !same(l, listener));
        before != slot.len()
    }

    pub fn unregister_all(&self, listener: &Arc<dyn PvrListener>) {
        for kind in PvrEventKind::ALL {
            self.unregister(kind, listener);
        }
    }

    pub fn listener_count(&self, kind: PvrEventKind) -> usize {
        self.by_kind.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver to every listener of the event's kind. Returns how many got it.
    pub fn dispatch(&self, event: &PvrEvent) -> usize {
        let listeners: Vec<Arc<dyn PvrListener>> = self
            .by_kind
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        // ロックを離してから呼ぶ（listener が register し直してもよい）
        for listener in &listeners {
            listener.on_event(event);
        }
        trace!(kind = ?event.kind(), listeners = listeners.len(), "dispatched");
        listeners.len()
    }
}

/// Collects every event it sees.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct EventLog {
    events: parking_lot::Mutex<Vec<PvrEvent>>,
}

#[cfg(test)]
impl EventLog {
    pub fn events(&self) -> Vec<PvrEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<PvrEventKind> {
        self.events.lock().iter().map(PvrEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
impl PvrListener for EventLog {
    fn on_event(&self, event: &PvrEvent) {
        self.events.lock().push(event.clone());
    }
}
