//! EventPump - Store / remote のイベントチャネルを manager に流し込むループ
//!
//! - `shutdown_tx` で止める（watch チャネル）
//! - Store と remote の 2 本を `tokio::select!` で待つ。remote がない構成では
//!   その腕は永遠に pending になる

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::manager::PvrManager;
use crate::domain::{RemoteEvent, StoreEvent};

/// Pump handle.
/// - `request_shutdown()` でループを止める
/// - `shutdown_and_join()` で終了を待ち、チャネル登録も外す
pub struct EventPump {
    manager: Arc<PvrManager>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl EventPump {
    /// Subscribe to the Store (and the remote recorder, if any) and start
    /// forwarding their notifications.
    pub fn spawn(manager: Arc<PvrManager>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store_rx = manager.store().subscribe();
        let remote_rx = manager.remote().map(|r| r.subscribe());

        let m = Arc::clone(&manager);
        let join = tokio::spawn(async move {
            pump_loop(m, store_rx, remote_rx, shutdown_rx).await;
        });

        Self {
            manager,
            shutdown_tx,
            join,
        }
    }

    /// Events already queued are not drained.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "event pump panicked");
        }
        self.manager.store().unsubscribe();
        if let Some(remote) = self.manager.remote() {
            remote.unsubscribe();
        }
    }
}

async fn pump_loop(
    manager: Arc<PvrManager>,
    mut store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    mut remote_rx: Option<mpsc::UnboundedReceiver<RemoteEvent>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(remote = remote_rx.is_some(), "event pump started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                // 次のループで判定
                continue;
            }
            event = store_rx.recv() => {
                let Some(event) = event else {
                    warn!("store channel closed");
                    break;
                };
                manager.handle_store_event(event).await;
            }
            event = recv_remote(&mut remote_rx) => {
                match event {
                    Some(event) => manager.handle_remote_event(event).await,
                    None => {
                        warn!("remote channel closed");
                        remote_rx = None;
                    }
                }
            }
        }
    }
    debug!("event pump stopped");
}

async fn recv_remote(rx: &mut Option<mpsc::UnboundedReceiver<RemoteEvent>>) -> Option<RemoteEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
