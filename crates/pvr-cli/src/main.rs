//! pvr-cli - in-memory Store 相手に recording core を一通り動かすデモ
//!
//! `RUST_LOG=debug cargo run -p pvr-cli [config.json]`

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pvr_core::app::{EventPump, PvrManagerBuilder, StoreQueries};
use pvr_core::config::PvrConfig;
use pvr_core::domain::{EpgEvent, PvrEvent, RecordingMetadata, SeriesId, UniqueEventId};
use pvr_core::impls::{InMemoryMarkers, InMemoryStore, OverlapGroupingStrategy, StaticGuide};
use pvr_core::ports::{Clock, FixedClock};

const TUNERS: usize = 1;

fn guide_event(id: &str, service: &str, start_offset_min: i64, series: Option<&str>) -> EpgEvent {
    let evening = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).single();
    let start = evening.unwrap_or_else(Utc::now) + ChronoDuration::minutes(start_offset_min);
    EpgEvent {
        event_id: id.into(),
        unique_event_id: UniqueEventId::new(format!("u-{id}")),
        service_id: service.into(),
        title: id.to_string(),
        start_time: start,
        end_time: start + ChronoDuration::minutes(60),
        series_id: series.map(Into::into),
        season_id: None,
        series_name: series.map(|s| format!("{s} (series)")),
    }
}

/// Let the pump drain the channels.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 設定（引数があればファイルから）
    let config = match std::env::args().nth(1) {
        Some(path) => PvrConfig::load(&path).await?,
        None => PvrConfig::default(),
    };

    // (B) collaborator を用意
    let day = 24 * 60;
    let guide = Arc::new(StaticGuide::with_events([
        guide_event("news", "svc-1", 0, None),
        guide_event("film", "svc-2", 30, None),
        guide_event("saga-1", "svc-3", day, Some("saga")),
        guide_event("saga-2", "svc-3", 2 * day, Some("saga")),
        guide_event("saga-3", "svc-3", 3 * day, Some("saga")),
    ]));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    ));
    let store = Arc::new(
        InMemoryStore::new(clock.clone())
            .with_guide(guide.clone())
            .with_tuners(TUNERS),
    );
    let manager = PvrManagerBuilder::new()
        .store(store.clone())
        .epg(guide.clone())
        .markers(Arc::new(InMemoryMarkers::new()))
        .strategy(Arc::new(OverlapGroupingStrategy::new(
            StoreQueries::new(store.clone(), config.page_size),
            TUNERS,
        )))
        .clock(clock.clone())
        .config(config)
        .build()?;

    // (C) listener と pump
    manager.register_all(Arc::new(|event: &PvrEvent| match event {
        PvrEvent::RequestConflicted {
            unscheduled,
            groups,
            ..
        } => {
            let titles: Vec<&str> = unscheduled.iter().map(|t| t.title.as_str()).collect();
            info!(?titles, groups = groups.len(), "conflict: choose what to record");
        }
        other => info!(kind = ?other.kind(), "event"),
    }));
    manager.start().await;
    let pump = EventPump::spawn(manager.clone());

    // (D) 予約（1 tuner なので 2 件目で conflict）
    for id in ["news", "film"] {
        if let Some(event) = guide.event(&id.into()) {
            manager
                .request_event_recording(event, RecordingMetadata::default(), false)
                .await?;
            settle().await;
        }
    }
    if let Some(event) = guide.event(&"saga-1".into()) {
        manager
            .request_series_recording(event, RecordingMetadata::default(), true)
            .await?;
        settle().await;
    }

    // (E) 一覧と status
    let folders = manager
        .recordings_by_series(&SeriesId::new("saga"), true)
        .await;
    println!("{}", serde_json::to_string_pretty(&folders)?);
    for key in ["u-news", "u-film", "u-saga-2"] {
        let status = manager.recording_status(&UniqueEventId::new(key));
        println!("{key}: {status:?}");
    }
    info!(now = %clock.now(), "demo finished");

    // (F) graceful shutdown
    pump.shutdown_and_join().await;
    Ok(())
}
