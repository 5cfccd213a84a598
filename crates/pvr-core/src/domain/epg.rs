//! EPG event record as returned by the guide lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::{EventId, SeriesId, ServiceId, UniqueEventId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgEvent {
    pub event_id: EventId,
    /// Stable across guide refreshes; keys the Recording Cache.
    pub unique_event_id: UniqueEventId,
    pub service_id: ServiceId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub series_id: Option<SeriesId>,
    pub season_id: Option<String>,
    pub series_name: Option<String>,
}

impl EpgEvent {
    /// Why this event can't be scheduled, if it can't.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_id.as_str().is_empty() {
            return Err("event has no event id".to_string());
        }
        if self.service_id.as_str().is_empty() {
            return Err(format!("event {} has no service id", self.event_id));
        }
        if self.end_time <= self.start_time {
            return Err(format!("event {} ends before it starts", self.event_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> EpgEvent {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap();
        EpgEvent {
            event_id: EventId::new("ev-1"),
            unique_event_id: UniqueEventId::new("u-1"),
            service_id: ServiceId::new("svc-1"),
            title: "News".to_string(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(30),
            series_id: None,
            season_id: None,
            series_name: None,
        }
    }

    #[test]
    fn well_formed_event_validates() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn inverted_times_are_rejected() {
        let mut e = event();
        e.end_time = e.start_time;
        assert!(e.validate().unwrap_err().contains("ends before"));
    }

    #[test]
    fn missing_service_is_rejected() {
        let mut e = event();
        e.service_id = ServiceId::new("");
        assert!(e.validate().is_err());
    }
}
