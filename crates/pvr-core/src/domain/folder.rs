//! Series folders and completed-recording sort order (presentation only).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::keys::SeriesId;
use super::task::{SeriesInfo, Task};

/// A presentation-only grouping of a series' Tasks.
///
/// Header fields are copied from the first Task encountered for the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub series_id: SeriesId,
    pub series: SeriesInfo,
    pub title: String,
    pub service_id: String,
    pub sub_recordings: Vec<Task>,
}

/// Item of a recordings listing: either a lone Task or a series Folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordingEntry {
    Recording(Task),
    Folder(Folder),
}

impl RecordingEntry {
    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            RecordingEntry::Folder(folder) => Some(folder),
            RecordingEntry::Recording(_) => None,
        }
    }
}

/// Group Tasks sharing a `seriesId` into folders, preserving encounter order.
///
/// Tasks without a series id stay as individual entries at their position.
pub fn group_into_folders(tasks: Vec<Task>) -> Vec<RecordingEntry> {
    let mut entries: Vec<RecordingEntry> = Vec::with_capacity(tasks.len());
    let mut folder_index: HashMap<SeriesId, usize> = HashMap::new();

    for task in tasks {
        let Some(series_id) = task.series.series_id.clone() else {
            entries.push(RecordingEntry::Recording(task));
            continue;
        };
        match folder_index.get(&series_id).copied() {
            Some(idx) => {
                if let RecordingEntry::Folder(folder) = &mut entries[idx] {
                    folder.sub_recordings.push(task);
                }
            }
            None => {
                folder_index.insert(series_id.clone(), entries.len());
                entries.push(RecordingEntry::Folder(Folder {
                    series_id,
                    series: task.series.clone(),
                    title: task
                        .series
                        .series_name
                        .clone()
                        .unwrap_or_else(|| task.title.clone()),
                    service_id: task.service_id.to_string(),
                    sub_recordings: vec![task],
                }));
            }
        }
    }
    entries
}

/// Process-wide ordering of completed recordings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortMode {
    #[default]
    ByDate,
    ByDateDesc,
    ByName,
}

impl SortMode {
    pub fn sort(self, tasks: &mut [Task]) {
        match self {
            SortMode::ByDate => tasks.sort_by_key(|t| t.start_time),
            SortMode::ByDateDesc => tasks.sort_by(|a, b| b.start_time.cmp(&a.start_time)),
            // seriesId があればそれ、なければ title
            SortMode::ByName => tasks.sort_by(|a, b| name_key(a).cmp(name_key(b))),
        }
    }
}

fn name_key(task: &Task) -> &str {
    task.series
        .series_id
        .as_ref()
        .map(SeriesId::as_str)
        .unwrap_or(&task.title)
}
