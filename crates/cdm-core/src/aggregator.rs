//! Per-item progress and per-group averages.
//!
//! Group membership is fixed when tracking begins. The group value is the
//! plain mean over the group's tracked items, so a finished item pulls the
//! average up and a not-yet-started one pulls it down.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{clamp_progress, GroupId, ItemId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Item { item_id: ItemId, progress: f64 },
    Group { group_id: GroupId, progress: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    progress: f64,
    group_id: Option<GroupId>,
}

pub struct ProgressAggregator {
    entries: Mutex<HashMap<ItemId, Entry>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressAggregator {
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ItemId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Start (or restart) tracking `item_id` at 0.0.
    pub fn begin_tracking(&self, item_id: ItemId, group_id: Option<GroupId>) {
        self.entries().insert(
            item_id,
            Entry {
                progress: 0.0,
                group_id,
            },
        );
    }

    pub fn stop_tracking(&self, item_id: ItemId) {
        self.entries().remove(&item_id);
    }

    pub fn is_tracking(&self, item_id: ItemId) -> bool {
        self.entries().contains_key(&item_id)
    }

    /// Record a new value for a tracked item and publish the item value and,
    /// for grouped items, the new group mean.
    pub fn update(&self, item_id: ItemId, progress: f64) {
        let progress = clamp_progress(progress);
        let (group_id, group_mean) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&item_id) else {
                tracing::warn!(item_id = %item_id, "progress update for untracked item");
                return;
            };
            entry.progress = progress;
            let group_id = entry.group_id;
            let mean = group_id.and_then(|g| mean_of(&entries, g));
            (group_id, mean)
        };

        let _ = self.events.send(ProgressEvent::Item { item_id, progress });
        if let (Some(group_id), Some(progress)) = (group_id, group_mean) {
            let _ = self.events.send(ProgressEvent::Group { group_id, progress });
        }
    }

    /// Mean progress of the group's tracked items; `None` when it has none.
    pub fn group_progress(&self, group_id: GroupId) -> Option<f64> {
        let mean = mean_of(&self.entries(), group_id);
        if mean.is_none() {
            tracing::warn!(group_id = %group_id, "group has no tracked items");
        }
        mean
    }
}

fn mean_of(entries: &HashMap<ItemId, Entry>, group_id: GroupId) -> Option<f64> {
    let (sum, count) = entries
        .values()
        .filter(|e| e.group_id == Some(group_id))
        .fold((0.0, 0usize), |(sum, n), e| (sum + e.progress, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn group_mean_follows_updates() {
        let agg = ProgressAggregator::new(16);
        let course = GroupId::new();
        let ids = [ItemId::new(), ItemId::new(), ItemId::new()];
        for id in ids {
            agg.begin_tracking(id, Some(course));
        }

        agg.update(ids[0], 0.2);
        agg.update(ids[1], 0.4);
        agg.update(ids[2], 0.6);
        assert!(approx(agg.group_progress(course).unwrap(), 0.4));

        agg.update(ids[0], 1.0);
        agg.update(ids[1], 1.0);
        assert!(approx(agg.group_progress(course).unwrap(), 0.867));
    }

    #[test]
    fn update_publishes_item_then_group() {
        let agg = ProgressAggregator::new(16);
        let mut rx = agg.subscribe();
        let course = GroupId::new();
        let a = ItemId::new();
        let b = ItemId::new();
        agg.begin_tracking(a, Some(course));
        agg.begin_tracking(b, Some(course));

        agg.update(a, 0.5);
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Item {
                item_id: a,
                progress: 0.5
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Group {
                group_id: course,
                progress: 0.25
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ungrouped_item_publishes_no_group_event() {
        let agg = ProgressAggregator::new(16);
        let mut rx = agg.subscribe();
        let id = ItemId::new();
        agg.begin_tracking(id, None);
        agg.update(id, 0.3);
        assert!(matches!(rx.try_recv(), Ok(ProgressEvent::Item { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn untracked_update_is_ignored() {
        let agg = ProgressAggregator::new(16);
        let mut rx = agg.subscribe();
        agg.update(ItemId::new(), 0.9);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_group_has_no_progress() {
        let agg = ProgressAggregator::new(16);
        assert_eq!(agg.group_progress(GroupId::new()), None);
    }

    #[test]
    fn stop_tracking_removes_from_group() {
        let agg = ProgressAggregator::new(16);
        let course = GroupId::new();
        let a = ItemId::new();
        let b = ItemId::new();
        agg.begin_tracking(a, Some(course));
        agg.begin_tracking(b, Some(course));
        agg.update(a, 1.0);
        agg.stop_tracking(b);
        assert!(!agg.is_tracking(b));
        assert!(approx(agg.group_progress(course).unwrap(), 1.0));
    }

    #[test]
    fn values_are_clamped() {
        let agg = ProgressAggregator::new(4);
        let course = GroupId::new();
        let id = ItemId::new();
        agg.begin_tracking(id, Some(course));
        agg.update(id, 1.7);
        assert!(approx(agg.group_progress(course).unwrap(), 1.0));
    }
}
