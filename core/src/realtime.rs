//! In-process change notification feed.
//!
//! Every write made through [`crate::db::Database`] is published here as a
//! [`ChangeEvent`] carrying the full new row. Consumers open named channels
//! with a [`ChangeFilter`] and read matching events from the returned
//! [`Subscription`]. A subscription removes its channel when released or
//! dropped, so the number of live channels is always observable.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    HealthData,
    MealPlans,
}

impl Table {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::HealthData => "health_data",
            Self::MealPlans => "meal_plans",
        }
    }

    fn channel_prefix(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::HealthData => "health-data",
            Self::MealPlans => "meal-plans",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// User id owning the row.
    pub owner: String,
    /// Full row after the change (the removed row for deletes).
    pub record: serde_json::Value,
}

/// Which events a channel receives: one owner, optionally one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub owner: String,
    pub table: Option<Table>,
}

impl ChangeFilter {
    #[must_use]
    pub fn table(table: Table, owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            table: Some(table),
        }
    }

    #[must_use]
    pub fn all_tables(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            table: None,
        }
    }

    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.owner == self.owner && self.table.is_none_or(|t| t == event.table)
    }
}

/// Channel name unique across repeated subscribe/teardown cycles.
#[must_use]
pub fn unique_channel_name(table: Table, owner: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{owner}-{}", table.channel_prefix(), &nonce[..12])
}

struct FeedInner {
    sender: broadcast::Sender<ChangeEvent>,
    channels: Mutex<HashSet<String>>,
}

impl FeedInner {
    fn channels(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a subscriber may fall behind before it starts losing events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                sender,
                channels: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Publish an event to every open channel. Returns how many receivers saw it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::trace!(
            table = event.table.as_str(),
            kind = ?event.kind,
            owner = %event.owner,
            "publishing change"
        );
        // No receivers is not an error: nobody is listening right now.
        self.inner.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, name: impl Into<String>, filter: ChangeFilter) -> Result<Subscription> {
        let name = name.into();
        {
            let mut channels = self.inner.channels();
            if !channels.insert(name.clone()) {
                bail!("Channel '{name}' is already subscribed");
            }
        }
        tracing::debug!(channel = %name, owner = %filter.owner, "channel subscribed");
        Ok(Subscription {
            name,
            filter,
            receiver: self.inner.sender.subscribe(),
            feed: Arc::clone(&self.inner),
            released: false,
        })
    }

    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.inner.channels().len()
    }
}

pub struct Subscription {
    name: String,
    filter: ChangeFilter,
    receiver: broadcast::Receiver<ChangeEvent>,
    feed: Arc<FeedInner>,
    released: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next matching event already delivered, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.name, skipped, "change feed subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next matching event. `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.name, skipped, "change feed subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Remove the channel from the feed. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.feed.channels().remove(&self.name);
        tracing::debug!(channel = %self.name, "channel released");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(table: Table, kind: ChangeKind, owner: &str, id: &str) -> ChangeEvent {
        ChangeEvent {
            table,
            kind,
            owner: owner.to_string(),
            record: json!({ "id": id }),
        }
    }

    #[test]
    fn test_subscription_receives_only_matching_events() {
        let feed = ChangeFeed::new();
        let mut sub = feed
            .subscribe("health", ChangeFilter::table(Table::HealthData, "alice"))
            .unwrap();

        feed.publish(event(Table::HealthData, ChangeKind::Insert, "bob", "b1"));
        feed.publish(event(Table::MealPlans, ChangeKind::Insert, "alice", "m1"));
        feed.publish(event(Table::HealthData, ChangeKind::Insert, "alice", "h1"));

        let got = sub.try_next().unwrap();
        assert_eq!(got.record["id"], "h1");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_all_tables_filter() {
        let feed = ChangeFeed::new();
        let mut sub = feed
            .subscribe("everything", ChangeFilter::all_tables("alice"))
            .unwrap();

        feed.publish(event(Table::Profiles, ChangeKind::Update, "alice", "alice"));
        feed.publish(event(Table::MealPlans, ChangeKind::Insert, "alice", "m1"));

        assert_eq!(sub.try_next().unwrap().table, Table::Profiles);
        assert_eq!(sub.try_next().unwrap().table, Table::MealPlans);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_duplicate_channel_name_rejected() {
        let feed = ChangeFeed::new();
        let _first = feed
            .subscribe("dup", ChangeFilter::all_tables("alice"))
            .unwrap();
        let err = feed
            .subscribe("dup", ChangeFilter::all_tables("alice"))
            .unwrap_err();
        assert!(err.to_string().contains("already subscribed"));
    }

    #[test]
    fn test_release_is_idempotent_and_drop_releases() {
        let feed = ChangeFeed::new();
        let mut sub = feed
            .subscribe("a", ChangeFilter::all_tables("alice"))
            .unwrap();
        let other = feed
            .subscribe("b", ChangeFilter::all_tables("alice"))
            .unwrap();
        assert_eq!(feed.active_channels(), 2);

        sub.release();
        sub.release();
        assert_eq!(feed.active_channels(), 1);
        assert_eq!(other.name(), "b");

        drop(other);
        drop(sub);
        assert_eq!(feed.active_channels(), 0);

        // Name is reusable after release.
        let _again = feed
            .subscribe("a", ChangeFilter::all_tables("alice"))
            .unwrap();
        assert_eq!(feed.active_channels(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::new();
        assert_eq!(
            feed.publish(event(Table::Profiles, ChangeKind::Update, "alice", "alice")),
            0
        );
    }

    #[test]
    fn test_lagged_subscriber_keeps_newest() {
        let feed = ChangeFeed::with_capacity(2);
        let mut sub = feed
            .subscribe("slow", ChangeFilter::table(Table::HealthData, "alice"))
            .unwrap();
        for i in 0..5 {
            feed.publish(event(
                Table::HealthData,
                ChangeKind::Insert,
                "alice",
                &format!("h{i}"),
            ));
        }
        assert_eq!(sub.try_next().unwrap().record["id"], "h3");
        assert_eq!(sub.try_next().unwrap().record["id"], "h4");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_unique_channel_names_differ() {
        let a = unique_channel_name(Table::HealthData, "alice");
        let b = unique_channel_name(Table::HealthData, "alice");
        assert!(a.starts_with("health-data-alice-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_next_waits_for_matching_event() {
        let feed = ChangeFeed::new();
        let mut sub = feed
            .subscribe("plans", ChangeFilter::table(Table::MealPlans, "alice"))
            .unwrap();
        feed.publish(event(Table::MealPlans, ChangeKind::Insert, "bob", "m0"));
        feed.publish(event(Table::MealPlans, ChangeKind::Insert, "alice", "m1"));
        let got = sub.next().await.unwrap();
        assert_eq!(got.record["id"], "m1");
    }
}
