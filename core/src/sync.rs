//! Client-side session that mirrors one user's rows and keeps them current.
//!
//! [`UserDataSync`] fetches the profile, health entries and meal plans for
//! the signed-in user, then listens on three change channels and folds each
//! event into its local copy. The store always wins: events overwrite local
//! rows and nothing is merged.
//!
//! Events that arrive while the bulk fetch is in flight are buffered and
//! applied in arrival order once it settles. Inserts for an id already held
//! replace that row, so an event that races the fetch is never applied twice.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::db::Database;
use crate::models::{HealthEntry, MealPlan, NewHealthEntry, NewMealPlan, Profile, ProfileUpdate};
use crate::realtime::{ChangeEvent, ChangeFilter, ChangeKind, Subscription, Table, unique_channel_name};

/// Reads, writes and change channels the session is built on.
pub trait UserDataSource {
    fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;
    fn fetch_health_entries(&self, user_id: &str) -> Result<Vec<HealthEntry>>;
    fn fetch_meal_plans(&self, user_id: &str) -> Result<Vec<MealPlan>>;
    fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile>;
    fn insert_health_entry(&self, user_id: &str, entry: &NewHealthEntry) -> Result<HealthEntry>;
    fn insert_meal_plan(&self, user_id: &str, plan: &NewMealPlan) -> Result<MealPlan>;
    fn subscribe(&self, channel: &str, filter: ChangeFilter) -> Result<Subscription>;
}

impl UserDataSource for Database {
    fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.get_profile(user_id)
    }

    fn fetch_health_entries(&self, user_id: &str) -> Result<Vec<HealthEntry>> {
        self.list_health_entries(user_id)
    }

    fn fetch_meal_plans(&self, user_id: &str) -> Result<Vec<MealPlan>> {
        self.list_meal_plans(user_id)
    }

    fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        Database::update_profile(self, user_id, update)
    }

    fn insert_health_entry(&self, user_id: &str, entry: &NewHealthEntry) -> Result<HealthEntry> {
        Database::insert_health_entry(self, user_id, entry)
    }

    fn insert_meal_plan(&self, user_id: &str, plan: &NewMealPlan) -> Result<MealPlan> {
        Database::insert_meal_plan(self, user_id, plan)
    }

    fn subscribe(&self, channel: &str, filter: ChangeFilter) -> Result<Subscription> {
        self.feed().subscribe(channel, filter)
    }
}

impl<T: UserDataSource + ?Sized> UserDataSource for &T {
    fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        (**self).fetch_profile(user_id)
    }

    fn fetch_health_entries(&self, user_id: &str) -> Result<Vec<HealthEntry>> {
        (**self).fetch_health_entries(user_id)
    }

    fn fetch_meal_plans(&self, user_id: &str) -> Result<Vec<MealPlan>> {
        (**self).fetch_meal_plans(user_id)
    }

    fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        (**self).update_profile(user_id, update)
    }

    fn insert_health_entry(&self, user_id: &str, entry: &NewHealthEntry) -> Result<HealthEntry> {
        (**self).insert_health_entry(user_id, entry)
    }

    fn insert_meal_plan(&self, user_id: &str, plan: &NewMealPlan) -> Result<MealPlan> {
        (**self).insert_meal_plan(user_id, plan)
    }

    fn subscribe(&self, channel: &str, filter: ChangeFilter) -> Result<Subscription> {
        (**self).subscribe(channel, filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unauthenticated,
    Loading,
    Synced,
}

/// Local read model for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    pub profile: Option<Profile>,
    /// Newest date first.
    pub health_entries: Vec<HealthEntry>,
    /// Newest plan first.
    pub meal_plans: Vec<MealPlan>,
}

/// Channels held for the current identity. Released together, exactly once.
#[derive(Debug, Default)]
struct SessionChannels {
    owner: Option<String>,
    subscriptions: Vec<Subscription>,
}

impl SessionChannels {
    fn is_open_for(&self, user_id: &str) -> bool {
        self.owner.as_deref() == Some(user_id) && !self.subscriptions.is_empty()
    }

    fn release_all(&mut self) {
        for mut sub in self.subscriptions.drain(..) {
            sub.release();
        }
        self.owner = None;
    }
}

pub struct UserDataSync<S: UserDataSource> {
    source: S,
    user_id: Option<String>,
    state: SyncState,
    data: UserData,
    channels: SessionChannels,
    pending: Vec<ChangeEvent>,
}

impl<S: UserDataSource> UserDataSync<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            user_id: None,
            state: SyncState::Unauthenticated,
            data: UserData::default(),
            channels: SessionChannels::default(),
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state == SyncState::Loading
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &UserData {
        &self.data
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.data.profile.as_ref()
    }

    #[must_use]
    pub fn health_entries(&self) -> &[HealthEntry] {
        &self.data.health_entries
    }

    #[must_use]
    pub fn meal_plans(&self) -> &[MealPlan] {
        &self.data.meal_plans
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels
            .subscriptions
            .iter()
            .map(Subscription::name)
            .collect()
    }

    /// Session-change entry point. `None` signs out.
    pub fn set_user(&mut self, user_id: Option<&str>) {
        match user_id {
            None => self.sign_out(),
            Some(id) if self.user_id.as_deref() == Some(id) => {
                tracing::debug!(user = id, "session unchanged");
            }
            Some(id) => {
                self.sign_out();
                tracing::info!(user = id, "starting data sync");
                self.user_id = Some(id.to_string());
                self.state = SyncState::Loading;
                self.subscribe();
                self.fetch_all();
            }
        }
    }

    pub fn sign_out(&mut self) {
        self.teardown();
        self.pending.clear();
        self.data = UserData::default();
        self.user_id = None;
        self.state = SyncState::Unauthenticated;
    }

    /// Load all three slices for the current user. Never fails: a read that
    /// errors is logged and its slice keeps its previous contents.
    pub fn fetch_all(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            self.state = SyncState::Unauthenticated;
            return;
        };
        self.state = SyncState::Loading;
        self.buffer_incoming();

        match self.source.fetch_profile(&user_id) {
            Ok(profile) => self.data.profile = profile,
            Err(e) => tracing::error!(user = %user_id, error = %format!("{e:#}"), "failed to fetch profile"),
        }
        match self.source.fetch_health_entries(&user_id) {
            Ok(entries) => self.data.health_entries = entries,
            Err(e) => tracing::error!(user = %user_id, error = %format!("{e:#}"), "failed to fetch health data"),
        }
        match self.source.fetch_meal_plans(&user_id) {
            Ok(plans) => self.data.meal_plans = plans,
            Err(e) => tracing::error!(user = %user_id, error = %format!("{e:#}"), "failed to fetch meal plans"),
        }

        self.state = SyncState::Synced;
        self.buffer_incoming();
        let buffered = std::mem::take(&mut self.pending);
        if !buffered.is_empty() {
            tracing::debug!(count = buffered.len(), "applying events buffered during fetch");
        }
        for event in buffered {
            self.apply_event(&event);
        }
    }

    pub fn refetch(&mut self) {
        self.fetch_all();
    }

    /// Open the three per-table channels for the current user. No-op when
    /// already open for this identity.
    pub fn subscribe(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        if self.channels.is_open_for(&user_id) {
            return;
        }
        self.channels.release_all();

        for table in [Table::Profiles, Table::HealthData, Table::MealPlans] {
            let name = unique_channel_name(table, &user_id);
            match self
                .source
                .subscribe(&name, ChangeFilter::table(table, &user_id))
            {
                Ok(sub) => self.channels.subscriptions.push(sub),
                Err(e) => tracing::error!(
                    channel = %name,
                    error = %format!("{e:#}"),
                    "failed to open change channel"
                ),
            }
        }
        self.channels.owner = Some(user_id);
    }

    /// Release every held channel. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if !self.channels.subscriptions.is_empty() {
            tracing::debug!(
                count = self.channels.subscriptions.len(),
                "releasing change channels"
            );
        }
        self.channels.release_all();
    }

    /// Apply every event delivered so far. Returns how many were applied;
    /// while a fetch is in flight they are buffered instead.
    pub fn poll(&mut self) -> usize {
        if self.state == SyncState::Loading {
            self.buffer_incoming();
            return 0;
        }
        let mut incoming = std::mem::take(&mut self.pending);
        incoming.extend(self.drain_channels());
        let count = incoming.len();
        for event in incoming {
            self.apply_event(&event);
        }
        count
    }

    fn drain_channels(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for sub in &mut self.channels.subscriptions {
            while let Some(event) = sub.try_next() {
                events.push(event);
            }
        }
        events
    }

    fn buffer_incoming(&mut self) {
        let events = self.drain_channels();
        self.pending.extend(events);
    }

    /// Fold one change into the local copy.
    pub fn apply_event(&mut self, event: &ChangeEvent) {
        if self.user_id.as_deref() != Some(event.owner.as_str()) {
            tracing::debug!(owner = %event.owner, "ignoring change for another user");
            return;
        }
        if event.kind == ChangeKind::Delete {
            tracing::debug!(table = event.table.as_str(), "ignoring delete event");
            return;
        }

        match event.table {
            Table::Profiles => {
                if let Some(profile) = decode::<Profile>(event) {
                    self.data.profile = Some(profile);
                }
            }
            Table::HealthData => {
                if let Some(entry) = decode::<HealthEntry>(event) {
                    upsert(&mut self.data.health_entries, entry, event.kind, |e| &e.id);
                }
            }
            Table::MealPlans => {
                if let Some(plan) = decode::<MealPlan>(event) {
                    upsert(&mut self.data.meal_plans, plan, event.kind, |p| &p.id);
                }
            }
        }
    }

    fn require_user(&self) -> Result<&str> {
        self.user_id.as_deref().context("No user is signed in")
    }

    /// Write a partial profile for the current user. The local copy changes
    /// only when the resulting change event is applied.
    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile> {
        let user_id = self.require_user()?;
        self.source.update_profile(user_id, update)
    }

    pub fn add_health_entry(&self, entry: &NewHealthEntry) -> Result<HealthEntry> {
        let user_id = self.require_user()?;
        self.source.insert_health_entry(user_id, entry)
    }

    pub fn add_meal_plan(&self, plan: &NewMealPlan) -> Result<MealPlan> {
        let user_id = self.require_user()?;
        self.source.insert_meal_plan(user_id, plan)
    }
}

impl<S: UserDataSource> Drop for UserDataSync<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn decode<T: DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    match serde_json::from_value(event.record.clone()) {
        Ok(row) => Some(row),
        Err(e) => {
            tracing::warn!(
                table = event.table.as_str(),
                error = %e,
                "dropping malformed change record"
            );
            None
        }
    }
}

/// Insert prepends unless the id is already held; update replaces in place
/// and ignores ids not held locally.
fn upsert<T>(rows: &mut Vec<T>, row: T, kind: ChangeKind, id: impl Fn(&T) -> &String) {
    let position = rows.iter().position(|r| id(r) == id(&row));
    match (kind, position) {
        (ChangeKind::Insert | ChangeKind::Update, Some(i)) => rows[i] = row,
        (ChangeKind::Insert, None) => rows.insert(0, row),
        (ChangeKind::Update, None) => {
            tracing::debug!(id = %id(&row), "update for a row not held locally");
        }
        (ChangeKind::Delete, _) => {}
    }
}
