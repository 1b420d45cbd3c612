//! Roster management: list enrolled users and delete them.

use crate::error::{ReloadError, RosterError};
use crate::events::{EventBus, Reload, RosterEvent};
use async_trait::async_trait;
use facewatch_store::{UserImage, UserStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A user as shown in the roster: the name plus whichever images exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub images: Vec<UserImage>,
}

/// Answer to the delete confirmation prompt. Obtaining it is up to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

pub struct RosterView {
    users: Arc<UserStore>,
    events: EventBus,
    records: Vec<UserRecord>,
    expanded: BTreeSet<String>,
}

impl RosterView {
    pub fn new(users: Arc<UserStore>, events: EventBus) -> Self {
        Self {
            users,
            events,
            records: Vec::new(),
            expanded: BTreeSet::new(),
        }
    }

    /// Read every user and their images, in index order.
    pub async fn load(&mut self) -> Result<&[UserRecord], RosterError> {
        let names = self.users.list_users().await?;
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let images = self.users.get_user_images(&name).await?;
            records.push(UserRecord { name, images });
        }
        self.expanded
            .retain(|name| records.iter().any(|r| &r.name == name));
        self.records = records;
        tracing::debug!(users = self.records.len(), "roster loaded");
        Ok(&self.records)
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }

    /// Show or hide a user's images. Returns the new state.
    pub fn toggle_expanded(&mut self, name: &str) -> bool {
        if self.expanded.remove(name) {
            false
        } else {
            self.expanded.insert(name.to_string());
            true
        }
    }

    pub fn is_expanded(&self, name: &str) -> bool {
        self.expanded.contains(name)
    }

    /// Delete `name` once the caller has confirmed.
    ///
    /// Returns whether anything was deleted. A declined prompt touches
    /// nothing; deleting an unknown user is a no-op. `UserDeleted` is
    /// published only after the store write completes.
    pub async fn delete(
        &mut self,
        name: &str,
        confirmation: Confirmation,
    ) -> Result<bool, RosterError> {
        if confirmation == Confirmation::Declined {
            tracing::debug!(user = name, "delete declined");
            return Ok(false);
        }

        let existed = self.users.delete_user(name).await?;
        self.records.retain(|r| r.name != name);
        self.expanded.remove(name);
        if existed {
            self.events.publish(RosterEvent::UserDeleted(name.to_string()));
        }
        Ok(existed)
    }
}

#[async_trait]
impl Reload for RosterView {
    fn name(&self) -> &'static str {
        "roster"
    }

    async fn reload(&mut self) -> Result<(), ReloadError> {
        self.load().await?;
        Ok(())
    }
}
