//! Enrolled users over a [`KeyValueStore`].
//!
//! Layout:
//! - `users` holds a JSON array of names, the only enumeration source.
//! - `labels/<name>/<slot>.png` holds one data-URL image per slot, slot in 1..=3.
//!
//! Every flow goes through [`UserStore`]; nothing else touches the keys.
//! Index read-modify-write is serialized per `UserStore`, so writers must
//! share one instance. Two instances over the same backend can still lose
//! an index update to each other.

use crate::kv::{KeyValueStore, StoreError, WriteBatch};
use facewatch_core::DataUrl;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const USERS_KEY: &str = "users";
pub const IMAGES_PER_USER: usize = 3;

/// Storage key for one enrollment image. Slots are 1-based.
pub fn image_key(name: &str, slot: usize) -> String {
    format!("labels/{name}/{slot}.png")
}

/// Reject names that cannot be used as a key fragment.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() || name.contains('/') || name != name.trim() {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One stored enrollment image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserImage {
    pub slot: usize,
    pub image: DataUrl,
}

pub struct UserStore {
    kv: Arc<dyn KeyValueStore>,
    index_lock: Mutex<()>,
}

impl UserStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            index_lock: Mutex::new(()),
        }
    }

    /// Names in the roster index, in enrollment order.
    pub async fn list_users(&self) -> Result<Vec<String>, StoreError> {
        match self.kv.get(USERS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// The stored images for `name`. Missing slots are skipped; unreadable
    /// ones are skipped with a warning.
    pub async fn get_user_images(&self, name: &str) -> Result<Vec<UserImage>, StoreError> {
        let mut images = Vec::with_capacity(IMAGES_PER_USER);
        for slot in 1..=IMAGES_PER_USER {
            let key = image_key(name, slot);
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match raw.parse::<DataUrl>() {
                Ok(image) => images.push(UserImage { slot, image }),
                Err(source) => {
                    let err = StoreError::CorruptImage { key, source };
                    tracing::warn!(user = name, error = %err, "skipping stored image");
                }
            }
        }
        Ok(images)
    }

    /// Store all images for `name` and add it to the index, in one batch.
    ///
    /// Saving an existing user replaces their images; the index keeps a
    /// single entry.
    pub async fn save_user(
        &self,
        name: &str,
        images: &[DataUrl; IMAGES_PER_USER],
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        let _guard = self.index_lock.lock().await;

        let mut batch = WriteBatch::new();
        for (i, image) in images.iter().enumerate() {
            batch.set(image_key(name, i + 1), image.to_string());
        }

        let mut users = self.list_users().await?;
        if !users.iter().any(|u| u == name) {
            users.push(name.to_string());
            batch.set(USERS_KEY, serde_json::to_string(&users)?);
        }

        self.kv.apply(batch).await?;
        tracing::info!(user = name, total = users.len(), "user saved");
        Ok(())
    }

    /// Remove every image slot and the index entry for `name`.
    ///
    /// Returns whether the name was in the index. Deleting an unknown user
    /// is not an error.
    pub async fn delete_user(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.index_lock.lock().await;

        let mut batch = WriteBatch::new();
        for slot in 1..=IMAGES_PER_USER {
            batch.remove(image_key(name, slot));
        }

        let mut users = self.list_users().await?;
        let before = users.len();
        users.retain(|u| u != name);
        let existed = users.len() != before;
        if existed {
            batch.set(USERS_KEY, serde_json::to_string(&users)?);
        }

        self.kv.apply(batch).await?;
        tracing::info!(user = name, existed, "user deleted");
        Ok(existed)
    }
}
