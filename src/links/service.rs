use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::path::PathAllocator;
use crate::auth::Caller;
use crate::error::{Error, Result};
use crate::models::{ShortLink, ShortLinkSummary};
use crate::permission::{can_act_on, Permission};
use crate::storage::{Storage, StorageError};

/// Attempts at finding a free random path before giving up
const MAX_GENERATE_ATTEMPTS: usize = 5;

/// Create, delete, resolve and list short links
pub struct LinkService {
    storage: Arc<dyn Storage>,
    allocator: PathAllocator,
    anonymous_id: OnceCell<i64>,
}

impl LinkService {
    pub fn new(storage: Arc<dyn Storage>, allocator: PathAllocator) -> Self {
        Self {
            storage,
            allocator,
            anonymous_id: OnceCell::new(),
        }
    }

    pub fn allocator(&self) -> &PathAllocator {
        &self.allocator
    }

    async fn anonymous_id(&self) -> Result<i64> {
        self.anonymous_id
            .get_or_try_init(|| async {
                crate::users::ensure_anonymous(self.storage.as_ref())
                    .await
                    .map(|user| user.id)
            })
            .await
            .copied()
    }

    /// Create a link owned by the caller, or by the anonymous user when
    /// nobody is signed in.
    pub async fn create(
        &self,
        caller: &Caller,
        destination: &str,
        custom_path: Option<&str>,
    ) -> Result<ShortLink> {
        let destination = destination.trim();
        validate_destination(destination)?;

        let owner_id = match caller.user() {
            Some(user) => user.id,
            None => self.anonymous_id().await?,
        };

        let link = match custom_path.filter(|p| !p.is_empty()) {
            Some(path) => {
                self.allocator.authorize_custom(caller, path)?;
                if self.storage.get_link_by_path(path).await?.is_some() {
                    return Err(Error::PathTaken);
                }
                self.insert(path, destination, owner_id)
                    .await?
                    .ok_or(Error::PathTaken)?
            }
            None => self.insert_generated(destination, owner_id).await?,
        };

        info!(
            link_id = link.id,
            short_path = %link.short_path,
            owner_id,
            "Created short link"
        );
        Ok(link)
    }

    /// `None` when the unique constraint on the path rejected the insert
    async fn insert(
        &self,
        path: &str,
        destination: &str,
        owner_id: i64,
    ) -> Result<Option<ShortLink>> {
        match self.storage.create_link(path, destination, owner_id).await {
            Ok(link) => Ok(Some(link)),
            Err(StorageError::Conflict) => Ok(None),
            Err(StorageError::Other(e)) => Err(Error::Internal(e)),
        }
    }

    async fn insert_generated(&self, destination: &str, owner_id: i64) -> Result<ShortLink> {
        for attempt in 1..=MAX_GENERATE_ATTEMPTS {
            let path = self.allocator.generate();
            if let Some(link) = self.insert(&path, destination, owner_id).await? {
                return Ok(link);
            }
            debug!(attempt, short_path = %path, "Generated path collided, retrying");
        }
        Err(Error::Internal(anyhow::anyhow!(
            "failed to allocate a unique short path after {MAX_GENERATE_ATTEMPTS} attempts"
        )))
    }

    pub async fn delete(&self, caller: &Caller, link_id: i64) -> Result<()> {
        let user = caller.user().ok_or(Error::NoPermission)?;

        let link = self
            .storage
            .get_link_by_id(link_id)
            .await?
            .ok_or(Error::ShortUrlNotFound)?;

        if !can_act_on(
            user.permissions,
            user.id,
            link.user_id,
            Permission::DELETE_ANY,
            Permission::DELETE_OWN,
        ) {
            return Err(Error::DeleteNotAllowed);
        }

        // A concurrent delete may have won; the outcome is the same
        if self.storage.delete_link(link.id).await? {
            info!(
                link_id = link.id,
                short_path = %link.short_path,
                by = user.id,
                "Deleted short link"
            );
        }
        Ok(())
    }

    pub async fn delete_by_path(&self, caller: &Caller, path: &str) -> Result<()> {
        caller.user().ok_or(Error::NoPermission)?;
        let link = self.resolve(path).await?;
        self.delete(caller, link.id).await
    }

    /// Public lookup used by redirects
    pub async fn resolve(&self, path: &str) -> Result<ShortLink> {
        self.storage
            .get_link_by_path(path)
            .await?
            .ok_or(Error::ShortUrlNotFound)
    }

    pub async fn get(&self, link_id: i64) -> Result<ShortLink> {
        self.storage
            .get_link_by_id(link_id)
            .await?
            .ok_or(Error::ShortUrlNotFound)
    }

    /// The caller's links with their click counts
    pub async fn list_owned(&self, caller: &Caller) -> Result<Vec<ShortLinkSummary>> {
        let user = caller.user().ok_or(Error::NoPermission)?;
        Ok(self.storage.list_links_by_owner(user.id).await?)
    }

    /// Every link in the system. Does not check permissions; callers must
    /// require view-any or delete-any first.
    pub async fn list_all(&self) -> Result<Vec<ShortLinkSummary>> {
        Ok(self.storage.list_all_links().await?)
    }
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_destination(destination: &str) -> Result<()> {
    let parsed = url::Url::parse(destination.trim()).map_err(|_| Error::InvalidUrl)?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        _ => Err(Error::InvalidUrl),
    }
}
