//! Accounts, roles and sessions

pub mod chat_link;
pub mod password;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use self::chat_link::ChatLinkTokens;
use crate::auth::{Caller, TokenService};
use crate::error::{Error, Result};
use crate::models::{User, ANONYMOUS_USERNAME};
use crate::permission::{Permission, Role, ROLE_GUEST, ROLE_REGULAR};
use crate::storage::{Storage, StorageError};

const MIN_PASSWORD_LEN: usize = 8;

/// Fetch the anonymous sentinel, creating it on first use
pub async fn ensure_anonymous(storage: &dyn Storage) -> Result<User> {
    if let Some(user) = storage.get_user_by_username(ANONYMOUS_USERNAME).await? {
        return Ok(user);
    }

    match storage
        .create_user(ANONYMOUS_USERNAME, password::LOCKED_HASH, ROLE_GUEST)
        .await
    {
        Ok(user) => {
            info!(user_id = user.id, "Created anonymous user");
            Ok(user)
        }
        // Lost a race with another initializer
        Err(StorageError::Conflict) => storage
            .get_user_by_username(ANONYMOUS_USERNAME)
            .await?
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("anonymous user vanished"))),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_username(username: &str) -> Result<()> {
    if !(3..=32).contains(&username.len()) {
        return Err(Error::InvalidUsername("must be 3 to 32 characters long"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidUsername(
            "only letters, digits, '_' and '-' are allowed",
        ));
    }
    if username.eq_ignore_ascii_case(ANONYMOUS_USERNAME) {
        return Err(Error::UserExists);
    }
    Ok(())
}

pub struct UserService {
    storage: Arc<dyn Storage>,
    tokens: TokenService,
    chat_links: ChatLinkTokens,
}

impl UserService {
    pub fn new(storage: Arc<dyn Storage>, tokens: TokenService) -> Self {
        Self {
            storage,
            tokens,
            chat_links: ChatLinkTokens::default(),
        }
    }

    /// Override how long chat link tokens stay redeemable
    pub fn with_chat_link_ttl(mut self, ttl: Duration) -> Self {
        self.chat_links = ChatLinkTokens::new(ttl);
        self
    }

    pub async fn ensure_anonymous(&self) -> Result<User> {
        ensure_anonymous(self.storage.as_ref()).await
    }

    /// Create an account with the regular role
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        validate_username(username)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::InvalidPassword("must be at least 8 characters long"));
        }

        if self.storage.get_user_by_username(username).await?.is_some() {
            return Err(Error::UserExists);
        }

        let hash = password::hash_password(password)?;
        match self.storage.create_user(username, &hash, ROLE_REGULAR).await {
            Ok(user) => {
                info!(user_id = user.id, username = %user.username, "Registered user");
                Ok(user)
            }
            Err(StorageError::Conflict) => Err(Error::UserExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and issue a session token
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, User)> {
        let user = self
            .storage
            .get_user_by_username(username)
            .await?
            .filter(|u| !u.is_anonymous())
            .ok_or(Error::InvalidCredentials)?;

        if !password::verify_password(password, &user.password_hash) {
            return Err(Error::InvalidCredentials);
        }

        let token = self.tokens.issue(&user)?;
        Ok((token, user))
    }

    pub async fn get(&self, user_id: i64) -> Result<User> {
        self.storage
            .get_user_by_id(user_id)
            .await?
            .ok_or(Error::UserNotFound)
    }

    /// The caller's own account
    pub async fn me(&self, caller: &Caller) -> Result<User> {
        let user = caller.user().ok_or(Error::NoPermission)?;
        self.get(user.id).await
    }

    pub async fn list_users(&self, operator: &Caller) -> Result<Vec<User>> {
        require_manage(operator)?;
        Ok(self.storage.list_users().await?)
    }

    pub async fn set_role(&self, operator: &Caller, target_id: i64, role: Role) -> Result<User> {
        self.set_permissions(operator, target_id, role.permissions())
            .await
    }

    /// Replace a user's permission bits
    pub async fn set_permissions(
        &self,
        operator: &Caller,
        target_id: i64,
        permissions: Permission,
    ) -> Result<User> {
        require_manage(operator)?;

        let mut target = self.get(target_id).await?;
        if target.is_anonymous() {
            return Err(Error::SentinelProtected);
        }

        if !self
            .storage
            .update_permissions(target_id, permissions)
            .await?
        {
            return Err(Error::UserNotFound);
        }
        info!(
            user_id = target_id,
            permissions = permissions.bits(),
            "Updated user permissions"
        );
        target.permissions = permissions;
        Ok(target)
    }

    /// Delete a user together with their links and clicks
    pub async fn delete_user(&self, operator: &Caller, target_id: i64) -> Result<()> {
        require_manage(operator)?;

        let target = self.get(target_id).await?;
        if target.is_anonymous() {
            return Err(Error::SentinelProtected);
        }

        if !self.storage.delete_user(target_id).await? {
            return Err(Error::UserNotFound);
        }
        info!(user_id = target_id, username = %target.username, "Deleted user");
        Ok(())
    }

    /// Attach an external chat account to a user
    pub async fn link_chat(&self, user_id: i64, chat_id: i64) -> Result<()> {
        let user = self.get(user_id).await?;
        if user.is_anonymous() {
            return Err(Error::SentinelProtected);
        }

        match self.storage.update_chat_id(user_id, Some(chat_id)).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::UserNotFound),
            Err(StorageError::Conflict) => Err(Error::ChatAlreadyLinked),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unlink_chat(&self, user_id: i64) -> Result<()> {
        if self.storage.update_chat_id(user_id, None).await? {
            Ok(())
        } else {
            Err(Error::UserNotFound)
        }
    }

    pub async fn find_by_chat(&self, chat_id: i64) -> Result<Option<User>> {
        Ok(self.storage.get_user_by_chat_id(chat_id).await?)
    }

    /// Issue a one-time token the owner of `chat_id` redeems to link it.
    /// Only user managers may issue tokens.
    pub async fn prepare_chat_link(&self, operator: &Caller, chat_id: i64) -> Result<String> {
        require_manage(operator)?;
        if self.find_by_chat(chat_id).await?.is_some() {
            return Err(Error::ChatAlreadyLinked);
        }
        let token = self.chat_links.issue(chat_id).await;
        info!(chat_id, "Issued chat link token");
        Ok(token)
    }

    /// Link the chat behind `token` to the calling user
    pub async fn redeem_chat_link(&self, caller: &Caller, token: &str) -> Result<User> {
        // Checked first so anonymous callers cannot burn tokens
        let user = caller.user().ok_or(Error::NoPermission)?;
        let chat_id = self
            .chat_links
            .redeem(token.trim())
            .await
            .ok_or(Error::InvalidLinkToken)?;

        self.link_chat(user.id, chat_id).await?;
        info!(user_id = user.id, chat_id, "Linked chat account");
        self.get(user.id).await
    }

    /// Detach the calling user's chat account
    pub async fn unlink_own_chat(&self, caller: &Caller) -> Result<User> {
        let user = caller.user().ok_or(Error::NoPermission)?;
        self.unlink_chat(user.id).await?;
        info!(user_id = user.id, "Unlinked chat account");
        self.get(user.id).await
    }
}

fn require_manage(operator: &Caller) -> Result<()> {
    if operator.permissions().has(Permission::MANAGE_USERS) {
        Ok(())
    } else {
        Err(Error::NoPermission)
    }
}
