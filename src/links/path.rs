//! Short path generation and custom path authorization

use crate::auth::Caller;
use crate::error::{Error, Result};
use crate::permission::Permission;

/// Alphabet for generated paths; drops 0/O, 1/l/I to keep paths readable
const ALPHABET: &[u8] = b"23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// First path segments owned by the service itself
const RESERVED_PREFIXES: &[&str] = &["api", "auth", "admin", "assets", "static"];

/// Well-known files browsers and crawlers request on their own
const RESERVED_FILES: &[&str] = &["favicon.ico", "robots.txt"];

const MAX_CUSTOM_PATH_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct PathAllocator {
    length: usize,
}

impl Default for PathAllocator {
    fn default() -> Self {
        Self::new(6)
    }
}

impl PathAllocator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// A fresh random path. Not guaranteed unique; the store decides.
    pub fn generate(&self) -> String {
        use rand::RngExt;
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Decide whether `caller` may claim `path`.
    ///
    /// Checks run in a fixed order: reserved paths first (regardless of who
    /// asks), then authentication, then the `@username/` namespace rule or
    /// the create-any capability, and finally the path's shape.
    pub fn authorize_custom(&self, caller: &Caller, path: &str) -> Result<()> {
        if is_reserved(path) {
            return Err(Error::PathReserved);
        }

        let Caller::User(user) = caller else {
            return Err(Error::NoPermission);
        };

        if let Some(rest) = path.strip_prefix('@') {
            let namespace = rest.split_once('/').map_or(rest, |(name, _)| name);
            if !user.permissions.has(Permission::CREATE_PREFIX) || namespace != user.username {
                return Err(Error::CustomPathNotAllowed);
            }
        } else if !user.permissions.has(Permission::CREATE_ANY) {
            return Err(Error::CustomPathNotAllowed);
        }

        validate_shape(path)
    }
}

/// True for paths that would shadow service routes or well-known files
pub fn is_reserved(path: &str) -> bool {
    let path = path.trim_start_matches('/');
    let first = path.split('/').next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();

    let has_reserved_prefix = RESERVED_PREFIXES
        .iter()
        .any(|prefix| first.eq_ignore_ascii_case(prefix) && path.len() > first.len());

    // Well-known files are reserved at any depth
    has_reserved_prefix || RESERVED_FILES.iter().any(|f| last.eq_ignore_ascii_case(f))
}

fn validate_shape(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path must not be empty"));
    }
    if path.len() > MAX_CUSTOM_PATH_LEN {
        return Err(Error::InvalidPath("path must be at most 128 characters"));
    }
    if path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(Error::InvalidPath("path segments must not be empty"));
    }
    let body = path.strip_prefix('@').unwrap_or(path);
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/');
    if body.is_empty() || !body.chars().all(allowed) {
        return Err(Error::InvalidPath(
            "only letters, digits, '-', '_', '.' and '/' are allowed",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::permission::{ROLE_ADMIN, ROLE_GUEST, ROLE_PRIVILEGED, ROLE_REGULAR};

    fn user(name: &str, permissions: Permission) -> Caller {
        Caller::User(AuthUser {
            id: 7,
            username: name.to_string(),
            permissions,
        })
    }

    #[test]
    fn test_generate_length_and_alphabet() {
        let allocator = PathAllocator::new(6);
        for _ in 0..200 {
            let path = allocator.generate();
            assert_eq!(path.len(), 6);
            assert!(path.bytes().all(|b| ALPHABET.contains(&b)), "{path}");
        }
        assert_eq!(PathAllocator::new(10).generate().len(), 10);
    }

    #[test]
    fn test_reserved_paths() {
        assert!(is_reserved("admin/hack"));
        assert!(is_reserved("api/urls"));
        assert!(is_reserved("static/app.js"));
        assert!(is_reserved("favicon.ico"));
        assert!(is_reserved("robots.txt"));
        assert!(is_reserved("x/robots.txt"));
        assert!(is_reserved("docs/v2/Favicon.ico"));
        assert!(!is_reserved("robots.txt/notes"));
        assert!(!is_reserved("administrator"));
        assert!(!is_reserved("docs"));
        assert!(!is_reserved("@alice/api"));
    }

    #[test]
    fn test_reserved_wins_over_everything() {
        let allocator = PathAllocator::default();
        for caller in [Caller::Anonymous, user("root", ROLE_ADMIN)] {
            assert!(matches!(
                allocator.authorize_custom(&caller, "admin/hack"),
                Err(Error::PathReserved)
            ));
        }
    }

    #[test]
    fn test_guest_cannot_claim_custom_paths() {
        let allocator = PathAllocator::default();
        assert!(matches!(
            allocator.authorize_custom(&Caller::Anonymous, "promo"),
            Err(Error::NoPermission)
        ));
    }

    #[test]
    fn test_prefixed_paths() {
        let allocator = PathAllocator::default();
        let alice = user("alice", ROLE_REGULAR);
        assert!(allocator.authorize_custom(&alice, "@alice/notes").is_ok());
        assert!(allocator.authorize_custom(&alice, "@alice").is_ok());
        assert!(matches!(
            allocator.authorize_custom(&alice, "@bob/notes"),
            Err(Error::CustomPathNotAllowed)
        ));
        assert!(matches!(
            allocator.authorize_custom(&alice, "@alice2/notes"),
            Err(Error::CustomPathNotAllowed)
        ));

        let no_prefix = user("alice", ROLE_REGULAR.remove(Permission::CREATE_PREFIX));
        assert!(matches!(
            allocator.authorize_custom(&no_prefix, "@alice/notes"),
            Err(Error::CustomPathNotAllowed)
        ));
    }

    #[test]
    fn test_unprefixed_paths_need_create_any() {
        let allocator = PathAllocator::default();
        assert!(matches!(
            allocator.authorize_custom(&user("alice", ROLE_REGULAR), "promo"),
            Err(Error::CustomPathNotAllowed)
        ));
        assert!(matches!(
            allocator.authorize_custom(&user("alice", ROLE_GUEST), "promo"),
            Err(Error::CustomPathNotAllowed)
        ));
        assert!(allocator
            .authorize_custom(&user("alice", ROLE_PRIVILEGED), "promo")
            .is_ok());
    }

    #[test]
    fn test_path_shape() {
        let allocator = PathAllocator::default();
        let admin = user("root", ROLE_ADMIN);
        assert!(allocator.authorize_custom(&admin, "docs/v1.2_final-draft").is_ok());
        for bad in ["a b", "x//y", "trailing/", "/lead", "emoji-✓", "q?x=1"] {
            assert!(
                matches!(allocator.authorize_custom(&admin, bad), Err(Error::InvalidPath(_))),
                "{bad}"
            );
        }
        let long = "a".repeat(MAX_CUSTOM_PATH_LEN + 1);
        assert!(matches!(
            allocator.authorize_custom(&admin, &long),
            Err(Error::InvalidPath(_))
        ));
    }
}
