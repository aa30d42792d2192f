//! One-time tokens that prove control of a chat account
//!
//! The chat side asks for a token bound to its chat id and hands it to the
//! person it is talking to. That person redeems it while logged in, which
//! ties the chat to their account. Tokens expire and can be redeemed once.

use moka::future::Cache;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

const TOKEN_LEN: usize = 32;
const CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct Pending {
    chat_id: i64,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct ChatLinkTokens {
    pending: Cache<String, Pending>,
    ttl: Duration,
}

impl Default for ChatLinkTokens {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ChatLinkTokens {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Cache::builder()
                .max_capacity(CAPACITY)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// A fresh token bound to `chat_id`
    pub async fn issue(&self, chat_id: i64) -> String {
        let token = random_token();
        let pending = Pending {
            chat_id,
            expires_at: Instant::now() + self.ttl,
        };
        self.pending.insert(token.clone(), pending).await;
        token
    }

    /// The chat id behind `token`, consuming it. `None` if the token is
    /// unknown, expired or already redeemed.
    pub async fn redeem(&self, token: &str) -> Option<i64> {
        // Eviction is lazy, so the deadline is checked here too
        self.pending
            .remove(token)
            .await
            .filter(|pending| pending.expires_at > Instant::now())
            .map(|pending| pending.chat_id)
    }
}

fn random_token() -> String {
    use rand::RngExt;
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}
