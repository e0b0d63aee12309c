//! Scoped capability tokens.
//!
//! Text form: `owner|expiration_epoch_secs|scope`. A token authorizes one
//! scope for one owner until it expires or a REVOKE naming the exact string
//! has been seen.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::identity::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Chat,
    File,
    Broadcast,
    Follow,
    Game,
    Group,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Chat,
        Scope::File,
        Scope::Broadcast,
        Scope::Follow,
        Scope::Game,
        Scope::Group,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Chat => "chat",
            Scope::File => "file",
            Scope::Broadcast => "broadcast",
            Scope::Follow => "follow",
            Scope::Game => "game",
            Scope::Group => "group",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = TokenRejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| TokenRejection::UnknownScope(s.to_string()))
    }
}

/// Why a token failed validation. Logged locally, never sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("no token presented")]
    Empty,
    #[error("token has been revoked")]
    Revoked,
    #[error("token is not owner|expiration|scope")]
    Malformed,
    #[error("unknown scope {0:?}")]
    UnknownScope(String),
    #[error("token expired at {expires_at} (now {now})")]
    Expired { expires_at: u64, now: u64 },
    #[error("token owned by {owner}, presented by {sender}")]
    OwnerMismatch { owner: String, sender: String },
    #[error("token scope {got}, expected {expected}")]
    ScopeMismatch { expected: Scope, got: Scope },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub owner: UserId,
    pub expires_at: u64,
    pub scope: Scope,
}

impl Token {
    pub fn issue(owner: &UserId, scope: Scope, ttl_secs: u64, now: u64) -> Self {
        Self {
            owner: owner.clone(),
            expires_at: now.saturating_add(ttl_secs),
            scope,
        }
    }

    pub fn parse(s: &str) -> Result<Self, TokenRejection> {
        let mut parts = s.split('|');
        let (Some(owner), Some(exp), Some(scope), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenRejection::Malformed);
        };
        let expires_at = exp.parse().map_err(|_| TokenRejection::Malformed)?;
        Ok(Self {
            owner: UserId::from_wire(owner),
            expires_at,
            scope: scope.parse()?,
        })
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at < now
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.owner, self.expires_at, self.scope)
    }
}

/// Check a presented token string against the expected scope and sender.
pub fn check_token(
    token: &str,
    expected: Scope,
    sender: &str,
    revoked: &HashSet<String>,
    now: u64,
) -> Result<(), TokenRejection> {
    if token.is_empty() {
        return Err(TokenRejection::Empty);
    }
    if revoked.contains(token) {
        return Err(TokenRejection::Revoked);
    }
    let parsed = Token::parse(token)?;
    if parsed.is_expired_at(now) {
        return Err(TokenRejection::Expired {
            expires_at: parsed.expires_at,
            now,
        });
    }
    if parsed.owner.as_str() != sender {
        return Err(TokenRejection::OwnerMismatch {
            owner: parsed.owner.to_string(),
            sender: sender.to_string(),
        });
    }
    if parsed.scope != expected {
        return Err(TokenRejection::ScopeMismatch {
            expected,
            got: parsed.scope,
        });
    }
    Ok(())
}

pub fn validate_token(
    token: &str,
    expected: Scope,
    sender: &str,
    revoked: &HashSet<String>,
    now: u64,
) -> bool {
    check_token(token, expected, sender, revoked, now).is_ok()
}

/// Issues our own tokens and holds the revocation set for everyone's.
#[derive(Debug)]
pub struct TokenAuthority {
    owner: UserId,
    ttl_secs: u64,
    refresh_margin_secs: u64,
    revoked: HashSet<String>,
    live: HashMap<Scope, Token>,
    issued: Vec<Token>,
}

impl TokenAuthority {
    pub fn new(owner: UserId, ttl_secs: u64) -> Self {
        Self {
            owner,
            ttl_secs,
            refresh_margin_secs: crate::LSNP_TIMING.token_refresh_margin_secs.min(ttl_secs / 2),
            revoked: HashSet::new(),
            live: HashMap::new(),
            issued: Vec::new(),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Issue a fresh token. Never returns a string that has been revoked.
    pub fn issue(&mut self, scope: Scope, ttl_secs: u64, now: u64) -> Token {
        let mut token = Token::issue(&self.owner, scope, ttl_secs, now);
        while self.revoked.contains(&token.to_string()) {
            token.expires_at += 1;
        }
        self.issued.push(token.clone());
        token
    }

    /// Token to stamp on an outgoing message of `scope`, reusing the cached
    /// one until it nears expiry or is revoked.
    pub fn token_for(&mut self, scope: Scope, now: u64) -> String {
        if let Some(cached) = self.live.get(&scope) {
            let text = cached.to_string();
            if cached.expires_at > now + self.refresh_margin_secs && !self.revoked.contains(&text) {
                return text;
            }
        }
        let token = self.issue(scope, self.ttl_secs, now);
        let text = token.to_string();
        tracing::debug!(scope = %scope, expires_at = token.expires_at, "issued token");
        self.live.insert(scope, token);
        text
    }

    /// The cached token for `scope`, if one is still usable.
    pub fn live_token(&self, scope: Scope, now: u64) -> Option<String> {
        self.live
            .get(&scope)
            .filter(|t| !t.is_expired_at(now))
            .map(|t| t.to_string())
            .filter(|text| !self.revoked.contains(text))
    }

    pub fn check(
        &self,
        token: &str,
        expected: Scope,
        sender: &str,
        now: u64,
    ) -> Result<(), TokenRejection> {
        check_token(token, expected, sender, &self.revoked, now)
    }

    pub fn validate(&self, token: &str, expected: Scope, sender: &str, now: u64) -> bool {
        self.check(token, expected, sender, now).is_ok()
    }

    /// Record a revocation. Returns false if the token was already revoked.
    pub fn revoke(&mut self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.live.retain(|_, t| t.to_string() != token);
        self.revoked.insert(token.to_string())
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains(token)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    /// Revoke every unexpired token we issued; returns their text forms
    /// so the caller can announce them.
    pub fn revoke_all_issued(&mut self, now: u64) -> Vec<String> {
        let live: Vec<String> = self
            .issued
            .iter()
            .filter(|t| !t.is_expired_at(now))
            .map(|t| t.to_string())
            .collect();
        let mut announced = Vec::new();
        for text in live {
            if self.revoke(&text) {
                announced.push(text);
            }
        }
        self.issued.clear();
        announced
    }
}
