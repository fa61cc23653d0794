use crate::remote::{AuthBackend, RemoteError};
use crate::storage::KeyValueStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SESSION_KEY: &str = "checkit-session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn display_name(&self) -> &str {
        self.user.email.as_deref().unwrap_or(&self.user.id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Persists the signed-in session in the global data directory.
pub struct SessionStore {
    store: Box<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        SessionStore { store }
    }

    pub fn load(&self) -> Option<Session> {
        let raw = match self.store.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("could not read session: {:#}", err);
                return None;
            }
        };
        match serde_yaml::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!("discarding unreadable session: {}", err);
                None
            }
        }
    }

    pub fn save(&mut self, session: &Session) -> Result<()> {
        let data = serde_yaml::to_string(session).context("serializing session")?;
        self.store.set(SESSION_KEY, &data)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.store.remove(SESSION_KEY)
    }
}

/// Validates the stored session against the backend, refreshing it once if
/// needed. An unusable session is cleared and its error returned.
pub fn restore_session(
    auth: &dyn AuthBackend,
    sessions: &mut SessionStore,
) -> Result<Option<Session>, RemoteError> {
    let Some(mut session) = sessions.load() else {
        return Ok(None);
    };

    if !session.is_expired(Utc::now()) {
        match auth.current_user(&session.access_token) {
            Ok(user) => {
                session.user = user;
                info!("restored session for {}", session.display_name());
                return Ok(Some(session));
            }
            Err(err) => warn!("stored session rejected: {}", err),
        }
    }

    match auth.refresh(&session.refresh_token) {
        Ok(fresh) => {
            if let Err(err) = sessions.save(&fresh) {
                warn!("could not persist refreshed session: {:#}", err);
            }
            info!("refreshed session for {}", fresh.display_name());
            Ok(Some(fresh))
        }
        Err(err) => {
            if let Err(clear_err) = sessions.clear() {
                warn!("could not clear session: {:#}", clear_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeAuth;
    use crate::storage::memory::MemoryStore;
    use chrono::Duration;

    fn session(token: &str) -> Session {
        Session {
            access_token: token.into(),
            refresh_token: format!("{}-refresh", token),
            user: User {
                id: "user-1".into(),
                email: Some("ada@example.com".into()),
            },
            expires_at: None,
        }
    }

    #[test]
    fn save_load_clear() {
        let backing = MemoryStore::default();
        let mut sessions = SessionStore::new(Box::new(backing.clone()));
        assert_eq!(sessions.load(), None);
        sessions.save(&session("t")).unwrap();
        assert!(backing.raw(SESSION_KEY).is_some());
        assert_eq!(sessions.load(), Some(session("t")));
        sessions.clear().unwrap();
        assert_eq!(sessions.load(), None);
    }

    #[test]
    fn restore_keeps_valid_session() {
        let auth = FakeAuth::default();
        auth.valid_tokens.lock().unwrap().push("good".into());
        let mut sessions = SessionStore::new(Box::new(MemoryStore::default()));
        sessions.save(&session("good")).unwrap();

        let restored = restore_session(&auth, &mut sessions).unwrap().unwrap();
        assert_eq!(restored.access_token, "good");
        assert_eq!(*auth.refreshes.lock().unwrap(), 0);
    }

    #[test]
    fn restore_refreshes_expired_session() {
        let auth = FakeAuth::default();
        let mut sessions = SessionStore::new(Box::new(MemoryStore::default()));
        let mut stale = session("old");
        stale.expires_at = Some(Utc::now() - Duration::minutes(5));
        sessions.save(&stale).unwrap();

        let restored = restore_session(&auth, &mut sessions).unwrap().unwrap();
        assert_eq!(restored.access_token, "refreshed");
        assert_eq!(sessions.load().unwrap().access_token, "refreshed");
    }

    #[test]
    fn restore_clears_unusable_session() {
        let auth = FakeAuth {
            refuse_refresh: true,
            ..FakeAuth::default()
        };
        let mut sessions = SessionStore::new(Box::new(MemoryStore::default()));
        sessions.save(&session("revoked")).unwrap();

        assert!(restore_session(&auth, &mut sessions).is_err());
        assert_eq!(sessions.load(), None);
    }
}
