//! Hosted backend access: e-mail one-time-link auth and a user-scoped task
//! table exposed over PostgREST-style endpoints.

use crate::config::RemoteConfig;
use crate::model::{Task, TaskId};
use crate::session::{Session, User};
use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote backend is not configured")]
    NotConfigured,
    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Row operations on the remote task table, always scoped to the session's
/// user.
pub trait TaskBackend: Send + Sync {
    fn fetch_tasks(&self, session: &Session) -> Result<Vec<Task>, RemoteError>;
    fn insert_task(&self, session: &Session, title: &str) -> Result<Task, RemoteError>;
    fn set_done(&self, session: &Session, id: TaskId, done: bool) -> Result<(), RemoteError>;
    fn rename_task(&self, session: &Session, id: TaskId, title: &str) -> Result<(), RemoteError>;
    fn delete_task(&self, session: &Session, id: TaskId) -> Result<(), RemoteError>;
    fn delete_completed(&self, session: &Session) -> Result<(), RemoteError>;
}

pub trait AuthBackend: Send + Sync {
    fn send_magic_link(&self, email: &str) -> Result<(), RemoteError>;
    fn verify_code(&self, email: &str, code: &str) -> Result<Session, RemoteError>;
    fn current_user(&self, access_token: &str) -> Result<User, RemoteError>;
    fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError>;
    fn sign_out(&self, access_token: &str) -> Result<(), RemoteError>;
}

pub struct RestBackend {
    config: RemoteConfig,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

impl From<AuthResponse> for Session {
    fn from(resp: AuthResponse) -> Self {
        Session {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            user: resp.user,
            expires_at: resp
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        }
    }
}

impl RestBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        RestBackend { config, agent }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.base_url(), self.config.table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url(), path)
    }

    fn request(&self, method: &str, url: &str, token: Option<&str>) -> ureq::Request {
        let bearer = format!("Bearer {}", token.unwrap_or(&self.config.anon_key));
        self.agent
            .request(method, url)
            .set("apikey", &self.config.anon_key)
            .set("Authorization", &bearer)
    }

    fn table_request(&self, method: &str, session: &Session) -> ureq::Request {
        self.request(method, &self.table_url(), Some(&session.access_token))
            .query("user_id", &format!("eq.{}", session.user_id()))
    }
}

fn send(
    req: ureq::Request,
    body: Option<Value>,
) -> Result<ureq::Response, RemoteError> {
    debug!(method = req.method(), url = req.url(), "remote request");
    let result = match body {
        Some(body) => req.send_json(body),
        None => req.call(),
    };
    match result {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(status, resp)) => {
            let raw = resp.into_string().unwrap_or_default();
            Err(RemoteError::Status {
                status,
                message: error_message(&raw),
            })
        }
        Err(ureq::Error::Transport(err)) => Err(RemoteError::Transport(err.to_string())),
    }
}

fn decode<T: DeserializeOwned>(resp: ureq::Response) -> Result<T, RemoteError> {
    resp.into_json()
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Pulls a human-readable message out of an error body.
pub fn error_message(raw: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        for field in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(text)) = map.get(field) {
                return text.clone();
            }
        }
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "no details".to_string()
    } else {
        trimmed.to_string()
    }
}

impl TaskBackend for RestBackend {
    fn fetch_tasks(&self, session: &Session) -> Result<Vec<Task>, RemoteError> {
        let req = self
            .table_request("GET", session)
            .query("select", "id,title,done")
            .query("order", &format!("{}.desc", self.config.order_column));
        decode(send(req, None)?)
    }

    fn insert_task(&self, session: &Session, title: &str) -> Result<Task, RemoteError> {
        let req = self
            .request("POST", &self.table_url(), Some(&session.access_token))
            .query("select", "id,title,done")
            .set("Prefer", "return=representation");
        let body = json!({ "title": title, "done": false, "user_id": session.user_id() });
        let rows: Vec<Task> = decode(send(req, Some(body))?)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no row".into()))
    }

    fn set_done(&self, session: &Session, id: TaskId, done: bool) -> Result<(), RemoteError> {
        let req = self
            .table_request("PATCH", session)
            .query("id", &format!("eq.{}", id));
        send(req, Some(json!({ "done": done })))?;
        Ok(())
    }

    fn rename_task(&self, session: &Session, id: TaskId, title: &str) -> Result<(), RemoteError> {
        let req = self
            .table_request("PATCH", session)
            .query("id", &format!("eq.{}", id));
        send(req, Some(json!({ "title": title })))?;
        Ok(())
    }

    fn delete_task(&self, session: &Session, id: TaskId) -> Result<(), RemoteError> {
        let req = self
            .table_request("DELETE", session)
            .query("id", &format!("eq.{}", id));
        send(req, None)?;
        Ok(())
    }

    fn delete_completed(&self, session: &Session) -> Result<(), RemoteError> {
        let req = self.table_request("DELETE", session).query("done", "eq.true");
        send(req, None)?;
        Ok(())
    }
}

impl AuthBackend for RestBackend {
    fn send_magic_link(&self, email: &str) -> Result<(), RemoteError> {
        let req = self.request("POST", &self.auth_url("otp"), None);
        send(req, Some(json!({ "email": email, "create_user": true })))?;
        Ok(())
    }

    fn verify_code(&self, email: &str, code: &str) -> Result<Session, RemoteError> {
        let req = self.request("POST", &self.auth_url("verify"), None);
        let body = json!({ "type": "email", "email": email, "token": code.trim() });
        let resp: AuthResponse = decode(send(req, Some(body))?)?;
        Ok(resp.into())
    }

    fn current_user(&self, access_token: &str) -> Result<User, RemoteError> {
        let req = self.request("GET", &self.auth_url("user"), Some(access_token));
        decode(send(req, None)?)
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let req = self
            .request("POST", &self.auth_url("token"), None)
            .query("grant_type", "refresh_token");
        let resp: AuthResponse =
            decode(send(req, Some(json!({ "refresh_token": refresh_token })))?)?;
        Ok(resp.into())
    }

    fn sign_out(&self, access_token: &str) -> Result<(), RemoteError> {
        let req = self.request("POST", &self.auth_url("logout"), Some(access_token));
        send(req, None)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::{Arc, Condvar, Mutex};

    /// Blocks requests while closed.
    #[derive(Clone, Default)]
    pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

    impl Gate {
        pub fn close(&self) {
            *self.0 .0.lock().unwrap() = true;
        }

        pub fn open(&self) {
            *self.0 .0.lock().unwrap() = false;
            self.0 .1.notify_all();
        }

        fn pass(&self) {
            let (lock, cvar) = &*self.0;
            let mut closed = lock.lock().unwrap();
            while *closed {
                closed = cvar.wait(closed).unwrap();
            }
        }
    }

    /// Task table kept in memory, one row set per user id.
    #[derive(Default)]
    pub struct FakeTasks {
        pub rows: Mutex<Vec<(String, Task)>>,
        pub calls: Mutex<Vec<String>>,
        pub fail: AtomicBool,
        pub gate: Gate,
        fail_prefix: Mutex<Option<String>>,
        next_id: AtomicI64,
    }

    impl FakeTasks {
        pub fn with_rows(user: &str, tasks: Vec<Task>) -> Self {
            let fake = FakeTasks::default();
            let max = tasks.iter().map(|t| t.id).max().unwrap_or(0);
            fake.next_id.store(max, Ordering::SeqCst);
            *fake.rows.lock().unwrap() =
                tasks.into_iter().map(|t| (user.to_string(), t)).collect();
            fake
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Fails only calls whose log line starts with `prefix`.
        pub fn fail_calls(&self, prefix: &str) {
            *self.fail_prefix.lock().unwrap() = Some(prefix.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn rows_for(&self, user: &str) -> Vec<Task> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == user)
                .map(|(_, t)| t.clone())
                .collect()
        }

        fn enter(&self, call: String) -> Result<(), RemoteError> {
            self.gate.pass();
            let matched = self
                .fail_prefix
                .lock()
                .unwrap()
                .as_deref()
                .map_or(false, |prefix| call.starts_with(prefix));
            self.calls.lock().unwrap().push(call);
            if matched || self.fail.load(Ordering::SeqCst) {
                return Err(RemoteError::Status {
                    status: 500,
                    message: "database unavailable".into(),
                });
            }
            Ok(())
        }

        fn update(&self, session: &Session, id: TaskId, f: impl Fn(&mut Task)) {
            let mut rows = self.rows.lock().unwrap();
            for (user, task) in rows.iter_mut() {
                if user == session.user_id() && task.id == id {
                    f(task);
                }
            }
        }
    }

    impl TaskBackend for FakeTasks {
        fn fetch_tasks(&self, session: &Session) -> Result<Vec<Task>, RemoteError> {
            self.enter(format!("fetch {}", session.user_id()))?;
            let mut tasks = self.rows_for(session.user_id());
            tasks.sort_by(|a, b| b.id.cmp(&a.id));
            Ok(tasks)
        }

        fn insert_task(&self, session: &Session, title: &str) -> Result<Task, RemoteError> {
            self.enter(format!("insert {} {}", session.user_id(), title))?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let task = Task::new(id, title);
            self.rows
                .lock()
                .unwrap()
                .push((session.user_id().to_string(), task.clone()));
            Ok(task)
        }

        fn set_done(&self, session: &Session, id: TaskId, done: bool) -> Result<(), RemoteError> {
            self.enter(format!("set_done {} {} {}", session.user_id(), id, done))?;
            self.update(session, id, |t| t.done = done);
            Ok(())
        }

        fn rename_task(
            &self,
            session: &Session,
            id: TaskId,
            title: &str,
        ) -> Result<(), RemoteError> {
            self.enter(format!("rename {} {} {}", session.user_id(), id, title))?;
            self.update(session, id, |t| t.title = title.to_string());
            Ok(())
        }

        fn delete_task(&self, session: &Session, id: TaskId) -> Result<(), RemoteError> {
            self.enter(format!("delete {} {}", session.user_id(), id))?;
            self.rows
                .lock()
                .unwrap()
                .retain(|(u, t)| !(u == session.user_id() && t.id == id));
            Ok(())
        }

        fn delete_completed(&self, session: &Session) -> Result<(), RemoteError> {
            self.enter(format!("delete_completed {}", session.user_id()))?;
            self.rows
                .lock()
                .unwrap()
                .retain(|(u, t)| !(u == session.user_id() && t.done));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeAuth {
        pub valid_tokens: Mutex<Vec<String>>,
        pub sent_links: Mutex<Vec<String>>,
        pub refreshes: Mutex<usize>,
        pub refuse_refresh: bool,
    }

    pub fn session_for(user: &str, token: &str) -> Session {
        Session {
            access_token: token.into(),
            refresh_token: format!("{}-refresh", token),
            user: User {
                id: user.into(),
                email: Some(format!("{}@example.com", user)),
            },
            expires_at: None,
        }
    }

    impl AuthBackend for FakeAuth {
        fn send_magic_link(&self, email: &str) -> Result<(), RemoteError> {
            self.sent_links.lock().unwrap().push(email.to_string());
            Ok(())
        }

        fn verify_code(&self, email: &str, code: &str) -> Result<Session, RemoteError> {
            if code != "123456" {
                return Err(RemoteError::Status {
                    status: 403,
                    message: "Token has expired or is invalid".into(),
                });
            }
            let user = email.split('@').next().unwrap_or(email);
            Ok(session_for(user, "verified"))
        }

        fn current_user(&self, access_token: &str) -> Result<User, RemoteError> {
            if self.valid_tokens.lock().unwrap().iter().any(|t| t == access_token) {
                Ok(User {
                    id: "user-1".into(),
                    email: Some("ada@example.com".into()),
                })
            } else {
                Err(RemoteError::Status {
                    status: 401,
                    message: "invalid JWT".into(),
                })
            }
        }

        fn refresh(&self, _refresh_token: &str) -> Result<Session, RemoteError> {
            *self.refreshes.lock().unwrap() += 1;
            if self.refuse_refresh {
                return Err(RemoteError::Status {
                    status: 400,
                    message: "Invalid Refresh Token".into(),
                });
            }
            Ok(session_for("user-1", "refreshed"))
        }

        fn sign_out(&self, _access_token: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::session_for;
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> RestBackend {
        RestBackend::new(RemoteConfig::new(server.uri(), "anon-key"))
    }

    // ureq blocks, so calls run on the blocking pool while the mock server
    // keeps serving.
    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.unwrap()
    }

    #[tokio::test]
    async fn fetch_scopes_by_user_and_orders_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/todos"))
            .and(query_param("user_id", "eq.u1"))
            .and(query_param("order", "created_at.desc"))
            .and(query_param("select", "id,title,done"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 9, "title": "newest", "done": false },
                { "id": 3, "title": "older", "done": true }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let api = backend(&server);
        let tasks = blocking(move || api.fetch_tasks(&session_for("u1", "tok")))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, 9);
        assert!(tasks[1].done);
    }

    #[tokio::test]
    async fn fetch_uses_configured_order_column() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/todos"))
            .and(query_param("order", "id.desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = RemoteConfig::new(server.uri(), "anon-key");
        config.order_column = "id".into();
        let api = RestBackend::new(config);
        let tasks = blocking(move || api.fetch_tasks(&session_for("u1", "tok")))
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn insert_returns_backend_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/todos"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(json!({ "title": "buy milk", "done": false, "user_id": "u1" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "id": 77, "title": "buy milk", "done": false, "user_id": "u1" }
            ])))
            .mount(&server)
            .await;

        let api = backend(&server);
        let task = blocking(move || api.insert_task(&session_for("u1", "tok"), "buy milk"))
            .await
            .unwrap();
        assert_eq!(task, Task::new(77, "buy milk"));
    }

    #[tokio::test]
    async fn mutations_target_row_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(query_param("id", "eq.5"))
            .and(query_param("user_id", "eq.u1"))
            .and(body_json(json!({ "done": true })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(query_param("done", "eq.true"))
            .and(query_param("user_id", "eq.u1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = backend(&server);
        blocking(move || {
            let session = session_for("u1", "tok");
            api.set_done(&session, 5, true)?;
            api.delete_completed(&session)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn error_body_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({ "message": "permission denied for table todos" })),
            )
            .mount(&server)
            .await;

        let api = backend(&server);
        let err = blocking(move || api.delete_task(&session_for("u1", "tok"), 1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 403,
                message: "permission denied for table todos".into()
            }
        );
    }

    #[tokio::test]
    async fn verify_code_builds_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/verify"))
            .and(body_json(json!({ "type": "email", "email": "ada@example.com", "token": "123456" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "r1",
                "user": { "id": "u1", "email": "ada@example.com", "role": "authenticated" }
            })))
            .mount(&server)
            .await;

        let api = backend(&server);
        let session = blocking(move || api.verify_code("ada@example.com", " 123456 "))
            .await
            .unwrap();
        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.refresh_token, "r1");
        assert!(session.expires_at.is_some());
    }

    #[test]
    fn unreachable_server_is_transport_error() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let api = RestBackend::new(RemoteConfig::new(format!("http://{}", addr), "anon-key"));
        let err = api.send_magic_link("ada@example.com").unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
    }

    #[test]
    fn error_message_prefers_known_fields() {
        assert_eq!(error_message(r#"{"msg":"Email rate limit exceeded"}"#), "Email rate limit exceeded");
        assert_eq!(error_message(r#"{"error_description":"bad grant"}"#), "bad grant");
        assert_eq!(error_message("upstream down"), "upstream down");
        assert_eq!(error_message(""), "no details");
    }
}
