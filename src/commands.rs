use crate::config::AppConfig;
use crate::model::{Filter, Task, TaskId};
use crate::remote::{AuthBackend, RestBackend, TaskBackend};
use crate::session::{restore_session, SessionStore};
use crate::storage::{
    global_data_dir, init_project_store, locate_store, FileStore, StoreLocation,
};
use crate::sync::{Mode, TaskSync};
use crate::ui;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a command needs: task state, where it lives, and auth.
pub struct Workspace {
    pub tasks: TaskSync,
    pub location: StoreLocation,
    pub auth: Option<Arc<dyn AuthBackend>>,
    pub sessions: SessionStore,
}

pub fn init() -> Result<()> {
    let cwd = env::current_dir()?;
    let location = init_project_store(&cwd)?;
    println!("Initialized task list at {}", location.dir.display());
    Ok(())
}

pub fn list(config: &AppConfig, filter: Option<Filter>) -> Result<()> {
    let ctx = load(config)?;
    let filter = filter.unwrap_or(ctx.tasks.filter());
    println!(
        "Tasks ({}, {}) [{}]",
        mode_label(&ctx),
        ctx.location.scope.label(),
        filter
    );
    let shown = ctx.tasks.list().visible(filter);
    if ctx.tasks.list().is_empty() {
        println!("  (empty)");
    } else if shown.is_empty() {
        println!("  (no {} tasks)", filter);
    }
    for task in shown {
        print_task(task);
    }
    let done = ctx.tasks.list().completed_count();
    println!(
        "{} item(s) left, {} done",
        ctx.tasks.tasks().len() - done,
        done
    );
    Ok(())
}

pub fn add(config: &AppConfig, title: String) -> Result<()> {
    let mut ctx = load(config)?;
    if !ctx.tasks.add(&title) {
        bail!("title is required");
    }
    finish(&mut ctx)?;
    if let Some(task) = ctx.tasks.tasks().first() {
        println!("Added {}: {}", task.id, task.title);
    }
    Ok(())
}

pub fn toggle(config: &AppConfig, id: TaskId) -> Result<()> {
    let mut ctx = load(config)?;
    let done = ctx
        .tasks
        .toggle(id)
        .with_context(|| format!("toggling task {}", id))?;
    finish(&mut ctx)?;
    println!("Task {} is now {}", id, if done { "done" } else { "active" });
    Ok(())
}

pub fn edit(config: &AppConfig, id: TaskId, title: String) -> Result<()> {
    let mut ctx = load(config)?;
    ctx.tasks
        .rename(id, &title)
        .with_context(|| format!("editing task {}", id))?;
    finish(&mut ctx)?;
    println!("Updated task {}", id);
    Ok(())
}

pub fn remove(config: &AppConfig, id: TaskId) -> Result<()> {
    let mut ctx = load(config)?;
    ctx.tasks
        .remove(id)
        .with_context(|| format!("removing task {}", id))?;
    finish(&mut ctx)?;
    println!("Removed task {}", id);
    Ok(())
}

pub fn clear_completed(config: &AppConfig) -> Result<()> {
    let mut ctx = load(config)?;
    let removed = ctx.tasks.clear_completed();
    finish(&mut ctx)?;
    println!("Cleared {} completed task(s)", removed);
    Ok(())
}

pub fn filter(config: &AppConfig, filter: Option<Filter>) -> Result<()> {
    let mut ctx = open(config)?;
    match filter {
        Some(f) => {
            ctx.tasks.set_filter(f);
            println!("Filter set to {}", f);
        }
        None => println!("{}", ctx.tasks.filter()),
    }
    Ok(())
}

pub fn login(config: &AppConfig, email: String) -> Result<()> {
    let auth = auth_backend(config)?;
    auth.send_magic_link(email.trim())
        .context("sending sign-in link")?;
    println!(
        "Sign-in link sent to {}. Run `checkit verify {} <code>` with the code from the e-mail.",
        email.trim(),
        email.trim()
    );
    Ok(())
}

pub fn verify(config: &AppConfig, email: String, code: String) -> Result<()> {
    let mut ctx = open(config)?;
    let auth = ctx
        .auth
        .clone()
        .ok_or_else(|| anyhow!("remote backend is not configured"))?;
    let session = auth
        .verify_code(email.trim(), &code)
        .context("verifying sign-in code")?;
    ctx.sessions.save(&session)?;
    println!("Signed in as {}", session.display_name());
    ctx.tasks.sign_in(session)?;
    finish(&mut ctx)?;
    println!("{} remote task(s)", ctx.tasks.tasks().len());
    Ok(())
}

pub fn logout(config: &AppConfig) -> Result<()> {
    let mut ctx = open(config)?;
    sign_out(&mut ctx);
    println!("Signed out; {} local task(s)", ctx.tasks.tasks().len());
    Ok(())
}

pub fn whoami(config: &AppConfig) -> Result<()> {
    let ctx = open(config)?;
    if let Some(err) = ctx.tasks.auth_error() {
        println!("Not signed in ({})", err);
    } else {
        println!("{}", mode_label(&ctx));
    }
    Ok(())
}

pub fn tui(config: &AppConfig) -> Result<()> {
    let ctx = open(config)?;
    ui::run(ctx)
}

/// Loads local state, then restores a stored session when a backend is
/// configured.
pub fn open(config: &AppConfig) -> Result<Workspace> {
    let cwd = env::current_dir()?;
    let location = locate_store(&cwd)?;
    let sessions = SessionStore::new(Box::new(FileStore::new(global_data_dir()?)));

    let (tasks_backend, auth) = match &config.remote {
        Some(remote) => {
            let rest = Arc::new(RestBackend::new(remote.clone()));
            let tasks: Arc<dyn TaskBackend> = rest.clone();
            let auth: Arc<dyn AuthBackend> = rest;
            (Some(tasks), Some(auth))
        }
        None => (None, None),
    };

    let tasks = TaskSync::new(Box::new(FileStore::open(&location)), tasks_backend);
    let mut ctx = Workspace {
        tasks,
        location,
        auth,
        sessions,
    };

    if let Some(auth) = ctx.auth.clone() {
        match restore_session(auth.as_ref(), &mut ctx.sessions) {
            Ok(Some(session)) => {
                ctx.tasks.sign_in(session)?;
            }
            Ok(None) => {}
            Err(err) => ctx
                .tasks
                .set_auth_error(format!("Session expired, signed out: {}", err)),
        }
    }
    Ok(ctx)
}

/// Like [`open`], but waits for the remote list before returning.
fn load(config: &AppConfig) -> Result<Workspace> {
    let mut ctx = open(config)?;
    finish(&mut ctx)?;
    Ok(ctx)
}

/// Ends the remote session: best-effort server logout, local session file
/// removed, local tasks restored.
pub fn sign_out(ctx: &mut Workspace) {
    if let (Some(auth), Some(session)) = (&ctx.auth, ctx.tasks.session()) {
        if let Err(err) = auth.sign_out(&session.access_token) {
            warn!("server sign-out failed: {}", err);
        }
    }
    if let Err(err) = ctx.sessions.clear() {
        warn!("could not remove session: {:#}", err);
    }
    ctx.tasks.sign_out();
}

fn auth_backend(config: &AppConfig) -> Result<RestBackend> {
    let remote = config
        .remote
        .clone()
        .ok_or_else(|| anyhow!("remote backend is not configured"))?;
    Ok(RestBackend::new(remote))
}

/// Waits for remote requests and turns a reported failure into an error.
fn finish(ctx: &mut Workspace) -> Result<()> {
    if !ctx.tasks.settle(SETTLE_TIMEOUT) {
        bail!("timed out waiting for the remote backend");
    }
    if let Some(err) = ctx.tasks.data_error() {
        bail!("{}", err);
    }
    Ok(())
}

fn mode_label(ctx: &Workspace) -> String {
    match ctx.tasks.mode() {
        Mode::Authenticated(session) => format!("signed in as {}", session.display_name()),
        Mode::Anonymous => "local".to_string(),
    }
}

fn print_task(task: &Task) {
    let mark = if task.done { "x" } else { " " };
    println!("  [{}] {}: {}", mark, task.id, task.title);
}
