use crate::commands::{sign_out, Workspace};
use crate::model::{Filter, Task, TaskError, TaskId};
use crate::remote::RemoteError;
use crate::session::Session;
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;
use std::io::{stdout, Stdout};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub fn run(workspace: Workspace) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let mut app = App::new(workspace);
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

struct App {
    ws: Workspace,
    input: FieldValue,
    selected: usize,
    scroll_offset: usize,
    mode: Mode,
    auth_busy: bool,
    auth_tx: Sender<AuthReply>,
    auth_rx: Receiver<AuthReply>,
}

/// Result of a sign-in step that ran off the event loop.
enum AuthReply {
    LinkSent {
        email: String,
        result: Result<(), RemoteError>,
    },
    Verified(Result<Session, RemoteError>),
}

enum Mode {
    Normal,
    Input,
    Editing { task_id: TaskId, field: FieldValue },
    ConfirmDelete { task_id: TaskId },
    SignInEmail(FieldValue),
    SignInCode { email: String, field: FieldValue },
}

#[derive(Clone, Default)]
struct FieldValue {
    value: String,
    cursor: usize,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_char(self.cursor, &self.value);
    }

    fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_char(self.cursor, &self.value);
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_char(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    /// Shared single-line editing keys. Returns true if the key was used.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.value.len(),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.insert_char(c)
            }
            _ => return false,
        }
        true
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

impl App {
    fn new(ws: Workspace) -> Self {
        let (auth_tx, auth_rx) = mpsc::channel();
        App {
            ws,
            input: FieldValue::default(),
            selected: 0,
            scroll_offset: 0,
            mode: Mode::Normal,
            auth_busy: false,
            auth_tx,
            auth_rx,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(200))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key)? {
                        break;
                    }
                }
            }
            let synced = self.ws.tasks.poll();
            if self.poll_auth() || synced {
                self.clamp_selection();
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        let mode = std::mem::replace(&mut self.mode, Mode::Normal);
        self.mode = match mode {
            Mode::Normal => return self.handle_normal_key(key),
            Mode::Input => self.handle_input_key(key),
            Mode::Editing { task_id, field } => self.handle_edit_key(task_id, field, key),
            Mode::ConfirmDelete { task_id } => self.handle_confirm_key(task_id, key),
            Mode::SignInEmail(field) => self.handle_email_key(field, key),
            Mode::SignInCode { email, field } => self.handle_code_key(email, field, key),
        };
        self.clamp_selection();
        Ok(false)
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('a') | KeyCode::Char('i') | KeyCode::Char('n') => {
                self.mode = Mode::Input;
            }
            KeyCode::Up | KeyCode::Char('k') => self.select_prev(),
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            KeyCode::Char(' ') | KeyCode::Char('x') => self.toggle_selected(),
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(task) = self.selected_task() {
                    let field = FieldValue::new(&task.title);
                    let task_id = task.id;
                    self.mode = Mode::Editing { task_id, field };
                    self.ws
                        .tasks
                        .set_status("Editing (Enter save, Esc cancel)");
                } else {
                    self.ws.tasks.set_status("No task selected to edit");
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(task) = self.selected_task() {
                    let status = format!("Delete \"{}\"? (y to confirm, n/Esc to cancel)", task.title);
                    self.mode = Mode::ConfirmDelete { task_id: task.id };
                    self.ws.tasks.set_status(status);
                } else {
                    self.ws.tasks.set_status("No task selected to delete");
                }
            }
            KeyCode::Char('1') => self.set_filter(Filter::All),
            KeyCode::Char('2') => self.set_filter(Filter::Active),
            KeyCode::Char('3') => self.set_filter(Filter::Done),
            KeyCode::Char('f') => self.set_filter(self.ws.tasks.filter().next()),
            KeyCode::Char('c') => {
                if self.ws.tasks.list().has_completed() {
                    self.ws.tasks.clear_completed();
                } else {
                    self.ws.tasks.set_status("No completed tasks to clear");
                }
            }
            KeyCode::Char('r') => self.ws.tasks.reload(),
            KeyCode::Char('L') => self.begin_sign_in(),
            KeyCode::Char('O') => {
                if self.ws.tasks.session().is_some() {
                    sign_out(&mut self.ws);
                    self.selected = 0;
                } else {
                    self.ws.tasks.set_status("Not signed in");
                }
            }
            KeyCode::Esc => self.ws.tasks.dismiss_errors(),
            _ => {}
        }
        self.clamp_selection();
        Ok(false)
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> Mode {
        match key.code {
            KeyCode::Esc => Mode::Normal,
            KeyCode::Enter => {
                if self.ws.tasks.add(&self.input.value) {
                    self.input = FieldValue::default();
                    self.selected = 0;
                }
                Mode::Input
            }
            _ => {
                self.input.handle_key(key);
                Mode::Input
            }
        }
    }

    fn handle_edit_key(&mut self, task_id: TaskId, mut field: FieldValue, key: KeyEvent) -> Mode {
        match key.code {
            KeyCode::Esc => {
                self.ws.tasks.set_status("Edit canceled");
                Mode::Normal
            }
            KeyCode::Enter => {
                self.commit_edit(task_id, &field);
                Mode::Normal
            }
            // Leaving the row commits, like losing focus.
            KeyCode::Up | KeyCode::Tab | KeyCode::BackTab | KeyCode::Down => {
                self.commit_edit(task_id, &field);
                match key.code {
                    KeyCode::Up | KeyCode::BackTab => self.select_prev(),
                    _ => self.select_next(),
                }
                Mode::Normal
            }
            _ => {
                field.handle_key(key);
                Mode::Editing { task_id, field }
            }
        }
    }

    fn handle_confirm_key(&mut self, task_id: TaskId, key: KeyEvent) -> Mode {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                if let Err(err) = self.ws.tasks.remove(task_id) {
                    self.ws.tasks.set_status(format!("Delete failed: {}", err));
                }
                Mode::Normal
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.ws.tasks.set_status("Delete canceled");
                Mode::Normal
            }
            _ => Mode::ConfirmDelete { task_id },
        }
    }

    fn handle_email_key(&mut self, mut field: FieldValue, key: KeyEvent) -> Mode {
        match key.code {
            KeyCode::Esc => {
                self.ws.tasks.set_status("Sign-in canceled");
                Mode::Normal
            }
            KeyCode::Enter => {
                let email = field.value.trim().to_string();
                if email.is_empty() || self.auth_busy {
                    return Mode::SignInEmail(field);
                }
                let Some(auth) = self.ws.auth.clone() else {
                    return Mode::Normal;
                };
                self.ws
                    .tasks
                    .set_status(format!("Sending sign-in link to {}...", email));
                self.spawn_auth(move || {
                    let result = auth.send_magic_link(&email);
                    AuthReply::LinkSent { email, result }
                });
                Mode::SignInEmail(field)
            }
            _ => {
                field.handle_key(key);
                Mode::SignInEmail(field)
            }
        }
    }

    fn handle_code_key(&mut self, email: String, mut field: FieldValue, key: KeyEvent) -> Mode {
        match key.code {
            KeyCode::Esc => {
                self.ws.tasks.set_status("Sign-in canceled");
                Mode::Normal
            }
            KeyCode::Enter => {
                if self.auth_busy {
                    return Mode::SignInCode { email, field };
                }
                let Some(auth) = self.ws.auth.clone() else {
                    return Mode::Normal;
                };
                self.ws.tasks.set_status("Verifying code...");
                let (address, code) = (email.clone(), field.value.trim().to_string());
                self.spawn_auth(move || AuthReply::Verified(auth.verify_code(&address, &code)));
                Mode::SignInCode { email, field }
            }
            _ => {
                field.handle_key(key);
                Mode::SignInCode { email, field }
            }
        }
    }

    fn spawn_auth(&mut self, job: impl FnOnce() -> AuthReply + Send + 'static) {
        self.auth_busy = true;
        let tx = self.auth_tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    /// Applies finished sign-in steps. Returns true if any arrived.
    fn poll_auth(&mut self) -> bool {
        let mut arrived = false;
        while let Ok(reply) = self.auth_rx.try_recv() {
            self.auth_busy = false;
            self.apply_auth(reply);
            arrived = true;
        }
        arrived
    }

    fn apply_auth(&mut self, reply: AuthReply) {
        match reply {
            AuthReply::LinkSent {
                email,
                result: Ok(()),
            } => {
                info!("sign-in link sent to {}", email);
                if matches!(self.mode, Mode::SignInEmail(_)) {
                    self.ws.tasks.set_status(format!(
                        "Link sent to {}; enter the code from the e-mail",
                        email
                    ));
                    self.mode = Mode::SignInCode {
                        email,
                        field: FieldValue::default(),
                    };
                }
            }
            AuthReply::LinkSent {
                result: Err(err), ..
            } => {
                warn!("sending sign-in link failed: {}", err);
                self.ws
                    .tasks
                    .set_auth_error(format!("Could not send sign-in link: {}", err));
            }
            AuthReply::Verified(Ok(session)) => {
                if !matches!(self.mode, Mode::SignInCode { .. }) {
                    info!("sign-in prompt was closed; dropping verified session");
                    return;
                }
                if let Err(err) = self.ws.sessions.save(&session) {
                    warn!("could not persist session: {:#}", err);
                }
                if let Err(err) = self.ws.tasks.sign_in(session) {
                    self.ws.tasks.set_auth_error(err.to_string());
                }
                self.selected = 0;
                self.mode = Mode::Normal;
            }
            AuthReply::Verified(Err(err)) => {
                warn!("verifying sign-in code failed: {}", err);
                self.ws
                    .tasks
                    .set_auth_error(format!("Sign-in failed: {}", err));
            }
        }
    }

    fn begin_sign_in(&mut self) {
        if self.ws.tasks.session().is_some() {
            self.ws.tasks.set_status("Already signed in (O to sign out)");
        } else if self.ws.auth.is_none() {
            self.ws
                .tasks
                .set_auth_error("Remote backend is not configured");
        } else {
            self.mode = Mode::SignInEmail(FieldValue::default());
            self.ws.tasks.set_status("Enter your e-mail address");
        }
    }

    fn commit_edit(&mut self, task_id: TaskId, field: &FieldValue) {
        match self.ws.tasks.rename(task_id, &field.value) {
            Ok(()) => {}
            Err(TaskError::EmptyTitle) => {
                self.ws.tasks.set_status("Title can't be empty; edit discarded");
            }
            Err(err) => self.ws.tasks.set_status(format!("Edit failed: {}", err)),
        }
    }

    fn toggle_selected(&mut self) {
        let Some(id) = self.selected_task().map(|t| t.id) else {
            return;
        };
        if let Err(err) = self.ws.tasks.toggle(id) {
            self.ws.tasks.set_status(format!("Toggle failed: {}", err));
        }
    }

    fn set_filter(&mut self, filter: Filter) {
        self.ws.tasks.set_filter(filter);
        self.selected = 0;
        self.scroll_offset = 0;
    }

    fn selected_task(&self) -> Option<&Task> {
        self.ws.tasks.visible().get(self.selected).copied()
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn select_next(&mut self) {
        self.selected += 1;
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        let len = self.ws.tasks.visible().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(5),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_input(f, layout[1]);
        self.draw_tasks(f, layout[2]);
        self.draw_footer(f, layout[3]);

        match &self.mode {
            Mode::ConfirmDelete { task_id } => self.draw_confirm(f, *task_id),
            Mode::SignInEmail(field) => self.draw_prompt(f, "Sign in", "E-mail", field),
            Mode::SignInCode { field, .. } => {
                self.draw_prompt(f, "Sign in", "Code", field)
            }
            Mode::Normal | Mode::Input | Mode::Editing { .. } => {}
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let tasks = &self.ws.tasks;
        let who = match tasks.session() {
            Some(session) => Span::styled(
                format!("signed in as {}", session.display_name()),
                Style::default().fg(Color::Green),
            ),
            None => Span::styled(
                format!("local ({})", self.ws.location.scope.label()),
                Style::default().fg(Color::Yellow),
            ),
        };
        let done = tasks.list().completed_count();
        let mut spans = vec![
            Span::styled(
                "checkit ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            who,
            Span::raw("  •  "),
            Span::styled(
                format!("{} left, {} done", tasks.tasks().len() - done, done),
                Style::default().fg(Color::Gray),
            ),
            Span::raw("  •  "),
            Span::styled(
                format!("filter {}", tasks.filter()),
                Style::default().fg(Color::Magenta),
            ),
        ];
        if tasks.in_flight() > 0 {
            spans.push(Span::raw("  •  "));
            spans.push(Span::styled(
                format!("syncing {}", tasks.in_flight()),
                Style::default().fg(Color::LightBlue),
            ));
        }

        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_input(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let focused = matches!(self.mode, Mode::Input);
        let line = if focused {
            Line::from(Span::styled(
                self.input.with_caret(),
                Style::default().fg(Color::Cyan),
            ))
        } else if self.input.value.is_empty() {
            Line::from(Span::styled(
                "What needs to be done?",
                Style::default().fg(Color::DarkGray),
            ))
        } else {
            Line::from(self.input.value.clone())
        };
        let block = Block::default()
            .title(Span::styled(
                "New task",
                Style::default()
                    .fg(if focused { Color::Cyan } else { Color::Gray })
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if focused {
                Color::Cyan
            } else {
                Color::DarkGray
            }));
        f.render_widget(Paragraph::new(line).block(block), area);
    }

    fn draw_tasks(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let visible = self.ws.tasks.visible();
        let editing = match &self.mode {
            Mode::Editing { task_id, field } => Some((*task_id, field)),
            _ => None,
        };
        let width = area.width.saturating_sub(8) as usize;
        let items: Vec<ListItem> = if visible.is_empty() {
            vec![ListItem::new(Span::styled(
                match self.ws.tasks.filter() {
                    Filter::All => "Nothing to do",
                    Filter::Active => "No active tasks",
                    Filter::Done => "No completed tasks",
                },
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            visible
                .iter()
                .map(|task| match editing {
                    Some((id, field)) if id == task.id => edit_item(field),
                    _ => task_item(task, width),
                })
                .collect()
        };

        let viewport = area.height.saturating_sub(2) as usize;
        let offset = adjust_offset(
            self.selected,
            self.scroll_offset,
            viewport,
            1,
            visible.len(),
        );
        let mut state = ListState::default();
        *state.offset_mut() = offset;
        if !visible.is_empty() {
            state.select(Some(self.selected));
        }

        let block = Block::default()
            .title(Span::styled(
                format!("Tasks ({})", visible.len()),
                Style::default()
                    .fg(Color::LightGreen)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightGreen))
            .style(Style::default().bg(Color::Rgb(16, 18, 24)));
        let list = List::new(items).block(block).highlight_style(
            Style::default()
                .bg(Color::Rgb(252, 214, 112))
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        );
        f.render_stateful_widget(list, area, &mut state);
        self.scroll_offset = offset;
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(3)])
            .split(area);

        let help_bar = Paragraph::new(self.footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[1]);

        let status = Paragraph::new(self.ws.tasks.status().to_string())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray))
                    .title("Status"),
            );
        f.render_widget(status, bottom[0]);

        let mut errors = Vec::new();
        if let Some(err) = self.ws.tasks.data_error() {
            errors.push(Line::from(Span::styled(
                err.to_string(),
                Style::default().fg(Color::LightRed),
            )));
        }
        if let Some(err) = self.ws.tasks.auth_error() {
            errors.push(Line::from(Span::styled(
                err.to_string(),
                Style::default().fg(Color::LightMagenta),
            )));
        }
        let errors = Paragraph::new(errors).wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray))
                .title("Errors (Esc to dismiss)"),
        );
        f.render_widget(errors, bottom[1]);
    }

    fn footer_help_line(&self) -> Line<'static> {
        let key = |k: &'static str, color: Color| Span::styled(k, Style::default().fg(color));
        match self.mode {
            Mode::Input => Line::from(vec![
                key("Enter", Color::LightGreen),
                Span::raw(" add  "),
                key("Esc", Color::LightRed),
                Span::raw(" back to list"),
            ]),
            Mode::Editing { .. } => Line::from(vec![
                key("Enter/↑↓", Color::LightGreen),
                Span::raw(" save  "),
                key("Esc", Color::LightRed),
                Span::raw(" discard"),
            ]),
            _ => {
                let clear_color = if self.ws.tasks.list().has_completed() {
                    Color::LightYellow
                } else {
                    Color::DarkGray
                };
                let session_keys = if self.ws.tasks.session().is_some() {
                    vec![
                        key("r", Color::LightBlue),
                        Span::raw(" reload  "),
                        key("O", Color::LightBlue),
                        Span::raw(" sign out  "),
                    ]
                } else {
                    vec![key("L", Color::LightBlue), Span::raw(" sign in  ")]
                };
                let mut spans = vec![
                    key("a", Color::LightMagenta),
                    Span::raw(" add  "),
                    key("↑↓ / j k", Color::LightCyan),
                    Span::raw(" move  "),
                    key("space", Color::LightGreen),
                    Span::raw(" toggle  "),
                    key("e", Color::LightYellow),
                    Span::raw(" edit  "),
                    key("d", Color::LightRed),
                    Span::raw(" delete  "),
                    key("1 2 3/f", Color::LightCyan),
                    Span::raw(" filter  "),
                    key("c", clear_color),
                    Span::styled(" clear done  ", Style::default().fg(clear_color)),
                ];
                spans.extend(session_keys);
                spans.extend([key("q", Color::LightRed), Span::raw(" quit")]);
                Line::from(spans)
            }
        }
    }

    fn draw_confirm(&self, f: &mut ratatui::Frame<'_>, task_id: TaskId) {
        let title = self
            .ws
            .tasks
            .list()
            .get(task_id)
            .map(|t| t.title.clone())
            .unwrap_or_default();
        let area = centered_rect(50, 20, f.size());
        let lines = vec![
            Line::from(Span::styled(
                truncate_text(&title, area.width.saturating_sub(4) as usize),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(vec![
                Span::styled("y", Style::default().fg(Color::LightRed)),
                Span::raw(" delete   "),
                Span::styled("n", Style::default().fg(Color::LightGreen)),
                Span::raw(" keep"),
            ]),
        ];
        let block = Block::default()
            .title("Delete task?")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightRed));
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(lines)
                .alignment(Alignment::Center)
                .block(block),
            area,
        );
    }

    fn draw_prompt(&self, f: &mut ratatui::Frame<'_>, title: &str, label: &str, field: &FieldValue) {
        let area = centered_rect(60, 20, f.size());
        let lines = vec![
            Line::from(vec![
                Span::styled(
                    format!("{}: ", label),
                    Style::default()
                        .fg(Color::Gray)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(field.with_caret(), Style::default().fg(Color::Cyan)),
            ]),
            Line::from(""),
            Line::from(Span::styled(
                if self.auth_busy {
                    "Waiting for the server..."
                } else {
                    "Enter to continue, Esc to cancel"
                },
                Style::default().fg(Color::DarkGray),
            )),
        ];
        let block = Block::default()
            .title(title.to_string())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightBlue));
        f.render_widget(Clear, area);
        f.render_widget(Paragraph::new(lines).block(block), area);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn adjust_offset(
    selected: usize,
    current_offset: usize,
    viewport: usize,
    scrolloff: usize,
    len: usize,
) -> usize {
    if viewport == 0 || len == 0 {
        return 0;
    }
    let max_offset = len.saturating_sub(viewport);
    let margin = scrolloff.min(viewport.saturating_sub(1));
    let mut offset = current_offset.min(max_offset);
    if selected < offset.saturating_add(margin) {
        offset = selected.saturating_sub(margin);
    } else {
        let upper = offset
            .saturating_add(viewport.saturating_sub(1))
            .saturating_sub(margin);
        if selected > upper {
            offset = selected.saturating_add(margin + 1).saturating_sub(viewport);
        }
    }
    offset.min(max_offset)
}

fn prev_char(cursor: usize, text: &str) -> usize {
    text[..cursor]
        .char_indices()
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_char(cursor: usize, text: &str) -> usize {
    text[cursor..]
        .chars()
        .next()
        .map(|ch| cursor + ch.len_utf8())
        .unwrap_or(text.len())
}

fn truncate_text(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(&".".repeat(max.min(3)));
    out
}

fn task_item(task: &Task, width: usize) -> ListItem<'static> {
    let (mark, style) = if task.done {
        (
            "[x] ",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::CROSSED_OUT),
        )
    } else {
        ("[ ] ", Style::default().fg(Color::White))
    };
    ListItem::new(Line::from(vec![
        Span::styled(mark, Style::default().fg(Color::LightGreen)),
        Span::styled(truncate_text(&task.title, width), style),
    ]))
}

fn edit_item(field: &FieldValue) -> ListItem<'static> {
    ListItem::new(Line::from(vec![
        Span::styled("[~] ", Style::default().fg(Color::LightYellow)),
        Span::styled(field.with_caret(), Style::default().fg(Color::Cyan)),
    ]))
}
