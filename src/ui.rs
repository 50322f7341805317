use ratatui::{prelude::*, widgets::*, text::{Line, Span}};

use crate::app::{App, InputMode};
use crate::config::WELCOME_MESSAGE;
use crate::markdown::render_markdown;
use crate::message::{Message, Role};

// --- UI Drawing Logic ---
pub fn ui(f: &mut Frame, app: &App) {
    // Main layout: Session panel | Right Pane
    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(f.size());

    render_session_panel(f, app, main_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // Conversation area
            Constraint::Length(7), // Input area height
            Constraint::Length(1), // Status bar height
        ])
        .split(main_chunks[1]);

    render_conversation(f, app, right_chunks[0]);
    render_input(f, app, right_chunks[1]);
    render_status_bar(f, app, right_chunks[2]);
}

fn render_session_panel(f: &mut Frame, app: &App, area: Rect) {
    let state = app.client.state();
    let settings = state.settings();

    let (dot, connection, color) = if state.is_connected() {
        ("● ", "Connected", Color::Green)
    } else {
        ("○ ", "Disconnected", Color::Red)
    };
    let conversation = match state.conversation_id() {
        "" => "(new)",
        id => id,
    };
    let label = Style::default().fg(Color::DarkGray);

    let lines = vec![
        Line::from(vec![Span::styled(dot, Style::default().fg(color)), Span::raw(connection)]),
        Line::raw(""),
        Line::styled("Server", label),
        Line::raw(settings.server_url.as_str()),
        Line::styled("Conversation", label),
        Line::raw(conversation),
        Line::styled("Temperature", label),
        Line::raw(settings.temperature.to_string()),
        Line::styled("Streaming", label),
        Line::raw(if settings.use_streaming { "on" } else { "off" }),
        Line::styled("Messages", label),
        Line::raw(state.messages().len().to_string()),
        Line::raw(""),
        Line::styled("Enter: type  q: quit", label),
        Line::styled("r: recheck  c: cancel", label),
        Line::styled("PgUp/PgDn: scroll", label),
    ];

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Session "))
        .wrap(Wrap { trim: true });
    f.render_widget(panel, area);
}

fn message_header(role: Role, time: &str) -> Line<'static> {
    let style = match role {
        Role::User => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        Role::Assistant => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    };
    if time.is_empty() {
        Line::styled(format!("{}:", role.label()), style)
    } else {
        Line::styled(format!("{} ({}):", role.label(), time), style)
    }
}

fn message_body(message: &Message) -> Vec<Line<'static>> {
    match message.role {
        Role::Assistant => render_markdown(&message.content),
        Role::User => message.content.lines().map(|line| Line::raw(line.to_string())).collect(),
    }
}

fn render_conversation(f: &mut Frame, app: &App, area: Rect) {
    let state = app.client.state();
    let mut content: Vec<Line> = Vec::new();

    content.push(message_header(Role::Assistant, ""));
    content.extend(render_markdown(WELCOME_MESSAGE));
    content.push(Line::from(""));

    for message in state.messages() {
        content.push(message_header(message.role, &message.display_time));
        content.extend(message_body(message));
        content.push(Line::from(""));
    }

    if let Some(pending) = state.pending() {
        content.push(message_header(Role::Assistant, pending.display_time()));
        if pending.content().is_empty() {
            content.push(Line::styled("Typing...", Style::default().fg(Color::DarkGray)));
        } else {
            content.extend(render_markdown(pending.content()));
        }
        content.push(Line::styled("▌", Style::default().fg(Color::Cyan)));
    } else if app.client.is_loading_history() {
        content.push(Line::styled("Loading history...", Style::default().fg(Color::DarkGray)));
    } else if app.is_loading() {
        content.push(Line::styled("Typing...", Style::default().fg(Color::DarkGray)));
    }

    if let Some(error) = &app.last_error {
        content.push(Line::styled(
            error.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    // Estimate wrapped height so the view can follow the newest text
    let inner_width = area.width.saturating_sub(2).max(1) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;
    let total_rows: usize = content
        .iter()
        .map(|line| line.width().max(1).div_ceil(inner_width))
        .sum();
    let max_scroll = total_rows.saturating_sub(inner_height).min(u16::MAX as usize) as u16;
    app.max_scroll.set(max_scroll);
    let scroll = if app.follow_tail { max_scroll } else { app.scroll_offset.min(max_scroll) };

    let conversation = Paragraph::new(content)
        .block(Block::default().borders(Borders::ALL).title(" Conversation (PgUp/PgDn) "))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(conversation, area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let (title, border_style) = match app.input_mode {
        InputMode::Editing => (
            " Input (Enter: Newline, Ctrl+S: Send, Esc: Stop editing) ",
            Style::default().fg(Color::Yellow),
        ),
        InputMode::Normal => (" Input (Press Enter to type) ", Style::default()),
    };
    let input = Paragraph::new(app.input_buffer.as_str())
        .block(Block::default().borders(Borders::ALL).title(title).border_style(border_style))
        .wrap(Wrap { trim: false });
    f.render_widget(input, area);

    if app.input_mode == InputMode::Editing {
        // Estimate row/col from the last line (doesn't handle wrapping perfectly)
        let input_width = area.width.saturating_sub(2).max(1);
        let rows_before = app.input_buffer.matches('\n').count() as u16;
        let last_line = app.input_buffer.rsplit('\n').next().unwrap_or("");
        let col = last_line.chars().count() as u16;

        let cursor_x = (area.x + 1 + col % input_width).min(area.right().saturating_sub(2));
        let cursor_y = (area.y + 1 + rows_before + col / input_width).min(area.bottom().saturating_sub(2));
        f.set_cursor(cursor_x, cursor_y);
    }
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let status_style = if app.status_message.starts_with("Error") {
        Style::default().bg(Color::Red).fg(Color::White)
    } else if app.is_loading() {
        Style::default().bg(Color::Yellow).fg(Color::Black)
    } else {
        Style::default().bg(Color::DarkGray).fg(Color::White)
    };
    f.render_widget(Paragraph::new(app.status_message.as_str()).style(status_style), area);
}
