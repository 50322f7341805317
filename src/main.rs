use clap::Parser;
use crossterm::{
    event::{DisableFocusChange, EnableFocusChange, Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::prelude::*;
use std::{error::Error, io, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use streamchat::{
    app::App,
    chat::{ChatClient, EVENT_BUFFER},
    config::{Cli, STORE_FILE_NAME},
    error::AppError,
    event::AppEvent,
    health::{HealthMonitor, HealthTrigger},
    logging,
    message::Role,
    persistence::{FileStore, Persistence},
    transport::{ChatTransport, HttpTransport},
    ui::ui,
};

// --- Main Application Logic ---
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let data_dir = cli.resolve_data_dir();

    // Ephemeral sessions write nothing to disk: one-shot runs log to stderr, the TUI runs without a log
    let log_setup = match (cli.ephemeral, cli.ask.is_some()) {
        (false, _) => logging::init(&data_dir).map(drop),
        (true, true) => logging::init_stderr(),
        (true, false) => Ok(()),
    };
    if let Err(err) = log_setup {
        eprintln!("Warning: logging disabled: {}", err);
    }

    let persistence = if cli.ephemeral {
        Persistence::in_memory()
    } else {
        Persistence::new(Box::new(FileStore::open(data_dir.join(STORE_FILE_NAME))))
    };

    let mut client = ChatClient::new(persistence);
    let mut settings = client.state().settings().clone();
    if cli.apply_to(&mut settings) {
        client.set_server_url(&settings.server_url);
        client.set_temperature(settings.temperature);
        client.set_use_streaming(settings.use_streaming);
    }
    let mut startup_error = None;
    if let Some(path) = &cli.import {
        match client.import_file(path) {
            Ok(count) => info!(messages = count, path = %path.display(), "imported history on startup"),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "startup import failed, keeping the restored session");
                eprintln!("Warning: could not import {}: {}", path.display(), err);
                startup_error = Some(format!("Error: could not import {}: {}", path.display(), err));
            }
        }
    }

    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new(&client.state().settings().server_url));

    if let Some(message) = &cli.ask {
        return ask_once(client, transport, message).await;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Background tasks report through one channel; the UI loop is the only one touching the conversation
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    tokio::spawn(HealthMonitor::default().run(transport.clone(), trigger_rx, tx.clone()));

    let export_dir = std::env::current_dir().unwrap_or_else(|_| data_dir.clone());
    let mut app = App::new(client, transport, tx, trigger_tx, export_dir);
    app.last_error = startup_error;

    let res = run_app(&mut terminal, &mut app, rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableFocusChange)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        warn!(error = %err, "UI loop ended with an error");
        eprintln!("TUI Error: {}", err);
    }

    Ok(())
}

/// Non-interactive mode: one message, one printed reply.
async fn ask_once(mut client: ChatClient, transport: Arc<dyn ChatTransport>, message: &str) -> Result<(), Box<dyn Error>> {
    let healthy = transport.check_health().await;
    client.set_connected(healthy);
    client.send_message(transport, message).await?;

    if let Some(reply) = client.state().messages().last().filter(|m| m.role == Role::Assistant) {
        println!("{}", reply.content);
    }
    if let Some(warning) = client.take_storage_warning() {
        eprintln!("Warning: could not save history: {}", warning);
    }
    Ok(())
}

// --- Main Event Loop ---
async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    mut events: mpsc::Receiver<AppEvent>,
) -> Result<(), AppError> {
    let mut input = EventStream::new();

    loop {
        terminal.draw(|f| ui(f, app))?;
        if app.should_quit {
            return Ok(());
        }

        tokio::select! {
            terminal_event = input.next() => match terminal_event {
                Some(Ok(Event::Key(key))) => app.handle_key(key),
                Some(Ok(Event::FocusGained)) => app.request_health_check(HealthTrigger::Visible),
                Some(Ok(_)) => {} // Resize and the rest only need a redraw
                Some(Err(err)) => return Err(AppError::Io(err)),
                None => return Ok(()),
            },
            app_event = events.recv() => match app_event {
                Some(app_event) => app.handle_event(app_event),
                None => return Ok(()),
            },
        }
    }
}
