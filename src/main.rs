use anyhow::{Context, Result};

mod app;
mod config;
mod gemini;
mod handler;
mod tui;
mod ui;

use app::App;
use config::Config;
use gemini::{GeminiClient, API_KEY_ENV};
use tui::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging()?;

    // A missing credential is fatal before any UI comes up
    let api_key = std::env::var(API_KEY_ENV)
        .with_context(|| format!("{} environment variable not set", API_KEY_ENV))?;

    let config = Config::load_or_init().unwrap_or_else(|_| Config::new());
    let mut client = GeminiClient::new(&api_key);
    if let Some(model) = &config.model {
        client = client.with_model(model);
    }
    if let Some(base_url) = &config.base_url {
        client = client.with_base_url(base_url);
    }

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new();
    let mut app = App::new(client.start_chat(), events.sender());
    tracing::info!("session started");

    let result = run(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, events: &mut EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(frame, app))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event)?,
            None => break,
        }
    }
    Ok(())
}

/// Diagnostics go to a file; the terminal itself belongs to the UI.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("alchemist"))
        .context("Could not determine a directory for the diagnostic log")?;
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::never(&log_dir, "alchemist.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}
