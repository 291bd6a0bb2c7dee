use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::App;
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Stream(stream_event) => app.on_stream_event(stream_event),
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Resize(_, _) => {}
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Quit keys work in any state
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    if key.code == KeyCode::Esc {
        app.should_quit = true;
        return;
    }

    // The input is disabled while a reply is streaming.
    if app.loading {
        return;
    }

    match key.code {
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => app.insert_newline(),
        KeyCode::Enter => app.submit(),
        KeyCode::Backspace => app.delete_back(),
        KeyCode::Delete => app.delete_forward(),
        KeyCode::Left => app.move_left(),
        KeyCode::Right => app.move_right(),
        KeyCode::Home => app.move_home(),
        KeyCode::End => app.move_end(),
        KeyCode::Char(c) => app.insert_char(c),
        _ => {}
    }
}
