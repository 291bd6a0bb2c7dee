use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Message, Role};

const WORDMARK_TOP: &str = "T I M E L I N E";
const WORDMARK_BOTTOM: &str = "A L C H E M Y";
const HOURGLASS: &str = "\u{29d7}";
const INVITATION: &str =
    "Begin your inner journey. Pose a thought, a feeling, or a question to the void.";
const TAGLINE: &str =
    "Powered by Timeline-Alchemy. A tool for introspection, not a source of absolute truth.";
const PLACEHOLDER: &str = "What is on your mind?...";

const MAX_INPUT_ROWS: usize = 5;

/// Pure render of the whole surface. Takes the app immutably: an unchanged
/// (log, input, loading) triple always draws the same frame.
pub fn render(frame: &mut Frame, app: &App) {
    let input_height = (input_rows(&app.input) + 2) as u16;
    let [header_area, chat_area, input_area, hint_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(input_height),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(frame, app, header_area);
    if app.messages.is_empty() {
        render_empty_state(frame, chat_area);
    } else {
        render_log(frame, app, chat_area);
    }
    render_input(frame, app, input_area);
    render_hint(frame, hint_area);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    // Compact wordmark only once the conversation has begun
    if app.messages.is_empty() {
        return;
    }
    let header = Paragraph::new(Line::from(Span::styled(
        format!("{} {} {}", HOURGLASS, WORDMARK_TOP, WORDMARK_BOTTOM),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Center);
    frame.render_widget(header, area);
}

fn render_empty_state(frame: &mut Frame, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    let top_padding = (area.height as usize).saturating_sub(7) / 2;
    for _ in 0..top_padding {
        lines.push(Line::default());
    }

    let bold_white = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);
    lines.push(Line::from(Span::styled(HOURGLASS, bold_white)));
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(WORDMARK_TOP, bold_white)));
    lines.push(Line::from(Span::styled(WORDMARK_BOTTOM, bold_white)));
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        INVITATION,
        Style::default().fg(Color::Gray),
    )));
    lines.push(Line::from(Span::styled(
        TAGLINE,
        Style::default().fg(Color::DarkGray),
    )));

    let branding = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    frame.render_widget(branding, area);
}

fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let width = area.width as usize;
    // Bubbles take roughly two thirds of the viewport, like a chat column
    let bubble_width = (width * 2 / 3).max(20).min(width.max(1));

    let mut lines: Vec<Line> = Vec::new();
    for message in &app.messages {
        lines.extend(message_lines(message, bubble_width));
    }

    if app.loading {
        let dots = "\u{2022}".repeat(app.animation_frame as usize + 1);
        lines.push(Line::from(Span::styled(
            dots,
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )));
        lines.push(Line::default());
    }

    // Always stick to the bottom: any log or loading change lands there
    let height = area.height as usize;
    let scroll = lines.len().saturating_sub(height) as u16;

    let log = Paragraph::new(lines).scroll((scroll, 0));
    frame.render_widget(log, area);
}

/// Render one message as wrapped bubble lines plus a trailing blank line.
/// Line breaks in the text are kept; the streaming placeholder is skipped
/// while still empty so only the typing indicator shows.
fn message_lines(message: &Message, bubble_width: usize) -> Vec<Line<'_>> {
    if message.text.is_empty() {
        return Vec::new();
    }

    let (style, alignment) = match message.role {
        Role::Model => (
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::ITALIC),
            Alignment::Left,
        ),
        Role::User => (Style::default().fg(Color::Cyan), Alignment::Right),
    };

    let mut lines = Vec::new();
    for raw_line in message.text.split('\n') {
        for wrapped in wrap_line(raw_line, bubble_width) {
            lines.push(Line::from(Span::styled(wrapped, style)).alignment(alignment));
        }
    }
    lines.push(Line::default());
    lines
}

/// Wrap a single line to `width` chars, breaking at the last space inside the
/// window when there is one. Interior whitespace is preserved as typed.
fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + width).min(chars.len());
        let mut break_at = end;
        if end < chars.len() {
            if let Some(pos) = chars[start..end].iter().rposition(|c| *c == ' ') {
                if pos > 0 {
                    break_at = start + pos + 1;
                }
            }
        }
        lines.push(chars[start..break_at].iter().collect());
        start = break_at;
    }
    lines
}

fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let border_color = if app.loading {
        Color::DarkGray
    } else if app.error.is_some() {
        // Last exchange failed; the box stays open for a manual retry
        Color::Red
    } else {
        Color::Yellow
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let inner_width = area.width.saturating_sub(2) as usize;
    let visible_rows = area.height.saturating_sub(2) as usize;

    let (cursor_row, cursor_col) = cursor_position(&app.input, app.cursor);

    // Keep the cursor inside the box; scroll the paragraph rather than
    // re-slicing each line
    let h_scroll = if inner_width == 0 || cursor_col < inner_width {
        0
    } else {
        cursor_col - inner_width + 1
    };
    let v_scroll = cursor_row.saturating_sub(visible_rows.saturating_sub(1));

    let input = if app.input.is_empty() && !app.loading {
        Paragraph::new(Span::styled(PLACEHOLDER, Style::default().fg(Color::DarkGray))).block(block)
    } else {
        Paragraph::new(app.input.as_str())
            .style(Style::default().fg(Color::Cyan))
            .scroll((v_scroll as u16, h_scroll as u16))
            .block(block)
    };
    frame.render_widget(input, area);

    if !app.loading {
        frame.set_cursor_position((
            area.x + 1 + (cursor_col - h_scroll) as u16,
            area.y + 1 + (cursor_row - v_scroll) as u16,
        ));
    }
}

fn render_hint(frame: &mut Frame, area: Rect) {
    let hint = Paragraph::new(Line::from(Span::styled(
        "Enter to send \u{b7} Shift+Enter for a new line \u{b7} Esc to quit",
        Style::default().fg(Color::DarkGray),
    )))
    .alignment(Alignment::Center);
    frame.render_widget(hint, area);
}

fn input_rows(input: &str) -> usize {
    input.split('\n').count().clamp(1, MAX_INPUT_ROWS)
}

/// Row and column of the char-indexed cursor within the input buffer.
fn cursor_position(input: &str, cursor: usize) -> (usize, usize) {
    let mut row = 0;
    let mut col = 0;
    for c in input.chars().take(cursor) {
        if c == '\n' {
            row += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (row, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GeminiClient;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    fn test_app() -> App {
        let session = GeminiClient::new("test-key").start_chat();
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(session, tx)
    }

    fn draw_to_text(app: &App) -> String {
        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| render(frame, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn wrap_preserves_interior_whitespace() {
        assert_eq!(wrap_line("a  b", 10), vec!["a  b"]);
        let wrapped = wrap_line("one two  three four", 9);
        assert_eq!(wrapped, vec!["one two  ", "three ", "four"]);
        assert_eq!(wrapped.concat(), "one two  three four");
    }

    #[test]
    fn wrap_breaks_unspaced_runs_at_width() {
        assert_eq!(wrap_line("aaaaabbbbb", 5), vec!["aaaaa", "bbbbb"]);
        assert_eq!(wrap_line("", 5), vec![""]);
    }

    #[test]
    fn cursor_position_tracks_newlines() {
        assert_eq!(cursor_position("ab\ncd", 5), (1, 2));
        assert_eq!(cursor_position("ab\ncd", 3), (1, 0));
        assert_eq!(cursor_position("ab", 1), (0, 1));
    }

    #[test]
    fn empty_log_shows_branding() {
        let app = test_app();
        let text = draw_to_text(&app);
        assert!(text.contains("T I M E L I N E"));
        assert!(text.contains("Begin your inner journey"));
    }

    #[test]
    fn log_view_replaces_branding_after_a_round_trip() {
        let mut app = test_app();
        app.messages.push(Message {
            id: "user-1".to_string(),
            role: Role::User,
            text: "Who am I?".to_string(),
        });
        app.messages.push(Message {
            id: "model-2".to_string(),
            role: Role::Model,
            text: "Who is asking?".to_string(),
        });

        let text = draw_to_text(&app);
        assert!(text.contains("Who am I?"));
        assert!(text.contains("Who is asking?"));
        assert!(!text.contains("Begin your inner journey"));
    }

    #[test]
    fn rerender_of_unchanged_state_is_identical() {
        let mut app = test_app();
        app.messages.push(Message {
            id: "user-1".to_string(),
            role: Role::User,
            text: "Still here".to_string(),
        });
        app.input = "and typing".to_string();
        app.cursor = app.input.chars().count();

        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| render(frame, &app)).unwrap();
        let first = terminal.backend().buffer().clone();
        terminal.draw(|frame| render(frame, &app)).unwrap();
        assert_eq!(first, *terminal.backend().buffer());
    }
}
