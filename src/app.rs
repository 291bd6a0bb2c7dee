use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::gemini::ChatSession;
use crate::tui::{AppEvent, StreamEvent};

/// Shown in place of the reply whenever an exchange fails, whatever the
/// cause. The technical error goes to the diagnostic log only.
pub const ERROR_MESSAGE: &str =
    "An ancient wisdom is currently unavailable. Please reflect and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,

    // Conversation state
    pub messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<String>,

    // Input state
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Animation state
    pub animation_frame: u8, // 0-2 for the typing indicator

    next_id: u64,
    pending_id: Option<String>,
    session: ChatSession,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(session: ChatSession, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            should_quit: false,
            messages: Vec::new(),
            loading: false,
            error: None,
            input: String::new(),
            cursor: 0,
            animation_frame: 0,
            next_id: 0,
            pending_id: None,
            session,
            events,
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.loading && !self.input.trim().is_empty()
    }

    /// Append the user turn and an empty reply placeholder, then start the
    /// exchange. A no-op while a reply is streaming or the input is blank.
    pub fn submit(&mut self) {
        if !self.can_submit() {
            return;
        }

        let text = std::mem::take(&mut self.input);
        self.cursor = 0;
        self.error = None;
        self.loading = true;

        let user_id = self.allocate_id("user");
        self.messages.push(Message {
            id: user_id,
            role: Role::User,
            text: text.clone(),
        });

        let model_id = self.allocate_id("model");
        self.messages.push(Message {
            id: model_id.clone(),
            role: Role::Model,
            text: String::new(),
        });
        self.pending_id = Some(model_id);

        // Forward fragments into the event queue; the draw/handle loop stays
        // the only place that touches app state.
        let mut stream = self.session.send_and_stream(&text);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        if events
                            .send(AppEvent::Stream(StreamEvent::Fragment(fragment)))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = events.send(AppEvent::Stream(StreamEvent::Failed(err.to_string())));
                        return;
                    }
                }
            }
            let _ = events.send(AppEvent::Stream(StreamEvent::Done));
        });
    }

    pub fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Fragment(fragment) => {
                if let Some(message) = self.pending_message_mut() {
                    message.text.push_str(&fragment);
                }
            }
            StreamEvent::Done => {
                let reply = self.pending_message().map(|m| m.text.clone());
                if let Some(reply) = reply {
                    self.session.record_reply(&reply);
                }
                self.loading = false;
                self.pending_id = None;
            }
            StreamEvent::Failed(reason) => {
                tracing::error!(error = %reason, "reply stream failed");
                // Partial fragments are discarded, not kept alongside the
                // error text.
                if let Some(message) = self.pending_message_mut() {
                    message.text = ERROR_MESSAGE.to_string();
                }
                self.error = Some(ERROR_MESSAGE.to_string());
                self.session.discard_last_turn();
                self.loading = false;
                self.pending_id = None;
            }
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Input editing. The cursor is a char index; edits convert to byte
    // positions so multi-byte input stays intact.

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn insert_newline(&mut self) {
        self.insert_char('\n');
    }

    pub fn delete_back(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete_forward(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor < char_count {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        let char_count = self.input.chars().count();
        self.cursor = (self.cursor + 1).min(char_count);
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn pending_message(&self) -> Option<&Message> {
        let id = self.pending_id.as_deref()?;
        self.messages.iter().find(|m| m.id == id)
    }

    fn pending_message_mut(&mut self) -> Option<&mut Message> {
        let id = self.pending_id.clone()?;
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GeminiClient;

    fn test_app() -> App {
        // Unroutable base URL: requests spawned by submit() fail quietly on
        // their background task and nothing here awaits them.
        let session = GeminiClient::new("test-key")
            .with_base_url("http://127.0.0.1:9")
            .start_chat();
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(session, tx)
    }

    #[tokio::test]
    async fn submit_appends_user_then_placeholder() {
        let mut app = test_app();
        app.input = "What is freedom?".to_string();
        app.cursor = app.input.chars().count();

        app.submit();

        assert_eq!(app.messages.len(), 2);
        assert_eq!(app.messages[0].role, Role::User);
        assert_eq!(app.messages[0].text, "What is freedom?");
        assert_eq!(app.messages[1].role, Role::Model);
        assert_eq!(app.messages[1].text, "");
        assert!(app.loading);
        assert!(app.input.is_empty());
        assert_eq!(app.cursor, 0);
        assert!(app.error.is_none());
    }

    #[tokio::test]
    async fn blank_submit_is_a_noop() {
        let mut app = test_app();
        app.input = "   \n ".to_string();

        app.submit();

        assert!(app.messages.is_empty());
        assert_eq!(app.input, "   \n ");
        assert!(!app.loading);
    }

    #[tokio::test]
    async fn submit_while_loading_is_a_noop() {
        let mut app = test_app();
        app.input = "first".to_string();
        app.submit();
        assert_eq!(app.messages.len(), 2);

        app.input = "second".to_string();
        app.submit();

        assert_eq!(app.messages.len(), 2);
        assert_eq!(app.input, "second");
    }

    #[tokio::test]
    async fn fragments_accumulate_in_order_then_finish() {
        let mut app = test_app();
        app.input = "hello".to_string();
        app.submit();
        assert!(app.loading);

        for fragment in ["Who ", "are ", "you?"] {
            app.on_stream_event(StreamEvent::Fragment(fragment.to_string()));
        }
        assert_eq!(app.messages[1].text, "Who are you?");
        assert!(app.loading);

        app.on_stream_event(StreamEvent::Done);
        assert!(!app.loading);
        assert_eq!(app.messages.len(), 2);
        assert_eq!(app.messages[1].text, "Who are you?");
        assert!(app.error.is_none());
    }

    #[tokio::test]
    async fn failure_discards_partial_fragments() {
        let mut app = test_app();
        app.input = "hello".to_string();
        app.submit();

        app.on_stream_event(StreamEvent::Fragment("Who ".to_string()));
        app.on_stream_event(StreamEvent::Failed("connection reset".to_string()));

        assert!(!app.loading);
        assert_eq!(app.messages[1].text, ERROR_MESSAGE);
        assert_eq!(app.error.as_deref(), Some(ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn resubmit_after_failure_is_accepted() {
        let mut app = test_app();
        app.input = "hello".to_string();
        app.submit();
        app.on_stream_event(StreamEvent::Failed("boom".to_string()));

        app.input = "hello again".to_string();
        app.submit();

        assert_eq!(app.messages.len(), 4);
        assert!(app.loading);
        assert!(app.error.is_none());
    }

    #[test]
    fn cursor_editing_is_utf8_safe() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = GeminiClient::new("test-key").start_chat();
        let mut app = App::new(session, tx);

        for c in "héllo".chars() {
            app.insert_char(c);
        }
        assert_eq!(app.cursor, 5);

        app.move_left();
        app.move_left();
        app.delete_back(); // removes the second 'l'
        assert_eq!(app.input, "hélo");

        app.move_home();
        app.delete_forward();
        assert_eq!(app.input, "élo");

        app.move_end();
        app.insert_newline();
        app.insert_char('x');
        assert_eq!(app.input, "élo\nx");
    }
}
