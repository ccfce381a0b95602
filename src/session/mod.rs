use chrono::Utc;
use log::{ info, warn };
use uuid::Uuid;

use crate::guard::SecurityGuard;
use crate::llm::unified::UnifiedClient;
use crate::models::chat::{ ChatMessage, Role };

pub const REQUEST_REFUSAL: &str = "I cannot assist with that query. Please ask something else.";
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Renders the tail of a transcript as context for the next prompt.
pub fn format_history_for_prompt(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Previous conversation:\n");
    for msg in messages {
        result.push_str(&format!("{}: {}\n", msg.role.display_name(), msg.content));
    }
    result
}

/// One conversation: an append-only transcript plus the client that
/// answers it and an optional guard in front of both directions.
///
/// Turns take `&mut self`, so a session handles one turn at a time.
pub struct ChatSession {
    id: Uuid,
    client: UnifiedClient,
    guard: Option<SecurityGuard>,
    filter_output: bool,
    history_window: usize,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(client: UnifiedClient) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            guard: None,
            filter_output: true,
            history_window: 0,
            messages: Vec::new(),
        }
    }

    /// Screens requests and, unless disabled with
    /// [`ChatSession::with_output_filter`], answers too.
    pub fn with_guard(mut self, guard: SecurityGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_output_filter(mut self, enabled: bool) -> Self {
        self.filter_output = enabled;
        self
    }

    /// Number of earlier messages prepended to each prompt; 0 sends the
    /// user text alone.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Forgets the transcript; client and guard stay as configured.
    pub fn reset(&mut self) {
        info!("Session {} reset ({} messages dropped)", self.id, self.messages.len());
        self.messages.clear();
    }

    pub async fn send_turn(&mut self, user_text: &str) -> String {
        if let Some(refusal) = self.screen_request(user_text) {
            return refusal;
        }
        let prompt = self.prepare_prompt(user_text);
        let answer = self.client.chat(&prompt).await;
        self.finish_turn(answer)
    }

    /// Like [`ChatSession::send_turn`], but forwards fragments to
    /// `on_fragment` as they arrive. With the output filter active, the
    /// running answer is checked before each fragment is forwarded and
    /// forwarding stops for good once it trips the filter; the returned
    /// and recorded text is then the refusal.
    pub async fn send_turn_streaming<F>(&mut self, user_text: &str, mut on_fragment: F) -> String
        where F: FnMut(&str) + Send
    {
        if let Some(refusal) = self.screen_request(user_text) {
            return refusal;
        }
        let prompt = self.prepare_prompt(user_text);
        let guard = self.guard.as_ref().filter(|_| self.filter_output);
        let mut running = String::new();
        let mut withheld = false;

        let answer = self.client.chat_stream_collect(&prompt, |fragment| {
            if withheld {
                return;
            }
            if let Some(guard) = guard {
                running.push_str(fragment);
                if guard.blocks_output(&running) {
                    withheld = true;
                    return;
                }
            }
            on_fragment(fragment);
        }).await;

        if withheld {
            warn!("Session {} stopped streaming a filtered answer", self.id);
        }
        self.finish_turn(answer)
    }

    fn screen_request(&mut self, user_text: &str) -> Option<String> {
        let guard = self.guard.as_ref()?;
        let verdict = guard.validate(user_text);
        if verdict.is_valid {
            return None;
        }
        warn!("Session {} blocked a request: {}", self.id, verdict.reason);
        self.push(Role::Assistant, REQUEST_REFUSAL.to_string());
        Some(REQUEST_REFUSAL.to_string())
    }

    /// Builds the prompt from the history window, then records the user turn.
    fn prepare_prompt(&mut self, user_text: &str) -> String {
        let start = self.messages.len().saturating_sub(self.history_window);
        let context = format_history_for_prompt(&self.messages[start..]);
        self.push(Role::User, user_text.to_string());

        if context.is_empty() {
            user_text.to_string()
        } else {
            format!("{}\nUser: {}", context, user_text)
        }
    }

    fn finish_turn(&mut self, answer: String) -> String {
        let answer = match (&self.guard, self.filter_output) {
            (Some(guard), true) => {
                let filtered = guard.filter_output(&answer);
                if filtered != answer {
                    warn!("Session {} replaced a filtered answer", self.id);
                }
                filtered
            }
            _ => answer,
        };
        self.push(Role::Assistant, answer.clone());
        answer
    }

    fn push(&mut self, role: Role, content: String) {
        let index = self.messages.len();
        self.messages.push(ChatMessage {
            index,
            role,
            content,
            timestamp: Utc::now().timestamp(),
        });
    }
}
