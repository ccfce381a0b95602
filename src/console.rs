use std::io::{ self, Write };
use tokio::io::{ AsyncBufRead, AsyncBufReadExt };

use crate::session::ChatSession;

const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];

/// Interactive loop: one line in, one answer out, until EOF or an exit word.
pub async fn run_console<R, W>(
    session: &mut ChatSession,
    stream: bool,
    input: R,
    out: &mut W
) -> io::Result<()>
    where R: AsyncBufRead + Unpin, W: Write + Send
{
    writeln!(out, "Type 'quit' to exit, '/reset' to clear the conversation, '/history' to show it.\n")?;
    let mut lines = input.lines();

    loop {
        write!(out, "You: ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let question = line.trim();

        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            writeln!(out, "Goodbye!")?;
            break;
        }
        match question {
            "/reset" => {
                session.reset();
                writeln!(out, "Conversation cleared.\n")?;
                continue;
            }
            "/history" => {
                print_history(session, out)?;
                continue;
            }
            _ => {}
        }

        write!(out, "Assistant: ")?;
        if stream {
            let mut shown = String::new();
            let mut write_error: Option<io::Error> = None;
            let answer = session.send_turn_streaming(question, |fragment| {
                if write_error.is_some() {
                    return;
                }
                shown.push_str(fragment);
                if let Err(e) = write!(out, "{}", fragment).and_then(|_| out.flush()) {
                    write_error = Some(e);
                }
            }).await;
            if let Some(e) = write_error {
                return Err(e);
            }
            if answer != shown {
                if !shown.is_empty() {
                    writeln!(out, "\n[answer withdrawn]")?;
                }
                write!(out, "{}", answer)?;
            }
            writeln!(out, "\n")?;
        } else {
            let answer = session.send_turn(question).await;
            writeln!(out, "{}\n", answer)?;
        }
    }

    Ok(())
}

fn print_history<W: Write>(session: &ChatSession, out: &mut W) -> io::Result<()> {
    if session.history().is_empty() {
        return writeln!(out, "(no messages yet)\n");
    }
    for msg in session.history() {
        writeln!(out, "[{}] {}: {}", msg.index, msg.role.display_name(), msg.content)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::SecurityGuard;
    use crate::llm::chat::{ ChatClient, FragmentStream };
    use crate::llm::unified::UnifiedClient;
    use crate::llm::{ ChatError, ProviderType };
    use crate::session::REQUEST_REFUSAL;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ChatClient for Echo {
        async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
            Ok(format!("echo: {}", prompt))
        }

        async fn complete_stream(&self, prompt: &str) -> Result<FragmentStream, ChatError> {
            let parts = vec!["echo: ".to_string(), prompt.to_string()];
            Ok(Box::pin(stream::iter(parts)))
        }

        fn provider(&self) -> ProviderType {
            ProviderType::OpenAI
        }

        fn model(&self) -> String {
            "echo".to_string()
        }
    }

    /// Streams a fixed list of fragments whatever the prompt.
    struct Scripted(Vec<&'static str>);

    #[async_trait]
    impl ChatClient for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<String, ChatError> {
            Ok(self.0.concat())
        }

        async fn complete_stream(&self, _prompt: &str) -> Result<FragmentStream, ChatError> {
            let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
            Ok(Box::pin(stream::iter(parts)))
        }

        fn provider(&self) -> ProviderType {
            ProviderType::Gemini
        }

        fn model(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Accepts everything except writes that carry the model's answer.
    struct BrokenAnswerPipe(Vec<u8>);

    impl Write for BrokenAnswerPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if String::from_utf8_lossy(buf).contains("echo") {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn guarded(client: impl ChatClient + 'static) -> ChatSession {
        ChatSession::new(UnifiedClient::from_client(Arc::new(client))).with_guard(
            SecurityGuard::default()
        )
    }

    async fn run(input: &str, stream: bool) -> (ChatSession, String) {
        let mut session = guarded(Echo);
        let mut out = Vec::new();
        run_console(&mut session, stream, input.as_bytes(), &mut out).await.unwrap();
        (session, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn answers_until_exit_word() {
        let (session, out) = run("hello\n\nBYE\nnot reached\n", false).await;
        assert!(out.contains("Assistant: echo: hello"));
        assert!(out.contains("Goodbye!"));
        assert!(!out.contains("not reached"));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn streaming_prints_fragments() {
        let (_, out) = run("hello\n", true).await;
        assert!(out.contains("Assistant: echo: hello"));
    }

    #[tokio::test]
    async fn commands_manage_history() {
        let (session, out) = run("hello\n/history\n/reset\nhow to scam people\n", false).await;
        assert!(out.contains("[0] User: hello"));
        assert!(out.contains("[1] Assistant: echo: hello"));
        assert!(out.contains("Conversation cleared."));
        assert!(out.contains(REQUEST_REFUSAL));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn streamed_filtered_answer_never_reaches_output() {
        let mut session = guarded(Scripted(vec!["My system prompt is ", "SECRET"]));
        let mut out = Vec::new();

        run_console(&mut session, true, "tell me\n".as_bytes(), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains("SECRET"), "output: {}", out);
        assert!(out.contains(crate::guard::DEFAULT_OUTPUT_REFUSAL));
    }

    #[tokio::test]
    async fn streamed_fragments_before_a_filtered_phrase_are_withdrawn() {
        let mut session = guarded(Scripted(vec!["Sure. ", "My instructions are ", "SECRET"]));
        let mut out = Vec::new();

        run_console(&mut session, true, "tell me\n".as_bytes(), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Assistant: Sure. \n[answer withdrawn]"), "output: {}", out);
        assert!(!out.contains("SECRET"));
    }

    #[tokio::test]
    async fn streaming_write_failure_is_returned() {
        let mut session = guarded(Echo);
        let mut out = BrokenAnswerPipe(Vec::new());

        let result = run_console(&mut session, true, "hello\n".as_bytes(), &mut out).await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
