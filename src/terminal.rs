//! Line-based terminal front end.

use crate::chat::{ChatError, ChatSession};
use crate::llm::StreamChunk;
use crate::store::models::{Message, Role};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

const QUIT_COMMANDS: &[&str] = &["/quit", "/exit"];
const HISTORY_COMMAND: &str = "/history";

pub struct Terminal<R, W> {
    lines: Lines<R>,
    out: Mutex<W>,
}

/// Terminal over the process's stdin and stdout.
pub fn stdio() -> Terminal<BufReader<Stdin>, io::Stdout> {
    Terminal::new(BufReader::new(tokio::io::stdin()), io::stdout())
}

impl<R, W> Terminal<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    pub fn new(input: R, out: W) -> Self {
        Self {
            lines: input.lines(),
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Ask for a username until one is entered and confirmed. `None` on EOF.
    pub async fn ask_username(&mut self) -> io::Result<Option<String>> {
        loop {
            self.write("Username: ")?;
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let name = line.trim();
            if name.is_empty() {
                self.write("Username cannot be empty.\n")?;
                continue;
            }

            self.write(&format!("Continue as {name}? [Y/n] "))?;
            let Some(answer) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let answer = answer.trim();
            if answer.is_empty()
                || answer.eq_ignore_ascii_case("y")
                || answer.eq_ignore_ascii_case("yes")
            {
                return Ok(Some(name.to_string()));
            }
        }
    }

    pub fn render_history(&self, history: &[Message]) -> io::Result<()> {
        for message in history {
            self.write(&format!("{}: {}\n", message.role.label(), message.content))?;
        }
        Ok(())
    }

    /// Read prompts until EOF or a quit command, one turn per line.
    pub async fn run(&mut self, session: &mut ChatSession, stream: bool) -> io::Result<()> {
        self.write(&format!(
            "Chatting as {}. Your messages are saved between sessions. Type /quit to leave.\n",
            session.username()
        ))?;
        self.render_history(session.history())?;

        loop {
            self.write("> ")?;
            let Some(line) = self.lines.next_line().await? else {
                self.write("\n")?;
                return Ok(());
            };
            let prompt = line.trim();
            if prompt.is_empty() {
                continue;
            }
            if QUIT_COMMANDS.contains(&prompt) {
                return Ok(());
            }
            if prompt == HISTORY_COMMAND {
                self.render_history(session.history())?;
                continue;
            }

            let started = AtomicBool::new(false);
            let result = if stream {
                let out = &self.out;
                session
                    .send_streaming(prompt, &|chunk: StreamChunk| {
                        write_chunk(out, &started, &chunk)
                    })
                    .await
            } else {
                session.send(prompt).await
            };
            // A stream cut off mid-reply never sends `done`; close its line.
            if started.swap(false, Ordering::Relaxed) {
                self.write("\n")?;
            }

            match result {
                Ok(reply) => {
                    if !stream {
                        self.write(&format!("{}: {}\n", reply.role.label(), reply.content))?;
                    }
                }
                Err(ChatError::NotSaved { reply, source }) => {
                    if !stream {
                        self.write(&format!("{}: {}\n", reply.role.label(), reply.content))?;
                    }
                    self.write(&format!("[warning] {source}\n"))?;
                }
                Err(e) => self.write(&format!("[error] {e}\n"))?,
            }
        }
    }

    fn write(&self, text: &str) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("terminal output lock poisoned"))?;
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

/// Streamed text is best-effort; a failed write must not abort the turn.
/// The role label goes out with the first piece of text. `started` stays set
/// while the reply line is open.
fn write_chunk<W: Write>(out: &Mutex<W>, started: &AtomicBool, chunk: &StreamChunk) {
    let Ok(mut out) = out.lock() else {
        return;
    };
    let _ = if chunk.done {
        if started.swap(false, Ordering::Relaxed) {
            out.write_all(b"\n")
        } else {
            Ok(())
        }
    } else if chunk.delta.is_empty() {
        Ok(())
    } else if started.swap(true, Ordering::Relaxed) {
        out.write_all(chunk.delta.as_bytes())
    } else {
        write!(out, "{}: {}", Role::Assistant.label(), chunk.delta)
    };
    let _ = out.flush();
}
