/*
[INPUT]:  Inbound lines on a signal channel and /command lines on a control
          channel; outbound operator-facing lines
[OUTPUT]: Dispatched callbacks; printed/forwarded operator lines
[POS]:    Operator chat surface (spec §6.3)
[UPDATE]: When wiring a new chat transport
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

pub type TextHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type CommandHandler = Arc<dyn Fn(String) + Send + Sync>;

/// The supervisor's view of an operator chat transport.
///
/// The signal channel and control channel are conceptually distinct (the
/// source bot reads trade signals from one Telegram chat and commands from
/// another) but a single transport may serve both, as `ConsoleChat` does.
#[async_trait::async_trait]
pub trait ChatSurface: Send + Sync {
    fn on_text(&self, handler: TextHandler);
    fn on_command(&self, name: &str, handler: CommandHandler);
    async fn send(&self, line: &str);
    async fn run(&self, cancel: CancellationToken);
}

/// Reads signal lines and `/cmd arg` command lines from stdin, writes
/// operator output to stdout (and the tracing log). Lets the bot run
/// standalone without any external messaging integration wired in.
#[derive(Default)]
pub struct ConsoleChat {
    text_handlers: StdMutex<Vec<TextHandler>>,
    command_handlers: StdMutex<HashMap<String, CommandHandler>>,
}

impl ConsoleChat {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChatSurface for ConsoleChat {
    fn on_text(&self, handler: TextHandler) {
        self.text_handlers.lock().unwrap().push(handler);
    }

    fn on_command(&self, name: &str, handler: CommandHandler) {
        self.command_handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), handler);
    }

    async fn send(&self, line: &str) {
        println!("{line}");
        tracing::info!(chat_line = line, "operator message");
    }

    async fn run(&self, cancel: CancellationToken) {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { return };
                    dispatch_line(&line, &self.text_handlers, &self.command_handlers);
                }
            }
        }
    }
}

fn dispatch_line(
    line: &str,
    text_handlers: &StdMutex<Vec<TextHandler>>,
    command_handlers: &StdMutex<HashMap<String, CommandHandler>>,
) {
    if let Some(rest) = line.strip_prefix('/') {
        let (name, payload) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Some(handler) = command_handlers.lock().unwrap().get(name) {
            handler(payload.trim().to_string());
        }
        return;
    }
    for handler in text_handlers.lock().unwrap().iter() {
        handler(line.to_string());
    }
}

/// In-memory `ChatSurface` test double, driven by channels. Used by the
/// supervisor's integration tests to script signal/command input and
/// capture operator output without touching stdio.
pub struct ChannelChat {
    input: Mutex<mpsc::UnboundedReceiver<String>>,
    output: mpsc::UnboundedSender<String>,
    text_handlers: StdMutex<Vec<TextHandler>>,
    command_handlers: StdMutex<HashMap<String, CommandHandler>>,
}

impl ChannelChat {
    /// Returns the new chat surface plus handles to feed it input and drain
    /// its output.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let chat = Arc::new(Self {
            input: Mutex::new(input_rx),
            output: output_tx,
            text_handlers: StdMutex::new(Vec::new()),
            command_handlers: StdMutex::new(HashMap::new()),
        });
        (chat, input_tx, output_rx)
    }
}

#[async_trait::async_trait]
impl ChatSurface for ChannelChat {
    fn on_text(&self, handler: TextHandler) {
        self.text_handlers.lock().unwrap().push(handler);
    }

    fn on_command(&self, name: &str, handler: CommandHandler) {
        self.command_handlers
            .lock()
            .unwrap()
            .insert(name.to_string(), handler);
    }

    async fn send(&self, line: &str) {
        let _ = self.output.send(line.to_string());
    }

    async fn run(&self, cancel: CancellationToken) {
        loop {
            let mut input = self.input.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                line = input.recv() => {
                    let Some(line) = line else { return };
                    drop(input);
                    dispatch_line(&line, &self.text_handlers, &self.command_handlers);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn channel_chat_dispatches_commands_and_text() {
        let (chat, input, mut output) = ChannelChat::new();
        let got_text = Arc::new(AtomicBool::new(false));
        let got_command = Arc::new(AtomicBool::new(false));

        let t = got_text.clone();
        chat.on_text(Arc::new(move |_line| t.store(true, Ordering::SeqCst)));
        let c = got_command.clone();
        chat.on_command("status", Arc::new(move |_payload| c.store(true, Ordering::SeqCst)));

        let cancel = CancellationToken::new();
        let run_chat = chat.clone();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { run_chat.run(run_cancel).await });

        chat.send("hello operator").await;
        assert_eq!(output.recv().await.unwrap(), "hello operator");

        input.send("some signal text".to_string()).unwrap();
        input.send("/status".to_string()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        cancel.cancel();
        handle.await.unwrap();

        assert!(got_text.load(Ordering::SeqCst));
        assert!(got_command.load(Ordering::SeqCst));
    }
}
