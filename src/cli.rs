#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::{io::Write, sync::Arc, time};

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use tokio::sync::mpsc;

use crate::{
    chat::Orchestrator,
    config::{
        self, Configuration,
        constants::{DEVICE_POLL_INTERVAL_SECS, DEVICE_POLL_MAX_ATTEMPTS},
        load_configuration, lookup_config_path,
    },
    context::SessionContext,
    models::{ChatStatus, Conversation, ConversationMode, DevicePoll, Event, InboxFilter, TestMode},
};

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    long_about = r#"A terminal client for the assistant backend

Default configuration file location looks up in the following order:
    * $XDG_CONFIG_HOME/parley/config.toml
    * $HOME/.config/parley/config.toml
    * $HOME/.parley.toml
"#,
    disable_version_flag = true
)]
pub struct Command {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Show the version
    #[arg(short, long)]
    version: bool,

    /// Test mode sent to the backend (0, 1 or 2), overrides the configuration
    #[arg(long, value_name = "N")]
    test_mode: Option<TestMode>,

    /// Keep credentials in memory only
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Sign in and store the credential
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        full_name: String,
    },

    /// Forget the stored credential
    Logout,

    /// Show the signed in user
    Whoami,

    /// List conversations
    Conversations {
        #[arg(long)]
        mode: Option<ConversationMode>,
    },

    /// Create a conversation
    New {
        #[arg(long, default_value = "chat")]
        mode: ConversationMode,
        #[arg(long)]
        title: Option<String>,
    },

    /// Delete a conversation
    Delete { id: String },

    /// Send a message and print the reply
    Send {
        /// Conversation to continue, a new one is created when omitted
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,

        message: String,
    },

    /// List inbox items
    Inbox {
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        skip: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Connect a calendar through the device authorization flow
    CalendarConnect,
}

impl Command {
    pub fn new() -> Command {
        Self::parse()
    }

    pub fn get_config(&self) -> Result<Configuration> {
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| lookup_config_path().unwrap_or_default());

        let mut config = if config_path.is_empty() {
            // No config path is specified just use the default config
            Configuration::default()
        } else {
            load_configuration(config_path.as_str()).wrap_err("loading configuration")?
        };

        if self.test_mode.is_some() {
            config.general.test_mode = self.test_mode;
        }
        Ok(config)
    }

    pub fn version(&self) -> bool {
        self.version
    }

    pub fn ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn print_version(&self) {
        println!("{}", config::version())
    }

    pub async fn run(&self, ctx: &SessionContext) -> Result<()> {
        let Some(action) = &self.action else {
            return whoami(ctx).await;
        };

        match action {
            Action::Login { email, password } => {
                let user = ctx
                    .client()
                    .login(email, password)
                    .await
                    .wrap_err("signing in")?;
                println!("Signed in as {}", user.email);
            }
            Action::Register {
                email,
                password,
                full_name,
            } => {
                let user = ctx
                    .client()
                    .register(email, password, full_name)
                    .await
                    .wrap_err("registering")?;
                println!("Registered {}", user.email);
            }
            Action::Logout => {
                ctx.client().logout();
                println!("Signed out");
            }
            Action::Whoami => whoami(ctx).await?,
            Action::Conversations { mode } => {
                let conversations = ctx
                    .client()
                    .list_conversations(*mode)
                    .await
                    .wrap_err("listing conversations")?;
                for convo in conversations {
                    println!(
                        "{}\t{}\t{}\t{}",
                        convo.id,
                        convo.mode,
                        convo.updated_at.format("%Y-%m-%d %H:%M"),
                        convo.title
                    );
                }
            }
            Action::New { mode, title } => {
                let convo = ctx
                    .client()
                    .create_conversation(*mode, title.as_deref())
                    .await
                    .wrap_err("creating conversation")?;
                println!("{}", convo.id);
            }
            Action::Delete { id } => {
                ctx.client()
                    .delete_conversation(id)
                    .await
                    .wrap_err(format!("deleting conversation {}", id))?;
            }
            Action::Send {
                conversation,
                no_stream,
                message,
            } => send(ctx, conversation.as_deref(), message, *no_stream).await?,
            Action::Inbox {
                status,
                kind,
                priority,
                skip,
                limit,
            } => {
                let filter = InboxFilter {
                    status: status.clone(),
                    kind: kind.clone(),
                    priority: priority.clone(),
                    skip: *skip,
                    limit: *limit,
                };
                let items = ctx
                    .client()
                    .list_inbox(&filter)
                    .await
                    .wrap_err("listing inbox")?;
                println!("{}", serde_json::to_string_pretty(&items)?);
            }
            Action::CalendarConnect => connect_calendar(ctx).await?,
        }
        Ok(())
    }
}

async fn whoami(ctx: &SessionContext) -> Result<()> {
    match ctx.client().restore().await.wrap_err("checking session")? {
        Some(user) if user.full_name.is_empty() => println!("{}", user.email),
        Some(user) => println!("{} <{}>", user.full_name, user.email),
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn send(
    ctx: &SessionContext,
    conversation_id: Option<&str>,
    content: &str,
    no_stream: bool,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(event_rx));

    let mut orchestrator = ctx.orchestrator().with_event_tx(Arc::new(event_tx));
    let conversation_id = match conversation_id {
        Some(id) => {
            orchestrator
                .load_conversation(id)
                .await
                .wrap_err(format!("loading conversation {}", id))?;
            id.to_string()
        }
        None => {
            let summary = orchestrator
                .create_conversation(ConversationMode::Chat, None)
                .await
                .wrap_err("creating conversation")?;
            orchestrator.set_current_conversation(Some(Conversation::from(&summary)));
            log::info!("Started conversation {}", summary.id);
            summary.id
        }
    };

    let abort = orchestrator.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::debug!("Interrupted, aborting reply");
            abort.abort();
        }
    });

    let result = if no_stream {
        orchestrator
            .send_message_direct(&conversation_id, content)
            .await
    } else {
        orchestrator.send_message(&conversation_id, content).await
    };
    interrupt.abort();

    if result.is_ok() {
        resolve_gate(&mut orchestrator, |text| async move {
            prompt_confirmation(&text).await.unwrap_or_else(|err| {
                log::warn!("Treating unreadable answer as no: {:?}", err);
                false
            })
        })
        .await;
    }

    if let Err(err) = orchestrator.cleanup_empty_conversations().await {
        log::warn!("Leaving empty conversation behind: {}", err);
    }

    drop(orchestrator);
    printer.await.wrap_err("printing reply")?;
    result.wrap_err("sending message")?;
    Ok(())
}

/// Asks about the gated action until it runs or the user declines. A failed
/// confirmation keeps the gate, so the question is asked again.
async fn resolve_gate<F, Fut>(orchestrator: &mut Orchestrator, mut ask: F)
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    while let Some(pending) = orchestrator.pending_confirmation() {
        if !ask(pending.display_text.clone()).await {
            orchestrator.cancel_confirmation().await;
            println!("Cancelled");
            return;
        }
        if let Err(err) = orchestrator.confirm_execution().await {
            log::warn!("Confirmation failed, asking again: {}", err);
        }
    }
}

/// Writes the reply as it streams in. Ends once the orchestrator is gone.
async fn print_events(mut event_rx: mpsc::UnboundedReceiver<Event>) {
    let mut printer = ReplyPrinter::new(std::io::stdout());
    while let Some(event) = event_rx.recv().await {
        printer.handle(event);
    }
}

/// Turns orchestrator events into terminal output. Tracks how much of the
/// accumulator is already on screen so only the new part is written.
struct ReplyPrinter<W: Write> {
    out: W,
    printed: usize,
}

impl<W: Write> ReplyPrinter<W> {
    fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::StreamingContent(text) => {
                let delta = text.get(self.printed..).unwrap_or(text.as_str());
                let _ = write!(self.out, "{}", delta);
                let _ = self.out.flush();
                self.printed = text.len();
            }
            Event::MessageAppended(message) if message.is_assistant() => {
                if self.printed == 0 {
                    let _ = write!(self.out, "{}", message.content);
                }
                let _ = writeln!(self.out);
                self.printed = 0;
            }
            Event::ConfirmationRequired(_) | Event::StatusChanged(ChatStatus::Idle) => {
                self.end_line();
            }
            Event::Error(err) => eprintln!("Error: {}", err),
            _ => {}
        }
    }

    fn end_line(&mut self) {
        if self.printed > 0 {
            let _ = writeln!(self.out);
            self.printed = 0;
        }
    }
}

async fn prompt_confirmation(text: &str) -> Result<bool> {
    println!("{}", text);
    print!("Run this action? [y/N] ");
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .wrap_err("reading answer")?
    .wrap_err("reading answer")?;

    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn connect_calendar(ctx: &SessionContext) -> Result<()> {
    let client = ctx.client();
    let auth = client
        .start_calendar_authorization()
        .await
        .wrap_err("starting calendar authorization")?;

    match &auth.message {
        Some(message) => println!("{}", message),
        None => println!(
            "Open {} and enter the code {}",
            auth.verification_url, auth.user_code
        ),
    }

    let interval = time::Duration::from_secs(
        auth.interval
            .unwrap_or(DEVICE_POLL_INTERVAL_SECS)
            .max(1),
    );
    for attempt in 1..=DEVICE_POLL_MAX_ATTEMPTS {
        tokio::time::sleep(interval).await;
        match client
            .poll_calendar_authorization(&auth.device_code)
            .await
            .wrap_err("polling calendar authorization")?
        {
            DevicePoll::Pending => {
                log::debug!(
                    "Calendar authorization pending ({}/{})",
                    attempt,
                    DEVICE_POLL_MAX_ATTEMPTS
                );
            }
            DevicePoll::Connected(details) => {
                println!("Calendar connected");
                log::info!("Calendar connected: {}", details);
                return Ok(());
            }
        }
    }
    eyre::bail!("calendar authorization was not completed in time")
}
