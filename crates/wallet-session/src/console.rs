//! Line-oriented shell over [`SessionBridge`].
//!
//! Stdin is read by a single task. A pending chooser prompt takes the next
//! line; every other line is parsed as a command. Connect and sign run as
//! background tasks so input keeps flowing while a wallet is pairing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use wallet_session_adapters::PairingDisplay;
use wallet_session_core::{
    ChooserPort, ProviderDescriptor, ProviderKind, SessionError, SessionView,
};

use crate::session_bridge::SessionBridge;

const HELP: &str = "commands: connect [injected|walletconnect], disconnect, sign, status, help, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(Option<ProviderKind>),
    Disconnect,
    Sign,
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments for `{head}`"));
        }
        let command = match (head.to_ascii_lowercase().as_str(), arg) {
            ("connect", None) => Command::Connect(None),
            ("connect", Some(kind)) => {
                Command::Connect(Some(kind.parse().map_err(|e: SessionError| e.to_string())?))
            }
            ("disconnect", None) => Command::Disconnect,
            ("sign", None) => Command::Sign,
            ("status", None) => Command::Status,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            (other, _) => return Err(format!("unknown command `{other}`; {HELP}")),
        };
        Ok(Some(command))
    }
}

/// Slot for the one outstanding chooser prompt.
#[derive(Clone, Default)]
pub struct PromptSlot {
    pending: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl PromptSlot {
    fn open(&self) -> Option<oneshot::Receiver<String>> {
        let mut pending = self.pending.lock().ok()?;
        if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *pending = Some(tx);
        Some(rx)
    }

    pub fn is_open(&self) -> bool {
        self.pending
            .lock()
            .map(|g| g.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Drops the outstanding prompt; its chooser reads that as a dismissal.
    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
    }

    /// Hands `line` to a waiting prompt. Returns false when nobody is waiting.
    pub fn answer(&self, line: &str) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        match pending.take() {
            Some(tx) => tx.send(line.trim().to_owned()).is_ok(),
            None => false,
        }
    }
}

/// Wallet chooser that lists the offered wallets and reads the pick from the
/// console.
pub struct ConsoleChooser {
    prompts: PromptSlot,
}

impl ConsoleChooser {
    pub fn new(prompts: PromptSlot) -> Self {
        Self { prompts }
    }
}

fn pick_from(options: &[ProviderDescriptor], answer: &str) -> Option<ProviderKind> {
    if answer.is_empty() || answer.eq_ignore_ascii_case("cancel") {
        return None;
    }
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| options.get(i))
            .map(|d| d.kind);
    }
    let kind: ProviderKind = answer.parse().ok()?;
    options.iter().any(|d| d.kind == kind).then_some(kind)
}

#[async_trait]
impl ChooserPort for ConsoleChooser {
    async fn choose(
        &self,
        options: &[ProviderDescriptor],
    ) -> Result<Option<ProviderKind>, SessionError> {
        let Some(rx) = self.prompts.open() else {
            tracing::warn!("chooser already open");
            return Ok(None);
        };
        println!("choose a wallet (number, id, or empty to cancel):");
        for (i, descriptor) in options.iter().enumerate() {
            println!("  {}) {} [{}]", i + 1, descriptor.label, descriptor.id());
        }
        let answer = rx.await.unwrap_or_default();
        let pick = pick_from(options, &answer);
        if pick.is_none() {
            println!("wallet chooser dismissed");
        }
        Ok(pick)
    }
}

/// Prints the pairing URI for the user to paste into a wallet.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePairingDisplay;

impl PairingDisplay for ConsolePairingDisplay {
    fn show(&self, uri: &str) {
        println!("pair your wallet with:\n  {uri}");
    }

    fn close(&self) {
        println!("pairing closed");
    }
}

fn render(view: &SessionView) -> String {
    let session = &view.session;
    let mut line = format!("[{:?}]", view.display_status());
    if let (Some(address), Some(chain)) = (session.address(), session.chain_id()) {
        line.push_str(&format!(" {address} on chain {chain}"));
    }
    if let Some(kind) = session.provider_kind() {
        line.push_str(&format!(" via {kind}"));
    }
    if let Some(error) = &view.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

/// Dispatches console lines to the bridge. Owns the in-flight connect task so
/// a disconnect can withdraw it together with any open chooser prompt.
pub struct Shell {
    bridge: SessionBridge,
    prompts: PromptSlot,
    connecting: Option<JoinHandle<()>>,
}

impl Shell {
    pub fn new(bridge: SessionBridge, prompts: PromptSlot) -> Self {
        Self {
            bridge,
            prompts,
            connecting: None,
        }
    }

    /// Handles one input line. Returns false once the user asked to quit.
    pub async fn handle_line(&mut self, line: &str) -> bool {
        if self.prompts.answer(line) {
            return true;
        }
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(msg) => {
                println!("{msg}");
                return true;
            }
        };
        match command {
            Command::Connect(kind) => {
                if self.connecting.as_ref().is_some_and(|t| !t.is_finished()) {
                    println!("connect failed: {}", SessionError::AlreadyConnecting);
                    return true;
                }
                let bridge = self.bridge.clone();
                self.connecting = Some(tokio::spawn(async move {
                    if let Err(e) = bridge.connect(kind).await {
                        println!("connect failed: {e}");
                    }
                }));
            }
            Command::Disconnect => {
                self.withdraw_connect();
                self.bridge.disconnect().await;
            }
            Command::Sign => {
                let bridge = self.bridge.clone();
                tokio::spawn(async move {
                    match bridge.sign_login().await {
                        Ok(challenge) => {
                            println!("message:   {}", challenge.message);
                            println!("signature: {}", challenge.signature);
                        }
                        Err(e) => println!("sign failed: {e}"),
                    }
                });
            }
            Command::Status => match serde_json::to_string_pretty(&self.bridge.view()) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("failed to render status: {e}"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => {
                self.withdraw_connect();
                return false;
            }
        }
        true
    }

    fn withdraw_connect(&mut self) {
        if let Some(task) = self.connecting.take() {
            if !task.is_finished() {
                tracing::info!("withdrawing pending connect");
            }
            task.abort();
        }
        self.prompts.cancel();
    }
}

pub async fn run(bridge: SessionBridge, prompts: PromptSlot) -> eyre::Result<()> {
    let events = bridge.spawn_event_pump();

    let mut updates = bridge.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let view = updates.borrow_and_update().clone();
            println!("{}", render(&view));
        }
    });

    let restoring = bridge.clone();
    tokio::spawn(async move {
        match restoring.restore().await {
            Ok(Some(_)) => tracing::info!("previous wallet reconnected"),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not restore previous wallet"),
        }
    });

    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match stdin.next_line().await {
                Ok(Some(line)) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });

    let labels = bridge
        .provider_labels()
        .into_iter()
        .map(|(kind, label)| format!("{label} ({kind})"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("wallets: {labels}");
    println!("{HELP}");

    let mut shell = Shell::new(bridge, prompts);
    while let Some(line) = lines.recv().await {
        if !shell.handle_line(&line).await {
            break;
        }
    }

    events.abort();
    watcher.abort();
    tracing::info!("wallet-session exiting");
    Ok(())
}
