use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::domain::{
    ConnectedIdentity, ConnectionStatus, LoginChallenge, ProviderKind, Session, SessionView,
};
use crate::error::SessionError;
use crate::ports::{ClockPort, EventSink, ProviderAdapter, QueuedEvent};
use crate::reconciler::{EventReconciler, SessionEvent};
use crate::registry::{teardown, ProviderRegistry, Selection};
use crate::signing::SigningService;
use crate::state_machine::{AccountsOutcome, ConnectTicket, SessionStateMachine};

/// Single owner of the wallet session for one application instance.
///
/// All state transitions run through one [`SessionStateMachine`]; adapters
/// only ever talk back through the event queue, which is drained by
/// [`SessionManager::pump_pending`] or [`SessionManager::run_events`].
/// Clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    machine: Mutex<SessionStateMachine>,
    slots: Mutex<AdapterSlots>,
    registry: ProviderRegistry,
    signing: SigningService,
    reconciler: EventReconciler,
    events_tx: mpsc::UnboundedSender<QueuedEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedEvent>>,
    view: watch::Sender<SessionView>,
    signing_in_flight: AtomicUsize,
}

/// Adapter handles keyed by the epoch they were created for. At most one of
/// them is live at a time.
#[derive(Default)]
struct AdapterSlots {
    pending: Option<(u64, Arc<dyn ProviderAdapter>)>,
    active: Option<(u64, Arc<dyn ProviderAdapter>)>,
}

impl AdapterSlots {
    fn take_all(&mut self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.pending
            .take()
            .into_iter()
            .chain(self.active.take())
            .map(|(_, adapter)| adapter)
            .collect()
    }
}

impl SessionManager {
    pub fn new(registry: ProviderRegistry, clock: Arc<dyn ClockPort>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(SessionView::default());
        Self {
            inner: Arc::new(ManagerInner {
                machine: Mutex::new(SessionStateMachine::new()),
                slots: Mutex::new(AdapterSlots::default()),
                registry,
                signing: SigningService::new(clock),
                reconciler: EventReconciler,
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                view,
                signing_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn session(&self) -> Session {
        self.inner.machine().session().clone()
    }

    pub fn view(&self) -> SessionView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view.subscribe()
    }

    /// Connects through `kind`, or through the persisted choice and then the
    /// chooser when no kind is given. A live session is torn down first.
    pub async fn connect(&self, kind: Option<ProviderKind>) -> Result<Session, SessionError> {
        let selection = kind.map(Selection::Explicit).unwrap_or(Selection::Auto);
        self.connect_with(selection).await
    }

    /// Silent reconnection at startup. Makes no attempt when nothing was
    /// persisted and never presents the chooser.
    pub async fn restore(&self) -> Result<Option<Session>, SessionError> {
        let current = self.session();
        if current.status() != ConnectionStatus::Disconnected {
            return Ok(Some(current));
        }
        let Some(kind) = self.inner.registry.persisted_choice() else {
            tracing::info!("no persisted wallet choice; staying disconnected");
            return Ok(None);
        };
        tracing::info!(provider = %kind, "attempting silent wallet reconnection");
        self.connect_with(Selection::Restore).await.map(Some)
    }

    /// Always ends in `Disconnected`. Safe to call in any state, any number of
    /// times; adapter teardown failures are logged and dropped.
    pub async fn disconnect(&self) -> Session {
        let (transition, adapters) = {
            let mut machine = self.inner.machine();
            let transition = machine.disconnect();
            let adapters = self.inner.slots().take_all();
            (transition, adapters)
        };
        for adapter in adapters {
            teardown(adapter.as_ref()).await;
        }
        self.inner.registry.forget();
        if let Some(transition) = transition {
            tracing::info!(from = ?transition.from, "wallet disconnected");
        }
        self.inner.publish(None);
        self.session()
    }

    pub async fn sign_login_challenge(&self) -> Result<LoginChallenge, SessionError> {
        let (session, epoch, adapter) = {
            let machine = self.inner.machine();
            let epoch = machine.epoch();
            let adapter = self
                .inner
                .slots()
                .active
                .as_ref()
                .filter(|(slot_epoch, _)| *slot_epoch == epoch)
                .map(|(_, adapter)| Arc::clone(adapter));
            (machine.session().clone(), epoch, adapter)
        };

        let result = {
            let _in_flight = InFlight::enter(&self.inner);
            self.inner
                .signing
                .sign_login_challenge(&session, adapter.as_deref())
                .await
        };
        // A signature produced for a session that has since ended is not
        // handed out.
        let result = result.and_then(|challenge| {
            if self.inner.machine().epoch() == epoch {
                Ok(challenge)
            } else {
                Err(SessionError::NoActiveSession)
            }
        });

        match &result {
            Ok(challenge) => {
                tracing::info!(address = %challenge.address, "login challenge signed");
                self.inner.publish(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "login challenge not signed");
                self.inner.publish(Some(e.to_string()));
            }
        }
        result
    }

    /// Applies every provider event queued so far. Returns how many were
    /// taken off the queue.
    pub async fn pump_pending(&self) -> usize {
        let mut rx = self.inner.events_rx.lock().await;
        let mut taken = 0;
        while let Ok(queued) = rx.try_recv() {
            self.inner.apply(queued).await;
            taken += 1;
        }
        taken
    }

    /// Consumes the event queue until the task is aborted. Do not combine
    /// with [`SessionManager::pump_pending`].
    pub async fn run_events(&self) {
        let mut rx = self.inner.events_rx.lock().await;
        while let Some(queued) = rx.recv().await {
            self.inner.apply(queued).await;
        }
    }

    async fn connect_with(&self, selection: Selection) -> Result<Session, SessionError> {
        if self.session().is_connected() {
            tracing::info!("replacing active wallet session");
            self.disconnect().await;
        }

        let (ticket, _) = {
            let mut machine = self.inner.machine();
            machine.begin_connect(selection.requested_kind())?
        };
        self.inner.publish(None);

        let mut guard = AttemptGuard {
            inner: Arc::clone(&self.inner),
            ticket,
            armed: true,
        };
        let tracker = Arc::clone(&self.inner);
        let result = self
            .inner
            .registry
            .select_and_connect(selection, move |adapter| {
                tracker.track_pending(ticket, adapter)
            })
            .await;
        guard.armed = false;

        match result {
            Ok((adapter, identity)) => self.inner.finish_connect(ticket, adapter, identity).await,
            Err(e) => {
                self.inner.abort_connect(ticket, &e);
                Err(e)
            }
        }
    }
}

impl ManagerInner {
    // Mutations of the machine are applied whole, so a poisoned guard still
    // holds a consistent session.
    fn machine(&self) -> MutexGuard<'_, SessionStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, AdapterSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, error: Option<String>) {
        let session = self.machine().session().clone();
        let busy = session.status() == ConnectionStatus::Connecting
            || self.signing_in_flight.load(Ordering::SeqCst) > 0;
        self.view.send_replace(SessionView {
            session,
            error,
            busy,
        });
    }

    /// Recomputes only the busy flag, keeping the published error.
    fn refresh_busy(&self) {
        let connecting = self.machine().status() == ConnectionStatus::Connecting;
        let busy = connecting || self.signing_in_flight.load(Ordering::SeqCst) > 0;
        self.view.send_if_modified(|view| {
            let changed = view.busy != busy;
            view.busy = busy;
            changed
        });
    }

    /// Records the adapter about to handshake so a disconnect can reach it.
    /// Returns false when the attempt is no longer current.
    fn track_pending(&self, ticket: ConnectTicket, adapter: &Arc<dyn ProviderAdapter>) -> bool {
        let machine = self.machine();
        if machine.epoch() != ticket.epoch() || machine.status() != ConnectionStatus::Connecting {
            return false;
        }
        self.slots().pending = Some((ticket.epoch(), Arc::clone(adapter)));
        true
    }

    async fn finish_connect(
        &self,
        ticket: ConnectTicket,
        adapter: Arc<dyn ProviderAdapter>,
        identity: ConnectedIdentity,
    ) -> Result<Session, SessionError> {
        let completed = {
            let mut machine = self.machine();
            let completed = machine.complete_connect(ticket, identity.clone());
            let mut slots = self.slots();
            if matches!(&slots.pending, Some((epoch, _)) if *epoch == ticket.epoch()) {
                slots.pending = None;
            }
            if matches!(completed, Ok(Some(_))) {
                slots.active = Some((ticket.epoch(), Arc::clone(&adapter)));
            }
            completed
        };

        match completed {
            Ok(Some(_)) => {
                let sink = EventSink::new(ticket.epoch(), self.events_tx.clone());
                if let Err(e) = adapter.subscribe(sink) {
                    tracing::warn!(adapter = adapter.name(), error = %e, "provider events unavailable");
                }
                self.registry.remember(identity.provider_kind);
                tracing::info!(
                    address = %identity.address,
                    chain_id = %identity.chain_id,
                    provider = %identity.provider_kind,
                    "wallet connected"
                );
                self.publish(None);
                Ok(self.machine().session().clone())
            }
            Ok(None) => {
                tracing::warn!(
                    adapter = adapter.name(),
                    "connect completed after the attempt ended; ignoring"
                );
                teardown(adapter.as_ref()).await;
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                teardown(adapter.as_ref()).await;
                self.publish(Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn abort_connect(&self, ticket: ConnectTicket, error: &SessionError) {
        let failed = {
            let mut machine = self.machine();
            let failed = machine.fail_connect(ticket);
            let mut slots = self.slots();
            if matches!(&slots.pending, Some((epoch, _)) if *epoch == ticket.epoch()) {
                slots.pending = None;
            }
            failed
        };
        if failed.is_some() {
            tracing::warn!(error = %error, "wallet connect failed");
            self.publish(Some(error.to_string()));
        }
    }

    fn abandon(&self, ticket: ConnectTicket) -> Option<Arc<dyn ProviderAdapter>> {
        let mut machine = self.machine();
        machine.fail_connect(ticket)?;
        tracing::info!("connect attempt abandoned by caller");
        let mut slots = self.slots();
        match slots.pending.take() {
            Some((epoch, adapter)) if epoch == ticket.epoch() => Some(adapter),
            other => {
                slots.pending = other;
                None
            }
        }
    }

    async fn apply(&self, queued: QueuedEvent) {
        if queued.epoch != self.machine().epoch() {
            tracing::debug!(event = %queued.event.event, "dropping stale provider event");
            return;
        }
        tracing::debug!(
            event = %queued.event.event,
            payload = %queued.event.payload,
            "provider event"
        );

        for event in self.reconciler.reconcile(&queued.event) {
            let ended = {
                let mut machine = self.machine();
                if machine.epoch() != queued.epoch {
                    break;
                }
                match event {
                    SessionEvent::AccountsChanged(accounts) => {
                        match machine.apply_accounts_changed(&accounts) {
                            Ok(AccountsOutcome::Disconnected(_)) => {
                                tracing::info!("wallet reported no accounts; disconnecting");
                                true
                            }
                            Ok(AccountsOutcome::Updated(_)) => {
                                tracing::info!(address = %accounts[0], "wallet account switched");
                                false
                            }
                            Ok(AccountsOutcome::Unchanged) => false,
                            Err(e) => {
                                tracing::warn!(error = %e, "ignoring accounts change");
                                false
                            }
                        }
                    }
                    SessionEvent::ChainChanged(chain_id) => {
                        match machine.apply_chain_changed(chain_id.clone()) {
                            Ok(_) => tracing::info!(chain_id = %chain_id, "wallet chain switched"),
                            Err(e) => tracing::warn!(error = %e, "ignoring chain change"),
                        }
                        false
                    }
                    SessionEvent::RemoteDisconnect { code, reason } => {
                        tracing::info!(?code, ?reason, "wallet transport disconnected");
                        machine.apply_remote_disconnect().is_some()
                    }
                }
            };
            if ended {
                self.release_adapters().await;
            }
        }
        self.publish(None);
    }

    async fn release_adapters(&self) {
        let adapters = self.slots().take_all();
        for adapter in adapters {
            teardown(adapter.as_ref()).await;
        }
        self.registry.forget();
    }
}

/// Resets the machine if a connect future is dropped before it resolves.
struct AttemptGuard {
    inner: Arc<ManagerInner>,
    ticket: ConnectTicket,
    armed: bool,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(adapter) = self.inner.abandon(self.ticket) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { teardown(adapter.as_ref()).await });
                }
                Err(_) => tracing::warn!(
                    adapter = adapter.name(),
                    "no runtime to release abandoned adapter"
                ),
            }
        }
        self.inner.publish(None);
    }
}

struct InFlight<'a> {
    inner: &'a ManagerInner,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a ManagerInner) -> Self {
        inner.signing_in_flight.fetch_add(1, Ordering::SeqCst);
        inner.publish(None);
        Self { inner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.signing_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.refresh_busy();
    }
}
