//! Client session controller.
//!
//! Owns everything one signed-in user sees: connection phase, the presence
//! mirror, the directory, and the open conversation. Socket events arrive
//! through [`SessionController::on_transport`]; REST calls go through a
//! [`ChatApi`].
//!
//! Conversation scoping uses an epoch. Selecting a counterpart bumps it,
//! and any history fetch that completes under an older epoch is discarded,
//! so a slow response for a conversation the user already left can never
//! leak into the current one. Pushes that arrive while the history fetch is
//! in flight are held back and merged when it lands.
//!
//! Background tasks (socket pump, reconciliation timers) hold clones of the
//! controller; [`SessionController::logout`] stops them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use farmlink_shared::protocol::{
    ClientEvent, PresenceSnapshot, ServerEvent, TypingNotice, TypingUpdate,
};
use farmlink_shared::{Identity, Message, User, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::connection::{self, TransportEvent};
use crate::conversation::Conversation;
use crate::error::SessionError;
use crate::projection::{self, ActiveConversation, ConversationEntry};
use crate::typing::TypingDebouncer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of [`SessionController::refresh_now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Directory size after the fetch.
    pub users: usize,
    /// Whether a presence request went out (false while disconnected).
    pub presence_requested: bool,
}

#[derive(Default)]
struct PresenceMirror {
    version: Option<u64>,
    online: HashSet<UserId>,
}

impl PresenceMirror {
    /// Replace the online set unless `snap` is older than the last applied
    /// snapshot.
    fn apply(&mut self, snap: PresenceSnapshot) -> bool {
        if matches!(self.version, Some(v) if snap.version < v) {
            return false;
        }
        self.version = Some(snap.version);
        self.online = snap.online_users.into_iter().collect();
        true
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Default)]
struct Selection {
    epoch: u64,
    counterpart: Option<UserId>,
    conversation: Conversation,
    loading: bool,
    pending: Vec<Message>,
    remote_typing_until: Option<Instant>,
}

impl Selection {
    fn reset(&mut self, counterpart: Option<UserId>) -> u64 {
        self.epoch += 1;
        self.loading = counterpart.is_some();
        self.counterpart = counterpart;
        self.conversation = Conversation::new();
        self.pending.clear();
        self.remote_typing_until = None;
        self.epoch
    }

    fn accept(&mut self, message: Message) {
        if self.loading {
            self.pending.push(message);
        } else {
            self.conversation.insert(message);
        }
    }

    fn finish_loading(&mut self, history: Vec<Message>) {
        self.conversation.extend(history);
        let pending = std::mem::take(&mut self.pending);
        self.conversation.extend(pending);
        self.loading = false;
    }
}

struct SessionState {
    phase: SessionPhase,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    presence: PresenceMirror,
    directory: Vec<User>,
    directory_fetched_at: Option<Instant>,
    selection: Selection,
    /// Why the transport stopped for good, until the next connect.
    gave_up: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            outbound: None,
            presence: PresenceMirror::default(),
            directory: Vec::new(),
            directory_fetched_at: None,
            selection: Selection::default(),
            gave_up: None,
        }
    }

    fn drop_connection(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.outbound = None;
        self.presence.reset();
        self.selection.remote_typing_until = None;
    }
}

#[derive(Default)]
struct Tasks {
    shutdown: Option<watch::Sender<bool>>,
    connection: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    /// Set while the session wants polling; the timers themselves only run
    /// while connected.
    reconcile: bool,
    reconciliation: Vec<JoinHandle<()>>,
}

struct SessionInner {
    identity: Identity,
    config: ClientConfig,
    api: Arc<dyn ChatApi>,
    state: Mutex<SessionState>,
    typing: Mutex<Option<TypingDebouncer>>,
    tasks: Mutex<Tasks>,
    revision: watch::Sender<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    /// Queue an event on the live socket. False when not connected.
    fn emit(&self, event: ClientEvent) -> bool {
        let state = lock(&self.state);
        match &state.outbound {
            Some(tx) if state.phase == SessionPhase::Connected => tx.send(event).is_ok(),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    pub fn new(identity: Identity, config: ClientConfig, api: Arc<dyn ChatApi>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(SessionInner {
                identity,
                config,
                api,
                state: Mutex::new(SessionState::new()),
                typing: Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
                revision,
            }),
        }
    }

    /// Open the socket. The reconciliation timers run whenever it is
    /// connected.
    pub fn connect(&self) -> Result<(), SessionError> {
        let url = self.inner.config.ws_url(&self.inner.identity.id)?;
        self.stop_tasks();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = connection::spawn(url, self.inner.config.clone(), event_tx, shutdown_rx);

        let this = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                this.on_transport(event);
            }
        });

        {
            let mut tasks = lock(&self.inner.tasks);
            tasks.shutdown = Some(shutdown_tx);
            tasks.connection = Some(connection);
            tasks.pump = Some(pump);
            tasks.reconcile = true;
        }
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.inner.state).phase
    }

    /// Set once the transport has stopped retrying: identity rejected,
    /// attempts exhausted, or replaced by a newer connection.
    pub fn gave_up(&self) -> Option<String> {
        lock(&self.inner.state).gave_up.clone()
    }

    /// Bumped on every visible state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    pub fn on_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { attempt } => {
                debug!(attempt, "Connecting");
                let mut state = lock(&self.inner.state);
                state.phase = SessionPhase::Connecting;
                state.gave_up = None;
            }
            TransportEvent::Connected(outbound) => {
                {
                    let mut state = lock(&self.inner.state);
                    state.phase = SessionPhase::Connected;
                    state.outbound = Some(outbound);
                    // Versions restart with each server-side registration.
                    state.presence.reset();
                }
                info!(user = %self.inner.identity.id, "Session connected");
                self.resume_reconciliation();
                self.resync_conversation();
            }
            TransportEvent::Event(event) => {
                self.handle_server_event(event);
                return;
            }
            TransportEvent::Disconnected { reason } => {
                info!(reason = %reason, "Session disconnected");
                self.pause_reconciliation();
                lock(&self.inner.state).drop_connection(SessionPhase::Disconnected);
            }
            TransportEvent::GaveUp { reason } => {
                warn!(reason = %reason, "Gave up reconnecting");
                self.pause_reconciliation();
                let mut state = lock(&self.inner.state);
                state.drop_connection(SessionPhase::Disconnected);
                state.gave_up = Some(reason);
            }
        }
        self.notify();
    }

    pub fn handle_server_event(&self, event: ServerEvent) {
        {
            let mut state = lock(&self.inner.state);
            match event {
                ServerEvent::PresenceSnapshot(snap) => {
                    let version = snap.version;
                    if !state.presence.apply(snap) {
                        debug!(version, "Dropping stale presence snapshot");
                        return;
                    }
                }
                ServerEvent::NewMessage(message) => {
                    let me = &self.inner.identity.id;
                    let selection = &mut state.selection;
                    let relevant = selection
                        .counterpart
                        .as_ref()
                        .is_some_and(|c| message.is_between(me, c));
                    if !relevant {
                        debug!(msg_id = %message.id, "Ignoring message for another conversation");
                        return;
                    }
                    if selection.counterpart.as_ref() == Some(&message.sender_id) {
                        selection.remote_typing_until = None;
                    }
                    selection.accept(message);
                }
                ServerEvent::TypingStatus(TypingNotice { sender_id, is_typing }) => {
                    let ttl = self.inner.config.remote_typing_ttl;
                    let selection = &mut state.selection;
                    if selection.counterpart.as_ref() != Some(&sender_id) {
                        return;
                    }
                    selection.remote_typing_until = is_typing.then(|| Instant::now() + ttl);
                }
            }
        }
        self.notify();
    }

    /// Open the conversation with `user`: drop the previous one, load
    /// history, then ask for fresh presence.
    pub async fn select_counterpart(&self, user: UserId) -> Result<(), SessionError> {
        let epoch = lock(&self.inner.state).selection.reset(Some(user.clone()));
        self.swap_typing(Some(&user));
        self.notify();

        let fetched = self.inner.api.fetch_history(&user).await;

        {
            let mut state = lock(&self.inner.state);
            if state.selection.epoch != epoch {
                debug!(user = %user, "Discarding history for abandoned conversation");
                return Ok(());
            }
            match fetched {
                Ok(history) => {
                    debug!(user = %user, messages = history.len(), "History loaded");
                    state.selection.finish_loading(history);
                }
                Err(e) => {
                    state.selection.finish_loading(Vec::new());
                    drop(state);
                    self.notify();
                    return Err(e);
                }
            }
        }

        self.request_presence();
        self.notify();
        Ok(())
    }

    /// Close the open conversation.
    pub fn clear_counterpart(&self) {
        lock(&self.inner.state).selection.reset(None);
        self.swap_typing(None);
        self.notify();
    }

    /// Replace the typing debouncer, ending any burst aimed at the previous
    /// counterpart.
    fn swap_typing(&self, target: Option<&UserId>) {
        let next = target.map(|t| self.debouncer_for(t.clone()));
        let previous = std::mem::replace(&mut *lock(&self.inner.typing), next);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn debouncer_for(&self, target: UserId) -> TypingDebouncer {
        let weak = Arc::downgrade(&self.inner);
        TypingDebouncer::new(
            self.inner.config.typing_window,
            Arc::new(move |is_typing| {
                if let Some(inner) = weak.upgrade() {
                    inner.emit(ClientEvent::TypingStatus(TypingUpdate {
                        receiver_id: target.clone(),
                        is_typing,
                    }));
                }
            }),
        )
    }

    /// Feed the composer's current text.
    pub fn on_input(&self, text: &str) {
        if let Some(debouncer) = lock(&self.inner.typing).as_ref() {
            debouncer.input_changed(text);
        }
    }

    pub fn on_blur(&self) {
        self.stop_typing();
    }

    fn stop_typing(&self) {
        if let Some(debouncer) = lock(&self.inner.typing).as_ref() {
            debouncer.stop();
        }
    }

    /// Send `text` to the open conversation. The stored message is appended
    /// locally; a later push of the same message is ignored.
    pub async fn send_message(&self, text: &str) -> Result<Message, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let (counterpart, epoch) = {
            let state = lock(&self.inner.state);
            let counterpart = state
                .selection
                .counterpart
                .clone()
                .ok_or(SessionError::NoCounterpart)?;
            if state.phase != SessionPhase::Connected {
                return Err(SessionError::NotConnected);
            }
            (counterpart, state.selection.epoch)
        };

        self.stop_typing();
        let message = self.inner.api.send_message(&counterpart, text).await?;

        {
            let mut state = lock(&self.inner.state);
            if state.selection.epoch == epoch {
                state.selection.accept(message.clone());
            }
        }
        self.notify();
        Ok(message)
    }

    /// Ask the server for a presence snapshot. False when not connected.
    pub fn request_presence(&self) -> bool {
        self.inner.emit(ClientEvent::RequestPresenceSnapshot)
    }

    async fn refresh_directory(&self) -> Result<usize, SessionError> {
        let users = self.inner.api.list_users().await?.into_users();
        let count = users.len();
        {
            let mut state = lock(&self.inner.state);
            state.directory = users;
            state.directory_fetched_at = Some(Instant::now());
        }
        self.notify();
        Ok(count)
    }

    /// Re-fetch the directory if the last fetch is older than the staleness
    /// window. Returns whether a fetch happened.
    pub async fn refresh_directory_if_stale(&self) -> Result<bool, SessionError> {
        let stale_after = self.inner.config.directory_stale_after;
        let stale = lock(&self.inner.state)
            .directory_fetched_at
            .map_or(true, |at| at.elapsed() >= stale_after);
        if !stale {
            return Ok(false);
        }
        self.refresh_directory().await?;
        Ok(true)
    }

    /// Manual refresh: directory now, presence request now.
    pub async fn refresh_now(&self) -> Result<RefreshReport, SessionError> {
        let users = self.refresh_directory().await?;
        let presence_requested = self.request_presence();
        info!(users, presence_requested, "Manual refresh");
        Ok(RefreshReport {
            users,
            presence_requested,
        })
    }

    /// Start the presence and directory polling timers, replacing any
    /// running ones. They pause on disconnect and resume on reconnect until
    /// logout.
    pub fn start_reconciliation(&self) {
        let timers = self.spawn_reconciliation();
        let mut tasks = lock(&self.inner.tasks);
        tasks.reconcile = true;
        for task in std::mem::replace(&mut tasks.reconciliation, timers) {
            task.abort();
        }
    }

    pub fn is_reconciling(&self) -> bool {
        !lock(&self.inner.tasks).reconciliation.is_empty()
    }

    fn resume_reconciliation(&self) {
        let wanted = {
            let tasks = lock(&self.inner.tasks);
            tasks.reconcile && tasks.reconciliation.is_empty()
        };
        if wanted {
            debug!("Resuming reconciliation timers");
            self.start_reconciliation();
        }
    }

    fn pause_reconciliation(&self) {
        let mut tasks = lock(&self.inner.tasks);
        for task in tasks.reconciliation.drain(..) {
            task.abort();
        }
    }

    fn spawn_reconciliation(&self) -> Vec<JoinHandle<()>> {
        let presence_every = self.inner.config.presence_refresh;
        let directory_every = self.inner.config.directory_refresh;

        let this = self.clone();
        let presence = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(presence_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if this.request_presence() {
                    debug!("Periodic presence refresh");
                }
            }
        });

        let this = self.clone();
        let directory = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(directory_every);
            loop {
                ticker.tick().await;
                if let Err(e) = this.refresh_directory_if_stale().await {
                    warn!(error = %e, "Directory refresh failed");
                }
            }
        });

        vec![presence, directory]
    }

    /// After a reconnect, pull anything sent to the open conversation while
    /// the socket was down.
    fn resync_conversation(&self) {
        let target = {
            let state = lock(&self.inner.state);
            state
                .selection
                .counterpart
                .clone()
                .map(|c| (c, state.selection.epoch))
        };
        let Some((counterpart, epoch)) = target else {
            return;
        };

        let this = self.clone();
        tokio::spawn(async move {
            match this.inner.api.fetch_history(&counterpart).await {
                Ok(history) => {
                    let added = {
                        let mut state = lock(&this.inner.state);
                        if state.selection.epoch != epoch {
                            return;
                        }
                        state.selection.conversation.extend(history)
                    };
                    if added > 0 {
                        debug!(user = %counterpart, added, "Conversation resynced");
                        this.notify();
                    }
                }
                Err(e) => warn!(user = %counterpart, error = %e, "Resync failed"),
            }
        });
    }

    fn stop_tasks(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if let Some(shutdown) = tasks.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(pump) = tasks.pump.take() {
            pump.abort();
        }
        // The connection task closes its socket and exits on its own.
        tasks.connection = None;
        tasks.reconcile = false;
        for task in tasks.reconciliation.drain(..) {
            task.abort();
        }
    }

    /// End the session: tell the counterpart typing stopped, stop every
    /// background task, close the socket and forget all local state.
    pub fn logout(&self) {
        self.swap_typing(None);
        self.stop_tasks();
        {
            let mut state = lock(&self.inner.state);
            let epoch = state.selection.epoch;
            *state = SessionState::new();
            state.selection.epoch = epoch;
            state.selection.reset(None);
        }
        info!(user = %self.inner.identity.id, "Logged out");
        self.notify();
    }

    pub fn counterpart(&self) -> Option<UserId> {
        lock(&self.inner.state).selection.counterpart.clone()
    }

    pub fn conversation(&self) -> Vec<Message> {
        lock(&self.inner.state).selection.conversation.messages().to_vec()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.state).selection.loading
    }

    /// Whether the open conversation's counterpart is typing right now.
    pub fn counterpart_typing(&self) -> bool {
        lock(&self.inner.state)
            .selection
            .remote_typing_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        lock(&self.inner.state).presence.online.contains(user)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut online: Vec<UserId> = lock(&self.inner.state)
            .presence
            .online
            .iter()
            .cloned()
            .collect();
        online.sort();
        online
    }

    pub fn directory(&self) -> Vec<User> {
        lock(&self.inner.state).directory.clone()
    }

    /// Conversation list for the sidebar, filtered by `query`.
    pub fn entries(&self, query: &str) -> Vec<ConversationEntry> {
        let state = lock(&self.inner.state);
        let selection = &state.selection;
        let active = selection.counterpart.as_ref().map(|c| ActiveConversation {
            counterpart: c,
            last: selection.conversation.last(),
        });
        projection::project(
            &self.inner.identity,
            &state.directory,
            &state.presence.online,
            query,
            active,
        )
    }
}
