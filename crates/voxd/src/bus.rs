//! In-process message bus.
//!
//! The bus is constructed once by the daemon and owns a handler table keyed by channel
//! name. Handlers are closures bound over the state they serve. `emit` delivers to the
//! handlers registered at the time of the call, then to a broadcast tap that observers
//! (the SSE endpoint, tests) subscribe to.
//!
//! Skills receive a [`BusHandle`]. Every handle carries an owner token unique to the
//! loader it was made for, and the handlers registered through it are dropped when that
//! skill is unloaded. A dedicated handle also tags what it emits with the skill id.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{error, trace};
use vox_core::events::MessageType;
use vox_core::Message;

/// Capacity of the observer tap; slow observers lose the oldest messages.
const TAP_CAPACITY: usize = 1024;

/// A bus handler.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

struct Registration {
    owner: Option<String>,
    handler: Handler,
}

/// Publish/subscribe channel shared by the orchestration components.
pub struct MessageBus {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    tap: broadcast::Sender<Message>,
    next_owner: AtomicU64,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MessageBus")
            .field("channels", &handlers.len())
            .field("observers", &self.tap.receiver_count())
            .finish()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            tap,
            next_owner: AtomicU64::new(1),
        }
    }

    /// Register a handler for a known channel.
    pub fn on<F>(&self, msg_type: MessageType, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.register(msg_type.as_str(), None, Arc::new(handler));
    }

    /// Register a handler for an arbitrary channel name.
    pub fn on_channel<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.register(msg_type, None, Arc::new(handler));
    }

    fn register(&self, msg_type: &str, owner: Option<String>, handler: Handler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(msg_type.to_string())
            .or_default()
            .push(Registration { owner, handler });
    }

    /// Mint an owner token for a skill. Tokens are never reused, so two loaders for the
    /// same skill id never share handlers.
    fn owner_token(&self, skill_id: &str) -> String {
        let n = self.next_owner.fetch_add(1, Ordering::Relaxed);
        format!("{skill_id}#{n}")
    }

    /// Drop every handler registered under `owner`.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for registrations in handlers.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.owner.as_deref() != Some(owner));
            removed += before - registrations.len();
        }
        handlers.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    /// Number of handlers listening on a channel.
    pub fn handler_count(&self, msg_type: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(msg_type).map_or(0, Vec::len)
    }

    /// Deliver a message to its handlers, then to observers.
    ///
    /// The handler list is snapshotted before delivery so handlers may emit or register
    /// without deadlocking. A panicking handler is logged and skipped.
    pub fn emit(&self, message: Message) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            handlers
                .get(&message.msg_type)
                .map(|registrations| registrations.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default()
        };

        trace!(msg_type = %message.msg_type, handlers = snapshot.len(), "emit");

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                error!(msg_type = %message.msg_type, "bus handler panicked");
            }
        }

        // No observers is not an error.
        let _ = self.tap.send(message);
    }

    /// Observe every emitted message.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tap.subscribe()
    }
}

/// A skill's connection to the bus.
#[derive(Clone)]
pub struct BusHandle {
    bus: Arc<MessageBus>,
    skill_id: String,
    owner: String,
    dedicated: bool,
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("owner", &self.owner)
            .field("dedicated", &self.dedicated)
            .finish()
    }
}

impl BusHandle {
    /// Handle sharing the manager's connection. Emitted messages are not tagged.
    pub fn shared(bus: &Arc<MessageBus>, skill_id: &str) -> Self {
        Self::new(bus, skill_id, false)
    }

    /// Handle dedicated to one skill. Emitted messages carry `context.skill_id`.
    pub fn scoped(bus: &Arc<MessageBus>, skill_id: &str) -> Self {
        Self::new(bus, skill_id, true)
    }

    fn new(bus: &Arc<MessageBus>, skill_id: &str, dedicated: bool) -> Self {
        Self {
            bus: Arc::clone(bus),
            skill_id: skill_id.to_string(),
            owner: bus.owner_token(skill_id),
            dedicated,
        }
    }

    /// Token the handle's handlers are registered under.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub fn emit(&self, mut message: Message) {
        if self.dedicated && !message.context.contains_key("skill_id") {
            message.context.insert("skill_id", self.skill_id.clone());
        }
        self.bus.emit(message);
    }

    pub fn on<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.bus
            .register(msg_type, Some(self.owner.clone()), Arc::new(handler));
    }

    /// Drop every handler registered through this handle or its clones.
    pub fn detach(&self) -> usize {
        self.bus.remove_owner(&self.owner)
    }
}
