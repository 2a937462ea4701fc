//! Core actor framework types and traits.
//!
//! Provides the fundamental building blocks for the actor system:
//! - `Actor` trait for defining actor behavior
//! - `ActorHandle` for sending messages to actors
//! - `ActorRef` for stopping and joining a running actor
//!
//! The mailbox is created separately from the actor itself so that
//! collaborators (the bus transport, scheduled tasks) can hold a handle
//! before the actor that owns them is spawned.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop, or `Err` on failure.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    /// Called when the actor starts.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called exactly once when the actor is about to stop, whatever the reason.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        // Default: no cleanup
    }
}

/// Context provided to actors during message handling.
pub struct ActorContext {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Message counter.
    pub messages_processed: u64,

    /// Current actor state.
    pub state: ActorState,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(actor_id: String) -> Self {
        Self {
            actor_id,
            messages_processed: 0,
            state: ActorState::Starting,
        }
    }
}

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Actor is starting up.
    Starting,
    /// Actor is running and processing messages.
    Running,
    /// Actor has failed.
    Failed,
}

/// How an actor task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
    /// The actor asked to stop, was told to stop, or its mailbox closed.
    Stopped,
    /// The actor stopped on a permanent error.
    Failed(String),
    /// The actor task panicked or was aborted.
    Aborted,
}

impl ActorExit {
    /// Whether the actor ended without an error.
    pub fn is_clean(&self) -> bool {
        matches!(self, ActorExit::Stopped)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Permanent error; the actor stops.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<M>,

    /// Actor ID for logging.
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Send a message to the actor.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::ActorStopped)
    }

    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// Receiving half of an actor's mailbox, consumed by [`spawn`].
pub struct Mailbox<M: Message> {
    rx: mpsc::Receiver<M>,
    actor_id: String,
}

impl<M: Message> Mailbox<M> {
    /// Get the actor ID this mailbox was created for.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Receive the next message without an actor loop.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

/// Create a bounded mailbox for an actor named `name`.
pub fn mailbox<M: Message>(name: &str, size: usize) -> (ActorHandle<M>, Mailbox<M>) {
    let actor_id = format!("{}_{}", name, generate_actor_id());
    let (tx, rx) = mpsc::channel(size);
    (
        ActorHandle {
            tx,
            actor_id: actor_id.clone(),
        },
        Mailbox { rx, actor_id },
    )
}

/// Reference to a spawned actor task.
pub struct ActorRef {
    /// Actor ID.
    pub actor_id: String,

    /// Actor type name.
    pub actor_type: String,

    /// Task handle, taken once the task has been joined.
    task_handle: Option<JoinHandle<ActorExit>>,

    /// Cached exit status once joined.
    exit: Option<ActorExit>,

    /// Forced-stop sender.
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop without draining its mailbox.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        if let Some(handle) = &self.task_handle {
            handle.abort();
        }
    }

    /// Wait for the actor task to finish. Cancel safe; repeated calls
    /// return the cached exit status.
    pub async fn wait(&mut self) -> ActorExit {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }

        let exit = match self.task_handle.as_mut() {
            Some(handle) => match handle.await {
                Ok(exit) => exit,
                Err(e) => {
                    error!(actor_id = %self.actor_id, error = %e, "Actor task did not complete");
                    ActorExit::Aborted
                }
            },
            None => ActorExit::Aborted,
        };

        self.task_handle = None;
        self.exit = Some(exit.clone());
        exit
    }
}

/// Spawn an actor onto the runtime, consuming its mailbox.
pub fn spawn<A: Actor>(actor: A, mailbox: Mailbox<A::Message>) -> ActorRef {
    let Mailbox { rx, actor_id } = mailbox;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let actor_type = actor.name().to_string();

    let task_handle = tokio::spawn(run_actor_loop(actor, rx, shutdown_rx, actor_id.clone()));

    info!(actor_id = %actor_id, actor_type = %actor_type, "Spawned actor");

    ActorRef {
        actor_id,
        actor_type,
        task_handle: Some(task_handle),
        exit: None,
        shutdown_tx,
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) -> ActorExit {
    let mut ctx = ActorContext::new(actor_id.clone());
    let mut exit = ActorExit::Stopped;

    match actor.on_start(&mut ctx).await {
        Ok(()) => {
            ctx.state = ActorState::Running;
            debug!(actor_id = %actor_id, "Actor started");
        }
        Err(e) => {
            error!(actor_id = %actor_id, error = %e, "Actor failed to start");
            ctx.state = ActorState::Failed;
            exit = ActorExit::Failed(e.to_string());
        }
    }

    while ctx.state == ActorState::Running {
        tokio::select! {
            biased;

            // Check forced stop first
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(actor_id = %actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            // Process messages
            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        ctx.messages_processed += 1;

                        match actor.handle(msg, &mut ctx).await {
                            Ok(true) => {
                                // Continue processing
                            }
                            Ok(false) => {
                                info!(actor_id = %actor_id, "Actor requested stop");
                                break;
                            }
                            Err(e) => {
                                let reason = match e {
                                    ActorError::Permanent(reason) => reason,
                                    other => other.to_string(),
                                };
                                error!(actor_id = %actor_id, error = %reason, "Actor failed");
                                ctx.state = ActorState::Failed;
                                exit = ActorExit::Failed(reason);
                            }
                        }
                    }
                    None => {
                        debug!(actor_id = %actor_id, "Actor mailbox closed");
                        break;
                    }
                }
            }
        }
    }

    actor.on_stop(&mut ctx).await;

    info!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );

    exit
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================
