//! Actor framework for the switch agent.
//!
//! A lightweight actor framework: each actor owns its mutable state and
//! processes one message at a time from a bounded mailbox.
//!
//! ## Design Principles
//!
//! - **Single owner**: the controller owns the actuator and the bus session,
//!   so every read-modify-publish sequence is serialized
//! - **Typed events**: transport callbacks and timer ticks are messages, not
//!   shared state
//! - **Cooperative shutdown**: a `Shutdown` message drains ahead of it, and
//!   teardown runs in `on_stop` whatever the reason for stopping
//!
//! ## Actor Types
//!
//! - `SwitchController`: bridges bus commands to the actuator

mod controller;
mod framework;

pub use controller::{ControllerEvent, SwitchCommand, SwitchController};
pub use framework::{
    mailbox, spawn, Actor, ActorContext, ActorError, ActorExit, ActorHandle, ActorRef, ActorState,
    Mailbox, Message,
};
