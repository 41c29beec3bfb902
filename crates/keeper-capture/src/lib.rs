//! Guided name-capture dialog for unsaved contacts.
//!
//! When the decision engine rules a conversation partner unsaved, this crate
//! drives the multi-turn dialog that asks for a name, confirms it, and
//! persists it: `awaiting_name -> awaiting_confirm -> saved`, with a decline
//! looping back to `awaiting_name`. The chat transport has no session
//! concept of its own, so the runtime owns one in-memory session per
//! (owner, contact) pair. Sessions do not survive a restart; an in-flight
//! dialog is abandoned and simply re-triggered by the contact's next message.

pub mod capture_runtime;
pub mod message_channel;
pub mod name_validation;
pub mod prompts;

pub use capture_runtime::{CaptureOutcome, CaptureRuntime, CaptureState};
pub use message_channel::{DeliveryReceipt, MessageChannel, SendOptions};
pub use name_validation::{classify_reply, validate_name, NameRejection, ReplySignal};
