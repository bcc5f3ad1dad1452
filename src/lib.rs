//! comanda — conversation escalation & payment-verification engine for a
//! chat-driven food-ordering assistant.
//!
//! Customers are nudged toward a web order form; the engine tracks each
//! conversation's lifecycle, runs cancelable reminder ladders against a
//! shared in-memory store, auto-verifies payment receipts via OCR, and
//! optionally enriches replies with a text-generation model. Transport, OCR,
//! and the model are trait collaborators the engine degrades without.

pub mod ai;
pub mod channels;
pub mod config;
pub mod engine;
pub mod escalation;
pub mod outbound;
pub mod scheduler;
pub mod store;
pub mod timers;
pub mod verify;

pub use channels::{Channel, CliChannel, InboundMessage, MediaRef};
pub use config::EngineConfig;
pub use engine::Engine;
pub use outbound::{EngineReply, OutboundItem};
pub use scheduler::Scheduler;
pub use store::{ConversationState, LifecyclePhase, PaymentMethod};
