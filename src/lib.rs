//! Cookmode Voice - hands-free assistant for guided cooking
//!
//! Listens to the microphone while a recipe is on screen, turns each
//! utterance into text, asks the intent service what to do, moves between
//! recipe steps and speaks the reply as it streams in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   segments   ┌──────────────────────────────────────┐
//! │  Microphone  │ ───────────▶ │            Pipeline worker           │
//! │  VAD loop    │   (FIFO)     │  STT → classify → step → TTS stream  │
//! └──────────────┘              └──────────────────┬───────────────────┘
//!                                                  │
//!                          ┌───────────────────────▼──────────────────┐
//!                          │ Streaming player  +  conversation (WAV)  │
//!                          └──────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod recipe;
pub mod session;
pub mod voice;

pub use config::Config;
pub use conversation::{Conversation, ConversationMessage, MessageStatus, Role, SharedConversation};
pub use error::{Error, Result};
pub use recipe::{Recipe, RecipeStep, StepCursor};
pub use session::{CookingSession, SessionSummary};
