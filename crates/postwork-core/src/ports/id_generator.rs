//! IdGenerator port - message identifier generation.
//!
//! Abstracted behind a trait so tests can hand out predictable identifiers.
//!
//! # Implementations
//! - **RandomIdGenerator**: 128 random bits (production)

use crate::domain::MessageId;

/// Hands out identifiers for new messages.
///
/// # Thread Safety
/// - requires `Send + Sync` (shared by every HTTP handler)
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;
}

/// Random 26-character identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate_message_id(&self) -> MessageId {
        MessageId::random()
    }
}
