//! Domain model (ids, messages, status, queue envelope).

pub mod envelope;
pub mod ids;
pub mod message;
pub mod state;

pub use envelope::{QueueMessage, QueueMessageType};
pub use ids::{MESSAGE_ID_LEN, MessageId};
pub use message::{Message, MessageChanges, NewMessageResponse, validate_address_list};
pub use state::Status;
