mod state;

pub use state::{ChatMessage, Participant, Room};
