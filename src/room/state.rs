use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::Role;

/// A remote user currently in the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Transport-assigned, session-scoped connection id. Unique in the room.
    pub socket_id: String,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
    pub hand_raised: bool,
}

impl Participant {
    pub fn new(socket_id: String, user_id: String, user_name: String, role: Role) -> Self {
        Self {
            socket_id,
            user_id,
            user_name,
            role,
            video_enabled: true,
            audio_enabled: true,
            screen_sharing: false,
            hand_raised: false,
        }
    }
}

/// One chat entry. Append-only, session-scoped; ids are a local monotonic
/// counter recording receipt order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: u64,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Roster and chat log for one live session.
#[derive(Debug, Default)]
pub struct Room {
    participants: HashMap<String, Participant>,
    chat: Vec<ChatMessage>,
    next_message_id: u64,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and changes nothing) when the socket id is already
    /// present.
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        if self.participants.contains_key(&participant.socket_id) {
            return false;
        }
        self.participants
            .insert(participant.socket_id.clone(), participant);
        true
    }

    pub fn remove_participant(&mut self, socket_id: &str) -> Option<Participant> {
        self.participants.remove(socket_id)
    }

    pub fn get(&self, socket_id: &str) -> Option<&Participant> {
        self.participants.get(socket_id)
    }

    pub fn contains(&self, socket_id: &str) -> bool {
        self.participants.contains_key(socket_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Roster snapshot in a stable order.
    pub fn participants(&self) -> Vec<Participant> {
        let mut roster: Vec<Participant> = self.participants.values().cloned().collect();
        roster.sort_by(|a, b| a.socket_id.cmp(&b.socket_id));
        roster
    }

    pub fn set_hand_raised(&mut self, socket_id: &str, raised: bool) -> bool {
        match self.participants.get_mut(socket_id) {
            Some(participant) => {
                participant.hand_raised = raised;
                true
            }
            None => false,
        }
    }

    pub fn set_media_state(&mut self, socket_id: &str, video: bool, audio: bool) -> bool {
        match self.participants.get_mut(socket_id) {
            Some(participant) => {
                participant.video_enabled = video;
                participant.audio_enabled = audio;
                true
            }
            None => false,
        }
    }

    pub fn set_screen_sharing(&mut self, socket_id: &str, sharing: bool) -> bool {
        match self.participants.get_mut(socket_id) {
            Some(participant) => {
                participant.screen_sharing = sharing;
                true
            }
            None => false,
        }
    }

    pub fn push_message(
        &mut self,
        user_id: String,
        user_name: String,
        text: String,
        timestamp: Option<DateTime<Utc>>,
    ) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.chat.push(ChatMessage {
            id,
            user_id,
            user_name,
            text,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        });
        id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.chat
    }
}
