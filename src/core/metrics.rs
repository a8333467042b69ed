//! Interaction metrics accumulated from presentation-layer actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media player controls the subject can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerEvent {
    Play,
    Pause,
    Seek,
}

impl PlayerEvent {
    pub const ALL: [PlayerEvent; 3] = [PlayerEvent::Play, PlayerEvent::Pause, PlayerEvent::Seek];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "play" => Some(PlayerEvent::Play),
            "pause" => Some(PlayerEvent::Pause),
            "seek" => Some(PlayerEvent::Seek),
            _ => None,
        }
    }
}

/// An action reported by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAction {
    Player { event: PlayerEvent },
    MaterialClick,
    /// Replaces the note text
    NotesChanged { text: String },
}

/// Monotonic interaction counters for the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMetrics {
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub player_event_counts: BTreeMap<PlayerEvent, u64>,
    pub material_clicks: u64,
    pub notes_text: String,
}

impl InteractionMetrics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            elapsed_seconds: 0,
            player_event_counts: PlayerEvent::ALL.iter().map(|e| (*e, 0)).collect(),
            material_clicks: 0,
            notes_text: String::new(),
        }
    }

    /// Advance the session clock. Never moves backwards.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.started_at).num_seconds().max(0) as u64;
        self.elapsed_seconds = self.elapsed_seconds.max(elapsed);
    }

    pub fn apply(&mut self, action: &UserAction) {
        match action {
            UserAction::Player { event } => {
                *self.player_event_counts.entry(*event).or_insert(0) += 1;
            }
            UserAction::MaterialClick => self.material_clicks += 1,
            UserAction::NotesChanged { text } => self.notes_text.clone_from(text),
        }
    }

    pub fn player_events(&self) -> u64 {
        self.player_event_counts.values().sum()
    }

    /// Material clicks plus player events.
    pub fn total_interactions(&self) -> u64 {
        self.material_clicks + self.player_events()
    }
}
