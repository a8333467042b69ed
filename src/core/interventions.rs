//! Cooldown-gated interventions.
//!
//! Triggers are checked on every snapshot, many times per second. The throttler
//! turns that stream into at most one live intervention per category per
//! cooldown window.

use crate::config::InterventionConfig;
use crate::core::classifier::EngagementSnapshot;
use crate::core::metrics::InteractionMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an intervention is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Attention,
    Fatigue,
    Interaction,
    Quiz,
    Other,
}

impl Category {
    pub fn default_message(&self) -> &'static str {
        match self {
            Category::Attention => "Your attention seems to have drifted. Keep your focus on the screen.",
            Category::Fatigue => "You look tired. We recommend a 2-minute break.",
            Category::Interaction => {
                "You are not interacting with the material. How about taking some notes?"
            }
            Category::Quiz => "Time for a quick check of what you have learned.",
            Category::Other => "Your instructor sent you a message.",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "attention" => Some(Category::Attention),
            "fatigue" => Some(Category::Fatigue),
            "interaction" => Some(Category::Interaction),
            "quiz" => Some(Category::Quiz),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Attention => "attention",
            Category::Fatigue => "fatigue",
            Category::Interaction => "interaction",
            Category::Quiz => "quiz",
            Category::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// A notification shown to the subject until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: Uuid,
    pub category: Category,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Live intervention set with per-category cooldown.
#[derive(Debug, Clone)]
pub struct InterventionThrottler {
    config: InterventionConfig,
    live: Vec<Intervention>,
}

impl InterventionThrottler {
    pub fn new(config: InterventionConfig) -> Self {
        Self {
            config,
            live: Vec::new(),
        }
    }

    /// Check every trigger against the latest snapshot. Returns the interventions raised.
    pub fn evaluate(
        &mut self,
        snapshot: &EngagementSnapshot,
        metrics: &InteractionMetrics,
        now: DateTime<Utc>,
    ) -> Vec<Intervention> {
        let triggered = [
            (
                Category::Attention,
                snapshot.face_detected && !snapshot.gaze_on_screen,
            ),
            (
                Category::Fatigue,
                snapshot.fatigue_score > self.config.fatigue_trigger,
            ),
            (
                Category::Interaction,
                metrics.elapsed_seconds > self.config.idle_after_secs
                    && metrics.total_interactions() < self.config.min_interactions,
            ),
        ];

        triggered
            .into_iter()
            .filter(|(_, fired)| *fired)
            .filter_map(|(category, _)| self.raise(category, category.default_message(), now))
            .collect()
    }

    /// Raise an intervention unless one of the same category is still cooling down.
    pub fn raise(
        &mut self,
        category: Category,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Intervention> {
        if self.cooling_down(category, now) {
            return None;
        }

        let intervention = Intervention {
            id: Uuid::new_v4(),
            category,
            message: message.into(),
            created_at: now,
        };
        self.live.push(intervention.clone());
        Some(intervention)
    }

    fn cooling_down(&self, category: Category, now: DateTime<Utc>) -> bool {
        self.live.iter().any(|i| {
            i.category == category
                && match (now - i.created_at).to_std() {
                    Ok(age) => age < self.config.cooldown,
                    // Created "in the future": treat as brand new.
                    Err(_) => true,
                }
        })
    }

    /// Remove an intervention by id. Unknown ids are ignored.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.live.len();
        self.live.retain(|i| i.id != id);
        self.live.len() != before
    }

    /// Drop interventions older than the configured TTL. Returns how many were removed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.config.ttl else {
            return 0;
        };
        let before = self.live.len();
        self.live.retain(|i| match (now - i.created_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        });
        before - self.live.len()
    }

    pub fn live(&self) -> &[Intervention] {
        &self.live
    }

    pub fn clear(&mut self) {
        self.live.clear();
    }
}

impl Default for InterventionThrottler {
    fn default() -> Self {
        Self::new(InterventionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn tired() -> EngagementSnapshot {
        EngagementSnapshot {
            face_detected: true,
            gaze_on_screen: true,
            fatigue_score: 0.8,
            attention_score: 1.0,
            ..EngagementSnapshot::default()
        }
    }

    fn fresh_metrics(now: DateTime<Utc>) -> InteractionMetrics {
        InteractionMetrics::new(now)
    }

    #[test]
    fn test_fatigue_cooldown() {
        let mut throttler = InterventionThrottler::default();
        let t0 = Utc::now();
        let metrics = fresh_metrics(t0);

        assert_eq!(throttler.evaluate(&tired(), &metrics, t0).len(), 1);
        assert!(throttler
            .evaluate(&tired(), &metrics, t0 + Duration::seconds(10))
            .is_empty());
        assert_eq!(throttler.live().len(), 1);

        assert_eq!(
            throttler
                .evaluate(&tired(), &metrics, t0 + Duration::seconds(31))
                .len(),
            1
        );
        assert_eq!(throttler.live().len(), 2);
    }

    #[test]
    fn test_attention_requires_face() {
        let mut throttler = InterventionThrottler::default();
        let now = Utc::now();
        let away = EngagementSnapshot {
            face_detected: false,
            ..EngagementSnapshot::default()
        };
        assert!(throttler.evaluate(&away, &fresh_metrics(now), now).is_empty());

        let looking_away = EngagementSnapshot {
            face_detected: true,
            gaze_on_screen: false,
            ..EngagementSnapshot::default()
        };
        let raised = throttler.evaluate(&looking_away, &fresh_metrics(now), now);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].category, Category::Attention);
    }

    #[test]
    fn test_low_interaction_after_idle_period() {
        let mut throttler = InterventionThrottler::default();
        let start = Utc::now();
        let snapshot = EngagementSnapshot {
            face_detected: true,
            gaze_on_screen: true,
            ..EngagementSnapshot::default()
        };

        let mut metrics = fresh_metrics(start);
        metrics.tick(start + Duration::seconds(120));
        assert!(throttler.evaluate(&snapshot, &metrics, start).is_empty());

        metrics.tick(start + Duration::seconds(121));
        let raised = throttler.evaluate(&snapshot, &metrics, start);
        assert_eq!(raised[0].category, Category::Interaction);
    }

    #[test]
    fn test_dismiss_reopens_category() {
        let mut throttler = InterventionThrottler::default();
        let t0 = Utc::now();
        let raised = throttler.raise(Category::Quiz, "quiz", t0).unwrap();

        assert!(throttler.raise(Category::Quiz, "quiz", t0).is_none());
        assert!(!throttler.dismiss(Uuid::new_v4()));
        assert!(throttler.dismiss(raised.id));
        assert!(throttler.live().is_empty());
        assert!(throttler.raise(Category::Quiz, "quiz", t0).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut throttler = InterventionThrottler::new(InterventionConfig {
            ttl: Some(StdDuration::from_secs(60)),
            ..InterventionConfig::default()
        });
        let t0 = Utc::now();
        throttler.raise(Category::Other, "hello", t0);

        assert_eq!(throttler.expire(t0 + Duration::seconds(59)), 0);
        assert_eq!(throttler.expire(t0 + Duration::seconds(60)), 1);
        assert!(throttler.live().is_empty());
    }

    #[test]
    fn test_no_ttl_keeps_everything() {
        let mut throttler = InterventionThrottler::default();
        let t0 = Utc::now();
        throttler.raise(Category::Other, "hello", t0);
        assert_eq!(throttler.expire(t0 + Duration::days(1)), 0);
        assert_eq!(throttler.live().len(), 1);
    }
}
