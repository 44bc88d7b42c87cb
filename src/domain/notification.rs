//! Notification model
//!
//! A `Notification` is the unit that flows through dedup and delivery. Every
//! notification carries a `DedupKey` derived from (source kind, subject, kind)
//! so that candidates describing the same condition collapse into one entry.

use crate::domain::types::{SafetyTier, TransitionEvent, TransitionKind};
use serde::{Deserialize, Serialize};

/// Producer of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    ZoneTransition,
    Weather,
    Traffic,
    SafetyTip,
    System,
    PushEcho,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ZoneTransition => "zone_transition",
            SourceKind::Weather => "weather",
            SourceKind::Traffic => "traffic",
            SourceKind::SafetyTip => "safety_tip",
            SourceKind::System => "system",
            SourceKind::PushEcho => "push_echo",
        }
    }
}

/// Ordered notification priority (`Low < Medium < High < Critical`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Delivery lifecycle: `Created -> Delivered -> {Read | Dismissed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Created,
    Delivered,
    Read,
    Dismissed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Created => "created",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
            DeliveryState::Dismissed => "dismissed",
        }
    }
}

/// Deterministic grouping key: `<source_kind>:<subject>:<kind>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(source: SourceKind, subject: &str, kind: &str) -> Self {
        Self(format!("{}:{}:{}", source.as_str(), subject, kind))
    }

    pub fn for_transition(event: &TransitionEvent) -> Self {
        Self::new(SourceKind::ZoneTransition, &event.zone_id.to_string(), event.kind.as_str())
    }

    /// The opposite transition key for zone transitions (enter <-> exit)
    pub fn counterpart(&self) -> Option<DedupKey> {
        let rest = self.0.strip_prefix("zone_transition:")?;
        let (subject, kind) = rest.rsplit_once(':')?;
        let opposite = match kind {
            "enter" => TransitionKind::Exit,
            "exit" => TransitionKind::Enter,
            _ => return None,
        };
        Some(Self::new(SourceKind::ZoneTransition, subject, opposite.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Language used to render notification text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Hi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub source_kind: SourceKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub action_required: bool,
    pub dedup_key: DedupKey,
    #[serde(default = "default_state")]
    pub state: DeliveryState,
}

fn default_state() -> DeliveryState {
    DeliveryState::Delivered
}

impl Notification {
    /// Create a new candidate in the `Created` state with a fresh time-ordered id
    pub fn new(
        source_kind: SourceKind,
        subject: &str,
        kind: &str,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        created_at_ms: u64,
    ) -> Self {
        Self::keyed(source_kind, DedupKey::new(source_kind, subject, kind), title, body, priority, created_at_ms)
    }

    fn keyed(
        source_kind: SourceKind,
        dedup_key: DedupKey,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            source_kind,
            title: title.into(),
            body: body.into(),
            priority,
            created_at_ms,
            expires_at_ms: None,
            is_read: false,
            action_required: false,
            dedup_key,
            state: DeliveryState::Created,
        }
    }

    pub fn with_expiry(mut self, expires_at_ms: u64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: Option<u64>) -> Self {
        self.expires_at_ms = ttl_ms.map(|ttl| self.created_at_ms.saturating_add(ttl));
        self
    }

    pub fn with_action_required(mut self, action_required: bool) -> Self {
        self.action_required = action_required;
        self
    }

    /// Build the candidate for a zone transition
    pub fn from_transition(event: &TransitionEvent, locale: Locale, ttl_ms: Option<u64>) -> Self {
        let (priority, action_required) = transition_priority(event.tier, event.kind);
        let (title, body) = transition_text(event, locale);
        Self::keyed(
            SourceKind::ZoneTransition,
            DedupKey::for_transition(event),
            title,
            body,
            priority,
            event.at_ms,
        )
        .with_ttl(ttl_ms)
        .with_action_required(action_required)
    }

    /// Expired notifications are never surfaced as actionable
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// Priority and action flag for a zone transition
///
/// Entering restricted ground is the most urgent condition; leaving a safe
/// zone is worth a heads-up; everything else is informational.
pub fn transition_priority(tier: SafetyTier, kind: TransitionKind) -> (Priority, bool) {
    match (tier, kind) {
        (SafetyTier::Restricted, TransitionKind::Enter) => (Priority::Critical, true),
        (SafetyTier::Caution, TransitionKind::Enter) => (Priority::High, false),
        (SafetyTier::Safe, TransitionKind::Exit) => (Priority::Medium, false),
        (SafetyTier::Safe, TransitionKind::Enter) => (Priority::Low, false),
        (SafetyTier::Caution | SafetyTier::Restricted, TransitionKind::Exit) => (Priority::Low, false),
    }
}

fn tier_label(tier: SafetyTier, locale: Locale) -> &'static str {
    match (locale, tier) {
        (Locale::En, SafetyTier::Safe) => "high-safety",
        (Locale::En, SafetyTier::Caution) => "caution",
        (Locale::En, SafetyTier::Restricted) => "restricted",
        (Locale::Hi, SafetyTier::Safe) => "सुरक्षित",
        (Locale::Hi, SafetyTier::Caution) => "सावधानी",
        (Locale::Hi, SafetyTier::Restricted) => "प्रतिबंधित",
    }
}

fn transition_text(event: &TransitionEvent, locale: Locale) -> (String, String) {
    let tier = tier_label(event.tier, locale);
    let name = &event.zone_name;
    match (locale, event.kind) {
        (Locale::En, TransitionKind::Enter) => (
            format!("Entering {tier} zone"),
            format!("You are now inside {name}."),
        ),
        (Locale::En, TransitionKind::Exit) => (
            format!("Leaving {tier} zone"),
            format!("You have left {name}."),
        ),
        (Locale::Hi, TransitionKind::Enter) => (
            format!("{tier} क्षेत्र में प्रवेश"),
            format!("आप अब {name} के अंदर हैं।"),
        ),
        (Locale::Hi, TransitionKind::Exit) => (
            format!("{tier} क्षेत्र से बाहर"),
            format!("आप {name} से बाहर निकल गए हैं।"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ZoneId;

    fn transition(tier: SafetyTier, kind: TransitionKind) -> TransitionEvent {
        TransitionEvent {
            zone_id: ZoneId(3),
            zone_name: "Gateway of India".to_string(),
            tier,
            kind,
            at_ms: 1_000,
            sample_latitude: 18.922,
            sample_longitude: 72.8347,
            dwell_ms: None,
        }
    }

    #[test]
    fn test_dedup_key_is_deterministic() {
        let a = Notification::from_transition(&transition(SafetyTier::Safe, TransitionKind::Enter), Locale::En, None);
        let b = Notification::from_transition(&transition(SafetyTier::Safe, TransitionKind::Enter), Locale::Hi, None);
        assert_eq!(a.dedup_key, b.dedup_key);
        assert_eq!(a.dedup_key.as_str(), "zone_transition:3:enter");
        assert_eq!(a.dedup_key, DedupKey::for_transition(&transition(SafetyTier::Caution, TransitionKind::Enter)));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_counterpart_key() {
        let enter = DedupKey::new(SourceKind::ZoneTransition, "3", "enter");
        let exit = DedupKey::new(SourceKind::ZoneTransition, "3", "exit");
        assert_eq!(enter.counterpart(), Some(exit.clone()));
        assert_eq!(exit.counterpart(), Some(enter));
        assert_eq!(DedupKey::new(SourceKind::Weather, "mumbai", "storm").counterpart(), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Critical);
        assert_eq!([Priority::High, Priority::Low, Priority::Critical].iter().max(), Some(&Priority::Critical));
    }

    #[test]
    fn test_restricted_entry_is_critical() {
        let n = Notification::from_transition(
            &transition(SafetyTier::Restricted, TransitionKind::Enter),
            Locale::En,
            Some(60_000),
        );
        assert_eq!(n.priority, Priority::Critical);
        assert!(n.action_required);
        assert_eq!(n.expires_at_ms, Some(61_000));
        assert_eq!(n.state, DeliveryState::Created);
        assert_eq!(n.title, "Entering restricted zone");
    }

    #[test]
    fn test_expiry() {
        let n = Notification::new(SourceKind::System, "x", "y", "t", "b", Priority::Low, 100).with_expiry(200);
        assert!(!n.is_expired(199));
        assert!(n.is_expired(200));
        let forever = Notification::new(SourceKind::System, "x", "y", "t", "b", Priority::Low, 100);
        assert!(!forever.is_expired(u64::MAX));
    }

    #[test]
    fn test_notification_json_roundtrip_defaults() {
        let json = r#"{"id":"n1","source_kind":"weather","title":"Rain","body":"Heavy rain",
            "priority":"high","created_at_ms":5,"dedup_key":"weather:mumbai:rain"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.source_kind, SourceKind::Weather);
        assert_eq!(n.state, DeliveryState::Delivered);
        assert!(!n.is_read);
    }
}
