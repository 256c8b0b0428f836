//! Typed payloads produced by each analyzer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Categorizer ─────────────────────────────────────────────────────

/// Primary category assigned to an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    ActionRequired,
    ClientWork,
    /// Invitations, meetups, webinars: anything with a date worth extracting.
    Event,
    Newsletter,
    Promotional,
    Admin,
    Personal,
    #[default]
    Other,
}

impl EmailCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailCategory::ActionRequired => "action_required",
            EmailCategory::ClientWork => "client_work",
            EmailCategory::Event => "event",
            EmailCategory::Newsletter => "newsletter",
            EmailCategory::Promotional => "promotional",
            EmailCategory::Admin => "admin",
            EmailCategory::Personal => "personal",
            EmailCategory::Other => "other",
        }
    }
}

impl fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action_required" => Ok(EmailCategory::ActionRequired),
            "client_work" => Ok(EmailCategory::ClientWork),
            "event" => Ok(EmailCategory::Event),
            "newsletter" => Ok(EmailCategory::Newsletter),
            "promotional" => Ok(EmailCategory::Promotional),
            "admin" => Ok(EmailCategory::Admin),
            "personal" => Ok(EmailCategory::Personal),
            "other" => Ok(EmailCategory::Other),
            other => Err(format!("unknown email category: '{other}'")),
        }
    }
}

/// Categorizer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Categorization {
    pub category: EmailCategory,
    /// One-line explanation from the model.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

// ── Action extractor ────────────────────────────────────────────────

/// Kind of follow-up an email asks of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Respond,
    Review,
    Create,
    Schedule,
    Decide,
    Pay,
    FollowUp,
    #[default]
    None,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Respond => "respond",
            ActionType::Review => "review",
            ActionType::Create => "create",
            ActionType::Schedule => "schedule",
            ActionType::Decide => "decide",
            ActionType::Pay => "pay",
            ActionType::FollowUp => "follow_up",
            ActionType::None => "none",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "respond" => Ok(ActionType::Respond),
            "review" => Ok(ActionType::Review),
            "create" => Ok(ActionType::Create),
            "schedule" => Ok(ActionType::Schedule),
            "decide" => Ok(ActionType::Decide),
            "pay" => Ok(ActionType::Pay),
            "follow_up" => Ok(ActionType::FollowUp),
            "none" => Ok(ActionType::None),
            other => Err(format!("unknown action type: '{other}'")),
        }
    }
}

/// Action extractor output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActionExtraction {
    pub has_action: bool,
    pub action_type: ActionType,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 1 (whenever) to 10 (drop everything).
    #[serde(default)]
    pub urgency_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
}

impl ActionExtraction {
    /// Whether this extraction should become an action record.
    pub fn is_actionable(&self) -> bool {
        self.has_action && self.action_type != ActionType::None
    }
}

// ── Client tagger ───────────────────────────────────────────────────

/// Client tagger output. `client_id` is `None` when no active client matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_signal: Option<String>,
}

// ── Event detector ──────────────────────────────────────────────────

/// Event detector output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventDetection {
    pub has_event: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub is_rsvp_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_string_roundtrip_matches_serde() {
        for category in [
            EmailCategory::ActionRequired,
            EmailCategory::ClientWork,
            EmailCategory::Event,
            EmailCategory::Other,
        ] {
            let json = serde_json::to_value(category).unwrap();
            assert_eq!(json.as_str(), Some(category.as_str()));
            assert_eq!(category.as_str().parse::<EmailCategory>().unwrap(), category);
        }
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!("event-like".parse::<EmailCategory>().is_err());
    }

    #[test]
    fn action_without_type_is_not_actionable() {
        let extraction = ActionExtraction {
            has_action: true,
            action_type: ActionType::None,
            ..Default::default()
        };
        assert!(!extraction.is_actionable());

        let extraction = ActionExtraction {
            has_action: true,
            action_type: ActionType::Respond,
            title: "Reply to Alice".into(),
            ..Default::default()
        };
        assert!(extraction.is_actionable());
    }

    #[test]
    fn action_extraction_deserializes_with_defaults() {
        let raw = r#"{"has_action": true, "action_type": "follow_up"}"#;
        let extraction: ActionExtraction = serde_json::from_str(raw).unwrap();
        assert_eq!(extraction.action_type, ActionType::FollowUp);
        assert_eq!(extraction.urgency_score, 0);
        assert!(extraction.deadline.is_none());
    }
}
