// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Collection records and the analysis result shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Expert review lifecycle of a stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertStatus {
    #[default]
    None,
    Pending,
    Appraised,
}

impl ExpertStatus {
    /// Allowed moves: none→pending→appraised, and any reviewed state back to none
    pub fn can_transition_to(self, next: ExpertStatus) -> bool {
        matches!(
            (self, next),
            (ExpertStatus::None, ExpertStatus::Pending)
                | (ExpertStatus::Pending, ExpertStatus::Appraised)
                | (ExpertStatus::Pending, ExpertStatus::None)
                | (ExpertStatus::Appraised, ExpertStatus::None)
        )
    }
}

impl fmt::Display for ExpertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpertStatus::None => "none",
            ExpertStatus::Pending => "pending",
            ExpertStatus::Appraised => "appraised",
        };
        f.write_str(s)
    }
}

/// A web page the model consulted while valuing a stamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebRef {
    pub title: String,
    pub uri: String,
}

/// A stamp in the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub id: String,
    /// Data URL of the photographed stamp
    pub image: String,
    pub name: String,
    pub origin: String,
    pub year: String,
    /// Display string such as "150,00 €"; parsed only when summing or sorting
    pub estimated_value: String,
    pub rarity: String,
    pub condition: String,
    pub description: String,
    pub date_added: DateTime<Utc>,
    pub expert_status: ExpertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_valuation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_context: Option<String>,
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printing_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_refs: Option<Vec<WebRef>>,
}

impl Stamp {
    /// Build a new record from an analysis result.
    ///
    /// Missing fields get the same placeholders the scanner has always shown.
    pub fn from_draft(draft: &StampDraft, image: String, album: &str) -> Self {
        let pick = |v: &Option<String>, fallback: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Self {
            id: new_stamp_id(),
            image,
            name: pick(&draft.name, "Unbekannte Marke"),
            origin: pick(&draft.origin, "Unbekannt"),
            year: pick(&draft.year, "Unbekannt"),
            estimated_value: pick(&draft.estimated_value, "0.00 €"),
            rarity: pick(&draft.rarity, "Häufig"),
            condition: pick(&draft.condition, "Nicht bewertet"),
            description: pick(&draft.description, ""),
            date_added: Utc::now(),
            expert_status: ExpertStatus::None,
            expert_valuation: None,
            expert_note: None,
            historical_context: draft.historical_context.clone(),
            album: album.to_string(),
            catalog_id: draft.catalog_id.clone(),
            price_source: draft.price_source.clone(),
            printing_method: draft.printing_method.clone(),
            paper_type: draft.paper_type.clone(),
            cancellation_type: draft.cancellation_type.clone(),
            web_refs: if draft.web_refs.is_empty() {
                None
            } else {
                Some(draft.web_refs.clone())
            },
        }
    }

    /// Expert valuation when present, otherwise the model's estimate
    pub fn effective_value(&self) -> &str {
        self.expert_valuation
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.estimated_value)
    }
}

/// Identification and valuation returned for one image.
///
/// Every field is optional; the model is asked for a fixed schema but
/// nothing guarantees it complies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StampDraft {
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub origin: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub year: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub catalog_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub estimated_value: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub price_source: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub rarity: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub historical_context: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub printing_method: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub paper_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub cancellation_type: Option<String>,
    pub web_refs: Vec<WebRef>,
}

/// Accept strings, numbers and booleans; models like to answer `"year": 1840`
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Kind of market headline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsKind {
    Auction,
    Discovery,
    Trend,
}

/// A philatelic market headline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: NewsKind,
    #[serde(default)]
    pub url: String,
}

/// Speaker of an advisor message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

/// Outcome of checking the configured credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Missing,
    Invalid,
    Valid,
}

/// Generate a new record identifier
pub fn new_stamp_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ExpertStatus::*;
        assert!(None.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Appraised));
        assert!(Pending.can_transition_to(None));
        assert!(Appraised.can_transition_to(None));

        assert!(!None.can_transition_to(Appraised));
        assert!(!Appraised.can_transition_to(Pending));
        assert!(!None.can_transition_to(None));
    }

    #[test]
    fn test_draft_accepts_numeric_year() {
        let draft: StampDraft = serde_json::from_str(
            r#"{"name": "Penny Black", "year": 1840, "estimatedValue": "350,00 €", "unknown": 1}"#,
        )
        .unwrap();
        assert_eq!(draft.year.as_deref(), Some("1840"));
        assert_eq!(draft.estimated_value.as_deref(), Some("350,00 €"));
        assert!(draft.origin.is_none());
        assert!(draft.web_refs.is_empty());
    }

    #[test]
    fn test_from_draft_fills_placeholders() {
        let draft = StampDraft {
            name: Some("Inverted Jenny".into()),
            origin: Some("  ".into()),
            ..Default::default()
        };
        let stamp = Stamp::from_draft(&draft, "data:image/jpeg;base64,AA==".into(), "Seltenheiten");

        assert_eq!(stamp.name, "Inverted Jenny");
        assert_eq!(stamp.origin, "Unbekannt");
        assert_eq!(stamp.estimated_value, "0.00 €");
        assert_eq!(stamp.rarity, "Häufig");
        assert_eq!(stamp.condition, "Nicht bewertet");
        assert_eq!(stamp.expert_status, ExpertStatus::None);
        assert_eq!(stamp.album, "Seltenheiten");
        assert!(stamp.web_refs.is_none());
    }

    #[test]
    fn test_stamp_json_uses_camel_case() {
        let draft = StampDraft::default();
        let mut stamp = Stamp::from_draft(&draft, String::new(), "Master Archiv");
        stamp.expert_valuation = Some("120,00 €".into());

        let json = serde_json::to_value(&stamp).unwrap();
        assert_eq!(json["expertStatus"], "none");
        assert_eq!(json["expertValuation"], "120,00 €");
        assert!(json.get("expertNote").is_none());
        assert_eq!(stamp.effective_value(), "120,00 €");
    }
}
