use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tags at or below this confidence are never written back.
pub const TAG_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// How far back a collection without a stored cursor starts reading changes.
pub const BOOTSTRAP_LOOKBACK_MINUTES: i64 = 15;

/// .NET ticks (100ns units since 0001-01-01) at the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Change notification as delivered by the document library webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subscription_id: String,
    /// Identifier of the collection (list) that changed.
    pub resource: String,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_id: Option<String>,
}

/// Envelope used by the webhook for a batch of notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub value: Vec<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Update,
    Delete,
    Other,
}

impl ChangeType {
    /// Map the document library's numeric change type.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ChangeType::Add,
            2 => ChangeType::Update,
            3 => ChangeType::Delete,
            _ => ChangeType::Other,
        }
    }

    /// Whether a change of this type can introduce content worth analyzing.
    pub fn wants_analysis(&self) -> bool {
        match self {
            ChangeType::Add | ChangeType::Update => true,
            ChangeType::Delete | ChangeType::Other => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub collection_id: String,
    pub item_id: i64,
    pub change_type: ChangeType,
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenParseError {
    #[error("change token must have 5 ';'-separated parts, got {0}")]
    Shape(usize),
    #[error("change token has invalid tick count: {0}")]
    Ticks(String),
}

/// Position in a collection's change log, in the library's native
/// `1;3;{collection};{ticks};-1` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeToken {
    collection_id: String,
    at: DateTime<Utc>,
}

impl ChangeToken {
    /// Token positioned at `at`, truncated to tick precision.
    pub fn at(collection_id: &str, at: DateTime<Utc>) -> Self {
        let at = from_ticks(to_ticks(at)).unwrap_or(at);
        Self {
            collection_id: collection_id.to_string(),
            at,
        }
    }

    /// Starting point for a collection that has never been polled.
    pub fn bootstrap(collection_id: &str, now: DateTime<Utc>) -> Self {
        Self::at(
            collection_id,
            now - Duration::minutes(BOOTSTRAP_LOOKBACK_MINUTES),
        )
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn ticks(&self) -> i64 {
        to_ticks(self.at)
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1;3;{};{};-1", self.collection_id, self.ticks())
    }
}

impl FromStr for ChangeToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').collect();
        if parts.len() != 5 {
            return Err(TokenParseError::Shape(parts.len()));
        }
        let ticks: i64 = parts[3]
            .parse()
            .map_err(|_| TokenParseError::Ticks(parts[3].to_string()))?;
        let at = from_ticks(ticks).ok_or_else(|| TokenParseError::Ticks(parts[3].to_string()))?;
        Ok(Self {
            collection_id: parts[2].to_string(),
            at,
        })
    }
}

impl PartialOrd for ChangeToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChangeToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.collection_id.cmp(&other.collection_id))
    }
}

fn to_ticks(at: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        + at.timestamp() * TICKS_PER_SECOND
        + i64::from(at.timestamp_subsec_nanos() / 100)
}

fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let rel = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = rel.div_euclid(TICKS_PER_SECOND);
    let nanos = (rel.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Last processed position for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCursor {
    pub collection_id: String,
    pub token: ChangeToken,
    pub subscription_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Durable request to analyze one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisWorkItem {
    pub item_id: i64,
    pub collection_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueName {
    Notifications,
    PhotoRequests,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Notifications, QueueName::PhotoRequests];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Notifications => "photo_notifications",
            QueueName::PhotoRequests => "photo_requests",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub confidence: f64,
}

/// What gets written back onto an analyzed item.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Tags above the confidence threshold, in service order.
    pub tags: Vec<Tag>,
    pub is_inappropriate: bool,
    /// Background then foreground.
    pub dominant_colors: Vec<String>,
}

impl AnalysisResult {
    pub fn joined_tags(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Keep only tags strictly above [`TAG_CONFIDENCE_THRESHOLD`].
pub fn confident_tags<I>(tags: I) -> Vec<Tag>
where
    I: IntoIterator<Item = Tag>,
{
    tags.into_iter()
        .filter(|t| t.confidence > TAG_CONFIDENCE_THRESHOLD)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tag(name: &str, confidence: f64) -> Tag {
        Tag {
            name: name.into(),
            confidence,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let kept = confident_tags(vec![tag("edge", 0.75), tag("above", 0.7501)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "above");
    }

    #[test]
    fn joined_tags_uses_commas_without_spaces() {
        let result = AnalysisResult {
            tags: vec![tag("cat", 0.9), tag("indoor", 0.8)],
            is_inappropriate: false,
            dominant_colors: vec![],
        };
        assert_eq!(result.joined_tags(), "cat,indoor");
    }

    #[test]
    fn change_type_codes() {
        assert_eq!(ChangeType::from_code(1), ChangeType::Add);
        assert_eq!(ChangeType::from_code(2), ChangeType::Update);
        assert_eq!(ChangeType::from_code(3), ChangeType::Delete);
        assert_eq!(ChangeType::from_code(7), ChangeType::Other);
        assert!(!ChangeType::Delete.wants_analysis());
        assert!(ChangeType::Update.wants_analysis());
    }

    #[test]
    fn token_text_form_uses_dotnet_ticks() {
        let at = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        let token = ChangeToken::at("abc", at);
        assert_eq!(token.to_string(), "1;3;abc;621355968010000000;-1");
    }

    #[test]
    fn token_parses_back() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let token = ChangeToken::at("list", at);
        let parsed: ChangeToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
        assert_eq!(parsed.collection_id(), "list");
    }

    #[test]
    fn token_rejects_garbage() {
        assert_eq!("nope".parse::<ChangeToken>(), Err(TokenParseError::Shape(1)));
        assert!(matches!(
            "1;3;x;abc;-1".parse::<ChangeToken>(),
            Err(TokenParseError::Ticks(_))
        ));
    }

    #[test]
    fn bootstrap_is_fifteen_minutes_back() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let token = ChangeToken::bootstrap("list", now);
        assert_eq!(token.timestamp(), now - Duration::minutes(15));
    }

    #[test]
    fn tokens_order_by_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let earlier = ChangeToken::at("list", now - Duration::seconds(1));
        let later = ChangeToken::at("list", now);
        assert!(earlier < later);
        assert_eq!(std::cmp::max(earlier, later.clone()), later);
    }

    #[test]
    fn notification_parses_library_payload() {
        let raw = r#"{
            "subscriptionId": "sub-1",
            "clientState": null,
            "expirationDateTime": "2024-06-01T00:00:00.0000000Z",
            "resource": "list-guid",
            "tenantId": "tenant",
            "siteUrl": "/sites/photos",
            "webId": "web"
        }"#;
        let n: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(n.subscription_id, "sub-1");
        assert_eq!(n.resource, "list-guid");
        assert!(n.expiration_date_time.is_some());
        assert_eq!(n.site_url.as_deref(), Some("/sites/photos"));
    }

    #[test]
    fn work_item_wire_shape() {
        let item = AnalysisWorkItem {
            item_id: 10,
            collection_id: "list".into(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["itemId"], 10);
        assert_eq!(json["collectionId"], "list");
    }
}
