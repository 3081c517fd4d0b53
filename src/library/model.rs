use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `GetChanges` response with `odata=nometadata`.
#[derive(Deserialize, Debug)]
pub struct ChangesResp {
    pub value: Vec<ChangeEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeEntry {
    pub change_type: i64,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Position of this change; the start of the next page.
    #[serde(default)]
    pub change_token: Option<ChangeTokenValue>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeTokenValue {
    pub string_value: String,
}
