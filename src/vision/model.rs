use serde::Deserialize;

use crate::model::{confident_tags, AnalysisResult, Tag};

/// Body of a successful `analyze` call. `tags`, `adult` and `color` are
/// required; a payload without them is rejected as malformed.
#[derive(Deserialize, Debug, Clone)]
pub struct VisionResponse {
    #[serde(default)]
    pub categories: Vec<Category>,
    pub adult: Adult,
    #[serde(default)]
    pub description: Option<Description>,
    pub tags: Vec<VisionTag>,
    pub color: Color,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Category {
    pub name: String,
    pub score: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Adult {
    pub is_adult_content: bool,
    pub is_racy_content: bool,
    #[serde(default)]
    pub adult_score: f64,
    #[serde(default)]
    pub racy_score: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Description {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub captions: Vec<Caption>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Caption {
    pub text: String,
    pub confidence: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VisionTag {
    pub name: String,
    pub confidence: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Color {
    pub dominant_color_foreground: String,
    pub dominant_color_background: String,
    #[serde(default)]
    pub accent_color: Option<String>,
    #[serde(default, rename = "isBWImg")]
    pub is_bw_img: bool,
}

impl VisionResponse {
    pub fn to_analysis(&self) -> AnalysisResult {
        let tags = confident_tags(self.tags.iter().map(|t| Tag {
            name: t.name.clone(),
            confidence: t.confidence,
        }));
        AnalysisResult {
            tags,
            is_inappropriate: self.adult.is_adult_content || self.adult.is_racy_content,
            dominant_colors: vec![
                self.color.dominant_color_background.clone(),
                self.color.dominant_color_foreground.clone(),
            ],
        }
    }
}
