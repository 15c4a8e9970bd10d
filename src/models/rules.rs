use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::catalog::CatalogChannel;

/// How a rule selects catalog channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Exact country code, e.g. "BD"
    Country(String),
    /// Lower-cased genre keywords, any-match
    GenreSet(BTreeSet<String>),
}

/// One category file and the rule that fills it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// File name inside the categories dir, e.g. "india.json"
    pub file_key: String,
    pub matcher: Matcher,
    pub category_label: String,
}

impl FilterRule {
    pub fn country(file_key: &str, code: &str, label: &str) -> Self {
        Self {
            file_key: file_key.to_string(),
            matcher: Matcher::Country(code.to_string()),
            category_label: label.to_string(),
        }
    }

    pub fn genres(file_key: &str, keywords: &[&str], label: &str) -> Self {
        Self {
            file_key: file_key.to_string(),
            matcher: Matcher::GenreSet(keywords.iter().map(|k| k.to_lowercase()).collect()),
            category_label: label.to_string(),
        }
    }

    pub fn is_genre_rule(&self) -> bool {
        matches!(self.matcher, Matcher::GenreSet(_))
    }

    pub fn matches(&self, channel: &CatalogChannel) -> bool {
        match &self.matcher {
            Matcher::Country(code) => channel.country.as_deref() == Some(code.as_str()),
            Matcher::GenreSet(keywords) => channel
                .categories
                .iter()
                .any(|c| keywords.contains(&c.to_lowercase())),
        }
    }
}

/// Immutable rule table handed to the update job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    rules: Vec<FilterRule>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            rules: vec![
                FilterRule::country("bangladesh.json", "BD", "Bangladesh"),
                FilterRule::country("india.json", "IN", "India"),
                FilterRule::country("usa.json", "US", "USA"),
                FilterRule::country("uk.json", "GB", "UK"),
                FilterRule::country("uae.json", "AE", "UAE"),
                FilterRule::genres("sports.json", &["sports"], "Sports"),
                FilterRule::genres("kids.json", &["kids", "animation"], "Kids"),
                FilterRule::genres("music.json", &["music"], "Music"),
                FilterRule::genres(
                    "informative.json",
                    &["documentary", "education", "science"],
                    "Informative",
                ),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MatchKind {
    Country,
    #[serde(rename = "genreSet", alias = "genre")]
    GenreSet,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleSpec {
    match_kind: MatchKind,
    match_value: MatchValue,
    category_label: String,
}

impl CategoryRules {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parse `{fileKey: {matchKind, matchValue, categoryLabel}}`
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: BTreeMap<String, RuleSpec> =
            serde_json::from_str(json).context("Invalid category rules JSON")?;

        let mut rules = Vec::with_capacity(specs.len());
        for (file_key, entry) in specs {
            if !file_key.ends_with(".json") {
                bail!("Rule key '{}' must name a .json file", file_key);
            }
            let matcher = match (entry.match_kind, entry.match_value) {
                (MatchKind::Country, MatchValue::One(code)) => Matcher::Country(code),
                (MatchKind::Country, MatchValue::Many(_)) => {
                    bail!("Rule '{}': country match takes a single code", file_key)
                }
                (MatchKind::GenreSet, MatchValue::One(kw)) => {
                    Matcher::GenreSet(BTreeSet::from([kw.to_lowercase()]))
                }
                (MatchKind::GenreSet, MatchValue::Many(kws)) => {
                    if kws.is_empty() {
                        bail!("Rule '{}': empty genre set", file_key);
                    }
                    Matcher::GenreSet(kws.iter().map(|k| k.to_lowercase()).collect())
                }
            };
            rules.push(FilterRule {
                file_key,
                matcher,
                category_label: entry.category_label,
            });
        }

        Ok(Self { rules })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        Self::from_json(&content)
    }
}
