//! Accuracy validator port and the rule-based validator.

use std::collections::BTreeMap;
use async_trait::async_trait;
use pharmaqa_core::{parse_timestamp, Document};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from an accuracy validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    /// The validator could not judge this document
    #[error("validator unavailable: {0}")]
    Unavailable(String),

    /// A configured rule is malformed
    #[error("invalid rule for '{field}': {message}")]
    InvalidRule {
        /// Field the rule applies to
        field: String,
        /// What is wrong with it
        message: String,
    },
}

/// Verdict on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    /// Whether the document is judged correct
    pub accurate: bool,

    /// Short explanation
    pub reason: String,
}

impl Judgment {
    /// An accurate judgment.
    pub fn accurate(reason: impl Into<String>) -> Self {
        Self { accurate: true, reason: reason.into() }
    }

    /// An inaccurate judgment.
    pub fn inaccurate(reason: impl Into<String>) -> Self {
        Self { accurate: false, reason: reason.into() }
    }
}

/// Judges whether a sampled document is correct.
///
/// An `Err` means "unknown": the accuracy checker excludes the document
/// instead of counting it as inaccurate.
#[async_trait]
pub trait AccuracyValidator: Send + Sync {
    /// Judge one document of `collection`.
    async fn judge(&self, collection: &str, document: &Document) -> Result<Judgment, ValidatorError>;
}

/// A deterministic plausibility rule.
///
/// Rules only apply when the field is present; absence is a completeness
/// concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AccuracyRule {
    /// Numeric field within `[min, max]`
    Range {
        /// Field name
        field: String,
        /// Inclusive minimum
        min: f64,
        /// Inclusive maximum
        max: f64,
    },
    /// Field parses as a date or timestamp
    Date {
        /// Field name
        field: String,
    },
    /// String field matches a regular expression
    Pattern {
        /// Field name
        field: String,
        /// Regular expression
        pattern: String,
    },
}

impl AccuracyRule {
    /// Field the rule inspects.
    pub fn field(&self) -> &str {
        match self {
            AccuracyRule::Range { field, .. }
            | AccuracyRule::Date { field }
            | AccuracyRule::Pattern { field, .. } => field,
        }
    }
}

/// Default rules for the competitive-intelligence collections.
pub fn default_rules() -> BTreeMap<String, Vec<AccuracyRule>> {
    let range = |field: &str| AccuracyRule::Range { field: field.to_string(), min: 0.0, max: 100.0 };
    let date = |field: &str| AccuracyRule::Date { field: field.to_string() };

    BTreeMap::from([
        ("brands".to_string(), vec![range("riskScore"), date("lastUpdated")]),
        ("alerts".to_string(), vec![range("confidenceScore"), date("createdAt")]),
        (
            "trials".to_string(),
            vec![
                AccuracyRule::Pattern { field: "id".to_string(), pattern: r"^NCT\d{8}$".to_string() },
                date("processedAt"),
            ],
        ),
        ("regulatory".to_string(), vec![date("processedAt")]),
        ("patents".to_string(), vec![date("filingDate")]),
    ])
}

enum CompiledRule {
    Range { field: String, min: f64, max: f64 },
    Date { field: String },
    Pattern { field: String, regex: Regex },
}

impl CompiledRule {
    /// `None` when the rule holds or does not apply, otherwise the reason.
    fn violation(&self, doc: &Document) -> Option<String> {
        match self {
            CompiledRule::Range { field, min, max } => {
                let value = doc.get(field).filter(|v| !v.is_null())?;
                match value.as_f64() {
                    Some(n) if (*min..=*max).contains(&n) => None,
                    Some(n) => Some(format!("{} = {} is outside [{}, {}]", field, n, min, max)),
                    None => Some(format!("{} is not a number", field)),
                }
            }
            CompiledRule::Date { field } => {
                let value = doc.get(field).filter(|v| !v.is_null())?;
                match parse_timestamp(value) {
                    Some(_) => None,
                    None => Some(format!("{} is not a valid date: {}", field, value)),
                }
            }
            CompiledRule::Pattern { field, regex } => match doc.get(field)? {
                Value::String(s) if regex.is_match(s) => None,
                Value::Null => None,
                other => Some(format!("{} does not match /{}/: {}", field, regex.as_str(), other)),
            },
        }
    }
}

/// Validator applying deterministic rules per collection.
///
/// A document is accurate when every rule of its collection holds; the reason
/// names the first broken rule.
pub struct RuleValidator {
    rules: BTreeMap<String, Vec<CompiledRule>>,
}

impl RuleValidator {
    /// Compile a rule set.
    pub fn new(rules: &BTreeMap<String, Vec<AccuracyRule>>) -> Result<Self, ValidatorError> {
        let mut compiled = BTreeMap::new();
        for (collection, list) in rules {
            let mut out = Vec::with_capacity(list.len());
            for rule in list {
                out.push(match rule {
                    AccuracyRule::Range { field, min, max } => {
                        if min > max {
                            return Err(ValidatorError::InvalidRule {
                                field: field.clone(),
                                message: format!("min {} exceeds max {}", min, max),
                            });
                        }
                        CompiledRule::Range { field: field.clone(), min: *min, max: *max }
                    }
                    AccuracyRule::Date { field } => CompiledRule::Date { field: field.clone() },
                    AccuracyRule::Pattern { field, pattern } => {
                        let regex = Regex::new(pattern).map_err(|e| ValidatorError::InvalidRule {
                            field: field.clone(),
                            message: e.to_string(),
                        })?;
                        CompiledRule::Pattern { field: field.clone(), regex }
                    }
                });
            }
            compiled.insert(collection.clone(), out);
        }
        Ok(Self { rules: compiled })
    }

    /// Number of rules that apply to a collection.
    pub fn rule_count(&self, collection: &str) -> usize {
        self.rules.get(collection).map_or(0, Vec::len)
    }
}

#[async_trait]
impl AccuracyValidator for RuleValidator {
    async fn judge(&self, collection: &str, document: &Document) -> Result<Judgment, ValidatorError> {
        let rules = self.rules.get(collection).map(Vec::as_slice).unwrap_or_default();
        for rule in rules {
            if let Some(reason) = rule.violation(document) {
                return Ok(Judgment::inaccurate(reason));
            }
        }
        Ok(Judgment::accurate(format!("{} rule(s) passed", rules.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> RuleValidator {
        RuleValidator::new(&default_rules()).unwrap()
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_range_rule() {
        let v = validator();
        let ok = v.judge("brands", &doc(json!({"riskScore": 75}))).await.unwrap();
        assert!(ok.accurate);

        let bad = v.judge("brands", &doc(json!({"riskScore": 152}))).await.unwrap();
        assert!(!bad.accurate);
        assert!(bad.reason.contains("riskScore"));

        let text = v.judge("alerts", &doc(json!({"confidenceScore": "high"}))).await.unwrap();
        assert!(!text.accurate);
    }

    #[tokio::test]
    async fn test_pattern_and_date_rules() {
        let v = validator();
        assert!(v.judge("trials", &doc(json!({"id": "NCT04567890"}))).await.unwrap().accurate);
        assert!(!v.judge("trials", &doc(json!({"id": "TRIAL-1"}))).await.unwrap().accurate);
        assert!(!v
            .judge("patents", &doc(json!({"filingDate": "sometime in 2019"})))
            .await
            .unwrap()
            .accurate);
        assert!(v.judge("patents", &doc(json!({"filingDate": "2019-03-14"}))).await.unwrap().accurate);
    }

    #[tokio::test]
    async fn test_absent_fields_and_unknown_collections_pass() {
        let v = validator();
        assert!(v.judge("brands", &doc(json!({"id": "x"}))).await.unwrap().accurate);
        assert!(v.judge("papers", &doc(json!({"anything": 1}))).await.unwrap().accurate);
        assert_eq!(v.rule_count("papers"), 0);
        assert_eq!(v.rule_count("brands"), 2);
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let rules = BTreeMap::from([(
            "trials".to_string(),
            vec![AccuracyRule::Pattern { field: "id".into(), pattern: "(".into() }],
        )]);
        assert!(matches!(RuleValidator::new(&rules), Err(ValidatorError::InvalidRule { .. })));

        let rules = BTreeMap::from([(
            "brands".to_string(),
            vec![AccuracyRule::Range { field: "riskScore".into(), min: 10.0, max: 1.0 }],
        )]);
        assert!(RuleValidator::new(&rules).is_err());
    }

    #[test]
    fn test_rules_deserialize_from_config() {
        let rule: AccuracyRule =
            serde_json::from_value(json!({"kind": "range", "field": "riskScore", "min": 0, "max": 100}))
                .unwrap();
        assert_eq!(rule.field(), "riskScore");
    }
}
