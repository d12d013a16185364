use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use gemgate_transform::Proto;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::StoreResult;

/// Catch-all source name for a protocol.
pub const DEFAULT_SOURCE: &str = "__DEFAULT__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetMethod {
    #[serde(rename = "generateContent")]
    GenerateContent,
    #[serde(rename = "streamGenerateContent")]
    StreamGenerateContent,
}

impl TargetMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetMethod::GenerateContent => "generateContent",
            TargetMethod::StreamGenerateContent => "streamGenerateContent",
        }
    }

    pub fn is_stream(self) -> bool {
        matches!(self, TargetMethod::StreamGenerateContent)
    }

    pub fn from_stream(stream: bool) -> Self {
        if stream {
            TargetMethod::StreamGenerateContent
        } else {
            TargetMethod::GenerateContent
        }
    }
}

impl fmt::Display for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generateContent" => Ok(TargetMethod::GenerateContent),
            "streamGenerateContent" => Ok(TargetMethod::StreamGenerateContent),
            other => Err(format!("unknown target method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMapping {
    pub id: i64,
    pub source_name: String,
    pub source_protocol: Proto,
    pub priority: i32,
    pub target_name: String,
    pub target_method: TargetMethod,
    pub capabilities: Option<JsonValue>,
    pub constraints: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target_name: String,
    pub target_method: TargetMethod,
    /// `None` when the model passed through without a rule.
    pub rule_id: Option<i64>,
}

impl ResolvedTarget {
    fn from_rule(rule: &ModelMapping) -> Self {
        Self {
            target_name: rule.target_name.clone(),
            target_method: rule.target_method,
            rule_id: Some(rule.id),
        }
    }
}

#[async_trait]
pub trait MappingSource: Send + Sync {
    async fn load_mappings(&self) -> StoreResult<Vec<ModelMapping>>;
}

#[derive(Debug, Default)]
struct ProtoRules {
    exact: HashMap<String, ModelMapping>,
    templates: Vec<(Regex, ModelMapping)>,
    default: Option<ModelMapping>,
}

impl ProtoRules {
    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.templates.is_empty() && self.default.is_none()
    }
}

/// Compiled snapshot of the mapping table.
#[derive(Debug, Default)]
pub struct ModelResolver {
    rules: HashMap<Proto, ProtoRules>,
    passthrough_unmapped: bool,
}

impl ModelResolver {
    pub fn new(mappings: Vec<ModelMapping>, passthrough_unmapped: bool) -> Self {
        let mut rules: HashMap<Proto, ProtoRules> = HashMap::new();
        for mapping in mappings {
            let entry = rules.entry(mapping.source_protocol).or_default();
            if mapping.source_name == DEFAULT_SOURCE {
                let replace = entry
                    .default
                    .as_ref()
                    .is_none_or(|current| mapping.id < current.id);
                if replace {
                    entry.default = Some(mapping);
                }
            } else if mapping.source_name.contains('*') {
                match template_regex(&mapping.source_name) {
                    Ok(regex) => entry.templates.push((regex, mapping)),
                    Err(err) => tracing::warn!(
                        event = "mapping_template_invalid",
                        rule_id = mapping.id,
                        source_name = %mapping.source_name,
                        error = %err,
                    ),
                }
            } else {
                let keep_existing = entry
                    .exact
                    .get(&mapping.source_name)
                    .is_some_and(|current| current.id < mapping.id);
                if !keep_existing {
                    entry.exact.insert(mapping.source_name.clone(), mapping);
                }
            }
        }
        for entry in rules.values_mut() {
            entry
                .templates
                .sort_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        }
        Self {
            rules,
            passthrough_unmapped,
        }
    }

    /// Exact name, then the highest-priority matching template, then the
    /// protocol default.
    ///
    /// A protocol with no rules at all resolves to the model itself with
    /// `natural` as method when passthrough is on.
    pub fn resolve(&self, proto: Proto, model: &str, natural: TargetMethod) -> Option<ResolvedTarget> {
        let Some(rules) = self.rules.get(&proto).filter(|rules| !rules.is_empty()) else {
            return self.passthrough_unmapped.then(|| ResolvedTarget {
                target_name: model.to_string(),
                target_method: natural,
                rule_id: None,
            });
        };

        if let Some(rule) = rules.exact.get(model) {
            return Some(ResolvedTarget::from_rule(rule));
        }
        if let Some((_, rule)) = rules.templates.iter().find(|(regex, _)| regex.is_match(model)) {
            return Some(ResolvedTarget::from_rule(rule));
        }
        rules.default.as_ref().map(ResolvedTarget::from_rule)
    }
}

fn template_regex(template: &str) -> Result<Regex, regex::Error> {
    let body = template
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}
