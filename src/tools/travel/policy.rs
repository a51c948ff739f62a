//! 公司政策查询：markdown FAQ 按 `\n##` 切段，按词重叠度取前两段

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::dialog::ActionKind;
use crate::tools::schema::parameters_schema;
use crate::tools::{parse_args, ActionError, ActionHandler, CallerContext};

const TOP_K: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct PolicyLookup {
    sections: Vec<String>,
}

impl PolicyLookup {
    pub fn from_markdown(text: &str) -> Self {
        let sections = text
            .split("\n##")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self { sections }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_markdown(&text))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// 重叠度相同时保持文档顺序；零分段落不返回
    pub fn lookup(&self, query: &str) -> Vec<&str> {
        let terms = tokens(query);
        let mut scored: Vec<(usize, usize)> = self
            .sections
            .iter()
            .enumerate()
            .map(|(i, s)| (i, tokens(s).intersection(&terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(TOP_K)
            .map(|(i, _)| self.sections[i].as_str())
            .collect()
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LookupPolicyArgs {
    /// What to look up in the company policies.
    pub query: String,
}

pub struct LookupPolicy {
    policies: Arc<PolicyLookup>,
}

impl LookupPolicy {
    pub fn new(policies: Arc<PolicyLookup>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl ActionHandler for LookupPolicy {
    fn kind(&self) -> ActionKind {
        ActionKind::LookupPolicy
    }

    fn description(&self) -> &str {
        "Consult the company policies to check whether certain options are permitted. \
         Use this before making any flight changes or performing other 'write' events."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<LookupPolicyArgs>()
    }

    async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
        let args: LookupPolicyArgs = parse_args(args)?;
        let hits = self.policies.lookup(&args.query);
        if hits.is_empty() {
            return Ok("No matching policy found.".to_string());
        }
        Ok(hits.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FAQ: &str = "# Swiss Airlines FAQ\n\
        ## Invoice Questions\nHow do I get an invoice for my booking?\n\
        ## Booking Changes\nCan I change my flight ticket? Changes are allowed up to three hours before departure.\n\
        ## Baggage\nHow many bags can I bring on my flight?";

    #[test]
    fn test_split_sections() {
        assert_eq!(PolicyLookup::from_markdown(FAQ).len(), 4);
        assert!(PolicyLookup::from_markdown("").is_empty());
    }

    #[test]
    fn test_rank_by_overlap() {
        let policies = PolicyLookup::from_markdown(FAQ);
        let hits = policies.lookup("change ticket before departure");
        assert!(hits[0].starts_with("Booking Changes"));
        assert!(hits.len() <= TOP_K);
    }

    #[tokio::test]
    async fn test_no_match_message() {
        let tool = LookupPolicy::new(Arc::new(PolicyLookup::from_markdown(FAQ)));
        let out = tool
            .invoke(json!({"query": "zz qq"}), &CallerContext::default())
            .await
            .unwrap();
        assert_eq!(out, "No matching policy found.");
    }
}
