//! Keyword-based query categorization.

use std::collections::BTreeSet;

use crate::config::CategoryConfig;

/// Label used when no category pattern matches.
pub const GENERAL_CATEGORY: &str = "general";

/// Built-in ordered category table.
pub fn default_categories() -> Vec<CategoryConfig> {
    let table: [(&str, &[&str]); 6] = [
        (
            "coding",
            &["code", "function", "python", "javascript", "program", "debug", "error", "api"],
        ),
        ("creative", &["write", "story", "poem", "creative", "imagine", "design"]),
        ("technical", &["explain", "how does", "technical", "algorithm", "system"]),
        ("research", &["research", "find", "search", "what is", "information about"]),
        ("multilingual", &["urdu", "arabic", "chinese", "hindi", "translate"]),
        ("mathematical", &["calculate", "math", "equation", "solve", "formula"]),
    ];

    table
        .iter()
        .map(|(name, keywords)| CategoryConfig {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        })
        .collect()
}

/// Categories inferred for one prompt. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCategorySet(BTreeSet<String>);

impl QueryCategorySet {
    fn general() -> Self {
        Self(BTreeSet::from([GENERAL_CATEGORY.to_string()]))
    }

    pub fn contains(&self, category: &str) -> bool {
        self.0.contains(category)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Maps prompts to topical categories by substring matching.
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    /// (category, lowercased keywords), in configuration order
    patterns: Vec<(String, Vec<String>)>,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new(&default_categories())
    }
}

impl QueryClassifier {
    pub fn new(categories: &[CategoryConfig]) -> Self {
        let patterns = categories
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    c.keywords.iter().map(|k| k.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { patterns }
    }

    /// Every category with at least one keyword occurring in the lowercased
    /// prompt, or `{general}` when none does.
    pub fn classify(&self, prompt: &str) -> QueryCategorySet {
        let prompt_lower = prompt.to_lowercase();
        let matched: BTreeSet<String> = self
            .patterns
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| prompt_lower.contains(kw.as_str())))
            .map(|(name, _)| name.clone())
            .collect();

        if matched.is_empty() {
            QueryCategorySet::general()
        } else {
            QueryCategorySet(matched)
        }
    }
}
