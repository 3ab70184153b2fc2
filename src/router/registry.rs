//! Static catalog of provider capabilities.

use crate::config::ProviderConfig;

/// Immutable description of one provider, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub id: String,
    /// Capability tags in declaration order
    pub capabilities: Vec<String>,
    pub has_credential: bool,
}

impl ProviderSpec {
    /// Number of `categories` this provider declares a capability for.
    pub fn specialization_score<'a>(&self, categories: impl IntoIterator<Item = &'a str>) -> usize {
        categories
            .into_iter()
            .filter(|cat| self.capabilities.iter().any(|c| c == cat))
            .count()
    }
}

impl From<&ProviderConfig> for ProviderSpec {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            id: config.name.clone(),
            capabilities: config.capabilities.clone(),
            has_credential: config.api_key.as_ref().is_some_and(|key| !key.is_blank()),
        }
    }
}

/// Provider catalog in registration order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    specs: Vec<ProviderSpec>,
}

impl ProviderRegistry {
    pub fn new(specs: Vec<ProviderSpec>) -> Self {
        Self { specs }
    }

    pub fn from_configs(providers: &[ProviderConfig]) -> Self {
        Self::new(providers.iter().map(ProviderSpec::from).collect())
    }

    /// All providers, in registration order.
    pub fn specs(&self) -> &[ProviderSpec] {
        &self.specs
    }

    pub fn get(&self, id: &str) -> Option<&ProviderSpec> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.id.clone()).collect()
    }

    /// Providers whose credential is present.
    pub fn available(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.specs.iter().filter(|s| s.has_credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, caps: &[&str], has_credential: bool) -> ProviderSpec {
        ProviderSpec {
            id: id.to_string(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            has_credential,
        }
    }

    #[test]
    fn test_specialization_score_counts_overlaps() {
        let s = spec("deepseek", &["coding", "technical", "mathematical"], true);
        assert_eq!(s.specialization_score(["coding", "technical"]), 2);
        assert_eq!(s.specialization_score(["creative"]), 0);
        assert_eq!(s.specialization_score(Vec::<&str>::new()), 0);
    }

    #[test]
    fn test_available_filters_missing_credentials() {
        let registry = ProviderRegistry::new(vec![
            spec("a", &[], true),
            spec("b", &[], false),
            spec("c", &[], true),
        ]);
        let ids: Vec<&str> = registry.available().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(registry.contains("b"));
        assert!(!registry.contains("z"));
    }
}
