//! Command denylist
//!
//! Case-insensitive substring matching against a fixed list of destructive
//! operations. This is a heuristic, not a sandbox: variable expansion,
//! alternate flag spellings, scripts written to disk and then run, or any
//! other indirection will get past it.

use autoloop_config::SafetyConfig;

/// Rejects commands containing a denylisted substring
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    denylist: Vec<String>,
}

impl SafetyFilter {
    /// Blank entries are dropped; an empty pattern would match everything.
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denylist: denylist
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(&config.denylist)
    }

    /// The first denylist entry found in `command`, if any
    pub fn matched(&self, command: &str) -> Option<&str> {
        let lower = command.to_lowercase();
        self.denylist
            .iter()
            .find(|pattern| lower.contains(pattern.as_str()))
            .map(|s| s.as_str())
    }

    pub fn is_blocked(&self, command: &str) -> bool {
        self.matched(command).is_some()
    }

    pub fn patterns(&self) -> &[String] {
        &self.denylist
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::from_config(&SafetyConfig::default())
    }
}
