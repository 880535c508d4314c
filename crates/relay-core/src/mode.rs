use serde::{Deserialize, Serialize};

/// Backend profile for one completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Short, bounded answer.
    #[default]
    Fast,
    /// Longer, more exploratory answer.
    Thorough,
}

impl CompletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Thorough => "thorough",
        }
    }
}

impl std::fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the completion mode for an inbound query.
pub trait ModeSelector: Send + Sync {
    fn select(&self, query: &str) -> CompletionMode;
}

impl<F> ModeSelector for F
where
    F: Fn(&str) -> CompletionMode + Send + Sync,
{
    fn select(&self, query: &str) -> CompletionMode {
        self(query)
    }
}

/// Thorough whenever the query mentions any of the signal words.
#[derive(Clone, Debug)]
pub struct KeywordModeSelector {
    keywords: Vec<String>,
}

/// "code": questions about code need the longer profile.
pub const DEFAULT_THOROUGH_KEYWORD: &str = "代码";

impl KeywordModeSelector {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for KeywordModeSelector {
    fn default() -> Self {
        Self::new([DEFAULT_THOROUGH_KEYWORD])
    }
}

impl ModeSelector for KeywordModeSelector {
    fn select(&self, query: &str) -> CompletionMode {
        if self.keywords.iter().any(|k| query.contains(k.as_str())) {
            CompletionMode::Thorough
        } else {
            CompletionMode::Fast
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selector_uses_code_keyword() {
        let selector = KeywordModeSelector::default();
        assert_eq!(selector.select("用Rust写一段代码"), CompletionMode::Thorough);
        assert_eq!(selector.select("中国在哪个洲"), CompletionMode::Fast);
    }

    #[test]
    fn empty_keywords_are_dropped() {
        let selector = KeywordModeSelector::new(["", "essay"]);
        assert_eq!(selector.keywords(), ["essay".to_string()]);
        assert_eq!(selector.select("hello"), CompletionMode::Fast);
        assert_eq!(selector.select("write an essay"), CompletionMode::Thorough);
    }

    #[test]
    fn closures_are_selectors() {
        let always_thorough = |_: &str| CompletionMode::Thorough;
        assert_eq!(always_thorough.select("anything"), CompletionMode::Thorough);
    }

    #[test]
    fn mode_serde() {
        let json = serde_json::to_string(&CompletionMode::Thorough).unwrap();
        assert_eq!(json, "\"thorough\"");
        assert_eq!(CompletionMode::default(), CompletionMode::Fast);
    }
}
