/// Feature toggles smuggled through the model name on the CLI surface.
/// Prefixes and suffixes are stripped before the name reaches the real API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFeatures {
    /// `假流式/`: client asked for SSE but the upstream call is made
    /// non-streaming and replayed as a stream.
    pub fake_stream: bool,
    /// `流式抗截断/`: anti-truncation hint for streamed output.
    pub anti_truncation: bool,
    /// `-maxthinking` / `-nothinking`: force the thinking budget.
    pub thinking_budget_override: Option<i64>,
    /// `-search`: append a googleSearch tool.
    pub web_search: bool,
}

pub const FAKE_STREAM_PREFIX: &str = "假流式/";
pub const ANTI_TRUNCATION_PREFIX: &str = "流式抗截断/";

const MAX_THINKING_BUDGET: i64 = 32768;

/// Splits a decorated model name into the real upstream model and the flag
/// set. Prefixes may stack in any order; suffixes are checked after.
pub fn parse_model_features(model: &str) -> (String, ModelFeatures) {
    let mut features = ModelFeatures::default();
    let mut name = model;

    loop {
        if let Some(rest) = name.strip_prefix(FAKE_STREAM_PREFIX) {
            features.fake_stream = true;
            name = rest;
        } else if let Some(rest) = name.strip_prefix(ANTI_TRUNCATION_PREFIX) {
            features.anti_truncation = true;
            name = rest;
        } else {
            break;
        }
    }

    let mut name = name.to_string();
    if let Some(base) = name.strip_suffix("-maxthinking") {
        features.thinking_budget_override = Some(MAX_THINKING_BUDGET);
        name = base.to_string();
    } else if let Some(base) = name.strip_suffix("-nothinking") {
        features.thinking_budget_override = Some(0);
        name = base.to_string();
    }

    if let Some(base) = name.strip_suffix("-search") {
        features.web_search = true;
        name = base.to_string();
    }

    (name, features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_model_has_no_features() {
        let (name, features) = parse_model_features("gemini-2.5-pro");
        assert_eq!(name, "gemini-2.5-pro");
        assert_eq!(features, ModelFeatures::default());
    }

    #[test]
    fn fake_stream_prefix_is_stripped() {
        let (name, features) = parse_model_features("假流式/gemini-2.5-pro");
        assert_eq!(name, "gemini-2.5-pro");
        assert!(features.fake_stream);
        assert!(!features.anti_truncation);
    }

    #[test]
    fn stacked_prefixes_both_apply() {
        let (name, features) = parse_model_features("假流式/流式抗截断/gemini-2.5-flash");
        assert_eq!(name, "gemini-2.5-flash");
        assert!(features.fake_stream);
        assert!(features.anti_truncation);
    }

    #[test]
    fn thinking_suffixes_set_budget() {
        let (name, features) = parse_model_features("gemini-2.5-pro-maxthinking");
        assert_eq!(name, "gemini-2.5-pro");
        assert_eq!(features.thinking_budget_override, Some(MAX_THINKING_BUDGET));

        let (name, features) = parse_model_features("gemini-2.5-flash-nothinking");
        assert_eq!(name, "gemini-2.5-flash");
        assert_eq!(features.thinking_budget_override, Some(0));
    }

    #[test]
    fn search_suffix_composes_with_prefix() {
        let (name, features) = parse_model_features("假流式/gemini-2.5-pro-search");
        assert_eq!(name, "gemini-2.5-pro");
        assert!(features.fake_stream);
        assert!(features.web_search);
    }
}
