use std::collections::BTreeMap;

const CURATED: &[(&str, &str)] = &[
    ("mmlu", "MMLU"),
    ("hellaswag", "Hellaswag"),
    ("winogrande", "Winogrande"),
    ("piqa", "Piqa"),
    ("openbookqa", "OpenbookQA"),
    ("arc_challenge", "ARC-C"),
    ("truthfulqa_mc2", "TruthfulQA"),
    ("gsm8k", "GSM8K"),
    ("bbh", "BBH"),
    ("musr", "MuSR"),
    ("mmlu_pro", "MMLU-PRO"),
    ("gpqa", "GPQA"),
    ("math_hard", "MATH Lvl 5"),
    ("ifeval", "IFEval"),
    ("toxigen", "Toxigen"),
];

/// Display labels for scenario identifiers
#[derive(Debug, Clone)]
pub struct PrettyNames {
    labels: BTreeMap<String, String>,
}

impl PrettyNames {
    /// Curated labels with `overrides` applied on top
    pub fn new(overrides: &BTreeMap<String, String>) -> Self {
        let mut labels: BTreeMap<String, String> = CURATED
            .iter()
            .map(|(name, label)| (name.to_string(), label.to_string()))
            .collect();
        labels.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { labels }
    }

    /// Label for `name`; names outside the curated set are capitalized
    pub fn get(&self, name: &str) -> String {
        match self.labels.get(name) {
            Some(label) => label.clone(),
            None => capitalize(name),
        }
    }
}

impl Default for PrettyNames {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curated_names() {
        let names = PrettyNames::default();
        assert_eq!(names.get("arc_challenge"), "ARC-C");
        assert_eq!(names.get("math_hard"), "MATH Lvl 5");
        assert_eq!(names.get("mmlu_pro"), "MMLU-PRO");
    }

    #[test]
    fn test_fallback_capitalizes() {
        let names = PrettyNames::default();
        assert_eq!(names.get("lambada_OPENAI"), "Lambada_openai");
        assert_eq!(names.get(""), "");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut overrides = BTreeMap::new();
        overrides.insert("toxigen".to_string(), "ToxiGen".to_string());
        overrides.insert("lambada".to_string(), "LAMBADA".to_string());

        let names = PrettyNames::new(&overrides);
        assert_eq!(names.get("toxigen"), "ToxiGen");
        assert_eq!(names.get("lambada"), "LAMBADA");
        assert_eq!(names.get("gsm8k"), "GSM8K");
    }
}
