use crate::ner::EntityRecognizer;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// Leading run of capitalized words, e.g. "Smith&Co Ltd" in "Smith&Co Ltd annual".
/// A standalone "&" ends the run.
static LEADING_CAPITALIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((?:[A-Z][\w&]*\s?)+)").expect("valid leading-words regex"));

/// Derives a candidate company name from a file name.
pub struct NameExtractor<'m> {
    recognizer: &'m dyn EntityRecognizer,
}

impl<'m> NameExtractor<'m> {
    pub fn new(recognizer: &'m dyn EntityRecognizer) -> Self {
        Self { recognizer }
    }

    /// `stem` is the file name without its extension. Never returns an
    /// empty string for a non-empty stem.
    pub fn extract(&self, stem: &str) -> String {
        let orgs = self.recognizer.organizations(stem);
        if !orgs.is_empty() {
            let name = orgs.join(" ");
            debug!("'{}' -> '{}' (entities)", stem, name);
            return name;
        }

        let name = leading_capitalized_words(stem).unwrap_or_else(|| stem.to_string());
        debug!("'{}' -> '{}' (fallback)", stem, name);
        name
    }

    pub fn extract_all<T: AsRef<str>>(&self, stems: &[T]) -> Vec<String> {
        stems.iter().map(|s| self.extract(s.as_ref())).collect()
    }
}

fn leading_capitalized_words(stem: &str) -> Option<String> {
    LEADING_CAPITALIZED
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
