//! Text normalization applied before segmentation.
//!
//! Steps, in order: Unicode normalization form, whitespace policy, lowercase.
//! The step list is fixed per model and built once at load time.

use std::borrow::Cow;

use unicode_normalization::{
    is_nfc_quick, is_nfd_quick, is_nfkc_quick, is_nfkd_quick, IsNormalized, UnicodeNormalization,
};

use crate::model::{ModelConfig, NormalizationForm, WhitespacePolicy};

/// Passes are repeated until the text stops changing. Lowercasing can
/// produce text that is no longer in the configured form; one extra pass
/// settles every case seen in practice.
const MAX_PASSES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NormStep {
    Form(NormalizationForm),
    CollapseWhitespace,
    Lowercase,
}

/// Deterministic text normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    steps: Vec<NormStep>,
}

impl Normalizer {
    pub fn new(config: &ModelConfig) -> Self {
        let mut steps = Vec::with_capacity(3);
        if config.normalization != NormalizationForm::Identity {
            steps.push(NormStep::Form(config.normalization));
        }
        if config.whitespace == WhitespacePolicy::Collapse {
            steps.push(NormStep::CollapseWhitespace);
        }
        if config.lowercase {
            steps.push(NormStep::Lowercase);
        }
        Normalizer { steps }
    }

    /// Whether every input is returned unchanged.
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Normalize `text`. Borrows when nothing changes.
    pub fn normalize<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let (normalized, converged) = self.run_passes(text, MAX_PASSES);
        if !converged {
            tracing::warn!(
                "Normalization still changing after {MAX_PASSES} passes, result may not be idempotent"
            );
        }
        normalized
    }

    /// Apply passes until one leaves the text unchanged, at most `max_passes`
    /// times. The flag is false when the limit was hit first.
    fn run_passes<'a>(&self, text: &'a str, max_passes: usize) -> (Cow<'a, str>, bool) {
        let mut current = Cow::Borrowed(text);
        for _ in 0..max_passes {
            let changed = match self.pass(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(next) => Some(next),
            };
            match changed {
                Some(next) => current = Cow::Owned(next),
                None => return (current, true),
            }
        }
        (current, false)
    }

    /// Normalize possibly malformed UTF-8. Invalid sequences become U+FFFD
    /// before normalization.
    pub fn normalize_bytes(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        self.normalize(&text).into_owned()
    }

    /// One application of every step. Returns `Borrowed` iff nothing changed.
    fn pass<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut buf = Cow::Borrowed(text);
        for step in &self.steps {
            let changed = match step {
                NormStep::Form(form) => apply_form(&buf, *form),
                NormStep::CollapseWhitespace => collapse_whitespace(&buf),
                NormStep::Lowercase => lowercase(&buf),
            };
            if let Some(next) = changed {
                buf = Cow::Owned(next);
            }
        }
        buf
    }
}

/// Normalize `text` under `config`. Convenience for one-off calls; a loaded
/// [`Model`](crate::Model) keeps its own prebuilt [`Normalizer`].
pub fn normalize(text: &str, config: &ModelConfig) -> String {
    Normalizer::new(config).normalize(text).into_owned()
}

fn apply_form(text: &str, form: NormalizationForm) -> Option<String> {
    let quick = match form {
        NormalizationForm::Identity => return None,
        NormalizationForm::Nfc => is_nfc_quick(text.chars()),
        NormalizationForm::Nfd => is_nfd_quick(text.chars()),
        NormalizationForm::Nfkc => is_nfkc_quick(text.chars()),
        NormalizationForm::Nfkd => is_nfkd_quick(text.chars()),
    };
    if quick == IsNormalized::Yes {
        return None;
    }
    let out: String = match form {
        NormalizationForm::Identity => return None,
        NormalizationForm::Nfc => text.nfc().collect(),
        NormalizationForm::Nfd => text.nfd().collect(),
        NormalizationForm::Nfkc => text.nfkc().collect(),
        NormalizationForm::Nfkd => text.nfkd().collect(),
    };
    (out != text).then_some(out)
}

fn collapse_whitespace(text: &str) -> Option<String> {
    let clean = !text.starts_with(' ')
        && !text.ends_with(' ')
        && !text.contains("  ")
        && !text.chars().any(|c| c.is_whitespace() && c != ' ');
    if clean {
        return None;
    }

    let mut out = String::with_capacity(text.len());
    for word in text.split(char::is_whitespace).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    Some(out)
}

fn lowercase(text: &str) -> Option<String> {
    if text.bytes().all(|b| b.is_ascii() && !b.is_ascii_uppercase()) {
        return None;
    }
    let out = text.to_lowercase();
    (out != text).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(form: NormalizationForm, whitespace: WhitespacePolicy, lowercase: bool) -> ModelConfig {
        ModelConfig {
            normalization: form,
            whitespace,
            lowercase,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_identity_borrows() {
        let n = Normalizer::new(&ModelConfig::verbatim());
        assert!(n.is_identity());
        assert!(matches!(n.normalize("  A\tB "), Cow::Borrowed("  A\tB ")));
    }

    #[test]
    fn test_unicode_forms() {
        let composed = "\u{00E9}";
        let decomposed = "e\u{0301}";
        let nfc = Normalizer::new(&config(NormalizationForm::Nfc, WhitespacePolicy::Preserve, false));
        assert_eq!(nfc.normalize(decomposed), composed);
        assert!(matches!(nfc.normalize(composed), Cow::Borrowed(_)));

        let nfd = Normalizer::new(&config(NormalizationForm::Nfd, WhitespacePolicy::Preserve, false));
        assert_eq!(nfd.normalize(composed), decomposed);

        let nfkc = Normalizer::new(&config(NormalizationForm::Nfkc, WhitespacePolicy::Preserve, false));
        assert_eq!(nfkc.normalize("\u{FB01}"), "fi");
        assert_eq!(nfkc.normalize("\u{FF21}"), "A");
    }

    #[test]
    fn test_collapse_whitespace() {
        let n = Normalizer::new(&config(NormalizationForm::Identity, WhitespacePolicy::Collapse, false));
        assert_eq!(n.normalize("  hello \t\n world  "), "hello world");
        assert_eq!(n.normalize("a\u{3000}b"), "a b");
        assert_eq!(n.normalize("   "), "");
        assert!(matches!(n.normalize("a b c"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_nfkc_then_collapse() {
        // NFKC maps NBSP to a plain space, which is then collapsed.
        let n = Normalizer::new(&ModelConfig::default());
        assert_eq!(n.normalize("a\u{00A0} b"), "a b");
    }

    #[test]
    fn test_lowercase() {
        let n = Normalizer::new(&config(NormalizationForm::Nfc, WhitespacePolicy::Preserve, true));
        assert_eq!(n.normalize("HeLLo"), "hello");
        assert_eq!(n.normalize("\u{01C5}"), "\u{01C6}");
        assert!(matches!(n.normalize("already lower"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_malformed_bytes_are_substituted() {
        let n = Normalizer::new(&ModelConfig::default());
        assert_eq!(n.normalize_bytes(b"ab\xFFcd"), "ab\u{FFFD}cd");
        assert_eq!(n.normalize_bytes(b"\xE2\x82"), "\u{FFFD}");
    }

    #[test]
    fn test_free_function_matches_normalizer() {
        let cfg = config(NormalizationForm::Nfkc, WhitespacePolicy::Collapse, true);
        assert_eq!(normalize(" \u{FF21}  B ", &cfg), "a b");
    }

    fn any_config() -> impl Strategy<Value = ModelConfig> {
        let forms = prop_oneof![
            Just(NormalizationForm::Identity),
            Just(NormalizationForm::Nfc),
            Just(NormalizationForm::Nfd),
            Just(NormalizationForm::Nfkc),
            Just(NormalizationForm::Nfkd),
        ];
        let ws = prop_oneof![Just(WhitespacePolicy::Preserve), Just(WhitespacePolicy::Collapse)];
        (forms, ws, any::<bool>()).prop_map(|(f, w, l)| config(f, w, l))
    }

    #[test]
    fn test_pass_limit_reports_convergence() {
        let n = Normalizer::new(&config(NormalizationForm::Identity, WhitespacePolicy::Preserve, true));
        assert_eq!(n.run_passes("ABC", 1), (Cow::Borrowed("abc"), false));
        assert_eq!(n.run_passes("ABC", 2), (Cow::Borrowed("abc"), true));
        assert_eq!(n.run_passes("abc", 1), (Cow::Borrowed("abc"), true));
    }

    proptest! {
        #[test]
        fn prop_normalization_converges(cfg in any_config(), text in "\\PC{0,24}|[ \t\u{A0}\u{3000}aA\u{301}\u{FB01}e\u{130}]{0,12}") {
            let n = Normalizer::new(&cfg);
            prop_assert!(n.run_passes(&text, MAX_PASSES).1);
        }

        #[test]
        fn prop_normalize_is_idempotent(cfg in any_config(), text in "\\PC{0,24}|[ \t\u{A0}\u{3000}aA\u{301}\u{FB01}e]{0,12}") {
            let n = Normalizer::new(&cfg);
            let once = n.normalize(&text).into_owned();
            let twice = n.normalize(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
