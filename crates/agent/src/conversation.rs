use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const ABOUT_US_KEYWORDS: &[&str] = &[
    "about you",
    "knowy",
    "abc condo",
    "about us information",
    "who are you",
    "who is knatty",
];

const IMAGE_REQUEST_PATTERN: &str =
    r"image|picture|photo|draw|avatar|profile picture|generate.*image";
const CONTENT_REQUEST_PATTERN: &str = r"post|blog|refine|improve|generate.*content";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AboutUs,
    ImageRequest,
    /// Blog/post writing help. Gated like images but answered by the text
    /// backend without any extra prompting.
    ContentRequest,
    Generic,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AboutUs => "about_us",
            Self::ImageRequest => "image_request",
            Self::ContentRequest => "content_request",
            Self::Generic => "generic",
        }
    }
}

#[derive(Clone, Debug)]
enum Matcher {
    Keywords(&'static [&'static str]),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, normalized_text: &str) -> bool {
        match self {
            Self::Keywords(keywords) => {
                keywords.iter().any(|keyword| normalized_text.contains(keyword))
            }
            Self::Pattern(pattern) => pattern.is_match(normalized_text),
        }
    }
}

#[derive(Clone, Debug)]
struct IntentRule {
    intent: Intent,
    matcher: Matcher,
}

/// Ordered rule table; the first matching rule wins, `Generic` otherwise.
#[derive(Clone, Debug)]
pub struct IntentClassifier {
    rules: Vec<IntentRule>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let rules = vec![
            IntentRule { intent: Intent::AboutUs, matcher: Matcher::Keywords(ABOUT_US_KEYWORDS) },
            IntentRule {
                intent: Intent::ImageRequest,
                matcher: Matcher::Pattern(
                    Regex::new(IMAGE_REQUEST_PATTERN).expect("image request pattern is valid"),
                ),
            },
            IntentRule {
                intent: Intent::ContentRequest,
                matcher: Matcher::Pattern(
                    Regex::new(CONTENT_REQUEST_PATTERN).expect("content request pattern is valid"),
                ),
            },
        ];

        Self { rules }
    }

    pub fn classify(&self, utterance: &str) -> Intent {
        let normalized_text = normalize_text(utterance);
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(&normalized_text))
            .map(|rule| rule.intent)
            .unwrap_or(Intent::Generic)
    }

    /// Whether the rule for `intent` matches, regardless of rule priority.
    pub fn matches(&self, intent: Intent, utterance: &str) -> bool {
        let normalized_text = normalize_text(utterance);
        self.rules
            .iter()
            .filter(|rule| rule.intent == intent)
            .any(|rule| rule.matcher.matches(&normalized_text))
    }
}

/// Classifies with the built-in rule table.
pub fn classify(utterance: &str) -> Intent {
    static CLASSIFIER: OnceLock<IntentClassifier> = OnceLock::new();
    CLASSIFIER.get_or_init(IntentClassifier::new).classify(utterance)
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}
