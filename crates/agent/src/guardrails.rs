use crate::conversation::Intent;

pub const IMAGE_LOGIN_REQUIRED: &str = "To generate images, please login first.";
pub const CONTENT_LOGIN_REQUIRED: &str =
    "To help you generate or refine post content, please login first.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Login gate for privileged intents.
///
/// Only generation requests are privileged; everything else passes
/// regardless of the caller's session.
pub fn authorize(intent: Intent, authenticated: bool) -> GuardrailDecision {
    match intent {
        Intent::AboutUs | Intent::Generic => GuardrailDecision::Allow,
        Intent::ImageRequest | Intent::ContentRequest if authenticated => GuardrailDecision::Allow,
        Intent::ImageRequest => GuardrailDecision::Deny {
            reason_code: "image_generation_requires_login",
            user_message: IMAGE_LOGIN_REQUIRED,
        },
        Intent::ContentRequest => GuardrailDecision::Deny {
            reason_code: "content_generation_requires_login",
            user_message: CONTENT_LOGIN_REQUIRED,
        },
    }
}
