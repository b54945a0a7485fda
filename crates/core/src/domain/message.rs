use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Assistant,
}

/// One transcript entry.
///
/// A message is plain text, text with an inline image, or text with a login
/// prompt. The constructors are the only way to build one, so the image and
/// login-prompt fields never appear together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    origin: Origin,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_prompt: Option<bool>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { origin: Origin::User, text: text.into(), image_url: None, login_prompt: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { origin: Origin::Assistant, text: text.into(), image_url: None, login_prompt: None }
    }

    pub fn assistant_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            origin: Origin::Assistant,
            text: text.into(),
            image_url: Some(image_url.into()),
            login_prompt: None,
        }
    }

    pub fn login_prompt(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Assistant,
            text: text.into(),
            image_url: None,
            login_prompt: Some(true),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn has_login_prompt(&self) -> bool {
        self.login_prompt.unwrap_or(false)
    }
}

/// Builds the `data:` URI the front end renders directly in an `<img>` tag.
pub fn data_uri(mime_type: &str, base64_data: &str) -> String {
    format!("data:{mime_type};base64,{base64_data}")
}
