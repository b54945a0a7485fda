use std::sync::Arc;

use knatty_core::{Message, Transcript};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::conversation::{Intent, IntentClassifier};
use crate::guardrails::{authorize, GuardrailDecision};
use crate::llm::{GenerationBackends, ImageOutcome, TextOutcome};

pub const ABOUT_US_INFO: &str = concat!(
    "\nKnowy, ABC Condo is a vibrant community located in the heart of the city. ",
    "Our mission is to foster connections, provide helpful resources, ",
    "and keep all residents informed and engaged. \n",
    "We value inclusivity, safety, and a warm welcome for all newcomers. ",
    "Knatty, was a friendly chatbot powered by Gemini to provide better user experience 😊\n",
);
pub const ABOUT_US_PREFIX: &str = "Here's some information about us:\n\n";
pub const IMAGE_CAPTION_PREFIX: &str = "Here is your generated image, ";
pub const NO_IMAGE_PRODUCED: &str = "Sorry, I couldn't generate an image for your request.";
pub const IMAGE_FAILURE_FALLBACK: &str =
    "Sorry, I couldn't generate the image. Please try again later.";
pub const TEXT_FAILURE_FALLBACK: &str =
    "Sorry, I couldn't process your request. Please try again later.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyUtterance,
    Busy,
    WidgetClosed,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyUtterance => "empty_utterance",
            Self::Busy => "busy",
            Self::WidgetClosed => "widget_closed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Ignored(IgnoreReason),
    Completed { intent: Intent, reply: Message },
    /// The widget was closed or reopened while the backend call was in flight.
    Discarded { intent: Intent },
}

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    busy: bool,
    generation: u64,
    transcript: Transcript,
}

/// One assistant widget instance: transcript, busy flag and backend handle.
///
/// The state lock is never held across a backend call. `busy` alone keeps a
/// second turn out while one is in flight.
pub struct AssistantSession {
    backends: GenerationBackends,
    classifier: IntentClassifier,
    state: Arc<Mutex<SessionState>>,
}

/// Everything a dispatched turn needs once it no longer borrows the session.
struct Turn {
    generation: u64,
    intent: Intent,
    gate: Intent,
    utterance: String,
    authenticated: bool,
}

impl AssistantSession {
    pub fn new(backends: GenerationBackends) -> Self {
        Self {
            backends,
            classifier: IntentClassifier::new(),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Opens the widget. A closed widget gets a freshly seeded transcript; an
    /// already open one is left untouched.
    pub async fn open_widget(&self) {
        let mut state = self.state.lock().await;
        if state.open {
            return;
        }
        state.open = true;
        state.busy = false;
        state.generation += 1;
        state.transcript = Transcript::seeded();
        debug!(event_name = "assistant.widget.opened", generation = state.generation);
    }

    /// Closes the widget and drops its transcript. A turn still in flight
    /// will find its generation stale and discard its result.
    pub async fn close_widget(&self) {
        let mut state = self.state.lock().await;
        state.open = false;
        state.busy = false;
        state.generation += 1;
        state.transcript = Transcript::new();
        debug!(event_name = "assistant.widget.closed", generation = state.generation);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.state.lock().await.transcript.snapshot()
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Runs one turn. Once admitted, the turn is dispatched onto its own task:
    /// dropping the returned future does not cancel the backend call, and the
    /// busy flag is still cleared when the reply lands.
    pub async fn submit(&self, utterance: &str, authenticated: bool) -> TurnOutcome {
        let utterance = utterance.trim();
        let generation = match self.begin_turn(utterance).await {
            Ok(generation) => generation,
            Err(reason) => {
                debug!(
                    event_name = "assistant.turn.ignored",
                    reason = reason.as_str(),
                    "submission ignored"
                );
                return TurnOutcome::Ignored(reason);
            }
        };

        let intent = self.classifier.classify(utterance);
        let turn = Turn {
            generation,
            intent,
            gate: self.gate_intent(intent, utterance, authenticated),
            utterance: utterance.to_owned(),
            authenticated,
        };

        let backends = self.backends.clone();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let reply = respond(&backends, &turn).await;
            finish_turn(&state, turn.generation, intent, authenticated, reply).await
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(
                    event_name = "assistant.turn.aborted",
                    intent = intent.as_str(),
                    error = %join_error,
                    "turn task ended without a reply"
                );
                let reply = Message::assistant(TEXT_FAILURE_FALLBACK);
                finish_turn(&self.state, generation, intent, authenticated, reply).await
            }
        }
    }

    async fn begin_turn(&self, utterance: &str) -> Result<u64, IgnoreReason> {
        if utterance.is_empty() {
            return Err(IgnoreReason::EmptyUtterance);
        }

        let mut state = self.state.lock().await;
        if !state.open {
            return Err(IgnoreReason::WidgetClosed);
        }
        if state.busy {
            return Err(IgnoreReason::Busy);
        }

        state.busy = true;
        state.transcript.append(Message::user(utterance));
        Ok(state.generation)
    }

    /// The post-content login check runs before the image one, so an
    /// unauthenticated utterance mentioning both gets the post-content denial.
    fn gate_intent(&self, intent: Intent, utterance: &str, authenticated: bool) -> Intent {
        if !authenticated
            && intent == Intent::ImageRequest
            && self.classifier.matches(Intent::ContentRequest, utterance)
        {
            Intent::ContentRequest
        } else {
            intent
        }
    }
}

async fn respond(backends: &GenerationBackends, turn: &Turn) -> Message {
    if turn.intent == Intent::AboutUs {
        return Message::assistant(format!("{ABOUT_US_PREFIX}{ABOUT_US_INFO}"));
    }

    if let GuardrailDecision::Deny { reason_code, user_message } =
        authorize(turn.gate, turn.authenticated)
    {
        debug!(event_name = "assistant.turn.denied", reason_code, "login required");
        return Message::login_prompt(user_message);
    }

    match turn.intent {
        Intent::ImageRequest => match backends.generate_image(&turn.utterance).await {
            ImageOutcome::Generated { caption, image_url } => {
                Message::assistant_image(format!("{IMAGE_CAPTION_PREFIX}{caption}"), image_url)
            }
            ImageOutcome::NoImageProduced => Message::assistant(NO_IMAGE_PRODUCED),
            ImageOutcome::Failed => Message::assistant(IMAGE_FAILURE_FALLBACK),
        },
        // Authorized content requests get no special prompting.
        Intent::ContentRequest | Intent::Generic | Intent::AboutUs => {
            match backends.generate_text(&turn.utterance).await {
                TextOutcome::Generated(text) => Message::assistant(text),
                TextOutcome::Failed => Message::assistant(TEXT_FAILURE_FALLBACK),
            }
        }
    }
}

async fn finish_turn(
    state: &Mutex<SessionState>,
    generation: u64,
    intent: Intent,
    authenticated: bool,
    reply: Message,
) -> TurnOutcome {
    let mut state = state.lock().await;
    if state.generation != generation {
        info!(
            event_name = "assistant.turn.discarded",
            intent = intent.as_str(),
            "dropping reply for a transcript that no longer exists"
        );
        return TurnOutcome::Discarded { intent };
    }

    state.transcript.append(reply.clone());
    state.busy = false;
    info!(
        event_name = "assistant.turn.completed",
        intent = intent.as_str(),
        authenticated,
        login_prompt = reply.has_login_prompt(),
        has_image = reply.image_url().is_some(),
        "assistant turn completed"
    );

    TurnOutcome::Completed { intent, reply }
}
