//! Knatty assistant turn-processing core.
//!
//! One submitted utterance runs through a fixed pipeline:
//! 1. **Classification** (`conversation`) - utterance → `Intent`
//! 2. **Login gate** (`guardrails`) - privileged intents need an authenticated caller
//! 3. **Dispatch** (`llm`, `gemini`) - text or multi-modal generation
//! 4. **Transcript update** (`runtime`) - reply or fallback appended, busy flag cleared
//!
//! `runtime::AssistantSession` owns the transcript and the busy flag for one
//! widget instance. Backend failures never escape a turn; they become fixed
//! fallback messages.

pub mod conversation;
pub mod gemini;
pub mod guardrails;
pub mod llm;
pub mod runtime;
