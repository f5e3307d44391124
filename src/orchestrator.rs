use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    acceptance,
    assembler::{self, Payload, TurnContext, TurnPlan},
    heuristics::Heuristics,
    markup::{self, MarkupOptions, ParsedInput},
    model::{CompletionError, CompletionRequest, ModelProvider},
    session::{SessionError, SessionManager},
    types::{Conversation, TurnReply},
};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("nothing to send")]
    EmptyInput,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnSettings {
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            retry_temperature: 0.5,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    pub short_circuited: bool,
    pub retried: bool,
    pub retry_accepted: bool,
    pub flags: Vec<String>,
}

pub struct ChatOrchestrator {
    model: Arc<dyn ModelProvider>,
    heuristics: Heuristics,
    settings: TurnSettings,
    markup: MarkupOptions,
}

impl ChatOrchestrator {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        heuristics: Heuristics,
        settings: TurnSettings,
        markup: MarkupOptions,
    ) -> Self {
        Self {
            model,
            heuristics,
            settings,
            markup,
        }
    }

    pub fn markup(&self) -> MarkupOptions {
        self.markup
    }

    pub fn parse(&self, raw: &str) -> ParsedInput {
        markup::parse(raw, self.markup)
    }

    /// Plans, sends and checks one turn against a conversation snapshot taken
    /// before the user's message was appended.
    pub async fn run_turn(
        &self,
        conversation: &Conversation,
        input: &ParsedInput,
    ) -> Result<TurnOutcome, CompletionError> {
        let ctx = TurnContext {
            mode: conversation.mode,
            persona: &conversation.persona,
            canon: &conversation.canon,
            history: &conversation.messages,
            input,
            heuristics: &self.heuristics,
        };

        let payload = match assembler::plan_turn(ctx) {
            TurnPlan::ShortCircuit(text) => {
                debug!("directive supplied the reply; skipping model call");
                return Ok(TurnOutcome {
                    text,
                    short_circuited: true,
                    ..TurnOutcome::default()
                });
            }
            TurnPlan::Request(payload) => payload,
        };

        let first = self.request(&payload, self.settings.temperature).await?;
        if input.directives.is_empty() {
            return Ok(TurnOutcome {
                text: first,
                ..TurnOutcome::default()
            });
        }

        let verdict = acceptance::check(&first, &input.directives, &self.heuristics);
        if verdict.accepted() {
            return Ok(TurnOutcome {
                text: first,
                ..TurnOutcome::default()
            });
        }

        let first_flags = verdict.labels();
        info!(flags = ?first_flags, "reply ignored directives; retrying once");

        let strict = payload.with_strict_rule();
        match self.request(&strict, self.settings.retry_temperature).await {
            Ok(second) => {
                let retry_verdict = acceptance::check(&second, &input.directives, &self.heuristics);
                if retry_verdict.accepted() {
                    Ok(TurnOutcome {
                        text: second,
                        retried: true,
                        retry_accepted: true,
                        ..TurnOutcome::default()
                    })
                } else {
                    debug!(flags = ?retry_verdict.labels(), "retry also rejected; keeping first reply");
                    Ok(TurnOutcome {
                        text: first,
                        retried: true,
                        flags: first_flags,
                        ..TurnOutcome::default()
                    })
                }
            }
            Err(error) => {
                warn!(%error, "retry request failed; keeping first reply");
                Ok(TurnOutcome {
                    text: first,
                    retried: true,
                    flags: first_flags,
                    ..TurnOutcome::default()
                })
            }
        }
    }

    pub async fn submit(
        &self,
        sessions: &mut SessionManager,
        raw: &str,
    ) -> Result<TurnReply, TurnError> {
        let input = self.parse(raw);
        if input.cleaned.is_empty() && !input.has_hidden_content() {
            return Err(TurnError::EmptyInput);
        }
        let name = sessions.active_name().to_owned();
        let before = sessions.append_user_turn(&name, &input)?;
        let (outcome, elapsed_ms) = self.timed_turn(&name, &before, &input).await?;
        sessions.record_reply(&name, &outcome.text)?;
        Ok(turn_reply(name, input, outcome, elapsed_ms))
    }

    /// Replaces the reply to the last user turn with a fresh one. Nothing is
    /// stored unless the new reply arrives.
    pub async fn regenerate(&self, sessions: &mut SessionManager) -> Result<TurnReply, TurnError> {
        let name = sessions.active_name().to_owned();
        let (before, input) = sessions.regenerate_snapshot(&name, self.markup)?;
        let (outcome, elapsed_ms) = self.timed_turn(&name, &before, &input).await?;
        sessions.replace_reply(&name, before.messages.len(), &outcome.text)?;
        Ok(turn_reply(name, input, outcome, elapsed_ms))
    }

    /// Rewrites an earlier user message, drops what followed it and resends.
    /// History is only rewritten once the new reply arrives.
    pub async fn edit_and_resend(
        &self,
        sessions: &mut SessionManager,
        index: usize,
        raw: &str,
    ) -> Result<TurnReply, TurnError> {
        let input = self.parse(raw);
        if input.cleaned.is_empty() && !input.has_hidden_content() {
            return Err(TurnError::EmptyInput);
        }
        let name = sessions.active_name().to_owned();
        let before = sessions.edit_snapshot(&name, index)?;
        let (outcome, elapsed_ms) = self.timed_turn(&name, &before, &input).await?;
        sessions.replace_user_turn(&name, index, &input, &outcome.text)?;
        Ok(turn_reply(name, input, outcome, elapsed_ms))
    }

    async fn timed_turn(
        &self,
        name: &str,
        before: &Conversation,
        input: &ParsedInput,
    ) -> Result<(TurnOutcome, u64), TurnError> {
        let started = Instant::now();
        let outcome = match self.run_turn(before, input).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(conversation = %name, %error, "turn failed");
                return Err(error.into());
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            conversation = %name,
            directives = input.directives.len(),
            short_circuited = outcome.short_circuited,
            retried = outcome.retried,
            elapsed_ms,
            "turn complete"
        );
        Ok((outcome, elapsed_ms))
    }

    async fn request(&self, payload: &Payload, temperature: f32) -> Result<String, CompletionError> {
        self.model
            .complete(CompletionRequest {
                messages: payload.messages.clone(),
                temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await
    }
}

fn turn_reply(name: String, input: ParsedInput, outcome: TurnOutcome, elapsed_ms: u64) -> TurnReply {
    TurnReply {
        conversation: name,
        text: outcome.text,
        directives: input.directives,
        short_circuited: outcome.short_circuited,
        retried: outcome.retried,
        retry_accepted: outcome.retry_accepted,
        compliance_flags: outcome.flags,
        elapsed_ms,
    }
}

/// Holds typed input between passes of an input loop. A pass that follows a
/// reply drops whatever is pending instead of sending it twice.
#[derive(Debug, Default)]
pub struct TurnGate {
    pending: Option<String>,
    just_responded: bool,
}

impl TurnGate {
    pub fn submit(&mut self, input: impl Into<String>) {
        self.pending = Some(input.into());
    }

    /// Called once per pass. Clears the responded flag unconditionally.
    pub fn take_for_pass(&mut self) -> Option<String> {
        if std::mem::take(&mut self.just_responded) {
            self.pending = None;
            return None;
        }
        self.pending.take()
    }

    pub fn mark_responded(&mut self) {
        self.just_responded = true;
    }
}
