//! `/v1/models` and `/v1/chat/completions`.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use gemrelay_core::{Message, Role};
use std::convert::Infallible;
use tracing::{debug, error, info};

use crate::SharedState;
use crate::error::ApiError;
use crate::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    Delta, ModelData, ModelListResponse, Usage,
};

/// Characters per streamed content frame.
const STREAM_CHUNK_CHARS: usize = 32;

/// Rough token count: one token per three characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 3
}

pub(crate) async fn list_models(State(state): State<SharedState>) -> Json<ModelListResponse> {
    let created = Utc::now().timestamp();
    let data = state
        .config
        .remote
        .models
        .iter()
        .map(|id| ModelData {
            id: id.clone(),
            object: "model".into(),
            created,
            owned_by: "gemini-web".into(),
        })
        .collect();

    Json(ModelListResponse {
        object: "list".into(),
        data,
    })
}

pub(crate) async fn create_chat_completion(
    State(state): State<SharedState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    if !state.config.remote.supports_model(&request.model) {
        return Err(ApiError::bad_request(format!(
            "Unknown model: {}",
            request.model
        )));
    }
    if request.messages.is_empty() {
        return Err(ApiError::bad_request(
            "At least one message is required in the conversation.",
        ));
    }

    info!(
        model = %request.model,
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion request"
    );

    // Attachments live only as long as this request.
    let scratch = tempfile::tempdir()
        .map_err(|e| ApiError::internal(format!("Failed to create scratch directory: {e}")))?;

    let exchange = state
        .matcher
        .complete(&request.model, &request.messages, scratch.path())
        .await
        .map_err(|e| {
            error!(error = %e, "Error generating content from remote model");
            ApiError::from(e)
        })?;

    debug!(
        client = %exchange.client_id,
        resumed = exchange.resumed,
        key = ?exchange.key,
        "Exchange complete"
    );

    let completion_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = Utc::now().timestamp();

    if request.stream {
        let frames = stream_frames(&exchange.display_text, &completion_id, created, &request.model);
        let events = frames.into_iter().map(Ok::<_, Infallible>);
        Ok(Sse::new(futures::stream::iter(events)).into_response())
    } else {
        let response = standard_response(
            &exchange.display_text,
            &exchange.model_input,
            completion_id,
            created,
            request.model,
        );
        Ok(Json(response).into_response())
    }
}

fn standard_response(
    output: &str,
    model_input: &str,
    id: String,
    created: i64,
    model: String,
) -> ChatCompletionResponse {
    let prompt_tokens = estimate_tokens(model_input);
    let completion_tokens = estimate_tokens(output);
    let usage = Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    };
    debug!(total_tokens = usage.total_tokens, "Response created");

    ChatCompletionResponse {
        id,
        object: "chat.completion".into(),
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(output),
            finish_reason: "stop".into(),
        }],
        usage,
    }
}

/// Split `text` into `STREAM_CHUNK_CHARS`-character pieces.
fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(STREAM_CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// The full SSE sequence for an already computed answer: a role frame,
/// content frames, a stop frame and the `[DONE]` sentinel.
fn stream_frames(text: &str, id: &str, created: i64, model: &str) -> Vec<SseEvent> {
    let frame = |delta: Delta, finish_reason: Option<&str>| {
        let chunk = ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".into(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(Into::into),
            }],
        };
        let data = serde_json::to_string(&chunk).unwrap_or_default();
        SseEvent::default().data(data)
    };

    let mut frames = vec![frame(
        Delta {
            role: Some(Role::Assistant),
            content: None,
        },
        None,
    )];
    frames.extend(chunk_text(text).into_iter().map(|content| {
        frame(
            Delta {
                role: None,
                content: Some(content),
            },
            None,
        )
    }));
    frames.push(frame(Delta::default(), Some("stop")));
    frames.push(SseEvent::default().data("[DONE]"));
    frames
}
