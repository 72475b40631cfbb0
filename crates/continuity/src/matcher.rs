//! The session continuity matcher.
//!
//! Clients of an OpenAI-style API resend the whole history on every turn.
//! The remote service, on the other hand, keeps its own session state. The
//! matcher bridges the two: when the history minus the newest user turn is a
//! conversation it has stored, it resumes that remote session on the member
//! that owns it and sends only the new turn. Otherwise it opens a fresh
//! session and sends the whole history as one tagged prompt.

use gemrelay_core::{
    ChatSession, Error, Message, ModelOutput, Result, Role, SessionMetadata, StoredConversation,
};
use gemrelay_pool::{ClientPool, PoolMember};
use gemrelay_store::{ConversationStore, sanitize};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attachments::Materializer;
use crate::output::extract_output;
use crate::prompt::{RenderedInput, render_conversation, render_message};

/// Whether a history can continue a stored session.
///
/// It needs at least two messages, a non-empty trailing user message, and an
/// assistant or system message right before it.
pub fn is_reusable(messages: &[Message]) -> bool {
    let [.., previous, last] = messages else {
        return false;
    };
    last.role == Role::User
        && !last.content.is_empty()
        && matches!(previous.role, Role::Assistant | Role::System)
}

/// The result of one request/response round with the remote model.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Raw answer from the remote session
    pub output: ModelOutput,
    /// Answer formatted for the client, reasoning included
    pub display_text: String,
    /// Exact prompt text sent to the remote session
    pub model_input: String,
    /// Pool member that served the request
    pub client_id: String,
    /// True when a stored session was resumed
    pub resumed: bool,
    /// Store key of the persisted conversation, if persisting succeeded
    pub key: Option<String>,
}

pub struct ContinuityMatcher {
    pool: Arc<ClientPool>,
    store: Arc<ConversationStore>,
    materializer: Materializer,
}

impl ContinuityMatcher {
    pub fn new(
        pool: Arc<ClientPool>,
        store: Arc<ConversationStore>,
        materializer: Materializer,
    ) -> Self {
        Self {
            pool,
            store,
            materializer,
        }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Run one exchange for `messages`, writing attachments under `scratch`.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        scratch: &Path,
    ) -> Result<Exchange> {
        let Some(last) = messages.last() else {
            return Err(Error::Input(
                "At least one message is required in the conversation.".into(),
            ));
        };

        let resumed = match self.find_resumable(model, messages).await {
            Some((member, session)) => {
                let input =
                    render_message(last, &self.materializer, scratch, false).await?;
                debug!(
                    client = %member.id(),
                    metadata = ?session.metadata(),
                    "Found reusable session"
                );
                Some((member, session, input))
            }
            None => None,
        };

        let (member, mut session, input, was_resumed) = match resumed {
            Some((member, session, input)) => (member, session, input, true),
            None => {
                let input = render_conversation(messages, &self.materializer, scratch).await?;
                let member = self.pool.acquire(None)?;
                let session = member.start_chat(None, model).await?;
                debug!(client = %member.id(), "New session started");
                (member, session, input, false)
            }
        };

        let RenderedInput { text, files } = input;
        debug!(
            client = %member.id(),
            input_len = text.len(),
            files = files.len(),
            "Sending prompt"
        );
        let output = session.send_message(&text, &files).await?;

        // No await between the answer and the write: a cancelled request
        // still records the exchange.
        let key = self.persist(model, messages, member.id(), session.metadata(), &output);

        Ok(Exchange {
            display_text: extract_output(&output, true),
            output,
            model_input: text,
            client_id: member.id().to_string(),
            resumed: was_resumed,
            key,
        })
    }

    /// Look up the stored session for everything but the pending user turn
    /// and reopen it. Any failure here just means a fresh session.
    async fn find_resumable(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Option<(Arc<PoolMember>, Box<dyn ChatSession>)> {
        if !is_reusable(messages) {
            return None;
        }

        let history = &messages[..messages.len() - 1];
        let previous = self.store.find(model, history)?;

        match self.resume(&previous, model).await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!(
                    client = %previous.client_id,
                    error = %e,
                    "Error resuming stored session, starting a new one"
                );
                None
            }
        }
    }

    async fn resume(
        &self,
        previous: &StoredConversation,
        model: &str,
    ) -> Result<(Arc<PoolMember>, Box<dyn ChatSession>)> {
        let member = self.pool.acquire(Some(&previous.client_id))?;
        let session = member
            .start_chat(Some(previous.metadata.clone()), model)
            .await?;
        Ok((member, session))
    }

    fn persist(
        &self,
        model: &str,
        messages: &[Message],
        client_id: &str,
        metadata: SessionMetadata,
        output: &ModelOutput,
    ) -> Option<String> {
        let mut history: Vec<Message> = sanitize(messages).into_iter().map(Cow::into_owned).collect();
        history.push(Message::assistant(extract_output(output, false)));

        let conversation = StoredConversation::new(model, client_id, metadata, history);
        match self.store.put(conversation, None) {
            Ok(key) => {
                debug!(key = %key, "Conversation saved");
                Some(key)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save conversation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gemrelay_core::{ConnectOptions, Credentials, RemoteBackend, RemoteError};
    use gemrelay_store::{StoreOptions, fingerprint};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        client: String,
        metadata: Option<SessionMetadata>,
        model: String,
        prompt: String,
    }

    /// Backend that records every prompt and answers with a fixed reply.
    struct ScriptedBackend {
        client: String,
        reply: ModelOutput,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    struct ScriptedSession {
        sent: Arc<Mutex<Vec<Sent>>>,
        client: String,
        metadata: Option<SessionMetadata>,
        model: String,
        reply: ModelOutput,
    }

    #[async_trait]
    impl ChatSession for ScriptedSession {
        fn metadata(&self) -> SessionMetadata {
            self.metadata.clone().unwrap_or_default()
        }

        async fn send_message(
            &mut self,
            prompt: &str,
            _files: &[PathBuf],
        ) -> std::result::Result<ModelOutput, RemoteError> {
            self.sent.lock().unwrap().push(Sent {
                client: self.client.clone(),
                metadata: self.metadata.clone(),
                model: self.model.clone(),
                prompt: prompt.to_string(),
            });
            self.metadata = Some(self.reply.metadata.clone());
            Ok(self.reply.clone())
        }
    }

    #[async_trait]
    impl RemoteBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(
            &self,
            _credentials: &Credentials,
            _options: &ConnectOptions,
        ) -> std::result::Result<(), RemoteError> {
            Ok(())
        }

        async fn start_chat(
            &self,
            metadata: Option<SessionMetadata>,
            model: &str,
        ) -> std::result::Result<Box<dyn ChatSession>, RemoteError> {
            Ok(Box::new(ScriptedSession {
                sent: Arc::clone(&self.sent),
                client: self.client.clone(),
                metadata,
                model: model.to_string(),
                reply: self.reply.clone(),
            }))
        }
    }

    struct Harness {
        _dir: TempDir,
        scratch: TempDir,
        store: Arc<ConversationStore>,
        sent: Arc<Mutex<Vec<Sent>>>,
        matcher: ContinuityMatcher,
    }

    async fn harness(ids: &[&str]) -> Harness {
        let dir = TempDir::new().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let reply = ModelOutput {
            text: "I'm fine".into(),
            thoughts: Some("consider mood".into()),
            metadata: vec![Some("next".into())],
        };

        let members = ids
            .iter()
            .map(|id| {
                PoolMember::new(
                    *id,
                    Credentials {
                        secure_1psid: "p".into(),
                        secure_1psidts: "t".into(),
                    },
                    ConnectOptions::default(),
                    Arc::new(ScriptedBackend {
                        client: id.to_string(),
                        reply: reply.clone(),
                        sent: Arc::clone(&sent),
                    }),
                )
            })
            .collect();
        let pool = Arc::new(ClientPool::new(members).unwrap());
        pool.init().await.unwrap();

        let store = Arc::new(
            ConversationStore::open(
                StoreOptions {
                    path: dir.path().join("db"),
                    max_size: 64 * 1024 * 1024,
                },
                pool.ids(),
            )
            .unwrap(),
        );

        Harness {
            matcher: ContinuityMatcher::new(pool, Arc::clone(&store), Materializer::default()),
            _dir: dir,
            scratch: TempDir::new().unwrap(),
            store,
            sent,
        }
    }

    #[test]
    fn eligibility_requires_trailing_user_after_assistant_or_system() {
        let reusable = [
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ];
        assert!(is_reusable(&reusable));
        assert!(is_reusable(&[Message::system("rules"), Message::user("go")]));

        assert!(!is_reusable(&[Message::user("a"), Message::user("b")]));
        assert!(!is_reusable(&[Message::user("only")]));
        assert!(!is_reusable(&[]));
        assert!(!is_reusable(&[Message::assistant("hello"), Message::user("")]));
        assert!(!is_reusable(&[Message::user("hi"), Message::assistant("hello")]));
    }

    #[tokio::test]
    async fn stored_history_resumes_owning_session() {
        let h = harness(&["c0", "c1"]).await;
        h.store
            .put(
                StoredConversation::new(
                    "gemini-2.0",
                    "c1",
                    vec![Some("abc".into())],
                    vec![Message::user("hi"), Message::assistant("hello")],
                ),
                None,
            )
            .unwrap();

        let messages = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ];
        let exchange = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await
            .unwrap();

        assert!(exchange.resumed);
        assert_eq!(exchange.client_id, "c1");
        let sent = h.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![Sent {
                client: "c1".into(),
                metadata: Some(vec![Some("abc".into())]),
                model: "gemini-2.0".into(),
                prompt: "how are you?".into(),
            }]
        );
    }

    #[tokio::test]
    async fn unknown_history_starts_fresh_session_and_persists() {
        let h = harness(&["c0", "c1"]).await;
        let messages = vec![Message::user("hi")];

        let exchange = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await
            .unwrap();

        assert!(!exchange.resumed);
        assert_eq!(exchange.client_id, "c0");
        assert_eq!(
            exchange.model_input,
            "<|im_start|>user\nhi\n<|im_end|>\n<|im_start|>assistant\n"
        );
        assert_eq!(exchange.display_text, "<think>consider mood</think>\nI'm fine");

        let expected_history = vec![Message::user("hi"), Message::assistant("I'm fine")];
        let key = exchange.key.unwrap();
        assert_eq!(
            key,
            fingerprint("c0", "gemini-2.0", &expected_history).to_string()
        );
        let stored = h.store.get(&key).unwrap();
        assert_eq!(stored.messages, expected_history);
        assert_eq!(stored.metadata, vec![Some("next".to_string())]);
    }

    #[tokio::test]
    async fn second_turn_continues_first_turn() {
        let h = harness(&["c0", "c1"]).await;
        let first = h
            .matcher
            .complete("gemini-2.0", &[Message::user("hi")], h.scratch.path())
            .await
            .unwrap();

        // The client echoes the answer back with reasoning included.
        let messages = vec![
            Message::user("hi"),
            Message::assistant(first.display_text.clone()),
            Message::user("and then?"),
        ];
        let second = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await
            .unwrap();

        assert!(second.resumed);
        assert_eq!(second.client_id, first.client_id);
        let sent = h.sent.lock().unwrap().clone();
        assert_eq!(sent[1].prompt, "and then?");
        assert_eq!(sent[1].metadata, Some(vec![Some("next".to_string())]));
    }

    #[tokio::test]
    async fn dead_owner_falls_back_to_fresh_session() {
        let h = harness(&["c0", "c1"]).await;
        h.store
            .put(
                StoredConversation::new(
                    "gemini-2.0",
                    "c1",
                    vec![Some("abc".into())],
                    vec![Message::user("hi"), Message::assistant("hello")],
                ),
                None,
            )
            .unwrap();
        h.matcher.pool().members()[1].mark_down();

        let messages = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ];
        let exchange = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await
            .unwrap();

        assert!(!exchange.resumed);
        assert_eq!(exchange.client_id, "c0");
        let sent = h.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].metadata, None);
        assert!(sent[0].prompt.starts_with("<|im_start|>user\nhi\n<|im_end|>\n"));
        assert!(sent[0].prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[tokio::test]
    async fn unconfigured_owner_falls_back_to_fresh_session() {
        let h = harness(&["c0"]).await;
        let messages = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ];
        // Written under a member id the pool does not know about.
        let history = messages[..2].to_vec();
        h.store
            .put(
                StoredConversation::new("gemini-2.0", "retired", vec![], history),
                Some(&fingerprint("c0", "gemini-2.0", &messages[..2]).to_string()),
            )
            .unwrap();

        let exchange = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await
            .unwrap();
        assert!(!exchange.resumed);
        assert_eq!(exchange.client_id, "c0");
    }

    #[tokio::test]
    async fn empty_history_is_input_error() {
        let h = harness(&["c0"]).await;
        let result = h.matcher.complete("gemini-2.0", &[], h.scratch.path()).await;
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[tokio::test]
    async fn bad_attachment_rejects_request_before_sending() {
        let h = harness(&["c0"]).await;
        let mut part = gemrelay_core::ContentPart::image_url("x");
        part.image_url = None;
        let messages = vec![Message::user(gemrelay_core::MessageContent::Parts(vec![part]))];

        let result = h
            .matcher
            .complete("gemini-2.0", &messages, h.scratch.path())
            .await;
        assert!(matches!(
            result,
            Err(Error::Attachment(gemrelay_core::AttachmentError::Rejected(_)))
        ));
        assert!(h.sent.lock().unwrap().is_empty());
    }
}
