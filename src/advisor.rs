// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Conversational advisor over the collection

use tracing::{debug, error};

use crate::collection::collection_summary;
use crate::gemini::{AnalysisClient, ChatSession};
use crate::model::{ChatMessage, ChatRole, Stamp};

pub const WELCOME_MESSAGE: &str = "Willkommen im Advisory Center. Ich habe Ihr aktuelles Portfolio gesichtet. \
    Wie kann ich Sie heute bei Ihrer philatelistischen Arbeit unterstützen?";
pub const EMPTY_REPLY: &str = "Entschuldigung, ich konnte keine Antwort generieren.";
pub const FAILURE_REPLY: &str = "Ein technischer Fehler ist aufgetreten. Bitte prüfen Sie Ihre Verbindung.";

/// An open advisor conversation with its transcript
pub struct Advisor {
    session: Box<dyn ChatSession>,
    transcript: Vec<ChatMessage>,
}

impl Advisor {
    /// Start a conversation about `stamps`
    pub fn open(client: &dyn AnalysisClient, stamps: &[Stamp]) -> Self {
        let summary = collection_summary(stamps);
        debug!("Opening advisor session over {} stamps", stamps.len());
        Self {
            session: client.converse(&summary),
            transcript: vec![ChatMessage {
                role: ChatRole::Model,
                text: WELCOME_MESSAGE.to_string(),
            }],
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Send one user turn and return the reply.
    ///
    /// Blank input is ignored (`None`). Service failures become a visible
    /// apology in the transcript; the conversation stays usable.
    pub async fn ask(&mut self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.transcript.push(ChatMessage {
            role: ChatRole::User,
            text: text.to_string(),
        });

        let reply = match self.session.send(text).await {
            Ok(reply) if reply.trim().is_empty() => EMPTY_REPLY.to_string(),
            Ok(reply) => reply,
            Err(e) => {
                error!("Advisor turn failed: {}", e);
                FAILURE_REPLY.to_string()
            }
        };

        self.transcript.push(ChatMessage {
            role: ChatRole::Model,
            text: reply.clone(),
        });
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::imaging::ImagePayload;
    use crate::model::StampDraft;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct EchoClient {
        replies: Arc<Mutex<VecDeque<std::result::Result<String, AnalysisError>>>>,
        summaries: Arc<Mutex<Vec<String>>>,
    }

    struct EchoSession {
        replies: Arc<Mutex<VecDeque<std::result::Result<String, AnalysisError>>>>,
    }

    #[async_trait]
    impl ChatSession for EchoSession {
        async fn send(&mut self, text: &str) -> std::result::Result<String, AnalysisError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("echo: {}", text)))
        }
    }

    #[async_trait]
    impl AnalysisClient for EchoClient {
        async fn identify(&self, _image: &ImagePayload, _hints: &str) -> std::result::Result<StampDraft, AnalysisError> {
            Err(AnalysisError::AnalysisFailed("not used".into()))
        }

        fn converse(&self, collection_summary: &str) -> Box<dyn ChatSession> {
            self.summaries.lock().unwrap().push(collection_summary.to_string());
            Box::new(EchoSession { replies: self.replies.clone() })
        }
    }

    fn client(replies: Vec<std::result::Result<String, AnalysisError>>) -> EchoClient {
        EchoClient {
            replies: Arc::new(Mutex::new(replies.into())),
            summaries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[tokio::test]
    async fn test_session_seeded_with_summary() {
        let client = client(vec![]);
        let draft = StampDraft { name: Some("Penny Black".into()), ..Default::default() };
        let stamps = vec![Stamp::from_draft(&draft, String::new(), "Master Archiv")];

        let mut advisor = Advisor::open(&client, &stamps);
        assert_eq!(advisor.transcript().len(), 1);
        assert!(client.summaries.lock().unwrap()[0].contains("Penny Black"));

        let reply = advisor.ask("Wie lagere ich sie?").await;
        assert_eq!(reply.as_deref(), Some("echo: Wie lagere ich sie?"));
        assert_eq!(advisor.transcript().len(), 3);
        assert_eq!(advisor.transcript()[1].role, ChatRole::User);
    }

    #[tokio::test]
    async fn test_blank_input_ignored() {
        let client = client(vec![]);
        let mut advisor = Advisor::open(&client, &[]);
        assert_eq!(advisor.ask("   ").await, None);
        assert_eq!(advisor.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_and_failed_replies() {
        let client = client(vec![Ok("  ".into()), Err(AnalysisError::QuotaExhausted), Ok("fine".into())]);
        let mut advisor = Advisor::open(&client, &[]);

        assert_eq!(advisor.ask("a").await.as_deref(), Some(EMPTY_REPLY));
        assert_eq!(advisor.ask("b").await.as_deref(), Some(FAILURE_REPLY));
        assert_eq!(advisor.ask("c").await.as_deref(), Some("fine"));
        assert_eq!(advisor.transcript().len(), 7);
    }
}
