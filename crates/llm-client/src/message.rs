//! Conversation types shared by the dispatcher and providers

use bytes::Bytes;
use serde::Deserialize;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Broad attachment category; decides the provider content-part shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Document,
}

/// Uploaded file forwarded to the provider as-is.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub name: Option<String>,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            mime_type: mime_type.into(),
            name: None,
            data: data.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One piece of a turn's content.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    Attachment(Attachment),
}

/// A prior message in the conversation.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Concatenated text parts; attachments are skipped.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Attachment(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The new user message: text plus optional attachments.
#[derive(Debug, Clone)]
pub struct Payload {
    text: String,
    attachments: Vec<Attachment>,
}

impl Payload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Content parts in wire order: text first, then attachments.
    pub fn parts(&self) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(1 + self.attachments.len());
        parts.push(ContentPart::Text(self.text.clone()));
        parts.extend(self.attachments.iter().cloned().map(ContentPart::Attachment));
        parts
    }

    /// Text-only turn for the transcript.
    pub fn to_history_turn(&self) -> Turn {
        Turn::user(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_and_kind_names_are_lowercase() {
        assert_eq!(Role::Assistant.as_str(), "assistant");
        let kind: AttachmentKind = serde_json::from_str("\"document\"").unwrap();
        assert_eq!(kind, AttachmentKind::Document);
    }

    #[test]
    fn turn_text_skips_attachments() {
        let turn = Turn {
            role: Role::User,
            parts: vec![
                ContentPart::Text("what is in".into()),
                ContentPart::Attachment(Attachment::new(
                    AttachmentKind::Image,
                    "image/png",
                    vec![1u8, 2, 3],
                )),
                ContentPart::Text("this picture?".into()),
            ],
        };
        assert_eq!(turn.text(), "what is in\nthis picture?");
    }

    #[test]
    fn payload_parts_put_text_first() {
        let payload = Payload::new("summarize").with_attachments(vec![
            Attachment::new(AttachmentKind::Document, "application/pdf", vec![0u8; 4])
                .with_name("notes.pdf"),
        ]);
        let parts = payload.parts();
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ContentPart::Text(t) if t == "summarize"));
        assert!(matches!(&parts[1], ContentPart::Attachment(a) if a.name.as_deref() == Some("notes.pdf")));
    }

    #[test]
    fn history_turn_drops_attachments() {
        let payload = Payload::new("transcribe").with_attachments(vec![Attachment::new(
            AttachmentKind::Audio,
            "audio/wav",
            vec![0u8; 8],
        )]);
        let turn = payload.to_history_turn();
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.parts.len(), 1);
        assert_eq!(turn.text(), "transcribe");
    }
}
