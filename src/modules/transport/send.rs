// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use mail_send::mail_builder::headers::address::Address;
use mail_send::mail_builder::headers::raw::Raw;
use mail_send::mail_builder::MessageBuilder;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

use crate::modules::campaign::entity::MailAttachment;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RustBulkResult;
use crate::modules::sender::Sender;
use crate::modules::transport::MailTransport;
use crate::raise_error;

/// Plain-text fallback injected when a message carries only HTML.
const HTML_ONLY_FALLBACK: &str = "This email contains HTML content.";

/// Headers that define the MIME structure of the message we build;
/// custom values for these would corrupt the body and are dropped.
const STRUCTURAL_HEADERS: &[&str] = &["content-type", "mime-version", "content-transfer-encoding"];

/// Headers owned by the campaign fields in ordinary mode.
const AUTHORITATIVE_HEADERS: &[&str] = &["from", "to", "subject"];

/// Fully pre-rendered content of one outgoing message.
#[derive(Clone, Debug, Default)]
pub struct OutgoingMessage {
    pub recipient: String,
    pub subject: String,
    pub body_html: String,
    pub body_plain: String,
    pub from_name: Option<String>,
    pub custom_headers: AHashMap<String, String>,
    pub attachments: Vec<MailAttachment>,
}

/// One sending identity bound to a transport handle.
///
/// Constructed once per sender batch and reused for every task in it,
/// so the credential is decrypted a single time per batch.
pub struct DelegatedSender {
    transport: Arc<dyn MailTransport>,
    credential: String,
    principal: String,
}

impl DelegatedSender {
    pub fn new(transport: Arc<dyn MailTransport>, sender: &Sender) -> Self {
        Self {
            transport,
            credential: sender.credential.clone(),
            principal: sender.principal_email.clone(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub async fn is_mail_enabled(&self) -> RustBulkResult<bool> {
        self.transport
            .is_mail_enabled(&self.credential, &self.principal)
            .await
    }

    /// Ordinary path: build From/To/Subject and MIME structure from the
    /// message fields, then hand the raw bytes to the transport.
    pub async fn send_email(&self, message: &OutgoingMessage) -> RustBulkResult<String> {
        let mut builder = MessageBuilder::new()
            .from(Address::new_address(
                message.from_name.clone().map(Cow::Owned),
                Cow::Owned(self.principal.clone()),
            ))
            .to(message.recipient.clone())
            .subject(message.subject.clone());

        builder = Self::apply_bodies(builder, message);
        builder = Self::apply_custom_headers(builder, &message.custom_headers);
        builder = Self::apply_attachments(builder, &message.attachments)?;

        self.transmit(message, builder).await
    }

    /// Full-custom path: the rendered header block is placed verbatim,
    /// names normalized to canonical case, with a guaranteed `To`.
    pub async fn send_with_custom_headers(
        &self,
        message: &OutgoingMessage,
        header_block: &str,
    ) -> RustBulkResult<String> {
        let mut headers = parse_header_block(header_block);
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("to"))
        {
            headers.push(("To".to_string(), message.recipient.clone()));
        }

        let mut builder = MessageBuilder::new();
        for (name, value) in headers {
            if STRUCTURAL_HEADERS.contains(&name.to_lowercase().as_str()) {
                warn!(header = name, "Dropping structural header from custom block");
                continue;
            }
            builder = builder.header(name, Raw::new(Cow::Owned(value)));
        }

        builder = Self::apply_bodies(builder, message);
        builder = Self::apply_attachments(builder, &message.attachments)?;

        self.transmit(message, builder).await
    }

    fn apply_bodies(
        mut builder: MessageBuilder<'static>,
        message: &OutgoingMessage,
    ) -> MessageBuilder<'static> {
        let has_html = !message.body_html.is_empty();
        let has_plain = !message.body_plain.is_empty();
        match (has_html, has_plain) {
            (true, true) => {
                // multipart/alternative, plain part first
                builder = builder.text_body(message.body_plain.clone());
                builder = builder.html_body(message.body_html.clone());
            }
            (true, false) => {
                builder = builder.text_body(HTML_ONLY_FALLBACK);
                builder = builder.html_body(message.body_html.clone());
            }
            (false, true) => {
                builder = builder.text_body(message.body_plain.clone());
            }
            (false, false) => {
                warn!(
                    recipient = message.recipient,
                    "Sending message with empty body"
                );
                builder = builder.text_body("");
            }
        }
        builder
    }

    fn apply_custom_headers(
        mut builder: MessageBuilder<'static>,
        custom_headers: &AHashMap<String, String>,
    ) -> MessageBuilder<'static> {
        for (name, value) in custom_headers {
            let lower = name.to_lowercase();
            if STRUCTURAL_HEADERS.contains(&lower.as_str()) {
                warn!(header = name.as_str(), "Ignoring structural custom header");
                continue;
            }
            if AUTHORITATIVE_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            builder = builder.header(
                canonical_header_name(name),
                Raw::new(Cow::Owned(value.clone())),
            );
        }
        builder
    }

    fn apply_attachments(
        mut builder: MessageBuilder<'static>,
        attachments: &[MailAttachment],
    ) -> RustBulkResult<MessageBuilder<'static>> {
        for attachment in attachments {
            let content = crate::base64_decode!(&attachment.content).map_err(|e| {
                raise_error!(
                    format!(
                        "Attachment '{}' is not valid base64: {e}",
                        attachment.filename
                    ),
                    ErrorCode::InvalidParameter
                )
            })?;
            let content_type = attachment
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            builder = builder.attachment(content_type, attachment.filename.clone(), content);
        }
        Ok(builder)
    }

    async fn transmit(
        &self,
        message: &OutgoingMessage,
        builder: MessageBuilder<'static>,
    ) -> RustBulkResult<String> {
        let raw = builder.write_to_vec().map_err(|e| {
            raise_error!(
                format!("Failed to serialize message: {e}"),
                ErrorCode::InternalError
            )
        })?;
        self.transport
            .send_raw(&self.credential, &self.principal, &message.recipient, raw)
            .await
    }
}

/// Split a rendered header block into (name, value) pairs with
/// canonical-case names. Lines without a colon are ignored.
pub fn parse_header_block(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((canonical_header_name(name), value.trim().to_string()))
        })
        .collect()
}

/// Normalize well-known header names to the canonical casing MTAs
/// expect; unknown names pass through untouched.
pub fn canonical_header_name(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "mime-version" => "MIME-Version".to_string(),
        "content-type" => "Content-Type".to_string(),
        "content-transfer-encoding" => "Content-Transfer-Encoding".to_string(),
        "message-id" => "Message-ID".to_string(),
        "list-unsubscribe" => "List-Unsubscribe".to_string(),
        "feedback-id" => "Feedback-ID".to_string(),
        "received" => "Received".to_string(),
        "from" => "From".to_string(),
        "to" => "To".to_string(),
        "subject" => "Subject".to_string(),
        "date" => "Date".to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_known_header_names() {
        assert_eq!(canonical_header_name("mime-version"), "MIME-Version");
        assert_eq!(canonical_header_name("MESSAGE-ID"), "Message-ID");
        assert_eq!(canonical_header_name("X-Campaign"), "X-Campaign");
    }

    #[test]
    fn parses_header_block_lines() {
        let block = "from: Jane <jane@acme.test>\nsubject: Hi\nnot a header\nX-Tag: 7";
        let parsed = parse_header_block(block);
        assert_eq!(
            parsed,
            vec![
                ("From".to_string(), "Jane <jane@acme.test>".to_string()),
                ("Subject".to_string(), "Hi".to_string()),
                ("X-Tag".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn body_normalization_matrix() {
        let both = OutgoingMessage {
            recipient: "r@x.test".into(),
            body_html: "<p>hi</p>".into(),
            body_plain: "hi".into(),
            ..Default::default()
        };
        let builder = DelegatedSender::apply_bodies(MessageBuilder::new(), &both);
        let text = builder.write_to_string().unwrap();
        assert!(text.contains("multipart/alternative"));
        // plain part precedes the html part
        assert!(text.find("text/plain").unwrap() < text.find("text/html").unwrap());

        let html_only = OutgoingMessage {
            recipient: "r@x.test".into(),
            body_html: "<p>hi</p>".into(),
            ..Default::default()
        };
        let text = DelegatedSender::apply_bodies(MessageBuilder::new(), &html_only)
            .write_to_string()
            .unwrap();
        assert!(text.contains(HTML_ONLY_FALLBACK));

        let plain_only = OutgoingMessage {
            recipient: "r@x.test".into(),
            body_plain: "plain text only".into(),
            ..Default::default()
        };
        let text = DelegatedSender::apply_bodies(MessageBuilder::new(), &plain_only)
            .write_to_string()
            .unwrap();
        assert!(!text.contains("multipart/alternative"));
        assert!(text.contains("plain text only"));
    }

    #[test]
    fn structural_custom_headers_are_dropped() {
        let mut headers = AHashMap::new();
        headers.insert("Content-Type".to_string(), "text/evil".to_string());
        headers.insert("X-Campaign".to_string(), "spring".to_string());
        let builder =
            DelegatedSender::apply_custom_headers(MessageBuilder::new(), &headers).text_body("x");
        let text = builder.write_to_string().unwrap();
        assert!(!text.contains("text/evil"));
        assert!(text.contains("X-Campaign: spring"));
    }
}
