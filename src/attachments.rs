use crate::chat::{Attachment, ChatMessage, ChatRequest, ContentSegment, MessageContent, Role};
use crate::config::AttachmentLimits;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

pub const FILE_TRUNCATED_MARKER: &str = "[... truncated]";
pub const TOTAL_TRUNCATED_MARKER: &str = "[... additional attachment content omitted]";

/// Moves `req.attachments` into the last user message: images as
/// `image_url` segments, documents as capped text blocks.
pub fn fold_attachments(req: &mut ChatRequest, limits: &AttachmentLimits) {
    if req.attachments.is_empty() {
        return;
    }
    let attachments = std::mem::take(&mut req.attachments);
    let mut images = Vec::new();
    let mut text = String::new();
    let mut budget = limits.total_chars;
    let mut omitted = false;

    for attachment in &attachments {
        if attachment.is_image() {
            images.push(image_segment(attachment));
            continue;
        }
        let Some(body) = attachment_text(attachment) else {
            tracing::debug!(
                filename = %attachment.filename,
                mime_type = %attachment.mime_type,
                "attachment has no usable text, skipping"
            );
            continue;
        };
        if omitted {
            continue;
        }
        if budget == 0 {
            text.push_str("\n\n");
            text.push_str(TOTAL_TRUNCATED_MARKER);
            omitted = true;
            continue;
        }

        let allowed = limits.per_file_chars.min(budget);
        let (clipped, truncated) = truncate_chars(&body, allowed);
        budget -= clipped.chars().count();

        text.push_str("\n\n--- ");
        text.push_str(display_name(attachment));
        text.push_str(" ---\n");
        text.push_str(clipped);
        if truncated {
            text.push('\n');
            text.push_str(if allowed < limits.per_file_chars {
                TOTAL_TRUNCATED_MARKER
            } else {
                FILE_TRUNCATED_MARKER
            });
            if allowed < limits.per_file_chars {
                omitted = true;
            }
        }
    }

    if images.is_empty() && text.is_empty() {
        return;
    }
    let message = last_user_message(&mut req.messages);
    if !text.is_empty() {
        message.content.push_text(&text);
    }
    for image in images {
        message.content.push_segment(image);
    }
}

fn last_user_message(messages: &mut Vec<ChatMessage>) -> &mut ChatMessage {
    let index = match messages.iter().rposition(|m| m.role == Role::User) {
        Some(index) => index,
        None => {
            messages.push(ChatMessage {
                role: Role::User,
                content: MessageContent::Text(String::new()),
            });
            messages.len() - 1
        }
    };
    &mut messages[index]
}

fn image_segment(attachment: &Attachment) -> ContentSegment {
    let mime = if attachment.mime_type.is_empty() {
        "image/png"
    } else {
        attachment.mime_type.as_str()
    };
    let url = if attachment.data.starts_with("data:") {
        attachment.data.clone()
    } else {
        format!("data:{mime};base64,{}", attachment.data)
    };
    ContentSegment::ImageUrl {
        image_url: Value::String(url),
    }
}

fn attachment_text(attachment: &Attachment) -> Option<String> {
    if let Some(text) = attachment
        .extracted_text
        .as_ref()
        .filter(|t| !t.trim().is_empty())
    {
        return Some(text.clone());
    }
    if !attachment.mime_type.starts_with("text/") {
        return None;
    }
    let bytes = STANDARD.decode(attachment.data.trim()).ok()?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() { None } else { Some(text) }
}

fn display_name(attachment: &Attachment) -> &str {
    if attachment.filename.is_empty() {
        "attachment"
    } else {
        &attachment.filename
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, text: &str) -> Attachment {
        Attachment {
            kind: "file".into(),
            filename: name.into(),
            mime_type: "application/pdf".into(),
            extracted_text: Some(text.into()),
            ..Attachment::default()
        }
    }

    fn request(attachments: Vec<Attachment>) -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage {
                    role: Role::Assistant,
                    content: MessageContent::Text("ok".into()),
                },
                ChatMessage::user("summarize"),
            ],
            attachments,
            ..ChatRequest::default()
        }
    }

    #[test]
    fn appends_extracted_text_to_last_user_message() {
        let mut req = request(vec![file("a.pdf", "alpha")]);
        fold_attachments(&mut req, &AttachmentLimits::default());
        assert!(req.attachments.is_empty());
        assert_eq!(req.messages[0].content.flatten(), "first");
        assert_eq!(
            req.messages[2].content.flatten(),
            "summarize\n\n--- a.pdf ---\nalpha"
        );
    }

    #[test]
    fn decodes_plain_text_payloads() {
        let mut req = request(vec![Attachment {
            kind: "file".into(),
            filename: "notes.txt".into(),
            mime_type: "text/plain".into(),
            data: STANDARD.encode("héllo"),
            extracted_text: None,
        }]);
        fold_attachments(&mut req, &AttachmentLimits::default());
        assert!(req.messages[2].content.flatten().ends_with("notes.txt ---\nhéllo"));
    }

    #[test]
    fn caps_each_file() {
        let limits = AttachmentLimits {
            per_file_chars: 3,
            total_chars: 100,
        };
        let mut req = request(vec![file("a.pdf", "abcdef"), file("b.pdf", "xy")]);
        fold_attachments(&mut req, &limits);
        assert_eq!(
            req.messages[2].content.flatten(),
            format!("summarize\n\n--- a.pdf ---\nabc\n{FILE_TRUNCATED_MARKER}\n\n--- b.pdf ---\nxy")
        );
    }

    #[test]
    fn caps_total_and_omits_remaining_files() {
        let limits = AttachmentLimits {
            per_file_chars: 4,
            total_chars: 6,
        };
        let mut req = request(vec![
            file("a.pdf", "aaaa"),
            file("b.pdf", "bbbb"),
            file("c.pdf", "cccc"),
        ]);
        fold_attachments(&mut req, &limits);
        let text = req.messages[2].content.flatten();
        assert!(text.contains("--- a.pdf ---\naaaa"));
        assert!(text.contains(&format!("--- b.pdf ---\nbb\n{TOTAL_TRUNCATED_MARKER}")));
        assert!(!text.contains("c.pdf"));
        assert_eq!(text.matches(TOTAL_TRUNCATED_MARKER).count(), 1);
    }

    #[test]
    fn images_become_data_url_segments() {
        let mut req = request(vec![Attachment {
            kind: "image".into(),
            data: "AAAA".into(),
            filename: "cat.jpg".into(),
            mime_type: "image/jpeg".into(),
            extracted_text: None,
        }]);
        fold_attachments(&mut req, &AttachmentLimits::default());
        match &req.messages[2].content {
            MessageContent::Segments(segments) => {
                assert_eq!(
                    segments.last(),
                    Some(&ContentSegment::ImageUrl {
                        image_url: Value::String("data:image/jpeg;base64,AAAA".into())
                    })
                );
            }
            other => panic!("expected segments, got {other:?}"),
        }
    }

    #[test]
    fn creates_user_message_when_missing() {
        let mut req = ChatRequest {
            attachments: vec![file("a.pdf", "alpha")],
            ..ChatRequest::default()
        };
        fold_attachments(&mut req, &AttachmentLimits::default());
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn skips_binary_without_extracted_text() {
        let mut req = request(vec![Attachment {
            kind: "file".into(),
            filename: "sheet.xlsx".into(),
            mime_type: "application/vnd.ms-excel".into(),
            data: "AAAA".into(),
            extracted_text: None,
        }]);
        fold_attachments(&mut req, &AttachmentLimits::default());
        assert_eq!(req.messages[2].content.flatten(), "summarize");
    }
}
