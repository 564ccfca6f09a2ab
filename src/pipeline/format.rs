//! Message formatter: renders the notification text from a template and
//! picks the parts that will be forwarded as attachments.

use tracing::warn;

use crate::mail::envelope::{Envelope, PartRole};
use crate::pipeline::classify::{SizeLimits, classify, human_size};
use crate::pipeline::types::OutgoingAttachment;

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str =
    "From: {from}\\nTo: {to}\\nSubject: {subject}\\n\\n{body}\\n\\n{attachments_details}";

const BODY_TOKEN: &str = "{body}";

/// Values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFields {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Already trimmed.
    pub body: String,
    pub attachments_details: String,
}

impl TemplateFields {
    /// Copy of these fields with a different body.
    pub fn with_body(&self, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..self.clone()
        }
    }
}

/// A message template with `{from}`, `{to}`, `{subject}`, `{body}` and
/// `{attachments_details}` placeholders and the two-character `\n` escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(String);

impl Template {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute every placeholder in one left-to-right pass and trim the
    /// result. Substituted values are never re-scanned.
    pub fn render(&self, fields: &TemplateFields) -> String {
        let replacements: [(&str, &str); 6] = [
            ("\\n", "\n"),
            ("{from}", &fields.from),
            ("{to}", &fields.to),
            ("{subject}", &fields.subject),
            (BODY_TOKEN, &fields.body),
            ("{attachments_details}", &fields.attachments_details),
        ];

        let mut out = String::with_capacity(self.0.len() + fields.body.len());
        let mut rest = self.0.as_str();
        'scan: while !rest.is_empty() {
            for (token, value) in &replacements {
                if let Some(tail) = rest.strip_prefix(token) {
                    out.push_str(value);
                    rest = tail;
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }

        out.trim().to_string()
    }

    /// How many times `{body}` is substituted.
    pub fn body_slots(&self) -> usize {
        self.0.matches(BODY_TOKEN).count()
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Output of the formatter: the full text before any truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub fields: TemplateFields,
    pub text: String,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Render an envelope into its full notification text.
///
/// Parts are summarised in three groups (inline, attachment, other), each
/// keeping document order. Part-level parse errors are logged and do not
/// abort formatting.
pub fn format_envelope(envelope: &Envelope, template: &Template, limits: SizeLimits) -> Draft {
    let mut body = envelope.text.clone();
    let mut details = Vec::new();
    let mut attachments = Vec::new();

    for role in [PartRole::Inline, PartRole::Attachment, PartRole::Other] {
        for part in envelope.parts.iter().filter(|p| p.role == role) {
            if role != PartRole::Other {
                // The plain-text body sometimes shows up again as a part.
                if part.content == envelope.text.as_bytes() {
                    continue;
                }
                if body.is_empty() && part.content_type == "text/plain" && part.filename.is_empty()
                {
                    body = String::from_utf8_lossy(&part.content).into_owned();
                    continue;
                }
            }

            let classified = classify(part, limits);
            if let Some(kind) = classified.disposition.attachment_kind() {
                attachments.push(OutgoingAttachment {
                    filename: part.filename.clone(),
                    caption: part.filename.clone(),
                    content: part.content.clone(),
                    kind,
                });
            }

            details.push(format!(
                "- {} {} ({}) {}, {}",
                role.icon(),
                part.filename,
                classified.content_type,
                human_size(part.content.len()),
                classified.disposition.outcome(),
            ));
        }
    }

    for problem in &envelope.parse_errors {
        warn!(envelope_id = %envelope.id, "Envelope error: {problem}");
    }

    if body.is_empty() {
        body = envelope.raw.clone();
    }

    let attachments_details = if details.is_empty() {
        String::new()
    } else {
        format!("Attachments:\n{}", details.join("\n"))
    };

    let fields = TemplateFields {
        from: envelope.from.clone(),
        to: envelope.joined_recipients(),
        subject: envelope.subject.clone(),
        body: body.trim().to_string(),
        attachments_details,
    };
    let text = template.render(&fields);

    Draft {
        fields,
        text,
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::envelope::ContentPart;
    use crate::pipeline::types::AttachmentKind;

    const NO_FORWARDING: SizeLimits = SizeLimits {
        photo: 0,
        document: 0,
    };

    fn envelope(body: &str) -> Envelope {
        Envelope::new("from@test", vec!["to@test".into()]).with_text(body)
    }

    #[test]
    fn renders_simple_message() {
        let tpl = Template::new("From: {from}\\nTo: {to}\\nSubject: {subject}\\n\\n{body}");
        let draft = format_envelope(&envelope("hi"), &tpl, NO_FORWARDING);
        assert_eq!(draft.text, "From: from@test\nTo: to@test\nSubject: \n\nhi");
        assert!(draft.attachments.is_empty());
    }

    #[test]
    fn default_template_trims_empty_attachment_section() {
        let draft = format_envelope(&envelope("hi"), &Template::default(), NO_FORWARDING);
        assert_eq!(draft.text, "From: from@test\nTo: to@test\nSubject: \n\nhi");
    }

    #[test]
    fn custom_template() {
        let tpl = Template::new("Subject: {subject}\\n\\n{body}");
        let draft = format_envelope(&envelope("hi"), &tpl, NO_FORWARDING);
        assert_eq!(draft.text, "Subject: \n\nhi");
    }

    #[test]
    fn parse_errors_are_logged_not_rendered() {
        let mut env = envelope("still readable");
        env.parse_errors
            .push("part 1 (x.bin) could not be decoded cleanly".to_string());
        let draft = format_envelope(&env, &Template::default(), NO_FORWARDING);
        assert_eq!(
            draft.text,
            "From: from@test\nTo: to@test\nSubject: \n\nstill readable"
        );
        assert!(!draft.text.contains("decoded"));
        assert!(draft.attachments.is_empty());
    }

    #[test]
    fn recipients_are_comma_joined() {
        let env = Envelope::new("f@x", vec!["a@x".into(), "b@x".into()]).with_text("t");
        let draft = format_envelope(&env, &Template::new("{to}"), NO_FORWARDING);
        assert_eq!(draft.text, "a@x, b@x");
    }

    #[test]
    fn substitution_is_not_recursive() {
        let env = Envelope::new("{body}", vec![]).with_text("real body");
        let draft = format_envelope(&env, &Template::new("{from}|{body}"), NO_FORWARDING);
        assert_eq!(draft.text, "{body}|real body");
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let draft = format_envelope(&envelope("b"), &Template::new("{date} {body}"), NO_FORWARDING);
        assert_eq!(draft.text, "{date} b");
    }

    #[test]
    fn body_is_trimmed() {
        let draft = format_envelope(&envelope("\n  hi  \r\n"), &Template::new("[{body}]"), NO_FORWARDING);
        assert_eq!(draft.text, "[hi]");
        assert_eq!(draft.fields.body, "hi");
    }

    #[test]
    fn body_slots_counts_placeholders() {
        assert_eq!(Template::default().body_slots(), 1);
        assert_eq!(Template::new("{body}{body}").body_slots(), 2);
        assert_eq!(Template::new("{subject}").body_slots(), 0);
    }

    #[test]
    fn attachment_summary_lists_groups_in_order() {
        let env = envelope("Text body")
            .with_part(ContentPart::attachment("hey.txt", "text/plain", "hi"))
            .with_part(ContentPart::inline("inline.jpg", "image/jpeg", "JPG"))
            .with_part(ContentPart::attachment("attachment.jpg", "image/jpeg", "JPG"));
        let draft = format_envelope(&env, &Template::default(), NO_FORWARDING);
        assert_eq!(
            draft.text,
            "From: from@test\n\
             To: to@test\n\
             Subject: \n\
             \n\
             Text body\n\
             \n\
             Attachments:\n\
             - 🔗 inline.jpg (image/jpeg) 3B, discarded\n\
             - 📎 hey.txt (text/plain) 2B, discarded\n\
             - 📎 attachment.jpg (image/jpeg) 3B, discarded"
        );
        assert!(draft.attachments.is_empty());
    }

    #[test]
    fn forwarded_parts_follow_summary_order() {
        let env = envelope("Text body")
            .with_part(ContentPart::attachment("hey.txt", "text/plain", "hi"))
            .with_part(ContentPart::inline("inline.jpg", "image/jpeg", "JPG"))
            .with_part(ContentPart::attachment("attachment.jpg", "image/jpeg", "JPG"));
        let limits = SizeLimits {
            photo: 0,
            document: 1024,
        };
        let draft = format_envelope(&env, &Template::default(), limits);
        assert!(draft.text.ends_with("- 📎 attachment.jpg (image/jpeg) 3B, sending..."));
        let names: Vec<_> = draft.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["inline.jpg", "hey.txt", "attachment.jpg"]);
        assert!(draft.attachments.iter().all(|a| a.kind == AttachmentKind::Document));
        assert_eq!(draft.attachments[1].caption, "hey.txt");
        assert_eq!(draft.attachments[1].content, b"hi");
    }

    #[test]
    fn inline_photo_respects_photo_limit() {
        let env = envelope("b").with_part(ContentPart::inline("inline.jpg", "image/jpeg", "JPG"));

        let off = format_envelope(&env, &Template::new("{attachments_details}"), NO_FORWARDING);
        assert_eq!(off.text, "Attachments:\n- 🔗 inline.jpg (image/jpeg) 3B, discarded");
        assert!(off.attachments.is_empty());

        let on = SizeLimits {
            photo: 3,
            document: 0,
        };
        let sent = format_envelope(&env, &Template::new("{attachments_details}"), on);
        assert_eq!(sent.text, "Attachments:\n- 🔗 inline.jpg (image/jpeg) 3B, sending...");
        assert_eq!(sent.attachments.len(), 1);
        assert_eq!(sent.attachments[0].kind, AttachmentKind::Photo);
    }

    #[test]
    fn other_parts_listed_last_and_discarded() {
        let env = envelope("b")
            .with_part(ContentPart::other("", "text/calendar", "X"))
            .with_part(ContentPart::attachment("a.txt", "text/plain", "a"));
        let limits = SizeLimits {
            photo: 100,
            document: 100,
        };
        let draft = format_envelope(&env, &Template::new("{attachments_details}"), limits);
        assert_eq!(
            draft.text,
            "Attachments:\n- 📎 a.txt (text/plain) 1B, sending...\n- ❔  (text/calendar) 1B, discarded"
        );
        assert_eq!(draft.attachments.len(), 1);
    }

    #[test]
    fn part_identical_to_body_is_skipped() {
        let env = envelope("Text body")
            .with_part(ContentPart::inline("", "text/plain", "Text body"));
        let draft = format_envelope(&env, &Template::new("{body}|{attachments_details}"), NO_FORWARDING);
        assert_eq!(draft.text, "Text body|");
    }

    #[test]
    fn untitled_text_part_becomes_body() {
        let env = envelope("")
            .with_part(ContentPart::attachment("", "text/plain", "from part"))
            .with_part(ContentPart::attachment("", "text/plain", "second"));
        let draft = format_envelope(&env, &Template::new("{body}|{attachments_details}"), NO_FORWARDING);
        assert_eq!(
            draft.text,
            "from part|Attachments:\n- 📎  (text/plain) 6B, discarded"
        );
    }

    #[test]
    fn falls_back_to_raw_message() {
        let env = envelope("").with_raw("Subject: x\r\n\r\nraw stuff");
        let draft = format_envelope(&env, &Template::new("{body}"), NO_FORWARDING);
        assert_eq!(draft.text, "Subject: x\r\n\r\nraw stuff");
    }

    #[test]
    fn octet_stream_type_is_resolved_in_summary() {
        let env = envelope("b").with_part(ContentPart::attachment(
            "scan.pdf",
            "application/octet-stream",
            "%PDF",
        ));
        let draft = format_envelope(&env, &Template::new("{attachments_details}"), NO_FORWARDING);
        assert_eq!(
            draft.text,
            "Attachments:\n- 📎 scan.pdf (application/pdf) 4B, discarded"
        );
    }

    #[test]
    fn formatting_is_deterministic() {
        let env = envelope("same")
            .with_part(ContentPart::attachment("a.png", "image/png", "PNG"));
        let limits = SizeLimits {
            photo: 10,
            document: 10,
        };
        let a = format_envelope(&env, &Template::default(), limits);
        let b = format_envelope(&env, &Template::default(), limits);
        assert_eq!(a, b);
    }
}
