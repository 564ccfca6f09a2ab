//! MIME intake adapter: turns raw RFC 5322 bytes into an [`Envelope`].

use std::collections::HashSet;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::mail::envelope::{ContentPart, Envelope, PartRole};

/// Declared type used when a part carries no usable `Content-Type`.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Decode a raw message received for `mail_from` → `rcpt_to`.
///
/// Never fails: when the message cannot be parsed the envelope carries an
/// empty body, the raw text, and a parse error, so the formatter falls back
/// to forwarding the raw message.
pub fn parse_envelope(mail_from: &str, rcpt_to: &[String], raw: &[u8]) -> Envelope {
    let raw_text = String::from_utf8_lossy(raw).into_owned();
    let mut envelope = Envelope::new(mail_from, rcpt_to.to_vec()).with_raw(raw_text);

    let Some(message) = MessageParser::default().parse(raw) else {
        envelope
            .parse_errors
            .push("message could not be parsed as MIME".to_string());
        return envelope;
    };

    envelope.subject = message.subject().unwrap_or_default().to_string();
    envelope.text = message
        .body_text(0)
        .map(|t| t.into_owned())
        .unwrap_or_default();

    let related_children: HashSet<u32> = message
        .parts
        .iter()
        .filter(|part| is_subtype(part, "related"))
        .filter_map(|part| match &part.body {
            PartType::Multipart(children) => Some(children.iter().copied()),
            _ => None,
        })
        .flatten()
        .collect();

    for (idx, part) in message.parts.iter().enumerate() {
        let part_id = idx as u32;
        let is_body_text = matches!(part.body, PartType::Text(_) | PartType::Html(_))
            && (message.text_body.contains(&part_id) || message.html_body.contains(&part_id));
        if is_body_text || matches!(part.body, PartType::Multipart(_)) {
            continue;
        }

        let filename = part.attachment_name().unwrap_or_default().to_string();
        if part.is_encoding_problem {
            envelope.parse_errors.push(format!(
                "part {idx} ({filename}) could not be decoded cleanly"
            ));
        }

        let content_type = declared_type(part);
        let role = part_role(
            part,
            &filename,
            &content_type,
            related_children.contains(&part_id),
        );
        let content_part =
            ContentPart::new(role, filename, content_type, part.contents().to_vec());
        debug!(
            filename = %content_part.filename,
            content_type = %content_part.content_type,
            size = content_part.content.len(),
            "Decoded content part"
        );
        envelope.parts.push(content_part);
    }

    envelope
}

/// Role from `Content-Disposition`, or inferred when the header is absent.
///
/// Without a disposition, opaque binary and named parts outside a
/// `multipart/related` container are attachments. Named parts inside one
/// are resources referenced by the HTML body.
fn part_role(
    part: &MessagePart<'_>,
    filename: &str,
    content_type: &str,
    in_related: bool,
) -> PartRole {
    match part.content_disposition() {
        Some(cd) if cd.is_attachment() => PartRole::Attachment,
        Some(cd) if cd.is_inline() => PartRole::Inline,
        _ if content_type == OCTET_STREAM => PartRole::Attachment,
        _ if !filename.is_empty() && !in_related => PartRole::Attachment,
        _ => PartRole::Other,
    }
}

fn is_subtype(part: &MessagePart<'_>, subtype: &str) -> bool {
    part.content_type()
        .and_then(|ct| ct.subtype())
        .is_some_and(|sub| sub.eq_ignore_ascii_case(subtype))
}

fn declared_type(part: &MessagePart<'_>) -> String {
    if let Some(ct) = part.content_type() {
        return match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        };
    }
    match part.body {
        PartType::Text(_) => "text/plain".to_string(),
        PartType::Html(_) => "text/html".to_string(),
        PartType::Message(_) => "message/rfc822".to_string(),
        _ => OCTET_STREAM.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rcpt() -> Vec<String> {
        vec!["to@test".to_string()]
    }

    #[test]
    fn decodes_encoded_subject_and_quoted_printable_body() {
        let raw = b"Subject: =?UTF-8?B?8J+Yjg==?=\r\n\
Content-Type: text/plain; charset=UTF-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
=F0=9F=92=A9\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.from, "from@test");
        assert_eq!(env.to, rcpt());
        assert_eq!(env.subject, "😎");
        assert_eq!(env.text.trim(), "💩");
        assert!(env.parts.is_empty());
    }

    #[test]
    fn splits_attachments_and_inline_parts() {
        let raw = b"From: from@test\r\n\
To: to@test\r\n\
Subject: Test subj\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=UTF-8\r\n\
\r\n\
Text body\r\n\
--XYZ\r\n\
Content-Type: image/jpeg\r\n\
Content-Disposition: inline; filename=\"inline.jpg\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SlBH\r\n\
--XYZ\r\n\
Content-Type: text/plain; name=\"hey.txt\"\r\n\
Content-Disposition: attachment; filename=\"hey.txt\"\r\n\
\r\n\
hi\r\n\
--XYZ--\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.subject, "Test subj");
        assert_eq!(env.text.trim(), "Text body");

        let inline = env
            .parts
            .iter()
            .find(|p| p.filename == "inline.jpg")
            .expect("inline part");
        assert_eq!(inline.role, PartRole::Inline);
        assert_eq!(inline.content_type, "image/jpeg");
        assert_eq!(inline.content, b"JPG");

        let attachment = env
            .parts
            .iter()
            .find(|p| p.filename == "hey.txt")
            .expect("attachment part");
        assert_eq!(attachment.role, PartRole::Attachment);
        assert_eq!(attachment.content_type, "text/plain");
    }

    #[test]
    fn html_alternative_is_not_a_part() {
        let raw = b"Subject: alt\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
Text body\r\n\
--B\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>HTML body</p>\r\n\
--B--\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.text.trim(), "Text body");
        assert!(env.parts.is_empty());
    }

    #[test]
    fn parts_without_disposition_get_a_role_from_their_context() {
        let raw = b"Subject: scans\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"M\"\r\n\
\r\n\
--M\r\n\
Content-Type: multipart/related; boundary=\"R\"\r\n\
\r\n\
--R\r\n\
Content-Type: text/html\r\n\
\r\n\
<img src=\"cid:logo\">\r\n\
--R\r\n\
Content-Type: image/png; name=\"logo.png\"\r\n\
Content-ID: <logo>\r\n\
\r\n\
PNG\r\n\
--R--\r\n\
--M\r\n\
Content-Type: application/octet-stream; name=\"scan.pdf\"\r\n\
\r\n\
PDF\r\n\
--M\r\n\
Content-Type: text/csv; name=\"report.csv\"\r\n\
\r\n\
a,b\r\n\
--M--\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        let role_of = |name: &str| {
            env.parts
                .iter()
                .find(|p| p.filename == name)
                .map(|p| p.role)
                .unwrap_or_else(|| panic!("missing part {name}"))
        };

        assert_eq!(role_of("scan.pdf"), PartRole::Attachment);
        assert_eq!(role_of("report.csv"), PartRole::Attachment);
        assert_eq!(role_of("logo.png"), PartRole::Other);
    }

    #[test]
    fn octet_stream_without_disposition_is_forwarded_as_document() {
        use crate::pipeline::classify::{Disposition, SizeLimits, classify};

        let raw = b"Subject: scan\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"M\"\r\n\
\r\n\
--M\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached\r\n\
--M\r\n\
Content-Type: application/octet-stream; name=\"scan.pdf\"\r\n\
\r\n\
PDF\r\n\
--M--\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.parts.len(), 1);
        let limits = SizeLimits {
            photo: 1000,
            document: 1000,
        };
        assert_eq!(
            classify(&env.parts[0], limits).disposition,
            Disposition::Document
        );
    }

    #[test]
    fn undecodable_part_is_kept_and_reported() {
        let raw = b"Subject: broken\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"M\"\r\n\
\r\n\
--M\r\n\
Content-Type: text/plain\r\n\
\r\n\
Body\r\n\
--M\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"bad.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
***not base64***\r\n\
--M--\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.text.trim(), "Body");
        assert_eq!(env.parse_errors.len(), 1);
        assert!(env.parse_errors[0].contains("bad.pdf"));
        assert!(env.parts.iter().any(|p| p.filename == "bad.pdf"));
    }

    #[test]
    fn keeps_raw_text_for_fallback() {
        let raw = b"Subject: x\r\n\r\nbody\r\n";
        let env = parse_envelope("from@test", &rcpt(), raw);
        assert_eq!(env.raw, "Subject: x\r\n\r\nbody\r\n");
    }

    #[test]
    fn empty_input_is_reported_not_fatal() {
        let env = parse_envelope("from@test", &rcpt(), b"");
        assert!(env.text.is_empty());
        assert!(env.subject.is_empty());
        assert!(env.parts.is_empty());
    }
}
