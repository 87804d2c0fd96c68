//! Production [`MailTransport`] backed by lettre's async SMTP client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::models::profile::{SendingProfile, SmtpEncryption};
use crate::models::queue::QueuedEmail;
use crate::services::delivery_service::{MailTransport, TransportFailure};

pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_transport(
        &self,
        profile: &SendingProfile,
        password: &str,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportFailure> {
        let tls = match profile.smtp_encryption {
            SmtpEncryption::None => Tls::None,
            SmtpEncryption::Ssl => Tls::Wrapper(
                TlsParameters::new(profile.smtp_host.clone()).map_err(failure)?,
            ),
            SmtpEncryption::Tls => Tls::Required(
                TlsParameters::new(profile.smtp_host.clone()).map_err(failure)?,
            ),
        };
        let credentials = Credentials::new(profile.smtp_user.clone(), password.to_owned());
        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::relay(&profile.smtp_host)
                .map_err(failure)?
                .port(profile.smtp_port)
                .tls(tls)
                .credentials(credentials)
                .timeout(Some(self.timeout))
                .build(),
        )
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn deliver(
        &self,
        profile: &SendingProfile,
        smtp_password: &str,
        email: &QueuedEmail,
    ) -> Result<(), TransportFailure> {
        let message = build_message(profile, email)?;
        let transport = self.build_transport(profile, smtp_password)?;
        transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| TransportFailure {
                message: e.to_string(),
                transcript: Some(format!("{e:?}")),
            })
    }
}

pub fn build_message(
    profile: &SendingProfile,
    email: &QueuedEmail,
) -> Result<Message, TransportFailure> {
    let from_address: Address = profile.from_email.parse().map_err(failure)?;
    let mut builder = Message::builder()
        .from(Mailbox::new(profile.from_name.clone(), from_address))
        .subject(email.subject.clone());

    for addr in email.to_list().map_err(failure)? {
        builder = builder.to(addr.parse::<Mailbox>().map_err(failure)?);
    }
    for addr in email.cc_list().map_err(failure)? {
        builder = builder.cc(addr.parse::<Mailbox>().map_err(failure)?);
    }
    for addr in email.bcc_list().map_err(failure)? {
        builder = builder.bcc(addr.parse::<Mailbox>().map_err(failure)?);
    }

    let body = match (&email.body_text, &email.body_html) {
        (Some(text), Some(html)) => {
            MultiPart::alternative_plain_html(text.clone(), html.clone())
        }
        (None, Some(html)) => MultiPart::alternative().singlepart(SinglePart::html(html.clone())),
        (Some(text), None) => MultiPart::alternative().singlepart(SinglePart::plain(text.clone())),
        (None, None) => MultiPart::alternative().singlepart(SinglePart::plain(String::new())),
    };

    let attachments = email.attachment_list().map_err(failure)?;
    let message = if attachments.is_empty() {
        builder.multipart(body).map_err(failure)?
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for att in attachments {
            let content = base64::engine::general_purpose::STANDARD
                .decode(&att.content_base64)
                .map_err(failure)?;
            let content_type = ContentType::parse(&att.content_type).map_err(failure)?;
            mixed = mixed.singlepart(Attachment::new(att.filename).body(content, content_type));
        }
        builder.multipart(mixed).map_err(failure)?
    };
    Ok(message)
}

fn failure<E: std::fmt::Display>(e: E) -> TransportFailure {
    TransportFailure {
        message: e.to_string(),
        transcript: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::profile::RateLimitStrategy;

    fn profile() -> SendingProfile {
        SendingProfile {
            id: 1,
            name: "test".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_user: "mailer".into(),
            smtp_pass_encrypted: "enc".into(),
            smtp_encryption: SmtpEncryption::Tls,
            from_email: "noreply@example.com".into(),
            from_name: Some("Mailer".into()),
            rate_limit_count: 0,
            rate_limit_interval: 60,
            rate_limit_strategy: RateLimitStrategy::Reject,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn email() -> QueuedEmail {
        QueuedEmail {
            message_id: "m1".into(),
            profile_id: 1,
            ip_address: "1.2.3.4".into(),
            to_email: r#"["to@example.com","second@example.com"]"#.into(),
            cc_email: Some(r#"["cc@example.com"]"#.into()),
            bcc_email: None,
            subject: "greetings".into(),
            body_html: Some("<p>hi</p>".into()),
            body_text: Some("hi".into()),
            attachments: None,
            submitted_at: db::now_epoch(),
            send_at: db::now_epoch(),
            claimed_at: None,
        }
    }

    #[test]
    fn builds_multi_recipient_alternative_message() {
        let msg = build_message(&profile(), &email()).unwrap();
        let rendered = String::from_utf8(msg.formatted()).unwrap();
        assert!(rendered.contains("to@example.com"));
        assert!(rendered.contains("second@example.com"));
        assert!(rendered.contains("cc@example.com"));
        assert!(rendered.contains("multipart/alternative"));
    }

    #[test]
    fn builds_mixed_message_with_attachment() {
        let mut e = email();
        e.attachments = Some(
            r#"[{"filename":"hi.txt","content_type":"text/plain","content_base64":"aGVsbG8="}]"#
                .into(),
        );
        let msg = build_message(&profile(), &e).unwrap();
        let rendered = String::from_utf8(msg.formatted()).unwrap();
        assert!(rendered.contains("multipart/mixed"));
        assert!(rendered.contains("hi.txt"));
    }

    #[test]
    fn invalid_recipient_address_is_a_failure() {
        let mut e = email();
        e.to_email = r#"["not an address"]"#.into();
        assert!(build_message(&profile(), &e).is_err());
    }

    #[test]
    fn invalid_attachment_base64_is_a_failure() {
        let mut e = email();
        e.attachments = Some(
            r#"[{"filename":"x","content_type":"text/plain","content_base64":"%%%"}]"#.into(),
        );
        assert!(build_message(&profile(), &e).is_err());
    }
}
