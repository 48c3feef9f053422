use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lettre::message::header::{
    ContentDisposition, ContentId, ContentTransferEncoding, ContentType, HeaderName, HeaderValue,
};
use lettre::address::Envelope;
use lettre::message::{Body, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpSettings;
use crate::error::MailError;
use crate::schema::{EmailAttachment, EmailRequest, EmailResponse};

/// Builds the MIME message for a request.
///
/// The shape depends on what the request carries:
/// attachments give `multipart/mixed` with a nested `multipart/alternative`
/// holding the bodies; text and HTML without attachments give a single
/// `multipart/alternative`; a lone body gives a single-part message.
///
/// Standard headers are set first (From, To, Subject, Cc, Reply-To), then the
/// custom headers. A custom header with the same name as a standard one
/// replaces it in the headers; a custom `To` never removes the request's own
/// recipients from the SMTP envelope. Any attachment that cannot be decoded or typed aborts the
/// whole build.
pub fn build_message(request: &EmailRequest) -> Result<Message, MailError> {
    let mut builder = Message::builder();

    if !request.overrides("Message-ID") {
        builder = builder.message_id(None);
    }
    if !request.overrides("From") {
        let name = request.from_name().map(str::to_owned);
        builder = builder.from(Mailbox::new(name, request.from_email.clone()));
    }
    if request.overrides("To") {
        builder = builder.envelope(envelope(request)?);
    } else {
        for to in &request.to {
            builder = builder.to(Mailbox::new(None, to.clone()));
        }
    }
    if !request.overrides("Subject") {
        builder = builder.subject(request.subject.as_str());
    }
    if !request.overrides("Cc") {
        for cc in request.cc() {
            builder = builder.cc(Mailbox::new(None, cc.clone()));
        }
    }
    if !request.overrides("Reply-To") {
        if let Some(reply_to) = &request.reply_to {
            builder = builder.reply_to(Mailbox::new(None, reply_to.clone()));
        }
    }
    // Envelope only, lettre drops the Bcc header on build
    for bcc in request.bcc() {
        builder = builder.bcc(Mailbox::new(None, bcc.clone()));
    }

    for (name, value) in request.headers() {
        let header_name = HeaderName::new_from_ascii(name.to_owned())
            .map_err(|_| MailError::InvalidHeader(name.to_owned()))?;
        builder = builder.raw_header(HeaderValue::new(header_name, value.to_owned()));
    }

    let attachments = request.attachments();
    let message = if !attachments.is_empty() {
        let mut mixed = MultiPart::mixed().multipart(body_alternatives(request));
        for attachment in attachments {
            mixed = mixed.singlepart(attachment_part(attachment)?);
        }
        builder.multipart(mixed)?
    } else {
        match (request.text(), request.html()) {
            (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
                text.to_owned(),
                html.to_owned(),
            ))?,
            (None, Some(html)) => builder.singlepart(SinglePart::html(html.to_owned()))?,
            (text, None) => {
                builder.singlepart(SinglePart::plain(text.unwrap_or_default().to_owned()))?
            }
        }
    };

    Ok(message)
}

/// Envelope for a message whose `To` header is custom: the request's `to`,
/// whatever the custom `To`/`Cc` values parse to, then `cc` and `bcc`.
fn envelope(request: &EmailRequest) -> Result<Envelope, MailError> {
    let custom = request
        .headers()
        .filter(|(name, _)| name.eq_ignore_ascii_case("To") || name.eq_ignore_ascii_case("Cc"))
        .filter_map(|(_, value)| value.parse::<Mailboxes>().ok())
        .flatten()
        .map(|mailbox| mailbox.email);

    let mut recipients: Vec<Address> = Vec::new();
    for address in request
        .to
        .iter()
        .cloned()
        .chain(custom)
        .chain(request.cc().iter().cloned())
        .chain(request.bcc().iter().cloned())
    {
        if !recipients.contains(&address) {
            recipients.push(address);
        }
    }
    Ok(Envelope::new(Some(request.from_email.clone()), recipients)?)
}

/// The `Message-ID` header of an assembled message.
pub fn message_id(message: &Message) -> Option<String> {
    message
        .headers()
        .get_raw("Message-ID")
        .map(|id| id.trim().to_owned())
}

fn body_alternatives(request: &EmailRequest) -> MultiPart {
    let mut alternative = MultiPart::alternative().build();
    if let Some(text) = request.text() {
        alternative = alternative.singlepart(SinglePart::plain(text.to_owned()));
    }
    if let Some(html) = request.html() {
        alternative = alternative.singlepart(SinglePart::html(html.to_owned()));
    }
    alternative
}

fn attachment_part(attachment: &EmailAttachment) -> Result<SinglePart, MailError> {
    let encoded: String = attachment
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let content = STANDARD
        .decode(encoded)
        .map_err(|e| MailError::InvalidAttachment {
            filename: attachment.filename.clone(),
            reason: e.to_string(),
        })?;

    let content_type = attachment_content_type(&attachment.content_type)?;

    let part = SinglePart::builder().header(content_type);
    let part = match attachment.cid() {
        Some(cid) => part
            .header(ContentDisposition::inline_with_name(&attachment.filename))
            .header(ContentId::from(format!("<{cid}>"))),
        None => part.header(ContentDisposition::attachment(&attachment.filename)),
    };

    let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
        .unwrap_or_else(|content| Body::new(content));
    Ok(part.body(body))
}

fn attachment_content_type(raw: &str) -> Result<ContentType, MailError> {
    match raw.split_once('/') {
        Some((kind, subtype)) if !kind.trim().is_empty() && !subtype.trim().is_empty() => {
            ContentType::parse(raw).map_err(|_| MailError::InvalidContentType(raw.to_owned()))
        }
        _ => Err(MailError::InvalidContentType(raw.to_owned())),
    }
}

/// Hands an assembled message to the wire.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// lettre backed SMTP transport.
///
/// Built without connection pooling, so every send opens its own connection
/// and closes it when the conversation ends.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let timeout = Duration::from_secs(settings.timeout);
        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            let tls = TlsParameters::new(settings.host.clone())?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .tls(Tls::Opportunistic(tls))
        };

        let mut builder = builder.port(settings.port).timeout(Some(timeout));
        if let Some((username, password)) = settings.credentials() {
            builder = builder.credentials(Credentials::new(username.into(), password.into()));
        }

        Ok(Self {
            transport: builder.build(),
            timeout,
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        tokio::time::timeout(self.timeout, self.transport.send(message))
            .await
            .map_err(|_| MailError::Timeout(self.timeout.as_secs()))??;
        Ok(())
    }
}

/// Assembles requests and delivers them synchronously: the caller waits for
/// the SMTP conversation to finish and learns its outcome.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, MailError> {
        Ok(Self::new(Arc::new(SmtpTransport::new(settings)?)))
    }

    /// Builds and sends one message, returning its Message-ID.
    pub async fn send(&self, request: &EmailRequest) -> Result<String, MailError> {
        let message = build_message(request)?;
        let id = message_id(&message).unwrap_or_default();
        tracing::debug!("Assembled message {id}");
        self.transport.send(message).await?;
        Ok(id)
    }

    /// Like [`Dispatcher::send`], reported as an [`EmailResponse`].
    pub async fn dispatch(&self, request: &EmailRequest) -> EmailResponse {
        match self.send(request).await {
            Ok(id) => {
                tracing::info!(
                    "Email sent successfully to [{}], message_id: {id}",
                    request.recipients()
                );
                EmailResponse::sent(id)
            }
            Err(err) => {
                if err.is_assembly() {
                    tracing::error!("Failed to assemble message: {err}");
                } else {
                    tracing::error!("Failed to send message: {err}");
                }
                EmailResponse::failed(err.to_string())
            }
        }
    }
}
