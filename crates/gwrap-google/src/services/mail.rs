//! Gmail v1 client (send only).

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use gwrap_core::{ApiError, ApiResult};
use serde_json::json;
use tracing::debug;

use super::ServiceClient;
use crate::connection::{ApiRequest, Connector};
use crate::manager::CredentialManager;
use crate::scope::ServiceScope;

/// Sends plain-text mail from one account.
#[derive(Debug)]
pub struct MailClient {
    source_email: String,
    client: ServiceClient,
}

impl MailClient {
    /// Connects as `source_email` (the full address, e.g. `me@gmail.com`).
    pub fn connect(
        source_email: impl Into<String>,
        application_name: Option<&str>,
        manager: &mut CredentialManager,
        connector: &dyn Connector,
    ) -> ApiResult<Self> {
        let client = ServiceClient::connect(ServiceScope::Mail, application_name, manager, connector)?;
        Ok(Self {
            source_email: source_email.into(),
            client,
        })
    }

    /// Sends a message. Use `\n` for line breaks in `body`.
    ///
    /// # Errors
    ///
    /// A line break in the recipient, subject or source address is a
    /// configuration error. Any provider failure is returned as a remote
    /// service error.
    pub fn send(&self, recipient: &str, subject: &str, body: &str) -> ApiResult<()> {
        check_header("From", &self.source_email)?;
        check_header("To", recipient)?;
        check_header("Subject", subject)?;

        debug!("Mail source:  {}", self.source_email);
        debug!("Mail target:  {}", recipient);
        debug!("Mail subject: {}", subject);
        debug!("Mail message: {}", body.replace('\n', "[newline]"));

        let raw = compose_message(&self.source_email, recipient, subject, body);
        let connection = self.client.connection();
        let url = connection.url(&format!(
            "users/{}/messages/send",
            urlencoding::encode(&self.source_email)
        ));
        let request = ApiRequest::post(url).with_json(json!({ "raw": encode_raw(&raw) }));

        connection.execute(&request)?;
        debug!("Mail sent.");
        Ok(())
    }

    pub fn source_email(&self) -> &str {
        &self.source_email
    }

    pub fn service(&self) -> &ServiceClient {
        &self.client
    }
}

/// Rejects header values that would start a new header line.
fn check_header(name: &str, value: &str) -> ApiResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(ApiError::configuration(format!(
            "{} header must not contain line breaks",
            name
        ))
        .with_service(ServiceScope::Mail.api_name()));
    }
    Ok(())
}

/// Builds an RFC 5322 text/plain message. The body is carried verbatim.
fn compose_message(from: &str, to: &str, subject: &str, body: &str) -> String {
    let headers = [
        format!("From: {}", from),
        format!("To: {}", to),
        format!("Subject: {}", encode_header(subject)),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=\"utf-8\"".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
    ];
    format!("{}\r\n\r\n{}", headers.join("\r\n"), body)
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn encode_raw(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::ClientSecrets;
    use crate::settings::Settings;
    use crate::testing::{FakeConnector, FakeFlow, ScriptedTransport};
    use gwrap_core::ApiErrorCode;
    use reqwest::Method;
    use serde_json::Value;

    fn decode_raw(raw: &str) -> String {
        String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap()
    }

    fn client(dir: &tempfile::TempDir, transport: &ScriptedTransport) -> MailClient {
        let settings = Settings::default()
            .with_credential_store_path(dir.path().join("credentials.json"));
        let mut manager =
            CredentialManager::with_flow(&settings, Box::new(FakeFlow::granting("t")))
                .with_client_secrets(ClientSecrets::new("id", "secret"));
        MailClient::connect(
            "me@gmail.com",
            None,
            &mut manager,
            &FakeConnector::new(transport.clone()),
        )
        .unwrap()
    }

    #[test]
    fn send_posts_encoded_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new().respond(serde_json::json!({
            "id": "18c1", "threadId": "18c1", "labelIds": ["SENT"]
        }));
        let mail = client(&dir, &transport);
        assert_eq!(mail.service().application_name(), "Mail Sender");

        mail.send("a@b.com", "S", "L1\nL2").unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(
            requests[0].url,
            "https://gmail.googleapis.com/gmail/v1/users/me%40gmail.com/messages/send"
        );

        let crate::connection::RequestBody::Json(body) = &requests[0].body else {
            panic!("expected JSON body");
        };
        let message = decode_raw(body["raw"].as_str().unwrap());
        let (headers, content) = message.split_once("\r\n\r\n").unwrap();

        assert!(headers.lines().any(|l| l == "To: a@b.com"));
        assert!(headers.lines().any(|l| l == "Subject: S"));
        assert!(headers.lines().any(|l| l == "From: me@gmail.com"));
        assert_eq!(content, "L1\nL2");
    }

    #[test]
    fn send_propagates_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new()
            .fail(ApiError::remote("Invalid To header").with_status(400));

        let err = client(&dir, &transport).send("bad", "S", "b").unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::RemoteService);
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn line_breaks_in_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        let mail = client(&dir, &transport);

        let err = mail
            .send("a@b.com", "S\r\nBcc: evil@x.org", "body")
            .unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Configuration);
        assert!(err.message().contains("Subject"));

        let err = mail.send("a@b.com\nBcc: evil@x.org", "S", "body").unwrap_err();
        assert!(err.message().contains("To"));

        assert!(transport.requests().is_empty());
    }

    #[test]
    fn carriage_return_in_header_is_rejected() {
        assert!(check_header("Subject", "plain subject").is_ok());
        assert!(check_header("From", "me@x.org\r").is_err());
    }

    #[test]
    fn non_ascii_subject_is_encoded_word() {
        let message = compose_message("me@x.org", "you@x.org", "Café", "body");
        let subject = message
            .lines()
            .find(|l| l.starts_with("Subject: "))
            .unwrap();
        assert_eq!(subject, "Subject: =?UTF-8?B?Q2Fmw6k=?=");
    }

    #[test]
    fn raw_uses_url_safe_alphabet() {
        let encoded = encode_raw("subject??>>");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode_raw(&encoded), "subject??>>");
    }

    #[test]
    fn empty_send_response_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new().respond(Value::Null);
        assert!(client(&dir, &transport).send("a@b.com", "S", "").is_ok());
    }
}
