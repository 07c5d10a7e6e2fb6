use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Outbound  —  POST {base}/message/sendText/{instance}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SendTextRequest<'a> {
    pub number: &'a str,
    pub text: &'a str,
}

// ---------------------------------------------------------------------------
// Inbound webhook payload
//
// The gateway wraps every event in a `data` object; for text messages the
// body lives in one of three places depending on the client that sent it:
//
//   { "data": { "key": { "remoteJid": "549112...@s.whatsapp.net" },
//               "message": { "conversation": "1" } } }
//   { ... "message": { "extendedTextMessage": { "text": "1" } } }
//   { ... "message": { "text": "1" } }
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookData {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MessageKey {
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default, rename = "extendedTextMessage")]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEnvelope {
    /// Extract the sender's bare number and the normalized (trimmed,
    /// lowercased) message text. `None` when the event carries no message.
    pub fn sender_and_text(&self) -> Option<(String, String)> {
        let data = self.data.as_ref()?;
        let message = data.message.as_ref()?;

        let from = data
            .key
            .remote_jid
            .split('@')
            .next()
            .unwrap_or_default()
            .to_owned();

        let text = message
            .conversation
            .clone()
            .or_else(|| {
                message
                    .extended_text_message
                    .as_ref()
                    .and_then(|e| e.text.clone())
            })
            .or_else(|| message.text.clone())
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        Some((from, text))
    }
}
