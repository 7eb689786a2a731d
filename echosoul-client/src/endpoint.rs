use crate::{ClientError, Result};
use echosoul_proto::Id;

/// Checks that a base address uses a WebSocket scheme and has a host
pub fn validate_base(base: &str) -> Result<()> {
    let rest = base
        .strip_prefix("wss://")
        .or_else(|| base.strip_prefix("ws://"))
        .ok_or_else(|| {
            ClientError::InvalidEndpoint(format!(
                "{} (expected ws:// or wss://)",
                base
            ))
        })?;

    if rest.trim_matches('/').is_empty() {
        return Err(ClientError::InvalidEndpoint(format!("{} (missing host)", base)));
    }

    Ok(())
}

/// `<base>/api/ws/<user_id>`
pub fn chat_url(base: &str, user_id: &Id) -> String {
    format!("{}/api/ws/{}", base.trim_end_matches('/'), user_id)
}

/// `<base>/api/ws/ai-chat/<user_id>?token=<token>`, token percent-encoded
pub fn ai_chat_url(base: &str, user_id: &Id, token: &str) -> String {
    format!(
        "{}/api/ws/ai-chat/{}?token={}",
        base.trim_end_matches('/'),
        user_id,
        urlencoding::encode(token)
    )
}

/// Strips the query string so tokens never reach the logs
pub fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
