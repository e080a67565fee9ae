//! Request plumbing shared by the HTTP collaborators.

use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, SyncError};

/// Attaches the optional JSON body, sends, and decodes the reply.
pub(crate) async fn send<T: DeserializeOwned, B: Serialize>(
    mut request: RequestBuilder,
    body: Option<B>,
) -> Result<T> {
    if let Some(b) = body {
        request = request.json(&b);
    }
    let response = request.send().await?;
    handle_response(response).await
}

pub(crate) async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(_) if !(200..300).contains(&status) => "Could not read error body".to_string(),
        Err(e) => return Err(e.into()),
    };
    decode_body(status, &text)
}

/// Non-2xx becomes [`SyncError::Api`]; an empty 2xx body decodes as `null`.
pub(crate) fn decode_body<T: DeserializeOwned>(status: u16, text: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        return Err(SyncError::Api {
            status,
            message: text.to_string(),
        });
    }
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| SyncError::Api {
        status,
        message: format!("JSON parse error: {e}"),
    })
}
