//! REST collaborator: directory, history and sending.

use async_trait::async_trait;
use farmlink_shared::constants::USER_ID_HEADER;
use farmlink_shared::protocol::SendMessageRequest;
use farmlink_shared::{DirectoryListing, Message, UserId};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::SessionError;

/// The server's REST surface as seen by one signed-in user.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_users(&self) -> Result<DirectoryListing, SessionError>;

    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, SessionError>;

    async fn send_message(&self, recipient: &UserId, text: &str) -> Result<Message, SessionError>;
}

pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
    viewer: UserId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig, viewer: UserId) -> Result<Self, SessionError> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: config.base_url()?,
            viewer,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SessionError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SessionError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SessionError> {
        debug!(url = %url, "GET");
        let resp = self
            .client
            .get(url)
            .header(USER_ID_HEADER, self.viewer.as_str())
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Turn a non-2xx response into [`SessionError::Api`], keeping the server's
/// `{"error": ...}` message when there is one.
async fn check(resp: Response) -> Result<Response, SessionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(SessionError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_users(&self) -> Result<DirectoryListing, SessionError> {
        self.get_json(self.endpoint(&["api", "messages", "users"])?).await
    }

    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, SessionError> {
        self.get_json(self.endpoint(&["api", "messages", counterpart.as_str()])?)
            .await
    }

    async fn send_message(&self, recipient: &UserId, text: &str) -> Result<Message, SessionError> {
        let url = self.endpoint(&["api", "messages", "send", recipient.as_str()])?;
        debug!(url = %url, "POST");
        let resp = self
            .client
            .post(url)
            .header(USER_ID_HEADER, self.viewer.as_str())
            .json(&SendMessageRequest {
                text: text.to_string(),
            })
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_ids() {
        let config = ClientConfig::default().with_server_url("http://localhost:5000/");
        let api = HttpChatApi::new(&config, "me".into()).unwrap();
        let url = api.endpoint(&["api", "messages", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/messages/a%2Fb%20c");
    }

    #[test]
    fn test_endpoint_under_prefix() {
        let config = ClientConfig::default().with_server_url("https://farm.example/chat");
        let api = HttpChatApi::new(&config, "me".into()).unwrap();
        let url = api.endpoint(&["api", "messages", "users"]).unwrap();
        assert_eq!(url.as_str(), "https://farm.example/chat/api/messages/users");
    }
}
