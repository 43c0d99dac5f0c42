use crate::error::RemoteError;
use async_trait::async_trait;
use flowbox_config::RemoteConfig;
use flowbox_core::{
    Comment, Connections, Conversation, ConversationId, ConversationUpdate, Message, NewComment,
    OutgoingMessage, UserId,
};
use flowbox_stream::{
    CollaboratorError, CommentStore, ConnectionsDirectory, ConversationStore, Transport,
};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

/// JSON client for the inbox API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base: Url, token: Option<String>, http: reqwest::Client) -> Self {
        Self { http, base, token }
    }

    /// Base URL and timeout from config; the bearer token from the
    /// environment variable it names, when set.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        let token = std::env::var(&config.api_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty());
        if token.is_none() {
            tracing::warn!(env = %config.api_token_env, "no api token set, requests are unauthenticated");
        }
        Ok(Self::new(config.base_url()?, token, http))
    }

    /// Appends percent-encoded path segments to the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Build(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), context, "api call refused");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                context: context.to_string(),
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, RemoteError> {
        Ok(self.execute(request, context).await?.json::<T>().await?)
    }
}

/// Conversation, comment and connection stores over [`ApiClient`].
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: ApiClient,
}

impl HttpStore {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConversationStore for HttpStore {
    async fn list_conversations(
        &self,
        user: &UserId,
    ) -> Result<Vec<Conversation>, CollaboratorError> {
        let mut url = self.client.endpoint(&["conversations"])?;
        url.query_pairs_mut().append_pair("user_id", user.as_str());
        let request = self.client.request(Method::GET, url);
        Ok(self.client.json(request, "list conversations").await?)
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        update: &ConversationUpdate,
    ) -> Result<Conversation, CollaboratorError> {
        let url = self.client.endpoint(&["conversations", id.as_str()])?;
        let request = self.client.request(Method::PATCH, url).json(update);
        Ok(self.client.json(request, "update conversation").await?)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, CollaboratorError> {
        let url = self
            .client
            .endpoint(&["conversations", id.as_str(), "messages"])?;
        let request = self.client.request(Method::GET, url);
        Ok(self.client.json(request, "list messages").await?)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), CollaboratorError> {
        let url = self.client.endpoint(&["conversations", id.as_str()])?;
        let request = self.client.request(Method::DELETE, url);
        self.client.execute(request, "delete conversation").await?;
        Ok(())
    }
}

#[async_trait]
impl CommentStore for HttpStore {
    async fn list_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, CollaboratorError> {
        let url = self
            .client
            .endpoint(&["conversations", id.as_str(), "comments"])?;
        let request = self.client.request(Method::GET, url);
        Ok(self.client.json(request, "list comments").await?)
    }

    async fn add_comment(
        &self,
        id: &ConversationId,
        comment: &NewComment,
    ) -> Result<Comment, CollaboratorError> {
        let url = self
            .client
            .endpoint(&["conversations", id.as_str(), "comments"])?;
        let request = self.client.request(Method::POST, url).json(comment);
        Ok(self.client.json(request, "add comment").await?)
    }
}

#[async_trait]
impl ConnectionsDirectory for HttpStore {
    async fn list_connections(&self, user: &UserId) -> Result<Connections, CollaboratorError> {
        let url = self
            .client
            .endpoint(&["users", user.as_str(), "connections"])?;
        let request = self.client.request(Method::GET, url);
        Ok(self.client.json(request, "list connections").await?)
    }
}

/// Sends messaging replies through the API's relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayTransport {
    client: ApiClient,
}

impl RelayTransport {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), CollaboratorError> {
        let url = self.client.endpoint(&["messaging", "send"])?;
        let request = self.client.request(Method::POST, url).json(message);
        self.client.execute(request, "relay message").await?;
        tracing::debug!(recipients = message.to.len(), "message handed to relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(
            Url::parse(base).expect("valid base"),
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let client = client("https://api.example.com/v1/");
        let url = client
            .endpoint(&["conversations", "+1415 555/1234", "messages"])
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/conversations/+1415%20555%2F1234/messages"
        );
    }

    #[test]
    fn endpoint_works_without_trailing_slash() {
        let client = client("https://api.example.com");
        let url = client.endpoint(&["messaging", "send"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://api.example.com/messaging/send");
    }

    #[test]
    fn config_base_url_is_used() {
        let config = flowbox_config::AppConfig::default().remote;
        let client = ApiClient::from_config(&config).expect("client built");
        let url = client.endpoint(&["users", "u1", "connections"]).expect("endpoint");
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/users/u1/connections");
    }
}
