//! WebSocket session transport and REST client for a hub.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    hubrelay_channels::{
        Error as ChannelError, HubClient, HubConnection, HubTransport, Result as ChannelResult,
        ThreadInfo,
    },
    reqwest::{Method, RequestBuilder, Response, StatusCode},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::net::TcpStream,
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info},
    url::Url,
};

use crate::{Error, Result, registry::OrgSpec};

const ORG_HEADER: &str = "X-Org-Id";
const USER_AGENT: &str = concat!("hubrelay/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const PING_FRAME: &str = r#"{"type":"ping"}"#;

#[derive(Deserialize)]
struct TicketResponse {
    ticket: String,
}

/// REST calls against one org's hub, authenticated as its agent.
pub struct HttpHubClient {
    base: Url,
    org_id: String,
    token: Secret<String>,
    http: reqwest::Client,
}

impl HttpHubClient {
    pub fn new(spec: &OrgSpec) -> Result<Self> {
        let base = Url::parse(&spec.hub_url)
            .map_err(|e| Error::config(format!("org \"{}\": bad hub_url: {e}", spec.label)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "org \"{}\": hub_url must be http or https, got {}",
                spec.label,
                base.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            base,
            org_id: spec.org_id.clone(),
            token: spec.token.clone(),
            http,
        })
    }

    /// `<hub>/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> ChannelResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ChannelError::invalid_input(format!("hub url {} has no path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        url.set_query(None);
        Ok(url)
    }

    /// Streaming URL for a ticket: the hub URL with a `ws`/`wss` scheme,
    /// path `/ws` and the ticket as query parameter.
    pub fn stream_url(&self, ticket: &str) -> ChannelResult<Url> {
        let mut url = self.endpoint(&["ws"])?;
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|()| ChannelError::invalid_input(format!("cannot use {scheme} for {}", self.base)))?;
        url.query_pairs_mut().append_pair("ticket", ticket);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
            .header(ORG_HEADER, &self.org_id)
    }

    async fn execute(&self, builder: RequestBuilder, what: &str) -> ChannelResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| ChannelError::external(format!("{what}: request failed"), e))
    }

    async fn execute_ok(&self, builder: RequestBuilder, what: &str) -> ChannelResult<Response> {
        self.execute(builder, what)
            .await?
            .error_for_status()
            .map_err(|e| ChannelError::external(format!("{what}: hub refused"), e))
    }

    /// Exchange the agent token for a one-shot streaming ticket.
    pub async fn ws_ticket(&self) -> ChannelResult<String> {
        let url = self.endpoint(&["api", "ws-ticket"])?;
        let response = self
            .execute_ok(self.request(Method::POST, url), "ticket exchange")
            .await?;
        let body: TicketResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::external("ticket exchange: bad response", e))?;
        Ok(body.ticket)
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn send_direct(&self, to: &str, content: &str) -> ChannelResult<()> {
        let url = self.endpoint(&["api", "send"])?;
        let body = serde_json::json!({ "to": to, "content": content });
        self.execute_ok(self.request(Method::POST, url).json(&body), "send")
            .await?;
        Ok(())
    }

    async fn send_thread(&self, thread_id: &str, content: &str) -> ChannelResult<()> {
        let url = self.endpoint(&["api", "threads", thread_id, "messages"])?;
        let body = serde_json::json!({ "content": content });
        self.execute_ok(self.request(Method::POST, url).json(&body), "thread send")
            .await?;
        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> ChannelResult<ThreadInfo> {
        let url = self.endpoint(&["api", "threads", thread_id])?;
        let response = self
            .execute(self.request(Method::GET, url), "thread lookup")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChannelError::not_found(format!("thread {thread_id}")));
        }
        response
            .error_for_status()
            .map_err(|e| ChannelError::external("thread lookup: hub refused", e))?
            .json()
            .await
            .map_err(|e| ChannelError::external("thread lookup: bad response", e))
    }

    async fn get_json(
        &self,
        path: &[&str],
        params: &[(&str, String)],
    ) -> ChannelResult<serde_json::Value> {
        let mut url = self.endpoint(path)?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        let what = path.join("/");
        debug!(path = %what, "hub query");
        let response = self.execute(self.request(Method::GET, url), &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChannelError::not_found(what));
        }
        response
            .error_for_status()
            .map_err(|e| ChannelError::external(format!("{what}: hub refused"), e))?
            .json()
            .await
            .map_err(|e| ChannelError::external(format!("{what}: bad response"), e))
    }
}

/// Opens ticket-authenticated WebSocket streams for one org.
pub struct WsTransport {
    label: String,
    client: HttpHubClient,
}

impl WsTransport {
    pub fn new(spec: &Arc<OrgSpec>) -> Result<Self> {
        Ok(Self {
            label: spec.label.clone(),
            client: HttpHubClient::new(spec)?,
        })
    }
}

#[async_trait]
impl HubTransport for WsTransport {
    async fn connect(&self) -> ChannelResult<Box<dyn HubConnection>> {
        let ticket = self.client.ws_ticket().await?;
        let url = self.client.stream_url(&ticket)?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::external("websocket connect failed", e))?;
        info!(org = %self.label, "hub stream open");
        Ok(Box::new(WsConnection { stream }))
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl HubConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<ChannelResult<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "hub closed the stream");
                    return None;
                },
                // Protocol pings are answered by tungstenite.
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    return Some(Err(ChannelError::external("websocket read failed", e)));
                },
                None => return None,
            }
        }
    }

    async fn ping(&mut self) -> ChannelResult<()> {
        self.stream
            .send(Message::Text(PING_FRAME.to_string().into()))
            .await
            .map_err(|e| ChannelError::external("websocket keepalive failed", e))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close");
        }
    }
}
