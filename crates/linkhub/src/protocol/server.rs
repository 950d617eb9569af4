//! Linkhub MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! It routes MCP tool calls to the session manager.

use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use linkhub_core::{Error, SessionEvent, SessionId, SessionStatus};
use linkhub_session::{
    CreateSessionRequest, InboundFrame, NewSession, RealtimeChannel, RealtimeClient,
    SessionManager, PAIRING_METHOD,
};

use crate::tools::*;

/// Longest wait accepted by session_wait_for_event.
const MAX_WAIT_MS: u64 = 300_000;

/// Event names observers can wait for.
const EVENT_NAMES: [&str; 5] = [
    "session:status",
    "session:qr",
    "session:pairing-code",
    "session:connected",
    "session:error",
];

fn parse_session_id(raw: &str) -> Result<SessionId, McpError> {
    SessionId::parse(raw).map_err(|e| {
        warn!("Rejected session id {:?}", raw);
        McpError::new(
            ErrorCode(-32602), // Invalid params
            e.to_string(),
            None,
        )
    })
}

/// Map a session error to an MCP error, caller mistakes as invalid params.
fn to_mcp_error(context: &str, e: Error) -> McpError {
    let code = match e {
        Error::SessionNotFound(_)
        | Error::InvalidSessionId(_)
        | Error::SessionLimitReached(_)
        | Error::SessionNotConnected(_)
        | Error::RecipientNotFound(_)
        | Error::InvalidRecipient(_)
        | Error::InvalidInput(_) => ErrorCode(-32602), // Invalid params
        _ => ErrorCode(-32603),                         // Internal error
    };
    McpError::new(code, format!("{context}: {e}"), None)
}

fn success<T: Serialize>(response: &T, fallback: impl FnOnce() -> String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(response).unwrap_or_else(|_| fallback()),
    )])
}

/// Linkhub MCP Server
///
/// Administers messaging sessions and exposes them via MCP tools.
#[derive(Clone)]
pub struct LinkhubMcpServer {
    /// Session registry shared with the realtime channel
    manager: SessionManager,
    /// Realtime channel used to observe session events
    realtime: RealtimeChannel,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl LinkhubMcpServer {
    /// Create a server over `manager`.
    pub fn new(manager: SessionManager) -> Self {
        Self {
            realtime: RealtimeChannel::new(manager.clone()),
            manager,
            tool_router: Self::tool_router(),
        }
    }

    /// Session manager behind this server.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// List all known sessions
    #[tool(description = "List all known messaging sessions with their current status")]
    #[instrument(skip_all)]
    async fn session_list(
        &self,
        Parameters(_params): Parameters<SessionListParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Listing sessions");

        let sessions = self.manager.list_sessions();
        let count = sessions.len();
        let live = self.manager.session_count();
        info!("Found {} session(s), {} live", count, live);

        let response = SessionListResponse {
            sessions,
            count,
            live,
        };
        Ok(success(&response, || format!("{count} sessions")))
    }

    /// Create a session
    #[tool(
        description = "Create a messaging session. Without phone_number the session links by QR \
                       (wait for session:qr); with phone_number it links by pairing code \
                       (wait for session:pairing-code)"
    )]
    #[instrument(skip_all)]
    async fn session_create(
        &self,
        Parameters(params): Parameters<SessionCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Creating session: session_id={}, pairing={}",
            params.session_id,
            params.phone_number.is_some()
        );

        let session_id = parse_session_id(&params.session_id)?;
        let request = NewSession {
            session_id: session_id.clone(),
            name: params.name,
            phone_number: params.phone_number,
        };

        let session = self.manager.open_session(request).await.map_err(|e| {
            error!("Failed to create session: {}", e);
            to_mcp_error("Failed to create session", e)
        })?;

        let response = SessionCreateResponse {
            session_id: session_id.to_string(),
            status: session.status,
            message: "Session created".to_string(),
        };
        Ok(success(&response, || session_id.to_string()))
    }

    /// Delete a session
    #[tool(description = "Log out and delete a session with its stored credentials and metadata")]
    #[instrument(skip_all)]
    async fn session_delete(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Deleting session: session_id={}", params.session_id);

        let session_id = parse_session_id(&params.session_id)?;
        self.manager
            .delete_session(&session_id)
            .await
            .map_err(|e| to_mcp_error("Failed to delete session", e))?;

        let response = SessionActionResponse {
            session_id: session_id.to_string(),
            message: "Session deleted".to_string(),
        };
        Ok(success(&response, || "Session deleted".to_string()))
    }

    /// Disconnect a session
    #[tool(description = "Log a session out and mark it disconnected, keeping its metadata")]
    #[instrument(skip_all)]
    async fn session_disconnect(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Disconnecting session: session_id={}", params.session_id);

        let session_id = parse_session_id(&params.session_id)?;
        self.manager
            .disconnect_session(&session_id)
            .await
            .map_err(|e| to_mcp_error("Failed to disconnect session", e))?;

        let response = SessionActionResponse {
            session_id: session_id.to_string(),
            message: "Session disconnected".to_string(),
        };
        Ok(success(&response, || "Session disconnected".to_string()))
    }

    /// Reconnect a session
    #[tool(description = "Recreate the engine of a session from its stored credentials")]
    #[instrument(skip_all)]
    async fn session_reconnect(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Reconnecting session: session_id={}", params.session_id);

        let session_id = parse_session_id(&params.session_id)?;
        let session = self
            .manager
            .reconnect_session(&session_id)
            .await
            .map_err(|e| to_mcp_error("Failed to reconnect session", e))?;

        let response = SessionCreateResponse {
            session_id: session_id.to_string(),
            status: session.status,
            message: "Session reconnecting".to_string(),
        };
        Ok(success(&response, || session_id.to_string()))
    }

    /// Get the status of a session
    #[tool(description = "Get the stored descriptor of a session with its live status")]
    #[instrument(skip_all)]
    async fn session_status(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Session status: session_id={}", params.session_id);

        let session_id = parse_session_id(&params.session_id)?;
        let status = self
            .manager
            .session_status(&session_id)
            .map_err(|e| to_mcp_error("Failed to get session status", e))?;

        Ok(success(&status, || status.status.to_string()))
    }

    /// Send a message
    #[tool(description = "Send a text message from a connected session to one phone number")]
    #[instrument(skip_all)]
    async fn message_send(
        &self,
        Parameters(params): Parameters<MessageSendParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Sending message: session_id={}", params.session_id);

        let session_id = parse_session_id(&params.session_id)?;
        let receipt = self
            .manager
            .send_message(&session_id, &params.number, &params.message)
            .await
            .map_err(|e| {
                warn!("Send failed: {}", e);
                to_mcp_error("Failed to send message", e)
            })?;

        let response = MessageSendResponse {
            session_id: session_id.to_string(),
            number: params.number,
            receipt,
            message: "Message sent".to_string(),
        };
        Ok(success(&response, || "Message sent".to_string()))
    }

    /// Send a message to many recipients
    #[tool(
        description = "Send the same text from a connected session to many phone numbers, \
                       one after another with a short pause, reporting sent, not_found or \
                       error per recipient"
    )]
    #[instrument(skip_all)]
    async fn message_send_bulk(
        &self,
        Parameters(params): Parameters<MessageSendBulkParams>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = parse_session_id(&params.session_id)?;
        let numbers = params.numbers.into_numbers();
        if numbers.is_empty() {
            return Err(McpError::new(
                ErrorCode(-32602),
                "No recipients given".to_string(),
                None,
            ));
        }
        info!(
            "Bulk sending: session_id={}, recipients={}",
            session_id,
            numbers.len()
        );

        let results = self
            .manager
            .send_bulk(&session_id, &numbers, &params.message)
            .await
            .map_err(|e| to_mcp_error("Failed to send messages", e))?;

        let response = MessageSendBulkResponse::new(session_id.to_string(), results);
        Ok(success(&response, || {
            format!("{}/{} sent", response.sent, response.total)
        }))
    }

    /// Wait for a session event
    #[tool(
        description = "Wait for the next event of a session, optionally only a given event \
                       (session:status, session:qr, session:pairing-code, session:connected, \
                       session:error)"
    )]
    #[instrument(skip_all)]
    async fn session_wait_for_event(
        &self,
        Parameters(params): Parameters<WaitForEventParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            "Waiting for event: session_id={}, event={:?}, timeout={}ms",
            params.session_id, params.event, params.timeout_ms
        );

        let session_id = parse_session_id(&params.session_id)?;
        if let Some(name) = &params.event {
            if !EVENT_NAMES.contains(&name.as_str()) {
                return Err(McpError::new(
                    ErrorCode(-32602),
                    format!("Unknown event: {name}"),
                    None,
                ));
            }
        }

        let mut client = self.realtime.connect();
        client
            .handle(InboundFrame::JoinSession(session_id.to_string()))
            .await;

        let wanted = params.event.clone();
        let response = wait_on(&mut client, &session_id, params.timeout_ms, |event| {
            wanted
                .as_deref()
                .map_or(true, |name| name == event.name())
        })
        .await;

        Ok(success(&response, || response.message.clone()))
    }

    /// Create a session and wait for its linking challenge
    #[tool(
        description = "Create a session over the realtime channel and wait for its first \
                       linking event: session:qr (or session:pairing-code when phone_number \
                       is given), session:connected, or session:error"
    )]
    #[instrument(skip_all)]
    async fn session_link(
        &self,
        Parameters(params): Parameters<SessionLinkParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Linking session: session_id={}, pairing={}",
            params.session_id,
            params.phone_number.is_some()
        );

        let session_id = parse_session_id(&params.session_id)?;
        let connected = self
            .manager
            .get_session(&session_id)
            .is_some_and(|live| live.status == SessionStatus::Connected);
        if connected {
            let response = WaitForEventResponse {
                session_id: session_id.to_string(),
                received: false,
                waited_ms: 0,
                event: None,
                message: "Session already connected".to_string(),
            };
            return Ok(success(&response, || response.message.clone()));
        }

        let method = if params.phone_number.is_some() {
            PAIRING_METHOD
        } else {
            "qr"
        };
        let mut client = self.realtime.connect();
        client
            .handle(InboundFrame::JoinSession(session_id.to_string()))
            .await;
        client
            .handle(InboundFrame::CreateSession(CreateSessionRequest {
                session_id: Some(session_id.to_string()),
                name: params.name,
                method: Some(method.to_string()),
                phone_number: params.phone_number,
            }))
            .await;

        let response = wait_on(&mut client, &session_id, params.timeout_ms, |event| {
            !matches!(event, SessionEvent::Status { .. })
        })
        .await;

        Ok(success(&response, || response.message.clone()))
    }
}

/// Wait up to `timeout_ms` for the first event delivered to `client` that
/// matches `wanted`.
async fn wait_on(
    client: &mut RealtimeClient,
    session_id: &SessionId,
    timeout_ms: u64,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> WaitForEventResponse {
    let timeout = Duration::from_millis(timeout_ms.min(MAX_WAIT_MS));
    let start = Instant::now();
    let received = tokio::time::timeout(timeout, async {
        while let Some(outbound) = client.next_event().await {
            if outbound.session_id == *session_id && wanted(&outbound.event) {
                return Some(outbound.event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();
    let waited_ms = start.elapsed().as_millis() as u64;

    match received {
        Some(event) => {
            info!("Received {} for {} after {}ms", event.name(), session_id, waited_ms);
            WaitForEventResponse {
                session_id: session_id.to_string(),
                received: true,
                waited_ms,
                message: format!("Received {}", event.name()),
                event: Some(event),
            }
        }
        None => {
            warn!("No event for {} after {}ms", session_id, waited_ms);
            WaitForEventResponse {
                session_id: session_id.to_string(),
                received: false,
                waited_ms,
                event: None,
                message: format!("Timeout after {waited_ms}ms"),
            }
        }
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for LinkhubMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Linkhub MCP Server - Link and operate messaging sessions. \
                 Use session_link to start a session and receive its QR or pairing code, then \
                 session_wait_for_event to wait for session:connected, and message_send or \
                 message_send_bulk to send text once the session is connected."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
