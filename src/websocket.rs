//! # Voice WebSocket Handler
//!
//! Bridges a browser (or test client) to a speech-to-speech assistant session.
//! Clients connect to `/ws`, presenting the API key as the WebSocket
//! subprotocol, and stream base64 PCM16 audio in text frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: `Sec-WebSocket-Protocol: <api key>`; the key is echoed back
//! 2. **Session**: The assistant session opens in the background; once ready
//!    the assistant is prompted to greet the caller
//! 3. **Audio In**: Each client frame is a bare base64 PCM16 mono string
//! 4. **Audio Out**: `{"event": "media", "data": "<base64>"}`
//! 5. **Barge-in**: `{"event": "stop"}` tells the client to flush playback
//!
//! ## Actor Model:
//! Each connection is a `VoiceSocket` actor. The assistant session lives in a
//! tokio task that feeds events back to the actor with `do_send`, so all
//! socket writes happen on the actor's own context.

use crate::assistant::{
    AssistantEvent, AssistantSession, SessionInput, SessionSetup, SpeechToSpeechService, ToolCall,
};
use crate::audio::{Frame, StartFrame};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::serializer::Base64AudioSerializer;
use crate::state::{AppState, SessionCounter};
use crate::tools::ToolRegistry;
use crate::transcript::TranscriptProcessor;

use actix::prelude::*;
use actix_web::http::header::SEC_WEBSOCKET_PROTOCOL;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// No client traffic for longer than `CLIENT_TIMEOUT`.
fn heartbeat_expired(last_heartbeat: Instant, now: Instant) -> bool {
    now.saturating_duration_since(last_heartbeat) > CLIENT_TIMEOUT
}

/// The assistant backend shared by every connection.
#[derive(Clone)]
pub struct VoiceBackend {
    pub service: Arc<dyn SpeechToSpeechService>,
    pub tools: ToolRegistry,
}

impl VoiceBackend {
    pub fn new(service: Arc<dyn SpeechToSpeechService>, tools: ToolRegistry) -> Self {
        Self { service, tools }
    }
}

/// WebSocket actor for one voice session.
pub struct VoiceSocket {
    id: Uuid,
    app_state: AppState,
    config: AppConfig,
    backend: VoiceBackend,
    serializer: Base64AudioSerializer,
    transcript: TranscriptProcessor,
    /// Set once the assistant session is open
    session_input: Option<mpsc::Sender<SessionInput>>,
    warned_not_ready: bool,
    last_heartbeat: Instant,
}

impl VoiceSocket {
    pub fn new(app_state: AppState, backend: VoiceBackend) -> Self {
        let config = app_state.get_config();
        let serializer = Base64AudioSerializer::new(config.audio.serializer_params());

        Self {
            id: Uuid::new_v4(),
            app_state,
            config,
            backend,
            serializer,
            transcript: TranscriptProcessor::new(),
            session_input: None,
            warned_not_ready: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Open the assistant session in the background.
    fn connect_assistant(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let setup = match SessionSetup::from_config(&self.config, &self.backend.tools) {
            Ok(setup) => setup,
            Err(e) => {
                error!(session = %self.id, "Cannot start assistant session: {}", e);
                ctx.stop();
                return;
            }
        };

        let service = self.backend.service.clone();
        let addr = ctx.address();
        let id = self.id;

        tokio::spawn(async move {
            match service.connect(setup).await {
                Ok(AssistantSession { input, events }) => {
                    addr.do_send(SessionReady(input));
                    let mut events = ReceiverStream::new(events);
                    while let Some(event) = events.next().await {
                        if !addr.connected() {
                            break;
                        }
                        addr.do_send(Forward(event));
                    }
                    debug!(session = %id, "Assistant event stream closed");
                }
                Err(e) => addr.do_send(SessionFailed(e.to_string())),
            }
        });
    }

    /// Decode client audio and queue it for the assistant.
    fn forward_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let Some(frame) = self.serializer.deserialize(data) else {
            return;
        };

        let Some(input) = &self.session_input else {
            if !self.warned_not_ready {
                warn!(session = %self.id, "Assistant session not ready, dropping audio");
                self.warned_not_ready = true;
            }
            return;
        };

        match input.try_send(SessionInput::Audio(frame)) {
            Ok(()) => self.app_state.record(SessionCounter::AudioIn),
            Err(TrySendError::Full(_)) => {
                warn!(session = %self.id, "Assistant input queue full, dropping audio frame");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(session = %self.id, "Assistant session closed");
                ctx.stop();
            }
        }
    }

    fn send_frame(&mut self, frame: Frame, ctx: &mut ws::WebsocketContext<Self>) -> bool {
        match self.serializer.serialize(&frame) {
            Some(json) => {
                ctx.text(json);
                true
            }
            None => false,
        }
    }

    /// Run a tool call off the actor and hand the result to the session.
    fn run_tool(&self, call: ToolCall) {
        let Some(input) = self.session_input.clone() else {
            warn!(session = %self.id, tool = %call.name, "Tool call before session was ready");
            return;
        };

        self.app_state.record(SessionCounter::ToolCall);
        let tools = self.backend.tools.clone();
        let id = self.id;

        tokio::spawn(async move {
            info!(session = %id, tool = %call.name, "Running tool call");
            let content = tools.execute(&call.name, call.arguments).await;
            let result = SessionInput::ToolResult {
                tool_use_id: call.tool_use_id,
                content,
            };
            if input.send(result).await.is_err() {
                debug!(session = %id, "Session closed before tool result was delivered");
            }
        });
    }
}

/// The assistant session is open.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionReady(mpsc::Sender<SessionInput>);

/// The assistant session could not be opened.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionFailed(String);

/// An event from the assistant session.
#[derive(Message)]
#[rtype(result = "()")]
struct Forward(AssistantEvent);

impl Actor for VoiceSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session = %self.id, "WebSocket connection started");

        self.serializer.setup(&StartFrame {
            audio_in_sample_rate: self.config.audio.sample_rate,
            audio_out_sample_rate: self.config.audio.output_sample_rate,
        });
        debug!(
            session = %self.id,
            serializer = ?self.serializer.serializer_type(),
            client_rate = self.serializer.target_sample_rate(),
            pipeline_rate = self.serializer.sample_rate(),
            "Serializer ready"
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if heartbeat_expired(act.last_heartbeat, Instant::now()) {
                warn!(session = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        self.connect_assistant(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(input) = self.session_input.take() {
            // Dropping the sender closes the session too, if the queue is full
            let _ = input.try_send(SessionInput::Close);
        }
        self.app_state.release_session();

        info!(
            session = %self.id,
            transcript_messages = self.transcript.len(),
            "WebSocket connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward_audio(text.as_bytes(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward_audio(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session = %self.id, "Client disconnected: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SessionReady> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionReady, ctx: &mut Self::Context) {
        info!(session = %self.id, "Assistant session ready");

        if self.config.assistant.greet_on_connect
            && msg.0.try_send(SessionInput::TriggerResponse).is_err()
        {
            warn!(session = %self.id, "Could not trigger assistant greeting");
        }

        if msg.0.is_closed() {
            ctx.stop();
            return;
        }
        self.session_input = Some(msg.0);
    }
}

impl Handler<SessionFailed> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionFailed, ctx: &mut Self::Context) {
        error!(session = %self.id, "Assistant session failed: {}", msg.0);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some("Assistant unavailable".to_string()),
        }));
        ctx.stop();
    }
}

impl Handler<Forward> for VoiceSocket {
    type Result = ();

    fn handle(&mut self, msg: Forward, ctx: &mut Self::Context) {
        match msg.0 {
            AssistantEvent::Audio(frame) => {
                if self.send_frame(Frame::OutputAudio(frame), ctx) {
                    self.app_state.record(SessionCounter::AudioOut);
                }
            }
            AssistantEvent::Interrupted => {
                debug!(session = %self.id, "User interrupted the assistant");
                if self.send_frame(Frame::StartInterruption, ctx) {
                    self.app_state.record(SessionCounter::Interruption);
                }
            }
            AssistantEvent::Text {
                role,
                content,
                is_final,
            } => {
                self.transcript.push(role, &content, is_final);
            }
            AssistantEvent::ToolCall(call) => self.run_tool(call),
            AssistantEvent::Ended => {
                info!(session = %self.id, "Assistant ended the session");
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
            AssistantEvent::Error(message) => {
                error!(session = %self.id, "Assistant session error: {}", message);
                ctx.close(Some(ws::CloseCode::Error.into()));
                ctx.stop();
            }
        }
    }
}

/// Subprotocols offered in the `Sec-WebSocket-Protocol` header.
fn offered_protocols(req: &HttpRequest) -> Vec<String> {
    req.headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|protocol| protocol.trim().to_string())
        .filter(|protocol| !protocol.is_empty())
        .collect()
}

/// WebSocket endpoint handler.
///
/// ## Responses:
/// - **101**: upgraded; the API key is the selected subprotocol
/// - **401**: the API key was not offered as a subprotocol
/// - **503**: the concurrent session limit is reached
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    backend: web::Data<VoiceBackend>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    let api_key = config.auth.api_key.as_str();

    if !offered_protocols(&req).iter().any(|protocol| protocol == api_key) {
        warn!(
            peer = ?req.connection_info().peer_addr(),
            "Rejected WebSocket connection without a valid subprotocol"
        );
        return Err(AppError::Unauthorized(
            "Missing or invalid WebSocket subprotocol credential".to_string(),
        )
        .into());
    }

    if !app_state.try_acquire_session(config.performance.max_concurrent_sessions) {
        warn!("Rejected WebSocket connection: session limit reached");
        return Err(AppError::Unavailable("Too many active voice sessions".to_string()).into());
    }

    info!(peer = ?req.connection_info().peer_addr(), "New WebSocket connection");

    let actor = VoiceSocket::new(app_state.get_ref().clone(), backend.get_ref().clone());
    let response = ws::WsResponseBuilder::new(actor, &req, stream)
        .protocols(&[api_key])
        .start();

    if response.is_err() {
        app_state.release_session();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::scripted::ScriptedService;
    use crate::audio::{pcm, AudioRawFrame};
    use crate::transcript::Role;
    use actix_web::dev::ServerHandle;
    use actix_web::{http::StatusCode, test, App, HttpServer};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::io::Write;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};

    const API_KEY: &str = "test-api-key";

    fn test_state(prompt: &tempfile::NamedTempFile) -> AppState {
        let mut config = AppConfig::default();
        config.auth.api_key = API_KEY.to_string();
        config.assistant.prompt_path = prompt.path().to_path_buf();
        AppState::new(config)
    }

    fn prompt_file() -> tempfile::NamedTempFile {
        let mut prompt = tempfile::NamedTempFile::new().unwrap();
        write!(prompt, "You are a banking assistant.").unwrap();
        prompt
    }

    fn backend(service: ScriptedService) -> VoiceBackend {
        VoiceBackend::new(Arc::new(service), ToolRegistry::banking())
    }

    #[actix_web::test]
    async fn test_rejects_missing_subprotocol() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .app_data(web::Data::new(backend(ScriptedService::default())))
                .route("/ws", web::get().to(voice_websocket)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/ws")
            .insert_header((SEC_WEBSOCKET_PROTOCOL, "wrong-key"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[actix_web::test]
    async fn test_rejects_when_session_limit_reached() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let limit = state.get_config().performance.max_concurrent_sessions;
        for _ in 0..limit {
            assert!(state.try_acquire_session(limit));
        }

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .app_data(web::Data::new(backend(ScriptedService::default())))
                .route("/ws", web::get().to(voice_websocket)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ws")
            .insert_header((SEC_WEBSOCKET_PROTOCOL, API_KEY))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().active_sessions as usize, limit);
    }

    #[actix_web::test]
    async fn test_offered_protocols_are_split_and_trimmed() {
        let req = test::TestRequest::get()
            .insert_header((SEC_WEBSOCKET_PROTOCOL, "chat, test-api-key ,"))
            .to_http_request();
        assert_eq!(offered_protocols(&req), vec!["chat", "test-api-key"]);
    }

    #[actix_web::test]
    async fn test_heartbeat_expiry() {
        let last = Instant::now();
        assert!(!heartbeat_expired(last, last + HEARTBEAT_INTERVAL));
        assert!(!heartbeat_expired(last, last + CLIENT_TIMEOUT));
        assert!(heartbeat_expired(last, last + CLIENT_TIMEOUT + Duration::from_millis(1)));
        // A heartbeat newer than the check is never stale
        assert!(!heartbeat_expired(last + Duration::from_secs(1), last));
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    type ClientSocket =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    /// Real server on an ephemeral port, returning its handle and port.
    fn start_server(state: &AppState, service: ScriptedService) -> (ServerHandle, u16) {
        let server_state = state.clone();
        let server_backend = backend(service);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(server_state.clone()))
                .app_data(web::Data::new(server_backend.clone()))
                .route("/ws", web::get().to(voice_websocket))
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (handle, port)
    }

    async fn connect(port: u16) -> ClientSocket {
        let mut request = format!("ws://127.0.0.1:{}/ws", port)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", API_KEY.parse().unwrap());
        let (socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
        assert_eq!(
            response.headers().get("Sec-WebSocket-Protocol").unwrap(),
            API_KEY
        );
        socket
    }

    /// Next JSON event sent by the server.
    async fn next_event(socket: &mut ClientSocket) -> Value {
        loop {
            if let Message::Text(text) = socket.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Close code sent by the server, `None` if the stream ends without one.
    async fn close_code(socket: &mut ClientSocket) -> Option<CloseCode> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Close(frame)) => return frame.map(|frame| frame.code),
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
            None
        })
        .await
        .expect("socket not closed in time")
    }

    fn audio_chunk(samples: &[i16]) -> Message {
        Message::Text(STANDARD.encode(pcm::samples_to_bytes(samples)))
    }

    #[actix_web::test]
    async fn test_voice_session_end_to_end() {
        let prompt = prompt_file();
        let state = test_state(&prompt);

        let speech = pcm::samples_to_bytes(&[100, -100, 200, -200]);
        let service = ScriptedService::new(vec![
            AssistantEvent::Text {
                role: Role::Assistant,
                content: "Hello, how can I help?".to_string(),
                is_final: true,
            },
            AssistantEvent::Audio(AudioRawFrame::mono(speech.clone(), 16000)),
            AssistantEvent::Interrupted,
            AssistantEvent::ToolCall(ToolCall {
                tool_use_id: "tool-1".to_string(),
                name: "get_balance".to_string(),
                arguments: json!({
                    "username": "suresh",
                    "secret_passcode": "nova sonic is awesome",
                    "account_type": "savings"
                }),
            }),
        ]);

        let (handle, port) = start_server(&state, service.clone());
        let mut socket = connect(port).await;

        // Assistant audio arrives as a media event, the barge-in as stop
        let media = next_event(&mut socket).await;
        assert_eq!(media["event"], "media");
        assert_eq!(STANDARD.decode(media["data"].as_str().unwrap()).unwrap(), speech);
        assert_eq!(next_event(&mut socket).await, json!({"event": "stop"}));

        // Client audio is forwarded to the session
        socket.send(audio_chunk(&[1, 2, 3, 4])).await.unwrap();

        wait_for(|| service.count_audio() == 1).await;
        wait_for(|| {
            service.inputs().iter().any(|input| {
                *input
                    == SessionInput::ToolResult {
                        tool_use_id: "tool-1".to_string(),
                        content: json!({"balance": 5000}),
                    }
            })
        })
        .await;
        assert_eq!(service.inputs()[0], SessionInput::TriggerResponse);
        assert!(service.setups.lock().unwrap()[0]
            .system_instruction
            .starts_with("You are a banking assistant.\n"));

        socket.close(None).await.unwrap();
        wait_for(|| service.inputs().contains(&SessionInput::Close)).await;
        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.total_sessions, 1);
        assert_eq!(metrics.audio_frames_in, 1);
        assert_eq!(metrics.audio_frames_out, 1);
        assert_eq!(metrics.interruptions, 1);
        assert_eq!(metrics.tool_calls, 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_failed_assistant_connect_closes_socket() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let (handle, port) = start_server(&state, ScriptedService::failing());
        let mut socket = connect(port).await;

        assert_eq!(close_code(&mut socket).await, Some(CloseCode::Error));

        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_session_end_closes_normally() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let (handle, port) = start_server(&state, ScriptedService::new(vec![AssistantEvent::Ended]));
        let mut socket = connect(port).await;

        assert_eq!(close_code(&mut socket).await, Some(CloseCode::Normal));

        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_session_error_closes_with_error_code() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let service = ScriptedService::new(vec![AssistantEvent::Error("boom".to_string())]);
        let (handle, port) = start_server(&state, service);
        let mut socket = connect(port).await;

        assert_eq!(close_code(&mut socket).await, Some(CloseCode::Error));

        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_audio_before_session_ready_is_dropped() {
        let prompt = prompt_file();
        let state = test_state(&prompt);
        let service = ScriptedService::default().with_connect_delay(Duration::from_millis(500));
        let (handle, port) = start_server(&state, service.clone());
        let mut socket = connect(port).await;

        // Sent while the assistant is still connecting
        socket.send(audio_chunk(&[1, 2, 3, 4])).await.unwrap();
        socket.send(audio_chunk(&[5, 6, 7, 8])).await.unwrap();

        wait_for(|| service.inputs().contains(&SessionInput::TriggerResponse)).await;
        socket.send(audio_chunk(&[9, 10, 11, 12])).await.unwrap();
        wait_for(|| service.count_audio() == 1).await;

        socket.close(None).await.unwrap();
        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;
        assert_eq!(service.count_audio(), 1);
        assert_eq!(state.get_metrics_snapshot().audio_frames_in, 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_full_input_queue_drops_audio() {
        let prompt = prompt_file();
        let mut config = test_state(&prompt).get_config();
        config.assistant.greet_on_connect = false;
        let state = AppState::new(config);

        // Room for one frame; the session doesn't read for a while
        let service = ScriptedService::new(vec![AssistantEvent::Audio(AudioRawFrame::mono(
            pcm::samples_to_bytes(&[1, 1]),
            16000,
        ))])
        .with_stalled_input(1, Duration::from_secs(2));
        let (handle, port) = start_server(&state, service.clone());
        let mut socket = connect(port).await;

        // Media means the session is ready
        assert_eq!(next_event(&mut socket).await["event"], "media");
        for _ in 0..3 {
            socket.send(audio_chunk(&[1, 2, 3, 4])).await.unwrap();
        }
        socket.close(None).await.unwrap();

        wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await;
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.audio_frames_in, 1);
        assert_eq!(metrics.audio_frames_out, 1);

        handle.stop(true).await;
    }
}
