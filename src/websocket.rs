//! # Call Bridge
//!
//! Bridges one telephony media stream to one realtime speech model session.
//! The provider opens a WebSocket to the configured stream path for every call;
//! each connection becomes a [`CallBridge`] actor.
//!
//! ## Per-Call Flow:
//! 1. **Upgrade**: refused with 503 when the call limit is reached
//! 2. **Actor start**: connects to the speech model and sends the session configuration
//! 3. **start**: captures the `streamSid` and arms the keepalive mark
//! 4. **media**: μ-law → PCM → speech model, and re-arms the silence debounce
//! 5. **debounce expiry**: commit, and request a response if none is outstanding
//! 6. **model audio**: PCM16 @ 24 kHz → μ-law @ 8 kHz → 20 ms frames to the caller
//! 7. **stop / either leg closing**: tear down both legs and every timer
//!
//! ## Actor Model:
//! The actor's mailbox serializes everything that touches call state: telephony
//! messages, speech model events (added as a second stream), timer expiries and
//! synthesized audio chunks. No locks are needed for per-call data.

use crate::audio::{MulawBuffer, PcmBuffer, TELEPHONY};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::realtime::{
    DebounceTicket, PlaybackTicket, RealtimeSession, ServerEvent, TurnAction, TurnOrchestrator,
};
use crate::state::AppState;
use crate::telephony::{self, MediaPayload, StartMetadata, TwilioInbound, TwilioOutbound};
use crate::tts::TtsClient;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the periodic mark that keeps the media stream active.
const KEEPALIVE_MARK: &str = "keepalive";

/// A reserved slot in the concurrent call limit, released on drop.
///
/// Held by the actor so the slot is returned however the call ends, including
/// an upgrade that never got as far as starting the actor.
struct CallSlot {
    state: AppState,
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.state.end_call();
    }
}

/// One chunk of synthesized μ-law audio, sent by the TTS task.
///
/// Tagged with the synthesis it belongs to; chunks an aborted task had already
/// queued are dropped on arrival.
#[derive(Message)]
#[rtype(result = "()")]
struct TtsAudio {
    playback: PlaybackTicket,
    mulaw: Vec<u8>,
}

/// The TTS task finished (or gave up).
#[derive(Message)]
#[rtype(result = "()")]
struct TtsFinished {
    playback: PlaybackTicket,
    failed: bool,
}

/// WebSocket actor for one phone call.
pub struct CallBridge {
    call_id: Uuid,
    state: AppState,
    config: AppConfig,
    _slot: CallSlot,

    /// Speech model leg; `None` until connected
    realtime: Option<RealtimeSession>,
    turn: TurnOrchestrator,
    tts: Option<TtsClient>,
    tts_task: Option<tokio::task::JoinHandle<()>>,

    /// Outbound frames can only be addressed once `start` supplied this
    stream_sid: Option<String>,
    call_sid: Option<String>,

    debounce: Option<SpawnHandle>,
    keepalive: Option<SpawnHandle>,

    frames_sent: u64,
    frames_dropped: u64,
}

impl CallBridge {
    fn new(state: AppState, config: AppConfig) -> Self {
        let tts = if config.tts.enabled {
            match TtsClient::new(config.tts.clone()) {
                Ok(client) => Some(client),
                Err(e) => {
                    error!("TTS client unavailable, responses will be silent: {:#}", e);
                    None
                }
            }
        } else {
            None
        };
        let turn = TurnOrchestrator::new(config.debounce(), config.tts.enabled);

        Self {
            call_id: Uuid::new_v4(),
            _slot: CallSlot {
                state: state.clone(),
            },
            state,
            config,
            realtime: None,
            turn,
            tts,
            tts_task: None,
            stream_sid: None,
            call_sid: None,
            debounce: None,
            keepalive: None,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    fn handle_telephony(&mut self, msg: TwilioInbound, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            TwilioInbound::Start { stream_sid, start } => self.on_start(stream_sid, start, ctx),
            TwilioInbound::Media { media } => self.on_media(media, ctx),
            TwilioInbound::Mark { mark } => {
                debug!(
                    call_id = %self.call_id,
                    event = "mark",
                    "Mark played: {}",
                    mark.map(|m| m.name).unwrap_or_default()
                );
            }
            TwilioInbound::Stop {} => {
                info!(call_id = %self.call_id, event = "stop", "Telephony stream stopped");
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
            TwilioInbound::Other => {}
        }
    }

    fn on_start(
        &mut self,
        stream_sid: Option<String>,
        start: StartMetadata,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let Some(sid) = start.resolve_stream_sid(stream_sid.as_deref()) else {
            warn!(call_id = %self.call_id, event = "start", "Start without a streamSid ignored");
            return;
        };

        info!(
            call_id = %self.call_id,
            stream_sid = %sid,
            event = "start",
            "Stream started (call {:?}, account {:?}, from {:?})",
            start.call_sid,
            start.account_sid,
            start.from
        );
        if let Some(format) = &start.media_format {
            debug!(call_id = %self.call_id, "Media format: {}", format);
        }
        if !start.custom_parameters.is_empty() {
            debug!(call_id = %self.call_id, "Custom parameters: {:?}", start.custom_parameters);
        }
        self.stream_sid = Some(sid);
        self.call_sid = start.call_sid;

        if let Some(handle) = self.keepalive.take() {
            ctx.cancel_future(handle);
        }
        self.keepalive = Some(ctx.run_interval(self.config.keepalive_interval(), |act, ctx| {
            act.send_mark(KEEPALIVE_MARK, ctx);
        }));
    }

    fn on_media(&mut self, media: MediaPayload, ctx: &mut ws::WebsocketContext<Self>) {
        if media.track.as_deref() == Some("outbound") {
            return;
        }

        let mulaw = match media.decode() {
            Ok(bytes) => MulawBuffer::new(bytes),
            Err(e) => {
                debug!(call_id = %self.call_id, "Dropping undecodable media payload: {}", e);
                return;
            }
        };
        if mulaw.is_empty() {
            return;
        }

        match &self.realtime {
            Some(session) => {
                session.append(&mulaw.decode());
            }
            None => debug!(call_id = %self.call_id, "Speech model not connected, caller audio dropped"),
        }

        let ticket = self.turn.on_caller_audio();
        if let Some(handle) = self.debounce.take() {
            ctx.cancel_future(handle);
        }
        self.debounce = Some(ctx.run_later(ticket.delay, move |act, ctx| {
            act.on_debounce_elapsed(ticket, ctx);
        }));
    }

    fn on_debounce_elapsed(&mut self, ticket: DebounceTicket, ctx: &mut ws::WebsocketContext<Self>) {
        self.debounce = None;
        let connected = self.realtime.as_ref().is_some_and(RealtimeSession::is_open);

        for action in self.turn.on_debounce_elapsed(ticket, connected) {
            self.perform(action, ctx);
        }
        debug!(call_id = %self.call_id, "Turn state: {}", self.turn.state().as_str());
    }

    fn perform(&mut self, action: TurnAction, ctx: &mut ws::WebsocketContext<Self>) {
        match action {
            TurnAction::Commit => {
                if let Some(session) = &self.realtime {
                    session.commit();
                }
            }
            TurnAction::RequestResponse => {
                if let Some(session) = &self.realtime {
                    if session.request_response() {
                        self.state.record_response_requested();
                        info!(call_id = %self.call_id, "Response requested");
                    }
                }
            }
            TurnAction::Synthesize { text, playback } => self.start_synthesis(text, playback, ctx),
        }
    }

    fn handle_model_event(&mut self, event: ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            ServerEvent::AudioDelta { delta } => {
                self.turn.on_response_audio();
                match B64.decode(delta.as_bytes()) {
                    Ok(bytes) => {
                        let pcm = PcmBuffer::from_le_bytes(&bytes, self.config.realtime.output_sample_rate);
                        let mulaw = pcm.to_telephony();
                        self.send_audio(mulaw.as_bytes(), ctx);
                    }
                    Err(e) => debug!(call_id = %self.call_id, "Dropping undecodable audio delta: {}", e),
                }
            }
            ServerEvent::TextDelta { delta } => self.turn.on_response_text(&delta),
            ServerEvent::ResponseDone { .. } => {
                debug!(call_id = %self.call_id, event = "response.done", "Response complete");
                if let Some(action) = self.turn.on_response_done() {
                    self.perform(action, ctx);
                }
            }
            ServerEvent::Error { .. } => {
                warn!(
                    call_id = %self.call_id,
                    "Speech model error: {}",
                    event.error_message().unwrap_or_default()
                );
            }
            ServerEvent::Unknown => {}
        }
    }

    /// Stream synthesized audio for `text` back to the caller.
    ///
    /// Runs on a separate task; chunks come back through the mailbox so they are
    /// ordered with everything else the actor does.
    fn start_synthesis(
        &mut self,
        text: String,
        playback: PlaybackTicket,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let Some(client) = self.tts.clone() else {
            self.state.record_tts_failure();
            self.turn.on_playback_finished(playback);
            return;
        };
        if let Some(task) = self.tts_task.take() {
            task.abort();
        }

        let addr = ctx.address();
        let call_id = self.call_id;
        self.tts_task = Some(tokio::spawn(async move {
            let mut stream = match client.synthesize(&text).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(call_id = %call_id, "Synthesis failed: {:#}", e);
                    addr.do_send(TtsFinished { playback, failed: true });
                    return;
                }
            };

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(mulaw) if !mulaw.is_empty() => addr.do_send(TtsAudio { playback, mulaw }),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(call_id = %call_id, "Synthesis stream broke off: {}", e);
                        addr.do_send(TtsFinished { playback, failed: true });
                        return;
                    }
                }
            }
            addr.do_send(TtsFinished { playback, failed: false });
        }));
    }

    /// Frame μ-law audio and send it to the caller.
    fn send_audio(&mut self, mulaw: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if mulaw.is_empty() {
            return;
        }
        let frame_bytes = TELEPHONY.frame_bytes();
        let frame_count = mulaw.len().div_ceil(frame_bytes) as u64;

        let Some(sid) = self.stream_sid.as_deref() else {
            debug!(call_id = %self.call_id, "No streamSid yet, dropping {} frames", frame_count);
            self.frames_dropped += frame_count;
            return;
        };
        if ctx.state() != ActorState::Running {
            self.frames_dropped += frame_count;
            return;
        }

        for frame in telephony::media_frames(sid, mulaw) {
            ctx.text(frame);
        }
        self.frames_sent += frame_count;
    }

    fn send_mark(&mut self, name: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(sid) = self.stream_sid.as_deref() else {
            return;
        };
        if ctx.state() != ActorState::Running {
            return;
        }
        match TwilioOutbound::mark(sid, name).to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => warn!(call_id = %self.call_id, "Failed to serialize mark: {}", e),
        }
    }
}

impl Actor for CallBridge {
    type Context = ws::WebsocketContext<Self>;

    /// Connect the speech model leg as soon as the telephony leg is up.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(call_id = %self.call_id, "Telephony stream connected");

        let config = self.config.clone();
        async move { RealtimeSession::connect(&config).await }
            .into_actor(self)
            .map(|result, act: &mut Self, ctx: &mut Self::Context| match result {
                Ok((session, events)) => {
                    act.realtime = Some(session);
                    ctx.add_stream(events);
                }
                Err(e) => {
                    error!(call_id = %act.call_id, "Speech model connection failed: {:#}", e);
                    ctx.close(Some(ws::CloseCode::Error.into()));
                    ctx.stop();
                }
            })
            .spawn(ctx);
    }

    /// Tear down the other leg, timers and any synthesis in flight.
    fn stopped(&mut self, ctx: &mut Self::Context) {
        for handle in [self.debounce.take(), self.keepalive.take()].into_iter().flatten() {
            ctx.cancel_future(handle);
        }
        if let Some(task) = self.tts_task.take() {
            task.abort();
        }
        if let Some(session) = self.realtime.take() {
            session.close();
        }

        self.state.record_frames_sent(self.frames_sent);
        self.state.record_frames_dropped(self.frames_dropped);
        info!(
            call_id = %self.call_id,
            stream_sid = %self.stream_sid.as_deref().unwrap_or("-"),
            "Call ended (call {:?}): {} frames sent, {} dropped",
            self.call_sid,
            self.frames_sent,
            self.frames_dropped
        );
    }
}

/// Telephony media stream messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallBridge {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if let Some(msg) = TwilioInbound::parse(&text) {
                    self.handle_telephony(msg, ctx);
                }
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                info!(call_id = %self.call_id, "Telephony stream closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) | Ok(ws::Message::Continuation(_)) => {
                debug!(call_id = %self.call_id, "Ignoring non-text telephony frame");
            }
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(call_id = %self.call_id, "Telephony protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Speech model events. The stream ending means the model leg is gone.
impl StreamHandler<ServerEvent> for CallBridge {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        self.handle_model_event(event, ctx);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        info!(call_id = %self.call_id, "Speech model disconnected, ending call");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl Handler<TtsAudio> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: TtsAudio, ctx: &mut Self::Context) {
        if !self.turn.is_current_playback(msg.playback) {
            return;
        }
        self.send_audio(&msg.mulaw, ctx);
    }
}

impl Handler<TtsFinished> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: TtsFinished, _ctx: &mut Self::Context) {
        if !self.turn.on_playback_finished(msg.playback) {
            debug!(call_id = %self.call_id, "Ignoring completion of a superseded synthesis");
            return;
        }
        self.tts_task = None;
        if msg.failed {
            self.state.record_tts_failure();
        }
        debug!(call_id = %self.call_id, "Synthesized playback finished");
    }
}

/// WebSocket endpoint for the provider's media stream.
///
/// ## Capacity:
/// A call slot is reserved before the upgrade; with every slot taken the request
/// is refused with 503 so the provider can fail the call over.
pub async fn twilio_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let config = app_state.get_config();
    let max_calls = config.performance.max_concurrent_calls;

    if !app_state.try_begin_call(max_calls) {
        warn!("Refusing media stream: {} calls already active", max_calls);
        return Err(AppError::Unavailable(format!(
            "{} calls already active",
            max_calls
        )));
    }

    info!(
        "New media stream from: {:?}",
        req.connection_info().peer_addr()
    );
    let bridge = CallBridge::new(app_state.get_ref().clone(), config);

    // On a failed handshake the bridge is dropped here and its slot released
    ws::start(bridge, &req, stream).map_err(|e| AppError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use actix_web::{test as actix_test, App, HttpServer};
    use futures_util::SinkExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;
    type ModelSide = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    async fn next_text<S>(ws: &mut S) -> Option<Value>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => {
                    return None
                }
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Next model-bound message that isn't an audio append.
    async fn next_control(ws: &mut ModelSide) -> Option<Value> {
        loop {
            let value = next_text(ws).await?;
            if value["type"] != "input_audio_buffer.append" {
                return Some(value);
            }
        }
    }

    /// Bridge server plus a fake speech model, both on ephemeral ports.
    async fn start_call() -> (AppState, Client, ModelSide) {
        start_call_with(|_| {}).await
    }

    async fn start_call_with(configure: impl FnOnce(&mut AppConfig)) -> (AppState, Client, ModelSide) {
        let model_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = AppConfig::default();
        config.realtime.url = format!("ws://{}", model_listener.local_addr().unwrap());
        config.realtime.api_key = Some("sk-test".to_string());
        configure(&mut config);

        let state = AppState::new(config.clone());
        let server_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(server_state.clone()))
                .configure(handlers::configure(config.telephony.stream_path.clone()))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/twilio-stream", addr))
            .await
            .unwrap();

        let (tcp, _) = model_listener.accept().await.unwrap();
        let model = tokio_tungstenite::accept_async(tcp).await.unwrap();

        (state, client, model)
    }

    fn start_event() -> Message {
        Message::Text(
            json!({
                "event": "start",
                "streamSid": "MZ123",
                "start": {"streamSid": "MZ123", "callSid": "CA123", "from": "+15550001111"}
            })
            .to_string(),
        )
    }

    fn silence_media() -> Message {
        Message::Text(
            json!({
                "event": "media",
                "streamSid": "MZ123",
                "media": {"track": "inbound", "payload": B64.encode([0xFFu8; 160])}
            })
            .to_string(),
        )
    }

    #[actix_web::test]
    async fn test_call_round_trip() {
        let (state, mut client, mut model) = start_call().await;

        let session = next_text(&mut model).await.unwrap();
        assert_eq!(session["type"], "session.update");
        assert!(session["session"]["turn_detection"].is_null());
        // let the bridge finish wiring up the model leg
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.send(start_event()).await.unwrap();
        for _ in 0..5 {
            client.send(silence_media()).await.unwrap();
        }

        // caller audio is widened to 16 kHz before it reaches the model
        let append = next_text(&mut model).await.unwrap();
        assert_eq!(append["type"], "input_audio_buffer.append");
        let audio = B64.decode(append["audio"].as_str().unwrap()).unwrap();
        assert_eq!(audio.len(), 640);

        // one commit and one request after the silence debounce
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "input_audio_buffer.commit");
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "response.create");

        // 20 ms of 24 kHz model audio becomes one addressed 160-byte frame
        let delta = B64.encode(vec![0u8; 960]);
        model
            .send(Message::Text(json!({"type": "response.audio.delta", "delta": delta}).to_string()))
            .await
            .unwrap();

        let frame = next_text(&mut client).await.unwrap();
        assert_eq!(frame["event"], "media");
        assert_eq!(frame["streamSid"], "MZ123");
        let payload = B64.decode(frame["media"]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload.len(), 160);

        // the model leg closing ends the telephony leg too
        model.close(None).await.unwrap();
        assert!(next_text(&mut client).await.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_calls, 0);
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.responses_requested, 1);
        assert_eq!(metrics.frames_sent, 1);
    }

    async fn send_model(model: &mut ModelSide, event: Value) {
        model.send(Message::Text(event.to_string())).await.unwrap();
    }

    /// Answer the current turn in text and complete it.
    async fn answer_in_text(model: &mut ModelSide, text: &str) {
        send_model(model, json!({"type": "response.text.delta", "delta": text})).await;
        send_model(model, json!({"type": "response.done", "response": {"status": "completed"}})).await;
    }

    /// Connect with TTS enabled, start the stream and drive one caller turn up to
    /// the response request.
    async fn start_tts_call(tts_url: String) -> (AppState, Client, ModelSide) {
        let (state, mut client, mut model) = start_call_with(|config| {
            config.tts.enabled = true;
            config.tts.url = tts_url;
        })
        .await;

        let session = next_text(&mut model).await.unwrap();
        assert_eq!(session["session"]["modalities"], json!(["text"]));
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.send(start_event()).await.unwrap();
        client.send(silence_media()).await.unwrap();
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "input_audio_buffer.commit");
        let create = next_control(&mut model).await.unwrap();
        assert_eq!(create["response"]["modalities"], json!(["text"]));

        (state, client, model)
    }

    #[actix_web::test]
    async fn test_tts_playback_round_trip() {
        let tts = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tts"))
            .and(body_json(json!({"text": "Hello caller"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/basic")
                    .set_body_bytes(vec![0xFFu8; 320]),
            )
            .expect(1)
            .mount(&tts)
            .await;

        let (state, mut client, mut model) = start_tts_call(format!("{}/tts", tts.uri())).await;
        answer_in_text(&mut model, "Hello caller").await;

        // synthesized μ-law comes back as addressed 160-byte frames
        for _ in 0..2 {
            let frame = next_text(&mut client).await.unwrap();
            assert_eq!(frame["event"], "media");
            assert_eq!(frame["streamSid"], "MZ123");
            let payload = B64.decode(frame["media"]["payload"].as_str().unwrap()).unwrap();
            assert_eq!(payload, vec![0xFFu8; 160]);
        }

        // playback finished, so the next turn may request a response again
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.send(silence_media()).await.unwrap();
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "input_audio_buffer.commit");
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "response.create");

        model.close(None).await.unwrap();
        assert!(next_text(&mut client).await.is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.responses_requested, 2);
        assert_eq!(metrics.frames_sent, 2);
        assert_eq!(metrics.tts_failures, 0);
    }

    #[actix_web::test]
    async fn test_failed_synthesis_releases_turn() {
        let tts = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&tts)
            .await;

        let (state, mut client, mut model) = start_tts_call(format!("{}/tts", tts.uri())).await;
        answer_in_text(&mut model, "Hello caller").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // no audio for the failed turn, but the caller can still take the next one
        client.send(silence_media()).await.unwrap();
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "input_audio_buffer.commit");
        assert_eq!(next_control(&mut model).await.unwrap()["type"], "response.create");

        model.close(None).await.unwrap();
        assert!(next_text(&mut client).await.is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.tts_failures, 1);
        assert_eq!(metrics.responses_requested, 2);
        assert_eq!(metrics.frames_sent, 0);
    }

    #[actix_web::test]
    async fn test_keepalive_mark_after_start() {
        let (_state, mut client, mut model) = start_call_with(|config| {
            config.telephony.keepalive_interval_secs = 1;
        })
        .await;
        next_text(&mut model).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.send(start_event()).await.unwrap();

        let mark = next_text(&mut client).await.unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["streamSid"], "MZ123");
        assert_eq!(mark["mark"]["name"], KEEPALIVE_MARK);
    }

    #[actix_web::test]
    async fn test_audio_before_start_is_dropped() {
        let (state, mut client, mut model) = start_call().await;
        next_text(&mut model).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 40 ms of model audio with no streamSid to address it to
        let delta = B64.encode(vec![0u8; 1920]);
        send_model(&mut model, json!({"type": "response.audio.delta", "delta": delta})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        model.close(None).await.unwrap();
        // the first thing the caller sees is the close, not a media frame
        assert!(next_text(&mut client).await.is_none());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.frames_sent, 0);
        assert_eq!(metrics.frames_dropped, 2);
        assert_eq!(metrics.active_calls, 0);
    }

    #[actix_web::test]
    async fn test_stop_closes_model_leg() {
        let (_state, mut client, mut model) = start_call().await;
        next_text(&mut model).await.unwrap();

        client.send(start_event()).await.unwrap();
        client
            .send(Message::Text(json!({"event": "stop", "streamSid": "MZ123"}).to_string()))
            .await
            .unwrap();

        assert!(next_text(&mut model).await.is_none());
    }

    #[actix_web::test]
    async fn test_refuses_upgrade_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_calls = 1;
        let state = AppState::new(config.clone());
        assert!(state.try_begin_call(1));

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure(config.telephony.stream_path.clone())),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/twilio-stream").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().rejected_calls, 1);
    }

    #[actix_web::test]
    async fn test_failed_handshake_releases_slot() {
        let config = AppConfig::default();
        let state = AppState::new(config.clone());

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure(config.telephony.stream_path.clone())),
        )
        .await;

        // plain GET without upgrade headers
        let req = actix_test::TestRequest::get().uri("/twilio-stream").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().active_calls, 0);
    }
}
