use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::daemon::{PinDaemon, PullMode};
use crate::error::GpioError;
use crate::monitor::{InterruptMonitor, RecordedEdge};

pub struct AppState<D: PinDaemon> {
    pub monitor: Arc<InterruptMonitor<D>>,
}

impl<D: PinDaemon> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            monitor: Arc::clone(&self.monitor),
        }
    }
}

#[derive(Deserialize)]
struct PullPayload {
    pull: PullMode,
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<RecordedEdge>,
    pin_filter: Option<u32>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if pin_filter.is_some_and(|p| p != event.pin) {
                            continue;
                        }
                        if let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let notice = GpioError::Backend(format!("Event stream lagged by {n} messages"));
                        if session.text(notice.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<D: PinDaemon + 'static> AppState<D> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/pins")
                    .route(web::get().to(list_pins::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pins/events")
                    .route(web::get().to(events_ws_all::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}")
                    .route(web::get().to(pin_status::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}/pull")
                    .route(web::post().to(set_pull::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}/subscription")
                    .route(web::post().to(subscribe::<D>))
                    .route(web::delete().to(unsubscribe::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST, Method::DELETE]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}/event")
                    .route(web::get().to(get_last_event::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}/events")
                    .route(web::get().to(get_events::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/pin/{pin_id}/events/ws")
                    .route(web::get().to(events_ws_pin::<D>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_pins<D: PinDaemon + 'static>(
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pins = state.monitor.list_pins();

    Ok(web::Json(pins))
}

async fn pin_status<D: PinDaemon + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;
    let status = state.monitor.pin_status(pin)?;

    Ok(web::Json(status))
}

async fn set_pull<D: PinDaemon + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;
    let mode = parse_pull_payload(&body)?;
    let status = state.monitor.set_pull(pin, mode)?;

    Ok(web::Json(status))
}

async fn subscribe<D: PinDaemon + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;
    let status = state.monitor.subscribe_pin(pin)?;

    Ok(HttpResponse::Created().json(status))
}

async fn unsubscribe<D: PinDaemon + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;
    state.monitor.unsubscribe_pin(pin)?;

    Ok(HttpResponse::NoContent())
}

async fn get_last_event<D: PinDaemon + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;

    match state.monitor.last_event(pin)? {
        Some(event) => Ok(HttpResponse::Ok().json(event)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

async fn get_events<D: PinDaemon + 'static>(
    req: HttpRequest,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<D>>,
) -> Result<impl Responder, GpioError> {
    let pin = parse_pin_id(&req)?;
    let events = state.monitor.events(pin, query.limit)?;

    Ok(web::Json(events))
}

async fn events_ws_all<D: PinDaemon + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<D>>,
) -> Result<HttpResponse, GpioError> {
    open_event_websocket(req, stream, &state, None)
}

async fn events_ws_pin<D: PinDaemon + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<D>>,
) -> Result<HttpResponse, GpioError> {
    let pin = parse_pin_id(&req)?;
    state.monitor.pin_status(pin)?;
    open_event_websocket(req, stream, &state, Some(pin))
}

fn open_event_websocket<D: PinDaemon + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: &AppState<D>,
    pin_filter: Option<u32>,
) -> Result<HttpResponse, GpioError> {
    let rx = state.monitor.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| GpioError::Backend(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx, pin_filter).await;
    });

    Ok(response)
}

fn parse_pin_id(req: &HttpRequest) -> Result<u32, GpioError> {
    let pin_id = req
        .match_info()
        .get("pin_id")
        .ok_or_else(|| GpioError::InvalidValue("Missing pin id".into()))?;
    let pin_id = pin_id
        .parse::<u32>()
        .map_err(|_| GpioError::InvalidValue("Invalid pin id".into()))?;

    Ok(pin_id)
}

fn parse_pull_payload(body: &[u8]) -> Result<PullMode, GpioError> {
    if body.is_empty() {
        return Err(GpioError::InvalidValue("Empty pull payload".into()));
    }

    let payload: PullPayload = serde_json::from_slice(body)
        .map_err(|e| GpioError::InvalidValue(format!("Invalid pull payload: {e}")))?;
    Ok(payload.pull)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
