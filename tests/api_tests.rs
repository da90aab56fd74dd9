use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{App, test, web};
use edgewatch::{AppConfig, AppState, InterruptMonitor, MockDaemon};
use serde_json::Value;

fn sample_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": {
                "host": "localhost:8080",
                "path": "/api/v1",
                "timeout": 30
            },
            "pins": {
                "17": {
                    "name": "BUTTON 1",
                    "chip": "/dev/gpiochip0",
                    "line": 17
                },
                "27": {
                    "name": "BUTTON 2",
                    "chip": "/dev/gpiochip0",
                    "line": 27,
                    "pull": "down"
                },
                "60": {
                    "name": "OFF BOARD",
                    "chip": "/dev/gpiochip1",
                    "line": 4
                }
            },
            "broadcast_capacity": 16,
            "event_history_capacity": 32
        }
        "#,
    )
    .expect("valid sample config")
}

fn app_state() -> (Arc<MockDaemon>, AppState<MockDaemon>, String) {
    let cfg = Arc::new(sample_config());
    let daemon = Arc::new(MockDaemon::default());
    let monitor = Arc::new(InterruptMonitor::new(cfg.clone(), daemon.clone()));
    (daemon, AppState { monitor }, cfg.http.path.clone())
}

#[actix_rt::test]
async fn list_pins_returns_all() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/pins").to_request();
    let response: HashMap<String, Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(response.len(), 3);

    let button = response.get("17").unwrap();
    assert_eq!(button["state"], "unregistered");
    assert_eq!(button["info"]["name"], "BUTTON 1");
    assert_eq!(button["info"]["line"], 17);
}

#[actix_rt::test]
async fn pin_not_found_returns_404() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/pin/999").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn wrong_method_returns_405() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::put()
        .uri("/api/v1/pin/17/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);
}

#[actix_rt::test]
async fn subscribe_record_and_unsubscribe() {
    let (daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/17/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let status: Value = test::read_body_json(resp).await;
    assert_eq!(status["state"], "active");
    assert_eq!(status["pull"], "up");

    daemon.deliver(17, 0, 500);
    daemon.deliver(17, 2, 600);
    daemon.deliver(17, 1, 700);

    let req = test::TestRequest::get()
        .uri("/api/v1/pin/17/events")
        .to_request();
    let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["level"], "low");
    assert_eq!(events[1]["tick"], 700);

    let req = test::TestRequest::get()
        .uri("/api/v1/pin/17/event")
        .to_request();
    let last: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(last["level"], "high");
    assert_eq!(last["name"], "BUTTON 1");

    let req = test::TestRequest::delete()
        .uri("/api/v1/pin/17/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    daemon.deliver(17, 0, 800);
    let req = test::TestRequest::get()
        .uri("/api/v1/pin/17/events?limit=5")
        .to_request();
    let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(events.len(), 2);
}

#[actix_rt::test]
async fn double_subscribe_returns_409() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/27/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/27/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_rt::test]
async fn set_pull_on_active_pin() {
    let (daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/17/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/17/pull")
        .set_payload(r#"{"pull":"down"}"#)
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["pull"], "down");
    assert_eq!(status["state"], "active");
    assert_eq!(daemon.pull(17), Some(edgewatch::PullMode::Down));
}

#[actix_rt::test]
async fn invalid_pull_payload_returns_400() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/17/pull")
        .set_payload(r#"{"pull":"sideways"}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn daemon_rejection_returns_502() {
    let (_daemon, state, scope_path) = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/pin/60/subscription")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("PI_BAD_GPIO"));

    let req = test::TestRequest::get().uri("/api/v1/pin/60").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["state"], "unregistered");
}
