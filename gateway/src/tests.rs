#[cfg(test)]
mod integration_tests {
    use crate::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use sam_local_container::testing::{Behavior, ScriptedEngine};
    use sam_local_container::{ContainerInvoker, InvokerConfig, LogSink};
    use sam_local_lambda::RuntimeConfig;
    use sam_local_shared::EnvOverrides;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const TEMPLATE: &str = r#"
Resources:
  Hello:
    Type: AWS::Serverless::Function
    Properties:
      Runtime: python3.6
      Handler: app.handler
      Timeout: 1
      Events:
        Hello:
          Type: Api
          Properties:
            Path: /hello
            Method: get
  Users:
    Type: AWS::Serverless::Function
    Properties:
      Runtime: nodejs6.10
      Handler: index.users
      Events:
        Get:
          Type: Api
          Properties:
            Path: /users/{id}
            Method: get
  Nightly:
    Type: AWS::Serverless::Function
    Properties:
      Runtime: go1.x
      Handler: main
"#;

    /// Plays the function: `/hello` greets, every other route echoes its event.
    fn function_behavior() -> Behavior {
        Behavior::respond(|stdin, _env| {
            let event: Value = serde_json::from_slice(stdin).unwrap_or(Value::Null);
            let body = if event["resource"] == "/hello" {
                "hello world".to_string()
            } else {
                event.to_string()
            };
            json!({
                "statusCode": 200,
                "headers": {"Content-Type": "text/plain"},
                "body": body,
            })
            .to_string()
        })
    }

    fn gateway(engine: Arc<ScriptedEngine>) -> (Router, Arc<ServerlessRouter>) {
        let functions = template::parse(TEMPLATE).unwrap();
        let invoker = ContainerInvoker::new(engine, InvokerConfig::default(), LogSink::disabled());
        let config = RuntimeConfig {
            check_code_dir: false,
            ..Default::default()
        };

        let (router, report) =
            mount_functions(functions, &invoker, &config, &EnvOverrides::empty()).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].function, "Nightly");

        let router = Arc::new(router);
        (app(AppState::new(router.clone())), router)
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_of(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_get_hello_returns_function_response() {
        let engine = Arc::new(ScriptedEngine::new(function_behavior()));
        let (app, _) = gateway(engine.clone());

        let response = app.oneshot(request(Method::GET, "/hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(response).await, b"hello world");
        assert_eq!(engine.created(), 1);
        assert_eq!(engine.removed(), 1);
    }

    #[tokio::test]
    async fn test_post_hello_is_method_not_allowed() {
        let engine = Arc::new(ScriptedEngine::new(function_behavior()));
        let (app, _) = gateway(engine.clone());

        let response = app.oneshot(request(Method::POST, "/hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET");
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body["message"], "Method Not Allowed");
        assert_eq!(engine.created(), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (app, _) = gateway(Arc::new(ScriptedEngine::new(function_behavior())));

        let response = app.oneshot(request(Method::GET, "/nowhere")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert!(body["message"].as_str().unwrap().contains("/nowhere"));
    }

    #[tokio::test]
    async fn test_path_and_query_reach_the_function() {
        let (app, _) = gateway(Arc::new(ScriptedEngine::new(function_behavior())));

        let response = app
            .oneshot(request(Method::GET, "/users/42?x=1&name=a%20b"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(event["httpMethod"], "GET");
        assert_eq!(event["resource"], "/users/{id}");
        assert_eq!(event["path"], "/users/42");
        assert_eq!(event["pathParameters"]["id"], "42");
        assert_eq!(event["queryStringParameters"]["x"], "1");
        assert_eq!(event["queryStringParameters"]["name"], "a b");
    }

    #[tokio::test]
    async fn test_timeout_and_crash_map_to_gateway_errors() {
        let (app, _) = gateway(Arc::new(ScriptedEngine::new(Behavior::Hang)));
        let response = app.oneshot(request(Method::GET, "/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let (app, _) = gateway(Arc::new(ScriptedEngine::new(Behavior::Crash {
            exit_code: 1,
            stderr: "boom".to_string(),
        })));
        let response = app.oneshot(request(Method::GET, "/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let (app, _) = gateway(Arc::new(ScriptedEngine::new(Behavior::Echo).failing_create()));
        let response = app.oneshot(request(Method::GET, "/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let engine = Arc::new(ScriptedEngine::new(function_behavior()));
        let (app, _) = gateway(engine.clone());

        let body = vec![b'x'; server::MAX_BODY_BYTES + 1];
        let request = Request::builder()
            .method(Method::GET)
            .uri("/hello")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(engine.created(), 0);
    }

    #[tokio::test]
    async fn test_static_fallback_only_for_unrouted_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>static</h1>").unwrap();
        std::fs::write(dir.path().join("hello"), "shadowed").unwrap();

        let (_, router) = gateway(Arc::new(ScriptedEngine::new(function_behavior())));
        let files = StaticFiles::new(dir.path()).unwrap();
        let app = app(AppState::new(router).with_static_files(files));

        let response = app.clone().oneshot(request(Method::GET, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(body_of(response).await, b"<h1>static</h1>");

        let response = app.clone().oneshot(request(Method::GET, "/hello")).await.unwrap();
        assert_eq!(body_of(response).await, b"hello world");

        let response = app.oneshot(request(Method::POST, "/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let engine = Arc::new(
            ScriptedEngine::new(function_behavior()).with_latency(Duration::from_millis(5)),
        );
        let (app, _) = gateway(engine.clone());

        let mut handles = vec![];
        for i in 0..20 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                let response = app
                    .oneshot(request(Method::GET, &format!("/users/{}?token=t{}", i, i)))
                    .await
                    .unwrap();
                (i, body_of(response).await)
            }));
        }

        for result in futures::future::join_all(handles).await {
            let (i, body) = result.unwrap();
            let event: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(event["pathParameters"]["id"], i.to_string());
            assert_eq!(event["queryStringParameters"]["token"], format!("t{}", i));
        }
        assert_eq!(engine.created(), 20);
        assert_eq!(engine.removed(), 20);
    }

    #[tokio::test]
    async fn test_mount_summary() {
        let (_, router) = gateway(Arc::new(ScriptedEngine::new(function_behavior())));

        let mounts = router.mounts();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].handler, "app.handler");
        assert_eq!(mounts[0].runtime, "python3.6");
        assert_eq!(mounts[0].path, "/hello");
        assert_eq!(mounts[0].methods_label(), "[GET]");
        assert_eq!(router.routes().len(), 2);
    }
}
