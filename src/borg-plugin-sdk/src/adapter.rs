//! Plugin-side adapter: start the bootstrapper, publish its capabilities and
//! serve its endpoints.

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, on};
use axum::{Json, Router};
use borg_plugin_api::{
    CONFIGURATION_EXIT_CODE, PluginEnvironment, PluginId, RegistrationRequest, routes,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::bootstrapper::{PluginBootstrapper, resolve_bootstrapper};
use crate::endpoint::{ApiEndpoint, ApiRequest, Rejection, RequestContext};
use crate::error::{AdapterError, Result};
use crate::host_client::HostClient;
use crate::registration::{PluginRegistration, PluginRoutes};

/// Largest request body a plugin endpoint accepts.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Timeout for plugin to host calls.
pub const HOST_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client plugins use to reach the host.
pub fn create_host_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("borg-plugin/", env!("CARGO_PKG_VERSION")))
        .timeout(HOST_CALL_TIMEOUT)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| AdapterError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Run a plugin until `shutdown` resolves.
///
/// Steps, in order: resolve the bootstrapper, bind a loopback listener, run
/// the start routine, validate the routing table, register with the host,
/// then serve.
pub async fn serve<S>(
    environment: PluginEnvironment,
    candidates: Vec<Box<dyn PluginBootstrapper>>,
    client: reqwest::Client,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let bootstrapper = resolve_bootstrapper(candidates)?;

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let address = listener.local_addr()?;
    let base_uri = Url::parse(&format!("http://{address}/"))
        .map_err(|e| AdapterError::Configuration(e.to_string()))?;

    let host = HostClient::new(
        client,
        environment.host_uri.clone(),
        environment.token.clone(),
    );
    let mut registration =
        PluginRegistration::new(environment.plugin_id.clone(), base_uri, host.clone());

    bootstrapper
        .start(&mut registration)
        .await
        .map_err(|e| AdapterError::Start(format!("{e:#}")))?;

    let routes = registration.build()?;
    info!(
        plugin = %routes.information.id,
        %address,
        commands = routes.commands.len(),
        endpoints = routes.endpoints.len(),
        "Plugin started"
    );

    host.register(&RegistrationRequest {
        information: routes.information.clone(),
        commands: routes.commands.clone(),
    })
    .await?;

    axum::serve(listener, router(routes))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(plugin = %environment.plugin_id, "Plugin stopped");
    Ok(())
}

/// Process entry point for plugin executables.
///
/// ```ignore
/// #[tokio::main]
/// async fn main() -> std::process::ExitCode {
///     borg_plugin_sdk::run(vec![Box::new(MyBootstrapper)]).await
/// }
/// ```
pub async fn run(candidates: Vec<Box<dyn PluginBootstrapper>>) -> ExitCode {
    setup_logging();

    match serve_from_env(candidates).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_configuration() => {
            error!(error = %e, "Plugin configuration error");
            ExitCode::from(CONFIGURATION_EXIT_CODE as u8)
        }
        Err(e) => {
            error!(error = %e, "Plugin failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve_from_env(candidates: Vec<Box<dyn PluginBootstrapper>>) -> Result<()> {
    let environment = PluginEnvironment::from_env()?;
    let client = create_host_http_client()?;
    serve(environment, candidates, client, shutdown_signal()).await
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Resolves on ctrl-c, SIGTERM, or when the host closes our stdin.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let host_gone = async {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];
        while let Ok(n) = stdin.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping plugin"),
        _ = terminate => info!("Received SIGTERM, stopping plugin"),
        _ = host_gone => info!("Host closed the control pipe, stopping plugin"),
    }
}

/// Router serving the adapter routes plus every declared endpoint.
pub fn router(table: PluginRoutes) -> Router {
    let plugin_id = table.information.id.clone();
    let information = Arc::new(table.information);
    let commands = Arc::new(table.commands);

    let mut router = Router::new()
        .route(routes::plugin::PING, get(|| async { StatusCode::NO_CONTENT }))
        .route(
            routes::plugin::INFORMATION,
            get(move || {
                let information = information.clone();
                async move { Json(information.as_ref().clone()) }
            }),
        )
        .route(
            routes::plugin::COMMANDS,
            get(move || {
                let commands = commands.clone();
                async move { Json(commands.as_ref().clone()) }
            }),
        );

    let mut grouped: Vec<(String, MethodRouter)> = Vec::new();
    for endpoint in table.endpoints {
        let path = endpoint.path.clone();
        let filter = endpoint.method.filter();
        let plugin_id = plugin_id.clone();
        let handler = move |request: Request| {
            let endpoint = endpoint.clone();
            let plugin_id = plugin_id.clone();
            async move { invoke(endpoint, plugin_id, request).await }
        };

        match grouped.iter().position(|(p, _)| *p == path) {
            Some(index) => {
                let (path, method_router) = grouped.remove(index);
                grouped.insert(index, (path, method_router.on(filter, handler)));
            }
            None => grouped.push((path, on(filter, handler))),
        }
    }

    for (path, method_router) in grouped {
        router = router.route(&path, method_router);
    }
    router
}

async fn invoke(endpoint: ApiEndpoint, plugin_id: PluginId, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            return Rejection::bad_request(format!("Failed to read request body: {e}"))
                .into_response();
        }
    };

    // Cancelled if the connection goes away before the handler finishes.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let request = ApiRequest::new(
        RequestContext {
            plugin_id,
            method: parts.method,
            path: parts.uri.path().to_string(),
            headers: parts.headers,
        },
        body,
        cancel,
    );
    let response = endpoint.invoke(request).await;
    guard.disarm();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Body, PluginHttpApi};
    use async_trait::async_trait;
    use axum::body::Body as HttpBody;
    use axum::http::Request as HttpRequest;
    use borg_plugin_api::{CommandDescription, PluginInformation, TenantMessage, Token};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct EchoApi;

    impl PluginHttpApi for EchoApi {
        fn endpoints(self: Arc<Self>) -> Vec<ApiEndpoint> {
            vec![
                ApiEndpoint::post("api/commands/echo", |Body(m): Body<TenantMessage>| async move {
                    Ok::<_, anyhow::Error>(m.text)
                })
                .command("^echo (?<text>.+)$", "echoes"),
            ]
        }
    }

    fn routes() -> PluginRoutes {
        PluginRoutes {
            information: PluginInformation::new(
                PluginId::new("echo").unwrap(),
                "Echo",
                "1.0.0",
                "Echoes",
                Url::parse("http://127.0.0.1:1/").unwrap(),
            ),
            commands: vec![CommandDescription::new(
                "^echo (?<text>.+)$",
                "echoes",
                "/api/commands/echo",
            )],
            endpoints: Arc::new(EchoApi).endpoints(),
        }
    }

    async fn read_body(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_adapter_routes() {
        let app = router(routes());

        let ping = app
            .clone()
            .oneshot(HttpRequest::get("/_plugin/ping").body(HttpBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ping.status(), StatusCode::NO_CONTENT);

        let info = app
            .clone()
            .oneshot(
                HttpRequest::get("/_plugin/plugin-information")
                    .body(HttpBody::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let info: PluginInformation = serde_json::from_slice(&read_body(info).await).unwrap();
        assert_eq!(info.id.as_str(), "echo");

        let commands = app
            .oneshot(
                HttpRequest::get("/_plugin/commands")
                    .body(HttpBody::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let commands: Vec<CommandDescription> =
            serde_json::from_slice(&read_body(commands).await).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[tokio::test]
    async fn test_declared_endpoint_is_served() {
        let app = router(routes());
        let body = serde_json::json!({
            "text": "echo hi",
            "address": {"userId": "u", "channelId": "c", "tenantKey": "console"}
        });
        let response = app
            .oneshot(
                HttpRequest::post("/api/commands/echo")
                    .header("content-type", "application/json")
                    .body(HttpBody::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, b"echo hi");
    }

    struct Nameless;

    #[async_trait]
    impl PluginBootstrapper for Nameless {
        async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
            registration.register_http_api(Arc::new(EchoApi));
            Ok(())
        }
    }

    fn environment(server: &MockServer) -> PluginEnvironment {
        let id = PluginId::new("echo").unwrap();
        PluginEnvironment::new(
            id.clone(),
            Url::parse(&server.uri()).unwrap(),
            Token::new_for(&id),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_information_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/plugin-registrations"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let err = serve(
            environment(&server),
            vec![Box::new(Nameless)],
            reqwest::Client::new(),
            std::future::ready(()),
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            AdapterError::Registration(crate::RegistrationError::MissingInformation)
        ));
    }

    struct Echo;

    #[async_trait]
    impl PluginBootstrapper for Echo {
        async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
            registration
                .describe("Echo", "1.0.0", "Echoes")?
                .register_http_api(Arc::new(EchoApi));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registration_is_pushed_before_serving() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/plugin-registrations"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        serve(
            environment(&server),
            vec![Box::new(Echo)],
            reqwest::Client::new(),
            std::future::ready(()),
        )
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let pushed: RegistrationRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(pushed.information.id.as_str(), "echo");
        assert_eq!(pushed.commands[0].endpoint, "/api/commands/echo");
        assert!(pushed.information.uri.as_str().starts_with("http://127.0.0.1:"));
    }
}
