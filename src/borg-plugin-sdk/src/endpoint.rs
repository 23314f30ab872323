//! Declared HTTP endpoints and the handler signatures they accept.
//!
//! A handler is an async closure taking up to three parameters. Each
//! parameter type must implement [`FromApiRequest`]; the SDK ships
//! [`RequestContext`], [`CancellationToken`] and [`Body`]. A closure asking
//! for anything else does not implement [`EndpointHandler`], so the endpoint
//! table cannot be built with it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodFilter;
use borg_plugin_api::PluginId;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// Methods an endpoint can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    pub(crate) fn filter(self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request metadata available to handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Plugin serving the request.
    pub plugin_id: PluginId,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

/// A request as seen by handler parameter extraction.
pub struct ApiRequest {
    context: RequestContext,
    body: Bytes,
    cancel: CancellationToken,
}

impl ApiRequest {
    pub fn new(context: RequestContext, body: Bytes, cancel: CancellationToken) -> Self {
        Self {
            context,
            body,
            cancel,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Response produced when a parameter cannot be extracted or a handler fails.
#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Types a handler may ask for as a parameter.
pub trait FromApiRequest: Sized {
    fn from_api_request(request: &ApiRequest) -> Result<Self, Rejection>;
}

impl FromApiRequest for RequestContext {
    fn from_api_request(request: &ApiRequest) -> Result<Self, Rejection> {
        Ok(request.context.clone())
    }
}

impl FromApiRequest for CancellationToken {
    fn from_api_request(request: &ApiRequest) -> Result<Self, Rejection> {
        Ok(request.cancel.clone())
    }
}

/// JSON request body.
#[derive(Debug, Clone)]
pub struct Body<T>(pub T);

impl<T: DeserializeOwned> FromApiRequest for Body<T> {
    fn from_api_request(request: &ApiRequest) -> Result<Self, Rejection> {
        serde_json::from_slice(&request.body)
            .map(Body)
            .map_err(|e| Rejection::bad_request(format!("Invalid request body: {e}")))
    }
}

/// An async function usable as an endpoint handler.
pub trait EndpointHandler<Args>: Clone + Send + Sync + 'static {
    fn call(&self, request: ApiRequest) -> BoxFuture<'static, Response>;
}

macro_rules! impl_endpoint_handler {
    ($($ty:ident),*) => {
        impl<F, Fut, R, $($ty,)*> EndpointHandler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
            R: IntoResponse,
            $($ty: FromApiRequest + Send + 'static,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn call(&self, request: ApiRequest) -> BoxFuture<'static, Response> {
                $(
                    let $ty = match <$ty as FromApiRequest>::from_api_request(&request) {
                        Ok(value) => value,
                        Err(rejection) => return Box::pin(async move { rejection.into_response() }),
                    };
                )*
                let future = (self)($($ty),*);
                Box::pin(async move {
                    match future.await {
                        Ok(response) => response.into_response(),
                        Err(error) => {
                            tracing::error!(error = %format!("{error:#}"), "Endpoint handler failed");
                            Rejection::internal(format!("{error:#}")).into_response()
                        }
                    }
                })
            }
        }
    };
}

impl_endpoint_handler!();
impl_endpoint_handler!(T1);
impl_endpoint_handler!(T1, T2);
impl_endpoint_handler!(T1, T2, T3);

type BoxedHandler = Arc<dyn Fn(ApiRequest) -> BoxFuture<'static, Response> + Send + Sync>;

/// `(regex, help)` attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAnnotation {
    pub regex: String,
    pub help: String,
}

/// One declared endpoint.
#[derive(Clone)]
pub struct ApiEndpoint {
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) handler: BoxedHandler,
    pub(crate) command: Option<CommandAnnotation>,
}

impl ApiEndpoint {
    pub fn new<H, Args>(method: HttpMethod, path: impl Into<String>, handler: H) -> Self
    where
        H: EndpointHandler<Args>,
    {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(move |request| handler.call(request)),
            command: None,
        }
    }

    pub fn get<H, Args>(path: impl Into<String>, handler: H) -> Self
    where
        H: EndpointHandler<Args>,
    {
        Self::new(HttpMethod::Get, path, handler)
    }

    pub fn post<H, Args>(path: impl Into<String>, handler: H) -> Self
    where
        H: EndpointHandler<Args>,
    {
        Self::new(HttpMethod::Post, path, handler)
    }

    pub fn put<H, Args>(path: impl Into<String>, handler: H) -> Self
    where
        H: EndpointHandler<Args>,
    {
        Self::new(HttpMethod::Put, path, handler)
    }

    pub fn delete<H, Args>(path: impl Into<String>, handler: H) -> Self
    where
        H: EndpointHandler<Args>,
    {
        Self::new(HttpMethod::Delete, path, handler)
    }

    /// Bind a text command to this endpoint.
    pub fn command(mut self, regex: impl Into<String>, help: impl Into<String>) -> Self {
        self.command = Some(CommandAnnotation {
            regex: regex.into(),
            help: help.into(),
        });
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Invoke the handler directly.
    pub async fn invoke(&self, request: ApiRequest) -> Response {
        (self.handler)(request).await
    }
}

impl fmt::Debug for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiEndpoint")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// A set of endpoints declared by one plugin component.
pub trait PluginHttpApi: Send + Sync + 'static {
    fn endpoints(self: Arc<Self>) -> Vec<ApiEndpoint>;
}
