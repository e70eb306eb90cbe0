use async_trait::async_trait;
use hyper::{Body, Method, Response};
use std::sync::Arc;
use tracing::debug;

use super::response;

/// 路由后的请求, 路径不含查询串
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// `*` 模式匹配到的剩余路径
    pub wildcard: Option<String>,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            wildcard: None,
        }
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: ProxyRequest) -> Response<Body>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(pattern.to_string()),
        }
    }

    /// Returns the wildcard remainder on a match (empty for exact patterns).
    fn matches<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            Pattern::Exact(exact) if exact == path => Some(""),
            Pattern::Prefix(prefix) => path.strip_prefix(prefix.as_str()),
            _ => None,
        }
    }
}

/// 按注册顺序匹配, 先注册的优先
#[derive(Clone, Default)]
pub struct ProxyRouter {
    routes: Vec<(Pattern, Arc<dyn RouteHandler>)>,
}

impl ProxyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) {
        debug!("Registering route {}", pattern);
        self.routes.push((Pattern::parse(pattern), handler));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub async fn handle(&self, mut request: ProxyRequest) -> Response<Body> {
        for (pattern, handler) in &self.routes {
            if let Some(rest) = pattern.matches(&request.path) {
                if let Pattern::Prefix(_) = pattern {
                    request.wildcard = Some(rest.to_string());
                }
                return handler.handle(request).await;
            }
        }
        debug!("No route for {}", request.path);
        response::not_found()
    }
}
