//! 测试用的本地源站, 监听临时端口

use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Request, Response, Server, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16),
    EchoRange,
    Delayed(Duration),
    /// 第 n 次请求返回第 n 个响应, 之后重复最后一个
    Sequence(Vec<Vec<u8>>),
}

#[derive(Clone)]
pub(crate) struct Route {
    path: String,
    reply: Reply,
}

impl Route {
    pub(crate) fn text(path: &str, body: &str) -> Self {
        Self::bytes(path, body.as_bytes().to_vec())
    }

    pub(crate) fn bytes(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            reply: Reply::Body(body),
        }
    }

    pub(crate) fn status(path: &str, status: u16) -> Self {
        Self {
            path: path.to_string(),
            reply: Reply::Status(status),
        }
    }

    pub(crate) fn echo_range(path: &str) -> Self {
        Self {
            path: path.to_string(),
            reply: Reply::EchoRange,
        }
    }

    pub(crate) fn delayed(path: &str, delay: Duration) -> Self {
        Self {
            path: path.to_string(),
            reply: Reply::Delayed(delay),
        }
    }

    pub(crate) fn sequence(path: &str, bodies: Vec<String>) -> Self {
        Self {
            path: path.to_string(),
            reply: Reply::Sequence(bodies.into_iter().map(String::into_bytes).collect()),
        }
    }
}

#[derive(Default)]
struct OriginState {
    routes: HashMap<String, Reply>,
    hits: HashMap<String, usize>,
    /// path + query of every request, in arrival order
    requests: Vec<String>,
}

pub(crate) struct OriginServer {
    addr: SocketAddr,
    state: Arc<Mutex<OriginState>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl OriginServer {
    pub(crate) async fn start(routes: Vec<Route>) -> Self {
        let mut state = OriginState::default();
        for route in routes {
            state.routes.insert(route.path, route.reply);
        }
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let service_state = state.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req)))
            }
        });

        let (tx, rx) = oneshot::channel::<()>();
        let server = Server::from_tcp(listener)
            .unwrap()
            .serve(make_svc)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            });
        tokio::spawn(server);

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn set_route(&self, route: Route) {
        self.state.lock().unwrap().routes.insert(route.path, route.reply);
    }
}

impl Drop for OriginServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(state: Arc<Mutex<OriginState>>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let full = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let (reply, hit) = {
        let mut state = state.lock().unwrap();
        state.requests.push(full);
        let hit = {
            let counter = state.hits.entry(path.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        (state.routes.get(&path).cloned(), hit)
    };

    let response = match reply {
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
        Some(Reply::Body(body)) => Response::new(Body::from(body)),
        Some(Reply::Status(status)) => Response::builder()
            .status(status)
            .body(Body::from("error"))
            .unwrap(),
        Some(Reply::EchoRange) => {
            let range = req
                .headers()
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            Response::new(Body::from(range))
        }
        Some(Reply::Delayed(delay)) => {
            tokio::time::sleep(delay).await;
            Response::new(Body::from("late"))
        }
        Some(Reply::Sequence(bodies)) => {
            let index = (hit - 1).min(bodies.len().saturating_sub(1));
            Response::new(Body::from(bodies.get(index).cloned().unwrap_or_default()))
        }
    };
    Ok(response)
}
