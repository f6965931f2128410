//! In-process HTTP stub for client tests.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, HttpRequest, HttpResponse, web};
use parking_lot::Mutex;

/// A request as the stub saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Still percent-encoded.
    pub path: String,
    pub query: String,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

type Route = dyn Fn(&Recorded) -> (u16, String) + Send + Sync;

struct StubState {
    requests: Arc<Mutex<Vec<Recorded>>>,
    route: Arc<Route>,
}

pub struct HttpStub {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    // Dropping the server shuts it down.
    _server: actix_test::TestServer,
}

impl HttpStub {
    /// Answer every request with `route` and record it.
    pub async fn start(route: impl Fn(&Recorded) -> (u16, String) + Send + Sync + 'static) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);

        let log = requests.clone();
        let server = actix_test::start(move || {
            App::new()
                .app_data(web::Data::new(StubState {
                    requests: log.clone(),
                    route: route.clone(),
                }))
                .default_service(web::to(record))
        });
        let url = format!("http://{}", server.addr());

        Self {
            url,
            requests,
            _server: server,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

async fn record(req: HttpRequest, body: web::Bytes, state: web::Data<StubState>) -> HttpResponse {
    let recorded = Recorded {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        query: req.query_string().to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let (status, body) = (state.route)(&recorded);
    state.requests.lock().push(recorded);

    HttpResponse::build(StatusCode::from_u16(status).unwrap())
        .content_type("application/json")
        .body(body)
}
