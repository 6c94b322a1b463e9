use crate::http::{make_boxed_error_response, make_boxed_json_response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves the operational endpoints on the admin listener:
///
/// - `/health` always answers `ok`
/// - `/ready` answers `ok` once `is_ready` returns true
/// - `/circuits` renders the JSON snapshot returned by `circuits`
pub struct AdminService<F, C, E> {
    is_ready: F,
    circuits: C,
    _error: PhantomData<E>,
}

impl<F, C, E> AdminService<F, C, E>
where
    F: Fn() -> bool,
    C: Fn() -> serde_json::Value,
{
    pub fn new(is_ready: F, circuits: C) -> Self {
        Self {
            is_ready,
            circuits,
            _error: PhantomData,
        }
    }

    fn respond(&self, path: &str) -> Response<BoxBody<Bytes, Infallible>> {
        let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

        match path {
            "/health" => Response::new(ok_body()),
            "/ready" => match (self.is_ready)() {
                true => Response::new(ok_body()),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            "/circuits" => make_boxed_json_response(StatusCode::OK, &(self.circuits)()),
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<F, C, E> Service<Request<Incoming>> for AdminService<F, C, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    C: Fn() -> serde_json::Value + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self.respond(req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}
