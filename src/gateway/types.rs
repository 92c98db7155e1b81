//! Gateway-local request/middleware types.
//!
//! The host framework pins its public [`crate::types::Request`] to
//! `hyper::Request<Incoming>`, and `Incoming` has no public constructor — once
//! a request carries that body type it can never be rebuilt with a different
//! one. Several policies in this crate need exactly that: buffer the body,
//! inspect or transform it, then hand a *replayable* request down the chain
//! (idempotency replay, cache-key hashing, signature verification, inbound
//! decompression, GraphQL document extraction, audit capture all read the
//! body and then still need to call the next stage).
//!
//! The fix is a single conversion boundary. [`GatewayRequest`] is the same
//! shape as the framework's `Request` except its body is [`TakoBody`], which
//! *can* be constructed from plain bytes. [`into_gateway_request`] performs
//! the one-time `Incoming -> TakoBody` conversion when the pipeline is
//! entered; everything downstream operates on `GatewayRequest` and can
//! buffer/replace its body as many times as it needs to.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::body::TakoBody;
use crate::types::{Request, Response};

/// A request flowing through the gateway's own middleware chain.
///
/// Unlike [`crate::types::Request`], the body here is [`TakoBody`], so it can
/// be buffered and rebuilt freely via `req.map(...)` / `http::Request::from_parts`.
pub type GatewayRequest = http::Request<TakoBody>;

/// Converts a framework request into a [`GatewayRequest`] once, at the point
/// the gateway pipeline is installed.
pub fn into_gateway_request(req: Request) -> GatewayRequest {
    req.map(TakoBody::new)
}

/// Boxed gateway middleware: takes a request and the remainder of the chain,
/// returns a boxed future resolving to a response.
pub type BoxGatewayMiddleware =
    Arc<dyn Fn(GatewayRequest, GatewayNext) -> BoxFuture<'static, Response> + Send + Sync>;

/// Boxed terminal handler at the end of a gateway pipeline.
pub type BoxGatewayHandler =
    Arc<dyn Fn(GatewayRequest) -> BoxFuture<'static, Response> + Send + Sync>;

/// The remaining middleware chain plus the terminal handler, mirroring
/// [`crate::middleware::Next`] but parameterized over [`GatewayRequest`].
#[derive(Clone)]
pub struct GatewayNext {
    pub(crate) middlewares: Arc<Vec<BoxGatewayMiddleware>>,
    pub(crate) endpoint: Arc<BoxGatewayHandler>,
    pub(crate) pos: usize,
}

impl GatewayNext {
    pub fn new(middlewares: Arc<Vec<BoxGatewayMiddleware>>, endpoint: Arc<BoxGatewayHandler>) -> Self {
        Self {
            middlewares,
            endpoint,
            pos: 0,
        }
    }

    /// Runs the next middleware in the chain, or the terminal handler once
    /// the chain is exhausted.
    pub async fn run(self, req: GatewayRequest) -> Response {
        match self.middlewares.get(self.pos) {
            Some(mw) => {
                let next = GatewayNext {
                    middlewares: self.middlewares.clone(),
                    endpoint: self.endpoint.clone(),
                    pos: self.pos + 1,
                };
                mw(req, next).await
            }
            None => (self.endpoint)(req).await,
        }
    }
}

/// Wraps a terminal handler with a resolved middleware chain into a single
/// callable compatible with how routes are installed on the framework
/// router: `Fn(Request) -> BoxFuture<Response>`.
pub fn wrap_gateway_pipeline(
    middlewares: Vec<BoxGatewayMiddleware>,
    endpoint: BoxGatewayHandler,
) -> impl Fn(Request) -> BoxFuture<'static, Response> + Send + Sync + 'static {
    let middlewares = Arc::new(middlewares);
    let endpoint = Arc::new(endpoint);
    move |req: Request| {
        let gw_req = into_gateway_request(req);
        let next = GatewayNext::new(middlewares.clone(), endpoint.clone());
        Box::pin(next.run(gw_req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::Responder;
    use http::Method;

    fn mk_req(body: &'static str) -> GatewayRequest {
        http::Request::builder()
            .method(Method::GET)
            .uri("/x")
            .body(TakoBody::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn runs_middlewares_in_order_then_endpoint() {
        let order: Arc<parking_lot::Mutex<Vec<&'static str>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let mw1: BoxGatewayMiddleware = Arc::new(move |req, next| {
            let o1 = o1.clone();
            Box::pin(async move {
                o1.lock().push("mw1");
                next.run(req).await
            })
        });

        let o2 = order.clone();
        let mw2: BoxGatewayMiddleware = Arc::new(move |req, next| {
            let o2 = o2.clone();
            Box::pin(async move {
                o2.lock().push("mw2");
                next.run(req).await
            })
        });

        let o3 = order.clone();
        let endpoint: BoxGatewayHandler = Arc::new(move |_req| {
            let o3 = o3.clone();
            Box::pin(async move {
                o3.lock().push("endpoint");
                "ok".into_response()
            })
        });

        let next = GatewayNext::new(Arc::new(vec![mw1, mw2]), Arc::new(endpoint));
        let resp = next.run(mk_req("hi")).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(*order.lock(), vec!["mw1", "mw2", "endpoint"]);
    }

    #[tokio::test]
    async fn body_can_be_buffered_and_replaced_mid_chain() {
        let mw: BoxGatewayMiddleware = Arc::new(|req, next| {
            Box::pin(async move {
                let (parts, body) = req.into_parts();
                let bytes = http_body_util::BodyExt::collect(body)
                    .await
                    .unwrap()
                    .to_bytes();
                let replayed = http::Request::from_parts(parts, TakoBody::from(bytes));
                next.run(replayed).await
            })
        });
        let endpoint: BoxGatewayHandler = Arc::new(|req| {
            Box::pin(async move {
                let (_, body) = req.into_parts();
                let bytes = http_body_util::BodyExt::collect(body)
                    .await
                    .unwrap()
                    .to_bytes();
                assert_eq!(&bytes[..], b"payload");
                "ok".into_response()
            })
        });
        let next = GatewayNext::new(Arc::new(vec![mw]), Arc::new(endpoint));
        let resp = next.run(mk_req("payload")).await;
        assert_eq!(resp.status(), 200);
    }
}
