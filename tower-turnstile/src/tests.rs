use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::Ready;
use futures::future::ready;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use turnstile::PolicyConfig;
use turnstile::PolicyRegistry;
use turnstile::QueueOrder;
use turnstile::Reason;

use super::*;

#[derive(Clone)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl MockService {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }
}

/// Answers every HTTP request with an empty `200`.
#[derive(Clone)]
struct HttpMock;

impl Service<http::Request<()>> for HttpMock {
    type Response = http::Response<()>;
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: http::Request<()>) -> Self::Future {
        ready(Ok(http::Response::new(())))
    }
}

fn fixed(permit_limit: usize, queue_limit: usize) -> PolicyConfig {
    PolicyConfig::FixedWindow {
        permit_limit,
        window: Duration::from_secs(10),
        queue_limit,
        queue_order: QueueOrder::OldestFirst,
    }
}

fn registry(policies: impl IntoIterator<Item = (&'static str, PolicyConfig)>) -> PolicyRegistry {
    policies
        .into_iter()
        .fold(PolicyRegistry::builder(), |builder, (name, config)| {
            builder.policy(name, config)
        })
        .build()
        .unwrap()
}

fn rejection(err: BoxError) -> Rejection {
    match *err.downcast::<AdmitError>().expect("should be an AdmitError") {
        AdmitError::Rejected(rejection) => rejection,
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn it_admits_up_to_the_limit_then_rejects() {
    let registry = registry([("fixed", fixed(2, 0))]);
    let mock = MockService::new();
    let mut service = AdmissionLayer::new(&registry, Some("fixed"))
        .unwrap()
        .layer(mock.clone());

    service.ready().await.unwrap().call(()).await.unwrap();
    service.ready().await.unwrap().call(()).await.unwrap();
    let err = service.ready().await.unwrap().call(()).await.unwrap_err();

    let rejection = rejection(err);
    assert_eq!(rejection.policy, "fixed");
    assert_eq!(rejection.status, 429);
    assert_eq!(rejection.retry_after(), Some(Duration::from_secs(10)));
    assert_eq!(mock.count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn requests_without_a_policy_are_not_limited() {
    let registry = registry([("fixed", fixed(1, 0))]);
    let mock = MockService::new();
    let mut service = AdmissionLayer::new(&registry, None)
        .unwrap()
        .layer(mock.clone());

    for _ in 0..10 {
        service.ready().await.unwrap().call(()).await.unwrap();
    }
    assert_eq!(mock.count.load(Ordering::SeqCst), 10);
    assert_eq!(registry.statistics()["fixed"].total_admitted, 0);
}

#[test]
fn unknown_policies_fail_at_construction() {
    let registry = registry([("fixed", fixed(1, 0))]);
    assert!(matches!(
        AdmissionLayer::new(&registry, Some("sliding")),
        Err(turnstile::ConfigError::UnknownPolicy(name)) if name == "sliding"
    ));
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let registry = registry([("fixed", fixed(1, 0))]);
    let layer = AdmissionLayer::new(&registry, Some("fixed")).unwrap();

    let mut svc1 = layer.layer(MockService::new());
    let mut svc2 = layer.layer(MockService::new());

    svc1.ready().await.unwrap().call(()).await.unwrap();
    // svc2 shares the policy, so its window is already spent.
    assert!(svc2.ready().await.unwrap().call(()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn queued_request_completes_when_the_window_resets() {
    let registry = registry([("fixed", fixed(1, 1))]);
    let mock = MockService::new();
    let mut service = AdmissionLayer::new(&registry, Some("fixed"))
        .unwrap()
        .layer(mock.clone());

    service.ready().await.unwrap().call(()).await.unwrap();

    let mut queued = service.ready().await.unwrap().call(());
    assert!(futures::poll!(&mut queued).is_pending());
    assert_eq!(registry.statistics()["fixed"].queued, 1);

    // The queue is full, so the next request is turned away at once.
    let err = service.ready().await.unwrap().call(()).await.unwrap_err();
    assert_eq!(
        rejection(err).reason,
        Reason::Overloaded {
            retry_after: Some(Duration::from_secs(10))
        }
    );

    tokio::time::advance(Duration::from_secs(10)).await;
    queued.await.expect("queued request should be admitted");
    assert_eq!(mock.count.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_a_queued_request_frees_its_slot() {
    let registry = registry([("fixed", fixed(1, 1))]);
    let mock = MockService::new();
    let mut service = AdmissionLayer::new(&registry, Some("fixed"))
        .unwrap()
        .layer(mock.clone());

    service.ready().await.unwrap().call(()).await.unwrap();

    let mut abandoned = service.ready().await.unwrap().call(());
    assert!(futures::poll!(&mut abandoned).is_pending());
    drop(abandoned);
    assert_eq!(registry.statistics()["fixed"].queued, 0);

    // The freed queue slot is available to the next caller.
    let mut queued = service.ready().await.unwrap().call(());
    assert!(futures::poll!(&mut queued).is_pending());

    tokio::time::advance(Duration::from_secs(10)).await;
    queued.await.unwrap();
    assert_eq!(mock.count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrency_permits_are_held_until_the_response() {
    let registry = registry([("concurrency", PolicyConfig::Concurrency { permit_limit: 1 })]);
    let (mock, mut handle) = tower_test::mock::pair::<(), ()>();
    let mut service = AdmissionLayer::new(&registry, Some("concurrency"))
        .unwrap()
        .layer(mock);

    let in_flight = service.ready().await.unwrap().call(());
    let (_, responder) = handle.next_request().await.unwrap();

    let err = service.ready().await.unwrap().call(()).await.unwrap_err();
    let rejection = rejection(err);
    assert_eq!(rejection.policy, "concurrency");
    assert_eq!(rejection.retry_after(), None);

    responder.send_response(());
    in_flight.await.unwrap();

    // The first permit went with its response.
    let next = service.ready().await.unwrap().call(());
    let (_, responder) = handle.next_request().await.unwrap();
    responder.send_response(());
    next.await.unwrap();
}

#[tokio::test]
async fn dropping_an_in_flight_request_releases_its_permit() {
    let registry = registry([("concurrency", PolicyConfig::Concurrency { permit_limit: 1 })]);
    let (mock, mut handle) = tower_test::mock::pair::<(), ()>();
    let mut service = AdmissionLayer::new(&registry, Some("concurrency"))
        .unwrap()
        .layer(mock);

    let in_flight = service.ready().await.unwrap().call(());
    let _request = handle.next_request().await.unwrap();
    assert_eq!(registry.statistics()["concurrency"].available_permits, 0);

    drop(in_flight);
    assert_eq!(registry.statistics()["concurrency"].available_permits, 1);
}

#[cfg(feature = "http")]
mod routed {
    use super::*;

    fn request(path: &str) -> http::Request<()> {
        http::Request::builder().uri(path).body(()).unwrap()
    }

    fn routed_service() -> (PolicyRegistry, AdmissionService<RouteTable, HttpMock>) {
        let registry = registry([("fixed", fixed(1, 0))]);
        let routes = RouteTable::builder(&registry)
            .route("/limited", Some("fixed"))
            .route("/free", None)
            .build()
            .unwrap();
        let service = AdmissionLayer::routed(routes)
            .with_rejection_status(503)
            .layer(HttpMock);
        (registry, service)
    }

    #[tokio::test]
    async fn requests_follow_their_route() {
        let (_registry, mut service) = routed_service();

        service.ready().await.unwrap().call(request("/limited")).await.unwrap();
        let err = service
            .ready()
            .await
            .unwrap()
            .call(request("/LIMITED/"))
            .await
            .unwrap_err();
        assert_eq!(rejection(err).status, 503);

        for path in ["/free", "/unmapped", "/free"] {
            service.ready().await.unwrap().call(request(path)).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_render_as_http_responses() {
        let (_registry, mut service) = routed_service();

        service.ready().await.unwrap().call(request("/limited")).await.unwrap();
        let err = service
            .ready()
            .await
            .unwrap()
            .call(request("/limited"))
            .await
            .unwrap_err();

        let response = rejection(err).to_http_response::<()>();
        assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[http::header::RETRY_AFTER], "10");
    }

    #[tokio::test]
    async fn configuration_builds_a_routed_stack() {
        let config = AdmissionConfig {
            rejection_status: 429,
            policies: BTreeMap::from([("fixed".to_string(), fixed(2, 0))]),
            routes: BTreeMap::from([(
                "/ratelimittests/fixed".to_string(),
                Some("fixed".to_string()),
            )]),
        };
        let (registry, layer) = config.layer().unwrap();
        let mut service = layer.layer(HttpMock);

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let res = service
                .ready()
                .await
                .unwrap()
                .call(request("/ratelimittests/fixed"))
                .await;
            outcomes.push(
                res.map(|response| response.status())
                    .map_err(|err| rejection(err).status),
            );
        }
        assert_eq!(
            outcomes,
            [Ok(http::StatusCode::OK), Ok(http::StatusCode::OK), Err(429)]
        );
        assert_eq!(registry.statistics()["fixed"].total_rejected, 1);
    }
}

#[cfg(feature = "axum")]
mod axum_e2e {
    use axum::Router;
    use axum::body::Body;
    use axum::error_handling::HandleErrorLayer;
    use axum::http::Request;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceBuilder;

    use super::*;

    #[tokio::test]
    async fn fixed_window_answers_200_200_429() {
        let config = AdmissionConfig {
            rejection_status: 429,
            policies: BTreeMap::from([("fixed".to_string(), fixed(2, 0))]),
            routes: BTreeMap::from([(
                "/ratelimittests/fixed".to_string(),
                Some("fixed".to_string()),
            )]),
        };
        let (_registry, layer) = config.layer().unwrap();

        let app = Router::new()
            .route("/ratelimittests/fixed", get(|| async { "ok" }))
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_admit_error))
                    .layer(layer)
                    .map_err(BoxError::from),
            );

        let mut statuses = Vec::new();
        let mut retry_after = None;
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/ratelimittests/fixed")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            statuses.push(response.status());
            retry_after = response.headers().get("retry-after").cloned();
        }

        assert_eq!(
            statuses,
            [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
        assert_eq!(retry_after.unwrap(), "10");
    }
}
