//! Functional tests for backend dispatch against mocked generation servers

use async_trait::async_trait;
use bytes::Bytes;
use image_dispatch::backend::traits::{BackendRequest, ImageBackend};
use image_dispatch::backend::{
    Dispatcher, GeneratedImage, GenerationParams, Generator, Job, MaturityFlags,
};
use image_dispatch::cache::ResultCache;
use image_dispatch::config::{DispatchConfig, RegistryConfig};
use image_dispatch::gateway::ServerRegistry;
use image_dispatch::pipeline::{Compositor, Pipeline, Watermark};
use image_dispatch::response::base64;
use image_dispatch::AppError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn registry_config(discovery_url: Option<String>) -> RegistryConfig {
    RegistryConfig {
        server_timeout_secs: 45,
        per_server_concurrency: 3,
        discovery_url,
        discovery_timeout_ms: 1000,
    }
}

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        max_attempts: 3,
        backoff_ms: 1,
        timeout_ms: 2000,
        safety_delay_secs: 0,
        alternate_url: None,
        alternate_api_key: None,
    }
}

fn job(params: GenerationParams) -> Job {
    Job::new("a red fox", params, "10.0.0")
}

fn image_body(bytes: &[u8]) -> Value {
    json!([{ "image": base64::encode(bytes), "has_nsfw_concept": false }])
}

async fn healthy_server(bytes: &[u8]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_body(bytes)))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_generate_on_registered_server() {
    let server = healthy_server(b"not a jpeg").await;
    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    registry.register(&server.uri());

    let dispatcher = Dispatcher::new(registry, &dispatch_config()).unwrap();
    let image = dispatcher.generate(&job(GenerationParams::default())).await.unwrap();

    assert_eq!(image.bytes.as_ref(), b"not a jpeg");
    assert!(!image.maturity.is_mature);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["prompts"], json!(["a red fox"]));
    assert_eq!(body["seed"], 42);
    assert_eq!(body["model"], "flux");
}

#[tokio::test]
async fn test_provenance_is_embedded_in_jpeg() {
    let jpeg = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x01, 0xFF, 0xD9];
    let server = healthy_server(&jpeg).await;
    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    registry.register(&server.uri());

    let dispatcher = Dispatcher::new(registry, &dispatch_config()).unwrap();
    let image = dispatcher.generate(&job(GenerationParams::default())).await.unwrap();

    assert_eq!(&image.bytes[..4], &[0xFF, 0xD8, 0xFF, 0xFE]);
    let len = u16::from_be_bytes([image.bytes[4], image.bytes[5]]) as usize;
    let comment: Value = serde_json::from_slice(&image.bytes[6..4 + len]).unwrap();
    assert_eq!(comment["original"]["prompt"], "a red fox");
    assert_eq!(comment["final"]["seed"], 42);
}

#[tokio::test]
async fn test_failed_server_is_not_retried() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .expect(0..=1)
        .mount(&broken)
        .await;
    let healthy = healthy_server(b"fox").await;

    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    registry.register(&broken.uri());
    registry.register(&healthy.uri());

    let dispatcher = Dispatcher::new(registry, &dispatch_config()).unwrap();
    let image = dispatcher.generate(&job(GenerationParams::default())).await.unwrap();

    assert_eq!(image.bytes.as_ref(), b"fox");
    assert_eq!(healthy.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&broken)
        .await;

    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    registry.register(&broken.uri());

    let dispatcher = Dispatcher::new(registry, &dispatch_config()).unwrap();
    let err = dispatcher
        .generate(&job(GenerationParams::default()))
        .await
        .unwrap_err();

    match err {
        AppError::BackendUnavailable { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_registry_fails_fast() {
    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    let dispatcher = Dispatcher::new(registry, &dispatch_config()).unwrap();

    let err = dispatcher
        .generate(&job(GenerationParams::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoServersAvailable));
}

#[tokio::test]
async fn test_discovery_fills_empty_registry() {
    let server = healthy_server(b"discovered fox").await;
    let discovery = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "url": server.uri() }])))
        .expect(1)
        .mount(&discovery)
        .await;

    let config = registry_config(Some(format!("{}/servers", discovery.uri())));
    let registry = Arc::new(ServerRegistry::new(&config).unwrap());

    let dispatcher = Dispatcher::new(registry.clone(), &dispatch_config()).unwrap();
    let image = dispatcher.generate(&job(GenerationParams::default())).await.unwrap();

    assert_eq!(image.bytes.as_ref(), b"discovered fox");
    assert_eq!(registry.list_active().len(), 1);
}

#[tokio::test]
async fn test_alternate_family_uses_provider() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "image": base64::encode(b"pro fox"), "nsfw": true })),
        )
        .expect(1)
        .mount(&provider)
        .await;

    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    let config = DispatchConfig {
        alternate_url: Some(format!("{}/v1/images", provider.uri())),
        alternate_api_key: Some("secret".to_string()),
        ..dispatch_config()
    };
    let dispatcher = Dispatcher::new(registry, &config).unwrap();

    let params = GenerationParams {
        width: 1920,
        height: 1080,
        model: "flux-pro".to_string(),
        ..GenerationParams::default()
    };
    let image = dispatcher.generate(&job(params)).await.unwrap();

    assert_eq!(image.bytes.as_ref(), b"pro fox");
    assert!(image.maturity.is_mature);

    let requests = provider.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["aspect_ratio"], "16:9");
    assert_eq!(body["model"], "flux-pro");
}

/// Alternate-family backend answering locally with fixed content flags
struct LocalBackend {
    maturity: MaturityFlags,
}

#[async_trait]
impl ImageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, _request: &BackendRequest) -> image_dispatch::Result<GeneratedImage> {
        Ok(GeneratedImage {
            bytes: Bytes::from_static(b"local fox"),
            maturity: self.maturity,
        })
    }
}

struct FailingCompositor;

#[async_trait]
impl Compositor for FailingCompositor {
    async fn composite(&self, _image: Bytes, _watermark: Watermark) -> image_dispatch::Result<Bytes> {
        Err(AppError::PostProcess("watermark service down".to_string()))
    }
}

fn local_dispatcher(maturity: MaturityFlags) -> Dispatcher {
    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    let config = DispatchConfig {
        safety_delay_secs: 15,
        ..dispatch_config()
    };
    Dispatcher::new(registry, &config)
        .unwrap()
        .with_alternate(Arc::new(LocalBackend { maturity }))
}

fn alternate_job() -> Job {
    let params = GenerationParams {
        model: "flux-pro".to_string(),
        ..GenerationParams::default()
    };
    job(params)
}

#[tokio::test(start_paused = true)]
async fn test_flagged_result_is_delayed() {
    let dispatcher = local_dispatcher(MaturityFlags {
        is_mature: true,
        is_child: true,
    });

    let started = Instant::now();
    let image = dispatcher.generate(&alternate_job()).await.unwrap();

    assert!(image.maturity.is_child && image.maturity.is_mature);
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn test_mature_only_result_is_not_delayed() {
    let dispatcher = local_dispatcher(MaturityFlags {
        is_mature: true,
        is_child: false,
    });

    let started = Instant::now();
    dispatcher.generate(&alternate_job()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn test_post_process_failure_fails_job_and_caches_nothing() {
    let pipeline = Pipeline {
        compositor: Arc::new(FailingCompositor),
        ..Pipeline::default()
    };
    let dispatcher = Arc::new(local_dispatcher(MaturityFlags::default()).with_pipeline(pipeline));
    let cache = ResultCache::in_memory(8);
    let job = alternate_job();

    let result = cache
        .get_or_create(&job.fingerprint, {
            let dispatcher = dispatcher.clone();
            let job = job.clone();
            move || async move { dispatcher.generate(&job).await.map(|image| image.bytes) }
        })
        .await;

    assert!(matches!(result.unwrap_err().root(), AppError::PostProcess(_)));
    assert!(cache.lookup(&job.fingerprint).await.is_none());
    assert_eq!(cache.stats().records, 0);
}

/// Records when each request reached the server, always failing
struct ArrivalRecorder {
    arrivals: Arc<Mutex<Vec<std::time::Instant>>>,
}

impl Respond for ArrivalRecorder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().push(std::time::Instant::now());
        ResponseTemplate::new(500)
    }
}

#[tokio::test]
async fn test_backoff_grows_linearly_between_attempts() {
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ArrivalRecorder {
            arrivals: arrivals.clone(),
        })
        .mount(&broken)
        .await;

    let registry = Arc::new(ServerRegistry::new(&registry_config(None)).unwrap());
    registry.register(&broken.uri());
    let config = DispatchConfig {
        max_attempts: 4,
        backoff_ms: 150,
        ..dispatch_config()
    };
    let dispatcher = Dispatcher::new(registry, &config).unwrap();

    let err = dispatcher
        .generate(&job(GenerationParams::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BackendUnavailable { attempts: 4, .. }));

    let arrivals = arrivals.lock().clone();
    assert_eq!(arrivals.len(), 4);
    let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
    for (n, gap) in gaps.iter().enumerate() {
        assert!(
            *gap >= Duration::from_millis(150 * (n as u64 + 1)),
            "gap {} was {:?}",
            n,
            gap
        );
    }
    // Linear, not doubling: the third wait is 450ms rather than 600ms
    assert!(gaps[2] < Duration::from_millis(600), "third gap was {:?}", gaps[2]);
}
