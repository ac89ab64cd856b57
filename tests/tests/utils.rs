use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// A mock service shared by every test in the binary.
///
/// Each `#[tokio::test]` owns its runtime, so the service runs on a thread
/// with a runtime of its own and outlives any single test.
#[allow(unused)]
pub struct Harness {
    pub base: String,
    pub metrics: PrometheusHandle,
}

#[allow(unused)]
pub fn harness() -> &'static Harness {
    static HARNESS: OnceLock<Harness> = OnceLock::new();

    HARNESS.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("surge=debug,mock_service=debug")),
            )
            .init();

        let metrics = PrometheusBuilder::new().install_recorder().unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::Builder::new()
            .name("mock-service".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                    mock_service::serve(listener).await.unwrap();
                });
            })
            .unwrap();

        Harness {
            base: format!("http://{addr}"),
            metrics,
        }
    })
}
