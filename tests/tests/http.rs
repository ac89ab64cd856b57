mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    use futures::FutureExt;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use surge::prelude::*;

    #[tokio::test]
    async fn statuses_outside_the_check_fail_the_request() {
        let base = &harness().base;

        let scenario = Scenario::new(
            "statuses",
            Chain::new()
                .request(get("ok", format!("{base}/status/200")))
                .request(get("missing", format!("{base}/status/404")))
                .request(
                    get("accepted", format!("{base}/status/404"))
                        .check_status(200..=404)
                        .save_status_as("last_status"),
                ),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new().abort_on_failure(false))
            .inject(scenario, InjectionProfile::new().at_once(5))
            .run(ReqwestTransport::new(), ())
            .await
            .unwrap();

        assert_eq!(stats.users_ko, 5);
        assert_eq!(stats.requests_ok, 10);
        assert_eq!(stats.requests_ko, 5);
    }

    #[tokio::test]
    async fn file_bodies_are_streamed_in_full() {
        let base = &harness().base;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = vec![b'x'; 256 * 1024];
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let (transport, uploaded) = recording_upload_lengths();
        let scenario = Scenario::new(
            "upload",
            Chain::new().request(
                post("file", format!("{base}/upload"))
                    .body(RequestBodySource::file(file.path()))
                    .content_type("application/octet-stream"),
            ),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new())
            .inject(scenario, InjectionProfile::new().ramp_users(4, Duration::from_secs(1)))
            .run(transport, ())
            .await
            .unwrap();

        assert_eq!(stats.requests_ok, 4);
        assert_eq!(*uploaded.lock().unwrap(), vec![content.len() as u64; 4]);
    }

    #[tokio::test]
    async fn multipart_bodies_reach_the_service() {
        let base = &harness().base;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,name\n1,surge\n").unwrap();
        file.flush().unwrap();

        let (transport, uploaded) = recording_upload_lengths();
        let multipart = MultipartSource::new()
            .part(Part::new("comment", RequestBodySource::text("nightly import")))
            .part(
                Part::new("data", RequestBodySource::file(file.path()))
                    .file_name("data.csv")
                    .content_type("text/csv"),
            );
        let scenario = Scenario::new(
            "multipart",
            Chain::new().request(
                post("import", format!("{base}/upload"))
                    .body(RequestBodySource::multipart(multipart)),
            ),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new())
            .inject(scenario, InjectionProfile::new().at_once(1))
            .run(transport, ())
            .await
            .unwrap();

        assert_eq!(stats.requests_ok, 1);
        let uploaded = uploaded.lock().unwrap();
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0] > "id,name\n1,surge\n".len() as u64 + "nightly import".len() as u64);
    }

    #[tokio::test]
    async fn rate_limited_service_fails_excess_requests() {
        let base = &harness().base;

        let scenario = Scenario::new(
            "limited",
            Chain::new().request(get(
                "limited",
                format!("{base}/limited/10/key/rate_limited_service"),
            )),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new().pool_size(4))
            .inject(
                scenario,
                InjectionProfile::new().constant_rate(50., Duration::from_secs(2)),
            )
            .run(ReqwestTransport::new(), ())
            .await
            .unwrap();

        assert_eq!(stats.requests(), 100);
        assert!(dbg!(stats.requests_ok) >= 10);
        assert!(dbg!(stats.requests_ko) >= 50);
    }

    #[tokio::test]
    async fn slow_responses_hit_the_request_timeout() {
        let base = &harness().base;

        let scenario = Scenario::new(
            "slow",
            Chain::new().request(get("slow", format!("{base}/delay/ms/2000"))),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new().request_timeout(Duration::from_millis(200)))
            .inject(scenario, InjectionProfile::new().at_once(3))
            .run(ReqwestTransport::new(), ())
            .await
            .unwrap();

        assert_eq!(stats.requests_ko, 3);
        assert!(stats.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn service_delays_show_in_latency() {
        let base = &harness().base;

        let scenario = Scenario::new(
            "jittered",
            Chain::new().request(get("jittered", format!("{base}/delay/normal/50/5"))),
        )
        .unwrap();

        let stats = Simulation::new(RunConfig::new())
            .inject(
                scenario,
                InjectionProfile::new().constant_rate(20., Duration::from_secs(1)),
            )
            .run(ReqwestTransport::new(), ())
            .await
            .unwrap();

        assert_eq!(stats.requests_ok, 20);
        assert!(dbg!(stats.latency.quantile(0.5)) >= Duration::from_millis(30));
        assert!(stats.latency.max() < Duration::from_secs(2));

        let rendered = harness().metrics.render();
        assert!(rendered.contains("surge_requests_total"));
        assert!(rendered.contains("jittered"));
    }

    /* Helpers */

    /// Wraps [`ReqwestTransport`] and keeps what `/upload` says it received.
    fn recording_upload_lengths() -> (impl Transport, Arc<Mutex<Vec<u64>>>) {
        let uploaded: Arc<Mutex<Vec<u64>>> = Arc::default();
        let inner = ReqwestTransport::new();
        let transport = {
            let uploaded = uploaded.clone();
            move |request: Request| -> IoHandle {
                let response = inner.issue(request);
                let uploaded = uploaded.clone();
                async move {
                    let response = response.await?;
                    if let Some(length) = response
                        .header(mock_service::UPLOAD_LENGTH)
                        .and_then(|length| length.parse().ok())
                    {
                        uploaded.lock().unwrap().push(length);
                    }
                    Ok::<_, TransportError>(response)
                }
                .boxed()
            }
        };
        (transport, uploaded)
    }
}
