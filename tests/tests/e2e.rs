use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use surge::prelude::*;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Answers 200 to `first` and 500 to everything else.
fn first_ok_second_ko(request: Request) -> IoHandle {
    let status = if &*request.name == "first" { 200 } else { 500 };
    async move { Ok(Response::with_status(status)) }.boxed()
}

fn drain(mut rx: mpsc::UnboundedReceiver<UserReport>) -> Vec<UserReport> {
    let mut reports = vec![];
    while let Ok(report) = rx.try_recv() {
        reports.push(report);
    }
    reports.sort_by_key(|report| report.session.user_id());
    reports
}

fn request_pause_request(name: &str) -> Scenario {
    Scenario::new(
        name,
        Chain::new()
            .request(get("first", "http://mock/first"))
            .pause(Duration::from_secs(2))
            .request(get("second", "http://mock/second")),
    )
    .unwrap()
}

#[tracing_test::traced_test]
#[tokio::test(start_paused = true)]
#[ntest::timeout(5_000)]
async fn users_finish_ko_with_both_requests_recorded() {
    let (tx, rx) = mpsc::unbounded_channel();

    let stats = Simulation::new(RunConfig::new().abort_on_failure(false))
        .inject(request_pause_request("S"), InjectionProfile::new().at_once(3))
        .run(first_ok_second_ko, tx)
        .await
        .unwrap();

    assert_eq!(stats.users_started, 3);
    assert_eq!(stats.users_ko, 3);
    assert_eq!(stats.users_ok, 0);
    assert_eq!(stats.requests_ok, 3);
    assert_eq!(stats.requests_ko, 3);
    assert!(!stats.stopped);

    let reports = drain(rx);
    assert_eq!(reports.len(), 3);
    for (user_id, report) in reports.iter().enumerate() {
        assert_eq!(report.session.user_id(), user_id as u64);
        assert_eq!(report.session.scenario(), "S");
        assert_eq!(report.outcome, UserOutcome::Completed);
        assert_eq!(report.status(), Status::Ko);
        assert!(report.session.is_terminated());
        assert!(report.elapsed >= Duration::from_secs(2));

        let outcomes: Vec<_> = report
            .requests
            .iter()
            .map(|record| (&*record.name, record.status, record.response_status))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("first", Status::Ok, Some(200)),
                ("second", Status::Ko, Some(500)),
            ]
        );
    }
}

#[tracing_test::traced_test]
#[tokio::test(start_paused = true)]
#[ntest::timeout(5_000)]
async fn abort_on_failure_stops_after_the_failed_request() {
    let (tx, rx) = mpsc::unbounded_channel();
    let issued = Arc::new(AtomicUsize::new(0));

    let transport = {
        let issued = issued.clone();
        move |request: Request| -> IoHandle {
            issued.fetch_add(1, Ordering::Relaxed);
            let status = if &*request.name == "login" { 401 } else { 200 };
            async move { Ok(Response::with_status(status)) }.boxed()
        }
    };
    let scenario = Scenario::new(
        "checkout",
        Chain::new()
            .request(post("login", "http://mock/login"))
            .pause(Duration::from_secs(1))
            .request(get("cart", "http://mock/cart")),
    )
    .unwrap();

    let stats = Simulation::new(RunConfig::new().abort_on_failure(true))
        .inject(scenario, InjectionProfile::new().at_once(4))
        .run(transport, tx)
        .await
        .unwrap();

    assert_eq!(issued.load(Ordering::Relaxed), 4);
    assert_eq!(stats.users_ko, 4);
    assert_eq!(stats.requests_ko, 4);
    for report in drain(rx) {
        assert_eq!(report.outcome, UserOutcome::Completed);
        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].response_status, Some(401));
    }
}

#[tokio::test(start_paused = true)]
#[ntest::timeout(5_000)]
async fn populations_share_one_timeline() {
    let starts: Arc<Mutex<Vec<(String, u64, Duration)>>> = Arc::default();
    let origin = Instant::now();

    let record = |name: &str| {
        let starts = starts.clone();
        Scenario::new(
            name,
            Chain::new().exec(move |session| {
                starts.lock().unwrap().push((
                    session.scenario().to_string(),
                    session.user_id(),
                    session.started_at() - origin,
                ));
                Ok(session.clone())
            }),
        )
        .unwrap()
    };

    let stats = Simulation::new(RunConfig::new().pool_size(2))
        .inject(
            record("early"),
            InjectionProfile::new().ramp_users(4, Duration::from_secs(4)),
        )
        .inject(
            record("late"),
            InjectionProfile::new()
                .nothing_for(Duration::from_millis(1500))
                .at_once(2),
        )
        .run(|_request: Request| -> IoHandle { async { Ok(Response::with_status(200)) }.boxed() }, ())
        .await
        .unwrap();

    assert_eq!(stats.users_started, 6);
    assert_eq!(stats.users_ok, 6);

    let mut starts = starts.lock().unwrap().clone();
    starts.sort_by_key(|(_, user_id, _)| *user_id);
    let order: Vec<_> = starts.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(order, vec!["early", "early", "late", "late", "early", "early"]);

    let user_ids: Vec<_> = starts.iter().map(|(_, user_id, _)| *user_id).collect();
    assert_eq!(user_ids, (0..6).collect::<Vec<_>>());

    for window in starts.windows(2) {
        assert!(window[0].2 <= window[1].2);
    }
}

#[tracing_test::traced_test]
#[tokio::test(start_paused = true)]
#[ntest::timeout(5_000)]
async fn stopping_a_run_aborts_waiting_users() {
    let (tx, rx) = mpsc::unbounded_channel();
    let scenario = Scenario::new(
        "idle",
        Chain::new().pause(Duration::from_secs(60)),
    )
    .unwrap();

    let handle = Simulation::new(RunConfig::new())
        .inject(scenario, InjectionProfile::new().at_once(3))
        .start(first_ok_second_ko, tx)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.stop();
    let stats = handle.await.unwrap();

    assert!(stats.stopped);
    assert_eq!(stats.users_aborted, 3);
    assert!(drain(rx)
        .iter()
        .all(|report| report.outcome == UserOutcome::Aborted));
}

#[test]
fn runs_need_a_runtime() {
    let scenario = request_pause_request("S");
    let result = Simulation::new(RunConfig::new())
        .inject(scenario, InjectionProfile::new().at_once(1))
        .start(first_ok_second_ko, ());
    assert!(matches!(result, Err(SurgeError::NoRuntime)));
}
