use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use buildmesh_protocol::{BuildFailure, BuildRequestData, BuildResult, FailureKind, SubmissionId};
use buildmesh_submission::*;

type Engine = Box<dyn Fn(Arc<BuildSubmission>) + Send + Sync>;

/// Host that records starts and completions, optionally running an engine.
#[derive(Default)]
struct TestHost {
    started: Mutex<Vec<(SubmissionId, bool)>>,
    completed: AtomicUsize,
    errors: Mutex<HashSet<SubmissionId>>,
    engine: Option<Engine>,
}

impl SubmissionHost<BuildRequestData, BuildResult> for TestHost {
    fn execute_submission(&self, submission: Arc<BuildSubmission>, allow_main_thread_build: bool) {
        self.started
            .lock()
            .unwrap()
            .push((submission.id(), allow_main_thread_build));
        if let Some(engine) = &self.engine {
            engine(submission);
        }
    }

    fn has_logged_errors(&self, id: SubmissionId) -> bool {
        self.errors.lock().unwrap().contains(&id)
    }

    fn submission_completed(&self, _id: SubmissionId) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

fn services(host: Arc<TestHost>) -> SubmissionServices<BuildRequestData, BuildResult> {
    SubmissionServices {
        host,
        callbacks: Arc::new(ThreadCallbackQueue::default()),
        wait_strategy: Arc::new(BlockingWait),
        duplicate_policy: DuplicateResultPolicy::Ignore,
        legacy_threading: false,
    }
}

fn request() -> BuildRequestData {
    BuildRequestData::new("src/app.proj").with_target("Build")
}

fn counting_callback(
    tx: mpsc::Sender<SubmissionId>,
) -> CompletionCallback<BuildRequestData, BuildResult> {
    Box::new(move |submission| {
        tx.send(submission.id()).unwrap();
    })
}

#[test]
fn test_create_rejects_empty_request() {
    let host = Arc::new(TestHost::default());
    let err = BuildSubmission::create(SubmissionId(1), BuildRequestData::new("  "), services(host))
        .unwrap_err();
    assert!(matches!(err, SubmissionError::InvalidArgument(_)));
}

#[test]
fn test_new_submission_is_pending() {
    let host = Arc::new(TestHost::default());
    let submission = BuildSubmission::create(SubmissionId(1), request(), services(host)).unwrap();
    assert_eq!(submission.phase(), SubmissionPhase::Pending);
    assert!(submission.result().is_none());
    assert!(!submission.is_completed());
}

#[test]
fn test_result_then_logging_fires_once() {
    let host = Arc::new(TestHost::default());
    let submission =
        BuildSubmission::create(SubmissionId(1), request(), services(host.clone())).unwrap();
    let (tx, rx) = mpsc::channel();
    submission
        .execute_async(Some(counting_callback(tx)), None)
        .unwrap();
    assert_eq!(submission.phase(), SubmissionPhase::Running);

    submission
        .complete_result(BuildResult::success(SubmissionId(1)))
        .unwrap();
    assert!(!submission.is_completed(), "must wait for logging to drain");
    assert!(rx.try_recv().is_err());

    submission.on_logging_complete();
    assert!(submission.is_completed());
    assert_eq!(
        submission.phase(),
        SubmissionPhase::Completed { succeeded: true }
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), SubmissionId(1));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(host.completed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_logging_then_result_fires_once() {
    let host = Arc::new(TestHost::default());
    let submission =
        BuildSubmission::create(SubmissionId(2), request(), services(host.clone())).unwrap();
    let (tx, rx) = mpsc::channel();
    submission
        .execute_async(Some(counting_callback(tx)), None)
        .unwrap();

    submission.on_logging_complete();
    assert!(!submission.is_completed());
    submission.on_logging_complete();
    assert!(!submission.is_completed(), "repeated drain signals do not complete");

    submission
        .complete_result(BuildResult::success(SubmissionId(2)))
        .unwrap();
    assert!(submission.is_completed());
    assert!(submission.result().unwrap().succeeded());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), SubmissionId(2));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(host.completed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_execute_async_twice_is_invalid_state() {
    let host = Arc::new(TestHost::default());
    let submission = BuildSubmission::create(SubmissionId(3), request(), services(host)).unwrap();
    submission.execute_async(None, None).unwrap();
    let err = submission.execute_async(None, None).unwrap_err();
    assert!(err.is_invalid_state());
}

#[test]
fn test_execute_after_completion_is_invalid_state() {
    let host = Arc::new(TestHost::default());
    let submission = BuildSubmission::create(SubmissionId(4), request(), services(host)).unwrap();
    submission
        .complete_with_failure(BuildFailure::new(FailureKind::Cancelled, "cancelled"))
        .unwrap();
    submission.on_logging_complete();
    assert!(submission.is_completed());
    assert!(submission.execute().unwrap_err().is_invalid_state());
}

#[test]
fn test_mismatched_result_is_rejected() {
    let host = Arc::new(TestHost::default());
    let submission = BuildSubmission::create(SubmissionId(5), request(), services(host)).unwrap();
    submission.on_logging_complete();
    let err = submission
        .complete_result(BuildResult::success(SubmissionId(6)))
        .unwrap_err();
    assert!(matches!(
        err,
        SubmissionError::Consistency {
            expected: SubmissionId(5),
            actual: SubmissionId(6)
        }
    ));
    assert!(submission.result().is_none());
    assert!(!submission.is_completed());
}

#[test]
fn test_execute_returns_failed_result_for_abnormal_termination() {
    let host = Arc::new(TestHost {
        engine: Some(Box::new(|submission: Arc<BuildSubmission>| {
            std::thread::spawn(move || {
                submission
                    .complete_with_failure(BuildFailure::new(
                        FailureKind::EngineAborted,
                        "node process crashed",
                    ))
                    .unwrap();
                submission.on_logging_complete();
            });
        })),
        ..Default::default()
    });
    let submission = BuildSubmission::create(SubmissionId(7), request(), services(host)).unwrap();

    let result = submission.execute().unwrap();
    assert!(!result.succeeded());
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::EngineAborted);
    assert_eq!(failure.message, "node process crashed");
}

#[test]
fn test_first_result_wins_when_ignoring_duplicates() {
    let host = Arc::new(TestHost::default());
    let submission = BuildSubmission::create(SubmissionId(8), request(), services(host)).unwrap();
    submission
        .complete_result(BuildResult::success(SubmissionId(8)))
        .unwrap();
    submission
        .complete_with_failure(BuildFailure::new(FailureKind::Cancelled, "timed out"))
        .unwrap();
    submission.on_logging_complete();
    assert!(submission.result().unwrap().succeeded());
}

#[test]
fn test_duplicate_result_rejected_by_policy() {
    let host = Arc::new(TestHost::default());
    let mut services = services(host);
    services.duplicate_policy = DuplicateResultPolicy::Reject;
    let submission = BuildSubmission::create(SubmissionId(9), request(), services).unwrap();
    submission
        .complete_result(BuildResult::success(SubmissionId(9)))
        .unwrap();
    let err = submission
        .complete_result(BuildResult::success(SubmissionId(9)))
        .unwrap_err();
    assert!(matches!(err, SubmissionError::DuplicateResult { .. }));
    submission.on_logging_complete();
    assert!(submission.is_completed());
}

#[test]
fn test_logged_errors_fail_successful_result() {
    let host = Arc::new(TestHost::default());
    host.errors.lock().unwrap().insert(SubmissionId(10));
    let submission =
        BuildSubmission::create(SubmissionId(10), request(), services(host)).unwrap();
    submission
        .complete_result(BuildResult::success(SubmissionId(10)))
        .unwrap();
    submission.on_logging_complete();
    assert!(!submission.result().unwrap().succeeded());
    assert_eq!(
        submission.phase(),
        SubmissionPhase::Completed { succeeded: false }
    );
}

#[test]
fn test_callback_runs_off_completing_thread_with_context() {
    let host = Arc::new(TestHost::default());
    let submission =
        BuildSubmission::create(SubmissionId(11), request(), services(host)).unwrap();
    let (tx, rx) = mpsc::channel();
    submission
        .execute_async(
            Some(Box::new(move |submission: Arc<BuildSubmission>| {
                let context = submission.async_context().unwrap();
                let label = context.downcast_ref::<String>().unwrap().clone();
                tx.send((std::thread::current().id(), label)).unwrap();
            })),
            Some(Arc::new("nightly".to_string())),
        )
        .unwrap();

    submission.on_logging_complete();
    submission
        .complete_result(BuildResult::success(SubmissionId(11)))
        .unwrap();

    let (thread, label) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(thread, std::thread::current().id());
    assert_eq!(label, "nightly");
}

#[test]
fn test_concurrent_signals_fire_exactly_once() {
    for round in 0..200 {
        let host = Arc::new(TestHost::default());
        let id = SubmissionId(round);
        let submission = BuildSubmission::create(id, request(), services(host.clone())).unwrap();
        let (tx, rx) = mpsc::channel();
        submission
            .execute_async(Some(counting_callback(tx)), None)
            .unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let mut threads = Vec::new();
        for n in 0..3 {
            let submission = submission.clone();
            let barrier = barrier.clone();
            threads.push(std::thread::spawn(move || {
                barrier.wait();
                if n == 0 {
                    submission.on_logging_complete();
                } else {
                    submission.complete_result(BuildResult::success(id)).unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert!(submission.is_completed(), "round {round}");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), id);
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err(), "round {round}");
        assert_eq!(host.completed.load(Ordering::SeqCst), 1, "round {round}");
    }
}

#[test]
fn test_legacy_execute_pumps_call_ins() {
    let pump = Arc::new(PumpingWait::new());
    let dispatcher = pump.dispatcher();
    let ran_on = Arc::new(Mutex::new(None));
    let ran_on_engine = ran_on.clone();

    let host = Arc::new(TestHost {
        engine: Some(Box::new(move |submission: Arc<BuildSubmission>| {
            let dispatcher = dispatcher.clone();
            let ran_on = ran_on_engine.clone();
            std::thread::spawn(move || {
                let thread = dispatcher.invoke(|| std::thread::current().id()).unwrap();
                *ran_on.lock().unwrap() = Some(thread);
                submission
                    .complete_result(BuildResult::success(submission.id()))
                    .unwrap();
                submission.on_logging_complete();
            });
        })),
        ..Default::default()
    });
    let services = SubmissionServices {
        host: host.clone(),
        callbacks: Arc::new(ThreadCallbackQueue::default()),
        wait_strategy: pump,
        duplicate_policy: DuplicateResultPolicy::Ignore,
        legacy_threading: true,
    };
    let submission = BuildSubmission::create(SubmissionId(12), request(), services).unwrap();

    let result = submission.execute().unwrap();
    assert!(result.succeeded());
    assert_eq!(*ran_on.lock().unwrap(), Some(std::thread::current().id()));
    assert_eq!(host.started.lock().unwrap()[0], (SubmissionId(12), true));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_completion_future_resolves() {
    let host = Arc::new(TestHost::default());
    let submission =
        BuildSubmission::create(SubmissionId(13), request(), services(host)).unwrap();
    submission.execute_async(None, None).unwrap();

    let completer = submission.clone();
    tokio::spawn(async move {
        completer
            .complete_result(BuildResult::success(SubmissionId(13)))
            .unwrap();
        completer.on_logging_complete();
    });

    let result = submission.completion().await.unwrap();
    assert!(result.succeeded());
    assert!(submission.completed_at().unwrap() >= submission.created_at());
}
