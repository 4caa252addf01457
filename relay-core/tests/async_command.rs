use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use relay_core::{
    AsyncCommand, BoxError, CancellationToken, Command, CommandError, CommandOptions, Observation,
    ObserverFn, OperationStatus, Property,
};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;

fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime")
}

type Changes = Arc<Mutex<Vec<(Property, bool)>>>;

fn recorder() -> (ObserverFn, Changes) {
    let seen: Changes = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let observer: ObserverFn = Arc::new(move |observation: &Observation| {
        if let Observation::PropertyChanged {
            property, value, ..
        } = observation
        {
            captured.lock().unwrap().push((*property, *value));
        }
    });
    (observer, seen)
}

/// Cancellable command whose executor records its token and waits for it.
fn until_canceled(issued: Arc<Mutex<Vec<CancellationToken>>>) -> AsyncCommand {
    AsyncCommand::cancellable(move |(), token: CancellationToken| {
        issued.lock().unwrap().push(token.clone());
        async move {
            token.cancelled().await;
            Err::<(), BoxError>("canceled".into())
        }
    })
}

#[test]
fn non_cancellable_command_never_reports_can_be_canceled() {
    let rt = runtime();
    rt.block_on(async {
        let gate = Arc::new(Notify::new());
        let release = Arc::clone(&gate);
        let command = AsyncCommand::new(move |()| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<(), BoxError>(())
            }
        });

        let handle = command.execute_async(());
        assert!(command.is_running());
        assert!(!command.can_be_canceled());
        assert!(!command.is_cancellation_supported());

        command.cancel();
        assert!(!command.is_cancellation_requested());

        release.notify_one();
        let status = handle.wait().await;
        assert!(matches!(status, OperationStatus::Completed(())));
        assert!(!command.is_running());
        assert!(!command.can_be_canceled());
    });
}

#[test]
fn cancel_requests_cancellation_immediately() {
    let rt = runtime();
    rt.block_on(async {
        let issued = Arc::new(Mutex::new(Vec::new()));
        let command = until_canceled(Arc::clone(&issued));

        let handle = command.execute_async(());
        assert!(command.is_running());
        assert!(command.can_be_canceled());
        assert!(!command.is_cancellation_requested());

        command.cancel();
        // Observable before the executor gets a chance to run.
        assert!(command.is_cancellation_requested());
        assert!(issued.lock().unwrap()[0].is_cancelled());

        let status = handle.wait().await;
        assert!(matches!(status, OperationStatus::Canceled));
        assert!(!command.is_running());

        // Idempotent once nothing is running.
        command.cancel();
        command.cancel();
    });
}

#[test]
fn second_execution_cancels_first_and_replaces_current_operation() {
    let rt = runtime();
    rt.block_on(async {
        let issued = Arc::new(Mutex::new(Vec::new()));
        let command = until_canceled(Arc::clone(&issued));

        let first = command.execute_async(());
        let second = command.execute_async(());

        {
            let tokens = issued.lock().unwrap();
            assert_eq!(tokens.len(), 2);
            assert!(tokens[0].is_cancelled());
            assert!(!tokens[1].is_cancelled());
        }
        let current = command.execution_task().expect("current operation");
        assert_eq!(current.id(), second.id());
        assert_ne!(current.id(), first.id());

        assert!(matches!(first.wait().await, OperationStatus::Canceled));
        assert!(command.is_running(), "second operation still in flight");
        assert!(!command.is_cancellation_requested());

        command.cancel();
        assert!(matches!(second.wait().await, OperationStatus::Canceled));
        assert!(!command.is_running());
    });
}

#[test]
fn false_predicate_leaves_current_operation_untouched() {
    let rt = runtime();
    rt.block_on(async {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let command = AsyncCommand::builder(move |()| {
            *counter.lock().unwrap() += 1;
            async { Ok::<(), BoxError>(()) }
        })
        .can_execute(|_| false)
        .build();

        assert!(!command.can_execute(&()));
        let handle = command.execute_async(());
        assert!(handle.is_completed_successfully());
        assert!(command.execution_task().is_none());
        assert_eq!(*calls.lock().unwrap(), 0);
    });
}

#[test]
fn failing_predicate_is_treated_as_not_executable() {
    let command = AsyncCommand::builder(|()| async { Ok::<(), BoxError>(()) })
        .named("sync")
        .try_can_execute(|_| Err::<bool, _>("settings unavailable"))
        .build();

    assert!(!command.can_execute(&()));
    assert!(matches!(
        command.try_can_execute(&()),
        Err(CommandError::CanExecute { command: "sync", .. })
    ));
}

#[test]
fn property_changes_are_published_once_per_transition() {
    let rt = runtime();
    rt.block_on(async {
        let (observer, seen) = recorder();
        let command = AsyncCommand::cancellable_builder(|(), token: CancellationToken| async move {
            token.cancelled().await;
            Err::<(), BoxError>("stopped".into())
        })
        .observer(observer)
        .build();

        let handle = command.execute_async(());
        assert_eq!(
            &*seen.lock().unwrap(),
            &[(Property::IsRunning, true), (Property::CanBeCanceled, true)]
        );

        command.cancel();
        command.cancel();
        handle.wait().await;

        assert_eq!(
            &*seen.lock().unwrap(),
            &[
                (Property::IsRunning, true),
                (Property::CanBeCanceled, true),
                (Property::IsCancellationRequested, true),
                (Property::IsRunning, false),
                (Property::CanBeCanceled, false),
            ]
        );
    });
}

#[test]
fn executor_runs_to_completion_on_virtual_time() {
    let rt = runtime();
    rt.block_on(async {
        tokio::time::pause();
        let (observer, seen) = recorder();
        let command = AsyncCommand::builder(|delay: Duration| async move {
            tokio::time::sleep(delay).await;
            Ok::<(), BoxError>(())
        })
        .observer(observer)
        .build();

        let handle = command.execute_async(Duration::from_secs(30));
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(handle.wait().await, OperationStatus::Completed(())));

        assert_eq!(
            &*seen.lock().unwrap(),
            &[(Property::IsRunning, true), (Property::IsRunning, false)]
        );
    });
}

#[test]
fn executor_errors_and_panics_fault_the_handle() {
    let rt = runtime();
    rt.block_on(async {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&faults);
        let command = AsyncCommand::builder(|explode: bool| async move {
            if explode {
                panic!("kaboom");
            }
            Err::<(), BoxError>("disk full".into())
        })
        .named("export")
        .observer(Arc::new(move |observation: &Observation| {
            if let Observation::Faulted { error, .. } = observation {
                captured.lock().unwrap().push(error.to_string());
            }
        }))
        .build();

        let failed = command.execute_async(false);
        assert!(matches!(failed.wait().await, OperationStatus::Faulted(_)));
        assert_eq!(failed.fault().expect("fault").to_string(), "disk full");

        let panicked = command.execute_async(true);
        panicked.wait().await;
        assert!(panicked.is_faulted());
        assert!(!command.is_running());

        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[1], "executor panicked: kaboom");
    });
}

#[test]
fn disallowing_concurrency_blocks_reentry() {
    let rt = runtime();
    rt.block_on(async {
        let gate = Arc::new(Notify::new());
        let release = Arc::clone(&gate);
        let can_execute_events = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&can_execute_events);
        let command = AsyncCommand::builder(move |()| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok::<(), BoxError>(())
            }
        })
        .options(CommandOptions {
            allow_concurrent_executions: false,
            ..CommandOptions::default()
        })
        .observer(Arc::new(move |observation: &Observation| {
            if matches!(observation, Observation::CanExecuteChanged { .. }) {
                *counter.lock().unwrap() += 1;
            }
        }))
        .build();

        let first = command.execute_async(());
        assert!(!command.can_execute(&()));
        let rejected = command.execute_async(());
        assert!(rejected.is_completed());
        assert_eq!(command.execution_task().unwrap().id(), first.id());

        release.notify_one();
        first.wait().await;
        assert!(command.can_execute(&()));
        assert_eq!(*can_execute_events.lock().unwrap(), 2);
    });
}

#[test]
fn execute_forwards_parameter_and_discards_handle() {
    let rt = runtime();
    rt.block_on(async {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let command = AsyncCommand::new(move |name: String| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(name);
                Ok::<(), BoxError>(())
            }
        });

        command.execute("alpha".to_string());
        command
            .execution_task()
            .expect("operation started")
            .wait()
            .await;

        assert_eq!(&*received.lock().unwrap(), &["alpha".to_string()]);
    });
}

#[test]
fn executing_without_runtime_faults_instead_of_panicking() {
    let command = AsyncCommand::new(|()| async { Ok::<(), BoxError>(()) });
    let handle = command.execute_async(());
    assert!(handle.is_faulted());
    assert!(command.execution_task().is_none());
    assert!(handle
        .fault()
        .expect("fault")
        .to_string()
        .contains("no tokio runtime"));
}

#[test]
fn executor_panicking_before_its_future_faults_the_handle() {
    let rt = runtime();
    rt.block_on(async {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&faults);
        let command = AsyncCommand::builder(|index: usize| {
            let empty: Vec<u8> = Vec::new();
            let _ = empty[index];
            async { Ok::<(), BoxError>(()) }
        })
        .observer(Arc::new(move |observation: &Observation| {
            if let Observation::Faulted { error, .. } = observation {
                captured.lock().unwrap().push(error.to_string());
            }
        }))
        .build();

        let started = panic::catch_unwind(AssertUnwindSafe(|| command.execute_async(3)));
        let handle = started.expect("execute_async must not unwind");
        assert!(handle.is_faulted());
        assert!(handle
            .fault()
            .expect("fault")
            .to_string()
            .starts_with("executor panicked: index out of bounds"));
        assert!(command.execution_task().is_none());
        assert!(!command.is_running());
        assert_eq!(faults.lock().unwrap().len(), 1);

        // Fire-and-forget goes through the same path.
        command.execute(3);
        assert_eq!(faults.lock().unwrap().len(), 2);
    });
}

#[test]
fn cancel_after_completion_is_silent() {
    let rt = runtime();
    rt.block_on(async {
        let (observer, seen) = recorder();
        let command = AsyncCommand::cancellable_builder(|(), _token: CancellationToken| async {
            Ok::<(), BoxError>(())
        })
        .observer(observer)
        .build();

        let handle = command.execute_async(());
        assert!(matches!(handle.wait().await, OperationStatus::Completed(())));
        assert!(!command.is_running());
        let before = seen.lock().unwrap().len();

        command.cancel();
        command.cancel();

        assert!(!command.is_cancellation_requested());
        assert_eq!(seen.lock().unwrap().len(), before);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .all(|(property, _)| *property != Property::IsCancellationRequested));
    });
}

/// Each property's published values strictly alternate, starting from true.
fn assert_alternating(changes: &[(Property, bool)], property: Property) {
    let values: Vec<bool> = changes
        .iter()
        .filter(|(p, _)| *p == property)
        .map(|(_, value)| *value)
        .collect();
    for (position, value) in values.iter().enumerate() {
        assert_eq!(*value, position % 2 == 0, "{property} published {values:?}");
    }
}

#[test]
fn concurrent_executions_from_many_threads_keep_state_consistent() {
    const CALLERS: usize = 8;

    let _ = tracing_subscriber::fmt().try_init();
    let rt = Builder::new_multi_thread()
        .worker_threads(4)
        .enable_time()
        .build()
        .expect("tokio runtime");

    let events: Arc<Mutex<Vec<Observation>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let issued = Arc::new(Mutex::new(Vec::new()));
    let tokens = Arc::clone(&issued);
    let command = AsyncCommand::cancellable_builder(move |(), token: CancellationToken| {
        tokens.lock().unwrap().push(token.clone());
        async move {
            token.cancelled().await;
            Err::<(), BoxError>("canceled".into())
        }
    })
    .named("race")
    .observer(Arc::new(move |observation: &Observation| {
        sink.lock().unwrap().push(observation.clone());
    }))
    .build();

    let barrier = Arc::new(Barrier::new(CALLERS));
    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let runtime = rt.handle().clone();
            let command = command.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _entered = runtime.enter();
                barrier.wait();
                command.execute_async(())
            })
        })
        .collect();
    let handles: Vec<_> = callers
        .into_iter()
        .map(|caller| caller.join().expect("caller thread"))
        .collect();

    let current = command.execution_task().expect("current operation");
    assert!(handles.iter().any(|handle| handle.id() == current.id()));
    assert!(command.is_running());

    {
        let tokens = issued.lock().unwrap();
        assert_eq!(tokens.len(), CALLERS);
        let live = tokens.iter().filter(|token| !token.is_cancelled()).count();
        assert_eq!(live, 1, "only the stored operation keeps a live token");
    }

    let started: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|observation| match observation {
            Observation::ExecutionChanged { operation, .. } => Some(*operation),
            _ => None,
        })
        .collect();
    assert_eq!(started.len(), CALLERS);
    assert_eq!(started.last(), Some(&current.id()));

    command.cancel();
    rt.block_on(async {
        for handle in &handles {
            assert!(matches!(handle.wait().await, OperationStatus::Canceled));
        }
        // The last completion continuation may still be publishing.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let settled = events.lock().unwrap().iter().rev().find_map(|observation| {
                    match observation {
                        Observation::PropertyChanged {
                            property: Property::IsRunning,
                            value,
                            ..
                        } => Some(*value),
                        _ => None,
                    }
                });
                if settled == Some(false) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("final IsRunning=false published");
    });

    assert!(!command.is_running());
    let changes: Vec<(Property, bool)> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|observation| match observation {
            Observation::PropertyChanged {
                property, value, ..
            } => Some((*property, *value)),
            _ => None,
        })
        .collect();
    assert_alternating(&changes, Property::IsRunning);
    assert_alternating(&changes, Property::CanBeCanceled);
    assert_alternating(&changes, Property::IsCancellationRequested);
    assert_eq!(
        changes
            .iter()
            .rev()
            .find(|(property, _)| *property == Property::IsRunning),
        Some(&(Property::IsRunning, false))
    );
}
