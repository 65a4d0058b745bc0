use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use thingworks_invocation::{
    cancellable_sleep, current_invocation_id, get_invocation_logger, ActionError, ActionManager,
    ActionOutput, ActionRequest, Error, InvocationFilter, InvocationState,
};

const LONG: Duration = Duration::from_secs(10);

#[test]
fn test_invocations_run_in_parallel_with_isolated_logs() {
    let manager = ActionManager::default();
    let nap = Duration::from_millis(300);

    let started = Instant::now();
    let ids: Vec<_> = (0..8)
        .map(|n| {
            manager
                .dispatch(
                    ActionRequest::new("sensor", "sample").with_input(json!(n)),
                    move |input| {
                        let log = get_invocation_logger();
                        log.info(format!("worker {} start", input));
                        cancellable_sleep(nap)?;
                        log.info(format!("worker {} done", input));
                        Ok(json!(current_invocation_id()?.to_string()).into())
                    },
                )
                .unwrap()
        })
        .collect();

    for id in &ids {
        assert_eq!(
            manager.invocation(*id).unwrap().wait(LONG),
            InvocationState::Completed
        );
    }
    // Eight sequential naps would take 2.4 s.
    assert!(started.elapsed() < Duration::from_millis(1500));

    for (n, id) in ids.iter().enumerate() {
        let snapshot = manager.get(*id).unwrap();
        let messages: Vec<_> = snapshot.log.iter().map(|r| r.message.clone()).collect();
        assert_eq!(
            messages,
            vec![format!("worker {} start", n), format!("worker {} done", n)]
        );
        // Each worker saw its own id as the ambient context.
        let output = snapshot.output.unwrap();
        assert_eq!(output.as_value(), Some(&json!(id.to_string())));
    }
}

#[test]
fn test_cancel_long_sleep() {
    let manager = ActionManager::default();
    let started = Instant::now();
    let id = manager
        .dispatch(ActionRequest::new("stage", "scan"), |_| {
            cancellable_sleep(Duration::from_secs(10))?;
            Ok(ActionOutput::None)
        })
        .unwrap();

    manager.cancel(id).unwrap();
    let invocation = manager.invocation(id).unwrap();
    assert_eq!(invocation.wait(LONG), InvocationState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(invocation.result(), Err(Error::Cancelled(_))));

    // Still fully inspectable.
    let snapshot = manager.get(id).unwrap();
    assert!(snapshot.status.ended_at.is_some());
    assert!(!snapshot.log.is_empty());
}

#[test]
fn test_cancel_is_idempotent() {
    let manager = ActionManager::default();
    let id = manager
        .dispatch(ActionRequest::new("stage", "scan"), |_| {
            cancellable_sleep(Duration::from_secs(10))?;
            Ok(ActionOutput::None)
        })
        .unwrap();

    manager.cancel(id).unwrap();
    let invocation = manager.invocation(id).unwrap();
    invocation.request_cancel();
    invocation.request_cancel();
    assert_eq!(invocation.wait(LONG), InvocationState::Cancelled);

    let cancelled_lines = invocation
        .logs()
        .iter()
        .filter(|r| r.message.ends_with("was cancelled."))
        .count();
    assert_eq!(cancelled_lines, 1);

    // Cancelling a finished invocation is refused and changes nothing.
    assert!(matches!(manager.cancel(id), Err(Error::InvalidState { .. })));
    assert_eq!(invocation.state(), InvocationState::Cancelled);
}

#[test]
fn test_error_is_contained() {
    let manager = ActionManager::default();
    let id = manager
        .dispatch(ActionRequest::new("pump", "prime"), |_| {
            Err(ActionError::failed("boom"))
        })
        .unwrap();

    let invocation = manager.invocation(id).unwrap();
    assert_eq!(invocation.wait(LONG), InvocationState::Error);
    match invocation.result() {
        Err(error @ Error::ActionFailed { .. }) => assert!(error.to_string().contains("boom")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // The manager keeps working after a failed action.
    let next = manager
        .dispatch(ActionRequest::new("pump", "prime"), |_| Ok(json!("ok").into()))
        .unwrap();
    assert_eq!(
        manager.invocation(next).unwrap().wait(LONG),
        InvocationState::Completed
    );
    assert_eq!(manager.list(&InvocationFilter::thing("pump")).len(), 2);
}

#[test]
fn test_logs_are_prefix_consistent_while_running() {
    let manager = ActionManager::default();
    let id = manager
        .dispatch(ActionRequest::new("camera", "stream"), |_| {
            let log = get_invocation_logger();
            for n in 0..50 {
                log.info(format!("frame {}", n));
                cancellable_sleep(Duration::from_millis(2))?;
            }
            Ok(ActionOutput::None)
        })
        .unwrap();

    let invocation = manager.invocation(id).unwrap();
    let mut previous: Vec<String> = Vec::new();
    while !invocation.is_terminal() {
        let current: Vec<String> = invocation.logs().into_iter().map(|r| r.message).collect();
        assert!(current.len() >= previous.len());
        assert_eq!(&current[..previous.len()], &previous[..]);
        previous = current;
        thread::sleep(Duration::from_millis(3));
    }

    let finished: Vec<String> = invocation.logs().into_iter().map(|r| r.message).collect();
    assert_eq!(finished.len(), 50);
    assert_eq!(&finished[..previous.len()], &previous[..]);
    assert_eq!(finished[49], "frame 49");
}

#[test]
fn test_states_only_move_forward() {
    let manager = ActionManager::default();
    let id = manager
        .dispatch(ActionRequest::new("furnace", "ramp"), |_| {
            cancellable_sleep(Duration::from_millis(50))?;
            Ok(ActionOutput::None)
        })
        .unwrap();
    let invocation = manager.invocation(id).unwrap();

    let rank = |state: InvocationState| match state {
        InvocationState::Pending => 0,
        InvocationState::Running => 1,
        _ => 2,
    };
    let mut seen = vec![invocation.state()];
    while !invocation.is_terminal() {
        seen.push(invocation.state());
        thread::yield_now();
    }
    seen.push(invocation.state());

    assert_eq!(seen[0], InvocationState::Running);
    assert!(seen.windows(2).all(|w| rank(w[0]) <= rank(w[1])));
    assert_eq!(*seen.last().unwrap(), InvocationState::Completed);
}
