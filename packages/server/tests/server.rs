use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use http::StatusCode;
use serde_json::{json, Value};
use thingworks_blob::{Blob, BlobId};
use thingworks_invocation::{
    cancellable_sleep, get_invocation_logger, ActionError, ActionOutput, InvocationFilter,
    InvocationId, InvocationState,
};
use thingworks_portal::BlockingPortal;
use thingworks_server::{
    init_logging, ActionContext, ActionDescription, Error, OutputModel, ServerConfig, Thing,
    ThingServer,
};

#[derive(Default)]
struct Flags {
    set_up: AtomicBool,
    torn_down: AtomicBool,
}

struct Stage {
    position: Mutex<i64>,
    flags: Arc<Flags>,
}

impl Stage {
    fn new(flags: Arc<Flags>) -> Self {
        Self {
            position: Mutex::new(0),
            flags,
        }
    }

    fn move_by(&self, input: Value) -> Result<ActionOutput, ActionError> {
        let steps = input["steps"]
            .as_i64()
            .ok_or_else(|| ActionError::failed("steps must be an integer"))?;
        let log = get_invocation_logger();
        for step in 0..steps {
            log.info(format!("step {}", step));
            cancellable_sleep(Duration::from_millis(20))?;
            *self.position.lock().unwrap() += 1;
        }
        tracing::info!("move finished");
        ActionOutput::value(*self.position.lock().unwrap())
    }

    fn export(&self) -> Result<ActionOutput, ActionError> {
        let directory = tempfile::tempdir()?;
        std::fs::write(directory.path().join("position.csv"), "position\n42\n")?;
        Ok(Blob::from_temporary_directory(directory, "position.csv", "text/csv")?.into())
    }
}

impl Thing for Stage {
    fn name(&self) -> &str {
        "stage"
    }

    fn actions(&self) -> Vec<ActionDescription> {
        vec![
            ActionDescription::new("move").with_description("Move by a number of steps"),
            ActionDescription::new("snap").with_blob_expiry(Duration::from_secs(60)),
            ActionDescription::new("export"),
            ActionDescription::new("fail"),
            ActionDescription::new("home"),
            ActionDescription::new("settle"),
        ]
    }

    fn invoke(
        &self,
        action: &str,
        input: Value,
        context: &ActionContext,
    ) -> Result<ActionOutput, ActionError> {
        match action {
            "move" => self.move_by(input),
            "snap" => Ok(Blob::from_bytes(vec![0xffu8, 0xd8, 0xff], "image/jpeg").into()),
            "export" => self.export(),
            "fail" => Err(ActionError::failed("boom")),
            "home" => {
                *self.position.lock().unwrap() = 0;
                Ok(ActionOutput::None)
            }
            "settle" => {
                let waited = context
                    .portal()
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        "settled"
                    })
                    .map_err(ActionError::failed)?;
                Ok(json!(waited).into())
            }
            other => Err(ActionError::failed(format!("unknown action {}", other))),
        }
    }

    fn setup(&self, _portal: &BlockingPortal) -> Result<(), ActionError> {
        self.flags.set_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn teardown(&self) -> Result<(), ActionError> {
        self.flags.torn_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Broken;

impl Thing for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn actions(&self) -> Vec<ActionDescription> {
        Vec::new()
    }

    fn invoke(&self, _: &str, _: Value, _: &ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::None)
    }

    fn setup(&self, _portal: &BlockingPortal) -> Result<(), ActionError> {
        Err(ActionError::failed("serial port missing"))
    }
}

fn running_server(config: ServerConfig) -> (ThingServer, Arc<Flags>) {
    let flags = Arc::new(Flags::default());
    let mut server = ThingServer::new(config);
    server.add_thing(Stage::new(flags.clone())).unwrap();
    server.start().unwrap();
    (server, flags)
}

fn wait_for(server: &ThingServer, id: InvocationId) -> InvocationState {
    server
        .manager()
        .invocation(id)
        .unwrap()
        .wait(Duration::from_secs(10))
}

#[test]
fn test_setup_and_teardown() {
    let (mut server, flags) = running_server(ServerConfig::default());
    assert!(flags.set_up.load(Ordering::SeqCst));
    assert!(!flags.torn_down.load(Ordering::SeqCst));

    server.shutdown().unwrap();
    assert!(flags.torn_down.load(Ordering::SeqCst));
}

#[test]
fn test_failed_setup_rolls_back() {
    let flags = Arc::new(Flags::default());
    let mut server = ThingServer::new(ServerConfig::default());
    // Things are set up in name order: "broken" before "stage".
    server.add_thing(Stage::new(flags.clone())).unwrap();
    server.add_thing(Broken).unwrap();

    let error = server.start().unwrap_err();
    assert!(matches!(&error, Error::Setup { thing, .. } if thing == "broken"));
    assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!server.is_running());
    assert!(!flags.set_up.load(Ordering::SeqCst));
}

#[test]
fn test_invoke_and_poll() {
    init_logging("info");
    let (server, _) = running_server(ServerConfig::default());

    let id = server
        .invoke_action("stage", "move", json!({"steps": 3}))
        .unwrap();
    let first = server.invocation(id).unwrap();
    assert_eq!(first.href, format!("/action_invocations/{}", id));
    assert_eq!(first.action, "/stage/move");

    assert_eq!(wait_for(&server, id), InvocationState::Completed);
    let done = server.invocation(id).unwrap();
    assert_eq!(done.status, InvocationState::Completed);
    assert!(matches!(&done.output, Some(OutputModel::Value(v)) if *v == json!(3)));

    let messages: Vec<_> = done.log.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(&messages[..3], &["step 0", "step 1", "step 2"]);
    // Plain tracing events are captured too, unless RUST_LOG filters them.
    if std::env::var_os("RUST_LOG").is_none() {
        assert!(messages.contains(&"move finished"));
    }

    let listed = server.invocations(&InvocationFilter::thing("stage").with_action("move"));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[test]
fn test_unknown_thing_and_action() {
    let (server, _) = running_server(ServerConfig::default());

    let error = server.invoke_action("laser", "fire", Value::Null).unwrap_err();
    assert!(matches!(error, Error::ThingNotFound(_)));
    assert_eq!(error.status_code(), StatusCode::NOT_FOUND);

    let error = server.invoke_action("stage", "dance", Value::Null).unwrap_err();
    assert!(matches!(error, Error::ActionNotFound { .. }));
    assert_eq!(error.status_code(), StatusCode::NOT_FOUND);

    let error = server.invocation(InvocationId::new()).unwrap_err();
    assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
}

#[test]
fn test_delete_cancels_then_removes() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server
        .invoke_action("stage", "move", json!({"steps": 500}))
        .unwrap();

    let error = server.invocation_output(id).unwrap_err();
    assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let started = Instant::now();
    server.delete_or_cancel(id).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    let model = server.invocation(id).unwrap();
    assert_eq!(model.status, InvocationState::Cancelled);
    assert!(model.output.is_none());

    // A second cancel is refused, deletion then forgets it.
    let error = server.cancel_invocation(id).unwrap_err();
    assert_eq!(error.status_code(), StatusCode::CONFLICT);
    assert_eq!(
        server.delete_or_cancel(id).unwrap(),
        InvocationState::Cancelled
    );
    assert_eq!(
        server.invocation(id).unwrap_err().status_code(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_delete_of_finished_invocation_removes_it() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "home", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);

    assert_eq!(
        server.delete_or_cancel(id).unwrap(),
        InvocationState::Completed
    );
    assert!(matches!(
        server.delete_or_cancel(id),
        Err(Error::Invocation(thingworks_invocation::Error::NotFound(_)))
    ));
}

#[test]
fn test_failed_action_is_reported() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "fail", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Error);

    let model = server.invocation(id).unwrap();
    assert_eq!(model.error.as_ref().unwrap().message, "boom");

    let wire = serde_json::to_value(&model).unwrap();
    assert_eq!(wire["status"], "error");
    assert_eq!(wire["error"]["message"], "boom");

    let error = server.invocation_output(id).unwrap_err();
    assert!(error.to_string().contains("boom"));
}

#[test]
fn test_empty_output_is_unavailable() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "home", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);

    let error = server.invocation_output(id).unwrap_err();
    assert!(matches!(error, Error::NoOutput(_)));
    assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

fn blob_id(output: OutputModel) -> BlobId {
    match output {
        OutputModel::Blob(link) => BlobId::from_href(&link.href).unwrap(),
        other => panic!("expected a blob link, got {:?}", other),
    }
}

#[test]
fn test_blob_download_until_invocation_is_deleted() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "snap", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);

    let output = server.invocation_output(id).unwrap();
    let blob = blob_id(output);
    let (media_type, bytes) = server.read_blob(blob).unwrap();
    assert_eq!(media_type, "image/jpeg");
    assert_eq!(bytes.as_ref(), &[0xff, 0xd8, 0xff]);

    server.delete_invocation(id).unwrap();

    let error = server.read_blob(blob).unwrap_err();
    assert!(matches!(error, Error::Blob(thingworks_blob::Error::Gone(_))));
    assert_eq!(error.status_code(), StatusCode::GONE);
}

#[test]
fn test_unbounded_blob_expiry_from_config() {
    let config =
        ServerConfig::from_json_str(r#"{"blob_expiry_secs": 18446744073709551615}"#).unwrap();
    let (server, _) = running_server(config);
    let id = server.invoke_action("stage", "export", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);

    let model = server.invocation(id).unwrap();
    let blob = blob_id(model.output.unwrap());
    let (_, bytes) = server.read_blob(blob).unwrap();
    assert_eq!(bytes.as_ref(), b"position\n42\n");
    assert_eq!(server.blobs().purge(), 0);
}

#[test]
fn test_file_backed_blob_output() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "export", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);

    let model = server.invocation(id).unwrap();
    let blob = blob_id(model.output.unwrap());
    let (media_type, bytes) = server.read_blob(blob).unwrap();
    assert_eq!(media_type, "text/csv");
    assert_eq!(bytes.as_ref(), b"position\n42\n");
}

#[test]
fn test_action_reaches_event_loop_through_portal() {
    let (server, _) = running_server(ServerConfig::default());
    let id = server.invoke_action("stage", "settle", Value::Null).unwrap();
    assert_eq!(wait_for(&server, id), InvocationState::Completed);
    assert_eq!(
        server.output(id).unwrap().as_value(),
        Some(&json!("settled"))
    );
}

#[test]
fn test_background_eviction() {
    let config = ServerConfig {
        retention_secs: 0,
        eviction_interval_secs: 1,
        ..ServerConfig::default()
    };
    let (server, _) = running_server(config);
    server.invoke_action("stage", "home", Value::Null).unwrap();

    // `len` does not evict by itself, so only the background task can.
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.manager().len() > 0 {
        assert!(Instant::now() < deadline, "finished invocation was never evicted");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_servers_are_independent() {
    let (first, _) = running_server(ServerConfig {
        event_loop_name: "first-loop".to_string(),
        ..ServerConfig::default()
    });
    let (second, _) = running_server(ServerConfig {
        event_loop_name: "second-loop".to_string(),
        ..ServerConfig::default()
    });

    assert!(!first.portal().unwrap().same_loop(&second.portal().unwrap()));

    let id = first.invoke_action("stage", "home", Value::Null).unwrap();
    assert!(second.invocation(id).is_err());
    assert!(second.manager().is_empty());
}
