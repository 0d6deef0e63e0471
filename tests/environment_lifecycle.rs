mod common;

use std::sync::Arc;

use common::{records, runtime, text, write_resource};
use kestrel_resources::context::{self, ContextGuard};
use kestrel_resources::{
    EnvironmentState, ExportHandle, InitHandler, ScriptEnvironment, ScriptError, ScriptResult,
    ScriptValue,
};
use parking_lot::Mutex;
use tempfile::tempdir;

#[test]
fn create_runs_bootstrap_chunks_once() {
    runtime();
    let root = tempdir().unwrap();
    let env = ScriptEnvironment::new(Arc::new(write_resource(root.path(), "boot", &[])));
    assert_eq!(env.state(), EnvironmentState::Uninitialized);

    assert!(env.create());
    assert_eq!(env.state(), EnvironmentState::Created);
    assert_eq!(env.loaded_chunk_count(), runtime().bootstrap_chunks().len());
    assert!(runtime().environment(env.instance_id()).is_some());

    assert!(!env.create(), "second create must be rejected");
    assert_eq!(env.loaded_chunk_count(), runtime().bootstrap_chunks().len());
    assert!(context::current().is_none());
}

#[test]
fn instance_ids_are_unique() {
    runtime();
    let root = tempdir().unwrap();
    let resource = Arc::new(write_resource(root.path(), "ids", &[]));
    let a = ScriptEnvironment::new(resource.clone());
    let b = ScriptEnvironment::new(resource);
    assert_ne!(a.instance_id(), b.instance_id());
}

#[test]
fn init_file_declares_and_runs_server_scripts() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "manifest",
        &[
            ("__resource.rhai", r#"description("test"); server_scripts(["one.rhai", "two.rhai"]);"#),
            ("one.rhai", r#"Record("lifecycle.manifest", "one");"#),
            ("two.rhai", r#"Record("lifecycle.manifest", GetCurrentResourceName());"#),
        ],
    );
    let env = ScriptEnvironment::new(Arc::new(resource));
    assert!(env.create());
    assert!(env.do_init_file(false));

    assert_eq!(records("lifecycle.manifest"), vec![text("one"), text("manifest")]);
    assert_eq!(env.loaded_chunk_count(), runtime().bootstrap_chunks().len() + 2);
    assert!(env.queued_server_scripts().is_empty());
}

#[test]
fn pre_parse_passes_flag_and_skips_scripts() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "preparse",
        &[
            ("__resource.rhai", r#"server_script("main.rhai"); Record("lifecycle.preparse.init", true);"#),
            ("main.rhai", r#"Record("lifecycle.preparse.main", true);"#),
        ],
    );
    let env = ScriptEnvironment::new(Arc::new(resource));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_handler = seen.clone();
    let handler: InitHandler = Arc::new(move |run_init: &mut dyn FnMut() -> ScriptResult<()>, pre_parse: bool| {
        seen_by_handler.lock().push(pre_parse);
        run_init()
    });
    env.set_init_handler(handler);

    assert!(env.create());
    assert!(env.do_init_file(true));
    assert_eq!(*seen.lock(), vec![true]);
    assert_eq!(records("lifecycle.preparse.init").len(), 1);
    assert!(records("lifecycle.preparse.main").is_empty());
    assert_eq!(env.queued_server_scripts(), vec!["main.rhai".to_string()]);

    assert!(env.do_init_file(false));
    assert_eq!(*seen.lock(), vec![true, false]);
    assert_eq!(records("lifecycle.preparse.main").len(), 1, "re-declared scripts are queued once");
}

#[test]
fn init_handler_may_skip_the_init_chunk() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "skipped",
        &[("__resource.rhai", r#"Record("lifecycle.skipped", true);"#)],
    );
    let env = ScriptEnvironment::new(Arc::new(resource));
    let handler: InitHandler = Arc::new(|_run_init: &mut dyn FnMut() -> ScriptResult<()>, _pre_parse: bool| Ok(()));
    env.set_init_handler(handler);
    assert!(env.create());
    assert!(env.do_init_file(false));
    assert!(records("lifecycle.skipped").is_empty());
}

#[test]
fn missing_init_file_reports_failure() {
    runtime();
    let root = tempdir().unwrap();
    let env = ScriptEnvironment::new(Arc::new(write_resource(root.path(), "no_init", &[])));
    assert!(env.create());
    assert!(!env.do_init_file(false));
    assert!(context::current().is_none());
}

#[test]
fn load_scripts_stops_at_first_failure() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "partial",
        &[
            ("good.rhai", r#"Record("lifecycle.partial", "good");"#),
            ("bad.rhai", r#"throw "boom";"#),
            ("never.rhai", r#"Record("lifecycle.partial", "never");"#),
        ],
    )
    .with_server_scripts(["good.rhai", "bad.rhai", "never.rhai"]);
    let env = ScriptEnvironment::new(Arc::new(resource));
    assert!(env.create());

    assert!(!env.load_scripts());
    assert_eq!(records("lifecycle.partial"), vec![text("good")]);
    assert_eq!(env.loaded_chunk_count(), runtime().bootstrap_chunks().len() + 1);
    assert_eq!(env.state(), EnvironmentState::Created);
}

#[test]
fn load_scripts_marks_environment_loaded() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "loaded",
        &[("main.rhai", r#"let total = 0; for i in 1..=4 { total += i; } Record("lifecycle.loaded", total);"#)],
    )
    .with_server_scripts(["main.rhai"]);
    let env = ScriptEnvironment::new(Arc::new(resource));
    assert!(env.create());
    assert!(env.load_scripts());
    assert_eq!(env.state(), EnvironmentState::Loaded);
    assert_eq!(records("lifecycle.loaded").first().and_then(|value| value.as_int()), Some(10));
}

#[test]
fn functions_persist_across_chunks() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "library",
        &[
            ("lib.rhai", "fn double(x) { x * 2 }"),
            ("use.rhai", r#"Record("lifecycle.library", double(21));"#),
        ],
    )
    .with_server_scripts(["lib.rhai", "use.rhai"]);
    let env = ScriptEnvironment::new(Arc::new(resource));
    assert!(env.create());
    assert!(env.load_scripts());
    assert_eq!(records("lifecycle.library").first().and_then(|value| value.as_int()), Some(42));
}

#[test]
fn dispose_releases_everything() {
    runtime();
    let root = tempdir().unwrap();
    let resource = write_resource(
        root.path(),
        "disposed",
        &[(
            "main.rhai",
            r#"
                AddEventHandler("lifecycle:dispose", |ctx| ());
                SetTimeout(60000, |ctx| ());
                Record("lifecycle.dispose.ref", GetFunctionReference(|ctx| 1));
            "#,
        )],
    )
    .with_server_scripts(["main.rhai"]);
    let env = ScriptEnvironment::new(Arc::new(resource));
    assert!(env.create());
    assert!(env.load_scripts());
    let handle = records("lifecycle.dispose.ref")
        .first()
        .and_then(ScriptValue::as_int)
        .and_then(ExportHandle::from_script)
        .expect("reference recorded");
    assert!(env.has_ref(handle));
    assert_eq!(env.event_handler_count("lifecycle:dispose"), 1);
    assert_eq!(env.pending_timers(), 1);

    env.dispose().expect("dispose succeeds");
    assert_eq!(env.state(), EnvironmentState::Disposed);
    assert_eq!(env.loaded_chunk_count(), 0);
    assert_eq!(env.event_handler_count("lifecycle:dispose"), 0);
    assert_eq!(env.pending_timers(), 0);
    assert!(!env.has_ref(handle));
    assert!(runtime().environment(env.instance_id()).is_none());
    assert!(matches!(env.call_ref(handle, &[]), Err(ScriptError::HandleNotFound(_))));

    env.dispose().expect("second dispose is a no-op");
}

#[test]
fn dispose_refuses_the_current_environment() {
    runtime();
    let root = tempdir().unwrap();
    let env = ScriptEnvironment::new(Arc::new(write_resource(root.path(), "busy", &[])));
    assert!(env.create());
    {
        let _guard = ContextGuard::enter(&env);
        assert!(matches!(env.dispose(), Err(ScriptError::InvalidState(_))));
    }
    assert_eq!(env.state(), EnvironmentState::Created);
    env.dispose().expect("dispose once no longer current");
}
