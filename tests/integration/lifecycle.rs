#[path = "common/mod.rs"]
mod common;

use std::{error::Error, fs, io};

use common::{Console, FakeInstall, is_process_alive};
use hadoop_unit_fixture::{
    FixtureError, FixtureState, HadoopFixture, ServiceName, ShutdownOutcome, properties,
};
use tempfile::tempdir;

#[test]
fn start_waits_for_readiness_and_stop_tears_down() {
    let install = FakeInstall::new(Console::Cooperative);
    let mut fixture = HadoopFixture::launch(install.config()).expect("fixture should start");

    let pid = fixture.pid().expect("child should be tracked");
    assert_eq!(fixture.state(), FixtureState::Running);
    assert!(fixture.is_alive());
    assert!(fixture.is_ready());
    assert!(install.pid_marker().exists());
    assert_eq!(install.spawned_pids(), vec![pid]);
    assert_eq!(fixture.port_of(ServiceName::Hdfs), Some(install.jmx_port));
    assert!(fixture.uptime().is_some());

    let log = fixture.read_bootlog().unwrap();
    assert!(log.contains("console started"), "boot log: {log}");

    fixture.stop(None).expect("graceful stop");

    assert_eq!(fixture.state(), FixtureState::Stopped);
    assert!(!fixture.is_alive());
    assert!(fixture.pid().is_none());
    assert!(!install.pid_marker().exists());
    assert!(!is_process_alive(pid));
    assert!(matches!(
        fixture.last_shutdown(),
        Some(ShutdownOutcome::Graceful { status: Some(status), .. }) if status.success()
    ));

    let log = fixture.read_bootlog().unwrap();
    assert!(log.contains("stop requested"), "boot log: {log}");
    assert!(log.contains("console stopping on TERM"), "boot log: {log}");
}

#[test]
fn property_overlays_are_written_to_the_installation() {
    let install = FakeInstall::new(Console::Cooperative);
    let mut config = install.config();
    config.enabled_servers = vec!["hdfs".into(), "zookeeper".into()];
    config
        .default_properties
        .insert("hdfs.test.file".into(), "/tmp/overlaid".into());
    config
        .service_properties
        .insert("knox.extra".into(), "yes".into());

    let mut fixture = HadoopFixture::launch(config).expect("fixture should start");

    let defaults = properties::load(&install.default_properties_file()).unwrap();
    assert_eq!(defaults.get("hdfs.test.file"), Some("/tmp/overlaid"));
    assert_eq!(
        defaults.get("hdfs.namenode.http.port"),
        Some(install.jmx_port.to_string().as_str())
    );
    // Untouched keys survive in their original order.
    let keys: Vec<&str> = defaults.iter().map(|(key, _)| key).collect();
    assert_eq!(
        &keys[..4],
        [
            "hdfs.namenode.http.port",
            "hdfs.namenode.port",
            "hdfs.test.file",
            "zookeeper.host"
        ]
    );

    let services = properties::load(&install.services_properties_file()).unwrap();
    assert_eq!(services.get("hdfs"), Some("true"));
    assert_eq!(services.get("zookeeper"), Some("true"));
    assert_eq!(services.get("kafka"), Some("false"));
    assert_eq!(services.get("yarn"), Some("false"));
    assert_eq!(services.get("knox.extra"), Some("yes"));
    assert_eq!(&services, fixture.service_properties());

    fixture.stop(None).unwrap();
}

#[test]
fn start_twice_spawns_once() {
    let install = FakeInstall::new(Console::Cooperative);
    let mut fixture = HadoopFixture::launch(install.config()).unwrap();
    let pid = fixture.pid();

    fixture.start().expect("second start is a no-op");

    assert_eq!(fixture.pid(), pid);
    assert_eq!(install.spawned_pids().len(), 1);

    fixture.stop(None).unwrap();
}

#[test]
fn stopped_fixture_can_start_again() {
    let install = FakeInstall::new(Console::Cooperative);
    let mut fixture = HadoopFixture::launch(install.config()).unwrap();
    fixture.stop(None).unwrap();

    fixture.start().expect("restart after stop");
    assert_eq!(fixture.state(), FixtureState::Running);
    assert_eq!(install.spawned_pids().len(), 2);

    fixture.stop(None).unwrap();
    assert!(!install.pid_marker().exists());
}

#[test]
fn stale_pid_marker_refuses_to_start() {
    let install = FakeInstall::new(Console::Cooperative);
    fs::write(install.pid_marker(), "999999").unwrap();

    let mut fixture = HadoopFixture::new(install.config()).unwrap();
    let err = fixture.start().unwrap_err();

    assert!(matches!(err, FixtureError::StaleRun { .. }), "got {err:?}");
    assert!(err.to_string().contains("already running"));
    assert!(install.spawned_pids().is_empty());
    assert!(!fixture.is_alive());
}

#[test]
fn non_executable_launcher_is_a_launch_error() {
    let install = FakeInstall::new(Console::Cooperative);
    install.break_launcher();

    let mut fixture = HadoopFixture::new(install.config()).unwrap();
    assert_eq!(fixture.launcher(), Some(install.launcher().as_path()));

    let err = fixture.start().unwrap_err();
    match &err {
        FixtureError::Launch { source, .. } => {
            assert_eq!(source.kind(), io::ErrorKind::PermissionDenied)
        }
        other => panic!("expected launch error, got {other:?}"),
    }
    assert!(!fixture.is_alive());
    assert_eq!(fixture.state(), FixtureState::Stopped);
}

#[test]
fn scoped_fixture_is_stopped_on_exit() {
    let install = FakeInstall::new(Console::Cooperative);

    let pid = HadoopFixture::scoped(install.config(), |fixture| {
        assert!(fixture.is_ready());
        fixture.pid().ok_or(FixtureError::Io(io::Error::other("no pid")))
    })
    .expect("scoped run");

    assert!(!is_process_alive(pid));
    assert!(!install.pid_marker().exists());
}

#[test]
fn scoped_body_error_wins_and_server_still_stops() {
    let install = FakeInstall::new(Console::Cooperative);

    let result: Result<(), Box<dyn Error>> = HadoopFixture::scoped(install.config(), |_| {
        Err("assertion in test body failed".into())
    });

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "assertion in test body failed");
    let pids = install.spawned_pids();
    assert_eq!(pids.len(), 1);
    assert!(!is_process_alive(pids[0]));
    assert!(!install.pid_marker().exists());
}

#[test]
fn dropping_a_running_fixture_stops_it() {
    let install = FakeInstall::new(Console::Cooperative);
    let fixture = HadoopFixture::launch(install.config()).unwrap();
    let pid = fixture.pid().unwrap();
    let scratch = fixture.base_dir().to_path_buf();
    assert!(fixture.uses_scratch_dir());

    drop(fixture);

    assert!(!is_process_alive(pid));
    assert!(!install.pid_marker().exists());
    assert!(!scratch.exists());
}

#[test]
fn dropping_a_stubborn_fixture_kills_it_without_panicking() {
    let install = FakeInstall::new(Console::Stubborn);
    let mut config = install.config();
    config.stop_timeout = std::time::Duration::from_secs(1);
    let fixture = HadoopFixture::launch(config).unwrap();
    let pid = fixture.pid().unwrap();
    let scratch = fixture.base_dir().to_path_buf();

    let dropped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| drop(fixture)));

    assert!(dropped.is_ok(), "drop panicked after a failed stop");
    assert!(!is_process_alive(pid));
    assert!(!scratch.exists());
}

#[test]
fn configured_base_dir_keeps_boot_log() {
    let install = FakeInstall::new(Console::Cooperative);
    let work = tempdir().unwrap();
    let mut config = install.config();
    config.base_dir = Some(work.path().join("run"));

    let bootlog = {
        let mut fixture = HadoopFixture::launch(config).unwrap();
        assert!(!fixture.uses_scratch_dir());
        fixture.stop(None).unwrap();
        fixture.bootlog_path().to_path_buf()
    };

    assert_eq!(bootlog, work.path().join("run").join("itest.log"));
    let content = fs::read_to_string(bootlog).unwrap();
    assert!(content.contains("console started"));
}
