#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    fs,
    io::{Read, Write},
    net::{Ipv4Addr, TcpListener},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use hadoop_unit_fixture::FixtureConfig;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tempfile::{TempDir, tempdir};

/// How the fake `hadoop-unit-standalone` behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Console {
    /// Shuts down on TERM or INT and removes its PID marker.
    Cooperative,
    /// Ignores signals; only the `stop` verb brings it down.
    StopVerbOnly,
    /// Ignores signals and the `stop` verb.
    Stubborn,
    /// Exits with status 3 before writing the PID marker.
    ExitEarly,
    /// Keeps running but never writes the PID marker, so the JMX stub
    /// never reports an active NameNode.
    NeverReady,
    /// Starts a background worker that ignores TERM and INT. The console
    /// itself exits on TERM but leaves the PID marker behind.
    LingeringWorker,
    /// Ignores signals; the `stop` verb hangs and ignores TERM and INT too.
    HangingStop,
}

const COOPERATIVE_CONSOLE: &str = r#"
    trap 'echo "console stopping on TERM"; rm -f "$PID_FILE"; exit 0' TERM
    trap 'echo "console stopping on INT"; rm -f "$PID_FILE"; exit 0' INT
    echo "$$" > "$PID_FILE"
    echo "console started"
    while true; do sleep 1 & wait $!; done"#;

const IGNORING_CONSOLE: &str = r#"
    trap '' TERM INT
    echo "$$" > "$PID_FILE"
    echo "console started"
    while true; do sleep 1 & wait $!; done"#;

const FAILING_CONSOLE: &str = r#"
    echo "fatal: namenode format failed" >&2
    exit 3"#;

const BOOTING_CONSOLE: &str = r#"
    trap 'echo "console stopping on TERM"; exit 0' TERM INT
    echo "console booting"
    while true; do sleep 1 & wait $!; done"#;

const LINGERING_CONSOLE: &str = r#"
    trap 'echo "console stopping on TERM"; exit 0' TERM INT
    sh -c 'trap "" TERM INT; echo $$ > "$0"; while true; do sleep 1; done' "$ROOT/worker" &
    echo "$$" > "$PID_FILE"
    echo "console started"
    while true; do sleep 1 & wait $!; done"#;

const HANGING_STOP: &str = r#"
    echo "$$" > "$ROOT/stop-helper"
    trap '' TERM INT
    while true; do sleep 1; done"#;

const KILLING_STOP: &str = r#"
    if [ -f "$PID_FILE" ]; then
        TARGET="$(cat "$PID_FILE")"
        rm -f "$PID_FILE"
        kill -9 "$TARGET" 2>/dev/null
    fi"#;

const DEFAULT_PROPERTIES: &str = "\
# fake hadoop-unit defaults
hdfs.namenode.http.port=50070
hdfs.namenode.port=20112
hdfs.test.file=/tmp/original
zookeeper.host=127.0.0.1
";

const SERVICES_PROPERTIES: &str = "\
hdfs=false
zookeeper=false
kafka=false
";

fn launcher_script(console: Console) -> String {
    let (console_body, stop_body) = match console {
        Console::Cooperative => (COOPERATIVE_CONSOLE, "    :"),
        Console::StopVerbOnly => (IGNORING_CONSOLE, KILLING_STOP),
        Console::Stubborn => (IGNORING_CONSOLE, "    :"),
        Console::ExitEarly => (FAILING_CONSOLE, "    :"),
        Console::NeverReady => (BOOTING_CONSOLE, "    :"),
        Console::LingeringWorker => (LINGERING_CONSOLE, "    :"),
        Console::HangingStop => (IGNORING_CONSOLE, HANGING_STOP),
    };

    format!(
        r#"#!/bin/sh
ROOT="$(cd "$(dirname "$0")/.." && pwd)"
PID_FILE="$ROOT/logs/hadoop-unit-standalone.pid"

case "$1" in
  console)
    echo "$$" >> "$ROOT/spawns"
{console_body}
    ;;
  stop)
    echo "stop requested"
{stop_body}
    ;;
  *)
    echo "unknown verb $1" >&2
    exit 1
    ;;
esac
"#
    )
}

/// Throwaway hadoop-unit installation driven by a shell script, plus a JMX
/// stub that reports an active NameNode while the PID marker exists.
pub struct FakeInstall {
    dir: TempDir,
    pub jmx_port: u16,
}

impl FakeInstall {
    pub fn new(console: Console) -> Self {
        Self::with_defaults(console, DEFAULT_PROPERTIES)
    }

    pub fn with_defaults(console: Console, defaults: &str) -> Self {
        let dir = tempdir().expect("failed to create tempdir");
        let root = dir.path();

        for sub in ["bin", "conf", "logs"] {
            fs::create_dir_all(root.join(sub)).expect("failed to create install dir");
        }
        fs::write(
            root.join("conf").join("hadoop-unit-default.properties"),
            defaults,
        )
        .expect("failed to write default properties");
        fs::write(root.join("conf").join("hadoop.properties"), SERVICES_PROPERTIES)
            .expect("failed to write service properties");

        let launcher = root.join("bin").join("hadoop-unit-standalone");
        fs::write(&launcher, launcher_script(console)).expect("failed to write launcher");
        fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755))
            .expect("failed to chmod launcher");

        let jmx_port = serve_jmx(root.join("logs").join("hadoop-unit-standalone.pid"));

        Self { dir, jmx_port }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn launcher(&self) -> PathBuf {
        self.root().join("bin").join("hadoop-unit-standalone")
    }

    pub fn pid_marker(&self) -> PathBuf {
        self.root().join("logs").join("hadoop-unit-standalone.pid")
    }

    pub fn default_properties_file(&self) -> PathBuf {
        self.root().join("conf").join("hadoop-unit-default.properties")
    }

    pub fn services_properties_file(&self) -> PathBuf {
        self.root().join("conf").join("hadoop.properties")
    }

    /// PIDs of every console the launcher has started, in order.
    pub fn spawned_pids(&self) -> Vec<u32> {
        fs::read_to_string(self.root().join("spawns"))
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// PID the fake installation wrote to `name` under its root, waiting up
    /// to five seconds for the file to appear.
    pub fn recorded_pid(&self, name: &str) -> u32 {
        let path = self.root().join(name);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(pid) = fs::read_to_string(&path)
                .ok()
                .and_then(|content| content.trim().parse().ok())
            {
                return pid;
            }
            assert!(Instant::now() < deadline, "{} was never written", path.display());
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Leaves the launcher in place but removes its execute bit.
    pub fn break_launcher(&self) {
        fs::set_permissions(self.launcher(), fs::Permissions::from_mode(0o644))
            .expect("failed to chmod launcher");
    }

    /// Fixture configuration pointing at this installation with short timeouts.
    pub fn config(&self) -> FixtureConfig {
        FixtureConfig {
            name: "itest".into(),
            hadoop_unit_path: self.root().to_path_buf(),
            boot_timeout: Duration::from_secs(20),
            stop_timeout: Duration::from_secs(10),
            default_properties: BTreeMap::from([(
                "hdfs.namenode.http.port".to_string(),
                self.jmx_port.to_string(),
            )]),
            ..Default::default()
        }
    }

    /// Writes a YAML configuration equivalent to [`config`](Self::config).
    pub fn write_config_yaml(&self, path: &Path, base_dir: Option<&Path>) {
        let mut yaml = format!(
            "name: itest\nhadoop_unit_path: {}\nboot_timeout: 20s\nstop_timeout: 10s\n\
             enabled_servers: [hdfs]\ndefault_properties:\n  hdfs.namenode.http.port: \"{}\"\n",
            self.root().display(),
            self.jmx_port
        );
        if let Some(dir) = base_dir {
            yaml.push_str(&format!("base_dir: {}\n", dir.display()));
        }
        fs::write(path, yaml).expect("failed to write config");
    }
}

/// Serves NameNode JMX responses on an ephemeral loopback port. The state is
/// active while `marker` exists and standby otherwise.
pub fn serve_jmx(marker: PathBuf) -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("failed to bind JMX stub");
    let port = listener.local_addr().expect("no local addr").port();

    thread::spawn(move || {
        for mut stream in listener.incoming().map_while(Result::ok) {
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            let state = if marker.exists() { "active" } else { "standby" };
            let body = format!(r#"{{"beans":[{{"State" : "{state}"}}]}}"#);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    port
}

/// A loopback port with nothing bound to it.
pub fn unbound_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("failed to bind");
    listener.local_addr().expect("no local addr").port()
}

/// Zombies count as dead: orphaned workers are reaped by whoever adopted them.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// Polls until `pid` is gone or `timeout` passes; returns whether it exited.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while is_process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(100));
    }
    true
}
