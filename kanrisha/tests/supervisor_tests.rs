//! Supervisor tests against real child processes.
//!
//! Every test that forks holds `FORK_LOCK`: the reaper collects any child
//! of the test process, so tests must not see each other's children.

use ichirou_config::DaemonConfig;
use kanrisha::process;
use kanrisha::reaper::spawn_reaper_task;
use kanrisha::{Error, ExitStatus, Reaper, Supervisor};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

static FORK_LOCK: Mutex<()> = Mutex::new(());

fn fork_lock() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn test_config(dir: &TempDir) -> DaemonConfig {
    let mut config = DaemonConfig::rooted_at(dir.path());
    config.stop_attempts = 5;
    config.stop_interval = Duration::from_millis(50);
    config
}

fn create_test_supervisor() -> (Supervisor, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let supervisor = Supervisor::new(test_config(&temp_dir));
    supervisor.layout().ensure_dirs().unwrap();
    (supervisor, temp_dir)
}

fn create_service(supervisor: &Supervisor, name: &str, script: &str, mode: u32) {
    let dir = supervisor.layout().service_dir(name);
    fs::create_dir_all(&dir).unwrap();

    let run = supervisor.layout().entry_point(name);
    fs::write(&run, format!("#!/bin/sh\n{}\n", script)).unwrap();
    fs::set_permissions(&run, fs::Permissions::from_mode(mode)).unwrap();
}

/// Reap until `pid` shows up.
fn wait_for_exit(pid: u32) -> ExitStatus {
    let reaper = Reaper::new();
    let deadline = Instant::now() + Duration::from_secs(10);

    while Instant::now() < deadline {
        if let Some(status) = reaper.reap().into_iter().find(|s| s.pid == pid) {
            return status;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("process {} did not exit", pid);
}

fn wait_for_log(supervisor: &Supervisor, name: &str, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if supervisor.layout().read_log(name).unwrap().contains(needle) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{:?} never appeared in the log of {}", needle, name);
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "sleeper", "exec sleep 30", 0o755);

        let pid = supervisor.start("sleeper").unwrap();
        assert!(process::is_alive(pid));
        assert_eq!(supervisor.registry().names(), vec!["sleeper".to_string()]);

        let status = supervisor.status("sleeper").unwrap();
        assert_eq!(status.main_pid, Some(pid));

        supervisor.stop("sleeper").await.unwrap();
        assert!(supervisor.registry().is_empty());
        assert!(!process::is_alive(pid));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "sleeper", "exec sleep 30", 0o755);

        let pid = supervisor.start("sleeper").unwrap();
        assert!(matches!(
            supervisor.start("sleeper"),
            Err(Error::AlreadyRunning(_))
        ));
        assert_eq!(supervisor.registry().get("sleeper").unwrap().pid, pid);

        supervisor.stop("sleeper").await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_replaces_process() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "sleeper", "exec sleep 30", 0o755);

        let first = supervisor.start("sleeper").unwrap();
        let second = supervisor.restart("sleeper").await.unwrap();
        assert_ne!(first, second);
        assert!(!process::is_alive(first));

        supervisor.stop("sleeper").await.unwrap();
    }

    #[tokio::test]
    async fn test_stubborn_service_is_killed() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(
            &supervisor,
            "stubborn",
            "trap '' TERM\necho ready\nwhile :; do :; done",
            0o755,
        );

        let pid = supervisor.start("stubborn").unwrap();
        wait_for_log(&supervisor, "stubborn", "ready");

        supervisor.stop("stubborn").await.unwrap();
        assert!(supervisor.registry().is_empty());

        let status = wait_for_exit(pid);
        assert_eq!(status.signal, Some(libc::SIGKILL));
    }

    #[test]
    fn test_reaped_child_is_gone() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "sleeper", "exec sleep 30", 0o755);

        let pid = supervisor.start("sleeper").unwrap();
        process::send_signal(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
        wait_for_exit(pid);

        // Already collected: never signal that pid again
        assert!(!process::is_alive(pid));
    }

    #[tokio::test]
    async fn test_stop_all_reports_every_service() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "a", "exec sleep 30", 0o755);
        create_service(&supervisor, "b", "exec sleep 30", 0o755);
        supervisor.layout().enable("a").unwrap();
        supervisor.layout().enable("b").unwrap();

        let started = supervisor.start_all().unwrap();
        assert_eq!(started.succeeded, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(started.failures(), 0);

        let stopped = supervisor.stop_all().await.unwrap();
        assert_eq!(stopped.succeeded.len(), 2);
        assert!(supervisor.registry().is_empty());
    }
}

mod failures {
    use super::*;

    #[test]
    fn test_missing_entry_point() {
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        fs::create_dir_all(supervisor.layout().service_dir("empty")).unwrap();

        assert!(matches!(supervisor.start("empty"), Err(Error::NotFound(_))));
        assert!(supervisor.registry().is_empty());
    }

    #[test]
    fn test_entry_point_not_executable() {
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "plain", "exit 0", 0o644);

        assert!(matches!(
            supervisor.start("plain"),
            Err(Error::PermissionDenied(_))
        ));
        assert!(supervisor.registry().is_empty());
    }

    #[test]
    fn test_exec_failure_is_reported() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();

        let dir = supervisor.layout().service_dir("broken");
        fs::create_dir_all(&dir).unwrap();
        let run = supervisor.layout().entry_point("broken");
        fs::write(&run, "#!/nonexistent/interpreter\n").unwrap();
        fs::set_permissions(&run, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            supervisor.start("broken"),
            Err(Error::SpawnFailure { .. })
        ));
        assert!(supervisor.registry().is_empty());

        let log = supervisor.layout().read_log("broken").unwrap();
        assert!(log.contains("failed to spawn broken"));
    }

    #[test]
    fn test_start_all_continues_past_failures() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "good", "exec sleep 30", 0o755);
        fs::create_dir_all(supervisor.layout().service_dir("bad")).unwrap();
        supervisor.layout().enable("good").unwrap();
        supervisor.layout().enable("bad").unwrap();

        let report = supervisor.start_all().unwrap();
        assert_eq!(report.succeeded, vec!["good".to_string()]);
        assert_eq!(report.failures(), 1);
        assert!(matches!(report.failed[0].1, Error::NotFound(_)));

        let pid = supervisor.registry().get("good").unwrap().pid;
        process::send_signal(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
        wait_for_exit(pid);
    }
}

mod restart_policy {
    use super::*;

    const CRASH_ONCE: &str = r#"if [ -e "$(dirname "$0")/crashed" ]; then
  exec sleep 30
fi
touch "$(dirname "$0")/crashed"
exit 3"#;

    #[tokio::test]
    async fn test_crashed_service_is_restarted() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "flaky", CRASH_ONCE, 0o755);

        let first = supervisor.start("flaky").unwrap();
        let status = wait_for_exit(first);
        assert_eq!(status.code, Some(3));

        let second = supervisor.handle_exit(status).unwrap().unwrap();
        assert_ne!(first, second);

        let service = supervisor.registry().get("flaky").unwrap();
        assert_eq!(service.pid, second);
        assert_eq!(service.restart_count, 1);
        assert!(!service.last_exit_normal);

        supervisor.stop("flaky").await.unwrap();
    }

    const EXIT_ZERO_ONCE: &str = r#"if [ -e "$(dirname "$0")/ran" ]; then
  exec sleep 30
fi
touch "$(dirname "$0")/ran"
exit 0"#;

    #[tokio::test]
    async fn test_clean_exit_restart_through_reaper_task() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "web", EXIT_ZERO_ONCE, 0o755);

        let (tx, mut exits) = mpsc::unbounded_channel();
        let reaper_task = spawn_reaper_task(Reaper::new(), tx).unwrap();

        let first = supervisor.start("web").unwrap();
        let status = loop {
            let status = tokio::time::timeout(Duration::from_secs(10), exits.recv())
                .await
                .expect("no exit event")
                .expect("reaper task ended");
            if status.pid == first {
                break status;
            }
        };
        assert!(status.normal());

        let second = supervisor.handle_exit(status).unwrap().unwrap();
        assert_ne!(first, second);

        let service = supervisor.registry().get("web").unwrap();
        assert_eq!(service.pid, second);
        assert_eq!(service.restart_count, 1);
        assert!(service.last_exit_normal);

        supervisor.stop("web").await.unwrap();
        assert!(supervisor.registry().is_empty());
        reaper_task.abort();
    }

    #[test]
    fn test_restart_count_stops_at_cap() {
        let _lock = fork_lock();
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.restart_cap = 2;
        let mut supervisor = Supervisor::new(config);
        supervisor.layout().ensure_dirs().unwrap();
        create_service(&supervisor, "flaky", "exit 1", 0o755);

        let mut pid = supervisor.start("flaky").unwrap();
        for expected in 1..=2 {
            let status = wait_for_exit(pid);
            pid = supervisor.handle_exit(status).unwrap().unwrap();

            let service = supervisor.registry().get("flaky").unwrap();
            assert_eq!(service.restart_count, expected);
            assert!(!service.last_exit_normal);
        }

        let status = wait_for_exit(pid);
        assert_eq!(supervisor.handle_exit(status).unwrap(), None);
        assert!(!supervisor.registry().contains("flaky"));
    }

    #[test]
    fn test_restart_cap_leaves_service_dead() {
        let _lock = fork_lock();
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.restart_cap = 0;
        let mut supervisor = Supervisor::new(config);
        supervisor.layout().ensure_dirs().unwrap();
        create_service(&supervisor, "flaky", "exit 1", 0o755);

        let pid = supervisor.start("flaky").unwrap();
        let status = wait_for_exit(pid);

        assert_eq!(supervisor.handle_exit(status).unwrap(), None);
        assert!(supervisor.registry().is_empty());
    }

    #[test]
    fn test_opted_out_service_stays_dead() {
        let _lock = fork_lock();
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.no_restart = vec!["oneshot".to_string()];
        let mut supervisor = Supervisor::new(config);
        supervisor.layout().ensure_dirs().unwrap();
        create_service(&supervisor, "oneshot", "exit 0", 0o755);

        let pid = supervisor.start("oneshot").unwrap();
        assert!(!supervisor.registry().get("oneshot").unwrap().restart_when_dead);

        let status = wait_for_exit(pid);
        assert!(status.normal());
        assert_eq!(supervisor.handle_exit(status).unwrap(), None);
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_exit_of_stopped_service_is_ignored() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "sleeper", "exec sleep 30", 0o755);

        let pid = supervisor.start("sleeper").unwrap();
        supervisor.stop("sleeper").await.unwrap();

        let stale = ExitStatus {
            pid,
            code: None,
            signal: Some(libc::SIGTERM),
        };
        assert_eq!(supervisor.handle_exit(stale).unwrap(), None);
        assert!(supervisor.registry().is_empty());
    }
}

mod logs {
    use super::*;

    #[tokio::test]
    async fn test_log_is_truncated_on_start() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "chatty", "echo hello\nexec sleep 30", 0o755);
        fs::write(supervisor.layout().log_path("chatty"), "stale output\n").unwrap();

        supervisor.start("chatty").unwrap();
        wait_for_log(&supervisor, "chatty", "hello");

        let log = supervisor.layout().read_log("chatty").unwrap();
        assert!(!log.contains("stale"));

        let status = supervisor.status("chatty").unwrap();
        assert_eq!(status.log_tail, vec!["hello".to_string()]);

        supervisor.stop("chatty").await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_point_sees_marker_argument() {
        let _lock = fork_lock();
        let (mut supervisor, _temp_dir) = create_test_supervisor();
        create_service(&supervisor, "args", "echo \"arg=$1\"\nexec sleep 30", 0o755);

        supervisor.start("args").unwrap();
        wait_for_log(&supervisor, "args", "arg=true");

        supervisor.stop("args").await.unwrap();
    }
}
