//! End-to-end tests for scenario runs
//!
//! Agents run the `mock-sipp` binary built alongside the crate, which plays
//! a minimal UDP call flow and follows SIPp's exit codes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use rsipp::hooks::{conf_scen_protocol, getsockaddr};
use rsipp::launch::RunnerConfig;
use rsipp::{
    client, scenario, server, Error, RunOptions, Runner, Scenario, ScenarioConfig,
    ScenarioOptions, Settings, SocketAddr, UserAgent, Value,
};

fn mock_sipp() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock-sipp"))
}

fn with_mock(mut agent: UserAgent) -> UserAgent {
    agent.set("bin_path", mock_sipp()).unwrap();
    agent
}

fn settings<const N: usize>(pairs: [(&str, Value); N]) -> Settings {
    Settings::from_pairs(pairs).unwrap()
}

fn run_options(timeout: Duration) -> RunOptions {
    RunOptions {
        timeout,
        runner: RunnerConfig {
            grace: Duration::from_secs(2),
            stop_retries: 1,
            retry_wait: Duration::from_millis(500),
        },
        ..Default::default()
    }
}

fn in_logdir(agents: Vec<UserAgent>, logdir: &tempfile::TempDir) -> Scenario {
    Scenario::with_options(
        agents,
        ScenarioOptions {
            logdir: Some(logdir.path().to_path_buf()),
            ..Default::default()
        },
    )
    .unwrap()
}

/// Default scenario on loopback with automatic local sockets
fn loopback_scenario(logdir: &tempfile::TempDir) -> Scenario {
    let mut config = ScenarioConfig::default();
    config.options.defaults.set("local_host", "127.0.0.1").unwrap();
    config.options.logdir = Some(logdir.path().to_path_buf());

    let mut scen = scenario(&config).unwrap();
    for agent in scen.agents_mut() {
        agent.set("bin_path", mock_sipp()).unwrap();
    }
    scen
}

#[tokio::test]
async fn test_basic_call_passes() {
    let logdir = tempfile::tempdir().unwrap();
    let server_addr = Value::from(("127.0.0.1", 5060));
    let uas = with_mock(server(settings([("srcaddr", server_addr.clone())])).unwrap());
    let uac = with_mock(
        client(settings([
            ("destaddr", server_addr),
            ("call_count", Value::from(1)),
        ]))
        .unwrap(),
    );

    let scen = in_logdir(vec![uas, uac], &logdir);
    let results = scen.run(&run_options(Duration::from_secs(15))).await.unwrap();

    assert_eq!(results.len(), 2);
    for (cmd, proc) in &results {
        assert_eq!(proc.returncode, Some(0), "'{}' failed: {}", cmd, proc.stderr);
    }

    let screen = std::fs::read_to_string(logdir.path().join("uac_screen_file")).unwrap();
    assert!(screen.contains("Successful call: 1"));
}

#[tokio::test]
async fn test_unroutable_agents_fail() {
    let logdir = tempfile::tempdir().unwrap();
    let unroutable = Value::from(("99.99.99.99", 5060));
    let uas = with_mock(server(settings([("srcaddr", unroutable.clone())])).unwrap());
    let uac = with_mock(
        client(settings([
            ("destaddr", unroutable),
            ("recv_timeout", Value::from(1000)),
        ]))
        .unwrap(),
    );

    let scen = in_logdir(vec![uas, uac], &logdir);
    let mut runner = Runner::with_config(run_options(Duration::ZERO).runner);
    let err = scen
        .run_with(&mut runner, &run_options(Duration::from_secs(15)))
        .await
        .unwrap_err();

    match err {
        Error::SippFailure(summary) => {
            assert!(summary.starts_with("Some agents failed"));
            assert!(summary.contains("'uas' with exit code 255"), "{}", summary);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the runner keeps the results for post-mortem inspection
    let results = runner.results();
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|p| p.failed()));
    assert!(!runner.is_alive());
}

#[tokio::test]
async fn test_unanswered_server_times_out() {
    let logdir = tempfile::tempdir().unwrap();
    let addr = getsockaddr("127.0.0.1").unwrap();
    let uas = with_mock(server(settings([("srcaddr", Value::from(addr))])).unwrap());

    let scen = in_logdir(vec![uas], &logdir);
    let mut runner = Runner::new();
    let err = scen
        .run_with(&mut runner, &run_options(Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert!(
        err.is_timeout() || matches!(err, Error::Supervisory(_)),
        "unexpected error: {err}"
    );
    if let Error::Timeout { pids, .. } = &err {
        assert_eq!(pids.len(), 1);
    }
    assert!(!runner.is_alive());
}

#[tokio::test]
async fn test_failures_without_raising() {
    let logdir = tempfile::tempdir().unwrap();
    let uac = with_mock(
        client(settings([
            ("destaddr", Value::from(getsockaddr("127.0.0.1").unwrap())),
            ("recv_timeout", Value::from(300)),
        ]))
        .unwrap(),
    );

    let scen = in_logdir(vec![uac], &logdir);
    let options = RunOptions {
        raise_exc: false,
        ..run_options(Duration::from_secs(10))
    };
    let results = scen.run(&options).await.unwrap();
    let proc = results.values().next().unwrap();
    assert_eq!(proc.returncode, Some(1));
    assert!(proc.stderr.contains("timed out"));
}

#[tokio::test]
async fn test_default_scenario_with_local_sockets() {
    let logdir = tempfile::tempdir().unwrap();
    let scen = loopback_scenario(&logdir);

    let prepared = scen.prepare().unwrap();
    assert_eq!(prepared[1].destaddr(), prepared[0].srcaddr());

    let results = scen.run(&run_options(Duration::from_secs(15))).await.unwrap();
    assert!(results.values().all(|p| p.succeeded()));
}

#[tokio::test]
async fn test_servers_launch_first() {
    let logdir = tempfile::tempdir().unwrap();
    let mut config = ScenarioConfig::default();
    config.options.defaults.set("local_host", "127.0.0.1").unwrap();
    config.options.logdir = Some(logdir.path().to_path_buf());

    let agents = vec![
        with_mock(client(Settings::new()).unwrap()),
        with_mock(server(Settings::new()).unwrap()),
    ];
    let scen = conf_scen_protocol(agents, &config).unwrap();
    let results = scen.run(&run_options(Duration::from_secs(15))).await.unwrap();

    let first = results.keys().next().unwrap();
    assert!(first.contains("-sn 'uas'"));
    assert!(results.values().all(|p| p.succeeded()));
}

#[tokio::test]
async fn test_launch_then_finalize() {
    let logdir = tempfile::tempdir().unwrap();
    let scen = loopback_scenario(&logdir);

    let finalizer = scen.launch(&run_options(Duration::from_secs(15))).await.unwrap();
    assert_eq!(finalizer.agents().count(), 2);

    let (runner, outcome) = finalizer.finalize(Duration::from_secs(15)).await;
    let results = outcome.unwrap();
    assert_eq!(results.len(), 2);
    assert!(runner.ready());
}

#[tokio::test]
async fn test_rerun_requires_clear() {
    let logdir = tempfile::tempdir().unwrap();
    let scen = loopback_scenario(&logdir);
    let options = run_options(Duration::from_secs(15));

    let mut runner = Runner::new();
    let first = scen.run_with(&mut runner, &options).await.unwrap();

    let err = scen.run_with(&mut runner, &options).await.unwrap_err();
    assert!(matches!(err, Error::ResultsNotCleared));
    assert_eq!(runner.results(), first);

    runner.clear().unwrap();
    scen.run_with(&mut runner, &options).await.unwrap();
}

#[test]
fn test_cli_cmds() {
    let home = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_rsipp"))
        .args(["cmds", "--no-autolocalsocks", "--sipp"])
        .arg(mock_sipp())
        .env("XDG_CONFIG_HOME", home.path())
        .env("HOME", home.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("uas:\n"));
    assert!(stdout.contains("\n\nuac:\n"));
    assert!(stdout.contains("'127.0.0.1':'5060'"));
    assert!(stdout.contains(&*mock_sipp().to_string_lossy()));
}

#[test]
fn test_cli_run_json() {
    let home = tempfile::tempdir().unwrap();
    let logdir = tempfile::tempdir().unwrap();
    let config = home.path().join("rsipp.toml");
    std::fs::write(
        &config,
        "[runner]\ntimeout_secs = 15\ngrace_secs = 2\n\n[defaults]\ncall_count = 2\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_rsipp"))
        .args(["run", "--json", "--local-host", "127.0.0.1", "--config"])
        .arg(&config)
        .arg("--logdir")
        .arg(logdir.path())
        .arg("--sipp")
        .arg(mock_sipp())
        .env("HOME", home.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report["returncode"], 0);
        assert!(report["command"].as_str().unwrap().contains("-m '2'"));
    }
    assert_eq!(reports[0]["name"], "uas");
}

#[test]
fn test_cli_rejects_bad_proxy() {
    let output = Command::new(env!("CARGO_BIN_EXE_rsipp"))
        .args(["cmds", "--proxy", "not-a-socket"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_socket_addr_display() {
    assert_eq!(SocketAddr::new("::1", 5060).to_string(), "[::1]:5060");
}
