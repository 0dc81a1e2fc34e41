#![cfg(unix)]

use std::time::Duration;

use suitepool_core::{WorkerEvent, WorkerExit, WorkerLauncher};
use suitepool_exec::{ProcessLauncher, ProcessLimits};
use suitepool_model::{
    Message, PortBlock, SuiteRef, SuiteType, WorkerEnv, WorkerLimits, WorkerRole,
};

fn runner_env(suite: &str) -> WorkerEnv {
    WorkerEnv::server(
        PortBlock::new(4100, vec![4101]),
        WorkerLimits::default(),
        SuiteType::Tap,
    )
    .runner(SuiteRef::new(suite))
}

fn sh(script: &str) -> ProcessLauncher {
    ProcessLauncher::new("sh").with_args(["-c", script])
}

#[tokio::test]
async fn messages_flow_both_ways_then_exit() {
    let launcher = sh(r#"
        echo '{"type":"readyForTests"}'
        read line
        case "$line" in
          *shutdown*) exit 3 ;;
        esac
        exit 9
    "#);
    let mut worker = launcher.launch(&runner_env("a.t")).await.unwrap();
    assert_eq!(worker.role(), WorkerRole::Runner);

    assert_eq!(
        worker.recv().await,
        Some(WorkerEvent::Message(Message::ReadyForTests))
    );
    worker
        .send(Message::Shutdown {
            custom_id: Some("r-1".into()),
        })
        .unwrap();
    assert_eq!(
        worker.recv().await,
        Some(WorkerEvent::Exited(WorkerExit::code(3)))
    );
    assert_eq!(worker.recv().await, None);
}

#[tokio::test]
async fn launch_contract_is_exported() {
    let launcher = sh(r#"
        echo "{\"type\":\"suiteDone\",\"suite\":\"$WORKER_SCRIPT:$WORKER_TEST:$WORKER_PORT:$REQUESTED_PORTS\"}"
    "#);
    let mut worker = launcher.launch(&runner_env("login.t")).await.unwrap();

    assert_eq!(
        worker.recv().await,
        Some(WorkerEvent::Message(Message::SuiteDone {
            suite: SuiteRef::new("runner:login.t:4100:4101"),
        }))
    );
    assert_eq!(
        worker.recv().await,
        Some(WorkerEvent::Exited(WorkerExit::code(0)))
    );
}

#[tokio::test]
async fn output_written_before_exit_is_delivered_first() {
    let launcher = sh(r#"
        for i in 1 2 3 4 5; do echo "{\"type\":\"runnerId\",\"runnerId\":$i}"; done
        echo 'not json'
        exit 1
    "#);
    let mut worker = launcher.launch(&runner_env("a.t")).await.unwrap();

    let mut ids = Vec::new();
    let exit = loop {
        match worker.recv().await {
            Some(WorkerEvent::Message(Message::RunnerId { runner_id })) => ids.push(runner_id),
            Some(WorkerEvent::Exited(exit)) => break exit,
            other => panic!("unexpected {other:?}"),
        }
    };
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(exit, WorkerExit::code(1));
}

#[tokio::test]
async fn kill_terminates_a_hung_worker() {
    let launcher = sh("sleep 30");
    let mut worker = launcher.launch(&runner_env("a.t")).await.unwrap();

    worker.kill();
    let event = tokio::time::timeout(Duration::from_secs(5), worker.recv())
        .await
        .expect("kill should end the worker");
    assert_eq!(event, Some(WorkerEvent::Exited(WorkerExit::signaled())));
}

#[tokio::test]
async fn rlimits_apply_to_the_worker() {
    let launcher = sh(r#"echo "{\"type\":\"suiteDone\",\"suite\":\"$(ulimit -n)\"}""#).with_limits(
        ProcessLimits {
            max_open_files: Some(64),
            ..ProcessLimits::default()
        },
    );
    let mut worker = launcher.launch(&runner_env("a.t")).await.unwrap();

    assert_eq!(
        worker.recv().await,
        Some(WorkerEvent::Message(Message::SuiteDone {
            suite: SuiteRef::new("64"),
        }))
    );
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let launcher = ProcessLauncher::new("/nonexistent/suitepool-worker");
    let err = launcher.launch(&runner_env("a.t")).await.unwrap_err();
    assert!(err.to_string().contains("spawn failed"));
}
