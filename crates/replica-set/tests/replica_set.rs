//! Integration tests for replica-set lifecycle against a fake engine

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{PORTS, RecordingClient, descriptors, init_test_logging, replica_set};
use mango_admin::{ALREADY_INITIALIZED, Bson};
use mango_mongod::test_utils::{EXIT_DELAY_FLAG, FakeEngine, process_exists};
use mango_replica_set::{Error, ReplicaSet, ReplicaSetOptions};
use tempfile::TempDir;

const QUICK_EXIT: Duration = Duration::from_millis(50);

#[tokio::test]
async fn test_start_initiates_on_first_node() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.start().await.unwrap();

    for node in set.nodes() {
        assert!(node.is_running().await);
        assert!(node.dbpath().is_dir());

        let args = engine.wait_for_args(node.dbpath()).await;
        let repl_set = args.iter().position(|a| a == "--replSet").unwrap();
        assert_eq!(args[repl_set + 1], "rs");
    }

    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);

        let (endpoint, command) = &calls[0];
        assert_eq!(endpoint.to_string(), "localhost:27017");

        let config = command
            .get("replSetInitiate")
            .and_then(Bson::as_document)
            .unwrap();
        assert_eq!(config.get("_id").and_then(Bson::as_str), Some("rs"));

        let Some(Bson::Array(members)) = config.get("members") else {
            panic!("members missing");
        };
        let members: Vec<_> = members
            .iter()
            .map(|m| {
                let m = m.as_document().unwrap();
                (
                    m.get("_id").and_then(Bson::as_i32).unwrap(),
                    m.get("host").and_then(Bson::as_str).unwrap().to_string(),
                )
            })
            .collect();
        let expected: Vec<_> = PORTS
            .iter()
            .zip(1..)
            .map(|(port, id)| (id, format!("localhost:{port}")))
            .collect();
        assert_eq!(members, expected);
    }

    set.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_start_fails_for_every_node() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.start().await.unwrap();

    let Err(Error::Nodes(failures)) = set.start().await else {
        panic!("second start should fail");
    };
    assert_eq!(failures.attempted, 3);
    assert_eq!(failures.failures.len(), 3);
    assert!(
        failures
            .errors()
            .all(|e| matches!(e, mango_mongod::Error::AlreadyRunning))
    );

    // initiate is only sent by the first start
    assert_eq!(calls.lock().unwrap().len(), 1);

    set.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_stop_fails_for_every_node() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, _calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.start().await.unwrap();
    set.stop().await.unwrap();

    let Err(Error::Nodes(failures)) = set.stop().await else {
        panic!("second stop should fail");
    };
    assert_eq!(failures.failures.len(), 3);
    assert!(
        failures
            .errors()
            .all(|e| matches!(e, mango_mongod::Error::NotRunning))
    );
}

#[tokio::test]
async fn test_stop_waits_for_slowest_node() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, _calls) = RecordingClient::ok();

    let mut nodes = descriptors(dir.path());
    nodes[1] = nodes[1].clone().with_flag(EXIT_DELAY_FLAG, "1");
    let set = replica_set(&engine, nodes, client);

    set.start().await.unwrap();

    let mut pids = Vec::new();
    for node in set.nodes() {
        engine.wait_for_args(node.dbpath()).await;
        pids.push(node.pid().await.unwrap());
    }

    let started = Instant::now();
    set.stop().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    for node in set.nodes() {
        assert!(!node.is_running().await);
    }
    for pid in pids {
        assert!(!process_exists(pid), "process {pid} outlived stop");
    }
}

#[tokio::test]
async fn test_restart_tolerates_already_initialized() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, calls) = RecordingClient::new(|| {
        Err(mango_admin::Error::Command {
            code: ALREADY_INITIALIZED,
            code_name: "AlreadyInitialized".to_string(),
            message: "already initialized".to_string(),
        })
    });
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.start().await.unwrap();
    set.stop().await.unwrap();
    set.start().await.unwrap();
    set.stop().await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_purge_then_start_gives_empty_data_dirs() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, _calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.start().await.unwrap();
    for node in set.nodes() {
        std::fs::write(node.dbpath().join("collection-0.wt"), b"data").unwrap();
    }
    set.stop().await.unwrap();

    set.purge().await.unwrap();
    for node in set.nodes() {
        assert!(!node.dbpath().exists());
    }

    set.start().await.unwrap();
    for node in set.nodes() {
        assert_eq!(std::fs::read_dir(node.dbpath()).unwrap().count(), 0);
    }
    set.stop().await.unwrap();
}

#[tokio::test]
async fn test_purge_of_missing_dirs_succeeds() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, _calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.purge().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_skips_initiate() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let (client, calls) = RecordingClient::ok();

    let executable = dir.path().join("no-such-mongod");
    let options =
        ReplicaSetOptions::new(executable, "rs", descriptors(dir.path())).with_admin_client(client);
    let set = ReplicaSet::new(options).unwrap();

    let Err(Error::Nodes(failures)) = set.start().await else {
        panic!("start should fail");
    };
    assert_eq!(failures.failures.len(), 3);
    assert!(
        failures
            .errors()
            .all(|e| matches!(e, mango_mongod::Error::Spawn { .. }))
    );
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_initiate_failure_is_reported() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, _calls) = RecordingClient::new(|| {
        Err(mango_admin::Error::Command {
            code: 93,
            code_name: "InvalidReplicaSetConfig".to_string(),
            message: "bad config".to_string(),
        })
    });
    let set = replica_set(&engine, descriptors(dir.path()), client);

    let result = set.start().await;
    assert!(matches!(
        result,
        Err(Error::Admin(mango_admin::Error::Command { code: 93, .. }))
    ));

    // the nodes themselves are up and must still be stopped
    for node in set.nodes() {
        assert!(node.is_running().await);
    }
    set.stop().await.unwrap();
}

#[tokio::test]
async fn test_partial_failure_leaves_started_nodes_running() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::new(QUICK_EXIT);
    let (client, calls) = RecordingClient::ok();
    let set = replica_set(&engine, descriptors(dir.path()), client);

    set.nodes()[2].start().await.unwrap();

    let Err(Error::Nodes(failures)) = set.start().await else {
        panic!("start should fail");
    };
    assert_eq!(failures.failures.len(), 1);
    assert_eq!(failures.failures[0].node, "mongod-27019");
    assert!(calls.lock().unwrap().is_empty());

    for node in set.nodes() {
        assert!(node.is_running().await);
    }
    set.stop().await.unwrap();
}
