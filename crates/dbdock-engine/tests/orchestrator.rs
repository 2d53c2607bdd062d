mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{frame, wait_for_entry};
use dbdock_engine::common::{
    ContainerState, ContainerStatus, DatabaseKind, DockError, InstanceStatus, LogKind,
    ManagedInstance, NoProgress,
};
use dbdock_engine::testing::FakeEngine;
use dbdock_engine::{DockConfig, Orchestrator};
use tokio::io::AsyncWriteExt;

fn setup() -> (Arc<FakeEngine>, Arc<Orchestrator>) {
    let engine = Arc::new(FakeEngine::new());
    let orchestrator = Arc::new(Orchestrator::new(engine.clone(), DockConfig::default()));
    (engine, orchestrator)
}

#[tokio::test]
async fn sequential_starts_reuse_one_container() {
    let (engine, orchestrator) = setup();
    let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);

    let first = orchestrator.start(&redis, &NoProgress).await.unwrap();
    let second = orchestrator.start(&redis, &NoProgress).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.creates(), 1);
    assert_eq!(engine.pulls(), 1);
    assert_eq!(engine.calls().log_opens, 1);
    assert!(orchestrator.streams().is_attached("Redis"));

    let spec = &engine.created_specs()[0];
    assert_eq!(spec.name, "dbdock-redis-redis-a7f64157");
    assert_eq!(spec.image.to_string(), "redis:7.0");
    assert!(spec.env.is_empty());

    let snapshots = orchestrator
        .logs()
        .instance_logs("Redis")
        .into_iter()
        .filter(|e| e.kind == LogKind::ConfigSnapshot)
        .count();
    assert_eq!(snapshots, 2);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn start_reports_progress_in_order() {
    let (_engine, orchestrator) = setup();
    let mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql);
    let seen = Mutex::new(Vec::new());
    let sink = |message: &str| seen.lock().unwrap().push(message.to_string());

    orchestrator.start(&mysql, &sink).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            "Pulling image mysql:8.0...",
            "Image mysql:8.0 pulled successfully",
            "Creating container dbdock-mysql-mysql-211906c1...",
            "Starting container dbdock-mysql-mysql-211906c1...",
            "MySQL is running",
        ]
    );
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_of_one_instance_create_one_container() {
    let (engine, orchestrator) = setup();
    let pg = ManagedInstance::defaults_for(DatabaseKind::Postgresql);
    let gate = engine.gate_create(&orchestrator.container_name(&pg));

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let pg = pg.clone();
            tokio::spawn(async move { orchestrator.start(&pg, &NoProgress).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.add_permits(2);

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(engine.creates(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_instances_start_independently() {
    let (engine, orchestrator) = setup();
    let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
    let gate = engine.gate_create(&orchestrator.container_name(&redis));
    let mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql);

    let blocked = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start(&redis, &NoProgress).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mysql_id = tokio::time::timeout(Duration::from_secs(5), orchestrator.start(&mysql, &NoProgress))
        .await
        .expect("mysql start is not blocked by redis")
        .unwrap();
    assert!(!blocked.is_finished());

    gate.add_permits(1);
    let redis_id = blocked.await.unwrap().unwrap();
    assert_ne!(redis_id, mysql_id);
    assert_eq!(engine.creates(), 2);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookalike_names_get_their_own_containers() {
    let (engine, orchestrator) = setup();
    let spaced = ManagedInstance::new("Cache A", DatabaseKind::Redis, "7.0", 16379);
    let dashed = ManagedInstance::new("cache-a", DatabaseKind::Redis, "7.0", 16380);
    assert_ne!(orchestrator.container_name(&spaced), orchestrator.container_name(&dashed));

    let (first, second) = tokio::join!(
        orchestrator.start(&spaced, &NoProgress),
        orchestrator.start(&dashed, &NoProgress),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first, second);
    assert_eq!(engine.creates(), 2);
    let mut ports: Vec<_> = engine.created_specs().iter().map(|s| s.host_port).collect();
    ports.sort();
    assert_eq!(ports, vec![16379, 16380]);
    assert_eq!(orchestrator.streams().attached_container("Cache A"), Some(first));
    assert_eq!(orchestrator.streams().attached_container("cache-a"), Some(second));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn paused_container_is_unpaused_not_restarted() {
    let (engine, orchestrator) = setup();
    let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
    let existing = engine.insert_container(&orchestrator.container_name(&redis), ContainerState::Paused);

    let id = orchestrator.start(&redis, &NoProgress).await.unwrap();

    assert_eq!(id, existing);
    let calls = engine.calls();
    assert_eq!((calls.unpauses, calls.starts, calls.creates), (1, 0, 0));
    assert_eq!(engine.container_state(&id), Some(ContainerState::Running));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn name_taken_during_create_reuses_that_container() {
    let (engine, orchestrator) = setup();
    let pg = ManagedInstance::defaults_for(DatabaseKind::Postgresql);
    let name = orchestrator.container_name(&pg);
    let gate = engine.gate_create(&name);

    let pending = {
        let orchestrator = orchestrator.clone();
        let pg = pg.clone();
        tokio::spawn(async move { orchestrator.start(&pg, &NoProgress).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let foreign = engine.insert_container(&name, ContainerState::Exited);
    gate.add_permits(1);

    let id = pending.await.unwrap().unwrap();
    assert_eq!(id, foreign);
    assert!(engine.created_specs().is_empty());
    assert_eq!(engine.container_state(&id), Some(ContainerState::Running));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn managed_lifecycle_follows_state_machine() {
    let (engine, orchestrator) = setup();
    let mut pg = ManagedInstance::defaults_for(DatabaseKind::Postgresql);

    let id = orchestrator.start_instance(&mut pg, &NoProgress).await.unwrap();
    assert_eq!(pg.status, InstanceStatus::Running);
    assert_eq!(pg.container_id.as_deref(), Some(id.as_str()));

    let err = orchestrator.start_instance(&mut pg, &NoProgress).await.unwrap_err();
    assert!(matches!(err, DockError::InvalidTransition { from: InstanceStatus::Running, .. }));

    orchestrator.stop_instance(&mut pg).await.unwrap();
    assert_eq!(pg.status, InstanceStatus::Stopped);
    assert_eq!(engine.container_state(&id), Some(ContainerState::Exited));
    assert!(!orchestrator.streams().is_attached("PostgreSQL"));

    // Restart reuses the stopped container.
    let again = orchestrator.start_instance(&mut pg, &NoProgress).await.unwrap();
    assert_eq!(again, id);
    assert_eq!(engine.creates(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn stop_detaches_before_stopping() {
    let (engine, orchestrator) = setup();
    let redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
    let id = orchestrator.start(&redis, &NoProgress).await.unwrap();

    let mut writer = engine.take_log_writer(&id).unwrap();
    writer.write_all(&frame(1, b"Ready to accept connections\n")).await.unwrap();
    wait_for_entry(orchestrator.logs(), "Redis", "Ready to accept connections").await;

    orchestrator.stop(&id, "Redis").await.unwrap();
    assert!(!orchestrator.streams().is_attached("Redis"));
    let messages: Vec<_> = orchestrator
        .logs()
        .instance_logs("Redis")
        .into_iter()
        .map(|e| e.message)
        .collect();
    let cancelled = messages.iter().position(|m| m == "Log stream cancelled").unwrap();
    let stopped = messages.iter().position(|m| m == "Container stopped").unwrap();
    assert!(cancelled < stopped);
}

#[tokio::test]
async fn failed_start_lands_in_error() {
    let (engine, orchestrator) = setup();
    engine.fail_pull("pull access denied");
    let mut mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql);

    let err = orchestrator.start_instance(&mut mysql, &NoProgress).await.unwrap_err();
    assert!(matches!(err, DockError::ImageProvisionFailure { .. }));
    assert_eq!(mysql.status, InstanceStatus::Error);
    assert!(mysql.last_error.as_deref().unwrap().contains("pull access denied"));
    assert_eq!(engine.creates(), 0);
    assert!(orchestrator
        .logs()
        .application_logs()
        .iter()
        .any(|e| e.kind == LogKind::Error && e.instance.as_deref() == Some("MySQL")));
}

#[tokio::test]
async fn volume_directory_is_created_and_bound() {
    let (engine, orchestrator) = setup();
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("volumes").join("mysql");
    let mysql = ManagedInstance::defaults_for(DatabaseKind::Mysql).with_volume(&data);

    orchestrator.start(&mysql, &NoProgress).await.unwrap();

    assert!(data.is_dir());
    let spec = &engine.created_specs()[0];
    assert_eq!(spec.binds, vec![format!("{}:/var/lib/mysql", data.display())]);
    assert_eq!(spec.env, vec!["MYSQL_ROOT_PASSWORD=12345678".to_string()]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn start_all_collects_failures_and_continues() {
    let (engine, orchestrator) = setup();
    let scratch = tempfile::tempdir().unwrap();
    let blocker = scratch.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();

    let mut instances = ManagedInstance::default_set();
    instances[1].volume_path = Some(blocker.join("data"));

    let failures = orchestrator.start_all(&mut instances, &NoProgress).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "MSSQL");
    assert!(matches!(failures[0].1, DockError::VolumeSetup { .. }));
    assert_eq!(instances[1].status, InstanceStatus::Error);
    let running = instances.iter().filter(|i| i.status == InstanceStatus::Running).count();
    assert_eq!(running, 3);
    assert_eq!(engine.creates(), 3);

    let failures = orchestrator.stop_all(&mut instances).await;
    assert!(failures.is_empty());
    assert!(instances
        .iter()
        .all(|i| matches!(i.status, InstanceStatus::Stopped | InstanceStatus::Error)));
    assert!(orchestrator.streams().attached_instances().is_empty());
}

#[tokio::test]
async fn refresh_adopts_and_forgets_containers() {
    let (engine, orchestrator) = setup();
    let mut instances = ManagedInstance::default_set();
    let id = engine.insert_container(&orchestrator.container_name(&instances[0]), ContainerState::Running);

    orchestrator.refresh_status(&mut instances).await;
    let mysql = &instances[0];
    assert_eq!(mysql.status, InstanceStatus::Running);
    assert_eq!(mysql.container_id.as_deref(), Some(id.as_str()));
    assert!(orchestrator.streams().is_attached("MySQL"));
    assert!(instances[1..].iter().all(|i| i.status == InstanceStatus::Stopped));

    engine.set_state(&id, ContainerState::Exited);
    orchestrator.refresh_status(&mut instances).await;
    assert_eq!(instances[0].status, InstanceStatus::Stopped);
    assert!(!orchestrator.streams().is_attached("MySQL"));

    engine.remove_container(&id);
    orchestrator.refresh_status(&mut instances).await;
    assert_eq!(instances[0].status, InstanceStatus::Stopped);
    assert!(instances[0].container_id.is_none());
}

#[tokio::test]
async fn refresh_marks_query_failures_as_error() {
    let (engine, orchestrator) = setup();
    let mut redis = ManagedInstance::defaults_for(DatabaseKind::Redis);
    redis.container_id = Some("deadbeef".to_string());
    engine.set_unavailable(Some("daemon went away"));

    let mut instances = vec![redis];
    orchestrator.refresh_status(&mut instances).await;
    assert_eq!(instances[0].status, InstanceStatus::Error);
    assert!(matches!(orchestrator.status("deadbeef").await, ContainerStatus::Error(_)));

    engine.set_unavailable(None);
    assert_eq!(orchestrator.status("deadbeef").await, ContainerStatus::NotFound);
}

#[tokio::test]
async fn engine_check_reports_unavailability() {
    let (engine, orchestrator) = setup();
    orchestrator.check_engine().await.unwrap();

    engine.set_unavailable(Some("socket not found"));
    let err = orchestrator.check_engine().await.unwrap_err();
    assert!(matches!(err, DockError::EngineUnavailable(ref m) if m.contains("socket not found")));
    let last = orchestrator.logs().global_logs().pop().unwrap();
    assert_eq!(last.kind, LogKind::Error);
}

#[tokio::test]
async fn connection_outcomes_are_recorded() {
    let (_engine, orchestrator) = setup();
    let mut redis = ManagedInstance::defaults_for(DatabaseKind::Redis);

    orchestrator.record_connection_outcome(&mut redis, false, "connection refused");
    let outcome = redis.connection.clone().unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "connection refused");
    assert!(orchestrator
        .logs()
        .instance_logs("Redis")
        .iter()
        .any(|e| e.message == "Connection test failed: connection refused"));
}
