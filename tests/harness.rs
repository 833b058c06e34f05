//! Workload Harness Tests
//!
//! Tests for running a workload on many threads:
//! - Thread and iteration counts, with config overrides
//! - Setup and teardown hooks
//! - Cooperative stop when one thread fails
//! - Panics reported per thread

mod common;

use churn::{
    run_workload, ChurnError, ClusterTopology, ErrorCode, StateContext, Transitions, Workload,
    WorkloadConfig,
};
use common::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn inserting_workload(threads: usize, iterations: usize) -> Workload<usize> {
    Workload::builder("inserts", 0usize)
        .state("insert", |n: &mut usize, ctx: &StateContext<'_>| {
            ctx.db().run_command(&insert_cmd(
                ctx.coll_name(),
                json!({ "tid": ctx.tid(), "n": *n }),
            ))?;
            *n += 1;
            Ok(())
        })
        .start_state("insert")
        .transitions("insert", Transitions::new().to("insert", 1.0))
        .thread_count(threads)
        .iterations(iterations)
        .build()
        .unwrap()
}

fn seeded_config() -> WorkloadConfig {
    WorkloadConfig {
        seed: Some(3),
        ..Default::default()
    }
}

// ============================================================================
// Thread and Iteration Counts
// ============================================================================

#[test]
fn every_thread_runs_its_budget() {
    init_tracing();
    let factory = FakeFactory::new(FakeCluster::new());
    let config = WorkloadConfig {
        threads: Some(4),
        iterations: Some(10),
        ..seeded_config()
    };

    let report = run_workload(
        &inserting_workload(1, 1),
        &config,
        &ClusterTopology::new(),
        &factory,
    )
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.workload, "inserts");
    assert_eq!(report.threads.len(), 4);
    assert_eq!(report.total_iterations(), 40);
    assert_eq!(factory.cluster.count(&config.coll_name), 40);

    let tids: Vec<usize> = report.threads.iter().map(|t| t.tid).collect();
    assert_eq!(tids, vec![0, 1, 2, 3]);
    for tid in 0..4u64 {
        let docs = factory
            .cluster
            .documents(&config.coll_name)
            .into_iter()
            .filter(|d| d["tid"] == json!(tid))
            .count();
        assert_eq!(docs, 10);
    }
}

#[test]
fn workload_counts_apply_without_overrides() {
    let factory = FakeFactory::new(FakeCluster::new());

    let report = run_workload(
        &inserting_workload(2, 3),
        &seeded_config(),
        &ClusterTopology::new(),
        &factory,
    )
    .unwrap();

    let stats = report.into_result().unwrap();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.iterations == 3));
}

#[test]
fn each_thread_gets_its_own_session() {
    let factory = FakeFactory::new(FakeCluster::new());
    let config = WorkloadConfig {
        threads: Some(3),
        iterations: Some(5),
        in_transaction: true,
        ..seeded_config()
    };

    let report = run_workload(
        &inserting_workload(1, 1),
        &config,
        &ClusterTopology::new(),
        &factory,
    )
    .unwrap();

    let stats = report.into_result().unwrap();
    assert!(stats.iter().all(|s| s.commits == 5));
    // One admin handle plus one per thread.
    assert_eq!(factory.cluster.sessions_started(), 4);
    let committed: usize = factory
        .databases()
        .iter()
        .map(|db| db.fake_session().committed.load(Ordering::SeqCst))
        .sum();
    assert_eq!(committed, 15);
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn setup_and_teardown_run_once() {
    let factory = FakeFactory::new(FakeCluster::new());
    let setups = Arc::new(AtomicUsize::new(0));
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (s, t) = (Arc::clone(&setups), Arc::clone(&teardowns));

    let workload = Workload::builder("hooks", 0usize)
        .state("noop", |_: &mut usize, _: &StateContext<'_>| Ok(()))
        .start_state("noop")
        .transitions("noop", Transitions::new().to("noop", 1.0))
        .setup(move |_, db, coll| {
            s.fetch_add(1, Ordering::SeqCst);
            db.run_command(&json!({ "create": coll }))?;
            Ok(())
        })
        .teardown(move |_, _, _| {
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .thread_count(3)
        .iterations(2)
        .build()
        .unwrap();

    let report = run_workload(&workload, &seeded_config(), &ClusterTopology::new(), &factory)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(setups.load(Ordering::SeqCst), 1);
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn setup_failure_prevents_run() {
    let factory = FakeFactory::new(FakeCluster::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);

    let workload = Workload::builder("bad_setup", 0usize)
        .state("noop", move |_: &mut usize, _: &StateContext<'_>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .start_state("noop")
        .transitions("noop", Transitions::new().to("noop", 1.0))
        .setup(|_, _, _| Err(ChurnError::command(ErrorCode::HostUnreachable, "down")))
        .build()
        .unwrap();

    let err = run_workload(&workload, &seeded_config(), &ClusterTopology::new(), &factory)
        .unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::HostUnreachable));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let factory = FakeFactory::new(FakeCluster::new());
    let config = WorkloadConfig {
        threads: Some(0),
        ..Default::default()
    };

    let err = run_workload(
        &inserting_workload(1, 1),
        &config,
        &ClusterTopology::new(),
        &factory,
    )
    .unwrap_err();

    assert!(err.is_configuration());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn failing_thread_stops_the_others() {
    let factory = FakeFactory::new(FakeCluster::new());
    let workload = Workload::builder("one_bad_thread", 0usize)
        .state("work", |n: &mut usize, ctx: &StateContext<'_>| {
            *n += 1;
            if ctx.tid() == 0 && *n == 2 {
                return Err(ctx.fail("thread 0 gives up"));
            }
            thread::sleep(Duration::from_millis(1));
            Ok(())
        })
        .start_state("work")
        .transitions("work", Transitions::new().to("work", 1.0))
        .thread_count(3)
        .iterations(1_000)
        .build()
        .unwrap();

    let report = run_workload(&workload, &seeded_config(), &ClusterTopology::new(), &factory)
        .unwrap();

    assert!(!report.is_success());
    let failures: Vec<usize> = report.failures().map(|(tid, _)| tid).collect();
    assert_eq!(failures, vec![0]);

    for thread in report.threads.iter().filter(|t| t.tid != 0) {
        let stats = thread.result.as_ref().unwrap();
        assert!(stats.stopped_early, "thread {} ran to completion", thread.tid);
        assert!(stats.iterations < 1_000);
    }
}

#[test]
fn panicking_thread_is_reported() {
    let factory = FakeFactory::new(FakeCluster::new());
    let workload = Workload::builder("panics", 0usize)
        .state("work", |_: &mut usize, ctx: &StateContext<'_>| {
            if ctx.tid() == 1 {
                panic!("kaboom");
            }
            Ok(())
        })
        .start_state("work")
        .transitions("work", Transitions::new().to("work", 1.0))
        .thread_count(2)
        .iterations(3)
        .build()
        .unwrap();

    let report = run_workload(&workload, &seeded_config(), &ClusterTopology::new(), &factory)
        .unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    match failures[0] {
        (1, ChurnError::WorkerPanicked { tid, message }) => {
            assert_eq!(*tid, 1);
            assert!(message.contains("kaboom"));
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(report.into_result().is_err());
}
