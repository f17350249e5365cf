//! End-to-end tests through the `Space` façade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tuplespace_core::{
    AccessRule, Aspect, AspectCall, AspectResult, Config, ContainerDefinition, CoordinationData,
    CoordinatorKind, CoordinatorSpec, CoreError, Count, Entry, Operation, OperationKind, RequestContext,
    RequestTimeout, RuleAccessManager, Selector, Space, Value, WriteEntry,
};

fn short() -> RequestContext {
    RequestContext::new().timeout(RequestTimeout::millis(200))
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "gave up waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn seat(number: i64, row: Value) -> Value {
    Value::record([("seat", Value::Integer(number)), ("row", row)])
}

fn texts(entries: &[Arc<Entry>]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| e.value().as_text().map(str::to_string))
        .collect()
}

#[test]
fn take_all_matching_then_read_blocks_until_timeout() {
    let space = Space::open_in_memory().unwrap();
    let seats = space
        .create_container(
            ContainerDefinition::named("Seats").obligatory(CoordinatorSpec::new(CoordinatorKind::Linda)),
            RequestContext::new(),
        )
        .unwrap();

    space
        .write(
            seats.id,
            vec![
                WriteEntry::new(seat(10, "A".into())),
                WriteEntry::new(seat(10, "B".into())),
                WriteEntry::new(seat(11, "A".into())),
            ],
            RequestContext::new(),
        )
        .unwrap();

    let taken = space
        .take(
            seats.id,
            vec![Selector::linda(seat(10, Value::Null), Count::All)],
            RequestContext::new(),
        )
        .unwrap();
    assert_eq!(taken.len(), 2);

    let started = Instant::now();
    let err = space
        .read(
            seats.id,
            vec![Selector::linda(seat(10, Value::Null), Count::Exactly(1))],
            short(),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }), "{err}");
    assert!(started.elapsed() >= Duration::from_millis(150));

    let left = space
        .read(seats.id, vec![Selector::any(Count::All)], RequestContext::new())
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(space.stats().timeouts, 1);
}

#[test]
fn fifo_and_lifo_containers_keep_their_order() {
    let space = Space::open_in_memory().unwrap();
    let fifo = space
        .create_container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
            RequestContext::new(),
        )
        .unwrap();
    let lifo = space
        .create_container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Lifo)),
            RequestContext::new(),
        )
        .unwrap();

    for container in [fifo.id, lifo.id] {
        let entries = ["one", "two", "three"].into_iter().map(WriteEntry::new).collect();
        space.write(container, entries, RequestContext::new()).unwrap();
    }

    let first = space
        .take(fifo.id, vec![Selector::fifo(Count::Exactly(2))], RequestContext::new())
        .unwrap();
    assert_eq!(texts(&first), ["one", "two"]);

    let last = space
        .take(lifo.id, vec![Selector::lifo(Count::Exactly(2))], RequestContext::new())
        .unwrap();
    assert_eq!(texts(&last), ["three", "two"]);
}

#[test]
fn rollback_restores_taken_entries_and_drops_writes() {
    let space = Space::open_in_memory().unwrap();
    let jobs = space
        .create_container(
            ContainerDefinition::named("jobs").obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
            RequestContext::new(),
        )
        .unwrap();
    space
        .write(jobs.id, vec![WriteEntry::new("kept")], RequestContext::new())
        .unwrap();

    let tx = space.begin_transaction().unwrap();
    let ctx = RequestContext::new().transaction(tx);
    space
        .write(jobs.id, vec![WriteEntry::new("staged")], ctx.clone())
        .unwrap();
    let taken = space
        .take(jobs.id, vec![Selector::fifo(Count::Exactly(1))], ctx.clone())
        .unwrap();
    assert_eq!(texts(&taken), ["kept"]);

    // Read-committed readers elsewhere still see the taken entry but not
    // the staged write; takers elsewhere cannot get it.
    let outside = space
        .read(jobs.id, vec![Selector::fifo(Count::Max)], RequestContext::new())
        .unwrap();
    assert_eq!(texts(&outside), ["kept"]);
    let err = space
        .take(
            jobs.id,
            vec![Selector::fifo(Count::Exactly(1))],
            RequestContext::new().timeout(RequestTimeout::Zero),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::EntryLocked { .. }), "{err}");

    space.rollback_transaction(tx).unwrap();

    let after = space
        .read(jobs.id, vec![Selector::fifo(Count::All)], RequestContext::new())
        .unwrap();
    assert_eq!(texts(&after), ["kept"]);
    assert_eq!(space.active_transactions(), 0);
    assert_eq!(space.stats().transactions_aborted, 1);
}

#[test]
fn transaction_helper_commits_on_ok_and_rolls_back_on_err() {
    let space = Space::open_in_memory().unwrap();
    let keys = space
        .create_container(
            ContainerDefinition::named("keys").obligatory(CoordinatorSpec::new(CoordinatorKind::Key)),
            RequestContext::new(),
        )
        .unwrap();

    space
        .transaction(|tx| {
            space.write(
                keys.id,
                vec![WriteEntry::new(1).with(CoordinationData::key("a"))],
                RequestContext::new().transaction(tx),
            )
        })
        .unwrap();

    let err = space
        .transaction(|tx| {
            let ctx = RequestContext::new().transaction(tx);
            space.write(
                keys.id,
                vec![WriteEntry::new(2).with(CoordinationData::key("b"))],
                ctx.clone(),
            )?;
            space.write(
                keys.id,
                vec![WriteEntry::new(3).with(CoordinationData::key("a"))],
                ctx.timeout(RequestTimeout::TryOnce),
            )
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }), "{err}");

    assert_eq!(
        space
            .test(keys.id, vec![Selector::key("a")], RequestContext::new())
            .unwrap(),
        1
    );
    let missing = space
        .read(
            keys.id,
            vec![Selector::key("b")],
            RequestContext::new().timeout(RequestTimeout::Zero),
        )
        .unwrap_err();
    assert!(matches!(missing, CoreError::CountNotMet { .. }), "{missing}");
}

#[test]
fn blocked_take_wakes_on_write() {
    let space = Arc::new(Space::open_in_memory().unwrap());
    let queue = space
        .create_container(
            ContainerDefinition::named("queue").obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
            RequestContext::new(),
        )
        .unwrap();

    let taker = {
        let space = Arc::clone(&space);
        thread::spawn(move || {
            space.take(
                queue.id,
                vec![Selector::fifo(Count::Exactly(1))],
                RequestContext::new().timeout(RequestTimeout::millis(5_000)),
            )
        })
    };

    wait_until("the take to park", || space.parked_requests() == 1);
    space
        .write(queue.id, vec![WriteEntry::new("job")], RequestContext::new())
        .unwrap();

    let taken = taker.join().unwrap().unwrap();
    assert_eq!(texts(&taken), ["job"]);
    assert_eq!(space.parked_requests(), 0);
    assert!(space.stats().tasks_blocked >= 1);
}

#[test]
fn uncommitted_write_wakes_only_its_own_transaction() {
    let space = Space::open_in_memory().unwrap();
    let queue = space
        .create_container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
            RequestContext::new(),
        )
        .unwrap();

    let outsider = space
        .submit(
            Operation::Read {
                container: queue.id,
                selectors: vec![Selector::fifo(Count::Exactly(1))],
            },
            RequestContext::new().timeout(RequestTimeout::millis(5_000)),
        )
        .unwrap();
    wait_until("the read to park", || space.parked_requests() == 1);

    let tx = space.begin_transaction().unwrap();
    space
        .write(
            queue.id,
            vec![WriteEntry::new("pending")],
            RequestContext::new().transaction(tx),
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!outsider.is_done());

    space.commit_transaction(tx).unwrap();
    let read = outsider.wait().unwrap().into_entries();
    assert_eq!(texts(&read), ["pending"]);
}

#[test]
fn lock_wait_cycle_is_reported_and_resolved_by_rollback() {
    let space = Space::with_config(Config::default().deadlock_detection(true)).unwrap();
    let keys = space
        .create_container(
            ContainerDefinition::named("keys").obligatory(CoordinatorSpec::new(CoordinatorKind::Key)),
            RequestContext::new(),
        )
        .unwrap();
    space
        .write(
            keys.id,
            vec![
                WriteEntry::new("a").with(CoordinationData::key("a")),
                WriteEntry::new("b").with(CoordinationData::key("b")),
            ],
            RequestContext::new(),
        )
        .unwrap();

    let tx1 = space.begin_transaction().unwrap();
    let tx2 = space.begin_transaction().unwrap();
    let ctx1 = RequestContext::new().transaction(tx1);
    let ctx2 = RequestContext::new().transaction(tx2);
    space.take(keys.id, vec![Selector::key("a")], ctx1.clone()).unwrap();
    space.take(keys.id, vec![Selector::key("b")], ctx2.clone()).unwrap();

    let take = |key: &str| Operation::Take {
        container: keys.id,
        selectors: vec![Selector::key(key)],
    };
    let first = space
        .submit(take("b"), ctx1.timeout(RequestTimeout::millis(5_000)))
        .unwrap();
    let second = space
        .submit(take("a"), ctx2.timeout(RequestTimeout::millis(5_000)))
        .unwrap();

    wait_until("the cycle", || !space.deadlock_cycles().is_empty());
    let cycle = &space.deadlock_cycles()[0];
    assert!(cycle.transactions.contains(&tx1));
    assert!(cycle.transactions.contains(&tx2));

    space.rollback_transaction(tx1).unwrap();
    assert!(first.wait().is_err());
    let won = second.wait().unwrap().into_entries();
    assert_eq!(texts(&won), ["a"]);
    space.commit_transaction(tx2).unwrap();

    wait_until("the graph to drain", || space.deadlock_cycles().is_empty());
    assert_eq!(
        space
            .test(keys.id, vec![Selector::any(Count::Max)], RequestContext::new())
            .unwrap(),
        1
    );
}

#[test]
fn destroyed_container_fails_parked_requests() {
    let space = Space::open_in_memory().unwrap();
    let queue = space
        .create_container(ContainerDefinition::named("doomed"), RequestContext::new())
        .unwrap();

    let reader = space
        .submit(
            Operation::Read {
                container: queue.id,
                selectors: vec![Selector::any(Count::Exactly(1))],
            },
            RequestContext::new().timeout(RequestTimeout::millis(5_000)),
        )
        .unwrap();
    wait_until("the read to park", || space.parked_requests() == 1);

    space.destroy_container(queue.id, RequestContext::new()).unwrap();
    assert!(reader.wait().is_err());
    assert!(matches!(
        space.lookup_container("doomed", RequestContext::new()),
        Err(CoreError::ContainerNotFound { .. })
    ));
}

#[test]
fn persistent_space_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let (space_id, jobs) = {
        let space = Space::open(dir.path()).unwrap();
        let jobs = space
            .create_container(
                ContainerDefinition::named("jobs")
                    .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
                    .optional(CoordinatorSpec::new(CoordinatorKind::Label)),
                RequestContext::new(),
            )
            .unwrap();
        space
            .write(
                jobs.id,
                vec![
                    WriteEntry::new("first").with(CoordinationData::label("red")),
                    WriteEntry::new("second"),
                    WriteEntry::new("third").with(CoordinationData::label("red")),
                ],
                RequestContext::new(),
            )
            .unwrap();
        space
            .take(jobs.id, vec![Selector::fifo(Count::Exactly(1))], RequestContext::new())
            .unwrap();

        let tx = space.begin_transaction().unwrap();
        space
            .write(
                jobs.id,
                vec![WriteEntry::new("never committed")],
                RequestContext::new().transaction(tx),
            )
            .unwrap();
        let id = space.space_id();
        space.close().unwrap();
        (id, jobs)
    };

    let space = Space::open(dir.path()).unwrap();
    assert_eq!(space.space_id(), space_id);
    let found = space.lookup_container("jobs", RequestContext::new()).unwrap();
    assert_eq!(found.id, jobs.id);

    let remaining = space
        .read(jobs.id, vec![Selector::fifo(Count::All)], RequestContext::new())
        .unwrap();
    assert_eq!(texts(&remaining), ["second", "third"]);

    let red = space
        .read(
            jobs.id,
            vec![Selector::label("red", Count::All)],
            RequestContext::new(),
        )
        .unwrap();
    assert_eq!(texts(&red), ["third"]);

    space
        .write(jobs.id, vec![WriteEntry::new("fourth")], RequestContext::new())
        .unwrap();
    let ids: Vec<_> = space
        .read(jobs.id, vec![Selector::fifo(Count::All)], RequestContext::new())
        .unwrap()
        .iter()
        .map(|e| e.id())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len());
}

#[test]
fn destroyed_container_stays_destroyed_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let space = Space::open(dir.path()).unwrap();
        let c = space
            .create_container(ContainerDefinition::named("gone"), RequestContext::new())
            .unwrap();
        space
            .write(c.id, vec![WriteEntry::new(1)], RequestContext::new())
            .unwrap();
        space.destroy_container(c.id, RequestContext::new()).unwrap();
        space
            .create_container(ContainerDefinition::named("kept"), RequestContext::new())
            .unwrap();
    }

    let space = Space::open(dir.path()).unwrap();
    assert_eq!(space.containers().len(), 1);
    assert!(space.lookup_container("gone", RequestContext::new()).is_err());
    assert!(space.lookup_container("kept", RequestContext::new()).is_ok());
}

struct Guard {
    writes: AtomicUsize,
}

impl Aspect for Guard {
    fn intercepts(&self, kind: OperationKind) -> bool {
        kind == OperationKind::Write
    }

    fn pre(&self, call: &AspectCall<'_>) -> AspectResult {
        if call.context.subject.as_deref() == Some("mallory") {
            AspectResult::NotOk(CoreError::access_denied("mallory may not write"))
        } else {
            AspectResult::Ok
        }
    }

    fn post(&self, _call: &AspectCall<'_>, affected: &[Arc<Entry>]) -> AspectResult {
        self.writes.fetch_add(affected.len(), Ordering::SeqCst);
        AspectResult::Ok
    }
}

#[test]
fn container_aspect_vetoes_and_observes_writes() {
    let space = Space::open_in_memory().unwrap();
    let inbox = space
        .create_container(ContainerDefinition::named("inbox"), RequestContext::new())
        .unwrap();
    let guard = Arc::new(Guard {
        writes: AtomicUsize::new(0),
    });
    let id = space
        .add_aspect(Some(inbox.id), guard.clone(), RequestContext::new())
        .unwrap();
    assert_eq!(space.aspect_count(), 1);

    space
        .write(
            inbox.id,
            vec![WriteEntry::new("hi"), WriteEntry::new("there")],
            RequestContext::new().subject("alice"),
        )
        .unwrap();
    let err = space
        .write(
            inbox.id,
            vec![WriteEntry::new("spam")],
            RequestContext::new().subject("mallory"),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::AccessDenied { .. }), "{err}");
    assert_eq!(guard.writes.load(Ordering::SeqCst), 2);

    space.remove_aspect(id, RequestContext::new()).unwrap();
    space
        .write(
            inbox.id,
            vec![WriteEntry::new("spam")],
            RequestContext::new().subject("mallory"),
        )
        .unwrap();
    assert_eq!(
        space
            .test(inbox.id, vec![Selector::any(Count::All)], RequestContext::new())
            .unwrap(),
        3
    );
}

#[test]
fn access_rules_gate_operations_and_hide_entries() {
    let access = RuleAccessManager::new(vec![
        AccessRule::permit().subject("admin"),
        AccessRule::permit()
            .subject("reader")
            .container("docs")
            .operation(OperationKind::Read)
            .entries(Value::record([("public", Value::Bool(true))])),
        AccessRule::permit()
            .subject("reader")
            .operation(OperationKind::LookupContainer),
    ]);
    let space = Space::builder()
        .access_manager(Arc::new(access))
        .open()
        .unwrap();

    let admin = || RequestContext::new().subject("admin");
    let reader = || RequestContext::new().subject("reader");

    let docs = space
        .create_container(ContainerDefinition::named("docs"), admin())
        .unwrap();
    space
        .write(
            docs.id,
            vec![
                WriteEntry::new(Value::record([("public", Value::Bool(true))])),
                WriteEntry::new(Value::record([("public", Value::Bool(false))])),
            ],
            admin(),
        )
        .unwrap();

    assert_eq!(space.lookup_container("docs", reader()).unwrap().id, docs.id);
    let visible = space
        .read(docs.id, vec![Selector::any(Count::Max)], reader())
        .unwrap();
    assert_eq!(visible.len(), 1);

    let err = space
        .write(docs.id, vec![WriteEntry::new("x")], reader())
        .unwrap_err();
    assert!(matches!(err, CoreError::AccessDenied { .. }), "{err}");
    let err = space
        .create_container(ContainerDefinition::named("mine"), reader())
        .unwrap_err();
    assert!(matches!(err, CoreError::AccessDenied { .. }), "{err}");
    assert!(space.lookup_container("mine", admin()).is_err());
}

#[test]
fn closing_fails_parked_requests() {
    let space = Space::open_in_memory().unwrap();
    let c = space
        .create_container(ContainerDefinition::new(), RequestContext::new())
        .unwrap();
    let handle = space
        .submit(
            Operation::Take {
                container: c.id,
                selectors: vec![Selector::any(Count::Exactly(1))],
            },
            RequestContext::new(),
        )
        .unwrap();
    wait_until("the take to park", || space.parked_requests() == 1);

    space.close().unwrap();
    assert!(handle.wait().is_err());
    assert!(!space.is_open());
    assert!(space.begin_transaction().is_err());
}
