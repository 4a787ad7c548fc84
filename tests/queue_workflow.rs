// tests/queue_workflow.rs

//! Queue, kill, resume and completion workflows against a scripted spawner.

mod common;

use buildterm::{
    BufferKind, Classification, Direction, LineCategory, EnqueueOutcome, FixedDecision, JobStatus, KillOutcome,
    KilledHeadPolicy, LineTag, Outcome, ProcessManager, ProcessState, ResumeDecision,
    SourceKind, TerminalConfig,
};
use common::{FakeSpawner, SETTLE, Script, counting_callback, test_config};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn manager_with(config: TerminalConfig, spawner: &FakeSpawner) -> ProcessManager {
    ProcessManager::new(config)
        .unwrap()
        .with_spawner(spawner.clone())
}

fn manager(spawner: &FakeSpawner) -> ProcessManager {
    manager_with(test_config(), spawner)
}

/// Poll until `condition` holds
fn poll_until(manager: &ProcessManager, condition: impl Fn(&ProcessManager) -> bool) {
    let deadline = Instant::now() + SETTLE;
    while !condition(manager) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        manager.poll();
        thread::sleep(Duration::from_millis(5));
    }
}

fn texts(manager: &ProcessManager, kind: BufferKind) -> Vec<String> {
    manager.lines(kind).into_iter().map(|line| line.text).collect()
}

/// Start `build foo` and interrupt it once its output has been decoded
fn killed_foo(manager: &ProcessManager) {
    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::Started
    );
    poll_until(manager, |m| m.lines(BufferKind::Process).len() >= 2);
    assert_eq!(manager.kill_active().unwrap(), KillOutcome::Interrupted);
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(manager.state(), ProcessState::Killed { resumable: true });
}

#[test]
fn test_job_completes_and_runs_callback() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::exits("compiling\nfoo.c: warning: unused variable\n", 0));
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    let outcome = manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Started);
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(*counter.lock(), 1);
    assert_eq!(manager.state(), ProcessState::Completed(Outcome::Success));
    assert!(manager.jobs().is_empty());

    let history = manager.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobStatus::Succeeded);

    assert_eq!(
        texts(&manager, BufferKind::Process),
        vec![
            "*** build foo ***",
            "compiling",
            "foo.c: warning: unused variable",
            "*** process completed ***",
        ]
    );
    assert!(
        texts(&manager, BufferKind::Warning).contains(&"foo.c: warning: unused variable".to_string())
    );
    assert!(
        texts(&manager, BufferKind::Info)
            .contains(&"*** Total warnings count for merge = 1".to_string())
    );
    assert_eq!(manager.status_message(), "*** process completed ***");

    let report = manager.last_report().unwrap();
    assert_eq!(report.source, SourceKind::Process);
    assert_eq!(report.warnings, 1);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.outcome, Some(Outcome::Success));
}

#[test]
fn test_duplicate_is_already_queued() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(""));
    let manager = manager(&spawner);

    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::Started
    );
    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::AlreadyQueued
    );
    assert_eq!(
        manager.enqueue("bar", "build bar", None).unwrap(),
        EnqueueOutcome::Queued
    );
    assert_eq!(
        manager.enqueue("bar", "build bar", None).unwrap(),
        EnqueueOutcome::AlreadyQueued
    );

    let jobs = manager.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].status, JobStatus::Running);
    assert_eq!(jobs[1].status, JobStatus::Pending);
    assert_eq!(spawner.commands(), vec!["build foo"]);
}

#[test]
fn test_same_package_new_command_is_requeued() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(""));
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    manager.enqueue("foo", "build foo", None).unwrap();
    manager
        .enqueue("bar", "build bar", Some(counting_callback(&counter)))
        .unwrap();
    manager.enqueue("baz", "build baz", None).unwrap();

    assert_eq!(
        manager.enqueue("bar", "build bar -v", None).unwrap(),
        EnqueueOutcome::Requeued
    );

    let commands: Vec<_> = manager.jobs().into_iter().map(|job| job.command).collect();
    assert_eq!(commands, vec!["build foo", "build baz", "build bar -v"]);
    // Stale entries are dropped silently
    assert_eq!(*counter.lock(), 0);
}

#[test]
fn test_reorder_never_moves_head() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(""));
    let manager = manager(&spawner);

    manager.enqueue("foo", "build foo", None).unwrap();
    manager.enqueue("bar", "build bar", None).unwrap();
    manager.enqueue("baz", "build baz", None).unwrap();

    let jobs = manager.jobs();
    let (foo, bar) = (jobs[0].id, jobs[1].id);

    let err = manager.reorder(foo, Direction::Down).unwrap_err();
    assert!(err.is_state_violation());
    let err = manager.reorder(bar, Direction::Up).unwrap_err();
    assert!(err.is_state_violation());

    manager.reorder(bar, Direction::Down).unwrap();
    let names: Vec<_> = manager
        .jobs()
        .into_iter()
        .map(|job| job.package_name)
        .collect();
    assert_eq!(names, vec!["foo", "baz", "bar"]);

    assert!(manager.reorder(bar, Direction::Down).is_err());
    assert_eq!(manager.jobs()[0].id, foo);
}

#[test]
fn test_kill_then_resume_skipping_first() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(">>> emerge (1 of 3) dev-libs/foo-1.0 to /\n"));
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();
    poll_until(&manager, |m| m.lines(BufferKind::Process).len() >= 2);

    assert_eq!(manager.kill_active().unwrap(), KillOutcome::Interrupted);
    assert!(manager.run_until_idle(Some(SETTLE)));

    let jobs = manager.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Killed);
    assert_eq!(*counter.lock(), 0);
    assert_eq!(manager.status_message(), "*** process killed ***");
    assert!(texts(&manager, BufferKind::Info).contains(&"*** process killed ***".to_string()));

    let options = manager.resume_options();
    assert!(options.resume);
    assert!(options.skip_first);
    assert!(!options.skip_queue);

    let report = manager.last_report().unwrap();
    assert_eq!(report.outcome, None);

    manager.resume(true).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(
        spawner.commands(),
        vec!["build foo", "build foo --resume --skipfirst"]
    );
    assert_eq!(*counter.lock(), 1);
    assert!(manager.jobs().is_empty());
    assert_eq!(manager.history()[0].status, JobStatus::Succeeded);
}

#[test]
fn test_kill_without_terminal_is_hard_kill() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("working\n").without_terminal());
    let manager = manager(&spawner);

    manager.enqueue("foo", "build foo", None).unwrap();
    assert_eq!(manager.kill_active().unwrap(), KillOutcome::Terminated);
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(manager.state(), ProcessState::Killed { resumable: false });

    // A hard-killed head blocks the queue until skipped
    assert_eq!(
        manager.enqueue("bar", "build bar", None).unwrap(),
        EnqueueOutcome::Queued
    );
    assert_eq!(spawner.commands(), vec!["build foo"]);

    let skipped = manager.skip_and_advance().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(spawner.commands(), vec!["build foo", "build bar"]);

    let history = manager.history();
    assert_eq!(history[0].id, skipped);
    assert_eq!(history[0].status, JobStatus::Skipped);
    assert_eq!(history[1].status, JobStatus::Succeeded);
}

#[test]
fn test_kill_with_nothing_running() {
    let manager = manager(&FakeSpawner::new());
    let err = manager.kill_active().unwrap_err();
    assert!(err.is_state_violation());
    assert!(manager.resume(false).unwrap_err().is_state_violation());
    assert!(manager.skip_and_advance().unwrap_err().is_state_violation());
}

#[test]
fn test_enqueue_killed_head_resume() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("start\n"));
    let manager = manager(&spawner).with_prompt(FixedDecision(ResumeDecision::Resume));
    killed_foo(&manager);

    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::Resumed
    );
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(spawner.commands(), vec!["build foo", "build foo --resume"]);
    assert_eq!(manager.history().len(), 1);
}

#[test]
fn test_enqueue_killed_head_execute() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("start\n"));
    let counter = Arc::new(Mutex::new(0));

    let manager = manager(&spawner).with_prompt(|_: &buildterm::JobInfo| ResumeDecision::Execute);
    manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();
    poll_until(&manager, |m| m.lines(BufferKind::Process).len() >= 2);
    manager.kill_active().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::Started
    );
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(spawner.commands(), vec!["build foo", "build foo"]);
    // The discarded run's callback never fires
    assert_eq!(*counter.lock(), 0);
    assert_eq!(manager.history().len(), 1);
}

#[test]
fn test_enqueue_killed_head_cancel() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("start\n"));
    let manager = manager(&spawner).with_prompt(FixedDecision(ResumeDecision::Cancel));
    killed_foo(&manager);

    assert_eq!(
        manager.enqueue("foo", "build foo", None).unwrap(),
        EnqueueOutcome::Cancelled
    );
    let jobs = manager.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Killed);
    assert_eq!(spawner.commands(), vec!["build foo"]);
}

#[test]
fn test_killed_head_resumes_when_other_job_arrives() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("start\n"));
    let manager = manager(&spawner);
    killed_foo(&manager);

    assert_eq!(
        manager.enqueue("bar", "build bar", None).unwrap(),
        EnqueueOutcome::Queued
    );
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(
        spawner.commands(),
        vec!["build foo", "build foo --resume", "build bar"]
    );
    let names: Vec<_> = manager
        .history()
        .into_iter()
        .map(|summary| summary.package_name)
        .collect();
    assert_eq!(names, vec!["foo", "bar"]);
}

#[test]
fn test_killed_head_skip_policy() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("start\n"));
    let mut config = test_config();
    config.resume.killed_head = KilledHeadPolicy::Skip;
    let manager = manager_with(config, &spawner);
    let counter = Arc::new(Mutex::new(0));

    manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();
    poll_until(&manager, |m| m.lines(BufferKind::Process).len() >= 2);
    manager.kill_active().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(
        manager.enqueue("bar", "build bar", None).unwrap(),
        EnqueueOutcome::Started
    );
    // Skipping runs the callback
    assert_eq!(*counter.lock(), 1);
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(spawner.commands(), vec!["build foo", "build bar"]);
    assert_eq!(manager.history()[0].status, JobStatus::Skipped);
}

#[test]
fn test_skip_runs_callback_remove_does_not() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(""));
    let manager = manager(&spawner);
    let skipped = Arc::new(Mutex::new(0));
    let removed = Arc::new(Mutex::new(0));

    manager
        .enqueue("foo", "build foo", Some(counting_callback(&skipped)))
        .unwrap();
    manager
        .enqueue("bar", "build bar", Some(counting_callback(&removed)))
        .unwrap();
    manager.enqueue("baz", "build baz", None).unwrap();

    let bar = manager.jobs()[1].id;
    manager.remove(bar).unwrap();
    assert_eq!(*removed.lock(), 0);
    assert!(manager.remove(bar).unwrap_err().is_state_violation());

    // Running heads cannot be removed or skipped
    let foo = manager.jobs()[0].id;
    assert!(manager.remove(foo).unwrap_err().is_state_violation());
    assert!(manager.skip_and_advance().unwrap_err().is_state_violation());

    manager.kill_active().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(manager.skip_and_advance().unwrap(), foo);
    assert_eq!(*skipped.lock(), 1);

    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(spawner.commands(), vec!["build foo", "build baz"]);
    assert_eq!(*removed.lock(), 0);
}

#[test]
fn test_spawn_failure_advances_queue() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs(""));
    spawner.push(Script::fails_to_spawn());
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    manager.enqueue("foo", "build foo", None).unwrap();
    manager
        .enqueue("bad", "build bad", Some(counting_callback(&counter)))
        .unwrap();
    manager.enqueue("baz", "build baz", None).unwrap();

    manager.kill_active().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));
    manager.skip_and_advance().unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(
        spawner.commands(),
        vec!["build foo", "build bad", "build baz"]
    );
    assert_eq!(*counter.lock(), 1);

    let statuses: Vec<_> = manager
        .history()
        .into_iter()
        .map(|summary| (summary.package_name, summary.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("foo".to_string(), JobStatus::Skipped),
            ("bad".to_string(), JobStatus::Failed),
            ("baz".to_string(), JobStatus::Succeeded),
        ]
    );

    let notice = manager
        .lines(BufferKind::Process)
        .into_iter()
        .find(|line| line.tag == Some(LineTag::Error))
        .unwrap();
    assert!(notice.text.contains("scripted spawn failure"));
}

#[test]
fn test_spawn_failure_of_only_job() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::fails_to_spawn());
    let manager = manager(&spawner);

    assert_eq!(
        manager.enqueue("bad", "build bad", None).unwrap(),
        EnqueueOutcome::Queued
    );
    assert!(manager.run_until_idle(Some(SETTLE)));
    assert_eq!(manager.state(), ProcessState::Completed(Outcome::Failure));
    assert!(manager.jobs().is_empty());

    let report = manager.last_report().unwrap();
    assert_eq!(report.outcome, Some(Outcome::Failure));
    assert_eq!(report.command.as_deref(), Some("build bad"));
}

#[test]
fn test_hard_failure_fails_job() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::exits("!!! ERROR: dev-libs/foo-1.0 failed.\n", 0));
    spawner.push(Script::exits("plain output\n", 2));
    let manager = manager(&spawner);

    manager.enqueue("foo", "build foo", None).unwrap();
    manager.enqueue("bar", "build bar", None).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    let history = manager.history();
    assert_eq!(history[0].status, JobStatus::Failed);
    assert_eq!(history[1].status, JobStatus::Failed);

    let report = manager.last_report().unwrap();
    assert!(!report.hard_failure);
    assert_eq!(report.exit_code, Some(2));
    assert_eq!(manager.state(), ProcessState::Completed(Outcome::Failure));

    assert!(
        texts(&manager, BufferKind::Info)
            .contains(&"!!! ERROR: dev-libs/foo-1.0 failed.".to_string())
    );
    let error_line = manager
        .lines(BufferKind::Info)
        .into_iter()
        .find(|line| line.text.starts_with("!!! ERROR"))
        .unwrap();
    assert_eq!(error_line.tag, Some(LineTag::Error));
}

#[test]
fn test_all_output_decoded_before_completion() {
    let mut output = String::new();
    for i in 0..2000 {
        output.push_str(&format!("line {} of the build log\n", i));
    }

    let spawner = FakeSpawner::new();
    spawner.push(Script::exits(&output, 0));
    let manager = manager(&spawner);

    manager.enqueue("big", "build big", None).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    let report = manager.last_report().unwrap();
    assert_eq!(report.bytes_read, output.len() as u64);
    assert_eq!(report.bytes_decoded, output.len() as u64);

    let lines = texts(&manager, BufferKind::Process);
    // Command echo, 2000 lines, completion note
    assert_eq!(lines.len(), 2002);
    assert_eq!(lines[2000], "line 1999 of the build log");
    assert_eq!(lines[2001], "*** process completed ***");
}

#[test]
fn test_pretend_run_output() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::exits("[ebuild  N ] dev-libs/foo-1.0\n", 0));
    spawner.push(Script::exits("[ebuild  N ] dev-libs/bar-2.0\n", 0));
    let manager = manager(&spawner);

    manager.enqueue("foo", "emerge -pv foo", None).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));
    manager.enqueue("bar", "emerge --pretend bar", None).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    let report = manager.last_report().unwrap();
    assert!(report.pretend);
    assert_eq!(report.command_start, 3);

    let own: Vec<_> = manager
        .last_command_output()
        .into_iter()
        .map(|line| line.text)
        .collect();
    assert_eq!(
        own,
        vec![
            "*** emerge --pretend bar ***",
            "[ebuild  N ] dev-libs/bar-2.0",
            "*** process completed ***",
        ]
    );
}

#[test]
fn test_callback_runs_once_across_resume() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::runs("first attempt\n"));
    spawner.push(Script::runs("second attempt\n"));
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();
    for _ in 0..2 {
        poll_until(&manager, |m| {
            m.last_command_output().len() >= 2 && m.state() == ProcessState::Running
        });
        manager.kill_active().unwrap();
        assert!(manager.run_until_idle(Some(SETTLE)));
        manager.resume(false).unwrap();
    }
    assert!(manager.run_until_idle(Some(SETTLE)));

    assert_eq!(spawner.commands().len(), 3);
    assert_eq!(*counter.lock(), 1);
    assert_eq!(manager.history().len(), 1);
}

#[test]
fn test_exit_after_output_closed_is_not_a_kill() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::exits("installing\n", 0).lingering(Duration::from_millis(300)));
    let manager = manager(&spawner);
    let counter = Arc::new(Mutex::new(0));

    manager
        .enqueue("foo", "build foo", Some(counting_callback(&counter)))
        .unwrap();

    let deadline = Instant::now() + SETTLE;
    let mut slowest = Duration::ZERO;
    while !manager.is_settled() {
        assert!(Instant::now() < deadline, "job never completed");
        let started = Instant::now();
        manager.poll();
        slowest = slowest.max(started.elapsed());
        thread::sleep(Duration::from_millis(5));
    }

    // Waiting for the exit status happens across ticks, not inside one
    assert!(slowest < Duration::from_millis(200), "poll blocked for {:?}", slowest);
    assert_eq!(*counter.lock(), 1);
    assert_eq!(manager.state(), ProcessState::Completed(Outcome::Success));
    assert_eq!(manager.history()[0].status, JobStatus::Succeeded);

    let report = manager.last_report().unwrap();
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.outcome, Some(Outcome::Success));
    assert_eq!(
        texts(&manager, BufferKind::Process).last().unwrap(),
        "*** process completed ***"
    );
}

#[test]
fn test_custom_classifier() {
    let spawner = FakeSpawner::new();
    spawner.push(Script::exits("W: disk low\nE: broken\nfoo.c: warning: ignored\n", 0));
    let manager = manager(&spawner).with_classifier(|line: &str| {
        if line.starts_with("W: ") {
            Classification::new(LineCategory::Warning)
        } else if line.starts_with("E: ") {
            Classification::fatal(LineCategory::Error)
        } else {
            Classification::plain()
        }
    });

    manager.enqueue("foo", "build foo", None).unwrap();
    assert!(manager.run_until_idle(Some(SETTLE)));

    let warnings = texts(&manager, BufferKind::Warning);
    assert!(warnings.contains(&"W: disk low".to_string()));
    assert!(!warnings.contains(&"foo.c: warning: ignored".to_string()));
    assert!(texts(&manager, BufferKind::Info).contains(&"E: broken".to_string()));

    let report = manager.last_report().unwrap();
    assert_eq!(report.warnings, 1);
    assert!(report.hard_failure);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(manager.history()[0].status, JobStatus::Failed);
}
