use std::time::Duration;

use remote_exec::config::LogConfig;
use remote_exec::error::ExecError;
use remote_exec::job::{Job, JobStatus};
use remote_exec::worker::JobExecutor;
use tempfile::TempDir;

/// Create a test executor writing chunks into `dir`
fn test_executor(dir: &TempDir, chunk_threshold: usize) -> JobExecutor {
    JobExecutor::new(LogConfig {
        dir: dir.path().to_path_buf(),
        chunk_threshold,
        ..LogConfig::default()
    })
}

fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Wait until the job leaves `Running`
async fn wait_terminal(job: &Job) -> JobStatus {
    let mut rx = job.watch_status();
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| s.is_terminal()))
        .await
        .expect("job did not finish in time")
        .expect("status channel closed");
    *status
}

#[tokio::test]
async fn test_execute_simple_command() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor
        .run("echo", &args(&["hello"]), "alice@example.com")
        .unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);
    assert_eq!(job.exit_code(), Some(0));
    assert_eq!(job.owner, "alice@example.com");

    let output = job.broadcaster().subscribe().await.collect().await.unwrap();
    assert_eq!(output, b"hello\n");
}

#[tokio::test]
async fn test_execute_empty_output() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor.run("true", &[], "alice@example.com").unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);
    let output = job.broadcaster().subscribe().await.collect().await.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_nonzero_exit_still_completes() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor
        .run("sh", &args(&["-c", "exit 3"]), "alice@example.com")
        .unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);
    assert_eq!(job.exit_code(), Some(3));
}

#[tokio::test]
async fn test_stderr_is_captured() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor
        .run(
            "sh",
            &args(&["-c", "echo out; echo 'error message' >&2"]),
            "alice@example.com",
        )
        .unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);
    let output = job.broadcaster().subscribe().await.collect().await.unwrap();
    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("out\n"));
    assert!(output.contains("error message\n"));
}

#[tokio::test]
async fn test_large_output_spills_to_chunks() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 4096);

    let job = executor
        .run("seq", &args(&["1", "20000"]), "alice@example.com")
        .unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);

    let snapshot = job.broadcaster().snapshot().await;
    assert!(!snapshot.chunks.is_empty());
    for (i, path) in snapshot.chunks.iter().enumerate() {
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}_{}.log", job.id, i)
        );
    }

    let output = job.broadcaster().subscribe().await.collect().await.unwrap();
    let expected: String = (1..=20000).map(|i| format!("{}\n", i)).collect();
    assert_eq!(String::from_utf8(output).unwrap(), expected);
}

#[tokio::test]
async fn test_spawn_failure_creates_no_job() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let result = executor.run("nonexistent_command_12345", &[], "alice@example.com");

    assert!(matches!(result, Err(ExecError::SpawnFailed { .. })));
}

#[tokio::test]
async fn test_stop_running_job() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor
        .run("sleep", &args(&["30"]), "alice@example.com")
        .unwrap();
    let reader = job.broadcaster().subscribe().await;
    let process = job.process().unwrap();
    assert!(process.pid().is_some());
    assert!(process.is_alive());

    executor.stop(&job).await.unwrap();

    assert_eq!(job.status(), JobStatus::Stopped);
    // The reader's stream ends as soon as the job is stopped
    let output = tokio::time::timeout(Duration::from_secs(5), reader.collect())
        .await
        .expect("reader was not closed")
        .unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_second_stop_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor
        .run("sleep", &args(&["30"]), "alice@example.com")
        .unwrap();

    executor.stop(&job).await.unwrap();
    let second = executor.stop(&job).await;

    assert!(matches!(
        second,
        Err(ExecError::AlreadyTerminal(JobStatus::Stopped))
    ));
    assert_eq!(job.status(), JobStatus::Stopped);
}

#[tokio::test]
async fn test_stop_completed_job_fails() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);

    let job = executor.run("true", &[], "alice@example.com").unwrap();
    assert_eq!(wait_terminal(&job).await, JobStatus::Completed);

    assert!(matches!(
        executor.stop(&job).await,
        Err(ExecError::AlreadyTerminal(JobStatus::Completed))
    ));
}

#[tokio::test]
async fn test_stop_without_process_fails() {
    let dir = TempDir::new().unwrap();
    let executor = test_executor(&dir, 1024);
    let job = Job::new(
        "never-started".to_string(),
        Vec::new(),
        "alice@example.com".to_string(),
        executor.log_config(),
    );

    assert!(matches!(
        executor.stop(&job).await,
        Err(ExecError::NoProcess)
    ));
    assert_eq!(job.status(), JobStatus::Running);
}

#[tokio::test]
async fn test_persistence_failure_errors_job_and_kills_process() {
    let dir = TempDir::new().unwrap();
    // A regular file where the chunk directory should be
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"").unwrap();
    let executor = JobExecutor::new(LogConfig {
        dir: blocker,
        chunk_threshold: 1,
        ..LogConfig::default()
    });

    let job = executor
        .run(
            "sh",
            &args(&["-c", "while true; do echo tick; sleep 0.01; done"]),
            "alice@example.com",
        )
        .unwrap();

    assert_eq!(wait_terminal(&job).await, JobStatus::Errored);

    // The process is killed as cleanup
    let process = job.process().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while process.is_alive() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process was not killed");

    // Readers see a clean end of stream
    let output = job.broadcaster().subscribe().await.collect().await.unwrap();
    assert!(output.starts_with(b"tick\n"));
}
