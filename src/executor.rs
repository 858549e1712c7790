use crate::config::TranscoderConfig;
use crate::hardware::HardwareInfo;
use crate::planner::ExecutionStrategy;
use crate::types::{
    ExecutionResult, ExecutionSummary, MediaInfo, Task, TaskKind, TaskStatus,
};
use crate::workers;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};

/// Overall progress callback: (terminal task count, total task count).
pub type ProgressHook = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Runs the task set under per-class concurrency limits.
///
/// Video, audio, and subtitle tasks each acquire a permit from their class
/// semaphore before spawning a child; the sprite task runs without one.
/// A failing task never cancels its peers.
pub struct ParallelExecutor {
    media_info: Arc<MediaInfo>,
    hardware_info: Arc<HardwareInfo>,
    config: Arc<TranscoderConfig>,
    strategy: ExecutionStrategy,
    video_semaphore: Arc<Semaphore>,
    audio_semaphore: Arc<Semaphore>,
    subtitle_semaphore: Arc<Semaphore>,
    cancelled: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    results: Mutex<Vec<ExecutionResult>>,
}

impl ParallelExecutor {
    pub fn new(
        media_info: Arc<MediaInfo>,
        hardware_info: Arc<HardwareInfo>,
        config: Arc<TranscoderConfig>,
        strategy: ExecutionStrategy,
    ) -> Self {
        info!(
            "executor ready: video={}, audio={}, subtitle={}",
            strategy.video_concurrency, strategy.audio_concurrency, strategy.subtitle_concurrency
        );
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            media_info,
            hardware_info,
            config,
            strategy,
            video_semaphore: Arc::new(Semaphore::new(strategy.video_concurrency as usize)),
            audio_semaphore: Arc::new(Semaphore::new(strategy.audio_concurrency as usize)),
            subtitle_semaphore: Arc::new(Semaphore::new(strategy.subtitle_concurrency as usize)),
            cancelled: AtomicBool::new(false),
            shutdown_tx,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Execute every task, gathering all classes concurrently. If the
    /// strategy calls for it, the sprite task is held back until the
    /// gather point so it stays clear of the peak resource window.
    pub async fn execute(
        &self,
        video_tasks: &[Arc<Task>],
        audio_tasks: &[Arc<Task>],
        subtitle_tasks: &[Arc<Task>],
        sprite_task: Option<&Arc<Task>>,
        progress: Option<ProgressHook>,
    ) -> ExecutionSummary {
        let started = Instant::now();
        let total = video_tasks.len()
            + audio_tasks.len()
            + subtitle_tasks.len()
            + usize::from(sprite_task.is_some());

        info!("starting parallel execution of {total} tasks");

        let mut futures = Vec::with_capacity(total);
        for task in video_tasks {
            futures.push(self.run_task(task.clone(), total, progress.clone()));
        }
        for task in audio_tasks {
            futures.push(self.run_task(task.clone(), total, progress.clone()));
        }
        for task in subtitle_tasks {
            futures.push(self.run_task(task.clone(), total, progress.clone()));
        }
        if let Some(task) = sprite_task {
            if !self.strategy.sprite_separate {
                futures.push(self.run_task(task.clone(), total, progress.clone()));
            }
        }

        join_all(futures).await;

        if let Some(task) = sprite_task {
            if self.strategy.sprite_separate {
                info!("executing sprite task separately");
                self.run_task(task.clone(), total, progress.clone()).await;
            }
        }

        let results = self.results.lock().unwrap().clone();
        let completed = results.iter().filter(|r| r.success).count();
        let cancelled = results
            .iter()
            .filter(|r| r.task.state.status() == TaskStatus::Cancelled)
            .count();
        let failed = results.len() - completed - cancelled;

        let summary = ExecutionSummary {
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            cancelled_tasks: cancelled,
            total_duration: started.elapsed().as_secs_f64(),
            results,
        };

        info!(
            "execution complete: {completed}/{total} tasks succeeded in {:.2}s (success rate {:.1}%)",
            summary.total_duration,
            summary.success_rate()
        );

        summary
    }

    async fn run_task(&self, task: Arc<Task>, total: usize, progress: Option<ProgressHook>) {
        let semaphore = match &task.kind {
            TaskKind::Video(_) => Some(&self.video_semaphore),
            TaskKind::Audio(_) => Some(&self.audio_semaphore),
            TaskKind::Subtitle(_) => Some(&self.subtitle_semaphore),
            TaskKind::Sprite(_) => None,
        };
        let _permit = match semaphore {
            Some(semaphore) => Some(semaphore.acquire().await.unwrap()),
            None => None,
        };

        if self.cancelled.load(Ordering::SeqCst) {
            warn!("task {} cancelled before start", task.id);
            task.state.set_status(TaskStatus::Cancelled);
            self.record(
                ExecutionResult {
                    task: task.clone(),
                    success: false,
                    output_path: None,
                    error: Some("Execution cancelled".to_string()),
                    duration: 0.0,
                },
                total,
                &progress,
            );
            return;
        }

        let started = Instant::now();
        task.state.set_status(TaskStatus::Running);
        task.state.mark_started();
        info!("starting task {} ({})", task.id, task.kind.type_name());

        match workers::run_task(&task, &self.media_info, &self.hardware_info, &self.config).await {
            Ok(output_path) => {
                task.state.set_status(TaskStatus::Completed);
                task.state.mark_completed();
                task.state.set_progress(1.0);
                let duration = started.elapsed().as_secs_f64();
                info!("completed task {} in {duration:.2}s", task.id);
                self.record(
                    ExecutionResult {
                        task: task.clone(),
                        success: true,
                        output_path: Some(output_path),
                        error: None,
                        duration,
                    },
                    total,
                    &progress,
                );
            }
            Err(e) => {
                let message = e.to_string();
                task.state.set_status(TaskStatus::Failed);
                task.state.mark_completed();
                task.state.set_error(&message);
                error!("task {} failed: {message}", task.id);
                self.record(
                    ExecutionResult {
                        task: task.clone(),
                        success: false,
                        output_path: None,
                        error: Some(message),
                        duration: started.elapsed().as_secs_f64(),
                    },
                    total,
                    &progress,
                );
            }
        }
    }

    /// Results are appended in completion order under a mutex so the
    /// summary preserves the order tasks reached a terminal state.
    fn record(&self, result: ExecutionResult, total: usize, progress: &Option<ProgressHook>) {
        let completed_so_far = {
            let mut results = self.results.lock().unwrap();
            results.push(result);
            results.len()
        };
        if let Some(hook) = progress {
            hook(completed_so_far, total);
        }
    }

    /// Cooperative cancellation: pending tasks are marked CANCELLED at
    /// dispatch; already-running children are left to finish. Callers that
    /// need immediate termination observe the shutdown signal.
    pub fn cancel(&self) {
        warn!("cancelling execution");
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Broadcast shutdown signal for observers (UI, in-flight drivers).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ExecutionStrategy;
    use crate::testutil::{software_hardware_info, test_media_info};
    use crate::types::VideoSpec;
    use std::path::PathBuf;

    fn broken_video_task(id: &str, stream_index: u32, dir: &std::path::Path) -> Arc<Task> {
        Arc::new(Task::new(
            id,
            PathBuf::from("/media/in.mkv"),
            dir.join(id),
            TaskKind::Video(VideoSpec {
                quality: "720p".to_string(),
                width: 1280,
                height: 720,
                bitrate_kbps: 3000,
                maxrate_kbps: 4500,
                bufsize_kbps: 6000,
                crf: None,
                encoder: "libx264".to_string(),
                stream_index,
            }),
        ))
    }

    fn executor() -> ParallelExecutor {
        ParallelExecutor::new(
            Arc::new(test_media_info(1920, 1080)),
            Arc::new(software_hardware_info()),
            Arc::new(TranscoderConfig::create_default()),
            ExecutionStrategy::new(2, 1, 1, false, 4),
        )
    }

    #[tokio::test]
    async fn test_failed_task_does_not_cancel_peers() {
        let dir = tempfile::tempdir().unwrap();
        // Stream 99 does not exist, so both tasks fail fast inside the
        // worker without touching a child process.
        let a = broken_video_task("video_a", 99, dir.path());
        let b = broken_video_task("video_b", 99, dir.path());
        let exec = executor();

        let summary = exec.execute(&[a.clone(), b.clone()], &[], &[], None, None).await;

        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.failed_tasks, 2);
        assert_eq!(summary.cancelled_tasks, 0);
        assert_eq!(summary.results.len(), 2);
        // Both peers ran to a terminal FAILED state; neither was cancelled.
        assert_eq!(a.state.status(), TaskStatus::Failed);
        assert_eq!(b.state.status(), TaskStatus::Failed);
        assert!(a.state.error().is_some());
        assert_eq!(
            summary.completed_tasks + summary.failed_tasks + summary.cancelled_tasks,
            summary.total_tasks
        );
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let a = broken_video_task("video_a", 0, dir.path());
        let b = broken_video_task("video_b", 0, dir.path());
        let exec = executor();
        exec.cancel();
        assert!(exec.is_cancelled());

        let summary = exec.execute(&[a.clone(), b.clone()], &[], &[], None, None).await;

        assert_eq!(summary.cancelled_tasks, 2);
        assert_eq!(summary.completed_tasks, 0);
        assert_eq!(summary.failed_tasks, 0);
        assert_eq!(a.state.status(), TaskStatus::Cancelled);
        assert_eq!(b.state.status(), TaskStatus::Cancelled);
        assert_eq!(
            summary.completed_tasks + summary.failed_tasks + summary.cancelled_tasks,
            summary.total_tasks
        );
    }

    #[tokio::test]
    async fn test_progress_hook_counts_terminal_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let a = broken_video_task("video_a", 99, dir.path());
        let b = broken_video_task("video_b", 99, dir.path());
        let exec = executor();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let hook: ProgressHook = Arc::new(move |done, total| {
            seen_hook.lock().unwrap().push((done, total));
        });

        exec.execute(&[a, b], &[], &[], None, Some(hook)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(1, 2)));
        assert!(seen.contains(&(2, 2)));
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let exec = executor();
        let mut rx = exec.shutdown_signal();
        assert!(!*rx.borrow());
        exec.cancel();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
