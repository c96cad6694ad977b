//! Background execution of jobs on the tokio blocking pool

use crate::{
    jobs::{DecryptJob, EncryptJob, JobError},
    models::{DecryptReport, EncryptReport},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Handle to a running job
pub struct JobHandle<T> {
    progress: watch::Receiver<u8>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// Latest percent complete. The sender closes when the job ends.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.clone()
    }

    /// Ask the job to stop before its next chunk
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job's result
    pub async fn wait(self) -> Result<T, JobError> {
        self.handle
            .await
            .map_err(|e| JobError::Task(e.to_string()))?
    }
}

fn spawn<T, F>(cancel: CancellationToken, run: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Fn(u8), &CancellationToken) -> Result<T, JobError> + Send + 'static,
{
    let (tx, rx) = watch::channel(0u8);
    let token = cancel.clone();

    let handle = tokio::task::spawn_blocking(move || {
        let progress = move |percent: u8| {
            tx.send_if_modified(|current| {
                if *current == percent {
                    return false;
                }
                *current = percent;
                true
            });
        };
        run(&progress, &token)
    });

    JobHandle {
        progress: rx,
        cancel,
        handle,
    }
}

/// Run an encryption job in the background. Must be called inside a tokio runtime.
pub fn spawn_encrypt(job: EncryptJob) -> JobHandle<EncryptReport> {
    spawn_encrypt_with(job, CancellationToken::new())
}

/// Like [`spawn_encrypt`], cancelled through an existing token
pub fn spawn_encrypt_with(job: EncryptJob, cancel: CancellationToken) -> JobHandle<EncryptReport> {
    spawn(cancel, move |progress, cancel| job.run(progress, cancel))
}

/// Run a decryption job in the background. Must be called inside a tokio runtime.
pub fn spawn_decrypt(job: DecryptJob) -> JobHandle<DecryptReport> {
    spawn_decrypt_with(job, CancellationToken::new())
}

/// Like [`spawn_decrypt`], cancelled through an existing token
pub fn spawn_decrypt_with(job: DecryptJob, cancel: CancellationToken) -> JobHandle<DecryptReport> {
    spawn(cancel, move |progress, cancel| job.run(progress, cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecryptOptions, EncryptOptions};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_background_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("notes.txt");
        let data = b"background jobs keep the caller responsive".repeat(100);
        fs::write(&file, &data).unwrap();

        let options = EncryptOptions::new().with_chunk_size(256);
        let handle = spawn_encrypt(EncryptJob::new(&file, "pw", "pw", options));
        let progress = handle.progress();
        let report = handle.wait().await.unwrap();
        assert_eq!(*progress.borrow(), 100);
        assert_eq!(report.bytes_processed, data.len() as u64);

        let job = DecryptJob::new(&report.container, DecryptOptions::new().with_chunk_size(256))
            .with_password("pw");
        let report = spawn_decrypt(job).wait().await.unwrap();
        assert_eq!(fs::read(&report.output).unwrap(), data);
    }

    #[tokio::test]
    async fn test_progress_channel_observes_updates() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("data.bin");
        fs::write(&file, vec![1u8; 64 * 1024]).unwrap();

        let options = EncryptOptions::new().with_chunk_size(1024);
        let handle = spawn_encrypt(EncryptJob::new(&file, "pw", "pw", options));
        let mut progress = handle.progress();

        let mut last = 0u8;
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 100);
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_job() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("data.bin");
        fs::write(&file, vec![1u8; 8 * 1024]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = EncryptOptions::new().with_chunk_size(1024);
        let handle = spawn_encrypt_with(EncryptJob::new(&file, "pw", "pw", options), cancel);

        assert!(matches!(handle.wait().await, Err(JobError::Cancelled)));
        assert!(!temp_dir.path().join("data.bin.pack").exists());
    }

    #[tokio::test]
    async fn test_handle_cancel_sets_token() {
        let temp_dir = TempDir::new().unwrap();
        let handle = spawn_encrypt(EncryptJob::new(
            temp_dir.path().join("missing"),
            "pw",
            "pw",
            EncryptOptions::new(),
        ));
        handle.cancel();
        assert!(handle.cancellation_token().is_cancelled());
        assert!(matches!(handle.wait().await, Err(JobError::Validation(_))));
    }
}
