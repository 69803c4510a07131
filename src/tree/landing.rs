//! Handoff point for downloads delivered by an external agent.

use std::path::Path;
use std::time::Duration;

use crate::common::{bounded, CancelToken};
use crate::error::SessionError;

const POLL: Duration = Duration::from_millis(100);

async fn settled(path: &async_std::path::Path) -> Result<(), SessionError> {
    let mut last_len = None;
    loop {
        if path.exists().await {
            let len = async_std::fs::metadata(path).await?.len();
            if last_len == Some(len) {
                return Ok(());
            }
            last_len = Some(len);
        }
        async_std::task::sleep(POLL).await;
    }
}

/// Waits until `path` exists and has stopped growing, for at most `limit`.
pub async fn wait_for_file(path: &Path, limit: Duration, cancel: &CancelToken) -> Result<(), SessionError> {
    let what = path.display().to_string();
    bounded(settled(path.into()), limit, cancel, &what).await
}

/// Moves a delivered file to `to`, copying across file systems.
pub async fn move_into_place(from: &Path, to: &Path) -> Result<(), SessionError> {
    if let Some(parent) = to.parent() {
        async_std::fs::create_dir_all(parent).await?;
    }
    if async_std::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    async_std::fs::copy(from, to).await?;
    async_std::fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_for_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.pdf");

        let result = async_std::task::block_on(wait_for_file(
            &path,
            Duration::from_millis(300),
            &CancelToken::new(),
        ));
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
    }

    #[test]
    fn test_wait_for_file_sees_late_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.pdf");
        let writer = path.clone();

        async_std::task::block_on(async {
            async_std::task::spawn(async move {
                async_std::task::sleep(Duration::from_millis(150)).await;
                async_std::fs::write(writer, b"%PDF").await.unwrap();
            });
            wait_for_file(&path, Duration::from_secs(5), &CancelToken::new())
                .await
                .unwrap();
        });
        assert!(path.exists());
    }

    #[test]
    fn test_wait_for_file_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = async_std::task::block_on(wait_for_file(
            &dir.path().join("x"),
            Duration::from_secs(5),
            &cancel,
        ));
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    #[test]
    fn test_move_into_place_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("landing.pdf");
        let to = dir.path().join("Reports/2017/q1.pdf");
        std::fs::write(&from, b"data").unwrap();

        async_std::task::block_on(move_into_place(&from, &to)).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }
}
