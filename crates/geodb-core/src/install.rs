use std::io::ErrorKind;
use std::path::Path;

use log::info;

use crate::error::UpdateError;

/// Replace `final_path` with `staged` in a single rename.
///
/// Readers of `final_path` see either the previous file or the new one. There
/// is no copy fallback: when the two paths live on different filesystems the
/// rename fails and so does the install.
///
/// # Errors
/// Returns `MoveFailed` if the rename is rejected.
pub async fn install_atomically(staged: &Path, final_path: &Path) -> Result<(), UpdateError> {
    tokio::fs::rename(staged, final_path)
        .await
        .map_err(|error| move_failed(staged, final_path, error))?;

    info!(
        "Installed {} at {}",
        staged.display(),
        final_path.display()
    );
    Ok(())
}

fn move_failed(staged: &Path, final_path: &Path, error: std::io::Error) -> UpdateError {
    let source = if error.kind() == ErrorKind::CrossesDevices {
        std::io::Error::new(
            error.kind(),
            format!("staging and install paths are on different filesystems: {error}"),
        )
    } else {
        error
    };
    UpdateError::MoveFailed {
        from: staged.to_path_buf(),
        to: final_path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::path::Path;

    use super::{install_atomically, move_failed};
    use crate::error::UpdateError;

    #[tokio::test]
    async fn rename_replaces_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staged = temp.path().join("staged.mmdb");
        let target = temp.path().join("GeoLite2-Country.mmdb");
        std::fs::write(&target, b"old").expect("old file should be written");
        std::fs::write(&staged, b"new").expect("staged file should be written");

        install_atomically(&staged, &target)
            .await
            .expect("install should succeed");

        assert_eq!(std::fs::read(&target).expect("target readable"), b"new");
        assert!(!staged.exists(), "staged file is consumed by the rename");
    }

    #[tokio::test]
    async fn missing_staged_file_is_move_failure() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("target.mmdb");
        std::fs::write(&target, b"old").expect("old file should be written");

        let result = install_atomically(&temp.path().join("absent"), &target).await;

        assert!(matches!(result, Err(UpdateError::MoveFailed { .. })));
        assert_eq!(std::fs::read(&target).expect("target readable"), b"old");
    }

    #[tokio::test]
    async fn missing_target_directory_is_move_failure() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staged = temp.path().join("staged.mmdb");
        std::fs::write(&staged, b"new").expect("staged file should be written");

        let result = install_atomically(&staged, &temp.path().join("nope/target.mmdb")).await;

        assert!(matches!(result, Err(UpdateError::MoveFailed { .. })));
        assert!(staged.exists(), "staged file is left in place on failure");
    }

    #[test]
    fn cross_device_failure_names_the_cause() {
        let error = move_failed(
            Path::new("/tmp/staged"),
            Path::new("/srv/final"),
            std::io::Error::from(ErrorKind::CrossesDevices),
        );

        assert!(matches!(
            error,
            UpdateError::MoveFailed { ref source, .. }
                if source.kind() == ErrorKind::CrossesDevices
                    && source.to_string().contains("different filesystems")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_reader_never_sees_partial_file() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::{Arc, Barrier};

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let target = temp.path().join("GeoLite2-Country.mmdb");
        let old = vec![b'o'; 256 * 1024];
        let new = vec![b'n'; 384 * 1024];
        std::fs::write(&target, &old).expect("old file should be written");

        let done = Arc::new(AtomicBool::new(false));
        let ready = Arc::new(Barrier::new(2));
        let reader = {
            let (done, ready) = (done.clone(), ready.clone());
            let (target, old, new) = (target.clone(), old.clone(), new.clone());
            std::thread::spawn(move || {
                ready.wait();
                while !done.load(Ordering::Acquire) {
                    let contents = std::fs::read(&target).expect("target always exists");
                    assert!(
                        contents == old || contents == new,
                        "observed a partial file of {} bytes",
                        contents.len()
                    );
                }
            })
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build");
        ready.wait();
        for round in 0..50 {
            let staged = temp.path().join(format!("staged-{round}"));
            let contents = if round % 2 == 0 { &new } else { &old };
            std::fs::write(&staged, contents).expect("staged file should be written");
            runtime
                .block_on(install_atomically(&staged, &target))
                .expect("install should succeed");
        }
        done.store(true, Ordering::Release);

        reader.join().expect("reader thread should not panic");
    }
}
