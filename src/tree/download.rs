use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::landing::{move_into_place, wait_for_file};
use super::model::{FileEntry, Folder};
use crate::common::CancelToken;
use crate::error::{MirrorError, SessionError};
use crate::mirror::{ItemState, MirrorReport, Outcome};
use crate::session::Session;
use crate::status::StatusFn;

#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Replace files that exist already instead of skipping them.
    pub overwrite: bool,
    /// Extensions (without the dot, any case) that are never fetched.
    pub ignore_extensions: Vec<String>,
    /// Directory an external agent delivers triggered downloads to. Files
    /// are fetched by the session itself when unset.
    pub landing: Option<PathBuf>,
    pub wait: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            ignore_extensions: Vec::new(),
            landing: None,
            wait: Duration::from_secs(30),
        }
    }
}

fn sanitize_name(name: &str) -> String {
    let clean: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        clean
    }
}

fn entry_extension(entry: &FileEntry) -> Option<String> {
    let path = url::Url::parse(&entry.url).ok()?.path().to_owned();
    let last = path.rsplit('/').next()?;
    Path::new(last)
        .extension()
        .and_then(|x| x.to_str())
        .map(|x| x.to_ascii_lowercase())
}

/// Local file name of `entry`: its listed name plus the extension of its URL.
pub fn file_name(entry: &FileEntry) -> String {
    let name = sanitize_name(&entry.name);
    match entry_extension(entry) {
        Some(ext) if !name.to_ascii_lowercase().ends_with(&format!(".{}", ext)) => {
            format!("{}.{}", name, ext)
        }
        _ => name,
    }
}

/// `name` with the start of the md5 of `url` before its extension.
fn disambiguate(name: &str, url: &str) -> String {
    let hash = format!("{:x}", md5::compute(url));
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], &hash[..8], &name[dot..]),
        _ => format!("{}_{}", name, &hash[..8]),
    }
}

/// Claims `name` in a directory, falling back to a URL-derived variant when
/// another entry took it first. Names compare case-insensitively.
fn claim(taken: &mut HashSet<String>, name: String, url: &str) -> String {
    if taken.insert(name.to_lowercase()) {
        return name;
    }
    let name = disambiguate(&name, url);
    taken.insert(name.to_lowercase());
    name
}

/// Lists every file below `folder` depth-first, sub-folders before files.
fn plan<'a>(folder: &'a Folder, dir: &Path, out: &mut Vec<(PathBuf, &'a FileEntry)>) {
    let mut taken = HashSet::new();
    for child in folder.folders.iter() {
        let name = claim(&mut taken, sanitize_name(&child.name), &child.url);
        plan(child, &dir.join(name), out);
    }
    for file in folder.files.iter() {
        let name = claim(&mut taken, file_name(file), &file.url);
        out.push((dir.join(name), file));
    }
}

/// Name a triggered download of `entry` is delivered under, unique per URL.
fn landing_name(entry: &FileEntry, path: &Path) -> String {
    let hash = format!("{:x}", md5::compute(&entry.url));
    match path.extension().and_then(|x| x.to_str()) {
        Some(ext) => format!("{}.{}", hash, ext),
        None => hash,
    }
}

/// Downloads every file of `folder` into `target`, mirroring the folder
/// layout. Failed files are reported and skipped.
pub async fn download<S: Session + ?Sized>(
    session: &S,
    folder: &Folder,
    target: &Path,
    options: &DownloadOptions,
    status: StatusFn,
    cancel: CancelToken,
) -> Result<MirrorReport, MirrorError> {
    async_std::fs::create_dir_all(target)
        .await
        .map_err(|e| MirrorError::target(target, e))?;
    if let Some(landing) = &options.landing {
        async_std::fs::create_dir_all(landing)
            .await
            .map_err(|e| MirrorError::target(landing, e))?;
    }

    let ignored: Vec<String> = options
        .ignore_extensions
        .iter()
        .map(|x| x.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut files = Vec::new();
    plan(folder, target, &mut files);

    let mut report = MirrorReport::default();
    for (path, entry) in files {
        let shown = path.strip_prefix(target).unwrap_or(&path).display().to_string();
        let outcome = |state: ItemState, reason: Option<String>| Outcome {
            url: entry.url.clone(),
            file_path: shown.clone(),
            state,
            reason,
        };

        if entry_extension(entry).map_or(false, |x| ignored.contains(&x)) {
            tracing::debug!("ignore {}", shown);
            report
                .outcomes
                .push(outcome(ItemState::Skipped, Some("ignored extension".to_owned())));
            continue;
        }

        if async_std::path::Path::new(&path).exists().await {
            if !options.overwrite {
                tracing::debug!("skip {} because the file exists already", shown);
                report.outcomes.push(outcome(ItemState::Skipped, None));
                continue;
            }
            if let Err(e) = async_std::fs::remove_file(&path).await {
                tracing::warn!("unable to remove {}: {}", shown, e);
            }
        }

        status(&format!("Download: {}", shown));
        match fetch(session, entry, &path, options, &cancel).await {
            Ok(()) => report.outcomes.push(outcome(ItemState::Saved, None)),
            Err(e) => {
                let message = format!("Download failed of {}, because of {}", entry.name, e);
                tracing::warn!("{}", message);
                status(&message);
                report.outcomes.push(outcome(ItemState::Failed, Some(e.to_string())));
            }
        }
    }

    status(&format!(
        "Finished: {} saved, {} skipped, {} failed",
        report.count(ItemState::Saved),
        report.count(ItemState::Skipped),
        report.count(ItemState::Failed)
    ));
    Ok(report)
}

async fn fetch<S: Session + ?Sized>(
    session: &S,
    entry: &FileEntry,
    path: &Path,
    options: &DownloadOptions,
    cancel: &CancelToken,
) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }

    match &options.landing {
        Some(landing) => {
            let delivered = landing.join(landing_name(entry, path));
            // A leftover from an earlier attempt must not pass for this delivery.
            match async_std::fs::remove_file(&delivered).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            session.trigger_download(&entry.url, &delivered).await?;
            wait_for_file(&delivered, options.wait, cancel).await?;
            move_into_place(&delivered, path).await
        }
        None => {
            let binary = session.download(&entry.url).await?;
            if let Some(parent) = path.parent() {
                async_std::fs::create_dir_all(parent).await?;
            }
            async_std::fs::write(path, &binary.data).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{collect_status, log_status};
    use crate::testing::FakeSite;
    use std::sync::{Arc, Mutex};

    fn entry(name: &str, path: &str) -> FileEntry {
        FileEntry {
            name: name.to_owned(),
            url: format!("https://www.test.com{}", path),
            kind: String::new(),
        }
    }

    fn library() -> Folder {
        let mut root = Folder::new("Library", "https://www.test.com/lib");
        let mut reports = Folder::new("Reports", "https://www.test.com/lib?RootFolder=Reports");
        reports.files.push(entry("q1", "/lib/Reports/q1.pdf"));
        root.folders.push(reports);
        root.files.push(entry("readme", "/lib/readme.txt"));
        root.files.push(entry("movie", "/lib/movie.mp4"));
        root
    }

    fn site() -> FakeSite {
        FakeSite::default()
            .media("/lib/Reports/q1.pdf", Some("application/pdf"), b"%PDF q1")
            .media("/lib/readme.txt", Some("text/plain"), b"read me")
            .media("/lib/movie.mp4", Some("video/mp4"), b"mp4")
    }

    fn run(site: &FakeSite, target: &Path, options: &DownloadOptions) -> MirrorReport {
        async_std::task::block_on(download(
            site,
            &library(),
            target,
            options,
            log_status(),
            CancelToken::new(),
        ))
        .unwrap()
    }

    #[test]
    fn test_file_name_adds_url_extension() {
        assert_eq!(file_name(&entry("q1", "/lib/q1.pdf")), "q1.pdf");
        assert_eq!(file_name(&entry("Q1.PDF", "/lib/q1.pdf")), "Q1.PDF");
        assert_eq!(file_name(&entry("a/b: c", "/lib/x")), "a_b_ c");
        assert_eq!(file_name(&entry("..", "/lib/x.txt")), "_.txt");
    }

    #[test]
    fn test_download_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        let site = site();

        let report = run(&site, dir.path(), &DownloadOptions::default());

        assert_eq!(report.count(ItemState::Saved), 3);
        assert_eq!(
            std::fs::read(dir.path().join("Reports/q1.pdf")).unwrap(),
            b"%PDF q1"
        );
        assert!(dir.path().join("readme.txt").exists());
        assert_eq!(
            site.fetches(),
            vec![
                "https://www.test.com/lib/Reports/q1.pdf",
                "https://www.test.com/lib/readme.txt",
                "https://www.test.com/lib/movie.mp4",
            ]
        );
    }

    #[test]
    fn test_download_overwrite_and_ignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"old").unwrap();
        let site = site();

        let options = DownloadOptions {
            ignore_extensions: vec![".MP4".to_owned()],
            ..DownloadOptions::default()
        };
        let report = run(&site, dir.path(), &options);
        assert_eq!(report.count(ItemState::Saved), 1);
        assert_eq!(report.count(ItemState::Skipped), 2);
        assert_eq!(std::fs::read(dir.path().join("readme.txt")).unwrap(), b"old");
        assert!(!dir.path().join("movie.mp4").exists());

        let options = DownloadOptions {
            overwrite: true,
            ..options
        };
        run(&site, dir.path(), &options);
        assert_eq!(std::fs::read(dir.path().join("readme.txt")).unwrap(), b"read me");
        assert_eq!(site.fetched("https://www.test.com/lib/readme.txt"), 1);
        assert_eq!(site.fetched("https://www.test.com/lib/movie.mp4"), 0);
    }

    #[test]
    fn test_download_failure_is_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let site = FakeSite::default()
            .broken("/lib/Reports/q1.pdf")
            .media("/lib/readme.txt", None, b"read me")
            .media("/lib/movie.mp4", None, b"mp4");
        let messages = Arc::new(Mutex::new(Vec::new()));

        let report = async_std::task::block_on(download(
            &site,
            &library(),
            dir.path(),
            &DownloadOptions::default(),
            collect_status(messages.clone()),
            CancelToken::new(),
        ))
        .unwrap();

        assert_eq!(report.urls(ItemState::Failed), vec!["https://www.test.com/lib/Reports/q1.pdf"]);
        assert_eq!(report.count(ItemState::Saved), 2);
        assert!(messages
            .lock()
            .unwrap()
            .iter()
            .any(|x| x.starts_with("Download failed of q1")));
    }

    #[test]
    fn test_download_through_landing() {
        let dir = tempfile::tempdir().unwrap();
        let landing = tempfile::tempdir().unwrap();
        let mut site = site();
        site.deliver = true;

        let options = DownloadOptions {
            landing: Some(landing.path().to_owned()),
            wait: Duration::from_secs(5),
            ..DownloadOptions::default()
        };
        let report = run(&site, dir.path(), &options);

        assert_eq!(report.count(ItemState::Saved), 3);
        assert_eq!(
            std::fs::read(dir.path().join("Reports/q1.pdf")).unwrap(),
            b"%PDF q1"
        );
        assert_eq!(std::fs::read_dir(landing.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_download_landing_ignores_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let landing = tempfile::tempdir().unwrap();
        let q1 = entry("q1", "/lib/Reports/q1.pdf");
        let stale = landing.path().join(landing_name(&q1, Path::new("q1.pdf")));
        std::fs::write(&stale, b"stale").unwrap();
        let site = site();

        let options = DownloadOptions {
            landing: Some(landing.path().to_owned()),
            wait: Duration::from_millis(300),
            ignore_extensions: vec!["txt".to_owned(), "mp4".to_owned()],
            ..DownloadOptions::default()
        };
        let report = run(&site, dir.path(), &options);

        assert_eq!(report.count(ItemState::Failed), 1);
        assert!(!stale.exists());
        assert!(!dir.path().join("Reports/q1.pdf").exists());
    }

    #[test]
    fn test_download_same_names_in_one_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut root = Folder::new("Library", "https://www.test.com/lib");
        let mut first = Folder::new("Reports", "https://www.test.com/lib?RootFolder=a");
        first.files.push(entry("q1", "/lib/a/q1.pdf"));
        let mut second = Folder::new("reports", "https://www.test.com/lib?RootFolder=b");
        second.files.push(entry("q1", "/lib/b/q1.pdf"));
        root.folders.push(first);
        root.folders.push(second);
        root.files.push(entry("notes", "/lib/a/notes.txt"));
        root.files.push(entry("notes", "/lib/b/notes.txt"));
        let site = FakeSite::default()
            .media("/lib/a/q1.pdf", None, b"a")
            .media("/lib/b/q1.pdf", None, b"b")
            .media("/lib/a/notes.txt", None, b"first")
            .media("/lib/b/notes.txt", None, b"second");

        let report = async_std::task::block_on(download(
            &site,
            &root,
            dir.path(),
            &DownloadOptions::default(),
            log_status(),
            CancelToken::new(),
        ))
        .unwrap();
        assert_eq!(report.count(ItemState::Saved), 4);

        let hash = |url: &str| format!("{:x}", md5::compute(url))[..8].to_owned();
        let second_dir = format!("reports_{}", hash("https://www.test.com/lib?RootFolder=b"));
        let second_notes = format!("notes_{}.txt", hash("https://www.test.com/lib/b/notes.txt"));
        assert_eq!(std::fs::read(dir.path().join("Reports/q1.pdf")).unwrap(), b"a");
        assert_eq!(std::fs::read(dir.path().join(second_dir).join("q1.pdf")).unwrap(), b"b");
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join(second_notes)).unwrap(), b"second");
    }

    #[test]
    fn test_download_landing_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let landing = tempfile::tempdir().unwrap();
        let site = site();

        let options = DownloadOptions {
            landing: Some(landing.path().to_owned()),
            wait: Duration::from_millis(300),
            ignore_extensions: vec!["txt".to_owned(), "mp4".to_owned()],
            ..DownloadOptions::default()
        };
        let report = run(&site, dir.path(), &options);

        assert_eq!(report.count(ItemState::Failed), 1);
        let reason = report.outcomes[0].reason.clone().unwrap_or_default();
        assert!(reason.contains("timed out"), "{}", reason);
        assert!(!dir.path().join("Reports/q1.pdf").exists());
    }
}
