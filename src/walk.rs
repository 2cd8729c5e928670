//! Walk / Prefetch / Verify.
//!
//! Tree traversal algorithms built directly on `LazyFolder`: path-segment
//! walking, parallel approximate-size summation, prefetch (with optional
//! corruption-fix), size verification against remote exact sizes, and a
//! download-completeness report.
//!
//! None of these fail wholesale on a per-file problem -- `prefetch`/
//! `verify_sizes` collect mismatches into an `Errors` bag and return
//! normally; only a failure to list a directory at all propagates as an
//! `Err`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::folder::LazyFolder;
use crate::path::Path;

/// One mismatch or failure record collected by a traversal.
#[derive(Debug, Clone)]
pub struct TraversalError {
    pub path: String,
    pub message: String,
}

pub type Errors = Vec<TraversalError>;

/// Steps through `path`'s segments from `root`, listing each level on
/// demand. Returns `(Some(folder), Some(name))` if the walk terminates on
/// a file, `(Some(folder), None)` if it terminates on a folder, or
/// `(None, None)` if a segment along the way names neither. Idempotent:
/// re-walking the path reached by a walk reaches the same place.
pub async fn walk(
    root: &Rc<LazyFolder>,
    path: &Path,
) -> Result<(Option<Rc<LazyFolder>>, Option<String>), EngineError> {
    let mut current = root.clone();
    let segments = path.segments();
    for (i, segment) in segments.iter().enumerate() {
        let children = current.children().await?;
        if let Some(child) = children.folders.get(segment) {
            current = child.clone();
            continue;
        }
        if children.files.iter().any(|f| f == segment) {
            return if i == segments.len() - 1 {
                Ok((Some(current), Some(segment.clone())))
            } else {
                Ok((None, None))
            };
        }
        return Ok((None, None));
    }
    Ok((Some(current), None))
}

/// A `walk` variant for callers that need a folder specifically (the CLI
/// commands below all do): fails with `NotAFolder` if the target turned
/// out to be a file, and `NotFound` if nothing matched at all.
pub async fn find_folder(root: &Rc<LazyFolder>, path: &Path) -> Result<Rc<LazyFolder>, EngineError> {
    match walk(root, path).await? {
        (Some(folder), None) => Ok(folder),
        (Some(_), Some(name)) => Err(EngineError::NotAFolder(format!("{path}/{name}"))),
        _ => Err(EngineError::NotFound(path.to_string())),
    }
}

/// Sums approximate sizes across the whole subtree rooted at `folder`.
/// Each child folder's recursion is launched concurrently; `semaphore`
/// caps how many descents run at once across the whole call, and must
/// exceed the tree's maximum depth or recursion deadlocks against itself.
pub fn approximate_total_size(
    folder: Rc<LazyFolder>,
    semaphore: Arc<Semaphore>,
) -> LocalBoxFuture<'static, Result<u64, EngineError>> {
    async move {
        let children = folder.children().await?;
        let mut total: u64 = 0;
        for name in &children.files {
            total += folder.approximate_size(name).await?;
        }

        let mut descents = Vec::with_capacity(children.folders.len());
        for child in children.folders.values().cloned() {
            let semaphore = semaphore.clone();
            descents.push(async move {
                let _permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                approximate_total_size(child, semaphore).await
            });
        }
        for result in futures::future::join_all(descents).await {
            total += result?;
        }
        Ok(total)
    }
    .boxed_local()
}

/// Recursively ensures every file under `folder` is downloaded. When `fix`
/// is set, a locally-present file whose size disagrees with the remote
/// exact size is unlinked and re-fetched, with a human-readable record
/// appended to `errors`.
pub fn prefetch(
    folder: Rc<LazyFolder>,
    semaphore: Arc<Semaphore>,
    errors: Rc<RefCell<Errors>>,
    fix: bool,
) -> LocalBoxFuture<'static, Result<(), EngineError>> {
    async move {
        let children = folder.children().await?;

        let mut file_fetches = Vec::with_capacity(children.files.len());
        for name in children.files.iter().cloned() {
            let folder = folder.clone();
            let semaphore = semaphore.clone();
            let errors = errors.clone();
            file_fetches.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                if fix {
                    if let Err(e) = fix_if_corrupt(&folder, &name).await {
                        errors.borrow_mut().push(TraversalError {
                            path: format!("{}/{}", folder.path, name),
                            message: e.to_string(),
                        });
                    }
                }
                if let Err(e) = folder.ensure_fetched(&name).await {
                    errors.borrow_mut().push(TraversalError {
                        path: format!("{}/{}", folder.path, name),
                        message: e.to_string(),
                    });
                }
            });
        }
        futures::future::join_all(file_fetches).await;

        let mut descents = Vec::with_capacity(children.folders.len());
        for child in children.folders.values().cloned() {
            let semaphore = semaphore.clone();
            let errors = errors.clone();
            descents.push(async move {
                let _permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                prefetch(child, semaphore, errors, fix).await
            });
        }
        for result in futures::future::join_all(descents).await {
            result?;
        }
        Ok(())
    }
    .boxed_local()
}

/// If `name` is present locally and its size disagrees with the remote
/// exact size, unlinks it and returns `CacheCorruption` describing the
/// mismatch; a name that isn't downloaded yet, or already matches, is a
/// no-op.
async fn fix_if_corrupt(folder: &Rc<LazyFolder>, name: &str) -> Result<(), EngineError> {
    let path = folder.cache_path_sync(name);
    let Ok(metadata) = tokio::fs::metadata(&path).await else {
        return Ok(());
    };
    let expected = folder.exact_size(name).await?;
    let actual = metadata.len();
    if actual != expected {
        tokio::fs::remove_file(&path).await?;
        return Err(EngineError::CacheCorruption(format!(
            "{name}: expected={expected}, was={actual}"
        )));
    }
    Ok(())
}

/// For every file present locally under `folder`'s subtree whose size
/// disagrees with the remote exact size, appends a mismatch record to
/// `errors`. Never mutates the cache (contrast with `prefetch fix=true`).
pub fn verify_sizes(
    folder: Rc<LazyFolder>,
    errors: Rc<RefCell<Errors>>,
) -> LocalBoxFuture<'static, Result<(), EngineError>> {
    async move {
        let children = folder.children().await?;
        for name in children.files.iter().cloned() {
            let path = folder.cache_path_sync(&name);
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                let expected = folder.exact_size(&name).await?;
                let actual = metadata.len();
                if actual != expected {
                    errors.borrow_mut().push(TraversalError {
                        path: format!("{}/{}", folder.path, name),
                        message: format!("expected={expected}, was={actual}"),
                    });
                }
            }
        }
        for child in children.folders.values().cloned() {
            verify_sizes(child, errors.clone()).await?;
        }
        Ok(())
    }
    .boxed_local()
}

/// Walks the subtree rooted at `folder` accumulating `(downloaded_bytes,
/// total_expected_bytes)`; the caller turns this into a completion
/// fraction. Uses the exact remote size for the expected total (fetching
/// it via HEAD where not already known), so the fraction never exceeds
/// 100% once every file is fully downloaded.
pub fn completeness_report(
    folder: Rc<LazyFolder>,
) -> LocalBoxFuture<'static, Result<(u64, u64), EngineError>> {
    async move {
        let children = folder.children().await?;
        let mut downloaded = 0u64;
        let mut expected = 0u64;
        for name in children.files.iter().cloned() {
            expected += folder.exact_size(&name).await?;
            let path = folder.cache_path_sync(&name);
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                downloaded += metadata.len();
            }
        }
        for child in children.folders.values().cloned() {
            let (d, e) = completeness_report(child).await?;
            downloaded += d;
            expected += e;
        }
        Ok((downloaded, expected))
    }
    .boxed_local()
}

/// Heuristic classification of a "special" folder -- listing-readability
/// only, no semantic effect on caching or fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialFolderKind {
    VolpkgPaths,
    Working,
    VolumetricInstanceLabels,
    YxzGrid,
    WorkingMeshWindow,
    PointCloud,
    Sample,
    ZarrStore,
    TiffStack,
}

impl SpecialFolderKind {
    pub fn tag(self) -> &'static str {
        match self {
            SpecialFolderKind::VolpkgPaths => "volpkg/paths",
            SpecialFolderKind::Working => "working",
            SpecialFolderKind::VolumetricInstanceLabels => "volumetric-instance-labels",
            SpecialFolderKind::YxzGrid => "yxz grid",
            SpecialFolderKind::WorkingMeshWindow => "working mesh window",
            SpecialFolderKind::PointCloud => "point cloud",
            SpecialFolderKind::Sample => "sample",
            SpecialFolderKind::ZarrStore => "zarr store",
            SpecialFolderKind::TiffStack => "tiff stack",
        }
    }
}

fn is_working_mesh_window(name: &str) -> bool {
    name.strip_prefix("working_mesh_").is_some_and(|rest| rest.contains("window"))
}

/// Classifies a folder using its own path segments plus its children's
/// names. Folder-based categories (YXZ grids, working-mesh windows, point
/// clouds, sample sets) are detected from `folder_names`; `.zarray`/TIFF
/// stacks are detected from `file_names`.
pub fn special_folder(
    folder: &LazyFolder,
    folder_names: &[String],
    file_names: &[String],
) -> Option<SpecialFolderKind> {
    let segments = folder.path.segments();
    if segments.len() >= 2 {
        let parent = &segments[segments.len() - 2];
        let last = &segments[segments.len() - 1];
        if parent.ends_with(".volpkg") && last == "paths" {
            return Some(SpecialFolderKind::VolpkgPaths);
        }
    }
    if let Some(last) = segments.last() {
        if last == "working" {
            return Some(SpecialFolderKind::Working);
        }
        if last == "volumetric-instance-labels" {
            return Some(SpecialFolderKind::VolumetricInstanceLabels);
        }
    }

    let yxz_count = folder_names.iter().filter(|n| n.starts_with("cell_yxz")).count();
    if yxz_count > 2 {
        return Some(SpecialFolderKind::YxzGrid);
    }
    let working_mesh_count = folder_names.iter().filter(|n| is_working_mesh_window(n)).count();
    if working_mesh_count > 2 {
        return Some(SpecialFolderKind::WorkingMeshWindow);
    }
    let point_cloud_count = folder_names.iter().filter(|n| n.starts_with("point_cloud_")).count();
    if point_cloud_count > 2 {
        return Some(SpecialFolderKind::PointCloud);
    }
    let sample_count = folder_names.iter().filter(|n| n.starts_with("sample_")).count();
    if sample_count > 2 {
        return Some(SpecialFolderKind::Sample);
    }

    if file_names.iter().any(|n| n == ".zarray") {
        return Some(SpecialFolderKind::ZarrStore);
    }
    let tif_count = file_names.iter().filter(|n| n.ends_with(".tif")).count();
    if tif_count > 20 {
        return Some(SpecialFolderKind::TiffStack);
    }
    None
}

/// Depth-first tree listing for the `list_special_and_approximate_size_fast`
/// CLI command: subfolders are recursed (and printed) first, then this
/// folder's own files are either summarized as one "probably <tag>" line
/// (if `special_folder` classifies it) or grouped by extension with a
/// count and total size.
pub fn list_special_and_approximate_size_fast(
    folder: Rc<LazyFolder>,
    depth: usize,
) -> LocalBoxFuture<'static, Result<(), EngineError>> {
    async move {
        let children = folder.children().await?;
        let indent = "  ".repeat(depth);

        let mut names: Vec<&String> = children.folders.keys().collect();
        names.sort();
        for name in &names {
            let child = children.folders[*name].clone();
            println!("{indent}{name}/");
            list_special_and_approximate_size_fast(child, depth + 1).await?;
        }

        let folder_names: Vec<String> = names.into_iter().cloned().collect();
        if let Some(kind) = special_folder(&folder, &folder_names, &children.files) {
            println!("{indent}probably {}", kind.tag());
            return Ok(());
        }

        let mut by_extension: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for name in &children.files {
            let size = folder.approximate_size(name).await?;
            let entry = by_extension.entry(extension_of(name)).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += size;
        }
        for (ext, (count, total_bytes)) in by_extension {
            let mib = total_bytes as f64 / (1024.0 * 1024.0);
            println!("{indent}extension={ext}: count:{count} {mib:.2} MiB");
        }
        Ok(())
    }
    .boxed_local()
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => "(none)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::EngineShared;
    use crate::fetcher::RemoteFetcher;
    use crate::later::Later;
    use crate::single_flight::SingleFlight;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path as wpath};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_engine(cache_root: PathBuf, root_url: String) -> Rc<EngineShared> {
        Rc::new(EngineShared {
            cache_root,
            root_url,
            fetcher: Rc::new(RemoteFetcher::new(&EngineConfig::default())),
            later: Rc::new(Later::new()),
            folder_fetch_single_flight: SingleFlight::new(),
            download_single_flight: SingleFlight::new(),
            config: EngineConfig::default(),
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn walk_resolves_folders_and_files_and_is_idempotent() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(wpath("/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="a/">a/</a></td><td>-</td><td>-</td></tr>
                            <tr><td><a href="c.txt">c.txt</a></td><td>20 B</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(wpath("/a/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody></tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;

                let cache_dir = tempfile::tempdir().unwrap();
                let engine = test_engine(cache_dir.path().to_path_buf(), server.uri());
                let root = LazyFolder::new(Path::root(), engine.clone());

                let (folder, name) = walk(&root, &Path::parse("c.txt")).await.unwrap();
                assert!(folder.is_some());
                assert_eq!(name.as_deref(), Some("c.txt"));

                let (folder, name) = walk(&root, &Path::parse("a")).await.unwrap();
                assert!(folder.is_some());
                assert_eq!(name, None);

                let p1 = Path::parse("a");
                let (resolved, _) = walk(&root, &p1).await.unwrap();
                let resolved = resolved.unwrap();
                let (resolved_again, _) = walk(&root, &resolved.path.clone()).await.unwrap();
                assert_eq!(resolved.path, resolved_again.unwrap().path);

                let (missing, missing_name) = walk(&root, &Path::parse("nope")).await.unwrap();
                assert!(missing.is_none());
                assert!(missing_name.is_none());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn approximate_total_size_sums_nested_tree() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(wpath("/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="a/">a/</a></td><td>-</td><td>-</td></tr>
                            <tr><td><a href="c.txt">c.txt</a></td><td>20 B</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(wpath("/a/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="d.bin">d.bin</a></td><td>1 KiB</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;

                let cache_dir = tempfile::tempdir().unwrap();
                let engine = test_engine(cache_dir.path().to_path_buf(), server.uri());
                let root = LazyFolder::new(Path::root(), engine.clone());

                let semaphore = Arc::new(Semaphore::new(50));
                let total = approximate_total_size(root, semaphore).await.unwrap();
                assert_eq!(total, 20 + 1024);
            })
            .await;
    }

    #[test]
    fn special_folder_classifies_zarr_and_tiff_from_files() {
        let engine = test_engine(PathBuf::from("/tmp/nonexistent-cache"), "http://example.invalid".to_string());
        let folder = LazyFolder::new(Path::root(), engine);
        let no_folders: Vec<String> = vec![];

        let zarr_files: Vec<String> = vec![".zarray".to_string(), "0.0".to_string()];
        assert_eq!(special_folder(&folder, &no_folders, &zarr_files), Some(SpecialFolderKind::ZarrStore));

        let tiff_files: Vec<String> = (0..25).map(|i| format!("{i}.tif")).collect();
        assert_eq!(special_folder(&folder, &no_folders, &tiff_files), Some(SpecialFolderKind::TiffStack));

        let plain_files: Vec<String> = vec!["readme.txt".to_string()];
        assert_eq!(special_folder(&folder, &no_folders, &plain_files), None);
    }

    #[test]
    fn special_folder_classifies_yxz_and_point_cloud_and_sample_from_folders() {
        let engine = test_engine(PathBuf::from("/tmp/nonexistent-cache"), "http://example.invalid".to_string());
        let folder = LazyFolder::new(Path::root(), engine);
        let no_files: Vec<String> = vec![];

        let yxz_folders: Vec<String> = vec![
            "cell_yxz_0".to_string(),
            "cell_yxz_1".to_string(),
            "cell_yxz_2".to_string(),
        ];
        assert_eq!(special_folder(&folder, &yxz_folders, &no_files), Some(SpecialFolderKind::YxzGrid));

        let point_cloud_folders: Vec<String> = vec![
            "point_cloud_0".to_string(),
            "point_cloud_1".to_string(),
            "point_cloud_2".to_string(),
        ];
        assert_eq!(
            special_folder(&folder, &point_cloud_folders, &no_files),
            Some(SpecialFolderKind::PointCloud)
        );

        let sample_folders: Vec<String> =
            vec!["sample_0".to_string(), "sample_1".to_string(), "sample_2".to_string()];
        assert_eq!(special_folder(&folder, &sample_folders, &no_files), Some(SpecialFolderKind::Sample));

        let working_mesh_folders: Vec<String> = vec![
            "working_mesh_1_window_a".to_string(),
            "working_mesh_2_window_b".to_string(),
            "working_mesh_3_window_c".to_string(),
        ];
        assert_eq!(
            special_folder(&folder, &working_mesh_folders, &no_files),
            Some(SpecialFolderKind::WorkingMeshWindow)
        );

        let plain_folders: Vec<String> = vec!["subdir".to_string()];
        assert_eq!(special_folder(&folder, &plain_folders, &no_files), None);
    }

    #[test]
    fn special_folder_classifies_by_path_segments() {
        let engine = test_engine(PathBuf::from("/tmp/nonexistent-cache"), "http://example.invalid".to_string());
        let no_folders: Vec<String> = vec![];
        let no_files: Vec<String> = vec![];

        let volpkg = LazyFolder::new(Path::parse("scan.volpkg/paths"), engine.clone());
        assert_eq!(
            special_folder(&volpkg, &no_folders, &no_files),
            Some(SpecialFolderKind::VolpkgPaths)
        );

        let working = LazyFolder::new(Path::parse("scan.volpkg/working"), engine.clone());
        assert_eq!(special_folder(&working, &no_folders, &no_files), Some(SpecialFolderKind::Working));

        let labels = LazyFolder::new(Path::parse("scan.volpkg/volumetric-instance-labels"), engine);
        assert_eq!(
            special_folder(&labels, &no_folders, &no_files),
            Some(SpecialFolderKind::VolumetricInstanceLabels)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefetch_fix_unlinks_and_refetches_corrupt_local_file() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(wpath("/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="e.dat">e.dat</a></td><td>150 B</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;
                Mock::given(method("HEAD"))
                    .and(wpath("/e.dat"))
                    .respond_with(ResponseTemplate::new(200).insert_header("content-length", "150"))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(wpath("/e.dat"))
                    .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 150]))
                    .mount(&server)
                    .await;

                let cache_dir = tempfile::tempdir().unwrap();
                let engine = test_engine(cache_dir.path().to_path_buf(), server.uri());
                let root = LazyFolder::new(Path::root(), engine.clone());

                // Pre-populate a corrupt local copy: 100 bytes instead of 150.
                tokio::fs::write(cache_dir.path().join("e.dat"), vec![0u8; 100]).await.unwrap();

                let semaphore = Arc::new(Semaphore::new(10));
                let errors = Rc::new(RefCell::new(Vec::new()));
                prefetch(root, semaphore, errors.clone(), true).await.unwrap();

                let errors = errors.borrow();
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("expected=150"));
                assert!(errors[0].message.contains("was=100"));

                let refetched = tokio::fs::read(cache_dir.path().join("e.dat")).await.unwrap();
                assert_eq!(refetched.len(), 150);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn completeness_report_sums_downloaded_and_expected_bytes() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(wpath("/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="a.bin">a.bin</a></td><td>10 B</td><td>-</td></tr>
                            <tr><td><a href="b.bin">b.bin</a></td><td>20 B</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;

                let cache_dir = tempfile::tempdir().unwrap();
                let engine = test_engine(cache_dir.path().to_path_buf(), server.uri());
                let root = LazyFolder::new(Path::root(), engine.clone());
                root.children().await.unwrap();

                // Only `a.bin` has been downloaded so far.
                tokio::fs::write(cache_dir.path().join("a.bin"), vec![0u8; 10]).await.unwrap();

                let (downloaded, expected) = completeness_report(root).await.unwrap();
                assert_eq!(downloaded, 10);
                assert_eq!(expected, 30);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn verify_sizes_reports_mismatch_without_touching_the_file() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(wpath("/"))
                    .respond_with(ResponseTemplate::new(200).set_body_string(
                        r#"<table id="list"><tbody>
                            <tr><td><a href="f.dat">f.dat</a></td><td>50 B</td><td>-</td></tr>
                           </tbody></table>"#,
                    ))
                    .mount(&server)
                    .await;
                Mock::given(method("HEAD"))
                    .and(wpath("/f.dat"))
                    .respond_with(ResponseTemplate::new(200).insert_header("content-length", "50"))
                    .mount(&server)
                    .await;

                let cache_dir = tempfile::tempdir().unwrap();
                let engine = test_engine(cache_dir.path().to_path_buf(), server.uri());
                let root = LazyFolder::new(Path::root(), engine.clone());

                let local_path = cache_dir.path().join("f.dat");
                tokio::fs::write(&local_path, vec![0u8; 30]).await.unwrap();

                let errors = Rc::new(RefCell::new(Vec::new()));
                verify_sizes(root, errors.clone()).await.unwrap();

                let errors = errors.borrow();
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("expected=50"));
                assert!(errors[0].message.contains("was=30"));

                // `verify_sizes` never mutates the cache, unlike `prefetch(fix=true)`.
                let still_there = tokio::fs::read(&local_path).await.unwrap();
                assert_eq!(still_there.len(), 30);
            })
            .await;
    }
}
