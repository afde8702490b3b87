use super::{EntryKind, FileAccess, FileMeta, COPY_BUFFER_SIZE};
use crate::error::StorageError;
use async_trait::async_trait;
use filetime::FileTime;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

/// 临时文件名前缀，文件名长度固定，与目标文件名无关
const TEMP_PREFIX: &str = ".dirmirror-";

/// 本地文件系统实现
pub struct LocalStorage {
    name: String,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    /// 复制时使用的临时文件路径：与目标同目录，隐藏文件
    fn temp_path(dst: &Path) -> PathBuf {
        dst.with_file_name(format!("{}{}.tmp", TEMP_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    fn entry_kind(file_type: std::fs::FileType) -> EntryKind {
        if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::Other
        }
    }

    /// 列出目录下一层指定类型的条目名
    async fn list_entries(&self, dir: &Path, wanted: EntryKind) -> Result<Vec<OsString>, StorageError> {
        let dir = dir.to_path_buf();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .follow_root_links(false)
            {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                    match e.into_io_error() {
                        Some(io_err) => StorageError::from_io(path, io_err),
                        None => StorageError::Io {
                            path,
                            source: std::io::Error::other("walkdir error"),
                        },
                    }
                })?;

                let kind = Self::entry_kind(entry.file_type());
                if kind == wanted {
                    names.push(entry.file_name().to_os_string());
                }
            }
            Ok(names)
        })
        .await
        .map_err(|e| StorageError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
    }

    async fn copy_stream(
        src: &Path,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        let mut reader = fs::File::open(src)
            .await
            .map_err(|e| StorageError::from_io(src, e))?;
        let mut writer = fs::File::create(tmp)
            .await
            .map_err(|e| StorageError::from_io(tmp, e))?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| StorageError::from_io(src, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| StorageError::from_io(tmp, e))?;
            total += n as u64;
        }

        writer.flush().await.map_err(|e| StorageError::from_io(tmp, e))?;
        Ok(total)
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileAccess for LocalStorage {
    async fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        let tmp = Self::temp_path(dst);

        // 先写临时文件，再原子重命名，取消或失败时不留半个文件
        let bytes = match Self::copy_stream(src, &tmp, cancel).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, dst).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::from_io(dst, e));
        }

        let metadata = fs::metadata(src)
            .await
            .map_err(|e| StorageError::from_io(src, e))?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        let atime = FileTime::from_last_access_time(&metadata);
        let dst_owned = dst.to_path_buf();
        tokio::task::spawn_blocking(move || filetime::set_file_times(&dst_owned, atime, mtime))
            .await
            .map_err(|e| StorageError::Io {
                path: dst.to_path_buf(),
                source: std::io::Error::other(e),
            })?
            .map_err(|e| StorageError::from_io(dst, e))?;

        info!("已复制: {} -> {} ({} 字节)", src.display(), dst.display(), bytes);
        Ok(bytes)
    }

    async fn delete_file(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!("已删除文件: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                info!("已删除目录及其内容: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<OsString>, StorageError> {
        self.list_entries(dir, EntryKind::File).await
    }

    async fn list_subdir_names(&self, dir: &Path) -> Result<Vec<OsString>, StorageError> {
        self.list_entries(dir, EntryKind::Dir).await
    }

    async fn list_other_names(&self, dir: &Path) -> Result<Vec<OsString>, StorageError> {
        self.list_entries(dir, EntryKind::Other).await
    }

    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>, StorageError> {
        match fs::symlink_metadata(path).await {
            Ok(metadata) => {
                let modified_time = metadata
                    .modified()
                    .map_err(|e| StorageError::from_io(path, e))?;
                let kind = Self::entry_kind(metadata.file_type());
                Ok(Some(FileMeta {
                    size: if kind == EntryKind::File { metadata.len() } else { 0 },
                    modified_time,
                    kind,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_copy_preserves_content_and_mtime() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"hello").unwrap();
        let old = SystemTime::now() - Duration::from_secs(86_400 * 3);
        filetime::set_file_mtime(&src, FileTime::from_system_time(old)).unwrap();

        let storage = LocalStorage::new();
        let bytes = storage
            .copy_file(&src, &dst, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
        let src_meta = std::fs::metadata(&src).unwrap();
        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&src_meta),
            FileTime::from_last_modification_time(&dst_meta)
        );
        assert_eq!(entry_names(dir.path()), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_copy_file_with_long_name() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::create_dir(dir.path().join("dst")).unwrap();
        // 接近文件系统上限的文件名
        let name = "n".repeat(250);
        let src = dir.path().join("src").join(&name);
        let dst = dir.path().join("dst").join(&name);
        std::fs::write(&src, b"long").unwrap();

        let bytes = LocalStorage::new()
            .copy_file(&src, &dst, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read(&dst).unwrap(), b"long");
        assert_eq!(entry_names(&dir.path().join("dst")), vec![name]);
    }

    #[tokio::test]
    async fn test_cancelled_copy_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        std::fs::write(&src, vec![7u8; 1024]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = LocalStorage::new()
            .copy_file(&src, &dst, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dst.exists());
        assert_eq!(entry_names(dir.path()), vec!["a.bin"]);
    }

    #[tokio::test]
    async fn test_list_separates_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f1"), b"1").unwrap();
        std::fs::write(dir.path().join("f2"), b"2").unwrap();
        std::fs::create_dir(dir.path().join("d1")).unwrap();
        std::fs::write(dir.path().join("d1").join("nested"), b"n").unwrap();

        let storage = LocalStorage::new();
        let mut files = storage.list_files(dir.path()).await.unwrap();
        files.sort();
        let dirs = storage.list_subdir_names(dir.path()).await.unwrap();

        assert_eq!(files, vec![OsString::from("f1"), OsString::from("f2")]);
        assert_eq!(dirs, vec![OsString::from("d1")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_listed_separately() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("real_dir")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real_dir"), dir.path().join("dir_link")).unwrap();
        let storage = LocalStorage::new();

        let files = storage.list_files(dir.path()).await.unwrap();
        let dirs = storage.list_subdir_names(dir.path()).await.unwrap();
        let mut others = storage.list_other_names(dir.path()).await.unwrap();
        others.sort();

        assert_eq!(files, vec![OsString::from("real")]);
        assert_eq!(dirs, vec![OsString::from("real_dir")]);
        assert_eq!(others, vec![OsString::from("dir_link"), OsString::from("link")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listing_does_not_follow_root_link() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("inside"), b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(dir.path().join("target"), &link).unwrap();

        let files = LocalStorage::new().list_files(&link).await.unwrap();
        assert!(files.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_file_removes_only_the_link() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("keep"), b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(dir.path().join("target"), &link).unwrap();

        LocalStorage::new().delete_file(&link).await.unwrap();

        assert!(std::fs::symlink_metadata(&link).is_err());
        assert!(dir.path().join("target").join("keep").exists());
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let err = LocalStorage::new()
            .list_files(&dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stat_and_idempotent_ops() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let nested = dir.path().join("x").join("y");

        storage.create_dir_all(&nested).await.unwrap();
        storage.create_dir_all(&nested).await.unwrap();
        assert!(storage.stat(&nested).await.unwrap().unwrap().is_dir());
        assert!(storage.stat(&dir.path().join("missing")).await.unwrap().is_none());

        storage.delete_dir_all(&dir.path().join("x")).await.unwrap();
        storage.delete_dir_all(&dir.path().join("x")).await.unwrap();
        storage.delete_file(&dir.path().join("missing")).await.unwrap();
        assert!(!dir.path().join("x").exists());
    }
}
