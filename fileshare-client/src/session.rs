use std::{
    io,
    path::{Path, PathBuf},
};

use fileshare_core::{
    ApiBase, FileListing, InterfaceTable, UploadCandidate, sanitize_file_name,
    select_server_address,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{api::ApiClient, error::ClientError, notify::Notifier};

pub const NOTICE_NO_FILE_SELECTED: &str = "invalid file";
pub const NOTICE_NO_UPLOAD_CANDIDATE: &str = "select a file first";
const MAX_RENAME_ATTEMPTS: u32 = 200;

/// The file-sharing component: the server's file list, the pending upload
/// and the advertised LAN address, all owned here.
///
/// Every operation reports its own failures through the notifier before
/// returning the error, so callers only need the `Result` for control flow.
/// Upload and delete refresh the listing afterwards whether or not they
/// succeeded.
pub struct FileShareClient<N> {
    api: ApiClient,
    notifier: N,
    download_dir: PathBuf,
    files: FileListing,
    pending_upload: Option<UploadCandidate>,
    server_address: Option<String>,
}

impl<N: Notifier> FileShareClient<N> {
    pub fn new(api: ApiClient, notifier: N, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            notifier,
            download_dir: download_dir.into(),
            files: Vec::new(),
            pending_upload: None,
            server_address: None,
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn pending_upload(&self) -> Option<&UploadCandidate> {
        self.pending_upload.as_ref()
    }

    pub fn server_address(&self) -> Option<&str> {
        self.server_address.as_deref()
    }

    pub fn api_base(&self) -> &ApiBase {
        self.api.base()
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Points the component at a new server. A changed base drops the old
    /// address and reruns start-up against the new one.
    pub async fn set_api_base(&mut self, base: ApiBase) {
        if *self.api.base() == base {
            return;
        }
        info!(base = %base, "api base changed");
        self.api.set_base(base);
        self.server_address = None;
        self.startup().await;
    }

    /// Discovery and the first listing, issued together.
    pub async fn startup(&mut self) {
        let (interfaces, listing) =
            futures::join!(self.api.local_ip(), self.api.list_files());
        // Failures are already surfaced to the user.
        let _ = self.apply_interfaces(interfaces);
        let _ = self.apply_listing(listing);
    }

    pub async fn resolve_server_address(&mut self) -> Result<Option<&str>, ClientError> {
        let interfaces = self.api.local_ip().await;
        self.apply_interfaces(interfaces)?;
        Ok(self.server_address())
    }

    pub async fn refresh_file_list(&mut self) -> Result<&[String], ClientError> {
        let listing = self.api.list_files().await;
        self.apply_listing(listing)?;
        Ok(self.files())
    }

    /// Reads the selected file and holds it as the pending upload.
    pub async fn encode_selected_file(&mut self, path: Option<&Path>) -> Result<(), ClientError> {
        let Some(path) = path else {
            self.notifier.alert(NOTICE_NO_FILE_SELECTED);
            return Err(ClientError::NoFileSelected);
        };

        let candidate = match read_candidate(path).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(file = %path.display(), "could not encode selected file: {err}");
                self.notifier.alert(&failure_notice(&err));
                return Err(err);
            }
        };

        info!(
            file = candidate.name(),
            encoded_len = candidate.content().len(),
            "upload candidate selected"
        );
        self.pending_upload = Some(candidate);
        Ok(())
    }

    /// Sends the pending upload. The candidate is kept afterwards, so a second
    /// submit re-sends the same content.
    pub async fn submit_upload(&mut self) -> Result<(), ClientError> {
        let Some(candidate) = self.pending_upload.as_ref() else {
            self.notifier.alert(NOTICE_NO_UPLOAD_CANDIDATE);
            return Err(ClientError::NoUploadCandidate);
        };

        let request = candidate.to_request();
        let result = self.api.upload(&request).await;
        match &result {
            Ok(()) => info!(file = %request.name, "upload accepted"),
            Err(err) => {
                warn!(file = %request.name, "upload failed: {err}");
                self.notifier.alert(&failure_notice(err));
            }
        }

        let _ = self.refresh_file_list().await;
        result
    }

    /// Fetches `filename` and writes it under the download directory,
    /// returning where it landed.
    pub async fn download_file(&self, filename: &str) -> Result<PathBuf, ClientError> {
        let result = self.fetch_and_save(filename).await;
        if let Err(err) = &result {
            warn!(file = filename, "download failed: {err}");
            self.notifier.alert(&failure_notice(err));
        }
        result
    }

    pub async fn delete_file(&mut self, filename: &str) -> Result<(), ClientError> {
        let result = self.api.delete(filename).await;
        match &result {
            Ok(()) => info!(file = filename, "file deleted"),
            Err(err) => {
                warn!(file = filename, "delete failed: {err}");
                self.notifier.alert(&failure_notice(err));
            }
        }

        let _ = self.refresh_file_list().await;
        result
    }

    fn apply_interfaces(
        &mut self,
        interfaces: Result<InterfaceTable, ClientError>,
    ) -> Result<(), ClientError> {
        match interfaces {
            Ok(table) => {
                match select_server_address(&table) {
                    Some(address) => {
                        info!(%address, interfaces = table.len(), "server address resolved");
                        self.server_address = Some(address);
                    }
                    None => {
                        warn!(
                            interfaces = table.len(),
                            "no interface with a hardware address"
                        );
                        self.server_address = None;
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!("address discovery failed: {err}");
                self.notifier.alert(&failure_notice(&err));
                Err(err)
            }
        }
    }

    fn apply_listing(
        &mut self,
        listing: Result<FileListing, ClientError>,
    ) -> Result<(), ClientError> {
        match listing {
            Ok(files) => {
                info!(count = files.len(), "file list refreshed");
                self.files = files;
                Ok(())
            }
            Err(err) => {
                warn!("file list refresh failed: {err}");
                self.notifier.alert(&failure_notice(&err));
                Err(err)
            }
        }
    }

    async fn fetch_and_save(&self, filename: &str) -> Result<PathBuf, ClientError> {
        let body = self.api.download(filename).await?;

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|source| ClientError::SaveFile {
                path: self.download_dir.clone(),
                source,
            })?;
        let dest = unique_destination(&self.download_dir, &sanitize_file_name(filename)).await?;
        tokio::fs::write(&dest, &body)
            .await
            .map_err(|source| ClientError::SaveFile {
                path: dest.clone(),
                source,
            })?;

        info!(
            file = filename,
            bytes = body.len(),
            sha256 = %hex::encode(Sha256::digest(&body)),
            dest = %dest.display(),
            "download saved"
        );
        Ok(dest)
    }
}

pub fn failure_notice(err: &ClientError) -> String {
    match err {
        ClientError::NoFileSelected => NOTICE_NO_FILE_SELECTED.to_owned(),
        ClientError::NoUploadCandidate => NOTICE_NO_UPLOAD_CANDIDATE.to_owned(),
        other => format!("an error occurred: {}", other.server_text()),
    }
}

async fn read_candidate(path: &Path) -> Result<UploadCandidate, ClientError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ClientError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(UploadCandidate::from_bytes(name, &bytes)?)
}

/// `name`, or `stem (n).ext` when that file already exists. Never picks a
/// path that is already taken.
async fn unique_destination(dir: &Path, name: &str) -> Result<PathBuf, ClientError> {
    let dest = dir.join(name);
    if !path_taken(&dest).await? {
        return Ok(dest);
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let ext = as_path.extension().and_then(|s| s.to_str());
    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{stem} ({i}).{ext}")),
            None => dir.join(format!("{stem} ({i})")),
        };
        if !path_taken(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(ClientError::SaveFile {
        path: dest,
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{MAX_RENAME_ATTEMPTS} renamed copies already exist"),
        ),
    })
}

async fn path_taken(path: &Path) -> Result<bool, ClientError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|source| ClientError::SaveFile {
            path: path.to_path_buf(),
            source,
        })
}
