//! Static file fallback with single-page-app support.
//!
//! Registered with [`App::serve_static`](crate::App::serve_static). Only
//! requests that no protocol handler and no route claimed reach it.
//!
//! In SPA mode (the default) a path that doesn't name an existing file is
//! answered with the index file, so client-side routers can own the URL
//! space. Without SPA mode such paths get the usual `404`.

use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, warn};

use crate::app_error::{AppError, ErrorCode};
use crate::request::Request;
use crate::response::{ContentType, IntoResponse, Response};
use crate::router;

pub const DEFAULT_INDEX: &str = "index.html";

/// Options for [`StaticFiles`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaticOptions {
    pub spa: bool,
    pub index: String,
}

impl StaticOptions {
    pub fn spa(mut self, enable: bool) -> Self {
        self.spa = enable;
        self
    }

    pub fn index(mut self, file: impl Into<String>) -> Self {
        self.index = file.into();
        self
    }
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self { spa: true, index: DEFAULT_INDEX.to_owned() }
    }
}

/// A validated distribution directory.
#[derive(Clone, Debug)]
pub struct StaticFiles {
    root: PathBuf,
    options: StaticOptions,
}

impl StaticFiles {
    /// Checks that `dist` exists and, in SPA mode, that it holds the index
    /// file.
    pub fn new(dist: impl AsRef<Path>, options: StaticOptions) -> Result<Self, AppError> {
        let root = std::path::absolute(dist.as_ref())
            .map_err(|e| AppError::internal("Invalid dist path").with_error(e))?;
        if !root.is_dir() {
            return Err(AppError::not_found("Distribution directory not found")
                .add_internal_log(format!("dist path: {}", root.display())));
        }
        if options.spa {
            let index = root.join(&options.index);
            if !index.is_file() {
                return Err(AppError::not_found("Index file not found")
                    .with_detail(ErrorCode::NotFound, "Index file not found")
                    .with_metadata("path", index.display().to_string()));
            }
        }
        Ok(Self { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StaticOptions {
        &self.options
    }

    /// Route-listing label.
    pub fn label(&self) -> String {
        format!("FileServer({})", self.options.index)
    }

    pub async fn serve(&self, req: &Request) -> Response {
        if !matches!(*req.method(), http::Method::GET | http::Method::HEAD) {
            return router::not_found();
        }
        let Some(relative) = sanitize(req.path()) else {
            debug!(path = req.path(), "rejected static path");
            return router::not_found();
        };

        let mut target = self.root.join(&relative);
        if tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            target.push(&self.options.index);
        }
        match read_file(&target).await {
            Ok(Some(resp)) => return resp,
            Ok(None) => {}
            Err(e) => {
                warn!(path = %target.display(), error = %e, "static file read failed");
                return AppError::internal("An internal error occurred").with_error(e).into_response();
            }
        }

        if !self.options.spa {
            return router::not_found();
        }
        let index = self.root.join(&self.options.index);
        match read_file(&index).await {
            Ok(Some(resp)) => resp,
            Ok(None) => router::not_found(),
            Err(e) => AppError::internal("An internal error occurred").with_error(e).into_response(),
        }
    }
}

/// Reads a regular file. `Ok(None)` means there is nothing to serve there.
async fn read_file(path: &Path) -> io::Result<Option<Response>> {
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let ct = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(ContentType::OctetStream, ContentType::from_extension);
            Ok(Some(Response::builder().status(StatusCode::OK).bytes(ct, Bytes::from(contents))))
        }
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::IsADirectory | io::ErrorKind::NotADirectory
        ) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Turns a URL path into a relative filesystem path, refusing anything that
/// would climb out of the root.
fn sanitize(url_path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(url_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}
