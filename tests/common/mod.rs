//! Fixtures shared by the async specs.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use axum::Router;
use coqpod::config::PodConfig;
use tempfile::TempDir;
use tower_http::services::ServeDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Build a package archive holding `files`.
pub fn package_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer.write_all(bytes).expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish archive")
        .into_inner()
}

/// Serve `dir` over HTTP on an ephemeral port; returns the base URL.
pub async fn serve_dir(dir: &Path) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    let app = Router::new().fallback_service(ServeDir::new(dir.to_path_buf()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });
    format!("http://{}", addr)
}

/// A binary root holding a kernel image, plus a config pointing at it with a
/// fresh sandbox.
pub fn fixture() -> (TempDir, PodConfig) {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(bin.join("coq")).expect("Failed to create bin dir");
    std::fs::write(bin.join("coq/kernel.img"), b"\0kernel image").expect("Failed to write image");

    let config = PodConfig {
        binary_root: bin.display().to_string(),
        vfs_root: temp.path().join("vfs"),
        ..PodConfig::default()
    };
    (temp, config)
}

/// Drop a `.coq-pkg` archive into the fixture's bundled package directory.
pub fn bundle_package(temp: &TempDir, name: &str, files: &[(&str, &[u8])]) {
    let path = temp.path().join("bin/coq").join(format!("{name}.coq-pkg"));
    std::fs::write(path, package_archive(files)).expect("Failed to write package");
}
