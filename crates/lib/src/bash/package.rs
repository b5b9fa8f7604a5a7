//! Packaging a `bash_binary` with its transitive sources.
//!
//! The default format is a tar.gz written in-process with fixed metadata
//! (mtime 0, uid/gid 0, no user names), so equal sources always produce an
//! equal archive digest. The zip format shells out to the `zip` binary found
//! on the Bash search path.

use std::io::Write;

use flate2::{Compression, GzBuilder};
use serde::Serialize;
use tracing::info;

use super::options::{ArchiveFormat, PackageOptions};
use super::setup::BashSetup;
use super::sources::{SourceFiles, SourceFilesRequest, TransitiveTargetsRequest};
use crate::error::Error;
use crate::execute::Context;
use crate::process::{ProcessResult, ProcessSpec};
use crate::rules::RuleDef;
use crate::store::{FileContent, Snapshot};
use crate::target::{Address, SharedTargetGraph, TargetError, TargetKind, TransitiveTargets};
use crate::tools::{BinaryPathRequest, BinaryPaths};
use crate::util::hash::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRequest {
  pub address: Address,
}

/// A packaged binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
  /// Tree holding the archive at its output path.
  pub digest: Digest,
  /// Paths of the written archives, relative to the dist dir.
  pub artifacts: Vec<String>,
  /// Files that went into the archive.
  pub sources: Vec<String>,
}

pub(crate) fn package_rule() -> RuleDef {
  RuleDef::new("bash.package", |ctx: Context, request: PackageRequest| async move {
    let graph = ctx.option::<SharedTargetGraph>()?;
    let options = ctx.option::<PackageOptions>()?;

    let target = graph.target(&request.address)?;
    if target.kind != TargetKind::BashBinary {
      return Err(TargetError::invalid(&request.address, format!("{} cannot be packaged", target.kind)).into());
    }

    let closure = ctx
      .get::<TransitiveTargetsRequest, TransitiveTargets>(TransitiveTargetsRequest::new([request.address.clone()]))
      .await?;
    let sources = ctx
      .get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(closure.closure_addresses()))
      .await?;

    let filename = target.output_filename(options.format.extension());
    let digest = match options.format {
      ArchiveFormat::TarGz => {
        let files = ctx.store().contents(&sources.snapshot.digest)?;
        let archive = tar_gz(&files)?;
        ctx.store().create_digest(&[FileContent::new(filename.as_str(), archive)])?
      }
      ArchiveFormat::Zip => zip(&ctx, &request.address, &sources.snapshot, &filename).await?,
    };

    info!(address = %request.address, artifact = %filename, files = sources.files().len(), "packaged");
    Ok(BuiltPackage {
      digest,
      artifacts: vec![filename],
      sources: sources.snapshot.files.clone(),
    })
  })
  .gets::<TransitiveTargetsRequest, TransitiveTargets>()
  .gets::<SourceFilesRequest, SourceFiles>()
  .gets::<BinaryPathRequest, BinaryPaths>()
  .gets::<ProcessSpec, ProcessResult>()
}

/// Write `files` into a gzip-compressed tarball with normalized metadata.
pub fn tar_gz(files: &[FileContent]) -> Result<Vec<u8>, Error> {
  let failed = |e: std::io::Error| Error::custom(format!("failed to write archive: {e}"));

  let encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  let mut sorted: Vec<&FileContent> = files.iter().collect();
  sorted.sort_by(|a, b| a.path.cmp(&b.path));

  for file in sorted {
    let mut header = tar::Header::new_gnu();
    header.set_size(file.content.len() as u64);
    header.set_mode(if file.is_executable { 0o755 } else { 0o644 });
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder
      .append_data(&mut header, &file.path, file.content.as_slice())
      .map_err(failed)?;
  }

  let mut encoder = builder.into_inner().map_err(failed)?;
  encoder.flush().map_err(failed)?;
  encoder.finish().map_err(failed)
}

async fn zip(ctx: &Context, address: &Address, sources: &Snapshot, filename: &str) -> Result<Digest, Error> {
  let setup = ctx.option::<BashSetup>()?;
  let request = BinaryPathRequest::new("zip", setup.search_dirs()).with_test(vec!["-v".to_string()]);
  let paths = ctx.get::<BinaryPathRequest, BinaryPaths>(request).await?;
  let zip = paths.first_path_or_raise()?;

  // zip will not create parent directories, so write at the top level and
  // move the archive into place afterwards.
  let archive_name = filename.rsplit('/').next().unwrap_or(filename).to_string();
  let mut argv = vec![zip.path.display().to_string(), archive_name.clone()];
  argv.extend(sources.files.iter().cloned());

  let spec = ProcessSpec::new(argv, sources.digest)
    .output_files(vec![archive_name.clone()])
    .description(format!("Zip {address} and its dependencies."));
  let result = ctx.get::<ProcessSpec, ProcessResult>(spec).await?;

  if archive_name == filename {
    return Ok(result.0.output_digest);
  }
  let mut contents = ctx.store().contents(&result.0.output_digest)?;
  for file in &mut contents {
    if file.path == archive_name {
      file.path = filename.to_string();
    }
  }
  Ok(ctx.store().create_digest(&contents)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bash::testutil::Workspace;
  use flate2::read::GzDecoder;
  use std::io::Read;

  fn entries(archive: &[u8]) -> Vec<(String, u32, String)> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    archive
      .entries()
      .unwrap()
      .map(|entry| {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mode = entry.header().mode().unwrap();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        (path, mode, body)
      })
      .collect()
  }

  #[test]
  fn tar_gz_is_sorted_and_deterministic() {
    let files = vec![
      FileContent::new("lib/b.sh", "b\n"),
      FileContent::new("app/a.sh", "a\n").executable(),
    ];
    let mut reversed = files.clone();
    reversed.reverse();

    let first = tar_gz(&files).unwrap();
    assert_eq!(first, tar_gz(&reversed).unwrap());
    assert_eq!(
      entries(&first),
      vec![
        ("app/a.sh".to_string(), 0o755, "a\n".to_string()),
        ("lib/b.sh".to_string(), 0o644, "b\n".to_string()),
      ]
    );
  }

  #[tokio::test]
  async fn package_includes_transitive_sources() {
    let ws = Workspace::new()
      .file("app/main.sh", "source lib/util.sh\n")
      .file("lib/util.sh", "util() { :; }\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[])
      .target("app:app", TargetKind::BashBinary, &["main.sh"], &["lib:lib"]);
    let executor = ws.executor();

    let package = executor
      .request::<PackageRequest, BuiltPackage>(PackageRequest {
        address: Address::new("app", "app"),
      })
      .await
      .unwrap();

    assert_eq!(package.artifacts, vec!["app/app.tar.gz"]);
    assert_eq!(package.sources, vec!["app/main.sh", "lib/util.sh"]);

    let contents = executor.store().contents(&package.digest).unwrap();
    assert_eq!(contents.len(), 1);
    let paths: Vec<_> = entries(&contents[0].content).into_iter().map(|(p, _, _)| p).collect();
    assert_eq!(paths, vec!["app/main.sh", "lib/util.sh"]);
  }

  /// Writes its own path and argv into the archive it was asked to create.
  #[cfg(unix)]
  const FAKE_ZIP: &str = "#!/bin/sh
if [ \"$1\" = -v ]; then
  exit 0
fi
printf '%s\\n' \"$0\" \"$@\" > \"$1\"
";

  #[cfg(unix)]
  #[tokio::test]
  async fn zip_runs_the_zip_binary_and_moves_the_archive() {
    use std::os::unix::fs::PermissionsExt;

    let tools = tempfile::TempDir::new().unwrap();
    let zip_path = tools.path().join("zip");
    std::fs::write(&zip_path, FAKE_ZIP).unwrap();
    std::fs::set_permissions(&zip_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut ws = Workspace::new()
      .file("app/main.sh", "source lib/util.sh\n")
      .file("lib/util.sh", "util() { :; }\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[])
      .target("app:app", TargetKind::BashBinary, &["main.sh"], &["lib:lib"]);
    ws.config_mut().package.format = ArchiveFormat::Zip;
    ws.config_mut().bash_setup.executable_search_paths = vec![tools.path().display().to_string()];
    let executor = ws.executor();

    let package = executor
      .request::<PackageRequest, BuiltPackage>(PackageRequest {
        address: Address::new("app", "app"),
      })
      .await
      .unwrap();

    assert_eq!(package.artifacts, vec!["app/app.zip"]);
    let contents = executor.store().contents(&package.digest).unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].path, "app/app.zip");

    let argv = String::from_utf8(contents[0].content.clone()).unwrap();
    let expected = format!("{}\napp.zip\napp/main.sh\nlib/util.sh\n", zip_path.display());
    assert_eq!(argv, expected);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn zip_without_a_zip_binary_fails() {
    let tools = tempfile::TempDir::new().unwrap();
    let mut ws = Workspace::new()
      .file("app/main.sh", "echo hi\n")
      .target("app:app", TargetKind::BashBinary, &["main.sh"], &[]);
    ws.config_mut().package.format = ArchiveFormat::Zip;
    ws.config_mut().bash_setup.executable_search_paths = vec![tools.path().display().to_string()];
    let executor = ws.executor();

    let err = executor
      .request::<PackageRequest, BuiltPackage>(PackageRequest {
        address: Address::new("app", "app"),
      })
      .await
      .unwrap_err();
    match err.root_cause() {
      Error::Tool(crate::tools::ToolError::ToolNotFound { name, .. }) => assert_eq!(name, "zip"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn library_cannot_be_packaged() {
    let ws = Workspace::new()
      .file("lib/util.sh", "util() { :; }\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[]);
    let executor = ws.executor();

    let err = executor
      .request::<PackageRequest, BuiltPackage>(PackageRequest {
        address: Address::new("lib", "lib"),
      })
      .await
      .unwrap_err();
    assert!(matches!(err.root_cause(), Error::Target(TargetError::InvalidTarget { .. })));
  }
}
