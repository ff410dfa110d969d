//! Archive download and extraction for `sources`.

use super::http::HttpClient;
use anyhow::{Context, Result, bail};
use blake3::Hasher;
use metadata::Authentication;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    TarGz,
    Tar,
    Zip,
}

/// Download `uri` and unpack it into `dir`.
///
/// Returns whether any path the archive writes was added or changed, judged
/// by a content fingerprint of those paths before and after. Other files
/// under `dir` are never read.
pub fn extract(
    http: &HttpClient,
    uri: &str,
    dir: &Path,
    auth: Option<&Authentication>,
) -> Result<bool> {
    let data = http.get_bytes(uri, auth)?;
    let format = detect(uri, &data)?;
    let paths = entry_paths(format, &data).with_context(|| format!("Failed to read {uri}"))?;

    let before = fingerprint(dir, &paths)?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    unpack(format, &data, dir).with_context(|| format!("Failed to extract {uri}"))?;
    let after = fingerprint(dir, &paths)?;

    log::debug!("Extracted {uri} into {} ({} entries)", dir.display(), paths.len());
    Ok(before != after)
}

fn detect(uri: &str, data: &[u8]) -> Result<Format> {
    let name = uri
        .split(['?', '#'])
        .next()
        .unwrap_or(uri)
        .to_ascii_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        return Ok(Format::TarGz);
    }
    if name.ends_with(".tar") {
        return Ok(Format::Tar);
    }
    if name.ends_with(".zip") {
        return Ok(Format::Zip);
    }

    if data.starts_with(&[0x1f, 0x8b]) {
        Ok(Format::TarGz)
    } else if data.starts_with(b"PK\x03\x04") {
        Ok(Format::Zip)
    } else if data.get(257..262) == Some(b"ustar".as_slice()) {
        Ok(Format::Tar)
    } else {
        bail!("Unsupported archive format: {uri}")
    }
}

fn unpack(format: Format, data: &[u8], dir: &Path) -> Result<()> {
    match format {
        Format::TarGz => {
            let decoder = flate2::read::GzDecoder::new(data);
            tar::Archive::new(decoder).unpack(dir)?;
        }
        Format::Tar => tar::Archive::new(data).unpack(dir)?,
        Format::Zip => zip::ZipArchive::new(Cursor::new(data))?.extract(dir)?,
    }
    Ok(())
}

/// Relative paths of the archive entries, sorted and without duplicates
fn entry_paths(format: Format, data: &[u8]) -> Result<Vec<PathBuf>> {
    let mut paths = match format {
        Format::TarGz => tar_paths(flate2::read::GzDecoder::new(data))?,
        Format::Tar => tar_paths(data)?,
        Format::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
            let mut paths = Vec::with_capacity(archive.len());
            for index in 0..archive.len() {
                if let Some(path) = archive.by_index(index)?.enclosed_name() {
                    paths.push(path);
                }
            }
            paths
        }
    };

    paths.retain_mut(|path| {
        *path = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        !path.as_os_str().is_empty()
    });
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn tar_paths(reader: impl Read) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(reader);
    let mut paths = Vec::new();
    for entry in archive.entries()? {
        paths.push(entry?.path()?.into_owned());
    }
    Ok(paths)
}

/// Hash of each listed path under `dir`: its kind, link target or content,
/// and mode. Missing paths hash as absent.
fn fingerprint(dir: &Path, paths: &[PathBuf]) -> Result<blake3::Hash> {
    let mut hasher = Hasher::new();
    for relative in paths {
        let path = dir.join(relative);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(&[0]);

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                hasher.update(b"absent\0");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
            }
        };

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            hasher.update(b"link\0");
            hasher.update(fs::read_link(&path)?.to_string_lossy().as_bytes());
        } else if file_type.is_file() {
            hasher.update(b"file\0");
            let mut file = fs::File::open(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            hasher.update_reader(&mut file)?;
            hash_mode(&mut hasher, &meta);
        } else {
            hasher.update(b"dir\0");
            hash_mode(&mut hasher, &meta);
        }
        hasher.update(&[0]);
    }
    Ok(hasher.finalize())
}

#[cfg(unix)]
fn hash_mode(hasher: &mut Hasher, meta: &fs::Metadata) {
    use std::os::unix::fs::PermissionsExt;
    hasher.update(&meta.permissions().mode().to_le_bytes());
}

#[cfg(not(unix))]
fn hash_mode(_hasher: &mut Hasher, _meta: &fs::Metadata) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn targz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        {
            let mut builder = tar::Builder::new(&mut encoder);
            for (path, data) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        encoder.finish().unwrap()
    }

    fn zipped(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, data) in files {
            writer
                .start_file(*path, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_detect_by_name_and_magic() {
        assert_eq!(detect("https://x/app.tar.gz?v=1", &[]).unwrap(), Format::TarGz);
        assert_eq!(detect("https://x/app.TGZ", &[]).unwrap(), Format::TarGz);
        assert_eq!(detect("https://x/app.zip", &[]).unwrap(), Format::Zip);
        assert_eq!(detect("https://x/download", &targz(&[])).unwrap(), Format::TarGz);
        assert_eq!(
            detect("https://x/download", &zipped(&[("a", b"a")])).unwrap(),
            Format::Zip
        );
        assert!(detect("https://x/download", b"plain text").is_err());
    }

    #[test]
    fn test_targz_extraction_reports_changes() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("app.tar.gz");
        fs::write(&archive, targz(&[("bin/app", b"v1"), ("README", b"hi")])).unwrap();
        let dest = temp.path().join("opt/app");
        let uri = archive.to_string_lossy().into_owned();
        let http = HttpClient::default();

        assert!(extract(&http, &uri, &dest, None).unwrap());
        assert_eq!(fs::read(dest.join("bin/app")).unwrap(), b"v1");
        assert!(!extract(&http, &uri, &dest, None).unwrap());

        fs::write(&archive, targz(&[("bin/app", b"v2"), ("README", b"hi")])).unwrap();
        assert!(extract(&http, &uri, &dest, None).unwrap());
        assert_eq!(fs::read(dest.join("bin/app")).unwrap(), b"v2");
    }

    #[test]
    fn test_unrelated_files_do_not_count_as_changes() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("tools.tgz");
        fs::write(&archive, targz(&[("./tools/run", b"#!/bin/sh\n")])).unwrap();
        let dest = temp.path().join("usr/local");
        let uri = archive.to_string_lossy().into_owned();
        let http = HttpClient::default();

        fs::create_dir_all(dest.join("share")).unwrap();
        fs::write(dest.join("share/notes"), "before").unwrap();
        assert!(extract(&http, &uri, &dest, None).unwrap());

        // Written by something else between runs
        fs::write(dest.join("share/notes"), "after").unwrap();
        fs::write(dest.join("share/new"), "x").unwrap();
        assert!(!extract(&http, &uri, &dest, None).unwrap());

        // A file the archive owns was edited locally and is put back
        fs::write(dest.join("tools/run"), "edited").unwrap();
        assert!(extract(&http, &uri, &dest, None).unwrap());
        assert_eq!(fs::read(dest.join("tools/run")).unwrap(), b"#!/bin/sh\n");
    }

    #[test]
    fn test_entry_paths() {
        let tar = targz(&[("./b/file", b"1"), ("a", b"2"), ("b/file", b"3")]);
        assert_eq!(
            entry_paths(Format::TarGz, &tar).unwrap(),
            [PathBuf::from("a"), PathBuf::from("b/file")]
        );

        let zip = zipped(&[("site/index.html", b"x"), ("site/app.js", b"y")]);
        assert_eq!(
            entry_paths(Format::Zip, &zip).unwrap(),
            [PathBuf::from("site/app.js"), PathBuf::from("site/index.html")]
        );
    }

    #[test]
    fn test_zip_extraction() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("site.zip");
        fs::write(&archive, zipped(&[("index.html", b"<h1>hi</h1>")])).unwrap();
        let dest = temp.path().join("www");

        let uri = format!("file://{}", archive.display());
        assert!(extract(&HttpClient::default(), &uri, &dest, None).unwrap());
        assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"<h1>hi</h1>");
    }
}
