use std::{
    fs::{self, File},
    io::{self, stdout, Cursor, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::anyhow;
use const_format::concatcp;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use zip::ZipArchive;

mod github;

pub use github::{Release, ReleaseAsset};

pub const BUN_REPO: &str = "oven-sh/bun";
pub const RELEASES_URL: &str =
    concatcp!("https://api.github.com/repos/", BUN_REPO, "/releases/latest");
pub const EXTRACT_ROOT: &str = "./.pio";
pub const BINARY_NAME: &str = "bun";

// allow unauthenticated api requests to github.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:136.0) Gecko/20100101 Firefox/136.0";

pub fn get_error_chain(err: &anyhow::Error) -> String {
    err.chain()
        .rev()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" => ")
}

/// Gets the latest bun release from the github api.
pub async fn get_latest(client: &Client) -> anyhow::Result<Release> {
    let resp = client
        .get(RELEASES_URL)
        .header("Accept", "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28")
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    match resp.status() {
        StatusCode::FORBIDDEN => Err(anyhow!(
            "got 403 on api request: {}",
            resp.text().await.map_or_else(
                |_| "no text could be parsed".to_string(),
                |t| t.trim().to_string()
            )
        )),
        StatusCode::OK => Ok(resp.json().await?),
        status => Err(anyhow!("unhandled status {status}")),
    }
}

/// Finds the first asset named exactly `<filter>.zip`.
pub fn find_asset<'a>(filter: &str, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset> {
    let wanted = format!("{filter}.zip");
    assets.iter().find(|a| a.name == wanted)
}

/// Downloads an asset's binary content into memory.
///
/// The asset api url only serves the file itself when asked for
/// `application/octet-stream`.
pub async fn download_asset(client: &Client, asset: &ReleaseAsset) -> anyhow::Result<Vec<u8>> {
    let resp = client
        .get(&asset.url)
        .header("Accept", "application/octet-stream")
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;
    anyhow::ensure!(
        resp.status().is_success(),
        "GET {} returned status code {}",
        asset.url,
        resp.status()
    );

    let download_size = resp
        .content_length()
        .ok_or(anyhow!("could not get content_length"))?;

    let msg = format!("downloading {}", asset.name);
    let term_cols = termsize::get().map_or(0, |s| s.cols as usize);

    let mut bytes = Vec::with_capacity(download_size as usize);
    let mut stdout = stdout().lock();

    let mut bytes_stream = resp.bytes_stream();
    while let Some(chunk) = bytes_stream.next().await {
        let chunk = chunk?;
        bytes.extend_from_slice(&chunk);

        let left = download_size.saturating_sub(bytes.len() as u64);
        let msg = format!("\r{msg}, {left} bytes left");
        write!(stdout, "{msg}{}", " ".repeat(term_cols.saturating_sub(msg.len())))?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(bytes)
}

/// Extracts `<filter>/bun` from the zipped asset to `root`, keeping the
/// entry's path and unix mode.
pub fn extract_binary(archive: &[u8], filter: &str, root: &Path) -> anyhow::Result<PathBuf> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;

    let names = archive.file_names().collect::<Vec<_>>().join(", ");
    println!("archive entries: {names}");

    let entry_path = format!("{filter}/{BINARY_NAME}");
    let mut entry = archive.by_name(&entry_path)?;

    let output = root.join(&entry_path);
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&output)?;
    io::copy(&mut entry, &mut file)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&output, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(output)
}

/// Writes the raw archive bytes to `output_dir/name`, creating `output_dir`
/// if needed.
pub fn save_archive(archive: &[u8], output_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(name);
    fs::write(&path, archive)?;
    Ok(path)
}

/// Fetches the latest bun release, downloads the asset named `<filter>.zip`,
/// extracts `<filter>/bun` under `./.pio` and saves the archive to
/// `output_dir`.
///
/// A release without a matching asset is not an error; a message is printed
/// and nothing is downloaded.
pub async fn fetch(client: &Client, filter: &str, output_dir: &Path) -> anyhow::Result<()> {
    let release = get_latest(client).await?;

    let Some(asset) = find_asset(filter, &release.assets) else {
        println!("could not find a matching asset for filter: {filter}");
        return Ok(());
    };

    println!(
        "downloading {}/{} to {}...",
        release.tag_name,
        asset.name,
        output_dir.join(&asset.name).display()
    );

    let download_start = Instant::now();
    let archive = download_asset(client, asset).await?;
    println!("done! took {:?}", download_start.elapsed());

    let extracted = extract_binary(&archive, filter, Path::new(EXTRACT_ROOT))?;
    println!("extracted {BINARY_NAME} to {}", extracted.display());

    let saved = save_archive(&archive, output_dir, &asset.name)?;
    println!("download complete!");
    println!("file saved at: {}", fs::canonicalize(saved)?.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Cursor, io::Write};

    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            url: format!("https://api.github.com/repos/oven-sh/bun/releases/assets/{name}"),
        }
    }

    fn fixture_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().unix_permissions(0o755);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn find_asset_requires_exact_name() {
        let assets = [
            asset("bun-darwin-aarch64-profile.zip"),
            asset("bun-darwin-aarch64.zip"),
            asset("bun-linux-x64.zip"),
        ];

        let found = find_asset("bun-darwin-aarch64", &assets).unwrap();
        assert_eq!(found.name, "bun-darwin-aarch64.zip");
    }

    #[test]
    fn find_asset_takes_the_first_match() {
        let assets = [asset("bun-linux-x64.zip"), asset("bun-linux-x64.zip")];

        let found = find_asset("bun-linux-x64", &assets).unwrap();
        assert!(std::ptr::eq(found, &assets[0]));
    }

    #[test]
    fn find_asset_misses_on_substring_only() {
        // "windows-x64" is a substring of nothing here, and substrings
        // should not match anyway.
        let assets = [asset("bun-linux-x64.zip")];
        assert!(find_asset("windows-x64", &assets).is_none());
        assert!(find_asset("linux-x64", &assets).is_none());
    }

    #[test]
    fn extract_binary_writes_the_entry_under_root() {
        let archive = fixture_zip(&[
            ("bun-darwin-aarch64/bun", b"#!bun binary"),
            ("bun-darwin-aarch64/LICENSE", b"MIT"),
        ]);
        let root = tempfile::tempdir().unwrap();

        let extracted = extract_binary(&archive, "bun-darwin-aarch64", root.path()).unwrap();

        assert_eq!(extracted, root.path().join("bun-darwin-aarch64/bun"));
        assert_eq!(fs::read(&extracted).unwrap(), b"#!bun binary");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&extracted).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn extract_binary_fails_on_missing_entry() {
        let archive = fixture_zip(&[("bun-linux-x64/bun", b"elf")]);
        let root = tempfile::tempdir().unwrap();

        assert!(extract_binary(&archive, "bun-darwin-aarch64", root.path()).is_err());
    }

    #[test]
    fn save_archive_round_trips_the_bytes() {
        let bytes = fixture_zip(&[("bun-linux-x64/bun", b"elf")]);
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("downloads");

        let saved = save_archive(&bytes, &output_dir, "bun-linux-x64.zip").unwrap();

        assert_eq!(saved, output_dir.join("bun-linux-x64.zip"));
        assert_eq!(fs::read(&saved).unwrap(), bytes);
    }
}
