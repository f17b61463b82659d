//! Check the published release against the running binary.

use semver::Version;

use crate::http::HttpClient;
use crate::Result;

/// Blob holding the latest published CLI version, one semver string.
pub const LATEST_RELEASE_BLOB: &str = "latest-release";

/// Fetch the latest published release version from the bucket.
pub async fn latest_release(client: &HttpClient, base_url: &str) -> Result<Version> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), LATEST_RELEASE_BLOB);
    let body = client.get_text(&url).await?;
    let version = Version::parse(body.trim().trim_start_matches('v'))?;
    Ok(version)
}

/// True when `current` is at least as new as `latest`.
pub fn is_up_to_date(current: &str, latest: &Version) -> bool {
    match Version::parse(current.trim_start_matches('v')) {
        Ok(current) => current >= *latest,
        Err(_) => false,
    }
}
