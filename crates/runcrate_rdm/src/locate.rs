//! Source-reference resolution: mapping web URLs, file-store URLs and
//! RO-Crate references onto RDM entity coordinates.

use crate::provenance::ProvenanceGraph;
use crate::{RdmApi, RdmError, RdmSession};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::debug;
use url::Url;

const TARGET: &str = "rdm::locate";

/// Marker prefix selecting RO-Crate interpretation of a source reference.
pub const CRATE_PREFIX: &str = "crate+";

pub fn is_crate_ref(url: &str) -> bool {
    url.starts_with(CRATE_PREFIX)
}

pub fn strip_crate_prefix(url: &str) -> &str {
    url.strip_prefix(CRATE_PREFIX).unwrap_or(url)
}

fn path_segments(url: &str) -> Result<Vec<String>, RdmError> {
    let parsed =
        Url::parse(url).map_err(|err| RdmError::InvalidSource(format!("{}: {}", url, err)))?;
    Ok(parsed
        .path()
        .trim_start_matches('/')
        .split('/')
        .map(str::to_string)
        .collect())
}

/// RDM node id is the first path segment of a web URL.
pub fn extract_node_id(url: &str) -> Result<String, RdmError> {
    let segments = path_segments(url)?;
    if segments.len() <= 1 {
        return Err(RdmError::InvalidSource(format!("too few segments: {}", url)));
    }
    Ok(segments[0].clone())
}

/// Storage provider name, tolerating an optional `dir` segment between
/// `files` and the provider.
pub fn extract_storage_provider(url: &str) -> Result<String, RdmError> {
    let segments = path_segments(url)?;
    let mut iter = segments.into_iter();
    let _node = iter
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RdmError::InvalidSource(format!("missing node id: {}", url)))?;
    match iter.next() {
        Some(ref seg) if seg == "files" => {}
        _ => return Err(RdmError::InvalidSource(format!("missing files segment: {}", url))),
    }
    let provider_or_dir = iter
        .next()
        .ok_or_else(|| RdmError::InvalidSource(format!("missing provider: {}", url)))?;
    if provider_or_dir != "dir" {
        return Ok(provider_or_dir);
    }
    iter.next()
        .ok_or_else(|| RdmError::InvalidSource(format!("missing provider after dir: {}", url)))
}

/// `"rdm"` when the reference lives under the configured web origin,
/// `"unknown"` otherwise.
pub fn target_provider(session: &RdmSession, url: &str) -> Result<&'static str, RdmError> {
    let url = strip_crate_prefix(url);
    if url.starts_with(session.web_url()?) {
        Ok("rdm")
    } else {
        Ok("unknown")
    }
}

fn web_remainder<'a>(session: &RdmSession, url: &'a str) -> Result<Vec<&'a str>, RdmError> {
    let web_url = session.web_url()?;
    let rest = url.strip_prefix(web_url).ok_or_else(|| {
        RdmError::InvalidSource(format!("{} is outside the web origin {}", url, web_url))
    })?;
    Ok(rest.trim_start_matches('/').split('/').collect())
}

/// Maps a web URL onto the file-store API URL for the same entity.
pub fn files_api_url(session: &RdmSession, url: &str) -> Result<String, RdmError> {
    let mut parts = web_remainder(session, url)?.into_iter();
    let node_id = parts
        .next()
        .ok_or_else(|| RdmError::InvalidSource(format!("unexpected path: {}", url)))?;
    if parts.next() != Some("files") {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", url)));
    }
    let mut rest: Vec<&str> = parts.collect();
    if rest.first() == Some(&"dir") {
        rest.remove(0);
    }
    if rest.is_empty() {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", url)));
    }
    let provider = rest.remove(0);
    let path = rest.join("/");
    Ok(format!(
        "{}/resources/{}/providers/{}/{}",
        session.files_url()?,
        node_id,
        provider,
        path
    ))
}

/// Reverse mapping: a file-store URL back to the human-facing web URL.
pub fn web_url_from_files(session: &RdmSession, files_url: &str) -> Result<String, RdmError> {
    let base = session.files_url()?;
    let rest = files_url.strip_prefix(base).ok_or_else(|| {
        RdmError::InvalidSource(format!("{} is outside the files origin {}", files_url, base))
    })?;
    let mut parts = rest.trim_start_matches('/').split('/');
    if parts.next() != Some("resources") {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", files_url)));
    }
    let node_id = parts
        .next()
        .ok_or_else(|| RdmError::InvalidSource(format!("unexpected path: {}", files_url)))?;
    if parts.next() != Some("providers") {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", files_url)));
    }
    let provider = parts
        .next()
        .ok_or_else(|| RdmError::InvalidSource(format!("unexpected path: {}", files_url)))?;
    let path = parts.collect::<Vec<_>>().join("/");
    Ok(format!(
        "{}/{}/files/{}/{}",
        session.web_url()?,
        node_id,
        provider,
        path
    ))
}

/// Provider-root folder URL on the file-store API for the given web URL.
pub fn parent_folder_url(session: &RdmSession, source_url: &str) -> Result<String, RdmError> {
    let parts = web_remainder(session, source_url)?;
    if parts.len() < 4 {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", source_url)));
    }
    let mut parts = parts.into_iter();
    let node_id = parts.next().unwrap_or_default();
    if parts.next() != Some("files") {
        return Err(RdmError::InvalidSource(format!("unexpected path: {}", source_url)));
    }
    let mut provider = parts
        .next()
        .ok_or_else(|| RdmError::InvalidSource(format!("unexpected path: {}", source_url)))?;
    if provider == "dir" {
        provider = parts
            .next()
            .ok_or_else(|| RdmError::InvalidSource(format!("unexpected path: {}", source_url)))?;
    }
    Ok(format!(
        "{}/resources/{}/providers/{}/",
        session.files_url()?,
        node_id,
        provider
    ))
}

/// Resolves a source reference into `(notebook filename, repo location)`.
pub async fn resolve_source(
    client: &dyn RdmApi,
    session: &RdmSession,
    source_url: &str,
) -> Result<(String, String)> {
    if is_crate_ref(source_url) {
        let notebook =
            notebook_from_crate(client, session, strip_crate_prefix(source_url)).await?;
        return Ok((notebook, source_url.to_string()));
    }
    resolve_file_source(client, session, source_url).await
}

async fn notebook_from_crate(
    client: &dyn RdmApi,
    session: &RdmSession,
    url: &str,
) -> Result<String> {
    let files_url = files_api_url(session, url)?;
    let document = client.get_json(&files_url).await?;
    let graph = ProvenanceGraph::from_document(&document)?;
    let action = graph.sole_create_action()?;
    let object = action
        .get("object")
        .and_then(Value::as_array)
        .filter(|objects| !objects.is_empty())
        .ok_or_else(|| RdmError::MalformedCrate("no object entities".into()))?;
    let id = object[0]
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| RdmError::MalformedCrate("object entity without @id".into()))?;
    Ok(id.to_string())
}

async fn resolve_file_source(
    client: &dyn RdmApi,
    session: &RdmSession,
    url: &str,
) -> Result<(String, String)> {
    let files_url = files_api_url(session, url)?;
    let metadata = client.get_json(&format!("{}?meta=", files_url)).await?;
    let attributes = metadata
        .pointer("/data/attributes")
        .context("file metadata without attributes")?;
    let kind = attributes.get("kind").and_then(Value::as_str).unwrap_or("");
    if kind != "file" {
        return Err(RdmError::InvalidSource(format!("not a file: {}", kind)).into());
    }
    let materialized = attributes
        .get("materialized")
        .and_then(Value::as_str)
        .context("file metadata without materialized path")?
        .trim_start_matches('/')
        .to_string();
    let resource = attributes
        .get("resource")
        .and_then(Value::as_str)
        .context("file metadata without resource")?;
    let provider = attributes
        .get("provider")
        .and_then(Value::as_str)
        .context("file metadata without provider")?;
    let repo_url = format!("{}/{}/files/dir/{}", session.web_url()?, resource, provider);
    Ok((materialized, repo_url))
}

/// First entry in `folder_url` whose name matches, if any.
pub async fn find_file_by_name(
    client: &dyn RdmApi,
    folder_url: &str,
    name: &str,
) -> Result<Option<Value>> {
    let listing = client.get_json(folder_url).await?;
    let files = listing
        .get("data")
        .and_then(Value::as_array)
        .with_context(|| format!("folder listing without data: {}", folder_url))?;
    Ok(files
        .iter()
        .find(|file| {
            file.pointer("/attributes/name").and_then(Value::as_str) == Some(name)
        })
        .cloned())
}

/// Locates the staging folder under `parent_url`, creating it when absent.
/// Returns the folder's upload endpoint. Creation is check-then-create; the
/// folder is re-queried afterwards instead of trusting the create response.
pub async fn staging_folder(
    client: &dyn RdmApi,
    session: &RdmSession,
    parent_url: &str,
) -> Result<String> {
    let name = session.staging_folder_name();
    let found = match find_file_by_name(client, parent_url, name).await? {
        Some(found) => found,
        None => {
            debug!(target: TARGET, folder = name, "staging folder absent, creating");
            client
                .put_json(&format!("{}?kind=folder&name={}", parent_url, name), None)
                .await?;
            match find_file_by_name(client, parent_url, name).await? {
                Some(found) => found,
                None => bail!("cannot create folder: {}", name),
            }
        }
    };
    found
        .pointer("/links/upload")
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("folder {} without upload link", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RdmConfig, RdmToken};

    fn session() -> RdmSession {
        RdmSession::new(
            RdmConfig {
                web_url: "https://rdm.example".into(),
                api_url: "https://api.rdm.example/v2".into(),
                files_url: "https://files.rdm.example/v1".into(),
                service_id: "rdm.example".into(),
                staging_folder_name: ".run-crates".into(),
            },
            Some(RdmToken {
                token: "t".into(),
                service_id: "rdm.example".into(),
            }),
        )
    }

    #[test]
    fn crate_prefix_is_stripped() {
        assert!(is_crate_ref("crate+https://rdm.example/x/files/osf/a"));
        assert_eq!(
            strip_crate_prefix("crate+https://rdm.example/x"),
            "https://rdm.example/x"
        );
        assert_eq!(strip_crate_prefix("https://rdm.example/x"), "https://rdm.example/x");
    }

    #[test]
    fn node_id_and_provider_from_url() {
        let url = "https://rdm.example/abc12/files/osfstorage/nb.ipynb";
        assert_eq!(extract_node_id(url).unwrap(), "abc12");
        assert_eq!(extract_storage_provider(url).unwrap(), "osfstorage");
    }

    #[test]
    fn provider_tolerates_dir_segment() {
        let url = "https://rdm.example/abc12/files/dir/osfstorage/sub/nb.ipynb";
        assert_eq!(extract_storage_provider(url).unwrap(), "osfstorage");
    }

    #[test]
    fn provider_requires_files_segment() {
        let err = extract_storage_provider("https://rdm.example/abc12/view/osfstorage").unwrap_err();
        assert!(matches!(err, RdmError::InvalidSource(_)));
    }

    #[test]
    fn parent_folder_is_provider_root() {
        let url = "https://rdm.example/abc12/files/osfstorage/nb.ipynb";
        assert_eq!(
            parent_folder_url(&session(), url).unwrap(),
            "https://files.rdm.example/v1/resources/abc12/providers/osfstorage/"
        );
    }

    #[test]
    fn files_api_url_mapping() {
        let url = "https://rdm.example/abc12/files/osfstorage/nb.ipynb";
        assert_eq!(
            files_api_url(&session(), url).unwrap(),
            "https://files.rdm.example/v1/resources/abc12/providers/osfstorage/nb.ipynb"
        );
    }

    #[test]
    fn files_api_url_rejects_foreign_origin() {
        let err = files_api_url(&session(), "https://elsewhere.example/a/files/p/x").unwrap_err();
        assert!(matches!(err, RdmError::InvalidSource(_)));
    }

    #[test]
    fn web_url_round_trip() {
        let files_url = "https://files.rdm.example/v1/resources/abc12/providers/osfstorage/j1.json";
        assert_eq!(
            web_url_from_files(&session(), files_url).unwrap(),
            "https://rdm.example/abc12/files/osfstorage/j1.json"
        );
    }

    #[test]
    fn target_provider_matches_origin() {
        let session = session();
        assert_eq!(
            target_provider(&session, "https://rdm.example/abc12/files/osfstorage/nb.ipynb")
                .unwrap(),
            "rdm"
        );
        assert_eq!(
            target_provider(&session, "crate+https://rdm.example/abc12/files/osfstorage/c.json")
                .unwrap(),
            "rdm"
        );
        assert_eq!(
            target_provider(&session, "https://github.example/repo").unwrap(),
            "unknown"
        );
    }
}
