//! RO-Crate result commit: attaches the produced result file's storage
//! metadata to the provenance graph, appends the run log, and maintains the
//! per-folder index of past runs.

use crate::locate::find_file_by_name;
use crate::provenance::ProvenanceGraph;
use crate::{RdmApi, RdmError};
use anyhow::{Context, Result};
use chrono::Utc;
use runcrate_model::{JobStatus, RunCrateIndexEntry};
use serde_json::{json, Value};
use tracing::info;

const TARGET: &str = "rdm::mutate";

// Checksum attributes copied from the upload response when present,
// in this order.
const CHECKSUM_CANDIDATES: [&str; 4] = ["sha1", "sha256", "sha512", "md5"];

const INDEX_FILENAME: &str = "index.json";

pub fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

pub fn action_status_to_job(status: &str) -> Result<JobStatus, RdmError> {
    match status {
        "CompletedActionStatus" => Ok(JobStatus::Completed),
        "FailedActionStatus" => Ok(JobStatus::Failed),
        other => Err(RdmError::UnexpectedActionStatus(other.to_string())),
    }
}

fn run_log_entity(job_id: &str, log: &str) -> Value {
    json!({
        "@type": "File",
        "@id": format!("runner-{}.log", job_id),
        "dateModified": Utc::now().to_rfc3339(),
        "text": log,
        "lineCount": log.lines().count(),
        "contentSize": log.len(),
        "encodingFormat": "text/plain",
        "name": "Runner log",
    })
}

#[derive(Debug)]
struct MutationPlan {
    action_index: usize,
    result_name: String,
    result_content: Value,
    action_status: String,
}

// Resolves everything the commit needs from the fetched document. All
// malformed-crate conditions surface here, before any network write.
fn plan_mutation(document: &Value) -> Result<MutationPlan> {
    let graph = ProvenanceGraph::from_document(document)?;
    let action_index = graph.create_action_position()?;
    let action = graph.sole_create_action()?;
    let results = action
        .get("result")
        .and_then(Value::as_array)
        .filter(|results| !results.is_empty())
        .ok_or_else(|| RdmError::MalformedCrate("no result entities".into()))?;
    let result_name = results[0]
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| RdmError::MalformedCrate("result entity without @id".into()))?
        .to_string();
    let file_entity = graph.file_by_id(&result_name).ok_or_else(|| {
        RdmError::MalformedCrate(format!("no file entity for result '{}'", result_name))
    })?;
    let text = file_entity
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RdmError::MalformedCrate(format!("result file '{}' without content", result_name))
        })?;
    let result_content: Value =
        serde_json::from_str(text).context("parsing embedded result content")?;
    let action_status = action
        .get("actionStatus")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(MutationPlan {
        action_index,
        result_name,
        result_content,
        action_status,
    })
}

/// Commits the run outcome into the crate document: uploads the embedded
/// result into the staging folder, rewrites the `result` reference with the
/// server-assigned storage attributes, appends the run-log entity and writes
/// the document back. Returns the job status recorded by the crate itself.
pub async fn modify_crate(
    client: &dyn RdmApi,
    job_id: &str,
    crate_file_url: &str,
    staging_folder_url: &str,
    run_log: &str,
) -> Result<JobStatus> {
    let mut document = client.get_json(crate_file_url).await?;
    let plan = plan_mutation(&document)?;

    let folder_url = strip_query(staging_folder_url);
    let upload_url = format!("{}?kind=file&name={}", folder_url, plan.result_name);
    let uploaded = client
        .put_json(&upload_url, Some(&plan.result_content))
        .await?;
    let stored = uploaded
        .get("data")
        .context("upload response without data")?;

    let reference = document
        .pointer_mut(&format!("/@graph/{}/result/0", plan.action_index))
        .and_then(Value::as_object_mut)
        .context("result reference disappeared during mutation")?;
    if let Some(size) = stored.pointer("/attributes/size") {
        reference.insert("size".into(), size.clone());
    }
    if let Some(download) = stored.pointer("/links/download") {
        reference.insert("rdmURL".into(), download.clone());
    }
    reference.insert("name".into(), Value::String(plan.result_name.clone()));
    for candidate in CHECKSUM_CANDIDATES {
        if let Some(checksum) = stored.pointer(&format!("/attributes/{}", candidate)) {
            reference.insert(candidate.into(), checksum.clone());
        }
    }

    document
        .get_mut("@graph")
        .and_then(Value::as_array_mut)
        .context("crate graph disappeared during mutation")?
        .push(run_log_entity(job_id, run_log));

    client.put_json(crate_file_url, Some(&document)).await?;
    info!(
        target: TARGET,
        job_id,
        result = %plan.result_name,
        "crate mutated"
    );
    action_status_to_job(&plan.action_status).map_err(Into::into)
}

/// Appends `entry` to the folder's `index.json`, creating the file with a
/// single-element list when absent. Read-modify-write of the whole list.
pub async fn insert_index(
    client: &dyn RdmApi,
    folder_url: &str,
    entry: &RunCrateIndexEntry,
) -> Result<()> {
    let folder_url = strip_query(folder_url);
    let entry_value = serde_json::to_value(entry).context("serializing index entry")?;
    match find_file_by_name(client, folder_url, INDEX_FILENAME).await? {
        None => {
            let create_url = format!("{}?kind=file&name={}", folder_url, INDEX_FILENAME);
            client
                .put_json(&create_url, Some(&Value::Array(vec![entry_value])))
                .await?;
        }
        Some(index_file) => {
            let upload_url = index_file
                .pointer("/links/upload")
                .and_then(Value::as_str)
                .context("index file without upload link")?
                .to_string();
            let mut index = client.get_json(&upload_url).await?;
            append_index_entry(&mut index, entry_value)?;
            client.put_json(&upload_url, Some(&index)).await?;
        }
    }
    Ok(())
}

// Existing rows keep their order; the new row always goes last.
fn append_index_entry(index: &mut Value, entry: Value) -> Result<()> {
    index
        .as_array_mut()
        .with_context(|| format!("{} is not a list", INDEX_FILENAME))?
        .push(entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crate_document(action_status: &str) -> Value {
        json!({
            "@graph": [
                {"@id": "./", "@type": "Dataset"},
                {
                    "@id": "#run",
                    "@type": "CreateAction",
                    "actionStatus": action_status,
                    "object": [{"@id": "nb.ipynb"}],
                    "result": [{"@id": "result.json"}]
                },
                {
                    "@id": "result.json",
                    "@type": "File",
                    "text": "{\"outputs\": [1, 2]}"
                }
            ]
        })
    }

    #[test]
    fn plan_resolves_result_content() {
        let plan = plan_mutation(&crate_document("CompletedActionStatus")).unwrap();
        assert_eq!(plan.result_name, "result.json");
        assert_eq!(plan.action_index, 1);
        assert_eq!(plan.result_content["outputs"][1], 2);
        assert_eq!(plan.action_status, "CompletedActionStatus");
    }

    #[test]
    fn plan_fails_without_create_action() {
        let document = json!({"@graph": [{"@id": "./", "@type": "Dataset"}]});
        let err = plan_mutation(&document).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RdmError>(),
            Some(RdmError::MalformedCrate(_))
        ));
    }

    #[test]
    fn plan_fails_when_result_entity_is_absent() {
        let mut document = crate_document("CompletedActionStatus");
        document["@graph"].as_array_mut().unwrap().pop();
        let err = plan_mutation(&document).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RdmError>(),
            Some(RdmError::MalformedCrate(_))
        ));
    }

    #[test]
    fn plan_fails_on_empty_result_list() {
        let mut document = crate_document("CompletedActionStatus");
        document["@graph"][1]["result"] = json!([]);
        let err = plan_mutation(&document).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RdmError>(),
            Some(RdmError::MalformedCrate(_))
        ));
    }

    #[test]
    fn action_status_mapping() {
        assert_eq!(
            action_status_to_job("CompletedActionStatus").unwrap(),
            JobStatus::Completed
        );
        assert_eq!(
            action_status_to_job("FailedActionStatus").unwrap(),
            JobStatus::Failed
        );
        assert!(matches!(
            action_status_to_job("ActiveActionStatus"),
            Err(RdmError::UnexpectedActionStatus(_))
        ));
    }

    #[test]
    fn run_log_entity_carries_counts() {
        let entity = run_log_entity("job-1", "line one\nline two\n");
        assert_eq!(entity["@id"], "runner-job-1.log");
        assert_eq!(entity["lineCount"], 2);
        assert_eq!(entity["contentSize"], 18);
        assert_eq!(entity["encodingFormat"], "text/plain");
    }

    #[test]
    fn index_append_preserves_existing_order() {
        let mut index = json!([
            {"id": "j1", "name": "j1.json"},
            {"id": "j2", "name": "j2.json"}
        ]);
        append_index_entry(&mut index, json!({"id": "j3", "name": "j3.json"})).unwrap();
        let ids: Vec<&str> = index
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["j1", "j2", "j3"]);

        let mut not_a_list = json!({"id": "j1"});
        assert!(append_index_entry(&mut not_a_list, json!({})).is_err());
    }

    #[test]
    fn query_is_stripped() {
        assert_eq!(
            strip_query("https://files.rdm.example/v1/x?kind=folder"),
            "https://files.rdm.example/v1/x"
        );
        assert_eq!(strip_query("https://files.rdm.example/v1/x"), "https://files.rdm.example/v1/x");
    }
}
