use runcrate_model::*;
use serde_json::json;

#[test]
fn job_round_trip() {
    let job = Job::new("https://rdm.example/abc12/files/osfstorage/nb.ipynb")
        .with_id("job-0001".to_string());

    let serialized = serde_json::to_string_pretty(&job).expect("serialize job");
    let restored: Job = serde_json::from_str(&serialized).expect("deserialize job");
    assert_eq!(restored.id, "job-0001");
    assert_eq!(restored.status, JobStatus::Queued);
    assert!(restored.result_url.is_none());
}

#[test]
fn status_wire_form_is_snake_case() {
    assert_eq!(
        serde_json::to_value(JobStatus::Building).expect("status"),
        json!("building")
    );
    let status: JobStatus = serde_json::from_value(json!("completed")).expect("status");
    assert!(status.is_terminal());
    assert_eq!("failed".parse::<JobStatus>().expect("parse"), JobStatus::Failed);
    assert!("unknown".parse::<JobStatus>().is_err());
}

#[test]
fn index_entry_round_trip() {
    let entry = RunCrateIndexEntry {
        notebook: "nb.ipynb".into(),
        id: "j1".into(),
        created_at: "2026-01-01T00:00:00Z".into(),
        updated_at: "2026-01-01T00:05:00Z".into(),
        name: "j1.json".into(),
        status: JobStatus::Completed,
        links: vec![
            IndexLink {
                rel: "download".into(),
                href: "https://files.rdm.example/resources/abc12/providers/osfstorage/j1.json"
                    .into(),
            },
            IndexLink {
                rel: "web".into(),
                href: "https://rdm.example/abc12/files/osfstorage/j1.json".into(),
            },
        ],
    };

    let serialized = serde_json::to_string(&entry).expect("serialize entry");
    let restored: RunCrateIndexEntry = serde_json::from_str(&serialized).expect("deserialize");
    assert_eq!(restored.links.len(), 2);
    assert_eq!(restored.links[0].rel, "download");
    assert_eq!(restored.status, JobStatus::Completed);
}
