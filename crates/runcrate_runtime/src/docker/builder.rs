use crate::config::{self, BUILD_USER_ID, BUILD_USER_NAME, LABEL_PREFIX};
use crate::docker::{docker_command, piped, stream_combined_output};
use crate::{ImageBuilder, RuntimeError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use runcrate_model::{BuildSpec, JobStatus, LogSink};
use tracing::{debug, info};

const TARGET: &str = "runtime::builder";

static REUSE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Reusing existing image \(([^)]+)\)").expect("reuse pattern"));
static TAGGED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Successfully tagged\s+(\S+)").expect("tagged pattern"));

/// Watches the build log for the two outcome lines. The whole log is always
/// read; the last matching line wins.
#[derive(Debug, Default)]
pub struct BuildLogScanner {
    image: Option<String>,
}

impl BuildLogScanner {
    pub fn observe(&mut self, line: &str) {
        if let Some(captures) = REUSE_PATTERN.captures(line) {
            self.image = Some(captures[1].to_string());
            debug!(target: TARGET, image = &captures[1], "reuse detected");
        }
        if let Some(captures) = TAGGED_PATTERN.captures(line) {
            self.image = Some(captures[1].to_string());
            debug!(target: TARGET, image = &captures[1], "tag detected");
        }
    }

    pub fn into_image(self) -> Option<String> {
        self.image
    }
}

/// Builds an image by running repo2docker in build-only mode inside a
/// throwaway container bound to the host docker socket.
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    repo2docker_image: String,
}

impl Default for DockerImageBuilder {
    fn default() -> Self {
        Self {
            repo2docker_image: config::repo2docker_image().to_string(),
        }
    }
}

impl DockerImageBuilder {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.repo2docker_image = image.into();
        self
    }

    fn argv(&self, spec: &BuildSpec) -> Vec<String> {
        let mut argv: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-v".into(),
            "/var/run/docker.sock:/var/run/docker.sock".into(),
        ];
        for (key, value) in &spec.envs {
            argv.push("-e".into());
            argv.push(format!("{}={}", key, value));
        }
        argv.push("--label".into());
        argv.push(format!("repo2docker.repo={}", spec.repo_url));
        argv.push("--label".into());
        argv.push("repo2docker.ref=HEAD".into());
        for (key, value) in &spec.labels {
            argv.push("--label".into());
            argv.push(format!("{}{}={}", LABEL_PREFIX, key, value));
        }
        argv.push(self.repo2docker_image.clone());
        argv.extend(
            [
                "jupyter-repo2docker",
                "--ref",
                "HEAD",
                "--user-name",
                BUILD_USER_NAME,
                "--user-id",
                BUILD_USER_ID,
                "--no-run",
            ]
            .map(String::from),
        );
        for (key, value) in &spec.labels {
            argv.push("--label".into());
            argv.push(format!("{}{}={}", LABEL_PREFIX, key, value));
        }
        for build_arg in &spec.build_args {
            argv.push("--build-arg".into());
            argv.push(build_arg.clone());
        }
        argv.push(spec.repo_url.clone());
        argv
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    fn name(&self) -> &'static str {
        "docker-repo2docker"
    }

    async fn build(&self, spec: &BuildSpec, sink: &dyn LogSink) -> Result<String> {
        let argv = self.argv(spec);
        info!(target: TARGET, repo = %spec.repo_url, "building image");
        let mut command = docker_command(&[]);
        command.args(&argv);
        let child = piped(command)
            .spawn()
            .with_context(|| format!("spawning build for {}", spec.repo_url))?;

        let mut scanner = BuildLogScanner::default();
        stream_combined_output(child, |line| {
            sink.emit(JobStatus::Building, line);
            scanner.observe(line);
        })
        .await?;

        match scanner.into_image() {
            Some(image) => {
                info!(target: TARGET, %image, "build finished");
                Ok(image)
            }
            None => Err(RuntimeError::BuildFailed.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scan(lines: &[&str]) -> Option<String> {
        let mut scanner = BuildLogScanner::default();
        for line in lines {
            scanner.observe(line);
        }
        scanner.into_image()
    }

    #[test]
    fn tagged_line_yields_image() {
        assert_eq!(
            scan(&["Step 1/5 ...", "Successfully tagged myrepo:abc123"]),
            Some("myrepo:abc123".into())
        );
    }

    #[test]
    fn reuse_line_yields_image() {
        assert_eq!(
            scan(&["Reusing existing image (r2d-cache:deadbeef), not building."]),
            Some("r2d-cache:deadbeef".into())
        );
    }

    #[test]
    fn last_match_wins() {
        assert_eq!(
            scan(&[
                "Reusing existing image (stale:0001), checking...",
                "Step 2/5 ...",
                "Successfully tagged fresh:0002",
            ]),
            Some("fresh:0002".into())
        );
    }

    #[test]
    fn matching_is_line_anchored() {
        assert_eq!(scan(&["note: Successfully tagged x:y elsewhere"]), None);
        assert_eq!(scan(&["successfully tagged lower:case"]), None);
        assert_eq!(scan(&["no matches here"]), None);
    }

    #[test]
    fn argv_renders_envs_in_key_order() {
        let mut envs = BTreeMap::new();
        envs.insert("RDM_HOSTS_JSON".to_string(), "[]".to_string());
        envs.insert("EXTRA".to_string(), "1".to_string());
        let spec = BuildSpec {
            repo_url: "https://rdm.example/abc12/files/dir/osfstorage".into(),
            envs,
            ..Default::default()
        };
        let argv = DockerImageBuilder::default().argv(&spec);
        let extra = argv.iter().position(|a| a == "EXTRA=1").unwrap();
        let hosts = argv.iter().position(|a| a == "RDM_HOSTS_JSON=[]").unwrap();
        assert!(extra < hosts);
    }

    #[test]
    fn argv_places_repo_last() {
        let mut labels = BTreeMap::new();
        labels.insert("provider".to_string(), "rdm".to_string());
        let spec = BuildSpec {
            repo_url: "https://rdm.example/abc12/files/dir/osfstorage".into(),
            labels,
            build_args: vec!["HTTP_PROXY=http://proxy:3128".into()],
            ..Default::default()
        };
        let argv = DockerImageBuilder::default().argv(&spec);
        assert_eq!(argv.last().map(String::as_str), Some(spec.repo_url.as_str()));
        assert!(argv.contains(&"--no-run".to_string()));
        assert!(argv.contains(&format!("{}provider=rdm", LABEL_PREFIX)));
        assert!(argv.contains(&"--build-arg".to_string()));
        let no_run = argv.iter().position(|a| a == "--no-run").unwrap();
        let user_name = argv.iter().position(|a| a == BUILD_USER_NAME).unwrap();
        assert!(user_name < no_run);
    }
}
