use once_cell::sync::Lazy;

const DEFAULT_DOCKER_BIN: &str = "docker";
const DEFAULT_REPO2DOCKER_IMAGE: &str = "quay.io/jupyterhub/repo2docker:main";

pub const BUILD_USER_NAME: &str = "jovyan";
pub const BUILD_USER_ID: &str = "1100";

/// Label namespace for values the orchestrator attaches to built images and
/// spawned containers so they can be discovered later.
pub const LABEL_PREFIX: &str = "runcrate.opt.";
pub const JOB_LABEL: &str = "runcrate.job_id";

static DOCKER_BIN: Lazy<String> = Lazy::new(|| {
    std::env::var("RUNCRATE_DOCKER_BIN").unwrap_or_else(|_| DEFAULT_DOCKER_BIN.to_string())
});

static REPO2DOCKER_IMAGE: Lazy<String> = Lazy::new(|| {
    std::env::var("RUNCRATE_REPO2DOCKER_IMAGE")
        .unwrap_or_else(|_| DEFAULT_REPO2DOCKER_IMAGE.to_string())
});

pub fn docker_bin() -> &'static str {
    &DOCKER_BIN
}

pub fn repo2docker_image() -> &'static str {
    &REPO2DOCKER_IMAGE
}
