//! Stack configuration parsing.
//!
//! A stack file declares one pipeline plus the server and artifact store
//! that host it:
//!
//! ```kdl
//! pipeline "similarity-embeddings" {
//!     source repository="https://github.com/owner/repo.git" branch="main"
//!     registry repository="123456789012.dkr.ecr.us-east-1.amazonaws.com/app"
//!     build image="docker:27-cli" tag="revision"
//!     deploy service="similarity-embeddings-app" namespace="default"
//! }
//! server listen="0.0.0.0:3000"
//! artifacts backend="fs" path="/var/lib/shipyard/artifacts"
//! ```

use crate::{ConfigError, ConfigResult};
use chrono::Duration;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use shipyard_core::ResourceId;
use shipyard_core::deployer::DeployTarget;
use shipyard_core::pipeline::TriggerEvent;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BUILD_IMAGE: &str = "docker:27-cli";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

/// Everything a Shipyard server needs to run one pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub source: SourceConfig,
    pub registry: RegistryConfig,
    pub build: BuildConfig,
    pub deploy: DeployConfig,
    pub approval: ApprovalConfig,
    pub concurrency: ConcurrencyPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Clone URL.
    pub repository: String,
    /// The single tracked branch.
    pub branch: String,
    /// Secret path of an access token for private repositories.
    pub token_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Image repository without a tag, e.g. `registry.example.com/team/app`.
    pub repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Container image the build commands run in.
    pub image: String,
    pub tag: TagPolicy,
    pub env: BTreeMap<String, String>,
    /// Variable name to secret path; exposed as `${secrets.NAME}`.
    pub secrets: BTreeMap<String, String>,
    pub phases: Vec<BuildPhase>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPhase {
    pub name: String,
    pub commands: Vec<String>,
}

/// How the build stage tags the image it pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TagPolicy {
    /// Short SHA of the built revision.
    #[default]
    Revision,
    /// Short form of the run id.
    Run,
    /// The same tag for every run, e.g. `latest`.
    Fixed(String),
}

impl TagPolicy {
    fn parse(value: &str) -> ConfigResult<Self> {
        match value {
            "" => Err(ConfigError::invalid("build tag", "tag must not be empty")),
            "revision" => Ok(TagPolicy::Revision),
            "run" => Ok(TagPolicy::Run),
            fixed => {
                let valid = fixed.len() <= 128
                    && fixed
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                    && !fixed.starts_with(['.', '-']);
                if valid {
                    Ok(TagPolicy::Fixed(fixed.to_string()))
                } else {
                    Err(ConfigError::invalid(
                        "build tag",
                        format!("{:?} is not a valid image tag", fixed),
                    ))
                }
            }
        }
    }

    /// The tag for a run that builds `revision`.
    pub fn resolve(&self, revision: Option<&str>, run_id: ResourceId) -> String {
        match self {
            TagPolicy::Revision => match revision {
                Some(rev) if !rev.is_empty() => rev.chars().take(7).collect(),
                _ => run_id.short(),
            },
            TagPolicy::Run => run_id.short(),
            TagPolicy::Fixed(tag) => tag.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Container name inside the workload; the `name` of the image definition.
    pub service: String,
    pub namespace: String,
    /// Workload name; defaults to `service`.
    pub deployment: String,
}

impl DeployConfig {
    pub fn target(&self) -> DeployTarget {
        DeployTarget {
            namespace: self.namespace.clone(),
            service: self.deployment.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// No deadline when unset.
    pub timeout_secs: Option<u64>,
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(Duration::seconds)
    }
}

/// What happens to in-flight runs when a new one starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Runs proceed independently.
    #[default]
    Parallel,
    /// A new run cancels every unfinished run.
    Supersede,
}

impl std::str::FromStr for ConcurrencyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "parallel" => Ok(ConcurrencyPolicy::Parallel),
            "supersede" => Ok(ConcurrencyPolicy::Supersede),
            other => Err(ConfigError::invalid(
                "concurrency",
                format!("expected \"parallel\" or \"supersede\", got {:?}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    /// Secret path of the webhook signing secret; signatures are not
    /// checked when unset.
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactBackend {
    #[default]
    Memory,
    Fs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub backend: ArtifactBackend,
    /// Root directory of the `fs` backend.
    pub path: Option<PathBuf>,
}

/// Read and parse a stack file.
pub fn load_stack(path: impl AsRef<Path>) -> ConfigResult<StackConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_stack(&text)
}

/// Parse a stack configuration from KDL text.
pub fn parse_stack(kdl: &str) -> ConfigResult<StackConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut pipeline = None;
    let mut server = None;
    let mut artifacts = None;

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                if pipeline.is_some() {
                    return Err(ConfigError::Duplicate("pipeline".to_string()));
                }
                pipeline = Some(parse_pipeline(node)?);
            }
            "server" => {
                if server.is_some() {
                    return Err(ConfigError::Duplicate("server".to_string()));
                }
                server = Some(parse_server(node));
            }
            "artifacts" => {
                if artifacts.is_some() {
                    return Err(ConfigError::Duplicate("artifacts".to_string()));
                }
                artifacts = Some(parse_artifacts(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(StackConfig {
        pipeline: pipeline.ok_or_else(|| ConfigError::MissingField("pipeline".to_string()))?,
        server: server.unwrap_or_default(),
        artifacts: artifacts.unwrap_or_default(),
    })
}

fn parse_pipeline(node: &KdlNode) -> ConfigResult<PipelineConfig> {
    let name = get_first_string_arg(node)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;

    let mut source = None;
    let mut registry = None;
    let mut build = None;
    let mut deploy = None;
    let mut approval = ApprovalConfig::default();
    let mut concurrency = ConcurrencyPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => source = Some(parse_source(child)?),
                "registry" => {
                    let repository = require_string_prop(child, "registry", "repository")?;
                    if repository.rsplit('/').next().is_some_and(|last| last.contains(':')) {
                        return Err(ConfigError::invalid(
                            "registry repository",
                            "must not carry a tag; set the build tag policy instead",
                        ));
                    }
                    registry = Some(RegistryConfig { repository });
                }
                "build" => build = Some(parse_build(child)?),
                "deploy" => deploy = Some(parse_deploy(child)?),
                "approval" => {
                    approval.timeout_secs = get_positive_int_prop(child, "timeout-secs")?;
                }
                "concurrency" => {
                    let policy = get_first_string_arg(child).unwrap_or_default();
                    concurrency = policy.parse()?;
                }
                _ => {}
            }
        }
    }

    Ok(PipelineConfig {
        name,
        source: source.ok_or_else(|| ConfigError::MissingField("source".to_string()))?,
        registry: registry.ok_or_else(|| ConfigError::MissingField("registry".to_string()))?,
        build: build.unwrap_or_else(BuildConfig::default_for_docker),
        deploy: deploy.ok_or_else(|| ConfigError::MissingField("deploy".to_string()))?,
        approval,
        concurrency,
    })
}

fn parse_source(node: &KdlNode) -> ConfigResult<SourceConfig> {
    let repository = require_string_prop(node, "source", "repository")?;
    let branch = get_string_prop(node, "branch").unwrap_or_else(|| "main".to_string());

    // A tracked branch must be something a push could name.
    TriggerEvent::push(branch.clone(), None, None)
        .validate()
        .map_err(|e| ConfigError::invalid("source branch", e.to_string()))?;

    Ok(SourceConfig {
        repository,
        branch,
        token_secret: get_string_prop(node, "token-secret"),
    })
}

impl BuildConfig {
    fn default_for_docker() -> Self {
        Self {
            image: DEFAULT_BUILD_IMAGE.to_string(),
            tag: TagPolicy::default(),
            env: BTreeMap::new(),
            secrets: BTreeMap::new(),
            phases: default_phases(),
            timeout_secs: None,
        }
    }

    /// All commands in phase order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|p| p.commands.iter().map(String::as_str))
    }
}

/// Print the environment, then build and push the image.
fn default_phases() -> Vec<BuildPhase> {
    vec![
        BuildPhase {
            name: "pre_build".to_string(),
            commands: vec!["env".to_string()],
        },
        BuildPhase {
            name: "build".to_string(),
            commands: vec![
                "docker build -t ${image.uri} .".to_string(),
                "docker push ${image.uri}".to_string(),
            ],
        },
    ]
}

fn parse_build(node: &KdlNode) -> ConfigResult<BuildConfig> {
    let mut build = BuildConfig::default_for_docker();
    build.phases.clear();

    if let Some(image) = get_string_prop(node, "image") {
        build.image = image;
    }
    if let Some(tag) = get_string_prop(node, "tag") {
        build.tag = TagPolicy::parse(&tag)?;
    }
    build.timeout_secs = get_positive_int_prop(node, "timeout-secs")?;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "env" => build.env.extend(get_string_map(child)),
                "secrets" => build.secrets.extend(get_string_map(child)),
                "phase" => {
                    let name = get_first_string_arg(child)
                        .ok_or_else(|| ConfigError::MissingField("phase name".to_string()))?;
                    if build.phases.iter().any(|p| p.name == name) {
                        return Err(ConfigError::Duplicate(format!("phase '{}'", name)));
                    }
                    let commands: Vec<String> = child
                        .children()
                        .map(|c| {
                            c.nodes()
                                .iter()
                                .filter(|n| n.name().value() == "run")
                                .filter_map(get_first_string_arg)
                                .collect()
                        })
                        .unwrap_or_default();
                    build.phases.push(BuildPhase { name, commands });
                }
                _ => {}
            }
        }
    }

    if build.phases.is_empty() {
        build.phases = default_phases();
    }
    if build.commands().next().is_none() {
        return Err(ConfigError::MissingField(
            "build commands (every phase is empty)".to_string(),
        ));
    }

    Ok(build)
}

fn parse_deploy(node: &KdlNode) -> ConfigResult<DeployConfig> {
    let service = require_string_prop(node, "deploy", "service")?;
    let namespace = get_string_prop(node, "namespace").unwrap_or_else(|| "default".to_string());
    let deployment = get_string_prop(node, "deployment").unwrap_or_else(|| service.clone());
    Ok(DeployConfig {
        service,
        namespace,
        deployment,
    })
}

fn parse_server(node: &KdlNode) -> ServerConfig {
    ServerConfig {
        listen: get_string_prop(node, "listen").unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
        webhook_secret: get_string_prop(node, "webhook-secret"),
    }
}

fn parse_artifacts(node: &KdlNode) -> ConfigResult<ArtifactsConfig> {
    let backend = match get_string_prop(node, "backend").as_deref() {
        None | Some("memory") => ArtifactBackend::Memory,
        Some("fs") => ArtifactBackend::Fs,
        Some(other) => {
            return Err(ConfigError::invalid(
                "artifacts backend",
                format!("unknown backend: {}", other),
            ));
        }
    };
    let path = get_string_prop(node, "path").map(PathBuf::from);
    if backend == ArtifactBackend::Fs && path.is_none() {
        return Err(ConfigError::MissingField("artifacts path".to_string()));
    }
    Ok(ArtifactsConfig { backend, path })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn require_string_prop(node: &KdlNode, section: &str, name: &str) -> ConfigResult<String> {
    get_string_prop(node, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("{} {}", section, name)))
}

fn get_positive_int_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .filter(|i| *i > 0)
        .map(Some)
        .ok_or_else(|| ConfigError::invalid(name, "expected a positive integer"))
}

/// `node { KEY "value" ... }` as a map.
fn get_string_map(node: &KdlNode) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                map.insert(key, val);
            }
        }
    }
    map
}
