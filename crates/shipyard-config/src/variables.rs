//! Variable interpolation for build commands.
//!
//! Supports variables like:
//! - `${git.sha}` - Full commit SHA being built
//! - `${git.short_sha}` - Short (7 char) commit SHA
//! - `${git.branch}` - Branch being built
//! - `${git.repository}` - Clone URL
//! - `${pipeline.name}` - Pipeline name
//! - `${run.id}` - Run ID
//! - `${run.number}` - Run number
//! - `${stage.name}` - Current stage name
//! - `${image.uri}` - Full image reference (`repository:tag`)
//! - `${image.repository}` - Image repository
//! - `${image.tag}` - Image tag
//! - `${service.name}` - Name of the deployed service
//! - `${env.VAR_NAME}` - Build environment variable
//! - `${secrets.SECRET_NAME}` - Secret value
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime

use regex::Regex;
use shipyard_core::descriptor::ImageReference;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const MASK: &str = "***";

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitContext,
    pub run: RunContext,
    pub image: ImageContext,
    pub service: String,
    pub env: BTreeMap<String, String>,
    /// Secrets (masked in logs)
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
    pub repository: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub pipeline: String,
    pub id: String,
    pub number: u64,
    pub stage: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImageContext {
    pub repository: String,
    pub tag: String,
}

impl ImageContext {
    pub fn uri(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),
            ["git", "repository"] => Some(self.git.repository.clone()),

            ["pipeline", "name"] => Some(self.run.pipeline.clone()),
            ["run", "id"] => Some(self.run.id.clone()),
            ["run", "number"] => Some(self.run.number.to_string()),
            ["stage", "name"] => Some(self.run.stage.clone()),

            ["image", "uri"] => Some(self.image.uri()),
            ["image", "repository"] => Some(self.image.repository.clone()),
            ["image", "tag"] => Some(self.image.tag.clone()),
            ["service", "name"] => Some(self.service.clone()),

            ["env", name] => self.env.get(*name).cloned(),
            ["secrets", name] => self.secrets.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn interpolate_vec<'a>(&self, inputs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        inputs.into_iter().map(|s| self.interpolate(s)).collect()
    }

    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Replace every secret value appearing in `line`.
    pub fn mask(&self, line: &str) -> String {
        self.secrets
            .values()
            .filter(|v| !v.is_empty())
            .fold(line.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.git.branch = branch.into();
        self
    }

    pub fn with_git_repository(mut self, repository: impl Into<String>) -> Self {
        self.ctx.git.repository = repository.into();
        self
    }

    pub fn with_run(mut self, pipeline: impl Into<String>, id: impl Into<String>, number: u64) -> Self {
        self.ctx.run.pipeline = pipeline.into();
        self.ctx.run.id = id.into();
        self.ctx.run.number = number;
        self
    }

    pub fn with_stage(mut self, name: impl Into<String>) -> Self {
        self.ctx.run.stage = name.into();
        self
    }

    pub fn with_image(mut self, image: &ImageReference) -> Self {
        self.ctx.image = ImageContext {
            repository: image.repository.clone(),
            tag: image.tag.clone(),
        };
        self
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.ctx.service = name.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.secrets.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_interpolation() {
        let ctx = VariableContextBuilder::new()
            .with_git_sha("abc1234567890")
            .with_git_branch("main")
            .build();

        let result = ctx.interpolate("Commit ${git.sha} (${git.short_sha}) on ${git.branch}");
        assert_eq!(result, "Commit abc1234567890 (abc1234) on main");
    }

    #[test]
    fn test_image_variables() {
        let image: ImageReference = "registry.example.com/app:abc1234".parse().unwrap();
        let ctx = VariableContextBuilder::new()
            .with_image(&image)
            .with_service("app-web")
            .build();

        assert_eq!(
            ctx.interpolate("docker build -t ${image.uri} ."),
            "docker build -t registry.example.com/app:abc1234 ."
        );
        assert_eq!(
            ctx.interpolate("${service.name} ${image.repository} ${image.tag}"),
            "app-web registry.example.com/app abc1234"
        );
    }

    #[test]
    fn test_env_and_secrets() {
        let ctx = VariableContextBuilder::new()
            .with_env("AWS_REGION", "us-east-1")
            .with_secret("API_KEY", "super-secret-key")
            .build();

        let result = ctx.interpolate("${env.AWS_REGION} ${secrets.API_KEY}");
        assert_eq!(result, "us-east-1 super-secret-key");
        assert_eq!(ctx.mask(&result), "us-east-1 ***");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        assert_eq!(
            ctx.interpolate("Unknown: ${unknown.var} ${env.MISSING}"),
            "Unknown: ${unknown.var} ${env.MISSING}"
        );
    }

    #[test]
    fn test_run_context() {
        let ctx = VariableContextBuilder::new()
            .with_run("my-pipeline", "run-456", 42)
            .with_stage("build")
            .build();

        let result =
            ctx.interpolate("Pipeline ${pipeline.name} run #${run.number} stage ${stage.name}");
        assert_eq!(result, "Pipeline my-pipeline run #42 stage build");
    }

    #[test]
    fn test_date_format() {
        let result = VariableContext::new().interpolate("${date}");
        assert_eq!(result.len(), 10);
        assert!(result.contains('-'));
    }

    #[test]
    fn test_nested_braces() {
        let ctx = VariableContextBuilder::new().with_git_sha("abc123").build();
        let result = ctx.interpolate(r#"{"sha": "${git.sha}"}"#);
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }
}
