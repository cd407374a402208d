//! Plan file parsing.
//!
//! ```kdl
//! plan "local-cluster"
//!
//! settings {
//!     skaffold "skaffold"
//!     runtime "docker"
//!     max-parallel 4
//! }
//!
//! env {
//!     ENV "local"
//! }
//!
//! pull "base-images" {
//!     image "docker.io/library/postgres:13"
//! }
//!
//! build "deployments/services.yaml" output="build/artifacts.json"
//!
//! deploy "deployments/infra.yaml"
//! deploy "deployments/services.yaml" needs="deployments/infra.yaml" {
//!     args "--profile" "local"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use rollout_core::{JobDeclaration, JobKind};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Fully-qualified or short image reference: optional registry host and port,
/// lowercase path components, optional tag and digest.
static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9]+(?:[.-][a-zA-Z0-9]+)*(?::[0-9]+)?/)?[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
    )
    .unwrap()
});

/// Runtime used for image pulls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "binary", rename_all = "snake_case")]
pub enum PullRuntime {
    /// A container runtime CLI such as `docker` or `podman`.
    Cli(String),
    /// The Docker Engine API on the local socket.
    DockerApi,
}

impl Default for PullRuntime {
    fn default() -> Self {
        PullRuntime::Cli("docker".to_string())
    }
}

/// Runner settings from the `settings` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerSettings {
    /// Path or name of the skaffold binary.
    pub skaffold: String,
    pub runtime: PullRuntime,
    /// Upper bound on concurrently executing jobs. Unbounded when absent.
    pub max_parallel: Option<usize>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            skaffold: "skaffold".to_string(),
            runtime: PullRuntime::default(),
            max_parallel: None,
        }
    }
}

/// A parsed plan file.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub settings: RunnerSettings,
    /// Environment overrides passed to every backend call.
    pub env: HashMap<String, String>,
    /// Job declarations in file order.
    pub declarations: Vec<JobDeclaration>,
}

impl Plan {
    pub fn declarations_of(&self, kind: JobKind) -> impl Iterator<Item = &JobDeclaration> {
        self.declarations.iter().filter(move |d| d.kind() == kind)
    }
}

/// Read and parse a plan file.
pub fn load_plan(path: impl AsRef<Path>) -> ConfigResult<Plan> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_plan(&text)
}

/// Parse a plan from KDL text.
pub fn parse_plan(kdl: &str) -> ConfigResult<Plan> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = None;
    let mut settings = RunnerSettings::default();
    let mut env = HashMap::new();
    let mut declarations = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "plan" => {
                name = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("plan name".to_string()))?,
                );
            }
            "settings" => settings = parse_settings(node)?,
            "env" => {
                for child in child_nodes(node) {
                    let key = child.name().value().to_string();
                    let value = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("value for env '{}'", key))
                    })?;
                    env.insert(key, value);
                }
            }
            other => {
                let kind: JobKind = other
                    .parse()
                    .map_err(|_| ConfigError::UnknownJobType(other.to_string()))?;
                declarations.push(parse_job(kind, node)?);
            }
        }
    }

    let name = name.ok_or_else(|| ConfigError::MissingField("plan name".to_string()))?;
    debug!(plan = %name, jobs = declarations.len(), "Parsed plan");

    Ok(Plan {
        name,
        settings,
        env,
        declarations,
    })
}

fn parse_settings(node: &KdlNode) -> ConfigResult<RunnerSettings> {
    let mut settings = RunnerSettings::default();

    for child in child_nodes(node) {
        match child.name().value() {
            "skaffold" => {
                settings.skaffold = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("settings skaffold".to_string()))?;
            }
            "runtime" => {
                let runtime = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("settings runtime".to_string()))?;
                settings.runtime = match runtime.as_str() {
                    "docker-api" => PullRuntime::DockerApi,
                    "" => {
                        return Err(ConfigError::InvalidValue {
                            field: "runtime".to_string(),
                            message: "must not be empty".to_string(),
                        });
                    }
                    _ => PullRuntime::Cli(runtime),
                };
            }
            "max-parallel" => {
                let value = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_integer())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "max-parallel".to_string(),
                        message: "expected an integer".to_string(),
                    })?;
                let value = usize::try_from(value)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "max-parallel".to_string(),
                        message: format!("expected a positive integer, got {}", value),
                    })?;
                settings.max_parallel = Some(value);
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "settings".to_string(),
                    message: format!("unknown setting: {}", other),
                });
            }
        }
    }

    Ok(settings)
}

fn parse_job(kind: JobKind, node: &KdlNode) -> ConfigResult<JobDeclaration> {
    let key = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} name", kind)))?;

    match kind {
        JobKind::Pull => {
            let images = get_string_list(node, "image");
            if images.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "image for pull '{}'",
                    key
                )));
            }
            for image in &images {
                if !IMAGE_REF.is_match(image) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("image in pull '{}'", key),
                        message: format!("not an image reference: {}", image),
                    });
                }
            }
            Ok(JobDeclaration::Pull { name: key, images })
        }
        JobKind::Build => Ok(JobDeclaration::Build {
            output: get_string_list(node, "output").pop().map(PathBuf::from),
            args: get_string_list(node, "args"),
            file: key,
        }),
        JobKind::Deploy => Ok(JobDeclaration::Deploy {
            depends_on: get_string_list(node, "needs"),
            args: get_string_list(node, "args"),
            file: key,
        }),
    }
}

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or_default()
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// Values given as repeated `name="..."` properties, plus the arguments of
/// every `name` child node, in order.
fn get_string_list(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_some_and(|n| n.value() == name))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    for child in child_nodes(node) {
        if child.name().value() == name {
            result.extend(get_string_args(child));
        }
    }

    result
}
