use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::ConfigError,
    schema::{
        DEFAULT_DOCKERFILE, DEFAULT_GIT_REF, DEFAULT_NETWORK_DRIVER, DEFAULT_VERSION, SourceKind,
        Topology,
    },
    validate::validate,
};

/// Environment variable overriding the gridctl home directory.
pub const HOME_ENV: &str = "GRIDCTL_HOME";

/// Override for the home directory, set via `set_data_dir()`.
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom home directory for state, cache and logs.
/// Each call replaces the previous override.
pub fn set_data_dir(path: PathBuf) {
    *DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the home directory override, restoring default discovery.
pub fn clear_data_dir() {
    *DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

/// Returns the gridctl home: override, then `$GRIDCTL_HOME`, then `~/.gridctl/`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
    {
        return dir;
    }
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    home_dir()
        .map(|h| h.join(".gridctl"))
        .unwrap_or_else(|| PathBuf::from(".gridctl"))
}

/// Directory holding daemon state records.
pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

/// Directory holding cached source checkouts and other reusable artifacts.
pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

/// Directory holding detached gateway logs.
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Read, expand, default, resolve and validate a topology file.
pub fn load_topology(path: &Path) -> Result<Topology, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut topology = parse_topology(&raw, path)?;

    expand_env_vars(&mut topology);
    apply_defaults(&mut topology);

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_relative_paths(&mut topology, base);

    validate(&topology)?;

    debug!(
        path = %path.display(),
        topology = %topology.name,
        servers = topology.mcp_servers.len(),
        resources = topology.resources.len(),
        "loaded topology"
    );
    Ok(topology)
}

fn parse_topology(raw: &str, path: &Path) -> Result<Topology, ConfigError> {
    serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand environment variables in every templatable string field.
pub fn expand_env_vars(t: &mut Topology) {
    expand(&mut t.name);
    expand(&mut t.network.name);

    for network in &mut t.networks {
        expand(&mut network.name);
    }

    for server in &mut t.mcp_servers {
        expand(&mut server.name);
        expand(&mut server.image);
        expand(&mut server.network);

        if let Some(source) = server.source.as_mut() {
            expand(&mut source.url);
            expand(&mut source.path);
            expand(&mut source.git_ref);
        }

        server.env.values_mut().for_each(expand);
        server.build_args.values_mut().for_each(expand);
    }

    for resource in &mut t.resources {
        expand(&mut resource.name);
        expand(&mut resource.image);
        expand(&mut resource.network);
        resource.env.values_mut().for_each(expand);
    }
}

fn expand(value: &mut String) {
    *value = substitute_env(value);
}

/// Apply defaults. Runs before validation so validation sees a resolved spec.
pub fn apply_defaults(t: &mut Topology) {
    if t.version.is_empty() {
        t.version = DEFAULT_VERSION.into();
    }

    // Simple mode (no `networks` list) defaults the single network; advanced
    // mode only defaults each driver and never synthesizes names.
    if t.networks.is_empty() {
        if t.network.driver.is_empty() {
            t.network.driver = DEFAULT_NETWORK_DRIVER.into();
        }
        if t.network.name.is_empty() && !t.name.is_empty() {
            t.network.name = format!("{}-net", t.name);
        }
    } else {
        for network in &mut t.networks {
            if network.driver.is_empty() {
                network.driver = DEFAULT_NETWORK_DRIVER.into();
            }
        }
    }

    for server in &mut t.mcp_servers {
        if let Some(source) = server.source.as_mut() {
            if source.dockerfile.is_empty() {
                source.dockerfile = DEFAULT_DOCKERFILE.into();
            }
            if source.kind() == Ok(SourceKind::Git) && source.git_ref.is_empty() {
                source.git_ref = DEFAULT_GIT_REF.into();
            }
        }
    }
}

/// Resolve local source paths relative to the topology file's directory.
pub fn resolve_relative_paths(t: &mut Topology, base: &Path) {
    for server in &mut t.mcp_servers {
        let Some(source) = server.source.as_mut() else {
            continue;
        };
        if source.kind() != Ok(SourceKind::Local) || source.path.is_empty() {
            continue;
        }
        let path = Path::new(&source.path);
        if !path.is_absolute() {
            source.path = base.join(path).display().to_string();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::schema::{McpServerSpec, Network, Source},
        rstest::rstest,
    };

    fn write(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("topology.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[rstest]
    #[case::both_empty("demo", "", "demo-net")]
    #[case::explicit_name_kept("demo", "custom", "custom")]
    #[case::no_topology_name("", "", "")]
    fn simple_mode_network_defaults(
        #[case] topology_name: &str,
        #[case] network_name: &str,
        #[case] expected: &str,
    ) {
        let mut t = Topology {
            name: topology_name.into(),
            network: Network {
                name: network_name.into(),
                driver: String::new(),
            },
            ..Default::default()
        };
        apply_defaults(&mut t);
        assert_eq!(t.network.name, expected);
        assert_eq!(t.network.driver, "bridge");
        assert_eq!(t.version, "1");
    }

    #[test]
    fn advanced_mode_defaults_drivers_without_naming() {
        let mut t = Topology {
            name: "demo".into(),
            networks: vec![
                Network {
                    name: "front".into(),
                    driver: String::new(),
                },
                Network {
                    name: "back".into(),
                    driver: "overlay".into(),
                },
            ],
            ..Default::default()
        };
        apply_defaults(&mut t);
        assert_eq!(t.networks[0].driver, "bridge");
        assert_eq!(t.networks[1].driver, "overlay");
        assert!(t.network.name.is_empty());
        assert!(t.network.driver.is_empty());
    }

    #[rstest]
    #[case::git_empty_ref("git", "", "", "main", "Dockerfile")]
    #[case::git_explicit("git", "v1.2", "build/Dockerfile.prod", "v1.2", "build/Dockerfile.prod")]
    #[case::local_keeps_empty_ref("local", "", "", "", "Dockerfile")]
    fn source_defaults(
        #[case] kind: &str,
        #[case] git_ref: &str,
        #[case] dockerfile: &str,
        #[case] expected_ref: &str,
        #[case] expected_dockerfile: &str,
    ) {
        let mut t = Topology {
            name: "demo".into(),
            mcp_servers: vec![McpServerSpec {
                name: "fetch".into(),
                source: Some(Source {
                    kind: kind.into(),
                    git_ref: git_ref.into(),
                    dockerfile: dockerfile.into(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        apply_defaults(&mut t);
        let source = t.mcp_servers[0].source.as_ref().unwrap();
        assert_eq!(source.git_ref, expected_ref);
        assert_eq!(source.dockerfile, expected_dockerfile);
    }

    #[test]
    fn load_resolves_relative_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
name: demo
mcp-servers:
  - name: local-tool
    transport: stdio
    source:
      type: local
      path: ./servers/tool
  - name: abs-tool
    transport: stdio
    source:
      type: local
      path: /opt/tool
"#,
        );
        let t = load_topology(&path).unwrap();
        assert_eq!(
            Path::new(&t.mcp_servers[0].source.as_ref().unwrap().path),
            dir.path().join("./servers/tool")
        );
        assert_eq!(t.mcp_servers[1].source.as_ref().unwrap().path, "/opt/tool");
    }

    #[test]
    fn load_example_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
name: demo
mcp-servers:
  - name: search
    image: ghcr.io/acme/search:latest
    port: 8080
  - name: fetch
    port: 3000
    source:
      type: git
      url: https://github.com/acme/fetch.git
"#,
        );
        let t = load_topology(&path).unwrap();
        assert_eq!(t.network.name, "demo-net");
        assert_eq!(t.mcp_servers[1].source.as_ref().unwrap().git_ref, "main");
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "name: [unterminated");
        let err = load_topology(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load_topology(Path::new("/nonexistent/gridctl/topology.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_topology_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "name: demo\nmcp-servers:\n  - name: broken\n    port: 80\n",
        );
        let err = load_topology(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        set_data_dir(dir.path().to_path_buf());
        assert_eq!(state_dir(), dir.path().join("state"));
        assert_eq!(cache_dir(), dir.path().join("cache"));
        clear_data_dir();
    }
}
