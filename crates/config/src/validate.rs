//! Pure structural validation of a defaulted topology.

use std::collections::HashSet;

use crate::{
    error::{ConfigError, ValidationIssue},
    schema::{SourceKind, Topology, Transport},
};

/// Validate a topology that has already gone through defaulting.
///
/// Collects every problem rather than stopping at the first one.
pub fn validate(topology: &Topology) -> Result<(), ConfigError> {
    let mut issues = Vec::new();

    if topology.name.trim().is_empty() {
        issues.push(ValidationIssue::new("name", "topology name is required"));
    }

    let networks = validate_networks(topology, &mut issues);

    let mut seen = HashSet::new();
    for (i, server) in topology.mcp_servers.iter().enumerate() {
        let field = format!("mcp-servers[{i}]");

        if server.name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("{field}.name"),
                "server name is required",
            ));
        } else if !seen.insert(server.name.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.name"),
                format!("duplicate mcp-server name '{}'", server.name),
            ));
        }

        match (server.image.is_empty(), &server.source) {
            (true, None) => issues.push(ValidationIssue::new(
                field.clone(),
                "either image or source is required",
            )),
            (false, Some(_)) => issues.push(ValidationIssue::new(
                field.clone(),
                "image and source are mutually exclusive",
            )),
            _ => {},
        }

        if let Some(source) = &server.source {
            match source.kind() {
                Ok(SourceKind::Git) if source.url.is_empty() => issues.push(
                    ValidationIssue::new(format!("{field}.source.url"), "git source requires url"),
                ),
                Ok(SourceKind::Local) if source.path.is_empty() => {
                    issues.push(ValidationIssue::new(
                        format!("{field}.source.path"),
                        "local source requires path",
                    ))
                },
                Ok(_) => {},
                Err(e) => issues.push(ValidationIssue::new(format!("{field}.source.type"), e)),
            }
        }

        match server.transport() {
            Ok(Transport::Http) if server.port.is_none_or(|p| p == 0) => {
                issues.push(ValidationIssue::new(
                    format!("{field}.port"),
                    "port is required for http transport",
                ))
            },
            Ok(_) => {},
            Err(e) => issues.push(ValidationIssue::new(format!("{field}.transport"), e)),
        }

        check_network_ref(&networks, &server.network, &field, &mut issues);
    }

    let mut seen = HashSet::new();
    for (i, resource) in topology.resources.iter().enumerate() {
        let field = format!("resources[{i}]");

        if resource.name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("{field}.name"),
                "resource name is required",
            ));
        } else if !seen.insert(resource.name.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.name"),
                format!("duplicate resource name '{}'", resource.name),
            ));
        }
        if resource.image.is_empty() {
            issues.push(ValidationIssue::new(
                format!("{field}.image"),
                "resource image is required",
            ));
        }

        check_network_ref(&networks, &resource.network, &field, &mut issues);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(issues))
    }
}

fn validate_networks<'a>(
    topology: &'a Topology,
    issues: &mut Vec<ValidationIssue>,
) -> HashSet<&'a str> {
    let mut names = HashSet::new();
    if topology.is_advanced_network_mode() {
        for (i, network) in topology.networks.iter().enumerate() {
            if network.name.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("networks[{i}].name"),
                    "network name is required",
                ));
            } else if !names.insert(network.name.as_str()) {
                issues.push(ValidationIssue::new(
                    format!("networks[{i}].name"),
                    format!("duplicate network name '{}'", network.name),
                ));
            }
        }
    } else if !topology.network.name.is_empty() {
        names.insert(topology.network.name.as_str());
    }
    names
}

fn check_network_ref(
    declared: &HashSet<&str>,
    reference: &str,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    if !reference.is_empty() && !declared.contains(reference) {
        issues.push(ValidationIssue::new(
            format!("{field}.network"),
            format!("network '{reference}' is not declared"),
        ));
    }
}
