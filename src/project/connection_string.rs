//! AI project connection strings.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::ProjectError;

/// Parsed `<host>;<subscription>;<resource-group>;<project>` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Host part as written in the connection string.
    pub host: String,
    /// Project host as a URL (`https://` added when the host has no scheme).
    pub endpoint: Url,
    /// Azure subscription id.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// AI project (workspace) name.
    pub project_name: String,
}

impl ConnectionString {
    /// Base URL of the project's data-plane API.
    pub fn project_url(&self) -> String {
        format!(
            "{}/agents/v1.0/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.subscription_id,
            self.resource_group,
            self.project_name,
        )
    }
}

impl FromStr for ConnectionString {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(';').map(str::trim).collect();

        let [host, subscription_id, resource_group, project_name] = parts.as_slice() else {
            return Err(ProjectError::InvalidConnectionString(format!(
                "expected 4 ';'-separated parts, found {}",
                parts.len()
            )));
        };

        if [host, subscription_id, resource_group, project_name]
            .iter()
            .any(|part| part.is_empty())
        {
            return Err(ProjectError::InvalidConnectionString(
                "empty component".to_string(),
            ));
        }

        let url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let endpoint = Url::parse(&url)
            .map_err(|e| ProjectError::InvalidConnectionString(format!("host '{}': {}", host, e)))?;

        Ok(Self {
            host: host.to_string(),
            endpoint,
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            project_name: project_name.to_string(),
        })
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.host,
            self.subscription_id,
            self.resource_group,
            self.project_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hub_connection_string() {
        let conn: ConnectionString = "eastus.api.azureml.ms;sub-1;rg-chat;proj-chat"
            .parse()
            .unwrap();

        assert_eq!(conn.endpoint.as_str(), "https://eastus.api.azureml.ms/");
        assert_eq!(conn.subscription_id, "sub-1");
        assert_eq!(conn.resource_group, "rg-chat");
        assert_eq!(conn.project_name, "proj-chat");
        assert_eq!(
            conn.project_url(),
            "https://eastus.api.azureml.ms/agents/v1.0/subscriptions/sub-1/resourceGroups/rg-chat/providers/Microsoft.MachineLearningServices/workspaces/proj-chat"
        );
        assert_eq!(conn.to_string(), "eastus.api.azureml.ms;sub-1;rg-chat;proj-chat");
    }

    #[test]
    fn keeps_explicit_scheme() {
        let conn: ConnectionString = "http://127.0.0.1:9999;s;rg;p".parse().unwrap();

        assert!(conn
            .project_url()
            .starts_with("http://127.0.0.1:9999/agents/v1.0/subscriptions/s/"));
    }

    #[test]
    fn display_keeps_scheme_and_port() {
        let raw = "http://127.0.0.1:9999;s;rg;p";
        let conn: ConnectionString = raw.parse().unwrap();

        assert_eq!(conn.to_string(), raw);
        assert_eq!(conn.to_string().parse::<ConnectionString>().unwrap(), conn);
    }

    #[test]
    fn rejects_wrong_part_count() {
        assert!(matches!(
            "host;sub;rg".parse::<ConnectionString>(),
            Err(ProjectError::InvalidConnectionString(_))
        ));
        assert!(matches!(
            "host;sub;rg;proj;extra".parse::<ConnectionString>(),
            Err(ProjectError::InvalidConnectionString(_))
        ));
    }

    #[test]
    fn rejects_empty_parts() {
        assert!("host;;rg;proj".parse::<ConnectionString>().is_err());
    }
}
