//! Target resource description.

use serde::{Deserialize, Serialize};

use crate::config::GeneralConfig;
use crate::{Error, Result};

/// Resource names containing this marker run on the local machine.
pub const LOCAL_MARKER: &str = "local.localhost";

/// How the engine reaches the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScheme {
    /// Plain shell access on the local machine.
    Local,
    /// Secure remote login to an HPC resource.
    Remote,
}

impl AccessScheme {
    pub fn for_resource(resource: &str) -> Self {
        if resource.contains(LOCAL_MARKER) {
            AccessScheme::Local
        } else {
            AccessScheme::Remote
        }
    }

    /// Schema name used in the engine's resource description.
    pub fn schema(&self) -> &'static str {
        match self {
            AccessScheme::Local => "ssh",
            AccessScheme::Remote => "gsissh",
        }
    }
}

impl std::fmt::Display for AccessScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessScheme::Local => write!(f, "local"),
            AccessScheme::Remote => write!(f, "remote"),
        }
    }
}

/// Coordinates of the message broker used between engine and agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl BrokerConfig {
    /// Assemble broker settings from optional parts.
    ///
    /// Returns `Ok(None)` when neither endpoint nor port is set.
    ///
    /// # Errors
    /// Returns `Error::Config` when only one of endpoint and port is set.
    pub fn from_parts(
        endpoint: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Option<Self>> {
        let endpoint = endpoint.filter(|e| !e.trim().is_empty());
        match (endpoint, port) {
            (None, None) => Ok(None),
            (Some(endpoint), Some(port)) => Ok(Some(Self {
                endpoint,
                port,
                username,
                password,
            })),
            (Some(_), None) => Err(Error::Config(
                "message broker endpoint is set but its port is not".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "message broker port is set but its endpoint is not".to_string(),
            )),
        }
    }
}

/// Resources requested for a run. Fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub resource: String,
    pub walltime: u32,
    pub cpus: u32,
    pub gpus: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub access_scheme: AccessScheme,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerConfig>,
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
}

impl ResourceConfig {
    /// `walltime` is in minutes. The access scheme follows from `resource`.
    pub fn new(resource: impl Into<String>, walltime: u32, cpus: u32) -> Self {
        let resource = resource.into();
        Self {
            access_scheme: AccessScheme::for_resource(&resource),
            resource,
            walltime,
            cpus,
            gpus: 0,
            project: None,
            queue: None,
            broker: None,
            database_url: None,
        }
    }

    pub fn gpus(mut self, gpus: u32) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn queue(mut self, queue: Option<String>) -> Self {
        self.queue = queue;
        self
    }

    pub fn project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    pub fn broker(mut self, broker: Option<BrokerConfig>) -> Self {
        self.broker = broker;
        self
    }

    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    /// Build the resource description from the general configuration.
    ///
    /// Broker settings and the database URL absent from `general` are read
    /// from `RMQ_ENDPOINT`, `RMQ_PORT`, `RMQ_USERNAME`, `RMQ_PASSWORD` and
    /// `RADICAL_PILOT_DBURL`.
    pub fn from_general(general: &GeneralConfig) -> Result<Self> {
        Self::with_env(general, |key| std::env::var(key).ok())
    }

    /// Like [`ResourceConfig::from_general`] with an explicit environment
    /// lookup.
    ///
    /// # Errors
    /// Returns `Error::MissingField` for absent required fields and
    /// `Error::Config` for incomplete broker settings or a port that is not
    /// a number.
    pub fn with_env<F>(general: &GeneralConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing = |name: &str| Error::MissingField(name.to_string());
        let resource = general
            .resource
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| missing("resource"))?;
        let walltime = general.walltime.ok_or_else(|| missing("walltime"))?;
        let cpus = general.cpus.ok_or_else(|| missing("cpus"))?;

        let env = |field: &Option<String>, key: &str| {
            field
                .clone()
                .or_else(|| lookup(key).filter(|v| !v.trim().is_empty()))
        };
        let env_port = lookup("RMQ_PORT").filter(|v| !v.trim().is_empty());
        let port = match (general.rmq_port, env_port) {
            (Some(port), _) => Some(port),
            (None, Some(raw)) => Some(raw.trim().parse::<u16>().map_err(|e| {
                Error::Config(format!("RMQ_PORT {:?} is not a port: {}", raw, e))
            })?),
            (None, None) => None,
        };
        let broker = BrokerConfig::from_parts(
            env(&general.rmq_endpoint, "RMQ_ENDPOINT"),
            port,
            env(&general.rmq_username, "RMQ_USERNAME"),
            env(&general.rmq_password, "RMQ_PASSWORD"),
        )?;

        Ok(Self::new(resource, walltime, cpus)
            .gpus(general.gpus.unwrap_or(0))
            .queue(general.queue.clone())
            .project(general.project.clone())
            .broker(broker)
            .database_url(env(&general.radical_pilot_dburl, "RADICAL_PILOT_DBURL")))
    }

    pub fn is_local(&self) -> bool {
        self.access_scheme == AccessScheme::Local
    }

    /// The resource description in the engine's own vocabulary.
    pub fn engine_description(&self) -> serde_json::Value {
        let mut desc = serde_json::json!({
            "resource": self.resource,
            "walltime": self.walltime,
            "cpus": self.cpus,
            "gpus": self.gpus,
            "schema": self.access_scheme.schema(),
        });
        if let Some(project) = &self.project {
            desc["project"] = project.clone().into();
        }
        if let Some(queue) = &self.queue {
            desc["queue"] = queue.clone().into();
        }
        desc
    }
}
