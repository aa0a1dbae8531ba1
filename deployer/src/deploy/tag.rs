//! Deploy tags
//!
//! A unit is identified by `<type>/<key>`, e.g. `webapp/default/shop`. The
//! instance tag in the repository is exactly that id; the server-scoped
//! auto-deploy tag prefixes it with the stage.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeployTag {
    id_type: String,
    id_key: String,
}

impl DeployTag {
    pub fn new(id_type: impl Into<String>, id_key: impl Into<String>) -> Self {
        Self {
            id_type: id_type.into(),
            id_key: id_key.into(),
        }
    }

    pub fn id_type(&self) -> &str {
        &self.id_type
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    /// `<type>/<key>`
    pub fn id(&self) -> String {
        format!("{}/{}", self.id_type, self.id_key)
    }

    /// Cluster-wide repository tag
    pub fn instance_tag(&self) -> String {
        self.id()
    }

    /// Server-scoped tag archives are committed under
    pub fn auto_deploy_tag(&self, stage: &str) -> String {
        if stage.is_empty() {
            self.id()
        } else {
            format!("{}/{}/{}", stage, self.id_type, self.id_key)
        }
    }
}

impl fmt::Display for DeployTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id_type, self.id_key)
    }
}
