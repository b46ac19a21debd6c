//! The typed view of a build prefix.

use buildplane_core::{BuildConfiguration, BuildKey, BuildStatus, BuildTag, QaConfiguration};
use serde::{Deserialize, Serialize};

/// One build, assembled from the marker objects and blobs under its prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub key: BuildKey,
    pub status: BuildStatus,
    pub tags: Vec<BuildTag>,
    pub user: Option<String>,
    pub roles: Vec<String>,
    /// Builds without a visibility marker are visible.
    pub visible: bool,
    pub deleted: bool,
    /// Loaded only when the query asks for it.
    pub configuration: Option<BuildConfiguration>,
    pub qa_configuration: Option<QaConfiguration>,
    pub validation_url: Option<String>,
}

impl Build {
    /// A fresh build that has not been triggered yet.
    pub fn new(key: BuildKey) -> Self {
        Self {
            key,
            status: BuildStatus::BeforeTrigger,
            tags: Vec::new(),
            user: None,
            roles: Vec::new(),
            visible: true,
            deleted: false,
            configuration: None,
            qa_configuration: None,
            validation_url: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.key.build_id
    }

    pub fn with_configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_qa_configuration(mut self, qa_configuration: QaConfiguration) -> Self {
        self.qa_configuration = Some(qa_configuration);
        self
    }
}
