use anyhow::Result;

use crate::identity::Identity;

// Default configuration constants
pub(crate) const DEFAULT_FAIL_REMOVAL_THRESHOLD: u64 = 20; // logical time units

/// [`Config`] carries the per-node settings of the membership engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's own network identity.
    pub(crate) identity: Identity,

    /// Age (in logical time units) past which a non-refreshed member entry
    /// is evicted during the periodic sweep. This single threshold is the
    /// whole failure-detection policy.
    pub(crate) fail_removal_threshold: u64,
}

impl Config {
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn fail_removal_threshold(&self) -> u64 {
        self.fail_removal_threshold
    }
}

pub struct ConfigBuilder {
    id: u32,
    port: u16,
    fail_removal_threshold: u64,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            id: 0,
            port: 0,
            fail_removal_threshold: DEFAULT_FAIL_REMOVAL_THRESHOLD,
        }
    }
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the numeric id of the node.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// Sets the port of the node.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the failure-removal age threshold, in logical time units.
    pub fn with_fail_removal_threshold(mut self, threshold: u64) -> Self {
        self.fail_removal_threshold = threshold;
        self
    }

    /// Validates the current configuration.
    fn validate(&self) -> Result<()> {
        if Identity::new(self.id, self.port).is_null() {
            anyhow::bail!("node identity is not set (all-zero identity is the null sentinel)");
        }
        if self.fail_removal_threshold == 0 {
            anyhow::bail!("fail removal threshold must be greater than zero");
        }
        Ok(())
    }

    /// Builds the final [`Config`].
    pub fn build(self) -> Result<Config> {
        self.validate()?;
        Ok(Config {
            identity: Identity::new(self.id, self.port),
            fail_removal_threshold: self.fail_removal_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let config = ConfigBuilder::new().with_id(3).build().unwrap();
        assert_eq!(config.identity(), Identity::new(3, 0));
        assert_eq!(config.fail_removal_threshold(), DEFAULT_FAIL_REMOVAL_THRESHOLD);
    }

    #[test]
    fn test_null_identity_is_rejected() {
        assert!(ConfigBuilder::new().build().is_err());
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let result = ConfigBuilder::new()
            .with_id(1)
            .with_fail_removal_threshold(0)
            .build();
        assert!(result.is_err());
    }
}
