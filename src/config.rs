//! On-disk bootstrap configuration (`toml` + `serde`) and the
//! persisted-config compatibility check: subsequent runs refuse to start
//! against a store whose config differs in these fields.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::durable::DurableStore;
use crate::errs::{CoreError, CoreResult};
use crate::graph::{ClusterPolicy, MixedSampleManagement, MixtureCriterion, UncertainBaseType};

const CONFIG_KEY: &str = "bootstrap";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub snv_threshold: usize,
    pub uncertain_base_type: UncertainBaseTypeSpec,
    pub mixed_sample_management: MixedSampleManagementSpec,
    pub mixture_criterion: MixtureCriterionSpec,
    pub cutoff: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UncertainBaseTypeSpec {
    N,
    M,
    NOrM,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MixedSampleManagementSpec {
    Ignore,
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MixtureCriterionSpec {
    PValue1,
    PValue2,
    PValue3,
}

impl From<&PolicySpec> for ClusterPolicy {
    fn from(spec: &PolicySpec) -> Self {
        ClusterPolicy {
            name: spec.name.clone(),
            snv_threshold: spec.snv_threshold,
            uncertain_base_type: match spec.uncertain_base_type {
                UncertainBaseTypeSpec::N => UncertainBaseType::N,
                UncertainBaseTypeSpec::M => UncertainBaseType::M,
                UncertainBaseTypeSpec::NOrM => UncertainBaseType::NOrM,
            },
            mixed_sample_management: match spec.mixed_sample_management {
                MixedSampleManagementSpec::Ignore => MixedSampleManagement::Ignore,
                MixedSampleManagementSpec::Include => MixedSampleManagement::Include,
                MixedSampleManagementSpec::Exclude => MixedSampleManagement::Exclude,
            },
            mixture_criterion: match spec.mixture_criterion {
                MixtureCriterionSpec::PValue1 => MixtureCriterion::PValue1,
                MixtureCriterionSpec::PValue2 => MixtureCriterion::PValue2,
                MixtureCriterionSpec::PValue3 => MixtureCriterion::PValue3,
            },
            cutoff: spec.cutoff,
        }
    }
}

/// Bootstrap configuration as read from a TOML file at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub reference_path: String,
    pub mask_path: Option<String>,
    pub snp_ceiling: usize,
    pub max_ns: usize,
    pub snp_compression_ceiling: usize,
    #[serde(default)]
    pub recompress_frequency: usize,
    #[serde(default = "default_recompress_cutoff_prop")]
    pub recompress_cutoff_prop: f64,
    #[serde(default)]
    pub num_workers: usize,
    pub policies: Vec<PolicySpec>,
}

fn default_recompress_cutoff_prop() -> f64 {
    0.5
}

impl BootstrapConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: BootstrapConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// The subset of fields that make stored records/links meaningless if
    /// changed across runs: reference/mask identity, the two SNP ceilings,
    /// the N threshold and every policy definition.
    fn compatibility_fields(&self, reference_hash: &str, mask_hash: &str) -> Value {
        json!({
            "reference_hash": reference_hash,
            "mask_hash": mask_hash,
            "snp_ceiling": self.snp_ceiling,
            "max_ns": self.max_ns,
            "snp_compression_ceiling": self.snp_compression_ceiling,
            "policies": self.policies,
        })
    }

    /// Writes this config as the first-run baseline, or checks it matches
    /// the previously persisted baseline. Returns the field name on
    /// mismatch, as `CoreError::ConfigDrift`.
    pub fn check_or_initialize(
        &self,
        durable: &dyn DurableStore,
        reference_hash: &str,
        mask_hash: &str,
    ) -> CoreResult<()> {
        let current = self.compatibility_fields(reference_hash, mask_hash);
        match durable.get_config(CONFIG_KEY)? {
            None => {
                durable.put_config(CONFIG_KEY, &current)?;
                Ok(())
            }
            Some(persisted) => {
                let persisted_obj = persisted.as_object().cloned().unwrap_or_default();
                let current_obj = current.as_object().cloned().unwrap_or_default();
                for (field, value) in &current_obj {
                    if persisted_obj.get(field) != Some(value) {
                        return Err(CoreError::ConfigDrift { field: field.clone() });
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::memory::MemoryStore;

    fn sample_config() -> BootstrapConfig {
        BootstrapConfig {
            reference_path: "ref.fasta".to_string(),
            mask_path: None,
            snp_ceiling: 20,
            max_ns: 100,
            snp_compression_ceiling: 50,
            recompress_frequency: 100,
            recompress_cutoff_prop: 0.5,
            num_workers: 4,
            policies: vec![PolicySpec {
                name: "default".to_string(),
                snv_threshold: 12,
                uncertain_base_type: UncertainBaseTypeSpec::N,
                mixed_sample_management: MixedSampleManagementSpec::Ignore,
                mixture_criterion: MixtureCriterionSpec::PValue1,
                cutoff: 0.001,
            }],
        }
    }

    #[test]
    fn first_run_initializes_then_matches() {
        let durable = MemoryStore::new();
        let config = sample_config();
        config.check_or_initialize(&durable, "refhash", "maskhash").unwrap();
        assert!(config.check_or_initialize(&durable, "refhash", "maskhash").is_ok());
    }

    #[test]
    fn drift_is_rejected() {
        let durable = MemoryStore::new();
        let config = sample_config();
        config.check_or_initialize(&durable, "refhash", "maskhash").unwrap();

        let mut drifted = sample_config();
        drifted.snp_ceiling = 99;
        let err = drifted.check_or_initialize(&durable, "refhash", "maskhash").unwrap_err();
        assert_eq!(err.kind(), crate::errs::ErrorKind::StateConflict);
    }
}
