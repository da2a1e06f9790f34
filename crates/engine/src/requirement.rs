//! Requirement hooks
//!
//! A requirement names a resource that must be `present` before the
//! declaring resource's lifecycle starts. The engine only evaluates a single
//! hop; ordering across a whole topology is left to the caller.

use crate::manager::{ResourceEntry, ResourceManager};
use netbed_common::{Error, LifecycleState, ResourceKey, Result};
use std::fmt;

/// Named dependency on another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    /// Reference attribute naming the required resource
    pub name: String,
    /// Reference attribute to follow first, if the required resource is
    /// reached through a related resource (`via.name`)
    pub via: Option<String>,
}

impl Requirement {
    /// Requirement on a resource referenced by the declaring resource
    pub fn on(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            via: None,
        }
    }

    /// Requirement on `via.name`
    pub fn through(via: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            via: Some(via.into()),
        }
    }

    /// Find the key of the required resource
    pub fn target(&self, manager: &ResourceManager, owner: &ResourceEntry) -> Result<ResourceKey> {
        let unmet = || Error::RequirementUnmet {
            key: owner.key().to_string(),
            requirement: self.to_string(),
        };

        let holder = match &self.via {
            Some(via) => {
                let key = owner.get_ref(via).map_err(|_| unmet())?;
                manager.get(&key).map_err(|_| unmet())?
            }
            None => manager.get(owner.key())?,
        };
        holder.get_ref(&self.name).map_err(|_| unmet())
    }

    /// Check that the required resource exists and is `present`
    pub fn check(&self, manager: &ResourceManager, owner: &ResourceEntry) -> Result<()> {
        let key = self.target(manager, owner)?;
        let target = manager.get(&key).map_err(|_| Error::RequirementUnmet {
            key: owner.key().to_string(),
            requirement: self.to_string(),
        })?;
        if target.state() == LifecycleState::Present {
            Ok(())
        } else {
            Err(Error::RequirementUnmet {
                key: owner.key().to_string(),
                requirement: format!("{} ({} is {})", self, key, target.state()),
            })
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.via {
            Some(via) => write!(f, "{}.{}", via, self.name),
            None => f.write_str(&self.name),
        }
    }
}
