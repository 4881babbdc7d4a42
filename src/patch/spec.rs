//! What to patch: target class and method, local slot and hook method.
//!
//! A [`PatchSpec`] can be loaded from TOML; descriptors are written as JVM
//! descriptor strings:
//!
//! ```toml
//! target_class_path = "a/B.class"
//! target_class_name = "a/B"
//! slot = 1
//! extra_entry_paths = ["h/Hook.class"]
//!
//! [target_method]
//! name = "m"
//! descriptor = "(Ljava/lang/String;)V"
//!
//! [hook]
//! class = "h/Hook"
//! name = "process"
//! descriptor = "(Ljava/lang/String;)Ljava/lang/String;"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classfile::descriptor::{FieldType, MethodDescriptor, ReturnType};
use crate::consts;
use crate::error::{Error, Result};

/// Method to patch, matched by name and structural descriptor equality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetMethod {
    pub name: String,
    #[serde(with = "descriptor_string")]
    pub descriptor: MethodDescriptor,
}

/// Static method invoked with, and returning, the value in the patched slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookMethod {
    /// Internal name of the owning class
    pub class: String,
    pub name: String,
    #[serde(with = "descriptor_string")]
    pub descriptor: MethodDescriptor,
    /// Reference the hook through an InterfaceMethodref
    #[serde(default)]
    pub is_interface: bool,
}

impl HookMethod {
    /// Type of the value passed through the hook, once validated
    pub fn value_type(&self) -> Option<&FieldType> {
        match (self.descriptor.parameters.as_slice(), &self.descriptor.return_type) {
            ([param], ReturnType::Value(ret)) if param == ret => Some(param),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    /// Archive entry path of the target class, `/`-separated
    pub target_class_path: String,
    /// Internal name of the target class
    pub target_class_name: String,
    pub target_method: TargetMethod,
    /// Local variable slot loaded, passed to the hook and stored back
    pub slot: u16,
    pub hook: HookMethod,
    /// Archive paths of entries appended after the originals
    #[serde(default)]
    pub extra_entry_paths: Vec<String>,
}

impl Default for PatchSpec {
    fn default() -> Self {
        Self {
            target_class_path: consts::DEFAULT_TARGET_CLASS_PATH.to_string(),
            target_class_name: consts::DEFAULT_TARGET_CLASS_NAME.to_string(),
            target_method: TargetMethod {
                name: consts::DEFAULT_TARGET_METHOD_NAME.to_string(),
                descriptor: default_descriptor(consts::DEFAULT_TARGET_METHOD_DESCRIPTOR),
            },
            slot: consts::DEFAULT_HOOK_SLOT,
            hook: HookMethod {
                class: consts::DEFAULT_HOOK_CLASS.to_string(),
                name: consts::DEFAULT_HOOK_METHOD.to_string(),
                descriptor: default_descriptor(consts::DEFAULT_HOOK_DESCRIPTOR),
                is_interface: false,
            },
            extra_entry_paths: consts::DEFAULT_EXTRA_ENTRIES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

// The built-in descriptors are constants known to parse.
fn default_descriptor(descriptor: &str) -> MethodDescriptor {
    descriptor
        .parse()
        .unwrap_or_else(|_| MethodDescriptor::new(Vec::new(), ReturnType::Void))
}

impl PatchSpec {
    /// Parse and validate a spec from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let spec: PatchSpec = toml::from_str(text).map_err(|e| Error::invalid_spec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read, parse and validate a spec file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid_spec(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check the invariants the patcher relies on
    pub fn validate(&self) -> Result<()> {
        if self.target_class_name.is_empty() || self.target_method.name.is_empty() {
            return Err(Error::invalid_spec("target class and method names must not be empty"));
        }
        if self.target_class_path != format!("{}.class", self.target_class_name) {
            return Err(Error::invalid_spec(format!(
                "target class path '{}' does not belong to class '{}'",
                self.target_class_path, self.target_class_name
            )));
        }
        if self.hook.class.is_empty() || self.hook.name.is_empty() {
            return Err(Error::invalid_spec("hook class and method names must not be empty"));
        }
        if self.hook.value_type().is_none() {
            return Err(Error::invalid_spec(format!(
                "hook descriptor '{}' must take one parameter and return the same type",
                self.hook.descriptor
            )));
        }
        let mut seen = HashSet::new();
        for path in &self.extra_entry_paths {
            if path.is_empty() || path.ends_with('/') {
                return Err(Error::invalid_spec(format!("'{}' is not a file entry path", path)));
            }
            if !seen.insert(path.as_str()) {
                return Err(Error::invalid_spec(format!("extra entry '{}' listed twice", path)));
            }
        }
        Ok(())
    }
}

mod descriptor_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::classfile::descriptor::MethodDescriptor;

    pub fn serialize<S: Serializer>(descriptor: &MethodDescriptor, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(descriptor)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MethodDescriptor, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
